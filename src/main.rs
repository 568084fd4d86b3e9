/// Entry point for the cgroup v2 metrics exporter.
///
/// Resolves the configuration, verifies the hierarchy root and serves
/// metrics over HTTP until terminated.
///
/// # Errors
///
/// Returns an error when configuration is invalid, the cgroup root is not a
/// cgroup v2 mount, or the listener cannot bind.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info CGROUP_EXPORTER_LISTEN_ADDRESS=0.0.0.0:9753 cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let config = cgroup_exporter::config::Config::load()?;
    cgroup_exporter::run(config).await?;
    Ok(())
}
