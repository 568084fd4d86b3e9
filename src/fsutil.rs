use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

/// Error that occurs when opening a file fails.
#[derive(Debug, thiserror::Error)]
#[error("failed to open file `{path}`: {source}")]
pub struct FileOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Opens an accounting file that may legitimately not exist.
///
/// Returns `Ok(None)` when the file is absent (a kernel built without the
/// counter, or a controller not enabled for the group), so the caller can
/// record the metric as absent instead of zero. Any other open failure is a
/// real error.
pub fn open_optional(path: impl AsRef<Path>) -> Result<Option<BufReader<File>>, FileOpenError> {
    let path = path.as_ref();
    match File::open(path) {
        Ok(file) => Ok(Some(BufReader::new(file))),
        Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(FileOpenError {
            path: path.to_path_buf(),
            source,
        }),
    }
}
