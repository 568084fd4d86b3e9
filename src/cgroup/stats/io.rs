//! Parsing for block I/O accounting as reported in cgroup v2 `io.stat` files.
//!
//! Each line describes one block device: a `MAJ:MIN` identifier followed by
//! whitespace-separated `key=value` pairs:
//!
//! ```text
//! 8:0 rbytes=1024 wbytes=2048 rios=12 wios=24 dbytes=0 dios=0
//! ```
//!
//! Devices are kept apart rather than summed, because I/O metrics carry a
//! `device` label. Unknown keys and malformed pairs are ignored; a malformed
//! value for a known key marks the parse as partial while the remaining
//! devices still get read.

use std::io::BufRead;

use super::parser::Parsed;
use super::StatParseError;

/// Per-device counters from one `io.stat` line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIoStat {
    /// `MAJ:MIN` device identifier.
    pub device: String,
    /// Bytes read.
    pub rbytes: Option<u64>,
    /// Bytes written.
    pub wbytes: Option<u64>,
    /// Read operations.
    pub rios: Option<u64>,
    /// Write operations.
    pub wios: Option<u64>,
}

/// All devices reported by an `io.stat` file, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IoStat {
    pub devices: Vec<DeviceIoStat>,
}

impl IoStat {
    /// Parses an `io.stat`-style file from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` only when reading fails; malformed values are
    /// surfaced through [`Parsed::error`].
    pub fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut parsed = Parsed::complete(IoStat::default());

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let mut parts = line.split_whitespace();
            let Some(device) = parts.next() else {
                line.clear();
                continue;
            };

            let mut stat = DeviceIoStat {
                device: device.to_string(),
                ..DeviceIoStat::default()
            };
            for part in parts {
                let Some((key, val)) = part.split_once('=') else {
                    continue;
                };
                let field = match key {
                    "rbytes" => &mut stat.rbytes,
                    "wbytes" => &mut stat.wbytes,
                    "rios" => &mut stat.rios,
                    "wios" => &mut stat.wios,
                    _ => continue,
                };
                match val.parse::<u64>() {
                    Ok(value) => *field = Some(value),
                    Err(source) => {
                        if parsed.error.is_none() {
                            parsed.error = Some(StatParseError::InvalidKeyValue {
                                key: key.to_string(),
                                value: val.to_string(),
                                line: lineno,
                                source,
                            });
                        }
                    }
                }
            }

            parsed.record.devices.push(stat);
            line.clear();
        }

        Ok(parsed)
    }
}
