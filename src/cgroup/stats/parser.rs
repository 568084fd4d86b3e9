//! Generic traits for parsing Linux cgroup accounting files into typed records.
//!
//! Two shapes of file exist under a cgroup v2 directory:
//!
//! - multi-line key-value files (`cpu.stat`, `memory.stat`, `memory.events`),
//!   handled by [`KeyValueStat`] with per-format knobs for the separator and
//!   leading tokens to skip,
//! - single-line scalar files (`memory.current`, `pids.max`), handled by
//!   [`SingleLineStat`].
//!
//! Fields start out absent and are only populated when the corresponding key
//! is present in the file, so a kernel built without a counter yields `None`
//! rather than a false zero.
//!
//! Malformed values for known keys do not abort the file: the parser keeps
//! the first error, continues with the remaining lines, and hands back a
//! [`Parsed`] carrying the partial record. The caller decides whether to use
//! the partial data (the collection path does, and counts the error).
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::LazyLock;
//! use cgroup_exporter::cgroup::stats::KeyValueStat;
//!
//! #[derive(Default)]
//! struct MyStat {
//!     foo: Option<u64>,
//! }
//!
//! static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut MyStat, u64)>> =
//!     LazyLock::new(|| {
//!         let mut m: HashMap<&'static str, fn(&mut MyStat, u64)> = HashMap::new();
//!         m.insert("foo", |stat, v| stat.foo = Some(v));
//!         m
//!     });
//!
//! impl KeyValueStat for MyStat {
//!     const SPLIT_CHAR: Option<char> = Some('=');
//!     const SKIP_VALUES: usize = 0;
//!
//!     fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
//!         &HANDLERS
//!     }
//! }
//!
//! let mut data = "foo=123".as_bytes();
//! let parsed = MyStat::from_reader(&mut data).unwrap();
//! assert_eq!(parsed.record.foo, Some(123));
//! assert!(parsed.error.is_none());
//! ```

use std::collections::HashMap;
use std::io::BufRead;

use super::StatParseError;

/// A record parsed from one accounting file, possibly incomplete.
///
/// `error` holds the first file-scoped parse error encountered; fields after
/// the offending line are still populated when parseable.
#[derive(Debug)]
pub struct Parsed<T> {
    pub record: T,
    pub error: Option<StatParseError>,
}

impl<T> Parsed<T> {
    pub fn complete(record: T) -> Self {
        Self {
            record,
            error: None,
        }
    }

    /// Whether the record is missing data due to a parse error.
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// A trait for parsing structured key-value style `*.stat` files such as
/// `cpu.stat`, `memory.stat` or `memory.events`.
///
/// Implementors provide a static table of known keys and setter functions;
/// the trait supplies the line-by-line reader. Unknown keys are ignored, so
/// newer kernels with additional counters parse cleanly.
pub trait KeyValueStat: Default
where
    Self: 'static,
{
    /// If `Some(char)`, each pair is joined by that character (`rbytes=1024`).
    /// If `None`, key and value are separate whitespace tokens (`anon 1000`).
    const SPLIT_CHAR: Option<char>;

    /// The number of whitespace-separated tokens to skip at the start of each
    /// line (e.g. the `MAJ:MIN` device column of `io.stat`).
    const SKIP_VALUES: usize;

    /// Returns the map from known field names to setter functions.
    fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)>;

    /// Parses a key-value formatted buffer into the implementing record.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` only when reading the buffer itself fails.
    /// Malformed values are reported through [`Parsed::error`] instead.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut parsed = Parsed::complete(Self::default());
        let handlers = Self::field_handlers();

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            Self::parse_line(&mut parsed, &line, lineno, handlers);
            line.clear();
        }

        Ok(parsed)
    }

    /// Parses a single line into zero or more key-value pairs.
    fn parse_line(
        parsed: &mut Parsed<Self>,
        line: &str,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
    ) {
        let mut parts = line.split_whitespace().skip(Self::SKIP_VALUES);

        if let Some(split_char) = Self::SPLIT_CHAR {
            for part in parts {
                if let Some((key, val)) = part.split_once(split_char) {
                    Self::parse_and_set(key, val, parsed, lineno, handlers);
                }
            }
        } else {
            while let (Some(key), Some(val)) = (parts.next(), parts.next()) {
                Self::parse_and_set(key, val, parsed, lineno, handlers);
            }
        }
    }

    /// Parses one key-value pair and applies the matching field handler.
    ///
    /// Unknown keys are skipped. A value for a known key that fails to parse
    /// as `u64` is recorded as the file's error (first one wins) and the
    /// field stays absent.
    fn parse_and_set(
        key: &str,
        val: &str,
        parsed: &mut Parsed<Self>,
        lineno: usize,
        handlers: &HashMap<&'static str, fn(&mut Self, u64)>,
    ) {
        let Some(handler) = handlers.get(key) else {
            return;
        };

        match val.parse::<u64>() {
            Ok(value) => handler(&mut parsed.record, value),
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
}

/// A trait for parsing single-line, single-value files, such as
/// `memory.current` or `pids.max`.
pub trait SingleLineStat: Sized + Default {
    /// Parses a single-line statistic from the provided buffered reader.
    ///
    /// # Errors
    ///
    /// * `Ok(Parsed)` when reading succeeds; a malformed value is surfaced
    ///   through [`Parsed::error`] with a default record.
    /// * `Err(std::io::Error)` when reading itself fails.
    fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    #[derive(Default)]
    struct TwoFields {
        foo: Option<u64>,
        bar: Option<u64>,
    }

    static HANDLERS: LazyLock<HashMap<&'static str, fn(&mut TwoFields, u64)>> =
        LazyLock::new(|| {
            let mut m: HashMap<&'static str, fn(&mut TwoFields, u64)> = HashMap::new();
            m.insert("foo", |s, v| s.foo = Some(v));
            m.insert("bar", |s, v| s.bar = Some(v));
            m
        });

    impl KeyValueStat for TwoFields {
        const SPLIT_CHAR: Option<char> = None;
        const SKIP_VALUES: usize = 0;

        fn field_handlers() -> &'static HashMap<&'static str, fn(&mut Self, u64)> {
            &HANDLERS
        }
    }

    #[test]
    fn test_missing_keys_stay_absent() {
        let mut data = "foo 7\n".as_bytes();
        let parsed = TwoFields::from_reader(&mut data).unwrap();
        assert_eq!(parsed.record.foo, Some(7));
        assert_eq!(parsed.record.bar, None);
        assert!(!parsed.is_partial());
    }

    #[test]
    fn test_malformed_value_keeps_rest_of_file() {
        let mut data = "foo abc\nbar 3\n".as_bytes();
        let parsed = TwoFields::from_reader(&mut data).unwrap();
        assert_eq!(parsed.record.foo, None);
        assert_eq!(parsed.record.bar, Some(3));
        match parsed.error {
            Some(StatParseError::InvalidKeyValue { key, value, line, .. }) => {
                assert_eq!(key, "foo");
                assert_eq!(value, "abc");
                assert_eq!(line, 1);
            }
            other => panic!("expected InvalidKeyValue, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut data = "something_else 1\nfoo 2\n".as_bytes();
        let parsed = TwoFields::from_reader(&mut data).unwrap();
        assert_eq!(parsed.record.foo, Some(2));
        assert!(!parsed.is_partial());
    }
}
