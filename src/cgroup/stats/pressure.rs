//! Parsing for pressure stall information (`cpu.pressure`, `memory.pressure`,
//! `io.pressure`).
//!
//! Each line carries a severity kind followed by `key=value` pairs:
//!
//! ```text
//! some avg10=0.12 avg60=0.05 avg300=0.01 total=123456
//! full avg10=0.00 avg60=0.00 avg300=0.00 total=12345
//! ```
//!
//! Only the cumulative `total` stall time (microseconds) is extracted; the
//! kernel's decaying averages are derivable by the scrape client from the
//! counter. The `full` line is absent for the CPU resource on older kernels,
//! which parses to an absent field, not zero.

use std::io::BufRead;

use super::parser::Parsed;
use super::StatParseError;

/// Cumulative stall time by severity kind from a `*.pressure` file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PressureStat {
    /// Time some tasks were stalled on the resource, in microseconds.
    pub some_total_usec: Option<u64>,
    /// Time all tasks were stalled on the resource, in microseconds.
    pub full_total_usec: Option<u64>,
}

impl PressureStat {
    /// Parses a pressure-stall file from a buffered reader.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` only when reading fails; a malformed `total`
    /// value is surfaced through [`Parsed::error`].
    pub fn from_reader<R: BufRead>(buf: &mut R) -> std::io::Result<Parsed<Self>> {
        let mut parsed = Parsed::complete(PressureStat::default());

        let mut line = String::new();
        let mut lineno = 0;
        while buf.read_line(&mut line)? != 0 {
            lineno += 1;
            let mut parts = line.split_whitespace();
            let kind = parts.next();
            let field = match kind {
                Some("some") => &mut parsed.record.some_total_usec,
                Some("full") => &mut parsed.record.full_total_usec,
                _ => {
                    line.clear();
                    continue;
                }
            };

            for part in parts {
                let Some((key, val)) = part.split_once('=') else {
                    continue;
                };
                if key != "total" {
                    continue;
                }
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

            line.clear();
        }

        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_some_and_full() {
        let data = "\
some avg10=0.12 avg60=0.05 avg300=0.01 total=123456
full avg10=0.00 avg60=0.00 avg300=0.00 total=789
";
        let parsed = PressureStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.some_total_usec, Some(123_456));
        assert_eq!(parsed.record.full_total_usec, Some(789));
        assert!(!parsed.is_partial());
    }

    #[test]
    fn test_parse_some_only() {
        let data = "some avg10=0.00 avg60=0.00 avg300=0.00 total=42\n";
        let parsed = PressureStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.some_total_usec, Some(42));
        assert_eq!(parsed.record.full_total_usec, None);
    }

    #[test]
    fn test_parse_empty_pressure() {
        let data = "";
        let parsed = PressureStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record, PressureStat::default());
    }

    #[test]
    fn test_parse_malformed_total_is_partial() {
        let data = "\
some avg10=0.00 avg60=0.00 avg300=0.00 total=oops
full avg10=0.00 avg60=0.00 avg300=0.00 total=7
";
        let parsed = PressureStat::from_reader(&mut data.as_bytes()).unwrap();
        assert_eq!(parsed.record.some_total_usec, None);
        assert_eq!(parsed.record.full_total_usec, Some(7));
        assert!(parsed.is_partial());
    }
}
