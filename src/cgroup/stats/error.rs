//! Structured error types for parsing cgroup accounting files.
//!
//! A [`StatParseError`] is always scoped to a single file: a malformed value
//! in `memory.stat` never taints the parse of `memory.current`. Parsers
//! return partial records alongside the first error they hit (see
//! [`super::Parsed`]), leaving the use-or-discard decision to the caller.

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatParseError {
    #[error("invalid value for '{key}' at line {line}: '{value}': {source}")]
    InvalidKeyValue {
        key: String,
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid value at line {line}: '{value}': {source}")]
    InvalidValue {
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },
}
