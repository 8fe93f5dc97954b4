//! Error types for the resolver.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while decoding a datagram into a [`Message`](crate::dns::Message).
///
/// Every variant is recoverable: the offending packet is dropped and the
/// listener keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("packet too short: needed {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("name of {0} bytes exceeds the 255 byte limit")]
    NameTooLong(usize),

    #[error("label of {0} bytes exceeds the 63 byte limit")]
    LabelTooLong(usize),

    #[error("reserved label type {0:#04x} at offset {1}")]
    BadLabel(u8, usize),

    #[error("expected exactly one question, got {0}")]
    QuestionCount(u16),

    #[error("record data length {0} exceeds the maximum packet size")]
    RecordTooLarge(usize),
}

/// Errors raised while turning a query into a locally generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerError {
    #[error("cannot answer a {0} question locally")]
    UnsupportedType(u16),

    #[error("invalid address literal: {literal:?}")]
    InvalidAddress { literal: String },

    #[error("{literal} is not an {expected} address")]
    FamilyMismatch {
        expected: &'static str,
        literal: String,
    },
}

/// Settings store failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("setting {0} is not set")]
    Missing(&'static str),

    #[error("setting {key} has the wrong type, expected {expected}")]
    WrongType {
        key: &'static str,
        expected: &'static str,
    },

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Blacklist collaborator failures.
#[derive(Debug, Error)]
pub enum BlacklistError {
    #[error("blacklist unavailable: {0}")]
    Io(#[from] io::Error),

    #[error("invalid blacklist pattern: {0:?}")]
    InvalidPattern(String),

    #[error("pattern not in blacklist: {0:?}")]
    NotFound(String),
}

/// The correlation table lock could not be acquired in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("timed out waiting for the correlation table lock")]
pub struct LockTimeout;

/// Top level error for server startup.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
