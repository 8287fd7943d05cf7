//! Error kinds for the schema manager and the KV facade it sits on.
//!
//! Mirrors the teacher's `crate::error::{CResult, Error}` naming (referenced
//! throughout the original `kv` crate even though the teacher never checked
//! in the module itself) and keeps the same hand-rolled `Display`/`Error`
//! style used elsewhere in this codebase rather than pulling in `thiserror`,
//! which the teacher's dependency tree does not carry.

use std::fmt::{self, Display};

pub type CResult<T> = Result<T, Error>;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Required metadata keys (`generation`/`dataVersion`) were missing
    /// where the schema manager expected them to already exist.
    ExternalClear(String),

    /// `dataVersion`/`metaDataVersion` stored in the KV store disagree with
    /// the constants this build expects.
    Incompatible { stored_data: i64, stored_meta: i64 },

    /// A candidate AIS failed validation; the caller's DDL never committed.
    InvalidSchema { reasons: Vec<String> },

    /// Two online sessions would claim the same schema or table, whether
    /// caught at stage time or while building an `OnlineCache` snapshot.
    ConflictingOnlineChange(String),

    /// DML logged an hkey against a table with no active online session.
    NoSuchOnlineChange(String),

    /// The underlying KV transaction's optimistic commit lost a race; the
    /// caller should retry from scratch.
    CommitConflict,

    /// An invariant was violated. Never recovered from.
    Internal(String),

    /// Wraps a filesystem/O.S. error from the storage engine.
    Io(String),

    /// A value failed to (de)serialize.
    Parse(String),

    /// Catch-all for storage engine conditions that don't merit their own
    /// variant (path rename failures, lock contention messages, etc).
    Value(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ExternalClear(msg) => write!(f, "metadata externally modified, restart required: {msg}"),
            Error::Incompatible { stored_data, stored_meta } => write!(
                f,
                "incompatible schema-manager metadata: stored dataVersion={stored_data}, metaDataVersion={stored_meta}"
            ),
            Error::InvalidSchema { reasons } => write!(f, "invalid schema: {}", reasons.join("; ")),
            Error::ConflictingOnlineChange(msg) => write!(f, "conflicting online change: {msg}"),
            Error::NoSuchOnlineChange(msg) => write!(f, "no such online change: {msg}"),
            Error::CommitConflict => write!(f, "commit conflict, retry"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::Value(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_human_readable() {
        let err = Error::InvalidSchema { reasons: vec!["column x unknown".into()] };
        assert_eq!(err.to_string(), "invalid schema: column x unknown");
    }
}
