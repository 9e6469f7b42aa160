use std::fmt;

use thiserror::Error;

/// Canonical status codes surfaced by the coordinator's response builders.
///
/// Every failure path returns one of these; there is no out-of-band error
/// channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BadValue,
    NotSecondary,
    NodeNotFound,
    InvalidOptions,
    HostUnreachable,
    ReplicaSetNotFound,
    ShutdownInProgress,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadValue => "BadValue",
            ErrorCode::NotSecondary => "NotSecondary",
            ErrorCode::NodeNotFound => "NodeNotFound",
            ErrorCode::InvalidOptions => "InvalidOptions",
            ErrorCode::HostUnreachable => "HostUnreachable",
            ErrorCode::ReplicaSetNotFound => "ReplicaSetNotFound",
            ErrorCode::ShutdownInProgress => "ShutdownInProgress",
            ErrorCode::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status code plus the human-readable reason.
///
/// Reason strings are part of the wire contract; callers assert on them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{code}: {reason}")]
pub struct StatusError {
    pub code: ErrorCode,
    pub reason: String,
}

impl StatusError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    pub fn bad_value(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadValue, reason)
    }

    pub fn not_secondary(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotSecondary, reason)
    }

    pub fn node_not_found(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::NodeNotFound, reason)
    }

    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOptions, reason)
    }

    pub fn host_unreachable(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::HostUnreachable, reason)
    }

    pub fn replica_set_not_found(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::ReplicaSetNotFound, reason)
    }

    pub fn shutdown_in_progress() -> Self {
        Self::new(
            ErrorCode::ShutdownInProgress,
            "replication system is shutting down",
        )
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, reason)
    }
}
