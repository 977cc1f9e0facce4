//! Error taxonomy for workload operations.
//!
//! Workers never branch on raw backend errors; every failure is first
//! classified into an [`ErrorKind`] which drives retry, accounting and
//! band-abort decisions.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection reset, serialization failure, lock timeout: retried with
    /// backoff.
    Transient,
    /// Per-operation deadline exceeded: retried once.
    Timeout,
    /// Short-circuited by the breaker: counted, never retried.
    CircuitOpen,
    /// Syntax, permission, missing schema: never retried.
    Permanent,
    /// Backend unreachable at pool acquisition: aborts the band.
    Fatal,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Permanent => "permanent",
            Self::Fatal => "fatal",
        }
    }

    /// Whether the worker loop may retry an operation failing with this kind.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }

    #[must_use]
    pub const fn all() -> [Self; 5] {
        [
            Self::Transient,
            Self::Timeout,
            Self::CircuitOpen,
            Self::Permanent,
            Self::Fatal,
        ]
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surface of a [`crate::driver::WorkloadDriver`] operation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Other(String),
}

/// A single failed operation, as seen by the worker loop.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("circuit open")]
    CircuitOpen,
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("connection acquisition failed: {0}")]
    Acquire(#[source] sqlx::Error),
}

impl OpError {
    /// Map an error to its kind using wire-level SQLSTATE codes where
    /// available.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen => ErrorKind::CircuitOpen,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Acquire(e) => classify_sqlx(e),
            Self::Driver(DriverError::Other(_)) => ErrorKind::Permanent,
            Self::Driver(DriverError::Database(e)) => classify_sqlx(e),
        }
    }
}

fn classify_sqlx(error: &sqlx::Error) -> ErrorKind {
    match error {
        sqlx::Error::Database(db) => db.code().map_or(ErrorKind::Transient, |code| {
            classify_sqlstate(code.as_ref())
        }),
        sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::Tls(_) => ErrorKind::Transient,
        sqlx::Error::PoolClosed | sqlx::Error::Configuration(_) => ErrorKind::Fatal,
        _ => ErrorKind::Permanent,
    }
}

/// SQLSTATE → kind mapping. Class prefixes follow the PostgreSQL error-code
/// appendix; anything unrecognized is treated as permanent so it is never
/// retried blindly.
fn classify_sqlstate(code: &str) -> ErrorKind {
    match code {
        // serialization_failure, deadlock_detected, lock_not_available
        "40001" | "40P01" | "55P03" => ErrorKind::Transient,
        // too_many_connections, cannot_connect_now
        "53300" | "57P03" => ErrorKind::Transient,
        // query_canceled (statement_timeout fires server-side)
        "57014" => ErrorKind::Timeout,
        // admin_shutdown, crash_shutdown
        "57P01" | "57P02" => ErrorKind::Fatal,
        _ => match code.get(..2) {
            // class 08: connection exceptions
            Some("08") => ErrorKind::Transient,
            // class 28: invalid authorization, class 3D/3F: missing catalog
            Some("28" | "3D" | "3F") => ErrorKind::Permanent,
            // class 42: syntax or access-rule violation
            Some("42") => ErrorKind::Permanent,
            // class 53: insufficient resources (disk full aside, worth retrying)
            Some("53") => ErrorKind::Transient,
            _ => ErrorKind::Permanent,
        },
    }
}
