//! Error types shared by every verification and wait primitive

use std::time::Duration;

use thiserror::Error;

use crate::mysql::SqlError;
use crate::store::StoreError;

/// Error variants follow the harness taxonomy: a bounded wait ran out of time,
/// a collaborator call failed, observed state disagreed with expectations, or
/// teardown left objects behind.
#[derive(Error, Debug)]
pub enum Error {
    #[error("timeout after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("object store error: {0}")]
    Store(#[from] StoreError),

    #[error("database session error: {0}")]
    Sql(#[from] SqlError),

    #[error("{what}: expected {expected} but got {actual}")]
    Mismatch {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("{0}")]
    Verification(String),

    #[error("namespace {namespace} is not empty after teardown:\n{pending}")]
    ResidualState { namespace: String, pending: String },

    #[error("missing field {path} in {object}")]
    MissingField { object: String, path: String },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl Error {
    /// Build a state-mismatch error from anything displayable.
    pub fn mismatch(
        what: impl Into<String>,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Error::Mismatch {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn verification(message: impl Into<String>) -> Self {
        Error::Verification(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// Check if re-running the failed step could succeed.
    ///
    /// Timeouts may be re-waited and transport errors may be transient. State
    /// mismatches and teardown residue are terminal for the step.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Store(e) => e.is_retryable(),
            Error::Sql(e) => e.is_retryable(),
            Error::Mismatch { .. }
            | Error::Verification(_)
            | Error::ResidualState { .. }
            | Error::MissingField { .. }
            | Error::InvalidPattern(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
