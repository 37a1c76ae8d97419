//! Crate-wide error taxonomy.
//!
//! Only the handful of conditions that should terminate the process, or
//! that a caller needs to match on by type, get a variant here.
//! Everything else — transient I/O, 404/410, malformed rule regex, rate
//! limits — is logged and absorbed at the point of occurrence rather
//! than bubbled up as a typed error.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredsweepError {
    #[error("rules database unavailable: {0}")]
    RulesUnavailable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("authentication failed against provider")]
    ProviderAuth,

    #[error("hit detection timed out ({0:?})")]
    Timeout(Duration),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("archive error: {0}")]
    Archive(String),
}

pub type Result<T> = std::result::Result<T, CredsweepError>;
