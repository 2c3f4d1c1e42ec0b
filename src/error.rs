//! Error taxonomy shared by the fetchers, the executor and the scoring engine.
//!
//! `Transient` failures are retried by the executor. `Auth` and `Validation`
//! abort a retry loop immediately. Only the orchestrator turns these into the
//! small set of user-facing categories; provider text never leaves the core.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Retry classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timeouts, connection resets, 5xx, rate limiting.
    Transient,
    /// Rejected credentials. Surfaced to the operator, never retried.
    Auth,
    /// Malformed request or a location the provider cannot serve.
    Validation,
}

impl FailureClass {
    pub fn is_fatal(self) -> bool {
        !matches!(self, FailureClass::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Auth => "auth",
            FailureClass::Validation => "validation",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed provider attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} failure: {message}")]
pub struct FetchError {
    pub class: FailureClass,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Transient,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Auth,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Validation,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, provider: &str) -> Self {
        let message = format!("{provider} responded with HTTP {}", status.as_u16());
        Self {
            class: classify_status(status),
            message,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self {
                class: classify_status(status),
                message: format!("HTTP {}", status.as_u16()),
            };
        }
        // URLs may carry credentials in the query string.
        let e = e.without_url();
        if e.is_decode() {
            Self::transient(format!("undecodable payload: {e}"))
        } else {
            Self::transient(e.to_string())
        }
    }
}

/// Map an HTTP status to a retry class.
pub fn classify_status(status: reqwest::StatusCode) -> FailureClass {
    match status.as_u16() {
        401 | 403 => FailureClass::Auth,
        408 | 429 => FailureClass::Transient,
        400..=499 => FailureClass::Validation,
        _ => FailureClass::Transient,
    }
}

/// Rejected coordinate input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinateError {
    #[error("latitude {0} is outside [-90, 90]")]
    Latitude(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    Longitude(f64),
}

/// Terminal outcome of a retry loop that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("{source_name}: retries exhausted after {attempts} attempts (last: {last})")]
    Exhausted {
        source_name: &'static str,
        attempts: u32,
        last: FetchError,
    },
    #[error("{source_name}: aborted on attempt {attempts} ({cause})")]
    Fatal {
        source_name: &'static str,
        attempts: u32,
        cause: FetchError,
    },
    #[error("{source_name}: cancelled after {attempts} attempts")]
    Cancelled {
        source_name: &'static str,
        attempts: u32,
    },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Fatal { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Class of the underlying cause, `None` for cancellation.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last.class),
            RetryError::Fatal { cause, .. } => Some(cause.class),
            RetryError::Cancelled { .. } => None,
        }
    }
}

/// Problems with the scoring model artifact or its inputs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

/// The only failure shapes an end user ever sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFacing {
    TemporarilyUnavailable,
    InvalidLocation,
    ServiceMisconfigured,
}

impl UserFacing {
    pub fn message(self) -> &'static str {
        match self {
            UserFacing::TemporarilyUnavailable => {
                "Environmental data is temporarily unavailable. Please try again later."
            }
            UserFacing::InvalidLocation => {
                "This location cannot be analysed. Please check the coordinates."
            }
            UserFacing::ServiceMisconfigured => {
                "The service is misconfigured. The operator has been notified."
            }
        }
    }
}
