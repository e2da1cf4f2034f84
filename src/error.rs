use std::sync::Arc;

use reqwest::StatusCode;

/// Represents a result type for operations in the SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the SDK.
///
/// Errors are `Clone` so they can be delivered to a [`Listener`](crate::Listener) from background
/// threads. Non-clonable sources are wrapped in an `Arc`.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The client was configured without an application name.
    #[error("unleash client app_name missing")]
    MissingAppName,

    /// Invalid server URL configuration.
    #[error("invalid server url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// A custom header name or value is not valid HTTP.
    #[error("invalid header {0:?}")]
    InvalidHeader(String),

    /// Server responded with an unexpected status code.
    #[error("{method} {url} returned status code {status}")]
    HttpStatus {
        /// HTTP method of the failed request.
        method: &'static str,
        /// Requested URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// Response body or persisted file could not be decoded.
    #[error("failed to decode json: {0}")]
    Json(Arc<serde_json::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// A constraint could not be evaluated. The owning strategy is treated as disabled.
    #[error("constraint evaluation failed for feature {feature:?}: {source}")]
    Evaluation {
        /// Name of the feature being evaluated.
        feature: String,
        /// Underlying evaluation error.
        #[source]
        source: EvaluationError,
    },

    /// A strategy referenced a segment that is not present in the current snapshot.
    #[error("feature {feature:?} references unknown segment {segment_id}")]
    SegmentNotFound {
        /// Name of the feature being evaluated.
        feature: String,
        /// The missing segment id.
        segment_id: i64,
    },

    /// A feature uses a strategy that is not registered with the client.
    #[error("strategy {0:?} is not registered")]
    UnknownStrategy(String),

    /// A feature dependency names a parent that is not in the current snapshot.
    #[error("parent feature {0:?} was not found, the dependency is never satisfied")]
    ParentNotFound(String),

    /// A feature name pattern is not a valid regular expression.
    #[error("invalid feature name pattern")]
    InvalidPattern(#[from] regex::Error),

    /// The repository does not support the requested operation.
    #[error("{0} is not supported by this repository")]
    Unsupported(&'static str),

    /// The client was closed before features could be fetched.
    #[error("client closed")]
    Closed,

    /// Indicates that a background thread panicked. This should normally never happen.
    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

impl Error {
    /// Return `true` for statuses that signal broken client configuration (retrying won't help).
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Error::HttpStatus {
                status: StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND,
                ..
            }
        )
    }

    /// Return `true` for statuses that signal server overload or an outage.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::HttpStatus { status, .. }
            if *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(Arc::new(value))
    }
}

/// Error evaluating a single constraint. Evaluation fails closed: the constraint is not satisfied.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// The server sent an operator this client does not understand.
    #[error("unknown constraint operator: {0}")]
    UnknownOperator(String),

    /// A numeric operand could not be parsed.
    #[error("invalid number {value:?}: {reason}")]
    InvalidNumber {
        /// The offending operand.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A date operand is not an RFC3339 timestamp.
    #[error("invalid date {value:?}: {reason}")]
    InvalidDate {
        /// The offending operand.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// A version operand is not a strict semantic version.
    #[error("invalid semver {value:?}: {reason}")]
    InvalidSemver {
        /// The offending operand.
        value: String,
        /// Parser message.
        reason: String,
    },
}

impl EvaluationError {
    /// Short name of the failure, independent of the offending operand.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            EvaluationError::UnknownOperator(_) => "operator",
            EvaluationError::InvalidNumber { .. } => "number",
            EvaluationError::InvalidDate { .. } => "date",
            EvaluationError::InvalidSemver { .. } => "semver",
        }
    }
}
