use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// An error that happens when talking to the backend.
///
/// The error is `Clone` so that one settled result can be handed out to every caller that was
/// coalesced onto the same operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The resource does not exist on the backend.
    #[error("not found")]
    NotFound,
    /// The backend refused the request because of missing or invalid credentials.
    ///
    /// The attached string contains the backend's response.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The backend rejected the request as invalid, e.g. a failed validation on a mutation.
    #[error("invalid request: {0}")]
    Invalid(String),
    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request failed in transit: connection loss, DNS resolution, or a 5xx response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The backend answered, but flagged the call as unsuccessful (`success: false`).
    #[error("rejected by backend: {0}")]
    Rejected(String),
    /// The response payload could not be decoded.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error inside this layer.
    #[error("internal error")]
    InternalError,
}

impl FetchError {
    /// Whether retrying the same request has a reasonable chance of a different result.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Transport(_) | Self::Rejected(_)
        )
    }

    /// A short, stable name used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::PermissionDenied(_) => "permissiondenied",
            Self::Invalid(_) => "invalid",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Rejected(_) => "rejected",
            Self::Malformed(_) => "malformed",
            Self::InternalError => "internalerror",
        }
    }

    fn transport_error(mut error: &dyn Error) -> Self {
        while let Some(src) = error.source() {
            error = src;
        }

        let mut error_string = error.to_string();

        if error_string.contains("certificate verify failed") {
            error_string = "certificate verify failed".to_string();
        }

        Self::Transport(error_string)
    }

    #[track_caller]
    pub fn from_std_error<E: Error + 'static>(e: E) -> Self {
        let dynerr: &dyn Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::Malformed(error.to_string());
        }
        Self::transport_error(&error)
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(error: serde_json::Error) -> Self {
        Self::Malformed(error.to_string())
    }
}
