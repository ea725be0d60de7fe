//! The remote API that every fetch and mutation is eventually sent to.

use std::fmt;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;

use crate::error::FetchError;

mod http;

pub use http::HttpBackend;

/// A read of a single resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Path segments of the resource, relative to the backend's base URL.
    ///
    /// Every segment is sent as a single, percent-encoded URL segment.
    pub segments: Vec<String>,
    /// Query parameters appended to the path.
    pub query: Vec<(String, String)>,
}

impl ResourceRequest {
    /// Creates a request for a fixed route such as `charts/popular`.
    ///
    /// The route is split on `/`. Caller-provided values belong in [`segment`](Self::segment).
    pub fn new(route: &str) -> Self {
        Self {
            segments: route
                .split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
            query: Vec::new(),
        }
    }

    /// Appends one path segment, taken verbatim.
    pub fn segment(mut self, value: impl Into<String>) -> Self {
        self.segments.push(value.into());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_owned(), value.to_string()));
        self
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))?;
        for (i, (name, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{name}={value}")?;
        }
        Ok(())
    }
}

/// A write that replaces the resource addressed by `target` with `body`.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationRequest {
    pub target: ResourceRequest,
    pub body: Value,
}

/// The backend as seen by the fetch layer.
///
/// Implementations report failures through [`FetchError`], and are expected to classify them
/// correctly: only [transient](FetchError::is_transient) errors are ever retried.
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Probes whether the backend is ready to serve requests.
    fn health(&self) -> BoxFuture<'_, Result<(), FetchError>>;

    /// Reads a resource, returning the unwrapped `data` of the response envelope.
    fn fetch<'a>(
        &'a self,
        request: &'a ResourceRequest,
    ) -> BoxFuture<'a, Result<Value, FetchError>>;

    /// Writes a resource, returning the unwrapped `data` of the response envelope.
    fn mutate<'a>(
        &'a self,
        request: &'a MutationRequest,
    ) -> BoxFuture<'a, Result<Value, FetchError>>;
}

/// The `{ success, data, error }` wrapper around every backend response.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Envelope {
    /// Unwraps the payload.
    ///
    /// `success: false` is reported as [`FetchError::Rejected`]. A successful envelope without
    /// `data` yields `null`.
    pub fn into_result(self) -> Result<Value, FetchError> {
        if !self.success {
            let reason = self
                .error
                .unwrap_or_else(|| "request was not successful".to_owned());
            return Err(FetchError::Rejected(reason));
        }
        Ok(self.data.unwrap_or(Value::Null))
    }
}
