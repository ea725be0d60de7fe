use std::fmt;

use anyhow::Context;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Response, StatusCode, Url};
use serde_json::Value;

use super::{Backend, Envelope, MutationRequest, ResourceRequest};
use crate::config::BackendConfig;
use crate::error::FetchError;

/// Creates a [`reqwest::Client`] with the connection settings from `config`.
///
/// No overall request timeout is configured here, every caller applies its own.
fn create_client(config: &BackendConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.pool_idle_timeout)
        .user_agent(concat!("encore/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")
}

/// The backend reached over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    health_url: Url,
    auth_token: Option<String>,
}

impl fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the token.
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.auth_token.is_some())
            .finish()
    }
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(&config.url).context("invalid backend URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let health_url = base_url
            .join(config.health_path.trim_start_matches('/'))
            .context("invalid health path")?;

        Ok(Self {
            client: create_client(config)?,
            base_url,
            health_url,
            auth_token: config.auth_token.clone(),
        })
    }

    /// Resolves `request` against the base URL, one percent-encoded segment at a time.
    ///
    /// Empty, `.` and `..` segments would address a different resource and are refused.
    fn url(&self, request: &ResourceRequest) -> Result<Url, FetchError> {
        if let Some(segment) = request
            .segments
            .iter()
            .find(|segment| matches!(segment.as_str(), "" | "." | ".."))
        {
            return Err(FetchError::Invalid(format!(
                "invalid path segment {segment:?} in {request}"
            )));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Invalid("backend URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(&request.segments);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_envelope(&self, what: &str, response: Response) -> Result<Value, FetchError> {
        let status = response.status();
        if !status.is_success() {
            return Err(error_for_status(what, response).await);
        }
        let envelope: Envelope = response.json().await?;
        envelope.into_result()
    }

    async fn get(&self, request: &ResourceRequest) -> Result<Value, FetchError> {
        let url = self.url(request)?;
        let builder = self.client.get(url).query(&request.query);
        let response = self.authorize(builder).send().await?;
        self.read_envelope(&request.to_string(), response).await
    }

    async fn put(&self, request: &MutationRequest) -> Result<Value, FetchError> {
        let url = self.url(&request.target)?;
        let builder = self.client.put(url).json(&request.body);
        let response = self.authorize(builder).send().await?;
        self.read_envelope(&request.target.to_string(), response).await
    }

    async fn probe(&self) -> Result<(), FetchError> {
        let response = self.client.get(self.health_url.clone()).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_for_status("health", response).await)
        }
    }
}

impl Backend for HttpBackend {
    fn health(&self) -> BoxFuture<'_, Result<(), FetchError>> {
        self.probe().boxed()
    }

    fn fetch<'a>(
        &'a self,
        request: &'a ResourceRequest,
    ) -> BoxFuture<'a, Result<Value, FetchError>> {
        self.get(request).boxed()
    }

    fn mutate<'a>(
        &'a self,
        request: &'a MutationRequest,
    ) -> BoxFuture<'a, Result<Value, FetchError>> {
        self.put(request).boxed()
    }
}

/// Converts an unsuccessful response into a [`FetchError`].
///
/// If the body is an envelope carrying an `error` message, that message is used as the details.
async fn error_for_status(what: &str, response: Response) -> FetchError {
    let status = response.status();
    debug_assert!(!status.is_success());

    let details = match response.text().await {
        Ok(body) => serde_json::from_str::<Envelope>(&body)
            .ok()
            .and_then(|envelope| envelope.error)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    };

    classify_status(what, status, details)
}

fn classify_status(what: &str, status: StatusCode, details: String) -> FetchError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            tracing::debug!("Insufficient permissions to access `{what}`: {status}");
            FetchError::PermissionDenied(details)
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            tracing::debug!("Backend asked to back off from `{what}`: {status}");
            FetchError::Transport(details)
        }
        _ if status.is_client_error() => {
            tracing::debug!("Backend refused request to `{what}`: {status}");
            FetchError::Invalid(details)
        }
        _ => {
            tracing::debug!("Unexpected status code from `{what}`: {status}");
            FetchError::Transport(details)
        }
    }
}
