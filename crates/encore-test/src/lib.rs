//! Helpers for testing against a real HTTP backend.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`FakeBackend`], make sure that it is held until all requests to it have been
//!    made. If it is dropped, the port is closed and all connections to it will fail. To avoid
//!    this, assign it to a variable: `let backend = FakeBackend::new();`.
//!
//!  - The fake backend runs on the tokio runtime of the test, and uses real sockets. Tests using
//!    it cannot pause the clock.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `encore` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("encore=trace,encore_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses the loopback address the server is bound to as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct FakeState {
    token: Option<String>,
    artists: BTreeMap<String, Value>,
    delay: Duration,
    failing_health_checks: usize,
    /// Status codes for the next data requests, used in order.
    injected_failures: Vec<StatusCode>,
    /// Number of data requests that answer with `success: false`.
    rejections: usize,
    hits: BTreeMap<String, usize>,
}

type SharedState = Arc<Mutex<FakeState>>;

/// An HTTP server that speaks the backend's API.
///
/// It serves `GET /health`, `GET /artists/{id}`, `PUT /artists/{id}` and
/// `GET /charts/popular?limit=N` from an in-memory catalog, and counts every request by path and
/// query. Failures, delays and a required bearer token can be configured at any time.
#[derive(Debug)]
pub struct FakeBackend {
    server: Server,
    state: SharedState,
}

impl FakeBackend {
    /// Starts a backend with a small catalog of artists.
    pub fn new() -> Self {
        let state = SharedState::default();
        {
            let mut state = state.lock().unwrap();
            for (id, name, genre, followers) in [
                ("42", "Mira Solano", "jazz", 1_200),
                ("7", "Ada Rune", "electronic", 98_000),
                ("13", "The Lanterns", "indie rock", 15_400),
            ] {
                let artist = json!({
                    "id": id,
                    "name": name,
                    "genres": [genre],
                    "followers": followers,
                });
                state.artists.insert(id.to_owned(), artist);
            }
        }

        let router = Router::new()
            .route("/health", get(health))
            .route("/artists/:id", get(get_artist).put(put_artist))
            .route("/charts/popular", get(popular))
            .layer(middleware::from_fn_with_state(state.clone(), count_hits))
            .with_state(state.clone());

        let server = Server::with_router(router);
        Self { server, state }
    }

    /// The base URL to configure the client with.
    pub fn base_url(&self) -> String {
        self.server.url("/").to_string()
    }

    /// Requires `Authorization: Bearer {token}` on all data requests.
    pub fn require_token(&self, token: &str) {
        self.state.lock().unwrap().token = Some(token.to_owned());
    }

    /// Delays all data requests.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    /// Makes the next `count` health checks answer with `503`.
    pub fn fail_health(&self, count: usize) {
        self.state.lock().unwrap().failing_health_checks = count;
    }

    /// Makes the next `count` data requests answer with `status`.
    pub fn fail_next(&self, count: usize, status: u16) {
        let status = StatusCode::from_u16(status).unwrap();
        let mut state = self.state.lock().unwrap();
        state
            .injected_failures
            .extend(std::iter::repeat_n(status, count));
    }

    /// Makes the next `count` data requests answer `200` with `success: false`.
    pub fn reject_next(&self, count: usize) {
        self.state.lock().unwrap().rejections = count;
    }

    /// The current catalog entry of an artist.
    pub fn artist(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().artists.get(id).cloned()
    }

    /// The number of requests to `path`, which includes the query string if there is one.
    pub fn hits(&self, path: &str) -> usize {
        let path = path.trim_start_matches('/');
        let state = self.state.lock().unwrap();
        state.hits.get(path).copied().unwrap_or_default()
    }

    /// All requests by path, without resetting them.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let state = self.state.lock().unwrap();
        state.hits.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

async fn count_hits(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    {
        let key = match request.uri().query() {
            Some(query) => format!("{}?{}", request.uri().path(), query),
            None => request.uri().path().to_owned(),
        };
        let mut state = state.lock().unwrap();
        *state
            .hits
            .entry(key.trim_start_matches('/').to_owned())
            .or_default() += 1;
    }

    next.run(request).await
}

fn envelope_error(status: StatusCode, message: &str) -> Response {
    let body = json!({ "success": false, "error": message });
    (status, Json(body)).into_response()
}

fn envelope(data: Value) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

/// Applies the configured token check, delay and injected failures to a data request.
async fn intercept(state: &SharedState, headers: &HeaderMap) -> Option<Response> {
    let (delay, failure) = {
        let mut state = state.lock().unwrap();

        if let Some(token) = &state.token {
            let expected = format!("Bearer {token}");
            let authorized = headers
                .get(header::AUTHORIZATION)
                .is_some_and(|value| value.as_bytes() == expected.as_bytes());
            if !authorized {
                return Some(envelope_error(StatusCode::UNAUTHORIZED, "invalid token"));
            }
        }

        let failure = if !state.injected_failures.is_empty() {
            let status = state.injected_failures.remove(0);
            Some(envelope_error(status, "injected failure"))
        } else if state.rejections > 0 {
            state.rejections -= 1;
            Some(envelope_error(StatusCode::OK, "function is still starting"))
        } else {
            None
        };

        (state.delay, failure)
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    failure
}

async fn health(State(state): State<SharedState>) -> StatusCode {
    let mut state = state.lock().unwrap();
    if state.failing_health_checks > 0 {
        state.failing_health_checks -= 1;
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn get_artist(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Some(response) = intercept(&state, &headers).await {
        return response;
    }

    let artist = state.lock().unwrap().artists.get(&id).cloned();
    match artist {
        Some(artist) => envelope(artist),
        None => envelope_error(StatusCode::NOT_FOUND, "artist not found"),
    }
}

async fn put_artist(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(update): Json<Value>,
) -> Response {
    if let Some(response) = intercept(&state, &headers).await {
        return response;
    }

    let Some(changes) = update.as_object() else {
        return envelope_error(StatusCode::BAD_REQUEST, "expected an object");
    };
    if changes.get("name").is_some_and(|name| name == "") {
        return envelope_error(StatusCode::UNPROCESSABLE_ENTITY, "name must not be empty");
    }

    let mut state = state.lock().unwrap();
    let Some(artist) = state.artists.get_mut(&id) else {
        return envelope_error(StatusCode::NOT_FOUND, "artist not found");
    };
    if let Some(artist) = artist.as_object_mut() {
        for (field, value) in changes {
            artist.insert(field.clone(), value.clone());
        }
    }
    envelope(artist.clone())
}

#[derive(Debug, Deserialize)]
struct PopularParams {
    limit: Option<usize>,
}

async fn popular(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(params): Query<PopularParams>,
) -> Response {
    if let Some(response) = intercept(&state, &headers).await {
        return response;
    }

    let mut artists: Vec<Value> = state.lock().unwrap().artists.values().cloned().collect();
    artists.sort_by_key(|artist| std::cmp::Reverse(artist["followers"].as_u64().unwrap_or(0)));

    let chart: Vec<Value> = artists
        .into_iter()
        .take(params.limit.unwrap_or(10))
        .map(|artist| {
            json!({
                "id": artist["id"],
                "name": artist["name"],
                "genre": artist["genres"][0],
            })
        })
        .collect();
    envelope(Value::Array(chart))
}
