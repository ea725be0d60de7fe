//! Reading and writing resources through the cache layers.
//!
//! A [`Fetcher`] serves one kind of [`Resource`]. A read goes through these steps:
//!
//! 1. The [`TtlCache`] is checked, and a fresh value is returned right away.
//! 2. Otherwise the read is coalesced with any other running read of the same key, so that only
//!    one of them actually talks to the backend.
//! 3. That one waits for the [`WarmupGate`], then calls the backend, applying the resource's
//!    [`FetchPolicy`] (timeout per attempt, a fixed number of attempts for transient errors).
//! 4. A successful result is stored in the caches before it is handed to all waiting readers.
//! 5. If the backend failed, a fallback is looked up in order: the last-known-good value (if the
//!    resource accepts stale data), the [`LocalStore`], and the resource's static default.
//!
//! Reads never return an error, they resolve to a [`FetchOutcome`] that tells which of the paths
//! above produced the value. Mutations on the other hand are never retried, and report failures
//! to the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::backend::{Backend, MutationRequest, ResourceRequest};
use crate::caching::{InFlight, LastKnownGood, TtlCache};
use crate::config::{CacheConfig, FetchPolicy};
use crate::error::FetchError;
use crate::fallback::LocalStore;
use crate::utils::futures::measure;
use crate::warmup::WarmupGate;

/// A kind of data that can be read from the backend.
pub trait Resource: fmt::Debug + Send + Sync + 'static {
    /// What identifies a single instance of the resource.
    type Params: Send + Sync;

    /// The decoded resource.
    type Item: Clone + fmt::Debug + DeserializeOwned + Send + Sync + 'static;

    /// Used for logging and to tag metrics.
    const NAME: &'static str;

    /// The logical cache key, such as `artist:42`.
    fn cache_key(&self, params: &Self::Params) -> String;

    /// The backend request that reads the resource.
    fn request(&self, params: &Self::Params) -> ResourceRequest;

    /// Hand-authored data to show when nothing better is available.
    fn fallback(&self, _params: &Self::Params) -> Option<Self::Item> {
        None
    }

    /// Decodes the `data` of a backend response.
    fn decode(&self, data: Value) -> Result<Self::Item, FetchError> {
        Ok(serde_json::from_value(data)?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Skip the cache and ask the backend, even if a fresh value is cached.
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
        }
    }
}

/// Where a fallback value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSource {
    /// The last value that was fetched successfully, past its TTL.
    Stale,
    /// The read-only [`LocalStore`].
    Local,
    /// The resource's static default.
    Static,
}

impl FallbackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Local => "local",
            Self::Static => "static",
        }
    }
}

/// The result of a read.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome<T> {
    /// Served from the TTL cache.
    Cached(T),
    /// Fetched from the backend, possibly by another reader this one was coalesced with.
    Fetched(T),
    /// The backend failed, a substitute is served instead.
    Fallback {
        value: T,
        source: FallbackSource,
        error: FetchError,
    },
    /// The backend failed and no substitute exists.
    Failed(FetchError),
}

impl<T> FetchOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Cached(value) | Self::Fetched(value) | Self::Fallback { value, .. } => {
                Some(value)
            }
            Self::Failed(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Cached(value) | Self::Fetched(value) | Self::Fallback { value, .. } => {
                Some(value)
            }
            Self::Failed(_) => None,
        }
    }

    /// The error that caused a fallback or failure.
    pub fn error(&self) -> Option<&FetchError> {
        match self {
            Self::Fallback { error, .. } | Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Whether the value is current, as opposed to a fallback or a failure.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Cached(_) | Self::Fetched(_))
    }
}

/// Everything that is shared between all fetchers.
#[derive(Clone, Debug)]
pub struct FetchContext {
    backend: Arc<dyn Backend>,
    warmup: WarmupGate,
    local_store: Option<Arc<dyn LocalStore>>,
    mutation_timeout: Duration,
}

impl FetchContext {
    pub fn new(
        backend: Arc<dyn Backend>,
        warmup: WarmupGate,
        local_store: Option<Arc<dyn LocalStore>>,
        mutation_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            warmup,
            local_store,
            mutation_timeout,
        }
    }

    pub fn warmup(&self) -> &WarmupGate {
        &self.warmup
    }
}

/// Retries `task_gen` according to `policy`.
///
/// Only [transient](FetchError::is_transient) errors are retried, anything else is returned right
/// away. Attempts are separated by the policy's fixed delay.
pub async fn retry<G, F, T>(
    policy: &FetchPolicy,
    resource: &'static str,
    task_gen: G,
) -> Result<T, FetchError>
where
    G: Fn() -> F,
    F: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        let result = task_gen().await;

        // permanent errors will not go away by asking again
        let should_not_retry = match &result {
            Ok(_) => true,
            Err(error) => !error.is_transient(),
        };
        if should_not_retry || tries >= attempts {
            break result;
        }

        if let Err(error) = &result {
            tracing::debug!(resource, tries, %error, "Retrying failed fetch");
        }
        metric!(counter("fetch.retry") += 1, "resource" => resource);
        tokio::time::sleep(policy.retry_delay).await;
    }
}

/// Reads and writes one kind of [`Resource`].
pub struct Fetcher<R: Resource> {
    resource: Arc<R>,
    policy: FetchPolicy,
    context: FetchContext,
    cache: TtlCache<String, R::Item>,
    last_known: LastKnownGood<R::Item>,
    in_flight: InFlight<String, Result<R::Item, FetchError>>,
    /// Bumped on every invalidation. A fetch that started before the bump does not store its
    /// result.
    epoch: Arc<AtomicU64>,
}

impl<R: Resource> Clone for Fetcher<R> {
    fn clone(&self) -> Self {
        Self {
            resource: Arc::clone(&self.resource),
            policy: self.policy,
            context: self.context.clone(),
            cache: self.cache.clone(),
            last_known: self.last_known.clone(),
            in_flight: self.in_flight.clone(),
            epoch: Arc::clone(&self.epoch),
        }
    }
}

impl<R: Resource> fmt::Debug for Fetcher<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("resource", &R::NAME)
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl<R: Resource> Fetcher<R> {
    pub fn new(
        resource: R,
        policy: FetchPolicy,
        cache: &CacheConfig,
        context: FetchContext,
    ) -> Self {
        Self {
            resource: Arc::new(resource),
            policy,
            context,
            cache: TtlCache::new(R::NAME, cache.ttl),
            last_known: LastKnownGood::new(R::NAME, cache.stale_capacity),
            in_flight: InFlight::new(R::NAME),
            epoch: Default::default(),
        }
    }

    pub fn resource(&self) -> &R {
        &self.resource
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Reads the resource identified by `params`.
    pub async fn fetch(&self, params: &R::Params, options: FetchOptions) -> FetchOutcome<R::Item> {
        let key = self.resource.cache_key(params);
        metric!(counter("fetch.access") += 1, "resource" => R::NAME);

        if options.force_refresh {
            self.cache.invalidate(&key);
        } else if let Some(value) = self.cache.get(&key) {
            metric!(counter("fetch.cache.hit") += 1, "resource" => R::NAME);
            return FetchOutcome::Cached(value);
        }

        let operation = {
            let this = self.clone();
            let key = key.clone();
            let request = self.resource.request(params);
            move || async move { this.fetch_and_store(key, request).await }
        };
        let result = self
            .in_flight
            .run_exclusive(key.clone(), operation)
            .await
            .unwrap_or(Err(FetchError::InternalError));

        match result {
            Ok(value) => FetchOutcome::Fetched(value),
            Err(error) => self.fallback(&key, params, error),
        }
    }

    /// The coalesced part of a read: waits for warmup, calls the backend and stores the result.
    async fn fetch_and_store(
        &self,
        key: String,
        request: ResourceRequest,
    ) -> Result<R::Item, FetchError> {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.context.warmup.wait_for_ready().await;

        let value = retry(&self.policy, R::NAME, || self.fetch_once(&request)).await?;

        if self.epoch.load(Ordering::Acquire) == epoch {
            self.store(key, value.clone());
        } else {
            tracing::debug!(
                resource = R::NAME,
                key,
                "Not caching result of fetch that raced with an invalidation"
            );
        }
        Ok(value)
    }

    async fn fetch_once(&self, request: &ResourceRequest) -> Result<R::Item, FetchError> {
        metric!(counter("fetch.attempt") += 1, "resource" => R::NAME);
        let timeout = self.policy.timeout;
        let attempt = async {
            match tokio::time::timeout(timeout, self.context.backend.fetch(request)).await {
                Ok(result) => self.resource.decode(result?),
                Err(_) => Err(FetchError::Timeout(timeout)),
            }
        };
        measure("fetch.duration", R::NAME, attempt).await
    }

    fn store(&self, key: String, value: R::Item) {
        self.cache.set(key.clone(), value.clone());
        self.last_known.insert(key, value);
    }

    fn fallback(&self, key: &str, params: &R::Params, error: FetchError) -> FetchOutcome<R::Item> {
        let fallback = self
            .stale_fallback(key)
            .map(|value| (value, FallbackSource::Stale))
            .or_else(|| {
                self.local_fallback(key)
                    .map(|value| (value, FallbackSource::Local))
            })
            .or_else(|| {
                self.resource
                    .fallback(params)
                    .map(|value| (value, FallbackSource::Static))
            });

        match fallback {
            Some((value, source)) => {
                tracing::debug!(
                    resource = R::NAME,
                    key,
                    source = source.as_str(),
                    %error,
                    "Serving fallback"
                );
                metric!(
                    counter("fetch.fallback") += 1,
                    "resource" => R::NAME,
                    "source" => source.as_str(),
                );
                FetchOutcome::Fallback {
                    value,
                    source,
                    error,
                }
            }
            None => {
                tracing::debug!(resource = R::NAME, key, %error, "Fetch failed without fallback");
                metric!(
                    counter("fetch.failed") += 1,
                    "resource" => R::NAME,
                    "error" => error.metrics_tag(),
                );
                FetchOutcome::Failed(error)
            }
        }
    }

    fn stale_fallback(&self, key: &str) -> Option<R::Item> {
        if !self.policy.serve_stale {
            return None;
        }
        self.last_known.get(key)
    }

    fn local_fallback(&self, key: &str) -> Option<R::Item> {
        let data = self.context.local_store.as_ref()?.get(key)?;
        match self.resource.decode(data) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(
                    resource = R::NAME,
                    key,
                    %error,
                    "Ignoring unreadable local fallback"
                );
                None
            }
        }
    }

    /// Replaces the resource identified by `params` with `body`.
    ///
    /// The write is attempted exactly once. Once the backend confirmed it, the cached value is
    /// invalidated and replaced with the one returned by the backend.
    pub async fn mutate(&self, params: &R::Params, body: Value) -> Result<R::Item, FetchError> {
        self.context.warmup.wait_for_ready().await;

        let key = self.resource.cache_key(params);
        let request = MutationRequest {
            target: self.resource.request(params),
            body,
        };
        let timeout = self.context.mutation_timeout;
        let mutation = async {
            match tokio::time::timeout(timeout, self.context.backend.mutate(&request)).await {
                Ok(result) => self.resource.decode(result?),
                Err(_) => Err(FetchError::Timeout(timeout)),
            }
        };
        let result = measure("mutation.duration", R::NAME, mutation).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(error) => error.metrics_tag(),
        };
        metric!(counter("mutation.result") += 1, "resource" => R::NAME, "result" => status);

        match result {
            Ok(value) => {
                self.invalidate_key(&key);
                self.store(key, value.clone());
                Ok(value)
            }
            Err(error) => {
                tracing::debug!(resource = R::NAME, key, %error, "Mutation failed");
                Err(error)
            }
        }
    }

    /// Drops the cached value for `params`, so that the next read asks the backend.
    ///
    /// The last-known-good value is kept as a fallback.
    pub fn invalidate(&self, params: &R::Params) -> bool {
        self.invalidate_key(&self.resource.cache_key(params))
    }

    fn invalidate_key(&self, key: &str) -> bool {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.in_flight.detach(&key.to_owned());
        self.cache.invalidate(key)
    }

    /// Drops all cached values of this resource.
    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.in_flight.clear();
        self.cache.invalidate_all();
    }

    /// Returns the fetcher to its initial state, including the last-known-good values.
    pub fn reset(&self) {
        self.invalidate_all();
        self.last_known.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use serde_json::json;
    use tokio::time::Instant;

    use super::*;
    use crate::config::WarmupConfig;
    use crate::fallback::MemoryStore;
    use crate::test::{self, MockBackend};

    #[derive(Debug)]
    struct Numbers;

    impl Resource for Numbers {
        type Params = u32;
        type Item = u32;
        const NAME: &'static str = "numbers";

        fn cache_key(&self, id: &u32) -> String {
            format!("number:{id}")
        }

        fn request(&self, id: &u32) -> ResourceRequest {
            ResourceRequest::new("numbers").segment(id.to_string())
        }

        fn fallback(&self, id: &u32) -> Option<u32> {
            (*id == 0).then_some(0)
        }
    }

    /// Like [`Numbers`], but decoding 13 panics.
    #[derive(Debug)]
    struct Unlucky;

    impl Resource for Unlucky {
        type Params = u32;
        type Item = u32;
        const NAME: &'static str = "unlucky";

        fn cache_key(&self, id: &u32) -> String {
            Numbers.cache_key(id)
        }

        fn request(&self, id: &u32) -> ResourceRequest {
            Numbers.request(id)
        }

        fn fallback(&self, id: &u32) -> Option<u32> {
            Numbers.fallback(id)
        }

        fn decode(&self, data: Value) -> Result<u32, FetchError> {
            let value: u32 = serde_json::from_value(data)?;
            assert_ne!(value, 13, "refusing to decode 13");
            Ok(value)
        }
    }

    fn context(backend: &Arc<MockBackend>, warmup: WarmupConfig) -> FetchContext {
        let gate = WarmupGate::new(warmup, backend.clone());
        FetchContext::new(backend.clone(), gate, None, Duration::from_secs(15))
    }

    fn fetcher(backend: &Arc<MockBackend>) -> Fetcher<Numbers> {
        fetcher_for(Numbers, backend)
    }

    fn fetcher_for<R: Resource>(resource: R, backend: &Arc<MockBackend>) -> Fetcher<R> {
        let warmup = WarmupConfig {
            enabled: false,
            ..Default::default()
        };
        Fetcher::new(
            resource,
            FetchPolicy::default(),
            &CacheConfig::default(),
            context(backend, warmup),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        let fetcher = fetcher(&backend);

        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Cached(1));
        assert_eq!(backend.hits("numbers/1"), 1);

        assert_eq!(
            fetcher.fetch(&1, FetchOptions::refresh()).await,
            FetchOutcome::Fetched(1)
        );
        assert_eq!(backend.hits("numbers/1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond_once("numbers/1", Ok(json!(1)));
        backend.respond("numbers/1", Ok(json!(2)));
        let fetcher = fetcher(&backend);

        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_are_coalesced() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/42", Ok(json!(42)));
        backend.set_delay(Duration::from_millis(100));
        let fetcher = fetcher(&backend);

        let outcomes = join_all((0..5).map(|_| fetcher.fetch(&42, Default::default()))).await;

        assert_eq!(outcomes, vec![FetchOutcome::Fetched(42); 5]);
        assert_eq!(backend.hits("numbers/42"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_are_coalesced() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        let error = FetchError::Transport("connection refused".into());
        backend.respond("numbers/0", Err(error.clone()));
        backend.set_delay(Duration::from_millis(100));
        let fetcher = fetcher(&backend);

        let outcomes = join_all((0..5).map(|_| fetcher.fetch(&0, Default::default()))).await;

        let expected = FetchOutcome::Fallback {
            value: 0,
            source: FallbackSource::Static,
            error,
        };
        assert_eq!(outcomes, vec![expected; 5]);
        assert_eq!(
            backend.hits("numbers/0"),
            FetchPolicy::default().attempts as usize
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_fetch_falls_back() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond_once("numbers/0", Ok(json!(13)));
        backend.respond("numbers/0", Ok(json!(0)));
        backend.set_delay(Duration::from_millis(100));
        let fetcher = fetcher_for(Unlucky, &backend);

        let outcomes = join_all((0..3).map(|_| fetcher.fetch(&0, Default::default()))).await;

        let expected = FetchOutcome::Fallback {
            value: 0,
            source: FallbackSource::Static,
            error: FetchError::InternalError,
        };
        assert_eq!(outcomes, vec![expected; 3]);
        assert_eq!(backend.hits("numbers/0"), 1);

        // the panicked operation is gone, the next read starts over
        assert_eq!(fetcher.fetch(&0, Default::default()).await, FetchOutcome::Fetched(0));
        assert_eq!(backend.hits("numbers/0"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond_once(
            "numbers/1",
            Err(FetchError::Transport("503 Service Unavailable".into())),
        );
        backend.respond("numbers/1", Ok(json!(1)));
        let fetcher = fetcher(&backend);

        let start = Instant::now();
        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        assert_eq!(backend.hits("numbers/1"), 2);
        assert_eq!(start.elapsed(), FetchPolicy::default().retry_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_are_not_retried() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        let fetcher = fetcher(&backend);

        assert_eq!(
            fetcher.fetch(&1, Default::default()).await,
            FetchOutcome::Failed(FetchError::NotFound)
        );
        assert_eq!(backend.hits("numbers/1"), 1);

        backend.respond("numbers/2", Ok(json!("two")));
        let outcome = fetcher.fetch(&2, Default::default()).await;
        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Malformed(_))));
        assert_eq!(backend.hits("numbers/2"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        backend.set_delay(Duration::from_secs(20));
        let fetcher = fetcher(&backend);

        let start = Instant::now();
        assert_eq!(
            fetcher.fetch(&1, Default::default()).await,
            FetchOutcome::Failed(FetchError::Timeout(Duration::from_secs(15)))
        );
        assert_eq!(backend.hits("numbers/1"), 2);
        // two attempts of 15s, one retry delay of 1s
        assert_eq!(start.elapsed(), Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_fallback_is_not_cached() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        let fetcher = fetcher(&backend);

        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        tokio::time::advance(Duration::from_secs(61)).await;

        let error = FetchError::Transport("connection refused".into());
        backend.respond("numbers/1", Err(error.clone()));
        let expected = FetchOutcome::Fallback {
            value: 1,
            source: FallbackSource::Stale,
            error,
        };
        assert_eq!(fetcher.fetch(&1, Default::default()).await, expected);
        assert_eq!(fetcher.fetch(&1, Default::default()).await, expected);
        // both reads went to the backend, twice each
        assert_eq!(backend.hits("numbers/1"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_order() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryStore::new());
        store.insert("number:0", json!(100));
        let gate = WarmupGate::new(
            WarmupConfig {
                enabled: false,
                ..Default::default()
            },
            backend.clone(),
        );
        let context = FetchContext::new(
            backend.clone(),
            gate,
            Some(store.clone() as Arc<dyn LocalStore>),
            Duration::from_secs(15),
        );
        let policy = FetchPolicy {
            serve_stale: false,
            ..Default::default()
        };
        let fetcher = Fetcher::new(Numbers, policy, &CacheConfig::default(), context);

        backend.respond_once("numbers/0", Ok(json!(7)));
        assert_eq!(fetcher.fetch(&0, Default::default()).await, FetchOutcome::Fetched(7));

        // The stale value is ignored, the local store comes first.
        let outcome = fetcher.fetch(&0, FetchOptions::refresh()).await;
        assert_eq!(outcome.value(), Some(&100));
        assert!(matches!(
            outcome,
            FetchOutcome::Fallback {
                source: FallbackSource::Local,
                error: FetchError::NotFound,
                ..
            }
        ));

        // An unreadable local value is skipped in favor of the static default.
        store.insert("number:0", json!("zero"));
        let outcome = fetcher.fetch(&0, FetchOptions::refresh()).await;
        assert!(matches!(
            outcome,
            FetchOutcome::Fallback {
                value: 0,
                source: FallbackSource::Static,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_discards_running_fetch() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        backend.set_delay(Duration::from_millis(100));
        let fetcher = fetcher(&backend);

        let first = fetcher.fetch(&1, Default::default());
        let invalidate = async {
            tokio::task::yield_now().await;
            fetcher.invalidate(&1);
        };
        let (outcome, _) = tokio::join!(first, invalidate);
        assert_eq!(outcome, FetchOutcome::Fetched(1));

        // the value fetched before the invalidation was not cached
        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        assert_eq!(backend.hits("numbers/1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_replaces_cached_value() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        let fetcher = fetcher(&backend);

        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        assert_eq!(fetcher.mutate(&1, json!(2)).await, Ok(2));
        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Cached(2));

        let mutations = backend.mutations();
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].target.to_string(), "numbers/1");
        assert_eq!(mutations[0].body, json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_mutation_is_surfaced() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        let error = FetchError::Transport("503 Service Unavailable".into());
        backend.respond_to_mutation("numbers/1", Err(error.clone()));
        let fetcher = fetcher(&backend);

        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Fetched(1));
        assert_eq!(fetcher.mutate(&1, json!(2)).await, Err(error));
        assert_eq!(backend.mutations().len(), 1);
        assert_eq!(fetcher.fetch(&1, Default::default()).await, FetchOutcome::Cached(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_wait_for_warmup() {
        test::setup();
        let backend = Arc::new(MockBackend::new());
        backend.respond("numbers/1", Ok(json!(1)));
        backend.respond("numbers/2", Ok(json!(2)));
        backend.fail_health(1);
        let fetcher = Fetcher::new(
            Numbers,
            FetchPolicy::default(),
            &CacheConfig::default(),
            context(&backend, WarmupConfig::default()),
        );

        let start = Instant::now();
        let (one, two) = tokio::join!(
            fetcher.fetch(&1, Default::default()),
            fetcher.fetch(&2, Default::default()),
        );
        assert_eq!((one, two), (FetchOutcome::Fetched(1), FetchOutcome::Fetched(2)));
        assert_eq!(backend.health_checks(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        fetcher.fetch(&3, Default::default()).await;
        assert_eq!(backend.health_checks(), 2);
    }
}
