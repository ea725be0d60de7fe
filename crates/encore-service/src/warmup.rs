//! The process-wide readiness gate in front of the backend.
//!
//! A serverless backend that has been idle adds several seconds of latency to the first call it
//! receives. Instead of letting every concurrent request pay that price (and pile onto the cold
//! backend), the first request runs a probe loop against the health endpoint, and everyone else
//! waits for that same loop to finish.
//!
//! The gate is fail-open: once the loop has used up its attempts, the gate opens anyway and
//! requests go out on their own.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::time::Instant;

use crate::backend::Backend;
use crate::config::WarmupConfig;

/// The delay after the `attempt`-th failed probe, counting from 1.
///
/// Grows as `base * 2^(attempt - 1)` and saturates instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1 << exponent)
}

/// How the warmup ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WarmupOutcome {
    /// A probe succeeded.
    Healthy { attempts: u32 },
    /// Every probe failed. The gate opened regardless.
    GaveUp { attempts: u32 },
    /// Warmup is disabled.
    Skipped,
}

impl WarmupOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy { .. } => "healthy",
            Self::GaveUp { .. } => "gave_up",
            Self::Skipped => "skipped",
        }
    }
}

type ProbeLoop = Shared<BoxFuture<'static, WarmupOutcome>>;

enum WarmupState {
    NotStarted,
    InProgress(ProbeLoop),
    Ready(WarmupOutcome),
}

struct Inner {
    /// Bumped by [`WarmupGate::reset`], so a loop started before the reset cannot complete the
    /// gate after it.
    generation: u64,
    state: WarmupState,
}

/// Makes requests wait until the backend had a chance to warm up.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct WarmupGate {
    config: WarmupConfig,
    backend: Arc<dyn Backend>,
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for WarmupGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarmupGate")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

impl WarmupGate {
    pub fn new(config: WarmupConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                state: WarmupState::NotStarted,
            })),
        }
    }

    /// Resolves once the gate is open.
    ///
    /// The first call starts the probe loop, every later call waits for the same loop. Once the
    /// loop has finished, this resolves immediately with its outcome.
    ///
    /// The loop is owned by the gate rather than by its callers: if all of them go away before it
    /// finishes, the next caller picks it up where it was left.
    pub async fn wait_for_ready(&self) -> WarmupOutcome {
        let probe_loop = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            match &inner.state {
                WarmupState::Ready(outcome) => return *outcome,
                WarmupState::InProgress(probe_loop) => probe_loop.clone(),
                WarmupState::NotStarted if !self.config.enabled => {
                    inner.state = WarmupState::Ready(WarmupOutcome::Skipped);
                    return WarmupOutcome::Skipped;
                }
                WarmupState::NotStarted => {
                    let probe_loop = self.start(inner.generation);
                    inner.state = WarmupState::InProgress(probe_loop.clone());
                    probe_loop
                }
            }
        };

        probe_loop.await
    }

    /// The outcome of the warmup, or `None` while it has not finished.
    pub fn status(&self) -> Option<WarmupOutcome> {
        match self.inner.lock().unwrap().state {
            WarmupState::Ready(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// Puts the gate back into its initial state, so that the next request probes again.
    ///
    /// Callers already waiting on a running probe loop still receive its outcome.
    pub fn reset(&self) {
        let previous = {
            let mut inner = self.inner.lock().unwrap();
            inner.generation += 1;
            std::mem::replace(&mut inner.state, WarmupState::NotStarted)
        };
        drop(previous);
    }

    fn start(&self, generation: u64) -> ProbeLoop {
        let config = self.config;
        let backend = Arc::clone(&self.backend);
        let inner = Arc::clone(&self.inner);

        async move {
            let outcome = probe_loop(config, backend.as_ref()).await;

            let previous = {
                let mut inner = inner.lock().unwrap();
                if inner.generation == generation {
                    Some(std::mem::replace(
                        &mut inner.state,
                        WarmupState::Ready(outcome),
                    ))
                } else {
                    None
                }
            };
            drop(previous);

            outcome
        }
        .boxed()
        .shared()
    }
}

async fn probe_loop(config: WarmupConfig, backend: &dyn Backend) -> WarmupOutcome {
    let start = Instant::now();
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    let outcome = loop {
        attempt += 1;
        metric!(counter("warmup.attempt") += 1);

        match tokio::time::timeout(config.probe_timeout, backend.health()).await {
            Ok(Ok(())) => break WarmupOutcome::Healthy { attempts: attempt },
            Ok(Err(error)) => {
                tracing::debug!(attempt, %error, "Warmup probe failed");
            }
            Err(_) => {
                tracing::debug!(attempt, timeout = ?config.probe_timeout, "Warmup probe timed out");
            }
        }

        if attempt >= max_attempts {
            tracing::warn!(
                attempts = attempt,
                "Backend did not become ready, proceeding without warmup"
            );
            break WarmupOutcome::GaveUp { attempts: attempt };
        }

        tokio::time::sleep(backoff_delay(config.base_delay, attempt)).await;
    };

    metric!(timer("warmup.duration") = start.elapsed(), "outcome" => outcome.as_str());
    tracing::debug!(?outcome, elapsed = ?start.elapsed(), "Warmup finished");
    outcome
}
