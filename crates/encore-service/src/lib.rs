//! Client-side orchestration of requests to a slow, cold-starting backend.
//!
//! Reads go through a TTL cache, are coalesced per key, wait for a one-time warmup probe, and are
//! retried and degraded to fallbacks according to per-resource policies. See [`fetcher`] for the
//! full read path and [`services::Services`] for the entry point.

#[macro_use]
pub mod metrics;

pub mod backend;
pub mod caching;
pub mod config;
pub mod error;
pub mod fallback;
pub mod fetcher;
pub mod logging;
pub mod resources;
pub mod services;
pub mod utils;
pub mod warmup;
