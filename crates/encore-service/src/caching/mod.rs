//! # Encore caching infrastructure
//!
//! Every read goes through up to three in-memory layers before it is allowed to reach the
//! backend, and through one more on its way out when the backend cannot be reached.
//!
//! ## Cache Layers
//!
//! - The [`TtlCache`] holds the last successful value per key for a fixed time-to-live (60s by
//!   default). Expired entries are never returned; they are dropped lazily by the lookup that
//!   notices them. There is no background sweep and no size-based eviction, each resource only
//!   ever holds one entry per logical key (such as `artist:42`).
//! - The [`InFlight`] registry performs request coalescing: while an operation for a key is
//!   running, every other request for that key attaches to it instead of starting a second one.
//!   The registry entry is released the moment the operation settles, whether it succeeded,
//!   failed, or panicked.
//! - The [`LastKnownGood`] store keeps the most recent successful value per key beyond its TTL.
//!   It is bounded by capacity instead of time, and is only ever consulted as a fallback once the
//!   backend failed. A value served from here is reported as stale and is never written back into
//!   the [`TtlCache`].
//!
//! ### Metrics
//!
//! All metrics are tagged with a `resource` field:
//!
//! - `fetch.access`: All read accesses.
//! - `fetch.cache.hit`: Accesses served by the [`TtlCache`].
//! - `fetch.coalesced`: Accesses that attached to an already running operation.
//! - `fetch.fallback`: Accesses that were served a fallback, additionally tagged by `source`.

mod coalesce;
mod last_known;
mod ttl;

pub use coalesce::InFlight;
pub use last_known::LastKnownGood;
pub use ttl::TtlCache;
