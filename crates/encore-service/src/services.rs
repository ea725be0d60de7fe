//! Provides the shared Encore services and a way to initialize them.
//!
//! [`Services`] owns everything that must be shared between all call sites of a process: the
//! backend client, the warmup gate, and one [`Fetcher`] with its caches per resource. Construct
//! it once and pass it around by reference. Tests create a fresh instance per test case.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::backend::{Backend, HttpBackend};
use crate::config::Config;
use crate::fallback::{FileStore, LocalStore};
use crate::fetcher::{FetchContext, Fetcher};
use crate::resources::{ArtistProfiles, PopularArtists};
use crate::warmup::WarmupGate;

#[derive(Clone, Debug)]
pub struct Services {
    pub artists: Fetcher<ArtistProfiles>,
    pub popular: Fetcher<PopularArtists>,
    context: FetchContext,
}

impl Services {
    pub fn new(
        config: &Config,
        backend: Arc<dyn Backend>,
        local_store: Option<Arc<dyn LocalStore>>,
    ) -> Self {
        let warmup = WarmupGate::new(config.warmup, backend.clone());
        let context = FetchContext::new(
            backend,
            warmup,
            local_store,
            config.resources.mutation_timeout,
        );

        let artists = Fetcher::new(
            ArtistProfiles,
            config.resources.artist_profile,
            &config.cache,
            context.clone(),
        );
        let popular = Fetcher::new(
            PopularArtists,
            config.resources.popular_artists,
            &config.cache,
            context.clone(),
        );

        Self {
            artists,
            popular,
            context,
        }
    }

    /// Creates the services talking to the HTTP backend described in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.backend).context("failed to create backend")?;
        let local_store = config.fallback_dir.as_ref().map(|dir| {
            tracing::debug!("Using local fallbacks from {}", dir.display());
            Arc::new(FileStore::new(dir)) as Arc<dyn LocalStore>
        });
        Ok(Self::new(config, Arc::new(backend), local_store))
    }

    pub fn warmup(&self) -> &WarmupGate {
        self.context.warmup()
    }

    /// Drops all cached values. Last-known-good values are kept.
    pub fn invalidate_all(&self) {
        self.artists.invalidate_all();
        self.popular.invalidate_all();
    }

    /// Returns everything to its initial state, including the warmup.
    pub fn reset(&self) {
        self.artists.reset();
        self.popular.reset();
        self.context.warmup().reset();
    }
}
