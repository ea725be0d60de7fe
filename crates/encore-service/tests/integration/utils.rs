use std::sync::Arc;
use std::time::Duration;

use encore_service::backend::HttpBackend;
use encore_service::config::Config;
use encore_service::fallback::LocalStore;
use encore_service::services::Services;

pub use encore_test::{FakeBackend, setup};

/// A config pointing at `backend`, with short delays so tests run on the real clock.
pub fn fast_config(backend: &FakeBackend) -> Config {
    let mut config = Config::default();
    config.backend.url = backend.base_url();

    config.warmup.base_delay = Duration::from_millis(20);
    config.warmup.probe_timeout = Duration::from_secs(1);

    for policy in [
        &mut config.resources.artist_profile,
        &mut config.resources.popular_artists,
    ] {
        policy.timeout = Duration::from_secs(2);
        policy.retry_delay = Duration::from_millis(20);
    }
    config.resources.mutation_timeout = Duration::from_secs(2);

    config
}

/// Creates services talking to `backend` over HTTP.
///
/// The `update_config` closure can modify any default configuration if needed before the services
/// are created.
pub fn setup_services<F>(backend: &FakeBackend, update_config: F) -> Services
where
    F: FnOnce(&mut Config),
{
    setup_services_with_store(backend, None, update_config)
}

pub fn setup_services_with_store<F>(
    backend: &FakeBackend,
    local_store: Option<Arc<dyn LocalStore>>,
    update_config: F,
) -> Services
where
    F: FnOnce(&mut Config),
{
    setup();

    let mut config = fast_config(backend);
    update_config(&mut config);

    let http = HttpBackend::new(&config.backend).unwrap();
    Services::new(&config, Arc::new(http), local_store)
}
