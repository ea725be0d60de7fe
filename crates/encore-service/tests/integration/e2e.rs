use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;

use encore_service::fallback::{LocalStore, MemoryStore};
use encore_service::fetcher::{FallbackSource, FetchOptions, FetchOutcome};
use encore_service::resources::ProfileUpdate;
use encore_service::warmup::WarmupOutcome;

use crate::{FakeBackend, setup_services, setup_services_with_store};

#[tokio::test]
async fn test_artist_page() {
    let backend = FakeBackend::new();
    backend.set_delay(Duration::from_millis(200));
    let services = setup_services(&backend, |_| {});
    let id = "42".to_owned();

    // Five widgets on the same page mount at once.
    let outcomes = join_all((0..5).map(|_| services.artists.fetch(&id, Default::default()))).await;

    for outcome in &outcomes {
        assert!(outcome.is_fresh(), "{outcome:?}");
        assert_eq!(outcome.value().unwrap().name, "Mira Solano");
    }
    assert_eq!(backend.hits("artists/42"), 1);
    assert_eq!(backend.hits("health"), 1);

    // Navigating back to the page is served from the cache.
    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert!(matches!(outcome, FetchOutcome::Cached(_)));
    assert_eq!(backend.hits("artists/42"), 1);

    let outcome = services.artists.fetch(&id, FetchOptions::refresh()).await;
    assert!(matches!(outcome, FetchOutcome::Fetched(_)));
    assert_eq!(backend.hits("artists/42"), 2);
}

#[tokio::test]
async fn test_cold_backend() {
    let backend = FakeBackend::new();
    backend.fail_health(2);
    let services = setup_services(&backend, |_| {});
    let id = "7".to_owned();

    let (artist, popular) = tokio::join!(
        services.artists.fetch(&id, Default::default()),
        services.popular.fetch(&2, Default::default()),
    );

    assert!(artist.is_fresh());
    let popular = popular.into_value().unwrap();
    let names: Vec<_> = popular.iter().map(|artist| artist.name.as_str()).collect();
    assert_eq!(names, ["Ada Rune", "The Lanterns"]);

    assert_eq!(backend.hits("health"), 3);
    assert_eq!(
        services.warmup().status(),
        Some(WarmupOutcome::Healthy { attempts: 3 })
    );
}

#[tokio::test]
async fn test_warmup_gives_up() {
    let backend = FakeBackend::new();
    backend.fail_health(100);
    let services = setup_services(&backend, |config| {
        config.warmup.max_attempts = 2;
    });
    let id = "42".to_owned();

    // The health endpoint never recovers, but the data endpoints work.
    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert!(outcome.is_fresh());
    assert_eq!(
        services.warmup().status(),
        Some(WarmupOutcome::GaveUp { attempts: 2 })
    );
    assert_eq!(backend.hits("health"), 2);

    // The outcome is kept, later fetches do not probe again.
    services.artists.fetch(&id, FetchOptions::refresh()).await;
    assert_eq!(backend.hits("health"), 2);
}

#[tokio::test]
async fn test_popular_falls_back_to_curated_list() {
    let backend = FakeBackend::new();
    backend.fail_next(2, 500);
    let services = setup_services(&backend, |_| {});

    let outcome = services.popular.fetch(&3, Default::default()).await;
    let FetchOutcome::Fallback { value, source, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(source, FallbackSource::Static);
    assert_eq!(value.len(), 3);
    assert_eq!(backend.hits("charts/popular?limit=3"), 2);

    // The curated list is not cached, the next read reaches the backend again.
    let outcome = services.popular.fetch(&3, Default::default()).await;
    assert!(outcome.is_fresh());
    assert_eq!(backend.hits("charts/popular?limit=3"), 3);
}

#[tokio::test]
async fn test_stale_profile_during_outage() {
    let backend = FakeBackend::new();
    let services = setup_services(&backend, |_| {});
    let id = "13".to_owned();

    assert!(services.artists.fetch(&id, Default::default()).await.is_fresh());

    backend.fail_next(2, 503);
    let outcome = services.artists.fetch(&id, FetchOptions::refresh()).await;
    let FetchOutcome::Fallback { value, source, error } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(source, FallbackSource::Stale);
    assert_eq!(value.name, "The Lanterns");
    assert!(error.is_transient());
}

#[tokio::test]
async fn test_local_store_during_outage() {
    let backend = FakeBackend::new();
    let store = MemoryStore::new();
    store.insert(
        "artist:7",
        json!({"id": "7", "name": "Ada Rune (saved)", "followers": 90000}),
    );
    let services = setup_services_with_store(
        &backend,
        Some(Arc::new(store) as Arc<dyn LocalStore>),
        |_| {},
    );
    let id = "7".to_owned();

    backend.fail_next(2, 502);
    let outcome = services.artists.fetch(&id, Default::default()).await;
    let FetchOutcome::Fallback { value, source, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(source, FallbackSource::Local);
    assert_eq!(value.name, "Ada Rune (saved)");
}

#[tokio::test]
async fn test_update_profile() {
    let backend = FakeBackend::new();
    let services = setup_services(&backend, |_| {});
    let id = "42".to_owned();

    assert!(services.artists.fetch(&id, Default::default()).await.is_fresh());

    let update = ProfileUpdate {
        name: Some("Mira Solano Trio".into()),
        genres: Some(vec!["jazz".into(), "soul".into()]),
        ..Default::default()
    };
    let profile = services.artists.update_profile(&id, &update).await.unwrap();
    assert_eq!(profile.name, "Mira Solano Trio");
    assert_eq!(profile.genres, ["jazz", "soul"]);
    assert_eq!(backend.artist("42").unwrap()["name"], "Mira Solano Trio");

    // The saved profile is served without another read.
    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert_eq!(outcome, FetchOutcome::Cached(profile));
    assert_eq!(backend.hits("artists/42"), 2);
}
