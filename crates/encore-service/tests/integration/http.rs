use std::time::Duration;

use encore_service::error::FetchError;
use encore_service::fetcher::{FetchOptions, FetchOutcome};
use encore_service::resources::ProfileUpdate;

use crate::{FakeBackend, setup_services};

#[tokio::test]
async fn test_server_error_is_retried() {
    let backend = FakeBackend::new();
    backend.fail_next(1, 503);
    let services = setup_services(&backend, |_| {});
    let id = "42".to_owned();

    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert!(matches!(outcome, FetchOutcome::Fetched(_)), "{outcome:?}");
    assert_eq!(backend.hits("artists/42"), 2);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let backend = FakeBackend::new();
    let services = setup_services(&backend, |_| {});
    let id = "404".to_owned();

    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert_eq!(outcome, FetchOutcome::Failed(FetchError::NotFound));
    assert_eq!(backend.hits("artists/404"), 1);
}

#[tokio::test]
async fn test_rejected_response_is_retried() {
    let backend = FakeBackend::new();
    backend.reject_next(1);
    let services = setup_services(&backend, |_| {});
    let id = "42".to_owned();

    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert!(outcome.is_fresh(), "{outcome:?}");
    assert_eq!(backend.hits("artists/42"), 2);

    backend.reject_next(2);
    let outcome = services.artists.fetch(&id, FetchOptions::refresh()).await;
    // The profile fetched before is served in place of the rejected one.
    let FetchOutcome::Fallback { error, .. } = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(
        error,
        FetchError::Rejected("function is still starting".into())
    );
    assert_eq!(backend.hits("artists/42"), 4);
}

#[tokio::test]
async fn test_timeout() {
    let backend = FakeBackend::new();
    backend.set_delay(Duration::from_millis(500));
    let services = setup_services(&backend, |config| {
        config.resources.artist_profile.timeout = Duration::from_millis(100);
        config.resources.artist_profile.attempts = 1;
    });
    let id = "42".to_owned();

    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert_eq!(
        outcome,
        FetchOutcome::Failed(FetchError::Timeout(Duration::from_millis(100)))
    );
}

#[tokio::test]
async fn test_auth_token() {
    let backend = FakeBackend::new();
    backend.require_token("s3cret");
    let id = "42".to_owned();

    let services = setup_services(&backend, |config| {
        config.backend.auth_token = Some("wrong".into());
    });
    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert!(
        matches!(outcome, FetchOutcome::Failed(FetchError::PermissionDenied(_))),
        "{outcome:?}"
    );
    assert_eq!(backend.hits("artists/42"), 1);

    let services = setup_services(&backend, |config| {
        config.backend.auth_token = Some("s3cret".into());
    });
    let outcome = services.artists.fetch(&id, Default::default()).await;
    assert!(outcome.is_fresh(), "{outcome:?}");
}

#[tokio::test]
async fn test_failed_update_is_surfaced() {
    let backend = FakeBackend::new();
    let services = setup_services(&backend, |_| {});
    let id = "42".to_owned();

    let before = services.artists.fetch(&id, Default::default()).await;

    let update = ProfileUpdate {
        name: Some(String::new()),
        ..Default::default()
    };
    let error = services.artists.update_profile(&id, &update).await.unwrap_err();
    assert!(matches!(error, FetchError::Invalid(_)), "{error:?}");
    assert!(error.to_string().contains("name must not be empty"));

    // Nothing was retried, and the cached profile is untouched.
    assert_eq!(backend.hits("artists/42"), 2);
    let after = services.artists.fetch(&id, Default::default()).await;
    assert_eq!(after, FetchOutcome::Cached(before.into_value().unwrap()));
}

#[tokio::test]
async fn test_update_unknown_artist() {
    let backend = FakeBackend::new();
    let services = setup_services(&backend, |_| {});

    let update = ProfileUpdate {
        bio: Some("Nobody knows them.".into()),
        ..Default::default()
    };
    let error = services
        .artists
        .update_profile("404", &update)
        .await
        .unwrap_err();
    assert_eq!(error, FetchError::NotFound);
}

#[tokio::test]
async fn test_ids_stay_in_their_segment() {
    let backend = FakeBackend::new();
    let services = setup_services(&backend, |_| {});

    for id in ["13/../42", "7?x=1", "42/"] {
        let outcome = services.artists.fetch(&id.to_owned(), Default::default()).await;
        assert_eq!(outcome, FetchOutcome::Failed(FetchError::NotFound), "{id}");
    }
    assert_eq!(backend.hits("artists/13%2F..%2F42"), 1);
    assert_eq!(backend.hits("artists/7%3Fx=1"), 1);
    assert_eq!(backend.hits("artists/42%2F"), 1);
    assert_eq!(backend.hits("artists/42"), 0);
    assert_eq!(backend.hits("artists/7"), 0);

    // dot segments never reach the server
    for id in ["..", "."] {
        let outcome = services.artists.fetch(&id.to_owned(), Default::default()).await;
        assert!(
            matches!(outcome, FetchOutcome::Failed(FetchError::Invalid(_))),
            "{id}: {outcome:?}"
        );
    }
    let artist_hits: usize = backend
        .all_hits()
        .into_iter()
        .filter(|(path, _)| path.starts_with("artists"))
        .map(|(_, hits)| hits)
        .sum();
    assert_eq!(artist_hits, 3);

    let update = ProfileUpdate {
        name: Some("Someone Else".into()),
        ..Default::default()
    };
    let error = services
        .artists
        .update_profile("13/../42", &update)
        .await
        .unwrap_err();
    assert_eq!(error, FetchError::NotFound);
    assert_eq!(backend.artist("42").unwrap()["name"], "Mira Solano");
}
