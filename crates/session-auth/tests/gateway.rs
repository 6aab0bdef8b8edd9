mod common;

use common::*;
use session_auth::{ApiRequest, AuthError, AuthGateway};
use std::sync::Arc;
use std::time::Duration;

const RECIPES: &str = "https://api.recipes.example.com/recipes";

fn gateway(h: &Harness, dispatcher: &Arc<FakeDispatcher>) -> AuthGateway {
    AuthGateway::new(Arc::clone(&h.store), h.refresher.clone(), dispatcher.clone())
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried() {
    let h = harness(FakeBackend::new().then_refresh(refreshed("A2")));
    h.session.login("cook@example.com", "secret").await.unwrap();
    assert_eq!(h.store.get_access().as_deref(), Some("A1"));

    let dispatcher = Arc::new(FakeDispatcher::accepting(&["A2"]));
    let response = gateway(&h, &dispatcher)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        dispatcher.bearer_tokens(),
        vec![Some("A1".to_string()), Some("A2".to_string())]
    );
    assert_eq!(h.backend.seen_refresh_tokens(), vec!["R1".to_string()]);
    assert_eq!(h.store.get_access().as_deref(), Some("A2"));
    assert_eq!(h.store.get_refresh().as_deref(), Some("R1"));
}

#[tokio::test]
async fn second_unauthorized_response_is_not_retried() {
    let h = harness(FakeBackend::new().then_refresh(refreshed("A2")));
    h.store.save("A1", "R1").unwrap();

    let dispatcher = Arc::new(FakeDispatcher::accepting(&[]));
    let err = gateway(&h, &dispatcher)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::AuthenticationRequired));
    assert_eq!(dispatcher.requests().len(), 2);
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn rejected_refresh_surfaces_auth_rejected() {
    let h = harness(FakeBackend::new().then_refresh(rejected()));
    h.store.save("A1", "R1").unwrap();

    let dispatcher = Arc::new(FakeDispatcher::accepting(&[]));
    let err = gateway(&h, &dispatcher)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::AuthRejected(_)));
    assert_eq!(dispatcher.requests().len(), 1);
    assert!(!h.store.is_logged_in());
}

#[tokio::test]
async fn transient_refresh_failure_returns_original_unauthorized_response() {
    let h = harness(FakeBackend::new().then_refresh(transient()));
    h.store.save("A1", "R1").unwrap();

    let dispatcher = Arc::new(FakeDispatcher::accepting(&[]));
    let response = gateway(&h, &dispatcher)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap();

    assert_eq!(response.status, 401);
    assert!(!response.is_success());
    assert_eq!(dispatcher.requests().len(), 1);
    assert_eq!(h.store.get_access().as_deref(), Some("A1"));
    assert_eq!(h.store.get_refresh().as_deref(), Some("R1"));
}

#[tokio::test]
async fn successful_response_is_returned_untouched() {
    let h = harness(FakeBackend::new());
    h.store.save("A1", "R1").unwrap();

    let dispatcher = Arc::new(FakeDispatcher::accepting(&["A1"]));
    let template = ApiRequest::post(RECIPES).header("X-Trace", "1");
    let response = gateway(&h, &dispatcher).execute(&template).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(h.backend.refresh_calls(), 0);
    assert_eq!(template.header_value("Authorization"), None);
    let sent = &dispatcher.requests()[0];
    assert_eq!(sent.header_value("X-Trace"), Some("1"));
}

#[tokio::test]
async fn missing_access_token_is_refreshed_before_dispatch() {
    let h = harness_with_storage(
        FakeBackend::new().then_refresh(refreshed("A2")),
        refresh_only_storage("R1"),
    );

    let dispatcher = Arc::new(FakeDispatcher::accepting(&["A2"]));
    let response = gateway(&h, &dispatcher)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(dispatcher.bearer_tokens(), vec![Some("A2".to_string())]);
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn anonymous_requests_go_out_without_token() {
    let h = harness(FakeBackend::new());

    let dispatcher = Arc::new(FakeDispatcher::accepting(&["*"]));
    let response = gateway(&h, &dispatcher)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(dispatcher.bearer_tokens(), vec![None]);

    let locked = Arc::new(FakeDispatcher::accepting(&[]));
    let err = gateway(&h, &locked)
        .execute(&ApiRequest::get(RECIPES))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AuthenticationRequired));
    assert_eq!(h.backend.refresh_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unauthorized_requests_refresh_once() {
    let h = harness(
        FakeBackend::new()
            .with_refresh_delay(Duration::from_millis(50))
            .then_refresh(refreshed("A2")),
    );
    h.store.save("A1", "R1").unwrap();

    let dispatcher = Arc::new(FakeDispatcher::accepting(&["A2"]));
    let gateway = gateway(&h, &dispatcher);

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.execute(&ApiRequest::get(RECIPES)).await })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().status, 200);
    }
    assert_eq!(h.backend.refresh_calls(), 1);
}

#[tokio::test]
async fn handshake_token_prefers_stored_access_token() {
    let h = harness_with_storage(
        FakeBackend::new().then_refresh(refreshed("A2")),
        refresh_only_storage("R1"),
    );
    let dispatcher = Arc::new(FakeDispatcher::accepting(&[]));
    let gateway = gateway(&h, &dispatcher);

    assert_eq!(gateway.current_access_token(), None);
    assert_eq!(gateway.access_token().await.unwrap().as_deref(), Some("A2"));
    assert_eq!(gateway.current_access_token().as_deref(), Some("A2"));
    assert_eq!(gateway.access_token().await.unwrap().as_deref(), Some("A2"));
    assert_eq!(h.backend.refresh_calls(), 1);
}
