// Integration tests for queries and tag invalidation

use std::sync::Arc;

use mycolog::{
    client::ApiClient,
    error::ApiError,
    mock::MockTransport,
    query::Query,
    transport::Payload,
};
use reqwest::Method;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep, timeout};

fn client(mock: &MockTransport) -> ApiClient {
    ApiClient::new(Arc::new(mock.clone()))
}

async fn settle<T>(query: &Query<T>) -> mycolog::query::QueryState<T>
where
    T: Clone + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    timeout(Duration::from_secs(1), query.settled())
        .await
        .expect("query should settle")
}

#[tokio::test]
async fn test_failed_read_reports_backend_message() {
    let mock = MockTransport::new();
    mock.respond(
        Method::GET,
        "/finds/me",
        Err(ApiError::Application {
            status: 401,
            message: "Unauthorized".to_string(),
        }),
    );
    let client = client(&mock);

    let query = client.query::<Vec<Value>>("/finds/me", "my-finds");
    let state = settle(&query).await;

    assert_eq!(state.error_message(), Some("Unauthorized"));
    assert_eq!(state.error.as_ref().and_then(ApiError::status), Some(401));
    assert!(state.data.is_none());
    assert!(!state.loading);
}

#[tokio::test]
async fn test_invalidation_refetches_query() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/finds/me", Ok(Payload::Json(json!([1]))));
    mock.respond(Method::GET, "/finds/me", Ok(Payload::Json(json!([1, 2]))));
    let client = client(&mock);

    let query = client.query::<Vec<u32>>("/finds/me", "my-finds");
    assert_eq!(settle(&query).await.data, Some(vec![1]));

    assert_eq!(client.invalidate_tags("my-finds"), 1);
    assert!(query.state().loading, "invalidation starts a fetch at once");

    assert_eq!(settle(&query).await.data, Some(vec![1, 2]));
    assert_eq!(mock.request_count(&Method::GET, "/finds/me"), 2);
}

#[tokio::test]
async fn test_every_query_under_a_tag_refreshes() {
    // Two screens showing different slices of one tag both refresh.
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/users/ana/finds", Ok(Payload::Json(json!([]))));
    mock.respond(Method::GET, "/users/bo/finds", Ok(Payload::Json(json!([]))));
    let client = client(&mock);

    let ana = client.query::<Vec<Value>>("/users/ana/finds", "user-finds");
    let bo = client.query::<Vec<Value>>("/users/bo/finds", "user-finds");
    settle(&ana).await;
    settle(&bo).await;
    assert_eq!(client.registry().subscriber_count("user-finds"), 2);

    assert_eq!(client.invalidate_tags("user-finds"), 2);
    settle(&ana).await;
    settle(&bo).await;

    assert_eq!(mock.request_count(&Method::GET, "/users/ana/finds"), 2);
    assert_eq!(mock.request_count(&Method::GET, "/users/bo/finds"), 2);
}

#[tokio::test]
async fn test_invalidating_unknown_tags_is_a_no_op() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([]))));
    let client = client(&mock);

    let query = client.query::<Vec<Value>>("/finds", "all-finds");
    settle(&query).await;

    assert_eq!(client.invalidate_tags(["nobody", "listens"]), 0);
    assert!(!query.state().loading);
    assert_eq!(mock.request_count(&Method::GET, "/finds"), 1);
}

#[tokio::test]
async fn test_stale_response_is_discarded() {
    let mock = MockTransport::new();
    let slow = mock.defer(Method::GET, "/users?search=a");
    mock.respond(
        Method::GET,
        "/users?search=ab",
        Ok(Payload::Json(json!(["abby"]))),
    );
    let client = client(&mock);

    let mut query = client.query::<Vec<String>>("/users?search=a", "user-search");
    assert!(query.set_resource("/users?search=ab"));
    assert_eq!(settle(&query).await.data, Some(vec!["abby".to_string()]));

    slow.resolve(Ok(Payload::Json(json!(["alice", "anna"]))));
    sleep(Duration::from_millis(20)).await;

    let state = query.state();
    assert_eq!(state.data, Some(vec!["abby".to_string()]));
    assert!(!state.loading);
}

#[tokio::test]
async fn test_invalidation_uses_current_resource() {
    let mock = MockTransport::new();
    mock.respond(Method::GET, "/users?search=a", Ok(Payload::Json(json!([]))));
    mock.respond(Method::GET, "/users?search=ab", Ok(Payload::Json(json!([]))));
    let client = client(&mock);

    let mut query = client.query::<Vec<Value>>("/users?search=a", "user-search");
    settle(&query).await;
    query.set_resource("/users?search=ab");
    settle(&query).await;

    client.invalidate_tags("user-search");
    settle(&query).await;

    assert_eq!(mock.request_count(&Method::GET, "/users?search=a"), 1);
    assert_eq!(mock.request_count(&Method::GET, "/users?search=ab"), 2);
    assert_eq!(client.registry().subscriber_count("user-search"), 1);
}

#[tokio::test]
async fn test_dropped_query_never_commits() {
    let mock = MockTransport::new();
    let pending = mock.defer(Method::GET, "/finds");
    let client = client(&mock);

    let query = client.query::<Vec<Value>>("/finds", "all-finds");
    let mut rx = query.subscribe();
    drop(rx.borrow_and_update());

    drop(query);
    assert!(client.registry().is_empty());
    assert_eq!(client.invalidate_tags("all-finds"), 0);

    pending.resolve(Ok(Payload::Json(json!([{"id": 1}]))));
    sleep(Duration::from_millis(20)).await;

    // The sender is gone and nothing was published after the drop.
    assert!(!rx.has_changed().unwrap_or(false));
    assert!(rx.borrow().data.is_none());
}

#[test]
fn test_invalidate_from_plain_thread() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build");

    let mock = MockTransport::new();
    mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([]))));
    let client = client(&mock);

    let query = runtime.block_on(async {
        let query = client.query::<Vec<Value>>("/finds", "all-finds");
        settle(&query).await;
        query
    });

    let other = client.clone();
    let invoked = std::thread::spawn(move || other.invalidate_tags("all-finds"))
        .join()
        .expect("invalidation should not panic");
    assert_eq!(invoked, 1);

    runtime.block_on(async {
        settle(&query).await;
    });
    assert_eq!(mock.request_count(&Method::GET, "/finds"), 2);
}
