//! Query bindings: live, tag-invalidated reads.
//!
//! A [`Query`] pairs a resource path with a tag. When created it registers
//! a refresh callback under the tag and immediately fetches the resource.
//! Whenever the tag is invalidated (usually by a successful
//! [`Mutation`](crate::mutation::Mutation)) the query refetches.
//!
//! # State
//!
//! The binding exposes a [`QueryState`] through a `watch` channel:
//!
//! 1. On every fetch `loading` becomes `true` and `error` is cleared
//! 2. On success `data` is replaced and `loading` becomes `false`
//! 3. On failure `error` is set and `loading` becomes `false`; the previous
//!    `data` is kept so views can keep showing it
//!
//! Each fetch carries a generation number. A fetch that settles after a
//! newer one was started is discarded, so `data` always belongs to the most
//! recent request for the current resource.
//!
//! # Example
//!
//! ```rust,ignore
//! use mycolog::resources::{self, Find};
//!
//! let mut my_finds = client.query::<Vec<Find>>(resources::MY_FINDS_PATH, resources::MY_FINDS);
//! let state = my_finds.settled().await;
//!
//! // Later, after a delete elsewhere:
//! client.invalidate_tags(resources::MY_FINDS); // my_finds refetches
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::tags::{SubscriberId, TagRegistration};
use crate::transport::{Payload, Request};

/// Snapshot of a query binding.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    /// Payload of the last successful fetch.
    pub data: Option<T>,
    /// `true` while a fetch for the current resource is in flight.
    pub loading: bool,
    /// Error of the last fetch, cleared when a new fetch starts.
    pub error: Option<ApiError>,
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

impl<T> QueryState<T> {
    /// Returns the data from the last successful fetch, if any.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns `true` while a fetch is in flight.
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Returns `true` if the last fetch failed.
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns the error text to display, if the last fetch failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(ApiError::message)
    }
}

struct Inner<T> {
    client: ApiClient,
    tag: String,
    subscriber: SubscriberId,
    generation: AtomicU64,
    state: watch::Sender<QueryState<T>>,
    token: CancellationToken,
    runtime: Handle,
}

impl<T> Inner<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn register(self: &Arc<Self>, resource: &str) -> TagRegistration {
        let weak = Arc::downgrade(self);
        let resource = resource.to_string();

        self.client
            .registry()
            .provide_tag(self.tag.clone(), self.subscriber, move || {
                if let Some(inner) = weak.upgrade() {
                    inner.fetch(&resource);
                }
            })
    }

    fn fetch(self: &Arc<Self>, resource: &str) {
        if self.token.is_cancelled() {
            return;
        }

        let mut generation = 0;
        self.state.send_modify(|state| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            state.loading = true;
            state.error = None;
        });

        trace!(tag = %self.tag, resource, generation, "query fetch started");

        let request = self.client.transport().request(Request::get(resource));
        let inner = Arc::clone(self);
        let resource = resource.to_string();

        self.runtime.spawn(async move {
            let result = tokio::select! {
                () = inner.token.cancelled() => return,
                result = request => result.and_then(Payload::decode::<T>),
            };
            inner.settle(generation, &resource, result);
        });
    }

    fn settle(&self, generation: u64, resource: &str, result: Result<T, ApiError>) {
        self.state.send_if_modified(|state| {
            if self.token.is_cancelled() {
                return false;
            }
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(tag = %self.tag, resource, generation, "discarding superseded response");
                return false;
            }

            state.loading = false;
            match result {
                Ok(data) => state.data = Some(data),
                Err(err) => {
                    warn!(tag = %self.tag, resource, error = %err, "query failed");
                    state.error = Some(err);
                }
            }
            true
        });
    }
}

/// A live read of one resource, refreshed when its tag is invalidated.
///
/// Dropping the query cancels any in-flight fetch (its result is never
/// applied) and removes its tag registration.
///
/// Must be created inside a Tokio runtime. Fetches are spawned on that
/// runtime, so invalidating its tag from any thread is fine.
pub struct Query<T> {
    inner: Arc<Inner<T>>,
    resource: String,
    registration: TagRegistration,
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("resource", &self.resource)
            .field("tag", &self.inner.tag)
            .field("subscriber", &self.registration.subscriber())
            .finish_non_exhaustive()
    }
}

impl<T> Query<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Registers under `tag` and starts fetching `resource`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(client: &ApiClient, resource: impl Into<String>, tag: impl Into<String>) -> Self {
        let resource = resource.into();
        let (state, _) = watch::channel(QueryState::default());

        let inner = Arc::new(Inner {
            client: client.clone(),
            tag: tag.into(),
            subscriber: SubscriberId::next(),
            generation: AtomicU64::new(0),
            state,
            token: CancellationToken::new(),
            runtime: Handle::current(),
        });

        let registration = inner.register(&resource);
        inner.fetch(&resource);

        Self {
            inner,
            resource,
            registration,
        }
    }

    /// Points the query at a new resource and refetches.
    ///
    /// Returns `false` and does nothing if the resource is unchanged.
    pub fn set_resource(&mut self, resource: impl Into<String>) -> bool {
        let resource = resource.into();
        if resource == self.resource {
            return false;
        }

        self.registration = self.inner.register(&resource);
        self.inner.fetch(&resource);
        self.resource = resource;
        true
    }

    /// Starts a new fetch of the current resource.
    pub fn refetch(&self) {
        self.inner.fetch(&self.resource);
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueryState<T>> {
        self.inner.state.subscribe()
    }
}

impl<T> Query<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> QueryState<T> {
        self.inner.state.borrow().clone()
    }

    /// Returns the state as a stream, starting with the current value.
    #[must_use]
    pub fn stream(&self) -> BoxStream<'static, QueryState<T>> {
        WatchStream::new(self.subscribe()).boxed()
    }

    /// Waits until no fetch is in flight and returns that state.
    pub async fn settled(&self) -> QueryState<T> {
        let mut rx = self.subscribe();
        match rx.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        self.inner.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use reqwest::Method;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn client(mock: &MockTransport) -> ApiClient {
        ApiClient::new(Arc::new(mock.clone()))
    }

    #[test]
    fn test_query_state_default() {
        let state: QueryState<i32> = QueryState::default();
        assert_eq!(state.data(), None);
        assert!(!state.is_loading());
        assert!(!state.is_error());
        assert_eq!(state.error_message(), None);
    }

    #[test]
    fn test_query_state_error_message() {
        let state: QueryState<i32> = QueryState {
            data: Some(1),
            loading: false,
            error: Some(ApiError::Application {
                status: 500,
                message: "boom".to_string(),
            }),
        };
        assert!(state.is_error());
        assert_eq!(state.error_message(), Some("boom"));
        assert_eq!(state.data(), Some(&1));
    }

    #[tokio::test]
    async fn test_new_query_is_loading_then_settles() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([1, 2, 3]))));
        let client = client(&mock);

        let query = Query::<Vec<u32>>::new(&client, "/finds", "all-finds");
        assert!(query.state().loading);

        let state = timeout(Duration::from_secs(1), query.settled())
            .await
            .expect("query should settle");
        assert_eq!(state.data, Some(vec![1, 2, 3]));
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_error_keeps_previous_data() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([1]))));
        mock.respond(
            Method::GET,
            "/finds",
            Err(ApiError::Transport("connection reset".to_string())),
        );
        let client = client(&mock);

        let query = Query::<Vec<u32>>::new(&client, "/finds", "all-finds");
        let first = query.settled().await;
        assert_eq!(first.data, Some(vec![1]));

        query.refetch();
        let second = query.settled().await;
        assert_eq!(second.data, Some(vec![1]));
        assert_eq!(second.error_message(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_decode_failure_is_reported() {
        let mock = MockTransport::new();
        mock.respond(
            Method::GET,
            "/finds",
            Ok(Payload::Json(json!({"not": "a list"}))),
        );
        let client = client(&mock);

        let query = Query::<Vec<u32>>::new(&client, "/finds", "all-finds");
        let state = query.settled().await;
        assert!(state.data.is_none());
        assert!(matches!(state.error, Some(ApiError::Transport(_))));
    }

    #[tokio::test]
    async fn test_unchanged_resource_does_not_refetch() {
        let mock = MockTransport::new();
        mock.respond(
            Method::GET,
            "/users?search=",
            Ok(Payload::Json(json!([]))),
        );
        let client = client(&mock);

        let mut query = Query::<Vec<u32>>::new(&client, "/users?search=", "user-search");
        query.settled().await;

        assert!(!query.set_resource("/users?search="));
        assert_eq!(mock.request_count(&Method::GET, "/users?search="), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_current_state() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([7]))));
        let client = client(&mock);

        let query = Query::<Vec<u32>>::new(&client, "/finds", "all-finds");
        query.settled().await;

        let mut stream = query.stream();
        let state = stream.next().await.expect("stream yields current state");
        assert_eq!(state.data, Some(vec![7]));
    }

    #[tokio::test]
    async fn test_registration_follows_query_lifetime() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "/finds/me", Ok(Payload::Json(json!([]))));
        let client = client(&mock);

        let query = Query::<Vec<u32>>::new(&client, "/finds/me", "my-finds");
        assert_eq!(client.registry().subscriber_count("my-finds"), 1);
        assert_eq!(query.tag(), "my-finds");
        assert_eq!(query.resource(), "/finds/me");

        drop(query);
        assert_eq!(client.registry().subscriber_count("my-finds"), 0);
    }
}
