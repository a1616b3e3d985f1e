//! Mutation bindings for creating, updating, or deleting resources.
//!
//! A [`Mutation`] is configured once with a method, an optional default
//! path and the tags it invalidates. Each [`Mutation::mutate`] call sends
//! one request; on success it stores the response and invalidates the tags
//! so every live [`Query`](crate::query::Query) under them refetches.
//!
//! `mutate` never returns an error. It reports failure through its boolean
//! result and the binding's [`MutationState`], so calling code can decide
//! whether to move on:
//!
//! ```rust,ignore
//! use mycolog::resources;
//! use reqwest::Method;
//!
//! let delete = client.mutation::<serde_json::Value>(
//!     Method::DELETE,
//!     None,
//!     [resources::MY_FINDS, resources::ALL_FINDS],
//! );
//!
//! if !delete.mutate(None, Some(&resources::find_path(42))).await {
//!     eprintln!("{}", delete.state().error_message().unwrap_or_default());
//! }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::tags::Tags;
use crate::transport::{Body, Request};

/// Snapshot of a mutation binding.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationState<T> {
    /// Response of the last successful call.
    pub data: Option<T>,
    /// `true` while at least one call is in flight.
    pub loading: bool,
    /// Error of the last failed call, cleared when a call starts.
    pub error: Option<ApiError>,
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }
}

impl<T> MutationState<T> {
    /// Returns the response of the last successful call, if any.
    pub const fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns `true` while at least one call is in flight.
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Returns `true` if the last call failed.
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns the error text to display, if the last call failed.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(ApiError::message)
    }
}

/// A reusable write operation that invalidates tags on success.
///
/// Concurrent `mutate` calls on one binding are not serialized; `loading`
/// stays `true` until the last of them settles.
pub struct Mutation<T = Value> {
    client: ApiClient,
    method: Method,
    default_path: Option<String>,
    tags: Tags,
    in_flight: AtomicUsize,
    state: watch::Sender<MutationState<T>>,
}

impl<T> std::fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("method", &self.method)
            .field("default_path", &self.default_path)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

impl<T> Mutation<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    /// Creates a binding. `default_path` may be `None` when every call
    /// supplies its own path.
    pub fn new(
        client: &ApiClient,
        method: Method,
        default_path: Option<&str>,
        tags: impl Into<Tags>,
    ) -> Self {
        let (state, _) = watch::channel(MutationState::default());
        Self {
            client: client.clone(),
            method,
            default_path: default_path.map(str::to_owned),
            tags: tags.into(),
            in_flight: AtomicUsize::new(0),
            state,
        }
    }

    /// Sends the request and returns `true` on success.
    ///
    /// Any 2xx response counts as success and invalidates the tags. If its
    /// body does not decode into `T`, `data` is cleared and the decode
    /// error is recorded in `error`.
    ///
    /// `override_path` replaces the default path for this call. Multipart
    /// bodies are sent as-is, JSON bodies as JSON, and `None` sends no body.
    pub async fn mutate(&self, body: Option<Body>, override_path: Option<&str>) -> bool {
        let Some(path) = override_path.or(self.default_path.as_deref()) else {
            self.fail(
                "",
                ApiError::InvalidRequest(format!("no resource path for {} mutation", self.method)),
            );
            return false;
        };

        let mut request = Request::new(self.method.clone(), path);
        request.body = body;

        let _loading = LoadingGuard::start(self);
        let payload = match self.client.transport().request(request).await {
            Ok(payload) => payload,
            Err(err) => {
                self.fail(path, err);
                return false;
            }
        };

        // The write happened; an unexpected body does not undo it.
        match payload.decode::<T>() {
            Ok(data) => self.state.send_modify(|state| state.data = Some(data)),
            Err(err) => {
                warn!(method = %self.method, path, error = %err, "mutation response not understood");
                self.state.send_modify(|state| {
                    state.data = None;
                    state.error = Some(err);
                });
            }
        }

        debug!(method = %self.method, path, tags = ?self.tags, "mutation succeeded");
        self.client.invalidate_tags(self.tags.clone());
        true
    }

    /// Serializes `body` as JSON and calls [`mutate`](Self::mutate).
    pub async fn mutate_json<S>(&self, body: &S, override_path: Option<&str>) -> bool
    where
        S: Serialize + ?Sized,
    {
        match Body::json(body) {
            Ok(body) => self.mutate(Some(body), override_path).await,
            Err(err) => {
                let path = override_path.or(self.default_path.as_deref());
                self.fail(path.unwrap_or_default(), err);
                false
            }
        }
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub const fn tags(&self) -> &Tags {
        &self.tags
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MutationState<T>> {
        self.state.subscribe()
    }

    fn fail(&self, path: &str, err: ApiError) {
        warn!(method = %self.method, path, error = %err, "mutation failed");
        self.state.send_modify(|state| state.error = Some(err));
    }
}

impl<T> Mutation<T>
where
    T: Clone + DeserializeOwned + Send + Sync + 'static,
{
    #[must_use]
    pub fn state(&self) -> MutationState<T> {
        self.state.borrow().clone()
    }
}

/// Marks a call in flight; clears `loading` on drop, whether the call
/// succeeded, failed or was cancelled.
struct LoadingGuard<'a, T> {
    in_flight: &'a AtomicUsize,
    state: &'a watch::Sender<MutationState<T>>,
}

impl<'a, T> LoadingGuard<'a, T> {
    fn start(mutation: &'a Mutation<T>) -> Self {
        mutation.state.send_modify(|state| {
            mutation.in_flight.fetch_add(1, Ordering::SeqCst);
            state.loading = true;
            state.error = None;
        });
        Self {
            in_flight: &mutation.in_flight,
            state: &mutation.state,
        }
    }
}

impl<T> Drop for LoadingGuard<'_, T> {
    fn drop(&mut self) {
        self.state.send_modify(|state| {
            let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
            state.loading = previous > 1;
        });
    }
}
