//! Mock transport for testing.
//!
//! [`MockTransport`] answers requests from scripted replies and records
//! every request it receives, so bindings can be tested deterministically
//! without a backend.
//!
//! # Basic Usage
//!
//! ```
//! use std::sync::Arc;
//! use mycolog::client::ApiClient;
//! use mycolog::mock::MockTransport;
//! use mycolog::transport::Payload;
//! use reqwest::Method;
//! use serde_json::json;
//!
//! let mock = MockTransport::new();
//! mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([]))));
//!
//! // The client shares the mock; the test keeps a handle to script it.
//! let client = ApiClient::new(Arc::new(mock.clone()));
//! # let _ = client;
//! ```
//!
//! # Controlling timing
//!
//! [`MockTransport::defer`] queues a reply that only resolves when the test
//! says so, which is how out-of-order responses are simulated:
//!
//! ```
//! # use mycolog::mock::MockTransport;
//! # use mycolog::transport::Payload;
//! # use reqwest::Method;
//! let mock = MockTransport::new();
//! let slow = mock.defer(Method::GET, "/users?search=a");
//! // ... start a query, change its resource, let the newer one settle ...
//! slow.resolve(Ok(Payload::Text("late".to_string())));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::Method;
use tokio::sync::oneshot;

use crate::error::{ApiError, Result};
use crate::transport::{Payload, Request, Transport};

enum Reply {
    Ready(Result<Payload>),
    Deferred(oneshot::Receiver<Result<Payload>>),
}

/// Resolves a reply queued with [`MockTransport::defer`].
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Result<Payload>>,
}

impl Responder {
    /// Settles the pending request. Ignored if the request was abandoned.
    pub fn resolve(self, result: Result<Payload>) {
        let _ = self.tx.send(result);
    }
}

/// A scripted, recording [`Transport`].
///
/// Replies are keyed by method and path and consumed in order. The last
/// immediate reply for a route is sticky and answers any further requests,
/// so queries can refetch without re-scripting. Unscripted routes fail with
/// a 404 application error.
///
/// Clones share the same script and request log.
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<DashMap<(Method, String), VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("routes", &self.routes.len())
            .field("requests", &self.requests().len())
            .finish()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an immediate reply for `method path`.
    pub fn respond(&self, method: Method, path: impl Into<String>, result: Result<Payload>) {
        self.routes
            .entry((method, path.into()))
            .or_default()
            .push_back(Reply::Ready(result));
    }

    /// Queues a reply that stays pending until the returned [`Responder`]
    /// resolves it.
    #[must_use]
    pub fn defer(&self, method: Method, path: impl Into<String>) -> Responder {
        let (tx, rx) = oneshot::channel();
        self.routes
            .entry((method, path.into()))
            .or_default()
            .push_back(Reply::Deferred(rx));
        Responder { tx }
    }

    /// Returns every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Counts the requests received for `method path`.
    #[must_use]
    pub fn request_count(&self, method: &Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.method == *method && r.path == path)
            .count()
    }

    fn next_reply(&self, method: &Method, path: &str) -> Option<Reply> {
        let mut queue = self.routes.get_mut(&(method.clone(), path.to_string()))?;
        match queue.front() {
            Some(Reply::Ready(result)) if queue.len() == 1 => Some(Reply::Ready(result.clone())),
            Some(_) => queue.pop_front(),
            None => None,
        }
    }
}

impl Transport for MockTransport {
    fn request(&self, request: Request) -> BoxFuture<'static, Result<Payload>> {
        let reply = self.next_reply(&request.method, &request.path);
        let route = format!("{} {}", request.method, request.path);

        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        async move {
            match reply {
                Some(Reply::Ready(result)) => result,
                Some(Reply::Deferred(rx)) => rx
                    .await
                    .unwrap_or_else(|_| Err(ApiError::Transport("mock responder dropped".to_string()))),
                None => Err(ApiError::Application {
                    status: 404,
                    message: format!("no mock response for {route}"),
                }),
            }
        }
        .boxed()
    }
}
