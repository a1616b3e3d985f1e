//! Transport client for the backend REST API.
//!
//! Every request in the crate goes through a [`Transport`]. The production
//! implementation, [`HttpTransport`], wraps a `reqwest` client and is
//! responsible for:
//!
//! - joining the resource path onto the configured base URL
//! - attaching `Authorization: Bearer <token>` when the session has a token
//! - sending JSON bodies with `Content-Type: application/json`, and multipart
//!   bodies with the boundary header `reqwest` generates
//! - parsing responses as JSON or text depending on their content type
//! - turning non-2xx responses into [`ApiError::Application`] carrying the
//!   backend's own message
//!
//! Bindings only see the [`Transport`] trait, so tests can swap in
//! [`MockTransport`](crate::mock::MockTransport).

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::session::SessionAccessor;

/// A single part of a multipart [`Form`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    File {
        bytes: Vec<u8>,
        file_name: String,
        mime: Option<String>,
    },
}

/// A multipart form body, e.g. a find with an attached photo.
///
/// Parts keep their insertion order. The form is converted to a
/// `reqwest::multipart::Form` only when the request is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Form {
    parts: Vec<(String, Part)>,
}

impl Form {
    #[must_use]
    pub const fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Appends a text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), Part::Text(value.into())));
        self
    }

    /// Appends a file field.
    #[must_use]
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        mime: Option<String>,
    ) -> Self {
        self.parts.push((
            name.into(),
            Part::File {
                bytes,
                file_name: file_name.into(),
                mime,
            },
        ));
        self
    }

    #[must_use]
    pub fn parts(&self) -> &[(String, Part)] {
        &self.parts
    }

    /// Returns the first text value stored under `name`.
    #[must_use]
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|(key, part)| match part {
            Part::Text(value) if key == name => Some(value.as_str()),
            _ => None,
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.parts.iter().any(|(key, _)| key == name)
    }

    fn into_multipart(self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, part) in self.parts {
            form = match part {
                Part::Text(value) => form.text(name, value),
                Part::File {
                    bytes,
                    file_name,
                    mime,
                } => {
                    let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
                    if let Some(mime) = mime {
                        part = part
                            .mime_str(&mime)
                            .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                    }
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }
}

/// Request body. The variant decides how the body is content-typed.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Multipart(Form),
}

impl Body {
    /// Serializes `value` into a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] if `value` cannot be represented
    /// as JSON.
    pub fn json<S: serde::Serialize + ?Sized>(value: &S) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Form> for Body {
    fn from(form: Form) -> Self {
        Self::Multipart(form)
    }
}

/// How a request body is encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Empty,
    Json,
    Multipart,
}

/// Describes one request: path relative to the base URL, method, optional
/// body and extra headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub path: String,
    pub method: Method,
    pub body: Option<Body>,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            body: None,
            headers: HeaderMap::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub const fn content_kind(&self) -> ContentKind {
        match &self.body {
            None => ContentKind::Empty,
            Some(Body::Json(_)) => ContentKind::Json,
            Some(Body::Multipart(_)) => ContentKind::Multipart,
        }
    }
}

/// A parsed response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    /// Converts the payload into a JSON value; text becomes a JSON string.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(value) => value,
            Self::Text(text) => Value::String(text),
        }
    }

    /// Decodes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the payload does not have the
    /// expected shape.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.into_value())
            .map_err(|e| ApiError::Transport(format!("malformed response: {e}")))
    }
}

/// Performs requests against the backend.
pub trait Transport: Send + Sync {
    fn request(&self, request: Request) -> BoxFuture<'static, Result<Payload>>;
}

/// `reqwest`-backed [`Transport`].
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionAccessor>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport for `config`, reading credentials from `session`
    /// on every request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, session: Arc<dyn SessionAccessor>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            session,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the outgoing request without sending it.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] if the URL or the multipart form
    /// is invalid.
    pub fn build_request(&self, request: Request) -> Result<reqwest::Request> {
        let url = format!("{}{}", self.base_url, request.path);
        let url = reqwest::Url::parse(&url)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid url {url:?}: {e}")))?;

        let mut builder = self.client.request(request.method, url);

        if let Some(token) = self.session.token() {
            builder = builder.bearer_auth(token);
        }

        builder = match request.body {
            Some(Body::Json(value)) => builder.json(&value),
            Some(Body::Multipart(form)) => builder.multipart(form.into_multipart()?),
            None => builder,
        };

        if !request.headers.is_empty() {
            builder = builder.headers(request.headers);
        }

        builder
            .build()
            .map_err(|e| ApiError::InvalidRequest(e.to_string()))
    }
}

impl Transport for HttpTransport {
    fn request(&self, request: Request) -> BoxFuture<'static, Result<Payload>> {
        let client = self.client.clone();
        let method = request.method.clone();
        let path = request.path.clone();
        let kind = request.content_kind();
        let built = self.build_request(request);

        async move {
            let built = built?;
            debug!(%method, %path, ?kind, "sending request");

            let in_transit = |e: reqwest::Error| {
                warn!(%method, %path, error = %e, "request failed in transit");
                ApiError::from(e)
            };

            let response = client.execute(built).await.map_err(in_transit)?;

            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let body = response.bytes().await.map_err(in_transit)?;

            let result = read_payload(status, content_type.as_deref(), &body);
            match &result {
                Ok(_) => debug!(%method, %path, status = status.as_u16(), "request succeeded"),
                Err(e) => warn!(%method, %path, status = status.as_u16(), error = %e, "request failed"),
            }
            result
        }
        .boxed()
    }
}

/// Parses a response body according to its declared content type, failing
/// with the backend's message for non-2xx statuses.
pub(crate) fn read_payload(
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Payload> {
    let is_json = content_type.is_some_and(|ct| ct.contains("json"));

    if !status.is_success() {
        return Err(ApiError::Application {
            status: status.as_u16(),
            message: error_message(status, is_json, body),
        });
    }

    if !is_json {
        return Ok(Payload::Text(String::from_utf8_lossy(body).into_owned()));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::Json(Value::Null));
    }

    serde_json::from_slice(body)
        .map(Payload::Json)
        .map_err(|e| ApiError::Transport(format!("malformed response: {e}")))
}

fn error_message(status: StatusCode, is_json: bool, body: &[u8]) -> String {
    if is_json {
        if let Ok(value) = serde_json::from_slice::<Value>(body) {
            return message_from_json(value);
        }
    }

    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    }
}

fn message_from_json(value: Value) -> String {
    match value {
        Value::String(message) => message,
        Value::Object(ref map) => ["message", "error", "detail"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .map_or_else(|| value.to_string(), str::to_owned),
        other => other.to_string(),
    }
}
