//! Session store holding the current auth token.
//!
//! The transport never looks the session up ambiently; it is handed a
//! [`SessionAccessor`] at construction and asks it for a token on every
//! request.

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ApiError, Result};
use crate::transport::{Body, Payload, Request, Transport};

pub const LOGIN_PATH: &str = "/users/login";
pub const REGISTER_PATH: &str = "/users/register";

/// Read access to the current credentials.
pub trait SessionAccessor: Send + Sync {
    /// Returns the bearer token, if a user is logged in.
    fn token(&self) -> Option<String>;
}

/// Username and password sent to the login and register endpoints.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(ApiError::InvalidRequest(
                "Username and password are required.".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

/// In-memory session store.
///
/// The token lives for the lifetime of the process or until [`logout`].
/// Changes are published on a watch channel so views can react to login
/// state.
///
/// [`logout`]: Session::logout
pub struct Session {
    token: watch::Sender<Option<SecretString>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        let (token, _) = watch::channel(None);
        Self { token }
    }

    /// Creates a session that is already logged in.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.set_token(token);
        session
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.token
            .send_replace(Some(SecretString::from(token.into())));
    }

    /// Forgets the current token.
    pub fn logout(&self) {
        if self.token.send_replace(None).is_some() {
            info!("session cleared");
        }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.borrow().is_some()
    }

    /// Watches the token; `None` means logged out.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<SecretString>> {
        self.token.subscribe()
    }

    /// Logs in and stores the returned token.
    ///
    /// # Errors
    ///
    /// Fails without sending a request if either credential is blank, and
    /// otherwise with whatever the backend answers.
    pub async fn login(&self, transport: &dyn Transport, credentials: &Credentials) -> Result<()> {
        self.authenticate(transport, LOGIN_PATH, credentials).await
    }

    /// Registers a new account and stores the returned token.
    ///
    /// # Errors
    ///
    /// Same as [`login`](Session::login).
    pub async fn register(
        &self,
        transport: &dyn Transport,
        credentials: &Credentials,
    ) -> Result<()> {
        self.authenticate(transport, REGISTER_PATH, credentials)
            .await
    }

    async fn authenticate(
        &self,
        transport: &dyn Transport,
        path: &str,
        credentials: &Credentials,
    ) -> Result<()> {
        credentials.validate()?;

        let request = Request::new(Method::POST, path).with_body(Body::json(credentials)?);
        let payload = transport.request(request).await?;
        let token = token_from_payload(payload)?;

        debug!(username = %credentials.username, path, "session established");
        self.set_token(token);
        Ok(())
    }
}

impl SessionAccessor for Session {
    fn token(&self) -> Option<String> {
        self.token
            .borrow()
            .as_ref()
            .map(|secret| secret.expose_secret().to_owned())
    }
}

fn token_from_payload(payload: Payload) -> Result<String> {
    let token = match payload {
        Payload::Text(text) => text.trim().to_string(),
        Payload::Json(Value::String(text)) => text,
        Payload::Json(value) => {
            serde_json::from_value::<TokenResponse>(value)
                .map_err(|e| ApiError::Transport(format!("malformed response: {e}")))?
                .token
        }
    };

    if token.is_empty() {
        return Err(ApiError::Transport(
            "malformed response: empty token".to_string(),
        ));
    }
    Ok(token)
}
