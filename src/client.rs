use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::mutation::Mutation;
use crate::query::Query;
use crate::session::SessionAccessor;
use crate::tags::{TagRegistry, Tags};
use crate::transport::{HttpTransport, Payload, Request, Transport};

/// Entry point handed to screens: a transport plus the shared tag registry.
///
/// Cloning is cheap; all clones share the same registry, so a mutation
/// created from one clone refreshes queries created from another.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use mycolog::client::ApiClient;
/// use mycolog::config::ClientConfig;
/// use mycolog::session::Session;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Arc::new(Session::new());
/// let config = ClientConfig::from_env()?;
/// let client = ApiClient::connect(&config, session.clone())?;
/// # let _ = client;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    registry: TagRegistry,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client over `transport` with a fresh registry.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_registry(transport, TagRegistry::new())
    }

    #[must_use]
    pub const fn with_registry(transport: Arc<dyn Transport>, registry: TagRegistry) -> Self {
        Self {
            transport,
            registry,
        }
    }

    /// Creates a client that talks HTTP to `config.base_url`, authenticating
    /// with whatever token `session` holds at request time.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(config: &ClientConfig, session: Arc<dyn SessionAccessor>) -> Result<Self> {
        let transport = HttpTransport::new(config, session)?;
        Ok(Self::new(Arc::new(transport)))
    }

    #[must_use]
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    #[must_use]
    pub const fn registry(&self) -> &TagRegistry {
        &self.registry
    }

    /// Sends a raw request.
    ///
    /// # Errors
    ///
    /// Returns the transport's error unchanged.
    pub async fn request(&self, request: Request) -> Result<Payload> {
        self.transport.request(request).await
    }

    /// One-shot typed read that is not registered under any tag.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or a transport error if the payload
    /// does not decode into `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Request::get(path)).await?.decode()
    }

    /// Creates a [`Query`] for `resource` under `tag`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn query<T>(&self, resource: impl Into<String>, tag: impl Into<String>) -> Query<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Query::new(self, resource, tag)
    }

    /// Creates a [`Mutation`] that invalidates `tags` on success.
    pub fn mutation<T>(
        &self,
        method: Method,
        default_path: Option<&str>,
        tags: impl Into<Tags>,
    ) -> Mutation<T>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        Mutation::new(self, method, default_path, tags)
    }

    /// Refreshes every live query under `tags`; returns how many were
    /// triggered.
    pub fn invalidate_tags(&self, tags: impl Into<Tags>) -> usize {
        self.registry.invalidate_tags(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::session::Session;
    use serde_json::json;

    #[test]
    fn test_connect_builds_http_client() {
        let config = ClientConfig::new("http://api.test").expect("valid url");
        let client = ApiClient::connect(&config, Arc::new(Session::new()));
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_get_decodes() {
        let mock = MockTransport::new();
        mock.respond(
            Method::GET,
            "/mushrooms/facts?q=morel",
            Ok(Payload::Json(json!({"edible": true}))),
        );
        let client = ApiClient::new(Arc::new(mock.clone()));

        let facts: serde_json::Value = client
            .get("/mushrooms/facts?q=morel")
            .await
            .expect("facts should load");
        assert_eq!(facts["edible"], json!(true));
        assert!(client.registry().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_registry() {
        let mock = MockTransport::new();
        mock.respond(Method::GET, "/finds", Ok(Payload::Json(json!([]))));
        let client = ApiClient::new(Arc::new(mock));
        let other = client.clone();

        let _query = client.query::<Vec<u32>>("/finds", "all-finds");
        assert_eq!(other.registry().subscriber_count("all-finds"), 1);
    }
}
