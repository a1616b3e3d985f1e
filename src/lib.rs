//! # Mycolog - data layer for a mushroom-foraging log
//!
//! Mycolog is the client-side data layer of a foraging log: users log
//! geotagged finds, browse their own and other foragers' finds, and look up
//! species safety facts. All persistence and domain logic live in a REST
//! backend; this crate keeps every screen consistent with it after writes.
//!
//! ## Architecture
//!
//! ```text
//! Session ──▶ Transport ──▶ Query / Mutation ──▶ TagRegistry
//!                                 ▲                    │
//!                                 └──── refetch ◀──────┘
//! ```
//!
//! 1. **Session**: holds the bearer token; injected into the transport
//! 2. **Transport**: sends requests, content-types bodies, parses responses
//! 3. **Tag registry**: maps a tag to the refresh callbacks of live queries
//! 4. **Query**: a live read registered under a tag
//! 5. **Mutation**: a write that invalidates tags on success
//!
//! ## Core Components
//!
//! - [`ApiClient`](client::ApiClient): transport plus shared tag registry
//! - [`Query`](query::Query): `{data, loading, error}` for one resource
//! - [`Mutation`](mutation::Mutation): `mutate(body, path) -> bool`
//! - [`TagRegistry`](tags::TagRegistry): tag-based invalidation
//! - [`Session`](session::Session): login, register, logout
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use mycolog::prelude::*;
//! use mycolog::resources::{self, NewFind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Arc::new(Session::new());
//! let client = ApiClient::connect(&ClientConfig::from_env()?, session.clone())?;
//!
//! session
//!     .login(client.transport(), &Credentials::new("mushroom_mary", "pw"))
//!     .await?;
//!
//! let my_finds = resources::my_finds(&client);
//! let create = resources::create_find(&client);
//!
//! let date = NaiveDate::from_ymd_opt(2024, 5, 1).ok_or("bad date")?;
//! if create.mutate_json(&NewFind::new("Chanterelle", date), None).await {
//!     // `my-finds` was invalidated; the query is already refetching.
//!     let state = my_finds.settled().await;
//!     println!("{} finds", state.data.map_or(0, |f| f.len()));
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod mock;
pub mod mutation;
pub mod prelude;
pub mod query;
pub mod resources;
pub mod session;
pub mod tags;
pub mod transport;

pub use error::{ApiError, Result};
