//! Prelude module for convenient imports.
//!
//! ```
//! use mycolog::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`ApiClient`] - Transport plus tag registry
//! - [`Query`] / [`QueryState`] - Live reads
//! - [`Mutation`] / [`MutationState`] - Writes that invalidate tags
//! - [`Session`] / [`Credentials`] - Login state
//! - [`ClientConfig`] - Backend location and timeouts
//! - [`ApiError`] - Error type for every request

pub use crate::client::ApiClient;
pub use crate::config::ClientConfig;
pub use crate::error::ApiError;
pub use crate::mutation::{Mutation, MutationState};
pub use crate::query::{Query, QueryState};
pub use crate::session::{Credentials, Session};
pub use crate::tags::{TagRegistry, Tags};
pub use crate::transport::{Body, Form, Payload, Request};
