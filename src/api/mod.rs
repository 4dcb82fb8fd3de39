//! Upstream test-management REST API access.
//!
//! - [`ApiClient`] — JSON over HTTP, authenticated with one token
//! - [`ClientFactory`] — picks the request-scoped or shared client
//! - [`ApiError`] — everything that can go wrong on the way

pub mod client;
pub mod error;
pub mod factory;

pub use client::{ApiClient, ApiEndpoint, DEFAULT_API_HOST};
pub use error::{ApiError, ApiResult};
pub use factory::ClientFactory;
