//! HTTP plumbing for the valanse backend.
//!
//! This module provides:
//! - `Gateway` / `HttpGateway`: the exchange, refresh and revoke token calls
//! - `ApiClient`: the shared client every resource request goes through,
//!   with scoped request interceptors
//!
//! Credentials are opaque strings sent verbatim in the `Authorization`
//! header (no scheme prefix).

pub mod client;
pub mod error;
pub mod gateway;

pub use client::{ApiClient, Registration, RequestInterceptor};
pub use error::ApiError;
pub use gateway::{Gateway, HttpGateway};
