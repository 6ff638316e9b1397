//! Session and token lifecycle for the valanse client.
//!
//! A visiting client is either anonymous or authenticated depending on
//! whether an access credential is stored. The [`auth::SessionManager`]
//! acquires credentials (external-code exchange, silent refresh), tears them
//! down on logout, and installs an interceptor on the shared
//! [`api::ApiClient`] so every request carries the current credential.

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;

pub use api::{ApiClient, ApiError, Gateway, HttpGateway};
pub use auth::{CredentialStore, SessionManager, SessionPolicy, Status};
pub use config::Config;
