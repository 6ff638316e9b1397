//! Session and credential lifecycle.
//!
//! This module provides:
//! - `SessionManager`: external-code exchange, silent refresh and logout
//! - `CredentialStore`: the two-slot credential storage and its backends
//! - `Augmenter`: attaches the access credential to outbound requests
//! - `Coordinator` / `SessionReady`: ordering between concurrent flows
//!
//! The store is the only source of truth for credentials and the session
//! manager its only writer.

pub mod augmenter;
pub mod coordinator;
pub mod navigation;
pub mod ready;
pub mod session;
pub mod store;

pub use augmenter::Augmenter;
pub use coordinator::{Coordinator, Ticket};
pub use navigation::{exchange_code, LogNavigator, Navigator, Redirect, RedirectReason};
pub use ready::{ReadyGate, SessionReady};
pub use session::{
    ActivationReport, FlowOutcome, LogoutReport, Mount, SessionError, SessionManager,
    SessionPhase, SessionPolicy, Status,
};
pub use store::{
    open_store, CredentialStore, FileStore, KeyringStore, MemoryStore, Slot, StoreError,
};
