#![allow(dead_code)]

use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::StatusCode;
use tokio::sync::oneshot;

use valanse_core::api::{ApiClient, ApiError, Gateway};
use valanse_core::auth::{MemoryStore, Navigator, Redirect, SessionManager, SessionPolicy};

pub const APP_URL: &str = "https://valanse.vercel.app/";
pub const API_URL: &str = "https://valanse.site";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Exchange(String),
    Refresh(String),
    Revoke(String),
}

/// In-process gateway recording every call.
///
/// Each operation answers with its configured token, or with a 401/500
/// when none is configured. Calls can be held open until released.
#[derive(Default)]
pub struct FakeGateway {
    calls: Mutex<Vec<Call>>,
    exchange_reply: Mutex<Option<String>>,
    refresh_reply: Mutex<Option<String>>,
    revoke_ok: Mutex<bool>,
    exchange_hold: Mutex<Option<oneshot::Receiver<()>>>,
    refresh_hold: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            revoke_ok: Mutex::new(true),
            ..Default::default()
        }
    }

    pub fn exchange_returns(self, token: &str) -> Self {
        *self.exchange_reply.lock().unwrap() = Some(token.to_string());
        self
    }

    pub fn refresh_returns(self, token: &str) -> Self {
        *self.refresh_reply.lock().unwrap() = Some(token.to_string());
        self
    }

    pub fn revoke_fails(self) -> Self {
        *self.revoke_ok.lock().unwrap() = false;
        self
    }

    /// Hold the next exchange until the returned sender fires
    pub fn hold_exchange(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.exchange_hold.lock().unwrap() = Some(rx);
        tx
    }

    /// Hold the next refresh until the returned sender fires
    pub fn hold_refresh(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.refresh_hold.lock().unwrap() = Some(rx);
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Gateway for FakeGateway {
    async fn exchange(&self, code: &str) -> Result<String, ApiError> {
        self.record(Call::Exchange(code.to_string()));
        let hold = self.exchange_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        let reply = self.exchange_reply.lock().unwrap().clone();
        reply.ok_or(ApiError::Unauthorized)
    }

    async fn refresh(&self, refresh_credential: &str) -> Result<String, ApiError> {
        self.record(Call::Refresh(refresh_credential.to_string()));
        let hold = self.refresh_hold.lock().unwrap().take();
        if let Some(hold) = hold {
            let _ = hold.await;
        }
        let reply = self.refresh_reply.lock().unwrap().clone();
        reply.ok_or(ApiError::Unauthorized)
    }

    async fn revoke(&self, access_credential: &str) -> Result<(), ApiError> {
        self.record(Call::Revoke(access_credential.to_string()));
        if *self.revoke_ok.lock().unwrap() {
            Ok(())
        } else {
            Err(ApiError::from_status(
                StatusCode::INTERNAL_SERVER_ERROR,
                "revoke unavailable",
            ))
        }
    }
}

/// Navigator remembering every redirect it was asked to perform.
#[derive(Default)]
pub struct RecordingNavigator {
    pub visited: RefCell<Vec<Redirect>>,
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, redirect: &Redirect) {
        self.visited.borrow_mut().push(redirect.clone());
    }
}

pub fn policy(gated: bool) -> SessionPolicy {
    SessionPolicy {
        app_url: APP_URL.to_string(),
        keep_on_refresh_failure: true,
        wait_for_session_ready: gated,
        ready_timeout: Duration::from_secs(5),
    }
}

pub type Manager = SessionManager<FakeGateway, Arc<MemoryStore>>;

pub fn manager(gateway: FakeGateway, store: &Arc<MemoryStore>, policy: SessionPolicy) -> Manager {
    SessionManager::new(gateway, Arc::clone(store), policy)
}

pub fn client() -> ApiClient {
    ApiClient::new(API_URL, Duration::from_secs(5)).unwrap()
}

pub fn landing(code: Option<&str>) -> String {
    match code {
        Some(code) => format!("{}?stateToken={}", APP_URL, code),
        None => APP_URL.to_string(),
    }
}
