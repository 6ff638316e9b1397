//! Shared HTTP client for application resource requests.
//!
//! Every request the application issues goes through [`ApiClient`], which
//! runs the registered [`RequestInterceptor`]s immediately before
//! transmission. Interceptors are scoped: [`ApiClient::register`] returns a
//! [`Registration`] that removes the interceptor when dropped.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use reqwest::{Client, Method, Request, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::ReadyGate;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Hook run on every outbound request just before it is sent.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: &mut Request) -> Result<(), ApiError>;
}

struct Hook {
    id: u64,
    interceptor: Arc<dyn RequestInterceptor>,
    gate: Option<ReadyGate>,
}

#[derive(Default)]
struct Hooks {
    next_id: u64,
    installed: Vec<Hook>,
}

fn lock(hooks: &Mutex<Hooks>) -> MutexGuard<'_, Hooks> {
    hooks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle for an installed interceptor. Dropping it deregisters the hook.
#[must_use = "dropping the registration removes the interceptor immediately"]
pub struct Registration {
    id: u64,
    hooks: Weak<Mutex<Hooks>>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(hooks) = self.hooks.upgrade() {
            let mut hooks = lock(&hooks);
            hooks.installed.retain(|hook| hook.id != self.id);
            debug!(id = self.id, remaining = hooks.installed.len(), "Interceptor removed");
        }
    }
}

/// API client for the valanse backend.
/// Clone is cheap - clones share the connection pool and the interceptor set.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    hooks: Arc<Mutex<Hooks>>,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            hooks: Arc::new(Mutex::new(Hooks::default())),
        })
    }

    /// The underlying connection pool, for sharing with the token gateway
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Install an interceptor for all requests issued through this client
    /// and its clones. With a gate, requests wait for it before interception.
    pub fn register(
        &self,
        interceptor: Arc<dyn RequestInterceptor>,
        gate: Option<ReadyGate>,
    ) -> Registration {
        let mut hooks = lock(&self.hooks);
        hooks.next_id += 1;
        let id = hooks.next_id;
        hooks.installed.push(Hook {
            id,
            interceptor,
            gate,
        });
        debug!(id, installed = hooks.installed.len(), "Interceptor registered");

        Registration {
            id,
            hooks: Arc::downgrade(&self.hooks),
        }
    }

    pub fn interceptor_count(&self) -> usize {
        lock(&self.hooks).installed.len()
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build an unsent request against the backend
    pub fn request(&self, method: Method, path: &str) -> Result<Request, ApiError> {
        Ok(self.client.request(method, self.url(path)).build()?)
    }

    /// Run readiness gates and interceptors against a request without sending it.
    pub async fn prepare(&self, mut request: Request) -> Result<Request, ApiError> {
        // Snapshot so the lock is never held across an await
        let snapshot: Vec<(Arc<dyn RequestInterceptor>, Option<ReadyGate>)> = lock(&self.hooks)
            .installed
            .iter()
            .map(|hook| (Arc::clone(&hook.interceptor), hook.gate.clone()))
            .collect();

        for (_, gate) in &snapshot {
            if let Some(gate) = gate {
                gate.wait().await;
            }
        }

        for (interceptor, _) in &snapshot {
            interceptor.intercept(&mut request)?;
        }

        Ok(request)
    }

    /// Prepare and send a request. Non-success statuses become errors;
    /// authorization failures are returned to the caller untouched.
    pub async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        let request = self.prepare(request).await?;
        debug!(method = %request.method(), url = %request.url(), "Sending request");
        let response = self.client.execute(request).await?;
        Self::check_response(response).await
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// GET a JSON resource, backing off on rate limiting.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            // Rebuilt per attempt so each send picks up the current credential
            let request = self.request(Method::GET, path)?;
            match self.execute(request).await {
                Ok(response) => return Ok(response.json().await?),
                Err(ApiError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path, retry = retries, backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
