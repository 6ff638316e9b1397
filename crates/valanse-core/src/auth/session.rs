//! Session manager: exchange, silent refresh and logout.
//!
//! The credential store is the single source of truth. Status is re-derived
//! from it on every query and after every flow; nothing here caches whether
//! the visitor is authenticated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::{ApiClient, ApiError, Gateway, Registration};
use crate::clock::Ticker;
use crate::config::Config;

use super::augmenter::Augmenter;
use super::coordinator::{Coordinator, Ticket};
use super::navigation::{exchange_code, Redirect, RedirectReason};
use super::ready::SessionReady;
use super::store::{CredentialStore, Slot, StoreError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Exchange of external code failed: {0}")]
    ExchangeFailed(#[source] ApiError),

    #[error("Silent refresh failed: {0}")]
    RefreshFailed(#[source] ApiError),

    #[error("Server-side revoke failed: {0}")]
    RevokeFailed(#[source] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Authentication status as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Anonymous,
    Authenticated,
}

/// Observable phase of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Exchanging,
    RefreshingSilently,
    Authenticated,
    LoggingOut,
}

/// How a credential-acquiring flow ended when the gateway call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The new access credential was written to the store
    Committed,
    /// A logout started while the call was in flight; the result was dropped
    Superseded,
}

/// Session policies, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub app_url: String,
    pub keep_on_refresh_failure: bool,
    pub wait_for_session_ready: bool,
    pub ready_timeout: Duration,
}

impl From<&Config> for SessionPolicy {
    fn from(config: &Config) -> Self {
        Self {
            app_url: config.app_url.clone(),
            keep_on_refresh_failure: config.keep_on_refresh_failure,
            wait_for_session_ready: config.wait_for_session_ready,
            ready_timeout: config.ready_timeout(),
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Result of an activation. `None` means the flow had nothing to do.
#[derive(Debug)]
pub struct ActivationReport {
    pub exchange: Option<Result<FlowOutcome, SessionError>>,
    pub refresh: Option<Result<FlowOutcome, SessionError>>,
    /// Set when an exchange committed; the host should navigate to it
    pub redirect: Option<Redirect>,
    pub status: Status,
}

impl ActivationReport {
    pub fn errors(&self) -> impl Iterator<Item = &SessionError> {
        [self.exchange.as_ref(), self.refresh.as_ref()]
            .into_iter()
            .flatten()
            .filter_map(|result| result.as_ref().err())
    }
}

#[derive(Debug)]
pub struct LogoutReport {
    /// `None` when there was no access credential to revoke
    pub revoke: Option<Result<(), SessionError>>,
    pub redirect: Redirect,
}

/// Lifetime of a mounted session view. Dropping it deregisters the
/// augmenter and stops the ticker; in-flight flows keep running.
pub struct Mount {
    _augmenter: Registration,
    ticker: Option<Ticker>,
}

impl Mount {
    pub fn attach_ticker(&mut self, ticker: Ticker) {
        self.ticker = Some(ticker);
    }

    pub fn ticker(&self) -> Option<&Ticker> {
        self.ticker.as_ref()
    }
}

/// Decrements an in-flight counter when the flow ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SessionManager<G, S> {
    gateway: G,
    store: S,
    policy: SessionPolicy,
    coordinator: Coordinator,
    ready: SessionReady,
    status_tx: watch::Sender<Status>,
    exchanging: AtomicUsize,
    refreshing: AtomicUsize,
    logging_out: AtomicUsize,
}

impl<G, S> SessionManager<G, S>
where
    G: Gateway,
    S: CredentialStore + Clone + 'static,
{
    pub fn new(gateway: G, store: S, policy: SessionPolicy) -> Self {
        let initial = derive_status(&store);
        let (status_tx, _rx) = watch::channel(initial);
        debug!(status = ?initial, "Session manager created");
        Self {
            gateway,
            store,
            policy,
            coordinator: Coordinator::new(),
            ready: SessionReady::new(),
            status_tx,
            exchanging: AtomicUsize::new(0),
            refreshing: AtomicUsize::new(0),
            logging_out: AtomicUsize::new(0),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Current status, read from the store at call time
    pub fn status(&self) -> Status {
        derive_status(&self.store)
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == Status::Authenticated
    }

    pub fn phase(&self) -> SessionPhase {
        if self.logging_out.load(Ordering::SeqCst) > 0 {
            SessionPhase::LoggingOut
        } else if self.exchanging.load(Ordering::SeqCst) > 0 {
            SessionPhase::Exchanging
        } else if self.refreshing.load(Ordering::SeqCst) > 0 {
            SessionPhase::RefreshingSilently
        } else {
            match self.status() {
                Status::Anonymous => SessionPhase::Anonymous,
                Status::Authenticated => SessionPhase::Authenticated,
            }
        }
    }

    /// Status change notifications for the view
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Re-derive status and notify the view. A no-op once the view is gone.
    fn publish(&self) {
        let status = self.status();
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            info!(from = ?previous, to = ?status, "Session status changed");
        }
    }

    fn redirect(&self, reason: RedirectReason) -> Redirect {
        Redirect {
            url: self.policy.app_url.clone(),
            reason,
        }
    }

    /// Install the augmenter on `client` for the lifetime of the returned scope.
    pub fn mount(&self, client: &ApiClient) -> Mount {
        let gate = self
            .policy
            .wait_for_session_ready
            .then(|| self.ready.gate(self.policy.ready_timeout));
        let augmenter = Arc::new(Augmenter::new(self.store.clone()));
        let registration = client.register(augmenter, gate);
        self.publish();
        debug!(gated = self.policy.wait_for_session_ready, "Session mounted");

        Mount {
            _augmenter: registration,
            ticker: None,
        }
    }

    /// Run the activation flows for a page load.
    ///
    /// The exchange (when the landing URL carries a code) and the silent
    /// refresh (when a refresh credential is stored) run concurrently. Gated
    /// requests are released once both have settled.
    pub async fn activate(&self, landing_url: &str) -> ActivationReport {
        self.ready.reset();
        self.publish();

        let code = exchange_code(landing_url);
        let stored_refresh = self.store.get(Slot::Refresh);
        let stored_access = self.store.get(Slot::Access).ok();
        debug!(
            has_code = code.is_some(),
            has_refresh = matches!(stored_refresh, Ok(Some(_))),
            "Activating session"
        );

        let exchange_flow = async {
            match code {
                Some(ref code) => Some(self.exchange(code).await),
                None => None,
            }
        };

        let refresh_flow = async {
            match stored_refresh {
                Ok(Some(ref credential)) => {
                    Some(self.refresh_with(credential, stored_access).await)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "Could not read refresh credential");
                    Some(Err(SessionError::Store(e)))
                }
            }
        };

        let (exchange, refresh) = futures::future::join(exchange_flow, refresh_flow).await;

        let redirect = matches!(exchange, Some(Ok(FlowOutcome::Committed)))
            .then(|| self.redirect(RedirectReason::ExchangeCompleted));

        self.ready.mark_ready();
        self.publish();

        ActivationReport {
            exchange,
            refresh,
            redirect,
            status: self.status(),
        }
    }

    /// Redeem a one-time external code for an access credential.
    ///
    /// Only the access slot is written; the refresh slot is left alone.
    pub async fn exchange(&self, code: &str) -> Result<FlowOutcome, SessionError> {
        let flight = InFlight::enter(&self.exchanging);
        let ticket = self.coordinator.ticket();
        info!("Exchanging external code for access credential");

        let token = match self.gateway.exchange(code).await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Error getting access credential");
                return Err(SessionError::ExchangeFailed(e));
            }
        };

        let committed = self
            .coordinator
            .commit(ticket, || self.store.set(Slot::Access, &token))?;
        drop(flight);
        self.publish();

        match committed {
            Some(()) => {
                info!("Access credential stored from exchange");
                Ok(FlowOutcome::Committed)
            }
            None => {
                warn!("Exchange result discarded, logout in progress");
                Ok(FlowOutcome::Superseded)
            }
        }
    }

    /// Silent refresh using the stored refresh credential.
    /// Returns `Ok(None)` when no refresh credential is stored.
    pub async fn refresh(&self) -> Result<Option<FlowOutcome>, SessionError> {
        match self.store.get(Slot::Refresh)? {
            Some(credential) => {
                let seen = self.store.get(Slot::Access).ok();
                self.refresh_with(&credential, seen).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// `seen` is the access slot as read before the refresh began; a failed
    /// refresh clears the slot only if it still holds that value.
    async fn refresh_with(
        &self,
        refresh_credential: &str,
        seen: Option<Option<String>>,
    ) -> Result<FlowOutcome, SessionError> {
        let flight = InFlight::enter(&self.refreshing);
        let ticket = self.coordinator.ticket();
        debug!("Refreshing access credential");

        let result = self.gateway.refresh(refresh_credential).await;
        let outcome = match result {
            Ok(token) => {
                let committed = self
                    .coordinator
                    .commit(ticket, || self.store.set(Slot::Access, &token))?;
                match committed {
                    Some(()) => {
                        info!("Access credential refreshed");
                        Ok(FlowOutcome::Committed)
                    }
                    None => {
                        warn!("Refresh result discarded, logout in progress");
                        Ok(FlowOutcome::Superseded)
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Error refreshing access credential");
                if !self.policy.keep_on_refresh_failure {
                    self.clear_stale_access(ticket, seen);
                }
                Err(SessionError::RefreshFailed(e))
            }
        };

        drop(flight);
        self.publish();
        outcome
    }

    /// Clear the access slot after a failed refresh, unless it changed since
    /// `seen` was read (a concurrent exchange committed a new credential).
    fn clear_stale_access(&self, ticket: Ticket, seen: Option<Option<String>>) {
        let Some(seen) = seen else {
            debug!("Access slot unreadable at refresh start, leaving it untouched");
            return;
        };
        let cleared = self.coordinator.commit(ticket, || {
            if self.store.get(Slot::Access)? != seen {
                return Ok(false);
            }
            self.store.remove(Slot::Access).map(|()| true)
        });
        match cleared {
            Ok(Some(true)) => info!("Access credential cleared after failed refresh"),
            Ok(Some(false)) => debug!("Access credential replaced during refresh, keeping it"),
            Ok(None) => {}
            Err(store_err) => warn!(error = %store_err, "Failed to clear access credential"),
        }
    }

    /// Tear down the session.
    ///
    /// Revokes server-side when an access credential exists, then clears both
    /// slots whatever the revoke outcome. Any exchange or refresh still in
    /// flight is discarded when it returns.
    pub async fn logout(&self) -> Result<LogoutReport, SessionError> {
        let _flight = InFlight::enter(&self.logging_out);
        self.coordinator.invalidate();

        let access = match self.store.get(Slot::Access) {
            Ok(access) => access,
            Err(e) => {
                warn!(error = %e, "Could not read access credential, skipping revoke");
                None
            }
        };

        let revoke = match access {
            Some(ref credential) => {
                info!("Revoking access credential");
                Some(self.gateway.revoke(credential).await.map_err(|e| {
                    error!(error = %e, "Error during logout");
                    SessionError::RevokeFailed(e)
                }))
            }
            None => {
                debug!("No access credential, skipping revoke");
                None
            }
        };

        self.coordinator.supersede(|| self.store.clear())?;
        self.publish();
        info!("Logged out");

        Ok(LogoutReport {
            revoke,
            redirect: self.redirect(RedirectReason::LoggedOut),
        })
    }

    /// Navigation back to the canonical application URL without touching state
    pub fn home(&self) -> Redirect {
        self.redirect(RedirectReason::Home)
    }
}

fn derive_status<S: CredentialStore>(store: &S) -> Status {
    match store.get(Slot::Access) {
        Ok(Some(_)) => Status::Authenticated,
        Ok(None) => Status::Anonymous,
        Err(e) => {
            warn!(error = %e, "Could not read access credential, treating as anonymous");
            Status::Anonymous
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;

    /// Gateway that rejects everything
    struct Offline;

    impl Gateway for Offline {
        async fn exchange(&self, _code: &str) -> Result<String, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn refresh(&self, _refresh_credential: &str) -> Result<String, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn revoke(&self, _access_credential: &str) -> Result<(), ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }
    }

    /// Gateway whose revoke waits for a permit per call
    struct ParkedRevoke {
        permits: tokio::sync::Semaphore,
    }

    impl Gateway for ParkedRevoke {
        async fn exchange(&self, _code: &str) -> Result<String, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn refresh(&self, _refresh_credential: &str) -> Result<String, ApiError> {
            Err(ApiError::ServerError("offline".into()))
        }

        async fn revoke(&self, _access_credential: &str) -> Result<(), ApiError> {
            let permit = self.permits.acquire().await;
            permit
                .map(|p| p.forget())
                .map_err(|_| ApiError::ServerError("closed".into()))
        }
    }

    fn manager(store: MemoryStore) -> SessionManager<Offline, Arc<MemoryStore>> {
        SessionManager::new(Offline, Arc::new(store), SessionPolicy::default())
    }

    #[test]
    fn test_status_derived_from_access_slot() {
        assert_eq!(manager(MemoryStore::new()).status(), Status::Anonymous);
        assert_eq!(
            manager(MemoryStore::with(None, Some("R1"))).status(),
            Status::Anonymous
        );
        assert_eq!(
            manager(MemoryStore::with(Some("A1"), None)).status(),
            Status::Authenticated
        );
    }

    #[test]
    fn test_status_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        let session = SessionManager::new(Offline, Arc::clone(&store), SessionPolicy::default());
        assert!(!session.is_authenticated());

        store.set(Slot::Access, "A1").unwrap();
        assert!(session.is_authenticated());
        assert_eq!(session.phase(), SessionPhase::Authenticated);
    }

    #[test]
    fn test_home_redirect_targets_app_url() {
        let session = manager(MemoryStore::with(Some("A1"), Some("R1")));
        let redirect = session.home();
        assert_eq!(redirect.url, crate::config::DEFAULT_APP_URL);
        assert_eq!(redirect.reason, RedirectReason::Home);
        // Navigation does not touch the session
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = Config::default();
        config.keep_on_refresh_failure = false;
        config.ready_timeout_secs = 3;
        let policy = SessionPolicy::from(&config);
        assert!(!policy.keep_on_refresh_failure);
        assert_eq!(policy.ready_timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_activation_report_collects_errors() {
        let session = manager(MemoryStore::with(Some("A1"), Some("R1")));
        let report = session
            .activate("https://valanse.vercel.app/?stateToken=C1")
            .await;

        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], SessionError::ExchangeFailed(_)));
        assert!(matches!(errors[1], SessionError::RefreshFailed(_)));
        assert_eq!(report.status, Status::Authenticated);
    }

    #[tokio::test]
    async fn test_mount_marks_requests_gated_until_activation() {
        let session = manager(MemoryStore::new());
        let client = ApiClient::new("https://valanse.site", Duration::from_secs(5)).unwrap();
        let _mount = session.mount(&client);
        assert!(!session.is_ready());

        session.activate("https://valanse.vercel.app/").await;
        assert!(session.is_ready());
    }

    #[tokio::test]
    async fn test_phase_stays_logging_out_until_last_logout_finishes() {
        let store = Arc::new(MemoryStore::with(Some("A1"), Some("R1")));
        let gateway = ParkedRevoke {
            permits: tokio::sync::Semaphore::new(0),
        };
        let session = SessionManager::new(gateway, store, SessionPolicy::default());

        let mut first = std::pin::pin!(session.logout());
        let mut second = std::pin::pin!(session.logout());
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());
        assert_eq!(session.phase(), SessionPhase::LoggingOut);

        session.gateway().permits.add_permits(1);
        first.await.unwrap();
        assert_eq!(session.phase(), SessionPhase::LoggingOut);

        session.gateway().permits.add_permits(1);
        second.await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Anonymous);
    }
}
