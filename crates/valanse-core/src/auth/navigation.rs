//! Redirect commands and landing-URL parsing.
//!
//! Session transitions never navigate on their own; they return a
//! [`Redirect`] that the host carries out through a [`Navigator`].

use reqwest::Url;
use tracing::{info, warn};

/// Query parameter carrying the one-time external exchange code
pub const EXCHANGE_CODE_PARAM: &str = "stateToken";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectReason {
    /// Exchange succeeded; reload without the code in the URL
    ExchangeCompleted,
    LoggedOut,
    /// Logo click
    Home,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub url: String,
    pub reason: RedirectReason,
}

/// Performs full navigations requested by session transitions.
pub trait Navigator {
    fn navigate(&self, redirect: &Redirect);
}

/// Navigator for hosts without a browsing context: records the redirect in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, redirect: &Redirect) {
        info!(url = %redirect.url, reason = ?redirect.reason, "Navigating");
    }
}

/// Extract the external exchange code from a landing URL, if any.
pub fn exchange_code(landing_url: &str) -> Option<String> {
    let url = match Url::parse(landing_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "Landing URL is not a valid URL, ignoring");
            return None;
        }
    };
    url.query_pairs()
        .find(|(key, _)| key == EXCHANGE_CODE_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
}
