use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use tracing::{debug, warn};

use crate::api::{ApiError, RequestInterceptor};

use super::store::{CredentialStore, Slot};

/// Attaches the current access credential to outbound requests.
///
/// The store is read on every request and never cached, so a refresh or
/// logout is visible to the very next request.
pub struct Augmenter<S> {
    store: S,
}

impl<S: CredentialStore> Augmenter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: CredentialStore> RequestInterceptor for Augmenter<S> {
    fn intercept(&self, request: &mut Request) -> Result<(), ApiError> {
        match self.store.get(Slot::Access) {
            Ok(Some(token)) => {
                let mut value = HeaderValue::from_str(&token)?;
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            Ok(None) => {
                debug!(url = %request.url(), "No access credential, sending unauthenticated");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    url = %request.url(),
                    "Credential store unreadable, sending unauthenticated"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reqwest::{Client, Method};

    use crate::auth::MemoryStore;

    fn request() -> Request {
        Client::new()
            .request(Method::GET, "https://valanse.site/quiz/1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_header_equals_stored_credential_exactly() {
        let store = Arc::new(MemoryStore::with(Some("eyJhbGciOi.A1"), Some("R1")));
        let augmenter = Augmenter::new(Arc::clone(&store));

        let mut req = request();
        augmenter.intercept(&mut req).unwrap();
        assert_eq!(req.headers().get(AUTHORIZATION).unwrap(), "eyJhbGciOi.A1");
    }

    #[test]
    fn test_no_credential_leaves_request_unmodified() {
        let augmenter = Augmenter::new(MemoryStore::with(None, Some("R1")));
        let mut req = request();
        augmenter.intercept(&mut req).unwrap();
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_reads_store_at_call_time() {
        let store = Arc::new(MemoryStore::with(Some("A1"), None));
        let augmenter = Augmenter::new(Arc::clone(&store));

        store.set(Slot::Access, "A2").unwrap();
        let mut req = request();
        augmenter.intercept(&mut req).unwrap();
        assert_eq!(req.headers().get(AUTHORIZATION).unwrap(), "A2");

        store.clear().unwrap();
        let mut req = request();
        augmenter.intercept(&mut req).unwrap();
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_unencodable_credential_is_an_error() {
        let augmenter = Augmenter::new(MemoryStore::with(Some("bad\nvalue"), None));
        let mut req = request();
        assert!(matches!(
            augmenter.intercept(&mut req),
            Err(ApiError::InvalidHeader(_))
        ));
    }
}
