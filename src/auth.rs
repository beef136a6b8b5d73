//! Credential provider seam
//!
//! Sign-in itself lives outside the sync core. The core only needs a bearer
//! token and a way to ask for a fresh one when the backend rejects it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use tracing::info;

/// Source of the bearer token attached to every request
pub trait CredentialsProvider: Send + Sync {
    /// Current access token, if signed in
    fn access_token(&self) -> Option<String>;

    /// Called when the backend rejected the token. Must not block.
    fn request_refresh(&self) {}
}

/// Fixed token, replaceable at runtime
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
    refresh_requests: AtomicUsize,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
            refresh_requests: AtomicUsize::new(0),
        }
    }

    /// Signed-out provider
    pub fn none() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<String>) {
        let mut guard = self.token.write().unwrap_or_else(|e| e.into_inner());
        *guard = token;
    }

    /// How many refreshes were requested so far
    pub fn refresh_requests(&self) -> usize {
        self.refresh_requests.load(Ordering::Relaxed)
    }
}

impl CredentialsProvider for StaticCredentials {
    fn access_token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn request_refresh(&self) {
        let n = self.refresh_requests.fetch_add(1, Ordering::Relaxed) + 1;
        info!(requests = n, "Credential refresh requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_replace_and_refresh_count() {
        let creds = StaticCredentials::none();
        assert!(creds.access_token().is_none());

        creds.set_token(Some("abc".into()));
        assert_eq!(creds.access_token().as_deref(), Some("abc"));

        creds.request_refresh();
        creds.request_refresh();
        assert_eq!(creds.refresh_requests(), 2);
    }
}
