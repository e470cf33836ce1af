use crate::store::{KeyValueStore, GITHUB_TOKEN_KEY};
use std::sync::Arc;
use tracing::warn;

/// Remembers the publishing credential between sessions.
#[derive(Clone)]
pub struct CredentialCache {
    kv: Arc<dyn KeyValueStore>,
    key: &'static str,
}

impl CredentialCache {
    pub fn github(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            key: GITHUB_TOKEN_KEY,
        }
    }

    pub fn saved(&self) -> Option<String> {
        match self.kv.get(self.key) {
            Ok(value) => value.filter(|token| !token.trim().is_empty()),
            Err(err) => {
                warn!(%err, "failed to read saved credential");
                None
            }
        }
    }

    pub fn remember(&self, credential: &str) {
        if let Err(err) = self.kv.set(self.key, credential) {
            warn!(%err, "failed to save credential");
        }
    }

    pub fn forget(&self) {
        if let Err(err) = self.kv.remove(self.key) {
            warn!(%err, "failed to remove saved credential");
        }
    }

    /// The credential typed by the user, or the saved one when left blank.
    pub fn resolve(&self, provided: &str) -> Option<String> {
        let provided = provided.trim();
        if provided.is_empty() {
            self.saved()
        } else {
            Some(provided.to_string())
        }
    }
}
