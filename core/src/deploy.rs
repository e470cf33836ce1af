use crate::auth::CredentialCache;
use crate::project::ProjectStore;
use crate::state::ProjectId;
use crate::store::KeyValueStore;
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DeployState {
    Idle,
    Loading { project_id: ProjectId },
    Success { url: String, project_id: ProjectId },
    Error { message: String, project_id: ProjectId },
}

impl DeployState {
    pub fn project_id(&self) -> Option<ProjectId> {
        match self {
            Self::Idle => None,
            Self::Loading { project_id }
            | Self::Success { project_id, .. }
            | Self::Error { project_id, .. } => Some(*project_id),
        }
    }

    /// What an observer looking at `active` should see: anything tagged with
    /// another project reads as idle.
    pub fn visible_to(&self, active: Option<ProjectId>) -> DeployState {
        match self.project_id() {
            Some(id) if Some(id) == active => self.clone(),
            _ => Self::Idle,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    /// Publishing token; blank means "use the saved one".
    pub credential: String,
    pub target_name: String,
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub credential: String,
    pub target_name: String,
    pub document: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `document` and returns its public URL.
    async fn publish(&self, request: &PublishRequest) -> Result<String>;
}

/// Tracks the one publish attempt of the session, tagged with its project.
#[derive(Clone)]
pub struct DeploySession {
    store: ProjectStore,
    publisher: Arc<dyn Publisher>,
    credentials: CredentialCache,
    state: Arc<RwLock<DeployState>>,
}

impl DeploySession {
    pub fn new(
        store: ProjectStore,
        publisher: Arc<dyn Publisher>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            store,
            publisher,
            credentials: CredentialCache::github(kv),
            state: Arc::new(RwLock::new(DeployState::Idle)),
        }
    }

    /// The raw state, whichever project it belongs to.
    pub fn state(&self) -> DeployState {
        self.state.read().clone()
    }

    /// The state as seen from the currently active project.
    pub fn observed(&self) -> DeployState {
        self.state().visible_to(self.store.active_project_id())
    }

    pub fn is_loading(&self) -> bool {
        self.state.read().is_loading()
    }

    pub fn reset(&self) {
        self.set(DeployState::Idle);
    }

    pub fn saved_credential(&self) -> Option<String> {
        self.credentials.saved()
    }

    pub fn forget_credential(&self) {
        self.credentials.forget();
    }

    /// Publishes the active project's document. Calling again after an
    /// error simply starts over.
    pub async fn deploy(&self, request: DeployRequest) -> DeployState {
        let Some(project_id) = self.store.active_project_id() else {
            return self.state();
        };
        let fail = |message: &str| DeployState::Error {
            message: message.to_string(),
            project_id,
        };

        let document = self
            .store
            .project(project_id)
            .and_then(|project| project.generated_code);
        let Some(document) = document else {
            return self.set(fail("No code to deploy."));
        };
        let Some(credential) = self.credentials.resolve(&request.credential) else {
            return self.set(fail("A publishing token is required."));
        };
        let target_name = request.target_name.trim().to_string();
        if target_name.is_empty() {
            return self.set(fail("A repository name is required."));
        }

        self.credentials.remember(&credential);
        self.set(DeployState::Loading { project_id });
        info!(project = %project_id, target = %target_name, "publishing site");

        let publish = PublishRequest {
            credential,
            target_name,
            document,
        };
        let next = match self.publisher.publish(&publish).await {
            Ok(url) => {
                info!(project = %project_id, %url, "site published");
                DeployState::Success { url, project_id }
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(project = %project_id, error = %message, "publish failed");
                DeployState::Error {
                    message,
                    project_id,
                }
            }
        };
        self.set(next)
    }

    fn set(&self, next: DeployState) -> DeployState {
        *self.state.write() = next.clone();
        next
    }
}

/// Repository name derived from a project name: lowercase, whitespace runs
/// become `-`, anything outside `[a-z0-9-]` is dropped.
pub fn suggest_target_name(project_name: &str) -> String {
    let mut out = String::with_capacity(project_name.len());
    let mut in_space = false;
    for ch in project_name.to_lowercase().chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            out.push(ch);
        }
    }
    out
}
