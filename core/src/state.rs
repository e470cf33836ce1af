use crate::conversation::{ConversationController, EnhanceOutcome, SendOutcome};
use crate::deploy::{DeployRequest, DeploySession, DeployState, Publisher};
use crate::llm::Completion;
use crate::project::ProjectStore;
use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub type ProjectId = Uuid;

pub const DEFAULT_PROJECT_NAME: &str = "New Website";
const PROVISIONAL_NAME_CHARS: usize = 40;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// A single website-building conversation and its latest generated document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub generated_code: Option<String>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            chat_history: Vec::new(),
            generated_code: None,
            updated_at: Utc::now(),
        }
    }

    /// Appends a message. Returns `true` when it opened the conversation.
    pub fn push_message(&mut self, message: Message) -> bool {
        let first = self.chat_history.is_empty();
        self.chat_history.push(message);
        self.touch();
        first
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id,
            name: self.name.clone(),
            message_count: self.chat_history.len(),
            has_code: self.generated_code.is_some(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectSummary {
    pub id: ProjectId,
    pub name: String,
    pub message_count: usize,
    pub has_code: bool,
    pub updated_at: DateTime<Utc>,
}

/// Name shown for a project until a generated title arrives.
pub fn provisional_name(prompt: &str) -> String {
    let mut chars = prompt.chars();
    let head: String = chars.by_ref().take(PROVISIONAL_NAME_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Everything the front end talks to, bundled behind one cloneable handle.
#[derive(Clone)]
pub struct AppState {
    projects: ProjectStore,
    conversation: ConversationController,
    deploy: DeploySession,
}

impl AppState {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        completion: Arc<dyn Completion>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let projects = ProjectStore::load(kv.clone());
        let conversation = ConversationController::new(projects.clone(), completion);
        let deploy = DeploySession::new(projects.clone(), publisher, kv);
        Self {
            projects,
            conversation,
            deploy,
        }
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn conversation(&self) -> &ConversationController {
        &self.conversation
    }

    pub fn deploy_session(&self) -> &DeploySession {
        &self.deploy
    }

    pub fn summaries(&self) -> Vec<ProjectSummary> {
        self.projects.summaries()
    }

    pub fn active_project(&self) -> Option<Project> {
        self.projects.active_project()
    }

    pub fn preview(&self) -> Option<String> {
        self.active_project().and_then(|p| p.generated_code)
    }

    pub fn create_project(&self) -> ProjectId {
        let id = self.projects.create_project();
        self.conversation.clear_error();
        id
    }

    pub fn select_project(&self, id: ProjectId) {
        self.projects.select_project(id);
        self.conversation.clear_error();
    }

    pub fn delete_project(&self, id: ProjectId) {
        self.projects.delete_project(id);
    }

    pub async fn send_message(&self, prompt: &str) -> SendOutcome {
        self.conversation.send_message(prompt).await
    }

    pub async fn send_message_to(&self, project: ProjectId, prompt: &str) -> SendOutcome {
        self.conversation.send_message_to(project, prompt).await
    }

    pub async fn enhance(&self, text: &str) -> EnhanceOutcome {
        self.conversation.enhance(text).await
    }

    pub async fn deploy(&self, request: DeployRequest) -> DeployState {
        self.deploy.deploy(request).await
    }

    pub fn observed_deploy_state(&self) -> DeployState {
        self.deploy.observed()
    }
}
