pub mod auth;
pub mod config;
pub mod conversation;
pub mod deploy;
pub mod llm;
#[cfg(test)]
mod http_stub;
pub mod project;
pub mod publish;
pub mod state;
pub mod store;
pub mod telemetry;

pub use auth::CredentialCache;
pub use conversation::{ConversationController, EnhanceOutcome, SendOutcome};
pub use deploy::{DeployRequest, DeploySession, DeployState, PublishRequest, Publisher};
pub use llm::{Completion, Generation, LlmDriver, LlmProviderKind};
pub use project::{ProjectSnapshot, ProjectStore};
pub use publish::{GitHubPagesPublisher, MockPublisher};
pub use state::{AppState, Message, MessageRole, Project, ProjectId, ProjectSummary};
pub use store::{FileStore, KeyValueStore, MemoryStore};
