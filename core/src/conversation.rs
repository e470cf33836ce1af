use crate::llm::Completion;
use crate::project::ProjectStore;
use crate::state::{provisional_name, Message, ProjectId};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank prompt, no active project, or another request in flight.
    Rejected,
    Completed,
    /// Generation failed and the optimistic edit was undone.
    RolledBack { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnhanceOutcome {
    Rejected,
    Enhanced(String),
    Failed(String),
}

#[derive(Default)]
struct Status {
    sending: bool,
    enhancing: bool,
    error: Option<String>,
    enhancement_error: Option<String>,
    draft: String,
}

#[derive(Clone, Copy)]
enum Busy {
    Sending,
    Enhancing,
}

/// Clears its busy flag when the workflow that set it ends, however it ends.
struct BusyGuard {
    status: Arc<Mutex<Status>>,
    busy: Busy,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        let mut status = self.status.lock();
        match self.busy {
            Busy::Sending => status.sending = false,
            Busy::Enhancing => status.enhancing = false,
        }
    }
}

/// Drives the send-message and enhance-prompt workflows for the active project.
///
/// Sends and enhancements share one gate: while either is running, both are
/// rejected. Results are applied to the project by id when they arrive, so
/// switching or deleting projects mid-flight never corrupts another project.
#[derive(Clone)]
pub struct ConversationController {
    store: ProjectStore,
    completion: Arc<dyn Completion>,
    status: Arc<Mutex<Status>>,
}

impl ConversationController {
    pub fn new(store: ProjectStore, completion: Arc<dyn Completion>) -> Self {
        Self {
            store,
            completion,
            status: Arc::new(Mutex::new(Status::default())),
        }
    }

    pub fn is_sending(&self) -> bool {
        self.status.lock().sending
    }

    pub fn is_enhancing(&self) -> bool {
        self.status.lock().enhancing
    }

    pub fn error(&self) -> Option<String> {
        self.status.lock().error.clone()
    }

    pub fn enhancement_error(&self) -> Option<String> {
        self.status.lock().enhancement_error.clone()
    }

    /// The single error line a front end shows; send failures win.
    pub fn display_error(&self) -> Option<String> {
        let status = self.status.lock();
        status
            .error
            .clone()
            .or_else(|| status.enhancement_error.clone())
    }

    pub fn clear_error(&self) {
        self.status.lock().error = None;
    }

    pub fn clear_enhancement_error(&self) {
        self.status.lock().enhancement_error = None;
    }

    pub fn clear_errors(&self) {
        let mut status = self.status.lock();
        status.error = None;
        status.enhancement_error = None;
    }

    pub fn draft(&self) -> String {
        self.status.lock().draft.clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.status.lock().draft = text.into();
    }

    fn try_begin(&self, busy: Busy) -> Option<BusyGuard> {
        let mut status = self.status.lock();
        if status.sending || status.enhancing {
            return None;
        }
        match busy {
            Busy::Sending => status.sending = true,
            Busy::Enhancing => status.enhancing = true,
        }
        Some(BusyGuard {
            status: self.status.clone(),
            busy,
        })
    }

    pub async fn send_message(&self, prompt: &str) -> SendOutcome {
        let Some(project_id) = self.store.active_project_id() else {
            return SendOutcome::Rejected;
        };
        self.send_message_to(project_id, prompt).await
    }

    /// Sends `prompt` on the project chosen when the request was issued,
    /// even if another project has been activated since.
    pub async fn send_message_to(&self, project_id: ProjectId, prompt: &str) -> SendOutcome {
        if prompt.trim().is_empty() {
            return SendOutcome::Rejected;
        }
        let Some(_busy) = self.try_begin(Busy::Sending) else {
            debug!("send rejected, another request is in flight");
            return SendOutcome::Rejected;
        };
        {
            let mut status = self.status.lock();
            status.error = None;
            status.draft.clear();
        }

        let snapshot = self.store.snapshot();
        let mut opened = false;
        let mut history = Vec::new();
        let applied = self.store.update_project(project_id, |project| {
            opened = project.push_message(Message::user(prompt));
            if opened {
                project.name = provisional_name(prompt);
            }
            history = project.chat_history.clone();
        });
        if !applied {
            return SendOutcome::Rejected;
        }
        if opened {
            self.spawn_title(project_id, prompt.to_string());
        }

        info!(project = %project_id, turns = history.len(), "requesting generation");
        match self.completion.generate(&history).await {
            Ok(generation) => {
                let applied = self.store.update_project(project_id, move |project| {
                    project
                        .chat_history
                        .push(Message::assistant(generation.summary));
                    if let Some(code) = generation.code {
                        project.generated_code = Some(code);
                    }
                });
                if !applied {
                    debug!(project = %project_id, "project gone before generation completed");
                }
                SendOutcome::Completed
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(project = %project_id, error = %message, "generation failed, rolling back");
                self.store.restore(snapshot);
                self.status.lock().error = Some(message.clone());
                SendOutcome::RolledBack { error: message }
            }
        }
    }

    /// Names the project in the background. The result is applied by id
    /// whenever it lands, overwriting whatever name is current.
    fn spawn_title(&self, project_id: ProjectId, prompt: String) {
        let completion = self.completion.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let title = completion.title_or_fallback(&prompt).await;
            if store.rename_project(project_id, title) {
                debug!(project = %project_id, "applied generated title");
            }
        });
    }

    /// Expands `text` into a more detailed prompt and stores it as the draft.
    pub async fn enhance(&self, text: &str) -> EnhanceOutcome {
        if text.trim().is_empty() {
            return EnhanceOutcome::Rejected;
        }
        let Some(_busy) = self.try_begin(Busy::Enhancing) else {
            return EnhanceOutcome::Rejected;
        };
        self.clear_enhancement_error();

        match self.completion.enhance(text).await {
            Ok(enhanced) => {
                self.set_draft(enhanced.clone());
                EnhanceOutcome::Enhanced(enhanced)
            }
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "prompt enhancement failed");
                self.status.lock().enhancement_error = Some(message.clone());
                EnhanceOutcome::Failed(message)
            }
        }
    }
}
