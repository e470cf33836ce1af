use crate::support::harness;
use sitecraft_core::llm::LlmDriver;
use sitecraft_core::publish::MockPublisher;
use sitecraft_core::state::{AppState, MessageRole, DEFAULT_PROJECT_NAME};
use sitecraft_core::store::FileStore;
use sitecraft_core::{DeployRequest, DeployState, SendOutcome};
use std::sync::Arc;
use tempfile::TempDir;

fn file_backed(dir: &TempDir) -> AppState {
    AppState::new(
        Arc::new(FileStore::new(dir.path().to_path_buf())),
        Arc::new(LlmDriver::fake()),
        Arc::new(MockPublisher),
    )
}

#[tokio::test]
async fn app_state_records_messages() {
    let temp_dir = TempDir::new().expect("temp dir");
    let state = file_backed(&temp_dir);

    let outcome = state.send_message("hello world").await;
    assert_eq!(outcome, SendOutcome::Completed);

    let project = state.active_project().expect("project");
    assert!(project
        .chat_history
        .iter()
        .any(|msg| msg.role == MessageRole::Assistant));
    assert!(project
        .chat_history
        .iter()
        .any(|msg| msg.role == MessageRole::User));
    assert!(state.preview().expect("document").contains("hello world"));
}

#[tokio::test]
async fn projects_survive_a_restart() {
    let temp_dir = TempDir::new().expect("temp dir");
    let first_id = {
        let state = file_backed(&temp_dir);
        state.send_message("a bakery").await;
        let id = state.projects().active_project_id().unwrap();
        state.create_project();
        id
    };

    let reopened = file_backed(&temp_dir);
    let summaries = reopened.summaries();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].id, first_id);
    assert_eq!(summaries[0].message_count, 2);
    assert!(summaries[0].has_code);
    assert_eq!(summaries[1].name, "Website 2");
    assert_eq!(
        reopened.projects().active_project_id(),
        Some(summaries[1].id)
    );
}

#[tokio::test]
async fn offline_stack_generates_and_deploys() {
    let temp_dir = TempDir::new().expect("temp dir");
    let state = file_backed(&temp_dir);
    state.send_message("a bakery in Queens").await;

    let deployed = state
        .deploy(DeployRequest {
            credential: "token".into(),
            target_name: "queens-bakery".into(),
        })
        .await;
    assert!(matches!(
        deployed,
        DeployState::Success { ref url, .. } if url == "https://mock.pages.local/queens-bakery/"
    ));
}

#[test]
fn collection_is_never_empty() {
    let h = harness();
    for round in 0..20 {
        match round % 4 {
            0 | 2 => {
                h.state.create_project();
            }
            _ => {
                for summary in h.state.summaries() {
                    h.state.delete_project(summary.id);
                    assert!(!h.state.summaries().is_empty());
                }
            }
        }
        assert!(!h.state.summaries().is_empty());
        assert!(h.state.active_project().is_some());
    }
    assert_eq!(h.state.summaries().len(), 1);
    assert_eq!(h.state.active_project().unwrap().name, DEFAULT_PROJECT_NAME);
}

#[tokio::test]
async fn switching_projects_clears_the_send_error() {
    let h = harness();
    h.completion.title(Ok("x"));
    h.completion.generation_failure("boom");
    h.completion.enhancement(Err("enhance boom"));
    h.state.send_message("hi").await;
    h.state.enhance("hi").await;
    assert_eq!(h.state.conversation().error().as_deref(), Some("boom"));

    let first = h.state.projects().active_project_id().unwrap();
    h.state.create_project();
    assert!(h.state.conversation().error().is_none());
    assert_eq!(
        h.state.conversation().enhancement_error().as_deref(),
        Some("enhance boom")
    );

    h.completion.generation_failure("boom again");
    h.state.send_message("hi").await;
    h.state.select_project(first);
    assert!(h.state.conversation().error().is_none());
}

#[tokio::test]
async fn deleting_keeps_the_send_error() {
    let h = harness();
    h.completion.title(Ok("x"));
    h.completion.generation_failure("boom");
    let extra = h.state.create_project();
    h.state.send_message("hi").await;
    h.state.delete_project(extra);
    assert_eq!(h.state.conversation().error().as_deref(), Some("boom"));
}
