use crate::support::{eventually, harness};
use anyhow::Result;
use async_trait::async_trait;
use sitecraft_core::llm::{
    ChatRequest, LanguageModelProvider, LlmConfig, LlmDriver, LlmProviderKind,
};
use sitecraft_core::state::{AppState, Message};
use sitecraft_core::store::MemoryStore;
use sitecraft_core::{EnhanceOutcome, MockPublisher, SendOutcome};
use std::sync::Arc;

const BAKERY: &str = "Build me a site for a bakery in Queens that sells sourdough";

#[tokio::test]
async fn failed_generation_restores_history_exactly() {
    let h = harness();
    h.completion.generation("First draft", Some("<!DOCTYPE html><p>v1</p>"));
    h.completion.title(Ok("Bakery"));
    assert_eq!(h.state.send_message("make a site").await, SendOutcome::Completed);
    eventually(|| h.state.active_project().unwrap().name == "Bakery").await;

    let before = h.state.active_project().unwrap();
    let before_json = serde_json::to_string(&before.chat_history).unwrap();

    h.completion.generation_failure("model overloaded");
    let outcome = h.state.send_message("hi").await;

    assert_eq!(
        outcome,
        SendOutcome::RolledBack {
            error: "model overloaded".into()
        }
    );
    let after = h.state.active_project().unwrap();
    assert_eq!(serde_json::to_string(&after.chat_history).unwrap(), before_json);
    assert_eq!(after.generated_code, before.generated_code);
    assert_eq!(
        h.state.conversation().error().as_deref(),
        Some("model overloaded")
    );
    assert!(!h.state.conversation().is_sending());
}

#[tokio::test]
async fn question_turn_keeps_previous_document() {
    let h = harness();
    h.completion.title(Ok("Portfolio"));
    h.completion.generation("Built it", Some("<!DOCTYPE html><h1>v1</h1>"));
    h.completion.generation("A div is a box for content.", None);

    h.state.send_message("a photography portfolio").await;
    h.state.send_message("what is a div?").await;

    let project = h.state.active_project().unwrap();
    assert_eq!(
        project.generated_code.as_deref(),
        Some("<!DOCTYPE html><h1>v1</h1>")
    );
    assert_eq!(project.chat_history.len(), 4);
    assert_eq!(
        project.chat_history.last().unwrap(),
        &Message::assistant("A div is a box for content.")
    );
}

#[tokio::test]
async fn generation_sees_prior_assistant_turns() {
    let h = harness();
    h.completion.title(Ok("Shop"));
    h.completion.generation("v1", Some("<html>1</html>"));
    h.completion.generation("v2", Some("<html>2</html>"));

    h.state.send_message("a shop").await;
    h.state.send_message("make it green").await;

    let conversations = h.completion.conversations();
    assert_eq!(conversations.len(), 2);
    assert_eq!(
        conversations[1],
        vec![
            Message::user("a shop"),
            Message::assistant("v1"),
            Message::user("make it green"),
        ]
    );
}

#[tokio::test]
async fn late_completion_lands_on_originating_project() {
    let h = harness();
    let project_a = h.state.projects().active_project_id().unwrap();
    h.completion.title(Ok("Site A"));
    let release = h.completion.gated_generation("Done", Some("<html>A</html>"));

    let state = h.state.clone();
    let send = tokio::spawn(async move { state.send_message("site a").await });
    eventually(|| h.completion.generate_calls() == 1).await;

    let project_b = h.state.create_project();
    assert_eq!(h.state.projects().active_project_id(), Some(project_b));
    assert!(h.state.conversation().is_sending());

    release.send(()).unwrap();
    assert_eq!(send.await.unwrap(), SendOutcome::Completed);

    let a = h.state.projects().project(project_a).unwrap();
    assert_eq!(a.chat_history.len(), 2);
    assert_eq!(a.generated_code.as_deref(), Some("<html>A</html>"));
    let b = h.state.projects().project(project_b).unwrap();
    assert!(b.chat_history.is_empty());
    assert!(b.generated_code.is_none());
    assert_eq!(h.state.projects().active_project_id(), Some(project_b));
    assert!(!h.state.conversation().is_sending());
}

#[tokio::test]
async fn completion_for_deleted_project_is_dropped() {
    let h = harness();
    let doomed = h.state.projects().active_project_id().unwrap();
    let survivor = h.state.create_project();
    h.state.select_project(doomed);
    h.completion.title(Ok("Doomed"));
    let release = h.completion.gated_generation("Done", Some("<html></html>"));

    let state = h.state.clone();
    let send = tokio::spawn(async move { state.send_message("doomed site").await });
    eventually(|| h.completion.generate_calls() == 1).await;

    h.state.delete_project(doomed);
    release.send(()).unwrap();
    assert_eq!(send.await.unwrap(), SendOutcome::Completed);

    assert!(h.state.projects().project(doomed).is_none());
    let remaining = h.state.projects().projects();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, survivor);
    assert!(remaining[0].chat_history.is_empty());
    assert!(!h.state.conversation().is_sending());
}

#[tokio::test]
async fn only_one_send_in_flight_across_projects() {
    let h = harness();
    h.completion.title(Ok("One"));
    let release = h.completion.gated_generation("Done", None);

    let state = h.state.clone();
    let first = tokio::spawn(async move { state.send_message("first").await });
    eventually(|| h.completion.generate_calls() == 1).await;

    let other = h.state.create_project();
    assert_eq!(h.state.send_message("second").await, SendOutcome::Rejected);
    assert!(h.state.projects().project(other).unwrap().chat_history.is_empty());
    assert_eq!(h.state.enhance("expand me").await, EnhanceOutcome::Rejected);

    release.send(()).unwrap();
    assert_eq!(first.await.unwrap(), SendOutcome::Completed);
    assert_eq!(h.completion.generate_calls(), 1);
}

#[tokio::test]
async fn provisional_name_then_generated_title() {
    let h = harness();
    let release_title = h.completion.gated_title("Queens Bakery Website");
    let release_generation = h.completion.gated_generation("Here you go", Some("<html></html>"));

    let state = h.state.clone();
    let send = tokio::spawn(async move { state.send_message(BAKERY).await });
    eventually(|| h.completion.generate_calls() == 1).await;

    assert_eq!(
        h.state.active_project().unwrap().name,
        "Build me a site for a bakery in Queens t..."
    );
    eventually(|| h.completion.title_calls() == 1).await;

    release_title.send(()).unwrap();
    eventually(|| h.state.active_project().unwrap().name == "Queens Bakery Website").await;
    assert!(h.state.conversation().is_sending());

    release_generation.send(()).unwrap();
    assert_eq!(send.await.unwrap(), SendOutcome::Completed);
    assert_eq!(h.state.active_project().unwrap().name, "Queens Bakery Website");
}

#[tokio::test]
async fn title_is_requested_only_for_the_first_message() {
    let h = harness();
    h.completion.title(Ok("Shop"));
    h.completion.generation("v1", None);
    h.completion.generation("v2", None);
    h.state.send_message("a shop").await;
    eventually(|| h.completion.title_calls() == 1).await;
    h.state.send_message("more").await;
    tokio::task::yield_now().await;
    assert_eq!(h.completion.title_calls(), 1);
}

#[tokio::test]
async fn title_failure_is_never_surfaced() {
    let h = harness();
    h.completion.title(Err("title service down"));
    h.completion.generation("Done", Some("<html></html>"));

    assert_eq!(h.state.send_message(BAKERY).await, SendOutcome::Completed);
    eventually(|| h.completion.title_calls() == 1).await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        h.state.active_project().unwrap().name,
        "Build me a site for a bakery in Queens t..."
    );
    assert!(h.state.conversation().display_error().is_none());
}

#[tokio::test]
async fn title_follows_its_project_after_a_switch() {
    let h = harness();
    let project_a = h.state.projects().active_project_id().unwrap();
    let release_title = h.completion.gated_title("Bakery");
    h.completion.generation("Done", None);

    h.state.send_message("bakery").await;
    let project_b = h.state.create_project();
    release_title.send(()).unwrap();

    eventually(|| h.state.projects().project(project_a).unwrap().name == "Bakery").await;
    assert_eq!(
        h.state.projects().project(project_b).unwrap().name,
        "Website 2"
    );
}

#[tokio::test]
async fn enhancement_error_outlives_a_successful_send() {
    let h = harness();
    h.completion.enhancement(Err("enhancer unavailable"));
    h.completion.title(Ok("Site"));
    h.completion.generation("Done", Some("<html></html>"));

    let outcome = h.state.enhance("a site").await;
    assert_eq!(outcome, EnhanceOutcome::Failed("enhancer unavailable".into()));
    assert_eq!(h.state.conversation().draft(), "");

    assert_eq!(h.state.send_message("a site").await, SendOutcome::Completed);
    let conversation = h.state.conversation();
    assert!(conversation.error().is_none());
    assert_eq!(
        conversation.enhancement_error().as_deref(),
        Some("enhancer unavailable")
    );
    assert_eq!(
        conversation.display_error().as_deref(),
        Some("enhancer unavailable")
    );

    conversation.clear_enhancement_error();
    assert!(conversation.display_error().is_none());
}

#[tokio::test]
async fn enhancement_failure_keeps_send_error() {
    let h = harness();
    h.completion.generation_failure("generation broke");
    h.completion.title(Ok("x"));
    h.completion.enhancement(Err("enhancer broke"));

    h.state.send_message("a site").await;
    h.state.enhance("a site").await;

    let conversation = h.state.conversation();
    assert_eq!(conversation.error().as_deref(), Some("generation broke"));
    assert_eq!(conversation.enhancement_error().as_deref(), Some("enhancer broke"));
    assert_eq!(conversation.display_error().as_deref(), Some("generation broke"));

    conversation.clear_errors();
    assert!(conversation.display_error().is_none());
}

#[tokio::test]
async fn successful_enhancement_replaces_draft_only() {
    let h = harness();
    h.completion.enhancement(Ok("A detailed brief for a bakery"));
    h.state.conversation().set_draft("bakery");

    let outcome = h.state.enhance("bakery").await;
    assert_eq!(
        outcome,
        EnhanceOutcome::Enhanced("A detailed brief for a bakery".into())
    );
    assert_eq!(h.state.conversation().draft(), "A detailed brief for a bakery");
    let project = h.state.active_project().unwrap();
    assert!(project.chat_history.is_empty());
    assert!(project.generated_code.is_none());
}

#[tokio::test]
async fn blank_enhancement_is_rejected() {
    let h = harness();
    assert_eq!(h.state.enhance("  ").await, EnhanceOutcome::Rejected);
    assert!(h.state.conversation().enhancement_error().is_none());
}

/// Replies with text that is not the JSON object the generation contract needs.
struct Rambling;

#[async_trait]
impl LanguageModelProvider for Rambling {
    async fn send_chat(&self, _request: &ChatRequest, _config: &LlmConfig) -> Result<String> {
        Ok("Sure! Here is your website: <html></html>".into())
    }
}

#[tokio::test]
async fn malformed_model_reply_rolls_back() {
    let driver = LlmDriver::new(LlmConfig::new(LlmProviderKind::Mock, None), Arc::new(Rambling));
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(driver),
        Arc::new(MockPublisher),
    );
    let original_name = state.active_project().unwrap().name;

    let outcome = state.send_message("a site").await;
    assert!(matches!(outcome, SendOutcome::RolledBack { .. }));
    let project = state.active_project().unwrap();
    assert!(project.chat_history.is_empty());
    assert_eq!(project.name, original_name);
    let error = state.conversation().error().unwrap();
    assert!(error.contains("unexpected format"), "{error}");
}

#[tokio::test]
async fn send_to_a_background_project_leaves_the_active_one_alone() {
    let h = harness();
    let background = h.state.projects().active_project_id().unwrap();
    let active = h.state.create_project();
    h.completion.title(Ok("Background"));
    h.completion.generation("Done", Some("<html>bg</html>"));

    let outcome = h.state.send_message_to(background, "a bakery").await;
    assert_eq!(outcome, SendOutcome::Completed);

    let bg = h.state.projects().project(background).unwrap();
    assert_eq!(bg.chat_history.len(), 2);
    assert_eq!(bg.generated_code.as_deref(), Some("<html>bg</html>"));
    assert!(h.state.active_project().unwrap().chat_history.is_empty());
    assert_eq!(h.state.projects().active_project_id(), Some(active));
}

#[tokio::test]
async fn send_to_a_missing_project_is_rejected() {
    let h = harness();
    let outcome = h
        .state
        .send_message_to(uuid::Uuid::new_v4(), "a bakery")
        .await;
    assert_eq!(outcome, SendOutcome::Rejected);
    assert_eq!(h.completion.generate_calls(), 0);
    assert!(!h.state.conversation().is_sending());
}
