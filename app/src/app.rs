use crate::config::{save_settings, ShellSettings};
use anyhow::Result;
use sitecraft_core::deploy::suggest_target_name;
use sitecraft_core::state::{AppState, Message, MessageRole, ProjectId};
use sitecraft_core::{DeployRequest, DeployState, EnhanceOutcome, SendOutcome};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    SendDraft,
    New,
    List,
    Select(usize),
    Delete(usize),
    Enhance(String),
    Draft,
    Code,
    Preview(Option<PathBuf>),
    Deploy {
        target: Option<String>,
        token: Option<String>,
    },
    DeployStatus,
    ResetDeploy,
    ForgetToken,
    Clear,
    Help,
    Quit,
}

/// Parses one shell line. Plain text is a message; `/word` is a command.
/// Project numbers are 1-based as printed by `/list`.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };
    let (word, args) = match rest.split_once(char::is_whitespace) {
        Some((word, args)) => (word, args.trim()),
        None => (rest, ""),
    };
    let index = |args: &str| -> Result<usize, String> {
        match args.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(n - 1),
            _ => Err(format!("/{word} needs a project number from /list")),
        }
    };
    let command = match word {
        "new" => Command::New,
        "list" | "ls" => Command::List,
        "select" | "open" => Command::Select(index(args)?),
        "delete" | "rm" => Command::Delete(index(args)?),
        "enhance" => Command::Enhance(args.to_string()),
        "draft" => Command::Draft,
        "send" => Command::SendDraft,
        "code" => Command::Code,
        "preview" => Command::Preview((!args.is_empty()).then(|| PathBuf::from(args))),
        "deploy" => {
            let mut parts = args.split_whitespace();
            Command::Deploy {
                target: parts.next().map(str::to_string),
                token: parts.next().map(str::to_string),
            }
        }
        "deploy-status" | "status" => Command::DeployStatus,
        "reset-deploy" => Command::ResetDeploy,
        "forget-token" => Command::ForgetToken,
        "clear" => Command::Clear,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(command)
}

const HELP: &str = "\
Type a description to generate or change the active website.
  /new                 start a new website
  /list                list websites
  /select N            switch to website N
  /delete N            delete website N
  /enhance TEXT        expand TEXT into a detailed prompt (stored as draft)
  /draft               show the draft
  /send                send the draft
  /code                print the generated HTML
  /preview [FILE]      write the generated HTML to FILE
  /deploy [REPO] [TOKEN]  publish to GitHub Pages (token is remembered)
  /status              show the deploy status for this website
  /reset-deploy        clear the deploy status
  /forget-token        drop the remembered publishing token
  /clear               clear error messages
  /quit                leave";

enum ShellEvent {
    Sent {
        project: ProjectId,
        outcome: SendOutcome,
    },
    Enhanced(EnhanceOutcome),
    Deployed(DeployState),
}

/// Line-oriented front end. Long-running requests run on spawned tasks and
/// report back over a channel, so the user can keep switching projects.
pub struct Shell {
    state: AppState,
    settings: ShellSettings,
    settings_path: PathBuf,
    tx: UnboundedSender<ShellEvent>,
    rx: UnboundedReceiver<ShellEvent>,
    /// Set from the moment a deploy is spawned until its result is reported.
    deploy_pending: bool,
}

impl Shell {
    pub fn new(state: AppState, settings: ShellSettings, settings_path: PathBuf) -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            state,
            settings,
            settings_path,
            tx,
            rx,
            deploy_pending: false,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        println!("Sitecraft. /help lists commands.");
        self.print_header();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => self.execute(command).await?,
                        Err(message) => println!("{message}"),
                    }
                }
                Some(event) = self.rx.recv() => self.report(event).await,
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Send(prompt) => self.spawn_send(prompt),
            Command::SendDraft => {
                let draft = self.state.conversation().draft();
                if draft.trim().is_empty() {
                    println!("The draft is empty.");
                } else {
                    self.spawn_send(draft);
                }
            }
            Command::New => {
                self.state.create_project();
                self.print_header();
            }
            Command::List => self.print_list(),
            Command::Select(index) => match self.project_at(index) {
                Some(id) => {
                    self.state.select_project(id);
                    self.print_header();
                    self.print_history();
                }
                None => println!("No website {}.", index + 1),
            },
            Command::Delete(index) => match self.project_at(index) {
                Some(id) => {
                    self.state.delete_project(id);
                    self.print_header();
                }
                None => println!("No website {}.", index + 1),
            },
            Command::Enhance(text) => {
                let text = if text.is_empty() {
                    self.state.conversation().draft()
                } else {
                    text
                };
                let state = self.state.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let outcome = state.enhance(&text).await;
                    if tx.send(ShellEvent::Enhanced(outcome)).is_err() {
                        warn!("shell closed before enhancement completed");
                    }
                });
            }
            Command::Draft => println!("{}", self.state.conversation().draft()),
            Command::Code => match self.state.preview() {
                Some(code) => println!("{code}"),
                None => println!("Nothing generated yet."),
            },
            Command::Preview(path) => {
                let path = path.unwrap_or_else(|| self.settings.preview_file.clone());
                match self.state.preview() {
                    Some(code) => {
                        tokio::fs::write(&path, code).await?;
                        println!("Preview written to {}", path.display());
                    }
                    None => println!("Nothing generated yet."),
                }
            }
            Command::Deploy { target, token } => self.spawn_deploy(target, token).await,
            Command::DeployStatus => print_deploy_state(&self.state.observed_deploy_state()),
            Command::ResetDeploy => {
                self.state.deploy_session().reset();
                println!("Deploy status cleared.");
            }
            Command::ForgetToken => {
                self.state.deploy_session().forget_credential();
                println!("Publishing token forgotten.");
            }
            Command::Clear => self.state.conversation().clear_errors(),
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }
        Ok(())
    }

    fn spawn_send(&self, prompt: String) {
        let conversation = self.state.conversation();
        if conversation.is_sending() || conversation.is_enhancing() {
            println!("Still working on the previous request.");
            return;
        }
        let Some(project) = self.state.projects().active_project_id() else {
            return;
        };
        let state = self.state.clone();
        let tx = self.tx.clone();
        println!("Generating...");
        tokio::spawn(async move {
            let outcome = state.send_message_to(project, &prompt).await;
            if tx.send(ShellEvent::Sent { project, outcome }).is_err() {
                warn!("shell closed before generation completed");
            }
        });
    }

    async fn spawn_deploy(&mut self, target: Option<String>, token: Option<String>) {
        if self.deploy_pending || self.state.deploy_session().is_loading() {
            println!("A deploy is already running.");
            return;
        }
        let Some(project) = self.state.active_project() else {
            return;
        };
        self.deploy_pending = true;
        let target = target.unwrap_or_else(|| suggest_target_name(&project.name));
        self.settings.record_target(&target);
        if let Err(err) = save_settings(&self.settings_path, &self.settings).await {
            warn!(error = %format!("{err:#}"), "failed to save settings");
        }

        let request = DeployRequest {
            credential: token.unwrap_or_default(),
            target_name: target.clone(),
        };
        let state = self.state.clone();
        let tx = self.tx.clone();
        println!("Deploying to {target}...");
        tokio::spawn(async move {
            let outcome = state.deploy(request).await;
            if tx.send(ShellEvent::Deployed(outcome)).is_err() {
                warn!("shell closed before deploy completed");
            }
        });
    }

    async fn report(&mut self, event: ShellEvent) {
        match event {
            ShellEvent::Sent {
                project,
                outcome: SendOutcome::Completed,
            } => {
                if let Some((name, reply)) = self.completed_reply(project) {
                    if Some(project) != self.state.projects().active_project_id() {
                        println!("Reply for {name}:");
                    }
                    println!("{}: {}", role_label(reply.role), reply.content);
                }
                self.print_header();
            }
            ShellEvent::Sent {
                outcome: SendOutcome::RolledBack { .. },
                ..
            }
            | ShellEvent::Enhanced(EnhanceOutcome::Failed(_)) => {
                if let Some(error) = self.state.conversation().display_error() {
                    println!("Error: {error}");
                }
            }
            ShellEvent::Sent {
                outcome: SendOutcome::Rejected,
                ..
            }
            | ShellEvent::Enhanced(EnhanceOutcome::Rejected) => {
                println!("Request ignored.");
            }
            ShellEvent::Enhanced(EnhanceOutcome::Enhanced(text)) => {
                println!("Draft updated, /send to use it:\n{text}");
            }
            ShellEvent::Deployed(_) => {
                self.deploy_pending = false;
                print_deploy_state(&self.state.observed_deploy_state());
            }
        }
    }

    fn project_at(&self, index: usize) -> Option<ProjectId> {
        self.state.summaries().get(index).map(|summary| summary.id)
    }

    fn print_header(&self) {
        if let Some(project) = self.state.active_project() {
            println!("== {} ==", project.name);
            if self.settings.show_code_size {
                if let Some(code) = &project.generated_code {
                    println!("   ({} bytes of HTML)", code.len());
                }
            }
        }
    }

    fn print_list(&self) {
        let active = self.state.projects().active_project_id();
        for (position, summary) in self.state.summaries().iter().enumerate() {
            let marker = if Some(summary.id) == active { '*' } else { ' ' };
            let code = if summary.has_code { " [site]" } else { "" };
            println!(
                "{marker} {}. {} ({} messages){code}",
                position + 1,
                summary.name,
                summary.message_count
            );
        }
    }

    fn print_history(&self) {
        if let Some(project) = self.state.active_project() {
            for message in &project.chat_history {
                println!("{}: {}", role_label(message.role), message.content);
            }
        }
    }

    /// Name and latest assistant reply of the project a send started on,
    /// whichever project is active now.
    fn completed_reply(&self, project: ProjectId) -> Option<(String, Message)> {
        let project = self.state.projects().project(project)?;
        let reply = project
            .chat_history
            .last()
            .filter(|message| message.role == MessageRole::Assistant)
            .cloned()?;
        Some((project.name, reply))
    }
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "You",
        MessageRole::Assistant => "Sitecraft",
    }
}

fn print_deploy_state(state: &DeployState) {
    match state {
        DeployState::Idle => println!("Not deployed."),
        DeployState::Loading { .. } => println!("Deploying..."),
        DeployState::Success { url, .. } => println!("Live at {url}"),
        DeployState::Error { message, .. } => println!("Deployment error: {message}"),
    }
}
