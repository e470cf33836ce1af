use crate::config::AiRuntimeSettings;
use crate::state::{provisional_name, Message, MessageRole};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

pub const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_OPENROUTER_MODEL: &str = "deepseek/deepseek-r1-0528:free";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

const GENERATE_INSTRUCTION: &str = "You are a web developer helping a non-technical user build a \
single-page website. Always answer with a JSON object holding two fields, `summary` and `code`. \
When the user asks for a site or a change to one, `summary` is a short friendly note about what \
changed and `code` is the complete self-contained HTML document: it starts with <!DOCTYPE html>, \
loads Tailwind CSS from https://cdn.tailwindcss.com and uses https://picsum.photos/ for \
placeholder images. Build on the latest code in the conversation when there is one. When the user \
asks a question about web development, answer it in `summary` and set `code` to an empty string. \
Politely decline anything unrelated to building websites, again with an empty `code`.";

const ENHANCE_INSTRUCTION: &str = "You rewrite short website requests into detailed briefs for \
another model that writes HTML. Add concrete choices for layout, colour scheme, content sections \
and interactive behaviour. Reply with the rewritten brief only, without preamble or markdown.";

const TITLE_INSTRUCTION: &str = "Write a short title of at most five words for the website the \
user describes, for example \"Brooklyn Dog Walking Site\". Reply with the title only, without \
quotation marks or any other text.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    #[serde(alias = "openrouter")]
    OpenRouter,
    #[serde(alias = "openai")]
    OpenAi,
    Mock,
}

impl LlmProviderKind {
    pub fn from_environment() -> Self {
        match std::env::var("LLM_PROVIDER") {
            Ok(value) => value.parse().unwrap_or(Self::OpenRouter),
            Err(_) => Self::OpenRouter,
        }
    }

    fn default_endpoint(self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some(OPENROUTER_ENDPOINT),
            Self::OpenAi => Some(OPENAI_ENDPOINT),
            Self::Mock => None,
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::OpenRouter => DEFAULT_OPENROUTER_MODEL,
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
            Self::Mock => "mock",
        }
    }

    fn api_key_variable(self) -> Option<&'static str> {
        match self {
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::Mock => None,
        }
    }
}

impl std::str::FromStr for LlmProviderKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openrouter" | "open_router" => Ok(Self::OpenRouter),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "mock" => Ok(Self::Mock),
            other => Err(anyhow!("unknown provider `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
}

impl LlmConfig {
    pub fn new(provider: LlmProviderKind, model: Option<String>) -> Self {
        Self {
            provider,
            model,
            api_key: None,
            endpoint: None,
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }
}

/// Which of the three completion contracts a request serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Generate,
    Enhance,
    Title,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    fn system(content: &str) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        Self {
            role: role.into(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub kind: CompletionKind,
    pub messages: Vec<ChatTurn>,
    pub json_response: bool,
}

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    /// Sends one chat-completion request and returns the raw reply text.
    async fn send_chat(&self, request: &ChatRequest, config: &LlmConfig) -> Result<String>;
}

/// The result of a generation call. `code` is absent for turns that only
/// answer a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub summary: String,
    pub code: Option<String>,
}

/// The completion contracts the conversation workflow depends on.
#[async_trait]
pub trait Completion: Send + Sync {
    /// Turns the whole conversation, prior assistant turns included, into a
    /// summary and optionally a full document.
    async fn generate(&self, conversation: &[Message]) -> Result<Generation>;
    async fn enhance(&self, text: &str) -> Result<String>;
    async fn title(&self, text: &str) -> Result<String>;

    /// Generates a title, falling back to the local truncation on failure.
    async fn title_or_fallback(&self, prompt: &str) -> String {
        match self.title(prompt).await {
            Ok(title) => title,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not generate project title");
                provisional_name(prompt)
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("the model returned an empty response")]
    Empty,
    #[error("the model returned a response in an unexpected format")]
    NotJson,
    #[error("the model response was not structured correctly: {0}")]
    Structure(&'static str),
}

#[derive(Clone)]
pub struct LlmDriver {
    config: LlmConfig,
    provider: Arc<dyn LanguageModelProvider>,
}

impl LlmDriver {
    pub fn new(config: LlmConfig, provider: Arc<dyn LanguageModelProvider>) -> Self {
        Self { config, provider }
    }

    pub fn from_environment() -> Self {
        dotenvy::dotenv().ok();
        Self::for_provider(LlmProviderKind::from_environment())
    }

    /// Driver for `provider` with the model and API key taken from the environment.
    pub fn for_provider(provider: LlmProviderKind) -> Self {
        dotenvy::dotenv().ok();
        let mut config = LlmConfig::new(provider, std::env::var("SITECRAFT_MODEL").ok());
        config.api_key = provider
            .api_key_variable()
            .and_then(|name| std::env::var(name).ok());
        Self::with_config(config)
    }

    pub fn from_settings(settings: &AiRuntimeSettings) -> Self {
        let mut config = LlmConfig::new(settings.provider, settings.model.clone());
        config.api_key = settings.api_key.clone();
        config.endpoint = settings.endpoint.clone();
        Self::with_config(config)
    }

    pub fn with_config(config: LlmConfig) -> Self {
        match config.provider {
            LlmProviderKind::OpenRouter | LlmProviderKind::OpenAi => {
                Self::new(config, Arc::new(ChatCompletionsProvider::new()))
            }
            LlmProviderKind::Mock => Self::new(config, Arc::new(MockProvider)),
        }
    }

    pub fn fake() -> Self {
        Self::with_config(LlmConfig::new(LlmProviderKind::Mock, Some("mock".into())))
    }

    pub fn provider_kind(&self) -> LlmProviderKind {
        self.config.provider
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn ask(&self, kind: CompletionKind, instruction: &str, text: &str) -> Result<String> {
        let request = ChatRequest {
            kind,
            messages: vec![ChatTurn::system(instruction), ChatTurn::user(text)],
            json_response: false,
        };
        let reply = self.provider.send_chat(&request, &self.config).await?;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(GenerationError::Empty.into());
        }
        Ok(reply.to_string())
    }
}

#[async_trait]
impl Completion for LlmDriver {
    async fn generate(&self, conversation: &[Message]) -> Result<Generation> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(ChatTurn::system(GENERATE_INSTRUCTION));
        messages.extend(conversation.iter().map(ChatTurn::from));
        let request = ChatRequest {
            kind: CompletionKind::Generate,
            messages,
            json_response: true,
        };
        let reply = self
            .provider
            .send_chat(&request, &self.config)
            .await
            .context("website generation failed")?;
        parse_generation(&reply)
            .map_err(|err| {
                debug!(reply = %reply, "rejected generation reply");
                anyhow::Error::new(err)
            })
            .context("website generation failed")
    }

    async fn enhance(&self, text: &str) -> Result<String> {
        self.ask(CompletionKind::Enhance, ENHANCE_INSTRUCTION, text)
            .await
            .context("prompt enhancement failed")
    }

    async fn title(&self, text: &str) -> Result<String> {
        let title = self
            .ask(CompletionKind::Title, TITLE_INSTRUCTION, text)
            .await
            .context("title generation failed")?;
        let title = title.strip_prefix('"').unwrap_or(&title);
        let title = title.strip_suffix('"').unwrap_or(title).trim();
        if title.is_empty() {
            return Err(anyhow::Error::new(GenerationError::Empty).context("title generation failed"));
        }
        Ok(title.to_string())
    }
}

/// Validates a generation reply: an object with a string `summary` and a
/// `code` that is a string or null. Blank code means "no document".
pub fn parse_generation(reply: &str) -> Result<Generation, GenerationError> {
    let body = strip_code_fence(reply.trim());
    if body.is_empty() {
        return Err(GenerationError::Empty);
    }
    let value: Value = serde_json::from_str(body).map_err(|_| GenerationError::NotJson)?;
    let object = value
        .as_object()
        .ok_or(GenerationError::Structure("expected a JSON object"))?;
    let summary = match object.get("summary") {
        Some(Value::String(summary)) => summary.clone(),
        Some(_) => return Err(GenerationError::Structure("`summary` must be a string")),
        None => return Err(GenerationError::Structure("missing `summary`")),
    };
    let code = match object.get("code") {
        Some(Value::String(code)) if code.trim().is_empty() => None,
        Some(Value::String(code)) => Some(code.clone()),
        Some(Value::Null) => None,
        Some(_) => return Err(GenerationError::Structure("`code` must be a string or null")),
        None => return Err(GenerationError::Structure("missing `code`")),
    };
    Ok(Generation { summary, code })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    match rest.find('\n') {
        Some(newline) => rest[newline + 1..].trim(),
        None => rest.trim(),
    }
}

/// OpenAI-compatible `/chat/completions` client, used for OpenRouter and OpenAI.
struct ChatCompletionsProvider {
    http: HttpClient,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionReply {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: Option<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl ChatCompletionsProvider {
    fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

#[async_trait]
impl LanguageModelProvider for ChatCompletionsProvider {
    async fn send_chat(&self, request: &ChatRequest, config: &LlmConfig) -> Result<String> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("no API key configured for {:?}", config.provider))?;
        let endpoint = config
            .endpoint
            .as_deref()
            .or_else(|| config.provider.default_endpoint())
            .ok_or_else(|| anyhow!("no endpoint configured for {:?}", config.provider))?;
        let body = ChatCompletionBody {
            model: config.model(),
            messages: &request.messages,
            response_format: request.json_response.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let mut builder = self.http.post(endpoint).bearer_auth(api_key).json(&body);
        if config.provider == LlmProviderKind::OpenRouter {
            builder = builder
                .header("HTTP-Referer", "https://sitecraft.local")
                .header("X-Title", "sitecraft");
        }
        let response = builder.send().await.context("request to model API failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ApiErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .and_then(|error| error.message);
            return Err(match detail {
                Some(message) => anyhow!(message),
                None => anyhow!("API request failed with status {status}"),
            });
        }

        let reply: ChatCompletionReply = response
            .json()
            .await
            .context("model API returned an unreadable body")?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(content)
    }
}

/// Offline provider with deterministic replies. Questions (prompts ending in
/// `?`) produce a summary without code.
struct MockProvider;

#[async_trait]
impl LanguageModelProvider for MockProvider {
    async fn send_chat(&self, request: &ChatRequest, _config: &LlmConfig) -> Result<String> {
        sleep(Duration::from_millis(20)).await;
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|turn| turn.role == "user")
            .map(|turn| turn.content.trim().to_string())
            .unwrap_or_default();
        let reply = match request.kind {
            CompletionKind::Generate if prompt.ends_with('?') => serde_json::json!({
                "summary": format!("[Mock] Good question! You asked: {prompt}"),
                "code": "",
            })
            .to_string(),
            CompletionKind::Generate => {
                let revision = request
                    .messages
                    .iter()
                    .filter(|turn| turn.role == "user")
                    .count();
                serde_json::json!({
                    "summary": format!("[Mock] Done! Revision {revision} is ready."),
                    "code": mock_document(&prompt, revision),
                })
                .to_string()
            }
            CompletionKind::Enhance => format!(
                "{prompt}. Use a clean, modern layout with a sticky navigation bar, a full-width \
                 hero section, a three-column feature grid and a contact form in the footer."
            ),
            CompletionKind::Title => prompt
                .split_whitespace()
                .take(5)
                .collect::<Vec<_>>()
                .join(" "),
        };
        Ok(reply)
    }
}

fn mock_document(prompt: &str, revision: usize) -> String {
    let escaped = prompt
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <script src=\"https://cdn.tailwindcss.com\"></script>\n<title>Revision {revision}</title>\n\
         </head>\n<body class=\"p-8\">\n<h1 class=\"text-3xl font-bold\">{escaped}</h1>\n\
         <img src=\"https://picsum.photos/800/400\" alt=\"\">\n</body>\n</html>\n"
    )
}
