use crate::llm::LlmProviderKind;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use url::Url;

#[derive(Debug, Clone)]
pub struct AiRuntimeSettings {
    pub provider: LlmProviderKind,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum AiConfigError {
    #[error("AI not configured: create sitecraft.yaml with provider credentials.")]
    Missing,
    #[error("AI configuration invalid: {0}")]
    Invalid(String),
}

impl AiConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "AI not configured: create sitecraft.yaml with provider credentials.".to_string()
            }
            Self::Invalid(detail) => {
                format!("AI not configured: {detail}. Update sitecraft.yaml.")
            }
        }
    }
}

impl AiRuntimeSettings {
    pub fn load() -> Result<Self, AiConfigError> {
        let path = locate_config_file().ok_or(AiConfigError::Missing)?;
        let contents = fs::read_to_string(&path).map_err(|err| {
            AiConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, AiConfigError> {
        let config: SitecraftConfig = serde_yaml::from_str(contents)
            .map_err(|err| AiConfigError::Invalid(format!("invalid sitecraft.yaml: {err}")))?;
        let app = config
            .app
            .ok_or_else(|| AiConfigError::Invalid("missing `app` section".to_string()))?;
        resolve_app_settings(app)
    }
}

fn resolve_app_settings(app: AppSection) -> Result<AiRuntimeSettings, AiConfigError> {
    let provider = app.provider.unwrap_or(LlmProviderKind::OpenRouter);
    let (section, label) = match provider {
        LlmProviderKind::OpenRouter => (app.openrouter.unwrap_or_default(), "OpenRouter"),
        LlmProviderKind::OpenAi => (app.openai.unwrap_or_default(), "OpenAI"),
        LlmProviderKind::Mock => {
            return Ok(AiRuntimeSettings {
                provider,
                api_key: None,
                model: non_empty(app.model),
                endpoint: None,
            })
        }
    };

    let api_key = section.api_key.trim().to_string();
    if api_key.is_empty() {
        return Err(AiConfigError::Invalid(format!(
            "missing {label} api key in sitecraft.yaml"
        )));
    }
    let endpoint = match non_empty(section.base_url) {
        Some(raw) => {
            let parsed = Url::parse(&raw).map_err(|err| {
                AiConfigError::Invalid(format!("invalid {label} base_url `{raw}`: {err}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AiConfigError::Invalid(format!(
                    "{label} base_url must use http or https"
                )));
            }
            Some(parsed.to_string())
        }
        None => None,
    };

    Ok(AiRuntimeSettings {
        provider,
        api_key: Some(api_key),
        model: non_empty(section.model).or_else(|| non_empty(app.model)),
        endpoint,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn locate_config_file() -> Option<PathBuf> {
    sitecraft_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn sitecraft_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("sitecraft");
        paths.push(config_dir.join("sitecraft.yaml"));
        paths.push(config_dir.join("sitecraft.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".sitecraft").join("sitecraft.yaml"));
        paths.push(home_dir.join(".sitecraft").join("sitecraft.yml"));
    } else {
        paths.push(PathBuf::from("sitecraft.yaml"));
        paths.push(PathBuf::from("sitecraft.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct SitecraftConfig {
    app: Option<AppSection>,
}

#[derive(Debug, Deserialize)]
struct AppSection {
    provider: Option<LlmProviderKind>,
    #[serde(default)]
    model: Option<String>,
    openrouter: Option<ProviderSection>,
    openai: Option<ProviderSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderSection {
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
}
