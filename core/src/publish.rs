use crate::deploy::{PublishRequest, Publisher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};
use url::Url;

pub const GITHUB_API: &str = "https://api.github.com";

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("`{0}` is not a valid repository name")]
    InvalidName(String),
    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// Publishes a single `index.html` to a public GitHub repository served by
/// GitHub Pages.
pub struct GitHubPagesPublisher {
    http: HttpClient,
    api_base: String,
}

#[derive(Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Deserialize)]
struct GitHubRepo {
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct GitHubContent {
    sha: String,
}

#[derive(Deserialize)]
struct GitHubErrorBody {
    message: Option<String>,
}

impl GitHubPagesPublisher {
    pub fn new() -> Self {
        Self::with_api_base(GITHUB_API)
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .bearer_auth(token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "sitecraft")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.request(self.http.get(format!("{}{path}", self.api_base)), token)
    }

    fn post(&self, path: &str, token: &str) -> RequestBuilder {
        self.request(self.http.post(format!("{}{path}", self.api_base)), token)
    }

    fn put(&self, path: &str, token: &str) -> RequestBuilder {
        self.request(self.http.put(format!("{}{path}", self.api_base)), token)
    }

    async fn owner(&self, token: &str) -> Result<String> {
        let response = self.get("/user", token).send().await?;
        let user: GitHubUser = expect_success(response).await?.json().await?;
        Ok(user.login)
    }

    /// Creates the repository, or reuses it when it already exists.
    async fn ensure_repository(&self, owner: &str, repo: &str, token: &str) -> Result<String> {
        let response = self
            .post("/user/repos", token)
            .json(&json!({
                "name": repo,
                "description": "Published with Sitecraft",
                "private": false,
                "auto_init": false,
            }))
            .send()
            .await?;
        let created = if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            debug!(%repo, "repository exists, reusing it");
            let response = self
                .get(&format!("/repos/{owner}/{repo}"), token)
                .send()
                .await?;
            expect_success(response).await?.json::<GitHubRepo>().await?
        } else {
            expect_success(response).await?.json::<GitHubRepo>().await?
        };
        Ok(created.default_branch.unwrap_or_else(|| "main".to_string()))
    }

    async fn existing_sha(&self, owner: &str, repo: &str, token: &str) -> Result<Option<String>> {
        let response = self
            .get(&format!("/repos/{owner}/{repo}/contents/index.html"), token)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let content: GitHubContent = expect_success(response).await?.json().await?;
        Ok(Some(content.sha))
    }

    async fn commit_index(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        document: &str,
        token: &str,
    ) -> Result<()> {
        let mut body = json!({
            "message": "Publish site",
            "content": STANDARD.encode(document),
            "branch": branch,
        });
        if let Some(sha) = self.existing_sha(owner, repo, token).await? {
            body["sha"] = json!(sha);
        }
        let response = self
            .put(&format!("/repos/{owner}/{repo}/contents/index.html"), token)
            .json(&body)
            .send()
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn enable_pages(&self, owner: &str, repo: &str, branch: &str, token: &str) -> Result<()> {
        let response = self
            .post(&format!("/repos/{owner}/{repo}/pages"), token)
            .json(&json!({ "source": { "branch": branch, "path": "/" } }))
            .send()
            .await?;
        // 409: Pages is already enabled for this repository.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        expect_success(response).await?;
        Ok(())
    }
}

impl Default for GitHubPagesPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for GitHubPagesPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let repo = request.target_name.as_str();
        validate_repository_name(repo)?;
        let token = request.credential.as_str();

        let owner = self.owner(token).await.context("could not identify GitHub account")?;
        let branch = self
            .ensure_repository(&owner, repo, token)
            .await
            .context("could not create repository")?;
        self.commit_index(&owner, repo, &branch, &request.document, token)
            .await
            .context("could not upload index.html")?;
        self.enable_pages(&owner, repo, &branch, token)
            .await
            .context("could not enable GitHub Pages")?;

        let url = pages_url(&owner, repo)?;
        info!(%url, "GitHub Pages site configured");
        Ok(url)
    }
}

async fn expect_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<GitHubErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    Err(PublishError::Api {
        status: status.as_u16(),
        message,
    }
    .into())
}

pub fn validate_repository_name(name: &str) -> Result<(), PublishError> {
    let valid = !name.is_empty()
        && name.len() <= 100
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PublishError::InvalidName(name.to_string()))
    }
}

pub fn pages_url(owner: &str, repo: &str) -> Result<String> {
    let url = Url::parse(&format!(
        "https://{}.github.io/{repo}/",
        owner.to_ascii_lowercase()
    ))
    .with_context(|| format!("cannot build a Pages URL for {owner}/{repo}"))?;
    Ok(url.to_string())
}

/// Offline publisher returning a deterministic URL.
#[derive(Default)]
pub struct MockPublisher;

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        sleep(Duration::from_millis(20)).await;
        validate_repository_name(&request.target_name)?;
        Ok(format!("https://mock.pages.local/{}/", request.target_name))
    }
}
