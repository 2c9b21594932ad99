//! GitHub repository content gateway
//!
//! Reads and writes files through the REST contents API. Every write carries
//! the blob sha observed at the last read (the version token); GitHub rejects
//! stale shas, which surfaces as a conflict.

use crate::credentials::CredentialProvider;
use crate::gateway::{GatewayError, GatewayFuture};
use crate::util::sanitize_error_body;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Public GitHub REST endpoint
pub const GITHUB_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "forge-agent";
const API_VERSION: &str = "2022-11-28";

// ============================================================================
// Repository identifiers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/repo`, an HTTPS GitHub URL or an SSH remote.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }

        // SSH format: git@github.com:owner/repo.git
        if let Some(rest) = input.strip_prefix("git@github.com:") {
            return split_owner_repo(rest);
        }

        if input.contains("github.com") {
            if let Ok(parsed) = Url::parse(input) {
                if parsed.host_str() != Some("github.com") {
                    return None;
                }
                return split_owner_repo(parsed.path());
            }

            // Fallback: URLs without scheme
            let path = input.split("github.com").nth(1)?;
            return split_owner_repo(path.trim_start_matches(['/', ':']));
        }

        if input.contains(':') || input.contains('@') {
            return None;
        }
        split_owner_repo(input)
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

fn split_owner_repo(path: &str) -> Option<RepoId> {
    let path = path
        .trim_start_matches('/')
        .trim_end_matches('/')
        .trim_end_matches(".git");
    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let name = parts.next()?.trim();
    if owner.is_empty() || name.is_empty() {
        return None;
    }
    Some(RepoId::new(owner, name))
}

// ============================================================================
// Wire types
// ============================================================================

/// Kind of a repository tree entry as reported by GitHub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Submodule,
}

impl EntryKind {
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Dir)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::Submodule => "submodule",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub size: u64,
}

/// File content with the version token required to overwrite it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub content: String,
    pub version_token: String,
}

/// A conditional write of full file content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub message: String,
    /// Absent only when creating a new path
    pub version_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub new_version_token: String,
}

/// Repository summary for the repository picker
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepository {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub default_branch: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub private: bool,
}

impl RemoteRepository {
    /// Case-insensitive match on name, description and language.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.full_name.to_lowercase().contains(&query)
            || self
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&query))
            || self
                .language
                .as_deref()
                .is_some_and(|l| l.to_lowercase().contains(&query))
    }
}

#[derive(Debug, Deserialize)]
struct ContentsItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: EntryKind,
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Directories come back as arrays, single files as an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ContentsResponse {
    Listing(Vec<RepositoryEntry>),
    Item(ContentsItem),
}

#[derive(Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteContentsRequest<'a> {
    message: &'a str,
    sha: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Deserialize)]
struct PutContentsResponse {
    content: Option<ContentRef>,
}

#[derive(Deserialize)]
struct ContentRef {
    sha: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

fn api_error_message(body: &str) -> Option<String> {
    let api_error = serde_json::from_str::<ApiErrorResponse>(body).ok()?;
    let detail = api_error
        .errors
        .first()
        .and_then(|e| e.message.clone())
        .unwrap_or_default();
    Some(if detail.is_empty() {
        api_error.message
    } else {
        format!("{}: {}", api_error.message, detail)
    })
}

/// Classify a non-success GitHub response.
pub(crate) fn classify_response(status: u16, body: &str) -> GatewayError {
    let message = api_error_message(body).unwrap_or_else(|| sanitize_error_body(body));
    match status {
        401 => GatewayError::auth_failed(format!(
            "GitHub rejected the token ({}). Run 'forge --setup' to update it.",
            message
        )),
        404 => GatewayError::not_found(message),
        409 => GatewayError::conflict(message),
        422 if message.to_lowercase().contains("sha") => GatewayError::conflict(message),
        _ => GatewayError::generic(format!("GitHub API error ({}): {}", status, message)),
    }
}

/// Decode the contents API payload into text.
fn decode_content(path: &str, item: &ContentsItem) -> Result<String, GatewayError> {
    match item.encoding.as_deref() {
        Some("base64") => {
            let raw: String = item
                .content
                .as_deref()
                .unwrap_or_default()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let bytes = general_purpose::STANDARD.decode(raw).map_err(|e| {
                GatewayError::generic(format!("Could not decode {}: {}", path, e))
            })?;
            String::from_utf8(bytes)
                .map_err(|_| GatewayError::generic(format!("{} is not a text file", path)))
        }
        Some("none") | None if item.size > 0 && item.content.as_deref().unwrap_or("").is_empty() => {
            Err(GatewayError::generic(format!(
                "{} is too large for the contents API ({} bytes)",
                path, item.size
            )))
        }
        _ => Ok(item.content.clone().unwrap_or_default()),
    }
}

// ============================================================================
// Gateway
// ============================================================================

/// Versioned access to a remote file tree
pub trait RepositoryGateway: Send + Sync {
    fn list_directory<'a>(
        &'a self,
        repo: &'a RepoId,
        path: &'a str,
    ) -> GatewayFuture<'a, Vec<RepositoryEntry>>;

    fn read_file<'a>(&'a self, repo: &'a RepoId, path: &'a str) -> GatewayFuture<'a, FileContent>;

    fn write_file<'a>(
        &'a self,
        repo: &'a RepoId,
        write: &'a FileWrite,
    ) -> GatewayFuture<'a, WriteOutcome>;

    fn delete_file<'a>(
        &'a self,
        repo: &'a RepoId,
        path: &'a str,
        message: &'a str,
        version_token: &'a str,
    ) -> GatewayFuture<'a, ()>;
}

pub struct GitHubGateway {
    client: reqwest::Client,
    api_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    branch: Option<String>,
}

impl GitHubGateway {
    pub fn new(
        client: reqwest::Client,
        api_url: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> anyhow::Result<Self> {
        let api_url = Url::parse(api_url)
            .map_err(|e| anyhow::anyhow!("Invalid GitHub API URL '{}': {}", api_url, e))?;
        if api_url.cannot_be_a_base() {
            return Err(anyhow::anyhow!("Invalid GitHub API URL '{}'", api_url));
        }
        Ok(Self {
            client,
            api_url,
            credentials,
            branch: None,
        })
    }

    /// Read from and commit to `branch` instead of the default branch.
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch.filter(|b| !b.trim().is_empty());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments.iter().filter(|s| !s.is_empty()));
        }
        url
    }

    pub(crate) fn contents_url(&self, repo: &RepoId, path: &str, with_ref: bool) -> Url {
        let mut segments = vec!["repos", repo.owner.as_str(), repo.name.as_str(), "contents"];
        segments.extend(path.split('/'));
        let mut url = self.endpoint(&segments);
        if with_ref {
            if let Some(branch) = &self.branch {
                url.query_pairs_mut().append_pair("ref", branch);
            }
        }
        url
    }

    fn token(&self) -> Result<String, GatewayError> {
        self.credentials.repository_token().ok_or_else(|| {
            GatewayError::auth_failed("Not authenticated with GitHub. Run 'forge --setup' first.")
        })
    }

    fn request(&self, method: Method, url: Url, token: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<String, GatewayError> {
        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_response(status.as_u16(), &body))
        }
    }

    async fn get_contents(&self, repo: &RepoId, path: &str) -> Result<ContentsResponse, GatewayError> {
        let token = self.token()?;
        let url = self.contents_url(repo, path, true);
        tracing::debug!(repo = %repo, path, "GET contents");
        let body = self.send(self.request(Method::GET, url, &token)).await?;
        serde_json::from_str(&body).map_err(|e| {
            GatewayError::generic(format!("Failed to parse contents of '{}': {}", path, e))
        })
    }

    /// Check the configured token and return the account login.
    pub async fn validate_token(&self) -> Result<String, GatewayError> {
        #[derive(Deserialize)]
        struct User {
            login: String,
        }

        let token = self.token()?;
        let body = self
            .send(self.request(Method::GET, self.endpoint(&["user"]), &token))
            .await?;
        let user: User = serde_json::from_str(&body)
            .map_err(|e| GatewayError::generic(format!("Failed to parse user response: {}", e)))?;
        Ok(user.login)
    }

    /// Repositories the token can access, most recently updated first.
    pub async fn list_user_repositories(&self) -> Result<Vec<RemoteRepository>, GatewayError> {
        let token = self.token()?;
        let mut url = self.endpoint(&["user", "repos"]);
        url.query_pairs_mut()
            .append_pair("sort", "updated")
            .append_pair("per_page", "100")
            .append_pair("type", "all");
        let body = self.send(self.request(Method::GET, url, &token)).await?;
        serde_json::from_str(&body)
            .map_err(|e| GatewayError::generic(format!("Failed to parse repositories: {}", e)))
    }
}

impl RepositoryGateway for GitHubGateway {
    fn list_directory<'a>(
        &'a self,
        repo: &'a RepoId,
        path: &'a str,
    ) -> GatewayFuture<'a, Vec<RepositoryEntry>> {
        Box::pin(async move {
            match self.get_contents(repo, path).await? {
                ContentsResponse::Listing(entries) => Ok(entries),
                ContentsResponse::Item(item) => Ok(vec![RepositoryEntry {
                    name: item.name,
                    path: item.path,
                    kind: item.kind,
                    size: item.size,
                }]),
            }
        })
    }

    fn read_file<'a>(&'a self, repo: &'a RepoId, path: &'a str) -> GatewayFuture<'a, FileContent> {
        Box::pin(async move {
            match self.get_contents(repo, path).await? {
                ContentsResponse::Listing(_) => Err(GatewayError::generic(format!(
                    "{} is a directory",
                    path
                ))),
                ContentsResponse::Item(item) if item.kind != EntryKind::File => Err(
                    GatewayError::generic(format!("{} is a {}, not a file", path, item.kind.label())),
                ),
                ContentsResponse::Item(item) => Ok(FileContent {
                    content: decode_content(path, &item)?,
                    version_token: item.sha,
                }),
            }
        })
    }

    fn write_file<'a>(
        &'a self,
        repo: &'a RepoId,
        write: &'a FileWrite,
    ) -> GatewayFuture<'a, WriteOutcome> {
        Box::pin(async move {
            let token = self.token()?;
            let url = self.contents_url(repo, &write.path, false);
            let body = PutContentsRequest {
                message: &write.message,
                content: general_purpose::STANDARD.encode(write.content.as_bytes()),
                sha: write.version_token.as_deref(),
                branch: self.branch.as_deref(),
            };
            tracing::debug!(
                repo = %repo,
                path = %write.path,
                conditional = write.version_token.is_some(),
                "PUT contents"
            );
            let text = self
                .send(self.request(Method::PUT, url, &token).json(&body))
                .await?;
            let parsed: PutContentsResponse = serde_json::from_str(&text).map_err(|e| {
                GatewayError::generic(format!("Failed to parse commit response: {}", e))
            })?;
            let sha = parsed
                .content
                .map(|c| c.sha)
                .ok_or_else(|| GatewayError::generic("Commit response did not include a sha"))?;
            Ok(WriteOutcome {
                new_version_token: sha,
            })
        })
    }

    fn delete_file<'a>(
        &'a self,
        repo: &'a RepoId,
        path: &'a str,
        message: &'a str,
        version_token: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let token = self.token()?;
            let url = self.contents_url(repo, path, false);
            let body = DeleteContentsRequest {
                message,
                sha: version_token,
                branch: self.branch.as_deref(),
            };
            tracing::debug!(repo = %repo, path, "DELETE contents");
            self.send(self.request(Method::DELETE, url, &token).json(&body))
                .await?;
            Ok(())
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
