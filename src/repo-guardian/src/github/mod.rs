//! Typed client for the GitHub REST API, authenticated as a GitHub App.
//!
//! The client is a thin facade over the endpoints repo-guardian needs:
//! contents probes, refs, pull requests, installations, and repository
//! custom properties. Every request passes through a per-transport
//! [`RateLimitGate`] that paces pre-emptively and retries once on primary
//! or secondary rate limits.
//!
//! [`GitHubClient::installation_client`] returns a client scoped to one
//! installation: it signs requests with that installation's cached access
//! token and carries that installation's own rate-limit state, because
//! GitHub accounts rate budget separately per installation.

mod auth;
mod error;
pub mod rate_limit;

pub use error::GitHubError;
pub use rate_limit::RateLimitGate;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::Metrics;
use auth::{AccessToken, AppAuth, CachedToken};

/// Accept header for JSON responses.
const ACCEPT_JSON: &str = "application/vnd.github+json";

/// Accept header that returns file contents raw instead of base64 JSON.
const ACCEPT_RAW: &str = "application/vnd.github.raw+json";

/// Pinned REST API version.
const API_VERSION: &str = "2022-11-28";

/// User agent sent with every request; GitHub rejects anonymous clients.
const USER_AGENT: &str = "repo-guardian";

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for paginated list endpoints.
const PER_PAGE: u32 = 100;

/// A GitHub repository with the metadata the engine needs to decide
/// whether to process it.
#[derive(Debug, Clone)]
pub struct Repository {
    pub owner: String,
    pub name: String,
    pub archived: bool,
    pub fork: bool,
    /// Default branch name; empty when the repository has no commits.
    pub default_branch: String,
}

/// A pull request with the fields relevant to proposal matching.
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    /// Head branch name.
    pub head: String,
    /// `"open"` or `"closed"`.
    pub state: String,
}

/// A GitHub App installation on an org or user account.
#[derive(Debug, Clone)]
pub struct Installation {
    pub id: u64,
    pub account: String,
}

/// A single custom property key-value pair on a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomPropertyValue {
    pub property_name: String,
    pub value: String,
}

/// Client for the GitHub REST API. Cheap to clone; clones share the
/// underlying transport, App credentials, and installation cache.
#[derive(Clone)]
pub struct GitHubClient {
    inner: Arc<ClientShared>,
    auth: AuthScope,
    gate: Arc<RateLimitGate>,
}

struct ClientShared {
    http: reqwest::Client,
    base_url: String,
    app: Option<AppAuth>,
    threshold: f64,
    metrics: Arc<Metrics>,
    installations: Mutex<HashMap<u64, Arc<InstallationEntry>>>,
}

/// Per-installation credential and rate-limit state, shared by every
/// client scoped to that installation.
struct InstallationEntry {
    id: u64,
    gate: Arc<RateLimitGate>,
    tokens: tokio::sync::Mutex<Option<CachedToken>>,
}

#[derive(Clone)]
enum AuthScope {
    /// App-level JWT; used for installation enumeration and token minting.
    App,
    /// Installation access token, cached until near expiry.
    Installation(Arc<InstallationEntry>),
    /// A fixed token. Used by tests and personal-token deployments.
    Token(String),
}

impl GitHubClient {
    /// Creates a client authenticated as a GitHub App.
    ///
    /// # Errors
    ///
    /// Returns an error if the private key cannot be read or the HTTP
    /// client cannot be constructed.
    pub fn new(
        app_id: u64,
        private_key_path: &Path,
        base_url: &str,
        rate_limit_threshold: f64,
        metrics: Arc<Metrics>,
    ) -> Result<Self, GitHubError> {
        let app = AppAuth::from_pem_file(app_id, private_key_path)?;
        Self::build(Some(app), AuthScope::App, base_url, rate_limit_threshold, metrics)
    }

    /// Creates a client using a fixed token for every request. Installation
    /// scoping is a no-op on such clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn with_token(
        base_url: &str,
        token: &str,
        rate_limit_threshold: f64,
        metrics: Arc<Metrics>,
    ) -> Result<Self, GitHubError> {
        Self::build(
            None,
            AuthScope::Token(token.to_string()),
            base_url,
            rate_limit_threshold,
            metrics,
        )
    }

    fn build(
        app: Option<AppAuth>,
        auth: AuthScope,
        base_url: &str,
        threshold: f64,
        metrics: Arc<Metrics>,
    ) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        let gate = Arc::new(RateLimitGate::new(threshold, metrics.clone()));

        Ok(Self {
            inner: Arc::new(ClientShared {
                http,
                base_url: base_url.trim_end_matches('/').to_string(),
                app,
                threshold,
                metrics,
                installations: Mutex::new(HashMap::new()),
            }),
            auth,
            gate,
        })
    }

    /// Returns a client scoped to the given installation. Entries are
    /// memoized: repeated calls for the same installation share one token
    /// cache and one rate-limit gate.
    ///
    /// Clients built with [`GitHubClient::with_token`] have no App
    /// credentials to mint installation tokens with; they are returned
    /// unchanged, already fully scoped.
    #[must_use]
    pub fn installation_client(&self, installation_id: u64) -> GitHubClient {
        if self.inner.app.is_none() {
            return self.clone();
        }

        let entry = {
            let mut installations = self.inner.installations.lock();
            installations
                .entry(installation_id)
                .or_insert_with(|| {
                    Arc::new(InstallationEntry {
                        id: installation_id,
                        gate: Arc::new(RateLimitGate::new(
                            self.inner.threshold,
                            self.inner.metrics.clone(),
                        )),
                        tokens: tokio::sync::Mutex::new(None),
                    })
                })
                .clone()
        };

        GitHubClient {
            inner: self.inner.clone(),
            gate: entry.gate.clone(),
            auth: AuthScope::Installation(entry),
        }
    }

    /// Checks whether a file exists at the given path. A 404 is a clean
    /// `false`; other failures are errors.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or non-404 API errors.
    pub async fn file_exists(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<bool, GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/contents/{path}"));
        let resp = self.send("get_contents", Method::GET, &url, ACCEPT_JSON).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        check_status("get_contents", resp).await?;
        Ok(true)
    }

    /// Returns the decoded content of a file, or an empty string when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or non-404 API errors.
    pub async fn read_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
    ) -> Result<String, GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/contents/{path}"));
        let resp = self.send("get_file_content", Method::GET, &url, ACCEPT_RAW).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(String::new());
        }

        let resp = check_status("get_file_content", resp).await?;
        Ok(resp.text().await?)
    }

    /// Returns all open pull requests for a repository, following the
    /// `Link: rel="next"` header until exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn list_open_pulls(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequest>, GitHubError> {
        let mut url = self.url(&format!(
            "repos/{owner}/{repo}/pulls?state=open&per_page={PER_PAGE}"
        ));
        let mut all = Vec::new();

        loop {
            let resp = self.send("list_pulls", Method::GET, &url, ACCEPT_JSON).await?;
            let resp = check_status("list_pulls", resp).await?;
            let next = next_page_url(resp.headers());

            let page: Vec<PullDto> = resp.json().await?;
            all.extend(page.into_iter().map(PullDto::into_pull_request));

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(all)
    }

    /// Returns repository metadata.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn get_repository(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Repository, GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}"));
        let resp = self.send("get_repository", Method::GET, &url, ACCEPT_JSON).await?;
        let resp = check_status("get_repository", resp).await?;
        let dto: RepoDto = resp.json().await?;

        Ok(dto.into_repository(owner))
    }

    /// Returns the commit SHA at the tip of a branch, or an empty string
    /// when the branch does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or non-404 API errors.
    pub async fn get_branch_sha(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<String, GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/git/ref/heads/{branch}"));
        let resp = self.send("get_branch", Method::GET, &url, ACCEPT_JSON).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(String::new());
        }

        let resp = check_status("get_branch", resp).await?;
        let dto: RefDto = resp.json().await?;
        Ok(dto.object.sha)
    }

    /// Creates a branch at the given base SHA.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        base_sha: &str,
    ) -> Result<(), GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/git/refs"));
        let body = CreateRefBody {
            r#ref: format!("refs/heads/{branch}"),
            sha: base_sha.to_string(),
        };
        let resp = self
            .send_json("create_branch", Method::POST, &url, &body)
            .await?;
        check_status("create_branch", resp).await?;
        Ok(())
    }

    /// Deletes a branch.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/git/refs/heads/{branch}"));
        let resp = self.send("delete_branch", Method::DELETE, &url, ACCEPT_JSON).await?;
        check_status("delete_branch", resp).await?;
        Ok(())
    }

    /// Creates or updates a single file on the given branch.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn create_or_update_file(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
    ) -> Result<(), GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/contents/{path}"));
        let body = PutFileBody {
            message: message.to_string(),
            content: BASE64.encode(content),
            branch: branch.to_string(),
        };
        let resp = self.send_json("create_file", Method::PUT, &url, &body).await?;
        check_status("create_file", resp).await?;
        Ok(())
    }

    /// Opens a pull request and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/pulls"));
        let payload = CreatePullBody {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        };
        let resp = self.send_json("create_pull", Method::POST, &url, &payload).await?;
        let resp = check_status("create_pull", resp).await?;
        let dto: PullDto = resp.json().await?;
        Ok(dto.into_pull_request())
    }

    /// Returns all installations of this App, paginated.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn list_installations(&self) -> Result<Vec<Installation>, GitHubError> {
        let mut url = self.url(&format!("app/installations?per_page={PER_PAGE}"));
        let mut all = Vec::new();

        loop {
            let builder = self
                .inner
                .http
                .request(Method::GET, &url)
                .bearer_auth(self.app_bearer()?)
                .header(ACCEPT, ACCEPT_JSON)
                .header("X-GitHub-Api-Version", API_VERSION);
            let resp = self.dispatch("list_installations", builder).await?;
            let resp = check_status("list_installations", resp).await?;
            let next = next_page_url(resp.headers());

            let page: Vec<InstallationDto> = resp.json().await?;
            all.extend(page.into_iter().map(|dto| Installation {
                id: dto.id,
                account: dto.account.map(|a| a.login).unwrap_or_default(),
            }));

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(all)
    }

    /// Returns all repositories accessible to the given installation,
    /// paginated.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn list_installation_repos(
        &self,
        installation_id: u64,
    ) -> Result<Vec<Repository>, GitHubError> {
        let scoped = self.installation_client(installation_id);
        let mut url = scoped.url(&format!("installation/repositories?per_page={PER_PAGE}"));
        let mut all = Vec::new();

        loop {
            let resp = scoped
                .send("list_installation_repos", Method::GET, &url, ACCEPT_JSON)
                .await?;
            let resp = check_status("list_installation_repos", resp).await?;
            let next = next_page_url(resp.headers());

            let page: InstallationReposDto = resp.json().await?;
            all.extend(page.repositories.into_iter().map(RepoDto::into_owned_repository));

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(all)
    }

    /// Returns all custom property values set on a repository.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn get_custom_property_values(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<CustomPropertyValue>, GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/properties/values"));
        let resp = self.send("get_properties", Method::GET, &url, ACCEPT_JSON).await?;
        let resp = check_status("get_properties", resp).await?;
        let dtos: Vec<PropertyValueDto> = resp.json().await?;

        Ok(dtos.into_iter().map(PropertyValueDto::into_value).collect())
    }

    /// Creates or updates custom property values on a repository.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failures or API errors.
    pub async fn set_custom_property_values(
        &self,
        owner: &str,
        repo: &str,
        properties: &[CustomPropertyValue],
    ) -> Result<(), GitHubError> {
        let url = self.url(&format!("repos/{owner}/{repo}/properties/values"));
        let body = PropertiesPatchBody {
            properties: properties
                .iter()
                .map(|p| PropertyValueOut {
                    property_name: p.property_name.clone(),
                    value: p.value.clone(),
                })
                .collect(),
        };
        let resp = self.send_json("set_properties", Method::PATCH, &url, &body).await?;
        check_status("set_properties", resp).await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.inner.base_url)
    }

    /// Resolves the bearer token for this client's scope, minting and
    /// caching an installation token when needed.
    async fn bearer(&self) -> Result<String, GitHubError> {
        match &self.auth {
            AuthScope::Token(token) => Ok(token.clone()),
            AuthScope::App => self.app_bearer(),
            AuthScope::Installation(entry) => self.installation_bearer(entry).await,
        }
    }

    /// Returns the App-level bearer: a freshly signed JWT, or the fixed
    /// token for clients built without App credentials.
    fn app_bearer(&self) -> Result<String, GitHubError> {
        if let Some(app) = &self.inner.app {
            return app.jwt();
        }

        match &self.auth {
            AuthScope::Token(token) => Ok(token.clone()),
            _ => Err(GitHubError::NoAppCredentials),
        }
    }

    async fn installation_bearer(
        &self,
        entry: &InstallationEntry,
    ) -> Result<String, GitHubError> {
        let mut cache = entry.tokens.lock().await;

        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        let app = self.inner.app.as_ref().ok_or(GitHubError::NoAppCredentials)?;
        let jwt = app.jwt()?;
        let url = self.url(&format!("app/installations/{}/access_tokens", entry.id));

        debug!(installation_id = entry.id, "minting installation access token");

        // Mint requests carry app-scoped rate headers and skip the
        // installation gate.
        let resp = self
            .inner
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(ACCEPT, ACCEPT_JSON)
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;
        let resp = check_status("mint_installation_token", resp).await?;
        let minted: AccessToken = resp.json().await?;

        *cache = Some(CachedToken {
            token: minted.token.clone(),
            expires_at: minted.expires_at,
        });

        Ok(minted.token)
    }

    /// Builds a request with this client's auth scope and standard headers.
    async fn request(
        &self,
        method: Method,
        url: &str,
        accept: &'static str,
    ) -> Result<reqwest::RequestBuilder, GitHubError> {
        let token = self.bearer().await?;
        Ok(self
            .inner
            .http
            .request(method, url)
            .bearer_auth(token)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        accept: &'static str,
    ) -> Result<reqwest::Response, GitHubError> {
        let builder = self.request(method, url, accept).await?;
        self.dispatch(operation, builder).await
    }

    async fn send_json<B: Serialize>(
        &self,
        operation: &'static str,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response, GitHubError> {
        let builder = self.request(method, url, ACCEPT_JSON).await?.json(body);
        self.dispatch(operation, builder).await
    }

    /// Executes a request through the rate-limit gate: pace, send, update
    /// state from headers, and retry exactly once on a rate-limited
    /// response. The second response is returned unmodified even if it is
    /// another 403.
    async fn dispatch(
        &self,
        operation: &'static str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, GitHubError> {
        let request = builder.build()?;
        let retry = request.try_clone();

        self.gate.pace().await;

        let resp = self.inner.http.execute(request).await?;
        self.gate.update(resp.headers());

        let Some(reason) = rate_limit::classify(resp.status(), resp.headers()) else {
            return Ok(resp);
        };

        let delay = rate_limit::retry_delay(resp.headers());
        warn!(
            operation,
            reason,
            delay_secs = delay.as_secs_f64(),
            status = resp.status().as_u16(),
            "github api rate limited, waiting to retry"
        );
        self.inner.metrics.rate_limit_wait(reason, delay.as_secs_f64());

        // Replaying needs a clonable body; streaming bodies fall through
        // with the original response.
        let Some(second) = retry else {
            return Ok(resp);
        };

        tokio::time::sleep(delay).await;

        let resp = self.inner.http.execute(second).await?;
        self.gate.update(resp.headers());
        Ok(resp)
    }
}

/// Extracts the `rel="next"` target from a `Link` header, if present.
fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;

    for part in link.split(',') {
        let mut sections = part.split(';');
        let url = sections
            .next()?
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');

        if sections.any(|s| s.trim() == "rel=\"next\"") {
            return Some(url.to_string());
        }
    }

    None
}

async fn check_status(
    operation: &'static str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, GitHubError> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status().as_u16();
    let message = resp
        .json::<ApiErrorBody>()
        .await
        .map(|b| b.message)
        .unwrap_or_default();

    Err(GitHubError::Api {
        operation,
        status,
        message,
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RepoDto {
    name: String,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    fork: bool,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    owner: Option<OwnerDto>,
}

#[derive(Debug, Deserialize)]
struct OwnerDto {
    login: String,
}

impl RepoDto {
    /// Builds a [`Repository`] for a known owner, as returned by
    /// `GET /repos/{owner}/{repo}`.
    fn into_repository(self, owner: &str) -> Repository {
        Repository {
            owner: owner.to_string(),
            name: self.name,
            archived: self.archived,
            fork: self.fork,
            default_branch: self.default_branch.unwrap_or_default(),
        }
    }

    /// Builds a [`Repository`] using the owner embedded in the payload, as
    /// returned by list endpoints.
    fn into_owned_repository(self) -> Repository {
        let owner = self.owner.map(|o| o.login).unwrap_or_default();
        Repository {
            owner,
            name: self.name,
            archived: self.archived,
            fork: self.fork,
            default_branch: self.default_branch.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PullDto {
    number: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    state: String,
    head: HeadDto,
}

#[derive(Debug, Deserialize)]
struct HeadDto {
    #[serde(rename = "ref")]
    r#ref: String,
}

impl PullDto {
    fn into_pull_request(self) -> PullRequest {
        PullRequest {
            number: self.number,
            title: self.title,
            head: self.head.r#ref,
            state: self.state,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefDto {
    object: RefObjectDto,
}

#[derive(Debug, Deserialize)]
struct RefObjectDto {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct InstallationDto {
    id: u64,
    #[serde(default)]
    account: Option<OwnerDto>,
}

#[derive(Debug, Deserialize)]
struct InstallationReposDto {
    repositories: Vec<RepoDto>,
}

#[derive(Debug, Deserialize)]
struct PropertyValueDto {
    property_name: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl PropertyValueDto {
    fn into_value(self) -> CustomPropertyValue {
        let value = match self.value {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        CustomPropertyValue {
            property_name: self.property_name,
            value,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateRefBody {
    r#ref: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutFileBody {
    message: String,
    content: String,
    branch: String,
}

#[derive(Debug, Serialize)]
struct CreatePullBody {
    title: String,
    body: String,
    head: String,
    base: String,
}

#[derive(Debug, Serialize)]
struct PropertiesPatchBody {
    properties: Vec<PropertyValueOut>,
}

#[derive(Debug, Serialize)]
struct PropertyValueOut {
    property_name: String,
    value: String,
}
