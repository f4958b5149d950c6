//! In-process mock of the GitHub REST API for integration tests.
//!
//! Tests drive the real [`GitHubClient`] against an axum server bound to an
//! ephemeral port. The mock serves one repository (`acme/svc`) described by
//! [`MockState`] and records every write so tests can assert on effects.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};

use repo_guardian::config::PropertiesMode;
use repo_guardian::metrics::Metrics;
use repo_guardian::rules::{Registry, TemplateStore, DEFAULT_RULES};
use repo_guardian::{Engine, GitHubClient};

pub type Shared = Arc<Mutex<MockState>>;

/// An open pull request served by the mock.
#[derive(Debug, Clone)]
pub struct MockPull {
    pub number: u64,
    pub title: String,
    pub head: String,
}

/// A repository listed by the mock installation endpoints.
#[derive(Debug, Clone)]
pub struct MockRepo {
    pub owner: String,
    pub name: String,
    pub archived: bool,
    pub fork: bool,
    pub default_branch: String,
}

/// A recorded file write.
#[derive(Debug, Clone)]
pub struct FilePut {
    pub branch: String,
    pub path: String,
    pub message: String,
    pub content: String,
}

/// A recorded pull request creation.
#[derive(Debug, Clone)]
pub struct CreatedPull {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// The single mock repository plus recorded write effects.
#[derive(Debug, Default)]
pub struct MockState {
    pub archived: bool,
    pub fork: bool,
    pub default_branch: String,
    /// Branch name to tip SHA.
    pub branches: HashMap<String, String>,
    /// Paths that exist on the default branch.
    pub existing_files: HashSet<String>,
    /// Paths with readable raw content (e.g. catalog manifests).
    pub raw_files: HashMap<String, String>,
    pub pulls: Vec<MockPull>,
    pub properties: Vec<(String, String)>,

    pub installations: Vec<u64>,
    pub installation_repos: Vec<MockRepo>,

    pub created_refs: Vec<(String, String)>,
    pub deleted_refs: Vec<String>,
    pub file_puts: Vec<FilePut>,
    pub created_pulls: Vec<CreatedPull>,
    pub property_patches: Vec<Vec<(String, String)>>,
    pub minted_tokens: usize,
}

impl MockState {
    /// A healthy repository with the given default branch at the given tip.
    pub fn repo(default_branch: &str, tip_sha: &str) -> Self {
        let mut state = Self {
            default_branch: default_branch.to_string(),
            ..Self::default()
        };
        state
            .branches
            .insert(default_branch.to_string(), tip_sha.to_string());
        state
    }

    pub fn with_file(mut self, path: &str) -> Self {
        self.existing_files.insert(path.to_string());
        self
    }

    pub fn with_raw_file(mut self, path: &str, content: &str) -> Self {
        self.existing_files.insert(path.to_string());
        self.raw_files.insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_pull(mut self, number: u64, title: &str, head: &str) -> Self {
        self.pulls.push(MockPull {
            number,
            title: title.to_string(),
            head: head.to_string(),
        });
        self
    }

    pub fn with_branch(mut self, name: &str, sha: &str) -> Self {
        self.branches.insert(name.to_string(), sha.to_string());
        self
    }

    pub fn with_property(mut self, name: &str, value: &str) -> Self {
        self.properties.push((name.to_string(), value.to_string()));
        self
    }

    /// True when no write of any kind was recorded.
    pub fn no_writes(&self) -> bool {
        self.created_refs.is_empty()
            && self.deleted_refs.is_empty()
            && self.file_puts.is_empty()
            && self.created_pulls.is_empty()
            && self.property_patches.is_empty()
    }
}

/// Starts the mock server, returning its base URL and shared state.
pub async fn start_mock(state: MockState) -> (String, Shared) {
    let shared: Shared = Arc::new(Mutex::new(state));
    let router = mock_router(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });

    (format!("http://{addr}"), shared)
}

/// A fresh metrics registry per test.
pub fn test_metrics() -> Arc<Metrics> {
    let registry = prometheus::Registry::new();
    Arc::new(Metrics::new(&registry).expect("metrics registration"))
}

/// A client pointed at the mock with a fixed token.
pub fn client_for(base_url: &str, metrics: Arc<Metrics>) -> GitHubClient {
    GitHubClient::with_token(base_url, "test-token", 0.10, metrics).expect("client construction")
}

/// An engine with the default rules and embedded templates.
pub fn engine_with(metrics: Arc<Metrics>, dry_run: bool, mode: PropertiesMode) -> Engine {
    let mut templates = TemplateStore::new();
    templates
        .load(std::path::Path::new("/nonexistent/templates"))
        .expect("embedded templates");

    Engine::new(
        Registry::new(DEFAULT_RULES),
        templates,
        metrics,
        true,
        true,
        dry_run,
        mode,
    )
}

/// A valid Backstage Component manifest. Annotation values are quoted so
/// empty strings stay strings instead of YAML nulls.
pub fn catalog_manifest(owner: &str, component: &str, project: &str, label: &str) -> String {
    format!(
        "apiVersion: backstage.io/v1alpha1\n\
         kind: Component\n\
         metadata:\n\
         \x20 name: {component}\n\
         \x20 annotations:\n\
         \x20   jira/project-key: \"{project}\"\n\
         \x20   jira/label: \"{label}\"\n\
         spec:\n\
         \x20 owner: {owner}\n"
    )
}

fn mock_router(state: Shared) -> Router {
    Router::new()
        .route("/repos/{owner}/{repo}", get(get_repo))
        .route("/repos/{owner}/{repo}/pulls", get(list_pulls).post(create_pull))
        .route(
            "/repos/{owner}/{repo}/contents/{*path}",
            get(get_contents).put(put_contents),
        )
        .route("/repos/{owner}/{repo}/git/ref/{*r}", get(get_ref))
        .route("/repos/{owner}/{repo}/git/refs", post(create_ref))
        .route(
            "/repos/{owner}/{repo}/git/refs/{*r}",
            axum::routing::delete(delete_ref),
        )
        .route(
            "/repos/{owner}/{repo}/properties/values",
            get(get_properties).patch(patch_properties),
        )
        .route("/app/installations", get(list_installations))
        .route(
            "/app/installations/{id}/access_tokens",
            post(create_access_token),
        )
        .route("/installation/repositories", get(list_installation_repos))
        .with_state(state)
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"message": "Not Found"}))).into_response()
}

async fn get_repo(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock();
    Json(json!({
        "name": "svc",
        "archived": s.archived,
        "fork": s.fork,
        "default_branch": s.default_branch,
        "owner": {"login": "acme"}
    }))
}

async fn list_pulls(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock();
    let pulls: Vec<Value> = s
        .pulls
        .iter()
        .map(|pr| {
            json!({
                "number": pr.number,
                "title": pr.title,
                "state": "open",
                "head": {"ref": pr.head}
            })
        })
        .collect();
    Json(Value::Array(pulls))
}

#[derive(Deserialize)]
struct CreatePullBody {
    title: String,
    body: String,
    head: String,
    base: String,
}

async fn create_pull(
    State(state): State<Shared>,
    Json(body): Json<CreatePullBody>,
) -> Response {
    let mut s = state.lock();
    let number = 100 + s.created_pulls.len() as u64;

    s.created_pulls.push(CreatedPull {
        title: body.title.clone(),
        head: body.head.clone(),
        base: body.base.clone(),
        body: body.body.clone(),
    });
    s.pulls.push(MockPull {
        number,
        title: body.title.clone(),
        head: body.head.clone(),
    });

    (
        StatusCode::CREATED,
        Json(json!({
            "number": number,
            "title": body.title,
            "state": "open",
            "head": {"ref": body.head}
        })),
    )
        .into_response()
}

async fn get_contents(
    State(state): State<Shared>,
    Path((_owner, _repo, path)): Path<(String, String, String)>,
) -> Response {
    let s = state.lock();

    if let Some(content) = s.raw_files.get(&path) {
        return (StatusCode::OK, content.clone()).into_response();
    }

    if s.existing_files.contains(&path) {
        return (StatusCode::OK, Json(json!({"path": path}))).into_response();
    }

    not_found()
}

#[derive(Deserialize)]
struct PutFileBody {
    message: String,
    content: String,
    branch: String,
}

async fn put_contents(
    State(state): State<Shared>,
    Path((_owner, _repo, path)): Path<(String, String, String)>,
    Json(body): Json<PutFileBody>,
) -> Response {
    let decoded = BASE64
        .decode(body.content.as_bytes())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default();

    state.lock().file_puts.push(FilePut {
        branch: body.branch,
        path,
        message: body.message,
        content: decoded,
    });

    (StatusCode::CREATED, Json(json!({"content": {}}))).into_response()
}

async fn get_ref(
    State(state): State<Shared>,
    Path((_owner, _repo, r)): Path<(String, String, String)>,
) -> Response {
    let branch = r.strip_prefix("heads/").unwrap_or(&r);
    let s = state.lock();

    match s.branches.get(branch) {
        Some(sha) => (
            StatusCode::OK,
            Json(json!({
                "ref": format!("refs/heads/{branch}"),
                "object": {"sha": sha, "type": "commit"}
            })),
        )
            .into_response(),
        None => not_found(),
    }
}

#[derive(Deserialize)]
struct CreateRefBody {
    #[serde(rename = "ref")]
    r#ref: String,
    sha: String,
}

async fn create_ref(
    State(state): State<Shared>,
    Json(body): Json<CreateRefBody>,
) -> Response {
    let mut s = state.lock();

    let branch = body.r#ref.strip_prefix("refs/heads/").unwrap_or(&body.r#ref);
    s.branches.insert(branch.to_string(), body.sha.clone());
    s.created_refs.push((body.r#ref.clone(), body.sha.clone()));

    (
        StatusCode::CREATED,
        Json(json!({"ref": body.r#ref, "object": {"sha": body.sha}})),
    )
        .into_response()
}

async fn delete_ref(
    State(state): State<Shared>,
    Path((_owner, _repo, r)): Path<(String, String, String)>,
) -> StatusCode {
    let mut s = state.lock();

    let branch = r.strip_prefix("heads/").unwrap_or(&r).to_string();
    s.branches.remove(&branch);
    s.deleted_refs.push(r);

    StatusCode::NO_CONTENT
}

async fn get_properties(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock();
    let values: Vec<Value> = s
        .properties
        .iter()
        .map(|(name, value)| json!({"property_name": name, "value": value}))
        .collect();
    Json(Value::Array(values))
}

#[derive(Deserialize)]
struct PropertiesPatchBody {
    properties: Vec<PropertyValueBody>,
}

#[derive(Deserialize)]
struct PropertyValueBody {
    property_name: String,
    value: String,
}

async fn patch_properties(
    State(state): State<Shared>,
    Json(body): Json<PropertiesPatchBody>,
) -> StatusCode {
    let patch: Vec<(String, String)> = body
        .properties
        .into_iter()
        .map(|p| (p.property_name, p.value))
        .collect();

    state.lock().property_patches.push(patch);
    StatusCode::NO_CONTENT
}

async fn list_installations(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock();
    let installations: Vec<Value> = s
        .installations
        .iter()
        .map(|id| json!({"id": id, "account": {"login": "acme"}}))
        .collect();
    Json(Value::Array(installations))
}

async fn create_access_token(State(state): State<Shared>) -> Json<Value> {
    state.lock().minted_tokens += 1;
    let expires_at = Utc::now() + ChronoDuration::seconds(3600);

    Json(json!({
        "token": "ghs_mock_token",
        "expires_at": expires_at.to_rfc3339()
    }))
}

async fn list_installation_repos(State(state): State<Shared>) -> Json<Value> {
    let s = state.lock();
    let repos: Vec<Value> = s
        .installation_repos
        .iter()
        .map(|repo| {
            json!({
                "name": repo.name,
                "archived": repo.archived,
                "fork": repo.fork,
                "default_branch": repo.default_branch,
                "owner": {"login": repo.owner}
            })
        })
        .collect();

    Json(json!({
        "total_count": repos.len(),
        "repositories": repos
    }))
}
