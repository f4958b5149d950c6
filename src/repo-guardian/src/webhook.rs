//! GitHub webhook fan-in.
//!
//! A single endpoint receives signed App events, verifies the HMAC-SHA256
//! signature with a constant-time comparison, and turns repository
//! lifecycle events into queue jobs. Enqueue failures are logged but the
//! handler still acknowledges the delivery; the weekly reconciliation
//! sweep is the safety net.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::checker::{Queue, RepoJob, Trigger};
use crate::metrics::Metrics;
use crate::server::AppState;

/// Header carrying the HMAC-SHA256 payload signature.
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Header carrying the event type.
const EVENT_HEADER: &str = "x-github-event";

type HmacSha256 = Hmac<Sha256>;

/// Webhook handler state: the shared secret and the queue to feed.
pub struct Handler {
    secret: Vec<u8>,
    queue: Arc<Queue>,
    metrics: Arc<Metrics>,
}

impl Handler {
    /// Creates a new webhook handler.
    #[must_use]
    pub fn new(secret: &str, queue: Arc<Queue>, metrics: Arc<Metrics>) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            queue,
            metrics,
        }
    }
}

/// The axum handler for `POST /webhooks/github`.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let handler = &state.webhook;

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !verify_signature(&handler.secret, &body, signature) {
        warn!("invalid webhook payload signature");
        return (StatusCode::UNAUTHORIZED, "invalid payload").into_response();
    }

    let event_type = headers
        .get(EVENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if event_type.is_empty() {
        warn!("webhook without event type header");
        return (StatusCode::BAD_REQUEST, "bad request").into_response();
    }

    let payload: EventPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, event_type, "failed to parse webhook payload");
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        }
    };

    handler.metrics.webhook_received(event_type);

    match dispatch(event_type, &payload) {
        Dispatch::Handled(jobs) => {
            for job in jobs {
                info!(
                    owner = %job.owner,
                    repo = %job.repo,
                    installation_id = job.installation_id,
                    event_type,
                    "webhook enqueuing repository check"
                );

                if let Err(e) = handler.queue.enqueue(job.clone()) {
                    // The event has been received; the next sweep covers it.
                    error!(
                        owner = %job.owner,
                        repo = %job.repo,
                        error = %e,
                        "failed to enqueue job"
                    );
                }
            }

            StatusCode::OK.into_response()
        }
        Dispatch::Unhandled => {
            debug!(event_type, "ignoring unhandled event type");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Verifies a `sha256=<hex>` signature header against the payload using a
/// constant-time comparison.
fn verify_signature(secret: &[u8], body: &[u8], signature_header: &str) -> bool {
    let Some(hex_signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(signature) = hex::decode(hex_signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };

    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// The subset of GitHub event payloads the fan-in inspects.
#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    action: String,
    #[serde(default)]
    repository: Option<RepoRef>,
    #[serde(default)]
    installation: Option<InstallationRef>,
    #[serde(default)]
    repositories_added: Vec<RepoRef>,
    #[serde(default)]
    repositories: Vec<RepoRef>,
}

#[derive(Debug, Deserialize)]
struct RepoRef {
    #[serde(default)]
    name: String,
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    owner: Option<OwnerRef>,
}

#[derive(Debug, Deserialize)]
struct OwnerRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct InstallationRef {
    id: u64,
}

enum Dispatch {
    /// A handled event with the jobs to enqueue (possibly none when the
    /// action is not one we act on).
    Handled(Vec<RepoJob>),
    /// An event type the agent does not process.
    Unhandled,
}

/// Maps an event to the repository jobs it implies.
fn dispatch(event_type: &str, payload: &EventPayload) -> Dispatch {
    let installation_id = payload.installation.as_ref().map(|i| i.id).unwrap_or(0);

    match event_type {
        "repository" => {
            if payload.action != "created" {
                debug!(action = %payload.action, "ignoring repository event");
                return Dispatch::Handled(Vec::new());
            }

            let jobs = payload
                .repository
                .iter()
                .map(|repo| job(repo_owner(repo), &repo.name, installation_id))
                .collect();

            Dispatch::Handled(jobs)
        }
        "installation_repositories" => {
            if payload.action != "added" {
                debug!(action = %payload.action, "ignoring installation_repositories event");
                return Dispatch::Handled(Vec::new());
            }

            let jobs = payload
                .repositories_added
                .iter()
                .map(|repo| job(extract_owner(&repo.full_name), &repo.name, installation_id))
                .collect();

            Dispatch::Handled(jobs)
        }
        "installation" => {
            if payload.action != "created" {
                debug!(action = %payload.action, "ignoring installation event");
                return Dispatch::Handled(Vec::new());
            }

            let jobs = payload
                .repositories
                .iter()
                .map(|repo| job(extract_owner(&repo.full_name), &repo.name, installation_id))
                .collect();

            Dispatch::Handled(jobs)
        }
        _ => Dispatch::Unhandled,
    }
}

fn job(owner: &str, repo: &str, installation_id: u64) -> RepoJob {
    RepoJob {
        owner: owner.to_string(),
        repo: repo.to_string(),
        installation_id,
        trigger: Trigger::Webhook,
    }
}

/// Owner login for a full repository payload, falling back to the
/// `full_name` prefix.
fn repo_owner(repo: &RepoRef) -> &str {
    repo.owner
        .as_ref()
        .map(|o| o.login.as_str())
        .unwrap_or_else(|| extract_owner(&repo.full_name))
}

/// Gets the owner from an `owner/repo` full name string.
fn extract_owner(full_name: &str) -> &str {
    full_name.split('/').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compute_signature(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let body = br#"{"action":"created"}"#;
        let signature = compute_signature("s3cret", body);

        assert!(verify_signature(b"s3cret", body, &signature));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = br#"{"action":"created"}"#;
        let signature = compute_signature("other-secret", body);

        assert!(!verify_signature(b"s3cret", body, &signature));
    }

    #[test]
    fn rejects_malformed_signature_headers() {
        let body = b"{}";

        assert!(!verify_signature(b"s3cret", body, ""));
        assert!(!verify_signature(b"s3cret", body, "sha1=abcd"));
        assert!(!verify_signature(b"s3cret", body, "sha256=nothex"));
    }

    fn parse(json: &str) -> EventPayload {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn repository_created_enqueues_one_job() {
        let payload = parse(
            r#"{
                "action": "created",
                "repository": {
                    "name": "new-service",
                    "full_name": "acme/new-service",
                    "owner": {"login": "acme"}
                },
                "installation": {"id": 42}
            }"#,
        );

        let Dispatch::Handled(jobs) = dispatch("repository", &payload) else {
            panic!("expected handled event");
        };

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].owner, "acme");
        assert_eq!(jobs[0].repo, "new-service");
        assert_eq!(jobs[0].installation_id, 42);
        assert_eq!(jobs[0].trigger, Trigger::Webhook);
    }

    #[test]
    fn repository_deleted_is_acknowledged_without_jobs() {
        let payload = parse(r#"{"action": "deleted"}"#);

        let Dispatch::Handled(jobs) = dispatch("repository", &payload) else {
            panic!("expected handled event");
        };
        assert!(jobs.is_empty());
    }

    #[test]
    fn installation_repositories_added_fans_out() {
        let payload = parse(
            r#"{
                "action": "added",
                "installation": {"id": 7},
                "repositories_added": [
                    {"name": "a", "full_name": "acme/a"},
                    {"name": "b", "full_name": "acme/b"}
                ]
            }"#,
        );

        let Dispatch::Handled(jobs) = dispatch("installation_repositories", &payload) else {
            panic!("expected handled event");
        };

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].owner, "acme");
        assert_eq!(jobs[1].repo, "b");
    }

    #[test]
    fn installation_created_enqueues_each_repository() {
        let payload = parse(
            r#"{
                "action": "created",
                "installation": {"id": 9},
                "repositories": [
                    {"name": "one", "full_name": "org/one"}
                ]
            }"#,
        );

        let Dispatch::Handled(jobs) = dispatch("installation", &payload) else {
            panic!("expected handled event");
        };

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].installation_id, 9);
    }

    #[test]
    fn unknown_event_types_are_unhandled() {
        let payload = parse(r#"{"action": "completed"}"#);
        assert!(matches!(
            dispatch("workflow_run", &payload),
            Dispatch::Unhandled
        ));
        assert!(matches!(dispatch("push", &payload), Dispatch::Unhandled));
    }

    #[test]
    fn extracts_owner_from_full_name() {
        assert_eq!(extract_owner("acme/widget"), "acme");
        assert_eq!(extract_owner("no-slash"), "no-slash");
        assert_eq!(extract_owner(""), "");
    }
}
