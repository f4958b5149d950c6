//! The per-repository reconciliation engine.
//!
//! `check_repo` evaluates one repository against the rule registry and, for
//! any missing files, creates or refreshes a single proposal branch and
//! pull request. Idempotency comes from the deterministic branch name: the
//! branch either carries an open PR (reuse), or is stale from a previously
//! closed PR (delete and rebuild).

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::PropertiesMode;
use crate::github::{GitHubClient, GitHubError, PullRequest, Repository};
use crate::metrics::Metrics;
use crate::rules::{FileRule, Registry, TemplateError, TemplateStore};

/// The deterministic branch name for missing-file proposals.
pub const BRANCH_NAME: &str = "repo-guardian/add-missing-files";

/// The title used for missing-file pull requests.
pub const PR_TITLE: &str = "chore: add missing repo configuration files";

/// Errors that can occur while checking a repository.
#[derive(Debug, Error)]
pub enum EngineError {
    /// GitHub API failure.
    #[error(transparent)]
    GitHub(#[from] GitHubError),

    /// A rule referenced a template that is not in the store.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// The default branch resolved to no commit SHA.
    #[error("default branch {branch:?} has no commit sha")]
    EmptyDefaultBranch { branch: String },
}

/// The core checker that evaluates repositories against the rule registry
/// and creates PRs for missing files and out-of-sync metadata.
pub struct Engine {
    pub(super) registry: Registry,
    pub(super) templates: TemplateStore,
    pub(super) metrics: Arc<Metrics>,
    pub(super) skip_forks: bool,
    pub(super) skip_archived: bool,
    pub(super) dry_run: bool,
    pub(super) properties_mode: PropertiesMode,
}

impl Engine {
    /// Creates a new engine.
    #[must_use]
    pub fn new(
        registry: Registry,
        templates: TemplateStore,
        metrics: Arc<Metrics>,
        skip_forks: bool,
        skip_archived: bool,
        dry_run: bool,
        properties_mode: PropertiesMode,
    ) -> Self {
        Self {
            registry,
            templates,
            metrics,
            skip_forks,
            skip_archived,
            dry_run,
            properties_mode,
        }
    }

    /// Returns the metrics handle shared with this engine.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Evaluates a single repository against all enabled rules, creating a
    /// PR if any required files are missing, then reconciles custom
    /// properties when a mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error when repository metadata, PR listing, or file-rule
    /// reconciliation fails. Metadata reconciliation failures are logged
    /// and swallowed so the file-rule outcome stays committed.
    pub async fn check_repo(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
    ) -> Result<(), EngineError> {
        let span = info_span!("check_repo", owner = %owner, repo = %repo);

        async move {
            let repo_info = client.get_repository(owner, repo).await?;

            // Authoritative skip checks. The scheduler pre-filters as an
            // optimization, but the engine is the single source of truth.
            if let Some(reason) = self.should_skip(&repo_info) {
                info!("{reason}");
                return Ok(());
            }

            let open_prs = client.list_open_pulls(owner, repo).await?;

            let missing = self
                .find_missing_files(client, owner, repo, &open_prs)
                .await?;

            if missing.is_empty() {
                info!("all required files present");
            } else if self.dry_run {
                info!(missing_files = ?rule_names(&missing), "dry run: would create PR");
            } else {
                self.create_or_update_pr(
                    client,
                    owner,
                    repo,
                    &repo_info.default_branch,
                    &missing,
                    &open_prs,
                )
                .await?;
            }

            if self.properties_mode != PropertiesMode::Disabled {
                if let Err(e) = self
                    .check_custom_properties(
                        client,
                        owner,
                        repo,
                        &repo_info.default_branch,
                        &open_prs,
                    )
                    .await
                {
                    error!(error = %e, "custom properties check failed");
                }
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Returns the skip reason if the repository should not be processed.
    fn should_skip(&self, repo: &Repository) -> Option<&'static str> {
        if self.skip_archived && repo.archived {
            return Some("skipping archived repository");
        }

        if self.skip_forks && repo.fork {
            return Some("skipping forked repository");
        }

        if repo.default_branch.is_empty() {
            return Some("skipping empty repository with no default branch");
        }

        None
    }

    /// Checks each enabled rule and returns the rules whose files are
    /// missing and not already addressed by a third-party PR.
    async fn find_missing_files(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        open_prs: &[PullRequest],
    ) -> Result<Vec<FileRule>, EngineError> {
        let enabled = self.registry.enabled_rules();
        let mut missing = Vec::with_capacity(enabled.len());

        for rule in enabled {
            if any_path_exists(client, owner, repo, &rule).await? {
                debug!(rule = rule.name, "file exists, skipping rule");
                continue;
            }

            if has_existing_pr(open_prs, &rule) {
                info!(rule = rule.name, "existing PR found, skipping rule");
                continue;
            }

            info!(rule = rule.name, "file missing, will add to PR");
            self.metrics.file_missing(rule.name);
            missing.push(rule);
        }

        Ok(missing)
    }

    /// Creates the proposal branch and PR, or refreshes an existing one.
    async fn create_or_update_pr(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        default_branch: &str,
        missing: &[FileRule],
        open_prs: &[PullRequest],
    ) -> Result<(), EngineError> {
        let mut branch_sha = client.get_branch_sha(owner, repo, BRANCH_NAME).await?;
        let existing_pr = find_pr_with_head(open_prs, BRANCH_NAME);

        // Branch without an open PR is left over from a previously closed
        // PR; rebuild from the current default-branch tip.
        if !branch_sha.is_empty() && existing_pr.is_none() {
            info!("deleting stale branch from previously closed PR");
            client.delete_branch(owner, repo, BRANCH_NAME).await?;
            branch_sha = String::new();
        }

        let base_sha = client.get_branch_sha(owner, repo, default_branch).await?;
        if base_sha.is_empty() {
            return Err(EngineError::EmptyDefaultBranch {
                branch: default_branch.to_string(),
            });
        }

        if branch_sha.is_empty() {
            client
                .create_branch(owner, repo, BRANCH_NAME, &base_sha)
                .await?;
            info!(branch = BRANCH_NAME, "created branch");
        }

        for rule in missing {
            let content = self.templates.get(rule.template_name)?;
            let message = format!("chore: add {}", rule.target_path);

            client
                .create_or_update_file(owner, repo, BRANCH_NAME, rule.target_path, content, &message)
                .await?;
            info!(path = rule.target_path, "added file");
        }

        match existing_pr {
            None => {
                let body = build_pr_body(missing);
                let pr = client
                    .create_pull_request(owner, repo, PR_TITLE, &body, BRANCH_NAME, default_branch)
                    .await?;

                self.metrics.pr_created();
                info!(pr_number = pr.number, "created PR");
            }
            Some(pr) => {
                // The fresh file commits effectively update the open PR.
                self.metrics.pr_updated();
                info!(pr_number = pr.number, "updated existing PR");
            }
        }

        Ok(())
    }
}

/// Whether any of the rule's candidate paths exists in the repository.
async fn any_path_exists(
    client: &GitHubClient,
    owner: &str,
    repo: &str,
    rule: &FileRule,
) -> Result<bool, EngineError> {
    for path in rule.paths {
        if client.file_exists(owner, repo, path).await? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Whether an open PR already addresses the rule, judged by a
/// case-insensitive substring match of the rule's search terms against PR
/// titles and head branches.
fn has_existing_pr(open_prs: &[PullRequest], rule: &FileRule) -> bool {
    open_prs.iter().any(|pr| {
        let title = pr.title.to_lowercase();
        let head = pr.head.to_lowercase();

        rule.pr_search_terms.iter().any(|term| {
            let term = term.to_lowercase();
            title.contains(&term) || head.contains(&term)
        })
    })
}

/// Finds an open PR whose head branch matches the given name.
pub(super) fn find_pr_with_head<'a>(
    open_prs: &'a [PullRequest],
    head: &str,
) -> Option<&'a PullRequest> {
    open_prs.iter().find(|pr| pr.head == head)
}

/// Generates the PR body markdown for the given missing rules.
fn build_pr_body(missing: &[FileRule]) -> String {
    let mut body = String::new();

    body.push_str("## Repo Guardian — Missing Configuration Files\n\n");
    body.push_str("This PR was automatically created by **repo-guardian** because the following\n");
    body.push_str("required configuration files were not found in this repository:\n\n");
    body.push_str("### Added Files\n\n");

    for rule in missing {
        body.push_str(&format!("- `{}` — {}\n", rule.target_path, rule.name));
    }

    body.push_str("\n> **Note:** The CODEOWNERS file contains a placeholder (`@org/CHANGEME`).\n");
    body.push_str("> Please replace it with your actual team before merging.\n\n");
    body.push_str("### What to do\n\n");
    body.push_str("1. Review the default file contents and adjust for your team's needs.\n");
    body.push_str("2. Merge when ready — these are sensible defaults, not one-size-fits-all.\n\n");
    body.push_str("---\n");
    body.push_str("*Automated by [repo-guardian](https://github.com/apps/repo-guardian). ");
    body.push_str("Questions? Reach out in #platform-engineering.*\n");

    body
}

fn rule_names(rules: &[FileRule]) -> Vec<&'static str> {
    rules.iter().map(|r| r.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::DEFAULT_RULES;

    fn open_pr(title: &str, head: &str) -> PullRequest {
        PullRequest {
            number: 1,
            title: title.to_string(),
            head: head.to_string(),
            state: "open".to_string(),
        }
    }

    fn codeowners_rule() -> FileRule {
        Registry::new(DEFAULT_RULES).rule_by_name("CODEOWNERS").unwrap()
    }

    #[test]
    fn detects_third_party_pr_by_title() {
        let prs = vec![open_pr("Add CODEOWNERS file", "some-branch")];
        assert!(has_existing_pr(&prs, &codeowners_rule()));
    }

    #[test]
    fn detects_third_party_pr_by_head_branch() {
        let prs = vec![open_pr("misc changes", "add-codeowners")];
        assert!(has_existing_pr(&prs, &codeowners_rule()));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let prs = vec![open_pr("ADD CODEOWNERS", "x")];
        assert!(has_existing_pr(&prs, &codeowners_rule()));
    }

    #[test]
    fn unrelated_prs_do_not_match() {
        let prs = vec![open_pr("Bump serde to 1.0.200", "dep-bump")];
        assert!(!has_existing_pr(&prs, &codeowners_rule()));
    }

    #[test]
    fn finds_our_pr_by_exact_head() {
        let prs = vec![
            open_pr("something else", "feature/x"),
            open_pr(PR_TITLE, BRANCH_NAME),
        ];

        let found = find_pr_with_head(&prs, BRANCH_NAME).unwrap();
        assert_eq!(found.head, BRANCH_NAME);
        assert!(find_pr_with_head(&prs, "repo-guardian/other").is_none());
    }

    #[test]
    fn pr_body_lists_rules_and_placeholder_note() {
        let registry = Registry::new(DEFAULT_RULES);
        let missing = registry.enabled_rules();
        let body = build_pr_body(&missing);

        assert!(body.contains("`.github/CODEOWNERS` — CODEOWNERS"));
        assert!(body.contains("`.github/dependabot.yml` — Dependabot"));
        assert!(body.contains("@org/CHANGEME"));
    }

    #[test]
    fn skip_gate_honors_flags() {
        let metrics = Arc::new(
            Metrics::new(&prometheus::Registry::new()).unwrap(),
        );
        let engine = Engine::new(
            Registry::new(DEFAULT_RULES),
            TemplateStore::new(),
            metrics,
            true,
            true,
            false,
            PropertiesMode::Disabled,
        );

        let base = Repository {
            owner: "acme".to_string(),
            name: "svc".to_string(),
            archived: false,
            fork: false,
            default_branch: "main".to_string(),
        };

        assert_eq!(engine.should_skip(&base), None);

        let archived = Repository {
            archived: true,
            ..base.clone()
        };
        assert_eq!(
            engine.should_skip(&archived),
            Some("skipping archived repository")
        );

        let fork = Repository {
            fork: true,
            ..base.clone()
        };
        assert_eq!(
            engine.should_skip(&fork),
            Some("skipping forked repository")
        );

        let empty = Repository {
            default_branch: String::new(),
            ..base
        };
        assert_eq!(
            engine.should_skip(&empty),
            Some("skipping empty repository with no default branch")
        );
    }
}
