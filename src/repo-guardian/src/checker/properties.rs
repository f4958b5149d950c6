//! Custom-property reconciliation.
//!
//! Reads the repository's catalog manifest, diffs the desired property
//! values against what is currently set, and closes the gap in one of two
//! modes: `github-action` proposes a one-shot workflow PR that sets the
//! properties on merge; `api` writes them directly and, when the catalog
//! manifest is missing, proposes one.

use tracing::info;

use crate::catalog::{self, Properties};
use crate::github::{CustomPropertyValue, GitHubClient, PullRequest};
use crate::rules::render;

use super::engine::{find_pr_with_head, Engine, EngineError};
use crate::config::PropertiesMode;

/// Branch used for custom-property workflow PRs (`github-action` mode).
pub const PROPERTIES_BRANCH_NAME: &str = "repo-guardian/set-custom-properties";

/// Branch used for catalog manifest PRs (`api` mode).
pub const CATALOG_INFO_BRANCH_NAME: &str = "repo-guardian/add-catalog-info";

/// PR title for custom-property workflow proposals.
pub const PROPERTIES_PR_TITLE: &str = "chore: set repository custom properties";

/// PR title for catalog manifest proposals.
pub const CATALOG_INFO_PR_TITLE: &str = "chore: add catalog-info.yaml";

/// Where the one-shot workflow is committed in `github-action` mode.
const WORKFLOW_PATH: &str = ".github/workflows/set-custom-properties.yml";

impl Engine {
    /// Reads the repo's catalog manifest, extracts desired custom property
    /// values, and either creates a PR (`github-action` mode) or sets them
    /// directly via the API (`api` mode).
    ///
    /// # Errors
    ///
    /// Returns an error on GitHub API or template failures. The caller
    /// logs and swallows these so the file-rule outcome is preserved.
    pub(super) async fn check_custom_properties(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        default_branch: &str,
        open_prs: &[PullRequest],
    ) -> Result<(), EngineError> {
        self.metrics.properties_checked();

        // Try catalog-info.yaml first, then the .yml spelling.
        let mut content = client.read_file(owner, repo, "catalog-info.yaml").await?;
        if content.is_empty() {
            content = client.read_file(owner, repo, "catalog-info.yml").await?;
        }

        let catalog_found = !content.is_empty();

        // Unclassified defaults when empty or invalid.
        let desired = catalog::parse(&content);

        let current = client.get_custom_property_values(owner, repo).await?;

        if !needs_update(&desired, &current) {
            info!("custom properties already correct");
            self.metrics.properties_already_correct();
            return Ok(());
        }

        info!(
            desired_owner = %desired.owner,
            desired_component = %desired.component,
            catalog_found,
            "custom properties need update"
        );

        match self.properties_mode {
            PropertiesMode::GithubAction => {
                self.propose_properties_workflow(client, owner, repo, default_branch, &desired, open_prs)
                    .await
            }
            PropertiesMode::Api => {
                self.write_properties(client, owner, repo, default_branch, &desired, catalog_found, open_prs)
                    .await
            }
            PropertiesMode::Disabled => Ok(()),
        }
    }

    /// `github-action` mode: propose a one-shot workflow PR that sets the
    /// properties when merged.
    async fn propose_properties_workflow(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        default_branch: &str,
        desired: &Properties,
        open_prs: &[PullRequest],
    ) -> Result<(), EngineError> {
        if let Some(pr) = find_pr_with_head(open_prs, PROPERTIES_BRANCH_NAME) {
            info!(pr_number = pr.number, "properties PR already exists");
            return Ok(());
        }

        if self.dry_run {
            info!(
                owner_value = %desired.owner,
                component_value = %desired.component,
                "dry run: would create properties PR"
            );
            return Ok(());
        }

        self.cleanup_stale_branch(client, owner, repo, PROPERTIES_BRANCH_NAME)
            .await?;

        let template = self.templates.get("set-custom-properties")?;
        let rendered = render(
            template,
            &[
                ("OWNER_VALUE", desired.owner.as_str()),
                ("COMPONENT_VALUE", desired.component.as_str()),
                ("JIRA_PROJECT_VALUE", desired.jira_project.as_str()),
                ("JIRA_LABEL_VALUE", desired.jira_label.as_str()),
            ],
        );

        let base_sha = client.get_branch_sha(owner, repo, default_branch).await?;
        if base_sha.is_empty() {
            return Err(EngineError::EmptyDefaultBranch {
                branch: default_branch.to_string(),
            });
        }

        client
            .create_branch(owner, repo, PROPERTIES_BRANCH_NAME, &base_sha)
            .await?;

        client
            .create_or_update_file(
                owner,
                repo,
                PROPERTIES_BRANCH_NAME,
                WORKFLOW_PATH,
                &rendered,
                "chore: add workflow to set custom properties",
            )
            .await?;

        let body = build_workflow_pr_body(desired);
        let pr = client
            .create_pull_request(
                owner,
                repo,
                PROPERTIES_PR_TITLE,
                &body,
                PROPERTIES_BRANCH_NAME,
                default_branch,
            )
            .await?;

        self.metrics.properties_pr_created();
        info!(pr_number = pr.number, "created properties PR");

        Ok(())
    }

    /// `api` mode: write the desired values directly, and propose a catalog
    /// manifest when the repository has none.
    async fn write_properties(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        default_branch: &str,
        desired: &Properties,
        catalog_found: bool,
        open_prs: &[PullRequest],
    ) -> Result<(), EngineError> {
        if self.dry_run {
            info!(
                owner_value = %desired.owner,
                component_value = %desired.component,
                catalog_found,
                "dry run: would set custom properties via API"
            );
            return Ok(());
        }

        let values = desired_property_values(desired);
        client
            .set_custom_property_values(owner, repo, &values)
            .await?;

        self.metrics.properties_set();
        info!("set custom properties via API");

        if !catalog_found {
            return self
                .propose_catalog_info(client, owner, repo, default_branch, open_prs)
                .await;
        }

        Ok(())
    }

    /// Proposes a starter `catalog-info.yaml` so the next reconciliation
    /// cycle can pick up real values.
    async fn propose_catalog_info(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        default_branch: &str,
        open_prs: &[PullRequest],
    ) -> Result<(), EngineError> {
        if let Some(pr) = find_pr_with_head(open_prs, CATALOG_INFO_BRANCH_NAME) {
            info!(pr_number = pr.number, "catalog-info PR already exists");
            return Ok(());
        }

        self.cleanup_stale_branch(client, owner, repo, CATALOG_INFO_BRANCH_NAME)
            .await?;

        let template = self.templates.get("catalog-info")?;
        let rendered = render(template, &[("REPO_NAME", repo), ("ORG_NAME", owner)]);

        let base_sha = client.get_branch_sha(owner, repo, default_branch).await?;
        if base_sha.is_empty() {
            return Err(EngineError::EmptyDefaultBranch {
                branch: default_branch.to_string(),
            });
        }

        client
            .create_branch(owner, repo, CATALOG_INFO_BRANCH_NAME, &base_sha)
            .await?;

        client
            .create_or_update_file(
                owner,
                repo,
                CATALOG_INFO_BRANCH_NAME,
                "catalog-info.yaml",
                &rendered,
                "chore: add catalog-info.yaml",
            )
            .await?;

        let body = build_catalog_info_pr_body();
        let pr = client
            .create_pull_request(
                owner,
                repo,
                CATALOG_INFO_PR_TITLE,
                &body,
                CATALOG_INFO_BRANCH_NAME,
                default_branch,
            )
            .await?;

        self.metrics.properties_pr_created();
        info!(pr_number = pr.number, "created catalog-info PR");

        Ok(())
    }

    /// Deletes a branch that exists without an open PR, leaving the way
    /// clear for a fresh branch from the current default-branch tip.
    async fn cleanup_stale_branch(
        &self,
        client: &GitHubClient,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), EngineError> {
        let branch_sha = client.get_branch_sha(owner, repo, branch).await?;

        if !branch_sha.is_empty() {
            info!(branch, "deleting stale branch from previously closed PR");
            client.delete_branch(owner, repo, branch).await?;
        }

        Ok(())
    }
}

/// Whether any desired property differs from the current values. Jira
/// fields are only compared when the desired value is non-empty.
fn needs_update(desired: &Properties, current: &[CustomPropertyValue]) -> bool {
    let lookup = |name: &str| {
        current
            .iter()
            .find(|p| p.property_name == name)
            .map(|p| p.value.as_str())
            .unwrap_or("")
    };

    if lookup("Owner") != desired.owner {
        return true;
    }

    if lookup("Component") != desired.component {
        return true;
    }

    if !desired.jira_project.is_empty() && lookup("JiraProject") != desired.jira_project {
        return true;
    }

    if !desired.jira_label.is_empty() && lookup("JiraLabel") != desired.jira_label {
        return true;
    }

    false
}

/// Converts desired properties into the write payload. Owner and Component
/// are always included; Jira fields only when non-empty.
fn desired_property_values(desired: &Properties) -> Vec<CustomPropertyValue> {
    let mut values = vec![
        CustomPropertyValue {
            property_name: "Owner".to_string(),
            value: desired.owner.clone(),
        },
        CustomPropertyValue {
            property_name: "Component".to_string(),
            value: desired.component.clone(),
        },
    ];

    if !desired.jira_project.is_empty() {
        values.push(CustomPropertyValue {
            property_name: "JiraProject".to_string(),
            value: desired.jira_project.clone(),
        });
    }

    if !desired.jira_label.is_empty() {
        values.push(CustomPropertyValue {
            property_name: "JiraLabel".to_string(),
            value: desired.jira_label.clone(),
        });
    }

    values
}

fn build_workflow_pr_body(desired: &Properties) -> String {
    let mut body = String::new();

    body.push_str("## Repo Guardian — Set Custom Properties\n\n");
    body.push_str("This PR was automatically created by **repo-guardian** to set repository\n");
    body.push_str("custom properties via a GitHub Actions workflow.\n\n");
    body.push_str("### Properties to be set\n\n");
    body.push_str(&format!("- **Owner:** `{}`\n", desired.owner));
    body.push_str(&format!("- **Component:** `{}`\n", desired.component));

    if !desired.jira_project.is_empty() {
        body.push_str(&format!("- **JiraProject:** `{}`\n", desired.jira_project));
    }

    if !desired.jira_label.is_empty() {
        body.push_str(&format!("- **JiraLabel:** `{}`\n", desired.jira_label));
    }

    body.push_str("\n### What happens when merged\n\n");
    body.push_str("The included GitHub Actions workflow runs once on push to `main` and sets\n");
    body.push_str("the above custom properties on this repository. The workflow can be safely\n");
    body.push_str("deleted after it runs.\n\n");
    push_footer(&mut body);

    body
}

fn build_catalog_info_pr_body() -> String {
    let mut body = String::new();

    body.push_str("## Repo Guardian — Add catalog-info.yaml\n\n");
    body.push_str("This PR was automatically created by **repo-guardian** because this\n");
    body.push_str("repository is missing a `catalog-info.yaml` file.\n\n");
    body.push_str("### What to do\n\n");
    body.push_str("1. Fill in the `TODO` placeholders with your team's information.\n");
    body.push_str("2. Review and merge when ready.\n\n");
    body.push_str("Once merged, repo-guardian will read the file on the next reconciliation\n");
    body.push_str("cycle and update custom properties with the correct values.\n\n");
    push_footer(&mut body);

    body
}

fn push_footer(body: &mut String) {
    body.push_str("---\n");
    body.push_str("*Automated by [repo-guardian](https://github.com/apps/repo-guardian). ");
    body.push_str("Questions? Reach out in #platform-engineering.*\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current(values: &[(&str, &str)]) -> Vec<CustomPropertyValue> {
        values
            .iter()
            .map(|(name, value)| CustomPropertyValue {
                property_name: (*name).to_string(),
                value: (*value).to_string(),
            })
            .collect()
    }

    fn desired(owner: &str, component: &str, project: &str, label: &str) -> Properties {
        Properties {
            owner: owner.to_string(),
            component: component.to_string(),
            jira_project: project.to_string(),
            jira_label: label.to_string(),
        }
    }

    #[test]
    fn matching_properties_need_no_update() {
        let desired = desired("team-a", "svc", "PRJ", "svc");
        let current = current(&[
            ("Owner", "team-a"),
            ("Component", "svc"),
            ("JiraProject", "PRJ"),
            ("JiraLabel", "svc"),
        ]);

        assert!(!needs_update(&desired, &current));
    }

    #[test]
    fn owner_mismatch_needs_update() {
        let desired = desired("team-b", "svc", "", "");
        let current = current(&[("Owner", "team-a"), ("Component", "svc")]);

        assert!(needs_update(&desired, &current));
    }

    #[test]
    fn empty_desired_jira_fields_are_ignored() {
        let desired = desired("team-a", "svc", "", "");
        let current = current(&[
            ("Owner", "team-a"),
            ("Component", "svc"),
            ("JiraProject", "LEGACY"),
            ("JiraLabel", "old-label"),
        ]);

        assert!(!needs_update(&desired, &current));
    }

    #[test]
    fn non_empty_desired_jira_field_is_compared() {
        let desired = desired("team-a", "svc", "PRJ", "");
        let current = current(&[("Owner", "team-a"), ("Component", "svc")]);

        assert!(needs_update(&desired, &current));
    }

    #[test]
    fn missing_current_properties_need_update() {
        let desired = Properties::default();
        assert!(needs_update(&desired, &[]));
    }

    #[test]
    fn write_payload_excludes_empty_jira_fields() {
        let values = desired_property_values(&desired("team-a", "svc", "", ""));

        assert_eq!(values.len(), 2);
        assert_eq!(values[0].property_name, "Owner");
        assert_eq!(values[1].property_name, "Component");
    }

    #[test]
    fn write_payload_includes_set_jira_fields() {
        let values = desired_property_values(&desired("team-a", "svc", "PRJ", "svc"));

        assert_eq!(values.len(), 4);
        assert_eq!(values[2].property_name, "JiraProject");
        assert_eq!(values[2].value, "PRJ");
        assert_eq!(values[3].property_name, "JiraLabel");
    }

    #[test]
    fn workflow_pr_body_lists_properties() {
        let body = build_workflow_pr_body(&desired("team-a", "svc", "PRJ", ""));

        assert!(body.contains("- **Owner:** `team-a`"));
        assert!(body.contains("- **Component:** `svc`"));
        assert!(body.contains("- **JiraProject:** `PRJ`"));
        assert!(!body.contains("JiraLabel"));
    }

    #[test]
    fn catalog_info_pr_body_mentions_todo_placeholders() {
        let body = build_catalog_info_pr_body();

        assert!(body.contains("catalog-info.yaml"));
        assert!(body.contains("TODO"));
    }
}
