//! Parsing of Backstage `catalog-info.yaml` manifests.
//!
//! The service catalog manifest is the source of truth for repository
//! ownership metadata. Parsing is total: any content that is not a valid
//! Backstage Component entity yields `Unclassified` defaults instead of an
//! error.

use serde::Deserialize;

/// Default value for `Owner` and `Component` when the manifest is missing,
/// unparseable, or incomplete.
pub const UNCLASSIFIED: &str = "Unclassified";

/// The only accepted Backstage API version.
const ACCEPTED_API_VERSION: &str = "backstage.io/v1alpha1";

/// The only accepted entity kind.
const ACCEPTED_KIND: &str = "Component";

/// A Backstage catalog entity. Only the fields relevant to custom property
/// extraction are modeled.
#[derive(Debug, Default, Deserialize)]
struct Entity {
    #[serde(rename = "apiVersion", default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: Spec,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    annotations: std::collections::HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct Spec {
    #[serde(default)]
    owner: String,
}

/// Custom property values extracted from a catalog manifest, destined for
/// GitHub repository custom properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Properties {
    pub owner: String,
    pub component: String,
    pub jira_project: String,
    pub jira_label: String,
}

impl Default for Properties {
    fn default() -> Self {
        Self {
            owner: UNCLASSIFIED.to_string(),
            component: UNCLASSIFIED.to_string(),
            jira_project: String::new(),
            jira_label: String::new(),
        }
    }
}

/// Extracts custom property values from `catalog-info.yaml` content.
///
/// Returns default [`Properties`] (Owner and Component set to
/// `Unclassified`, Jira fields empty) when the content cannot be parsed or
/// is not a Backstage Component entity. Owner and Component are never empty
/// in the output.
#[must_use]
pub fn parse(content: &str) -> Properties {
    let entity: Entity = match serde_yaml::from_str(content) {
        Ok(entity) => entity,
        Err(_) => return Properties::default(),
    };

    if entity.api_version != ACCEPTED_API_VERSION || entity.kind != ACCEPTED_KIND {
        return Properties::default();
    }

    let mut properties = Properties {
        owner: entity.spec.owner,
        component: entity.metadata.name,
        jira_project: entity
            .metadata
            .annotations
            .get("jira/project-key")
            .cloned()
            .unwrap_or_default(),
        jira_label: entity
            .metadata
            .annotations
            .get("jira/label")
            .cloned()
            .unwrap_or_default(),
    };

    if properties.owner.is_empty() {
        properties.owner = UNCLASSIFIED.to_string();
    }

    if properties.component.is_empty() {
        properties.component = UNCLASSIFIED.to_string();
    }

    properties
}
