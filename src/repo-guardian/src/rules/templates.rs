//! Template store with embedded defaults and directory overrides.
//!
//! Templates are plain text with named placeholders (e.g. `OWNER_VALUE`).
//! Rendering is literal string substitution, with no expression language,
//! so the template files stay human-auditable.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

/// Compiled-in default templates, keyed by identifier.
const EMBEDDED_TEMPLATES: &[(&str, &str)] = &[
    ("codeowners", include_str!("../../templates/codeowners.tmpl")),
    ("dependabot", include_str!("../../templates/dependabot.tmpl")),
    ("renovate", include_str!("../../templates/renovate.tmpl")),
    (
        "set-custom-properties",
        include_str!("../../templates/set-custom-properties.tmpl"),
    ),
    (
        "catalog-info",
        include_str!("../../templates/catalog-info.tmpl"),
    ),
];

/// Errors that can occur while loading or looking up templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Failed to read the override directory or a file in it.
    #[error("reading template directory '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No template registered under the given identifier.
    #[error("template {name:?} not found")]
    NotFound { name: String },
}

/// Loads and serves file templates, using embedded defaults as fallbacks
/// when a directory override is not present.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: HashMap<String, String>,
}

impl TemplateStore {
    /// Creates an empty template store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `*.tmpl` files from the given directory (the file name minus
    /// the extension is the identifier), then fills any identifier not
    /// already present from the embedded defaults. A missing directory is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::IoError`] if the directory exists but
    /// cannot be read.
    pub fn load(&mut self, dir: &Path) -> Result<(), TemplateError> {
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry.map_err(|e| TemplateError::IoError {
                        path: dir.display().to_string(),
                        source: e,
                    })?;

                    let path = entry.path();
                    let Some(name) = template_name(&path) else {
                        continue;
                    };

                    let content =
                        std::fs::read_to_string(&path).map_err(|e| TemplateError::IoError {
                            path: path.display().to_string(),
                            source: e,
                        })?;

                    debug!(name, path = %path.display(), "loaded template override");
                    self.templates.insert(name, content);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(dir = %dir.display(), "template override directory not found, using embedded defaults");
            }
            Err(e) => {
                return Err(TemplateError::IoError {
                    path: dir.display().to_string(),
                    source: e,
                });
            }
        }

        for (name, content) in EMBEDDED_TEMPLATES {
            self.templates
                .entry((*name).to_string())
                .or_insert_with(|| (*content).to_string());
        }

        Ok(())
    }

    /// Returns the template content for the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::NotFound`] if no template is registered
    /// under the identifier.
    pub fn get(&self, name: &str) -> Result<&str, TemplateError> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| TemplateError::NotFound {
                name: name.to_string(),
            })
    }
}

/// Extracts the template identifier from a `*.tmpl` file path, or `None`
/// for directories and other file types.
fn template_name(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }

    let file_name = path.file_name()?.to_str()?;
    let name = file_name.strip_suffix(".tmpl")?;
    Some(name.to_string())
}

/// Renders a template by literal substitution of each placeholder.
#[must_use]
pub fn render(content: &str, replacements: &[(&str, &str)]) -> String {
    let mut result = content.to_string();
    for (placeholder, value) in replacements {
        result = result.replace(placeholder, value);
    }

    result
}
