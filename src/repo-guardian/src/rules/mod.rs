//! File compliance rules and the rule registry.
//!
//! A rule declares a required file: where it may live, how to detect a
//! third-party proposal for it, and which template provides its default
//! content. The rule set is process-static.

mod templates;

pub use templates::{render, TemplateError, TemplateStore};

/// A required file and how to detect or create it.
#[derive(Debug, Clone, Copy)]
pub struct FileRule {
    /// Human-readable name for logging and PR descriptions.
    pub name: &'static str,

    /// Candidate paths in priority order. The rule is satisfied if ANY path
    /// exists.
    pub paths: &'static [&'static str],

    /// Terms searched (case-insensitively) in open PR titles and head
    /// branches to detect a pre-existing third-party proposal.
    pub pr_search_terms: &'static [&'static str],

    /// Key into the template store for the default file content.
    pub template_name: &'static str,

    /// Where the default file is created when missing.
    pub target_path: &'static str,

    /// Allows rules to be toggled without removal.
    pub enabled: bool,
}

/// The initial file compliance rule set. CODEOWNERS and Dependabot are
/// enabled; Renovate is defined but disabled.
pub const DEFAULT_RULES: &[FileRule] = &[
    FileRule {
        name: "CODEOWNERS",
        paths: &["CODEOWNERS", ".github/CODEOWNERS", "docs/CODEOWNERS"],
        pr_search_terms: &["codeowners"],
        template_name: "codeowners",
        target_path: ".github/CODEOWNERS",
        enabled: true,
    },
    FileRule {
        name: "Dependabot",
        paths: &[".github/dependabot.yml", ".github/dependabot.yaml"],
        pr_search_terms: &["dependabot"],
        template_name: "dependabot",
        target_path: ".github/dependabot.yml",
        enabled: true,
    },
    FileRule {
        name: "Renovate",
        paths: &[
            "renovate.json",
            "renovate.json5",
            ".renovaterc",
            ".renovaterc.json",
            ".github/renovate.json",
            ".github/renovate.json5",
        ],
        pr_search_terms: &["renovate"],
        template_name: "renovate",
        target_path: "renovate.json",
        enabled: false,
    },
];

/// Holds a set of [`FileRule`]s and provides query methods.
#[derive(Debug, Clone)]
pub struct Registry {
    rules: &'static [FileRule],
}

impl Registry {
    /// Creates a registry from the given static rule slice.
    #[must_use]
    pub const fn new(rules: &'static [FileRule]) -> Self {
        Self { rules }
    }

    /// Returns only the rules where `enabled` is true, order preserved.
    #[must_use]
    pub fn enabled_rules(&self) -> Vec<FileRule> {
        self.rules.iter().filter(|r| r.enabled).copied().collect()
    }

    /// Returns the rule with the given name, matched case-insensitively.
    #[must_use]
    pub fn rule_by_name(&self, name: &str) -> Option<FileRule> {
        self.rules
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .copied()
    }

    /// Returns all rules in the registry.
    #[must_use]
    pub fn all_rules(&self) -> &[FileRule] {
        self.rules
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_RULES)
    }
}
