//! Configuration loading and validation.
//!
//! Every setting is read from the environment (12-factor style) with a
//! matching command-line flag. Required values without a default abort
//! startup; invalid integers, durations, fractions, or mode values do the
//! same with a nonzero exit.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};

/// How custom-property reconciliation operates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PropertiesMode {
    /// No metadata reconciliation.
    #[default]
    Disabled,

    /// Propose a one-shot GitHub Actions workflow PR that sets the
    /// properties when merged.
    GithubAction,

    /// Write properties directly via the API, proposing a catalog manifest
    /// when the repository has none.
    Api,
}

impl FromStr for PropertiesMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::Disabled),
            "github-action" => Ok(Self::GithubAction),
            "api" => Ok(Self::Api),
            other => Err(format!(
                "invalid custom properties mode {other:?} (expected \"\", \"github-action\", or \"api\")"
            )),
        }
    }
}

impl fmt::Display for PropertiesMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disabled => "disabled",
            Self::GithubAction => "github-action",
            Self::Api => "api",
        };
        f.write_str(label)
    }
}

/// All configuration for repo-guardian.
#[derive(Debug, Clone, Parser)]
#[command(name = "repo-guardian", version, about = "GitHub App enforcing per-repository file and metadata compliance")]
pub struct Config {
    /// GitHub App numeric ID.
    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: u64,

    /// Filesystem path to the App's PEM private key.
    #[arg(long, env = "GITHUB_PRIVATE_KEY_PATH")]
    pub github_private_key_path: PathBuf,

    /// HMAC secret for validating webhook payloads.
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    pub github_webhook_secret: String,

    /// Base URL of the GitHub REST API.
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// HTTP listen address for the webhook server.
    #[arg(long, env = "LISTEN_ADDR", default_value = ":8080")]
    pub listen_addr: String,

    /// HTTP listen address for the Prometheus metrics server.
    #[arg(long, env = "METRICS_ADDR", default_value = ":9090")]
    pub metrics_addr: String,

    /// Number of concurrent repo check workers.
    #[arg(long, env = "WORKER_COUNT", default_value_t = 5)]
    pub worker_count: usize,

    /// Work queue buffer size.
    #[arg(long, env = "QUEUE_SIZE", default_value_t = 1000)]
    pub queue_size: usize,

    /// Directory containing template overrides (ConfigMap mount).
    #[arg(long, env = "TEMPLATE_DIR", default_value = "/etc/repo-guardian/templates")]
    pub template_dir: PathBuf,

    /// Reconciliation interval (e.g. `168h`, `30m`).
    #[arg(long, env = "SCHEDULE_INTERVAL", default_value = "168h", value_parser = parse_interval)]
    pub schedule_interval: Duration,

    /// Whether forked repositories are skipped.
    #[arg(
        long,
        env = "SKIP_FORKS",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub skip_forks: bool,

    /// Whether archived repositories are skipped.
    #[arg(
        long,
        env = "SKIP_ARCHIVED",
        default_value_t = true,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub skip_archived: bool,

    /// Compute and log every decision without performing any write.
    #[arg(
        long,
        env = "DRY_RUN",
        default_value_t = false,
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub dry_run: bool,

    /// Log verbosity (debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Fraction of the rate limit at which pre-emptive throttling starts.
    #[arg(long, env = "RATE_LIMIT_THRESHOLD", default_value_t = 0.10, value_parser = parse_threshold)]
    pub rate_limit_threshold: f64,

    /// Custom properties mode: "" (disabled), "github-action", or "api".
    #[arg(long, env = "CUSTOM_PROPERTIES_MODE", default_value = "", value_parser = parse_mode)]
    pub custom_properties_mode: PropertiesMode,
}

fn parse_interval(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| format!("invalid duration {value:?}: {e}"))
}

fn parse_threshold(value: &str) -> Result<f64, String> {
    let threshold: f64 = value
        .parse()
        .map_err(|e| format!("invalid fraction {value:?}: {e}"))?;

    if threshold <= 0.0 || threshold > 1.0 {
        return Err(format!(
            "rate limit threshold {threshold} must be in (0, 1]"
        ));
    }

    Ok(threshold)
}

fn parse_mode(value: &str) -> Result<PropertiesMode, String> {
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required_args() -> Vec<&'static str> {
        vec![
            "repo-guardian",
            "--github-app-id",
            "12345",
            "--github-private-key-path",
            "/secrets/app.pem",
            "--github-webhook-secret",
            "hush",
        ]
    }

    #[test]
    fn applies_defaults() {
        let config = Config::try_parse_from(required_args()).unwrap();

        assert_eq!(config.github_app_id, 12345);
        assert_eq!(config.listen_addr, ":8080");
        assert_eq!(config.metrics_addr, ":9090");
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(
            config.template_dir,
            PathBuf::from("/etc/repo-guardian/templates")
        );
        assert_eq!(config.schedule_interval, Duration::from_secs(168 * 3600));
        assert!(config.skip_forks);
        assert!(config.skip_archived);
        assert!(!config.dry_run);
        assert_eq!(config.log_level, "info");
        assert!((config.rate_limit_threshold - 0.10).abs() < f64::EPSILON);
        assert_eq!(config.custom_properties_mode, PropertiesMode::Disabled);
    }

    #[test]
    fn missing_required_value_fails() {
        let result = Config::try_parse_from(["repo-guardian"]);
        assert!(result.is_err());
    }

    #[test]
    fn parses_boolean_spellings() {
        for (value, expected) in [("1", true), ("0", false), ("t", true), ("f", false), ("true", true), ("false", false)] {
            let mut args = required_args();
            args.extend(["--skip-forks", value]);
            let config = Config::try_parse_from(args).unwrap();
            assert_eq!(config.skip_forks, expected, "value: {value}");
        }
    }

    #[test]
    fn rejects_invalid_boolean() {
        let mut args = required_args();
        args.extend(["--dry-run", "maybe"]);
        assert!(Config::try_parse_from(args).is_err());
    }

    #[test]
    fn parses_duration_literals() {
        let mut args = required_args();
        args.extend(["--schedule-interval", "30m"]);
        let config = Config::try_parse_from(args).unwrap();
        assert_eq!(config.schedule_interval, Duration::from_secs(1800));
    }

    #[test]
    fn rejects_invalid_duration() {
        let mut args = required_args();
        args.extend(["--schedule-interval", "oneweek"]);
        assert!(Config::try_parse_from(args).is_err());
    }

    #[test]
    fn parses_properties_modes() {
        for (value, expected) in [
            ("", PropertiesMode::Disabled),
            ("github-action", PropertiesMode::GithubAction),
            ("api", PropertiesMode::Api),
        ] {
            let mut args = required_args();
            args.extend(["--custom-properties-mode", value]);
            let config = Config::try_parse_from(args).unwrap();
            assert_eq!(config.custom_properties_mode, expected);
        }
    }

    #[test]
    fn rejects_unknown_properties_mode() {
        let mut args = required_args();
        args.extend(["--custom-properties-mode", "magic"]);
        assert!(Config::try_parse_from(args).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        for value in ["0", "-0.2", "1.5", "abc"] {
            let mut args = required_args();
            args.extend(["--rate-limit-threshold", value]);
            assert!(
                Config::try_parse_from(args).is_err(),
                "threshold {value} should be rejected"
            );
        }
    }

    #[test]
    fn mode_labels_round_trip() {
        assert_eq!(PropertiesMode::Disabled.to_string(), "disabled");
        assert_eq!(PropertiesMode::GithubAction.to_string(), "github-action");
        assert_eq!(PropertiesMode::Api.to_string(), "api");
    }
}
