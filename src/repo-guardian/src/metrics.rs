//! Prometheus metrics for repo-guardian observability.
//!
//! All metric handles live on a single [`Metrics`] struct registered against
//! a shared [`Registry`]. The struct is cheap to clone and safe to share
//! across workers; the `/metrics` endpoint encodes the registry in the
//! Prometheus text format.

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use thiserror::Error;

/// Buckets for rate-limit wait durations, from sub-second pacing pauses up
/// to full primary-limit resets.
const RATE_LIMIT_WAIT_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with the Prometheus registry.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// All repo-guardian metrics.
///
/// Counter, histogram, and gauge handles use interior mutability and are
/// safe to share across tasks.
#[derive(Clone)]
pub struct Metrics {
    /// Repositories processed, labeled by job trigger.
    repos_checked_total: IntCounterVec,

    /// Pull requests created for missing files.
    prs_created_total: IntCounter,

    /// Existing pull requests updated with additional commits.
    prs_updated_total: IntCounter,

    /// Missing files detected, labeled by rule name.
    files_missing_total: IntCounterVec,

    /// Webhooks received, labeled by event type.
    webhook_received_total: IntCounterVec,

    /// Errors encountered, labeled by operation.
    errors_total: IntCounterVec,

    /// Rate-limit waits, labeled by reason (`preemptive`, `primary`,
    /// `secondary`).
    rate_limit_waits_total: IntCounterVec,

    /// Repositories where custom properties were evaluated.
    properties_checked_total: IntCounter,

    /// Pull requests created for custom properties.
    properties_prs_created_total: IntCounter,

    /// Repositories where properties were set via the API.
    properties_set_total: IntCounter,

    /// Repositories where properties already matched desired values.
    properties_already_correct_total: IntCounter,

    /// Time to check a single repository.
    check_duration_seconds: Histogram,

    /// Duration of rate-limit waits.
    rate_limit_wait_seconds: Histogram,

    /// GitHub API rate limit remaining, as last observed.
    rate_remaining: Gauge,
}

impl Metrics {
    /// Creates the full metric set and registers it with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g. a duplicate
    /// name on a shared registry).
    pub fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let repos_checked_total = IntCounterVec::new(
            Opts::new(
                "repo_guardian_repos_checked_total",
                "Total repositories processed.",
            ),
            &["trigger"],
        )?;
        registry.register(Box::new(repos_checked_total.clone()))?;

        let prs_created_total = IntCounter::with_opts(Opts::new(
            "repo_guardian_prs_created_total",
            "Total pull requests created.",
        ))?;
        registry.register(Box::new(prs_created_total.clone()))?;

        let prs_updated_total = IntCounter::with_opts(Opts::new(
            "repo_guardian_prs_updated_total",
            "Total existing pull requests updated.",
        ))?;
        registry.register(Box::new(prs_updated_total.clone()))?;

        let files_missing_total = IntCounterVec::new(
            Opts::new(
                "repo_guardian_files_missing_total",
                "Missing files detected.",
            ),
            &["rule_name"],
        )?;
        registry.register(Box::new(files_missing_total.clone()))?;

        let webhook_received_total = IntCounterVec::new(
            Opts::new("repo_guardian_webhook_received_total", "Webhooks received."),
            &["event_type"],
        )?;
        registry.register(Box::new(webhook_received_total.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("repo_guardian_errors_total", "Errors encountered."),
            &["operation"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let rate_limit_waits_total = IntCounterVec::new(
            Opts::new(
                "repo_guardian_github_rate_limit_waits_total",
                "Total rate limit waits by reason.",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(rate_limit_waits_total.clone()))?;

        let properties_checked_total = IntCounter::with_opts(Opts::new(
            "repo_guardian_properties_checked_total",
            "Total repositories where custom properties were evaluated.",
        ))?;
        registry.register(Box::new(properties_checked_total.clone()))?;

        let properties_prs_created_total = IntCounter::with_opts(Opts::new(
            "repo_guardian_properties_prs_created_total",
            "Total pull requests created for custom properties.",
        ))?;
        registry.register(Box::new(properties_prs_created_total.clone()))?;

        let properties_set_total = IntCounter::with_opts(Opts::new(
            "repo_guardian_properties_set_total",
            "Total repositories where custom properties were set via API.",
        ))?;
        registry.register(Box::new(properties_set_total.clone()))?;

        let properties_already_correct_total = IntCounter::with_opts(Opts::new(
            "repo_guardian_properties_already_correct_total",
            "Total repositories where custom properties already matched desired values.",
        ))?;
        registry.register(Box::new(properties_already_correct_total.clone()))?;

        let check_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "repo_guardian_check_duration_seconds",
            "Time to check a single repository.",
        ))?;
        registry.register(Box::new(check_duration_seconds.clone()))?;

        let rate_limit_wait_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "repo_guardian_github_rate_limit_wait_seconds",
                "Duration of rate limit waits in seconds.",
            )
            .buckets(RATE_LIMIT_WAIT_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(rate_limit_wait_seconds.clone()))?;

        let rate_remaining = Gauge::with_opts(Opts::new(
            "repo_guardian_github_rate_remaining",
            "GitHub API rate limit remaining.",
        ))?;
        registry.register(Box::new(rate_remaining.clone()))?;

        Ok(Self {
            repos_checked_total,
            prs_created_total,
            prs_updated_total,
            files_missing_total,
            webhook_received_total,
            errors_total,
            rate_limit_waits_total,
            properties_checked_total,
            properties_prs_created_total,
            properties_set_total,
            properties_already_correct_total,
            check_duration_seconds,
            rate_limit_wait_seconds,
            rate_remaining,
        })
    }

    /// Records a completed repository check for the given trigger label.
    pub fn repo_checked(&self, trigger: &str) {
        self.repos_checked_total.with_label_values(&[trigger]).inc();
    }

    /// Records a newly created missing-files pull request.
    pub fn pr_created(&self) {
        self.prs_created_total.inc();
    }

    /// Records an update of an existing missing-files pull request.
    pub fn pr_updated(&self) {
        self.prs_updated_total.inc();
    }

    /// Records a missing file detection for the given rule.
    pub fn file_missing(&self, rule_name: &str) {
        self.files_missing_total
            .with_label_values(&[rule_name])
            .inc();
    }

    /// Records a received webhook of the given event type.
    pub fn webhook_received(&self, event_type: &str) {
        self.webhook_received_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Records an error for the given operation label.
    pub fn error(&self, operation: &str) {
        self.errors_total.with_label_values(&[operation]).inc();
    }

    /// Records a rate-limit wait and its duration.
    pub fn rate_limit_wait(&self, reason: &str, seconds: f64) {
        self.rate_limit_waits_total
            .with_label_values(&[reason])
            .inc();
        self.rate_limit_wait_seconds.observe(seconds);
    }

    /// Updates the rate-limit remaining gauge.
    pub fn rate_remaining(&self, remaining: f64) {
        self.rate_remaining.set(remaining);
    }

    /// Records a custom-properties evaluation.
    pub fn properties_checked(&self) {
        self.properties_checked_total.inc();
    }

    /// Records a created custom-properties pull request.
    pub fn properties_pr_created(&self) {
        self.properties_prs_created_total.inc();
    }

    /// Records a direct property write via the API.
    pub fn properties_set(&self) {
        self.properties_set_total.inc();
    }

    /// Records a repository whose properties already matched.
    pub fn properties_already_correct(&self) {
        self.properties_already_correct_total.inc();
    }

    /// Observes a repository check duration.
    pub fn observe_check_duration(&self, seconds: f64) {
        self.check_duration_seconds.observe(seconds);
    }

    /// Returns the checked-repository count for a trigger. Test accessor.
    #[must_use]
    pub fn repos_checked_count(&self, trigger: &str) -> u64 {
        self.repos_checked_total.with_label_values(&[trigger]).get()
    }

    /// Returns the missing-file count for a rule. Test accessor.
    #[must_use]
    pub fn files_missing_count(&self, rule_name: &str) -> u64 {
        self.files_missing_total
            .with_label_values(&[rule_name])
            .get()
    }

    /// Returns the created-PR count. Test accessor.
    #[must_use]
    pub fn prs_created_count(&self) -> u64 {
        self.prs_created_total.get()
    }

    /// Returns the rate-limit wait count for a reason. Test accessor.
    #[must_use]
    pub fn rate_limit_wait_count(&self, reason: &str) -> u64 {
        self.rate_limit_waits_total
            .with_label_values(&[reason])
            .get()
    }

    /// Returns the error count for an operation. Test accessor.
    #[must_use]
    pub fn error_count(&self, operation: &str) -> u64 {
        self.errors_total.with_label_values(&[operation]).get()
    }

    /// Returns the already-correct properties count. Test accessor.
    #[must_use]
    pub fn properties_already_correct_count(&self) -> u64 {
        self.properties_already_correct_total.get()
    }

    /// Returns the properties-set count. Test accessor.
    #[must_use]
    pub fn properties_set_count(&self) -> u64 {
        self.properties_set_total.get()
    }

    /// Returns the properties-PR count. Test accessor.
    #[must_use]
    pub fn properties_prs_created_count(&self) -> u64 {
        self.properties_prs_created_total.get()
    }
}

/// Encodes all metrics in the registry in Prometheus text format.
///
/// # Errors
///
/// Returns an error if encoding or UTF-8 conversion fails.
pub fn encode_text(registry: &Registry) -> Result<String, MetricsError> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
}
