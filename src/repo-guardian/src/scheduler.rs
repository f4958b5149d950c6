//! Periodic reconciliation of all installed repositories.
//!
//! The scheduler is the safety net for missed or dropped webhook events:
//! it enumerates every installation and repository on a fixed interval and
//! enqueues a check job for each.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::checker::{Queue, RepoJob, Trigger};
use crate::github::GitHubClient;

/// Periodically reconciles all repositories across all installations.
pub struct Scheduler {
    client: GitHubClient,
    queue: Arc<Queue>,
    interval: Duration,
    skip_forks: bool,
    skip_archived: bool,
}

impl Scheduler {
    /// Creates a new scheduler.
    #[must_use]
    pub fn new(
        client: GitHubClient,
        queue: Arc<Queue>,
        interval: Duration,
        skip_forks: bool,
        skip_archived: bool,
    ) -> Self {
        Self {
            client,
            queue,
            interval,
            skip_forks,
            skip_archived,
        }
    }

    /// Runs a reconciliation pass immediately, then at the configured
    /// interval until the token is cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "scheduler starting");

        self.run_once().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; the startup
        // pass above already covered it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("scheduler stopped");
                    return;
                }
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }

    /// Runs a single reconciliation pass: lists all installations and their
    /// repositories, enqueuing a job per eligible repository. List failures
    /// and full-queue rejections are logged and skipped; the affected
    /// repositories are simply deferred to the next pass.
    pub async fn run_once(&self) {
        let start = Instant::now();
        info!("starting reconciliation");

        let installations = match self.client.list_installations().await {
            Ok(installations) => installations,
            Err(e) => {
                error!(error = %e, "failed to list installations");
                return;
            }
        };

        let mut enqueued = 0usize;

        for installation in installations {
            let repos = match self.client.list_installation_repos(installation.id).await {
                Ok(repos) => repos,
                Err(e) => {
                    error!(
                        installation_id = installation.id,
                        error = %e,
                        "failed to list repos for installation"
                    );
                    continue;
                }
            };

            for repo in repos {
                // Pre-filter archived and forked repos to avoid enqueuing
                // work the engine would skip anyway. The engine performs
                // the authoritative check.
                if self.skip_archived && repo.archived {
                    continue;
                }

                if self.skip_forks && repo.fork {
                    continue;
                }

                let job = RepoJob {
                    owner: repo.owner,
                    repo: repo.name,
                    installation_id: installation.id,
                    trigger: Trigger::Scheduler,
                };

                if let Err(e) = self.queue.enqueue(job.clone()) {
                    error!(
                        owner = %job.owner,
                        repo = %job.repo,
                        error = %e,
                        "failed to enqueue repo"
                    );
                    continue;
                }

                enqueued += 1;
            }
        }

        info!(
            enqueued,
            duration_ms = start.elapsed().as_millis() as u64,
            "reconciliation complete"
        );
    }
}
