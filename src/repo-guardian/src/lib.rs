#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

pub mod catalog;
pub mod checker;
pub mod config;
pub mod github;
pub mod metrics;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod webhook;

pub use catalog::{parse as parse_catalog, Properties};
pub use checker::{
    Engine, EngineError, EnqueueError, Queue, RepoJob, Trigger, BRANCH_NAME,
    CATALOG_INFO_BRANCH_NAME, CATALOG_INFO_PR_TITLE, PROPERTIES_BRANCH_NAME, PROPERTIES_PR_TITLE,
    PR_TITLE,
};
pub use config::{Config, PropertiesMode};
pub use github::{
    CustomPropertyValue, GitHubClient, GitHubError, Installation, PullRequest, Repository,
};
pub use metrics::{Metrics, MetricsError};
pub use rules::{FileRule, Registry, TemplateError, TemplateStore, DEFAULT_RULES};
pub use scheduler::Scheduler;
pub use server::{main_router, metrics_router, normalize_listen_addr, AppState};
