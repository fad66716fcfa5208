//! GitLab export connector.
//!
//! Exports GitLab data into a host runtime's normalized models. A SOURCECODE
//! instance exports repos, users, merge requests and their commits, reviews
//! and comments. A WORK instance exports projects, issues with their
//! changelogs and links, epics, milestones, iterations and boards.
//! Incremental runs pick up where the previous one stopped, and webhooks keep
//! the exported records current in between.
//!
//! The host owns the output sink and the persistence: it hands the connector a
//! [`Pipe`] and a [`State`] and drives the lifecycle through
//! [`GitLabIntegration`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gitlab_export::{GitLabIntegration, Instance, MemoryPipe, MemoryState, RuntimeConfig, Tenant};
//!
//! let mut integration = GitLabIntegration::with_reqwest()?;
//! integration.start(RuntimeConfig::default());
//!
//! let instance = Instance::new(Tenant::new("customer", Some("instance".into())), config);
//! let result = integration
//!     .export(&instance, Arc::new(MemoryPipe::new()), Arc::new(MemoryState::new()))
//!     .await?;
//! println!("wrote {} records", result.written);
//! ```

pub mod api;
pub mod changelog;
pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod http;
pub mod integration;
pub mod rate_limit;
pub mod retry;
pub mod sdk;
pub mod webhook;
pub mod work_manager;

pub use config::{Account, AccountType, Auth, ConnectionInfo, IntegrationConfig};
pub use convert::Tenant;
pub use error::{ExportError, Result, short_error_message};
pub use export::{ExportOptions, ExportProgress, ExportResult, Exporter, IntegrationType, ProgressCallback};
pub use integration::{
    DismissReport, GitLabIntegration, Instance, MutationResponse, RuntimeConfig, Validation,
};
pub use rate_limit::ApiRateLimiter;
pub use retry::RetryPolicy;
pub use sdk::{Entity, MemoryPipe, MemoryState, Pipe, PipeError, State, StateError, StateExt};
pub use webhook::{RegistrationReport, WebhookEvent, WebhookRequest};
pub use work_manager::WorkManager;
