//! wfreset - batch workflow reset engine, core library.
//!
//! This crate holds everything needed to decide *where* a workflow execution
//! should be reset and *whether* it should be touched at all:
//!
//! - **Target sources**: input files or paginated visibility scans, filtered
//!   against an exclusion set
//! - **History cursor**: forward-only streaming over paginated event history
//! - **Resolver**: reset anchors for the `LastWorkflowTask`,
//!   `FirstWorkflowTask`, `LastContinuedAsNew` and `BadBinary` strategies
//! - **Safety filter**: open-run, base-not-current and non-determinism checks
//!
//! All service access goes through the [`WorkflowService`] trait. The
//! [`InMemoryService`] implementation backs tests and offline rehearsals.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use wfreset_core::{InMemoryService, ResetPointResolver, ResetStrategy, WorkflowRef};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = InMemoryService::load("fixture.json").await?;
//!     let resolver = ResetPointResolver::new(&service, "default");
//!
//!     let anchor = resolver
//!         .resolve_ref(&WorkflowRef::current("order-42"), &ResetStrategy::LastWorkflowTask)
//!         .await?;
//!     println!("reset to {anchor}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core types used across the engine
//! - [`error`]: Error types and retry classification
//! - [`service`]: Service capability trait and request/response types
//! - [`memory`]: Fixture-backed in-process service
//! - [`history`]: History cursor
//! - [`resolver`]: Reset point resolution
//! - [`safety`]: Safety filter
//! - [`target`]: Target sources and exclusion files
//! - [`config`]: Batch configuration

pub mod error;
pub mod types;

pub mod config;
pub mod history;
pub mod memory;
pub mod resolver;
pub mod safety;
pub mod service;
pub mod target;

// Re-export commonly used types
pub use config::{BatchResetConfig, TargetInput, DEFAULT_SEPARATOR};
pub use error::{ResetError, Result, ServiceError, ServiceErrorKind};
pub use history::HistoryCursor;
pub use memory::{InMemoryService, RpcMethod, RunFixture, ServiceFixture};
pub use resolver::ResetPointResolver;
pub use safety::{SafetyFilter, SkipReason, Verdict};
pub use service::WorkflowService;
pub use target::{load_exclusions, SourceItem, TargetSource};
pub use types::{
    AutoResetPoint, EventType, ExclusionSet, ExecutionDescription, HistoryEventView,
    ReapplyPolicy, ResetAnchor, ResetStrategy, ResetType, TaskFailedCause, WorkflowRef,
};
