//! StackFlow Cloud Orchestration
//!
//! This crate decides in what order, and with what concurrency, lifecycle
//! operations run against a graph of interdependent cloud resources
//! (networks, subnets, ports, routers, floating IPs, servers, ...).
//! The per-type API glue lives behind [`ResourceProvider`] and
//! [`L3Provider`] implementations.
//!
//! # Components
//!
//! - **Type graph**: built from a [`DependencyCatalog`]; one node per
//!   resource type with a create barrier and a delete barrier
//! - **Deletion**: dependents are torn down before their dependencies,
//!   for one scope or for several scopes concurrently
//! - **Creation**: dependencies are created first, references between
//!   instances are resolved from earlier outcomes
//! - **Convergence polling**: bounded waits for asynchronous status changes
//! - **Recovery**: snapshot, tear down and restore router groups
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 stackflow CLI                    │
//! │           (graph / plan / snapshot)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               stackflow-cloud                    │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │  Catalog +   │  │  Deletion / Creation     │ │
//! │  │  TypeGraph   ├──►  orchestrators           │ │
//! │  └──────────────┘  └───────────┬──────────────┘ │
//! │  ┌──────────────┐  ┌───────────▼──────────────┐ │
//! │  │  Snapshot +  │  │  Convergence poller      │ │
//! │  │  Recovery    ├──►                          │ │
//! │  └──────────────┘  └──────────────────────────┘ │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼────────┐ ┌──────▼────────┐
//! │ResourceProvider│ │  L3Provider   │
//! │   (per type)   │ │               │
//! └────────────────┘ └───────────────┘
//! ```

pub mod barrier;
pub mod catalog;
pub mod cleaner;
pub mod context;
pub mod create;
pub mod delete;
pub mod error;
pub mod graph;
pub mod instance;
pub mod outcome;
pub mod payload;
pub mod poller;
pub mod provider;
pub mod recovery;
pub mod report;
pub mod snapshot;
pub mod template;

// Re-exports
pub use barrier::{Barrier, BarrierAbort};
pub use catalog::{default_catalog, CatalogEntry, Dependency, DependencyCatalog, ResourceType};
pub use cleaner::{ScopeDirectory, ScopeReport, ScopedCleaner};
pub use context::{RunContext, RunSettings};
pub use create::CreationOrchestrator;
pub use delete::DeletionOrchestrator;
pub use error::{CloudError, Result};
pub use graph::{TypeGraph, TypeNode};
pub use instance::{ResourceInstance, UnresolvedRef};
pub use outcome::{CompletedOutcomes, FailureKind, OperationOutcome, OutcomeError, WaitAbort};
pub use payload::PropertyPath;
pub use poller::{wait_for_status, ConvergenceTarget, PollConfig, PollOutcome};
pub use provider::{LiveResource, ProviderRegistry, ResourceProvider};
pub use recovery::{
    capture, FloatingIpInfo, GroupReport, GroupState, L3Provider, PortInfo, RecoveryConfig,
    RecoveryMode, RecoveryOptions, RecoveryReport, RecoveryWorkflow, RouterInfo,
};
pub use report::{Operation, RunReport, RunSummary, TypeReport, TypeStatus};
pub use snapshot::{
    ExternalFixedIp, FipRecord, GatewayInfo, PortForwarding, RouterRecord, Scope, Snapshot,
    SnapshotStore,
};
pub use template::{reference_paths, CreationPlan, Template, TemplateResource};
