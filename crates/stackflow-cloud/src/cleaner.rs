//! Teardown of several scopes at once
//!
//! Every scope is an independent deletion run with its own type graph and
//! outcome table. Scopes run concurrently; one scope hitting its deadline
//! does not touch the others.

use crate::catalog::DependencyCatalog;
use crate::context::{RunContext, RunSettings};
use crate::delete::DeletionOrchestrator;
use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::report::RunReport;
use crate::snapshot::Scope;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Lookup of scopes and the providers acting inside them.
#[async_trait]
pub trait ScopeDirectory: Send + Sync {
    /// Whether `scope` exists on the provider side
    async fn exists(&self, scope: &Scope) -> Result<bool>;

    /// Providers bound to `scope`
    async fn providers(&self, scope: &Scope) -> Result<ProviderRegistry>;
}

/// Outcome of one scope's deletion run.
#[derive(Debug, Clone)]
pub struct ScopeReport {
    pub scope: Scope,
    pub report: RunReport,
}

/// Deletes everything in a list of scopes, one deletion run per scope.
pub struct ScopedCleaner {
    catalog: DependencyCatalog,
    settings: RunSettings,
    directory: Arc<dyn ScopeDirectory>,
    cancel: CancellationToken,
}

impl ScopedCleaner {
    pub fn new(
        catalog: DependencyCatalog,
        settings: RunSettings,
        directory: Arc<dyn ScopeDirectory>,
    ) -> Self {
        Self {
            catalog,
            settings,
            directory,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token; cancelling it stops every scope.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Tear down every existing scope in `scopes`.
    ///
    /// Scopes that do not exist are skipped with a warning and duplicates
    /// are cleaned once. Lookup and configuration errors are returned before
    /// any scope starts deleting. Reports follow the order of `scopes`.
    pub async fn run(&self, scopes: &[Scope]) -> Result<Vec<ScopeReport>> {
        let mut seen = HashSet::new();
        let mut runs = Vec::new();

        for scope in scopes {
            if !seen.insert(scope) {
                continue;
            }
            if !self.directory.exists(scope).await? {
                warn!(scope = %scope, "Scope does not exist, nothing to delete");
                continue;
            }
            let providers = self.directory.providers(scope).await?;
            let ctx = RunContext::new(&self.catalog, providers, self.settings)?
                .with_cancel(self.cancel.child_token());
            runs.push((scope.clone(), DeletionOrchestrator::new(ctx)));
        }

        info!(scopes = runs.len(), "Starting deletion across scopes");

        let reports = join_all(runs.into_iter().map(|(scope, orchestrator)| async move {
            let report = orchestrator.run().await;
            info!(scope = %scope, "Scope cleaned: {}", report.summary());
            ScopeReport { scope, report }
        }))
        .await;

        Ok(reports)
    }
}
