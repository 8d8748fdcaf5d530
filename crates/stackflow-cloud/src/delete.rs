//! Dependency-ordered teardown of every live resource
//!
//! One worker per resource type. A worker waits until every type that
//! depends on it has finished deleting, lists its live resources, deletes
//! them concurrently and then signals the types it depends on.
//!
//! ```text
//!   server ──┐
//!            ├──► port ──► subnet ──► network
//!   fip ─────┘
//! ```

use crate::catalog::ResourceType;
use crate::context::{drain_workers, RunContext};
use crate::outcome::{panic_message, FailureKind, OperationOutcome};
use crate::provider::{LiveResource, ResourceProvider};
use crate::report::{Operation, ReportCollector, RunReport};
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Deletes everything the registered providers can list, dependents first.
///
/// [`run`](Self::run) consumes the orchestrator: the barriers of its graph
/// serve a single run.
#[derive(Debug)]
pub struct DeletionOrchestrator {
    ctx: RunContext,
}

impl DeletionOrchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run the teardown to completion, deadline or cancellation.
    ///
    /// Individual failures never stop the run; they are reported per type.
    ///
    /// ```compile_fail
    /// # async fn twice(orchestrator: stackflow_cloud::DeletionOrchestrator) {
    /// orchestrator.run().await;
    /// orchestrator.run().await;
    /// # }
    /// ```
    pub async fn run(self) -> RunReport {
        let start = Instant::now();
        let deadline = self.ctx.deadline(start);
        let collector = Arc::new(ReportCollector::default());

        info!(types = self.ctx.graph.len(), "Starting deletion run");

        let mut workers = JoinSet::new();
        for index in 0..self.ctx.graph.len() {
            workers.spawn(delete_type(
                self.ctx.clone(),
                index,
                deadline,
                collector.clone(),
            ));
        }

        let aborted = drain_workers(workers, deadline, &self.ctx.cancel).await;
        let report = collector.finish(
            Operation::Delete,
            self.ctx.graph.types(),
            aborted,
            start.elapsed().as_millis() as u64,
        );

        info!("Deletion run finished: {}", report.summary());
        report
    }
}

async fn delete_type(
    ctx: RunContext,
    index: usize,
    deadline: Instant,
    collector: Arc<ReportCollector>,
) {
    let graph = ctx.graph.clone();
    let node = graph.node(index);
    let resource_type = node.resource_type.clone();

    if let Err(abort) = node.delete_barrier.wait(deadline, &ctx.cancel).await {
        warn!(resource_type = %resource_type, "Deletion aborted: {}", abort);
        collector.abort(&resource_type, abort.to_string());
        return;
    }

    collector.begin(&resource_type);
    let started = Instant::now();

    let error = match ctx.providers.get(&resource_type) {
        Ok(provider) => delete_all(provider.clone(), &resource_type, &collector)
            .await
            .err(),
        Err(e) => Some(e.to_string()),
    };
    if let Some(e) = &error {
        warn!(resource_type = %resource_type, "Failed to list resources: {}", e);
    }
    collector.complete(&resource_type, error, started.elapsed().as_millis() as u64);

    // Dependencies are released even when this type had failures.
    for &dependency in &node.blocking_dependencies {
        let dependency = graph.node(dependency);
        debug!(
            from = %resource_type,
            to = %dependency.resource_type,
            "Releasing dependency for deletion"
        );
        dependency.delete_barrier.signal();
    }
}

/// List and delete every resource of one type. Only a failed listing is an
/// error; per-resource failures are recorded as outcomes.
async fn delete_all(
    provider: Arc<dyn ResourceProvider>,
    resource_type: &ResourceType,
    collector: &ReportCollector,
) -> std::result::Result<(), String> {
    let resources = AssertUnwindSafe(provider.list())
        .catch_unwind()
        .await
        .map_err(|panic| format!("list panicked: {}", panic_message(&*panic)))?
        .map_err(|e| e.to_string())?;

    info!(
        resource_type = %resource_type,
        count = resources.len(),
        "Deleting resources"
    );

    let mut deletes: FuturesUnordered<_> = resources
        .into_iter()
        .map(|resource| delete_one(provider.clone(), resource_type.clone(), resource))
        .collect();

    while let Some(outcome) = deletes.next().await {
        collector.record(outcome);
    }
    Ok(())
}

async fn delete_one(
    provider: Arc<dyn ResourceProvider>,
    resource_type: ResourceType,
    resource: LiveResource,
) -> OperationOutcome {
    let result = AssertUnwindSafe(provider.delete(&resource))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(())) => {
            debug!(resource_type = %resource_type, id = %resource.id, "Deleted");
            OperationOutcome::succeeded(&resource.id, resource_type, &resource.id)
        }
        Ok(Err(e)) => {
            warn!(resource_type = %resource_type, id = %resource.id, "Delete failed: {}", e);
            OperationOutcome::failed(&resource.id, resource_type, FailureKind::Provider, e.to_string())
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            warn!(resource_type = %resource_type, id = %resource.id, "Delete panicked: {}", message);
            OperationOutcome::failed(&resource.id, resource_type, FailureKind::Panicked, message)
        }
    };

    let outcome = outcome.with_field("id", &resource.id);
    let outcome = match &resource.parent_id {
        Some(parent) => outcome.with_field("parent_id", parent),
        None => outcome,
    };
    outcome.with_fields(resource.fields)
}
