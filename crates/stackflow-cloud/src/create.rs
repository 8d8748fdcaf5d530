//! Dependency-ordered creation of declared resource instances
//!
//! Mirror image of the deletion run: a type worker starts once every type it
//! depends on has finished creating. Within a worker all instances are
//! created concurrently; an instance first resolves its references by
//! waiting for the referenced instances' outcomes, then calls `create`,
//! then polls until the resource converges when its provider asks for it.

use crate::catalog::ResourceType;
use crate::context::{drain_workers, RunContext};
use crate::error::{CloudError, Result};
use crate::graph::TypeGraph;
use crate::instance::ResourceInstance;
use crate::outcome::{panic_message, FailureKind, OperationOutcome, WaitAbort};
use crate::poller::{wait_for_status, PollOutcome};
use crate::provider::ResourceProvider;
use crate::report::{Operation, ReportCollector, RunReport};
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Creates a set of instances in dependency order.
///
/// [`run`](Self::run) consumes the orchestrator: the barriers of its graph
/// and its outcome table serve a single run.
#[derive(Debug)]
pub struct CreationOrchestrator {
    ctx: RunContext,
}

impl CreationOrchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Check an instance set without calling any provider.
    ///
    /// Rejects unknown types, duplicate keys, references to keys outside the
    /// set, references that point at a type created later than the
    /// referencing one, and reference cycles between instances.
    pub fn validate(&self, instances: &[ResourceInstance]) -> Result<()> {
        let graph = &self.ctx.graph;
        let mut types: HashMap<&str, &ResourceType> = HashMap::new();

        for instance in instances {
            if graph.index_of(&instance.resource_type).is_none() {
                return Err(CloudError::UnknownResourceType(
                    instance.resource_type.clone(),
                ));
            }
            if types
                .insert(instance.key.as_str(), &instance.resource_type)
                .is_some()
            {
                return Err(CloudError::DuplicateKey(instance.key.clone()));
            }
        }

        for instance in instances {
            for dependency in instance.dependencies() {
                let Some(dependency_type) = types.get(dependency) else {
                    return Err(CloudError::UnknownReference {
                        key: instance.key.clone(),
                        dependency: dependency.to_string(),
                    });
                };
                if !created_before_or_with(graph, dependency_type, &instance.resource_type) {
                    return Err(CloudError::Template(format!(
                        "instance '{}' ({}) references '{}' ({}), which is not created before it",
                        instance.key, instance.resource_type, dependency, dependency_type
                    )));
                }
            }
        }

        check_reference_cycles(instances)
    }

    /// Create every instance.
    ///
    /// Configuration problems are returned as an error before anything is
    /// created. Once the run starts, failures are reported per instance.
    ///
    /// ```compile_fail
    /// # async fn twice(orchestrator: stackflow_cloud::CreationOrchestrator) {
    /// orchestrator.run(Vec::new()).await;
    /// orchestrator.run(Vec::new()).await;
    /// # }
    /// ```
    pub async fn run(self, instances: Vec<ResourceInstance>) -> Result<RunReport> {
        self.validate(&instances)?;

        let graph = &self.ctx.graph;
        let mut grouped: Vec<Vec<ResourceInstance>> = vec![Vec::new(); graph.len()];
        for instance in instances {
            if let Some(index) = graph.index_of(&instance.resource_type) {
                grouped[index].push(instance);
            }
        }

        let start = Instant::now();
        let deadline = self.ctx.deadline(start);
        let collector = Arc::new(ReportCollector::default());

        info!(
            types = graph.len(),
            instances = grouped.iter().map(Vec::len).sum::<usize>(),
            "Starting creation run"
        );

        let mut workers = JoinSet::new();
        for (index, instances) in grouped.into_iter().enumerate() {
            workers.spawn(create_type(
                self.ctx.clone(),
                index,
                instances,
                deadline,
                collector.clone(),
            ));
        }

        let aborted = drain_workers(workers, deadline, &self.ctx.cancel).await;
        let report = collector.finish(
            Operation::Create,
            graph.types(),
            aborted,
            start.elapsed().as_millis() as u64,
        );

        info!("Creation run finished: {}", report.summary());
        Ok(report)
    }
}

/// Whether `dependency` is `dependent` itself or one of its transitive
/// dependencies.
fn created_before_or_with(
    graph: &TypeGraph,
    dependency: &ResourceType,
    dependent: &ResourceType,
) -> bool {
    let (Some(target), Some(from)) = (graph.index_of(dependency), graph.index_of(dependent)) else {
        return false;
    };

    let mut seen = HashSet::new();
    let mut stack = vec![from];
    while let Some(i) = stack.pop() {
        if i == target {
            return true;
        }
        if seen.insert(i) {
            stack.extend(graph.node(i).depends_on.iter().copied());
        }
    }
    false
}

fn check_reference_cycles(instances: &[ResourceInstance]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        key: &'a str,
        by_key: &HashMap<&'a str, &'a ResourceInstance>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        match marks.get(key) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                path.push(key);
                return Err(CloudError::CircularDependency(path.join(" -> ")));
            }
            None => {}
        }

        marks.insert(key, Mark::Visiting);
        path.push(key);
        if let Some(instance) = by_key.get(key).copied() {
            for dependency in instance.dependencies() {
                visit(dependency, by_key, marks, path)?;
            }
        }
        path.pop();
        marks.insert(key, Mark::Done);
        Ok(())
    }

    let by_key: HashMap<&str, &ResourceInstance> =
        instances.iter().map(|i| (i.key.as_str(), i)).collect();
    let mut marks = HashMap::new();
    for instance in instances {
        visit(&instance.key, &by_key, &mut marks, &mut Vec::new())?;
    }
    Ok(())
}

async fn create_type(
    ctx: RunContext,
    index: usize,
    instances: Vec<ResourceInstance>,
    deadline: Instant,
    collector: Arc<ReportCollector>,
) {
    let graph = ctx.graph.clone();
    let node = graph.node(index);
    let resource_type = node.resource_type.clone();

    if let Err(abort) = node.create_barrier.wait(deadline, &ctx.cancel).await {
        warn!(resource_type = %resource_type, "Creation aborted: {}", abort);
        // Recorded so that references to these instances stop waiting.
        for instance in instances {
            let outcome = OperationOutcome::failed(
                instance.key,
                resource_type.clone(),
                FailureKind::Aborted,
                abort.to_string(),
            );
            ctx.outcomes.insert(outcome.clone());
            collector.record(outcome);
        }
        collector.abort(&resource_type, abort.to_string());
        return;
    }

    collector.begin(&resource_type);
    let started = Instant::now();

    let error = match ctx.providers.get(&resource_type) {
        Ok(provider) => {
            if !instances.is_empty() {
                info!(
                    resource_type = %resource_type,
                    count = instances.len(),
                    "Creating resources"
                );
            }
            let mut creates: FuturesUnordered<_> = instances
                .into_iter()
                .map(|instance| create_guarded(&ctx, provider.clone(), instance, deadline))
                .collect();
            while let Some(outcome) = creates.next().await {
                ctx.outcomes.insert(outcome.clone());
                collector.record(outcome);
            }
            None
        }
        Err(e) => {
            for instance in instances {
                let outcome = OperationOutcome::failed(
                    instance.key,
                    resource_type.clone(),
                    FailureKind::Provider,
                    e.to_string(),
                );
                ctx.outcomes.insert(outcome.clone());
                collector.record(outcome);
            }
            Some(e.to_string())
        }
    };
    collector.complete(&resource_type, error, started.elapsed().as_millis() as u64);

    for &dependent in &node.depended_on_by {
        let dependent = graph.node(dependent);
        debug!(
            from = %resource_type,
            to = %dependent.resource_type,
            "Releasing dependent for creation"
        );
        dependent.create_barrier.signal();
    }
}

async fn create_guarded(
    ctx: &RunContext,
    provider: Arc<dyn ResourceProvider>,
    instance: ResourceInstance,
    deadline: Instant,
) -> OperationOutcome {
    let key = instance.key.clone();
    let resource_type = instance.resource_type.clone();

    match AssertUnwindSafe(create_one(ctx, provider.as_ref(), instance, deadline))
        .catch_unwind()
        .await
    {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(&*panic);
            warn!(key = %key, resource_type = %resource_type, "Create panicked: {}", message);
            OperationOutcome::failed(key, resource_type, FailureKind::Panicked, message)
        }
    }
}

async fn create_one(
    ctx: &RunContext,
    provider: &dyn ResourceProvider,
    instance: ResourceInstance,
    deadline: Instant,
) -> OperationOutcome {
    let ResourceInstance {
        key,
        resource_type,
        mut properties,
        unresolved_refs,
    } = instance;

    let fail = |kind: FailureKind, message: String| {
        warn!(key = %key, resource_type = %resource_type, "Create failed: {}", message);
        OperationOutcome::failed(&key, resource_type.clone(), kind, message)
    };

    for reference in &unresolved_refs {
        let name = &reference.dependency;
        let wait_deadline =
            std::cmp::min(deadline, Instant::now() + ctx.settings.reference_timeout);

        let dependency = match ctx.outcomes.wait_for(name, wait_deadline, &ctx.cancel).await {
            Ok(outcome) => outcome,
            Err(WaitAbort::Cancelled) => {
                return fail(
                    FailureKind::Aborted,
                    format!("run cancelled while waiting for '{}'", name),
                )
            }
            Err(WaitAbort::DeadlineExceeded) => {
                return fail(
                    FailureKind::Aborted,
                    format!("no outcome for '{}' before the deadline", name),
                )
            }
        };

        let output = match (&dependency.output, dependency.success) {
            (Some(output), true) => output,
            (_, true) => {
                return fail(
                    FailureKind::DependencyFailed,
                    format!("dependency '{}' produced no output", name),
                )
            }
            (_, false) => {
                return fail(
                    FailureKind::DependencyFailed,
                    format!("dependency '{}' failed", name),
                )
            }
        };

        let value = match provider
            .resolve_reference(&dependency.resource_type, output)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                return fail(
                    FailureKind::Provider,
                    format!("resolving reference to '{}': {}", name, e),
                )
            }
        };

        if let Err(e) = reference.path.set(&mut properties, Value::String(value)) {
            return fail(FailureKind::InvalidPayload, e.to_string());
        }
        debug!(key = %key, dependency = %name, path = %reference.path, "Resolved reference");
    }

    let id = match provider.create(&properties).await {
        Ok(id) => id,
        Err(e) => return fail(FailureKind::Provider, e.to_string()),
    };

    if let Some(target) = provider.convergence() {
        let result = wait_for_status(ctx.settings.poll, &target, Some(&ctx.cancel), &key, || {
            provider.status(&id)
        })
        .await;

        let failure = match result {
            Ok(PollOutcome::Converged { .. }) => None,
            Ok(outcome @ PollOutcome::Failed { .. }) => {
                Some((FailureKind::ConvergenceFailed, outcome.to_string()))
            }
            Ok(outcome @ PollOutcome::TimedOut { .. }) => {
                Some((FailureKind::ConvergenceTimeout, outcome.to_string()))
            }
            Ok(outcome @ PollOutcome::Cancelled { .. }) => {
                Some((FailureKind::Aborted, outcome.to_string()))
            }
            Err(e) => Some((FailureKind::Provider, format!("status read failed: {}", e))),
        };
        if let Some((kind, message)) = failure {
            let mut outcome = fail(kind, message).with_field("id", &id);
            outcome.output = Some(id);
            return outcome;
        }
    }

    info!(key = %key, resource_type = %resource_type, id = %id, "Created");
    let outcome = OperationOutcome::succeeded(&key, resource_type.clone(), &id).with_field("id", &id);
    match properties.get("name").and_then(Value::as_str) {
        Some(name) => outcome.with_field("name", name),
        None => outcome,
    }
}
