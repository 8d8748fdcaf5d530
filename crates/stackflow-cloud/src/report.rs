//! End-of-run reporting

use crate::catalog::ResourceType;
use crate::outcome::OperationOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Lifecycle operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// How far a type worker got.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TypeStatus {
    /// The worker ran its operation (possibly with per-instance failures)
    Completed,
    /// The worker never passed its barrier
    Aborted { reason: String },
    /// The run ended while the worker was still running
    Incomplete,
}

/// Outcomes of one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeReport {
    pub resource_type: ResourceType,
    pub status: TypeStatus,
    pub total: usize,
    pub succeeded: Vec<OperationOutcome>,
    pub failed: Vec<OperationOutcome>,

    /// Type-level error, e.g. the live listing itself failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

impl TypeReport {
    pub fn new(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            status: TypeStatus::Incomplete,
            total: 0,
            succeeded: Vec::new(),
            failed: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    pub fn aborted(resource_type: ResourceType, reason: impl Into<String>) -> Self {
        Self {
            status: TypeStatus::Aborted {
                reason: reason.into(),
            },
            ..Self::new(resource_type)
        }
    }

    pub fn record(&mut self, outcome: OperationOutcome) {
        self.total += 1;
        if outcome.success {
            self.succeeded.push(outcome);
        } else {
            self.failed.push(outcome);
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TypeStatus::Completed && self.failed.is_empty() && self.error.is_none()
    }
}

/// Structured report of an orchestration run, ordered by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub operation: Operation,
    pub types: Vec<TypeReport>,

    /// Whether the run hit its deadline or was cancelled
    pub aborted: bool,

    pub duration_ms: u64,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !self.aborted && self.types.iter().all(TypeReport::is_success)
    }

    pub fn get(&self, resource_type: &ResourceType) -> Option<&TypeReport> {
        self.types.iter().find(|t| &t.resource_type == resource_type)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.types.iter().map(|t| t.total).sum(),
            succeeded: self.types.iter().map(|t| t.succeeded.len()).sum(),
            failed: self.types.iter().map(|t| t.failed.len()).sum(),
            aborted_types: self
                .types
                .iter()
                .filter(|t| t.status != TypeStatus::Completed)
                .count(),
        }
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} run: {}", self.operation, self.summary())?;
        for t in &self.types {
            write!(
                f,
                "  {:<25} total {:>3}, succeeded {:>3}, failed {:>3}",
                t.resource_type.as_str(),
                t.total,
                t.succeeded.len(),
                t.failed.len()
            )?;
            match &t.status {
                TypeStatus::Completed => {}
                TypeStatus::Aborted { reason } => write!(f, " [aborted: {}]", reason)?,
                TypeStatus::Incomplete => write!(f, " [incomplete]")?,
            }
            if let Some(err) = &t.error {
                write!(f, " [error: {}]", err)?;
            }
            writeln!(f)?;
            for outcome in &t.failed {
                if let Some(err) = &outcome.error {
                    writeln!(f, "    ✗ {} ({}): {}", outcome.key, err.kind, err.message)?;
                }
            }
        }
        Ok(())
    }
}

/// Counts across every type of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted_types: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} operations, {} succeeded, {} failed, {} types not completed",
            self.total, self.succeeded, self.failed, self.aborted_types
        )
    }
}

/// Shared sink that type workers write into as they go, so that an aborted
/// run still reports every outcome collected before the abort.
#[derive(Debug, Default)]
pub(crate) struct ReportCollector {
    reports: Mutex<HashMap<ResourceType, TypeReport>>,
}

impl ReportCollector {
    fn with<R>(&self, resource_type: &ResourceType, f: impl FnOnce(&mut TypeReport) -> R) -> R {
        let mut reports = self
            .reports
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let report = reports
            .entry(resource_type.clone())
            .or_insert_with(|| TypeReport::new(resource_type.clone()));
        f(report)
    }

    /// The worker passed its barrier.
    pub(crate) fn begin(&self, resource_type: &ResourceType) {
        self.with(resource_type, |_| ());
    }

    pub(crate) fn record(&self, outcome: OperationOutcome) {
        let resource_type = outcome.resource_type.clone();
        self.with(&resource_type, |r| r.record(outcome));
    }

    pub(crate) fn complete(
        &self,
        resource_type: &ResourceType,
        error: Option<String>,
        duration_ms: u64,
    ) {
        self.with(resource_type, |r| {
            r.status = TypeStatus::Completed;
            r.error = error;
            r.duration_ms = duration_ms;
        });
    }

    pub(crate) fn abort(&self, resource_type: &ResourceType, reason: impl Into<String>) {
        let reason = reason.into();
        self.with(resource_type, |r| r.status = TypeStatus::Aborted { reason });
    }

    /// Assemble the final report in `order`. A type that never reported
    /// anything is marked aborted when the run was aborted.
    pub(crate) fn finish<'a>(
        &self,
        operation: Operation,
        order: impl Iterator<Item = &'a ResourceType>,
        aborted: bool,
        duration_ms: u64,
    ) -> RunReport {
        let mut reports = std::mem::take(
            &mut *self
                .reports
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        let types = order
            .map(|t| match reports.remove(t) {
                Some(report) => report,
                None if aborted => TypeReport::aborted(t.clone(), "run ended before this type started"),
                None => TypeReport::new(t.clone()),
            })
            .collect();
        RunReport {
            operation,
            types,
            aborted,
            duration_ms,
        }
    }
}
