//! Results of individual lifecycle operations

use crate::catalog::ResourceType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Category of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The provider call returned an error
    Provider,
    /// The resource settled in a failure status
    ConvergenceFailed,
    /// The resource never settled before the poll timeout
    ConvergenceTimeout,
    /// A referenced instance failed, so this one was never attempted
    DependencyFailed,
    /// A resolved reference could not be written into the payload
    InvalidPayload,
    /// The run ended (deadline or cancellation) before the operation ran
    Aborted,
    /// The provider task panicked
    Panicked,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Provider => write!(f, "provider"),
            FailureKind::ConvergenceFailed => write!(f, "convergence-failed"),
            FailureKind::ConvergenceTimeout => write!(f, "convergence-timeout"),
            FailureKind::DependencyFailed => write!(f, "dependency-failed"),
            FailureKind::InvalidPayload => write!(f, "invalid-payload"),
            FailureKind::Aborted => write!(f, "aborted"),
            FailureKind::Panicked => write!(f, "panicked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub kind: FailureKind,
    pub message: String,
}

/// Recorded result of one lifecycle call on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Template key (create) or provider id (delete)
    pub key: String,

    pub resource_type: ResourceType,

    pub success: bool,

    /// Provider output, typically the id of the created resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,

    /// Fields for human reporting
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub report_fields: BTreeMap<String, String>,
}

impl OperationOutcome {
    pub fn succeeded(
        key: impl Into<String>,
        resource_type: ResourceType,
        output: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            resource_type,
            success: true,
            output: Some(output.into()),
            error: None,
            report_fields: BTreeMap::new(),
        }
    }

    pub fn failed(
        key: impl Into<String>,
        resource_type: ResourceType,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            resource_type,
            success: false,
            output: None,
            error: Some(OutcomeError {
                kind,
                message: message.into(),
            }),
            report_fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.report_fields.extend(fields);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.report_fields.insert(key.into(), value.into());
        self
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Why a wait on [`CompletedOutcomes`] returned without an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAbort {
    DeadlineExceeded,
    Cancelled,
}

/// Concurrent key → outcome table shared by every creation task.
///
/// Each key is written at most once; readers may wait for a key that has not
/// been written yet.
#[derive(Debug, Default)]
pub struct CompletedOutcomes {
    outcomes: Mutex<HashMap<String, OperationOutcome>>,
    inserted: Notify,
}

impl CompletedOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `outcome` unless its key is already present.
    ///
    /// Returns `true` when the outcome was stored.
    pub fn insert(&self, outcome: OperationOutcome) -> bool {
        let stored = {
            let mut outcomes = self.lock();
            if outcomes.contains_key(&outcome.key) {
                false
            } else {
                outcomes.insert(outcome.key.clone(), outcome);
                true
            }
        };
        if stored {
            self.inserted.notify_waiters();
        }
        stored
    }

    pub fn get(&self, key: &str) -> Option<OperationOutcome> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<OperationOutcome> {
        self.lock().values().cloned().collect()
    }

    /// Wait until an outcome for `key` is present.
    pub async fn wait_for(
        &self,
        key: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<OperationOutcome, WaitAbort> {
        loop {
            let notified = self.inserted.notified();
            tokio::pin!(notified);
            // Register before checking so an insert between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.get(key) {
                return Ok(outcome);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Err(WaitAbort::DeadlineExceeded),
                _ = cancel.cancelled() => return Err(WaitAbort::Cancelled),
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, OperationOutcome>> {
        // A poisoned lock only means another task panicked mid-insert; the
        // map itself is still consistent.
        self.outcomes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_insert_if_absent() {
        let table = CompletedOutcomes::new();
        assert!(table.insert(OperationOutcome::succeeded("net", ResourceType::NETWORK, "n-1")));
        assert!(!table.insert(OperationOutcome::succeeded("net", ResourceType::NETWORK, "n-2")));
        assert_eq!(table.get("net").unwrap().output.as_deref(), Some("n-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_late_arrival() {
        let table = Arc::new(CompletedOutcomes::new());
        let cancel = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(60);

        let waiter = {
            let table = table.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { table.wait_for("subnet-a", deadline, &cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        table.insert(OperationOutcome::succeeded("other", ResourceType::PORT, "p-1"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!waiter.is_finished());

        table.insert(OperationOutcome::succeeded("subnet-a", ResourceType::SUBNET, "s-1"));
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.output.as_deref(), Some("s-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_deadline() {
        let table = CompletedOutcomes::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let result = table
            .wait_for("missing", deadline, &CancellationToken::new())
            .await;
        assert_eq!(result.unwrap_err(), WaitAbort::DeadlineExceeded);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = OperationOutcome::failed(
            "fip-1",
            ResourceType::FLOATING_IP,
            FailureKind::DependencyFailed,
            "server web failed",
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"]["kind"], "dependency_failed");
        assert!(json.get("output").is_none());
    }
}
