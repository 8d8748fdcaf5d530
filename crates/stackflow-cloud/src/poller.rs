//! Convergence polling for asynchronous provider-side state transitions
//!
//! A volume becoming `available`, a server or router becoming `ACTIVE`, a
//! load balancer reaching `ACTIVE` provisioning status: every one of these is
//! the same loop of "read status, sleep, read again" with a deadline. This
//! module provides that loop once.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval and deadline for a convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Delay between two status reads
    pub interval: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(120),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Terminal status values for one kind of resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConvergenceTarget {
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

impl ConvergenceTarget {
    pub fn new<S: Into<String>>(
        success: impl IntoIterator<Item = S>,
        failure: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            success: success.into_iter().map(Into::into).collect(),
            failure: failure.into_iter().map(Into::into).collect(),
        }
    }

    /// `ACTIVE` with `ERROR` as failure: servers, routers, load balancers.
    pub fn active() -> Self {
        Self::new(["ACTIVE"], ["ERROR"])
    }

    /// `available` with `error` as failure: volumes and snapshots.
    pub fn available() -> Self {
        Self::new(["available"], ["error"])
    }

    fn classify(&self, status: &str) -> Option<bool> {
        if self.success.iter().any(|s| s == status) {
            Some(true)
        } else if self.failure.iter().any(|s| s == status) {
            Some(false)
        } else {
            None
        }
    }
}

/// How a convergence wait ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// Reached a success status
    Converged { status: String, reads: u32 },
    /// Reached a failure status
    Failed { status: String, reads: u32 },
    /// Never reached a terminal status before the timeout
    TimedOut {
        last_status: Option<String>,
        reads: u32,
    },
    /// The caller's token was cancelled
    Cancelled { reads: u32 },
}

impl PollOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, PollOutcome::Converged { .. })
    }

    pub fn reads(&self) -> u32 {
        match self {
            PollOutcome::Converged { reads, .. }
            | PollOutcome::Failed { reads, .. }
            | PollOutcome::TimedOut { reads, .. }
            | PollOutcome::Cancelled { reads } => *reads,
        }
    }
}

impl std::fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollOutcome::Converged { status, reads } => {
                write!(f, "converged to {} after {} reads", status, reads)
            }
            PollOutcome::Failed { status, reads } => {
                write!(f, "reached failure status {} after {} reads", status, reads)
            }
            PollOutcome::TimedOut { last_status, reads } => write!(
                f,
                "timed out after {} reads (last status: {})",
                reads,
                last_status.as_deref().unwrap_or("none")
            ),
            PollOutcome::Cancelled { reads } => write!(f, "cancelled after {} reads", reads),
        }
    }
}

/// Read `status` until it is terminal for `target` or `config.timeout`
/// elapses.
///
/// The first read happens immediately; later reads are spaced by
/// `config.interval`. A read that has not returned by the deadline counts
/// as a timeout. A read error ends the wait and is returned as-is.
pub async fn wait_for_status<F, Fut>(
    config: PollConfig,
    target: &ConvergenceTarget,
    cancel: Option<&CancellationToken>,
    resource_name: &str,
    mut status: F,
) -> Result<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let deadline = Instant::now() + config.timeout;
    let mut reads = 0u32;
    let mut last_status = None;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Ok(PollOutcome::Cancelled { reads });
        }

        let read = tokio::time::timeout_at(deadline, status());
        let current = match cancel {
            Some(token) => {
                tokio::select! {
                    result = read => result,
                    _ = token.cancelled() => return Ok(PollOutcome::Cancelled { reads }),
                }
            }
            None => read.await,
        };
        let Ok(current) = current else {
            debug!(resource = %resource_name, reads, "Status read still pending at deadline");
            return Ok(PollOutcome::TimedOut { last_status, reads });
        };
        let current = current?;
        reads += 1;

        match target.classify(&current) {
            Some(true) => {
                debug!(resource = %resource_name, status = %current, reads, "Converged");
                return Ok(PollOutcome::Converged {
                    status: current,
                    reads,
                });
            }
            Some(false) => {
                debug!(resource = %resource_name, status = %current, reads, "Reached failure status");
                return Ok(PollOutcome::Failed {
                    status: current,
                    reads,
                });
            }
            None => {}
        }

        debug!(
            resource = %resource_name,
            status = %current,
            attempt = reads,
            "Not converged yet"
        );
        last_status = Some(current);

        let now = Instant::now();
        if now >= deadline {
            return Ok(PollOutcome::TimedOut { last_status, reads });
        }
        let wake = std::cmp::min(now + config.interval, deadline);

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    _ = token.cancelled() => return Ok(PollOutcome::Cancelled { reads }),
                }
            }
            None => tokio::time::sleep_until(wake).await,
        }

        if wake >= deadline {
            return Ok(PollOutcome::TimedOut { last_status, reads });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sequence(
        statuses: &'static [&'static str],
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<String>>) {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let f = move || {
            let n = c.fetch_add(1, Ordering::SeqCst) as usize;
            let s = statuses[n.min(statuses.len() - 1)];
            std::future::ready(Ok(s.to_string()))
        };
        (counter, f)
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_nth_read() {
        let config = PollConfig::new(Duration::from_secs(5), Duration::from_secs(120));
        let (count, f) = sequence(&["BUILD", "BUILD", "BUILD", "ACTIVE"]);

        let start = Instant::now();
        let outcome = wait_for_status(config, &ConvergenceTarget::active(), None, "srv", f)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Converged {
                status: "ACTIVE".into(),
                reads: 4
            }
        );
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert!(start.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_status_is_distinct() {
        let (_, f) = sequence(&["creating", "error"]);
        let outcome = wait_for_status(
            PollConfig::default(),
            &ConvergenceTarget::available(),
            None,
            "vol",
            f,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, PollOutcome::Failed { ref status, reads: 2 } if status == "error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_blocking_forever() {
        let config = PollConfig::new(Duration::from_secs(10), Duration::from_secs(60));
        let (count, f) = sequence(&["PENDING_CREATE"]);

        let start = Instant::now();
        let outcome = wait_for_status(config, &ConvergenceTarget::active(), None, "lb", f)
            .await
            .unwrap();

        match outcome {
            PollOutcome::TimedOut { last_status, reads } => {
                assert_eq!(last_status.as_deref(), Some("PENDING_CREATE"));
                assert_eq!(reads, count.load(Ordering::SeqCst));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let cancel = CancellationToken::new();
        let (_, f) = sequence(&["BUILD"]);
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            token.cancel();
        });

        let outcome = wait_for_status(
            PollConfig::new(Duration::from_secs(5), Duration::from_secs(600)),
            &ConvergenceTarget::active(),
            Some(&cancel),
            "srv",
            f,
        )
        .await
        .unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_read_times_out() {
        let config = PollConfig::new(Duration::from_secs(1), Duration::from_secs(5));

        let start = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(3600),
            wait_for_status(config, &ConvergenceTarget::active(), None, "srv", || {
                std::future::pending::<Result<String>>()
            }),
        )
        .await
        .expect("poller must give up at its own deadline")
        .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                last_status: None,
                reads: 0
            }
        );
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_hanging_after_progress_keeps_last_status() {
        let config = PollConfig::new(Duration::from_secs(2), Duration::from_secs(30));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let outcome = wait_for_status(config, &ConvergenceTarget::active(), None, "rtr", move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok("BUILD".to_string())
                } else {
                    std::future::pending().await
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::TimedOut {
                last_status: Some("BUILD".into()),
                reads: 1
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_pending_read() {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            token.cancel();
        });

        let start = Instant::now();
        let outcome = wait_for_status(
            PollConfig::new(Duration::from_secs(5), Duration::from_secs(600)),
            &ConvergenceTarget::active(),
            Some(&cancel),
            "srv",
            || std::future::pending::<Result<String>>(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, PollOutcome::Cancelled { reads: 0 });
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let result = wait_for_status(
            PollConfig::default(),
            &ConvergenceTarget::active(),
            None,
            "srv",
            || async { Err::<String, _>(CloudError::ApiError("503".into())) },
        )
        .await;
        assert!(matches!(result, Err(CloudError::ApiError(_))));
    }
}
