//! Run-scoped state threaded through every orchestrator

use crate::catalog::DependencyCatalog;
use crate::error::Result;
use crate::graph::TypeGraph;
use crate::outcome::CompletedOutcomes;
use crate::poller::PollConfig;
use crate::provider::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Timing knobs for one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    /// Overall deadline; every barrier and reference wait is bounded by it
    pub run_timeout: Duration,

    /// Per-reference bound when waiting on another instance's outcome
    pub reference_timeout: Duration,

    /// Convergence polling after `create`
    pub poll: PollConfig,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(30 * 60),
            reference_timeout: Duration::from_secs(10 * 60),
            poll: PollConfig::default(),
        }
    }
}

/// Everything one run needs: the graph (whose barriers the run consumes),
/// the provider handles, the shared outcome table and the cancellation
/// token.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub graph: Arc<TypeGraph>,
    pub providers: ProviderRegistry,
    pub outcomes: Arc<CompletedOutcomes>,
    pub settings: RunSettings,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Build a fresh graph for `catalog` and check that every type has a
    /// provider. Fails before any provider call is made.
    pub fn new(
        catalog: &DependencyCatalog,
        providers: ProviderRegistry,
        settings: RunSettings,
    ) -> Result<Self> {
        let graph = TypeGraph::build(catalog)?;
        providers.validate(&graph)?;
        Ok(Self {
            graph: Arc::new(graph),
            providers,
            outcomes: Arc::new(CompletedOutcomes::new()),
            settings,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned token, e.g. one tied to Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn deadline(&self, start: Instant) -> Instant {
        start + self.settings.run_timeout
    }
}

/// Join every type worker, bounded by the run deadline and the token.
///
/// Returns `true` when the run was aborted; the token is then cancelled and
/// workers still running are dropped.
pub(crate) async fn drain_workers(
    mut workers: JoinSet<()>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> bool {
    let aborted = loop {
        tokio::select! {
            biased;
            joined = workers.join_next() => match joined {
                None => break false,
                Some(Err(e)) if e.is_panic() => error!("Type worker panicked: {}", e),
                Some(_) => {}
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!(remaining = workers.len(), "Run deadline exceeded");
                break true;
            }
            _ = cancel.cancelled() => {
                warn!(remaining = workers.len(), "Run cancelled");
                break true;
            }
        }
    };

    if aborted {
        cancel.cancel();
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }
    aborted
}
