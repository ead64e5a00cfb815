//! Process-wide cancellation shared by the runner, the dispatch pool and automation

use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Holds the current cancellation token.
///
/// Work captures a clone of the token when it starts. `cancel` trips every
/// captured clone; `reset` installs a fresh token for work started afterwards
/// without un-cancelling anything already in flight.
#[derive(Debug)]
pub struct ExecutionContext {
    token: RwLock<CancellationToken>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            token: RwLock::new(CancellationToken::new()),
        }
    }

    /// Token for work starting now.
    pub fn token(&self) -> CancellationToken {
        self.token
            .read()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn cancel(&self) {
        info!("Cancelling all in-flight device work");
        self.token().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token().is_cancelled()
    }

    /// Only the dispatch pool's stop routine calls this, after the old pool is drained.
    pub(crate) fn reset(&self) {
        let mut token = match self.token.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if token.is_cancelled() {
            *token = CancellationToken::new();
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
