//! Concurrent fan-out of one token across every trust source.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::debug;

use super::DecodedToken;
use crate::error::{TokenValidateError, ValidationFailure};
use crate::trust::TrustStore;

/// Default deadline for one validation (10 seconds)
pub const DEFAULT_VALIDATION_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Races a token against a [`TrustStore`] snapshot.
///
/// One task per source; the first source to vouch wins. If none does, the
/// call returns once every source has reported or the deadline passes,
/// whichever comes first. Unfinished tasks are detached and their results
/// discarded.
pub struct TokenValidator {
    store: Arc<TrustStore>,
    timeout: Duration,
}

impl TokenValidator {
    /// Validator over `store` with a per-validation deadline
    #[must_use]
    pub fn new(store: Arc<TrustStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Deadline applied to each validation
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the id of the source that vouched for `token`.
    pub async fn validate(&self, token: &Arc<DecodedToken>) -> Result<String, ValidationFailure> {
        let sources = self.store.snapshot();
        if sources.is_empty() {
            return Err(ValidationFailure::default());
        }

        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(sources.len());
        for source in sources {
            let id = source.id();
            let token = Arc::clone(token);
            let task_id = id.clone();
            let handle = tasks.spawn(async move {
                let verdict = source.vouch(&token).await;
                (task_id, verdict)
            });
            names.insert(handle.id(), id);
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut failures = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((source, Ok(()))))) => {
                    debug!(source = %source, pending = tasks.len(), "Token vouched for");
                    tasks.detach_all();
                    return Ok(source);
                }
                Ok(Some(Ok((source, Err(reason))))) => failures.push((source, reason)),
                Ok(Some(Err(join_error))) => {
                    let source = names
                        .remove(&join_error.id())
                        .unwrap_or_else(|| "unknown".to_string());
                    failures.push((source, TokenValidateError::Task(join_error.to_string())));
                }
                Ok(None) => {
                    return Err(ValidationFailure {
                        failures,
                        timed_out: false,
                        pending: 0,
                    });
                }
                Err(_elapsed) => {
                    let pending = tasks.len();
                    tasks.detach_all();
                    return Err(ValidationFailure {
                        failures,
                        timed_out: true,
                        pending,
                    });
                }
            }
        }
    }
}
