// ABOUTME: LIFO stack of compensating actions for transactional container setup
// ABOUTME: On failure the stack unwinds in reverse order and aggregates any undo errors

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::{ContainerError, Result};

type Compensator = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Owns the compensating actions pushed during a multi-step setup.
///
/// Each setup step pushes its compensator right after the step succeeds.
/// On success the caller invokes [`UndoStack::commit`] and the compensators
/// are discarded; on failure [`UndoStack::undo_all`] pops and awaits them in
/// LIFO order, collecting any errors raised along the way.
pub struct UndoStack {
    steps: Vec<(String, Compensator)>,
}

impl UndoStack {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Pushes a compensating action. The label shows up in rollback logs.
    pub fn push<F>(&mut self, label: impl Into<String>, compensator: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.steps.push((label.into(), Box::pin(compensator)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Discards all compensators; the setup completed.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Runs every compensator in LIFO order.
    ///
    /// Every compensator is attempted even if an earlier one fails. Returns
    /// the triggering error unchanged when all compensators succeed, or an
    /// [`ContainerError::Aggregate`] carrying the trigger together with every
    /// undo error otherwise.
    pub async fn undo_all(mut self, trigger: ContainerError) -> ContainerError {
        let mut undo_errors = Vec::new();
        while let Some((label, compensator)) = self.steps.pop() {
            match compensator.await {
                Ok(()) => debug!(step = %label, "compensating action applied"),
                Err(e) => {
                    warn!(step = %label, error = %e, "compensating action failed");
                    undo_errors.push(e);
                }
            }
        }
        if undo_errors.is_empty() {
            trigger
        } else {
            ContainerError::Aggregate {
                trigger: Box::new(trigger),
                undo_errors,
            }
        }
    }
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn undo_runs_in_lifo_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = UndoStack::new();
        for step in 1..=3 {
            let order = order.clone();
            stack.push(format!("step-{step}"), async move {
                order.lock().unwrap().push(step);
                Ok(())
            });
        }

        let err = stack
            .undo_all(ContainerError::InvalidInput("boom".into()))
            .await;
        assert!(matches!(err, ContainerError::InvalidInput(_)));
        assert_eq!(*order.lock().unwrap(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn commit_discards_compensators() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut stack = UndoStack::new();
        let counter = calls.clone();
        stack.push("never-runs", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        stack.commit();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_compensators_are_aggregated_with_trigger() {
        let mut stack = UndoStack::new();
        stack.push("succeeds", async { Ok(()) });
        stack.push("fails-second", async {
            Err(ContainerError::ResourceMissing("user".into()))
        });
        stack.push("fails-first", async {
            Err(ContainerError::Quota("volume".into()))
        });

        let err = stack
            .undo_all(ContainerError::HostUnavailable("no agent".into()))
            .await;
        match err {
            ContainerError::Aggregate {
                trigger,
                undo_errors,
            } => {
                assert!(matches!(*trigger, ContainerError::HostUnavailable(_)));
                assert_eq!(undo_errors.len(), 2);
                assert!(matches!(undo_errors[0], ContainerError::Quota(_)));
                assert!(matches!(undo_errors[1], ContainerError::ResourceMissing(_)));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn later_compensators_still_run_after_a_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut stack = UndoStack::new();
        let counter = calls.clone();
        stack.push("bottom", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        stack.push("top-fails", async {
            Err(ContainerError::InvalidOperation("undo".into()))
        });

        let _ = stack
            .undo_all(ContainerError::InvalidInput("trigger".into()))
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
