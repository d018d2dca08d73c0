use std::future::{pending, Future};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::session::{RemoteTask, TaskResult};
use crate::errors::{ControlPlaneError, ProvisionError, RemoteFailure};

/// External stop conditions for a request: an optional deadline and an
/// optional cancellation signal (set to `true` to cancel).
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    deadline: Option<Instant>,
    signal: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Resolves when the deadline passes or the signal fires, whichever is
    /// first. Never resolves if neither is set.
    pub async fn fired(&self) -> RemoteFailure {
        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => pending::<()>().await,
            }
        };

        let signal = async {
            match self.signal.clone() {
                Some(mut rx) => {
                    // A dropped sender can no longer cancel us.
                    let cancelled = rx.wait_for(|cancelled| *cancelled).await.is_ok();
                    if !cancelled {
                        pending::<()>().await;
                    }
                }
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = signal => RemoteFailure::Cancelled,
            _ = deadline => RemoteFailure::DeadlineExceeded,
        }
    }

    /// Runs `fut` unless the deadline passes or the signal fires first.
    /// An already fired cancellation never polls `fut`.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, RemoteFailure> {
        tokio::select! {
            biased;
            failure = self.fired() => Err(failure),
            output = fut => Ok(output),
        }
    }
}

fn remote_error(err: ControlPlaneError) -> ProvisionError {
    ProvisionError::remote(err.to_string())
}

/// Starts a remote operation with `launch` and waits for it to finish.
///
/// Every long-running control-plane call goes through here. Remote task
/// failures become [`ProvisionError::RemoteOperation`]; if `cancel` fires
/// first the wait is abandoned and reported as a cancellation.
pub async fn wait_for_result<F, Fut>(cancel: &Cancellation, launch: F) -> Result<TaskResult, ProvisionError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<RemoteTask, ControlPlaneError>>,
{
    let task = match cancel.guard(async move { launch().await }).await {
        Ok(launched) => launched.map_err(remote_error)?,
        Err(failure) => {
            warn!(reason = %failure, "Remote operation abandoned before launch");
            return Err(ProvisionError::RemoteOperation { kind: failure });
        }
    };

    let (reference, outcome) = task.into_parts();
    debug!(task = %reference, "Waiting for remote task");

    // a finished task wins over a deadline that passed at the same time
    tokio::select! {
        biased;
        outcome = outcome => match outcome {
            Ok(result) => {
                debug!(task = %reference, "Remote task completed");
                Ok(TaskResult { task: reference, result })
            }
            Err(e) => Err(remote_error(e)),
        },
        failure = cancel.fired() => {
            warn!(task = %reference, reason = %failure, "Stopped waiting for remote task");
            Err(ProvisionError::RemoteOperation { kind: failure })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::ManagedObjectRef;
    use futures_util::FutureExt;

    fn task_ref() -> ManagedObjectRef {
        ManagedObjectRef::new("Task", "task-1")
    }

    #[tokio::test]
    async fn test_successful_task() {
        let result = wait_for_result(&Cancellation::none(), || async {
            let vm = ManagedObjectRef::new("VirtualMachine", "vm-7");
            Ok(RemoteTask::new(task_ref(), async move { Ok(Some(vm)) }.boxed()))
        })
        .await
        .unwrap();

        assert_eq!(result.task, task_ref());
        assert_eq!(result.result.unwrap().value, "vm-7");
    }

    #[tokio::test]
    async fn test_task_failure_is_remote_error() {
        let err = wait_for_result(&Cancellation::none(), || async {
            Ok(RemoteTask::new(
                task_ref(),
                async { Err(ControlPlaneError::TaskFailed("disk full".into())) }.boxed(),
            ))
        })
        .await
        .unwrap_err();

        assert_eq!(err, ProvisionError::remote("Task failed: disk full"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_remote_error() {
        let err = wait_for_result(&Cancellation::none(), || async {
            Err(ControlPlaneError::Rejected("no permission".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "remote_operation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_unblocks_pending_task() {
        let cancel = Cancellation::none().with_timeout(Duration::from_secs(5));
        let err = wait_for_result(&cancel, || async {
            Ok(RemoteTask::new(task_ref(), pending().boxed()))
        })
        .await
        .unwrap_err();

        assert_eq!(err, ProvisionError::RemoteOperation { kind: RemoteFailure::DeadlineExceeded });
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_signal_unblocks_pending_task() {
        let (tx, rx) = watch::channel(false);
        let cancel = Cancellation::none().with_signal(rx);

        let waiter = tokio::spawn(async move {
            wait_for_result(&cancel, || async {
                Ok(RemoteTask::new(task_ref(), pending().boxed()))
            })
            .await
        });

        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err, ProvisionError::RemoteOperation { kind: RemoteFailure::Cancelled });
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_launch() {
        let (_tx, rx) = watch::channel(true);
        let cancel = Cancellation::none().with_signal(rx);
        let mut launched = false;

        let err = wait_for_result(&cancel, || {
            launched = true;
            async { Ok(RemoteTask::new(task_ref(), pending().boxed())) }
        })
        .await
        .unwrap_err();

        assert!(err.is_cancellation());
        assert!(!launched);
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let cancel = Cancellation::none().with_signal(rx);

        let result = wait_for_result(&cancel, || async {
            Ok(RemoteTask::new(task_ref(), async { Ok(None) }.boxed()))
        })
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_finished_task_wins_over_cancellation() {
        let (tx, rx) = watch::channel(false);
        let cancel = Cancellation::none().with_signal(rx);

        // the signal fires while the task is being submitted; its outcome is
        // already known by the time the wait starts
        let result = wait_for_result(&cancel, || async move {
            tx.send_replace(true);
            let vm = ManagedObjectRef::new("VirtualMachine", "vm-9");
            Ok(RemoteTask::new(task_ref(), async move { Ok(Some(vm)) }.boxed()))
        })
        .await
        .unwrap();

        assert_eq!(result.result.unwrap().value, "vm-9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_bounds_a_hung_call() {
        let cancel = Cancellation::none().with_timeout(Duration::from_secs(5));
        let outcome = cancel.guard(pending::<()>()).await;
        assert_eq!(outcome, Err(RemoteFailure::DeadlineExceeded));

        let done = Cancellation::none().guard(async { 7 }).await;
        assert_eq!(done, Ok(7));
    }
}
