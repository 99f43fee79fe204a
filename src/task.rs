//! Background task runner
//!
//! Every long-running feature (inventory scan, cleanup, backup, domain
//! actions, update check) runs through this module: one worker thread per
//! task, progress streamed over a channel, exactly one terminal result.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tracing::{error, warn};

/// What a task does. Used for worker thread names and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    SoftwareScan,
    Cleanup,
    Optimize,
    Backup,
    Restore,
    DomainJoin,
    DomainLeave,
    DomainRepair,
    UpdateCheck,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SoftwareScan => "software-scan",
            TaskKind::Cleanup => "cleanup",
            TaskKind::Optimize => "optimize",
            TaskKind::Backup => "backup",
            TaskKind::Restore => "restore",
            TaskKind::DomainJoin => "domain-join",
            TaskKind::DomainLeave => "domain-leave",
            TaskKind::DomainRepair => "domain-repair",
            TaskKind::UpdateCheck => "update-check",
        }
    }
}

/// Interim progress update for a running task. Transient: not retained
/// after delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 0-100
    pub percent: u8,
    pub message: String,
}

/// Terminal failure of a task.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The cancellation token was tripped and the body bailed out.
    #[error("task cancelled")]
    Cancelled,
    /// Anything else: body error, subprocess failure, panic.
    #[error("{0}")]
    Failed(String),
}

/// Everything delivered to the initiator travels over one channel, so
/// ordering falls out of mpsc FIFO: progress events in emission order,
/// terminal result last, nothing after it.
#[derive(Debug)]
pub enum TaskEvent<T> {
    Progress(ProgressEvent),
    Finished(Result<T, TaskError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    fn from_u8(v: u8) -> TaskState {
        match v {
            0 => TaskState::Created,
            1 => TaskState::Running,
            2 => TaskState::Succeeded,
            _ => TaskState::Failed,
        }
    }
}

/// Cooperative cancellation flag shared between initiator and worker.
///
/// Task bodies poll it between steps; OS calls already in flight run to
/// completion. Partially applied side effects are not rolled back.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handed to the task body: the only way to emit progress, and the place
/// to poll for cancellation. Not `Clone`, so nothing can keep emitting
/// once the body has returned.
pub struct TaskContext<T> {
    tx: Sender<TaskEvent<T>>,
    token: CancellationToken,
}

impl<T> TaskContext<T> {
    pub fn progress(&self, percent: u8, message: impl Into<String>) {
        // Initiator may have stopped listening; that's fine.
        let _ = self.tx.send(TaskEvent::Progress(ProgressEvent {
            percent: percent.min(100),
            message: message.into(),
        }));
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Bail out of the body if cancellation was requested. The runner maps
    /// the resulting error back to `TaskError::Cancelled`.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            anyhow::bail!("cancellation requested");
        }
        Ok(())
    }
}

/// Initiator's side of a running task.
pub struct TaskHandle<T> {
    kind: TaskKind,
    rx: Receiver<TaskEvent<T>>,
    token: CancellationToken,
    state: Arc<AtomicU8>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<T> TaskHandle<T> {
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Request cooperative cancellation. Best effort: the task still
    /// delivers its single terminal result.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Non-blocking poll for the next event, for callers with their own
    /// event loop.
    pub fn try_event(&self) -> Option<TaskEvent<T>> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until the terminal result, discarding progress.
    pub fn wait(self) -> Result<T, TaskError> {
        self.wait_with(|_| {})
    }

    /// Block until the terminal result, invoking `on_progress` for each
    /// interim event in emission order.
    pub fn wait_with<F>(mut self, mut on_progress: F) -> Result<T, TaskError>
    where
        F: FnMut(&ProgressEvent),
    {
        let result = loop {
            match self.rx.recv() {
                Ok(TaskEvent::Progress(event)) => on_progress(&event),
                Ok(TaskEvent::Finished(result)) => break result,
                // Worker gone without a terminal result: should not happen,
                // surface it as a failure rather than hanging.
                Err(_) => break Err(TaskError::Failed("task worker disappeared".to_string())),
            }
        };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}

/// Start `body` on a dedicated worker thread and return immediately.
///
/// The boundary converts body errors and panics into a failure result;
/// nothing raised inside a task ever reaches the initiator's thread
/// uncaught, and exactly one terminal result is delivered per task.
pub fn spawn<T, F>(kind: TaskKind, body: F) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&TaskContext<T>) -> Result<T> + Send + 'static,
{
    let (tx, rx) = channel();
    let token = CancellationToken::default();
    let state = Arc::new(AtomicU8::new(TaskState::Created as u8));

    let worker_token = token.clone();
    let worker_state = Arc::clone(&state);

    let thread = thread::Builder::new()
        .name(format!("task-{}", kind.as_str()))
        .spawn(move || {
            worker_state.store(TaskState::Running as u8, Ordering::SeqCst);
            let ctx = TaskContext {
                tx: tx.clone(),
                token: worker_token.clone(),
            };
            let outcome = match catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => {
                    if worker_token.is_cancelled() {
                        warn!(task = kind.as_str(), "task cancelled");
                        Err(TaskError::Cancelled)
                    } else {
                        let message = format!("{err:#}");
                        error!(task = kind.as_str(), %message, "task failed");
                        Err(TaskError::Failed(message))
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(task = kind.as_str(), %message, "task panicked");
                    Err(TaskError::Failed(message))
                }
            };
            worker_state.store(
                if outcome.is_ok() {
                    TaskState::Succeeded as u8
                } else {
                    TaskState::Failed as u8
                },
                Ordering::SeqCst,
            );
            // Last send on the channel; the ctx is dropped first, so no
            // progress event can follow the terminal result.
            drop(ctx);
            let _ = tx.send(TaskEvent::Finished(outcome));
        })?;

    Ok(TaskHandle {
        kind,
        rx,
        token,
        state,
        thread: Some(thread),
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_success_delivers_value() {
        let handle = spawn(TaskKind::Cleanup, |ctx| {
            ctx.progress(50, "halfway");
            Ok(42u64)
        })
        .unwrap();

        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_progress_events_in_order_then_terminal() {
        let handle = spawn(TaskKind::SoftwareScan, |ctx| {
            ctx.progress(10, "a");
            ctx.progress(20, "b");
            ctx.progress(100, "c");
            Ok(())
        })
        .unwrap();

        let mut terminals = 0;
        let mut progress_after_terminal = 0;
        let mut percents = Vec::new();
        for event in handle.rx.iter() {
            match event {
                TaskEvent::Progress(ev) => {
                    if terminals > 0 {
                        progress_after_terminal += 1;
                    }
                    percents.push(ev.percent);
                }
                TaskEvent::Finished(result) => {
                    terminals += 1;
                    assert!(result.is_ok());
                }
            }
        }

        assert_eq!(terminals, 1);
        assert_eq!(progress_after_terminal, 0);
        assert_eq!(percents, vec![10, 20, 100]);
    }

    #[test]
    fn test_body_error_becomes_failure_result() {
        let handle = spawn(TaskKind::DomainJoin, |_ctx: &TaskContext<()>| {
            anyhow::bail!("network unreachable")
        })
        .unwrap();

        match handle.wait() {
            Err(TaskError::Failed(msg)) => assert!(msg.contains("network unreachable")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_is_caught_at_boundary() {
        let handle = spawn(TaskKind::Optimize, |_ctx: &TaskContext<()>| {
            panic!("boom");
        })
        .unwrap();

        match handle.wait() {
            Err(TaskError::Failed(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_yields_cancelled_terminal() {
        let handle = spawn(TaskKind::Backup, |ctx: &TaskContext<()>| loop {
            ctx.check_cancelled()?;
            thread::sleep(Duration::from_millis(5));
        })
        .unwrap();

        handle.cancel();
        match handle.wait() {
            Err(TaskError::Cancelled) => {}
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_state_reaches_terminal() {
        let ok = spawn(TaskKind::Cleanup, |_ctx| Ok(())).unwrap();
        let state = Arc::clone(&ok.state);
        ok.wait().unwrap();
        assert_eq!(TaskState::from_u8(state.load(Ordering::SeqCst)), TaskState::Succeeded);

        let bad = spawn(TaskKind::Cleanup, |_ctx: &TaskContext<()>| {
            anyhow::bail!("nope")
        })
        .unwrap();
        let state = Arc::clone(&bad.state);
        assert!(bad.wait().is_err());
        assert_eq!(TaskState::from_u8(state.load(Ordering::SeqCst)), TaskState::Failed);
    }

    #[test]
    fn test_percent_clamped_to_100() {
        let handle = spawn(TaskKind::Cleanup, |ctx| {
            ctx.progress(200, "overflow");
            Ok(())
        })
        .unwrap();

        let mut seen = Vec::new();
        let _ = handle.wait_with(|ev| seen.push(ev.percent));
        assert_eq!(seen, vec![100]);
    }
}
