//! Task bridge: run one suspending call off the UI thread and hand its outcome back.
//!
//! At most one task is in flight. Each task gets its own OS thread and a private
//! current-thread Tokio runtime that is torn down before the outcome is reported.
//! The UI thread picks the outcome up with [`TaskBridge::poll`] (non-blocking, once
//! per frame) or [`TaskBridge::wait`]; exactly one of succeeded/failed is
//! delivered per started task, and the slot is free again once it has been
//! delivered.

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Called from the worker thread right after the outcome is sent (e.g. to wake
/// the UI event loop).
pub type Notifier = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    Succeeded(T),
    Failed(String),
}

/// Outcome of a finished task, tagged with the id from its [`TaskHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent<T> {
    pub id: u64,
    pub outcome: TaskOutcome<T>,
}

impl<T> TaskEvent<T> {
    /// Invoke exactly one of the two handlers.
    pub fn dispatch<R>(
        self,
        on_succeeded: impl FnOnce(T) -> R,
        on_failed: impl FnOnce(String) -> R,
    ) -> R {
        match self.outcome {
            TaskOutcome::Succeeded(value) => on_succeeded(value),
            TaskOutcome::Failed(error) => on_failed(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    id: u64,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("task {0} is still running")]
    Busy(u64),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Running<T> {
    id: u64,
    receiver: mpsc::Receiver<TaskOutcome<T>>,
    worker: JoinHandle<()>,
}

pub struct TaskBridge<T> {
    running: Option<Running<T>>,
    next_id: u64,
    notifier: Option<Notifier>,
}

impl<T: Send + 'static> Default for TaskBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> TaskBridge<T> {
    pub fn new() -> Self {
        Self {
            running: None,
            next_id: 1,
            notifier: None,
        }
    }

    pub fn with_notifier(notifier: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            notifier: Some(Arc::new(notifier)),
            ..Self::new()
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    /// Start `task` on a fresh worker. Rejected with [`BridgeError::Busy`] while a
    /// task is in flight; the running task is not affected.
    pub fn start_task<F, Fut>(&mut self, task: F) -> Result<TaskHandle, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(ref running) = self.running {
            return Err(BridgeError::Busy(running.id));
        }
        let id = self.next_id;
        let (tx, rx) = mpsc::channel();
        let notifier = self.notifier.clone();
        let worker = std::thread::Builder::new()
            .name(format!("bridge-task-{}", id))
            .spawn(move || {
                let outcome = run_to_outcome(task);
                let _ = tx.send(outcome);
                if let Some(notify) = notifier {
                    notify();
                }
            })?;
        self.next_id += 1;
        self.running = Some(Running {
            id,
            receiver: rx,
            worker,
        });
        log::debug!("bridge: started task {}", id);
        Ok(TaskHandle { id })
    }

    /// Non-blocking: the finished task's event, or None while running or idle.
    pub fn poll(&mut self) -> Option<TaskEvent<T>> {
        let running = self.running.as_ref()?;
        let outcome = match running.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(mpsc::TryRecvError::Empty) => return None,
            Err(mpsc::TryRecvError::Disconnected) => lost_worker(),
        };
        self.finish(outcome)
    }

    /// Block until the running task finishes. None when idle.
    pub fn wait(&mut self) -> Option<TaskEvent<T>> {
        let running = self.running.as_ref()?;
        let outcome = running.receiver.recv().unwrap_or_else(|_| lost_worker());
        self.finish(outcome)
    }

    fn finish(&mut self, outcome: TaskOutcome<T>) -> Option<TaskEvent<T>> {
        let running = self.running.take()?;
        if running.worker.join().is_err() {
            log::warn!("bridge: worker for task {} panicked after reporting", running.id);
        }
        log::debug!("bridge: task {} finished", running.id);
        Some(TaskEvent {
            id: running.id,
            outcome,
        })
    }
}

fn lost_worker<T>() -> TaskOutcome<T> {
    TaskOutcome::Failed("worker exited without reporting a result".to_string())
}

fn run_to_outcome<T, F, Fut>(task: F) -> TaskOutcome<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return TaskOutcome::Failed(format!("failed to start task runtime: {}", e)),
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(task())));
    drop(runtime);
    match result {
        Ok(Ok(value)) => TaskOutcome::Succeeded(value),
        Ok(Err(e)) => TaskOutcome::Failed(format!("{:#}", e)),
        Err(payload) => {
            TaskOutcome::Failed(format!("task panicked: {}", panic_message(payload.as_ref())))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn success_then_idle() {
        let mut bridge = TaskBridge::new();
        assert!(!bridge.is_active());
        let handle = bridge.start_task(|| async { Ok(42) }).unwrap();
        assert!(bridge.is_active());

        let event = bridge.wait().expect("event");
        assert_eq!(event.id, handle.id());
        assert_eq!(event.outcome, TaskOutcome::Succeeded(42));
        assert!(!bridge.is_active());
        assert!(bridge.poll().is_none());
        assert!(bridge.wait().is_none());
    }

    fn explode() -> anyhow::Result<()> {
        panic!("kaput")
    }

    #[test]
    fn error_and_panic_become_failed() {
        let mut bridge: TaskBridge<()> = TaskBridge::new();
        bridge
            .start_task(|| async { Err(anyhow::anyhow!("boom")) })
            .unwrap();
        assert_eq!(
            bridge.wait().unwrap().outcome,
            TaskOutcome::Failed("boom".to_string())
        );

        bridge.start_task(|| async { explode() }).unwrap();
        match bridge.wait().unwrap().outcome {
            TaskOutcome::Failed(msg) => assert!(msg.contains("kaput"), "got {:?}", msg),
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!bridge.is_active());
    }

    #[test]
    fn alternating_results_deliver_exactly_one_outcome_each() {
        let mut bridge = TaskBridge::new();
        for i in 0..6u32 {
            bridge
                .start_task(move || async move {
                    if i % 2 == 0 {
                        Ok(i)
                    } else {
                        Err(anyhow::anyhow!("odd {}", i))
                    }
                })
                .unwrap();
            let event = bridge.wait().unwrap();
            let expected = if i % 2 == 0 {
                TaskOutcome::Succeeded(i)
            } else {
                TaskOutcome::Failed(format!("odd {}", i))
            };
            assert_eq!(event.outcome, expected);
            assert!(bridge.wait().is_none());
            assert!(!bridge.is_active());
        }
    }

    #[test]
    fn busy_while_running_does_not_disturb_task() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut bridge = TaskBridge::new();
        let first = bridge
            .start_task(move || async move {
                release_rx.recv().ok();
                Ok("first")
            })
            .unwrap();

        match bridge.start_task(|| async { Ok("second") }) {
            Err(BridgeError::Busy(id)) => assert_eq!(id, first.id()),
            other => panic!("expected busy, got {:?}", other.map(|h| h.id())),
        }
        assert!(bridge.is_active());
        assert!(bridge.poll().is_none());

        release_tx.send(()).unwrap();
        let event = bridge.wait().unwrap();
        assert_eq!(event.id, first.id());
        assert_eq!(event.outcome, TaskOutcome::Succeeded("first"));

        let next = bridge.start_task(|| async { Ok("third") }).unwrap();
        assert!(next.id() > first.id());
        assert_eq!(bridge.wait().unwrap().outcome, TaskOutcome::Succeeded("third"));
    }

    #[test]
    fn poll_delivers_once_and_notifier_fires() {
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        let mut bridge = TaskBridge::with_notifier(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bridge
            .start_task(|| async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("done".to_string())
            })
            .unwrap();

        let mut events = Vec::new();
        for _ in 0..500 {
            if let Some(e) = bridge.poll() {
                events.push(e);
            }
            if !bridge.is_active() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(bridge.poll().is_none());
        assert_eq!(events.len(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_runs_exactly_one_handler() {
        let ok: TaskEvent<i32> = TaskEvent {
            id: 1,
            outcome: TaskOutcome::Succeeded(3),
        };
        assert_eq!(ok.dispatch(|v| v * 2, |_| -1), 6);
        let failed: TaskEvent<i32> = TaskEvent {
            id: 2,
            outcome: TaskOutcome::Failed("nope".into()),
        };
        assert_eq!(failed.dispatch(|_| String::new(), |e| e), "nope");
    }
}
