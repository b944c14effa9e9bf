//! Transform task state
//!
//! A task is one supervised transform bound to a source and an output path.
//! Its process handle, input channel and endpoint bindings are replaced on
//! every restart; everything else is fixed at creation.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Instant, SystemTime};

use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::{Publication, StreamPath, Subscription};
use crate::stats::TaskStats;

use super::mode::{TransformMode, Wiring};
use super::request::{ResolvedRequest, TaskParams};

/// Writable side of the transcoder's input
pub type InputChannel = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// Building and spawning a process instance
    Starting = 0,
    /// A process instance is running
    Running = 1,
    /// Waiting out the restart backoff
    Backoff = 2,
    /// Supervisor finished; the task will not run again
    Stopped = 3,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Starting,
            1 => TaskStatus::Running,
            2 => TaskStatus::Backoff,
            _ => TaskStatus::Stopped,
        }
    }
}

/// Per-task counters
///
/// Written by the task's own supervisor and pumps, read by stats snapshots.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub restarts: AtomicU64,
    pub spawns: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub dropped_samples: AtomicU64,
    pub write_errors: AtomicU64,
    pub decode_errors: AtomicU64,
}

/// One supervised transform instance
pub struct TransformTask {
    id: u64,
    source: StreamPath,
    output: StreamPath,
    mode: TransformMode,
    params: TaskParams,

    started_at: Instant,
    created_at: SystemTime,

    status: AtomicU8,
    /// OS process id of the running instance, 0 when none
    process_id: AtomicU32,
    pub(crate) counters: Counters,

    /// Input channel of the current process instance
    pub(crate) input: Mutex<Option<InputChannel>>,
    pub(crate) subscription: Mutex<Option<Box<dyn Subscription>>>,
    pub(crate) publication: Mutex<Option<Box<dyn Publication>>>,

    stop: CancellationToken,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl TransformTask {
    pub(crate) fn new(id: u64, request: ResolvedRequest) -> Self {
        Self {
            id,
            source: request.source,
            output: request.output,
            mode: request.mode,
            params: request.params,
            started_at: Instant::now(),
            created_at: SystemTime::now(),
            status: AtomicU8::new(TaskStatus::Starting as u8),
            process_id: AtomicU32::new(0),
            counters: Counters::default(),
            input: Mutex::new(None),
            subscription: Mutex::new(None),
            publication: Mutex::new(None),
            stop: CancellationToken::new(),
            supervisor: StdMutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> &StreamPath {
        &self.source
    }

    pub fn output(&self) -> &StreamPath {
        &self.output
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn wiring(&self) -> Wiring {
        self.mode.wiring()
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    /// Wall-clock creation time
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub(crate) fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Number of completed process runs that were followed by teardown
    pub fn restart_count(&self) -> u64 {
        self.counters.restarts.load(Ordering::Relaxed)
    }

    /// Cumulative bytes written to the transcoder's input
    pub fn bytes_in(&self) -> u64 {
        self.counters.bytes_in.load(Ordering::Relaxed)
    }

    /// OS process id of the running instance
    pub fn process_id(&self) -> Option<u32> {
        match self.process_id.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub(crate) fn set_process_id(&self, pid: Option<u32>) {
        self.process_id.store(pid.unwrap_or(0), Ordering::Release);
    }

    /// Bind the input channel of a freshly started process instance
    pub async fn bind_input(&self, channel: InputChannel) {
        *self.input.lock().await = Some(channel);
    }

    /// Invalidate the input channel; pumps drop samples from here on
    pub async fn unbind_input(&self) {
        self.input.lock().await.take();
    }

    pub async fn has_input(&self) -> bool {
        self.input.lock().await.is_some()
    }

    /// Ask the supervisor to stop
    ///
    /// The running process is killed and the loop exits instead of restarting.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub(crate) fn attach_supervisor(&self, handle: JoinHandle<()>) {
        if let Ok(mut slot) = self.supervisor.lock() {
            *slot = Some(handle);
        }
    }

    /// Wait until the supervisor has finished
    pub async fn join(&self) {
        let handle = self.supervisor.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(task_id = self.id, error = %e, "Supervisor task failed");
            }
        }
    }

    /// Snapshot of the task's counters
    pub fn stats(&self) -> TaskStats {
        let c = &self.counters;
        TaskStats {
            task_id: self.id,
            source: self.source.to_string(),
            output: self.output.to_string(),
            mode: self.mode,
            status: self.status(),
            started_at: self.started_at,
            restart_count: c.restarts.load(Ordering::Relaxed),
            spawn_count: c.spawns.load(Ordering::Relaxed),
            bytes_in: c.bytes_in.load(Ordering::Relaxed),
            bytes_out: c.bytes_out.load(Ordering::Relaxed),
            dropped_samples: c.dropped_samples.load(Ordering::Relaxed),
            write_errors: c.write_errors.load(Ordering::Relaxed),
            decode_errors: c.decode_errors.load(Ordering::Relaxed),
            process_id: self.process_id(),
        }
    }
}

impl std::fmt::Debug for TransformTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformTask")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("output", &self.output)
            .field("mode", &self.mode)
            .field("status", &self.status())
            .field("restarts", &self.restart_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::request::TaskRequest;

    fn task() -> TransformTask {
        TransformTask::new(7, TaskRequest::new("live/cam1").resolve().unwrap())
    }

    #[test]
    fn test_new_task() {
        let task = task();
        assert_eq!(task.id(), 7);
        assert_eq!(task.output().as_str(), "live/cam1-ts0");
        assert_eq!(task.status(), TaskStatus::Starting);
        assert_eq!(task.restart_count(), 0);
        assert_eq!(task.process_id(), None);
        assert!(!task.is_stopping());
    }

    #[test]
    fn test_status_and_pid() {
        let task = task();
        task.set_status(TaskStatus::Running);
        task.set_process_id(Some(4242));
        assert_eq!(task.status(), TaskStatus::Running);
        assert_eq!(task.process_id(), Some(4242));

        task.set_process_id(None);
        assert_eq!(task.process_id(), None);
    }

    #[tokio::test]
    async fn test_bind_unbind_input() {
        let task = task();
        assert!(!task.has_input().await);

        task.bind_input(Box::new(tokio::io::sink())).await;
        assert!(task.has_input().await);

        task.unbind_input().await;
        assert!(!task.has_input().await);
    }

    #[tokio::test]
    async fn test_join_without_supervisor() {
        let task = task();
        task.stop();
        assert!(task.is_stopping());
        // Nothing attached, returns immediately
        task.join().await;
    }

    #[test]
    fn test_stats_snapshot() {
        let task = task();
        task.counters.bytes_in.fetch_add(10, Ordering::Relaxed);
        task.counters.restarts.fetch_add(2, Ordering::Relaxed);

        let stats = task.stats();
        assert_eq!(stats.task_id, 7);
        assert_eq!(stats.bytes_in, 10);
        assert_eq!(stats.restart_count, 2);
        assert_eq!(stats.mode, TransformMode::PipeInPipeOut);
    }
}
