//! Task registry
//!
//! Maps each output path to at most one live task. Creation and removal are
//! serialized through one lock, so two concurrent requests for the same
//! output path can never both succeed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::TaskError;
use crate::media::{AnnexBDecoderFactory, DecoderFactory};
use crate::registry::{StreamEndpoints, StreamPath};

use super::command::{CommandSpawner, Invocation, ProcessSpawner};
use super::config::TransformConfig;
use super::request::TaskRequest;
use super::supervisor::Supervisor;
use super::task::TransformTask;

/// Live transform tasks keyed by output path
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

struct Inner {
    tasks: Mutex<HashMap<StreamPath, Arc<TransformTask>>>,
    endpoints: Arc<dyn StreamEndpoints>,
    spawner: Arc<dyn ProcessSpawner>,
    decoders: Arc<dyn DecoderFactory>,
    config: Arc<TransformConfig>,
    next_task_id: AtomicU64,
    created: AtomicU64,
    rejected: AtomicU64,
}

impl TaskRegistry {
    /// Create a registry that runs the configured transcoder binary
    pub fn new(endpoints: Arc<dyn StreamEndpoints>, config: TransformConfig) -> Self {
        Self::with_parts(
            endpoints,
            config,
            Arc::new(CommandSpawner),
            Arc::new(AnnexBDecoderFactory),
        )
    }

    /// Create a registry with a custom process spawner and output decoder
    pub fn with_parts(
        endpoints: Arc<dyn StreamEndpoints>,
        config: TransformConfig,
        spawner: Arc<dyn ProcessSpawner>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                endpoints,
                spawner,
                decoders,
                config: Arc::new(config),
                next_task_id: AtomicU64::new(1),
                created: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.inner.config
    }

    /// Create a task and start its supervisor
    ///
    /// Fails without side effects when the request is invalid or a task
    /// already owns the resolved output path. Problems after creation are
    /// handled by the supervisor and never reported here.
    pub async fn create(&self, request: TaskRequest) -> Result<Arc<TransformTask>, TaskError> {
        let resolved = match request.resolve() {
            Ok(resolved) => resolved,
            Err(e) => {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Transform request rejected");
                return Err(e);
            }
        };

        let mut tasks = self.inner.tasks.lock().await;

        if tasks.contains_key(&resolved.output) {
            self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                source = %resolved.source,
                output = %resolved.output,
                "Transform already running for output path"
            );
            return Err(TaskError::DuplicateOutput(resolved.output.to_string()));
        }

        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let invocation = Invocation::build(&self.inner.config, &resolved);
        let task = Arc::new(TransformTask::new(id, resolved));
        tasks.insert(task.output().clone(), Arc::clone(&task));
        self.inner.created.fetch_add(1, Ordering::Relaxed);

        let supervisor = Supervisor {
            task: Arc::clone(&task),
            invocation,
            endpoints: Arc::clone(&self.inner.endpoints),
            spawner: Arc::clone(&self.inner.spawner),
            decoders: Arc::clone(&self.inner.decoders),
            config: Arc::clone(&self.inner.config),
            tasks: self.clone(),
        };
        task.attach_supervisor(tokio::spawn(supervisor.run()));

        tracing::info!(
            task_id = id,
            source = %task.source(),
            output = %task.output(),
            mode = %task.mode(),
            "Transform task created"
        );

        Ok(task)
    }

    /// Stop the task at `output` and remove it
    ///
    /// The path is free for a new request as soon as this returns; the old
    /// supervisor finishes its teardown in the background.
    pub async fn remove(&self, output: &StreamPath) -> Option<Arc<TransformTask>> {
        let task = self.inner.tasks.lock().await.remove(output)?;
        task.stop();

        tracing::info!(task_id = task.id(), output = %output, "Transform task removed");
        Some(task)
    }

    /// Drop the entry for `output` if it still belongs to task `id`
    pub(crate) async fn release(&self, output: &StreamPath, id: u64) -> bool {
        let mut tasks = self.inner.tasks.lock().await;
        match tasks.get(output) {
            Some(task) if task.id() == id => {
                tasks.remove(output);
                tracing::debug!(task_id = id, output = %output, "Task entry released");
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, output: &StreamPath) -> Option<Arc<TransformTask>> {
        self.inner.tasks.lock().await.get(output).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<TransformTask>> {
        let mut tasks: Vec<_> = self.inner.tasks.lock().await.values().cloned().collect();
        tasks.sort_by_key(|task| task.id());
        tasks
    }

    pub async fn len(&self) -> usize {
        self.inner.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.tasks.lock().await.is_empty()
    }

    /// Stop and remove every task
    pub async fn drain(&self) -> Vec<Arc<TransformTask>> {
        let tasks: Vec<_> = self.inner.tasks.lock().await.drain().map(|(_, t)| t).collect();
        for task in &tasks {
            task.stop();
        }
        tasks
    }

    /// Tasks created since startup
    pub fn created_count(&self) -> u64 {
        self.inner.created.load(Ordering::Relaxed)
    }

    /// Requests rejected since startup
    pub fn rejected_count(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("created", &self.created_count())
            .field("rejected", &self.rejected_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::process::Child;

    use super::*;
    use crate::registry::StreamRegistry;
    use crate::transform::command::ProcessIo;
    use crate::transform::mode::TransformMode;
    use crate::transform::task::TaskStatus;

    /// Spawner whose transcoder is never found
    #[derive(Default)]
    struct MissingBinary {
        attempts: AtomicUsize,
    }

    impl ProcessSpawner for MissingBinary {
        fn spawn(&self, _invocation: &Invocation, _io: ProcessIo) -> io::Result<Child> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::NotFound, "no transcoder"))
        }
    }

    fn registry(spawner: Arc<MissingBinary>) -> TaskRegistry {
        let config = TransformConfig::default()
            .restart_backoff(Duration::from_millis(20))
            .forward_stderr(false);
        TaskRegistry::with_parts(
            Arc::new(StreamRegistry::new()),
            config,
            spawner,
            Arc::new(AnnexBDecoderFactory),
        )
    }

    #[tokio::test]
    async fn test_duplicate_output_rejected() {
        let registry = registry(Arc::default());

        let first = registry.create(TaskRequest::new("live/cam1")).await.unwrap();
        let second = registry
            .create(TaskRequest::new("live/cam1").resolution("720x576"))
            .await;

        assert_eq!(
            second.unwrap_err(),
            TaskError::DuplicateOutput("live/cam1-ts0".into())
        );
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.rejected_count(), 1);
        let current = registry.get(first.output()).await.unwrap();
        assert_eq!(current.id(), first.id());

        registry.remove(first.output()).await;
        first.join().await;
    }

    #[tokio::test]
    async fn test_same_source_different_modes() {
        let registry = registry(Arc::default());

        let a = registry.create(TaskRequest::new("live/cam1")).await.unwrap();
        let b = registry
            .create(TaskRequest::new("live/cam1").mode(TransformMode::PipeInUrlOut))
            .await
            .unwrap();

        assert_ne!(a.output(), b.output());
        assert_eq!(registry.list().await.len(), 2);

        for task in registry.drain().await {
            task.join().await;
        }
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let registry = registry(Arc::default());
        let result = registry.create(TaskRequest::default()).await;

        assert_eq!(result.unwrap_err(), TaskError::EmptySourcePath);
        assert!(registry.is_empty().await);
        assert_eq!(registry.created_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_retried() {
        let spawner = Arc::new(MissingBinary::default());
        let registry = registry(Arc::clone(&spawner));

        let task = registry.create(TaskRequest::new("live/cam1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(spawner.attempts.load(Ordering::SeqCst) >= 2);
        assert!(task.restart_count() >= 2);
        assert_eq!(task.stats().spawn_count, 0);
        assert_ne!(task.status(), TaskStatus::Stopped);

        registry.remove(task.output()).await.unwrap();
        task.join().await;
        assert_eq!(task.status(), TaskStatus::Stopped);
    }

    #[tokio::test]
    async fn test_single_run_releases_entry() {
        let spawner = Arc::new(MissingBinary::default());
        let registry = registry(Arc::clone(&spawner));

        let task = registry
            .create(TaskRequest::new("live/cam1").mode(TransformMode::UrlInUrlOut))
            .await
            .unwrap();
        task.join().await;

        assert_eq!(spawner.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(task.status(), TaskStatus::Stopped);
        assert!(registry.get(task.output()).await.is_none());
    }

    #[tokio::test]
    async fn test_recreate_after_remove() {
        let registry = registry(Arc::default());

        let old = registry.create(TaskRequest::new("live/cam1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        registry.remove(old.output()).await.unwrap();

        // Path is free immediately, before the old supervisor finished
        let new = registry.create(TaskRequest::new("live/cam1")).await.unwrap();
        assert_ne!(new.id(), old.id());

        old.join().await;
        // A stale supervisor never releases the new owner's entry
        assert_eq!(registry.get(new.output()).await.unwrap().id(), new.id());
        assert!(!registry.release(new.output(), old.id()).await);

        registry.remove(new.output()).await;
        new.join().await;
    }
}
