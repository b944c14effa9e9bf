//! Transform service
//!
//! Entry point for hosts: owns the task registry, submits the startup list
//! once and stops everything on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::media::DecoderFactory;
use crate::registry::{StreamEndpoints, StreamPath};
use crate::stats::{ServiceStats, TaskStats};
use crate::transform::{ProcessSpawner, TaskRegistry, TaskRequest, TransformConfig, TransformTask};

/// Runs transform tasks against a host's stream endpoints
pub struct TransformService {
    tasks: TaskRegistry,
    started: AtomicBool,
}

impl TransformService {
    /// Create a service running the configured transcoder binary
    pub fn new(endpoints: Arc<dyn StreamEndpoints>, config: TransformConfig) -> Self {
        Self {
            tasks: TaskRegistry::new(endpoints, config),
            started: AtomicBool::new(false),
        }
    }

    /// Create a service with a custom process spawner and output decoder
    pub fn with_parts(
        endpoints: Arc<dyn StreamEndpoints>,
        config: TransformConfig,
        spawner: Arc<dyn ProcessSpawner>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Self {
        Self {
            tasks: TaskRegistry::with_parts(endpoints, config, spawner, decoders),
            started: AtomicBool::new(false),
        }
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    pub fn config(&self) -> &TransformConfig {
        self.tasks.config()
    }

    /// Request a transform
    ///
    /// Returns as soon as the task exists; the transcoder starts in the
    /// background.
    pub async fn request(&self, request: TaskRequest) -> Result<Arc<TransformTask>> {
        Ok(self.tasks.create(request).await?)
    }

    /// Stop the transform publishing at `output`
    ///
    /// Returns whether a task was running there.
    pub async fn stop(&self, output: impl Into<StreamPath>) -> bool {
        self.tasks.remove(&output.into()).await.is_some()
    }

    pub async fn task(&self, output: impl Into<StreamPath>) -> Option<Arc<TransformTask>> {
        self.tasks.get(&output.into()).await
    }

    /// Snapshots of all live tasks, oldest first
    pub async fn list(&self) -> Vec<TaskStats> {
        self.tasks.list().await.iter().map(|t| t.stats()).collect()
    }

    pub async fn stats(&self) -> ServiceStats {
        let mut stats = ServiceStats::new();
        for task in self.list().await {
            stats.add_task(&task);
        }
        stats.total_tasks = self.tasks.created_count();
        stats.rejected_requests = self.tasks.rejected_count();
        stats
    }

    /// Submit the configured startup requests
    ///
    /// Only the first call does anything. Returns the number of tasks
    /// created; rejected entries are logged and skipped.
    pub async fn run_startup(&self) -> usize {
        if self.started.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let requests = self.config().on_start.clone();
        let mut created = 0;
        for request in requests {
            let source = request.source_path.clone();
            match self.tasks.create(request).await {
                Ok(_) => created += 1,
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "Startup transform skipped");
                }
            }
        }

        tracing::info!(created = created, "Startup transforms submitted");
        created
    }

    /// Stop every task and wait for their supervisors to finish
    pub async fn shutdown(&self) {
        let tasks = self.tasks.drain().await;
        tracing::info!(tasks = tasks.len(), "Shutting down transforms");

        for task in tasks {
            task.join().await;
        }
    }
}
