//! Process supervisor
//!
//! One supervisor runs per task. Each iteration of its loop owns exactly one
//! transcoder process:
//!
//! ```text
//! spawn ─► start output pump ─► bind stdin ─► subscribe source ─► wait
//!   ▲                                                             │
//!   └──── backoff ◄── restarts += 1 ◄── unbind, stop pumps, release endpoints
//! ```
//!
//! Spawn failures go through the same teardown and backoff as a crash. An
//! explicit stop kills the running process and ends the loop instead of
//! restarting.

use std::process::ExitStatus;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::media::DecoderFactory;
use crate::registry::StreamEndpoints;

use super::command::{Invocation, ProcessIo, ProcessSpawner};
use super::config::TransformConfig;
use super::input::InputPump;
use super::mode::RestartPolicy;
use super::output::OutputPump;
use super::registry::TaskRegistry;
use super::task::{TaskStatus, TransformTask};

/// Supervise loop for one task
pub(crate) struct Supervisor {
    pub task: Arc<TransformTask>,
    pub invocation: Invocation,
    pub endpoints: Arc<dyn StreamEndpoints>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub config: Arc<TransformConfig>,
    pub tasks: TaskRegistry,
}

/// Background units started for one process instance
struct Instance {
    child: Child,
    token: CancellationToken,
    output_pump: Option<JoinHandle<u64>>,
    stderr: Option<JoinHandle<usize>>,
}

impl Supervisor {
    pub async fn run(self) {
        let task = Arc::clone(&self.task);
        let wiring = task.wiring();

        tracing::info!(
            task_id = task.id(),
            source = %task.source(),
            output = %task.output(),
            mode = %task.mode(),
            "Transform task started"
        );

        loop {
            if task.is_stopping() {
                break;
            }

            task.set_status(TaskStatus::Starting);
            self.run_once().await;
            let restarts = task.counters.restarts.fetch_add(1, Ordering::Relaxed) + 1;

            if task.is_stopping() || wiring.restart == RestartPolicy::Once {
                break;
            }

            task.set_status(TaskStatus::Backoff);
            tracing::debug!(
                task_id = task.id(),
                restarts = restarts,
                backoff_ms = self.config.restart_backoff.as_millis() as u64,
                "Restarting transcoder after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.restart_backoff) => {}
                _ = task.stop_token().cancelled() => break,
            }
        }

        task.set_status(TaskStatus::Stopped);
        self.tasks.release(task.output(), task.id()).await;

        tracing::info!(
            task_id = task.id(),
            output = %task.output(),
            restarts = task.restart_count(),
            "Transform task ended"
        );
    }

    /// Start one process instance, wait for it to exit and tear it down
    async fn run_once(&self) {
        let Some(instance) = self.start().await else {
            return;
        };
        let Instance {
            mut child,
            token,
            output_pump,
            stderr,
        } = instance;

        let task = &self.task;
        let status = tokio::select! {
            status = child.wait() => status,
            _ = task.stop_token().cancelled() => {
                tracing::info!(task_id = task.id(), "Stopping transcoder");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(task_id = task.id(), error = %e, "Failed to kill transcoder");
                }
                child.wait().await
            }
        };
        log_exit(task, status);

        // Pumps stop writing from here on
        task.unbind_input().await;
        token.cancel();

        if let Some(pump) = output_pump {
            join_unit(task.id(), "output pump", pump).await;
        }
        if let Some(stderr) = stderr {
            join_unit(task.id(), "stderr forwarder", stderr).await;
        }

        self.release_endpoints().await;
        task.set_process_id(None);
    }

    /// Spawn the process and wire up its pipes
    ///
    /// Returns `None` when the process could not be started.
    async fn start(&self) -> Option<Instance> {
        let task = &self.task;
        let wiring = task.wiring();
        let io = ProcessIo::for_wiring(wiring, self.config.forward_stderr);

        let mut child = match self.spawner.spawn(&self.invocation, io) {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    task_id = task.id(),
                    program = %self.invocation.program.display(),
                    error = %e,
                    "Failed to start transcoder"
                );
                return None;
            }
        };

        task.counters.spawns.fetch_add(1, Ordering::Relaxed);
        task.set_process_id(child.id());
        task.set_status(TaskStatus::Running);
        tracing::info!(
            task_id = task.id(),
            pid = ?child.id(),
            restarts = task.restart_count(),
            command = %self.invocation,
            "Transcoder started"
        );

        let token = task.stop_token().child_token();

        // The output pump goes first so nothing the process emits while the
        // subscription is set up gets lost
        let output_pump = if wiring.pipes_output() {
            match child.stdout.take() {
                Some(stdout) => {
                    let decoder = self.decoders.create(task.params().frame_rate_value());
                    let pump = OutputPump::new(
                        Arc::clone(task),
                        Arc::clone(&self.endpoints),
                        stdout,
                        decoder,
                        &self.config,
                        token.clone(),
                    );
                    Some(tokio::spawn(pump.run()))
                }
                None => {
                    tracing::error!(task_id = task.id(), "Transcoder stdout not piped");
                    None
                }
            }
        } else {
            None
        };

        let stderr = child.stderr.take().map(|stderr| {
            tokio::spawn(forward_stderr(task.id(), stderr, token.clone()))
        });

        if wiring.pipes_input() {
            match child.stdin.take() {
                Some(stdin) => task.bind_input(Box::new(stdin)).await,
                None => tracing::error!(task_id = task.id(), "Transcoder stdin not piped"),
            }

            if !self.subscribe_source().await {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(task_id = task.id(), error = %e, "Failed to kill transcoder");
                }
            }
        }

        Some(Instance {
            child,
            token,
            output_pump,
            stderr,
        })
    }

    /// Replace the source subscription with a fresh one
    async fn subscribe_source(&self) -> bool {
        let task = &self.task;
        let mut slot = task.subscription.lock().await;
        if let Some(stale) = slot.take() {
            stale.stop().await;
        }

        let handler = Arc::new(InputPump::new(Arc::clone(task)));
        match self.endpoints.subscribe(task.source(), handler).await {
            Ok(subscription) => {
                tracing::info!(task_id = task.id(), source = %task.source(), "Subscribed to source");
                *slot = Some(subscription);
                true
            }
            Err(e) => {
                tracing::warn!(
                    task_id = task.id(),
                    source = %task.source(),
                    error = %e,
                    "Source unavailable"
                );
                false
            }
        }
    }

    async fn release_endpoints(&self) {
        let task = &self.task;

        let subscription = task.subscription.lock().await.take();
        if let Some(subscription) = subscription {
            subscription.stop().await;
        }

        let publication = task.publication.lock().await.take();
        if let Some(publication) = publication {
            publication.stop().await;
        }
    }
}

fn log_exit(task: &TransformTask, status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => {
            tracing::info!(task_id = task.id(), "Transcoder exited");
        }
        Ok(status) => {
            tracing::warn!(task_id = task.id(), code = ?status.code(), "Transcoder exited with error");
        }
        Err(e) => {
            tracing::error!(task_id = task.id(), error = %e, "Failed to wait for transcoder");
        }
    }
}

/// Forward transcoder stderr to the debug log, one line at a time
async fn forward_stderr<R>(task_id: u64, stderr: R, cancel: CancellationToken) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    let mut count = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    count += 1;
                    tracing::debug!(task_id = task_id, line = %line.trim_end(), "transcoder");
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::trace!(task_id = task_id, error = %e, "Stderr read ended");
                    break;
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    count
}

/// Wait for a per-instance unit, logging it if it panicked or was aborted
async fn join_unit<T>(task_id: u64, unit: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(task_id = task_id, unit = unit, error = %e, "Pipeline unit failed");
            None
        }
    }
}
