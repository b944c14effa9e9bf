//! Statistics and metrics for transform tasks

use std::time::{Duration, Instant};

use crate::transform::{TaskStatus, TransformMode};

/// Task-level statistics
#[derive(Debug, Clone)]
pub struct TaskStats {
    /// Task ID
    pub task_id: u64,
    /// Source stream path
    pub source: String,
    /// Output stream path
    pub output: String,
    /// Wiring mode
    pub mode: TransformMode,
    /// Current status
    pub status: TaskStatus,
    /// Task creation time
    pub started_at: Instant,
    /// Process runs torn down so far
    pub restart_count: u64,
    /// Process instances spawned so far
    pub spawn_count: u64,
    /// Bytes written to the transcoder
    pub bytes_in: u64,
    /// Bytes read back from the transcoder
    pub bytes_out: u64,
    /// Samples dropped because no input channel was bound
    pub dropped_samples: u64,
    /// Failed writes to the input channel
    pub write_errors: u64,
    /// Non-terminal decode errors
    pub decode_errors: u64,
    /// OS process id of the running instance
    pub process_id: Option<u32>,
}

impl TaskStats {
    /// Get duration since the task was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Average input bitrate in bits per second
    pub fn input_bitrate(&self) -> u64 {
        let secs = self.uptime().as_secs();
        if secs > 0 {
            (self.bytes_in * 8) / secs
        } else {
            0
        }
    }
}

/// Service-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    /// Tasks currently registered
    pub active_tasks: usize,
    /// Tasks ever accepted
    pub total_tasks: u64,
    /// Requests rejected (empty source, duplicate output)
    pub rejected_requests: u64,
    /// Sum of restart counts over active tasks
    pub total_restarts: u64,
    /// Sum of input bytes over active tasks
    pub total_bytes_in: u64,
    /// Sum of output bytes over active tasks
    pub total_bytes_out: u64,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one task's stats into the totals
    pub fn add_task(&mut self, task: &TaskStats) {
        self.active_tasks += 1;
        self.total_restarts += task.restart_count;
        self.total_bytes_in += task.bytes_in;
        self.total_bytes_out += task.bytes_out;
    }
}
