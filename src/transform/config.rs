//! Transform service configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use super::request::TaskRequest;

/// Container the transcoder writes when its output is piped back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeFormat {
    /// Raw H.264 Annex-B elementary stream
    #[default]
    H264,
    /// MPEG transport stream; needs a host-supplied decoder
    MpegTs,
}

impl PipeFormat {
    /// Value of the transcoder's `-f` argument
    pub fn muxer(&self) -> &'static str {
        match self {
            PipeFormat::H264 => "h264",
            PipeFormat::MpegTs => "mpegts",
        }
    }
}

/// Transform service configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Transcoder binary
    pub ffmpeg: PathBuf,

    /// Font file used by the text overlay
    pub font_file: String,

    /// Delay between a process exit and the next start
    #[serde(with = "millis")]
    pub restart_backoff: Duration,

    /// Pause after a non-terminal decode error
    #[serde(with = "millis")]
    pub decode_retry: Duration,

    /// Read buffer size of the output pump
    pub read_buffer_size: usize,

    /// Base URL the transcoder pulls from in URL-input mode
    pub pull_base: String,

    /// Base URL the transcoder pushes to in URL-output modes
    pub push_base: String,

    /// Container used for piped output
    pub pipe_format: PipeFormat,

    /// Forward transcoder stderr lines to the debug log
    pub forward_stderr: bool,

    /// Requests submitted once when the service starts
    pub on_start: Vec<TaskRequest>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            font_file: "shoujin.ttf".to_string(),
            restart_backoff: Duration::from_millis(1000),
            decode_retry: Duration::from_millis(500),
            read_buffer_size: 64 * 1024, // 64KB
            pull_base: "rtsp://127.0.0.1:554".to_string(),
            push_base: "rtmp://127.0.0.1:1935".to_string(),
            pipe_format: PipeFormat::H264,
            forward_stderr: true,
            on_start: Vec::new(),
        }
    }
}

impl TransformConfig {
    /// Set the transcoder binary
    pub fn ffmpeg(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg = path.into();
        self
    }

    /// Set the overlay font file
    pub fn font_file(mut self, path: impl Into<String>) -> Self {
        self.font_file = path.into();
        self
    }

    /// Set the restart backoff
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Set the pause after decode errors
    pub fn decode_retry(mut self, pause: Duration) -> Self {
        self.decode_retry = pause;
        self
    }

    /// Set the output pump read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(188);
        self
    }

    /// Set the pull and push base URLs
    pub fn urls(mut self, pull_base: impl Into<String>, push_base: impl Into<String>) -> Self {
        self.pull_base = pull_base.into();
        self.push_base = push_base.into();
        self
    }

    /// Set the piped output container
    pub fn pipe_format(mut self, format: PipeFormat) -> Self {
        self.pipe_format = format;
        self
    }

    /// Enable or disable stderr forwarding
    pub fn forward_stderr(mut self, enabled: bool) -> Self {
        self.forward_stderr = enabled;
        self
    }

    /// Add a request to the startup list
    pub fn on_start(mut self, request: TaskRequest) -> Self {
        self.on_start.push(request);
        self
    }

    /// URL the transcoder pulls `source` from
    pub fn pull_url(&self, source: &str) -> String {
        format!("{}/{}", self.pull_base.trim_end_matches('/'), source)
    }

    /// URL the transcoder pushes `output` to
    pub fn push_url(&self, output: &str) -> String {
        format!("{}/{}", self.push_base.trim_end_matches('/'), output)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
