//! Transcoder invocation
//!
//! Builds the argument list for one process instance and spawns it. The
//! argument order mirrors a hand-written ffmpeg command line:
//!
//! ```text
//! ffmpeg -re -i <pipe:0|pull url> -tune zerolatency -s WxH -r FPS -c:v CODEC
//!        [-vf drawtext=...] -acodec copy -f <muxer> <pipe:1|push url>
//! ```

use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::config::TransformConfig;
use super::mode::{InputSide, OutputSide, Wiring};
use super::request::{Overlay, ResolvedRequest};

/// Muxer used when the transcoder pushes to a URL
const PUSH_MUXER: &str = "flv";

/// Program and arguments for one process instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    /// Build the invocation for a task
    pub fn build(config: &TransformConfig, request: &ResolvedRequest) -> Self {
        let wiring = request.mode.wiring();
        let params = &request.params;
        let mut args: Vec<String> = vec!["-re".into(), "-i".into()];

        args.push(match wiring.input {
            InputSide::Pipe => "pipe:0".to_string(),
            InputSide::Url => config.pull_url(request.source.as_str()),
        });

        args.extend([
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-s".to_string(),
            params.resolution.clone(),
            "-r".to_string(),
            params.frame_rate.clone(),
            "-c:v".to_string(),
            params.video_codec.clone(),
        ]);

        if let Some(overlay) = &params.overlay {
            args.push("-vf".into());
            args.push(overlay_filter(&config.font_file, overlay));
        }

        args.extend(["-acodec".to_string(), "copy".to_string(), "-f".to_string()]);

        match wiring.output {
            OutputSide::Pipe => {
                args.push(config.pipe_format.muxer().to_string());
                args.push("pipe:1".to_string());
            }
            OutputSide::Url => {
                args.push(PUSH_MUXER.to_string());
                args.push(config.push_url(request.output.as_str()));
            }
        }

        Self {
            program: config.ffmpeg.clone(),
            args,
        }
    }

    /// Whether `window` appears as consecutive arguments
    pub fn contains_sequence(&self, window: &[&str]) -> bool {
        !window.is_empty()
            && self
                .args
                .windows(window.len())
                .any(|w| w.iter().zip(window).all(|(a, b)| a == b))
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Build the `drawtext` filter expression for an overlay
pub fn overlay_filter(font_file: &str, overlay: &Overlay) -> String {
    let mut filter = format!(
        "drawtext=fontsize={}:fontfile={}:text='{}':x={}:y={}:fontcolor={}",
        overlay.font_size,
        font_file,
        overlay.text.replace('\'', "'\\''"),
        overlay.x,
        overlay.y,
        overlay.color
    );
    if let Some(box_color) = &overlay.box_color {
        filter.push_str(&format!(":box=1:boxcolor={}", box_color));
    }
    filter
}

/// Which standard streams of the process are piped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIo {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl ProcessIo {
    pub fn for_wiring(wiring: Wiring, capture_stderr: bool) -> Self {
        Self {
            stdin: wiring.pipes_input(),
            stdout: wiring.pipes_output(),
            stderr: capture_stderr,
        }
    }

    /// Apply the stdio plan to a command
    ///
    /// The child is killed when its handle is dropped.
    pub fn apply(&self, command: &mut Command) {
        let pipe_or_null = |piped: bool| if piped { Stdio::piped() } else { Stdio::null() };

        command
            .stdin(pipe_or_null(self.stdin))
            .stdout(pipe_or_null(self.stdout))
            .stderr(pipe_or_null(self.stderr))
            .kill_on_drop(true);
    }
}

/// Starts transcoder processes
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, invocation: &Invocation, io: ProcessIo) -> io::Result<Child>;
}

/// Spawns the invocation's program as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandSpawner;

impl ProcessSpawner for CommandSpawner {
    fn spawn(&self, invocation: &Invocation, io: ProcessIo) -> io::Result<Child> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        io.apply(&mut command);
        command.spawn()
    }
}
