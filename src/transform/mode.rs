//! Transform mode selection
//!
//! | Mode            | Input | Output | Restart     |
//! |-----------------|-------|--------|-------------|
//! | `PipeInPipeOut` | pipe  | pipe   | continuous  |
//! | `UrlInUrlOut`   | URL   | URL    | single run  |
//! | `PipeInUrlOut`  | pipe  | URL    | continuous  |

use serde::Deserialize;

/// Wiring topology requested for a task
///
/// Deserializes from either the numeric code (`0`, `1`, `2`) or the
/// snake_case name (`"pipe_in_pipe_out"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "ModeValue")]
pub enum TransformMode {
    /// Subscribed samples in through stdin, output read from stdout and republished
    #[default]
    PipeInPipeOut,
    /// Transcoder pulls from and pushes to network URLs itself
    UrlInUrlOut,
    /// Subscribed samples in through stdin, transcoder pushes to a URL
    PipeInUrlOut,
}

/// Serialized form of a mode
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeValue {
    Code(i64),
    Name(String),
}

impl TryFrom<ModeValue> for TransformMode {
    type Error = String;

    fn try_from(value: ModeValue) -> Result<Self, Self::Error> {
        match value {
            ModeValue::Code(code) => {
                TransformMode::from_code(code).ok_or_else(|| format!("unknown mode code {}", code))
            }
            ModeValue::Name(name) => {
                TransformMode::from_name(&name).ok_or_else(|| format!("unknown mode {:?}", name))
            }
        }
    }
}

/// Where the transcoder reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSide {
    Pipe,
    Url,
}

/// Where the transcoder writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSide {
    Pipe,
    Url,
}

/// What the supervisor does after the process exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart after backoff until stopped
    Continuous,
    /// End the task after the first exit
    Once,
}

/// Wiring derived from a mode; fixed for the task's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wiring {
    pub input: InputSide,
    pub output: OutputSide,
    pub restart: RestartPolicy,
}

impl Wiring {
    pub fn pipes_input(&self) -> bool {
        self.input == InputSide::Pipe
    }

    pub fn pipes_output(&self) -> bool {
        self.output == OutputSide::Pipe
    }
}

impl TransformMode {
    /// Map the numeric code used by operators and startup lists
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TransformMode::PipeInPipeOut),
            1 => Some(TransformMode::UrlInUrlOut),
            2 => Some(TransformMode::PipeInUrlOut),
            _ => None,
        }
    }

    /// Map the snake_case mode name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pipe_in_pipe_out" => Some(TransformMode::PipeInPipeOut),
            "url_in_url_out" => Some(TransformMode::UrlInUrlOut),
            "pipe_in_url_out" => Some(TransformMode::PipeInUrlOut),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            TransformMode::PipeInPipeOut => 0,
            TransformMode::UrlInUrlOut => 1,
            TransformMode::PipeInUrlOut => 2,
        }
    }

    /// Select the wiring topology for this mode
    pub fn wiring(&self) -> Wiring {
        match self {
            TransformMode::PipeInPipeOut => Wiring {
                input: InputSide::Pipe,
                output: OutputSide::Pipe,
                restart: RestartPolicy::Continuous,
            },
            TransformMode::UrlInUrlOut => Wiring {
                input: InputSide::Url,
                output: OutputSide::Url,
                restart: RestartPolicy::Once,
            },
            TransformMode::PipeInUrlOut => Wiring {
                input: InputSide::Pipe,
                output: OutputSide::Url,
                restart: RestartPolicy::Continuous,
            },
        }
    }

    /// Suffix appended to the source path when no output path is given
    pub fn path_suffix(&self) -> String {
        format!("-ts{}", self.code())
    }
}

impl std::fmt::Display for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformMode::PipeInPipeOut => write!(f, "pipe-in/pipe-out"),
            TransformMode::UrlInUrlOut => write!(f, "url-in/url-out"),
            TransformMode::PipeInUrlOut => write!(f, "pipe-in/url-out"),
        }
    }
}
