//! Error types
//!
//! Each concern has its own error enum; [`Error`] wraps them for callers that
//! only want one type to propagate.

use std::fmt;
use std::io;

use crate::media::VideoCodec;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure (process spawn, pipe access)
    Io(io::Error),
    /// Stream registry / endpoint failure
    Registry(RegistryError),
    /// Rejected transform request
    Task(TaskError),
    /// Input pump failure
    Input(InputError),
    /// Container decoder failure
    Decode(DecodeError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::Task(e) => write!(f, "Task error: {}", e),
            Error::Input(e) => write!(f, "Input error: {}", e),
            Error::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Task(e) => Some(e),
            Error::Input(e) => Some(e),
            Error::Decode(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<TaskError> for Error {
    fn from(e: TaskError) -> Self {
        Error::Task(e)
    }
}

impl From<InputError> for Error {
    fn from(e: InputError) -> Self {
        Error::Input(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

/// Configuration errors raised synchronously when a transform is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The request carried no source path
    EmptySourcePath,
    /// A task already owns this output path
    DuplicateOutput(String),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskError::EmptySourcePath => write!(f, "Source path is empty"),
            TaskError::DuplicateOutput(path) => {
                write!(f, "Output path already has a transform task: {}", path)
            }
        }
    }
}

impl std::error::Error for TaskError {}

/// Errors from writing samples into the transcoder's input channel
#[derive(Debug)]
pub enum InputError {
    /// No process instance currently owns an input channel
    ChannelUnbound,
    /// The write itself failed
    Write(io::Error),
    /// Parameter-set forwarding is not implemented for this codec
    UnsupportedCodec(VideoCodec),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::ChannelUnbound => write!(f, "No input channel bound"),
            InputError::Write(e) => write!(f, "Write to input channel failed: {}", e),
            InputError::UnsupportedCodec(codec) => {
                write!(f, "Parameter sets not supported for codec {}", codec)
            }
        }
    }
}

impl std::error::Error for InputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InputError::Write(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors reported by a container decoder
#[derive(Debug)]
pub enum DecodeError {
    /// The readable channel is closed; terminal for the current process instance
    Closed,
    /// Reading from the channel failed for another reason
    Read(io::Error),
    /// The byte stream could not be parsed
    Malformed(String),
}

impl DecodeError {
    /// Whether this error ends the output pump for the current process instance
    pub fn is_closed(&self) -> bool {
        matches!(self, DecodeError::Closed)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Closed => write!(f, "Channel already closed"),
            DecodeError::Read(e) => write!(f, "Read failed: {}", e),
            DecodeError::Malformed(msg) => write!(f, "Malformed data: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_error_display() {
        let err = TaskError::DuplicateOutput("live/cam1-ts0".into());
        assert_eq!(
            err.to_string(),
            "Output path already has a transform task: live/cam1-ts0"
        );
        assert_eq!(TaskError::EmptySourcePath.to_string(), "Source path is empty");
    }

    #[test]
    fn test_error_conversions() {
        let err: Error = TaskError::EmptySourcePath.into();
        assert!(matches!(err, Error::Task(TaskError::EmptySourcePath)));

        let err: Error = io::Error::new(io::ErrorKind::NotFound, "ffmpeg").into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unsupported_codec_message() {
        let err = InputError::UnsupportedCodec(VideoCodec::H265);
        assert_eq!(err.to_string(), "Parameter sets not supported for codec H265");
    }

    #[test]
    fn test_decode_error_closed() {
        assert!(DecodeError::Closed.is_closed());
        assert!(!DecodeError::Malformed("bad".into()).is_closed());
    }
}
