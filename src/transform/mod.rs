//! Supervised external transcoding
//!
//! A transform subscribes to a source stream, pipes it through an external
//! transcoder process and republishes what comes out:
//!
//! ```text
//!  source ──► InputPump ──► stdin ┐                ┌ stdout ──► OutputPump ──► output
//!                                 └── transcoder ──┘
//! ```
//!
//! Which pipes exist depends on the [`TransformMode`]. The [`TaskRegistry`]
//! keeps at most one task per output path and each task runs its own
//! supervise loop that restarts the transcoder after it exits.

pub mod command;
pub mod config;
pub mod input;
pub mod mode;
pub mod output;
pub mod registry;
pub mod request;
mod supervisor;
pub mod task;

pub use command::{overlay_filter, CommandSpawner, Invocation, ProcessIo, ProcessSpawner};
pub use config::{PipeFormat, TransformConfig};
pub use input::InputPump;
pub use mode::{InputSide, OutputSide, RestartPolicy, TransformMode, Wiring};
pub use output::OutputPump;
pub use registry::TaskRegistry;
pub use request::{Overlay, ResolvedRequest, TaskParams, TaskRequest};
pub use task::{InputChannel, TaskStatus, TransformTask};
