//! Stream registry for pub/sub routing
//!
//! The registry is the host side of a transform: sources publish into it,
//! transform tasks subscribe to a source path and publish their output on a
//! new path. It uses `tokio::sync::broadcast` for zero-copy fan-out.
//!
//! # Architecture
//!
//! ```text
//!                            StreamRegistry
//!                     ┌─────────────────────────┐
//!                     │ streams: HashMap<Path,  │
//!                     │   StreamEntry {         │
//!                     │     video_track,        │
//!                     │     tx: broadcast::Tx,  │
//!                     │   }                     │
//!                     │ >                       │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │                       │                       │
//!         ▼                       ▼                       ▼
//!    [Publication]          [Subscription]          [Subscription]
//!    write(event)           delivery task           delivery task
//!         │                       │                       │
//!         └──► broadcast() ──► SourceHandler::on_event() ◄┘
//! ```
//!
//! The core never depends on `StreamRegistry` directly, only on the
//! [`StreamEndpoints`] trait, so a host engine can plug in its own registry.

pub mod config;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod frame;
pub mod store;

pub use config::RegistryConfig;
pub use endpoint::{Publication, SourceHandler, StreamEndpoints, Subscription};
pub use entry::{StreamEntry, StreamState, StreamStats};
pub use error::RegistryError;
pub use frame::{MediaEvent, RtpKind, StreamPath, VideoFrame, VideoTrack};
pub use store::StreamRegistry;
