//! Supervised external transcoder pipelines for live media streams
//!
//! `stream-transform` runs an external transcoder (ffmpeg) as a child process
//! per transform task, feeds it a subscribed source stream and republishes
//! its output. The process is restarted after it exits, so a task keeps
//! running until it is explicitly stopped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stream_transform::{StreamRegistry, TaskRequest, TransformConfig, TransformMode, TransformService};
//!
//! #[tokio::main]
//! async fn main() -> stream_transform::Result<()> {
//!     let registry = StreamRegistry::new();
//!     let service = TransformService::new(Arc::new(registry), TransformConfig::default());
//!
//!     let task = service
//!         .request(
//!             TaskRequest::new("live/cam1")
//!                 .mode(TransformMode::PipeInPipeOut)
//!                 .resolution("720x576")
//!                 .overlay_text("M7S"),
//!         )
//!         .await?;
//!     println!("publishing at {}", task.output());
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modes
//!
//! - `PipeInPipeOut`: source in through stdin, stdout decoded and republished
//! - `UrlInUrlOut`: the transcoder pulls and pushes network URLs itself
//! - `PipeInUrlOut`: source in through stdin, the transcoder pushes to a URL

pub mod error;
pub mod media;
pub mod registry;
pub mod service;
pub mod stats;
pub mod transform;

pub use error::{Error, Result};
pub use registry::{MediaEvent, StreamEndpoints, StreamPath, StreamRegistry};
pub use service::TransformService;
pub use transform::{TaskRequest, TaskStatus, TransformConfig, TransformMode, TransformTask};
