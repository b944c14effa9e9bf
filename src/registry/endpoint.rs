//! Stream endpoint adapter
//!
//! The transform core only talks to the host engine through these traits:
//! subscribe a handler to a source path, publish to an output path, look a
//! path up and delete it. [`StreamRegistry`] implements them in memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::error::RegistryError;
use super::frame::{MediaEvent, StreamPath};
use super::store::StreamRegistry;

/// Receives events for one subscription
///
/// Invoked from the adapter's delivery context, one event at a time.
#[async_trait]
pub trait SourceHandler: Send + Sync {
    async fn on_event(&self, event: MediaEvent);
}

/// A live subscription; stopping it ends event delivery
#[async_trait]
pub trait Subscription: Send + Sync {
    fn path(&self) -> &StreamPath;

    /// Stop delivery and release the subscriber slot. Idempotent.
    async fn stop(&self);
}

/// Exclusive publishing rights on one path
#[async_trait]
pub trait Publication: Send + Sync {
    fn path(&self) -> &StreamPath;

    /// Publish one event to the path's subscribers
    async fn write(&self, event: MediaEvent);

    /// Give up the path. Idempotent.
    async fn stop(&self);
}

/// Host engine operations consumed by the transform core
#[async_trait]
pub trait StreamEndpoints: Send + Sync {
    async fn subscribe(
        &self,
        path: &StreamPath,
        handler: Arc<dyn SourceHandler>,
    ) -> Result<Box<dyn Subscription>, RegistryError>;

    async fn publish(&self, path: &StreamPath) -> Result<Box<dyn Publication>, RegistryError>;

    /// Whether anything is registered at `path`
    async fn lookup(&self, path: &StreamPath) -> bool;

    async fn delete(&self, path: &StreamPath);
}

/// Subscription backed by a delivery task on the registry's broadcast channel
struct RegistrySubscription {
    registry: StreamRegistry,
    path: StreamPath,
    released: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[async_trait]
impl Subscription for RegistrySubscription {
    fn path(&self) -> &StreamPath {
        &self.path
    }

    async fn stop(&self) {
        self.task.abort();
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.unsubscribe(&self.path).await;
        }
    }
}

/// Publication that broadcasts through the registry
struct RegistryPublication {
    registry: StreamRegistry,
    path: StreamPath,
    publisher_id: u64,
    stopped: AtomicBool,
}

#[async_trait]
impl Publication for RegistryPublication {
    fn path(&self) -> &StreamPath {
        &self.path
    }

    async fn write(&self, event: MediaEvent) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        self.registry.broadcast(&self.path, event).await;
    }

    async fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.registry
                .unregister_publisher(&self.path, self.publisher_id)
                .await;
        }
    }
}

#[async_trait]
impl StreamEndpoints for StreamRegistry {
    async fn subscribe(
        &self,
        path: &StreamPath,
        handler: Arc<dyn SourceHandler>,
    ) -> Result<Box<dyn Subscription>, RegistryError> {
        let (mut rx, catchup) = StreamRegistry::subscribe(self, path).await?;

        let released = Arc::new(AtomicBool::new(false));
        let registry = self.clone();
        let stream = path.clone();
        let task_released = Arc::clone(&released);

        let task = tokio::spawn(async move {
            handler.on_event(MediaEvent::Attached(stream.clone())).await;
            for event in catchup {
                handler.on_event(event).await;
            }

            loop {
                match rx.recv().await {
                    Ok(event) => handler.on_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(stream = %stream, skipped = skipped, "Subscriber lagging");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            tracing::debug!(stream = %stream, "Subscription delivery ended");
            if !task_released.swap(true, Ordering::AcqRel) {
                registry.unsubscribe(&stream).await;
            }
        });

        Ok(Box::new(RegistrySubscription {
            registry: self.clone(),
            path: path.clone(),
            released,
            task,
        }))
    }

    async fn publish(&self, path: &StreamPath) -> Result<Box<dyn Publication>, RegistryError> {
        let publisher_id = self.next_publisher_id();
        self.register_publisher(path, publisher_id).await?;

        Ok(Box::new(RegistryPublication {
            registry: self.clone(),
            path: path.clone(),
            publisher_id,
            stopped: AtomicBool::new(false),
        }))
    }

    async fn lookup(&self, path: &StreamPath) -> bool {
        self.stream_exists(path).await
    }

    async fn delete(&self, path: &StreamPath) {
        self.delete_stream(path).await;
    }
}
