//! Stream registry implementation
//!
//! The central registry that manages all live streams and routes media
//! from publishers to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, RwLock};

use super::config::RegistryConfig;
use super::entry::{StreamEntry, StreamState, StreamStats};
use super::error::RegistryError;
use super::frame::{MediaEvent, StreamPath};

struct Inner {
    /// Map of stream path to stream entry
    streams: RwLock<HashMap<StreamPath, Arc<RwLock<StreamEntry>>>>,

    /// Source of publisher IDs handed out by [`StreamRegistry::next_publisher_id`]
    next_publisher_id: AtomicU64,

    /// Configuration
    config: RegistryConfig,
}

/// Central registry for all live streams
///
/// Cheap to clone; clones share the same streams. Thread-safe via `RwLock`.
/// Read-heavy workloads (subscriber count checks, broadcasting) benefit from
/// the concurrent read access.
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<Inner>,
}

impl StreamRegistry {
    /// Create a new stream registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new stream registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: RwLock::new(HashMap::new()),
                next_publisher_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Allocate a unique publisher ID
    pub fn next_publisher_id(&self) -> u64 {
        self.inner.next_publisher_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a publisher for a stream
    ///
    /// If the stream doesn't exist, it will be created. An idle stream is
    /// reclaimed, keeping its subscribers. Returns an error if the stream
    /// already has an active publisher.
    pub async fn register_publisher(
        &self,
        path: &StreamPath,
        publisher_id: u64,
    ) -> Result<(), RegistryError> {
        let mut streams = self.inner.streams.write().await;

        if let Some(entry_arc) = streams.get(path) {
            let mut entry = entry_arc.write().await;

            if entry.has_publisher() {
                return Err(RegistryError::StreamAlreadyPublishing(path.clone()));
            }

            entry.publisher_id = Some(publisher_id);
            entry.publisher_left_at = None;
            entry.state = StreamState::Active;

            tracing::info!(
                stream = %path,
                publisher_id = publisher_id,
                subscribers = entry.subscriber_count(),
                "Publisher registered (existing stream)"
            );
        } else {
            let mut entry = StreamEntry::new(&self.inner.config);
            entry.publisher_id = Some(publisher_id);
            entry.state = StreamState::Active;

            streams.insert(path.clone(), Arc::new(RwLock::new(entry)));

            tracing::info!(
                stream = %path,
                publisher_id = publisher_id,
                "Publisher registered (new stream)"
            );
        }

        Ok(())
    }

    /// Unregister a publisher from a stream
    ///
    /// The stream goes idle and subscribers are told the source detached.
    /// The cached track is dropped; the next publisher announces its own.
    pub async fn unregister_publisher(&self, path: &StreamPath, publisher_id: u64) {
        let streams = self.inner.streams.read().await;

        if let Some(entry_arc) = streams.get(path) {
            let mut entry = entry_arc.write().await;

            if entry.publisher_id != Some(publisher_id) {
                tracing::warn!(
                    stream = %path,
                    expected = ?entry.publisher_id,
                    actual = publisher_id,
                    "Publisher unregister mismatch"
                );
                return;
            }

            entry.publisher_id = None;
            entry.publisher_left_at = Some(Instant::now());
            entry.state = StreamState::Idle;
            entry.video_track = None;
            entry.send(MediaEvent::Detached(path.clone()));

            tracing::info!(
                stream = %path,
                publisher_id = publisher_id,
                subscribers = entry.subscriber_count(),
                "Publisher unregistered"
            );
        }
    }

    /// Subscribe to a stream
    ///
    /// Returns a broadcast receiver and catchup events for the subscriber.
    pub async fn subscribe(
        &self,
        path: &StreamPath,
    ) -> Result<(broadcast::Receiver<MediaEvent>, Vec<MediaEvent>), RegistryError> {
        let streams = self.inner.streams.read().await;

        let entry_arc = streams
            .get(path)
            .ok_or_else(|| RegistryError::StreamNotFound(path.clone()))?;

        let entry = entry_arc.read().await;

        if entry.state == StreamState::Idle {
            return Err(RegistryError::StreamNotActive(path.clone()));
        }

        let rx = entry.subscribe();
        let catchup = entry.get_catchup_events();

        entry.subscriber_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            stream = %path,
            subscribers = entry.subscriber_count(),
            catchup_events = catchup.len(),
            "Subscriber added"
        );

        Ok((rx, catchup))
    }

    /// Unsubscribe from a stream
    pub async fn unsubscribe(&self, path: &StreamPath) {
        let streams = self.inner.streams.read().await;

        if let Some(entry_arc) = streams.get(path) {
            let entry = entry_arc.read().await;
            let prev = entry
                .subscriber_count
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    Some(n.saturating_sub(1))
                })
                .unwrap_or(0);

            tracing::debug!(
                stream = %path,
                subscribers = prev.saturating_sub(1),
                "Subscriber removed"
            );
        }
    }

    /// Broadcast an event to all subscribers of a stream
    ///
    /// Also updates the cached track announcement as needed.
    pub async fn broadcast(&self, path: &StreamPath, event: MediaEvent) {
        let streams = self.inner.streams.read().await;

        if let Some(entry_arc) = streams.get(path) {
            let mut entry = entry_arc.write().await;
            entry.update_caches(&event);
            let _ = entry.send(event);
        }
    }

    /// Remove a stream entirely
    ///
    /// Subscribers receive `Detached`, then their channel closes.
    /// Returns whether the stream existed.
    pub async fn delete_stream(&self, path: &StreamPath) -> bool {
        let removed = self.inner.streams.write().await.remove(path);

        match removed {
            Some(entry_arc) => {
                let entry = entry_arc.read().await;
                entry.send(MediaEvent::Detached(path.clone()));
                tracing::info!(
                    stream = %path,
                    publisher_id = ?entry.publisher_id,
                    subscribers = entry.subscriber_count(),
                    "Stream deleted"
                );
                true
            }
            None => false,
        }
    }

    /// Check if a stream exists and has an active publisher
    pub async fn has_active_stream(&self, path: &StreamPath) -> bool {
        let streams = self.inner.streams.read().await;

        if let Some(entry_arc) = streams.get(path) {
            let entry = entry_arc.read().await;
            entry.state == StreamState::Active && entry.has_publisher()
        } else {
            false
        }
    }

    /// Check if a stream entry exists (active or idle)
    pub async fn stream_exists(&self, path: &StreamPath) -> bool {
        self.inner.streams.read().await.contains_key(path)
    }

    /// Get stream statistics
    pub async fn get_stream_stats(&self, path: &StreamPath) -> Option<StreamStats> {
        let streams = self.inner.streams.read().await;

        if let Some(entry_arc) = streams.get(path) {
            let entry = entry_arc.read().await;
            Some(StreamStats {
                subscriber_count: entry.subscriber_count(),
                has_publisher: entry.has_publisher(),
                publisher_id: entry.publisher_id,
                state: entry.state,
                has_video_track: entry.video_track.is_some(),
                frames: entry.frames,
            })
        } else {
            None
        }
    }

    /// Get total number of streams
    pub async fn stream_count(&self) -> usize {
        self.inner.streams.read().await.len()
    }

    /// Run cleanup task once
    ///
    /// Removes idle streams without subscribers that have been idle longer
    /// than `idle_stream_timeout`.
    pub async fn cleanup(&self) {
        let mut streams = self.inner.streams.write().await;
        let now = Instant::now();
        let timeout = self.inner.config.idle_stream_timeout;

        let paths_to_remove: Vec<StreamPath> = streams
            .iter()
            .filter_map(|(path, entry_arc)| {
                // Skip entries that are busy right now
                let entry = entry_arc.try_read().ok()?;
                if entry.state != StreamState::Idle || entry.subscriber_count() > 0 {
                    return None;
                }
                let since = entry.publisher_left_at.unwrap_or(entry.created_at);
                (now.duration_since(since) > timeout).then(|| path.clone())
            })
            .collect();

        for path in paths_to_remove {
            streams.remove(&path);
            tracing::info!(stream = %path, "Stream removed by cleanup");
        }
    }

    /// Spawn background cleanup task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_cleanup_task(&self) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let interval = registry.inner.config.cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.cleanup().await;
            }
        })
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::registry::frame::{VideoFrame, VideoTrack};

    fn frame(timestamp: u32) -> MediaEvent {
        MediaEvent::VideoFrame(VideoFrame {
            timestamp,
            keyframe: timestamp == 0,
            nalus: vec![Bytes::from_static(&[0x65, 0x88])],
        })
    }

    #[tokio::test]
    async fn test_register_publisher() {
        let registry = StreamRegistry::new();
        let path = StreamPath::from("live/test_stream");

        registry.register_publisher(&path, 1).await.unwrap();
        assert!(registry.has_active_stream(&path).await);

        // Can't register another publisher
        let result = registry.register_publisher(&path, 2).await;
        assert!(matches!(
            result,
            Err(RegistryError::StreamAlreadyPublishing(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let registry = StreamRegistry::new();
        let path = StreamPath::from("live/test_stream");

        registry.register_publisher(&path, 1).await.unwrap();

        let (mut rx, catchup) = registry.subscribe(&path).await.unwrap();
        assert!(catchup.is_empty());

        registry.broadcast(&path, frame(0)).await;

        match rx.recv().await.unwrap() {
            MediaEvent::VideoFrame(f) => assert!(f.keyframe),
            other => panic!("unexpected event: {:?}", other),
        }

        registry.unsubscribe(&path).await;

        let stats = registry.get_stream_stats(&path).await.unwrap();
        assert_eq!(stats.subscriber_count, 0);
        assert_eq!(stats.frames, 1);
    }

    #[tokio::test]
    async fn test_subscribe_missing_stream() {
        let registry = StreamRegistry::new();
        let path = StreamPath::from("live/none");

        let result = registry.subscribe(&path).await;
        assert!(matches!(result, Err(RegistryError::StreamNotFound(_))));
    }

    #[tokio::test]
    async fn test_unregister_detaches_subscribers() {
        let registry = StreamRegistry::new();
        let path = StreamPath::from("live/test_stream");

        registry.register_publisher(&path, 1).await.unwrap();
        let (mut rx, _) = registry.subscribe(&path).await.unwrap();

        // Wrong publisher is ignored
        registry.unregister_publisher(&path, 9).await;
        assert!(registry.has_active_stream(&path).await);

        registry.unregister_publisher(&path, 1).await;
        assert_eq!(rx.recv().await.unwrap(), MediaEvent::Detached(path.clone()));

        let stats = registry.get_stream_stats(&path).await.unwrap();
        assert_eq!(stats.state, StreamState::Idle);
        assert!(!stats.has_publisher);

        // New subscribers are refused while idle
        let result = registry.subscribe(&path).await;
        assert!(matches!(result, Err(RegistryError::StreamNotActive(_))));

        // A new publisher reclaims the stream with its subscribers
        registry.register_publisher(&path, 2).await.unwrap();
        let stats = registry.get_stream_stats(&path).await.unwrap();
        assert_eq!(stats.publisher_id, Some(2));
        assert_eq!(stats.subscriber_count, 1);
    }

    #[tokio::test]
    async fn test_catchup_track() {
        let registry = StreamRegistry::new();
        let path = StreamPath::from("live/test_stream");

        registry.register_publisher(&path, 1).await.unwrap();

        let track = VideoTrack::h264(
            Bytes::from_static(&[0x67, 0x64, 0x00, 0x1F]),
            Bytes::from_static(&[0x68, 0xEB]),
        );
        registry
            .broadcast(&path, MediaEvent::VideoTrack(track.clone()))
            .await;
        registry.broadcast(&path, frame(0)).await;

        // Late joiner gets the track announcement first
        let (_rx, catchup) = registry.subscribe(&path).await.unwrap();
        assert_eq!(catchup, vec![MediaEvent::VideoTrack(track)]);
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let registry = StreamRegistry::new();
        let path = StreamPath::from("live/test_stream");

        registry.register_publisher(&path, 1).await.unwrap();
        let (mut rx, _) = registry.subscribe(&path).await.unwrap();

        assert!(registry.delete_stream(&path).await);
        assert!(!registry.delete_stream(&path).await);
        assert!(!registry.stream_exists(&path).await);

        assert_eq!(rx.recv().await.unwrap(), MediaEvent::Detached(path.clone()));
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));

        // Path is free for a new publisher
        registry.register_publisher(&path, 2).await.unwrap();
        assert_eq!(registry.stream_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_idle_streams() {
        let config = RegistryConfig::default().idle_stream_timeout(Duration::from_millis(10));
        let registry = StreamRegistry::with_config(config);
        let path = StreamPath::from("live/test_stream");

        registry.register_publisher(&path, 1).await.unwrap();
        registry.unregister_publisher(&path, 1).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.cleanup().await;

        assert_eq!(registry.stream_count().await, 0);
    }
}
