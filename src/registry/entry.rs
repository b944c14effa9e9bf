//! Stream entry and state types
//!
//! This module defines the per-stream state stored in the registry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use tokio::sync::broadcast;

use super::config::RegistryConfig;
use super::frame::{MediaEvent, VideoTrack};

/// State of a stream entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Stream has an active publisher
    Active,
    /// No publisher, waiting for a new one or for cleanup
    Idle,
}

/// Entry for a single stream in the registry
pub struct StreamEntry {
    /// Latest video track announcement, replayed to new subscribers
    pub video_track: Option<VideoTrack>,

    /// Current publisher's ID (None if no publisher)
    pub publisher_id: Option<u64>,

    /// Broadcast sender for fan-out to subscribers
    pub(super) tx: broadcast::Sender<MediaEvent>,

    /// Number of active subscribers
    pub subscriber_count: AtomicU32,

    /// When the publisher left
    pub publisher_left_at: Option<Instant>,

    /// When the stream was created
    pub created_at: Instant,

    /// Current stream state
    pub state: StreamState,

    /// Frames broadcast since the entry was created
    pub frames: u64,
}

impl StreamEntry {
    /// Create a new stream entry
    pub(super) fn new(config: &RegistryConfig) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_capacity);

        Self {
            video_track: None,
            publisher_id: None,
            tx,
            subscriber_count: AtomicU32::new(0),
            publisher_left_at: None,
            created_at: Instant::now(),
            state: StreamState::Idle,
            frames: 0,
        }
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> u32 {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Check if the stream has an active publisher
    pub fn has_publisher(&self) -> bool {
        self.publisher_id.is_some()
    }

    /// Get catchup events for a new subscriber
    ///
    /// The cached track announcement comes first so parameter sets always
    /// precede frames on a fresh subscription.
    pub fn get_catchup_events(&self) -> Vec<MediaEvent> {
        self.video_track
            .iter()
            .cloned()
            .map(MediaEvent::VideoTrack)
            .collect()
    }

    /// Subscribe to this stream's broadcast channel
    pub(super) fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }

    /// Send an event to all subscribers
    ///
    /// Returns the number of receivers that got the event, or 0 if there are none.
    pub(super) fn send(&self, event: MediaEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Update the cached track and counters based on event type
    pub(super) fn update_caches(&mut self, event: &MediaEvent) {
        match event {
            MediaEvent::VideoTrack(track) => {
                self.video_track = Some(track.clone());
            }
            MediaEvent::VideoFrame(_) => {
                self.frames += 1;
            }
            _ => {}
        }
    }
}

/// Statistics for a stream
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Number of active subscribers
    pub subscriber_count: u32,
    /// Whether the stream has an active publisher
    pub has_publisher: bool,
    /// Current publisher ID
    pub publisher_id: Option<u64>,
    /// Current stream state
    pub state: StreamState,
    /// Whether a track announcement is cached
    pub has_video_track: bool,
    /// Frames broadcast so far
    pub frames: u64,
}
