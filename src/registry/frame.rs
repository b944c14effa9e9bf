//! Stream identity and media event types
//!
//! This module defines the key type for identifying streams and the events
//! that are delivered to subscribers.

use bytes::Bytes;

use crate::media::VideoCodec;

/// Logical stream path (e.g., "live/cam1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamPath(String);

impl StreamPath {
    /// Create a new stream path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for StreamPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamPath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamPath {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Video track announcement
///
/// Carries the parameter sets a decoder needs before it can accept frames,
/// in their defined order (SPS, PPS for H.264; VPS, SPS, PPS for H.265).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    /// Parameter-set NAL units without start codes
    pub parameter_sets: Vec<Bytes>,
}

impl VideoTrack {
    pub fn h264(sps: Bytes, pps: Bytes) -> Self {
        Self {
            codec: VideoCodec::H264,
            parameter_sets: vec![sps, pps],
        }
    }
}

/// One coded picture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Whether the picture is a keyframe
    pub keyframe: bool,
    /// NAL units without start codes
    pub nalus: Vec<Bytes>,
}

impl VideoFrame {
    /// Total payload size in bytes
    pub fn size(&self) -> usize {
        self.nalus.iter().map(|n| n.len()).sum()
    }
}

/// Media kind of an RTP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtpKind {
    Video,
    Audio,
}

/// Event delivered to subscribers
///
/// Cheap to clone: payloads are reference-counted `Bytes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Subscription established against a live stream
    Attached(StreamPath),
    /// The stream's publisher left or the stream was deleted
    Detached(StreamPath),
    /// Parameter-set-bearing video track announcement
    VideoTrack(VideoTrack),
    /// Coded video picture
    VideoFrame(VideoFrame),
    /// Raw RTP packet (accepted, not consumed by transforms)
    Rtp { kind: RtpKind, payload: Bytes },
}

impl MediaEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MediaEvent::Attached(_) => "attached",
            MediaEvent::Detached(_) => "detached",
            MediaEvent::VideoTrack(_) => "video_track",
            MediaEvent::VideoFrame(_) => "video_frame",
            MediaEvent::Rtp { .. } => "rtp",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_path() {
        let path = StreamPath::from("live/cam1");
        assert_eq!(path.as_str(), "live/cam1");
        assert_eq!(path.to_string(), "live/cam1");
        assert!(!path.is_empty());
        assert!(StreamPath::new("").is_empty());
    }

    #[test]
    fn test_frame_size() {
        let frame = VideoFrame {
            timestamp: 40,
            keyframe: true,
            nalus: vec![Bytes::from_static(&[0x65, 1, 2]), Bytes::from_static(&[0x06])],
        };
        assert_eq!(frame.size(), 4);
    }

    #[test]
    fn test_h264_track_order() {
        let track = VideoTrack::h264(Bytes::from_static(&[0x67]), Bytes::from_static(&[0x68]));
        assert_eq!(track.codec, VideoCodec::H264);
        assert_eq!(track.parameter_sets[0][0], 0x67);
        assert_eq!(track.parameter_sets[1][0], 0x68);
    }
}
