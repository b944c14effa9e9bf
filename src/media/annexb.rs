//! Annex-B elementary stream decoder
//!
//! Turns the raw H.264 byte stream the transcoder writes in `-f h264` mode
//! into track announcements and frames:
//!
//! ```text
//! 00 00 00 01 | SPS | 00 00 00 01 | PPS | 00 00 01 | IDR slice | 00 00 01 | slice ...
//!             └─────── VideoTrack ──────┘          └─ VideoFrame ┘          └─ VideoFrame
//! ```
//!
//! A NAL unit is complete once the next start code is seen, so the last
//! unit of every feed stays buffered until more data (or `finish`) arrives.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::registry::{MediaEvent, VideoFrame, VideoTrack};

use super::decoder::{ContainerDecoder, DecoderFactory};
use super::h264::{is_forbidden, starts_picture, NaluType};

const DEFAULT_FRAME_RATE: f64 = 25.0;

/// Find the next start code at or after `from`
///
/// Returns its position and length (3 or 4 bytes).
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            if i > 0 && data[i - 1] == 0 {
                return Some((i - 1, 4));
            }
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

/// Decoder for H.264 Annex-B byte streams
#[derive(Debug)]
pub struct AnnexBDecoder {
    buffer: BytesMut,
    /// Buffer offset the next start code search resumes from
    scan_from: usize,
    frame_duration_ms: f64,
    frame_index: u64,

    sps: Option<Bytes>,
    pps: Option<Bytes>,
    announced: Option<(Bytes, Bytes)>,

    /// NAL units of the access unit being assembled
    access_unit: Vec<Bytes>,
    has_vcl: bool,
    keyframe: bool,

    events: Vec<MediaEvent>,
    skipped_bytes: usize,
}

impl AnnexBDecoder {
    /// Create a decoder stamping frames at `frame_rate` frames per second
    pub fn new(frame_rate: f64) -> Self {
        let frame_rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            DEFAULT_FRAME_RATE
        };

        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scan_from: 0,
            frame_duration_ms: 1000.0 / frame_rate,
            frame_index: 0,
            sps: None,
            pps: None,
            announced: None,
            access_unit: Vec::new(),
            has_vcl: false,
            keyframe: false,
            events: Vec::new(),
            skipped_bytes: 0,
        }
    }

    /// Bytes discarded because they preceded any start code
    pub fn skipped_bytes(&self) -> usize {
        self.skipped_bytes
    }

    fn push_nalu(&mut self, nalu: Bytes) -> Result<(), DecodeError> {
        if nalu.is_empty() {
            return Ok(());
        }
        if is_forbidden(&nalu) {
            return Err(DecodeError::Malformed(format!(
                "forbidden bit set in {}-byte NAL unit",
                nalu.len()
            )));
        }

        match NaluType::from_byte(nalu[0]) {
            NaluType::Sps => {
                self.flush_access_unit();
                self.sps = Some(nalu);
                self.announce_track();
            }
            NaluType::Pps => {
                self.flush_access_unit();
                self.pps = Some(nalu);
                self.announce_track();
            }
            kind if kind.is_vcl() => {
                if self.has_vcl && starts_picture(&nalu) {
                    self.flush_access_unit();
                }
                self.keyframe |= kind.is_keyframe();
                self.has_vcl = true;
                self.access_unit.push(nalu);
            }
            NaluType::Aud | NaluType::Sei => {
                self.flush_access_unit();
                self.access_unit.push(nalu);
            }
            _ => self.access_unit.push(nalu),
        }

        Ok(())
    }

    fn announce_track(&mut self) {
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return;
        };

        let current = (sps.clone(), pps.clone());
        if self.announced.as_ref() == Some(&current) {
            return;
        }

        self.events.push(MediaEvent::VideoTrack(VideoTrack::h264(
            current.0.clone(),
            current.1.clone(),
        )));
        self.announced = Some(current);
    }

    fn flush_access_unit(&mut self) {
        if !self.has_vcl {
            return;
        }

        // 32-bit millisecond timestamps wrap around
        let timestamp = (self.frame_index as f64 * self.frame_duration_ms).round() as u64 as u32;
        self.frame_index += 1;

        self.events.push(MediaEvent::VideoFrame(VideoFrame {
            timestamp,
            keyframe: self.keyframe,
            nalus: std::mem::take(&mut self.access_unit),
        }));
        self.has_vcl = false;
        self.keyframe = false;
    }
}

impl ContainerDecoder for AnnexBDecoder {
    fn feed(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        self.buffer.extend_from_slice(data);

        let Some((first, first_len)) = find_start_code(&self.buffer, 0) else {
            // Keep a tail that may hold the beginning of a split start code
            let drop = self.buffer.len().saturating_sub(3);
            if drop > 0 {
                self.buffer.advance(drop);
                self.skipped_bytes += drop;
            }
            self.scan_from = 0;
            return Ok(());
        };
        if first > 0 {
            tracing::trace!(bytes = first, "Skipping data before first start code");
            self.buffer.advance(first);
            self.skipped_bytes += first;
            self.scan_from = 0;
        }

        // The buffer now opens with a start code; bytes before `scan_from`
        // were searched by an earlier feed
        let mut boundaries = vec![(0, first_len)];
        let mut from = first_len.max(self.scan_from);
        while let Some((pos, len)) = find_start_code(&self.buffer, from) {
            boundaries.push((pos, len));
            from = pos + len;
        }

        // Everything before the last start code is made of complete units
        let (last, _) = boundaries[boundaries.len() - 1];
        if boundaries.len() < 2 {
            self.scan_from = self.buffer.len().saturating_sub(3);
            return Ok(());
        }
        let complete = self.buffer.split_to(last).freeze();
        self.scan_from = self.buffer.len().saturating_sub(3);

        let mut result = Ok(());
        for pair in boundaries.windows(2) {
            let (pos, len) = pair[0];
            let end = pair[1].0;
            if let Err(e) = self.push_nalu(complete.slice(pos + len..end)) {
                result = Err(e);
            }
        }
        result
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        let mut result = Ok(());
        if let Some((pos, len)) = find_start_code(&self.buffer, 0) {
            let rest = self.buffer.split().freeze();
            result = self.push_nalu(rest.slice(pos + len..));
        }
        self.buffer.clear();
        self.scan_from = 0;
        self.flush_access_unit();
        result
    }

    fn drain(&mut self) -> Vec<MediaEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Creates an [`AnnexBDecoder`] per process instance
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnexBDecoderFactory;

impl DecoderFactory for AnnexBDecoderFactory {
    fn create(&self, frame_rate: f64) -> Box<dyn ContainerDecoder> {
        Box::new(AnnexBDecoder::new(frame_rate))
    }
}
