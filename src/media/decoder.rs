//! Container decoder seam
//!
//! The output pump hands the transcoder's raw output to a decoder and
//! republishes whatever events come out. Hosts that run the transcoder with
//! a muxed output format (e.g. MPEG-TS) plug their own demuxer in here.

use crate::error::DecodeError;
use crate::registry::MediaEvent;

/// Byte-fed decoder producing media events
pub trait ContainerDecoder: Send {
    /// Feed raw bytes read from the transcoder
    ///
    /// A `Malformed` error does not lose events decoded from the rest of the
    /// data; they are still returned by the next [`drain`](Self::drain).
    fn feed(&mut self, data: &[u8]) -> Result<(), DecodeError>;

    /// Flush anything buffered once the channel reached end of stream
    fn finish(&mut self) -> Result<(), DecodeError>;

    /// Take the events decoded so far
    fn drain(&mut self) -> Vec<MediaEvent>;
}

/// Creates one decoder per process instance
pub trait DecoderFactory: Send + Sync {
    fn create(&self, frame_rate: f64) -> Box<dyn ContainerDecoder>;
}

impl<F> DecoderFactory for F
where
    F: Fn(f64) -> Box<dyn ContainerDecoder> + Send + Sync,
{
    fn create(&self, frame_rate: f64) -> Box<dyn ContainerDecoder> {
        self(frame_rate)
    }
}
