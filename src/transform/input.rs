//! Input pump
//!
//! Moves media from the subscribed source into the transcoder's input
//! channel as an Annex-B byte stream. The pump has no task of its own: the
//! endpoint adapter invokes it from its delivery context.
//!
//! Writes are best effort. While no process instance owns an input channel
//! samples are dropped, and a failed write is logged without stopping the
//! source.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

use crate::error::InputError;
use crate::media::h264::with_start_code;
use crate::media::{VideoCodec, START_CODE};
use crate::registry::{MediaEvent, SourceHandler, VideoFrame, VideoTrack};

use super::task::TransformTask;

/// Writes subscribed samples into a task's input channel
pub struct InputPump {
    task: Arc<TransformTask>,
}

impl InputPump {
    pub fn new(task: Arc<TransformTask>) -> Self {
        Self { task }
    }

    /// Handle one event from the source
    ///
    /// Returns the number of bytes written.
    pub async fn on_sample(&self, event: MediaEvent) -> Result<usize, InputError> {
        match event {
            MediaEvent::VideoTrack(track) => self.write_parameter_sets(&track).await,
            MediaEvent::VideoFrame(frame) => self.write_frame(&frame).await,
            MediaEvent::Attached(path) => {
                tracing::info!(task_id = self.task.id(), stream = %path, "Source attached");
                Ok(0)
            }
            MediaEvent::Detached(path) => {
                tracing::info!(task_id = self.task.id(), stream = %path, "Source detached");
                Ok(0)
            }
            MediaEvent::Rtp { kind, payload } => {
                tracing::trace!(kind = ?kind, len = payload.len(), "Ignoring RTP packet");
                Ok(0)
            }
        }
    }

    /// Write a track's parameter sets, each prefixed with a start code
    pub async fn write_parameter_sets(&self, track: &VideoTrack) -> Result<usize, InputError> {
        match track.codec {
            VideoCodec::H264 => {
                let mut written = 0;
                for set in track.parameter_sets.iter().filter(|s| !s.is_empty()) {
                    tracing::debug!(
                        task_id = self.task.id(),
                        nal_type = set[0] & 0x1F,
                        len = set.len(),
                        "Writing parameter set"
                    );
                    written += self.write_unit(with_start_code(set)).await?;
                }
                Ok(written)
            }
            VideoCodec::H265 => Err(InputError::UnsupportedCodec(track.codec)),
        }
    }

    /// Write all NAL units of a frame as one Annex-B chunk
    pub async fn write_frame(&self, frame: &VideoFrame) -> Result<usize, InputError> {
        if frame.nalus.is_empty() {
            return Ok(0);
        }

        let mut buf = BytesMut::with_capacity(frame.size() + frame.nalus.len() * START_CODE.len());
        for nalu in &frame.nalus {
            buf.put_slice(&START_CODE);
            buf.put_slice(nalu);
        }
        self.write_unit(buf.freeze()).await
    }

    /// Write one chunk to the current input channel
    ///
    /// Re-checks the channel on every call; the process may have been
    /// replaced since the last write.
    pub async fn write_unit(&self, unit: Bytes) -> Result<usize, InputError> {
        let mut slot = self.task.input.lock().await;
        let counters = &self.task.counters;

        let Some(channel) = slot.as_mut() else {
            counters.dropped_samples.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                task_id = self.task.id(),
                len = unit.len(),
                "No input channel bound, dropping sample"
            );
            return Err(InputError::ChannelUnbound);
        };

        match channel.write_all(&unit).await {
            Ok(()) => {
                counters.bytes_in.fetch_add(unit.len() as u64, Ordering::Relaxed);
                Ok(unit.len())
            }
            Err(e) => {
                counters.write_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(task_id = self.task.id(), error = %e, "Write to input channel failed");
                Err(InputError::Write(e))
            }
        }
    }
}

#[async_trait]
impl SourceHandler for InputPump {
    async fn on_event(&self, event: MediaEvent) {
        match self.on_sample(event).await {
            Ok(_) | Err(InputError::ChannelUnbound) | Err(InputError::Write(_)) => {}
            Err(e) => {
                tracing::warn!(task_id = self.task.id(), error = %e, "Sample not forwarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::io::Builder;

    use super::*;
    use crate::transform::request::TaskRequest;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F];
    const PPS: &[u8] = &[0x68, 0xEB, 0x8F, 0x2C];

    fn task() -> Arc<TransformTask> {
        Arc::new(TransformTask::new(
            1,
            TaskRequest::new("live/cam1").resolve().unwrap(),
        ))
    }

    fn track() -> VideoTrack {
        VideoTrack::h264(Bytes::from_static(SPS), Bytes::from_static(PPS))
    }

    fn frame() -> VideoFrame {
        VideoFrame {
            timestamp: 0,
            keyframe: true,
            nalus: vec![Bytes::from_static(&[0x06, 0x05]), Bytes::from_static(&[0x65, 0x88])],
        }
    }

    #[tokio::test]
    async fn test_parameter_sets_before_frames() {
        let task = task();
        let mock = Builder::new()
            .write(&[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F])
            .write(&[0, 0, 0, 1, 0x68, 0xEB, 0x8F, 0x2C])
            .write(&[0, 0, 0, 1, 0x06, 0x05, 0, 0, 0, 1, 0x65, 0x88])
            .build();
        task.bind_input(Box::new(mock)).await;

        let pump = InputPump::new(Arc::clone(&task));
        pump.on_sample(MediaEvent::Attached("live/cam1".into()))
            .await
            .unwrap();
        assert_eq!(pump.on_sample(MediaEvent::VideoTrack(track())).await.unwrap(), 16);
        assert_eq!(pump.on_sample(MediaEvent::VideoFrame(frame())).await.unwrap(), 12);

        assert_eq!(task.bytes_in(), 28);
        // Dropping the mock verifies every expected write happened
        task.unbind_input().await;
    }

    #[tokio::test]
    async fn test_drop_without_channel() {
        let task = task();
        let pump = InputPump::new(Arc::clone(&task));

        let result = tokio::time::timeout(
            Duration::from_millis(100),
            pump.on_sample(MediaEvent::VideoFrame(frame())),
        )
        .await
        .expect("write must not block");

        assert!(matches!(result, Err(InputError::ChannelUnbound)));
        assert_eq!(task.bytes_in(), 0);
        assert_eq!(task.stats().dropped_samples, 1);

        // Through the handler interface nothing surfaces to the caller
        pump.on_event(MediaEvent::VideoFrame(frame())).await;
        assert_eq!(task.bytes_in(), 0);
    }

    #[tokio::test]
    async fn test_write_error_is_counted() {
        let task = task();
        let mock = Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed"))
            .build();
        task.bind_input(Box::new(mock)).await;

        let pump = InputPump::new(Arc::clone(&task));
        let result = pump.write_frame(&frame()).await;

        assert!(matches!(result, Err(InputError::Write(_))));
        assert_eq!(task.bytes_in(), 0);
        assert_eq!(task.stats().write_errors, 1);
    }

    #[tokio::test]
    async fn test_h265_parameter_sets_unsupported() {
        let task = task();
        task.bind_input(Box::new(tokio::io::sink())).await;
        let pump = InputPump::new(Arc::clone(&task));

        let track = VideoTrack {
            codec: VideoCodec::H265,
            parameter_sets: vec![Bytes::from_static(&[0x40, 0x01])],
        };
        let result = pump.write_parameter_sets(&track).await;

        assert!(matches!(
            result,
            Err(InputError::UnsupportedCodec(VideoCodec::H265))
        ));
        assert_eq!(task.bytes_in(), 0);
    }

    #[tokio::test]
    async fn test_empty_parameter_sets_skipped() {
        let task = task();
        let mock = Builder::new()
            .write(&[0, 0, 0, 1, 0x68, 0xEB, 0x8F, 0x2C])
            .build();
        task.bind_input(Box::new(mock)).await;

        let pump = InputPump::new(Arc::clone(&task));
        let track = VideoTrack::h264(Bytes::new(), Bytes::from_static(PPS));
        assert_eq!(pump.write_parameter_sets(&track).await.unwrap(), 8);
        task.unbind_input().await;
    }
}
