//! Output pump
//!
//! Reads the transcoder's stdout, decodes it and republishes the result at
//! the task's output path. One pump runs per process instance; it ends when
//! the pipe reaches end of stream or the instance token is cancelled.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::DecodeError;
use crate::media::ContainerDecoder;
use crate::registry::StreamEndpoints;

use super::config::TransformConfig;
use super::task::TransformTask;

/// Pumps decoded transcoder output into a publication
pub struct OutputPump<R> {
    task: Arc<TransformTask>,
    endpoints: Arc<dyn StreamEndpoints>,
    reader: R,
    decoder: Box<dyn ContainerDecoder>,
    read_buffer_size: usize,
    decode_retry: Duration,
    cancel: CancellationToken,
}

impl<R> OutputPump<R>
where
    R: AsyncRead + Send + Unpin,
{
    pub fn new(
        task: Arc<TransformTask>,
        endpoints: Arc<dyn StreamEndpoints>,
        reader: R,
        decoder: Box<dyn ContainerDecoder>,
        config: &TransformConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task,
            endpoints,
            reader,
            decoder,
            read_buffer_size: config.read_buffer_size.max(1),
            decode_retry: config.decode_retry,
            cancel,
        }
    }

    /// Run until the output channel closes
    ///
    /// Returns the number of bytes read.
    pub async fn run(mut self) -> u64 {
        let mut buf = vec![0u8; self.read_buffer_size];
        let mut total = 0u64;

        loop {
            // Reads win over cancellation so buffered output is drained first
            let n = tokio::select! {
                biased;
                result = self.reader.read(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        let e = DecodeError::Read(e);
                        tracing::error!(task_id = self.task.id(), error = %e, "Output channel read failed");
                        break;
                    }
                },
                _ = self.cancel.cancelled() => break,
            };

            total += n as u64;
            self.task
                .counters
                .bytes_out
                .fetch_add(n as u64, Ordering::Relaxed);

            self.ensure_publication().await;

            match self.decoder.feed(&buf[..n]) {
                Ok(()) => self.publish_pending().await,
                Err(e) if e.is_closed() => {
                    tracing::debug!(task_id = self.task.id(), "Decoder reports channel closed");
                    break;
                }
                Err(e) => {
                    self.task
                        .counters
                        .decode_errors
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task_id = self.task.id(), error = %e, "Feed error");
                    self.publish_pending().await;

                    tokio::select! {
                        _ = tokio::time::sleep(self.decode_retry) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }
            }
        }

        if let Err(e) = self.decoder.finish() {
            if !e.is_closed() {
                self.task
                    .counters
                    .decode_errors
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(task_id = self.task.id(), error = %e, "Error flushing decoder");
            }
        }
        self.publish_pending().await;

        tracing::debug!(task_id = self.task.id(), bytes = total, "Output pump finished");
        total
    }

    /// Create the publication on first data
    ///
    /// Anything left at the output path by a previous instance is deleted
    /// first so this instance owns the path exclusively.
    async fn ensure_publication(&mut self) {
        let mut slot = self.task.publication.lock().await;
        if slot.is_some() {
            return;
        }

        let output = self.task.output();
        if self.endpoints.lookup(output).await {
            tracing::debug!(stream = %output, "Deleting stale endpoint at output path");
            self.endpoints.delete(output).await;
        }

        match self.endpoints.publish(output).await {
            Ok(publication) => {
                tracing::info!(task_id = self.task.id(), stream = %output, "Publisher created");
                *slot = Some(publication);
            }
            Err(e) => {
                tracing::error!(
                    task_id = self.task.id(),
                    stream = %output,
                    error = %e,
                    "Failed to publish output"
                );
            }
        }
    }

    async fn publish_pending(&mut self) {
        let events = self.decoder.drain();
        if events.is_empty() {
            return;
        }

        let slot = self.task.publication.lock().await;
        let Some(publication) = slot.as_ref() else {
            tracing::debug!(
                task_id = self.task.id(),
                dropped = events.len(),
                "No publisher, dropping decoded events"
            );
            return;
        };

        for event in events {
            tracing::trace!(kind = event.kind(), "Publishing decoded event");
            publication.write(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio_test::io::Builder;

    use super::*;
    use crate::media::AnnexBDecoder;
    use crate::registry::{MediaEvent, SourceHandler, StreamRegistry};
    use crate::transform::request::TaskRequest;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC];
    const PPS: &[u8] = &[0x68, 0xEB, 0x8F, 0x2C];
    const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00];
    const P_SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x00];

    fn annexb(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    struct Collect(mpsc::UnboundedSender<MediaEvent>);

    #[async_trait]
    impl SourceHandler for Collect {
        async fn on_event(&self, event: MediaEvent) {
            let _ = self.0.send(event);
        }
    }

    fn setup() -> (Arc<TransformTask>, StreamRegistry, TransformConfig) {
        let task = Arc::new(TransformTask::new(
            1,
            TaskRequest::new("live/cam1").resolve().unwrap(),
        ));
        let config = TransformConfig::default().decode_retry(Duration::from_millis(10));
        (task, StreamRegistry::new(), config)
    }

    fn pump<R: AsyncRead + Send + Unpin>(
        task: &Arc<TransformTask>,
        registry: &StreamRegistry,
        config: &TransformConfig,
        reader: R,
    ) -> OutputPump<R> {
        OutputPump::new(
            Arc::clone(task),
            Arc::new(registry.clone()),
            reader,
            Box::new(AnnexBDecoder::new(25.0)),
            config,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_republishes_decoded_output() {
        let (task, registry, config) = setup();
        let data = annexb(&[SPS, PPS, IDR, P_SLICE]);
        let len = data.len() as u64;

        // Read split across two chunks
        let (head, tail) = data.split_at(10);
        let reader = Builder::new().read(head).read(tail).build();
        let pump = pump(&task, &registry, &config, reader);
        assert_eq!(pump.run().await, len);

        assert_eq!(task.stats().bytes_out, len);
        assert!(registry.has_active_stream(task.output()).await);
        let stats = registry.get_stream_stats(task.output()).await.unwrap();
        assert!(stats.has_video_track);
        assert_eq!(stats.frames, 2);

        // Late viewer still gets the track first
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription =
            StreamEndpoints::subscribe(&registry, task.output(), Arc::new(Collect(tx)))
                .await
                .unwrap();
        assert!(matches!(rx.recv().await, Some(MediaEvent::Attached(_))));
        assert!(matches!(rx.recv().await, Some(MediaEvent::VideoTrack(_))));
    }

    #[tokio::test]
    async fn test_stale_endpoint_replaced() {
        let (task, registry, config) = setup();

        // Left behind by a previous instance
        let stale = StreamEndpoints::publish(&registry, task.output())
            .await
            .unwrap();

        let pump = pump(&task, &registry, &config, Cursor::new(annexb(&[SPS, PPS, IDR])));
        pump.run().await;

        assert!(task.publication.lock().await.is_some());
        assert!(registry.has_active_stream(task.output()).await);

        // The old handle no longer controls the path
        stale.stop().await;
        assert!(registry.has_active_stream(task.output()).await);
    }

    #[tokio::test]
    async fn test_no_data_no_publication() {
        let (task, registry, config) = setup();
        let pump = pump(&task, &registry, &config, Cursor::new(Vec::new()));

        assert_eq!(pump.run().await, 0);
        assert!(task.publication.lock().await.is_none());
        assert!(!StreamEndpoints::lookup(&registry, task.output()).await);
    }

    #[tokio::test]
    async fn test_malformed_data_is_retried() {
        let (task, registry, config) = setup();
        let mut data = annexb(&[SPS, PPS, &[0x80, 0x00], IDR]);
        data.extend(annexb(&[P_SLICE]));
        let pump = pump(&task, &registry, &config, Cursor::new(data));

        pump.run().await;

        assert_eq!(task.stats().decode_errors, 1);
        let stats = registry.get_stream_stats(task.output()).await.unwrap();
        assert!(stats.has_video_track);
        assert_eq!(stats.frames, 2);
    }

    #[tokio::test]
    async fn test_read_error_ends_pump() {
        let (task, registry, config) = setup();
        let reader = Builder::new()
            .read(&annexb(&[SPS, PPS, IDR]))
            .read_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let pump = pump(&task, &registry, &config, reader);

        pump.run().await;

        // Buffered frame is flushed on the way out
        let stats = registry.get_stream_stats(task.output()).await.unwrap();
        assert_eq!(stats.frames, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_idle_pump() {
        let (task, registry, config) = setup();
        let (_writer, reader) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();

        let pump = OutputPump::new(
            Arc::clone(&task),
            Arc::new(registry.clone()),
            reader,
            Box::new(AnnexBDecoder::new(25.0)),
            &config,
            cancel.clone(),
        );
        let handle = tokio::spawn(pump.run());

        cancel.cancel();
        let total = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pump did not stop")
            .unwrap();
        assert_eq!(total, 0);
    }
}
