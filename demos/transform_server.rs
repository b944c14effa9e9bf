//! Transform server demo - loops a raw H.264 file through ffmpeg
//!
//! Run with: cargo run --example transform_server -- <input.h264> [config.json]
//!
//! The input file is published at `live/cam1` in a loop, paced at 25 fps. A
//! `PipeInPipeOut` transform with a text overlay republishes it at
//! `live/cam1-ts0`, and a viewer on that path prints what comes out.
//!
//! Create a suitable input with:
//!   ffmpeg -i input.mp4 -an -c:v libx264 -bsf:v h264_mp4toannexb -f h264 input.h264
//!
//! The optional config file is JSON, for example:
//!
//! ```json
//! {
//!   "ffmpeg": "/usr/bin/ffmpeg",
//!   "restart_backoff": 1000,
//!   "on_start": [{ "source_path": "live/cam1", "mode": 1 }]
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stream_transform::media::{AnnexBDecoder, ContainerDecoder};
use stream_transform::registry::{SourceHandler, StreamEndpoints};
use stream_transform::{
    MediaEvent, StreamPath, StreamRegistry, TaskRequest, TransformConfig, TransformService,
};

const SOURCE: &str = "live/cam1";

/// Prints what the transform publishes
struct Viewer {
    frames: AtomicU64,
    keyframes: AtomicU64,
}

#[async_trait]
impl SourceHandler for Viewer {
    async fn on_event(&self, event: MediaEvent) {
        match event {
            MediaEvent::VideoTrack(track) => {
                println!(
                    "[viewer] track: {} with {} parameter sets",
                    track.codec,
                    track.parameter_sets.len()
                );
            }
            MediaEvent::VideoFrame(frame) => {
                let n = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
                if frame.keyframe {
                    self.keyframes.fetch_add(1, Ordering::Relaxed);
                }
                if n % 100 == 0 {
                    println!(
                        "[viewer] {} frames ({} keyframes), last ts={}ms",
                        n,
                        self.keyframes.load(Ordering::Relaxed),
                        frame.timestamp
                    );
                }
            }
            other => println!("[viewer] {}", other.kind()),
        }
    }
}

/// Publish the file's frames at `SOURCE`, looping forever
async fn publish_file(registry: StreamRegistry, data: Vec<u8>) {
    let path = StreamPath::from(SOURCE);
    let publication = match StreamEndpoints::publish(&registry, &path).await {
        Ok(publication) => publication,
        Err(e) => {
            eprintln!("Cannot publish source: {}", e);
            return;
        }
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(40));
    loop {
        let mut decoder = AnnexBDecoder::new(25.0);
        let fed = decoder.feed(&data);
        let finished = decoder.finish();
        if let Err(e) = fed.and(finished) {
            tracing::warn!(error = %e, "Input file has malformed units");
        }

        let events = decoder.drain();
        if events.is_empty() {
            eprintln!("No H.264 data found in input");
            return;
        }

        for event in events {
            if matches!(event, MediaEvent::VideoFrame(_)) {
                ticker.tick().await;
            }
            publication.write(event).await;
        }
    }
}

fn print_usage() {
    eprintln!("Usage: transform_server <input.h264> [config.json]");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        print_usage();
        std::process::exit(1);
    };

    let config: TransformConfig = match args.next() {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => TransformConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stream_transform=debug".parse()?)
                .add_directive("transform_server=debug".parse()?),
        )
        .init();

    let data = std::fs::read(&input)?;
    let registry = StreamRegistry::new();
    let _cleanup = registry.spawn_cleanup_task();

    tokio::spawn(publish_file(registry.clone(), data));
    // Let the source come up before the transform subscribes
    tokio::time::sleep(Duration::from_millis(200)).await;

    let service = TransformService::new(Arc::new(registry.clone()), config);
    service.run_startup().await;

    let task = service
        .request(
            TaskRequest::new(SOURCE)
                .resolution("640x360")
                .overlay_text("transform demo")
                .overlay_box("yellow"),
        )
        .await?;
    println!("Transforming {} -> {}", task.source(), task.output());

    let viewer = Arc::new(Viewer {
        frames: AtomicU64::new(0),
        keyframes: AtomicU64::new(0),
    });
    let mut subscription = None;
    let mut stats = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            _ = stats.tick() => {
                if subscription.is_none() {
                    match StreamEndpoints::subscribe(&registry, task.output(), viewer.clone()).await {
                        Ok(s) => subscription = Some(s),
                        Err(e) => println!("Output not ready yet: {}", e),
                    }
                }
                let s = task.stats();
                println!(
                    "Stats: status={:?} restarts={} in={}B out={}B dropped={} pid={:?}",
                    s.status, s.restart_count, s.bytes_in, s.bytes_out, s.dropped_samples, s.process_id
                );
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if let Some(subscription) = subscription {
        subscription.stop().await;
    }
    service.shutdown().await;

    Ok(())
}
