//! Transform requests and their resolved parameters
//!
//! A [`TaskRequest`] is what an operator (or the startup list) submits. Unset
//! fields are filled in with defaults by [`TaskRequest::resolve`], producing
//! the immutable [`TaskParams`] a task runs with.

use serde::Deserialize;

use crate::error::TaskError;
use crate::registry::StreamPath;

use super::mode::TransformMode;

pub const DEFAULT_FRAME_RATE: &str = "25";
pub const DEFAULT_RESOLUTION: &str = "352x288";
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
pub const DEFAULT_OVERLAY_TEXT: &str = "transcode";
pub const DEFAULT_OVERLAY_COLOR: &str = "green";
pub const DEFAULT_OVERLAY_BOX_COLOR: &str = "yellow";
pub const DEFAULT_OVERLAY_FONT_SIZE: u32 = 100;
pub const DEFAULT_OVERLAY_POSITION: i32 = 100;

/// A request to start one transform
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TaskRequest {
    /// Source stream path
    pub source_path: String,

    /// Explicit output path; derived from source path and mode when unset
    pub output_path: Option<String>,

    pub mode: TransformMode,

    /// Target resolution, `WIDTHxHEIGHT`
    pub resolution: String,

    pub frame_rate: String,

    /// Encoder name passed to the transcoder
    pub video_codec: String,

    /// Draw a text overlay even when no text is given
    pub overlay: bool,
    pub overlay_text: String,
    pub overlay_font_size: u32,
    pub overlay_color: String,
    pub overlay_x: i32,
    pub overlay_y: i32,
    /// Draw a box behind the overlay text
    pub overlay_box: bool,
    pub overlay_box_color: String,
}

impl TaskRequest {
    /// Create a request for a source path with all other fields unset
    pub fn new(source_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            ..Default::default()
        }
    }

    pub fn mode(mut self, mode: TransformMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn output_path(mut self, path: impl Into<String>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    pub fn frame_rate(mut self, frame_rate: impl Into<String>) -> Self {
        self.frame_rate = frame_rate.into();
        self
    }

    pub fn video_codec(mut self, codec: impl Into<String>) -> Self {
        self.video_codec = codec.into();
        self
    }

    /// Set overlay text; enables the overlay
    pub fn overlay_text(mut self, text: impl Into<String>) -> Self {
        self.overlay = true;
        self.overlay_text = text.into();
        self
    }

    pub fn overlay_position(mut self, x: i32, y: i32) -> Self {
        self.overlay_x = x;
        self.overlay_y = y;
        self
    }

    /// Draw a box of the given colour behind the overlay text
    pub fn overlay_box(mut self, color: impl Into<String>) -> Self {
        self.overlay_box = true;
        self.overlay_box_color = color.into();
        self
    }

    /// The output path this request resolves to
    ///
    /// Deterministic: the same source path and mode always collide.
    pub fn resolved_output_path(&self) -> StreamPath {
        match self.output_path.as_deref() {
            Some(path) if !path.is_empty() => StreamPath::new(path),
            _ => StreamPath::new(format!("{}{}", self.source_path, self.mode.path_suffix())),
        }
    }

    /// Validate the request and fill in defaults
    pub fn resolve(self) -> Result<ResolvedRequest, TaskError> {
        if self.source_path.is_empty() {
            return Err(TaskError::EmptySourcePath);
        }

        let output = self.resolved_output_path();

        let overlay = (self.overlay || !self.overlay_text.is_empty()).then(|| Overlay {
            text: or_default(self.overlay_text, DEFAULT_OVERLAY_TEXT),
            font_size: if self.overlay_font_size == 0 {
                DEFAULT_OVERLAY_FONT_SIZE
            } else {
                self.overlay_font_size
            },
            color: or_default(self.overlay_color, DEFAULT_OVERLAY_COLOR),
            x: if self.overlay_x == 0 {
                DEFAULT_OVERLAY_POSITION
            } else {
                self.overlay_x
            },
            y: if self.overlay_y == 0 {
                DEFAULT_OVERLAY_POSITION
            } else {
                self.overlay_y
            },
            box_color: self
                .overlay_box
                .then(|| or_default(self.overlay_box_color, DEFAULT_OVERLAY_BOX_COLOR)),
        });

        Ok(ResolvedRequest {
            source: StreamPath::new(self.source_path),
            output,
            mode: self.mode,
            params: TaskParams {
                resolution: or_default(self.resolution, DEFAULT_RESOLUTION),
                frame_rate: or_default(self.frame_rate, DEFAULT_FRAME_RATE),
                video_codec: or_default(self.video_codec, DEFAULT_VIDEO_CODEC),
                overlay,
            },
        })
    }
}

fn or_default(value: String, default: &str) -> String {
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Text overlay drawn by the transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub text: String,
    pub font_size: u32,
    pub color: String,
    pub x: i32,
    pub y: i32,
    /// Box colour when a box is drawn behind the text
    pub box_color: Option<String>,
}

/// Immutable encoding parameters of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskParams {
    pub resolution: String,
    pub frame_rate: String,
    pub video_codec: String,
    pub overlay: Option<Overlay>,
}

impl TaskParams {
    /// Frame rate as a number, for timestamping decoded output
    pub fn frame_rate_value(&self) -> f64 {
        self.frame_rate
            .parse::<f64>()
            .ok()
            .filter(|fps| *fps > 0.0)
            .unwrap_or(25.0)
    }
}

/// A validated request with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    pub source: StreamPath,
    pub output: StreamPath,
    pub mode: TransformMode,
    pub params: TaskParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source_rejected() {
        let result = TaskRequest::default().resolve();
        assert_eq!(result, Err(TaskError::EmptySourcePath));
    }

    #[test]
    fn test_defaults_filled_in() {
        let resolved = TaskRequest::new("live/cam1").resolve().unwrap();

        assert_eq!(resolved.source.as_str(), "live/cam1");
        assert_eq!(resolved.output.as_str(), "live/cam1-ts0");
        assert_eq!(resolved.mode, TransformMode::PipeInPipeOut);
        assert_eq!(resolved.params.resolution, "352x288");
        assert_eq!(resolved.params.frame_rate, "25");
        assert_eq!(resolved.params.video_codec, "libx264");
        assert!(resolved.params.overlay.is_none());
    }

    #[test]
    fn test_derived_path_is_deterministic() {
        let a = TaskRequest::new("live/cam1").mode(TransformMode::PipeInUrlOut);
        let b = TaskRequest::new("live/cam1")
            .mode(TransformMode::PipeInUrlOut)
            .resolution("720x576");
        assert_eq!(a.resolved_output_path(), b.resolved_output_path());
        assert_eq!(a.resolved_output_path().as_str(), "live/cam1-ts2");

        let explicit = TaskRequest::new("live/cam1").output_path("live/small");
        assert_eq!(explicit.resolved_output_path().as_str(), "live/small");

        // Empty explicit path falls back to the derived one
        let empty = TaskRequest::new("live/cam1").output_path("");
        assert_eq!(empty.resolved_output_path().as_str(), "live/cam1-ts0");
    }

    #[test]
    fn test_overlay_defaults() {
        let mut request = TaskRequest::new("live/cam1");
        request.overlay = true;
        let overlay = request.resolve().unwrap().params.overlay.unwrap();

        assert_eq!(overlay.text, "transcode");
        assert_eq!(overlay.font_size, 100);
        assert_eq!(overlay.color, "green");
        assert_eq!((overlay.x, overlay.y), (100, 100));
        assert_eq!(overlay.box_color, None);
    }

    #[test]
    fn test_overlay_box() {
        let overlay = TaskRequest::new("live/cam1")
            .overlay_text("M7S")
            .overlay_position(50, 60)
            .overlay_box("")
            .resolve()
            .unwrap()
            .params
            .overlay
            .unwrap();

        assert_eq!(overlay.text, "M7S");
        assert_eq!((overlay.x, overlay.y), (50, 60));
        assert_eq!(overlay.box_color.as_deref(), Some("yellow"));
    }

    #[test]
    fn test_frame_rate_value() {
        let params = TaskRequest::new("a").frame_rate("30").resolve().unwrap().params;
        assert_eq!(params.frame_rate_value(), 30.0);

        let params = TaskRequest::new("a").frame_rate("fast").resolve().unwrap().params;
        assert_eq!(params.frame_rate_value(), 25.0);
    }

    #[test]
    fn test_deserialize_request() {
        let request: TaskRequest = serde_json::from_str(
            r#"{
                "source_path": "live/cam1",
                "mode": "pipe_in_url_out",
                "resolution": "720x576",
                "overlay_text": "M7S",
                "overlay_box": true
            }"#,
        )
        .unwrap();

        assert_eq!(request.mode, TransformMode::PipeInUrlOut);
        let resolved = request.resolve().unwrap();
        assert_eq!(resolved.output.as_str(), "live/cam1-ts2");
        assert_eq!(resolved.params.resolution, "720x576");
        let overlay = resolved.params.overlay.unwrap();
        assert_eq!(overlay.text, "M7S");
        assert_eq!(overlay.box_color.as_deref(), Some("yellow"));
    }

    #[test]
    fn test_deserialize_mode_code() {
        let request: TaskRequest =
            serde_json::from_str(r#"{"source_path": "live/cam1", "mode": 2}"#).unwrap();
        assert_eq!(request.mode, TransformMode::PipeInUrlOut);
        assert_eq!(request.resolved_output_path().as_str(), "live/cam1-ts2");

        let request: TaskRequest =
            serde_json::from_str(r#"{"source_path": "live/cam1", "mode": 0}"#).unwrap();
        assert_eq!(request.mode, TransformMode::PipeInPipeOut);
    }

    #[test]
    fn test_deserialize_unknown_mode_rejected() {
        let result = serde_json::from_str::<TaskRequest>(r#"{"source_path": "live/cam1", "mode": 3}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<TaskRequest>(r#"{"source_path": "live/cam1", "mode": -1}"#);
        assert!(result.is_err());

        let result =
            serde_json::from_str::<TaskRequest>(r#"{"source_path": "live/cam1", "mode": "rtmp"}"#);
        assert!(result.is_err());
    }
}
