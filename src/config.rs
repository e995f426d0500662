//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Typed configuration tree, loaded once from TOML at process start and held
//! as an `Arc<Config>` for the lifetime of the process. Mirrors the shape of
//! the original project's per-camera YAML config (`camera`, `motion_detection`,
//! `object_detection`, `recorder` sections) but as validated Rust structs
//! instead of a dynamically-typed schema.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

fn default_true() -> bool {
    true
}

fn default_motion_frames() -> u32 {
    3
}

fn default_fault_threshold() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: Vec<CameraConfig>,
}

impl Config {
    /// Parse and validate a configuration tree from its TOML source.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source).map_err(|e| PipelineError::TransientIo {
            component: "config",
            message: format!("failed to parse config: {e}"),
        })?;
        for camera in &config.camera {
            camera.object_detection.validate()?;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub name: String,
    pub name_slug: String,
    pub stream: StreamConfig,
    /// Secondary stream used solely to write lookback segments. Absent means
    /// the primary stream's segmenter output (if any) is reused.
    #[serde(default)]
    pub segments_stream: Option<StreamConfig>,
    pub motion_detection: Option<MotionDetectionConfig>,
    pub object_detection: ObjectDetectionConfig,
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    pub stream_url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    #[serde(default)]
    pub input_args: Vec<String>,
    #[serde(default)]
    pub hwaccel_args: Vec<String>,
    #[serde(default)]
    pub filter_args: Vec<String>,
    #[serde(default)]
    pub output_args: Vec<String>,
    #[serde(default)]
    pub global_args: Vec<String>,
    #[serde(default = "default_loglevel")]
    pub ffmpeg_loglevel: String,
    /// Substrings in reader stderr that are known-transient and must not
    /// trigger a restart (spec 4.2's "allow-list of known transient errors").
    #[serde(default)]
    pub ffmpeg_recoverable_errors: Vec<String>,
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_secs: u64,
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: u32,
}

fn default_loglevel() -> String {
    "warning".to_string()
}

fn default_frame_timeout() -> u64 {
    60
}

impl StreamConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotionDetectionConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    #[serde(default)]
    pub area: f32,
    #[serde(default)]
    pub threshold: u8,
    #[serde(default)]
    pub alpha: f32,
    /// When true, motion feeds the object detector's scan-enable rather than
    /// triggering the recorder on its own (spec 4.5 "trigger_detector" mode).
    #[serde(default)]
    pub trigger_detector: bool,
    /// When true, debounced motion alone triggers recording even with no
    /// relevant object (spec 4.5's trigger definition: "any current object
    /// has triggers_recording OR motion alone triggers recording is
    /// configured and motion is active").
    #[serde(default)]
    pub trigger_recorder: bool,
    #[serde(default = "default_motion_frames")]
    pub motion_frames: u32,
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,
    #[serde(default)]
    pub mask: Vec<Vec<(i32, i32)>>,
}

fn default_max_timeout() -> u64 {
    30
}

impl MotionDetectionConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectDetectionConfig {
    pub fps: f64,
    #[serde(default)]
    pub scan_on_motion_only: bool,
    #[serde(default)]
    pub labels: Vec<LabelFilterConfig>,
}

impl ObjectDetectionConfig {
    /// Validated at config-load time per spec 7's `FilterMisconfiguration`:
    /// inverted bounds are a configuration error, not a runtime one.
    fn validate(&self) -> Result<()> {
        for label in &self.labels {
            if label.width_min >= label.width_max {
                return Err(PipelineError::FilterMisconfiguration {
                    label: label.label.clone(),
                    reason: format!(
                        "width_min ({}) must be < width_max ({})",
                        label.width_min, label.width_max
                    ),
                });
            }
            if label.height_min >= label.height_max {
                return Err(PipelineError::FilterMisconfiguration {
                    label: label.label.clone(),
                    reason: format!(
                        "height_min ({}) must be < height_max ({})",
                        label.height_min, label.height_max
                    ),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelFilterConfig {
    pub label: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub width_min: f32,
    #[serde(default = "default_one")]
    pub width_max: f32,
    #[serde(default)]
    pub height_min: f32,
    #[serde(default = "default_one")]
    pub height_max: f32,
    #[serde(default)]
    pub trigger_recorder: bool,
    #[serde(default)]
    pub require_motion: bool,
    #[serde(default)]
    pub post_processor: Option<String>,
    #[serde(default)]
    pub mask: Vec<Vec<(i32, i32)>>,
}

fn default_confidence() -> f32 {
    0.8
}

fn default_one() -> f32 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    pub coordinates: Vec<(i32, i32)>,
    #[serde(default)]
    pub labels: Vec<LabelFilterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    pub folder: String,
    pub segments_folder: String,
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u64,
    #[serde(default = "default_lookback")]
    pub lookback_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_post_event_timeout")]
    pub post_event_timeout_secs: u64,
    #[serde(default)]
    pub codec: Vec<String>,
    #[serde(default)]
    pub audio_codec: Vec<String>,
    #[serde(default)]
    pub filter_args: Vec<String>,
    #[serde(default)]
    pub hwaccel_args: Vec<String>,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_true")]
    pub save_to_disk: bool,
    #[serde(default = "default_jpeg_quality")]
    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        ThumbnailConfig {
            save_to_disk: default_true(),
            quality: default_jpeg_quality(),
        }
    }
}

fn default_jpeg_quality() -> u8 {
    75
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn default_filename_pattern() -> String {
    "%H%M%S".to_string()
}

fn default_segment_duration() -> u64 {
    5
}

fn default_lookback() -> u64 {
    5
}

fn default_timeout() -> u64 {
    10
}

fn default_post_event_timeout() -> u64 {
    10
}

impl RecorderConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn post_event_timeout(&self) -> Duration {
        Duration::from_secs(self.post_event_timeout_secs)
    }

    pub fn segment_duration(&self) -> Duration {
        Duration::from_secs(self.segment_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_width_bounds() {
        let toml = r#"
            [[camera]]
            name = "front"
            name_slug = "front"
            [camera.stream]
            stream_url = "rtsp://example/stream"
            [camera.object_detection]
            fps = 1.0
            [[camera.object_detection.labels]]
            label = "person"
            width_min = 0.8
            width_max = 0.2
            [camera.recorder]
            folder = "/recordings"
            segments_folder = "/segments"
        "#;
        let err = Config::from_toml(toml).unwrap_err();
        assert!(matches!(err, PipelineError::FilterMisconfiguration { .. }));
    }

    #[test]
    fn parses_minimal_camera() {
        let toml = r#"
            [[camera]]
            name = "front"
            name_slug = "front"
            [camera.stream]
            stream_url = "rtsp://example/stream"
            [camera.object_detection]
            fps = 1.0
            [camera.recorder]
            folder = "/recordings"
            segments_folder = "/segments"
        "#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.camera.len(), 1);
        assert_eq!(config.camera[0].recorder.lookback_secs, 5);
    }
}
