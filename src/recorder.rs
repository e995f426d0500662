//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The Recorder (spec 4.5 "Recorder" subsection): reacts to `EventIntent`s
//! from the event state machine by pausing segment cleanup, writing a
//! thumbnail with detected objects drawn on it, and — once the event seals —
//! assembling the final clip via `SegmentStore::concat_segments` off its own
//! thread so sealing never blocks the state machine's tick. Ported from
//! `viseron/recorder.py`'s `FFMPEGRecorder`: `start_recording` computes the
//! thumbnail/clip paths and draws boxes, `stop_recording` spawns
//! `Thread(target=self.concat_segments)`, and cleanup resumes only once no
//! recording remains in flight.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};

use crate::config::RecorderConfig;
use crate::detector::DetectedObject;
use crate::event::EventIntent;
use crate::frame::DecodedFrame;
use crate::segment::SegmentStore;

/// Thumbnail label font, bundled via `ttf-firacode` rather than a
/// filesystem lookup at runtime (same approach as
/// `strawlab-strand-braid`'s `burn-timestamps` binary).
fn label_font() -> Font<'static> {
    Font::try_from_bytes(ttf_firacode::REGULAR).expect("bundled font parses")
}

struct InFlightRecording {
    start_time: SystemTime,
    output_path: PathBuf,
    thumbnail_path: Option<PathBuf>,
}

pub struct Recorder {
    camera_slug: String,
    config: RecorderConfig,
    segment_store: Arc<SegmentStore>,
    active: Option<InFlightRecording>,
    /// Counts recordings still being concatenated on their own thread, so
    /// cleanup resumes only once the last one finishes (spec 4.6 invariant).
    pending_concats: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn new(camera_slug: impl Into<String>, config: RecorderConfig, segment_store: Arc<SegmentStore>) -> Self {
        Recorder {
            camera_slug: camera_slug.into(),
            config,
            segment_store,
            active: None,
            pending_concats: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn filename_stem(&self, when: SystemTime) -> String {
        let datetime: DateTime<Utc> = when.into();
        datetime.format(&self.config.filename_pattern).to_string()
    }

    fn draw_thumbnail(&self, frame: &RgbImage, objects: &[DetectedObject]) -> RgbImage {
        let mut canvas = frame.clone();
        let font = label_font();
        let scale = Scale::uniform(16.0);
        for obj in objects {
            if !obj.relevant {
                continue;
            }
            let (x1, y1, x2, y2) = obj.to_absolute(canvas.width(), canvas.height());
            let rect = Rect::at(x1 as i32, y1 as i32).of_size((x2 - x1).max(1.0) as u32, (y2 - y1).max(1.0) as u32);
            draw_hollow_rect_mut(&mut canvas, rect, image::Rgb([255, 0, 0]));
            draw_text_mut(
                &mut canvas,
                image::Rgb([255, 0, 0]),
                x1 as i32,
                (y1 as i32 - 18).max(0),
                scale,
                &font,
                &format!("{} {:.0}%", obj.label, obj.confidence * 100.0),
            );
        }
        canvas
    }

    /// Encode as JPEG at the configured quality (spec 4.5: "configurable
    /// quality" thumbnails), rather than `RgbImage::save`'s fixed default.
    fn save_thumbnail(&self, thumbnail: &RgbImage, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let mut encoder = JpegEncoder::new_with_quality(file, self.config.thumbnail.quality);
        encoder.encode(thumbnail.as_raw(), thumbnail.width(), thumbnail.height(), image::ColorType::Rgb8.into())?;
        Ok(())
    }

    /// Apply one `EventIntent`, given the frame and objects current at the
    /// moment it fired (spec 4.5: thumbnails are drawn from the frame that
    /// caused the transition, not an arbitrary later one).
    pub fn handle_intent(&mut self, intent: &EventIntent, frame: &DecodedFrame, objects: &[DetectedObject], now: SystemTime) {
        match intent {
            EventIntent::StartRecording => self.start_recording(frame, objects, now),
            EventIntent::ContinueRecording => {
                // Recording is already in flight (re-entered from
                // CoolingDown); nothing new to create.
            }
            EventIntent::SealRecording => self.seal_recording(now),
            EventIntent::EnableObjectDetector | EventIntent::DisableObjectDetector => {
                // Handled by the camera wiring directly against the scan-enable flag.
            }
        }
    }

    fn start_recording(&mut self, frame: &DecodedFrame, objects: &[DetectedObject], now: SystemTime) {
        self.segment_store.pause_cleanup();
        let stem = self.filename_stem(now);
        let output_path = PathBuf::from(&self.config.folder)
            .join(&self.camera_slug)
            .join(format!("{stem}.{}", self.config.extension));

        let thumbnail_path = if self.config.thumbnail.save_to_disk {
            let path = PathBuf::from(&self.config.folder).join(&self.camera_slug).join(format!("{stem}_thumb.jpg"));
            let thumbnail = self.draw_thumbnail(frame.rgb(), objects);
            if let Err(e) = self.save_thumbnail(&thumbnail, &path) {
                log::warn!("failed to save thumbnail {}: {e}", path.display());
            }
            Some(path)
        } else {
            None
        };

        self.active = Some(InFlightRecording {
            start_time: now,
            output_path,
            thumbnail_path,
        });
    }

    /// Spawn the concat off its own thread so sealing never blocks the event
    /// machine's tick (spec 4.5 note, grounded on `FFMPEGRecorder.stop_recording`).
    fn seal_recording(&mut self, now: SystemTime) {
        let Some(recording) = self.active.take() else {
            return;
        };
        let store = Arc::clone(&self.segment_store);
        let pending = Arc::clone(&self.pending_concats);
        pending.fetch_add(1, Ordering::SeqCst);

        let event_start = recording
            .start_time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let event_end = now.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(event_start);
        let output_path = recording.output_path;
        let codec_args = self.config.codec.clone();
        let audio_codec_args = self.config.audio_codec.clone();

        std::thread::spawn(move || {
            if let Err(e) = store.concat_segments(event_start, event_end, &output_path, &codec_args, &audio_codec_args) {
                log::error!("failed to assemble recording {}: {e}", output_path.display());
            }
            if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                store.resume_cleanup();
            }
        });

        if let Some(thumb) = recording.thumbnail_path {
            log::debug!("thumbnail for sealed recording at {}", thumb.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{frame_bytes, RawFrame};
    use std::time::Duration;

    fn store() -> Arc<SegmentStore> {
        Arc::new(SegmentStore::new("/tmp/segments", "mp4", Duration::from_secs(5), Duration::from_secs(5), "objects"))
    }

    fn recorder_config() -> RecorderConfig {
        RecorderConfig {
            folder: "/tmp/recordings".into(),
            segments_folder: "/tmp/segments".into(),
            extension: "mp4".into(),
            filename_pattern: "%Y%m%d%H%M%S".into(),
            segment_duration_secs: 5,
            lookback_secs: 5,
            timeout_secs: 10,
            post_event_timeout_secs: 10,
            codec: vec!["-c:v".into(), "copy".into()],
            audio_codec: vec![],
            filter_args: vec![],
            hwaccel_args: vec![],
            thumbnail: crate::config::ThumbnailConfig { save_to_disk: false, quality: 75 },
        }
    }

    #[test]
    fn start_recording_pauses_cleanup_and_tracks_active() {
        let segment_store = store();
        let mut recorder = Recorder::new("front", recorder_config(), Arc::clone(&segment_store));
        let raw = RawFrame::new(vec![128u8; frame_bytes(32, 32)], 32, 32).unwrap();
        let decoded = DecodedFrame::new(raw);

        recorder.handle_intent(&EventIntent::StartRecording, &decoded, &[], SystemTime::now());
        assert!(recorder.active.is_some());
    }

    #[test]
    fn thumbnail_draws_box_for_relevant_objects_only() {
        let recorder = Recorder::new("front", recorder_config(), store());
        let frame = RgbImage::from_pixel(100, 100, image::Rgb([0, 0, 0]));
        let mut obj = DetectedObject::new("person", 0.9, 0.1, 0.1, 0.4, 0.4);
        obj.relevant = true;
        let thumbnail = recorder.draw_thumbnail(&frame, &[obj]);
        assert_eq!(thumbnail.dimensions(), (100, 100));
    }
}
