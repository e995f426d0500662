//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The Segment Store (spec 4.6): discovers on-disk MP4 segments by filename
//! timestamp, probes their duration via `ffprobe`, and assembles a
//! contiguous clip via `ffmpeg` concat. Ported from `viseron/segments.py`'s
//! `Segments` class, including its `%Y%m%d%H%M%S` filename timestamp format
//! (`segments.py` line ~89).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::detector::acquire_detection_lock;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub path: PathBuf,
    pub start_time: i64,
    pub duration: f64,
}

impl Segment {
    pub fn end_time(&self) -> f64 {
        self.start_time as f64 + self.duration
    }
}

/// Parse `YYYYMMDDhhmmss` out of a segment filename's stem.
fn parse_start_time(file_stem: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(file_stem, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

pub struct SegmentStore {
    folder: PathBuf,
    extension: String,
    segment_duration: Duration,
    lookback: Duration,
    /// Set while any Recording is active; `purge` is a no-op meanwhile
    /// (spec 4.6, 5, testable property 8).
    cleanup_paused: AtomicBool,
    /// Name of the detector whose hardware `ffprobe` duration checks are
    /// serialised behind (`segments.py` passes the NVR's own
    /// `_detection_lock` into `Segments.__init__`, the same lock its object
    /// detector uses, rather than a dedicated one).
    shared_lock_name: String,
}

impl SegmentStore {
    pub fn new(
        folder: impl Into<PathBuf>,
        extension: impl Into<String>,
        segment_duration: Duration,
        lookback: Duration,
        shared_lock_name: impl Into<String>,
    ) -> Self {
        SegmentStore {
            folder: folder.into(),
            extension: extension.into(),
            segment_duration,
            shared_lock_name: shared_lock_name.into(),
            lookback,
            cleanup_paused: AtomicBool::new(false),
        }
    }

    pub fn pause_cleanup(&self) {
        self.cleanup_paused.store(true, Ordering::SeqCst);
    }

    pub fn resume_cleanup(&self) {
        self.cleanup_paused.store(false, Ordering::SeqCst);
    }

    fn probe_duration(&self, path: &Path) -> Option<f64> {
        let max_tries = self.segment_duration.as_secs() + 5;
        for attempt in 0..=max_tries {
            let _guard = acquire_detection_lock(&self.shared_lock_name);
            let output = Command::new("ffprobe")
                .args([
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-show_entries",
                    "format=duration",
                    "-of",
                    "default=noprint_wrappers=1:nokey=1",
                ])
                .arg(path)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output();
            drop(_guard);

            let output = match output {
                Ok(output) => output,
                Err(_) => return None,
            };
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if output.status.success() {
                if let Ok(duration) = stdout.trim().parse::<f64>() {
                    return Some(duration);
                }
            }
            let transient = stderr.contains("moov atom not found") || stdout.trim() == "N/A";
            if transient && attempt < max_tries {
                std::thread::sleep(Duration::from_secs(1));
                continue;
            }
            log::error!("could not get duration for {}: {stderr}", path.display());
            return None;
        }
        None
    }

    /// All currently-discoverable segments, keyed by filename, sorted by
    /// start time (spec 4.6 `list_available`/`get_segment_information`).
    pub fn list_available(&self) -> BTreeMap<String, Segment> {
        let mut segments = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(&self.folder) else {
            return segments;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(start_time) = parse_start_time(stem) else {
                continue;
            };
            let Some(duration) = self.probe_duration(&path) else {
                continue;
            };
            segments.insert(
                path.file_name().unwrap().to_string_lossy().to_string(),
                Segment { path, start_time, duration },
            );
        }
        segments
    }

    /// The segment whose `[start_time, start_time+duration)` interval
    /// contains `timestamp` (spec 4.6 `find_segment`).
    pub fn find_segment<'a>(segments: &'a BTreeMap<String, Segment>, timestamp: f64) -> Option<&'a Segment> {
        segments
            .values()
            .find(|s| s.start_time as f64 <= timestamp && timestamp <= s.end_time())
    }

    /// Like `find_segment`, but returns the filename key (convenient when the
    /// caller needs to locate the segment's position among its siblings).
    fn find_segment_name(segments: &BTreeMap<String, Segment>, timestamp: f64) -> Option<String> {
        segments
            .iter()
            .find(|(_, s)| s.start_time as f64 <= timestamp && timestamp <= s.end_time())
            .map(|(name, _)| name.clone())
    }

    /// Delete segments older than `lookback + 3*segment_duration` (spec 4.6
    /// invariant), skipped entirely while a recording is in flight.
    pub fn purge(&self, now: i64) {
        if self.cleanup_paused.load(Ordering::SeqCst) {
            return;
        }
        let retain_secs = self.lookback.as_secs() as i64 + 3 * self.segment_duration.as_secs() as i64;
        for (_, segment) in self.list_available() {
            if segment.start_time < now - retain_secs {
                if let Err(e) = std::fs::remove_file(&segment.path) {
                    log::warn!("failed to purge segment {}: {e}", segment.path.display());
                }
            }
        }
    }

    /// Build the ordered list of segment filenames spanning `[start, end]`
    /// (spec 4.5 step 2-3, ported from `Segments.get_concat_segments`).
    fn segments_between<'a>(names: &'a [String], start: &str, end: &str) -> Option<&'a [String]> {
        let start_idx = names.iter().position(|n| n == start)?;
        let end_idx = names.iter().rposition(|n| n == end)?;
        if start_idx > end_idx {
            return None;
        }
        names.get(start_idx..=end_idx)
    }

    fn concat_script(&self, names: &[String], segments: &BTreeMap<String, Segment>, event_start: f64, event_end: f64) -> String {
        let mut lines = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let segment = &segments[name];
            lines.push(format!("file '{}'", segment.path.display()));
            if i == 0 {
                lines.push(format!("inpoint {}", (event_start - segment.start_time as f64) as i64));
            }
            if i == names.len() - 1 {
                lines.push(format!("outpoint {}", (event_end - segment.start_time as f64) as i64));
            }
        }
        lines.join("\n")
    }

    /// Assemble a single MP4 covering `[event_start, event_end]` via
    /// stream-copy `ffmpeg` concat, writing to a temp file first and
    /// renaming atomically into place (spec 4.5 step 4).
    pub fn concat_segments(&self, event_start: f64, event_end: f64, output_path: &Path, codec_args: &[String], audio_codec_args: &[String]) -> Result<()> {
        let segments = self.list_available();
        if segments.is_empty() {
            return Err(PipelineError::RecordingAssemblyFailure("no segments were found".into()));
        }

        let names: Vec<String> = segments.keys().cloned().collect();
        let start_name = Self::find_segment_name(&segments, event_start).unwrap_or_else(|| {
            log::warn!("could not find matching start segment, using earliest available");
            names.first().cloned().unwrap()
        });
        let end_name = Self::find_segment_name(&segments, event_end).unwrap_or_else(|| {
            log::warn!("could not find matching end segment, using latest available");
            names.last().cloned().unwrap()
        });

        let to_concat = Self::segments_between(&names, &start_name, &end_name)
            .ok_or_else(|| PipelineError::RecordingAssemblyFailure("matching segments could not be found".into()))?;

        let script = self.concat_script(to_concat, &segments, event_start, event_end);
        let temp_path = std::env::temp_dir().join(output_path.file_name().unwrap());

        let _guard = acquire_detection_lock(&self.shared_lock_name);
        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(codec_args)
            .args(["-protocol_whitelist", "file,pipe", "-f", "concat", "-safe", "0", "-i", "-"])
            .args(audio_codec_args)
            .args(["-movflags", "+faststart"])
            .arg(&temp_path)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::TransientIo { component: "ffmpeg-concat", message: e.to_string() })?;

        use std::io::Write;
        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(script.as_bytes())
            .map_err(|e| PipelineError::TransientIo { component: "ffmpeg-concat", message: e.to_string() })?;
        let status = child
            .wait()
            .map_err(|e| PipelineError::TransientIo { component: "ffmpeg-concat", message: e.to_string() })?;
        drop(_guard);

        if !status.success() {
            return Err(PipelineError::RecordingAssemblyFailure(format!(
                "ffmpeg concat exited with {status}"
            )));
        }

        std::fs::rename(&temp_path, output_path).map_err(|e| PipelineError::TransientIo {
            component: "ffmpeg-concat",
            message: format!("failed to move {} to {}: {e}", temp_path.display(), output_path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_segment_filename_timestamp() {
        assert_eq!(parse_start_time("20240101120000"), Some(1704110400));
    }

    #[test]
    fn scenario_s3_concat_script_has_in_and_out_points() {
        let mut segments = BTreeMap::new();
        segments.insert(
            "20240101120000.mp4".to_string(),
            Segment { path: PathBuf::from("/segs/20240101120000.mp4"), start_time: 1704110400, duration: 10.0 },
        );
        segments.insert(
            "20240101120010.mp4".to_string(),
            Segment { path: PathBuf::from("/segs/20240101120010.mp4"), start_time: 1704110410, duration: 10.0 },
        );
        segments.insert(
            "20240101120020.mp4".to_string(),
            Segment { path: PathBuf::from("/segs/20240101120020.mp4"), start_time: 1704110420, duration: 10.0 },
        );
        let store = SegmentStore::new("/segs", "mp4", Duration::from_secs(10), Duration::from_secs(5), "objects");
        let names: Vec<String> = segments.keys().cloned().collect();
        let script = store.concat_script(&names, &segments, 1704110405.0, 1704110418.0);
        assert!(script.contains("inpoint 0"));
        assert!(script.contains("outpoint 8"));
        assert_eq!(script.matches("file '").count(), 3);
    }

    #[test]
    fn find_segment_returns_none_outside_all_intervals() {
        let mut segments = BTreeMap::new();
        segments.insert(
            "20240101120000.mp4".to_string(),
            Segment { path: PathBuf::from("/segs/20240101120000.mp4"), start_time: 1704110400, duration: 10.0 },
        );
        assert!(SegmentStore::find_segment(&segments, 1704110200.0).is_none());
    }
}
