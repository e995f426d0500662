//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The `Detector` black-box contract (spec 6) plus `DetectedObject` and the
//! process-wide detection lock (spec 4.5 / 5) that serialises inference calls
//! across every detector instance sharing the same accelerator. The lock
//! itself is grounded on `camera_hub/src/main.rs` and `pairing.rs`'s
//! `static LOCK: OnceLock<Mutex<()>>` pattern, generalised from one lock per
//! process to one lock per named detector (spec 5: "one per detector type if
//! multiple hardware devices are present; else one globally").

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::frame::{DecodedFrame, Letterbox};

/// A bounding box and label as returned by a detector, in `[0,1]`-relative
/// coordinates (spec 3).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f32,
    pub rel_x1: f32,
    pub rel_y1: f32,
    pub rel_x2: f32,
    pub rel_y2: f32,
    pub relevant: bool,
    pub triggers_recording: bool,
    pub filter_hit: Option<&'static str>,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f32, rel_x1: f32, rel_y1: f32, rel_x2: f32, rel_y2: f32) -> Self {
        debug_assert!(rel_x1 < rel_x2 && rel_y1 < rel_y2, "invariant: x1<x2 and y1<y2");
        DetectedObject {
            label: label.into(),
            confidence,
            rel_x1,
            rel_y1,
            rel_x2,
            rel_y2,
            relevant: false,
            triggers_recording: false,
            filter_hit: None,
        }
    }

    pub fn rel_width(&self) -> f32 {
        self.rel_x2 - self.rel_x1
    }

    pub fn rel_height(&self) -> f32 {
        self.rel_y2 - self.rel_y1
    }

    /// Absolute pixel bounding box for a given frame resolution.
    pub fn to_absolute(&self, width: u32, height: u32) -> (f32, f32, f32, f32) {
        (
            self.rel_x1 * width as f32,
            self.rel_y1 * height as f32,
            self.rel_x2 * width as f32,
            self.rel_y2 * height as f32,
        )
    }

    /// Bottom-centre point in absolute pixels, used by zone containment
    /// checks (spec 3: "Zone... objects whose bottom-centre point lies
    /// inside the polygon").
    pub fn bottom_centre(&self, width: u32, height: u32) -> (f32, f32) {
        let (x1, _, x2, y2) = self.to_absolute(width, height);
        ((x1 + x2) / 2.0, y2)
    }

    pub fn from_absolute(label: impl Into<String>, confidence: f32, x1: f32, y1: f32, x2: f32, y2: f32, width: u32, height: u32) -> Self {
        DetectedObject::new(
            label,
            confidence,
            x1 / width as f32,
            y1 / height as f32,
            x2 / width as f32,
            y2 / height as f32,
        )
    }
}

/// A decoded frame queued up for one detector's scan, plus the letterbox
/// geometry the frame worker recorded (spec 3, `FrameToScan`).
pub struct FrameToScan {
    pub detector_name: String,
    pub frame: std::sync::Arc<DecodedFrame>,
    pub model_view: std::sync::Arc<image::RgbImage>,
    pub letterbox: Option<Letterbox>,
    pub capture_time: std::time::SystemTime,
}

/// The black-box capability set a concrete detector backend implements (spec
/// 6: "Detector is a capability set {Preprocess, Detect, ModelWidth,
/// ModelHeight}"). Out of scope per spec 1; only the interface lives here.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;
    fn model_width(&self) -> u32;
    fn model_height(&self) -> u32;

    /// May mutate `frame` in place (e.g. stash a preprocessed tensor).
    fn preprocess(&self, frame: &mut FrameToScan) {
        let _ = frame;
    }

    fn detect(&self, frame: &FrameToScan) -> anyhow::Result<Vec<DetectedObject>>;
}

/// Process-wide mutexes serialising calls into detectors that share
/// underlying hardware (spec 4.5, 5). One lock per detector name; acquired
/// with bounded wait is approximated here by blocking acquisition since the
/// pipeline never holds the lock across a cancellation point other than the
/// detect call itself.
static DETECTION_LOCKS: Lazy<Mutex<HashMap<String, &'static Mutex<()>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Acquire the detection lock for `detector_name`, creating it on first use.
/// Released when the returned guard drops, including on panic unwind, which
/// is what gives testable property 7 ("acquired count == released count
/// under forced exceptions").
pub fn acquire_detection_lock(detector_name: &str) -> MutexGuard<'static, ()> {
    let mut table = DETECTION_LOCKS.lock().unwrap();
    let lock: &'static Mutex<()> = *table
        .entry(detector_name.to_string())
        .or_insert_with(|| Box::leak(Box::new(Mutex::new(()))));
    drop(table);
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_round_trip_within_one_pixel() {
        for (w, h) in [(1u32, 1u32), (1920, 1080), (3, 7)] {
            let obj = DetectedObject::from_absolute("person", 0.9, 10.0, 10.0, 20.0, 20.0, w.max(40), h.max(40));
            let (x1, y1, x2, y2) = obj.to_absolute(w.max(40), h.max(40));
            assert!((x1 - 10.0).abs() <= 1.0);
            assert!((y1 - 10.0).abs() <= 1.0);
            assert!(x1 < x2 && y1 < y2);
        }
    }

    #[test]
    fn detection_lock_serialises_named_detectors() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let counter = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            let overlaps = Arc::clone(&overlaps);
            handles.push(std::thread::spawn(move || {
                let _guard = acquire_detection_lock("yolo");
                let before = counter.fetch_add(1, Ordering::SeqCst);
                if before != 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(std::time::Duration::from_millis(2));
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }
}
