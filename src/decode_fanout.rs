//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Decode Fan-out (spec 4.3): per-detector sampling clocks that decide, for
//! each incoming RawFrame, which attached detectors should receive a scan
//! request this tick. Ported from `viseron/camera/frame_decoder.py`'s
//! `FrameDecoder`, which keys the same sampling-interval-and-counter pattern
//! off a `scan` flag per decoder. Consumed by the Frame Worker
//! (`frame_worker.rs`), which owns the actual decode and publish step.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One detector's sampling clock inside a camera's fan-out.
pub struct FanoutTarget {
    pub detector_name: String,
    pub scan_topic: String,
    pub model_width: u32,
    pub model_height: u32,
    frame_interval: u64,
    counter: AtomicU64,
    /// Resource gating (spec 4.5): disabled detectors are skipped entirely.
    pub scan_enabled: Arc<AtomicBool>,
}

impl FanoutTarget {
    pub fn new(
        detector_name: impl Into<String>,
        scan_topic: impl Into<String>,
        model_width: u32,
        model_height: u32,
        stream_fps: f64,
        detector_fps: f64,
        scan_enabled: Arc<AtomicBool>,
    ) -> Self {
        let detector_fps = if detector_fps > stream_fps {
            log::warn!("detector fps {detector_fps} exceeds stream fps {stream_fps}, clamping");
            stream_fps
        } else {
            detector_fps
        };
        let frame_interval = (stream_fps / detector_fps).round().max(1.0) as u64;
        FanoutTarget {
            detector_name: detector_name.into(),
            scan_topic: scan_topic.into(),
            model_width,
            model_height,
            frame_interval,
            counter: AtomicU64::new(0),
            scan_enabled,
        }
    }

    /// Returns true if this tick should emit a scan request for this target.
    /// Always advances the internal counter, gated separately by the caller
    /// checking `scan_enabled` first (spec 4.5: a disabled detector's clock
    /// still runs so re-enabling resumes on the same cadence, not a burst).
    pub fn should_sample(&self) -> bool {
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        count % self.frame_interval == 0
    }

    pub fn is_enabled(&self) -> bool {
        self.scan_enabled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(stream_fps: f64, detector_fps: f64) -> FanoutTarget {
        FanoutTarget::new(
            "objects",
            "cam/objects/scan",
            640,
            640,
            stream_fps,
            detector_fps,
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn scenario_s1_one_scan_per_five_raw_frames() {
        let target = target(25.0, 5.0);
        let mut scans = 0;
        for _ in 0..100 {
            if target.should_sample() {
                scans += 1;
            }
        }
        assert_eq!(scans, 20);
    }

    #[test]
    fn disabled_target_is_reported_disabled() {
        let enabled = Arc::new(AtomicBool::new(false));
        let target = FanoutTarget::new("objects", "cam/objects/scan", 640, 640, 25.0, 5.0, Arc::clone(&enabled));
        assert!(!target.is_enabled());
        enabled.store(true, Ordering::Release);
        assert!(target.is_enabled());
    }

    #[test]
    fn clamps_detector_fps_exceeding_stream_fps() {
        let target = target(10.0, 30.0);
        assert_eq!(target.frame_interval, 1);
    }
}
