//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Frame Workers (spec 4.4): decode each RawFrame once into a `DecodedFrame`,
//! consult every attached detector's fan-out sampling clock, and for those
//! due this tick, build a letterboxed/resized `FrameToScan` and publish it to
//! that detector's scan topic. Grounded on
//! `viseron/camera/__init__.py`'s frame-decode-then-dispatch step, wired with
//! the same one-thread-per-stage structure `secluso-motion-ai`'s pipeline
//! stages use.

use std::sync::Arc;

use crate::bus::{Bus, BusQueue};
use crate::decode_fanout::FanoutTarget;
use crate::detector::FrameToScan;
use crate::frame::{DecodedFrame, Letterbox, RawFrame};

pub struct FrameWorker {
    targets: Vec<FanoutTarget>,
    raw_frames: BusQueue,
}

impl FrameWorker {
    pub fn new(targets: Vec<FanoutTarget>, raw_frames: BusQueue) -> Self {
        FrameWorker { targets, raw_frames }
    }

    /// Block for one RawFrame, decode it, and publish scan requests for every
    /// detector whose sampling interval elapsed. Returns false once the raw
    /// frame subscription itself is torn down (payload type mismatch, which
    /// only happens post-shutdown), signalling the caller to stop looping.
    pub fn process_next(&self, bus: &Bus) -> bool {
        let msg = self.raw_frames.recv();
        let Ok(raw) = msg.downcast::<RawFrame>() else {
            return false;
        };

        let decoded = Arc::new(DecodedFrame::new((*raw).clone()));

        for target in &self.targets {
            if !target.is_enabled() || !target.should_sample() {
                continue;
            }
            let letterbox = if target.model_width == target.model_height {
                Some(Letterbox::compute(decoded.rgb().width(), decoded.rgb().height(), target.model_width))
            } else {
                None
            };
            let view = decoded.view_for(&target.detector_name, target.model_width, target.model_height);
            let scan = FrameToScan {
                detector_name: target.detector_name.clone(),
                frame: Arc::clone(&decoded),
                model_view: view,
                letterbox,
                capture_time: decoded.source.captured_at,
            };
            let _ = bus.publish(&target.scan_topic, scan);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::frame_bytes;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn publishes_scan_for_enabled_due_target() {
        let bus = Bus::new();
        let (_id, raw_frames) = bus.subscribe_queue("cam/raw", 5);
        let (_scan_id, scan_queue) = bus.subscribe_queue("cam/objects/scan", 5);

        let target = FanoutTarget::new("objects", "cam/objects/scan", 64, 64, 1.0, 1.0, Arc::new(AtomicBool::new(true)));
        let worker = FrameWorker::new(vec![target], raw_frames);

        let frame = RawFrame::new(vec![128u8; frame_bytes(64, 64)], 64, 64).unwrap();
        bus.publish("cam/raw", frame).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(worker.process_next(&bus));
        std::thread::sleep(std::time::Duration::from_millis(50));
        let msg = scan_queue.try_recv().expect("scan request published");
        let scan = msg.downcast::<FrameToScan>().unwrap();
        assert_eq!(scan.detector_name, "objects");
        bus.shutdown();
    }

    #[test]
    fn skips_disabled_target() {
        let bus = Bus::new();
        let (_id, raw_frames) = bus.subscribe_queue("cam/raw", 5);
        let (_scan_id, scan_queue) = bus.subscribe_queue("cam/objects/scan", 5);

        let target = FanoutTarget::new("objects", "cam/objects/scan", 64, 64, 1.0, 1.0, Arc::new(AtomicBool::new(false)));
        let worker = FrameWorker::new(vec![target], raw_frames);

        let frame = RawFrame::new(vec![128u8; frame_bytes(64, 64)], 64, 64).unwrap();
        bus.publish("cam/raw", frame).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(worker.process_next(&bus));
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(scan_queue.try_recv().is_none());
        bus.shutdown();
    }
}
