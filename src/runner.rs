//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Detector Runner (spec 4.5 first part): consumes `FrameToScan` requests for
//! one named detector, serialises inference behind that detector's detection
//! lock, and publishes `(frame, objects)` onto the detector's processed
//! topic. A detector that errors or panics contributes an empty result set
//! rather than taking the camera down, mirroring `viseron/detector.py`'s
//! try/except around a single scan's inference call.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::bus::{Bus, BusQueue};
use crate::detector::{acquire_detection_lock, Detector, DetectedObject, FrameToScan};
use crate::frame::DecodedFrame;

/// One scan's result: the frame it was produced from plus whatever objects
/// survived the detector call (before filtering).
pub struct ScanResult {
    pub frame: Arc<DecodedFrame>,
    pub objects: Vec<DetectedObject>,
}

pub struct DetectorRunner {
    detector: Arc<dyn Detector>,
    scan_requests: BusQueue,
    processed_topic: String,
}

impl DetectorRunner {
    pub fn new(detector: Arc<dyn Detector>, scan_requests: BusQueue, processed_topic: impl Into<String>) -> Self {
        DetectorRunner {
            detector,
            scan_requests,
            processed_topic: processed_topic.into(),
        }
    }

    /// Block for one scan request and run it through the detector, publishing
    /// the (possibly empty) result. Returns false if the scan queue's payload
    /// type no longer matches (benign, only follows shutdown).
    pub fn process_next(&self, bus: &Bus) -> bool {
        let msg = self.scan_requests.recv();
        let Ok(scan) = msg.downcast::<FrameToScan>() else {
            return false;
        };

        let objects = {
            let _guard = acquire_detection_lock(self.detector.name());
            match catch_unwind(AssertUnwindSafe(|| self.detector.detect(&scan))) {
                Ok(Ok(objects)) => objects,
                Ok(Err(e)) => {
                    log::warn!("detector '{}' returned an error: {e}", self.detector.name());
                    Vec::new()
                }
                Err(_) => {
                    log::error!("detector '{}' panicked during detect", self.detector.name());
                    Vec::new()
                }
            }
        };

        let result = ScanResult {
            frame: Arc::clone(&scan.frame),
            objects,
        };
        let _ = bus.publish(&self.processed_topic, result);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{frame_bytes, Letterbox, RawFrame};

    struct StubDetector {
        result: std::sync::Mutex<Option<anyhow::Result<Vec<DetectedObject>>>>,
    }

    impl Detector for StubDetector {
        fn name(&self) -> &str {
            "stub"
        }
        fn model_width(&self) -> u32 {
            64
        }
        fn model_height(&self) -> u32 {
            64
        }
        fn detect(&self, _frame: &FrameToScan) -> anyhow::Result<Vec<DetectedObject>> {
            self.result.lock().unwrap().take().expect("single test call")
        }
    }

    fn scan() -> FrameToScan {
        let raw = RawFrame::new(vec![128u8; frame_bytes(64, 64)], 64, 64).unwrap();
        let decoded = Arc::new(DecodedFrame::new(raw));
        let view = decoded.view_for("stub", 64, 64);
        FrameToScan {
            detector_name: "stub".into(),
            frame: decoded.clone(),
            model_view: view,
            letterbox: Some(Letterbox::compute(64, 64, 64)),
            capture_time: decoded.source.captured_at,
        }
    }

    #[test]
    fn publishes_detector_output() {
        let bus = Bus::new();
        let (_id, scan_requests) = bus.subscribe_queue("cam/stub/scan", 2);
        let (_rid, processed) = bus.subscribe_queue("cam/stub/processed", 2);
        let detector = Arc::new(StubDetector {
            result: std::sync::Mutex::new(Some(Ok(vec![DetectedObject::new("person", 0.9, 0.1, 0.1, 0.5, 0.5)]))),
        });
        let runner = DetectorRunner::new(detector, scan_requests, "cam/stub/processed");

        bus.publish("cam/stub/scan", scan()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(runner.process_next(&bus));
        std::thread::sleep(std::time::Duration::from_millis(50));

        let msg = processed.try_recv().expect("result published");
        let result = msg.downcast::<ScanResult>().unwrap();
        assert_eq!(result.objects.len(), 1);
        bus.shutdown();
    }

    #[test]
    fn detector_error_yields_empty_result_not_a_crash() {
        let bus = Bus::new();
        let (_id, scan_requests) = bus.subscribe_queue("cam/stub/scan", 2);
        let (_rid, processed) = bus.subscribe_queue("cam/stub/processed", 2);
        let detector = Arc::new(StubDetector {
            result: std::sync::Mutex::new(Some(Err(anyhow::anyhow!("model backend unavailable")))),
        });
        let runner = DetectorRunner::new(detector, scan_requests, "cam/stub/processed");

        bus.publish("cam/stub/scan", scan()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(runner.process_next(&bus));
        std::thread::sleep(std::time::Duration::from_millis(50));

        let msg = processed.try_recv().expect("result published even on error");
        let result = msg.downcast::<ScanResult>().unwrap();
        assert!(result.objects.is_empty());
        bus.shutdown();
    }
}
