//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Per-label object filtering, ported from `viseron/helpers/filter.py`'s
//! `Filter` class: four checks applied in a fixed order (confidence, width,
//! height, mask), each recording which check failed via `filter_hit`.

use crate::config::LabelFilterConfig;
use crate::detector::DetectedObject;

/// A point-in-polygon mask in absolute pixel coordinates.
pub type Polygon = Vec<(i32, i32)>;

/// Ray-casting point-in-polygon test, used both for label masks here and for
/// zone containment in `zone.rs` (spec 8.1, scenario S6).
pub fn point_in_polygon(point: (f32, f32), polygon: &[(i32, i32)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let (px, py) = point;
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].0 as f32, polygon[i].1 as f32);
        let (xj, yj) = (polygon[j].0 as f32, polygon[j].1 as f32);
        if ((yi > py) != (yj > py)) && (px < (xj - xi) * (py - yi) / (yj - yi) + xi) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Filters a detected object against a single configured label (spec 4.5).
pub struct Filter {
    label: String,
    confidence: f32,
    width_min: f32,
    width_max: f32,
    height_min: f32,
    height_max: f32,
    mask: Vec<Polygon>,
    trigger_recorder: bool,
    require_motion: bool,
    post_processor: Option<String>,
}

impl Filter {
    pub fn new(resolution: (u32, u32), config: &LabelFilterConfig) -> Self {
        let _ = resolution;
        Filter {
            label: config.label.clone(),
            confidence: config.confidence,
            width_min: config.width_min,
            width_max: config.width_max,
            height_min: config.height_min,
            height_max: config.height_max,
            mask: config
                .mask
                .iter()
                .map(|points| points.iter().map(|&(x, y)| (x, y)).collect())
                .collect(),
            trigger_recorder: config.trigger_recorder,
            require_motion: config.require_motion,
            post_processor: config.post_processor.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn trigger_recorder(&self) -> bool {
        self.trigger_recorder
    }

    pub fn require_motion(&self) -> bool {
        self.require_motion
    }

    pub fn post_processor(&self) -> Option<&str> {
        self.post_processor.as_deref()
    }

    fn filter_confidence(&self, obj: &mut DetectedObject) -> bool {
        if obj.confidence > self.confidence {
            return true;
        }
        obj.filter_hit = Some("confidence");
        false
    }

    fn filter_width(&self, obj: &mut DetectedObject) -> bool {
        let w = obj.rel_width();
        if w > self.width_min && w < self.width_max {
            return true;
        }
        obj.filter_hit = Some("width");
        false
    }

    fn filter_height(&self, obj: &mut DetectedObject) -> bool {
        let h = obj.rel_height();
        if h > self.height_min && h < self.height_max {
            return true;
        }
        obj.filter_hit = Some("height");
        false
    }

    fn filter_mask(&self, obj: &mut DetectedObject, resolution: (u32, u32)) -> bool {
        let bottom_centre = obj.bottom_centre(resolution.0, resolution.1);
        for polygon in &self.mask {
            if point_in_polygon(bottom_centre, polygon) {
                obj.filter_hit = Some("mask");
                return false;
            }
        }
        true
    }

    /// Applies the four checks in order, short-circuiting on the first
    /// failure (spec 4.5 "Applies the per-label Filter in order").
    pub fn filter_object(&self, obj: &mut DetectedObject, resolution: (u32, u32)) -> bool {
        self.filter_confidence(obj)
            && self.filter_width(obj)
            && self.filter_height(obj)
            && self.filter_mask(obj, resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label_config() -> LabelFilterConfig {
        LabelFilterConfig {
            label: "person".into(),
            confidence: 0.5,
            width_min: 0.2,
            width_max: 0.8,
            height_min: 0.2,
            height_max: 0.8,
            trigger_recorder: true,
            require_motion: false,
            post_processor: None,
            mask: vec![],
        }
    }

    #[test]
    fn scenario_s2_relevant_and_triggers_recording() {
        let filter = Filter::new((1920, 1080), &label_config());
        let mut obj = DetectedObject::new("person", 0.91, 0.3, 0.3, 0.7, 0.7);
        assert!(filter.filter_object(&mut obj, (1920, 1080)));
        obj.relevant = true;
        if filter.trigger_recorder() {
            obj.triggers_recording = true;
        }
        assert!(obj.relevant);
        assert!(obj.triggers_recording);
    }

    #[test]
    fn records_first_failing_check() {
        let filter = Filter::new((1920, 1080), &label_config());
        let mut obj = DetectedObject::new("person", 0.1, 0.3, 0.3, 0.7, 0.7);
        assert!(!filter.filter_object(&mut obj, (1920, 1080)));
        assert_eq!(obj.filter_hit, Some("confidence"));
    }

    #[test]
    fn mask_hides_object_in_excluded_region() {
        let mut config = label_config();
        config.mask = vec![vec![(0, 0), (100, 0), (100, 100), (0, 100)]];
        let filter = Filter::new((1920, 1080), &config);
        let mut obj = DetectedObject::new("person", 0.9, 0.0, 0.0, 0.05, 0.1);
        assert!(!filter.filter_object(&mut obj, (1920, 1080)));
        assert_eq!(obj.filter_hit, Some("mask"));
    }
}
