//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Motion contour data and the motion debounce, the in-scope glue between a
//! black-box motion `Detector` (spec 1: out of scope) and the event state
//! machine's `motion` boolean (spec 4.5).

/// A list of contour polygons in absolute pixels plus the derived maximum
/// relative area (spec 3).
#[derive(Debug, Clone, Default)]
pub struct MotionContours {
    pub polygons: Vec<Vec<(i32, i32)>>,
    resolution: (u32, u32),
}

impl MotionContours {
    pub fn new(polygons: Vec<Vec<(i32, i32)>>, resolution: (u32, u32)) -> Self {
        MotionContours { polygons, resolution }
    }

    fn polygon_area(polygon: &[(i32, i32)]) -> f64 {
        if polygon.len() < 3 {
            return 0.0;
        }
        let mut area = 0.0_f64;
        for i in 0..polygon.len() {
            let (x1, y1) = polygon[i];
            let (x2, y2) = polygon[(i + 1) % polygon.len()];
            area += (x1 as f64) * (y2 as f64) - (x2 as f64) * (y1 as f64);
        }
        (area / 2.0).abs()
    }

    /// The maximum of `polygon_area / (w*h)` over all contours (spec 3
    /// invariant).
    pub fn max_relative_area(&self) -> f64 {
        let scale = (self.resolution.0 as f64) * (self.resolution.1 as f64);
        if scale == 0.0 {
            return 0.0;
        }
        self.polygons
            .iter()
            .map(|p| Self::polygon_area(p) / scale)
            .fold(0.0, f64::max)
    }
}

/// Debounces a raw per-frame motion-present boolean: `motion_frames`
/// consecutive positives are required to flip to `true`; a single negative
/// flips back to `false` immediately (spec 4.5, testable property 4).
pub struct MotionDebouncer {
    required_positives: u32,
    consecutive_positives: u32,
    active: bool,
}

impl MotionDebouncer {
    pub fn new(required_positives: u32) -> Self {
        MotionDebouncer {
            required_positives: required_positives.max(1),
            consecutive_positives: 0,
            active: false,
        }
    }

    /// Feed one frame's raw motion-present boolean; returns the debounced
    /// `motion` state after incorporating it.
    pub fn push(&mut self, motion_present: bool) -> bool {
        if motion_present {
            self.consecutive_positives += 1;
            if self.consecutive_positives >= self.required_positives {
                self.active = true;
            }
        } else {
            self.consecutive_positives = 0;
            self.active = false;
        }
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn testable_property_4_motion_debounce() {
        let mut debouncer = MotionDebouncer::new(3);
        let inputs = [true, true, false, true, true, true];
        let mut flipped_true_at = None;
        for (i, &input) in inputs.iter().enumerate() {
            if debouncer.push(input) && flipped_true_at.is_none() {
                flipped_true_at = Some(i);
            }
        }
        assert_eq!(flipped_true_at, Some(5));
    }

    #[test]
    fn single_negative_flips_back_immediately() {
        let mut debouncer = MotionDebouncer::new(3);
        assert!(!debouncer.push(true));
        assert!(!debouncer.push(true));
        assert!(debouncer.push(true));
        assert!(!debouncer.push(false));
    }

    #[test]
    fn max_relative_area_is_largest_contour_fraction() {
        let contours = MotionContours::new(
            vec![
                vec![(0, 0), (10, 0), (10, 10), (0, 10)],
                vec![(0, 0), (20, 0), (20, 20), (0, 20)],
            ],
            (100, 100),
        );
        assert!((contours.max_relative_area() - 0.04).abs() < 1e-9);
    }
}
