//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Zone evaluation, ported from `viseron/zones.py`'s `Zone.filter_zone`: the
//! same per-label `Filter` applied again with the zone's own label map, plus
//! point-in-polygon containment, publishing a change event only when the set
//! of in-zone objects actually changes.

use crate::bus::Bus;
use crate::config::ZoneConfig;
use crate::detector::DetectedObject;
use crate::filter::{point_in_polygon, Filter};

pub struct Zone {
    name: String,
    coordinates: Vec<(i32, i32)>,
    filters: Vec<Filter>,
    objects_in_zone: Vec<DetectedObject>,
    topic: String,
}

impl Zone {
    pub fn new(camera_slug: &str, resolution: (u32, u32), config: &ZoneConfig) -> Self {
        Zone {
            name: config.name.clone(),
            coordinates: config.coordinates.clone(),
            filters: config.labels.iter().map(|l| Filter::new(resolution, l)).collect(),
            objects_in_zone: Vec::new(),
            topic: format!("{camera_slug}/zone/{}", config.name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn objects_in_zone(&self) -> &[DetectedObject] {
        &self.objects_in_zone
    }

    fn filter_for(&self, label: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.label() == label)
    }

    /// Re-evaluate this zone against the full set of already-globally-filtered
    /// objects on a frame. Spec 4.5: "Zones are evaluated AFTER global
    /// filters using the same algorithm with the zone's own label map; a
    /// zone transition publishes objects_in_zone on that zone's topic."
    pub fn evaluate(&mut self, objects: &mut [DetectedObject], resolution: (u32, u32), bus: &Bus) {
        let mut in_zone = Vec::new();
        for obj in objects.iter_mut() {
            let Some(filter) = self.filter_for(&obj.label) else {
                continue;
            };
            if !filter.filter_object(obj, resolution) {
                continue;
            }
            let bottom_centre = obj.bottom_centre(resolution.0, resolution.1);
            if !point_in_polygon(bottom_centre, &self.coordinates) {
                continue;
            }
            obj.relevant = true;
            if filter.trigger_recorder() {
                obj.triggers_recording = true;
            }
            if let Some(post_processor) = filter.post_processor() {
                let _ = bus.publish(
                    &format!("{}/post_processor/{post_processor}", self.topic),
                    obj.clone(),
                );
            }
            in_zone.push(obj.clone());
        }

        if in_zone != self.objects_in_zone {
            self.objects_in_zone = in_zone;
            let _ = bus.publish(&self.topic, self.objects_in_zone.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelFilterConfig;

    fn zone_config() -> ZoneConfig {
        ZoneConfig {
            name: "driveway".into(),
            coordinates: vec![(0, 500), (1920, 500), (1920, 1080), (0, 1080)],
            labels: vec![LabelFilterConfig {
                label: "person".into(),
                confidence: 0.5,
                width_min: 0.0,
                width_max: 1.0,
                height_min: 0.0,
                height_max: 1.0,
                trigger_recorder: true,
                require_motion: false,
                post_processor: None,
                mask: vec![],
            }],
        }
    }

    #[test]
    fn scenario_s6_bottom_centre_inside_polygon() {
        let bus = Bus::new();
        let mut zone = Zone::new("front", (1920, 1080), &zone_config());
        // bottom-centre at (960, 800): bbox whose bottom edge sits at y=800.
        let mut objects = vec![DetectedObject::new(
            "person",
            0.9,
            960.0 / 1920.0 - 0.01,
            700.0 / 1080.0,
            960.0 / 1920.0 + 0.01,
            800.0 / 1080.0,
        )];
        zone.evaluate(&mut objects, (1920, 1080), &bus);
        assert_eq!(zone.objects_in_zone().len(), 1);
        bus.shutdown();
    }

    #[test]
    fn scenario_s6_bottom_centre_outside_polygon() {
        let bus = Bus::new();
        let mut zone = Zone::new("front", (1920, 1080), &zone_config());
        let mut objects = vec![DetectedObject::new(
            "person",
            0.9,
            960.0 / 1920.0 - 0.01,
            300.0 / 1080.0,
            960.0 / 1920.0 + 0.01,
            400.0 / 1080.0,
        )];
        zone.evaluate(&mut objects, (1920, 1080), &bus);
        assert!(zone.objects_in_zone().is_empty());
        bus.shutdown();
    }
}
