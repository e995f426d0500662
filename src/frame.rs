//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! `RawFrame` and `DecodedFrame`, the two frame representations that flow
//! across the Data Bus (spec section 3). Grounded on `secluso-motion-ai`'s
//! `frame.rs`: an `Arc`-backed byte buffer, rayon-parallel colour conversion,
//! and a letterbox-aware resize. The wire format here is NV12 (spec 3) rather
//! than the teacher's planar YUV420, so the colour-conversion math is
//! rewritten for NV12's interleaved chroma plane while keeping the teacher's
//! row-parallel structure.

use std::sync::{Arc, RwLock};
use std::time::{Instant, SystemTime};

use image::{imageops::FilterType, Rgb, RgbImage};
use rayon::prelude::*;

use crate::error::{PipelineError, Result};

/// A single NV12-encoded frame straight off the external reader's stdout.
/// Owned by Capture while on the bus; subscribers must not mutate the bytes
/// (spec 3).
#[derive(Clone)]
pub struct RawFrame {
    data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub captured_at: SystemTime,
    pub captured_monotonic: Instant,
}

impl RawFrame {
    /// Build a `RawFrame`, enforcing the frame-size integrity property of
    /// spec 8.1: exactly `width * height * 1.5` bytes, else `DecodeFault`.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = frame_bytes(width, height);
        if data.len() != expected {
            return Err(PipelineError::DecodeFault {
                expected,
                actual: data.len(),
            });
        }
        Ok(RawFrame {
            data: Arc::new(data),
            width,
            height,
            captured_at: SystemTime::now(),
            captured_monotonic: Instant::now(),
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Convert the NV12 buffer to an interleaved RGB8 image.
    pub fn to_rgb(&self) -> RgbImage {
        nv12_to_rgb(&self.data, self.width, self.height)
    }
}

pub fn frame_bytes(width: u32, height: u32) -> usize {
    (width as usize * height as usize * 3) / 2
}

/// BT.601 limited-range NV12 -> RGB8, row-parallelised with rayon (mirrors
/// the row-parallel structure of `secluso-motion-ai`'s `yuv_to_rgb`).
fn nv12_to_rgb(buf: &[u8], width: u32, height: u32) -> RgbImage {
    let (w, h) = (width as usize, height as usize);
    let y_plane = &buf[..w * h];
    let uv_plane = &buf[w * h..];

    let mut out = vec![0u8; w * h * 3];
    out.par_chunks_mut(w * 3).enumerate().for_each(|(row, dst_row)| {
        let uv_row = (row / 2) * w;
        for col in 0..w {
            let y = y_plane[row * w + col] as i32;
            let uv_col = (col / 2) * 2;
            let u = uv_plane[uv_row + uv_col] as i32;
            let v = uv_plane[uv_row + uv_col + 1] as i32;

            let c = y - 16;
            let d = u - 128;
            let e = v - 128;

            let r = (298 * c + 409 * e + 128) >> 8;
            let g = (298 * c - 100 * d - 208 * e + 128) >> 8;
            let b = (298 * c + 516 * d + 128) >> 8;

            let px = col * 3;
            dst_row[px] = r.clamp(0, 255) as u8;
            dst_row[px + 1] = g.clamp(0, 255) as u8;
            dst_row[px + 2] = b.clamp(0, 255) as u8;
        }
    });

    RgbImage::from_raw(width, height, out).expect("buffer sized for width*height*3")
}

/// Geometry recorded when a frame is letterboxed, so bounding boxes returned
/// by a detector in model space can be mapped back to the original frame
/// (spec 4.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: u32,
    pub pad_y: u32,
    pub source_w: u32,
    pub source_h: u32,
    pub target: u32,
}

impl Letterbox {
    pub fn compute(source_w: u32, source_h: u32, target: u32) -> Self {
        let scale = (target as f32 / source_w as f32).min(target as f32 / source_h as f32);
        let scaled_w = (source_w as f32 * scale).round() as u32;
        let scaled_h = (source_h as f32 * scale).round() as u32;
        Letterbox {
            scale,
            pad_x: (target - scaled_w) / 2,
            pad_y: (target - scaled_h) / 2,
            source_w,
            source_h,
            target,
        }
    }

    /// Map a point in model (letterboxed) space back to source-frame space.
    pub fn unletterbox(&self, x: f32, y: f32) -> (f32, f32) {
        (
            ((x - self.pad_x as f32) / self.scale).clamp(0.0, self.source_w as f32),
            ((y - self.pad_y as f32) / self.scale).clamp(0.0, self.source_h as f32),
        )
    }

    pub fn apply(&self, image: &RgbImage) -> RgbImage {
        let scaled_w = (self.source_w as f32 * self.scale).round() as u32;
        let scaled_h = (self.source_h as f32 * self.scale).round() as u32;
        let resized = image::imageops::resize(image, scaled_w.max(1), scaled_h.max(1), FilterType::Triangle);
        let mut canvas = RgbImage::from_pixel(self.target, self.target, Rgb([0, 0, 0]));
        image::imageops::overlay(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
        canvas
    }
}

/// A decoded image with per-detector resized views, lazily materialised and
/// immutable once published (spec 3).
pub struct DecodedFrame {
    pub source: RawFrame,
    rgb: RgbImage,
    views: RwLock<std::collections::HashMap<String, Arc<RgbImage>>>,
}

impl DecodedFrame {
    pub fn new(source: RawFrame) -> Self {
        let rgb = source.to_rgb();
        DecodedFrame {
            source,
            rgb,
            views: RwLock::new(std::collections::HashMap::new()),
        }
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    /// Resize (or letterbox, when `model_w == model_h`) for `detector_name`,
    /// caching the result so repeated scans don't re-resize.
    pub fn view_for(&self, detector_name: &str, model_w: u32, model_h: u32) -> Arc<RgbImage> {
        if let Some(cached) = self.views.read().unwrap().get(detector_name) {
            return Arc::clone(cached);
        }
        let resized = if model_w == model_h {
            Letterbox::compute(self.rgb.width(), self.rgb.height(), model_w).apply(&self.rgb)
        } else {
            image::imageops::resize(&self.rgb, model_w, model_h, FilterType::Triangle)
        };
        let arc = Arc::new(resized);
        self.views
            .write()
            .unwrap()
            .insert(detector_name.to_string(), Arc::clone(&arc));
        arc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_sized_buffer() {
        let err = RawFrame::new(vec![0u8; 10], 4, 4).unwrap_err();
        assert!(matches!(err, PipelineError::DecodeFault { .. }));
    }

    #[test]
    fn accepts_exact_nv12_size() {
        let frame = RawFrame::new(vec![128u8; frame_bytes(4, 4)], 4, 4).unwrap();
        let rgb = frame.to_rgb();
        assert_eq!((rgb.width(), rgb.height()), (4, 4));
    }

    #[test]
    fn letterbox_round_trip_within_one_pixel() {
        for (w, h) in [(1920u32, 1080u32), (480, 1080), (1080, 480)] {
            let lb = Letterbox::compute(w, h, 640);
            let scaled_w = (w as f32 * lb.scale).round();
            let scaled_h = (h as f32 * lb.scale).round();
            let point = (lb.pad_x as f32 + scaled_w / 2.0, lb.pad_y as f32 + scaled_h / 2.0);
            let (x, y) = lb.unletterbox(point.0, point.1);
            assert!((x - w as f32 / 2.0).abs() <= 1.0, "w={w} h={h} x={x}");
            assert!((y - h as f32 / 2.0).abs() <= 1.0, "w={w} h={h} y={y}");
        }
    }
}
