use image::RgbaImage;
use serde::Serialize;

/// Pixel-level difference between two equally sized frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameDiff {
    pub width: u32,
    pub height: u32,
    pub total_pixels: u64,
    pub changed_pixels: u64,
}

impl FrameDiff {
    pub fn changed_fraction(&self) -> f64 {
        if self.total_pixels == 0 {
            return 0.0;
        }
        self.changed_pixels as f64 / self.total_pixels as f64
    }

    /// True when strictly fewer than `threshold` of the pixels changed.
    pub fn within(&self, threshold: f64) -> bool {
        self.changed_fraction() < threshold
    }
}

/// Luminance histogram of `|a - b|`.
///
/// Returns `None` when the dimensions differ; such frames are never comparable.
pub fn diff_histogram(a: &RgbaImage, b: &RgbaImage) -> Option<[u64; 256]> {
    if a.dimensions() != b.dimensions() {
        return None;
    }

    let mut histogram = [0u64; 256];
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let dr = pa[0].abs_diff(pb[0]);
        let dg = pa[1].abs_diff(pb[1]);
        let db = pa[2].abs_diff(pb[2]);
        histogram[luma(dr, dg, db) as usize] += 1;
    }
    Some(histogram)
}

pub fn diff_frames(a: &RgbaImage, b: &RgbaImage) -> Option<FrameDiff> {
    let histogram = diff_histogram(a, b)?;
    let (width, height) = a.dimensions();
    Some(FrameDiff {
        width,
        height,
        total_pixels: u64::from(width) * u64::from(height),
        changed_pixels: histogram[1..].iter().sum(),
    })
}

/// Near-equality under `threshold`: same size and fewer than `threshold` changed pixels.
pub fn frames_match(a: &RgbaImage, b: &RgbaImage, threshold: f64) -> bool {
    diff_frames(a, b).is_some_and(|diff| diff.within(threshold))
}

// ITU-R 601-2 weights in 16.16 fixed point, rounded.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let l = u32::from(r) * 19_595 + u32::from(g) * 38_470 + u32::from(b) * 7_471 + 0x8000;
    (l >> 16) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(w: u32, h: u32, v: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([v, v, v, 255]))
    }

    #[test]
    fn identical_frames_have_no_changes() {
        let a = solid(100, 100, 30);
        let diff = diff_frames(&a, &a.clone()).unwrap();
        assert_eq!(diff.total_pixels, 10_000);
        assert_eq!(diff.changed_pixels, 0);
        assert!(frames_match(&a, &a.clone(), 0.01));
    }

    #[test]
    fn size_mismatch_is_never_equal() {
        let a = solid(100, 100, 30);
        let b = solid(100, 99, 30);
        assert!(diff_frames(&a, &b).is_none());
        assert!(!frames_match(&a, &b, 1.0));
    }

    #[test]
    fn threshold_is_strict() {
        let a = solid(10, 10, 0);
        let mut b = a.clone();
        b.put_pixel(0, 0, Rgba([255, 255, 255, 255]));

        let diff = diff_frames(&a, &b).unwrap();
        assert_eq!(diff.changed_pixels, 1);
        assert!((diff.changed_fraction() - 0.01).abs() < f64::EPSILON);
        assert!(!diff.within(0.01));
        assert!(diff.within(0.02));
    }

    #[test]
    fn alpha_only_changes_are_ignored() {
        let a = solid(4, 4, 80);
        let mut b = a.clone();
        b.put_pixel(1, 1, Rgba([80, 80, 80, 0]));
        assert_eq!(diff_frames(&a, &b).unwrap().changed_pixels, 0);
    }

    #[test]
    fn faint_channel_noise_rounds_to_zero_luma() {
        let a = solid(4, 4, 100);
        let mut b = a.clone();
        b.put_pixel(2, 2, Rgba([101, 100, 100, 255]));
        assert_eq!(diff_frames(&a, &b).unwrap().changed_pixels, 0);
    }
}
