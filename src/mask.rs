//! Mask data and candidate types

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Single-channel binary mask with the same spatial dimensions as the
/// source image. Pixels are 0 (background) or 1 (object).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl MaskData {
    /// Create an empty (all-background) mask
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize)],
        }
    }

    /// Binarize a float probability map at the given threshold
    pub fn from_probabilities(width: u32, height: u32, probs: &[f32], threshold: f32) -> Self {
        let pixels = probs
            .iter()
            .map(|&p| u8::from(p.is_finite() && p > threshold))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.pixels[(y as usize) * (self.width as usize) + (x as usize)]
    }

    /// Number of object pixels
    pub fn area(&self) -> usize {
        self.pixels.iter().filter(|&&p| p > 0).count()
    }

    /// Render as an 8-bit grayscale raster with object pixels set to
    /// `label_value` (the selected label index on export)
    pub fn to_raster(&self, label_value: u8) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([if self.get(x, y) > 0 { label_value } else { 0 }])
        })
    }

    /// Grow the mask boundary by one 3x3 morphological step
    pub fn dilate(&self) -> MaskData {
        self.morph(true)
    }

    /// Shrink the mask boundary by one 3x3 morphological step
    pub fn erode(&self) -> MaskData {
        self.morph(false)
    }

    fn morph(&self, grow: bool) -> MaskData {
        let mut out = MaskData::empty(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut any = false;
                let mut all = true;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        let v = if nx < 0
                            || ny < 0
                            || nx >= self.width as i64
                            || ny >= self.height as i64
                        {
                            0
                        } else {
                            self.get(nx as u32, ny as u32)
                        };
                        any |= v > 0;
                        all &= v > 0;
                    }
                }
                let set = if grow { any } else { all };
                if set {
                    out.pixels[(y as usize) * (self.width as usize) + (x as usize)] = 1;
                }
            }
        }
        out
    }
}

/// One ranked mask proposal from a completed inference job.
///
/// Candidates for a job are always ordered by non-increasing `score`;
/// `rank` is the stable positional index assigned once by the gateway
/// and never recomputed after selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskCandidate {
    pub mask: MaskData,
    pub score: f32,
    pub rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from_rows(rows: &[&[u8]]) -> MaskData {
        let height = rows.len() as u32;
        let width = rows[0].len() as u32;
        let pixels = rows.iter().flat_map(|r| r.iter().copied()).collect();
        MaskData {
            width,
            height,
            pixels,
        }
    }

    #[test]
    fn test_from_probabilities_threshold() {
        let mask = MaskData::from_probabilities(2, 2, &[0.9, 0.4, 0.51, f32::NAN], 0.5);
        assert_eq!(mask.pixels, vec![1, 0, 1, 0]);
        assert_eq!(mask.area(), 2);
    }

    #[test]
    fn test_raster_uses_label_value() {
        let mask = mask_from_rows(&[&[1, 0], &[0, 1]]);
        let raster = mask.to_raster(7);
        assert_eq!(raster.get_pixel(0, 0).0[0], 7);
        assert_eq!(raster.get_pixel(1, 0).0[0], 0);
        assert_eq!(raster.get_pixel(1, 1).0[0], 7);
    }

    #[test]
    fn test_dilate_grows_single_pixel() {
        let mask = mask_from_rows(&[&[0, 0, 0], &[0, 1, 0], &[0, 0, 0]]);
        let grown = mask.dilate();
        assert_eq!(grown.area(), 9);
    }

    #[test]
    fn test_erode_shrinks_block() {
        let mask = mask_from_rows(&[
            &[1, 1, 1],
            &[1, 1, 1],
            &[1, 1, 1],
        ]);
        let shrunk = mask.erode();
        // Border pixels lose their out-of-image neighborhood
        assert_eq!(shrunk.area(), 1);
        assert_eq!(shrunk.get(1, 1), 1);
    }

    #[test]
    fn test_erode_then_dilate_of_empty_stays_empty() {
        let mask = MaskData::empty(4, 4);
        assert_eq!(mask.erode().area(), 0);
        assert_eq!(mask.dilate().area(), 0);
    }

    #[test]
    fn test_get_out_of_bounds_is_zero() {
        let mask = mask_from_rows(&[&[1]]);
        assert_eq!(mask.get(5, 5), 0);
    }
}
