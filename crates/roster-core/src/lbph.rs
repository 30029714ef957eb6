//! Local Binary Pattern Histogram (LBPH) face matcher.
//!
//! Each face crop is turned into a 3×3 LBP code image (8 neighbours, radius 1),
//! split into an 8×8 grid, and described by one normalized 256-bin histogram
//! per cell. Prediction is a nearest-neighbour scan over every stored sample
//! using the chi-square distance, so lower confidence means a closer match.

use crate::types::Label;
use image::GrayImage;
use thiserror::Error;

pub const GRID_X: usize = 8;
pub const GRID_Y: usize = 8;
pub const BINS: usize = 256;
/// Length of one spatial histogram (`GRID_X * GRID_Y * BINS`).
pub const HISTOGRAM_LEN: usize = GRID_X * GRID_Y * BINS;

#[derive(Error, Debug)]
pub enum LbphError {
    #[error("face crop {width}x{height} is too small for the LBP grid")]
    FaceTooSmall { width: u32, height: u32 },
    #[error("stored histogram has {actual} bytes, expected {expected}")]
    BadHistogramLength { expected: usize, actual: usize },
}

/// Spatial LBP histogram of one face sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram(Vec<f32>);

impl Histogram {
    /// Describe a grayscale face crop.
    pub fn from_face(face: &GrayImage) -> Result<Self, LbphError> {
        let (width, height) = face.dimensions();
        let too_small = LbphError::FaceTooSmall { width, height };
        if width < 3 || height < 3 {
            return Err(too_small);
        }

        let codes = lbp_codes(face);
        let lbp_w = width as usize - 2;
        let lbp_h = height as usize - 2;
        let cell_w = lbp_w / GRID_X;
        let cell_h = lbp_h / GRID_Y;
        if cell_w == 0 || cell_h == 0 {
            return Err(too_small);
        }

        // Pixels past the last full cell are ignored.
        let cell_pixels = (cell_w * cell_h) as f32;
        let mut values = vec![0f32; HISTOGRAM_LEN];
        for row in 0..GRID_Y {
            for col in 0..GRID_X {
                let cell = &mut values[(row * GRID_X + col) * BINS..][..BINS];
                for y in row * cell_h..(row + 1) * cell_h {
                    for x in col * cell_w..(col + 1) * cell_w {
                        cell[codes[y * lbp_w + x] as usize] += 1.0;
                    }
                }
                for bin in cell.iter_mut() {
                    *bin /= cell_pixels;
                }
            }
        }

        Ok(Self(values))
    }

    /// Chi-square distance: `Σ 2·(a−b)² / (a+b)` over bins where `a+b > 0`.
    pub fn chi_square(&self, other: &Histogram) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(&a, &b)| {
                let (a, b) = (a as f64, b as f64);
                let sum = a + b;
                if sum > 0.0 {
                    2.0 * (a - b) * (a - b) / sum
                } else {
                    0.0
                }
            })
            .sum()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Little-endian `f32` blob for storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LbphError> {
        let expected = HISTOGRAM_LEN * 4;
        if bytes.len() != expected {
            return Err(LbphError::BadHistogramLength {
                expected,
                actual: bytes.len(),
            });
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self(values))
    }
}

/// Compute the 8-neighbour LBP code of every interior pixel.
///
/// A bit is set when the neighbour is at least as bright as the centre,
/// clockwise from the top-left neighbour (bit 7) to the left one (bit 0).
/// The output is `(width-2) × (height-2)`, row-major.
fn lbp_codes(face: &GrayImage) -> Vec<u8> {
    let (width, height) = face.dimensions();
    let px = |x: u32, y: u32| face.get_pixel(x, y).0[0];

    let mut codes = Vec::with_capacity((width as usize - 2) * (height as usize - 2));
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let c = px(x, y);
            let neighbours = [
                px(x - 1, y - 1),
                px(x, y - 1),
                px(x + 1, y - 1),
                px(x + 1, y),
                px(x + 1, y + 1),
                px(x, y + 1),
                px(x - 1, y + 1),
                px(x - 1, y),
            ];
            let code = neighbours
                .iter()
                .fold(0u8, |acc, &n| (acc << 1) | u8::from(n >= c));
            codes.push(code);
        }
    }
    codes
}

/// Nearest-neighbour LBPH model: every enrolled sample with its label.
#[derive(Debug, Default)]
pub struct LbphModel {
    samples: Vec<(Label, Histogram)>,
}

impl LbphModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the model with `samples`.
    pub fn train(&mut self, samples: Vec<(Label, Histogram)>) {
        self.samples = samples;
    }

    /// Add `samples` to the existing model.
    pub fn update(&mut self, samples: Vec<(Label, Histogram)>) {
        self.samples.extend(samples);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Closest sample's label and its distance, or `None` for an empty model.
    ///
    /// Ties go to the sample enrolled first.
    pub fn predict(&self, probe: &Histogram) -> Option<(Label, f64)> {
        let mut best: Option<(Label, f64)> = None;
        for (label, sample) in &self.samples {
            let distance = probe.chi_square(sample);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((*label, distance));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    // 34x34 gives a 32x32 code image, i.e. 4x4-pixel cells.
    const SIDE: u32 = 34;

    fn uniform() -> GrayImage {
        GrayImage::from_pixel(SIDE, SIDE, Luma([90]))
    }

    fn horizontal_ramp() -> GrayImage {
        GrayImage::from_fn(SIDE, SIDE, |x, _| Luma([(x * 4) as u8]))
    }

    #[test]
    fn test_lbp_uniform_sets_every_bit() {
        let codes = lbp_codes(&uniform());
        assert_eq!(codes.len(), 32 * 32);
        assert!(codes.iter().all(|&c| c == 0xFF));
    }

    #[test]
    fn test_lbp_ramp_sets_right_and_vertical_bits() {
        // Brighter to the right: top-right, right, bottom-right plus the
        // equal top and bottom neighbours.
        let codes = lbp_codes(&horizontal_ramp());
        assert!(codes.iter().all(|&c| c == 0b0111_1100));
    }

    #[test]
    fn test_histogram_cells_are_normalized() {
        let hist = Histogram::from_face(&horizontal_ramp()).unwrap();
        assert_eq!(hist.as_slice().len(), HISTOGRAM_LEN);
        for cell in hist.as_slice().chunks(BINS) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let hist = Histogram::from_face(&horizontal_ramp()).unwrap();
        assert_eq!(hist.chi_square(&hist), 0.0);
    }

    #[test]
    fn test_chi_square_disjoint_codes() {
        // Every cell puts all its mass in a different bin: 2·(1+1) per cell.
        let a = Histogram::from_face(&uniform()).unwrap();
        let b = Histogram::from_face(&horizontal_ramp()).unwrap();
        let expected = (GRID_X * GRID_Y) as f64 * 4.0;
        assert!((a.chi_square(&b) - expected).abs() < 1e-6);
        assert!((b.chi_square(&a) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_face_too_small() {
        let tiny = GrayImage::new(9, 40);
        assert!(matches!(
            Histogram::from_face(&tiny),
            Err(LbphError::FaceTooSmall { width: 9, height: 40 })
        ));
        assert!(Histogram::from_face(&GrayImage::new(2, 2)).is_err());
    }

    #[test]
    fn test_histogram_bytes_roundtrip() {
        let hist = Histogram::from_face(&horizontal_ramp()).unwrap();
        let restored = Histogram::from_bytes(&hist.to_bytes()).unwrap();
        assert_eq!(hist, restored);
    }

    #[test]
    fn test_histogram_bytes_wrong_length() {
        let err = Histogram::from_bytes(&[0u8; 12]).unwrap_err();
        assert!(matches!(err, LbphError::BadHistogramLength { actual: 12, .. }));
    }

    #[test]
    fn test_predict_empty_model() {
        let model = LbphModel::new();
        let probe = Histogram::from_face(&uniform()).unwrap();
        assert!(model.predict(&probe).is_none());
    }

    #[test]
    fn test_predict_picks_nearest() {
        let mut model = LbphModel::new();
        model.train(vec![
            (Label(1), Histogram::from_face(&uniform()).unwrap()),
            (Label(2), Histogram::from_face(&horizontal_ramp()).unwrap()),
        ]);
        let probe = Histogram::from_face(&horizontal_ramp()).unwrap();
        let (label, distance) = model.predict(&probe).unwrap();
        assert_eq!(label, Label(2));
        assert_eq!(distance, 0.0);
    }

    #[test]
    fn test_train_replaces_update_appends() {
        let mut model = LbphModel::new();
        let sample = || Histogram::from_face(&uniform()).unwrap();
        model.train(vec![(Label(1), sample()), (Label(2), sample())]);
        model.train(vec![(Label(3), sample())]);
        assert_eq!(model.len(), 1);
        model.update(vec![(Label(3), sample())]);
        assert_eq!(model.len(), 2);
    }
}
