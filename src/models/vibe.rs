use super::types::UpdateMaskModel;
use crate::config::{AlgorithmVariant, VibeParams};
use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};
use image::{GrayImage, Luma};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const RNG_SEED: u64 = 0x5eed_0f_71be;

/// Sample-based background model (ViBe)
///
/// Every pixel keeps a small set of past values. A pixel is background when
/// enough samples lie within the distance threshold of its current value.
/// Background pixels randomly refresh one of their own samples and one
/// sample of a random neighbour, so the model adapts without a fixed
/// learning rate.
pub struct Vibe {
    samples_per_pixel: usize,
    neighbor_radius: i64,
    distance_threshold: u32,
    min_matches: usize,
    update_factor: u32,

    // Shape: [pixel, sample, channel]
    // Seeded from the first frame and again whenever the frame geometry changes
    samples: Option<Array3<u8>>,
    width: u32,
    height: u32,
    channels: usize,

    mask: ForegroundMask,
    rng: StdRng,
}

impl Vibe {
    pub fn new(params: &VibeParams) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameters {
            variant: AlgorithmVariant::Vibe,
            reason: reason.to_string(),
        };

        if params.samples < 1 {
            return Err(invalid("samples must be at least 1"));
        }
        if params.pixel_neighbor < 0 {
            return Err(invalid("pixelNeighbor must not be negative"));
        }
        if params.distance_threshold < 0 {
            return Err(invalid("distanceThreshold must not be negative"));
        }
        if params.matching_threshold < 1 || params.matching_threshold > params.samples {
            return Err(invalid("matchingThreshold must be between 1 and samples"));
        }
        if params.update_factor < 1 {
            return Err(invalid("updateFactor must be at least 1"));
        }

        Ok(Self {
            samples_per_pixel: params.samples as usize,
            neighbor_radius: i64::from(params.pixel_neighbor),
            distance_threshold: params.distance_threshold as u32,
            min_matches: params.matching_threshold as usize,
            update_factor: params.update_factor as u32,
            samples: None,
            width: 0,
            height: 0,
            channels: 0,
            mask: GrayImage::new(0, 0),
            rng: StdRng::seed_from_u64(RNG_SEED),
        })
    }

    /// Pixel index of a random neighbour of (x, y), clamped to the frame
    fn random_neighbor(&mut self, x: u32, y: u32) -> usize {
        let r = self.neighbor_radius;
        let nx = (i64::from(x) + self.rng.random_range(-r..=r)).clamp(0, i64::from(self.width) - 1);
        let ny = (i64::from(y) + self.rng.random_range(-r..=r)).clamp(0, i64::from(self.height) - 1);
        ny as usize * self.width as usize + nx as usize
    }

    fn seed(&mut self, frame: &Frame) {
        let (width, height) = frame.dimensions();
        let channels = frame.channels().count();

        tracing::debug!(
            "Seeding ViBe model at {}x{} with {} samples per pixel",
            width,
            height,
            self.samples_per_pixel
        );

        self.width = width;
        self.height = height;
        self.channels = channels;

        let pixels = width as usize * height as usize;
        let mut samples = Array3::<u8>::zeros((pixels, self.samples_per_pixel, channels));
        let raw = frame.as_raw();

        for y in 0..height {
            for x in 0..width {
                let p = y as usize * width as usize + x as usize;
                for s in 0..self.samples_per_pixel {
                    let q = self.random_neighbor(x, y);
                    for c in 0..channels {
                        samples[[p, s, c]] = raw[q * channels + c];
                    }
                }
            }
        }

        self.samples = Some(samples);
        // Nothing is foreground on the seeding frame
        self.mask = GrayImage::new(width, height);
    }

    fn needs_seed(&self, frame: &Frame) -> bool {
        self.samples.is_none()
            || frame.dimensions() != (self.width, self.height)
            || frame.channels().count() != self.channels
    }
}

impl UpdateMaskModel for Vibe {
    fn update(&mut self, frame: &Frame) -> Result<()> {
        let _span = tracing::debug_span!("vibe_update").entered();

        if self.needs_seed(frame) {
            self.seed(frame);
            return Ok(());
        }

        let mut samples = self
            .samples
            .take()
            .ok_or_else(|| Error::Engine("ViBe samples are missing".to_string()))?;

        let raw = frame.as_raw();
        let channels = self.channels;
        // Summed absolute difference over all channels
        let limit = self.distance_threshold.saturating_mul(channels as u32);

        for y in 0..self.height {
            for x in 0..self.width {
                let p = y as usize * self.width as usize + x as usize;
                let pixel = &raw[p * channels..(p + 1) * channels];

                let mut matches = 0;
                for s in 0..self.samples_per_pixel {
                    let dist: u32 = pixel
                        .iter()
                        .enumerate()
                        .map(|(c, &v)| u32::from(v.abs_diff(samples[[p, s, c]])))
                        .sum();
                    if dist < limit {
                        matches += 1;
                        if matches >= self.min_matches {
                            break;
                        }
                    }
                }

                if matches < self.min_matches {
                    self.mask.put_pixel(x, y, Luma([255]));
                    continue;
                }

                self.mask.put_pixel(x, y, Luma([0]));

                if self.rng.random_range(0..self.update_factor) == 0 {
                    let s = self.rng.random_range(0..self.samples_per_pixel);
                    for (c, &v) in pixel.iter().enumerate() {
                        samples[[p, s, c]] = v;
                    }
                }

                if self.rng.random_range(0..self.update_factor) == 0 {
                    let q = self.random_neighbor(x, y);
                    let s = self.rng.random_range(0..self.samples_per_pixel);
                    for (c, &v) in pixel.iter().enumerate() {
                        samples[[q, s, c]] = v;
                    }
                }
            }
        }

        self.samples = Some(samples);
        Ok(())
    }

    fn mask(&self) -> &ForegroundMask {
        &self.mask
    }
}
