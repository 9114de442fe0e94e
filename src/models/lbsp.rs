use super::types::LazyModel;
use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};
use image::GrayImage;
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const RNG_SEED: u64 = 0x1b5b_5eed;

/// Neighbour offsets (dx, dy) of the 16-bit LBSP pattern in a 5x5 window
const LBSP_PATTERN: [(i64, i64); 16] = [
    (-1, 1),
    (1, -1),
    (1, 1),
    (-1, -1),
    (-2, 2),
    (2, -2),
    (2, 2),
    (-2, -2),
    (0, 2),
    (0, -2),
    (2, 0),
    (-2, 0),
    (0, 1),
    (0, -1),
    (1, 0),
    (-1, 0),
];

/// Window of the moving average of minimal sample distances
const MIN_DISTANCE_WINDOW: f32 = 100.0;
const UPDATE_RATE_MIN: f32 = 2.0;
const UPDATE_RATE_MAX: f32 = 256.0;

/// Fixed tuning of one classifier flavour
#[derive(Debug, Clone, Copy)]
struct Profile {
    name: &'static str,
    samples: usize,
    required_matches: usize,
    /// Per-channel absolute color distance
    color_threshold: f32,
    /// Per-channel LBSP Hamming distance
    descriptor_threshold: f32,
    /// LBSP bit threshold as a fraction of the reference intensity
    relative_lbsp_threshold: f32,
    /// Whether distance thresholds and update rates follow per-pixel feedback
    adaptive: bool,
    initial_update_rate: f32,
}

const SUBSENSE: Profile = Profile {
    name: "SuBSENSE",
    samples: 50,
    required_matches: 2,
    color_threshold: 30.0,
    descriptor_threshold: 3.0,
    relative_lbsp_threshold: 0.333,
    adaptive: true,
    initial_update_rate: UPDATE_RATE_MIN,
};

const LOBSTER: Profile = Profile {
    name: "LOBSTER",
    samples: 35,
    required_matches: 2,
    color_threshold: 30.0,
    descriptor_threshold: 4.0,
    relative_lbsp_threshold: 0.365,
    adaptive: false,
    initial_update_rate: 16.0,
};

/// Per-pixel feedback state
#[derive(Debug, Clone, Copy)]
struct Feedback {
    /// Multiplier on the distance thresholds, never below 1
    distance_factor: f32,
    /// Inverse probability of refreshing a sample
    update_rate: f32,
    mean_min_distance: f32,
    /// Grows when the classification flips between frames
    blink: f32,
    last_foreground: bool,
}

impl Feedback {
    fn new(update_rate: f32) -> Self {
        Self {
            distance_factor: 1.0,
            update_rate,
            mean_min_distance: 0.0,
            blink: 0.0,
            last_foreground: false,
        }
    }

    fn adapt(&mut self, foreground: bool, min_distance: f32) {
        let rate = 1.0 / MIN_DISTANCE_WINDOW;
        self.mean_min_distance = self.mean_min_distance * (1.0 - rate) + min_distance * rate;

        if foreground != self.last_foreground {
            self.blink += 1.0;
        } else {
            self.blink = (self.blink - 0.1).max(0.0);
        }
        self.last_foreground = foreground;

        let d_min = self.mean_min_distance.max(0.01);
        let v = self.blink.max(0.1);

        let bound = (1.0 + 2.0 * self.mean_min_distance).powi(2);
        if self.distance_factor < bound {
            self.distance_factor += 0.01 * (1.0 + self.blink);
        } else {
            self.distance_factor -= 0.01 / (1.0 + self.blink);
        }
        self.distance_factor = self.distance_factor.max(1.0);

        if foreground {
            self.update_rate += 1.0 / (v * d_min);
        } else {
            self.update_rate -= v / d_min;
        }
        self.update_rate = self.update_rate.clamp(UPDATE_RATE_MIN, UPDATE_RATE_MAX);
    }
}

/// Pixel classifier built on color samples plus LBSP texture descriptors
///
/// A pixel is background when at least `required_matches` of its samples
/// agree with the current frame in both color and local texture. The
/// SuBSENSE flavour adjusts each pixel's distance threshold and update rate
/// from how unstable its classification has been; LOBSTER keeps them fixed.
///
/// The model must be seeded with [`LazyModel::initialize`] before `apply`.
pub struct LbspClassifier {
    profile: Profile,

    // Shape: [pixel, sample, channel]
    colors: Option<Array3<u8>>,
    descriptors: Option<Array3<u16>>,
    feedback: Vec<Feedback>,
    roi: Option<GrayImage>,
    width: u32,
    height: u32,
    channels: usize,
    rng: StdRng,
}

impl LbspClassifier {
    pub fn subsense() -> Self {
        Self::with_profile(SUBSENSE)
    }

    pub fn lobster() -> Self {
        Self::with_profile(LOBSTER)
    }

    fn with_profile(profile: Profile) -> Self {
        Self {
            profile,
            colors: None,
            descriptors: None,
            feedback: Vec::new(),
            roi: None,
            width: 0,
            height: 0,
            channels: 0,
            rng: StdRng::seed_from_u64(RNG_SEED),
        }
    }

    fn clamped_index(&self, x: i64, y: i64) -> usize {
        let x = x.clamp(0, i64::from(self.width) - 1);
        let y = y.clamp(0, i64::from(self.height) - 1);
        y as usize * self.width as usize + x as usize
    }

    fn random_neighbor(&mut self, x: u32, y: u32) -> usize {
        let dx = self.rng.random_range(-1..=1);
        let dy = self.rng.random_range(-1..=1);
        self.clamped_index(i64::from(x) + dx, i64::from(y) + dy)
    }

    /// LBSP descriptors of every pixel and channel, using each pixel as its own reference
    fn describe(&self, raw: &[u8]) -> Vec<u16> {
        let channels = self.channels;
        let mut out = vec![0u16; raw.len()];

        for y in 0..i64::from(self.height) {
            for x in 0..i64::from(self.width) {
                let p = self.clamped_index(x, y);
                for c in 0..channels {
                    let reference = raw[p * channels + c];
                    let threshold = f32::from(reference) * self.profile.relative_lbsp_threshold;
                    let mut bits = 0u16;
                    for (bit, (dx, dy)) in LBSP_PATTERN.iter().enumerate() {
                        let q = self.clamped_index(x + dx, y + dy);
                        let diff = f32::from(raw[q * channels + c].abs_diff(reference));
                        if diff > threshold {
                            bits |= 1 << bit;
                        }
                    }
                    out[p * channels + c] = bits;
                }
            }
        }

        out
    }

    fn in_roi(&self, x: u32, y: u32) -> bool {
        self.roi.as_ref().map_or(true, |roi| roi.get_pixel(x, y)[0] != 0)
    }
}

impl LazyModel for LbspClassifier {
    fn initialize(&mut self, frame: &Frame, roi: Option<&GrayImage>) -> Result<()> {
        let (width, height) = frame.dimensions();
        let channels = frame.channels().count();

        tracing::debug!(
            "Initializing {} model at {}x{} with {} samples per pixel",
            self.profile.name,
            width,
            height,
            self.profile.samples
        );

        self.width = width;
        self.height = height;
        self.channels = channels;
        self.roi = match roi {
            Some(mask) if mask.dimensions() == (width, height) => Some(mask.clone()),
            Some(mask) => {
                tracing::warn!(
                    "Ignoring {}x{} region of interest for a {}x{} frame",
                    mask.width(),
                    mask.height(),
                    width,
                    height
                );
                None
            }
            None => None,
        };

        let raw = frame.as_raw();
        let current = self.describe(raw);
        let pixels = width as usize * height as usize;
        let samples = self.profile.samples;

        let mut colors = Array3::<u8>::zeros((pixels, samples, channels));
        let mut descriptors = Array3::<u16>::zeros((pixels, samples, channels));

        for y in 0..height {
            for x in 0..width {
                let p = y as usize * width as usize + x as usize;
                for s in 0..samples {
                    let q = self.random_neighbor(x, y);
                    for c in 0..channels {
                        colors[[p, s, c]] = raw[q * channels + c];
                        descriptors[[p, s, c]] = current[q * channels + c];
                    }
                }
            }
        }

        self.colors = Some(colors);
        self.descriptors = Some(descriptors);
        self.feedback = vec![Feedback::new(self.profile.initial_update_rate); pixels];
        Ok(())
    }

    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("lbsp_apply", model = self.profile.name).entered();

        if frame.dimensions() != (self.width, self.height)
            || frame.channels().count() != self.channels
        {
            return Err(Error::Engine(format!(
                "{} was initialized for {}x{} frames",
                self.profile.name, self.width, self.height
            )));
        }

        let (mut colors, mut descriptors) = match (self.colors.take(), self.descriptors.take()) {
            (Some(colors), Some(descriptors)) => (colors, descriptors),
            _ => {
                return Err(Error::Engine(format!(
                    "{} applied before initialization",
                    self.profile.name
                )))
            }
        };

        let profile = self.profile;
        let channels = self.channels;
        let raw = frame.as_raw();
        let current = self.describe(raw);
        let mut out = vec![0u8; self.feedback.len()];

        for y in 0..self.height {
            for x in 0..self.width {
                let p = y as usize * self.width as usize + x as usize;
                if !self.in_roi(x, y) {
                    continue;
                }

                let color = &raw[p * channels..(p + 1) * channels];
                let texture = &current[p * channels..(p + 1) * channels];
                let factor = self.feedback[p].distance_factor;
                let color_limit = profile.color_threshold * factor * channels as f32;
                let descriptor_limit = profile.descriptor_threshold * factor * channels as f32;

                let mut matches = 0;
                let mut min_distance = 1.0f32;
                for s in 0..profile.samples {
                    let color_distance: u32 = (0..channels)
                        .map(|c| u32::from(color[c].abs_diff(colors[[p, s, c]])))
                        .sum();
                    let descriptor_distance: u32 = (0..channels)
                        .map(|c| (texture[c] ^ descriptors[[p, s, c]]).count_ones())
                        .sum();

                    let normalized = (color_distance as f32 / (255.0 * channels as f32)
                        + descriptor_distance as f32 / (16.0 * channels as f32))
                        / 2.0;
                    min_distance = min_distance.min(normalized);

                    if color_distance as f32 <= color_limit
                        && descriptor_distance as f32 <= descriptor_limit
                    {
                        matches += 1;
                        if matches >= profile.required_matches {
                            break;
                        }
                    }
                }

                let foreground = matches < profile.required_matches;
                if profile.adaptive {
                    self.feedback[p].adapt(foreground, min_distance);
                }

                if foreground {
                    out[p] = 255;
                    continue;
                }

                let rate = self.feedback[p].update_rate;
                if self.rng.random_range(0.0..rate) < 1.0 {
                    let s = self.rng.random_range(0..profile.samples);
                    for c in 0..channels {
                        colors[[p, s, c]] = color[c];
                        descriptors[[p, s, c]] = texture[c];
                    }
                }
                if self.rng.random_range(0.0..rate) < 1.0 {
                    let q = self.random_neighbor(x, y);
                    let s = self.rng.random_range(0..profile.samples);
                    for c in 0..channels {
                        colors[[q, s, c]] = color[c];
                        descriptors[[q, s, c]] = texture[c];
                    }
                }
            }
        }

        self.colors = Some(colors);
        self.descriptors = Some(descriptors);

        ForegroundMask::from_raw(self.width, self.height, out)
            .ok_or_else(|| Error::Engine(format!("{} mask size mismatch", profile.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn scene(patch: Option<[u8; 3]>) -> Frame {
        // Blocky checkerboard background
        let mut image = RgbImage::from_fn(24, 24, |x, y| {
            let v = 90 + ((x / 4 + y / 4) % 2) as u8 * 10;
            Rgb([v, v, v])
        });
        if let Some(color) = patch {
            for y in 8..16 {
                for x in 8..16 {
                    image.put_pixel(x, y, Rgb(color));
                }
            }
        }
        Frame::Color(image)
    }

    #[test]
    fn apply_requires_initialize() {
        let mut model = LbspClassifier::lobster();
        assert!(matches!(model.apply(&scene(None)), Err(Error::Engine(_))));
    }

    #[test]
    fn both_profiles_learn_and_detect() {
        for mut model in [LbspClassifier::subsense(), LbspClassifier::lobster()] {
            model.initialize(&scene(None), None).unwrap();

            let mask = model.apply(&scene(None)).unwrap();
            assert_eq!(mask.dimensions(), (24, 24));
            assert!(mask.pixels().all(|p| p[0] == 0), "{}", model.profile.name);

            let mask = model.apply(&scene(Some([250, 20, 20]))).unwrap();
            assert_eq!(mask.get_pixel(12, 12)[0], 255, "{}", model.profile.name);
            assert_eq!(mask.get_pixel(1, 1)[0], 0, "{}", model.profile.name);
        }
    }

    #[test]
    fn region_of_interest_masks_out_pixels() {
        let mut roi = GrayImage::from_pixel(24, 24, Luma([255]));
        for y in 0..24 {
            for x in 0..12 {
                roi.put_pixel(x, y, Luma([0]));
            }
        }

        let mut model = LbspClassifier::lobster();
        model.initialize(&scene(None), Some(&roi)).unwrap();
        let mask = model.apply(&scene(Some([250, 20, 20]))).unwrap();

        assert_eq!(mask.get_pixel(10, 12)[0], 0);
        assert_eq!(mask.get_pixel(14, 12)[0], 255);
    }

    #[test]
    fn size_change_is_reported() {
        let mut model = LbspClassifier::subsense();
        model.initialize(&scene(None), None).unwrap();
        let small = Frame::Gray(GrayImage::new(8, 8));
        assert!(model.apply(&small).is_err());
    }
}
