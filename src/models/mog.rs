use super::types::ApplyModel;
use super::{pixel_value, squared_distance};
use crate::config::{AlgorithmVariant, MogParams};
use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};
use ndarray::Array2;

/// Noise level assumed when the configuration leaves it at zero
const DEFAULT_NOISE_SIGMA: f32 = 15.0;

/// Weight given to a freshly created component
const INITIAL_WEIGHT: f32 = 0.05;

/// Squared Mahalanobis distance (2.5 sigma) for a value to match a component
const MATCH_THRESHOLD: f32 = 2.5 * 2.5;

#[derive(Debug, Clone, Copy, Default)]
struct Gaussian {
    weight: f32,
    variance: f32,
    mean: [f32; 3],
}

impl Gaussian {
    /// Components are kept sorted by weight / sigma, most reliable first
    fn fitness(&self) -> f32 {
        if self.weight <= 0.0 {
            0.0
        } else {
            self.weight / self.variance.sqrt()
        }
    }
}

/// Mixture-of-Gaussians background model (KaewTraKulPong and Bowden)
///
/// Each pixel is described by up to `nmixtures` isotropic Gaussians. The
/// most reliable components whose weights add up to `background_ratio`
/// form the background; a pixel matching none of them is foreground.
pub struct Mog {
    history: u32,
    nmixtures: usize,
    background_ratio: f32,
    min_variance: f32,
    initial_variance: f32,

    // Shape: [pixel, mixture], unused slots carry zero weight
    model: Option<Array2<Gaussian>>,
    width: u32,
    height: u32,
    channels: usize,
    frames: u32,
}

impl Mog {
    pub fn new(params: &MogParams) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameters {
            variant: AlgorithmVariant::Mog,
            reason: reason.to_string(),
        };

        if params.history < 1 {
            return Err(invalid("history must be at least 1"));
        }
        if params.nmixtures < 1 {
            return Err(invalid("nmixtures must be at least 1"));
        }
        if !(params.background_ratio > 0.0 && params.background_ratio <= 1.0) {
            return Err(invalid("backgroundRatio must be in (0, 1]"));
        }
        if !params.noise_sigma.is_finite() {
            return Err(invalid("noiseSigma must be finite"));
        }

        let noise_sigma = if params.noise_sigma <= 0.0 {
            DEFAULT_NOISE_SIGMA
        } else {
            params.noise_sigma as f32
        };
        let min_variance = noise_sigma * noise_sigma;
        let initial_variance = (4.0 * DEFAULT_NOISE_SIGMA * DEFAULT_NOISE_SIGMA).max(min_variance);

        Ok(Self {
            history: params.history as u32,
            nmixtures: params.nmixtures as usize,
            background_ratio: params.background_ratio as f32,
            min_variance,
            initial_variance,
            model: None,
            width: 0,
            height: 0,
            channels: 0,
            frames: 0,
        })
    }

    fn reset_model(&mut self, frame: &Frame) {
        let (width, height) = frame.dimensions();
        tracing::debug!("Initializing MOG model at {}x{}", width, height);

        self.width = width;
        self.height = height;
        self.channels = frame.channels().count();
        self.frames = 0;
        self.model = Some(Array2::from_elem(
            (width as usize * height as usize, self.nmixtures),
            Gaussian::default(),
        ));
    }

    /// Update one pixel's mixture with `value`; returns true for foreground
    fn update_pixel(&self, slots: &mut [Gaussian], value: &[f32; 3], alpha: f32) -> bool {
        let channels = self.channels;

        if slots[0].weight <= 0.0 {
            // First sighting of this pixel: it defines the background
            slots[0] = Gaussian {
                weight: 1.0,
                variance: self.initial_variance,
                mean: *value,
            };
            return false;
        }

        let hit = slots.iter().take_while(|g| g.weight > 0.0).position(|g| {
            squared_distance(&g.mean, value, channels) < MATCH_THRESHOLD * g.variance * channels as f32
        });

        for g in slots.iter_mut() {
            g.weight *= 1.0 - alpha;
        }

        let mut k = match hit {
            Some(k) => {
                let g = &mut slots[k];
                let d2 = squared_distance(&g.mean, value, channels);
                g.weight += alpha;
                let rho = alpha / g.weight;
                for c in 0..channels {
                    g.mean[c] += rho * (value[c] - g.mean[c]);
                }
                g.variance = (g.variance + rho * (d2 / channels as f32 - g.variance))
                    .max(self.min_variance);
                k
            }
            None => {
                let k = slots
                    .iter()
                    .position(|g| g.weight <= 0.0)
                    .unwrap_or(slots.len() - 1);
                slots[k] = Gaussian {
                    weight: INITIAL_WEIGHT,
                    variance: self.initial_variance,
                    mean: *value,
                };
                k
            }
        };

        let total: f32 = slots.iter().map(|g| g.weight).sum();
        if total > 0.0 {
            for g in slots.iter_mut() {
                g.weight /= total;
            }
        }

        while k > 0 && slots[k].fitness() > slots[k - 1].fitness() {
            slots.swap(k, k - 1);
            k -= 1;
        }

        if hit.is_none() {
            return true;
        }

        let mut cumulative = 0.0;
        for (i, g) in slots.iter().enumerate() {
            if i == k {
                return false;
            }
            cumulative += g.weight;
            if cumulative > self.background_ratio {
                break;
            }
        }
        true
    }
}

impl ApplyModel for Mog {
    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("mog_apply").entered();

        if self.model.is_none()
            || frame.dimensions() != (self.width, self.height)
            || frame.channels().count() != self.channels
        {
            self.reset_model(frame);
        }

        self.frames = self.frames.saturating_add(1);
        let alpha = 1.0 / self.frames.min(self.history) as f32;

        let mut model = self
            .model
            .take()
            .ok_or_else(|| Error::Engine("MOG model is missing".to_string()))?;

        let raw = frame.as_raw();
        let channels = self.channels;
        let mut out = vec![0u8; model.nrows()];

        for (p, mut mixture) in model.rows_mut().into_iter().enumerate() {
            let slots = mixture
                .as_slice_mut()
                .ok_or_else(|| Error::Engine("MOG model is not contiguous".to_string()))?;
            let value = pixel_value(raw, p, channels);
            if self.update_pixel(slots, &value, alpha) {
                out[p] = 255;
            }
        }

        self.model = Some(model);

        ForegroundMask::from_raw(self.width, self.height, out)
            .ok_or_else(|| Error::Engine("MOG mask size mismatch".to_string()))
    }
}
