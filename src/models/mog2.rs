use super::types::ApplyModel;
use super::{pixel_value, squared_distance};
use crate::config::{AlgorithmVariant, Mog2Params};
use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};
use ndarray::Array2;

const MAX_MODES: usize = 5;
const BACKGROUND_RATIO: f32 = 0.9;
/// Squared distance (in variances) under which a value updates an existing mode
const VAR_THRESHOLD_GEN: f32 = 9.0;
const VAR_INIT: f32 = 15.0;
const VAR_MIN: f32 = 4.0;
const VAR_MAX: f32 = 5.0 * VAR_INIT;
/// Complexity reduction prior, prunes modes with too little support
const COMPLEXITY_PRIOR: f32 = 0.05;
/// Lower brightness bound of a shadow relative to the background
const SHADOW_TAU: f32 = 0.5;

/// Mask value for pixels classified as shadow
pub const SHADOW_VALUE: u8 = 127;

#[derive(Debug, Clone, Copy, Default)]
struct Mode {
    weight: f32,
    variance: f32,
    mean: [f32; 3],
}

/// Adaptive mixture-of-Gaussians model with shadow detection (Zivkovic)
///
/// The number of modes per pixel adapts to the scene. With shadow detection
/// enabled, darker versions of a background color are reported as
/// [`SHADOW_VALUE`] instead of 255.
pub struct Mog2 {
    history: u32,
    var_threshold: f32,
    detect_shadows: bool,

    // Shape: [pixel, mode]; only the first `modes_used[p]` entries are live
    model: Option<Array2<Mode>>,
    modes_used: Vec<u8>,
    width: u32,
    height: u32,
    channels: usize,
    frames: u32,
}

impl Mog2 {
    pub fn new(params: &Mog2Params) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameters {
            variant: AlgorithmVariant::Mog2,
            reason: reason.to_string(),
        };

        if params.history < 1 {
            return Err(invalid("history must be at least 1"));
        }
        if !(params.var_threshold.is_finite() && params.var_threshold > 0.0) {
            return Err(invalid("varThreshold must be a positive number"));
        }

        Ok(Self {
            history: params.history as u32,
            var_threshold: params.var_threshold as f32,
            detect_shadows: params.detect_shadows,
            model: None,
            modes_used: Vec::new(),
            width: 0,
            height: 0,
            channels: 0,
            frames: 0,
        })
    }

    fn reset_model(&mut self, frame: &Frame) {
        let (width, height) = frame.dimensions();
        tracing::debug!("Initializing MOG2 model at {}x{}", width, height);

        let pixels = width as usize * height as usize;
        self.width = width;
        self.height = height;
        self.channels = frame.channels().count();
        self.frames = 0;
        self.model = Some(Array2::from_elem((pixels, MAX_MODES), Mode::default()));
        self.modes_used = vec![0; pixels];
    }

    /// Update one pixel's modes and classify it as 0, 255 or [`SHADOW_VALUE`]
    fn update_pixel(&self, modes: &mut [Mode], used: &mut u8, value: &[f32; 3], alpha: f32) -> u8 {
        let channels = self.channels;

        if *used == 0 {
            // First sighting of this pixel: it defines the background
            modes[0] = Mode {
                weight: 1.0,
                variance: VAR_INIT,
                mean: *value,
            };
            *used = 1;
            return 0;
        }

        let prune = -alpha * COMPLEXITY_PRIOR;
        let mut n = *used as usize;
        let mut fits = false;
        let mut background = false;
        let mut total_weight = 0.0;

        let mut mode = 0;
        while mode < n {
            let mut weight = (1.0 - alpha) * modes[mode].weight + prune;

            if !fits {
                let variance = modes[mode].variance;
                let d2 = squared_distance(&modes[mode].mean, value, channels);

                if total_weight < BACKGROUND_RATIO && d2 < self.var_threshold * variance {
                    background = true;
                }

                if d2 < VAR_THRESHOLD_GEN * variance {
                    fits = true;
                    weight += alpha;
                    let k = alpha / weight;
                    let m = &mut modes[mode];
                    for c in 0..channels {
                        m.mean[c] -= k * (m.mean[c] - value[c]);
                    }
                    m.variance = (variance + k * (d2 - variance)).clamp(VAR_MIN, VAR_MAX);
                    m.weight = weight;

                    // Keep modes ordered by weight
                    let mut i = mode;
                    while i > 0 && modes[i].weight > modes[i - 1].weight {
                        modes.swap(i, i - 1);
                        i -= 1;
                    }
                    total_weight += weight;
                    mode += 1;
                    continue;
                }
            }

            if weight < -prune {
                // Drop the mode by moving the tail up
                modes.copy_within(mode + 1..n, mode);
                n -= 1;
                continue;
            }

            modes[mode].weight = weight;
            total_weight += weight;
            mode += 1;
        }

        if total_weight > 0.0 {
            for m in modes[..n].iter_mut() {
                m.weight /= total_weight;
            }
        }

        if !fits {
            let slot = if n == MAX_MODES { MAX_MODES - 1 } else { n };
            if n < MAX_MODES {
                n += 1;
            }
            let weight = if n == 1 { 1.0 } else { alpha };
            if n > 1 {
                let keep = 1.0 - alpha;
                for m in modes[..n].iter_mut() {
                    m.weight *= keep;
                }
            }
            modes[slot] = Mode {
                weight,
                variance: VAR_INIT,
                mean: *value,
            };

            let mut i = slot;
            while i > 0 && modes[i].weight > modes[i - 1].weight {
                modes.swap(i, i - 1);
                i -= 1;
            }
        }

        *used = n as u8;

        if background {
            0
        } else if self.detect_shadows && self.is_shadow(&modes[..n], value) {
            SHADOW_VALUE
        } else {
            255
        }
    }

    /// A shadow is a scaled-down background color within the variance bounds
    fn is_shadow(&self, modes: &[Mode], value: &[f32; 3]) -> bool {
        let channels = self.channels;
        let mut total_weight = 0.0;

        for m in modes {
            let numerator: f32 = (0..channels).map(|c| m.mean[c] * value[c]).sum();
            let denominator: f32 = (0..channels).map(|c| m.mean[c] * m.mean[c]).sum();

            if denominator == 0.0 {
                return false;
            }

            if numerator <= denominator && numerator >= SHADOW_TAU * denominator {
                let a = numerator / denominator;
                let d2: f32 = (0..channels)
                    .map(|c| {
                        let diff = a * m.mean[c] - value[c];
                        diff * diff
                    })
                    .sum();
                if d2 < self.var_threshold * m.variance * a * a {
                    return true;
                }
            }

            total_weight += m.weight;
            if total_weight > BACKGROUND_RATIO {
                return false;
            }
        }

        false
    }
}

impl ApplyModel for Mog2 {
    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("mog2_apply").entered();

        if self.model.is_none()
            || frame.dimensions() != (self.width, self.height)
            || frame.channels().count() != self.channels
        {
            self.reset_model(frame);
        }

        self.frames = self.frames.saturating_add(1);
        let alpha = 1.0 / self.frames.saturating_mul(2).min(self.history) as f32;

        let mut model = self
            .model
            .take()
            .ok_or_else(|| Error::Engine("MOG2 model is missing".to_string()))?;
        let mut modes_used = std::mem::take(&mut self.modes_used);

        let raw = frame.as_raw();
        let channels = self.channels;
        let mut out = vec![0u8; model.nrows()];

        for ((p, mut modes), used) in model
            .rows_mut()
            .into_iter()
            .enumerate()
            .zip(modes_used.iter_mut())
        {
            let modes = modes
                .as_slice_mut()
                .ok_or_else(|| Error::Engine("MOG2 model is not contiguous".to_string()))?;
            let value = pixel_value(raw, p, channels);
            out[p] = self.update_pixel(modes, used, &value, alpha);
        }

        self.model = Some(model);
        self.modes_used = modes_used;

        ForegroundMask::from_raw(self.width, self.height, out)
            .ok_or_else(|| Error::Engine("MOG2 mask size mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn color_frame(background: [u8; 3], patch: Option<[u8; 3]>) -> Frame {
        let mut image = RgbImage::from_pixel(20, 20, Rgb(background));
        if let Some(color) = patch {
            for y in 5..12 {
                for x in 5..12 {
                    image.put_pixel(x, y, Rgb(color));
                }
            }
        }
        Frame::Color(image)
    }

    fn trained() -> Mog2 {
        let mut mog2 = Mog2::new(&Mog2Params::default()).unwrap();
        for _ in 0..30 {
            mog2.apply(&color_frame([160, 140, 120], None)).unwrap();
        }
        mog2
    }

    #[test]
    fn learned_background_is_zero() {
        let mut mog2 = trained();
        let mask = mog2.apply(&color_frame([160, 140, 120], None)).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn distinct_object_is_foreground() {
        let mut mog2 = trained();
        let mask = mog2.apply(&color_frame([160, 140, 120], Some([10, 200, 250]))).unwrap();
        assert_eq!(mask.get_pixel(8, 8)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn darker_background_is_shadow() {
        let mut mog2 = trained();
        let mask = mog2.apply(&color_frame([160, 140, 120], Some([112, 98, 84]))).unwrap();
        assert_eq!(mask.get_pixel(8, 8)[0], SHADOW_VALUE);

        let mut no_shadows = Mog2::new(&Mog2Params {
            detect_shadows: false,
            ..Mog2Params::default()
        })
        .unwrap();
        for _ in 0..30 {
            no_shadows.apply(&color_frame([160, 140, 120], None)).unwrap();
        }
        let mask = no_shadows
            .apply(&color_frame([160, 140, 120], Some([112, 98, 84])))
            .unwrap();
        assert_eq!(mask.get_pixel(8, 8)[0], 255);
    }

    #[test]
    fn rejects_invalid_parameters() {
        let params = Mog2Params {
            history: 0,
            ..Mog2Params::default()
        };
        assert!(matches!(Mog2::new(&params), Err(Error::InvalidParameters { .. })));
    }
}
