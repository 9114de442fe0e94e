use super::types::ApplyModel;
use crate::config::{AlgorithmVariant, CntParams};
use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};
use rayon::prelude::*;

/// Maximum gray-level difference still considered "the same value"
const STABILITY_THRESHOLD: u8 = 30;

#[derive(Debug, Clone, Copy, Default)]
struct PixelState {
    previous: u8,
    stability: u32,
    background: u8,
    background_stability: u32,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    min_stability: u32,
    max_stability: u32,
    use_history: bool,
}

impl PixelState {
    fn seeded(value: u8) -> Self {
        Self {
            previous: value,
            stability: 0,
            background: value,
            background_stability: 0,
        }
    }

    /// Advance with the next value; returns true for foreground
    fn update(&mut self, value: u8, limits: Limits) -> bool {
        if value.abs_diff(self.previous) <= STABILITY_THRESHOLD {
            self.stability = (self.stability + 1).min(limits.max_stability);
        } else {
            self.stability = 0;
        }

        if limits.use_history {
            // A background candidate must have been stable at least as long as the current one
            if self.stability > limits.min_stability
                && self.stability >= self.background_stability
            {
                self.background = value;
                self.background_stability = self.stability;
            } else if self.stability == 0 {
                self.background_stability = self.background_stability.saturating_sub(1);
            }
        } else if self.stability > limits.min_stability {
            self.background = value;
        }

        self.previous = value;
        value.abs_diff(self.background) > STABILITY_THRESHOLD
    }
}

/// Pixel-count stability background model (CNT)
///
/// Works on luminance. A value that stays within a small band for more than
/// `min_pixel_stability` frames becomes the background; with history enabled
/// a new candidate must also have been stable at least as long as the
/// current background. Rows are processed on the rayon pool when
/// `is_parallel` is set.
pub struct Cnt {
    limits: Limits,
    is_parallel: bool,
    state: Vec<PixelState>,
    width: u32,
    height: u32,
}

impl Cnt {
    pub fn new(params: &CntParams) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameters {
            variant: AlgorithmVariant::Cnt,
            reason: reason.to_string(),
        };

        if params.min_pixel_stability < 0 {
            return Err(invalid("minPixelStability must not be negative"));
        }
        if params.max_pixel_stability < params.min_pixel_stability {
            return Err(invalid("maxPixelStability must not be below minPixelStability"));
        }

        Ok(Self {
            limits: Limits {
                min_stability: params.min_pixel_stability as u32,
                max_stability: params.max_pixel_stability as u32,
                use_history: params.use_history,
            },
            is_parallel: params.is_parallel,
            state: Vec::new(),
            width: 0,
            height: 0,
        })
    }
}

impl ApplyModel for Cnt {
    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("cnt_apply").entered();

        let luma = frame.luma();
        let (width, height) = luma.dimensions();

        if self.state.is_empty() || (width, height) != (self.width, self.height) {
            tracing::debug!("Initializing CNT model at {}x{}", width, height);
            self.width = width;
            self.height = height;
            self.state = luma.pixels().map(|p| PixelState::seeded(p[0])).collect();
            return Ok(ForegroundMask::new(width, height));
        }

        let limits = self.limits;
        let mut out = vec![0u8; self.state.len()];
        let row = width as usize;

        let process_row = |((states, values), mask): ((&mut [PixelState], &[u8]), &mut [u8])| {
            for ((state, &value), m) in states.iter_mut().zip(values).zip(mask.iter_mut()) {
                if state.update(value, limits) {
                    *m = 255;
                }
            }
        };

        if row > 0 {
            let values: &[u8] = luma.as_raw();
            if self.is_parallel {
                self.state
                    .par_chunks_mut(row)
                    .zip(values.par_chunks(row))
                    .zip(out.par_chunks_mut(row))
                    .for_each(process_row);
            } else {
                self.state
                    .chunks_mut(row)
                    .zip(values.chunks(row))
                    .zip(out.chunks_mut(row))
                    .for_each(process_row);
            }
        }

        ForegroundMask::from_raw(width, height, out)
            .ok_or_else(|| Error::Engine("CNT mask size mismatch".to_string()))
    }
}
