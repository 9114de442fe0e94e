use super::types::ApplyModel;
use crate::config::{AlgorithmVariant, GmgParams};
use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};

/// Histogram bins kept per pixel
const MAX_FEATURES: usize = 64;
const LEARNING_RATE: f32 = 0.025;
/// Levels per channel after quantization (bits dropped: 4)
const QUANTIZATION_SHIFT: u32 = 4;
const QUANTIZATION_LEVELS: u16 = 16;
const BACKGROUND_PRIOR: f32 = 0.8;

/// Sparse per-pixel histogram of quantized colors
#[derive(Debug, Clone, Default)]
struct Histogram {
    bins: Vec<(u16, f32)>,
}

impl Histogram {
    fn insert(&mut self, feature: u16, weight: f32) {
        if let Some(bin) = self.bins.iter_mut().find(|(f, _)| *f == feature) {
            bin.1 += weight;
        } else if self.bins.len() < MAX_FEATURES {
            self.bins.push((feature, weight));
        } else if let Some(weakest) = self
            .bins
            .iter_mut()
            .min_by(|a, b| a.1.total_cmp(&b.1))
        {
            *weakest = (feature, weight);
        }
    }

    fn likelihood(&self, feature: u16) -> f32 {
        self.bins
            .iter()
            .find(|(f, _)| *f == feature)
            .map_or(0.0, |(_, w)| *w)
    }

    fn normalize(&mut self) {
        let total: f32 = self.bins.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            for bin in &mut self.bins {
                bin.1 /= total;
            }
        }
    }

    fn decay(&mut self, factor: f32) {
        for bin in &mut self.bins {
            bin.1 *= factor;
        }
    }
}

/// Statistical background model after Godbehere, Matsukawa and Goldberg
///
/// Each pixel accumulates a histogram of quantized colors over the first
/// `initialization_frames` frames, during which nothing is reported as
/// foreground. Afterwards a pixel is foreground when the posterior
/// probability of background falls below `1 - decision_threshold`.
pub struct Gmg {
    initialization_frames: u32,
    decision_threshold: f32,
    histograms: Vec<Histogram>,
    width: u32,
    height: u32,
    channels: usize,
    frames: u32,
}

impl Gmg {
    pub fn new(params: &GmgParams) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidParameters {
            variant: AlgorithmVariant::Gmg,
            reason: reason.to_string(),
        };

        if params.initialization_frames < 1 {
            return Err(invalid("initializationFrames must be at least 1"));
        }
        if !(0.0..=1.0).contains(&params.decision_threshold) {
            return Err(invalid("decisionThreshold must be in [0, 1]"));
        }

        Ok(Self {
            initialization_frames: params.initialization_frames as u32,
            decision_threshold: params.decision_threshold as f32,
            histograms: Vec::new(),
            width: 0,
            height: 0,
            channels: 0,
            frames: 0,
        })
    }

    fn reset_model(&mut self, frame: &Frame) {
        let (width, height) = frame.dimensions();
        tracing::debug!(
            "Initializing GMG model at {}x{}, learning for {} frames",
            width,
            height,
            self.initialization_frames
        );

        self.width = width;
        self.height = height;
        self.channels = frame.channels().count();
        self.frames = 0;
        self.histograms = vec![Histogram::default(); width as usize * height as usize];
    }
}

fn quantize(pixel: &[u8]) -> u16 {
    pixel.iter().rev().fold(0u16, |feature, &v| {
        feature * QUANTIZATION_LEVELS + u16::from(v >> QUANTIZATION_SHIFT)
    })
}

impl ApplyModel for Gmg {
    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("gmg_apply").entered();

        if self.histograms.is_empty()
            || frame.dimensions() != (self.width, self.height)
            || frame.channels().count() != self.channels
        {
            self.reset_model(frame);
        }

        self.frames = self.frames.saturating_add(1);
        let learning = self.frames <= self.initialization_frames;
        if self.frames == self.initialization_frames + 1 {
            tracing::debug!("GMG initialization complete");
        }

        let raw = frame.as_raw();
        let channels = self.channels;
        let mut out = vec![0u8; self.histograms.len()];

        for (p, histogram) in self.histograms.iter_mut().enumerate() {
            let feature = quantize(&raw[p * channels..(p + 1) * channels]);

            if learning {
                histogram.insert(feature, 1.0);
                if self.frames == self.initialization_frames {
                    histogram.normalize();
                }
                continue;
            }

            let likelihood = histogram.likelihood(feature);
            let evidence = likelihood * BACKGROUND_PRIOR
                + (1.0 - likelihood) * (1.0 - BACKGROUND_PRIOR);
            let posterior = if evidence > 0.0 {
                likelihood * BACKGROUND_PRIOR / evidence
            } else {
                0.0
            };

            if 1.0 - posterior > self.decision_threshold {
                out[p] = 255;
            }

            histogram.decay(1.0 - LEARNING_RATE);
            histogram.insert(feature, LEARNING_RATE);
        }

        ForegroundMask::from_raw(self.width, self.height, out)
            .ok_or_else(|| Error::Engine("GMG mask size mismatch".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn params(frames: i32) -> GmgParams {
        GmgParams {
            initialization_frames: frames,
            ..GmgParams::default()
        }
    }

    fn frame(value: u8, patch: Option<u8>) -> Frame {
        let mut image = GrayImage::from_pixel(16, 16, Luma([value]));
        if let Some(v) = patch {
            for y in 4..10 {
                for x in 4..10 {
                    image.put_pixel(x, y, Luma([v]));
                }
            }
        }
        Frame::Gray(image)
    }

    #[test]
    fn silent_during_initialization() {
        let mut gmg = Gmg::new(&params(5)).unwrap();
        for i in 0..5 {
            // Alternate content so any premature decision would show up
            let mask = gmg.apply(&frame(50, (i % 2 == 1).then_some(200))).unwrap();
            assert!(mask.pixels().all(|p| p[0] == 0));
        }
    }

    #[test]
    fn classifies_after_initialization() {
        let mut gmg = Gmg::new(&params(5)).unwrap();
        for _ in 0..5 {
            gmg.apply(&frame(50, None)).unwrap();
        }

        let mask = gmg.apply(&frame(50, None)).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 0));

        let mask = gmg.apply(&frame(50, Some(200))).unwrap();
        assert_eq!(mask.get_pixel(6, 6)[0], 255);
        assert_eq!(mask.get_pixel(14, 14)[0], 0);
    }

    #[test]
    fn quantizes_each_channel() {
        assert_eq!(quantize(&[0x0f]), 0);
        assert_eq!(quantize(&[0xff]), 15);
        assert_eq!(quantize(&[0x10, 0x20, 0x30]), 1 + 2 * 16 + 3 * 256);
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(matches!(Gmg::new(&params(0)), Err(Error::InvalidParameters { .. })));
        let params = GmgParams {
            decision_threshold: 1.2,
            ..GmgParams::default()
        };
        assert!(Gmg::new(&params).is_err());
    }
}
