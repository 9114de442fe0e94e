use crate::config::{AlgorithmVariant, Configuration, ParameterSet};
use crate::engine::ModelHandle;
use crate::error::Result;
use crate::frame::{adapt, Channels, ForegroundMask, Frame};
use crate::models::{self, ReadyModel};
use crate::postprocess::PostProcessor;

/// Foreground/background segmentation for one frame sequence
///
/// Owns exactly one background model, chosen when the subtractor is built.
/// Frames must be fed in order; use one instance per video stream.
///
/// # Example
///
/// ```
/// use bgfg::{AlgorithmVariant, BackgroundSubtractor, Channels, Frame};
/// use image::{GrayImage, Luma};
///
/// let mut subtractor = BackgroundSubtractor::new(AlgorithmVariant::Vibe, Channels::Gray)?;
/// let frame = Frame::Gray(GrayImage::from_pixel(64, 48, Luma([30])));
/// let mask = subtractor.subtract(&frame)?;
/// assert_eq!(mask.dimensions(), (64, 48));
/// # Ok::<(), bgfg::Error>(())
/// ```
pub struct BackgroundSubtractor {
    channels: Channels,
    requested: AlgorithmVariant,
    variant: AlgorithmVariant,
    parameters: ParameterSet,
    model: ModelHandle,
    fell_back: bool,
}

impl BackgroundSubtractor {
    /// Build a subtractor with default parameters
    pub fn new(variant: AlgorithmVariant, channels: Channels) -> Result<Self> {
        Self::with_config(variant, channels, &Configuration::new())
    }

    /// Build a subtractor whose parameters are resolved from `config`
    pub fn with_config(
        variant: AlgorithmVariant,
        channels: Channels,
        config: &Configuration,
    ) -> Result<Self> {
        tracing::info!(
            "Creating {} background subtractor on {}-channel frames",
            variant,
            channels.count()
        );

        let ready = models::initialize(config, variant)?;
        Ok(Self::from_ready(variant, channels, ready))
    }

    fn from_ready(requested: AlgorithmVariant, channels: Channels, ready: ReadyModel) -> Self {
        Self {
            channels,
            requested,
            variant: ready.variant,
            parameters: ready.parameters,
            model: ready.handle,
            fell_back: ready.fell_back,
        }
    }

    /// Rebuild the model from `config`
    ///
    /// Resolution starts again from the variant requested at construction.
    /// On success the previous model is dropped and replaced; on failure the
    /// subtractor keeps the model it had.
    pub fn init(&mut self, config: &Configuration) -> Result<()> {
        let ready = models::initialize(config, self.requested)?;
        *self = Self::from_ready(self.requested, self.channels, ready);
        Ok(())
    }

    /// Discard everything learned so far and start a fresh model with the same parameters
    ///
    /// Call this when switching cameras or after a scene cut.
    pub fn reset(&mut self) -> Result<()> {
        tracing::info!("Resetting {} background model", self.variant);
        self.model = models::create_model(&self.parameters)?;
        Ok(())
    }

    /// Segment the next frame of the sequence
    ///
    /// The returned mask has the frame's dimensions and contains only 0 and 255.
    pub fn subtract(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let _span = tracing::debug_span!("subtract", variant = %self.variant).entered();

        let input = adapt(frame, self.channels);
        let raw = self.model.segment(&input)?;

        Ok(PostProcessor::process(&raw))
    }

    /// Variant currently in use, after any fallback
    pub fn variant(&self) -> AlgorithmVariant {
        self.variant
    }

    /// Variant the subtractor was constructed with
    pub fn requested_variant(&self) -> AlgorithmVariant {
        self.requested
    }

    /// True when the requested variant could not be built and the default is used instead
    pub fn is_fallback(&self) -> bool {
        self.fell_back
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn config(pairs: &[(&str, &str)]) -> Configuration {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn init_replaces_model_and_keeps_channels() {
        let mut subtractor = BackgroundSubtractor::new(AlgorithmVariant::Mog2, Channels::Color).unwrap();
        subtractor.init(&config(&[("history", "42")])).unwrap();

        assert_eq!(subtractor.channels(), Channels::Color);
        assert_eq!(subtractor.variant(), AlgorithmVariant::Mog2);
        match subtractor.parameters() {
            ParameterSet::Mog2(params) => assert_eq!(params.history, 42),
            other => panic!("unexpected parameters {other:?}"),
        }
    }

    #[test]
    fn failed_init_keeps_previous_model() {
        let mut subtractor = BackgroundSubtractor::new(AlgorithmVariant::Vibe, Channels::Gray).unwrap();
        let err = subtractor.init(&config(&[("samples", "x")])).err().unwrap();

        assert!(matches!(err, Error::ConfigParse { .. }));
        assert_eq!(subtractor.parameters(), &ParameterSet::defaults(AlgorithmVariant::Vibe));
    }

    #[test]
    fn fallback_is_observable() {
        let subtractor = BackgroundSubtractor::with_config(
            AlgorithmVariant::Mog2,
            Channels::Gray,
            &config(&[("varThreshold", "0")]),
        )
        .unwrap();

        assert!(subtractor.is_fallback());
        assert_eq!(subtractor.requested_variant(), AlgorithmVariant::Mog2);
        assert_eq!(subtractor.variant(), AlgorithmVariant::Vibe);
    }

    #[test]
    fn adapts_frames_to_model_channels() {
        let mut gray_model = BackgroundSubtractor::new(AlgorithmVariant::Vibe, Channels::Gray).unwrap();
        let color = Frame::Color(RgbImage::from_pixel(10, 8, Rgb([20, 40, 60])));
        assert_eq!(gray_model.subtract(&color).unwrap().dimensions(), (10, 8));

        let mut color_model = BackgroundSubtractor::new(AlgorithmVariant::Vibe, Channels::Color).unwrap();
        let gray = Frame::Gray(GrayImage::from_pixel(10, 8, Luma([20])));
        assert_eq!(color_model.subtract(&gray).unwrap().dimensions(), (10, 8));
    }

    #[test]
    fn reset_restarts_lazy_initialization() {
        let mut subtractor = BackgroundSubtractor::new(AlgorithmVariant::Lobster, Channels::Gray).unwrap();
        let frame = Frame::Gray(GrayImage::from_pixel(12, 12, Luma([70])));
        subtractor.subtract(&frame).unwrap();
        assert!(!subtractor.model.awaiting_initialization());

        subtractor.reset().unwrap();
        assert!(subtractor.model.awaiting_initialization());
        assert_eq!(subtractor.variant(), AlgorithmVariant::Lobster);
    }
}
