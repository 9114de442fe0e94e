use crate::error::Result;
use crate::frame::{ForegroundMask, Frame};
use image::GrayImage;

/// Models that advance their state and expose the latest mask separately
///
/// Used by the sample-based variant.
pub trait UpdateMaskModel {
    /// Feed the next frame of the sequence
    fn update(&mut self, frame: &Frame) -> Result<()>;

    /// Mask computed by the most recent `update`
    fn mask(&self) -> &ForegroundMask;
}

/// Models that classify and learn from a frame in one step
///
/// Used by the mixture and statistical variants.
pub trait ApplyModel {
    /// Process a frame and return its raw foreground mask
    ///
    /// Values other than 0 and 255 (e.g. shadow markers) are allowed; the
    /// caller decides how to binarize them.
    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask>;
}

/// Models that must be seeded with a frame before they can segment
///
/// Used by the LBSP classifier variants.
pub trait LazyModel {
    /// Build the background model from `frame`
    ///
    /// # Arguments
    /// * `frame` - First frame of the sequence
    /// * `roi` - Optional region of interest; zero pixels are never foreground
    fn initialize(&mut self, frame: &Frame, roi: Option<&GrayImage>) -> Result<()>;

    /// Classify `frame` against the model and update it
    fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask>;
}
