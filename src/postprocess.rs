use crate::frame::ForegroundMask;
use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::filter::median_filter;
use imageproc::morphology::dilate;

/// Fixed cleanup applied to every raw foreground mask
///
/// Steps:
/// 1. 3x3 median filter to remove isolated speckles
/// 2. Dilation with a 3x3 rectangular element, centered anchor, applied twice
pub struct PostProcessor;

impl PostProcessor {
    /// Median filter radius (3x3 neighbourhood)
    pub const MEDIAN_RADIUS: u32 = 1;

    /// Chebyshev radius of the square structuring element (3x3)
    pub const DILATION_RADIUS: u8 = 1;

    pub const DILATION_ITERATIONS: usize = 2;

    pub fn process(mask: &GrayImage) -> ForegroundMask {
        let _span = tracing::debug_span!("postprocess").entered();

        let despeckled = median_filter(mask, Self::MEDIAN_RADIUS, Self::MEDIAN_RADIUS);

        (0..Self::DILATION_ITERATIONS).fold(despeckled, |current, _| {
            // LInf distance 1 covers exactly the 3x3 square around each pixel
            dilate(&current, Norm::LInf, Self::DILATION_RADIUS)
        })
    }
}
