use image::{imageops, DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use std::borrow::Cow;

/// Single-channel binary image: 255 = foreground, 0 = background.
/// Dimensions match the frame that produced it.
pub type ForegroundMask = GrayImage;

/// Color depth a model works in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channels {
    Gray,
    Color,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::Gray => 1,
            Channels::Color => 3,
        }
    }

    pub fn from_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Channels::Gray),
            3 => Some(Channels::Color),
            _ => None,
        }
    }
}

/// Input frame, either 8-bit grayscale or 8-bit RGB
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Gray(GrayImage),
    Color(RgbImage),
}

impl Frame {
    pub fn channels(&self) -> Channels {
        match self {
            Frame::Gray(_) => Channels::Gray,
            Frame::Color(_) => Channels::Color,
        }
    }

    /// Returns (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Gray(image) => image.dimensions(),
            Frame::Color(image) => image.dimensions(),
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    /// Interleaved pixel data in row-major order
    pub fn as_raw(&self) -> &[u8] {
        match self {
            Frame::Gray(image) => image.as_raw(),
            Frame::Color(image) => image.as_raw(),
        }
    }

    /// Luminance view of the frame; borrowed when already grayscale
    pub fn luma(&self) -> Cow<'_, GrayImage> {
        match self {
            Frame::Gray(image) => Cow::Borrowed(image),
            Frame::Color(image) => Cow::Owned(imageops::grayscale(image)),
        }
    }
}

impl From<GrayImage> for Frame {
    fn from(image: GrayImage) -> Self {
        Frame::Gray(image)
    }
}

impl From<RgbImage> for Frame {
    fn from(image: RgbImage) -> Self {
        Frame::Color(image)
    }
}

impl From<DynamicImage> for Frame {
    fn from(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Frame::Gray(gray),
            other => Frame::Color(other.to_rgb8()),
        }
    }
}

/// Convert `frame` to the channel count a model expects
///
/// Frames that already match are borrowed without copying.
pub fn adapt(frame: &Frame, required: Channels) -> Cow<'_, Frame> {
    match (frame, required) {
        (Frame::Gray(_), Channels::Gray) | (Frame::Color(_), Channels::Color) => {
            Cow::Borrowed(frame)
        }
        (Frame::Gray(gray), Channels::Color) => {
            let (width, height) = gray.dimensions();
            let expanded = RgbImage::from_fn(width, height, |x, y| {
                let Luma([v]) = *gray.get_pixel(x, y);
                Rgb([v, v, v])
            });
            Cow::Owned(Frame::Color(expanded))
        }
        (Frame::Color(color), Channels::Gray) => {
            tracing::trace!("Reducing color frame to grayscale");
            Cow::Owned(Frame::Gray(imageops::grayscale(color)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_channels_are_borrowed() {
        let gray = Frame::Gray(GrayImage::from_pixel(4, 3, Luma([9])));
        let color = Frame::Color(RgbImage::from_pixel(4, 3, Rgb([1, 2, 3])));

        let adapted = adapt(&gray, Channels::Gray);
        assert!(matches!(adapted, Cow::Borrowed(_)));
        assert_eq!(*adapted, gray);

        let adapted = adapt(&color, Channels::Color);
        assert!(matches!(adapted, Cow::Borrowed(_)));
        assert_eq!(*adapted, color);
    }

    #[test]
    fn gray_expands_to_color() {
        let gray = Frame::Gray(GrayImage::from_fn(5, 2, |x, _| Luma([x as u8 * 40])));
        let adapted = adapt(&gray, Channels::Color);

        let Frame::Color(color) = adapted.as_ref() else {
            panic!("expected a color frame");
        };
        assert_eq!(color.dimensions(), (5, 2));
        assert_eq!(*color.get_pixel(3, 1), Rgb([120, 120, 120]));
    }

    #[test]
    fn color_reduces_to_gray() {
        let color = Frame::Color(RgbImage::from_pixel(6, 4, Rgb([200, 200, 200])));
        let adapted = adapt(&color, Channels::Gray);

        assert_eq!(adapted.channels(), Channels::Gray);
        assert_eq!(adapted.dimensions(), (6, 4));
        // Equal channels keep their level through the luma weights
        let value = adapted.as_raw()[0];
        assert!((199..=201).contains(&value));
    }

    #[test]
    fn channel_counts() {
        assert_eq!(Channels::from_count(1), Some(Channels::Gray));
        assert_eq!(Channels::from_count(3), Some(Channels::Color));
        assert_eq!(Channels::from_count(4), None);
        assert_eq!(Channels::Color.count(), 3);
    }
}
