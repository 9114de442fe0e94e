use crate::error::{Error, Result};
use crate::frame::{ForegroundMask, Frame};
use crate::models::{ApplyModel, LazyModel, UpdateMaskModel};
use image::Luma;

/// Values at or above this level survive shadow binarization
pub const SHADOW_THRESHOLD: u8 = 200;

/// Initialization state of a two-phase model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyState {
    Uninitialized,
    /// Seeded with frames of this (width, height)
    Initialized(u32, u32),
}

/// The active model, tagged by the call protocol it needs
pub enum ModelHandle {
    /// `update` then `mask`
    UpdateMask(Box<dyn UpdateMaskModel>),
    /// Single `apply`
    Apply(Box<dyn ApplyModel>),
    /// `apply`, then shadow markers are folded into the background
    ApplyThreshold(Box<dyn ApplyModel>),
    /// `initialize` on the first frame or a size change, `apply` afterwards
    Lazy {
        model: Box<dyn LazyModel>,
        state: LazyState,
    },
}

impl ModelHandle {
    /// Produce the raw (not yet post-processed) mask for one frame
    pub fn segment(&mut self, frame: &Frame) -> Result<ForegroundMask> {
        let mask = match self {
            ModelHandle::UpdateMask(model) => {
                model.update(frame)?;
                model.mask().clone()
            }
            ModelHandle::Apply(model) => model.apply(frame)?,
            ModelHandle::ApplyThreshold(model) => {
                let mut mask = model.apply(frame)?;
                binarize(&mut mask, SHADOW_THRESHOLD);
                mask
            }
            ModelHandle::Lazy { model, state } => {
                let (width, height) = frame.dimensions();
                if *state == LazyState::Initialized(width, height) {
                    model.apply(frame)?
                } else {
                    if let LazyState::Initialized(w, h) = *state {
                        tracing::debug!(
                            "Frame size changed from {}x{} to {}x{}, reinitializing",
                            w,
                            h,
                            width,
                            height
                        );
                    }
                    model.initialize(frame, None)?;
                    *state = LazyState::Initialized(width, height);
                    ForegroundMask::new(width, height)
                }
            }
        };

        if mask.dimensions() != frame.dimensions() {
            return Err(Error::Engine(format!(
                "model returned a {}x{} mask for a {}x{} frame",
                mask.width(),
                mask.height(),
                frame.width(),
                frame.height()
            )));
        }

        Ok(mask)
    }

    /// Whether the model has not yet been seeded (two-phase models only)
    pub fn awaiting_initialization(&self) -> bool {
        matches!(
            self,
            ModelHandle::Lazy {
                state: LazyState::Uninitialized,
                ..
            }
        )
    }
}

/// Map values >= `threshold` to 255 and everything else to 0
pub fn binarize(mask: &mut ForegroundMask, threshold: u8) {
    for Luma([v]) in mask.pixels_mut() {
        *v = if *v >= threshold { 255 } else { 0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    /// Echoes the frame's luma as the mask and records the calls it receives
    #[derive(Default)]
    struct Echo {
        initialized: u32,
        applied: u32,
    }

    impl LazyModel for Echo {
        fn initialize(&mut self, _frame: &Frame, _roi: Option<&GrayImage>) -> Result<()> {
            self.initialized += 1;
            Ok(())
        }

        fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
            self.applied += 1;
            Ok(frame.luma().into_owned())
        }
    }

    impl ApplyModel for Echo {
        fn apply(&mut self, frame: &Frame) -> Result<ForegroundMask> {
            Ok(frame.luma().into_owned())
        }
    }

    fn gray(width: u32, height: u32, value: u8) -> Frame {
        Frame::Gray(GrayImage::from_pixel(width, height, Luma([value])))
    }

    #[test]
    fn binarize_folds_shadows() {
        let mut mask = GrayImage::from_raw(4, 1, vec![0, 127, 200, 255]).unwrap();
        binarize(&mut mask, SHADOW_THRESHOLD);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255, 255]);
    }

    #[test]
    fn threshold_shape_is_binary() {
        let mut handle = ModelHandle::ApplyThreshold(Box::new(Echo::default()));
        let mask = handle.segment(&gray(3, 3, 127)).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 0));
        let mask = handle.segment(&gray(3, 3, 230)).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn lazy_shape_initializes_then_applies() {
        let mut handle = ModelHandle::Lazy {
            model: Box::new(Echo::default()),
            state: LazyState::Uninitialized,
        };
        assert!(handle.awaiting_initialization());

        let first = handle.segment(&gray(6, 4, 255)).unwrap();
        assert_eq!(first.dimensions(), (6, 4));
        assert!(first.pixels().all(|p| p[0] == 0));
        assert!(!handle.awaiting_initialization());

        let second = handle.segment(&gray(6, 4, 255)).unwrap();
        assert!(second.pixels().all(|p| p[0] == 255));

        // A different size starts over
        let resized = handle.segment(&gray(3, 5, 255)).unwrap();
        assert_eq!(resized.dimensions(), (3, 5));
        assert!(resized.pixels().all(|p| p[0] == 0));

        let ModelHandle::Lazy { state, .. } = &handle else {
            unreachable!()
        };
        assert_eq!(*state, LazyState::Initialized(3, 5));
    }

    #[test]
    fn mismatched_mask_is_an_engine_error() {
        struct Wrong;
        impl ApplyModel for Wrong {
            fn apply(&mut self, _frame: &Frame) -> Result<ForegroundMask> {
                Ok(ForegroundMask::new(1, 1))
            }
        }

        let mut handle = ModelHandle::Apply(Box::new(Wrong));
        assert!(matches!(handle.segment(&gray(4, 4, 0)), Err(Error::Engine(_))));
    }
}
