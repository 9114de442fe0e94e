//! Runtime-selectable background subtraction for video frame sequences.
//!
//! A [`BackgroundSubtractor`] is built for one [`AlgorithmVariant`] and a
//! string-keyed [`Configuration`]. Each call to
//! [`BackgroundSubtractor::subtract`] feeds the next frame to the model and
//! returns a cleaned binary foreground mask (0 background, 255 foreground).

pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod models;
pub mod postprocess;
mod subtractor;

pub use config::{resolve, AlgorithmVariant, Configuration, ParameterSet};
pub use error::{Error, Result};
pub use frame::{adapt, Channels, ForegroundMask, Frame};
pub use postprocess::PostProcessor;
pub use subtractor::BackgroundSubtractor;
