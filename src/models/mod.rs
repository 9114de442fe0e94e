#[cfg(feature = "bgsegm")]
mod cnt;
#[cfg(feature = "bgsegm")]
mod gmg;
mod lbsp;
#[cfg(feature = "bgsegm")]
mod mog;
mod mog2;
pub mod types;
mod vibe;

#[cfg(feature = "bgsegm")]
pub use cnt::Cnt;
#[cfg(feature = "bgsegm")]
pub use gmg::Gmg;
pub use lbsp::LbspClassifier;
#[cfg(feature = "bgsegm")]
pub use mog::Mog;
pub use mog2::{Mog2, SHADOW_VALUE};
pub use types::{ApplyModel, LazyModel, UpdateMaskModel};
pub use vibe::Vibe;

use crate::config::{self, AlgorithmVariant, Configuration, ParameterSet};
use crate::engine::{LazyState, ModelHandle};
use crate::error::{Error, Result};

/// A constructed model together with what it was built from
pub struct ReadyModel {
    pub variant: AlgorithmVariant,
    pub parameters: ParameterSet,
    pub handle: ModelHandle,
    /// True when the requested variant was replaced by the default
    pub fell_back: bool,
}

/// Construct the engine for resolved parameters
pub fn create_model(parameters: &ParameterSet) -> Result<ModelHandle> {
    let handle = match parameters {
        ParameterSet::Vibe(params) => ModelHandle::UpdateMask(Box::new(Vibe::new(params)?)),

        #[cfg(feature = "bgsegm")]
        ParameterSet::Mog(params) => ModelHandle::Apply(Box::new(Mog::new(params)?)),
        #[cfg(feature = "bgsegm")]
        ParameterSet::Gmg(params) => ModelHandle::Apply(Box::new(Gmg::new(params)?)),
        #[cfg(feature = "bgsegm")]
        ParameterSet::Cnt(params) => ModelHandle::Apply(Box::new(Cnt::new(params)?)),

        #[cfg(not(feature = "bgsegm"))]
        ParameterSet::Mog(_) | ParameterSet::Gmg(_) | ParameterSet::Cnt(_) => {
            return Err(Error::UnsupportedVariant {
                variant: parameters.variant(),
                reason: "built without the `bgsegm` feature".to_string(),
            })
        }

        ParameterSet::SuBSense => ModelHandle::Lazy {
            model: Box::new(LbspClassifier::subsense()),
            state: LazyState::Uninitialized,
        },
        ParameterSet::Lobster => ModelHandle::Lazy {
            model: Box::new(LbspClassifier::lobster()),
            state: LazyState::Uninitialized,
        },

        ParameterSet::Mog2(params) => ModelHandle::ApplyThreshold(Box::new(Mog2::new(params)?)),
    };

    Ok(handle)
}

enum InitState {
    Resolving {
        variant: AlgorithmVariant,
        fell_back: bool,
    },
    Ready(ReadyModel),
}

/// Resolve and build the model for `requested`, falling back once to the default variant
///
/// Configuration parse errors are returned as they are. An unsupported or
/// invalid variant is logged and replaced by [`AlgorithmVariant::DEFAULT`],
/// which is resolved from the same configuration and built from scratch.
/// If that fails as well the error is returned.
pub fn initialize(config: &Configuration, requested: AlgorithmVariant) -> Result<ReadyModel> {
    let mut state = InitState::Resolving {
        variant: requested,
        fell_back: false,
    };

    loop {
        state = match state {
            InitState::Ready(ready) => return Ok(ready),
            InitState::Resolving { variant, fell_back } => {
                // Compiled-out variants never read their keys
                let built = if variant.is_available() {
                    let parameters = config::resolve(config, variant)?;
                    create_model(&parameters).map(|handle| (parameters, handle))
                } else {
                    Err(Error::UnsupportedVariant {
                        variant,
                        reason: "built without the `bgsegm` feature".to_string(),
                    })
                };

                match built {
                    Ok((parameters, handle)) => {
                        tracing::debug!("Model {} ready with {:?}", variant, parameters);
                        InitState::Ready(ReadyModel {
                            variant,
                            parameters,
                            handle,
                            fell_back,
                        })
                    }
                    Err(err) if err.is_unsupported() && variant != AlgorithmVariant::DEFAULT => {
                        tracing::warn!(
                            "{}. Falling back to {}",
                            err,
                            AlgorithmVariant::DEFAULT
                        );
                        InitState::Resolving {
                            variant: AlgorithmVariant::DEFAULT,
                            fell_back: true,
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        };
    }
}

pub(crate) fn pixel_value(raw: &[u8], pixel: usize, channels: usize) -> [f32; 3] {
    let mut value = [0.0; 3];
    for (c, v) in raw[pixel * channels..(pixel + 1) * channels].iter().enumerate() {
        value[c] = f32::from(*v);
    }
    value
}

pub(crate) fn squared_distance(a: &[f32; 3], b: &[f32; 3], channels: usize) -> f32 {
    (0..channels).map(|c| (a[c] - b[c]) * (a[c] - b[c])).sum()
}
