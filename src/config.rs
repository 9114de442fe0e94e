//! Resolution of string-keyed options into typed per-variant parameters.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Raw option map: option name to unparsed value
pub type Configuration = HashMap<String, String>;

/// The available background modeling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmVariant {
    /// Sample-based model (ViBe)
    Vibe,
    /// Mixture of Gaussians
    Mog,
    /// Per-pixel color histograms with a Bayesian decision (GMG)
    Gmg,
    /// Pixel-count stability (CNT)
    Cnt,
    /// LBSP sample classifier with self-adjusting thresholds
    SuBSense,
    /// LBSP sample classifier with fixed thresholds
    Lobster,
    /// Adaptive mixture of Gaussians with shadow detection
    Mog2,
}

impl AlgorithmVariant {
    /// Variant used when the requested one cannot be built
    pub const DEFAULT: AlgorithmVariant = AlgorithmVariant::Vibe;

    pub const ALL: [AlgorithmVariant; 7] = [
        AlgorithmVariant::Vibe,
        AlgorithmVariant::Mog,
        AlgorithmVariant::Gmg,
        AlgorithmVariant::Cnt,
        AlgorithmVariant::SuBSense,
        AlgorithmVariant::Lobster,
        AlgorithmVariant::Mog2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AlgorithmVariant::Vibe => "vibe",
            AlgorithmVariant::Mog => "mog",
            AlgorithmVariant::Gmg => "gmg",
            AlgorithmVariant::Cnt => "cnt",
            AlgorithmVariant::SuBSense => "subsense",
            AlgorithmVariant::Lobster => "lobster",
            AlgorithmVariant::Mog2 => "mog2",
        }
    }

    /// Whether this build carries the engine for the variant
    pub const fn is_available(self) -> bool {
        match self {
            AlgorithmVariant::Mog | AlgorithmVariant::Gmg | AlgorithmVariant::Cnt => {
                cfg!(feature = "bgsegm")
            }
            _ => true,
        }
    }

    /// Option keys this variant reads, in declaration order
    pub fn recognized_keys(self) -> &'static [&'static str] {
        match self {
            AlgorithmVariant::Vibe => &[
                "samples",
                "pixelNeighbor",
                "distanceThreshold",
                "matchingThreshold",
                "updateFactor",
            ],
            AlgorithmVariant::Mog => &["history", "nmixtures", "backgroundRatio", "noiseSigma"],
            AlgorithmVariant::Gmg => &["initializationFrames", "decisionThreshold"],
            AlgorithmVariant::Cnt => &[
                "minPixelStability",
                "useHistory",
                "maxPixelStability",
                "isParallel",
            ],
            AlgorithmVariant::SuBSense | AlgorithmVariant::Lobster => &[],
            AlgorithmVariant::Mog2 => &["history", "varThreshold", "detectShadows"],
        }
    }
}

impl fmt::Display for AlgorithmVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlgorithmVariant {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        AlgorithmVariant::ALL
            .into_iter()
            .find(|variant| variant.name() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown algorithm `{value}`, expected one of: vibe, mog, gmg, cnt, subsense, lobster, mog2"
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VibeParams {
    pub samples: i32,
    pub pixel_neighbor: i32,
    pub distance_threshold: i32,
    pub matching_threshold: i32,
    pub update_factor: i32,
}

impl Default for VibeParams {
    fn default() -> Self {
        Self {
            samples: 20,
            pixel_neighbor: 1,
            distance_threshold: 20,
            matching_threshold: 3,
            update_factor: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MogParams {
    pub history: i32,
    pub nmixtures: i32,
    pub background_ratio: f64,
    /// Zero or negative selects the built-in noise level
    pub noise_sigma: f64,
}

impl Default for MogParams {
    fn default() -> Self {
        Self {
            history: 100,
            nmixtures: 3,
            background_ratio: 0.7,
            noise_sigma: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GmgParams {
    pub initialization_frames: i32,
    pub decision_threshold: f64,
}

impl Default for GmgParams {
    fn default() -> Self {
        Self {
            initialization_frames: 50,
            decision_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CntParams {
    pub min_pixel_stability: i32,
    pub use_history: bool,
    pub max_pixel_stability: i32,
    pub is_parallel: bool,
}

impl Default for CntParams {
    fn default() -> Self {
        Self {
            min_pixel_stability: 15,
            use_history: true,
            max_pixel_stability: 15 * 60,
            is_parallel: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mog2Params {
    pub history: i32,
    pub var_threshold: f64,
    pub detect_shadows: bool,
}

impl Default for Mog2Params {
    fn default() -> Self {
        Self {
            history: 500,
            var_threshold: 16.0,
            detect_shadows: true,
        }
    }
}

/// Fully resolved parameters, one record per variant
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterSet {
    Vibe(VibeParams),
    Mog(MogParams),
    Gmg(GmgParams),
    Cnt(CntParams),
    SuBSense,
    Lobster,
    Mog2(Mog2Params),
}

impl ParameterSet {
    /// Documented defaults for a variant
    pub fn defaults(variant: AlgorithmVariant) -> Self {
        match variant {
            AlgorithmVariant::Vibe => ParameterSet::Vibe(VibeParams::default()),
            AlgorithmVariant::Mog => ParameterSet::Mog(MogParams::default()),
            AlgorithmVariant::Gmg => ParameterSet::Gmg(GmgParams::default()),
            AlgorithmVariant::Cnt => ParameterSet::Cnt(CntParams::default()),
            AlgorithmVariant::SuBSense => ParameterSet::SuBSense,
            AlgorithmVariant::Lobster => ParameterSet::Lobster,
            AlgorithmVariant::Mog2 => ParameterSet::Mog2(Mog2Params::default()),
        }
    }

    pub fn variant(&self) -> AlgorithmVariant {
        match self {
            ParameterSet::Vibe(_) => AlgorithmVariant::Vibe,
            ParameterSet::Mog(_) => AlgorithmVariant::Mog,
            ParameterSet::Gmg(_) => AlgorithmVariant::Gmg,
            ParameterSet::Cnt(_) => AlgorithmVariant::Cnt,
            ParameterSet::SuBSense => AlgorithmVariant::SuBSense,
            ParameterSet::Lobster => AlgorithmVariant::Lobster,
            ParameterSet::Mog2(_) => AlgorithmVariant::Mog2,
        }
    }
}

/// Resolve the parameters of `variant` from `config`
///
/// Absent keys keep their defaults and unknown keys are ignored. A present
/// key whose value does not parse as the declared type is an error; it is
/// never replaced by the default.
pub fn resolve(config: &Configuration, variant: AlgorithmVariant) -> Result<ParameterSet> {
    let options = Options { config, variant };

    let params = match variant {
        AlgorithmVariant::Vibe => {
            let defaults = VibeParams::default();
            ParameterSet::Vibe(VibeParams {
                samples: options.int("samples", defaults.samples)?,
                pixel_neighbor: options.int("pixelNeighbor", defaults.pixel_neighbor)?,
                distance_threshold: options.int("distanceThreshold", defaults.distance_threshold)?,
                matching_threshold: options.int("matchingThreshold", defaults.matching_threshold)?,
                update_factor: options.int("updateFactor", defaults.update_factor)?,
            })
        }
        AlgorithmVariant::Mog => {
            let defaults = MogParams::default();
            ParameterSet::Mog(MogParams {
                history: options.int("history", defaults.history)?,
                nmixtures: options.int("nmixtures", defaults.nmixtures)?,
                background_ratio: options.real("backgroundRatio", defaults.background_ratio)?,
                noise_sigma: options.real("noiseSigma", defaults.noise_sigma)?,
            })
        }
        AlgorithmVariant::Gmg => {
            let defaults = GmgParams::default();
            ParameterSet::Gmg(GmgParams {
                initialization_frames: options
                    .int("initializationFrames", defaults.initialization_frames)?,
                decision_threshold: options.real("decisionThreshold", defaults.decision_threshold)?,
            })
        }
        AlgorithmVariant::Cnt => {
            let defaults = CntParams::default();
            ParameterSet::Cnt(CntParams {
                min_pixel_stability: options
                    .int("minPixelStability", defaults.min_pixel_stability)?,
                use_history: options.flag("useHistory", defaults.use_history)?,
                max_pixel_stability: options
                    .int("maxPixelStability", defaults.max_pixel_stability)?,
                is_parallel: options.flag("isParallel", defaults.is_parallel)?,
            })
        }
        // Fixed internal defaults, the map is not consulted
        AlgorithmVariant::SuBSense => ParameterSet::SuBSense,
        AlgorithmVariant::Lobster => ParameterSet::Lobster,
        AlgorithmVariant::Mog2 => {
            let defaults = Mog2Params::default();
            ParameterSet::Mog2(Mog2Params {
                history: options.int("history", defaults.history)?,
                var_threshold: options.real("varThreshold", defaults.var_threshold)?,
                detect_shadows: options.flag("detectShadows", defaults.detect_shadows)?,
            })
        }
    };

    Ok(params)
}

struct Options<'a> {
    config: &'a Configuration,
    variant: AlgorithmVariant,
}

impl Options<'_> {
    fn parse<T: FromStr>(&self, key: &'static str, default: T, expected: &'static str) -> Result<T> {
        match self.config.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| Error::ConfigParse {
                variant: self.variant,
                key,
                value: raw.clone(),
                expected,
            }),
        }
    }

    fn int(&self, key: &'static str, default: i32) -> Result<i32> {
        self.parse(key, default, "an integer")
    }

    fn real(&self, key: &'static str, default: f64) -> Result<f64> {
        self.parse(key, default, "a number")
    }

    /// Flags are integers, non-zero meaning enabled
    fn flag(&self, key: &'static str, default: bool) -> Result<bool> {
        self.parse(key, i32::from(default), "an integer flag")
            .map(|value| value != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Configuration {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_config_yields_defaults() {
        let empty = Configuration::new();
        for variant in AlgorithmVariant::ALL {
            let params = resolve(&empty, variant).unwrap();
            assert_eq!(params, ParameterSet::defaults(variant));
            assert_eq!(params.variant(), variant);
        }
    }

    #[test]
    fn vibe_overrides_keep_other_defaults() {
        let params = resolve(
            &config(&[("samples", "10"), ("distanceThreshold", "15")]),
            AlgorithmVariant::Vibe,
        )
        .unwrap();

        assert_eq!(
            params,
            ParameterSet::Vibe(VibeParams {
                samples: 10,
                pixel_neighbor: 1,
                distance_threshold: 15,
                matching_threshold: 3,
                update_factor: 16,
            })
        );
    }

    #[test]
    fn documented_defaults() {
        assert_eq!(
            ParameterSet::defaults(AlgorithmVariant::Cnt),
            ParameterSet::Cnt(CntParams {
                min_pixel_stability: 15,
                use_history: true,
                max_pixel_stability: 900,
                is_parallel: true,
            })
        );
        assert_eq!(
            ParameterSet::defaults(AlgorithmVariant::Mog),
            ParameterSet::Mog(MogParams {
                history: 100,
                nmixtures: 3,
                background_ratio: 0.7,
                noise_sigma: 0.0,
            })
        );
        assert_eq!(
            ParameterSet::defaults(AlgorithmVariant::Gmg),
            ParameterSet::Gmg(GmgParams {
                initialization_frames: 50,
                decision_threshold: 0.7,
            })
        );
        assert_eq!(
            ParameterSet::defaults(AlgorithmVariant::Mog2),
            ParameterSet::Mog2(Mog2Params {
                history: 500,
                var_threshold: 16.0,
                detect_shadows: true,
            })
        );
    }

    #[test]
    fn real_and_flag_values() {
        let params = resolve(
            &config(&[("history", "200"), ("varThreshold", " 25.5 "), ("detectShadows", "0")]),
            AlgorithmVariant::Mog2,
        )
        .unwrap();

        assert_eq!(
            params,
            ParameterSet::Mog2(Mog2Params {
                history: 200,
                var_threshold: 25.5,
                detect_shadows: false,
            })
        );
    }

    #[test]
    fn unparsable_value_is_an_error() {
        let err = resolve(&config(&[("samples", "many")]), AlgorithmVariant::Vibe).unwrap_err();
        match err {
            Error::ConfigParse { variant, key, value, .. } => {
                assert_eq!(variant, AlgorithmVariant::Vibe);
                assert_eq!(key, "samples");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Reals are not accepted where an integer is declared
        assert!(resolve(&config(&[("history", "1.5")]), AlgorithmVariant::Mog).is_err());
    }

    #[test]
    fn keys_of_other_variants_are_ignored() {
        let mixed = config(&[("samples", "oops"), ("bogus", "1"), ("history", "42")]);

        let params = resolve(&mixed, AlgorithmVariant::Mog).unwrap();
        assert_eq!(
            params,
            ParameterSet::Mog(MogParams {
                history: 42,
                ..MogParams::default()
            })
        );

        // The classifier variants never read the map
        assert_eq!(resolve(&mixed, AlgorithmVariant::SuBSense).unwrap(), ParameterSet::SuBSense);
        assert_eq!(resolve(&mixed, AlgorithmVariant::Lobster).unwrap(), ParameterSet::Lobster);
    }

    #[test]
    fn variant_names_round_trip() {
        for variant in AlgorithmVariant::ALL {
            assert_eq!(variant.to_string().parse::<AlgorithmVariant>(), Ok(variant));
        }
        assert_eq!(" MOG2 ".parse::<AlgorithmVariant>(), Ok(AlgorithmVariant::Mog2));
        assert!("knn".parse::<AlgorithmVariant>().is_err());
    }
}
