//! 4.G — per-feature scalers and derived inlier ranges.
//!
//! Grounded on `original_source/trading_bot/workspace/modelUtils.cpp`'s
//! `setInputScale`/`assignScale`/`assignLogScale`: every feature except
//! `time_of_day` and `n` was log-transformed (`ln(1e-9 + x)`) before the
//! mean/std used to fit the scaler were computed, so reversing that at
//! inference time means exponentiating the +/- 3 sigma band back out
//! (`exp(mean +/- 3*std) - 1e-9`) rather than just `mean +/- 3*std`.
use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{EngineError, Result};

/// Fixed and load-bearing: this is the order the MLP's 16 inputs are
/// assembled in (`engine::features`).
pub const FEATURE_NAMES: [&str; 16] = [
    "time_of_day",
    "relative_volume",
    "n",
    "mean",
    "dp",
    "std",
    "dt",
    "vsum",
    "average_volume",
    "previous_days_close",
    "rolling_csum",
    "rolling_vsum",
    "p(-dx)",
    "size",
    "p(+dx)",
    "lambda",
];

/// `time_of_day` and `n` are linear; every other feature is log-scaled.
fn is_log_feature(name: &str) -> bool {
    name != "time_of_day" && name != "n"
}

#[derive(Debug, Deserialize)]
struct RawFeature {
    #[serde(rename = "feature name")]
    name: String,
    mean: f64,
    std: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureScale {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

/// Hardcoded defaults table (spec 4.G): values not derived from a feature's
/// fitted mean/std.
pub struct Defaults {
    pub rolling_period_ns: i64,
    pub lookback_period: usize,
    pub std_max: f64,
    pub number_of_bins: usize,
    pub min_completed_trading_days: usize,
    pub average_volume_period: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            rolling_period_ns: 2_000_000_000,
            lookback_period: 1024,
            std_max: 3.0,
            number_of_bins: 51,
            min_completed_trading_days: 500,
            average_volume_period: 70,
        }
    }
}

pub struct Scalers {
    pub by_index: [FeatureScale; 16],
    pub defaults: Defaults,
}

impl Scalers {
    /// Loads `scaler_info.json` (already read into a string by the
    /// caller). The artifact is parsed with `serde_json` since this is a
    /// one-time startup load, not a zero-allocation hot path.
    pub fn load(json_text: &str) -> Result<Self> {
        let raw: Vec<RawFeature> = serde_json::from_str(json_text)
            .map_err(|e| EngineError::MalformedJson(e.to_string()))?;

        let mut by_name: HashMap<&str, &RawFeature> = HashMap::new();
        for f in &raw {
            by_name.insert(f.name.as_str(), f);
        }

        let mut by_index = [FeatureScale::default(); 16];
        for (idx, name) in FEATURE_NAMES.iter().enumerate() {
            let feature = by_name
                .get(name)
                .ok_or_else(|| EngineError::MissingFeature(name.to_string()))?;
            let (min, max) = if is_log_feature(name) {
                (
                    (feature.mean - 3.0 * feature.std).exp() - 1e-9,
                    (feature.mean + 3.0 * feature.std).exp() - 1e-9,
                )
            } else {
                (
                    feature.mean - 3.0 * feature.std,
                    feature.mean + 3.0 * feature.std,
                )
            };
            by_index[idx] = FeatureScale {
                mean: feature.mean,
                std: feature.std,
                min,
                max,
            };
        }

        let mut scalers = Scalers {
            by_index,
            defaults: Defaults::default(),
        };
        scalers.clamp_hardcoded_bounds();
        Ok(scalers)
    }

    /// Indices into `FEATURE_NAMES` for readability at call sites.
    pub fn index_of(name: &str) -> usize {
        FEATURE_NAMES.iter().position(|n| *n == name).unwrap()
    }

    /// Standardizes a raw feature value: log features go through
    /// `ln(1e-9 + x)` first, then `(x - mean) / std` either way.
    pub fn standardize(&self, index: usize, raw: f64) -> f64 {
        let scale = &self.by_index[index];
        let name = FEATURE_NAMES[index];
        let x = if is_log_feature(name) {
            (1e-9 + raw).ln()
        } else {
            raw
        };
        (x - scale.mean) / scale.std
    }

    pub fn is_inlier(&self, index: usize, raw: f64) -> bool {
        let scale = &self.by_index[index];
        raw >= scale.min && raw <= scale.max
    }

    fn clamp_hardcoded_bounds(&mut self) {
        let rvol = Scalers::index_of("relative_volume");
        if self.by_index[rvol].min < 0.0 {
            self.by_index[rvol].min = 0.0;
        }

        let csum = Scalers::index_of("rolling_csum");
        if self.by_index[csum].min < 5.0 {
            self.by_index[csum].min = 5.0;
        }

        // NOTE: this reproduces original_source/modelUtils.cpp byte for
        // byte: `if (min_lambda < 0.35F) max_lambda = 0.35F;` — the
        // condition tests the *lower* bound but assigns the *upper* one.
        // See DESIGN.md Open Question 1. Not corrected here.
        let lambda = Scalers::index_of("lambda");
        if self.by_index[lambda].min < 0.35 {
            self.by_index[lambda].max = 0.35;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> String {
        let entries: Vec<String> = FEATURE_NAMES
            .iter()
            .map(|name| format!(r#"{{"feature name":"{name}","mean":0.0,"std":1.0}}"#))
            .collect();
        format!("[{}]", entries.join(","))
    }

    #[test]
    fn loads_all_sixteen_features_in_fixed_order() {
        let scalers = Scalers::load(&sample_json()).unwrap();
        assert_eq!(scalers.by_index.len(), 16);
    }

    #[test]
    fn linear_feature_bounds_are_symmetric() {
        let scalers = Scalers::load(&sample_json()).unwrap();
        let idx = Scalers::index_of("time_of_day");
        assert_eq!(scalers.by_index[idx].min, -3.0);
        assert_eq!(scalers.by_index[idx].max, 3.0);
    }

    #[test]
    fn log_feature_bounds_are_exponentiated() {
        let scalers = Scalers::load(&sample_json()).unwrap();
        let idx = Scalers::index_of("std");
        let expected_min = (-3.0f64).exp() - 1e-9;
        assert!((scalers.by_index[idx].min - expected_min).abs() < 1e-9);
    }

    #[test]
    fn missing_feature_errors() {
        let json = r#"[{"feature name":"time_of_day","mean":0.0,"std":1.0}]"#;
        let err = Scalers::load(json).unwrap_err();
        assert!(matches!(err, EngineError::MissingFeature(_)));
    }

    #[test]
    fn lambda_clamp_reproduces_original_condition() {
        // mean/std chosen so the derived min_lambda < 0.35, which should
        // clamp *max* to 0.35 per the original's apparent typo.
        let entries: Vec<String> = FEATURE_NAMES
            .iter()
            .map(|name| {
                if *name == "lambda" {
                    format!(r#"{{"feature name":"{name}","mean":-2.0,"std":0.1}}"#)
                } else {
                    format!(r#"{{"feature name":"{name}","mean":0.0,"std":1.0}}"#)
                }
            })
            .collect();
        let json = format!("[{}]", entries.join(","));
        let scalers = Scalers::load(&json).unwrap();
        let idx = Scalers::index_of("lambda");
        assert_eq!(scalers.by_index[idx].max, 0.35);
    }
}
