//! Scoring model: fixed-topology MLP plus its feature scalers and inlier
//! ranges, loaded once at process start and reused across trading days.
pub mod mlp;
pub mod scaler;

use crate::error::{EngineError, Result};
use mlp::Mlp;
use scaler::Scalers;

pub struct Model {
    pub mlp: Mlp,
    pub scalers: Scalers,
}

impl Model {
    pub fn load(weights_json: &str, scaler_json: &str) -> Result<Self> {
        let raw_layers = parse_weight_layers(weights_json)?;
        let mlp = Mlp::from_raw_layers(&raw_layers)?;
        let scalers = Scalers::load(scaler_json)?;
        Ok(Model { mlp, scalers })
    }

    /// Scores a standardized 16-feature vector, returning `output[2]`: the
    /// probability the next transition is +1 level (spec 4.I step 6).
    pub fn prob_up(&self, standardized: &[f32; 16]) -> f32 {
        self.mlp.forward(standardized)[2]
    }
}

/// `model_weights.json` is a top-level array of 7 `[W, b]` pairs. This is
/// load-only, non-hot-path parsing, so `serde_json::Value` is used rather
/// than the hand-rolled streaming parsers in `src/json` (see DESIGN.md).
fn parse_weight_layers(json_text: &str) -> Result<Vec<(Vec<Vec<f32>>, Vec<f32>)>> {
    let value: serde_json::Value =
        serde_json::from_str(json_text).map_err(|e| EngineError::BadWeights(e.to_string()))?;
    let layers = value
        .as_array()
        .ok_or_else(|| EngineError::BadWeights("model_weights.json is not an array".into()))?;

    let mut out = Vec::with_capacity(layers.len());
    for (idx, layer) in layers.iter().enumerate() {
        let pair = layer.as_array().ok_or_else(|| {
            EngineError::BadWeights(format!("layer {idx} is not a [W, b] pair"))
        })?;
        if pair.len() != 2 {
            return Err(EngineError::BadWeights(format!(
                "layer {idx} does not have exactly 2 elements"
            )));
        }
        let weights = pair[0]
            .as_array()
            .ok_or_else(|| EngineError::BadWeights(format!("layer {idx} weights not an array")))?
            .iter()
            .map(|row| {
                row.as_array()
                    .ok_or_else(|| {
                        EngineError::BadWeights(format!("layer {idx} weight row not an array"))
                    })?
                    .iter()
                    .map(|v| {
                        v.as_f64().ok_or_else(|| {
                            EngineError::BadWeights(format!("layer {idx} weight not numeric"))
                        })
                    })
                    .map(|r| r.map(|f| f as f32))
                    .collect::<Result<Vec<f32>>>()
            })
            .collect::<Result<Vec<Vec<f32>>>>()?;
        let bias = pair[1]
            .as_array()
            .ok_or_else(|| EngineError::BadWeights(format!("layer {idx} bias not an array")))?
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| EngineError::BadWeights(format!("layer {idx} bias not numeric")))
                    .map(|f| f as f32)
            })
            .collect::<Result<Vec<f32>>>()?;
        out.push((weights, bias));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seven_layer_weight_array() {
        let mut layers = Vec::new();
        for (in_dim, out_dim) in mlp_dims() {
            let w: Vec<Vec<f64>> = (0..out_dim).map(|_| vec![0.0; in_dim]).collect();
            let b: Vec<f64> = vec![0.0; out_dim];
            layers.push(serde_json::json!([w, b]));
        }
        let text = serde_json::to_string(&layers).unwrap();
        let parsed = parse_weight_layers(&text).unwrap();
        assert_eq!(parsed.len(), 7);
    }

    fn mlp_dims() -> [(usize, usize); 7] {
        [(16, 32), (32, 16), (16, 32), (32, 16), (16, 32), (32, 16), (16, 3)]
    }
}
