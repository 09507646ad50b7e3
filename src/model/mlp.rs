//! Fixed-topology MLP inference: `layer0..layer6`, leaky-ReLU on every
//! hidden layer, softmax on the output, with the two residual adds applied
//! *after* activation (`layer3(layer2.output); layer3.output[i] +=
//! layer1.output[i]`). Only the weights are retrainable/reloadable; the
//! topology is hard-coded.
use crate::error::{EngineError, Result};

const LEAKY_SLOPE: f32 = 0.1;

const LAYER_DIMS: [(usize, usize); 7] = [
    (16, 32),
    (32, 16),
    (16, 32),
    (32, 16),
    (16, 32),
    (32, 16),
    (16, 3),
];

#[derive(Debug, Clone)]
struct DenseLayer {
    weights: Vec<Vec<f32>>, // [out][in], row-major
    bias: Vec<f32>,
}

impl DenseLayer {
    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0f32; self.bias.len()];
        for (o, out) in output.iter_mut().enumerate() {
            let mut sum = self.bias[o];
            for (i, x) in input.iter().enumerate() {
                sum += self.weights[o][i] * x;
            }
            *out = sum;
        }
        output
    }
}

fn leaky_relu(v: &mut [f32]) {
    for x in v.iter_mut() {
        if *x < 0.0 {
            *x *= LEAKY_SLOPE;
        }
    }
}

fn softmax(v: &mut [f32]) {
    // no max-subtraction: spec 4.F notes inputs are small by construction.
    let mut sum = 0.0f32;
    for x in v.iter_mut() {
        *x = x.exp();
        sum += *x;
    }
    if sum != 0.0 && sum.is_finite() {
        for x in v.iter_mut() {
            *x /= sum;
        }
    } else {
        for x in v.iter_mut() {
            *x = 0.0;
        }
    }
}

/// The seven-layer network: input 16 -> 32 -> 16 -> 32 -> 16 -> 32 -> 16 ->
/// 3, with residual adds from layer1's output into layer3's, and layer3's
/// into layer5's (both width 16).
pub struct Mlp {
    layers: [DenseLayer; 7],
}

impl Mlp {
    /// Loads weights from the parsed top-level array of `[W, b]` pairs
    /// (section 6 `model_weights.json`), already decoded by the caller
    /// using the hand-rolled array parser (this is a startup-only, non-hot
    /// path, so `serde_json` is used one level up; see DESIGN.md).
    pub fn from_raw_layers(raw: &[(Vec<Vec<f32>>, Vec<f32>)]) -> Result<Self> {
        if raw.len() != 7 {
            return Err(EngineError::BadWeights(format!(
                "expected 7 layers, got {}",
                raw.len()
            )));
        }
        let mut layers: Vec<DenseLayer> = Vec::with_capacity(7);
        for (idx, (weights, bias)) in raw.iter().enumerate() {
            let (in_dim, out_dim) = LAYER_DIMS[idx];
            if bias.len() != out_dim {
                return Err(EngineError::BadWeights(format!(
                    "layer {idx} bias length {} != {out_dim}",
                    bias.len()
                )));
            }
            if weights.len() != out_dim || weights.iter().any(|row| row.len() != in_dim) {
                return Err(EngineError::BadWeights(format!(
                    "layer {idx} weight shape mismatch"
                )));
            }
            layers.push(DenseLayer {
                weights: weights.clone(),
                bias: bias.clone(),
            });
        }
        Ok(Mlp {
            layers: layers.try_into().expect("checked length above"),
        })
    }

    /// Runs the forward pass on a 16-element standardized feature vector,
    /// returning the 3-element softmax output. `output[2]` is the quantity
    /// the engine consumes (class 2: "next transition is +1 level").
    pub fn forward(&self, input: &[f32; 16]) -> [f32; 3] {
        let mut out0 = self.layers[0].forward(input);
        leaky_relu(&mut out0);

        let mut out1 = self.layers[1].forward(&out0);
        leaky_relu(&mut out1);

        let mut out2 = self.layers[2].forward(&out1);
        leaky_relu(&mut out2);

        let mut out3 = self.layers[3].forward(&out2);
        leaky_relu(&mut out3);
        for i in 0..16 {
            out3[i] += out1[i];
        }

        let mut out4 = self.layers[4].forward(&out3);
        leaky_relu(&mut out4);

        let mut out5 = self.layers[5].forward(&out4);
        leaky_relu(&mut out5);
        for i in 0..16 {
            out5[i] += out3[i];
        }

        let mut out6 = self.layers[6].forward(&out5);
        softmax(&mut out6);

        [out6[0], out6[1], out6[2]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_layer(in_dim: usize, out_dim: usize) -> (Vec<Vec<f32>>, Vec<f32>) {
        let mut weights = vec![vec![0.0f32; in_dim]; out_dim];
        for i in 0..out_dim.min(in_dim) {
            weights[i][i] = 1.0;
        }
        (weights, vec![0.0; out_dim])
    }

    #[test]
    fn output_sums_to_one_or_is_zero() {
        let raw: Vec<(Vec<Vec<f32>>, Vec<f32>)> = LAYER_DIMS
            .iter()
            .map(|(i, o)| identity_layer(*i, *o))
            .collect();
        let mlp = Mlp::from_raw_layers(&raw).unwrap();
        let input = [0.1f32; 16];
        let out = mlp.forward(&input);
        let sum: f32 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6 || out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn rejects_wrong_layer_count() {
        let raw: Vec<(Vec<Vec<f32>>, Vec<f32>)> =
            vec![identity_layer(16, 32), identity_layer(32, 16)];
        let err = Mlp::from_raw_layers(&raw).unwrap_err();
        assert!(matches!(err, EngineError::BadWeights(_)));
    }

    #[test]
    fn rejects_mismatched_shape() {
        let mut raw: Vec<(Vec<Vec<f32>>, Vec<f32>)> = LAYER_DIMS
            .iter()
            .map(|(i, o)| identity_layer(*i, *o))
            .collect();
        raw[0].1.push(0.0); // bias now has 33 entries instead of 32
        let err = Mlp::from_raw_layers(&raw).unwrap_err();
        assert!(matches!(err, EngineError::BadWeights(_)));
    }
}
