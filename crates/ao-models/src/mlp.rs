use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};

use ao_types::ModelError;

/// Element-wise non-linearity applied after a dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Identity,
    Relu,
}

impl Activation {
    pub fn apply(self, z: f64) -> f64 {
        match self {
            Self::Identity => z,
            Self::Relu => z.max(0.0),
        }
    }

    /// Derivative with respect to the pre-activation `z`.
    pub fn derivative(self, z: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Fully connected layer. `weights` has shape `(dim_in, dim_out)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
    pub activation: Activation,
}

impl DenseLayer {
    pub fn new(
        weights: Array2<f64>,
        biases: Array1<f64>,
        activation: Activation,
    ) -> Result<Self, ModelError> {
        let layer = Self {
            weights,
            biases,
            activation,
        };
        layer.validate()?;
        Ok(layer)
    }

    /// Glorot-uniform initialised layer.
    pub fn random<R: Rng>(
        dim_in: usize,
        dim_out: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let bound = (6.0 / (dim_in + dim_out) as f64).sqrt();
        let weights = Array2::from_shape_fn((dim_in, dim_out), |_| rng.random_range(-bound..bound));
        let biases = Array1::from_shape_fn(dim_out, |_| rng.random_range(-bound..bound));
        Self {
            weights,
            biases,
            activation,
        }
    }

    pub fn dim_in(&self) -> usize {
        self.weights.nrows()
    }

    pub fn dim_out(&self) -> usize {
        self.weights.ncols()
    }

    /// `x · W + b` for a batch of rows.
    pub fn pre_activation(&self, x: ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.weights) + &self.biases
    }

    pub fn forward(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let activation = self.activation;
        self.pre_activation(x).mapv_into(|z| activation.apply(z))
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.biases.len() != self.dim_out() {
            return Err(ModelError::ShapeMismatch {
                what: "layer biases",
                got: self.biases.len(),
                expected: self.dim_out(),
            });
        }
        if self.weights.iter().chain(self.biases.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite {
                what: "layer parameters",
            });
        }
        Ok(())
    }
}

/// Feed-forward regressor: ReLU hidden layers and an identity output layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<DenseLayer>,
}

impl Mlp {
    pub fn new(layers: Vec<DenseLayer>) -> Result<Self, ModelError> {
        let mlp = Self { layers };
        mlp.validate()?;
        Ok(mlp)
    }

    pub fn random<R: Rng>(
        input_dim: usize,
        hidden: &[usize],
        output_dim: usize,
        rng: &mut R,
    ) -> Self {
        let mut dims = Vec::with_capacity(hidden.len() + 2);
        dims.push(input_dim);
        dims.extend_from_slice(hidden);
        dims.push(output_dim);

        let last = dims.len() - 2;
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let activation = if i == last {
                    Activation::Identity
                } else {
                    Activation::Relu
                };
                DenseLayer::random(pair[0], pair[1], activation, rng)
            })
            .collect();

        Self { layers }
    }

    pub fn input_dim(&self) -> usize {
        self.layers.first().map(DenseLayer::dim_in).unwrap_or(0)
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(DenseLayer::dim_out).unwrap_or(0)
    }

    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [DenseLayer] {
        &mut self.layers
    }

    pub fn predict_batch(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        if x.ncols() != self.input_dim() {
            return Err(ModelError::ShapeMismatch {
                what: "model input",
                got: x.ncols(),
                expected: self.input_dim(),
            });
        }

        let mut out = x.to_owned();
        for layer in &self.layers {
            out = layer.forward(out.view());
        }
        Ok(out)
    }

    /// Single-sample inference.
    pub fn predict(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        let batch = ArrayView2::from_shape((1, x.len()), x).map_err(|_| ModelError::ShapeMismatch {
            what: "model input",
            got: x.len(),
            expected: self.input_dim(),
        })?;
        let out = self.predict_batch(batch)?;
        Ok(out.into_iter().collect())
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::ShapeMismatch {
                what: "layer count",
                got: 0,
                expected: 1,
            });
        }
        for layer in &self.layers {
            layer.validate()?;
        }
        for pair in self.layers.windows(2) {
            if pair[0].dim_out() != pair[1].dim_in() {
                return Err(ModelError::ShapeMismatch {
                    what: "layer chain",
                    got: pair[1].dim_in(),
                    expected: pair[0].dim_out(),
                });
            }
        }
        Ok(())
    }
}
