use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ao_types::{ModelError, RetrainSettings};

use crate::mlp::{DenseLayer, Mlp};

/// Hyper-parameters for [`MlpTrainer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub hidden_layers: Vec<usize>,
    pub max_epochs: usize,
    pub learning_rate: f64,
    pub l2_penalty: f64,
    /// Upper bound on the minibatch size; clipped to the sample count.
    pub batch_size: usize,
    /// Epochs without `tolerance` improvement before stopping.
    pub patience: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::from(&RetrainSettings::default())
    }
}

impl From<&RetrainSettings> for TrainingConfig {
    fn from(settings: &RetrainSettings) -> Self {
        Self {
            hidden_layers: settings.hidden_layers.clone(),
            max_epochs: settings.max_epochs,
            learning_rate: settings.learning_rate,
            l2_penalty: settings.l2_penalty,
            batch_size: settings.batch_size,
            patience: settings.patience,
            tolerance: settings.tolerance,
            seed: settings.seed,
        }
    }
}

/// Summary of a finished fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub final_loss: f64,
    pub best_loss: f64,
    pub stopped_early: bool,
}

/// Adam moment estimates for one layer.
struct LayerMoments {
    m_w: Array2<f64>,
    v_w: Array2<f64>,
    m_b: Array1<f64>,
    v_b: Array1<f64>,
}

struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    beta1_t: f64,
    beta2_t: f64,
    epsilon: f64,
    moments: Vec<LayerMoments>,
}

impl Adam {
    fn new(mlp: &Mlp, learning_rate: f64) -> Self {
        let moments = mlp
            .layers()
            .iter()
            .map(|layer| LayerMoments {
                m_w: Array2::zeros(layer.weights.raw_dim()),
                v_w: Array2::zeros(layer.weights.raw_dim()),
                m_b: Array1::zeros(layer.biases.raw_dim()),
                v_b: Array1::zeros(layer.biases.raw_dim()),
            })
            .collect();

        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            beta1_t: 1.0,
            beta2_t: 1.0,
            epsilon: 1e-8,
            moments,
        }
    }

    fn step(&mut self, layers: &mut [DenseLayer], grads: &[(Array2<f64>, Array1<f64>)]) {
        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;
        let step_size = lr * (1.0 - self.beta2_t).sqrt() / (1.0 - self.beta1_t);

        for ((layer, (dw, db)), moments) in layers.iter_mut().zip(grads).zip(&mut self.moments) {
            ndarray::Zip::from(&mut layer.weights)
                .and(dw)
                .and(&mut moments.m_w)
                .and(&mut moments.v_w)
                .for_each(|p, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= step_size * *m / (v.sqrt() + eps);
                });
            ndarray::Zip::from(&mut layer.biases)
                .and(db)
                .and(&mut moments.m_b)
                .and(&mut moments.v_b)
                .for_each(|p, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    *p -= step_size * *m / (v.sqrt() + eps);
                });
        }
    }
}

/// Minibatch Adam trainer for [`Mlp`] regressors on a squared-error loss.
#[derive(Debug, Clone)]
pub struct MlpTrainer {
    config: TrainingConfig,
}

impl MlpTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Fits a freshly initialised network to `(x, y)`. Both are expected to
    /// be standardised already.
    pub fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
    ) -> Result<(Mlp, TrainingReport), ModelError> {
        let n = x.nrows();
        if n == 0 {
            return Err(ModelError::EmptyDataset);
        }
        if y.nrows() != n {
            return Err(ModelError::ShapeMismatch {
                what: "training targets",
                got: y.nrows(),
                expected: n,
            });
        }
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite {
                what: "training data",
            });
        }

        let config = &self.config;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut mlp = Mlp::random(x.ncols(), &config.hidden_layers, y.ncols(), &mut rng);
        let mut adam = Adam::new(&mlp, config.learning_rate);

        let batch_size = config.batch_size.clamp(1, n);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut best = mlp.clone();
        let mut best_loss = self.loss(&mlp, x, y);
        let mut stale_epochs = 0;
        let mut report = TrainingReport {
            epochs: 0,
            final_loss: best_loss,
            best_loss,
            stopped_early: false,
        };

        for epoch in 0..config.max_epochs {
            indices.shuffle(&mut rng);
            for batch in indices.chunks(batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let grads = self.backprop(&mlp, xb.view(), yb.view());
                adam.step(mlp.layers_mut(), &grads);
            }

            let epoch_loss = self.loss(&mlp, x, y);
            if !epoch_loss.is_finite() {
                return Err(ModelError::Training {
                    message: format!("loss diverged at epoch {epoch}"),
                });
            }

            report.epochs = epoch + 1;
            report.final_loss = epoch_loss;

            if epoch_loss > best_loss - config.tolerance {
                stale_epochs += 1;
            } else {
                stale_epochs = 0;
            }
            if epoch_loss < best_loss {
                best_loss = epoch_loss;
                best = mlp.clone();
            }

            if stale_epochs >= config.patience {
                debug!(epoch, loss = epoch_loss, best_loss, "Early stopping");
                report.stopped_early = true;
                break;
            }
        }

        report.best_loss = best_loss;
        Ok((best, report))
    }

    /// Full-dataset loss of `mlp`, including the L2 term.
    fn loss(&self, mlp: &Mlp, x: ArrayView2<f64>, y: ArrayView2<f64>) -> f64 {
        let batch = x.nrows() as f64;
        let mut a = x.to_owned();
        for layer in mlp.layers() {
            a = layer.forward(a.view());
        }
        let residual = &a - &y;
        residual.mapv(|r| r * r).sum() / (2.0 * batch) + self.l2_term(mlp, batch)
    }

    fn l2_term(&self, mlp: &Mlp, batch: f64) -> f64 {
        let l2_sum: f64 = mlp.layers().iter().map(|l| l.weights.mapv(|w| w * w).sum()).sum();
        self.config.l2_penalty * l2_sum / (2.0 * batch)
    }

    /// Per-layer `(dW, db)` for one minibatch.
    fn backprop(
        &self,
        mlp: &Mlp,
        x: ArrayView2<f64>,
        y: ArrayView2<f64>,
    ) -> Vec<(Array2<f64>, Array1<f64>)> {
        let batch = x.nrows() as f64;
        let layers = mlp.layers();

        let mut inputs = Vec::with_capacity(layers.len());
        let mut pre_activations = Vec::with_capacity(layers.len());
        let mut a = x.to_owned();
        for layer in layers {
            let z = layer.pre_activation(a.view());
            let activation = layer.activation;
            let next = z.mapv(|v| activation.apply(v));
            inputs.push(a);
            pre_activations.push(z);
            a = next;
        }

        let residual = &a - &y;
        let mut grads = Vec::with_capacity(layers.len());
        let mut delta = residual / batch;
        for (i, layer) in layers.iter().enumerate().rev() {
            let activation = layer.activation;
            delta.zip_mut_with(&pre_activations[i], |d, &z| *d *= activation.derivative(z));

            let dw = inputs[i].t().dot(&delta) + &(&layer.weights * (self.config.l2_penalty / batch));
            let db = delta.sum_axis(Axis(0));
            let next_delta = delta.dot(&layer.weights.t());
            grads.push((dw, db));
            delta = next_delta;
        }
        grads.reverse();
        grads
    }
}
