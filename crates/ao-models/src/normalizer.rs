use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use ao_types::ModelError;

/// Per-column standardisation: `(x - mean) / scale`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Normalizer {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ModelError> {
        let normalizer = Self { mean, scale };
        normalizer.validate()?;
        Ok(normalizer)
    }

    /// Zero mean, unit scale.
    pub fn identity(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            scale: vec![1.0; dim],
        }
    }

    /// Column statistics of `data`. `scale` is the population standard
    /// deviation plus `epsilon`, so constant columns stay finite.
    pub fn fit(data: ArrayView2<f64>, epsilon: f64) -> Result<Self, ModelError> {
        if data.nrows() == 0 {
            return Err(ModelError::EmptyDataset);
        }
        let mean: Array1<f64> = data.mean_axis(Axis(0)).ok_or(ModelError::EmptyDataset)?;
        let std = data.std_axis(Axis(0), 0.0);
        let scale = std.mapv(|s| s + epsilon);

        Self::new(mean.to_vec(), scale.to_vec())
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        self.check_width(x.len())?;
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }

    pub fn inverse_transform(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        self.check_width(x.len())?;
        Ok(x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| v * s + m)
            .collect())
    }

    pub fn transform_batch(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(data.ncols())?;
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        Ok((&data - &mean) / &scale)
    }

    pub fn inverse_transform_batch(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(data.ncols())?;
        let mean = Array1::from(self.mean.clone());
        let scale = Array1::from(self.scale.clone());
        Ok(&data * &scale + &mean)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.mean.len() != self.scale.len() {
            return Err(ModelError::ShapeMismatch {
                what: "normalizer scale",
                got: self.scale.len(),
                expected: self.mean.len(),
            });
        }
        if self.mean.iter().any(|m| !m.is_finite())
            || self.scale.iter().any(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(ModelError::NonFinite {
                what: "normalizer statistics",
            });
        }
        Ok(())
    }

    fn check_width(&self, got: usize) -> Result<(), ModelError> {
        if got != self.dim() {
            return Err(ModelError::ShapeMismatch {
                what: "normalizer input",
                got,
                expected: self.dim(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fit_centres_and_scales_columns() {
        let data = array![[1.0, 10.0], [3.0, 10.0]];
        let normalizer = Normalizer::fit(data.view(), 1e-8).unwrap();

        assert_eq!(normalizer.mean, vec![2.0, 10.0]);
        assert!((normalizer.scale[0] - 1.0).abs() < 1e-6);
        // constant column: scale is epsilon, never zero
        assert!(normalizer.scale[1] > 0.0);

        let z = normalizer.transform(&[3.0, 10.0]).unwrap();
        assert!((z[0] - 1.0).abs() < 1e-6);
        assert_eq!(z[1], 0.0);
    }

    #[test]
    fn inverse_undoes_transform() {
        let normalizer = Normalizer::new(vec![2.4, 100.0], vec![0.5, 20.0]).unwrap();
        let x = [2.9, 60.0];
        let back = normalizer
            .inverse_transform(&normalizer.transform(&x).unwrap())
            .unwrap();
        assert!((back[0] - x[0]).abs() < 1e-12);
        assert!((back[1] - x[1]).abs() < 1e-12);
    }

    #[test]
    fn batch_and_single_agree() {
        let normalizer = Normalizer::new(vec![1.0, -1.0], vec![2.0, 4.0]).unwrap();
        let batch = array![[3.0, 7.0], [1.0, -1.0]];
        let out = normalizer.transform_batch(batch.view()).unwrap();

        assert_eq!(out.row(0).to_vec(), normalizer.transform(&[3.0, 7.0]).unwrap());
        assert_eq!(out.row(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn zero_scale_is_invalid() {
        assert!(Normalizer::new(vec![0.0], vec![0.0]).is_err());
        assert!(Normalizer::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }

    #[test]
    fn empty_dataset_cannot_be_fitted() {
        let data = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            Normalizer::fit(data.view(), 1e-8),
            Err(ModelError::EmptyDataset)
        ));
    }
}
