use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;
use crate::types::{ControlProposal, PolicyKind};

/// Persisted two-layer network parameters (row-major nested arrays).
///
/// `w1` is `inputs x hidden`, `w2` is `hidden x outputs`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ModelParameters {
    pub w1: Vec<Vec<f64>>,
    pub b1: Vec<f64>,
    pub w2: Vec<Vec<f64>>,
    pub b2: Vec<f64>,
}

/// Feed-forward inference policy: `relu(x·W1 + b1)·W2 + b2`.
///
/// The first output is an absolute current target, not a step.
#[derive(Clone, Debug)]
pub struct ModelPolicy {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array2<f64>,
    b2: Array1<f64>,
}

impl ModelPolicy {
    /// Loads parameters from a JSON file and checks they form a network with
    /// `n_features` inputs.
    pub fn load<P: AsRef<Path>>(path: P, n_features: usize) -> Result<Self, ControlError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ControlError::ModelUnavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let params: ModelParameters = serde_json::from_str(&text).map_err(|e| {
            ControlError::ModelUnavailable(format!("cannot parse {}: {e}", path.display()))
        })?;
        Self::from_parameters(params, n_features)
    }

    pub fn from_parameters(
        params: ModelParameters,
        n_features: usize,
    ) -> Result<Self, ControlError> {
        let w1 = to_matrix(params.w1, "w1")?;
        let w2 = to_matrix(params.w2, "w2")?;
        let b1 = Array1::from(params.b1);
        let b2 = Array1::from(params.b2);
        let shape_err = |what: String| Err(ControlError::ModelUnavailable(what));
        if w1.nrows() != n_features {
            return shape_err(format!(
                "w1 expects {} inputs, features have {n_features}",
                w1.nrows()
            ));
        }
        if b1.len() != w1.ncols() || w2.nrows() != w1.ncols() {
            return shape_err(format!(
                "hidden layer mismatch: w1 {:?}, b1 {}, w2 {:?}",
                w1.dim(),
                b1.len(),
                w2.dim()
            ));
        }
        if w2.ncols() == 0 || b2.len() != w2.ncols() {
            return shape_err(format!(
                "output layer mismatch: w2 {:?}, b2 {}",
                w2.dim(),
                b2.len()
            ));
        }
        let all_finite = w1.iter().chain(&b1).chain(&w2).chain(&b2).all(|v| v.is_finite());
        if !all_finite {
            return shape_err("parameters contain non-finite values".into());
        }
        Ok(Self { w1, b1, w2, b2 })
    }

    pub fn n_features(&self) -> usize {
        self.w1.nrows()
    }

    pub fn predict_ma(&self, features: &[f64]) -> f64 {
        let mut x = Array1::<f64>::zeros(self.n_features());
        for (slot, value) in x.iter_mut().zip(features) {
            *slot = *value;
        }
        let hidden = (x.dot(&self.w1) + &self.b1).mapv(|v| v.max(0.0));
        let output = hidden.dot(&self.w2) + &self.b2;
        output[0]
    }

    pub fn propose(&self, features: &[f64]) -> ControlProposal {
        ControlProposal::Absolute {
            kind: PolicyKind::Model,
            target_ma: self.predict_ma(features),
        }
    }
}

fn to_matrix(rows: Vec<Vec<f64>>, name: &str) -> Result<Array2<f64>, ControlError> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if n_rows == 0 || n_cols == 0 || rows.iter().any(|r| r.len() != n_cols) {
        return Err(ControlError::ModelUnavailable(format!(
            "{name} is empty or ragged"
        )));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|e| ControlError::ModelUnavailable(format!("{name}: {e}")))
}
