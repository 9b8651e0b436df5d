//! # Optimizers
//!
//! Optimizers update an ordered collection of parameter tensors from a
//! gradient collection in the same order. Stateful optimizers size their
//! per-parameter state from the tensors they are bound to and refuse to step
//! any other collection.

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Zip};
use serde::{Serialize, Deserialize};

use crate::error::{DeepQError, Result};

pub trait Optimizer {
    /// Apply one update step to `params` in place.
    ///
    /// Either every tensor is updated or, on error, none is.
    fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, gradients: &[ArrayD<f32>], learning_rate: f32) -> Result<()>;
}

/// Which optimizer an agent binds to its online network
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Sgd,
    Adam { beta1: f32, beta2: f32, epsilon: f32 },
}

impl Default for OptimizerKind {
    fn default() -> Self {
        OptimizerKind::Adam { beta1: 0.9, beta2: 0.999, epsilon: 1e-8 }
    }
}

impl OptimizerKind {
    /// Build the optimizer with state sized for `params`
    pub fn bind(&self, params: &[ArrayViewD<'_, f32>]) -> OptimizerWrapper {
        match *self {
            OptimizerKind::Sgd => OptimizerWrapper::SGD(SGD::new()),
            OptimizerKind::Adam { beta1, beta2, epsilon } => {
                OptimizerWrapper::Adam(Adam::new(params, beta1, beta2, epsilon))
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl Optimizer for OptimizerWrapper {
    fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, gradients: &[ArrayD<f32>], learning_rate: f32) -> Result<()> {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.step(params, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.step(params, gradients, learning_rate),
        }
    }
}

/// Check that parameters and gradients pair up one to one with equal shapes.
pub fn check_pairing(params: &[ArrayViewMutD<'_, f32>], gradients: &[ArrayD<f32>]) -> Result<()> {
    if params.len() != gradients.len() {
        return Err(DeepQError::dimension_mismatch(
            format!("{} gradient tensors", params.len()),
            format!("{} gradient tensors", gradients.len()),
        ));
    }
    for (index, (param, grad)) in params.iter().zip(gradients).enumerate() {
        if param.shape() != grad.shape() {
            return Err(DeepQError::dimension_mismatch(
                format!("parameter {} with shape {:?}", index, param.shape()),
                format!("gradient shape {:?}", grad.shape()),
            ));
        }
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SGD;

impl SGD {
    pub fn new() -> SGD {
        SGD
    }
}

impl Optimizer for SGD {
    fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, gradients: &[ArrayD<f32>], learning_rate: f32) -> Result<()> {
        check_pairing(&params, gradients)?;
        for (mut param, grad) in params.into_iter().zip(gradients) {
            param.zip_mut_with(grad, |w, &g| *w -= learning_rate * g);
        }
        Ok(())
    }
}

/// Adam with bias-corrected first and second moment estimates per parameter tensor
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    m: Vec<ArrayD<f32>>,
    v: Vec<ArrayD<f32>>,
    /// Number of completed steps
    pub t: u32,
}

impl Adam {
    pub fn new(params: &[ArrayViewD<'_, f32>], beta1: f32, beta2: f32, epsilon: f32) -> Self {
        let m = params.iter().map(|p| ArrayD::<f32>::zeros(p.raw_dim())).collect();
        let v = params.iter().map(|p| ArrayD::<f32>::zeros(p.raw_dim())).collect();

        Adam { beta1, beta2, epsilon, m, v, t: 0 }
    }

    pub fn default(params: &[ArrayViewD<'_, f32>]) -> Self {
        Self::new(params, 0.9, 0.999, 1e-8)
    }

    /// First-moment estimates, one per bound parameter
    pub fn first_moments(&self) -> &[ArrayD<f32>] {
        &self.m
    }

    fn check_state(&self, params: &[ArrayViewMutD<'_, f32>]) -> Result<()> {
        if params.len() != self.m.len() {
            return Err(DeepQError::dimension_mismatch(
                format!("{} bound parameters", self.m.len()),
                format!("{} parameters", params.len()),
            ));
        }
        for (index, (param, m)) in params.iter().zip(&self.m).enumerate() {
            if param.shape() != m.shape() {
                return Err(DeepQError::dimension_mismatch(
                    format!("parameter {} with shape {:?}", index, m.shape()),
                    format!("shape {:?}", param.shape()),
                ));
            }
        }
        Ok(())
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: Vec<ArrayViewMutD<'_, f32>>, gradients: &[ArrayD<f32>], learning_rate: f32) -> Result<()> {
        check_pairing(&params, gradients)?;
        self.check_state(&params)?;

        self.t = self.t.saturating_add(1);
        let t = self.t.min(i32::MAX as u32) as i32;
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for (((param, m), v), grad) in params.into_iter().zip(&mut self.m).zip(&mut self.v).zip(gradients) {
            Zip::from(param).and(m).and(v).and(grad).for_each(|w, m, v, &g| {
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / bias1;
                let v_hat = *v / bias2;
                *w -= learning_rate * m_hat / (v_hat.sqrt() + epsilon);
            });
        }
        Ok(())
    }
}
