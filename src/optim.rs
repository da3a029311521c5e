use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::{AutotraceError, AutotraceResult},
    tensor::{Tensor, TensorId},
};

/// Base trait for all optimizers
///
/// An optimizer updates a tensor in place from its gradient. State such as
/// momentum is kept per tensor, keyed by the tensor's identity.
pub trait Optimizer {
    /// Update `parameter` in place using `gradient`
    fn optimize(&mut self, parameter: &mut Tensor, gradient: &Tensor) -> AutotraceResult<()>;

    /// Forget every per-tensor state
    fn reset(&mut self);

    /// Get current learning rate
    fn learning_rate(&self) -> f64;

    /// Set learning rate
    fn set_learning_rate(&mut self, learning_rate: f64);

    fn name(&self) -> &'static str;
}

fn check_shapes(optimizer: &str, parameter: &Tensor, gradient: &Tensor) -> AutotraceResult<()> {
    if parameter.shape() != gradient.shape() {
        return Err(AutotraceError::dimension_mismatch(
            optimizer,
            &parameter.shape().to_string(),
            &gradient.shape().to_string(),
        ));
    }
    Ok(())
}

/// Moment buffers kept for one tensor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step_count: usize,
    pub momentum: Vec<f64>,
    pub variance: Vec<f64>,
}

impl OptimizerState {
    fn new(size: usize) -> Self {
        Self {
            step_count: 0,
            momentum: vec![0.0; size],
            variance: vec![0.0; size],
        }
    }
}

/// Plain gradient descent: `θ ← θ − η·g`
#[derive(Debug, Clone)]
pub struct GradientDescent {
    lr: f64,
}

impl GradientDescent {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Default for GradientDescent {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Optimizer for GradientDescent {
    fn optimize(&mut self, parameter: &mut Tensor, gradient: &Tensor) -> AutotraceResult<()> {
        check_shapes(self.name(), parameter, gradient)?;
        for (p, &g) in parameter.data_mut().iter_mut().zip(gradient.data()) {
            *p -= self.lr * g;
        }
        Ok(())
    }

    fn reset(&mut self) {}

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.lr = learning_rate;
    }

    fn name(&self) -> &'static str {
        "GradientDescent"
    }
}

/// Nesterov accelerated gradient in velocity form
///
/// `v_t = μ·v_{t−1} − η·g` and `θ ← θ − μ·v_{t−1} + (1 + μ)·v_t`.
#[derive(Debug, Clone)]
pub struct NesterovAcceleratedGradient {
    lr: f64,
    momentum: f64,
    states: HashMap<TensorId, OptimizerState>,
}

impl NesterovAcceleratedGradient {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            momentum: 0.9,
            states: HashMap::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn state(&self, parameter: &Tensor) -> Option<&OptimizerState> {
        self.states.get(&parameter.id())
    }
}

impl Default for NesterovAcceleratedGradient {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Optimizer for NesterovAcceleratedGradient {
    fn optimize(&mut self, parameter: &mut Tensor, gradient: &Tensor) -> AutotraceResult<()> {
        check_shapes(self.name(), parameter, gradient)?;
        let state = self
            .states
            .entry(parameter.id())
            .or_insert_with(|| OptimizerState::new(gradient.size()));
        state.step_count += 1;

        for ((p, &g), v) in parameter
            .data_mut()
            .iter_mut()
            .zip(gradient.data())
            .zip(state.momentum.iter_mut())
        {
            let previous = *v;
            *v = self.momentum * previous - self.lr * g;
            *p += -self.momentum * previous + (1.0 + self.momentum) * *v;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.states.clear();
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.lr = learning_rate;
    }

    fn name(&self) -> &'static str {
        "NesterovAcceleratedGradient"
    }
}

/// Adam with Nesterov momentum
#[derive(Debug, Clone)]
pub struct NAdam {
    lr: f64,
    betas: (f64, f64),
    eps: f64,
    states: HashMap<TensorId, OptimizerState>,
}

impl NAdam {
    pub fn new(lr: f64) -> Self {
        Self {
            lr,
            betas: (0.9, 0.999),
            eps: 1e-8,
            states: HashMap::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.betas = (beta1, beta2);
        self
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn state(&self, parameter: &Tensor) -> Option<&OptimizerState> {
        self.states.get(&parameter.id())
    }
}

impl Default for NAdam {
    fn default() -> Self {
        Self::new(0.001)
    }
}

impl Optimizer for NAdam {
    fn optimize(&mut self, parameter: &mut Tensor, gradient: &Tensor) -> AutotraceResult<()> {
        check_shapes(self.name(), parameter, gradient)?;
        let (beta1, beta2) = self.betas;
        let state = self
            .states
            .entry(parameter.id())
            .or_insert_with(|| OptimizerState::new(gradient.size()));
        state.step_count += 1;
        let step = state.step_count as i32;

        let bias_correction1 = 1.0 - beta1.powi(step);
        let next_bias_correction1 = 1.0 - beta1.powi(step + 1);
        let bias_correction2 = 1.0 - beta2.powi(step);

        let OptimizerState {
            momentum, variance, ..
        } = state;
        for (((p, &g), m), v) in parameter
            .data_mut()
            .iter_mut()
            .zip(gradient.data())
            .zip(momentum.iter_mut())
            .zip(variance.iter_mut())
        {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;

            let m_hat = beta1 * *m / next_bias_correction1 + (1.0 - beta1) * g / bias_correction1;
            let v_hat = *v / bias_correction2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.states.clear();
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.lr = learning_rate;
    }

    fn name(&self) -> &'static str {
        "NAdam"
    }
}
