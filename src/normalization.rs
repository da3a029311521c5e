//! Weight normalization `w·g / ‖w‖₂`
//!
//! Each weight tensor gets its own procedure, traced the first time the
//! weight is seen and reused afterwards. `forward` swaps the weight for its
//! normalized form in place and `forward_finalize` swaps the original back.

use std::collections::HashMap;

use tracing::debug;

use crate::autograd::{ForwardDefinition, Input, Procedure, ProcedureFactory, Traced, Tracer};
use crate::error::{AutotraceError, AutotraceResult};
use crate::tensor::{Tensor, TensorId};

#[derive(Debug)]
pub struct WeightNormalization {
    g: f64,
    factory: ProcedureFactory,
    input: Option<Tensor>,
    weights: HashMap<TensorId, Tensor>,
    procedures: HashMap<TensorId, Procedure>,
}

impl WeightNormalization {
    pub fn new() -> Self {
        Self::with_factory(ProcedureFactory::new())
    }

    pub fn with_factory(factory: ProcedureFactory) -> Self {
        Self {
            g: 1.0,
            factory,
            input: None,
            weights: HashMap::new(),
            procedures: HashMap::new(),
        }
    }

    pub fn with_g(mut self, g: f64) -> Self {
        self.g = g;
        self
    }

    pub fn g(&self) -> f64 {
        self.g
    }

    /// Traces the procedure for `weight` unless one already exists.
    pub fn initialize(&mut self, weight: &Tensor) -> AutotraceResult<()> {
        if self.procedures.contains_key(&weight.id()) {
            return Ok(());
        }
        self.input = Some(weight.clone());
        let factory = self.factory.clone();
        let procedure = factory.build(self)?;
        self.input = None;
        debug!("Initialized weight normalization for tensor {}", weight.id());
        self.procedures.insert(weight.id(), procedure);
        Ok(())
    }

    fn procedure(&mut self, weight: &Tensor) -> AutotraceResult<&mut Procedure> {
        self.procedures.get_mut(&weight.id()).ok_or_else(|| {
            AutotraceError::InvalidState(format!("Weight normalization not initialized for tensor {}", weight.id()))
        })
    }

    /// Replaces `weight` with its normalized value, keeping the original for [`Self::forward_finalize`].
    pub fn forward(&mut self, weight: &mut Tensor) -> AutotraceResult<()> {
        self.initialize(weight)?;
        self.weights.insert(weight.id(), weight.clone());
        let procedure = self.procedure(weight)?;
        procedure.reset();
        let normalized = procedure.calculate_expression(weight)?;
        weight.copy_from(&normalized)
    }

    /// Restores the value `weight` held before the last [`Self::forward`].
    pub fn forward_finalize(&mut self, weight: &mut Tensor) -> AutotraceResult<()> {
        let original = self.weights.get(&weight.id()).ok_or_else(|| {
            AutotraceError::InvalidState(format!("No stored original for tensor {}", weight.id()))
        })?;
        weight.copy_from(original)
    }

    /// Maps the gradient w.r.t. the normalized weight onto the original weight.
    pub fn backward(&mut self, weight: &Tensor, weight_gradient: &mut Tensor) -> AutotraceResult<()> {
        let procedure = self.procedure(weight)?;
        let gradient = procedure.calculate_gradient(weight_gradient)?;
        weight_gradient.copy_from(&gradient)
    }

    /// Forgets stored originals and every traced procedure.
    pub fn reset(&mut self) {
        self.weights.clear();
        self.procedures.clear();
    }

    /// Drops the state kept for `weight`, typically after it was replaced.
    pub fn remove(&mut self, weight: &Tensor) {
        self.weights.remove(&weight.id());
        self.procedures.remove(&weight.id());
    }

    pub fn expression_chains(&self) -> Vec<String> {
        self.procedures.values().map(Procedure::expression_chain).collect()
    }
}

impl Default for WeightNormalization {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardDefinition for WeightNormalization {
    fn inputs(&mut self, _reset_previous: bool) -> AutotraceResult<Vec<Input>> {
        let input = self
            .input
            .clone()
            .ok_or_else(|| AutotraceError::InvalidState("No weight to trace".to_string()))?;
        Ok(vec![Input::single("Weight", input)])
    }

    fn forward(&mut self, tracer: &mut Tracer, inputs: &[Traced]) -> AutotraceResult<Traced> {
        let weight = inputs[0];
        let g = tracer.constant(&Tensor::scalar(self.g).with_name("g"));
        let scaled = tracer.multiply(weight, g)?;
        let norm = tracer.norm(weight, 2.0)?;
        let output = tracer.divide(scaled, norm)?;
        tracer.set_name(output, "Output");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::tensor::Shape;

    fn normalization() -> WeightNormalization {
        WeightNormalization::with_factory(ProcedureFactory::with_config(EngineConfig::default()))
    }

    #[test]
    fn test_forward_and_finalize() {
        let mut weight = Tensor::from_vec(Shape::new(1, 2, 1), vec![3.0, 4.0]).unwrap();
        let id = weight.id();
        let mut normalization = normalization().with_g(2.0);

        normalization.forward(&mut weight).unwrap();
        assert_eq!(weight.id(), id);
        assert!((weight.value(0, 0, 0) - 1.2).abs() < 1e-12);
        assert!((weight.value(0, 1, 0) - 1.6).abs() < 1e-12);

        normalization.forward_finalize(&mut weight).unwrap();
        assert_eq!(weight.data(), &[3.0, 4.0]);
    }

    #[test]
    fn test_backward_projects_out_weight_direction() {
        let mut weight = Tensor::from_vec(Shape::new(1, 2, 1), vec![3.0, 4.0]).unwrap();
        let mut normalization = normalization();
        normalization.forward(&mut weight).unwrap();
        normalization.forward_finalize(&mut weight).unwrap();

        let mut gradient = Tensor::from_vec(Shape::new(1, 2, 1), vec![1.0, 0.0]).unwrap();
        normalization.backward(&weight, &mut gradient).unwrap();
        // (dy − ŵ(ŵ·dy)) / ‖w‖
        assert!((gradient.value(0, 0, 0) - 0.128).abs() < 1e-12);
        assert!((gradient.value(0, 1, 0) + 0.096).abs() < 1e-12);
    }

    #[test]
    fn test_procedure_traced_once_per_weight() {
        let mut first = Tensor::ones(Shape::new(2, 2, 1));
        let mut second = Tensor::ones(Shape::new(3, 1, 1));
        let mut normalization = normalization();
        normalization.forward(&mut first).unwrap();
        normalization.forward_finalize(&mut first).unwrap();
        normalization.forward(&mut first).unwrap();
        normalization.forward(&mut second).unwrap();
        assert_eq!(normalization.expression_chains().len(), 2);
    }

    #[test]
    fn test_reset_releases_procedures() {
        let mut normalization = normalization();
        for _ in 0..5 {
            let mut weight = Tensor::ones(Shape::new(2, 2, 1));
            normalization.forward(&mut weight).unwrap();
            normalization.forward_finalize(&mut weight).unwrap();
            normalization.reset();
        }
        assert!(normalization.expression_chains().is_empty());

        let mut weight = Tensor::ones(Shape::new(2, 2, 1));
        normalization.forward(&mut weight).unwrap();
        normalization.forward_finalize(&mut weight).unwrap();
        normalization.remove(&weight);
        assert!(normalization.expression_chains().is_empty());
        let error = normalization.forward_finalize(&mut weight).unwrap_err();
        assert!(matches!(error, AutotraceError::InvalidState(_)));
    }

    #[test]
    fn test_backward_before_forward_fails() {
        let weight = Tensor::ones(Shape::new(2, 2, 1));
        let mut gradient = Tensor::ones(Shape::new(2, 2, 1));
        let error = normalization().backward(&weight, &mut gradient).unwrap_err();
        assert!(matches!(error, AutotraceError::InvalidState(_)));
    }
}
