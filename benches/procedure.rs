use criterion::{black_box, criterion_group, criterion_main, Criterion};

use autotrace::autograd::{ForwardDefinition, Input, ProcedureFactory, Scope, Traced, Tracer};
use autotrace::config::{EngineConfig, WindowConfig};
use autotrace::{AutotraceResult, Sequence, Shape, Tensor, UnaryFunction};

struct ConvolutionBlock {
    filter: Tensor,
}

impl ForwardDefinition for ConvolutionBlock {
    fn inputs(&mut self, _reset_previous: bool) -> AutotraceResult<Vec<Input>> {
        Ok(vec![Input::single("Image", Tensor::zeros(Shape::new(28, 28, 1)))])
    }

    fn forward(&mut self, tracer: &mut Tracer, inputs: &[Traced]) -> AutotraceResult<Traced> {
        let filter = tracer.parameter(&self.filter);
        let features = tracer.convolve(inputs[0], filter, 1, 1)?;
        let activated = tracer.apply(features, UnaryFunction::Relu)?;
        let pooled = tracer.max_pool(activated, WindowConfig::new(2, 2, 2, 1)?)?;
        tracer.mean(pooled, Scope::PerIndex)
    }
}

struct Recurrence {
    weight: Tensor,
    steps: usize,
}

impl ForwardDefinition for Recurrence {
    fn inputs(&mut self, _reset_previous: bool) -> AutotraceResult<Vec<Input>> {
        let placeholder = Sequence::from_tensors((0..self.steps).map(|_| Tensor::zeros(Shape::new(1, 16, 1))).collect());
        Ok(vec![Input::sequence("Input", placeholder)])
    }

    fn forward(&mut self, tracer: &mut Tracer, inputs: &[Traced]) -> AutotraceResult<Traced> {
        let weight = tracer.parameter(&self.weight);
        let projected = tracer.dot(inputs[0], weight)?;
        let activated = tracer.apply(projected, UnaryFunction::Tanh)?;
        tracer.mean(activated, Scope::Sequence)
    }
}

fn bench_convolution(c: &mut Criterion) {
    let mut definition = ConvolutionBlock {
        filter: Tensor::filled(Shape::new(3, 3, 1), 0.1),
    };
    let mut procedure = ProcedureFactory::with_config(EngineConfig::default())
        .build(&mut definition)
        .unwrap();
    let image = Tensor::filled(Shape::new(28, 28, 1), 0.5);

    c.bench_function("convolution forward+backward", |b| {
        b.iter(|| {
            procedure.calculate_expression(black_box(&image)).unwrap();
            procedure.calculate_gradient(&Tensor::scalar(1.0)).unwrap()
        })
    });
}

fn bench_sequence(c: &mut Criterion) {
    let mut definition = Recurrence {
        weight: Tensor::filled(Shape::new(16, 16, 1), 0.01),
        steps: 32,
    };
    let mut procedure = ProcedureFactory::with_config(EngineConfig::default())
        .build(&mut definition)
        .unwrap();
    let inputs = [Sequence::from_tensors(
        (0..32).map(|_| Tensor::filled(Shape::new(1, 16, 1), 0.3)).collect(),
    )];
    let seed = Sequence::single(Tensor::ones(Shape::new(1, 16, 1)));

    c.bench_function("sequence forward+backward", |b| {
        b.iter(|| {
            procedure.forward(black_box(&inputs)).unwrap();
            procedure.backward(&seed).unwrap()
        })
    });
}

criterion_group!(benches, bench_convolution, bench_sequence);
criterion_main!(benches);
