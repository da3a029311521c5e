use autotrace::autograd::{ForwardDefinition, Input, ProcedureFactory, Scope, Traced, Tracer};
use autotrace::config::{EngineConfig, GradientCheckConfig, WindowConfig};
use autotrace::verification::{numerical_derivative, GradientChecker};
use autotrace::{AutotraceResult, Sequence, Shape, Tensor, UnaryFunction};

fn factory() -> ProcedureFactory {
    ProcedureFactory::with_config(EngineConfig::default())
}

/// Single input through a caller-supplied chain
struct Chain<F>
where
    F: FnMut(&mut Tracer, Traced) -> AutotraceResult<Traced>,
{
    shape: Shape,
    body: F,
}

impl<F> ForwardDefinition for Chain<F>
where
    F: FnMut(&mut Tracer, Traced) -> AutotraceResult<Traced>,
{
    fn inputs(&mut self, _reset_previous: bool) -> AutotraceResult<Vec<Input>> {
        Ok(vec![Input::single("Input", Tensor::ones(self.shape))])
    }

    fn forward(&mut self, tracer: &mut Tracer, inputs: &[Traced]) -> AutotraceResult<Traced> {
        (self.body)(tracer, inputs[0])
    }
}

#[test]
fn test_unary_derivatives_match_finite_differences() {
    let functions = [
        UnaryFunction::Sqrt,
        UnaryFunction::Exp,
        UnaryFunction::Log,
        UnaryFunction::Abs,
        UnaryFunction::Square,
        UnaryFunction::Reciprocal,
        UnaryFunction::Negate,
        UnaryFunction::Sigmoid,
        UnaryFunction::Tanh,
        UnaryFunction::Relu,
        UnaryFunction::LeakyRelu { alpha: 0.1 },
        UnaryFunction::Softplus,
    ];
    for function in functions {
        for x in [0.3, 0.9, 1.7, 2.5] {
            let numerical = numerical_derivative(|v| function.value(v), x, 1e-6);
            assert!(
                (function.derivative(x) - numerical).abs() < 1e-5,
                "{} at {}",
                function.name(),
                x
            );
        }
    }
}

#[test]
fn test_unary_expressions_pass_gradient_check() {
    let input = Tensor::from_vec(Shape::new(2, 2, 1), vec![0.4, 1.1, 2.3, 0.8]).unwrap();
    let checker = GradientChecker::new(&GradientCheckConfig::default());
    for function in [
        UnaryFunction::Sqrt,
        UnaryFunction::Log,
        UnaryFunction::Sigmoid,
        UnaryFunction::Tanh,
        UnaryFunction::Softplus,
        UnaryFunction::Reciprocal,
    ] {
        let mut definition = Chain {
            shape: Shape::new(2, 2, 1),
            body: move |tracer: &mut Tracer, x: Traced| tracer.apply(x, function),
        };
        let mut procedure = factory().build(&mut definition).unwrap();
        let report = checker
            .check(&mut procedure, &[Sequence::single(input.clone())])
            .unwrap();
        assert!(report.passed, "{}: {:?}", function.name(), report.mismatches);
    }
}

#[test]
fn test_forward_backward_twice_is_identical() {
    let mut definition = Chain {
        shape: Shape::new(2, 3, 1),
        body: |tracer: &mut Tracer, x: Traced| {
            let squared = tracer.apply(x, UnaryFunction::Square)?;
            let scaled = tracer.multiply_scalar(squared, 0.5)?;
            let activated = tracer.apply(scaled, UnaryFunction::Tanh)?;
            tracer.mean(activated, Scope::PerIndex)
        },
    };
    let mut procedure = factory().build(&mut definition).unwrap();
    let input = Sequence::single(Tensor::from_vec(Shape::new(2, 3, 1), vec![0.1, -0.4, 0.9, 1.3, -2.0, 0.0]).unwrap());
    let seed = Sequence::single(Tensor::scalar(1.0));

    let first_output = procedure.forward(&[input.clone()]).unwrap();
    let first_gradient = procedure.backward(&seed).unwrap();
    let second_output = procedure.forward(&[input]).unwrap();
    let second_gradient = procedure.backward(&seed).unwrap();

    assert_eq!(first_output.first().unwrap().data(), second_output.first().unwrap().data());
    assert_eq!(
        first_gradient[0].first().unwrap().data(),
        second_gradient[0].first().unwrap().data()
    );
}

#[test]
fn test_two_consumers_sum_their_partials() {
    let mut definition = Chain {
        shape: Shape::new(1, 3, 1),
        body: |tracer: &mut Tracer, x: Traced| {
            let exponential = tracer.apply(x, UnaryFunction::Exp)?;
            let squared = tracer.apply(x, UnaryFunction::Square)?;
            tracer.add(exponential, squared)
        },
    };
    let mut procedure = factory().build(&mut definition).unwrap();
    let input = Tensor::from_vec(Shape::new(1, 3, 1), vec![-1.0, 0.5, 2.0]).unwrap();
    procedure.calculate_expression(&input).unwrap();
    let gradient = procedure
        .calculate_gradient(&Tensor::ones(Shape::new(1, 3, 1)))
        .unwrap();
    for (column, &x) in input.data().iter().enumerate() {
        let expected = x.exp() + 2.0 * x;
        assert!((gradient.value(0, column, 0) - expected).abs() < 1e-12);
    }
}

#[test]
fn test_standard_deviation_of_one_to_four() {
    let mut definition = Chain {
        shape: Shape::new(1, 4, 1),
        body: |tracer: &mut Tracer, x: Traced| tracer.standard_deviation(x, Scope::PerIndex),
    };
    let mut procedure = factory().build(&mut definition).unwrap();
    let input = Tensor::from_vec(Shape::new(1, 4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();

    let output = procedure.calculate_expression(&input).unwrap();
    let std = output.scalar_value();
    assert!((std - 1.2910).abs() < 1e-4);

    let gradient = procedure.calculate_gradient(&Tensor::scalar(1.0)).unwrap();
    for (column, &x) in input.data().iter().enumerate() {
        let expected = (x - 2.5) * 2.0 / 3.0 * (0.5 / std);
        assert!((gradient.value(0, column, 0) - expected).abs() < 1e-12);
    }

    let report = GradientChecker::default()
        .with_tolerance(1e-4)
        .check(&mut procedure, &[Sequence::single(input)])
        .unwrap();
    assert!(report.passed, "{:?}", report.mismatches);
}

#[test]
fn test_max_pool_routes_gradient_to_maximum() {
    let config = WindowConfig::new(2, 2, 2, 1).unwrap();
    let mut definition = Chain {
        shape: Shape::new(4, 4, 1),
        body: move |tracer: &mut Tracer, x: Traced| tracer.max_pool(x, config),
    };
    let mut procedure = factory().build(&mut definition).unwrap();
    let mut input = Tensor::zeros(Shape::new(4, 4, 1));
    for row in 0..4 {
        for column in 0..4 {
            input.set_value(row, column, 0, (row * 4 + column) as f64 * 0.01);
        }
    }
    input.set_value(1, 2, 0, 9.0);

    let output = procedure.calculate_expression(&input).unwrap();
    assert_eq!(output.shape(), Shape::new(2, 2, 1));
    assert_eq!(output.value(0, 1, 0), 9.0);

    let mut seed = Tensor::zeros(Shape::new(2, 2, 1));
    seed.set_value(0, 1, 0, 1.0);
    let gradient = procedure.calculate_gradient(&seed).unwrap();
    for row in 0..2 {
        for column in 2..4 {
            let expected = if (row, column) == (1, 2) { 1.0 } else { 0.0 };
            assert_eq!(gradient.value(row, column, 0), expected);
        }
    }
    assert_eq!(gradient.data().iter().sum::<f64>(), 1.0);
}

#[test]
fn test_dropout_suppresses_and_rescales() {
    let mut definition = Chain {
        shape: Shape::new(6, 6, 1),
        body: |tracer: &mut Tracer, x: Traced| tracer.dropout(x, 0.5),
    };
    let mut procedure = factory().build(&mut definition).unwrap();
    let input = Tensor::filled(Shape::new(6, 6, 1), 1.5);
    let output = procedure.calculate_expression(&input).unwrap();
    let gradient = procedure
        .calculate_gradient(&Tensor::ones(Shape::new(6, 6, 1)))
        .unwrap();

    let mut suppressed = 0;
    for (&value, &grad) in output.data().iter().zip(gradient.data()) {
        if value == 0.0 {
            suppressed += 1;
            assert_eq!(grad, 0.0);
        } else {
            assert_eq!(value, 3.0);
            assert_eq!(grad, 2.0);
        }
    }
    assert!(suppressed > 0 && suppressed < 36);
}

#[test]
fn test_convolution_sums_receptive_field() {
    let mut definition = ConvolutionDefinition {
        filter: Tensor::ones(Shape::new(3, 3, 1)),
    };
    let mut procedure = factory().build(&mut definition).unwrap();
    let input = Tensor::from_vec(Shape::new(5, 5, 1), (0..25).map(f64::from).collect()).unwrap();
    let output = procedure.calculate_expression(&input).unwrap();

    assert_eq!(output.shape(), Shape::new(3, 3, 1));
    for row in 0..3 {
        for column in 0..3 {
            let mut expected = 0.0;
            for i in 0..3 {
                for j in 0..3 {
                    expected += input.value(row + i, column + j, 0);
                }
            }
            assert_eq!(output.value(row, column, 0), expected);
        }
    }
}

struct ConvolutionDefinition {
    filter: Tensor,
}

impl ForwardDefinition for ConvolutionDefinition {
    fn inputs(&mut self, _reset_previous: bool) -> AutotraceResult<Vec<Input>> {
        Ok(vec![Input::single("Image", Tensor::zeros(Shape::new(5, 5, 1)))])
    }

    fn forward(&mut self, tracer: &mut Tracer, inputs: &[Traced]) -> AutotraceResult<Traced> {
        let filter = tracer.parameter(&self.filter);
        tracer.convolve(inputs[0], filter, 1, 1)
    }
}
