use std::collections::HashMap;
use std::sync::Arc;

use staticrt::ir::parse_graph;
use staticrt::runtime::{InferenceModule, InferenceModuleOptions, RuntimeError, StaticRuntime};
use staticrt::schema::{Argument, FunctionSchema};
use staticrt::tensor::{IValue, Tensor};

fn runtime_for(source: &str, opts: InferenceModuleOptions) -> StaticRuntime {
    let graph = parse_graph(source).expect("valid graph");
    let module = Arc::new(InferenceModule::from_graph(&graph, opts).expect("eligible graph"));
    StaticRuntime::new(module).expect("runtime construction")
}

#[test]
fn add_two_tensors() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %c = aten::add(%a, %b)
          return (%c)
        "#,
        InferenceModuleOptions::default(),
    );
    let out = runtime
        .run_tensors(&[
            Tensor::from_f32(vec![1.0, 2.0, 3.0]),
            Tensor::from_f32(vec![4.0, 5.0, 6.0]),
        ])
        .unwrap();
    assert_eq!(out[0].to_vec_f32().unwrap(), vec![5.0, 7.0, 9.0]);

    // With cleanup enabled, the post-run invariant holds: inputs are none and
    // no managed storage retains data.
    runtime.check_for_memory_leak(true);
}

#[test]
fn list_output_elements_share_one_tensor() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %c = aten::add(%a, %a)
          %list = prim::ListConstruct(%c, %c)
          return (%list)
        "#,
        InferenceModuleOptions::default(),
    );
    let out = runtime
        .run(
            vec![
                IValue::Tensor(Tensor::from_f32(vec![1.0])),
                IValue::Tensor(Tensor::from_f32(vec![1.0])),
            ],
            &HashMap::new(),
        )
        .unwrap();
    let IValue::List(items) = out else {
        panic!("expected a list output");
    };
    assert_eq!(items.len(), 2);
    let first = items[0].as_tensor().unwrap();
    let second = items[1].as_tensor().unwrap();
    assert_eq!(first.to_vec_f32().unwrap(), vec![2.0]);
    assert_eq!(second.to_vec_f32().unwrap(), vec![2.0]);
    assert!(
        first.storage().same_impl(second.storage()),
        "both elements alias the same tensor"
    );
}

#[test]
fn tuple_of_inputs_round_trips() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %t = prim::TupleConstruct(%a, %b)
          return (%t)
        "#,
        InferenceModuleOptions::default(),
    );
    let out = runtime
        .run_tensors(&[
            Tensor::from_f32(vec![1.0]),
            Tensor::from_f32(vec![2.0]),
        ])
        .unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[1].to_vec_f32().unwrap(), vec![2.0]);
}

#[test]
fn list_unpack_round_trips() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %list = prim::ListConstruct(%a, %b)
          %x, %y = prim::ListUnpack(%list)
          %z = aten::add(%x, %y)
          return (%z)
        "#,
        InferenceModuleOptions::default(),
    );
    let out = runtime
        .run_tensors(&[
            Tensor::from_f32(vec![1.0, 2.0]),
            Tensor::from_f32(vec![10.0, 20.0]),
        ])
        .unwrap();
    assert_eq!(out[0].to_vec_f32().unwrap(), vec![11.0, 22.0]);
}

#[test]
fn sum_with_dim_and_keepdim() {
    let mut runtime = runtime_for(
        r#"
        graph(%a):
          %dim : int = prim::Constant[value=0]()
          %keep : bool = prim::Constant[value=true]()
          %b = aten::sum(%a, %dim, %keep)
          return (%b)
        "#,
        InferenceModuleOptions::default(),
    );
    let input = Tensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let out = runtime.run_tensors(&[input]).unwrap();
    assert_eq!(out[0].shape().dims(), &[1, 2]);
    assert_eq!(out[0].to_vec_f32().unwrap(), vec![4.0, 6.0]);
}

#[test]
fn kwargs_without_schema_fail() {
    let mut runtime = runtime_for(
        r#"
        graph(%a):
          %b = aten::relu(%a)
          return (%b)
        "#,
        InferenceModuleOptions::default(),
    );
    let kwargs = HashMap::from([(
        "a".to_owned(),
        IValue::Tensor(Tensor::from_f32(vec![1.0])),
    )]);
    let err = runtime.run(vec![], &kwargs).unwrap_err();
    assert!(matches!(err, RuntimeError::SchemaRequired));
}

#[test]
fn kwargs_with_schema_normalise() {
    let graph = parse_graph(
        r#"
        graph(%self : Module, %a, %b):
          %c = aten::sub(%a, %b)
          return (%c)
        "#,
    )
    .unwrap();
    let schema = FunctionSchema::new(
        "forward",
        vec![
            Argument::new("self"),
            Argument::new("a"),
            Argument::new("b"),
        ],
    );
    let module = Arc::new(
        InferenceModule::from_method(&graph, &schema, InferenceModuleOptions::default()).unwrap(),
    );
    let mut runtime = StaticRuntime::new(module).unwrap();

    let kwargs = HashMap::from([(
        "b".to_owned(),
        IValue::Tensor(Tensor::from_f32(vec![1.0, 1.0])),
    )]);
    let out = runtime
        .run(
            vec![IValue::Tensor(Tensor::from_f32(vec![5.0, 7.0]))],
            &kwargs,
        )
        .unwrap();
    assert_eq!(
        out.as_tensor().unwrap().to_vec_f32().unwrap(),
        vec![4.0, 6.0]
    );
}

#[test]
fn unfrozen_graph_is_rejected() {
    let graph = parse_graph(
        r#"
        graph(%self : Module):
          %w = prim::GetAttr(%self)
          return (%w)
        "#,
    )
    .unwrap();
    let err = InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::UnfrozenGraph));
}

#[test]
fn dict_output_is_rejected() {
    let graph = parse_graph(
        r#"
        graph(%a):
          %d : Dict[str, Tensor] = custom::make_dict(%a)
          return (%d)
        "#,
    )
    .unwrap();
    let err = InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap_err();
    match err {
        RuntimeError::UnsupportedOutputType(ty) => assert!(ty.contains("Dict")),
        other => panic!("expected UnsupportedOutputType, got {other:?}"),
    }
}

#[test]
fn list_of_non_tensors_is_rejected() {
    let graph = parse_graph(
        r#"
        graph(%a):
          %i : int = prim::Constant[value=3]()
          %list = prim::ListConstruct(%i, %i)
          return (%list)
        "#,
    )
    .unwrap();
    let err = InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap_err();
    assert!(matches!(err, RuntimeError::UnsupportedOutputType(_)));
}

#[test]
fn repeated_runs_are_idempotent() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %c = aten::add(%a, %b)
          %d = aten::mul(%c, %c)
          %e = aten::sigmoid(%d)
          return (%e)
        "#,
        InferenceModuleOptions::default(),
    );
    let inputs = [
        Tensor::from_f32(vec![0.5, -1.5, 2.0]),
        Tensor::from_f32(vec![1.0, 0.25, -0.75]),
    ];
    let first = runtime.run_tensors(&inputs).unwrap()[0]
        .to_vec_f32()
        .unwrap();
    for _ in 0..4 {
        let again = runtime.run_tensors(&inputs).unwrap()[0]
            .to_vec_f32()
            .unwrap();
        assert_eq!(again, first);
    }
}

#[test]
fn optimised_and_plain_configurations_agree() {
    use rand::Rng;

    let source = r#"
        graph(%inp, %shape : int[]):
          %a = aten::add(%inp, %inp)
          %c = aten::reshape(%a, %shape)
          %d = aten::add(%c, %c)
          %e = aten::mul(%d, %d)
          %f = aten::sum(%e)
          return (%f)
    "#;
    let mut optimised = runtime_for(source, InferenceModuleOptions::default());
    let mut plain = runtime_for(
        source,
        InferenceModuleOptions {
            optimize_memory: false,
            enable_out_variant: false,
            cleanup_activations: false,
        },
    );

    let mut rng = rand::thread_rng();
    for _ in 0..8 {
        let data: Vec<f32> = (0..12).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let args = vec![
            IValue::Tensor(Tensor::from_vec(vec![3, 4], data).unwrap()),
            IValue::IntList(vec![2, 6]),
        ];
        let lhs = optimised.run(args.clone(), &HashMap::new()).unwrap();
        let rhs = plain.run(args, &HashMap::new()).unwrap();
        assert_eq!(
            lhs.as_tensor().unwrap().to_vec_f32().unwrap(),
            rhs.as_tensor().unwrap().to_vec_f32().unwrap()
        );
    }
}

#[test]
fn benchmark_surfaces_report() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %c = aten::add(%a, %b)
          %d = aten::mul(%c, %c)
          return (%d)
        "#,
        InferenceModuleOptions::default(),
    );
    let args = vec![
        IValue::Tensor(Tensor::from_f32(vec![1.0, 2.0])),
        IValue::Tensor(Tensor::from_f32(vec![3.0, 4.0])),
    ];
    let per_iter = runtime
        .benchmark_model(&args, &HashMap::new(), 2, 5)
        .unwrap();
    assert!(per_iter >= 0.0);

    let metrics = runtime
        .benchmark_individual_ops(&args, &HashMap::new(), 1, 3)
        .unwrap();
    assert_eq!(metrics.time_per_node.len(), 2);
    assert_eq!(metrics.instances_per_node_type["aten::add"], 1);
    assert_eq!(metrics.instances_per_node_type["aten::mul"], 1);
    let percent_total: f64 = metrics.percent_per_node_type.values().sum();
    assert!((percent_total - 100.0).abs() < 1e-6);
}
