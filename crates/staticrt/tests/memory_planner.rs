use std::collections::HashMap;
use std::sync::Arc;

use staticrt::ir::parse_graph;
use staticrt::runtime::{InferenceModule, InferenceModuleOptions, StaticRuntime};
use staticrt::tensor::{IValue, Tensor, ALIGNMENT};

const RESHAPE_CHAIN: &str = r#"
    graph(%inp, %shape : int[]):
      %a = aten::add(%inp, %inp)
      %b = aten::reshape(%a, %shape)
      %c = aten::reshape(%a, %shape)
      %d = aten::add(%c, %c)
      %e = aten::add(%d, %d)
      %f = aten::mul(%e, %e)
      %g = aten::mul(%f, %f)
      %h = aten::reshape(%b, %shape)
      return (%h, %g)
"#;

fn runtime_for(source: &str, opts: InferenceModuleOptions) -> StaticRuntime {
    let graph = parse_graph(source).expect("valid graph");
    let module = Arc::new(InferenceModule::from_graph(&graph, opts).expect("eligible graph"));
    StaticRuntime::new(module).expect("runtime construction")
}

fn reshape_args() -> Vec<IValue> {
    let data: Vec<f32> = (0..8).map(|i| i as f32).collect();
    vec![
        IValue::Tensor(Tensor::from_vec(vec![2, 4], data).unwrap()),
        IValue::IntList(vec![4, 2]),
    ]
}

#[test]
fn managed_bytes_reaches_a_fixed_point() {
    let mut runtime = runtime_for(RESHAPE_CHAIN, InferenceModuleOptions::default());

    // First invocation is the allocation-free dry run that sizes the plan.
    runtime.run(reshape_args(), &HashMap::new()).unwrap();
    let after_first = runtime.total_managed();
    assert!(after_first > 0, "intermediates must be pooled");
    assert_eq!(after_first % ALIGNMENT, 0);

    // From the second invocation on, the plan is at its high-water mark.
    runtime.run(reshape_args(), &HashMap::new()).unwrap();
    let after_second = runtime.total_managed();
    assert_eq!(after_second, after_first, "fixed point reached");

    runtime.run(reshape_args(), &HashMap::new()).unwrap();
    assert_eq!(runtime.total_managed(), after_second);
}

#[test]
fn managed_bytes_grows_monotonically_with_input_size() {
    let mut runtime = runtime_for(RESHAPE_CHAIN, InferenceModuleOptions::default());
    runtime.run(reshape_args(), &HashMap::new()).unwrap();
    let small = runtime.total_managed();

    // Larger inputs force the groups to regrow; the high-water mark never
    // shrinks afterwards.
    let data: Vec<f32> = (0..32).map(|i| i as f32).collect();
    let big_args = vec![
        IValue::Tensor(Tensor::from_vec(vec![4, 8], data).unwrap()),
        IValue::IntList(vec![8, 4]),
    ];
    runtime.run(big_args, &HashMap::new()).unwrap();
    let big = runtime.total_managed();
    assert!(big >= small);

    runtime.run(reshape_args(), &HashMap::new()).unwrap();
    assert!(
        runtime.total_managed() >= big,
        "high-water mark is monotone even after smaller runs"
    );
}

#[test]
fn group_sizes_sum_to_managed_bytes() {
    let mut runtime = runtime_for(RESHAPE_CHAIN, InferenceModuleOptions::default());
    runtime.run(reshape_args(), &HashMap::new()).unwrap();
    runtime.run(reshape_args(), &HashMap::new()).unwrap();

    let plan = runtime.memory_plan().expect("plan exists after cleanup");
    let total: usize = (0..plan.group_count()).map(|i| plan.group_size(i)).sum();
    assert_eq!(total, plan.total_managed());
    // The default group reports its size like any other group.
    assert_eq!(plan.group_size(0) % ALIGNMENT, 0);
}

#[test]
fn memory_optimisation_shares_storage_groups() {
    let mut pooled = runtime_for(RESHAPE_CHAIN, InferenceModuleOptions::default());
    let mut unpooled = runtime_for(
        RESHAPE_CHAIN,
        InferenceModuleOptions {
            optimize_memory: false,
            ..InferenceModuleOptions::default()
        },
    );
    pooled.run(reshape_args(), &HashMap::new()).unwrap();
    unpooled.run(reshape_args(), &HashMap::new()).unwrap();
    assert!(
        pooled.total_managed() <= unpooled.total_managed(),
        "liveness-derived sharing can only shrink the pool"
    );
    assert!(
        pooled.memory_plan().unwrap().group_count()
            <= unpooled.memory_plan().unwrap().group_count()
    );
}

#[test]
fn cleanup_disabled_keeps_no_planner() {
    let mut runtime = runtime_for(
        r#"
        graph(%a, %b):
          %c = aten::add(%a, %b)
          %d = aten::mul(%c, %c)
          return (%d)
        "#,
        InferenceModuleOptions {
            cleanup_activations: false,
            ..InferenceModuleOptions::default()
        },
    );
    let out = runtime
        .run_tensors(&[
            Tensor::from_f32(vec![1.0, 2.0]),
            Tensor::from_f32(vec![3.0, 4.0]),
        ])
        .unwrap();
    assert_eq!(out[0].to_vec_f32().unwrap(), vec![16.0, 36.0]);
    assert!(runtime.memory_plan().is_none());
    assert_eq!(runtime.total_managed(), 0);
}

#[test]
fn replace_with_copy_preserves_outputs_and_manages_the_copy() {
    let source = r#"
        graph(%a):
          %dims : int[] = prim::Constant[value=[1, 0]]()
          %b = aten::permute(%a, %dims)
          %c = aten::relu(%b)
          return (%c)
    "#;
    let mut with_copy = runtime_for(source, InferenceModuleOptions::default());
    let mut without = runtime_for(
        source,
        InferenceModuleOptions {
            optimize_memory: false,
            enable_out_variant: false,
            cleanup_activations: false,
        },
    );

    // The optimize_memory configuration rewrote permute to its copy variant.
    let module_kinds: Vec<&str> = with_copy
        .module()
        .graph()
        .nodes()
        .map(|n| with_copy.module().graph().kind(n).as_str())
        .collect();
    assert!(module_kinds.contains(&"static_runtime::permute_copy"));

    let input = Tensor::from_vec(vec![2, 3], vec![1.0f32, -2.0, 3.0, -4.0, 5.0, -6.0]).unwrap();
    let expected = without.run_tensors(&[input.clone()]).unwrap()[0]
        .to_vec_f32()
        .unwrap();
    for _ in 0..3 {
        let actual = with_copy.run_tensors(&[input.clone()]).unwrap()[0]
            .to_vec_f32()
            .unwrap();
        assert_eq!(actual, expected);
    }
    // The copy's output is a managed intermediate, so the pool is non-empty.
    assert!(with_copy.total_managed() > 0);
}

#[test]
fn leak_check_passes_after_each_cleanup_run() {
    let mut runtime = runtime_for(RESHAPE_CHAIN, InferenceModuleOptions::default());
    for _ in 0..3 {
        runtime.run(reshape_args(), &HashMap::new()).unwrap();
        runtime.check_for_memory_leak(true);
    }
}
