#![cfg(feature = "fusion")]

use std::collections::HashMap;
use std::sync::Arc;

use staticrt::ir::{parse_graph, Graph};
use staticrt::opt;
use staticrt::runtime::{InferenceModule, InferenceModuleOptions, StaticRuntime};
use staticrt::tensor::{IValue, Tensor};

fn kinds_in_order(graph: &Graph) -> Vec<&'static str> {
    graph.nodes().map(|n| graph.kind(n).as_str()).collect()
}

#[test]
fn concat_add_mul_replacenan_clip_collapses() {
    let mut graph = parse_graph(
        r#"
        graph(%a, %b, %c, %d, %e, %f, %g, %h, %i, %j):
          %y0 = aten::cat(%a, %b)
          %y1 = aten::add(%y0, %c, %d)
          %y2 = aten::mul(%y1, %e)
          %y3 = aten::nan_to_num(%y2, %f, %g, %h)
          %res = aten::clamp(%y3, %i, %j)
          return (%res)
        "#,
    )
    .unwrap();
    let applied = opt::fuse_sparse_ops(&mut graph);
    assert_eq!(applied, 1);
    assert_eq!(
        kinds_in_order(&graph),
        vec!["sparse::concat_add_mul_replacenan_clip"]
    );
}

#[test]
fn in_place_spellings_fuse_too() {
    let mut graph = parse_graph(
        r#"
        graph(%a, %b, %c, %d, %e, %f, %g, %h, %i, %j):
          %y0 = aten::cat(%a, %b)
          %y1 = aten::add(%y0, %c, %d)
          %y2 = aten::mul(%y1, %e)
          %y3 = aten::nan_to_num_(%y2, %f, %g, %h)
          %res = aten::clamp_(%y3, %i, %j)
          return (%res)
        "#,
    )
    .unwrap();
    assert_eq!(opt::fuse_sparse_ops(&mut graph), 1);
    assert_eq!(
        kinds_in_order(&graph),
        vec!["sparse::concat_add_mul_replacenan_clip"]
    );
}

#[test]
fn casted_batch_one_hot_collapses() {
    let mut graph = parse_graph(
        r#"
        graph(%a, %b, %c, %d, %e, %f, %g):
          %y0 : Tensor = aten::to(%a, %b, %c, %c, %d)
          %y1 : Tensor = sparse::batch_one_hot_lengths(%y0, %e, %f)
          %res : Tensor = aten::to(%y1, %g, %c, %c, %d)
          return (%res)
        "#,
    )
    .unwrap();
    assert_eq!(opt::fuse_sparse_ops(&mut graph), 1);
    assert_eq!(
        kinds_in_order(&graph),
        vec!["sparse::casted_batch_one_hot_lengths"]
    );
}

#[test]
fn concat_batch_matmul_batch_gather_collapses() {
    let mut graph = parse_graph(
        r#"
        graph(%a, %b, %c, %d, %e, %f):
          %y0 : Tensor = aten::stack(%a, %b)
          %y1 : Tensor = aten::transpose(%y0, %b, %c)
          %y2 : Tensor = aten::bmm(%y0, %y1)
          %y3 : Tensor = aten::flatten(%y2, %d, %e)
          %res : Tensor = aten::index_select(%y3, %b, %f)
          return (%res)
        "#,
    )
    .unwrap();
    assert_eq!(opt::fuse_sparse_ops(&mut graph), 1);
    assert_eq!(
        kinds_in_order(&graph),
        vec!["sparse::concat_batch_matmul_batch_gather"]
    );
}

#[test]
fn partial_chain_is_left_alone() {
    let mut graph = parse_graph(
        r#"
        graph(%a, %b, %c, %d, %e):
          %y0 = aten::cat(%a, %b)
          %y1 = aten::add(%y0, %c, %d)
          %y2 = aten::mul(%y1, %e)
          return (%y2)
        "#,
    )
    .unwrap();
    assert_eq!(opt::fuse_sparse_ops(&mut graph), 0);
    assert_eq!(kinds_in_order(&graph).len(), 3);
}

#[test]
fn intermediate_with_external_use_blocks_the_match() {
    let mut graph = parse_graph(
        r#"
        graph(%a, %b, %c, %d, %e, %f, %g, %h, %i, %j):
          %y0 = aten::cat(%a, %b)
          %y1 = aten::add(%y0, %c, %d)
          %y2 = aten::mul(%y1, %e)
          %y3 = aten::nan_to_num(%y2, %f, %g, %h)
          %res = aten::clamp(%y3, %i, %j)
          %leak = aten::relu(%y2)
          %out = aten::add(%res, %leak, %d)
          return (%out)
        "#,
    )
    .unwrap();
    assert_eq!(
        opt::fuse_sparse_ops(&mut graph),
        0,
        "y2 escapes the matched region"
    );
}

#[test]
fn clip_gather_chain_fuses_and_offsets_variant_wins() {
    // Full chain with lengths-to-offsets and hashing collapses in two steps
    // into the all-in-one fused op.
    let mut graph = parse_graph(
        r#"
        graph(%data, %ranges, %max : int, %last : bool, %salt : int, %buckets : int, %fold : bool):
          %y0 = sparse::clip_ranges(%ranges, %max)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%data, %y0)
          %y3 = sparse::lengths_to_offsets(%y2, %last)
          %y4 = sparse::bucket_hash(%y1, %salt, %buckets, %fold)
          return (%y4, %y3)
        "#,
    )
    .unwrap();
    let applied = opt::fuse_sparse_ops(&mut graph);
    assert_eq!(applied, 2);
    assert_eq!(
        kinds_in_order(&graph),
        vec!["sparse::clip_ranges_gather_hash_offsets"]
    );
}

#[test]
fn bare_clip_gather_fuses_last() {
    let mut graph = parse_graph(
        r#"
        graph(%data, %ranges, %max : int):
          %y0 = sparse::clip_ranges(%ranges, %max)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%data, %y0)
          return (%y2, %y1)
        "#,
    )
    .unwrap();
    assert_eq!(opt::fuse_sparse_ops(&mut graph), 1);
    assert_eq!(kinds_in_order(&graph), vec!["sparse::clip_ranges_gather"]);
}

#[test]
fn hash_chain_without_offsets_prefers_hash_fusion() {
    let mut graph = parse_graph(
        r#"
        graph(%data, %ranges, %max : int, %salt : int, %buckets : int, %fold : bool):
          %y0 = sparse::clip_ranges(%ranges, %max)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%data, %y0)
          %y3 = sparse::bucket_hash(%y1, %salt, %buckets, %fold)
          return (%y3, %y2)
        "#,
    )
    .unwrap();
    assert_eq!(opt::fuse_sparse_ops(&mut graph), 1);
    assert_eq!(
        kinds_in_order(&graph),
        vec!["sparse::clip_ranges_gather_hash"]
    );
}

fn non_constant_kinds(graph: &Graph) -> Vec<&'static str> {
    graph
        .nodes()
        .map(|n| graph.kind(n).as_str())
        .filter(|kind| *kind != "prim::Constant")
        .collect()
}

#[test]
fn fused_casted_one_hot_runs_end_to_end() {
    // The cast arguments are constants, so the chain fuses during module
    // preparation and the casted op executes through the runtime.
    let graph = parse_graph(
        r#"
        graph(%a):
          %to_i64 : int = prim::Constant[value=4]()
          %to_f32 : int = prim::Constant[value=0]()
          %flag : bool = prim::Constant[value=false]()
          %copy : bool = prim::Constant[value=false]()
          %classes : int = prim::Constant[value=4]()
          %on : float = prim::Constant[value=1.0]()
          %y0 : Tensor = aten::to(%a, %to_i64, %flag, %flag, %copy)
          %y1 : Tensor = sparse::batch_one_hot_lengths(%y0, %classes, %on)
          %res : Tensor = aten::to(%y1, %to_f32, %flag, %flag, %copy)
          return (%res)
        "#,
    )
    .unwrap();
    let module =
        Arc::new(InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap());
    assert_eq!(
        non_constant_kinds(module.graph()),
        vec!["sparse::casted_batch_one_hot_lengths"]
    );
    let mut runtime = StaticRuntime::new(module).unwrap();

    let out = runtime
        .run_tensors(&[Tensor::from_f32(vec![0.0, 2.0, 1.0, 3.0])])
        .unwrap();
    assert_eq!(out[0].shape().dims(), &[4, 4]);
    assert_eq!(
        out[0].to_vec_f32().unwrap(),
        vec![
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ]
    );
}

#[test]
fn fused_batch_matmul_gather_runs_end_to_end() {
    let graph = parse_graph(
        r#"
        graph(%list, %idx):
          %one : int = prim::Constant[value=1]()
          %two : int = prim::Constant[value=2]()
          %y0 : Tensor = aten::stack(%list, %one)
          %y1 : Tensor = aten::transpose(%y0, %one, %two)
          %y2 : Tensor = aten::bmm(%y0, %y1)
          %y3 : Tensor = aten::flatten(%y2, %one, %two)
          %res : Tensor = aten::index_select(%y3, %one, %idx)
          return (%res)
        "#,
    )
    .unwrap();
    let module =
        Arc::new(InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap());
    assert_eq!(
        non_constant_kinds(module.graph()),
        vec!["sparse::concat_batch_matmul_batch_gather"]
    );
    let mut runtime = StaticRuntime::new(module).unwrap();

    // One batch row with feature vectors [1, 2] and [3, 4]: the stacked
    // gram matrix is [[5, 11], [11, 25]], flattened to [5, 11, 11, 25];
    // indices pick out the diagonal.
    let args = vec![
        IValue::List(vec![
            IValue::Tensor(Tensor::from_vec(vec![1, 2], vec![1.0f32, 2.0]).unwrap()),
            IValue::Tensor(Tensor::from_vec(vec![1, 2], vec![3.0f32, 4.0]).unwrap()),
        ]),
        IValue::Tensor(Tensor::from_vec(vec![2], vec![0i64, 3]).unwrap()),
    ];
    let out = runtime.run(args, &HashMap::new()).unwrap();
    let out = out.as_tensor().unwrap();
    assert_eq!(out.shape().dims(), &[1, 2]);
    assert_eq!(out.to_vec_f32().unwrap(), vec![5.0, 25.0]);
}

#[test]
fn fused_graph_matches_unfused_execution() {
    let source = r#"
        graph(%data, %ranges, %max : int, %last : bool):
          %y0 = sparse::clip_ranges(%ranges, %max)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%data, %y0)
          %y3 = sparse::lengths_to_offsets(%y2, %last)
          return (%y3, %y1)
    "#;
    let graph = parse_graph(source).unwrap();
    let module =
        Arc::new(InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap());
    assert_eq!(
        module
            .graph()
            .nodes()
            .map(|n| module.graph().kind(n).as_str())
            .collect::<Vec<_>>(),
        vec!["sparse::clip_ranges_gather_lengths_to_offsets"]
    );
    let mut runtime = StaticRuntime::new(module).unwrap();

    let args = vec![
        IValue::Tensor(Tensor::from_f32(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])),
        IValue::Tensor(Tensor::from_vec(vec![2, 2], vec![0i64, 3, 3, 5]).unwrap()),
        IValue::Int(2),
        IValue::Bool(true),
    ];
    let out = runtime.run(args, &HashMap::new()).unwrap();
    let IValue::Tuple(elements) = out else {
        panic!("expected tuple output");
    };
    // Ranges clip to length 2: values [0, 1] and [3, 4]; offsets [0, 2, 4].
    assert_eq!(
        elements[0].as_tensor().unwrap().to_vec_i64().unwrap(),
        vec![0, 2, 4]
    );
    assert_eq!(
        elements[1].as_tensor().unwrap().to_vec_f32().unwrap(),
        vec![0.0, 1.0, 3.0, 4.0]
    );
}
