use std::collections::HashMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use staticrt::ir::parse_graph;
use staticrt::runtime::{InferenceModule, InferenceModuleOptions, StaticRuntime};
use staticrt::tensor::{IValue, Tensor};

const ELEMENTWISE_CHAIN: &str = r#"
    graph(%inp, %shape : int[]):
      %a = aten::add(%inp, %inp)
      %b = aten::reshape(%a, %shape)
      %c = aten::add(%b, %b)
      %d = aten::mul(%c, %c)
      %e = aten::sigmoid(%d)
      %f = aten::mul(%e, %e)
      return (%f)
"#;

fn args() -> Vec<IValue> {
    let data: Vec<f32> = (0..4096).map(|i| (i % 17) as f32 * 0.25).collect();
    vec![
        IValue::Tensor(Tensor::from_vec(vec![64, 64], data).unwrap()),
        IValue::IntList(vec![32, 128]),
    ]
}

fn bench_run_loop(c: &mut Criterion) {
    let graph = parse_graph(ELEMENTWISE_CHAIN).unwrap();

    let mut group = c.benchmark_group("run");
    for (name, opts) in [
        ("pooled", InferenceModuleOptions::default()),
        (
            "unpooled",
            InferenceModuleOptions {
                optimize_memory: false,
                enable_out_variant: false,
                cleanup_activations: false,
            },
        ),
    ] {
        let module = Arc::new(InferenceModule::from_graph(&graph, opts).unwrap());
        let mut runtime = StaticRuntime::new(module).unwrap();
        // Prime the memory plan so the timed runs hit the steady state.
        runtime.run(args(), &HashMap::new()).unwrap();
        runtime.run(args(), &HashMap::new()).unwrap();
        group.bench_function(name, |b| {
            b.iter_batched(
                args,
                |args| runtime.run(args, &HashMap::new()).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    let graph = parse_graph(ELEMENTWISE_CHAIN).unwrap();
    let module = Arc::new(
        InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap(),
    );
    c.bench_function("construct_runtime", |b| {
        b.iter(|| StaticRuntime::new(Arc::clone(&module)).unwrap())
    });
}

criterion_group!(benches, bench_run_loop, bench_construction);
criterion_main!(benches);
