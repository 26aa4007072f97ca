//! Static inference runtime for frozen tensor computation graphs.
//!
//! Given an immutable DAG of tensor operations, this crate executes it
//! repeatedly with different inputs while minimising per-invocation overhead:
//! the graph is optimised ahead of time, each node is dispatched to an
//! out-variant writing into pre-owned storage where one exists, and a memory
//! planner pools the backing storage of all intermediate tensors into a
//! single contiguous buffer reused across runs.
//!
//! ```
//! use staticrt::ir::parse_graph;
//! use staticrt::runtime::{InferenceModule, InferenceModuleOptions, StaticRuntime};
//! use staticrt::tensor::Tensor;
//! use std::sync::Arc;
//!
//! let graph = parse_graph(
//!     r#"
//!     graph(%a, %b):
//!       %c = aten::add(%a, %b)
//!       return (%c)
//!     "#,
//! )
//! .unwrap();
//! let module = Arc::new(
//!     InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap(),
//! );
//! let mut runtime = StaticRuntime::new(module).unwrap();
//! let out = runtime
//!     .run_tensors(&[
//!         Tensor::from_f32(vec![1.0, 2.0, 3.0]),
//!         Tensor::from_f32(vec![4.0, 5.0, 6.0]),
//!     ])
//!     .unwrap();
//! assert_eq!(out[0].to_vec_f32().unwrap(), vec![5.0, 7.0, 9.0]);
//! ```

pub mod ir;
pub mod ops;
pub mod opt;
pub mod runtime;
pub mod schema;
pub mod tensor;

pub use ir::{parse_graph, print_graph, Graph};
pub use runtime::{InferenceModule, InferenceModuleOptions, RuntimeError, StaticRuntime};
pub use tensor::{IValue, Tensor};
