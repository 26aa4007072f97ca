//! The immutable inference artefact shared across runtimes.

use crate::ir::{kinds, Graph, TypeKind};
use crate::opt;
use crate::schema::FunctionSchema;

use super::error::RuntimeError;

/// Behavioural switches fixed at module construction.
#[derive(Debug, Clone, Copy)]
pub struct InferenceModuleOptions {
    /// Derive storage-sharing groups from liveness so non-interfering
    /// intermediates draw from common pool regions.
    pub optimize_memory: bool,
    /// Select out-variant dispatch where available.
    pub enable_out_variant: bool,
    /// Reclaim intermediate activations after every invocation.
    pub cleanup_activations: bool,
}

impl Default for InferenceModuleOptions {
    fn default() -> Self {
        InferenceModuleOptions {
            optimize_memory: true,
            enable_out_variant: true,
            cleanup_activations: true,
        }
    }
}

/// Optimised graph plus optional call schema. Immutable after construction
/// and shareable (via `Arc`) across any number of runtimes.
#[derive(Debug)]
pub struct InferenceModule {
    graph: Graph,
    schema: Option<FunctionSchema>,
    opts: InferenceModuleOptions,
}

impl InferenceModule {
    /// Builds a module from a bare graph (no schema; keyword calls will be
    /// rejected at run time).
    pub fn from_graph(
        graph: &Graph,
        opts: InferenceModuleOptions,
    ) -> Result<InferenceModule, RuntimeError> {
        InferenceModule::init(graph.clone(), None, opts)
    }

    /// Builds a module from a method-style graph with a schema. The leading
    /// `self` argument is stripped from the schema; an unused `self` graph
    /// input is erased during preparation.
    pub fn from_method(
        graph: &Graph,
        schema: &FunctionSchema,
        opts: InferenceModuleOptions,
    ) -> Result<InferenceModule, RuntimeError> {
        let schema = schema.strip_self()?;
        InferenceModule::init(graph.clone(), Some(schema), opts)
    }

    fn init(
        mut graph: Graph,
        schema: Option<FunctionSchema>,
        opts: InferenceModuleOptions,
    ) -> Result<InferenceModule, RuntimeError> {
        opt::optimize_graph(&mut graph);
        if opts.optimize_memory {
            opt::replace_with_copy(&mut graph);
        }
        check_graph_eligibility(&graph)?;
        opt::erase_unused_self_input(&mut graph);
        Ok(InferenceModule {
            graph,
            schema,
            opts,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn schema(&self) -> Option<&FunctionSchema> {
        self.schema.as_ref()
    }

    pub fn options(&self) -> InferenceModuleOptions {
        self.opts
    }
}

/// Rejects graphs the runtime cannot execute: unfrozen attribute reads, and
/// output types other than tensor, none, or tuple/list of tensors.
fn check_graph_eligibility(graph: &Graph) -> Result<(), RuntimeError> {
    for node in graph.nodes() {
        if graph.kind(node) == kinds::get_attr() {
            return Err(RuntimeError::UnfrozenGraph);
        }
    }
    for &output in graph.outputs() {
        let producer_kind = graph.producer_kind(output);
        if producer_kind == Some(kinds::tuple_construct())
            || producer_kind == Some(kinds::list_construct())
        {
            let (node, _) = graph.producer(output).expect("aggregate has a producer");
            for &element in graph.node_inputs(node) {
                if *graph.value_type(element) != TypeKind::Tensor {
                    return Err(RuntimeError::UnsupportedOutputType(format!(
                        "list or tuple of {}",
                        graph.value_type(element)
                    )));
                }
            }
        } else {
            let ty = graph.value_type(output);
            if !matches!(ty, TypeKind::Tensor | TypeKind::NoneType) {
                return Err(RuntimeError::UnsupportedOutputType(ty.to_string()));
            }
        }
    }
    Ok(())
}
