//! Graph preparation passes.
//!
//! The pass sequence in [`optimize_graph`] is contractually fixed: later
//! passes assume invariants established by earlier ones (mutation removal
//! requires canonical ordering, fusion requires a mutation-free graph, and so
//! on).

mod canonicalize;
mod constant_propagation;
mod dce;
#[cfg(feature = "fusion")]
mod fusion;
mod inline;
mod remove_mutation;
mod replace_with_copy;

use tracing::debug;

use crate::ir::Graph;

pub use canonicalize::CanonicalizePass;
pub use constant_propagation::ConstantPropagationPass;
pub use dce::DeadCodeEliminationPass;
#[cfg(feature = "fusion")]
pub use fusion::fuse_sparse_ops;
pub use inline::InlinePass;
pub use remove_mutation::RemoveMutationPass;
pub use replace_with_copy::replace_with_copy;

/// Result returned by a [`GraphPass`] after it runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassResult {
    /// Whether the pass changed the graph.
    pub changed: bool,
    /// Nodes removed by the pass.
    pub nodes_removed: usize,
    /// Pattern rewrites applied by the pass.
    pub rewrites_applied: usize,
}

impl PassResult {
    pub fn merge(self, other: PassResult) -> PassResult {
        PassResult {
            changed: self.changed || other.changed,
            nodes_removed: self.nodes_removed + other.nodes_removed,
            rewrites_applied: self.rewrites_applied + other.rewrites_applied,
        }
    }
}

/// Interface implemented by graph preparation passes.
pub trait GraphPass {
    fn name(&self) -> &'static str;
    fn run(&self, graph: &mut Graph) -> PassResult;
}

fn run_pass(pass: &dyn GraphPass, graph: &mut Graph) -> PassResult {
    let result = pass.run(graph);
    debug!(
        pass = pass.name(),
        changed = result.changed,
        removed = result.nodes_removed,
        rewrites = result.rewrites_applied,
        "pass finished"
    );
    result
}

/// Inline, fold, canonicalise, de-mutate, and strip a graph for repeated
/// execution.
pub fn prepare_graph(graph: &mut Graph) {
    run_pass(&InlinePass, graph);
    run_pass(&ConstantPropagationPass, graph);
    run_pass(&CanonicalizePass, graph);
    run_pass(&ConstantPropagationPass, graph);
    run_pass(&RemoveMutationPass, graph);
    run_pass(&ConstantPropagationPass, graph);
    run_pass(&DeadCodeEliminationPass, graph);
}

/// Full optimisation sequence: preparation, domain fusions when compiled in,
/// and a final folding sweep.
pub fn optimize_graph(graph: &mut Graph) {
    prepare_graph(graph);
    #[cfg(feature = "fusion")]
    {
        let fused = fuse_sparse_ops(graph);
        debug!(rewrites = fused, "sparse fusion finished");
    }
    run_pass(&ConstantPropagationPass, graph);
}

/// Erases an unused module `self` reference at input 0, if present.
pub fn erase_unused_self_input(graph: &mut Graph) -> bool {
    let Some(&first) = graph.inputs().first() else {
        return false;
    };
    if *graph.value_type(first) != crate::ir::TypeKind::Module {
        return false;
    }
    assert!(
        graph.uses(first).is_empty(),
        "module self input still has uses; graph is not frozen"
    );
    graph.erase_input(0);
    true
}
