//! Rewrites in-place tensor ops to their functional form.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::ir::{Graph, NodeId, Symbol};

use super::{GraphPass, PassResult};

static FUNCTIONAL_FORM: Lazy<HashMap<Symbol, Symbol>> = Lazy::new(|| {
    [
        ("aten::add_", "aten::add"),
        ("aten::sub_", "aten::sub"),
        ("aten::mul_", "aten::mul"),
        ("aten::div_", "aten::div"),
        ("aten::clamp_", "aten::clamp"),
        ("aten::nan_to_num_", "aten::nan_to_num"),
        ("aten::relu_", "aten::relu"),
        ("aten::sigmoid_", "aten::sigmoid"),
        ("aten::tanh_", "aten::tanh"),
    ]
    .into_iter()
    .map(|(inplace, functional)| (Symbol::intern(inplace), Symbol::intern(functional)))
    .collect()
});

/// Replaces every in-place op with its functional counterpart: the node keeps
/// its inputs, and every later consumer of the mutated value reads the fresh
/// SSA result instead.
#[derive(Default)]
pub struct RemoveMutationPass;

impl GraphPass for RemoveMutationPass {
    fn name(&self) -> &'static str {
        "remove-mutation"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        let mut result = PassResult::default();
        let nodes: Vec<NodeId> = graph.nodes().collect();
        for node in nodes {
            let Some(&functional) = FUNCTIONAL_FORM.get(&graph.kind(node)) else {
                continue;
            };
            graph.set_kind(node, functional);
            let mutated = graph.node_inputs(node)[0];
            let replacement = graph.node_outputs(node)[0];
            let position = graph.position(node).expect("node is in order");
            for u in graph.uses(mutated).to_vec() {
                let after = graph
                    .position(u.node)
                    .map_or(false, |p| p > position);
                if after {
                    graph.replace_input(u.node, u.slot, replacement);
                }
            }
            // The return statement reads the final state of the mutated value.
            graph.replace_output_value(mutated, replacement);
            result.changed = true;
            result.rewrites_applied += 1;
        }
        result
    }
}
