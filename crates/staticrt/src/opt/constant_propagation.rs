//! Folds pure nodes whose inputs are all constants.

use tracing::debug;

use crate::ir::{kinds, Graph, NodeId};
use crate::ops::registry;

use super::{GraphPass, PassResult};

/// Evaluates pure all-constant nodes at optimisation time and replaces them
/// with `prim::Constant` nodes.
#[derive(Default)]
pub struct ConstantPropagationPass;

impl GraphPass for ConstantPropagationPass {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        let mut result = PassResult::default();
        let nodes: Vec<NodeId> = graph.nodes().collect();
        for node in nodes {
            if graph.kind(node) == kinds::constant() || !foldable(graph, node) {
                continue;
            }
            if fold(graph, node) {
                result.changed = true;
                result.nodes_removed += 1;
            }
        }
        result
    }
}

fn foldable(graph: &Graph, node: NodeId) -> bool {
    registry::is_pure(graph.kind(node))
        && !graph.node_inputs(node).is_empty()
        && graph
            .node_inputs(node)
            .iter()
            .all(|&v| graph.producer_kind(v) == Some(kinds::constant()))
}

fn fold(graph: &mut Graph, node: NodeId) -> bool {
    let mut stack = Vec::new();
    for &input in graph.node_inputs(node) {
        let (producer, _) = graph.producer(input).expect("constant producer");
        stack.push(
            graph
                .node_ival(producer)
                .expect("constant node carries a payload")
                .clone(),
        );
    }
    let n_outputs = graph.node_outputs(node).len();
    if let Err(err) = registry::run_fallback(graph.kind(node), &mut stack, n_outputs) {
        debug!(kind = %graph.kind(node), %err, "skipping constant fold");
        return false;
    }
    if stack.len() != n_outputs {
        return false;
    }
    for (index, value) in stack.into_iter().enumerate() {
        let old = graph.node_outputs(node)[index];
        let ty = graph.value_type(old).clone();
        let constant = graph.create_node(kinds::constant(), &[], &[ty]);
        graph.set_node_ival(constant, value);
        graph.insert_before(constant, node);
        let new = graph.node_outputs(constant)[0];
        graph.replace_all_uses(old, new);
    }
    graph.erase_node(node);
    true
}
