//! Dead-code elimination by reachability from the graph outputs.

use std::collections::HashSet;

use crate::ir::{Graph, NodeId, ValueId};

use super::{GraphPass, PassResult};

/// Removes every node none of whose outputs reaches a graph output. The
/// graph is mutation-free by the time this runs, so no node has side effects
/// worth preserving.
#[derive(Default)]
pub struct DeadCodeEliminationPass;

impl GraphPass for DeadCodeEliminationPass {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        let mut live_nodes: HashSet<NodeId> = HashSet::new();
        let mut worklist: Vec<ValueId> = graph.outputs().to_vec();
        let mut seen: HashSet<ValueId> = HashSet::new();
        while let Some(value) = worklist.pop() {
            if !seen.insert(value) {
                continue;
            }
            let Some((producer, _)) = graph.producer(value) else {
                continue;
            };
            if live_nodes.insert(producer) {
                worklist.extend(graph.node_inputs(producer).iter().copied());
            }
        }

        let mut result = PassResult::default();
        let dead: Vec<NodeId> = graph
            .nodes()
            .filter(|n| !live_nodes.contains(n))
            .collect();
        // Reverse order erases consumers before their producers.
        for node in dead.into_iter().rev() {
            graph.erase_node(node);
            result.nodes_removed += 1;
        }
        result.changed = result.nodes_removed > 0;
        result
    }
}
