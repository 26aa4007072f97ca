//! Deterministic renumbering of values and compaction of the node arena.

use crate::ir::Graph;

use super::{GraphPass, PassResult};

/// Rebuilds the graph with traversal-ordered ids so downstream passes and
/// structural comparisons see one canonical form regardless of construction
/// history.
#[derive(Default)]
pub struct CanonicalizePass;

impl GraphPass for CanonicalizePass {
    fn name(&self) -> &'static str {
        "canonicalize"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        let (renumbered, changed) = graph.renumbered();
        *graph = renumbered;
        PassResult {
            changed,
            ..PassResult::default()
        }
    }
}
