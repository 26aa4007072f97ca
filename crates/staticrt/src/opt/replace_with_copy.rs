//! Rewrites single-use view ops to their materialising `_copy` variants so
//! the memory planner may manage their storage.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::ir::{kinds, AliasDb, Graph, NodeId, Symbol, TypeKind, Use, ValueId};

static COPY_VARIANT: Lazy<HashMap<Symbol, Symbol>> = Lazy::new(|| {
    [
        ("aten::permute", "static_runtime::permute_copy"),
        ("aten::narrow", "aten::narrow_copy"),
    ]
    .into_iter()
    .map(|(view, copy)| (Symbol::intern(view), Symbol::intern(copy)))
    .collect()
});

/// Applies the copy-variant rewrite. Returns the number of nodes rewritten.
///
/// A node qualifies only when its single output has exactly one use and may
/// not alias any graph output. Alias analysis runs on a graph whose inputs
/// are temporarily rerouted through a synthetic pure producer, so views of
/// graph inputs surface as aliases instead of unrelated roots; the rerouting
/// is undone before any rewriting happens.
pub fn replace_with_copy(graph: &mut Graph) -> usize {
    let fake_node = graph.create_node(kinds::pure_inputs(), &[], &[TypeKind::Tensor]);
    graph.prepend_node(fake_node);
    let fake = graph.node_outputs(fake_node)[0];

    let mut rerouted: Vec<(ValueId, Use)> = Vec::new();
    for input in graph.inputs().to_vec() {
        for u in graph.uses(input).to_vec() {
            rerouted.push((input, u));
        }
    }
    for &(_, u) in &rerouted {
        graph.replace_input(u.node, u.slot, fake);
    }

    let mut db = AliasDb::new(graph);

    for &(input, u) in &rerouted {
        graph.replace_input(u.node, u.slot, input);
    }
    graph.erase_node(fake_node);

    let mut replacements: Vec<(NodeId, NodeId)> = Vec::new();
    for node in graph.nodes().collect::<Vec<_>>() {
        let Some(&copy_kind) = COPY_VARIANT.get(&graph.kind(node)) else {
            continue;
        };
        debug_assert_eq!(graph.node_outputs(node).len(), 1);
        let out = graph.node_outputs(node)[0];
        if graph.uses(out).len() > 1 {
            continue;
        }
        if db.may_contain_alias(&[out], graph.outputs()) {
            continue;
        }
        let inputs = graph.node_inputs(node).to_vec();
        let out_types: Vec<TypeKind> = graph
            .node_outputs(node)
            .iter()
            .map(|v| graph.value_type(*v).clone())
            .collect();
        let copy_node = graph.create_node(copy_kind, &inputs, &out_types);
        graph.insert_before(copy_node, node);
        replacements.push((node, copy_node));
    }

    let count = replacements.len();
    for (old, new) in replacements {
        let old_out = graph.node_outputs(old)[0];
        let new_out = graph.node_outputs(new)[0];
        graph.replace_all_uses(old_out, new_out);
        graph.erase_node(old);
    }
    count
}
