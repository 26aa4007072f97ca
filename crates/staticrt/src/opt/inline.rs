//! Callee inlining for `prim::CallFunction` nodes.

use std::sync::Arc;

use crate::ir::{kinds, Graph, NodeId};

use super::{GraphPass, PassResult};

/// Splices every callee body into the caller until no calls remain.
#[derive(Default)]
pub struct InlinePass;

impl GraphPass for InlinePass {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&self, graph: &mut Graph) -> PassResult {
        let mut result = PassResult::default();
        loop {
            let Some(call) = graph
                .nodes()
                .find(|&n| graph.kind(n) == kinds::call_function())
            else {
                break;
            };
            inline_call(graph, call);
            result.changed = true;
            result.rewrites_applied += 1;
        }
        result
    }
}

fn inline_call(graph: &mut Graph, call: NodeId) {
    let callee: Arc<Graph> = Arc::clone(
        graph
            .subgraph(call)
            .expect("call node must carry a callee graph"),
    );
    let args: Vec<_> = graph.node_inputs(call).to_vec();
    assert_eq!(
        args.len(),
        callee.inputs().len(),
        "call arity must match callee signature"
    );

    let mut remap = vec![None; callee.value_count()];
    for (&param, &arg) in callee.inputs().iter().zip(&args) {
        remap[param.0 as usize] = Some(arg);
    }
    for cnode in callee.nodes() {
        let inputs: Vec<_> = callee
            .node_inputs(cnode)
            .iter()
            .map(|v| remap[v.0 as usize].expect("callee value defined before use"))
            .collect();
        let out_types: Vec<_> = callee
            .node_outputs(cnode)
            .iter()
            .map(|v| callee.value_type(*v).clone())
            .collect();
        let new_node = graph.create_node(callee.kind(cnode), &inputs, &out_types);
        if let Some(ival) = callee.node_ival(cnode) {
            graph.set_node_ival(new_node, ival.clone());
        }
        if let Some(nested) = callee.subgraph(cnode) {
            graph.set_subgraph(new_node, Arc::clone(nested));
        }
        graph.insert_before(new_node, call);
        for (&old, &new) in callee
            .node_outputs(cnode)
            .iter()
            .zip(graph.node_outputs(new_node).to_vec().iter())
        {
            remap[old.0 as usize] = Some(new);
        }
    }
    for (index, &ret) in callee.outputs().to_vec().iter().enumerate() {
        let replacement = remap[ret.0 as usize].expect("callee output defined");
        let call_out = graph.node_outputs(call)[index];
        graph.replace_all_uses(call_out, replacement);
    }
    graph.erase_node(call);
}
