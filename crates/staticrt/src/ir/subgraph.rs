//! Pattern-based subgraph rewriting driven by textual IR pairs.
//!
//! A rewrite is registered as `(pattern, replacement)` graphs with matching
//! input and output arity. Matching walks the pattern's nodes in order,
//! anchoring the first node on each candidate target node and extending along
//! def-use edges; a match only applies when the values it erases are invisible
//! outside the matched region and do not alias graph outputs.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::tensor::IValue;

use super::alias::AliasDb;
use super::graph::{Graph, NodeId, ValueId};
use super::text::{parse_graph, TextIrError};

/// Upper bound on rewrites per pattern per `run` call. A replacement that
/// reintroduces its own pattern would otherwise loop forever.
const MAX_REWRITES_PER_PATTERN: usize = 1000;

struct RewritePattern {
    pattern: Graph,
    replacement: Graph,
}

/// Rewrites occurrences of registered patterns inside a graph.
#[derive(Default)]
pub struct SubgraphRewriter {
    patterns: Vec<RewritePattern>,
}

impl SubgraphRewriter {
    pub fn new() -> SubgraphRewriter {
        SubgraphRewriter::default()
    }

    /// Registers a textual `(pattern, replacement)` pair.
    ///
    /// The pattern must be a connected single-use chain description: every
    /// node after the first consumes at least one earlier node's output.
    pub fn register(&mut self, pattern: &str, replacement: &str) -> Result<(), TextIrError> {
        let pattern = parse_graph(pattern)?;
        let replacement = parse_graph(replacement)?;
        if pattern.inputs().len() != replacement.inputs().len() {
            return Err(TextIrError::Message(
                "pattern and replacement input arity differ".into(),
            ));
        }
        if pattern.outputs().len() != replacement.outputs().len() {
            return Err(TextIrError::Message(
                "pattern and replacement output arity differ".into(),
            ));
        }
        for (index, node) in pattern.nodes().enumerate() {
            if index > 0
                && !pattern
                    .node_inputs(node)
                    .iter()
                    .any(|v| pattern.producer(*v).is_some())
            {
                return Err(TextIrError::Message(
                    "pattern must be connected through def-use edges".into(),
                ));
            }
        }
        self.patterns.push(RewritePattern {
            pattern,
            replacement,
        });
        Ok(())
    }

    /// Applies every registered pattern greedily until none matches. Returns
    /// the number of rewrites performed.
    pub fn run(&self, graph: &mut Graph) -> usize {
        let mut total = 0;
        for rewrite in &self.patterns {
            let mut applied = 0;
            while applied < MAX_REWRITES_PER_PATTERN {
                let mut db = AliasDb::new(graph);
                let Some(found) = find_match(graph, &rewrite.pattern, &mut db) else {
                    break;
                };
                apply_match(graph, rewrite, &found);
                applied += 1;
            }
            if applied == MAX_REWRITES_PER_PATTERN {
                warn!("subgraph rewrite hit its iteration bound; pattern may self-replicate");
            }
            total += applied;
        }
        total
    }
}

struct Match {
    /// Pattern value -> target value.
    bindings: HashMap<ValueId, ValueId>,
    /// Matched target nodes, in pattern-node order.
    nodes: Vec<NodeId>,
}

fn find_match(graph: &Graph, pattern: &Graph, db: &mut AliasDb) -> Option<Match> {
    let pattern_nodes: Vec<NodeId> = pattern.nodes().collect();
    let first = *pattern_nodes.first()?;
    for anchor in graph.nodes().collect::<Vec<_>>() {
        let mut bindings = HashMap::new();
        let mut matched = Vec::new();
        if try_bind_node(graph, pattern, first, anchor, &mut bindings)
            && extend_match(
                graph,
                pattern,
                &pattern_nodes,
                anchor,
                &mut bindings,
                &mut matched,
            )
            && validate_match(graph, pattern, &bindings, &matched, db)
        {
            return Some(Match {
                bindings,
                nodes: matched,
            });
        }
    }
    None
}

fn extend_match(
    graph: &Graph,
    pattern: &Graph,
    pattern_nodes: &[NodeId],
    anchor: NodeId,
    bindings: &mut HashMap<ValueId, ValueId>,
    matched: &mut Vec<NodeId>,
) -> bool {
    matched.push(anchor);
    for &pnode in &pattern_nodes[1..] {
        // Find the target candidates through an already-bound produced input.
        let Some(candidate_set) = pattern
            .node_inputs(pnode)
            .iter()
            .find(|v| pattern.producer(**v).is_some())
            .and_then(|v| bindings.get(v))
            .map(|tv| graph.uses(*tv).to_vec())
        else {
            return false;
        };
        let mut bound = false;
        for u in candidate_set {
            if matched.contains(&u.node) {
                continue;
            }
            let mut trial = bindings.clone();
            if try_bind_node(graph, pattern, pnode, u.node, &mut trial) {
                *bindings = trial;
                matched.push(u.node);
                bound = true;
                break;
            }
        }
        if !bound {
            return false;
        }
    }
    true
}

fn try_bind_node(
    graph: &Graph,
    pattern: &Graph,
    pnode: NodeId,
    tnode: NodeId,
    bindings: &mut HashMap<ValueId, ValueId>,
) -> bool {
    if pattern.kind(pnode) != graph.kind(tnode) {
        return false;
    }
    let p_inputs = pattern.node_inputs(pnode);
    let t_inputs = graph.node_inputs(tnode);
    let p_outputs = pattern.node_outputs(pnode);
    let t_outputs = graph.node_outputs(tnode);
    if p_inputs.len() != t_inputs.len() || p_outputs.len() != t_outputs.len() {
        return false;
    }
    if !ival_compatible(pattern.node_ival(pnode), graph.node_ival(tnode)) {
        return false;
    }
    for (&pv, &tv) in p_inputs.iter().zip(t_inputs) {
        match bindings.get(&pv) {
            Some(&bound) if bound != tv => return false,
            Some(_) => {}
            None => {
                // Free pattern inputs bind to anything; produced values must
                // already be bound through their producer.
                if pattern.producer(pv).is_some() {
                    return false;
                }
                bindings.insert(pv, tv);
            }
        }
    }
    for (&pv, &tv) in p_outputs.iter().zip(t_outputs) {
        bindings.insert(pv, tv);
    }
    true
}

fn ival_compatible(a: Option<&IValue>, b: Option<&IValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => match (x, y) {
            (IValue::None, IValue::None) => true,
            (IValue::Int(l), IValue::Int(r)) => l == r,
            (IValue::Bool(l), IValue::Bool(r)) => l == r,
            (IValue::Float(l), IValue::Float(r)) => l == r,
            (IValue::IntList(l), IValue::IntList(r)) => l == r,
            _ => false,
        },
        _ => false,
    }
}

fn validate_match(
    graph: &Graph,
    pattern: &Graph,
    bindings: &HashMap<ValueId, ValueId>,
    matched: &[NodeId],
    db: &mut AliasDb,
) -> bool {
    let matched_set: HashSet<NodeId> = matched.iter().copied().collect();
    if matched_set.len() != matched.len() {
        return false;
    }
    let returned: HashSet<ValueId> = pattern.outputs().iter().copied().collect();
    for pnode in pattern.nodes() {
        for &pv in pattern.node_outputs(pnode) {
            if returned.contains(&pv) {
                continue;
            }
            let tv = bindings[&pv];
            // Internal values disappear with the rewrite; they must have no
            // consumers outside the matched region and must not feed outputs.
            if graph.is_output(tv) {
                return false;
            }
            if graph.uses(tv).iter().any(|u| !matched_set.contains(&u.node)) {
                return false;
            }
            if db.may_contain_alias(&[tv], graph.outputs()) {
                return false;
            }
        }
    }
    true
}

fn apply_match(graph: &mut Graph, rewrite: &RewritePattern, found: &Match) {
    let replacement = &rewrite.replacement;
    let insert_at = found.nodes[0];

    // Replacement inputs correspond positionally to pattern inputs.
    let mut remap: HashMap<ValueId, ValueId> = HashMap::new();
    for (&rv, &pv) in replacement.inputs().iter().zip(rewrite.pattern.inputs()) {
        remap.insert(rv, found.bindings[&pv]);
    }

    for rnode in replacement.nodes() {
        let inputs: Vec<ValueId> = replacement
            .node_inputs(rnode)
            .iter()
            .map(|v| remap[v])
            .collect();
        let out_types: Vec<_> = replacement
            .node_outputs(rnode)
            .iter()
            .map(|v| replacement.value_type(*v).clone())
            .collect();
        let new_node = graph.create_node(replacement.kind(rnode), &inputs, &out_types);
        if let Some(ival) = replacement.node_ival(rnode) {
            graph.set_node_ival(new_node, ival.clone());
        }
        graph.insert_before(new_node, insert_at);
        for (&rv, &nv) in replacement
            .node_outputs(rnode)
            .iter()
            .zip(graph.node_outputs(new_node).to_vec().iter())
        {
            remap.insert(rv, nv);
        }
    }

    for (&p_ret, &r_ret) in rewrite
        .pattern
        .outputs()
        .iter()
        .zip(replacement.outputs())
    {
        let old = found.bindings[&p_ret];
        let new = remap[&r_ret];
        graph.replace_all_uses(old, new);
    }

    for &node in found.nodes.iter().rev() {
        graph.erase_node(node);
    }
}
