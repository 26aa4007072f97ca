//! Conservative alias analysis over graph values.
//!
//! View ops alias their output with the viewed input; aggregate constructors
//! contain their elements; unpacking aliases the container. The database
//! answers the single question the optimiser needs: may any value in one set
//! alias (or transitively contain an alias of) a value in another set.

use std::collections::{HashMap, HashSet};

use crate::ops::registry;

use super::graph::{Graph, ValueId};
use super::symbol::kinds;

/// Union-find based alias database built from one snapshot of a graph.
pub struct AliasDb {
    parent: Vec<u32>,
    /// Container root -> element roots.
    contained: HashMap<u32, HashSet<u32>>,
}

impl AliasDb {
    pub fn new(graph: &Graph) -> AliasDb {
        let mut db = AliasDb {
            parent: (0..graph.value_count() as u32).collect(),
            contained: HashMap::new(),
        };
        for node in graph.nodes() {
            let kind = graph.kind(node);
            let inputs = graph.node_inputs(node);
            let outputs = graph.node_outputs(node);
            if kind == kinds::list_construct() || kind == kinds::tuple_construct() {
                let container = db.find(outputs[0].0);
                for &input in inputs {
                    let element = db.find(input.0);
                    db.contained.entry(container).or_default().insert(element);
                }
            } else if kind == kinds::list_unpack() {
                for &output in outputs {
                    db.union(output.0, inputs[0].0);
                }
            } else if registry::is_view_op(kind) {
                if let (Some(&input), Some(&output)) = (inputs.first(), outputs.first()) {
                    db.union(output.0, input.0);
                }
            }
        }
        db
    }

    fn find(&mut self, v: u32) -> u32 {
        let mut root = v;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cur = v;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra as usize] = rb;
            if let Some(elements) = self.contained.remove(&ra) {
                self.contained.entry(rb).or_default().extend(elements);
            }
        }
    }

    /// Alias-closure of a value set: every root reachable through aliasing or
    /// containment.
    fn closure(&mut self, values: &[ValueId]) -> HashSet<u32> {
        let mut seen = HashSet::new();
        let mut frontier: Vec<u32> = values.iter().map(|v| self.find(v.0)).collect();
        while let Some(root) = frontier.pop() {
            if !seen.insert(root) {
                continue;
            }
            if let Some(elements) = self.contained.get(&root) {
                frontier.extend(elements.iter().copied());
            }
        }
        seen
    }

    /// Whether `a` and `b` may alias directly.
    pub fn may_alias(&mut self, a: ValueId, b: ValueId) -> bool {
        self.find(a.0) == self.find(b.0)
    }

    /// Whether any value in `from` may alias, or be contained in, any value
    /// in `to` (and vice versa).
    pub fn may_contain_alias(&mut self, from: &[ValueId], to: &[ValueId]) -> bool {
        let from_closure = self.closure(from);
        let to_closure = self.closure(to);
        !from_closure.is_disjoint(&to_closure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_graph;

    #[test]
    fn view_output_aliases_input() {
        let graph = parse_graph(
            r#"
            graph(%a, %shape : int[]):
              %b = aten::reshape(%a, %shape)
              %c = aten::mul(%a, %a)
              return (%b)
            "#,
        )
        .unwrap();
        let mut db = AliasDb::new(&graph);
        let a = graph.inputs()[0];
        let b = graph.outputs()[0];
        assert!(db.may_alias(a, b));
        let c = graph
            .nodes()
            .map(|n| graph.node_outputs(n)[0])
            .last()
            .unwrap();
        assert!(!db.may_alias(a, c));
    }

    #[test]
    fn containers_capture_elements() {
        let graph = parse_graph(
            r#"
            graph(%a):
              %b = aten::relu(%a)
              %list = prim::ListConstruct(%b)
              return (%list)
            "#,
        )
        .unwrap();
        let mut db = AliasDb::new(&graph);
        let b = graph.nodes().next().map(|n| graph.node_outputs(n)[0]).unwrap();
        let outputs = graph.outputs().to_vec();
        assert!(db.may_contain_alias(&[b], &outputs));
    }
}
