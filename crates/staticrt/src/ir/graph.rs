//! SSA graph container: values, nodes, use lists, and rewiring primitives.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::tensor::IValue;

use super::symbol::{kinds, Symbol};

/// Identifier of an SSA value within one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Identifier of a node within one [`Graph`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Static type tag carried by every graph value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Tensor,
    Int,
    Float,
    Bool,
    IntList,
    TensorList,
    NoneType,
    Tuple(Vec<TypeKind>),
    /// Module `self` reference; erased before runtime construction.
    Module,
    /// Any type the runtime does not model (e.g. dictionaries).
    Other(String),
}

impl std::fmt::Display for TypeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeKind::Tensor => f.write_str("Tensor"),
            TypeKind::Int => f.write_str("int"),
            TypeKind::Float => f.write_str("float"),
            TypeKind::Bool => f.write_str("bool"),
            TypeKind::IntList => f.write_str("int[]"),
            TypeKind::TensorList => f.write_str("Tensor[]"),
            TypeKind::NoneType => f.write_str("None"),
            TypeKind::Module => f.write_str("Module"),
            TypeKind::Tuple(elements) => {
                let inner: Vec<String> = elements.iter().map(ToString::to_string).collect();
                write!(f, "({})", inner.join(", "))
            }
            TypeKind::Other(name) => f.write_str(name),
        }
    }
}

/// A single use of a value: consuming node and input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub node: NodeId,
    pub slot: usize,
}

#[derive(Debug, Clone)]
struct ValueInfo {
    ty: TypeKind,
    producer: Option<(NodeId, usize)>,
    uses: SmallVec<[Use; 4]>,
    name: Option<String>,
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: Symbol,
    inputs: SmallVec<[ValueId; 4]>,
    outputs: SmallVec<[ValueId; 2]>,
    /// Constant payload for `prim::Constant` nodes.
    ival: Option<IValue>,
    /// Callee body for `prim::CallFunction` nodes.
    subgraph: Option<Arc<Graph>>,
    dead: bool,
}

/// An SSA computation graph in topological node order.
///
/// Nodes and values live in arenas addressed by [`NodeId`] / [`ValueId`];
/// erased nodes are tombstoned and skipped by [`Graph::nodes`]. The `order`
/// list is the execution-order contract consumed by the runtime.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    values: Vec<ValueInfo>,
    node_arena: Vec<NodeData>,
    order: Vec<NodeId>,
    inputs: Vec<ValueId>,
    outputs: Vec<ValueId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph::default()
    }

    fn fresh_value(&mut self, ty: TypeKind, name: Option<String>) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo {
            ty,
            producer: None,
            uses: SmallVec::new(),
            name,
        });
        id
    }

    /// Adds a graph input of the given type.
    pub fn add_input(&mut self, name: impl Into<Option<String>>, ty: TypeKind) -> ValueId {
        let v = self.fresh_value(ty, name.into());
        self.inputs.push(v);
        v
    }

    /// Erases input `index`. The input must have no remaining uses.
    pub fn erase_input(&mut self, index: usize) {
        let v = self.inputs[index];
        assert!(
            self.values[v.0 as usize].uses.is_empty(),
            "cannot erase input with uses"
        );
        self.inputs.remove(index);
    }

    /// Registers a value as a graph output.
    pub fn register_output(&mut self, v: ValueId) {
        self.outputs.push(v);
    }

    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    pub fn is_output(&self, v: ValueId) -> bool {
        self.outputs.contains(&v)
    }

    /// Creates a node without inserting it into the execution order.
    pub fn create_node(
        &mut self,
        kind: Symbol,
        inputs: &[ValueId],
        output_types: &[TypeKind],
    ) -> NodeId {
        let id = NodeId(self.node_arena.len() as u32);
        let mut outputs = SmallVec::new();
        for (slot, ty) in output_types.iter().enumerate() {
            let v = self.fresh_value(ty.clone(), None);
            self.values[v.0 as usize].producer = Some((id, slot));
            outputs.push(v);
        }
        for (slot, &input) in inputs.iter().enumerate() {
            self.values[input.0 as usize].uses.push(Use { node: id, slot });
        }
        self.node_arena.push(NodeData {
            kind,
            inputs: SmallVec::from_slice(inputs),
            outputs,
            ival: None,
            subgraph: None,
            dead: false,
        });
        id
    }

    /// Creates a node and appends it to the execution order.
    pub fn add_node(
        &mut self,
        kind: Symbol,
        inputs: &[ValueId],
        output_types: &[TypeKind],
    ) -> NodeId {
        let id = self.create_node(kind, inputs, output_types);
        self.order.push(id);
        id
    }

    /// Creates a `prim::Constant` node carrying `value` and appends it.
    pub fn add_constant(&mut self, value: IValue, ty: TypeKind) -> ValueId {
        let id = self.add_node(kinds::constant(), &[], &[ty]);
        self.node_arena[id.0 as usize].ival = Some(value);
        self.node_outputs(id)[0]
    }

    /// Inserts an already-created node into the order before `anchor`.
    pub fn insert_before(&mut self, node: NodeId, anchor: NodeId) {
        let pos = self.position(anchor).expect("anchor not in order");
        self.order.insert(pos, node);
    }

    /// Inserts an already-created node at the front of the execution order.
    pub fn prepend_node(&mut self, node: NodeId) {
        self.order.insert(0, node);
    }

    /// Position of a node in the execution order.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.order.iter().position(|&n| n == node)
    }

    /// Live nodes in execution order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order
            .iter()
            .copied()
            .filter(|n| !self.node_arena[n.0 as usize].dead)
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn kind(&self, node: NodeId) -> Symbol {
        self.node_arena[node.0 as usize].kind
    }

    pub fn set_kind(&mut self, node: NodeId, kind: Symbol) {
        self.node_arena[node.0 as usize].kind = kind;
    }

    pub fn node_inputs(&self, node: NodeId) -> &[ValueId] {
        &self.node_arena[node.0 as usize].inputs
    }

    pub fn node_outputs(&self, node: NodeId) -> &[ValueId] {
        &self.node_arena[node.0 as usize].outputs
    }

    pub fn node_ival(&self, node: NodeId) -> Option<&IValue> {
        self.node_arena[node.0 as usize].ival.as_ref()
    }

    pub fn set_node_ival(&mut self, node: NodeId, value: IValue) {
        self.node_arena[node.0 as usize].ival = Some(value);
    }

    pub fn subgraph(&self, node: NodeId) -> Option<&Arc<Graph>> {
        self.node_arena[node.0 as usize].subgraph.as_ref()
    }

    pub fn set_subgraph(&mut self, node: NodeId, callee: Arc<Graph>) {
        self.node_arena[node.0 as usize].subgraph = Some(callee);
    }

    pub fn value_type(&self, v: ValueId) -> &TypeKind {
        &self.values[v.0 as usize].ty
    }

    pub fn set_value_type(&mut self, v: ValueId, ty: TypeKind) {
        self.values[v.0 as usize].ty = ty;
    }

    pub fn value_name(&self, v: ValueId) -> Option<&str> {
        self.values[v.0 as usize].name.as_deref()
    }

    pub fn set_value_name(&mut self, v: ValueId, name: impl Into<String>) {
        self.values[v.0 as usize].name = Some(name.into());
    }

    /// Producing node and output slot, or `None` for graph inputs.
    pub fn producer(&self, v: ValueId) -> Option<(NodeId, usize)> {
        self.values[v.0 as usize].producer
    }

    /// Kind of the producing node; graph inputs have none.
    pub fn producer_kind(&self, v: ValueId) -> Option<Symbol> {
        self.producer(v).map(|(node, _)| self.kind(node))
    }

    pub fn uses(&self, v: ValueId) -> &[Use] {
        &self.values[v.0 as usize].uses
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// All value ids currently defined (inputs and node outputs).
    pub fn values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.inputs.iter().copied().chain(
            self.nodes()
                .flat_map(|n| self.node_outputs(n).to_vec()),
        )
    }

    /// Rewires input `slot` of `node` to `v`, maintaining use lists.
    pub fn replace_input(&mut self, node: NodeId, slot: usize, v: ValueId) {
        let old = self.node_arena[node.0 as usize].inputs[slot];
        if old == v {
            return;
        }
        let uses = &mut self.values[old.0 as usize].uses;
        if let Some(pos) = uses.iter().position(|u| u.node == node && u.slot == slot) {
            uses.remove(pos);
        }
        self.node_arena[node.0 as usize].inputs[slot] = v;
        self.values[v.0 as usize].uses.push(Use { node, slot });
    }

    /// Rewrites graph output entries equal to `from` to `to`, leaving node
    /// uses untouched.
    pub fn replace_output_value(&mut self, from: ValueId, to: ValueId) {
        for output in &mut self.outputs {
            if *output == from {
                *output = to;
            }
        }
    }

    /// Replaces every use of `from` (node inputs and graph outputs) with `to`.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        if from == to {
            return;
        }
        let uses: Vec<Use> = self.values[from.0 as usize].uses.to_vec();
        for u in uses {
            self.replace_input(u.node, u.slot, to);
        }
        for output in &mut self.outputs {
            if *output == from {
                *output = to;
            }
        }
    }

    /// Erases a node from the graph. Its outputs must be unused and must not
    /// be graph outputs.
    pub fn erase_node(&mut self, node: NodeId) {
        for &out in self.node_arena[node.0 as usize].outputs.clone().iter() {
            assert!(
                self.values[out.0 as usize].uses.is_empty(),
                "erasing node with live uses of {:?}",
                out
            );
            assert!(!self.is_output(out), "erasing node producing a graph output");
        }
        let inputs: SmallVec<[ValueId; 4]> = self.node_arena[node.0 as usize].inputs.clone();
        for (slot, input) in inputs.iter().enumerate() {
            let uses = &mut self.values[input.0 as usize].uses;
            if let Some(pos) = uses
                .iter()
                .position(|u| u.node == node && u.slot == slot)
            {
                uses.remove(pos);
            }
        }
        self.node_arena[node.0 as usize].dead = true;
        if let Some(pos) = self.position(node) {
            self.order.remove(pos);
        }
    }

    /// Rebuilds the graph with compact, traversal-ordered ids: inputs first,
    /// then each live node's outputs in execution order. Returns the
    /// renumbered graph and whether anything changed.
    pub fn renumbered(&self) -> (Graph, bool) {
        let mut out = Graph::new();
        let mut remap: Vec<Option<ValueId>> = vec![None; self.values.len()];
        for &input in &self.inputs {
            let nv = out.add_input(
                self.value_name(input).map(str::to_owned),
                self.value_type(input).clone(),
            );
            remap[input.0 as usize] = Some(nv);
        }
        for node in self.nodes() {
            let inputs: Vec<ValueId> = self
                .node_inputs(node)
                .iter()
                .map(|v| remap[v.0 as usize].expect("input defined before use"))
                .collect();
            let out_types: Vec<TypeKind> = self
                .node_outputs(node)
                .iter()
                .map(|v| self.value_type(*v).clone())
                .collect();
            let new_node = out.add_node(self.kind(node), &inputs, &out_types);
            if let Some(ival) = self.node_ival(node) {
                out.set_node_ival(new_node, ival.clone());
            }
            if let Some(callee) = self.subgraph(node) {
                out.set_subgraph(new_node, Arc::clone(callee));
            }
            for (old, new) in self
                .node_outputs(node)
                .iter()
                .zip(out.node_outputs(new_node).to_vec())
            {
                if let Some(name) = self.value_name(*old) {
                    out.set_value_name(new, name.to_owned());
                }
                remap[old.0 as usize] = Some(new);
            }
        }
        for &output in &self.outputs {
            out.register_output(remap[output.0 as usize].expect("output must be defined"));
        }
        let ids_canonical = remap
            .iter()
            .enumerate()
            .all(|(index, mapped)| mapped.map_or(true, |v| v.0 as usize == index))
            && self
                .order
                .iter()
                .enumerate()
                .all(|(index, node)| node.0 as usize == index);
        let changed = !ids_canonical
            || out.values.len() != self.values.len()
            || out.node_arena.len() != self.node_arena.len();
        (out, changed)
    }
}
