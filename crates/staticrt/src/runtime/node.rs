//! Processed nodes: fused records of node, input slots, output slots, and
//! the dispatch strategy chosen at construction.

use std::ops::Range;

use smallvec::SmallVec;
use tracing::debug;

use crate::ir::{kinds, Graph, NodeId, Symbol};
use crate::ops::registry::{self, OpFn};
use crate::tensor::IValue;

use super::error::RuntimeError;

/// Index of one IValue slot in a runtime's value table. Slot indices are
/// stable for the runtime's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

/// Arena of runtime values: graph inputs, constants, and node outputs, in
/// that order.
pub struct SlotTable {
    slots: Vec<IValue>,
}

impl SlotTable {
    pub fn with_len(len: usize) -> SlotTable {
        SlotTable {
            slots: vec![IValue::None; len],
        }
    }

    pub fn get(&self, slot: SlotId) -> &IValue {
        &self.slots[slot.0 as usize]
    }

    pub fn get_mut(&mut self, slot: SlotId) -> &mut IValue {
        &mut self.slots[slot.0 as usize]
    }

    /// Moves the value out of a slot, leaving `None`.
    pub fn take(&mut self, slot: SlotId) -> IValue {
        std::mem::take(self.get_mut(slot))
    }

    pub fn slice_mut(&mut self, range: Range<u32>) -> &mut [IValue] {
        &mut self.slots[range.start as usize..range.end as usize]
    }
}

enum Dispatch {
    /// Out-variant operation writing into planner-owned storage.
    Out(OpFn),
    /// Native operation without storage management.
    Native(OpFn),
    /// Generic stack interpreter.
    Fallback,
    /// Inline aggregate moves; no operator lookup.
    ListConstruct,
    TupleConstruct,
    ListUnpack,
}

/// One executable node: resolved input slots, embedded output slots, and the
/// dispatch function selected when the runtime was built.
pub struct ProcessedNode {
    node: NodeId,
    kind: Symbol,
    inputs: SmallVec<[SlotId; 4]>,
    outputs: Range<u32>,
    dispatch: Dispatch,
}

impl ProcessedNode {
    pub(crate) fn new(
        graph: &Graph,
        node: NodeId,
        inputs: SmallVec<[SlotId; 4]>,
        output_start: u32,
        enable_out_variant: bool,
    ) -> Result<ProcessedNode, RuntimeError> {
        let kind = graph.kind(node);
        let n_outputs = graph.node_outputs(node).len() as u32;
        let outputs = output_start..output_start + n_outputs;

        let dispatch = if kind == kinds::list_construct() {
            Dispatch::ListConstruct
        } else if kind == kinds::tuple_construct() {
            Dispatch::TupleConstruct
        } else if kind == kinds::list_unpack() {
            Dispatch::ListUnpack
        } else if !registry::has_operation(kind) {
            return Err(RuntimeError::OperatorMissing(kind.to_string()));
        } else if enable_out_variant && registry::has_out_variant(kind) {
            debug!(node = %kind, "switch to out variant");
            Dispatch::Out(registry::get_out_of_place_operation(kind).expect("out variant exists"))
        } else if registry::can_run_natively(kind) {
            debug!(node = %kind, "switch to native impl");
            Dispatch::Native(registry::get_native_operation(kind).expect("native impl exists"))
        } else {
            debug!(node = %kind, "fallback interpreter");
            Dispatch::Fallback
        };

        Ok(ProcessedNode {
            node,
            kind,
            inputs,
            outputs,
            dispatch,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn kind(&self) -> Symbol {
        self.kind
    }

    pub fn input_slots(&self) -> &[SlotId] {
        &self.inputs
    }

    pub fn output_slots(&self) -> impl Iterator<Item = SlotId> {
        self.outputs.clone().map(SlotId)
    }

    /// Whether the out-variant strategy was selected for this node.
    pub fn has_out_variant(&self) -> bool {
        matches!(self.dispatch, Dispatch::Out(_))
    }

    fn gather_inputs(&self, slots: &SlotTable) -> SmallVec<[IValue; 4]> {
        self.inputs.iter().map(|&s| slots.get(s).clone()).collect()
    }

    /// Executes the node against the value table.
    pub fn run(&self, slots: &mut SlotTable) -> Result<(), RuntimeError> {
        match &self.dispatch {
            Dispatch::Out(f) | Dispatch::Native(f) => {
                let inputs = self.gather_inputs(slots);
                let outputs = slots.slice_mut(self.outputs.clone());
                f(&inputs, outputs).map_err(RuntimeError::Operator)
            }
            Dispatch::ListConstruct => {
                let elements = self.gather_inputs(slots);
                let all_ints = elements.iter().all(|v| matches!(v, IValue::Int(_)));
                let list = if all_ints && !elements.is_empty() {
                    IValue::IntList(
                        elements
                            .iter()
                            .map(|v| v.as_int().expect("int element"))
                            .collect(),
                    )
                } else {
                    IValue::List(elements.into_vec())
                };
                *slots.get_mut(SlotId(self.outputs.start)) = list;
                Ok(())
            }
            Dispatch::TupleConstruct => {
                let elements = self.gather_inputs(slots);
                *slots.get_mut(SlotId(self.outputs.start)) = IValue::tuple(elements.into_vec());
                Ok(())
            }
            Dispatch::ListUnpack => {
                let container = slots.get(self.inputs[0]).clone();
                let elements: Vec<IValue> = match container {
                    IValue::List(items) => items,
                    IValue::IntList(items) => items.into_iter().map(IValue::Int).collect(),
                    IValue::Tuple(items) => items.as_ref().clone(),
                    other => {
                        return Err(RuntimeError::Operator(anyhow::anyhow!(
                            "cannot unpack {}",
                            other.tag_name()
                        )))
                    }
                };
                let expected = self.outputs.len();
                if elements.len() != expected {
                    return Err(RuntimeError::ArityMismatch {
                        kind: self.kind.to_string(),
                        expected,
                        actual: elements.len(),
                    });
                }
                for (offset, element) in elements.into_iter().enumerate() {
                    *slots.get_mut(SlotId(self.outputs.start + offset as u32)) = element;
                }
                Ok(())
            }
            Dispatch::Fallback => {
                let mut stack: Vec<IValue> = self.gather_inputs(slots).into_vec();
                let expected = self.outputs.len();
                registry::run_fallback(self.kind, &mut stack, expected)
                    .map_err(RuntimeError::Operator)?;
                if stack.len() != expected {
                    return Err(RuntimeError::ArityMismatch {
                        kind: self.kind.to_string(),
                        expected,
                        actual: stack.len(),
                    });
                }
                for (offset, value) in stack.into_iter().enumerate() {
                    *slots.get_mut(SlotId(self.outputs.start + offset as u32)) = value;
                }
                Ok(())
            }
        }
    }
}
