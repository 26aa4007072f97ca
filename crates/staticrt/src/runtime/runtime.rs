//! The static runtime: value table, processed nodes, and the invocation loop.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use smallvec::SmallVec;

use crate::ir::{kinds, ValueId};
use crate::tensor::{IValue, InferenceGuard, Tensor};

use super::error::RuntimeError;
use super::liveness;
use super::module::InferenceModule;
use super::node::{ProcessedNode, SlotId, SlotTable};
use super::planner::MemoryPlanner;

/// Executes one optimised graph repeatedly with minimal per-invocation
/// overhead.
///
/// A runtime owns its value table, processed nodes, and memory planner, and
/// is not thread-safe: share the [`InferenceModule`] across threads and build
/// one runtime per thread instead.
pub struct StaticRuntime {
    module: Arc<InferenceModule>,
    slots: SlotTable,
    n_inputs: usize,
    nodes: Vec<ProcessedNode>,
    outputs: Vec<SlotId>,
    val_to_slot: HashMap<ValueId, SlotId>,
    planner: Option<MemoryPlanner>,
}

impl StaticRuntime {
    /// Materialises the value table and processed nodes for a module.
    pub fn new(module: Arc<InferenceModule>) -> Result<StaticRuntime, RuntimeError> {
        let graph = module.graph();
        let mut val_to_slot: HashMap<ValueId, SlotId> = HashMap::new();
        let mut next_slot: u32 = 0;

        for &input in graph.inputs() {
            val_to_slot.insert(input, SlotId(next_slot));
            next_slot += 1;
        }

        // Constants are evaluated once, before any processed node exists, so
        // node inputs can reference stable slots.
        let mut constant_values: Vec<(ValueId, IValue)> = Vec::new();
        for node in graph.nodes() {
            if graph.kind(node) != kinds::constant() {
                continue;
            }
            let value = graph.node_outputs(node)[0];
            let payload = graph
                .node_ival(node)
                .cloned()
                .ok_or_else(|| RuntimeError::Operator(anyhow!("constant without payload")))?;
            val_to_slot.insert(value, SlotId(next_slot));
            next_slot += 1;
            constant_values.push((value, payload));
        }

        // Lay out per-node output slots and build the processed nodes.
        let mut planned: Vec<(crate::ir::NodeId, SmallVec<[SlotId; 4]>, u32)> = Vec::new();
        for node in graph.nodes() {
            if graph.kind(node) == kinds::constant() {
                continue;
            }
            let inputs: SmallVec<[SlotId; 4]> = graph
                .node_inputs(node)
                .iter()
                .map(|v| val_to_slot[v])
                .collect();
            let output_start = next_slot;
            for &out in graph.node_outputs(node) {
                val_to_slot.insert(out, SlotId(next_slot));
                next_slot += 1;
            }
            planned.push((node, inputs, output_start));
        }

        let mut slots = SlotTable::with_len(next_slot as usize);
        for (value, payload) in constant_values {
            *slots.get_mut(val_to_slot[&value]) = payload;
        }

        let enable_out_variant = module.options().enable_out_variant;
        let mut nodes = Vec::with_capacity(planned.len());
        for (node, inputs, output_start) in planned {
            nodes.push(ProcessedNode::new(
                graph,
                node,
                inputs,
                output_start,
                enable_out_variant,
            )?);
        }

        let outputs = graph.outputs().iter().map(|v| val_to_slot[v]).collect();
        let n_inputs = graph.inputs().len();

        Ok(StaticRuntime {
            module,
            slots,
            n_inputs,
            nodes,
            outputs,
            val_to_slot,
            planner: None,
        })
    }

    /// Convenience constructor: optimises `graph` into a fresh module and
    /// wraps it. Use [`InferenceModule`] directly to share the optimised
    /// graph across several runtimes.
    pub fn from_graph(
        graph: &crate::ir::Graph,
        opts: super::module::InferenceModuleOptions,
    ) -> Result<StaticRuntime, RuntimeError> {
        let module = Arc::new(InferenceModule::from_graph(graph, opts)?);
        StaticRuntime::new(module)
    }

    pub fn module(&self) -> &InferenceModule {
        &self.module
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Bytes of pooled intermediate storage, zero before the plan is sized.
    pub fn total_managed(&self) -> usize {
        self.planner.as_ref().map_or(0, MemoryPlanner::total_managed)
    }

    /// The memory plan, present after the first cleanup-enabled invocation.
    pub fn memory_plan(&self) -> Option<&MemoryPlanner> {
        self.planner.as_ref()
    }

    pub(crate) fn processed_nodes(&self) -> &[ProcessedNode] {
        &self.nodes
    }

    pub(crate) fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub(crate) fn slot_of(&self, value: ValueId) -> SlotId {
        self.val_to_slot[&value]
    }

    pub(crate) fn output_slots(&self) -> &[SlotId] {
        &self.outputs
    }

    /// Runs the graph on positional and keyword arguments.
    pub fn run(
        &mut self,
        args: Vec<IValue>,
        kwargs: &HashMap<String, IValue>,
    ) -> Result<IValue, RuntimeError> {
        // Inference workloads never need autograd bookkeeping; entering the
        // guard once per invocation keeps kernels off any tracking paths.
        let _no_autograd = InferenceGuard::new();

        self.allocate_if_planned();
        self.bind_inputs(args, kwargs)?;

        // Execution order is exactly the topological order recorded at
        // construction; the memory plan is derived from that order.
        self.execute_nodes()?;

        if self.module.options().cleanup_activations {
            self.cleanup();
            // Drop the owning refs of the input tensors.
            for index in 0..self.n_inputs {
                *self.slots.get_mut(SlotId(index as u32)) = IValue::None;
            }
        }

        let result = if self.num_outputs() > 1 {
            let values: Vec<IValue> = self
                .outputs
                .clone()
                .into_iter()
                .map(|slot| self.slots.take(slot))
                .collect();
            IValue::tuple(values)
        } else {
            self.slots.take(self.outputs[0])
        };

        #[cfg(debug_assertions)]
        self.check_for_memory_leak(false);

        Ok(result)
    }

    /// Convenience overload: tensor inputs in, tensor outputs out.
    pub fn run_tensors(&mut self, inputs: &[Tensor]) -> Result<Vec<Tensor>, RuntimeError> {
        let args: Vec<IValue> = inputs.iter().cloned().map(IValue::Tensor).collect();
        let result = self.run(args, &HashMap::new())?;
        match result {
            IValue::Tuple(elements) => elements
                .iter()
                .map(|element| {
                    element
                        .as_tensor()
                        .cloned()
                        .map_err(RuntimeError::Operator)
                })
                .collect(),
            other => Ok(vec![other.as_tensor().cloned().map_err(RuntimeError::Operator)?]),
        }
    }

    pub(crate) fn bind_inputs(
        &mut self,
        mut args: Vec<IValue>,
        kwargs: &HashMap<String, IValue>,
    ) -> Result<(), RuntimeError> {
        if !kwargs.is_empty() {
            let schema = self
                .module
                .schema()
                .ok_or(RuntimeError::SchemaRequired)?;
            schema.check_and_normalize_inputs(&mut args, kwargs)?;
        }
        if args.len() != self.n_inputs {
            return Err(RuntimeError::Operator(anyhow!(
                "graph takes {} inputs, got {}",
                self.n_inputs,
                args.len()
            )));
        }
        for (index, value) in args.into_iter().enumerate() {
            *self.slots.get_mut(SlotId(index as u32)) = value;
        }
        Ok(())
    }

    pub(crate) fn run_node(&mut self, index: usize) -> Result<(), RuntimeError> {
        self.nodes[index].run(&mut self.slots)
    }

    pub(crate) fn execute_nodes(&mut self) -> Result<(), RuntimeError> {
        for index in 0..self.nodes.len() {
            self.run_node(index)?;
        }
        Ok(())
    }

    pub(crate) fn cleanup(&mut self) {
        if !self.module.options().cleanup_activations {
            return;
        }
        if self.planner.is_none() {
            let shared = if self.module.options().optimize_memory {
                let graph = self.module.graph();
                let info = liveness::liveness_map(graph);
                let optimizable = liveness::optimizable_values(graph);
                liveness::derive_shared_groups(graph, &info, &optimizable)
            } else {
                HashMap::new()
            };
            let planner = MemoryPlanner::new(self, &shared);
            self.planner = Some(planner);
        }
        let planner = self.planner.as_mut().expect("planner just constructed");
        planner.deallocate(&mut self.slots);
    }

    pub(crate) fn allocate_if_planned(&mut self) {
        if let Some(planner) = &mut self.planner {
            planner.allocate();
        }
    }

    /// Verifies the post-run invariant: with cleanup enabled, every input
    /// slot is none and every intermediate managed tensor's storage has been
    /// released (the storage object itself stays alive). With
    /// `output_returned`, output slots must have been moved out too.
    ///
    /// Panics on violation; compiled-out of release `run` calls.
    pub fn check_for_memory_leak(&self, output_returned: bool) {
        if !self.module.options().cleanup_activations {
            return;
        }
        for index in 0..self.n_inputs {
            assert!(
                self.slots.get(SlotId(index as u32)).is_none(),
                "input {index} was not cleaned up"
            );
        }
        let output_set: std::collections::HashSet<SlotId> =
            self.outputs.iter().copied().collect();
        for (node_index, pnode) in self.nodes.iter().enumerate() {
            for (slot_index, slot) in pnode.output_slots().enumerate() {
                let value = self.slots.get(slot);
                if output_set.contains(&slot) {
                    if output_returned {
                        assert!(
                            value.is_none(),
                            "output {slot_index} of node {node_index} was not moved out"
                        );
                    }
                    continue;
                }
                if value.is_none() {
                    continue;
                }
                match value {
                    IValue::Tensor(tensor) => assert!(
                        tensor.storage().data().is_null(),
                        "output {slot_index} of node {node_index} was not cleaned up"
                    ),
                    other => panic!(
                        "output {slot_index} of node {node_index} was not cleaned up (still {})",
                        other.tag_name()
                    ),
                }
            }
        }
    }
}
