//! Memory planner: pools the backing storage of managed intermediates into
//! one contiguous buffer reused across invocations.
//!
//! The first cleanup-enabled invocation runs with `managed_bytes == 0`; its
//! only effect is to discover each group's high-water size during
//! `deallocate`. From the second invocation onward `allocate` hands every
//! group a precomputed offset inside a single caching-allocator buffer.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ir::{kinds, TypeKind, ValueId};
use crate::ops::registry;
use crate::tensor::{align_up, caching_allocator, DataPtr, IValue, Storage};

use super::node::SlotTable;
use super::runtime::StaticRuntime;

/// A set of storages drawing from one region of the pooled buffer because
/// their values are never simultaneously live.
struct StorageGroup {
    /// Aligned high-water size in bytes; zero until the first deallocate.
    size: usize,
    storages: Vec<Storage>,
}

/// Owns the pooled buffer and the managed/unmanaged partition for one
/// runtime.
pub struct MemoryPlanner {
    groups: Vec<StorageGroup>,
    unmanaged: Vec<super::node::SlotId>,
    managed_bytes: usize,
    buffer: Option<DataPtr>,
}

impl MemoryPlanner {
    /// Builds the plan from the runtime's value table snapshot taken after a
    /// completed invocation. `should_share` maps a group founder to the
    /// values forced into its group.
    pub(crate) fn new(
        runtime: &StaticRuntime,
        should_share: &HashMap<ValueId, Vec<ValueId>>,
    ) -> MemoryPlanner {
        let graph = runtime.module().graph();
        let graph_inputs: HashSet<ValueId> = graph.inputs().iter().copied().collect();

        // Partition node outputs into managed values and unmanaged slots.
        let mut managed_values: HashSet<ValueId> = HashSet::new();
        let mut unmanaged_slots: HashSet<super::node::SlotId> = HashSet::new();
        for pnode in runtime.processed_nodes() {
            let node = pnode.node_id();
            let mut should_manage = pnode.has_out_variant();
            if should_manage && registry::is_view_op(graph.kind(node)) {
                // A view of a graph input shares the caller's storage;
                // managing it would release memory the runtime does not own.
                for input in graph.node_inputs(node) {
                    if graph_inputs.contains(input) {
                        should_manage = false;
                        break;
                    }
                }
            }
            if should_manage {
                for &value in graph.node_outputs(node) {
                    if *graph.value_type(value) == TypeKind::Tensor {
                        managed_values.insert(value);
                    }
                }
            } else {
                for &value in graph.node_outputs(node) {
                    unmanaged_slots.insert(runtime.slot_of(value));
                }
            }
        }

        // Elements of output tuples/lists are refcounted aggregates; the
        // planner must neither manage nor hold references to them.
        for &output in graph.outputs() {
            let producer_kind = graph.producer_kind(output);
            if producer_kind == Some(kinds::tuple_construct())
                || producer_kind == Some(kinds::list_construct())
            {
                let (node, _) = graph.producer(output).expect("aggregate has a producer");
                for &element in graph.node_inputs(node) {
                    managed_values.remove(&element);
                    if !graph_inputs.contains(&element) {
                        unmanaged_slots.insert(runtime.slot_of(element));
                    }
                }
            }
        }

        // Direct graph outputs stay untouched between invocations.
        for &output in graph.outputs() {
            managed_values.remove(&output);
        }
        for slot in runtime.output_slots() {
            unmanaged_slots.remove(slot);
        }

        let mut unmanaged: Vec<super::node::SlotId> = unmanaged_slots.into_iter().collect();
        unmanaged.sort_unstable();

        // Snapshot the storage of every managed value. The first value that
        // introduces a storage founds a group; views sharing that storage are
        // deduplicated, and `should_share` companions join the founder.
        let mut groups: Vec<StorageGroup> = Vec::new();
        let mut shared: HashMap<ValueId, usize> = HashMap::new();
        let mut seen_storages: HashSet<usize> = HashSet::new();
        for pnode in runtime.processed_nodes() {
            let node = pnode.node_id();
            for &value in graph.node_outputs(node) {
                if !managed_values.contains(&value) {
                    continue;
                }
                let slot = runtime.slot_of(value);
                let tensor = runtime
                    .slots()
                    .get(slot)
                    .as_tensor()
                    .expect("managed value must hold a tensor after a run");
                let storage = tensor.storage().clone();
                if !seen_storages.insert(storage.impl_key()) {
                    continue;
                }
                if let Some(&index) = shared.get(&value) {
                    groups[index].storages.push(storage);
                } else {
                    groups.push(StorageGroup {
                        size: 0,
                        storages: vec![storage],
                    });
                    if let Some(companions) = should_share.get(&value) {
                        for &companion in companions {
                            shared.insert(companion, groups.len() - 1);
                        }
                    }
                }
            }
        }

        debug!(
            groups = groups.len(),
            unmanaged = unmanaged.len(),
            "memory plan constructed"
        );

        MemoryPlanner {
            groups,
            unmanaged,
            managed_bytes: 0,
            buffer: None,
        }
    }

    /// Bytes of pooled storage this planner will request on the next
    /// `allocate`.
    pub fn total_managed(&self) -> usize {
        self.managed_bytes
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Aligned size of one storage group. Group 0 is the default group; its
    /// size is reported exactly like every other group's.
    pub fn group_size(&self, index: usize) -> usize {
        self.groups[index].size
    }

    pub(crate) fn group_storages(&self, index: usize) -> &[Storage] {
        &self.groups[index].storages
    }

    /// Draws one buffer from the caching allocator and assigns every group
    /// its offset. A no-op while `managed_bytes` is still zero.
    pub fn allocate(&mut self) {
        if self.managed_bytes == 0 {
            return;
        }
        let buffer = caching_allocator().allocate(self.managed_bytes);
        let start = buffer.as_ptr();
        let mut offset = 0usize;
        for group in &self.groups {
            if group.size == 0 {
                continue;
            }
            debug_assert!(offset + group.size <= self.managed_bytes);
            let region = unsafe { start.add(offset) };
            for storage in &group.storages {
                storage.set_data_ptr_noswap(region);
                storage.set_nbytes(group.size);
            }
            offset += group.size;
        }
        debug_assert_eq!(offset, self.managed_bytes);
        self.buffer = Some(buffer);
    }

    /// Releases managed data pointers (keeping the storage and tensor objects
    /// alive), records each group's new high-water size, resets unmanaged
    /// slots, and returns the buffer to the caching allocator.
    pub fn deallocate(&mut self, slots: &mut SlotTable) {
        self.managed_bytes = 0;
        for group in &mut self.groups {
            let mut max = 0usize;
            for storage in &group.storages {
                max = max.max(align_up(storage.nbytes()));
                storage.reset();
            }
            group.size = max;
            self.managed_bytes += max;
        }
        for &slot in &self.unmanaged {
            *slots.get_mut(slot) = IValue::None;
        }
        self.buffer = None;
        debug!(managed_bytes = self.managed_bytes, "memory plan sized");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::ir::parse_graph;
    use crate::runtime::liveness;
    use crate::runtime::{InferenceModule, InferenceModuleOptions, StaticRuntime};
    use crate::tensor::{IValue, Tensor};

    const CHAIN: &str = r#"
        graph(%inp):
          %a = aten::add(%inp, %inp)
          %b = aten::add(%a, %a)
          %c = aten::mul(%b, %b)
          %d = aten::mul(%c, %c)
          %e = aten::sigmoid(%d)
          return (%e)
    "#;

    fn runtime_after_two_runs() -> StaticRuntime {
        let graph = parse_graph(CHAIN).unwrap();
        let module = Arc::new(
            InferenceModule::from_graph(&graph, InferenceModuleOptions::default()).unwrap(),
        );
        let mut runtime = StaticRuntime::new(module).unwrap();
        for _ in 0..2 {
            runtime
                .run(
                    vec![IValue::Tensor(Tensor::from_f32(vec![0.5, 0.25, 0.125]))],
                    &HashMap::new(),
                )
                .unwrap();
        }
        runtime
    }

    #[test]
    fn storages_in_one_group_never_interfere() {
        let runtime = runtime_after_two_runs();
        let graph = runtime.module().graph();
        let info = liveness::liveness_map(graph);

        // Map storage identity back to the values whose slots hold it.
        let mut by_storage: HashMap<usize, Vec<crate::ir::ValueId>> = HashMap::new();
        for pnode in runtime.processed_nodes() {
            for &value in graph.node_outputs(pnode.node_id()) {
                if let IValue::Tensor(t) = runtime.slots().get(runtime.slot_of(value)) {
                    by_storage
                        .entry(t.storage().impl_key())
                        .or_default()
                        .push(value);
                }
            }
        }

        let plan = runtime.memory_plan().expect("plan exists");
        for index in 0..plan.group_count() {
            let members: Vec<crate::ir::ValueId> = plan
                .group_storages(index)
                .iter()
                .filter_map(|storage| by_storage.get(&storage.impl_key()))
                .flatten()
                .copied()
                .collect();
            for (i, &m) in members.iter().enumerate() {
                for &n in &members[i + 1..] {
                    assert!(
                        !info.liveness_map[&m].contains(&n),
                        "{m:?} and {n:?} share a group but interfere"
                    );
                }
            }
        }
    }

    #[test]
    fn deallocate_releases_data_but_keeps_storages() {
        let runtime = runtime_after_two_runs();
        let plan = runtime.memory_plan().expect("plan exists");
        assert!(plan.total_managed() > 0);
        for index in 0..plan.group_count() {
            for storage in plan.group_storages(index) {
                assert!(storage.data().is_null(), "data released after deallocate");
                assert_eq!(storage.nbytes(), 0);
            }
        }
    }
}
