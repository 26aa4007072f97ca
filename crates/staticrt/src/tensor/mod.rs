//! Tensor substrate consumed by the runtime: dtypes, shapes, storages with
//! planner-resettable data pointers, the caching allocator, and the tagged
//! [`IValue`] container.

pub mod alloc;
pub mod dtype;
pub mod ivalue;
pub mod shape;
pub mod storage;
#[allow(clippy::module_inception)]
mod tensor;

use std::cell::Cell;

pub use alloc::{align_up, caching_allocator, DataPtr, Device, ALIGNMENT};
pub use dtype::{DType, Element};
pub use ivalue::IValue;
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::Tensor;

thread_local! {
    static INFERENCE_MODE: Cell<bool> = const { Cell::new(false) };
}

/// Scope guard marking the current thread as running inference.
///
/// Inference workloads never need gradient bookkeeping, so the runtime enters
/// this mode for the duration of every invocation. Kernels may consult
/// [`inference_mode_enabled`] to skip any tracking work.
pub struct InferenceGuard {
    previous: bool,
}

impl InferenceGuard {
    pub fn new() -> InferenceGuard {
        let previous = INFERENCE_MODE.with(|mode| mode.replace(true));
        InferenceGuard { previous }
    }
}

impl Default for InferenceGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InferenceGuard {
    fn drop(&mut self) {
        INFERENCE_MODE.with(|mode| mode.set(self.previous));
    }
}

/// Whether the current thread is inside an [`InferenceGuard`] scope.
pub fn inference_mode_enabled() -> bool {
    INFERENCE_MODE.with(Cell::get)
}
