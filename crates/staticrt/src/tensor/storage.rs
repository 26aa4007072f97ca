//! Resettable tensor storage with a planner-controlled data pointer.
//!
//! Storages are shared by reference count: view tensors hold handles to the
//! same `StorageImpl`. Mutation goes through interior access without a lock;
//! the resource model makes that sound: a storage is only ever mutated by the
//! single-threaded runtime that owns it, and the only storages visible to
//! more than one runtime are module constants, which no runtime mutates.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;

use super::alloc::{DataPtr, Device};

enum StorageData {
    /// No backing memory. This is the state after [`Storage::reset`].
    Empty,
    /// Memory owned by this storage, allocated when a kernel resized past the
    /// current capacity.
    Owned(DataPtr),
    /// Memory borrowed from the planner's pooled buffer. The pointer is valid
    /// only between the planner's `allocate()` and `deallocate()` calls.
    Borrowed(*mut u8),
}

/// Backing store of one or more tensors.
///
/// The storage identity (the cell address) is what the memory planner groups
/// on: view tensors share the same `StorageImpl`, so a group never contains
/// the same memory twice.
struct StorageImpl {
    data: StorageData,
    nbytes: usize,
    device: Device,
}

impl StorageImpl {
    fn data(&self) -> *mut u8 {
        match &self.data {
            StorageData::Empty => std::ptr::null_mut(),
            StorageData::Owned(ptr) => ptr.as_ptr(),
            StorageData::Borrowed(ptr) => *ptr,
        }
    }
}

struct StorageCell {
    inner: UnsafeCell<StorageImpl>,
}

// Sound under the single-mutator contract above; the raw Borrowed pointer is
// owned by the planner of the same runtime.
unsafe impl Send for StorageCell {}
unsafe impl Sync for StorageCell {}

/// Shared handle to a storage cell.
#[derive(Clone)]
pub struct Storage {
    cell: Arc<StorageCell>,
}

impl Storage {
    /// Creates a storage with no backing memory.
    pub fn empty() -> Storage {
        Storage {
            cell: Arc::new(StorageCell {
                inner: UnsafeCell::new(StorageImpl {
                    data: StorageData::Empty,
                    nbytes: 0,
                    device: Device::Cpu,
                }),
            }),
        }
    }

    /// Creates a storage owning a fresh zeroed allocation of `nbytes`.
    pub fn with_nbytes(nbytes: usize) -> Storage {
        let storage = Storage::empty();
        storage.ensure_capacity(nbytes);
        storage
    }

    fn inner(&self) -> &StorageImpl {
        unsafe { &*self.cell.inner.get() }
    }

    #[allow(clippy::mut_from_ref)]
    fn inner_mut(&self) -> &mut StorageImpl {
        unsafe { &mut *self.cell.inner.get() }
    }

    /// Guarantees at least `nbytes` of writable memory, replacing the current
    /// pointer with an owned allocation when the capacity is insufficient.
    /// Growing a pool-borrowed storage detaches it from the pool; the next
    /// deallocate() round observes the larger size and regrows the group.
    pub fn ensure_capacity(&self, nbytes: usize) {
        let inner = self.inner_mut();
        let needs_alloc = inner.nbytes < nbytes || matches!(inner.data, StorageData::Empty);
        if needs_alloc && nbytes > 0 {
            inner.data = StorageData::Owned(DataPtr::heap(nbytes));
            inner.nbytes = nbytes;
        }
    }

    /// Current capacity in bytes.
    pub fn nbytes(&self) -> usize {
        self.inner().nbytes
    }

    /// Overwrites the recorded capacity without touching the data pointer.
    pub fn set_nbytes(&self, nbytes: usize) {
        self.inner_mut().nbytes = nbytes;
    }

    pub fn device(&self) -> Device {
        self.inner().device
    }

    /// Raw data pointer, or null when the storage has been reset.
    pub fn data(&self) -> *mut u8 {
        self.inner().data()
    }

    /// Points this storage at externally-owned memory without releasing the
    /// current pointer first. Used exclusively by the memory planner when
    /// assigning pool offsets.
    pub fn set_data_ptr_noswap(&self, ptr: *mut u8) {
        self.inner_mut().data = StorageData::Borrowed(ptr);
    }

    /// Drops the data pointer and zeroes the capacity. The storage object
    /// itself stays alive so tensors referencing it remain valid.
    pub fn reset(&self) {
        let inner = self.inner_mut();
        inner.data = StorageData::Empty;
        inner.nbytes = 0;
    }

    /// Identity key for planner grouping: two handles share a key iff they
    /// reference the same storage cell.
    pub fn impl_key(&self) -> usize {
        Arc::as_ptr(&self.cell) as usize
    }

    pub fn same_impl(&self, other: &Storage) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner();
        f.debug_struct("Storage")
            .field("nbytes", &inner.nbytes)
            .field("null", &inner.data().is_null())
            .finish()
    }
}
