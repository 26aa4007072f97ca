//! Aligned raw buffers and the process-wide caching allocator.
//!
//! The memory planner draws its pooled buffer from a caching allocator so that
//! the per-invocation allocate/release cycle does not hit the system allocator
//! every run. Returned buffers are binned by size class (rounded up to the
//! nearest power of two) and handed back on the next request of the same
//! class.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Mutex;

use once_cell::sync::Lazy;

/// Minimum alignment of every buffer handed out by this module. Matches the
/// alignment the planner uses when rounding storage sizes.
pub const ALIGNMENT: usize = 64;

/// Minimum size class: requests below this are rounded up before binning.
const MIN_SIZE_CLASS: usize = 256;

/// The execution device a storage lives on. Only the host is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
}

enum Origin {
    /// Plain aligned heap allocation; freed on drop.
    Heap,
    /// Drawn from the caching allocator; returned to its free list on drop.
    Cached,
}

/// An owned, aligned, zero-initialised byte buffer.
///
/// Dropping a heap buffer frees it; dropping a cached buffer returns it to
/// the caching allocator's free list.
pub struct DataPtr {
    ptr: NonNull<u8>,
    size: usize,
    origin: Origin,
}

impl DataPtr {
    fn alloc(size: usize, origin: Origin) -> DataPtr {
        let layout = Layout::from_size_align(size.max(1), ALIGNMENT).expect("invalid layout");
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).expect("allocation failed");
        DataPtr { ptr, size, origin }
    }

    /// Allocates an aligned heap buffer of exactly `size` bytes.
    pub fn heap(size: usize) -> DataPtr {
        DataPtr::alloc(size, Origin::Heap)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for DataPtr {
    fn drop(&mut self) {
        match self.origin {
            Origin::Heap => {
                let layout =
                    Layout::from_size_align(self.size.max(1), ALIGNMENT).expect("invalid layout");
                unsafe { dealloc(self.ptr.as_ptr(), layout) };
            }
            Origin::Cached => caching_allocator().give_back(self.ptr, self.size),
        }
    }
}

// The buffer owns its memory exclusively; the raw pointer is never shared
// outside the storage that borrows it between allocate() and deallocate().
unsafe impl Send for DataPtr {}

/// Free-list caching allocator binned by power-of-two size class.
pub struct CachingAllocator {
    free: Mutex<HashMap<usize, Vec<NonNull<u8>>>>,
}

// NonNull pointers in the free list reference exclusively-owned allocations.
unsafe impl Send for CachingAllocator {}
unsafe impl Sync for CachingAllocator {}

impl CachingAllocator {
    fn new() -> Self {
        CachingAllocator {
            free: Mutex::new(HashMap::new()),
        }
    }

    fn size_class(nbytes: usize) -> usize {
        nbytes.max(MIN_SIZE_CLASS).next_power_of_two()
    }

    /// Allocates a buffer of at least `nbytes`, reusing a cached one when the
    /// size class has a free entry.
    pub fn allocate(&self, nbytes: usize) -> DataPtr {
        let class = Self::size_class(nbytes);
        let cached = {
            let mut free = self.free.lock().expect("allocator poisoned");
            free.get_mut(&class).and_then(Vec::pop)
        };
        match cached {
            Some(ptr) => {
                // Reused buffers carry stale bytes; the planner overwrites
                // every managed region before reads, so no zeroing here.
                DataPtr {
                    ptr,
                    size: class,
                    origin: Origin::Cached,
                }
            }
            None => DataPtr::alloc(class, Origin::Cached),
        }
    }

    fn give_back(&self, ptr: NonNull<u8>, size: usize) {
        let mut free = self.free.lock().expect("allocator poisoned");
        free.entry(size).or_default().push(ptr);
    }
}

static ALLOCATOR: Lazy<CachingAllocator> = Lazy::new(CachingAllocator::new);

/// Returns the process-wide caching allocator consulted for pool buffers.
pub fn caching_allocator() -> &'static CachingAllocator {
    &ALLOCATOR
}

/// Rounds `nbytes` up to the global alignment. Already-aligned sizes are
/// returned unchanged.
pub fn align_up(nbytes: usize) -> usize {
    (nbytes + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}
