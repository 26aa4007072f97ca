//! Contiguous host tensors over shared, resettable storage.

use anyhow::{bail, ensure, Result};

use super::dtype::{DType, Element};
use super::shape::Shape;
use super::storage::Storage;

/// A dense, contiguous tensor.
///
/// Cloning a tensor is cheap and shares the backing [`Storage`]; view ops
/// (reshape, flatten) produce exactly such clones with a different shape.
#[derive(Clone, Debug)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
    dtype: DType,
}

impl Tensor {
    /// Allocates a zero-initialised tensor of the given shape and dtype.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Tensor {
        let shape = shape.into();
        let nbytes = shape.num_elements() * dtype.size_of();
        Tensor {
            storage: Storage::with_nbytes(nbytes),
            shape,
            dtype,
        }
    }

    /// Creates a tensor with an empty storage. Out-variant kernels use this
    /// for first-touch output slots; the subsequent resize allocates.
    pub fn empty(dtype: DType) -> Tensor {
        Tensor {
            storage: Storage::empty(),
            shape: Shape::new(vec![0]),
            dtype,
        }
    }

    /// Builds a tensor from typed element data.
    pub fn from_vec<T: Element>(shape: impl Into<Shape>, data: Vec<T>) -> Result<Tensor> {
        let shape = shape.into();
        ensure!(
            data.len() == shape.num_elements(),
            "tensor data length ({}) does not match shape {:?}",
            data.len(),
            shape.dims()
        );
        let out = Tensor::zeros(shape, T::DTYPE);
        out.as_slice_mut::<T>()?.copy_from_slice(&data);
        Ok(out)
    }

    /// Convenience constructor for 1-D f32 tensors, common in tests.
    pub fn from_f32(data: Vec<f32>) -> Tensor {
        let len = data.len();
        Tensor::from_vec(vec![len], data).expect("length matches shape")
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn numel(&self) -> usize {
        self.shape.num_elements()
    }

    /// Logical payload size in bytes for the current shape.
    pub fn nbytes(&self) -> usize {
        self.numel() * self.dtype.size_of()
    }

    /// Returns a view of this tensor with a different shape. The element
    /// count must match; data is shared, not copied.
    pub fn view(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        ensure!(
            shape.num_elements() == self.numel(),
            "view shape {:?} incompatible with {} elements",
            shape.dims(),
            self.numel()
        );
        Ok(Tensor {
            storage: self.storage.clone(),
            shape,
            dtype: self.dtype,
        })
    }

    /// Resizes this tensor in place for an out-variant write.
    ///
    /// The storage keeps its current pointer when the capacity suffices
    /// (pool-assigned regions included); otherwise it grows into a fresh
    /// owned allocation, which the planner picks up as the new high-water
    /// mark on the next deallocate round.
    pub fn resize_to(&mut self, shape: impl Into<Shape>, dtype: DType) {
        let shape = shape.into();
        let needed = shape.num_elements() * dtype.size_of();
        self.storage.ensure_capacity(needed);
        self.shape = shape;
        self.dtype = dtype;
    }

    /// Typed read access to the element data.
    ///
    /// The returned slice is valid while the storage's data pointer is: for
    /// pool-managed tensors that means between the planner's `allocate()` and
    /// `deallocate()`. Single-threaded execution and SSA discipline guarantee
    /// no concurrent writer for the duration of a kernel.
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        ensure!(
            self.dtype == T::DTYPE,
            "dtype mismatch: tensor is {:?}, requested {:?}",
            self.dtype,
            T::DTYPE
        );
        if self.numel() == 0 {
            return Ok(&[]);
        }
        let ptr = self.storage.data();
        if ptr.is_null() {
            bail!("tensor storage has no data (was it deallocated?)");
        }
        Ok(unsafe { std::slice::from_raw_parts(ptr as *const T, self.numel()) })
    }

    /// Typed write access to the element data. Same validity rules as
    /// [`Tensor::as_slice`]; the caller must be the only writer.
    #[allow(clippy::mut_from_ref)]
    pub fn as_slice_mut<T: Element>(&self) -> Result<&mut [T]> {
        ensure!(
            self.dtype == T::DTYPE,
            "dtype mismatch: tensor is {:?}, requested {:?}",
            self.dtype,
            T::DTYPE
        );
        if self.numel() == 0 {
            return Ok(&mut []);
        }
        let ptr = self.storage.data();
        if ptr.is_null() {
            bail!("tensor storage has no data (was it deallocated?)");
        }
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr as *mut T, self.numel()) })
    }

    /// Copies the payload out as f32, for assertions and debugging.
    pub fn to_vec_f32(&self) -> Result<Vec<f32>> {
        Ok(self.as_slice::<f32>()?.to_vec())
    }

    /// Copies the payload out as i64.
    pub fn to_vec_i64(&self) -> Result<Vec<i64>> {
        Ok(self.as_slice::<i64>()?.to_vec())
    }
}
