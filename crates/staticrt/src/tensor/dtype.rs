//! Scalar element types supported by the tensor substrate.

use half::{bf16, f16};

/// Enumerates the element types a [`Tensor`](super::Tensor) may carry.
///
/// Kernels are free to support a subset of these and reject the rest with a
/// typed error; the dtype surface itself models everything the runtime can
/// move through its value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
    F16,
    BF16,
    I64,
    I32,
    Bool,
}

impl DType {
    /// Returns the storage width of one element in bytes.
    pub fn size_of(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F64 | DType::I64 => 8,
            DType::F16 | DType::BF16 => 2,
            DType::Bool => 1,
        }
    }

    /// Returns `true` for floating-point element types.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64 | DType::F16 | DType::BF16)
    }

    /// Decodes the integer dtype code used by `aten::to` style cast arguments.
    pub fn from_code(code: i64) -> Option<DType> {
        match code {
            0 => Some(DType::F32),
            1 => Some(DType::F64),
            2 => Some(DType::F16),
            3 => Some(DType::BF16),
            4 => Some(DType::I64),
            5 => Some(DType::I32),
            6 => Some(DType::Bool),
            _ => None,
        }
    }

    /// Encodes this dtype as the integer code consumed by cast arguments.
    pub fn code(self) -> i64 {
        match self {
            DType::F32 => 0,
            DType::F64 => 1,
            DType::F16 => 2,
            DType::BF16 => 3,
            DType::I64 => 4,
            DType::I32 => 5,
            DType::Bool => 6,
        }
    }
}

/// Trait connecting Rust scalar types to their [`DType`] tag.
///
/// Implemented for the element types kernels actually iterate over. The
/// low-precision float types are representable in storage but have no kernel
/// coverage; they still satisfy the trait so literals can round-trip.
pub trait Element: Copy + Default + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

impl Element for i64 {
    const DTYPE: DType = DType::I64;
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;
}

impl Element for bf16 {
    const DTYPE: DType = DType::BF16;
}
