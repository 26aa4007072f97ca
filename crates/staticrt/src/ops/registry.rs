//! Operator registry: static classification of node kinds and the dispatch
//! functions behind the out-variant / native / fallback strategies.
//!
//! The registry is a process-wide read-only table built once. Predicates are
//! total: unknown kinds classify as "no out variant, not native, not a view".

use std::collections::HashMap;

use anyhow::{bail, ensure, Result};
use once_cell::sync::Lazy;

use crate::ir::{kinds, Symbol};
use crate::tensor::{DType, IValue, Tensor};

use super::kernels::{self, BinaryKind, UnaryKind};

/// Dispatch function shared by the out-variant and native strategies: reads
/// the input values, writes the node's output slots.
pub type OpFn = fn(&[IValue], &mut [IValue]) -> Result<()>;

/// Registry entry for one operator kind.
#[derive(Clone, Copy)]
pub struct OpEntry {
    pub out: Option<OpFn>,
    pub native: Option<OpFn>,
    pub is_view: bool,
    pub reuse_inputs: bool,
    pub reuse_outputs: bool,
    pub reuse_inputs_outputs: bool,
}

impl OpEntry {
    /// Elementwise out-variant op: storage of inputs and outputs may be
    /// reused across non-overlapping lifetimes.
    fn elementwise(f: OpFn) -> OpEntry {
        OpEntry {
            out: Some(f),
            native: None,
            is_view: false,
            reuse_inputs: true,
            reuse_outputs: true,
            reuse_inputs_outputs: true,
        }
    }

    /// Shape-changing out-variant op: output storage is reusable, inputs are
    /// left out of sharing groups.
    fn out_variant(f: OpFn) -> OpEntry {
        OpEntry {
            reuse_inputs: false,
            ..OpEntry::elementwise(f)
        }
    }

    fn native(f: OpFn) -> OpEntry {
        OpEntry {
            out: None,
            native: Some(f),
            is_view: false,
            reuse_inputs: false,
            reuse_outputs: false,
            reuse_inputs_outputs: false,
        }
    }

    fn view(mut self) -> OpEntry {
        self.is_view = true;
        self
    }
}

static REGISTRY: Lazy<HashMap<Symbol, OpEntry>> = Lazy::new(|| {
    let mut map = HashMap::new();
    let mut add = |name: &str, entry: OpEntry| {
        map.insert(Symbol::intern(name), entry);
    };

    add("aten::add", OpEntry::elementwise(add_op));
    add("aten::sub", OpEntry::elementwise(sub_op));
    add("aten::mul", OpEntry::elementwise(mul_op));
    add("aten::div", OpEntry::elementwise(div_op));
    add("aten::clamp", OpEntry::elementwise(clamp_op));
    add("aten::nan_to_num", OpEntry::elementwise(nan_to_num_op));
    add("aten::relu", OpEntry::elementwise(relu_op));
    add("aten::sigmoid", OpEntry::elementwise(sigmoid_op));
    add("aten::tanh", OpEntry::elementwise(tanh_op));

    add("aten::cat", OpEntry::out_variant(cat_op));
    add("aten::stack", OpEntry::out_variant(stack_op));
    add("aten::bmm", OpEntry::out_variant(bmm_op));
    add("aten::sum", OpEntry::out_variant(sum_op));
    add("aten::index_select", OpEntry::out_variant(index_select_op));
    add("aten::narrow_copy", OpEntry::out_variant(narrow_copy_op));
    add(
        "static_runtime::permute_copy",
        OpEntry::out_variant(permute_copy_op),
    );

    // View ops run natively. reshape/flatten produce true storage-sharing
    // views; transpose/permute/narrow keep the view classification of their
    // operator contract even though these kernels materialise.
    add("aten::reshape", OpEntry::native(reshape_op).view());
    add("aten::flatten", OpEntry::native(flatten_op).view());
    add("aten::transpose", OpEntry::native(transpose_op).view());
    add("aten::permute", OpEntry::native(permute_op).view());
    add("aten::narrow", OpEntry::native(narrow_op).view());
    add("aten::to", OpEntry::native(to_op));
    add("static_runtime::pure_inputs", OpEntry::native(pure_inputs_op));

    // Sparse feature-processing ops and their fusion products.
    add("sparse::clip_ranges", OpEntry::out_variant(clip_ranges_op));
    add("sparse::gather_ranges", OpEntry::out_variant(gather_ranges_op));
    add(
        "sparse::lengths_to_offsets",
        OpEntry::out_variant(lengths_to_offsets_op),
    );
    add("sparse::bucket_hash", OpEntry::out_variant(bucket_hash_op));
    add(
        "sparse::batch_one_hot_lengths",
        OpEntry::out_variant(batch_one_hot_lengths_op),
    );
    add(
        "sparse::casted_batch_one_hot_lengths",
        OpEntry::out_variant(casted_batch_one_hot_lengths_op),
    );
    add(
        "sparse::concat_add_mul_replacenan_clip",
        OpEntry::out_variant(concat_add_mul_replacenan_clip_op),
    );
    add(
        "sparse::concat_batch_matmul_batch_gather",
        OpEntry::out_variant(concat_batch_matmul_batch_gather_op),
    );
    add(
        "sparse::clip_ranges_gather",
        OpEntry::out_variant(clip_ranges_gather_op),
    );
    add(
        "sparse::clip_ranges_gather_lengths_to_offsets",
        OpEntry::out_variant(clip_ranges_gather_lengths_to_offsets_op),
    );
    add(
        "sparse::clip_ranges_gather_hash",
        OpEntry::out_variant(clip_ranges_gather_hash_op),
    );
    add(
        "sparse::clip_ranges_gather_hash_offsets",
        OpEntry::out_variant(clip_ranges_gather_hash_offsets_op),
    );

    map
});

fn lookup(kind: Symbol) -> Option<&'static OpEntry> {
    REGISTRY.get(&kind)
}

/// Whether the kind has an out-variant formulation.
pub fn has_out_variant(kind: Symbol) -> bool {
    lookup(kind).map_or(false, |e| e.out.is_some())
}

/// Whether the kind runs natively (without the fallback interpreter).
pub fn can_run_natively(kind: Symbol) -> bool {
    kind == kinds::list_construct()
        || kind == kinds::tuple_construct()
        || kind == kinds::list_unpack()
        || lookup(kind).map_or(false, |e| e.native.is_some())
}

/// Whether the kind's output may share storage with one of its inputs.
pub fn is_view_op(kind: Symbol) -> bool {
    lookup(kind).map_or(false, |e| e.is_view)
}

pub fn can_reuse_inputs(kind: Symbol) -> bool {
    lookup(kind).map_or(false, |e| e.reuse_inputs)
}

pub fn can_reuse_outputs(kind: Symbol) -> bool {
    lookup(kind).map_or(false, |e| e.reuse_outputs)
}

pub fn can_reuse_inputs_outputs(kind: Symbol) -> bool {
    lookup(kind).map_or(false, |e| e.reuse_inputs_outputs)
}

/// Whether any execution strategy exists for the kind.
pub fn has_operation(kind: Symbol) -> bool {
    lookup(kind).map_or(false, |e| e.out.is_some() || e.native.is_some())
}

/// Out-of-place dispatch function for the kind.
pub fn get_out_of_place_operation(kind: Symbol) -> Option<OpFn> {
    lookup(kind).and_then(|e| e.out)
}

/// Native dispatch function for the kind.
pub fn get_native_operation(kind: Symbol) -> Option<OpFn> {
    lookup(kind).and_then(|e| e.native)
}

/// Whether constant propagation may fold the kind. The synthetic pure-inputs
/// producer must survive folding; everything else registered here is pure.
pub fn is_pure(kind: Symbol) -> bool {
    kind != kinds::pure_inputs() && has_operation(kind)
}

/// Generic interpreter entry point: consumes the input stack, leaves exactly
/// the output values. Backs the fallback dispatch strategy and constant
/// propagation.
pub fn run_fallback(kind: Symbol, stack: &mut Vec<IValue>, n_outputs: usize) -> Result<()> {
    let Some(entry) = lookup(kind) else {
        bail!("no operation registered for {kind}");
    };
    let Some(f) = entry.out.or(entry.native) else {
        bail!("no operation registered for {kind}");
    };
    let inputs = std::mem::take(stack);
    let mut outputs = vec![IValue::None; n_outputs];
    f(&inputs, &mut outputs)?;
    *stack = outputs;
    Ok(())
}

// ---------------------------------------------------------------------------
// Dispatch adapters
// ---------------------------------------------------------------------------

/// Reuses the tensor already sitting in the output slot, or seeds the slot
/// with an empty tensor for the kernel's resize to fill.
fn tensor_out(slot: &mut IValue, dtype: DType) -> &mut Tensor {
    if !slot.is_tensor() {
        *slot = IValue::Tensor(Tensor::empty(dtype));
    }
    match slot {
        IValue::Tensor(t) => t,
        _ => unreachable!("slot was just seeded with a tensor"),
    }
}

fn arg(inputs: &[IValue], index: usize) -> Result<&IValue> {
    inputs
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing argument {index}"))
}

fn optional_float(inputs: &[IValue], index: usize) -> Result<Option<f64>> {
    match inputs.get(index) {
        None | Some(IValue::None) => Ok(None),
        Some(value) => value.as_float().map(Some),
    }
}

fn add_sub_op(inputs: &[IValue], outputs: &mut [IValue], kind: BinaryKind) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let b = arg(inputs, 1)?.as_tensor()?;
    let alpha = optional_float(inputs, 2)?.unwrap_or(1.0);
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::binary_into(out, a, b, kind, alpha)
}

fn add_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    add_sub_op(inputs, outputs, BinaryKind::Add)
}

fn sub_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    add_sub_op(inputs, outputs, BinaryKind::Sub)
}

fn mul_div_op(inputs: &[IValue], outputs: &mut [IValue], kind: BinaryKind) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    match arg(inputs, 1)? {
        IValue::Tensor(b) => kernels::binary_into(out, a, b, kind, 1.0),
        scalar => kernels::binary_scalar_into(out, a, scalar.as_float()?, kind),
    }
}

fn mul_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    mul_div_op(inputs, outputs, BinaryKind::Mul)
}

fn div_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    mul_div_op(inputs, outputs, BinaryKind::Div)
}

fn clamp_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let min = optional_float(inputs, 1)?;
    let max = optional_float(inputs, 2)?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::clamp_into(out, a, min, max)
}

fn nan_to_num_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let nan = optional_float(inputs, 1)?;
    let posinf = optional_float(inputs, 2)?;
    let neginf = optional_float(inputs, 3)?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::nan_to_num_into(out, a, nan, posinf, neginf)
}

fn unary_op(inputs: &[IValue], outputs: &mut [IValue], kind: UnaryKind) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::unary_into(out, a, kind)
}

fn relu_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    unary_op(inputs, outputs, UnaryKind::Relu)
}

fn sigmoid_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    unary_op(inputs, outputs, UnaryKind::Sigmoid)
}

fn tanh_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    unary_op(inputs, outputs, UnaryKind::Tanh)
}

fn cat_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let parts = arg(inputs, 0)?.as_tensor_list()?;
    let dim = optional_float(inputs, 1)?.unwrap_or(0.0) as i64;
    ensure!(!parts.is_empty(), "cat of an empty list");
    let out = tensor_out(&mut outputs[0], parts[0].dtype());
    kernels::cat_into(out, &parts, dim)
}

fn stack_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let parts = arg(inputs, 0)?.as_tensor_list()?;
    let dim = optional_float(inputs, 1)?.unwrap_or(0.0) as i64;
    ensure!(!parts.is_empty(), "stack of an empty list");
    let out = tensor_out(&mut outputs[0], parts[0].dtype());
    kernels::stack_into(out, &parts, dim)
}

fn bmm_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let b = arg(inputs, 1)?.as_tensor()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::bmm_into(out, a, b)
}

fn sum_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    if inputs.len() <= 1 {
        return kernels::sum_into(out, a, None, false);
    }
    let dims = match arg(inputs, 1)? {
        IValue::Int(d) => vec![*d],
        other => other.as_int_list()?,
    };
    let keepdim = match inputs.get(2) {
        None | Some(IValue::None) => false,
        Some(value) => value.as_bool()?,
    };
    kernels::sum_into(out, a, Some(&dims), keepdim)
}

fn index_select_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let dim = arg(inputs, 1)?.as_int()?;
    let indices = arg(inputs, 2)?.as_tensor()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::index_select_into(out, a, dim, indices)
}

fn narrow_copy_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let dim = arg(inputs, 1)?.as_int()?;
    let start = arg(inputs, 2)?.as_int()?;
    let length = arg(inputs, 3)?.as_int()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::narrow_into(out, a, dim, start, length)
}

fn permute_copy_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let perm = arg(inputs, 1)?.as_int_list()?;
    let out = tensor_out(&mut outputs[0], a.dtype());
    kernels::permute_into(out, a, &perm)
}

fn reshape_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let proposed = arg(inputs, 1)?.as_int_list()?;
    let dims = kernels::infer_reshape(a.numel(), &proposed)?;
    outputs[0] = IValue::Tensor(a.view(dims)?);
    Ok(())
}

fn flatten_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let rank = a.shape().rank().max(1) as i64;
    let start = optional_float(inputs, 1)?.unwrap_or(0.0) as i64;
    let end = optional_float(inputs, 2)?.unwrap_or(-1.0) as i64;
    let start = if start < 0 { start + rank } else { start } as usize;
    let end = if end < 0 { end + rank } else { end } as usize;
    ensure!(start <= end && end < rank as usize, "invalid flatten range");
    let dims = a.shape().dims();
    let mut out_dims: Vec<usize> = dims[..start].to_vec();
    out_dims.push(dims[start..=end].iter().product());
    out_dims.extend_from_slice(&dims[end + 1..]);
    outputs[0] = IValue::Tensor(a.view(out_dims)?);
    Ok(())
}

fn transpose_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let dim0 = arg(inputs, 1)?.as_int()?;
    let dim1 = arg(inputs, 2)?.as_int()?;
    let mut out = Tensor::empty(a.dtype());
    kernels::transpose_into(&mut out, a, dim0, dim1)?;
    outputs[0] = IValue::Tensor(out);
    Ok(())
}

fn permute_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let perm = arg(inputs, 1)?.as_int_list()?;
    let mut out = Tensor::empty(a.dtype());
    kernels::permute_into(&mut out, a, &perm)?;
    outputs[0] = IValue::Tensor(out);
    Ok(())
}

fn narrow_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let dim = arg(inputs, 1)?.as_int()?;
    let start = arg(inputs, 2)?.as_int()?;
    let length = arg(inputs, 3)?.as_int()?;
    let mut out = Tensor::empty(a.dtype());
    kernels::narrow_into(&mut out, a, dim, start, length)?;
    outputs[0] = IValue::Tensor(out);
    Ok(())
}

fn to_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let code = arg(inputs, 1)?.as_int()?;
    let dtype = DType::from_code(code)
        .ok_or_else(|| anyhow::anyhow!("unknown dtype code {code}"))?;
    let mut out = Tensor::empty(dtype);
    kernels::cast_into(&mut out, a, dtype)?;
    outputs[0] = IValue::Tensor(out);
    Ok(())
}

fn pure_inputs_op(_inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    outputs[0] = IValue::Tensor(Tensor::zeros(vec![1], DType::F32));
    Ok(())
}

fn clip_ranges_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let ranges = arg(inputs, 0)?.as_tensor()?;
    let max_len = arg(inputs, 1)?.as_int()?;
    let out = tensor_out(&mut outputs[0], DType::I64);
    kernels::clip_ranges_into(out, ranges, max_len)
}

fn gather_ranges_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let data = arg(inputs, 0)?.as_tensor()?.clone();
    let ranges = arg(inputs, 1)?.as_tensor()?.clone();
    let (values_slot, rest) = outputs.split_first_mut().expect("two output slots");
    let values = tensor_out(values_slot, DType::F32);
    let lengths = tensor_out(&mut rest[0], DType::I64);
    kernels::gather_ranges_into(values, lengths, &data, &ranges)
}

fn lengths_to_offsets_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let lengths = arg(inputs, 0)?.as_tensor()?;
    let include_last = arg(inputs, 1)?.as_bool()?;
    let out = tensor_out(&mut outputs[0], DType::I64);
    kernels::lengths_to_offsets_into(out, lengths, include_last)
}

fn bucket_hash_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let values = arg(inputs, 0)?.as_tensor()?;
    let salt = arg(inputs, 1)?.as_int()?;
    let buckets = arg(inputs, 2)?.as_int()?;
    let fold = match inputs.get(3) {
        None | Some(IValue::None) => false,
        Some(value) => value.as_bool()?,
    };
    let out = tensor_out(&mut outputs[0], DType::I64);
    kernels::bucket_hash_into(out, values, salt, buckets, fold)
}

fn batch_one_hot_lengths_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let values = arg(inputs, 0)?.as_tensor()?;
    let classes = arg(inputs, 1)?.as_int()?;
    let on_value = arg(inputs, 2)?.as_float()?;
    let out = tensor_out(&mut outputs[0], DType::F32);
    kernels::one_hot_into(out, values, classes, on_value)
}

fn casted_batch_one_hot_lengths_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let a = arg(inputs, 0)?.as_tensor()?;
    let classes = arg(inputs, 1)?.as_int()?;
    let on_value = arg(inputs, 2)?.as_float()?;
    let mut ids = Tensor::empty(DType::I64);
    kernels::cast_into(&mut ids, a, DType::I64)?;
    let out = tensor_out(&mut outputs[0], DType::F32);
    kernels::one_hot_into(out, &ids, classes, on_value)
}

fn concat_add_mul_replacenan_clip_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let add_operand = arg(inputs, 0)?.as_tensor()?;
    let mul_operand = arg(inputs, 1)?.clone();
    let parts = arg(inputs, 2)?.as_tensor_list()?;
    let min = optional_float(inputs, 3)?;
    let max = optional_float(inputs, 4)?;
    ensure!(!parts.is_empty(), "fused concat of an empty list");

    // Feature tensors concatenate along the feature axis when batched.
    let dim = if parts[0].shape().rank() >= 2 { 1 } else { 0 };
    let mut acc = Tensor::empty(DType::F32);
    kernels::cat_into(&mut acc, &parts, dim)?;
    let mut summed = Tensor::empty(DType::F32);
    kernels::binary_into(&mut summed, &acc, add_operand, BinaryKind::Add, 1.0)?;
    let mut scaled = Tensor::empty(DType::F32);
    match &mul_operand {
        IValue::Tensor(b) => kernels::binary_into(&mut scaled, &summed, b, BinaryKind::Mul, 1.0)?,
        scalar => {
            kernels::binary_scalar_into(&mut scaled, &summed, scalar.as_float()?, BinaryKind::Mul)?
        }
    }
    let mut cleaned = Tensor::empty(DType::F32);
    kernels::nan_to_num_into(&mut cleaned, &scaled, None, None, None)?;
    let out = tensor_out(&mut outputs[0], DType::F32);
    kernels::clamp_into(out, &cleaned, min, max)
}

fn concat_batch_matmul_batch_gather_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let indices = arg(inputs, 0)?.as_tensor()?;
    let parts = arg(inputs, 1)?.as_tensor_list()?;
    let mut stacked = Tensor::empty(DType::F32);
    kernels::stack_into(&mut stacked, &parts, 1)?;
    let mut transposed = Tensor::empty(DType::F32);
    kernels::transpose_into(&mut transposed, &stacked, 1, 2)?;
    let mut product = Tensor::empty(DType::F32);
    kernels::bmm_into(&mut product, &stacked, &transposed)?;
    let dims = product.shape().dims().to_vec();
    let flat = product.view(vec![dims[0], dims[1] * dims[2]])?;
    let out = tensor_out(&mut outputs[0], DType::F32);
    kernels::index_select_into(out, &flat, 1, indices)
}

fn clip_ranges_gather_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let data = arg(inputs, 0)?.as_tensor()?.clone();
    let ranges = arg(inputs, 1)?.as_tensor()?;
    let max_len = arg(inputs, 2)?.as_int()?;
    let mut clipped = Tensor::empty(DType::I64);
    kernels::clip_ranges_into(&mut clipped, ranges, max_len)?;
    let (values_slot, rest) = outputs.split_first_mut().expect("two output slots");
    let values = tensor_out(values_slot, DType::F32);
    let lengths = tensor_out(&mut rest[0], DType::I64);
    kernels::gather_ranges_into(values, lengths, &data, &clipped)
}

fn clip_ranges_gather_lengths_to_offsets_op(
    inputs: &[IValue],
    outputs: &mut [IValue],
) -> Result<()> {
    let data = arg(inputs, 0)?.as_tensor()?.clone();
    let ranges = arg(inputs, 1)?.as_tensor()?;
    let max_len = arg(inputs, 2)?.as_int()?;
    let include_last = arg(inputs, 3)?.as_bool()?;
    let mut clipped = Tensor::empty(DType::I64);
    kernels::clip_ranges_into(&mut clipped, ranges, max_len)?;
    let mut lengths = Tensor::empty(DType::I64);
    let (values_slot, rest) = outputs.split_first_mut().expect("two output slots");
    let values = tensor_out(values_slot, DType::F32);
    kernels::gather_ranges_into(values, &mut lengths, &data, &clipped)?;
    let offsets = tensor_out(&mut rest[0], DType::I64);
    kernels::lengths_to_offsets_into(offsets, &lengths, include_last)
}

fn clip_ranges_gather_hash_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let ranges = arg(inputs, 0)?.as_tensor()?;
    let data = arg(inputs, 1)?.as_tensor()?.clone();
    let max_len = arg(inputs, 2)?.as_int()?;
    let salt = arg(inputs, 3)?.as_int()?;
    let buckets = arg(inputs, 4)?.as_int()?;
    let fold = arg(inputs, 5)?.as_bool()?;
    let mut clipped = Tensor::empty(DType::I64);
    kernels::clip_ranges_into(&mut clipped, ranges, max_len)?;
    let mut values = Tensor::empty(DType::F32);
    let mut id_values = Tensor::empty(DType::I64);
    let (lengths_slot, rest) = outputs.split_first_mut().expect("two output slots");
    let lengths = tensor_out(lengths_slot, DType::I64);
    kernels::gather_ranges_into(&mut values, lengths, &data, &clipped)?;
    kernels::cast_into(&mut id_values, &values, DType::I64)?;
    let hashed = tensor_out(&mut rest[0], DType::I64);
    kernels::bucket_hash_into(hashed, &id_values, salt, buckets, fold)
}

fn clip_ranges_gather_hash_offsets_op(inputs: &[IValue], outputs: &mut [IValue]) -> Result<()> {
    let ranges = arg(inputs, 0)?.as_tensor()?;
    let data = arg(inputs, 1)?.as_tensor()?.clone();
    let max_len = arg(inputs, 2)?.as_int()?;
    let salt = arg(inputs, 3)?.as_int()?;
    let buckets = arg(inputs, 4)?.as_int()?;
    let fold = arg(inputs, 5)?.as_bool()?;
    let include_last = arg(inputs, 6)?.as_bool()?;
    let mut clipped = Tensor::empty(DType::I64);
    kernels::clip_ranges_into(&mut clipped, ranges, max_len)?;
    let mut values = Tensor::empty(DType::F32);
    let mut lengths = Tensor::empty(DType::I64);
    kernels::gather_ranges_into(&mut values, &mut lengths, &data, &clipped)?;
    let (offsets_slot, rest) = outputs.split_first_mut().expect("two output slots");
    let offsets = tensor_out(offsets_slot, DType::I64);
    kernels::lengths_to_offsets_into(offsets, &lengths, include_last)?;
    let mut id_values = Tensor::empty(DType::I64);
    kernels::cast_into(&mut id_values, &values, DType::I64)?;
    let hashed = tensor_out(&mut rest[0], DType::I64);
    kernels::bucket_hash_into(hashed, &id_values, salt, buckets, fold)
}
