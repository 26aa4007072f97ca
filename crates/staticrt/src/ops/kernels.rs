//! CPU kernels backing the operator registry.
//!
//! Every kernel writes into a caller-provided output tensor (`*_into`), which
//! is what lets the out-variant dispatch reuse planner-assigned storage: the
//! kernel resizes the output in place and fills it, never allocating a fresh
//! tensor object.
//!
//! Tensors are contiguous; coordinate math goes through row-major strides.

use anyhow::{bail, ensure, Result};

use crate::tensor::{DType, Shape, Tensor};

/// Row-major strides for a dimension list.
fn strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

fn unravel(mut linear: usize, strides: &[usize], coords: &mut [usize]) {
    for (coord, &stride) in coords.iter_mut().zip(strides) {
        *coord = linear / stride;
        linear %= stride;
    }
}

fn normalize_dim(dim: i64, rank: usize) -> Result<usize> {
    let rank = rank as i64;
    let dim = if dim < 0 { dim + rank } else { dim };
    ensure!(dim >= 0 && dim < rank.max(1), "dimension {dim} out of range for rank {rank}");
    Ok(dim as usize)
}

/// Resolves a reshape target, expanding at most one `-1` wildcard.
pub fn infer_reshape(numel: usize, proposed: &[i64]) -> Result<Vec<usize>> {
    let mut known = 1usize;
    let mut wildcard = None;
    for (i, &d) in proposed.iter().enumerate() {
        if d == -1 {
            ensure!(wildcard.is_none(), "only one dimension may be -1");
            wildcard = Some(i);
        } else {
            ensure!(d >= 0, "invalid dimension {d}");
            known *= d as usize;
        }
    }
    let mut dims: Vec<usize> = proposed.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = wildcard {
        ensure!(known > 0 && numel % known == 0, "cannot infer dimension for {numel} elements");
        dims[i] = numel / known;
    }
    ensure!(
        dims.iter().product::<usize>() == numel,
        "reshape to {:?} incompatible with {} elements",
        dims,
        numel
    );
    Ok(dims)
}

#[derive(Clone, Copy, Debug)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
}

/// Elementwise binary op with an `alpha` scale on the second operand
/// (`out = a op alpha*b`; alpha only affects add/sub, as in the source ops).
pub fn binary_into(out: &mut Tensor, a: &Tensor, b: &Tensor, kind: BinaryKind, alpha: f64) -> Result<()> {
    ensure!(
        a.shape().dims() == b.shape().dims(),
        "elementwise operands must share shape: {:?} vs {:?}",
        a.shape().dims(),
        b.shape().dims()
    );
    out.resize_to(a.shape().clone(), DType::F32);
    let lhs = a.as_slice::<f32>()?;
    let rhs = b.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let alpha = alpha as f32;
    for ((d, &x), &y) in dst.iter_mut().zip(lhs).zip(rhs) {
        *d = match kind {
            BinaryKind::Add => x + alpha * y,
            BinaryKind::Sub => x - alpha * y,
            BinaryKind::Mul => x * y,
            BinaryKind::Div => x / y,
        };
    }
    Ok(())
}

/// Elementwise binary op against a scalar.
pub fn binary_scalar_into(out: &mut Tensor, a: &Tensor, scalar: f64, kind: BinaryKind) -> Result<()> {
    out.resize_to(a.shape().clone(), DType::F32);
    let lhs = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let s = scalar as f32;
    for (d, &x) in dst.iter_mut().zip(lhs) {
        *d = match kind {
            BinaryKind::Add => x + s,
            BinaryKind::Sub => x - s,
            BinaryKind::Mul => x * s,
            BinaryKind::Div => x / s,
        };
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub enum UnaryKind {
    Relu,
    Sigmoid,
    Tanh,
}

pub fn unary_into(out: &mut Tensor, a: &Tensor, kind: UnaryKind) -> Result<()> {
    out.resize_to(a.shape().clone(), DType::F32);
    let src = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    for (d, &x) in dst.iter_mut().zip(src) {
        *d = match kind {
            UnaryKind::Relu => x.max(0.0),
            UnaryKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryKind::Tanh => x.tanh(),
        };
    }
    Ok(())
}

pub fn clamp_into(out: &mut Tensor, a: &Tensor, min: Option<f64>, max: Option<f64>) -> Result<()> {
    out.resize_to(a.shape().clone(), DType::F32);
    let src = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let lo = min.map(|v| v as f32).unwrap_or(f32::NEG_INFINITY);
    let hi = max.map(|v| v as f32).unwrap_or(f32::INFINITY);
    for (d, &x) in dst.iter_mut().zip(src) {
        *d = x.clamp(lo, hi);
    }
    Ok(())
}

pub fn nan_to_num_into(
    out: &mut Tensor,
    a: &Tensor,
    nan: Option<f64>,
    posinf: Option<f64>,
    neginf: Option<f64>,
) -> Result<()> {
    out.resize_to(a.shape().clone(), DType::F32);
    let src = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let nan = nan.unwrap_or(0.0) as f32;
    let posinf = posinf.map(|v| v as f32).unwrap_or(f32::MAX);
    let neginf = neginf.map(|v| v as f32).unwrap_or(f32::MIN);
    for (d, &x) in dst.iter_mut().zip(src) {
        *d = if x.is_nan() {
            nan
        } else if x == f32::INFINITY {
            posinf
        } else if x == f32::NEG_INFINITY {
            neginf
        } else {
            x
        };
    }
    Ok(())
}

pub fn cat_into(out: &mut Tensor, parts: &[Tensor], dim: i64) -> Result<()> {
    ensure!(!parts.is_empty(), "cat requires at least one tensor");
    let rank = parts[0].shape().rank();
    let dim = normalize_dim(dim, rank)?;
    let mut out_dims = parts[0].shape().dims().to_vec();
    out_dims[dim] = 0;
    for part in parts {
        ensure!(part.shape().rank() == rank, "cat rank mismatch");
        for (axis, (&l, &r)) in out_dims.iter().zip(part.shape().dims()).enumerate() {
            ensure!(axis == dim || l == r || l == 0, "cat dimension mismatch at axis {axis}");
        }
        out_dims[dim] += part.shape().dims()[dim];
    }
    out.resize_to(out_dims.clone(), DType::F32);
    let dst = out.as_slice_mut::<f32>()?;

    // Copy block-wise: `outer` rows, each part contributing its own chunk.
    let outer: usize = out_dims[..dim].iter().product();
    let inner: usize = out_dims[dim + 1..].iter().product();
    let total_chunk = out_dims[dim] * inner;
    let mut chunk_offset = 0usize;
    for part in parts {
        let src = part.as_slice::<f32>()?;
        let part_chunk = part.shape().dims()[dim] * inner;
        for row in 0..outer {
            let src_base = row * part_chunk;
            let dst_base = row * total_chunk + chunk_offset;
            dst[dst_base..dst_base + part_chunk]
                .copy_from_slice(&src[src_base..src_base + part_chunk]);
        }
        chunk_offset += part_chunk;
    }
    Ok(())
}

pub fn stack_into(out: &mut Tensor, parts: &[Tensor], dim: i64) -> Result<()> {
    ensure!(!parts.is_empty(), "stack requires at least one tensor");
    let rank = parts[0].shape().rank();
    let dim = normalize_dim(dim, rank + 1)?;
    let unsqueezed: Vec<Tensor> = parts
        .iter()
        .map(|part| {
            ensure!(
                part.shape().dims() == parts[0].shape().dims(),
                "stack requires matching shapes"
            );
            let mut dims = part.shape().dims().to_vec();
            dims.insert(dim, 1);
            part.view(dims)
        })
        .collect::<Result<_>>()?;
    cat_into(out, &unsqueezed, dim as i64)
}

pub fn bmm_into(out: &mut Tensor, a: &Tensor, b: &Tensor) -> Result<()> {
    let a_dims = a.shape().dims().to_vec();
    let b_dims = b.shape().dims().to_vec();
    ensure!(a_dims.len() == 3 && b_dims.len() == 3, "bmm expects rank-3 operands");
    let (batch, n, k) = (a_dims[0], a_dims[1], a_dims[2]);
    ensure!(
        b_dims[0] == batch && b_dims[1] == k,
        "bmm shape mismatch: {:?} x {:?}",
        a_dims,
        b_dims
    );
    let m = b_dims[2];
    out.resize_to(vec![batch, n, m], DType::F32);
    let lhs = a.as_slice::<f32>()?;
    let rhs = b.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    for bi in 0..batch {
        for ni in 0..n {
            for mi in 0..m {
                let mut acc = 0.0f32;
                for ki in 0..k {
                    acc += lhs[bi * n * k + ni * k + ki] * rhs[bi * k * m + ki * m + mi];
                }
                dst[bi * n * m + ni * m + mi] = acc;
            }
        }
    }
    Ok(())
}

/// `sum` over all elements (scalar output) or over `dims` with optional
/// kept dimensions.
pub fn sum_into(out: &mut Tensor, a: &Tensor, dims: Option<&[i64]>, keepdim: bool) -> Result<()> {
    let src = a.as_slice::<f32>()?;
    let in_dims = a.shape().dims().to_vec();
    let Some(dims) = dims else {
        out.resize_to(Shape::scalar(), DType::F32);
        out.as_slice_mut::<f32>()?[0] = src.iter().sum();
        return Ok(());
    };
    let mut reduce = vec![false; in_dims.len()];
    for &d in dims {
        reduce[normalize_dim(d, in_dims.len())?] = true;
    }
    let mut out_dims = Vec::new();
    for (axis, &d) in in_dims.iter().enumerate() {
        if reduce[axis] {
            if keepdim {
                out_dims.push(1);
            }
        } else {
            out_dims.push(d);
        }
    }
    out.resize_to(out_dims.clone(), DType::F32);
    let dst = out.as_slice_mut::<f32>()?;
    dst.fill(0.0);

    let in_strides = strides(&in_dims);
    let out_strides = strides(&out_dims);
    let mut coords = vec![0usize; in_dims.len()];
    for (linear, &x) in src.iter().enumerate() {
        unravel(linear, &in_strides, &mut coords);
        let mut out_index = 0usize;
        let mut out_axis = 0usize;
        for (axis, &coord) in coords.iter().enumerate() {
            if reduce[axis] {
                if keepdim {
                    out_axis += 1;
                }
            } else {
                out_index += coord * out_strides[out_axis];
                out_axis += 1;
            }
        }
        dst[out_index] += x;
    }
    Ok(())
}

/// Materialising permute: output is contiguous in the permuted order.
pub fn permute_into(out: &mut Tensor, a: &Tensor, perm: &[i64]) -> Result<()> {
    let in_dims = a.shape().dims().to_vec();
    ensure!(perm.len() == in_dims.len(), "permute rank mismatch");
    let perm: Vec<usize> = perm
        .iter()
        .map(|&d| normalize_dim(d, in_dims.len()))
        .collect::<Result<_>>()?;
    let out_dims: Vec<usize> = perm.iter().map(|&axis| in_dims[axis]).collect();
    out.resize_to(out_dims.clone(), DType::F32);
    let src = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let in_strides = strides(&in_dims);
    let out_strides = strides(&out_dims);
    let mut coords = vec![0usize; out_dims.len()];
    for (linear, d) in dst.iter_mut().enumerate() {
        unravel(linear, &out_strides, &mut coords);
        let mut src_index = 0usize;
        for (out_axis, &coord) in coords.iter().enumerate() {
            src_index += coord * in_strides[perm[out_axis]];
        }
        *d = src[src_index];
    }
    Ok(())
}

pub fn transpose_into(out: &mut Tensor, a: &Tensor, dim0: i64, dim1: i64) -> Result<()> {
    let rank = a.shape().rank();
    let d0 = normalize_dim(dim0, rank)?;
    let d1 = normalize_dim(dim1, rank)?;
    let mut perm: Vec<i64> = (0..rank as i64).collect();
    perm.swap(d0, d1);
    permute_into(out, a, &perm)
}

/// Materialising narrow: copies `length` entries starting at `start` along
/// `dim` (the `narrow_copy` semantics).
pub fn narrow_into(out: &mut Tensor, a: &Tensor, dim: i64, start: i64, length: i64) -> Result<()> {
    let in_dims = a.shape().dims().to_vec();
    let dim = normalize_dim(dim, in_dims.len())?;
    let start = if start < 0 { start + in_dims[dim] as i64 } else { start };
    ensure!(start >= 0 && length >= 0, "invalid narrow bounds");
    let (start, length) = (start as usize, length as usize);
    ensure!(
        start + length <= in_dims[dim],
        "narrow [{start}, {start}+{length}) exceeds dimension {}",
        in_dims[dim]
    );
    let mut out_dims = in_dims.clone();
    out_dims[dim] = length;
    out.resize_to(out_dims.clone(), DType::F32);
    let src = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let outer: usize = in_dims[..dim].iter().product();
    let inner: usize = in_dims[dim + 1..].iter().product();
    for row in 0..outer {
        let src_base = row * in_dims[dim] * inner + start * inner;
        let dst_base = row * length * inner;
        dst[dst_base..dst_base + length * inner]
            .copy_from_slice(&src[src_base..src_base + length * inner]);
    }
    Ok(())
}

pub fn index_select_into(out: &mut Tensor, a: &Tensor, dim: i64, indices: &Tensor) -> Result<()> {
    let in_dims = a.shape().dims().to_vec();
    let dim = normalize_dim(dim, in_dims.len())?;
    let idx = indices.as_slice::<i64>()?;
    let mut out_dims = in_dims.clone();
    out_dims[dim] = idx.len();
    out.resize_to(out_dims, DType::F32);
    let src = a.as_slice::<f32>()?;
    let dst = out.as_slice_mut::<f32>()?;
    let outer: usize = in_dims[..dim].iter().product();
    let inner: usize = in_dims[dim + 1..].iter().product();
    for row in 0..outer {
        for (pos, &i) in idx.iter().enumerate() {
            ensure!(
                i >= 0 && (i as usize) < in_dims[dim],
                "index {i} out of range for dimension {}",
                in_dims[dim]
            );
            let src_base = row * in_dims[dim] * inner + (i as usize) * inner;
            let dst_base = row * idx.len() * inner + pos * inner;
            dst[dst_base..dst_base + inner].copy_from_slice(&src[src_base..src_base + inner]);
        }
    }
    Ok(())
}

/// Dtype conversion between the kernel-supported element types.
pub fn cast_into(out: &mut Tensor, a: &Tensor, dtype: DType) -> Result<()> {
    out.resize_to(a.shape().clone(), dtype);
    match (a.dtype(), dtype) {
        (from, to) if from == to => {
            let nbytes = a.nbytes();
            if nbytes > 0 {
                let src = a.storage().data();
                let dst = out.storage().data();
                ensure!(!src.is_null() && !dst.is_null(), "cast on reset storage");
                unsafe { std::ptr::copy_nonoverlapping(src, dst, nbytes) };
            }
        }
        (DType::F32, DType::I64) => {
            let src = a.as_slice::<f32>()?;
            for (d, &x) in out.as_slice_mut::<i64>()?.iter_mut().zip(src) {
                *d = x as i64;
            }
        }
        (DType::I64, DType::F32) => {
            let src = a.as_slice::<i64>()?;
            for (d, &x) in out.as_slice_mut::<f32>()?.iter_mut().zip(src) {
                *d = x as f32;
            }
        }
        (DType::F32, DType::I32) => {
            let src = a.as_slice::<f32>()?;
            for (d, &x) in out.as_slice_mut::<i32>()?.iter_mut().zip(src) {
                *d = x as i32;
            }
        }
        (DType::I32, DType::F32) => {
            let src = a.as_slice::<i32>()?;
            for (d, &x) in out.as_slice_mut::<f32>()?.iter_mut().zip(src) {
                *d = x as f32;
            }
        }
        (from, to) => bail!("unsupported cast {from:?} -> {to:?}"),
    }
    Ok(())
}

/// One-hot encoding of integer class ids: `[N] -> [N, classes]`.
pub fn one_hot_into(out: &mut Tensor, values: &Tensor, classes: i64, on_value: f64) -> Result<()> {
    ensure!(classes > 0, "one_hot requires a positive class count");
    let ids = values.as_slice::<i64>()?;
    let classes = classes as usize;
    out.resize_to(vec![ids.len(), classes], DType::F32);
    let dst = out.as_slice_mut::<f32>()?;
    dst.fill(0.0);
    for (row, &id) in ids.iter().enumerate() {
        ensure!(id >= 0 && (id as usize) < classes, "class id {id} out of range");
        dst[row * classes + id as usize] = on_value as f32;
    }
    Ok(())
}

/// Clamps the length column of `[N, 2]` (start, length) ranges to `max_len`.
pub fn clip_ranges_into(out: &mut Tensor, ranges: &Tensor, max_len: i64) -> Result<()> {
    let dims = ranges.shape().dims().to_vec();
    ensure!(
        dims.len() == 2 && dims[1] == 2,
        "clip_ranges expects [N, 2] ranges, got {:?}",
        dims
    );
    out.resize_to(dims.clone(), DType::I64);
    let src = ranges.as_slice::<i64>()?;
    let dst = out.as_slice_mut::<i64>()?;
    for row in 0..dims[0] {
        dst[row * 2] = src[row * 2];
        dst[row * 2 + 1] = src[row * 2 + 1].min(max_len);
    }
    Ok(())
}

/// Gathers each `(start, length)` slice out of 1-D `data`; also produces the
/// per-range length tensor.
pub fn gather_ranges_into(
    out_values: &mut Tensor,
    out_lengths: &mut Tensor,
    data: &Tensor,
    ranges: &Tensor,
) -> Result<()> {
    let range_dims = ranges.shape().dims().to_vec();
    ensure!(
        range_dims.len() == 2 && range_dims[1] == 2,
        "gather_ranges expects [N, 2] ranges"
    );
    ensure!(data.shape().rank() == 1, "gather_ranges expects 1-D data");
    let src = data.as_slice::<f32>()?;
    let range_vals = ranges.as_slice::<i64>()?;
    let n = range_dims[0];

    let mut total = 0usize;
    for row in 0..n {
        let (start, len) = (range_vals[row * 2], range_vals[row * 2 + 1]);
        ensure!(start >= 0 && len >= 0, "negative range bounds");
        ensure!(
            (start + len) as usize <= src.len(),
            "range [{start}, {start}+{len}) exceeds data length {}",
            src.len()
        );
        total += len as usize;
    }

    out_values.resize_to(vec![total], DType::F32);
    out_lengths.resize_to(vec![n], DType::I64);
    let dst = out_values.as_slice_mut::<f32>()?;
    let lens = out_lengths.as_slice_mut::<i64>()?;
    let mut cursor = 0usize;
    for row in 0..n {
        let (start, len) = (range_vals[row * 2] as usize, range_vals[row * 2 + 1] as usize);
        dst[cursor..cursor + len].copy_from_slice(&src[start..start + len]);
        lens[row] = len as i64;
        cursor += len;
    }
    Ok(())
}

/// Exclusive prefix sum of lengths; appends the total when requested.
pub fn lengths_to_offsets_into(out: &mut Tensor, lengths: &Tensor, include_last: bool) -> Result<()> {
    let lens = lengths.as_slice::<i64>()?.to_vec();
    let n = lens.len() + include_last as usize;
    out.resize_to(vec![n], DType::I64);
    let dst = out.as_slice_mut::<i64>()?;
    let mut acc = 0i64;
    for (i, &len) in lens.iter().enumerate() {
        dst[i] = acc;
        acc += len;
    }
    if include_last {
        dst[lens.len()] = acc;
    }
    Ok(())
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Salted bucket hash of integer ids, folded into `[0, buckets)`. With
/// `fold_i32` the hash is first reduced modulo `i32::MAX` to match 32-bit
/// downstream consumers.
pub fn bucket_hash_into(
    out: &mut Tensor,
    values: &Tensor,
    salt: i64,
    buckets: i64,
    fold_i32: bool,
) -> Result<()> {
    ensure!(buckets > 0, "bucket count must be positive");
    let ids = values.as_slice::<i64>()?;
    out.resize_to(values.shape().clone(), DType::I64);
    let dst = out.as_slice_mut::<i64>()?;
    for (d, &v) in dst.iter_mut().zip(ids) {
        let mut hashed = splitmix64((v as u64) ^ (salt as u64)) as i64 & i64::MAX;
        if fold_i32 {
            hashed %= i32::MAX as i64;
        }
        *d = hashed % buckets;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cat_concatenates_along_dim() {
        let a = Tensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let b = Tensor::from_vec(vec![2, 1], vec![5.0f32, 6.0]).unwrap();
        let mut out = Tensor::empty(DType::F32);
        cat_into(&mut out, &[a, b], 1).unwrap();
        assert_eq!(out.shape().dims(), &[2, 3]);
        assert_eq!(out.to_vec_f32().unwrap(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);
    }

    #[test]
    fn sum_reduces_rows_with_keepdim() {
        let a = Tensor::from_vec(vec![2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        let mut out = Tensor::empty(DType::F32);
        sum_into(&mut out, &a, Some(&[0]), true).unwrap();
        assert_eq!(out.shape().dims(), &[1, 2]);
        assert_eq!(out.to_vec_f32().unwrap(), vec![4.0, 6.0]);
    }

    #[test]
    fn permute_materialises_transposed_layout() {
        let a = Tensor::from_vec(vec![2, 3], vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let mut out = Tensor::empty(DType::F32);
        permute_into(&mut out, &a, &[1, 0]).unwrap();
        assert_eq!(out.shape().dims(), &[3, 2]);
        assert_eq!(out.to_vec_f32().unwrap(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn gather_ranges_collects_slices_and_lengths() {
        let data = Tensor::from_f32(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let ranges = Tensor::from_vec(vec![2, 2], vec![1i64, 2, 4, 2]).unwrap();
        let mut values = Tensor::empty(DType::F32);
        let mut lengths = Tensor::empty(DType::I64);
        gather_ranges_into(&mut values, &mut lengths, &data, &ranges).unwrap();
        assert_eq!(values.to_vec_f32().unwrap(), vec![1.0, 2.0, 4.0, 5.0]);
        assert_eq!(lengths.to_vec_i64().unwrap(), vec![2, 2]);
    }

    #[test]
    fn lengths_to_offsets_is_exclusive_scan() {
        let lengths = Tensor::from_vec(vec![3], vec![2i64, 3, 1]).unwrap();
        let mut out = Tensor::empty(DType::I64);
        lengths_to_offsets_into(&mut out, &lengths, true).unwrap();
        assert_eq!(out.to_vec_i64().unwrap(), vec![0, 2, 5, 6]);
    }
}
