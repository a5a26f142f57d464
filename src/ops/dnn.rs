//! DNN-primitives CPU backend ("onednn" mode).
//!
//! Unlike [`super::blas`], this backend works on tensor descriptors: every
//! operand is a [`MemoryDesc`] (logical dims plus per-dim strides) over a
//! borrowed slice. Descriptors are built either from a [`FormatTag`] (dense
//! in that physical order) or from explicit strides.
//!
//! Primitives:
//!
//! - [`matmul_forward`] — batched `(b, m, k) × (b, k, n) → (b, m, n)`
//! - [`sgemm`] — CBLAS-like entry point built on the matmul primitive
//! - [`convolution_forward`] — grouped, strided, dilated, padded direct
//!   convolution into a plain temporary [`Tensor`]
//! - [`Tensor::reorder_to`] — copy a plain tensor into any strided layout
//!
//! Output rows (matmul) and output planes (convolution) are computed in
//! parallel with `rayon`.

use rayon::prelude::*;

use crate::error::{KernelError, KernelResult};
use crate::layout::FormatTag;

const BACKEND: &str = "dnn";

fn invalid(reason: String) -> KernelError {
    KernelError::Backend {
        backend: BACKEND,
        reason,
    }
}

/// Advances a row-major multi-index; returns `false` after the last one.
#[inline]
fn next_index(idx: &mut [usize], limits: &[usize]) -> bool {
    for d in (0..idx.len()).rev() {
        idx[d] += 1;
        if idx[d] < limits[d] {
            return true;
        }
        idx[d] = 0;
    }
    false
}

#[inline]
fn offset(idx: &[usize], strides: &[usize]) -> usize {
    idx.iter().zip(strides).map(|(&i, &s)| i * s).sum()
}

/// Logical dims and strides of one operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryDesc {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl MemoryDesc {
    /// Dense layout of `dims` in the physical order named by `tag`.
    ///
    /// # Errors
    ///
    /// Fails if `dims` does not have the tag's rank.
    pub fn with_format(dims: impl Into<Vec<usize>>, tag: FormatTag) -> KernelResult<Self> {
        let dims = dims.into();
        if dims.len() != tag.rank() {
            return Err(invalid(format!(
                "format {tag} needs rank {}, dims {dims:?}",
                tag.rank()
            )));
        }
        let mut strides = vec![0; dims.len()];
        let mut stride = 1;
        for &axis in tag.physical_order().iter().rev() {
            strides[axis] = stride;
            stride *= dims[axis];
        }
        Ok(Self { dims, strides })
    }

    /// Layout with explicit per-dim strides.
    ///
    /// # Errors
    ///
    /// Fails if `dims` and `strides` differ in length.
    pub fn with_strides(
        dims: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> KernelResult<Self> {
        let (dims, strides) = (dims.into(), strides.into());
        if dims.len() != strides.len() {
            return Err(invalid(format!("dims {dims:?} vs strides {strides:?}")));
        }
        Ok(Self { dims, strides })
    }

    /// Dense row-major layout.
    #[must_use]
    pub fn plain(dims: impl Into<Vec<usize>>) -> Self {
        let dims = dims.into();
        let mut strides = vec![1; dims.len()];
        for d in (0..dims.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * dims[d + 1];
        }
        Self { dims, strides }
    }

    #[must_use]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[must_use]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Elements spanned from the base offset, `None` on overflow.
    fn extent(&self) -> Option<usize> {
        if self.dims.contains(&0) {
            return Some(0);
        }
        self.dims
            .iter()
            .zip(&self.strides)
            .try_fold(1usize, |acc, (&d, &s)| acc.checked_add((d - 1).checked_mul(s)?))
    }

    fn check_fits(&self, len: usize) -> KernelResult<()> {
        let Some(extent) = self.extent() else {
            return Err(invalid(format!(
                "descriptor {:?}/{:?} overflows the address space",
                self.dims, self.strides
            )));
        };
        if extent > len {
            return Err(invalid(format!(
                "descriptor {:?}/{:?} spans {extent} elements, buffer holds {len}",
                self.dims, self.strides
            )));
        }
        Ok(())
    }
}

/// A read-only operand.
#[derive(Debug, Clone, Copy)]
pub struct TensorRef<'a> {
    desc: &'a MemoryDesc,
    data: &'a [f32],
}

impl<'a> TensorRef<'a> {
    /// # Errors
    ///
    /// Fails if `desc` addresses elements outside `data`.
    pub fn new(desc: &'a MemoryDesc, data: &'a [f32]) -> KernelResult<Self> {
        desc.check_fits(data.len())?;
        Ok(Self { desc, data })
    }

    #[must_use]
    pub const fn desc(&self) -> &MemoryDesc {
        self.desc
    }

    #[inline]
    fn at(&self, idx: &[usize]) -> f32 {
        self.data[offset(idx, &self.desc.strides)]
    }
}

/// A writable operand.
#[derive(Debug)]
pub struct TensorMut<'a> {
    desc: &'a MemoryDesc,
    data: &'a mut [f32],
}

impl<'a> TensorMut<'a> {
    /// # Errors
    ///
    /// Fails if `desc` addresses elements outside `data`.
    pub fn new(desc: &'a MemoryDesc, data: &'a mut [f32]) -> KernelResult<Self> {
        desc.check_fits(data.len())?;
        Ok(Self { desc, data })
    }

    #[must_use]
    pub const fn desc(&self) -> &MemoryDesc {
        self.desc
    }
}

/// An owned tensor in plain row-major layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    desc: MemoryDesc,
    data: Vec<f32>,
}

impl Tensor {
    #[must_use]
    pub fn zeros(dims: impl Into<Vec<usize>>) -> Self {
        let desc = MemoryDesc::plain(dims);
        let data = vec![0.0; desc.num_elements()];
        Self { desc, data }
    }

    #[must_use]
    pub const fn desc(&self) -> &MemoryDesc {
        &self.desc
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Copies every element into `dst`, which may use any strided layout.
    ///
    /// # Errors
    ///
    /// Fails if the logical dims differ.
    pub fn reorder_to(&self, dst: &mut TensorMut<'_>) -> KernelResult<()> {
        if self.desc.dims != dst.desc.dims {
            return Err(invalid(format!(
                "reorder from {:?} into {:?}",
                self.desc.dims, dst.desc.dims
            )));
        }
        if self.data.is_empty() {
            return Ok(());
        }
        let dims = &self.desc.dims;
        let mut idx = vec![0; dims.len()];
        for &value in &self.data {
            dst.data[offset(&idx, &dst.desc.strides)] = value;
            next_index(&mut idx, dims);
        }
        Ok(())
    }
}

/// Batch and row strides used to split `dst` into disjoint chunks.
///
/// Batches and rows must not overlap and the last dim must be unit-strided.
/// Singleton axes take the dense span of what they hold.
fn dst_chunk_strides(dst: &MemoryDesc) -> KernelResult<(usize, usize)> {
    let (b, m, n) = (dst.dims[0], dst.dims[1], dst.dims[2]);
    let (sb, sm, sn) = (dst.strides[0], dst.strides[1], dst.strides[2]);
    if n > 1 && sn != 1 {
        return Err(invalid(format!("dst column stride {sn}, expected 1")));
    }
    let row_stride = if m == 1 { n } else { sm };
    if m > 1 && row_stride < n {
        return Err(invalid(format!("dst row stride {row_stride} below {n} columns")));
    }
    let batch_span = (m - 1)
        .checked_mul(row_stride)
        .and_then(|rows| rows.checked_add(n))
        .ok_or_else(|| invalid(format!("dst {m}x{n} with row stride {row_stride} overflows")))?;
    let batch_stride = if b == 1 { batch_span } else { sb };
    if b > 1 && batch_stride < batch_span {
        return Err(invalid(format!(
            "dst batch stride {sb} overlaps {m} rows of stride {row_stride}"
        )));
    }
    Ok((batch_stride.max(1), row_stride.max(1)))
}

fn matmul_scaled(
    src: &TensorRef<'_>,
    weights: &TensorRef<'_>,
    dst: &mut TensorMut<'_>,
    alpha: f32,
    beta: f32,
) -> KernelResult<()> {
    let (sd, wd, dd) = (&src.desc.dims, &weights.desc.dims, &dst.desc.dims);
    if sd.len() != 3 || wd.len() != 3 || dd.len() != 3 {
        return Err(invalid("matmul operands must be rank 3".to_owned()));
    }
    let (b, m, k, n) = (sd[0], sd[1], sd[2], wd[2]);
    if wd[0] != b || wd[1] != k || dd[..] != [b, m, n] {
        return Err(invalid(format!(
            "matmul shapes {sd:?} x {wd:?} -> {dd:?} do not agree"
        )));
    }
    if b == 0 || m == 0 || n == 0 {
        return Ok(());
    }

    let (batch_stride, row_stride) = dst_chunk_strides(dst.desc)?;
    let (ss, ws) = (&src.desc.strides, &weights.desc.strides);
    let (src_data, wei_data) = (src.data, weights.data);

    dst.data
        .par_chunks_mut(batch_stride)
        .take(b)
        .enumerate()
        .for_each(|(bi, batch)| {
            let wei_base = bi * ws[0];
            batch
                .par_chunks_mut(row_stride)
                .take(m)
                .enumerate()
                .for_each(|(i, row)| {
                    let src_row = bi * ss[0] + i * ss[1];
                    for (j, out) in row.iter_mut().take(n).enumerate() {
                        let mut sum = 0.0f32;
                        for l in 0..k {
                            sum += src_data[src_row + l * ss[2]]
                                * wei_data[wei_base + l * ws[1] + j * ws[2]];
                        }
                        *out = if beta == 0.0 {
                            alpha * sum
                        } else {
                            alpha * sum + beta * *out
                        };
                    }
                });
        });
    Ok(())
}

/// Batched matrix product `dst = src · weights` over rank-3 descriptors.
///
/// `dst` is overwritten.
///
/// # Errors
///
/// Fails if the shapes disagree or `dst` batches or rows overlap.
pub fn matmul_forward(
    src: &TensorRef<'_>,
    weights: &TensorRef<'_>,
    dst: &mut TensorMut<'_>,
) -> KernelResult<()> {
    matmul_scaled(src, weights, dst, 1.0, 0.0)
}

fn trans_flag(flag: u8) -> KernelResult<bool> {
    match flag {
        b'N' | b'n' => Ok(false),
        b'T' | b't' => Ok(true),
        other => Err(invalid(format!("unknown transpose flag {:?}", other as char))),
    }
}

/// Row-major `C = alpha · op(A) · op(B) + beta · C`, flags `b'N'` or `b'T'`.
///
/// # Errors
///
/// Fails on unknown flags, leading dimensions smaller than a row, or
/// slices too short for the described matrices.
#[allow(clippy::too_many_arguments)]
pub fn sgemm(
    transa: u8,
    transb: u8,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    b: &[f32],
    ldb: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
) -> KernelResult<()> {
    let (ta, tb) = (trans_flag(transa)?, trans_flag(transb)?);
    let a_cols = if ta { m } else { k };
    let b_cols = if tb { k } else { n };
    if lda < a_cols.max(1) || ldb < b_cols.max(1) || ldc < n.max(1) {
        return Err(invalid(format!(
            "leading dims lda = {lda}, ldb = {ldb}, ldc = {ldc} too small"
        )));
    }

    let a_desc = MemoryDesc::with_strides([1, m, k], if ta { [0, 1, lda] } else { [0, lda, 1] })?;
    let b_desc = MemoryDesc::with_strides([1, k, n], if tb { [0, 1, ldb] } else { [0, ldb, 1] })?;
    let c_desc = MemoryDesc::with_strides([1, m, n], [0, ldc, 1])?;

    let src = TensorRef::new(&a_desc, a)?;
    let weights = TensorRef::new(&b_desc, b)?;
    let mut dst = TensorMut::new(&c_desc, c)?;
    matmul_scaled(&src, &weights, &mut dst, alpha, beta)
}

/// Convolution hyper-parameters, one entry per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvDesc {
    pub strides: Vec<usize>,
    /// `1` means no dilation.
    pub dilations: Vec<usize>,
    pub padding_l: Vec<usize>,
    pub padding_r: Vec<usize>,
    pub groups: usize,
}

impl ConvDesc {
    /// Output extent of spatial axis `s` for an input extent and kernel extent.
    fn output_extent(&self, s: usize, input: usize, kernel: usize) -> Option<usize> {
        let span = kernel
            .checked_sub(1)?
            .checked_mul(self.dilations[s])?
            .checked_add(1)?;
        let padded = input
            .checked_add(self.padding_l[s])?
            .checked_add(self.padding_r[s])?;
        padded
            .checked_sub(span)
            .map(|room| room / self.strides[s] + 1)
    }
}

/// Direct forward convolution.
///
/// `src` is `(N, C, spatial…)`, `weights` is `(O, C / groups, kernel…)`, and
/// the result is a plain `(N, O, out…)` tensor with `out` equal to `dst_dims`.
///
/// # Errors
///
/// [`KernelError::InvalidConvParams`] for inconsistent channels, groups or
/// parameter lengths; [`KernelError::MismatchedOutputShape`] if `dst_dims`
/// disagrees with the convolution arithmetic.
pub fn convolution_forward(
    src: &TensorRef<'_>,
    weights: &TensorRef<'_>,
    dst_dims: &[usize],
    conv: &ConvDesc,
) -> KernelResult<Tensor> {
    let (sd, wd) = (src.desc.dims(), weights.desc.dims());
    let rank = sd.len();
    if rank < 3 || wd.len() != rank || dst_dims.len() != rank {
        return Err(KernelError::InvalidConvParams(format!(
            "ranks src {}, weights {}, dst {}",
            rank,
            wd.len(),
            dst_dims.len()
        )));
    }
    let spatial = rank - 2;
    if [&conv.strides, &conv.dilations, &conv.padding_l, &conv.padding_r]
        .iter()
        .any(|v| v.len() != spatial)
        || conv.strides.contains(&0)
        || conv.dilations.contains(&0)
    {
        return Err(KernelError::InvalidConvParams(format!(
            "bad spatial parameters for {spatial} axes: {conv:?}"
        )));
    }

    let (batch, channels) = (sd[0], sd[1]);
    let (out_channels, group_channels) = (wd[0], wd[1]);
    let groups = conv.groups;
    if groups == 0 || channels != groups * group_channels || out_channels % groups != 0 {
        return Err(KernelError::InvalidConvParams(format!(
            "{channels} input channels, {out_channels}x{group_channels} filter, {groups} groups"
        )));
    }

    let mut expected = vec![batch, out_channels];
    for s in 0..spatial {
        let extent = conv
            .output_extent(s, sd[2 + s], wd[2 + s])
            .ok_or_else(|| KernelError::InvalidConvParams(format!(
                "kernel axis {s} is larger than the padded input"
            )))?;
        expected.push(extent);
    }
    if expected != dst_dims {
        return Err(KernelError::MismatchedOutputShape {
            op: "conv",
            reason: format!("expected output {expected:?}, found {dst_dims:?}"),
        });
    }

    let mut out = Tensor::zeros(dst_dims);
    let plane: usize = dst_dims[2..].iter().product();
    if plane == 0 || out.data.is_empty() {
        return Ok(out);
    }

    let out_spatial = &dst_dims[2..];
    let kernel_spatial = &wd[2..];
    let in_spatial = &sd[2..];
    let per_group = out_channels / groups;

    out.data
        .par_chunks_mut(plane)
        .enumerate()
        .for_each(|(p, plane_out)| {
            let (n, o) = (p / out_channels, p % out_channels);
            let g = o / per_group;
            let mut od = vec![0usize; spatial];
            let mut src_idx = vec![0usize; rank];
            let mut wei_idx = vec![0usize; rank];
            src_idx[0] = n;
            wei_idx[0] = o;

            for value in plane_out.iter_mut() {
                let mut acc = 0.0f32;
                for c in 0..group_channels {
                    src_idx[1] = g * group_channels + c;
                    wei_idx[1] = c;
                    let mut kd = vec![0usize; spatial];
                    'taps: loop {
                        let mut inside = true;
                        for s in 0..spatial {
                            let pos = od[s] * conv.strides[s] + kd[s] * conv.dilations[s];
                            match pos.checked_sub(conv.padding_l[s]) {
                                Some(x) if x < in_spatial[s] => src_idx[2 + s] = x,
                                _ => {
                                    inside = false;
                                    break;
                                }
                            }
                        }
                        if inside {
                            wei_idx[2..].copy_from_slice(&kd);
                            acc += src.at(&src_idx) * weights.at(&wei_idx);
                        }
                        if !next_index(&mut kd, kernel_spatial) {
                            break 'taps;
                        }
                    }
                }
                *value = acc;
                next_index(&mut od, out_spatial);
            }
        });

    Ok(out)
}
