//! Operation Dispatch Layer
//!
//! This module selects the math library for each primitive, based on the
//! [`KernelMode`] handed in by the caller (usually the execution context's
//! mode).
//!
//! | mode       | gemm         | batch gemm                   | conv        |
//! |------------|--------------|------------------------------|-------------|
//! | `Mkl`      | [`blas`]     | [`blas`] strided batch       | [`dnn`]     |
//! | `OneDnn`   | [`dnn`]      | [`dnn`] batched matmul       | [`dnn`]     |
//! | `Autotune` | unsupported  | unsupported                  | unsupported |
//!
//! # Design Highlights
//! - **Checked inputs**: callers pass shapes already validated by
//!   [`crate::validate`]; dispatch only derives backend arguments
//! - **No fallback**: an unsupported mode is an error, never a silent switch
//! - **Single write**: a failing dispatch leaves the output untouched

use super::blas::{self, Transpose};
use super::dnn::{self, ConvDesc, MemoryDesc, TensorMut, TensorRef};
use crate::backend::KernelMode;
use crate::error::{KernelError, KernelResult, Operand};
use crate::layout::{ConvParams, TensorFormat};
use crate::tensors::Geometry;
use crate::validate::{self, GemmDims};

/// A read-only matrix (or stack of matrices) operand.
#[derive(Debug, Clone, Copy)]
pub struct MatrixArg<'a> {
    pub data: &'a [f32],
    pub geometry: &'a Geometry,
    pub transpose: bool,
}

/// The output matrix (or stack of matrices).
#[derive(Debug)]
pub struct MatrixOut<'a> {
    pub data: &'a mut [f32],
    pub geometry: &'a Geometry,
}

fn unsupported(op: &'static str, mode: KernelMode) -> KernelError {
    KernelError::UnsupportedMode { op, mode }
}

fn collapsed_batch_stride(geometry: &Geometry, operand: Operand) -> KernelResult<usize> {
    geometry.batch_stride().ok_or_else(|| {
        KernelError::InvalidMemRef(format!(
            "{operand} batch axes {:?} with strides {:?} cannot be collapsed",
            &geometry.sizes()[..geometry.rank() - 2],
            &geometry.strides()[..geometry.rank() - 2]
        ))
    })
}

/// Logical `(batch, rows, cols)` descriptor of `op(X)`.
///
/// Transposing only swaps the trailing strides, the same way an `acb`
/// descriptor views `abc` memory.
fn matrix_desc(geometry: &Geometry, operand: Operand, transpose: bool) -> KernelResult<MemoryDesc> {
    let rank = geometry.rank();
    let (sizes, strides) = (geometry.sizes(), geometry.strides());
    let batch_stride = collapsed_batch_stride(geometry, operand)?;
    let (rows, cols) = (sizes[rank - 2], sizes[rank - 1]);
    let (row_stride, col_stride) = (strides[rank - 2], strides[rank - 1]);
    let batch = geometry.batch_size();
    if transpose {
        MemoryDesc::with_strides([batch, cols, rows], [batch_stride, col_stride, row_stride])
    } else {
        MemoryDesc::with_strides([batch, rows, cols], [batch_stride, row_stride, col_stride])
    }
}

/// Dispatches a rank-2 `C = op(A) · op(B)`.
///
/// # Errors
///
/// [`KernelError::UnsupportedMode`] for [`KernelMode::Autotune`], or any
/// stride/backend failure.
pub fn gemm(
    mode: KernelMode,
    dims: GemmDims,
    a: MatrixArg<'_>,
    b: MatrixArg<'_>,
    c: MatrixOut<'_>,
) -> KernelResult<()> {
    let GemmDims { m, n, k, .. } = dims;
    match mode {
        KernelMode::Mkl => {
            let lda = validate::leading_dim(a.geometry, Operand::Lhs)?;
            let ldb = validate::leading_dim(b.geometry, Operand::Rhs)?;
            let ldc = validate::leading_dim(c.geometry, Operand::Output)?;
            log::trace!("gemm via blas: m = {m}, n = {n}, k = {k}");
            blas::sgemm(
                Transpose::from_flag(a.transpose),
                Transpose::from_flag(b.transpose),
                m,
                n,
                k,
                1.0,
                a.data,
                lda,
                b.data,
                ldb,
                0.0,
                c.data,
                ldc,
            )
        }
        KernelMode::OneDnn => {
            let lda = validate::leading_dim(a.geometry, Operand::Lhs)?;
            let ldb = validate::leading_dim(b.geometry, Operand::Rhs)?;
            let ldc = validate::leading_dim(c.geometry, Operand::Output)?;
            let flag = |transpose: bool| if transpose { b'T' } else { b'N' };
            log::trace!("gemm via dnn: m = {m}, n = {n}, k = {k}");
            dnn::sgemm(
                flag(a.transpose),
                flag(b.transpose),
                m,
                n,
                k,
                1.0,
                a.data,
                lda,
                b.data,
                ldb,
                0.0,
                c.data,
                ldc,
            )
        }
        KernelMode::Autotune => Err(unsupported("gemm", mode)),
    }
}

/// Dispatches a batched `C[i] = op(A[i]) · op(B[i])` over rank-3 or rank-4
/// operands whose leading axes act as one batch axis.
///
/// # Errors
///
/// [`KernelError::UnsupportedMode`] for [`KernelMode::Autotune`],
/// [`KernelError::InvalidMemRef`] if batch axes cannot be collapsed, or a
/// backend failure.
pub fn batch_gemm(
    mode: KernelMode,
    dims: GemmDims,
    a: MatrixArg<'_>,
    b: MatrixArg<'_>,
    c: MatrixOut<'_>,
) -> KernelResult<()> {
    let GemmDims { batch, m, n, k } = dims;
    match mode {
        KernelMode::Mkl => {
            let lda = validate::leading_dim(a.geometry, Operand::Lhs)?;
            let ldb = validate::leading_dim(b.geometry, Operand::Rhs)?;
            let ldc = validate::leading_dim(c.geometry, Operand::Output)?;
            let stride_a = collapsed_batch_stride(a.geometry, Operand::Lhs)?;
            let stride_b = collapsed_batch_stride(b.geometry, Operand::Rhs)?;
            let stride_c = collapsed_batch_stride(c.geometry, Operand::Output)?;
            log::trace!("batch gemm via blas: batch = {batch}, m = {m}, n = {n}, k = {k}");
            blas::sgemm_batch_strided(
                Transpose::from_flag(a.transpose),
                Transpose::from_flag(b.transpose),
                m,
                n,
                k,
                1.0,
                a.data,
                lda,
                stride_a,
                b.data,
                ldb,
                stride_b,
                0.0,
                c.data,
                ldc,
                stride_c,
                batch,
            )
        }
        KernelMode::OneDnn => {
            let src_desc = matrix_desc(a.geometry, Operand::Lhs, a.transpose)?;
            let wei_desc = matrix_desc(b.geometry, Operand::Rhs, b.transpose)?;
            let dst_desc = matrix_desc(c.geometry, Operand::Output, false)?;
            log::trace!("batch gemm via dnn: batch = {batch}, m = {m}, n = {n}, k = {k}");
            let src = TensorRef::new(&src_desc, a.data)?;
            let weights = TensorRef::new(&wei_desc, b.data)?;
            let mut dst = TensorMut::new(&dst_desc, c.data)?;
            dnn::matmul_forward(&src, &weights, &mut dst)
        }
        KernelMode::Autotune => Err(unsupported("batch gemm", mode)),
    }
}

fn logical_desc(format: &TensorFormat) -> KernelResult<MemoryDesc> {
    MemoryDesc::with_strides(format.dims.clone(), format.strides.clone())
}

/// Dispatches a forward convolution described by decoded `params`.
///
/// The result is computed into a plain temporary and then reordered into the
/// output's own layout, so `output` is written only once everything succeeded.
///
/// # Errors
///
/// [`KernelError::UnsupportedMode`] for [`KernelMode::Autotune`], or any
/// convolution or reorder failure.
pub fn conv(
    mode: KernelMode,
    params: &ConvParams,
    input: &[f32],
    filter: &[f32],
    output: &mut [f32],
) -> KernelResult<()> {
    match mode {
        KernelMode::Autotune => return Err(unsupported("conv", mode)),
        KernelMode::Mkl => log::trace!("conv has no blas kernel, using dnn"),
        KernelMode::OneDnn => {}
    }

    let src_desc = logical_desc(&params.input)?;
    let wei_desc = logical_desc(&params.filter)?;
    let dst_desc = logical_desc(&params.output)?;
    let desc = ConvDesc {
        strides: params.strides.clone(),
        dilations: params.dilations.clone(),
        padding_l: params.padding_l.clone(),
        padding_r: params.padding_r.clone(),
        groups: params.groups,
    };

    let src = TensorRef::new(&src_desc, input)?;
    let weights = TensorRef::new(&wei_desc, filter)?;
    let mut dst = TensorMut::new(&dst_desc, output)?;
    let result = dnn::convolution_forward(&src, &weights, dst_desc.dims(), &desc)?;
    result.reorder_to(&mut dst)
}
