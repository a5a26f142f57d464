//! CPU kernel entry points.
//!
//! The `ral_*` functions have the runtime calling convention: they take the
//! execution context and stream first, return nothing, and report failures
//! through [`ExecutionContext::signal_error`]. Each one wraps a fallible core
//! ([`gemm`], [`batch_gemm`], [`conv`]) that validates every operand before
//! dispatching, so an output is only written by a call that succeeds.
//!
//! # Example
//!
//! ```rust
//! use ral_kernels::backend::KernelMode;
//! use ral_kernels::context::{CpuContext, StreamHandle};
//! use ral_kernels::kernels::ral_gemm;
//! use ral_kernels::tensors::{MemRef, MemRefMut};
//!
//! let a = vec![1.0f32, 2.0, 3.0, 4.0];
//! let b = vec![5.0f32, 6.0, 7.0, 8.0];
//! let mut c = vec![0.0f32; 4];
//!
//! let ctx = CpuContext::with_mode(KernelMode::OneDnn);
//! let a = MemRef::contiguous(&a, [2, 2]).unwrap();
//! let b = MemRef::contiguous(&b, [2, 2]).unwrap();
//! let mut out = MemRefMut::contiguous(&mut c, [2, 2]).unwrap();
//! ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, false, false);
//!
//! assert!(!ctx.has_failed());
//! assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
//! ```

use crate::context::{ExecutionContext, StreamHandle};
use crate::error::{KernelError, KernelResult, Operand};
use crate::layout;
use crate::ops::dispatch::{self, MatrixArg, MatrixOut};
use crate::profiling::{self, ConvStats, CpuTimer, GemmStats};
use crate::tensors::{DType, MemRef, MemRefMut};
use crate::validate;

fn report(ctx: &dyn ExecutionContext, result: KernelResult<()>) {
    if let Err(err) = result {
        ctx.signal_error(err.kind(), &err.to_string());
    }
}

/// `C = op(A) · op(B)` for rank-2 `f32` operands.
///
/// Empty operands make the call a successful no-op.
pub fn ral_gemm(
    ctx: &dyn ExecutionContext,
    _stream: StreamHandle,
    a: &MemRef<'_>,
    b: &MemRef<'_>,
    c: &mut MemRefMut<'_>,
    transpose_a: bool,
    transpose_b: bool,
) {
    report(ctx, gemm(ctx, a, b, c, transpose_a, transpose_b));
}

/// `C[i] = op(A[i]) · op(B[i])` for rank-3 or rank-4 `f32` operands.
///
/// Empty operands are an error.
pub fn ral_batch_gemm(
    ctx: &dyn ExecutionContext,
    _stream: StreamHandle,
    a: &MemRef<'_>,
    b: &MemRef<'_>,
    c: &mut MemRefMut<'_>,
    transpose_a: bool,
    transpose_b: bool,
) {
    report(ctx, batch_gemm(ctx, a, b, c, transpose_a, transpose_b));
}

/// Forward convolution with layouts described by `metadata`.
///
/// Empty operands make the call a successful no-op.
pub fn ral_conv(
    ctx: &dyn ExecutionContext,
    _stream: StreamHandle,
    input: &MemRef<'_>,
    kernel: &MemRef<'_>,
    padding: &MemRef<'_>,
    output: &mut MemRefMut<'_>,
    metadata: &MemRef<'_>,
) {
    report(ctx, conv(ctx, input, kernel, padding, output, metadata));
}

fn check_matrix_dtypes(op: &'static str, a: &MemRef<'_>, b: &MemRef<'_>, c: &MemRefMut<'_>) -> KernelResult<()> {
    validate::check_dtype(op, Operand::Lhs, a.dtype())?;
    validate::check_dtype(op, Operand::Rhs, b.dtype())?;
    validate::check_dtype(op, Operand::Output, c.dtype())
}

/// Fallible core of [`ral_gemm`].
///
/// # Errors
///
/// Rank, dtype, contraction, output-shape, stride and mode failures.
pub fn gemm(
    ctx: &dyn ExecutionContext,
    a: &MemRef<'_>,
    b: &MemRef<'_>,
    c: &mut MemRefMut<'_>,
    transpose_a: bool,
    transpose_b: bool,
) -> KernelResult<()> {
    const OP: &str = "gemm";
    if a.is_empty() || b.is_empty() || c.is_empty() {
        log::debug!("ral_gemm: early return for empty tensor");
        return Ok(());
    }
    validate::check_rank(OP, Operand::Lhs, a.geometry(), &[2], "2")?;
    validate::check_rank(OP, Operand::Rhs, b.geometry(), &[2], "2")?;
    validate::check_rank(OP, Operand::Output, c.geometry(), &[2], "2")?;
    check_matrix_dtypes(OP, a, b, c)?;
    let dims = validate::gemm_dims(a.geometry(), b.geometry(), c.geometry(), transpose_a, transpose_b)?;

    let mode = ctx.kernel_mode();
    let mut timer = CpuTimer::start("ral_gemm");
    let c_geometry = c.geometry().clone();
    dispatch::gemm(
        mode,
        dims,
        MatrixArg {
            data: a.as_slice::<f32>()?,
            geometry: a.geometry(),
            transpose: transpose_a,
        },
        MatrixArg {
            data: b.as_slice::<f32>()?,
            geometry: b.geometry(),
            transpose: transpose_b,
        },
        MatrixOut {
            data: c.as_mut_slice::<f32>()?,
            geometry: &c_geometry,
        },
    )?;
    timer.stop();
    profiling::log_gemm(ctx, &timer, &GemmStats::new(dims, DType::F32.size_of()));
    Ok(())
}

/// Fallible core of [`ral_batch_gemm`].
///
/// # Errors
///
/// Empty operands, rank, dtype, batch-size, shape, stride and mode failures.
pub fn batch_gemm(
    ctx: &dyn ExecutionContext,
    a: &MemRef<'_>,
    b: &MemRef<'_>,
    c: &mut MemRefMut<'_>,
    transpose_a: bool,
    transpose_b: bool,
) -> KernelResult<()> {
    const OP: &str = "batch gemm";
    validate::check_rank(OP, Operand::Lhs, a.geometry(), &[3, 4], "3 or 4")?;
    for (operand, geometry) in [(Operand::Rhs, b.geometry()), (Operand::Output, c.geometry())] {
        if geometry.rank() != a.rank() {
            return Err(KernelError::UnsupportedRank {
                op: OP,
                operand,
                expected: "equal to lhs",
                found: geometry.rank(),
            });
        }
    }
    let dims =
        validate::batch_gemm_dims(a.geometry(), b.geometry(), c.geometry(), transpose_a, transpose_b)?;
    check_matrix_dtypes(OP, a, b, c)?;

    let mode = ctx.kernel_mode();
    let mut timer = CpuTimer::start("ral_batch_gemm");
    let c_geometry = c.geometry().clone();
    dispatch::batch_gemm(
        mode,
        dims,
        MatrixArg {
            data: a.as_slice::<f32>()?,
            geometry: a.geometry(),
            transpose: transpose_a,
        },
        MatrixArg {
            data: b.as_slice::<f32>()?,
            geometry: b.geometry(),
            transpose: transpose_b,
        },
        MatrixOut {
            data: c.as_mut_slice::<f32>()?,
            geometry: &c_geometry,
        },
    )?;
    timer.stop();
    profiling::log_gemm(ctx, &timer, &GemmStats::new(dims, DType::F32.size_of()));
    Ok(())
}

/// Fallible core of [`ral_conv`].
///
/// # Errors
///
/// Rank, layout, metadata, dtype, group, output-shape and mode failures.
pub fn conv(
    ctx: &dyn ExecutionContext,
    input: &MemRef<'_>,
    kernel: &MemRef<'_>,
    padding: &MemRef<'_>,
    output: &mut MemRefMut<'_>,
    metadata: &MemRef<'_>,
) -> KernelResult<()> {
    const OP: &str = "conv";
    if input.is_empty() || kernel.is_empty() || output.is_empty() {
        log::debug!("ral_conv: early return for empty tensor");
        return Ok(());
    }
    validate::check_rank(OP, Operand::Input, input.geometry(), &[3, 4], "3 or 4")?;
    for (operand, rank) in [(Operand::Filter, kernel.rank()), (Operand::Output, output.rank())] {
        if rank != input.rank() {
            return Err(KernelError::UnsupportedRank {
                op: OP,
                operand,
                expected: "equal to input",
                found: rank,
            });
        }
    }

    let params = layout::parse_conv_params(input, kernel, padding, output, metadata)?;
    let mode = ctx.kernel_mode();
    let mut timer = CpuTimer::start("ral_conv");
    dispatch::conv(
        mode,
        &params,
        input.as_slice::<f32>()?,
        kernel.as_slice::<f32>()?,
        output.as_mut_slice::<f32>()?,
    )?;
    timer.stop();
    let stats = ConvStats::new(
        &params.input.dims,
        &params.filter.dims,
        &params.output.dims,
        DType::F32.size_of(),
    );
    profiling::log_conv(ctx, &timer, &stats);
    Ok(())
}
