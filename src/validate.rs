//! Shape and contract checks shared by the kernel entry points.
//!
//! Checks run before any backend is touched, so a failing call never writes
//! to its output.

use crate::error::{KernelError, KernelResult, Operand};
use crate::tensors::{DType, Geometry};

/// Problem size of one matrix product `C[m×n] = op(A)[m×k] · op(B)[k×n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmDims {
    pub batch: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

impl GemmDims {
    /// Multiply-add count, `2·batch·m·n·k`.
    #[must_use]
    pub const fn math_ops(&self) -> usize {
        2 * self.batch * self.m * self.n * self.k
    }
}

/// Only `f32` operands have kernels.
///
/// # Errors
///
/// Returns [`KernelError::InvalidDtype`] for any other element type.
pub fn check_dtype(op: &'static str, operand: Operand, dtype: DType) -> KernelResult<()> {
    match dtype {
        DType::F32 => Ok(()),
        DType::F64 | DType::I32 => Err(KernelError::InvalidDtype { op, operand, dtype }),
    }
}

/// Fails unless `geometry` has one of the `allowed` ranks.
///
/// # Errors
///
/// Returns [`KernelError::UnsupportedRank`].
pub fn check_rank(
    op: &'static str,
    operand: Operand,
    geometry: &Geometry,
    allowed: &[usize],
    expected: &'static str,
) -> KernelResult<()> {
    if allowed.contains(&geometry.rank()) {
        Ok(())
    } else {
        Err(KernelError::UnsupportedRank {
            op,
            operand,
            expected,
            found: geometry.rank(),
        })
    }
}

/// `(rows, cols)` of `op(X)` from the trailing two axes.
fn trailing(geometry: &Geometry, transpose: bool) -> (usize, usize) {
    let sizes = geometry.sizes();
    let rank = sizes.len();
    let (rows, cols) = (sizes[rank - 2], sizes[rank - 1]);
    if transpose { (cols, rows) } else { (rows, cols) }
}

/// Derives `m, n, k` for a rank-2 GEMM.
///
/// The contraction dimension implied by `a` must equal the one implied by
/// `b`, and `c` must be `m×n`. Callers short-circuit empty operands first.
///
/// # Errors
///
/// [`KernelError::MismatchedContractionDim`] or
/// [`KernelError::MismatchedOutputShape`].
pub fn gemm_dims(
    a: &Geometry,
    b: &Geometry,
    c: &Geometry,
    transpose_a: bool,
    transpose_b: bool,
) -> KernelResult<GemmDims> {
    let (m, k) = trailing(a, transpose_a);
    let (kb, n) = trailing(b, transpose_b);
    if k != kb {
        return Err(KernelError::MismatchedContractionDim { lhs: k, rhs: kb });
    }
    if c.sizes() != [m, n] {
        return Err(KernelError::MismatchedOutputShape {
            op: "gemm",
            reason: format!("expected output {m}x{n}, found {:?}", c.sizes()),
        });
    }
    Ok(GemmDims { batch: 1, m, n, k })
}

/// Derives `batch, m, n, k` for a batched GEMM.
///
/// Order of checks: emptiness, batch agreement, then the per-matrix shapes.
/// Unlike [`gemm_dims`], an empty operand is an error here.
///
/// # Errors
///
/// [`KernelError::EmptyOperand`], [`KernelError::MismatchedBatchSize`] or
/// [`KernelError::MismatchedOutputShape`].
pub fn batch_gemm_dims(
    a: &Geometry,
    b: &Geometry,
    c: &Geometry,
    transpose_a: bool,
    transpose_b: bool,
) -> KernelResult<GemmDims> {
    if a.is_empty() || b.is_empty() || c.is_empty() {
        return Err(KernelError::EmptyOperand {
            op: "ral_batch_gemm",
        });
    }

    let (batch_a, batch_b, batch_c) = (a.batch_size(), b.batch_size(), c.batch_size());
    if batch_a != batch_b || batch_a != batch_c {
        return Err(KernelError::MismatchedBatchSize {
            lhs: batch_a,
            rhs: batch_b,
            output: batch_c,
        });
    }

    let (m, k) = trailing(a, transpose_a);
    let (kb, n) = trailing(b, transpose_b);
    let (cm, cn) = trailing(c, false);
    if cm != m || cn != n || kb != k {
        return Err(KernelError::MismatchedOutputShape {
            op: "batch gemm",
            reason: format!("m = {m}, n = {n}, k = {k}, rhs k = {kb}, output = {cm}x{cn}"),
        });
    }
    Ok(GemmDims {
        batch: batch_a,
        m,
        n,
        k,
    })
}

/// Group count of a convolution, `input_channels / kernel_channels`.
///
/// # Errors
///
/// [`KernelError::InvalidConvParams`] unless the division is exact and positive.
pub fn conv_groups(input_channels: usize, kernel_channels: usize) -> KernelResult<usize> {
    if kernel_channels == 0 || input_channels % kernel_channels != 0 {
        return Err(KernelError::InvalidConvParams(format!(
            "invalid group count: {input_channels} input channels over {kernel_channels} kernel channels"
        )));
    }
    match input_channels / kernel_channels {
        0 => Err(KernelError::InvalidConvParams(
            "invalid group count: 0".to_owned(),
        )),
        groups => Ok(groups),
    }
}

/// Row stride of a matrix whose innermost axis must be unit-strided.
///
/// # Errors
///
/// [`KernelError::InvalidMemRef`] if the innermost stride is not 1 or rows overlap.
pub fn leading_dim(geometry: &Geometry, operand: Operand) -> KernelResult<usize> {
    let (sizes, strides) = (geometry.sizes(), geometry.strides());
    let rank = strides.len();
    let (rows, cols) = (sizes[rank - 2], sizes[rank - 1]);
    if cols > 1 && strides[rank - 1] != 1 {
        return Err(KernelError::InvalidMemRef(format!(
            "{operand} innermost stride is {}, expected 1",
            strides[rank - 1]
        )));
    }
    if rows <= 1 {
        // a single row never steps by its stride
        return Ok(cols.max(1));
    }
    if strides[rank - 2] < cols {
        return Err(KernelError::InvalidMemRef(format!(
            "{operand} row stride {} is smaller than {cols} columns",
            strides[rank - 2]
        )));
    }
    Ok(strides[rank - 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(sizes: &[usize]) -> Geometry {
        let strides = Geometry::row_major_strides(sizes);
        Geometry::new(sizes.to_vec(), strides, usize::MAX).unwrap()
    }

    #[test]
    fn gemm_dims_follow_transpose_flags() {
        let a = geom(&[4, 3]);
        let b = geom(&[3, 5]);
        let c = geom(&[4, 5]);
        assert_eq!(
            gemm_dims(&a, &b, &c, false, false).unwrap(),
            GemmDims { batch: 1, m: 4, n: 5, k: 3 }
        );

        let at = geom(&[3, 4]);
        let bt = geom(&[5, 3]);
        let dims = gemm_dims(&at, &bt, &c, true, true).unwrap();
        assert_eq!((dims.m, dims.n, dims.k), (4, 5, 3));
        // m·k covers A, k·n covers B
        assert_eq!(dims.m * dims.k, at.num_elements());
        assert_eq!(dims.k * dims.n, bt.num_elements());
    }

    #[test]
    fn contraction_mismatch_is_detected() {
        let a = geom(&[2, 3]);
        let b = geom(&[4, 2]);
        let c = geom(&[2, 2]);
        assert_eq!(
            gemm_dims(&a, &b, &c, false, false).unwrap_err(),
            KernelError::MismatchedContractionDim { lhs: 3, rhs: 4 }
        );
    }

    #[test]
    fn gemm_output_must_be_m_by_n() {
        let a = geom(&[2, 3]);
        let b = geom(&[3, 2]);
        let err = gemm_dims(&a, &b, &geom(&[2, 3]), false, false).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MismatchedOutputShape);
    }

    #[test]
    fn batch_dims() {
        let a = geom(&[2, 3, 4, 5]);
        let b = geom(&[6, 5, 7]);
        let c = geom(&[6, 4, 7]);
        let dims = batch_gemm_dims(&a, &b, &c, false, false).unwrap();
        assert_eq!(dims, GemmDims { batch: 6, m: 4, n: 7, k: 5 });
        assert_eq!(dims.math_ops(), 2 * 6 * 4 * 7 * 5);
    }

    #[test]
    fn batch_size_mismatch() {
        let a = geom(&[2, 4, 5]);
        let b = geom(&[3, 5, 6]);
        let c = geom(&[2, 4, 6]);
        assert_eq!(
            batch_gemm_dims(&a, &b, &c, false, false).unwrap_err(),
            KernelError::MismatchedBatchSize { lhs: 2, rhs: 3, output: 2 }
        );
    }

    #[test]
    fn batch_empty_operand_is_an_error() {
        let a = geom(&[2, 0, 5]);
        let b = geom(&[3, 5, 6]);
        let c = geom(&[2, 0, 6]);
        // emptiness wins over the batch mismatch
        assert_eq!(
            batch_gemm_dims(&a, &b, &c, false, false).unwrap_err(),
            KernelError::EmptyOperand { op: "ral_batch_gemm" }
        );
    }

    #[test]
    fn batch_output_shape_mismatch() {
        let a = geom(&[2, 4, 5]);
        let b = geom(&[2, 5, 6]);
        let c = geom(&[2, 6, 4]);
        let err = batch_gemm_dims(&a, &b, &c, false, false).unwrap_err();
        assert!(matches!(err, KernelError::MismatchedOutputShape { op: "batch gemm", .. }));

        // rhs contraction disagrees while the output still matches
        let b = geom(&[2, 6, 6]);
        let c = geom(&[2, 4, 6]);
        assert!(batch_gemm_dims(&a, &b, &c, false, false).is_err());
    }

    #[test]
    fn groups() {
        assert_eq!(conv_groups(8, 4), Ok(2));
        assert_eq!(conv_groups(8, 8), Ok(1));
        assert!(conv_groups(8, 3).is_err());
        assert!(conv_groups(8, 0).is_err());
        assert!(conv_groups(0, 4).is_err());
    }

    #[test]
    fn dtypes() {
        assert!(check_dtype("gemm", Operand::Lhs, DType::F32).is_ok());
        assert!(matches!(
            check_dtype("gemm", Operand::Rhs, DType::F64),
            Err(KernelError::InvalidDtype { operand: Operand::Rhs, .. })
        ));
    }

    #[test]
    fn leading_dims() {
        let padded = Geometry::new(vec![3, 4], vec![6, 1], 16).unwrap();
        assert_eq!(leading_dim(&padded, Operand::Lhs), Ok(6));
        let column = Geometry::new(vec![3, 4], vec![1, 3], 12).unwrap();
        assert!(leading_dim(&column, Operand::Lhs).is_err());
    }
}
