//! BLAS-style CPU backend ("mkl" mode).
//!
//! # BLAS Backend
//!
//! Row-major single-precision GEMM with the classic CBLAS argument list:
//! transpose flags, problem size, scales and leading dimensions.
//!
//! ## Features
//!
//! - Parallel over output rows using [`rayon`](https://docs.rs/rayon)
//! - Strided-batch entry point that issues one product per batch element
//! - `beta == 0` overwrites `C` without reading it, so stale NaNs never leak
//!
//! ## Safety
//!
//! - No `unsafe`; every argument is checked against the slice it indexes

use rayon::prelude::*;

use crate::error::{KernelError, KernelResult};

const BACKEND: &str = "blas";

/// Whether an operand is used as stored or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    NoTrans,
    Trans,
}

impl Transpose {
    #[must_use]
    pub const fn from_flag(transpose: bool) -> Self {
        if transpose { Self::Trans } else { Self::NoTrans }
    }
}

fn invalid(reason: String) -> KernelError {
    KernelError::Backend {
        backend: BACKEND,
        reason,
    }
}

/// Checks a stored `rows×cols` matrix with leading dimension `ld` against `len`.
fn check_matrix(name: &str, rows: usize, cols: usize, ld: usize, len: usize) -> KernelResult<()> {
    if ld < cols.max(1) {
        return Err(invalid(format!("ld{name} = {ld} is smaller than {cols} columns")));
    }
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    let needed = (rows - 1)
        .checked_mul(ld)
        .and_then(|span| span.checked_add(cols))
        .ok_or_else(|| invalid(format!("{name}: {rows} rows of ld {ld} overflow")))?;
    if needed > len {
        return Err(invalid(format!(
            "{name} needs {needed} elements, slice holds {len}"
        )));
    }
    Ok(())
}

/// Computes `C = alpha · op(A) · op(B) + beta · C` in row-major order.
///
/// `op(A)` is `m×k`, `op(B)` is `k×n`, `C` is `m×n`. Only the first `n`
/// entries of each of the first `m` rows of `C` are written.
///
/// # Errors
///
/// Returns [`KernelError::Backend`] if a leading dimension is smaller than
/// its row length or a slice is too short for the described matrix.
///
/// # Example
///
/// ```rust
/// use ral_kernels::ops::blas::{sgemm, Transpose};
///
/// let a = [1.0, 2.0, 3.0, 4.0];
/// let b = [5.0, 6.0, 7.0, 8.0];
/// let mut c = [0.0; 4];
/// sgemm(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 2, 1.0, &a, 2, &b, 2, 0.0, &mut c, 2).unwrap();
/// assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
/// ```
#[allow(clippy::too_many_arguments)]
pub fn sgemm(
    trans_a: Transpose,
    trans_b: Transpose,
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
    let (a_rows, a_cols) = match trans_a {
        Transpose::NoTrans => (m, k),
        Transpose::Trans => (k, m),
    };
    let (b_rows, b_cols) = match trans_b {
        Transpose::NoTrans => (k, n),
        Transpose::Trans => (n, k),
    };
    check_matrix("a", a_rows, a_cols, lda, a.len())?;
    check_matrix("b", b_rows, b_cols, ldb, b.len())?;
    check_matrix("c", m, n, ldc, c.len())?;
    if m == 0 || n == 0 {
        return Ok(());
    }

    let a_at = |i: usize, l: usize| match trans_a {
        Transpose::NoTrans => a[i * lda + l],
        Transpose::Trans => a[l * lda + i],
    };
    let b_at = |l: usize, j: usize| match trans_b {
        Transpose::NoTrans => b[l * ldb + j],
        Transpose::Trans => b[j * ldb + l],
    };

    c.par_chunks_mut(ldc)
        .take(m)
        .enumerate()
        .for_each(|(i, row)| {
            for (j, out) in row.iter_mut().take(n).enumerate() {
                let mut sum = 0.0f32;
                for l in 0..k {
                    sum += a_at(i, l) * b_at(l, j);
                }
                *out = if beta == 0.0 {
                    alpha * sum
                } else {
                    alpha * sum + beta * *out
                };
            }
        });

    Ok(())
}

/// Runs [`sgemm`] over `batch` equally spaced problems.
///
/// Problem `i` reads `A` at offset `i·stride_a`, `B` at `i·stride_b` and
/// writes `C` at `i·stride_c`.
///
/// # Errors
///
/// Returns [`KernelError::Backend`] for the same reasons as [`sgemm`], or if
/// a batch offset falls outside its slice.
#[allow(clippy::too_many_arguments)]
pub fn sgemm_batch_strided(
    trans_a: Transpose,
    trans_b: Transpose,
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    lda: usize,
    stride_a: usize,
    b: &[f32],
    ldb: usize,
    stride_b: usize,
    beta: f32,
    c: &mut [f32],
    ldc: usize,
    stride_c: usize,
    batch: usize,
) -> KernelResult<()> {
    let offset = |name: &str, i: usize, stride: usize| {
        i.checked_mul(stride)
            .ok_or_else(|| invalid(format!("batch {i}: {name} offset {i}*{stride} overflows")))
    };
    // the last problem has the largest offsets; reject it before any of C is written
    if let Some(last) = batch.checked_sub(1) {
        let operands = [
            ("a", stride_a, a.len()),
            ("b", stride_b, b.len()),
            ("c", stride_c, c.len()),
        ];
        for (name, stride, len) in operands {
            let off = offset(name, last, stride)?;
            if off > len {
                return Err(invalid(format!("batch {last}: {name} offset {off} beyond {len}")));
            }
        }
    }
    for i in 0..batch {
        let (off_a, off_b, off_c) = (
            offset("a", i, stride_a)?,
            offset("b", i, stride_b)?,
            offset("c", i, stride_c)?,
        );
        let a_i = a
            .get(off_a..)
            .ok_or_else(|| invalid(format!("batch {i}: a offset {off_a} out of range")))?;
        let b_i = b
            .get(off_b..)
            .ok_or_else(|| invalid(format!("batch {i}: b offset {off_b} out of range")))?;
        let c_len = c.len();
        let c_i = c
            .get_mut(off_c..)
            .ok_or_else(|| invalid(format!("batch {i}: c offset {off_c} beyond {c_len}")))?;
        sgemm(
            trans_a, trans_b, m, n, k, alpha, a_i, lda, b_i, ldb, beta, c_i, ldc,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_product() {
        // 2x3 · 3x2
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut c = [0.0; 4];
        sgemm(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 3, 1.0, &a, 3, &b, 2, 0.0, &mut c, 2)
            .unwrap();
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn transposed_operands() {
        // A stored as 3x2 (k×m), B stored as 2x3 (n×k)
        let at = [1.0, 4.0, 2.0, 5.0, 3.0, 6.0];
        let bt = [7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        let mut c = [0.0; 4];
        sgemm(Transpose::Trans, Transpose::Trans, 2, 2, 3, 1.0, &at, 2, &bt, 3, 0.0, &mut c, 2)
            .unwrap();
        assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn zero_beta_overwrites_and_padding_is_untouched() {
        let a = [1.0, 0.0, 0.0, 1.0];
        let b = [2.0, 3.0, 4.0, 5.0];
        // ldc = 3: the third column of each row is padding
        let mut c = [f32::NAN, f32::NAN, -1.0, f32::NAN, f32::NAN, -1.0];
        sgemm(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 2, 1.0, &a, 2, &b, 2, 0.0, &mut c, 3)
            .unwrap();
        assert_eq!(c, [2.0, 3.0, -1.0, 4.0, 5.0, -1.0]);
    }

    #[test]
    fn nonzero_beta_accumulates() {
        let a = [1.0, 1.0];
        let b = [1.0, 1.0];
        let mut c = [10.0];
        sgemm(Transpose::NoTrans, Transpose::NoTrans, 1, 1, 2, 2.0, &a, 2, &b, 1, 0.5, &mut c, 1)
            .unwrap();
        assert_eq!(c, [9.0]);
    }

    #[test]
    fn rejects_short_slices_and_leading_dims() {
        let a = [0.0; 5];
        let b = [0.0; 6];
        let mut c = [0.0; 4];
        assert!(
            sgemm(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 3, 1.0, &a, 3, &b, 2, 0.0, &mut c, 2)
                .is_err()
        );
        let a = [0.0; 6];
        assert!(
            sgemm(Transpose::NoTrans, Transpose::NoTrans, 2, 2, 3, 1.0, &a, 2, &b, 2, 0.0, &mut c, 2)
                .is_err()
        );
    }

    #[test]
    fn strided_batches() {
        let a = [1.0, 2.0, 3.0, 4.0, 1.0, 0.0, 0.0, 1.0];
        let b = [1.0, 0.0, 0.0, 1.0, 5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 8];
        sgemm_batch_strided(
            Transpose::NoTrans,
            Transpose::NoTrans,
            2,
            2,
            2,
            1.0,
            &a,
            2,
            4,
            &b,
            2,
            4,
            0.0,
            &mut c,
            2,
            4,
            2,
        )
        .unwrap();
        assert_eq!(c, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn huge_leading_dims_and_strides_are_errors() {
        let a = [1.0; 4];
        let b = [1.0; 4];
        let mut c = [0.0; 4];
        assert!(matches!(
            sgemm(Transpose::NoTrans, Transpose::NoTrans, 3, 1, 1, 1.0, &a, usize::MAX, &b, 1, 0.0, &mut c, 1),
            Err(KernelError::Backend { backend: "blas", .. })
        ));
        assert!(matches!(
            sgemm_batch_strided(
                Transpose::NoTrans,
                Transpose::NoTrans,
                1,
                1,
                1,
                1.0,
                &a,
                1,
                usize::MAX,
                &b,
                1,
                1,
                0.0,
                &mut c,
                1,
                1,
                3,
            ),
            Err(KernelError::Backend { backend: "blas", .. })
        ));
        // nothing was written before the overflow was found
        assert_eq!(c, [0.0; 4]);
    }
}
