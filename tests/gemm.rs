use rand::{Rng, SeedableRng, rngs::StdRng};

use ral_kernels::backend::KernelMode;
use ral_kernels::context::{CpuContext, StreamHandle};
use ral_kernels::error::ErrorKind;
use ral_kernels::kernels::ral_gemm;
use ral_kernels::tensors::{MemRef, MemRefMut};

fn random(len: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
}

/// Row-major reference product of `op(A)` and `op(B)`.
fn reference(a: &[f32], b: &[f32], m: usize, n: usize, k: usize, ta: bool, tb: bool) -> Vec<f32> {
    let mut c = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            c[i * n + j] = (0..k)
                .map(|l| {
                    let x = if ta { a[l * m + i] } else { a[i * k + l] };
                    let y = if tb { b[j * k + l] } else { b[l * n + j] };
                    x * y
                })
                .sum();
        }
    }
    c
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (x, y)) in actual.iter().zip(expected).enumerate() {
        assert!((x - y).abs() < 1e-4, "element {i}: {x} vs {y}");
    }
}

fn run(mode: KernelMode, m: usize, n: usize, k: usize, ta: bool, tb: bool) -> (Vec<f32>, Vec<f32>) {
    let a = random(m * k, 1);
    let b = random(k * n, 2);
    let a_sizes = if ta { [k, m] } else { [m, k] };
    let b_sizes = if tb { [n, k] } else { [k, n] };

    let ctx = CpuContext::with_mode(mode);
    let mut c = vec![f32::NAN; m * n];
    {
        let a = MemRef::contiguous(&a, a_sizes).unwrap();
        let b = MemRef::contiguous(&b, b_sizes).unwrap();
        let mut out = MemRefMut::contiguous(&mut c, [m, n]).unwrap();
        ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, ta, tb);
    }
    assert!(!ctx.has_failed(), "{:?}", ctx.errors());
    (c, reference(&a, &b, m, n, k, ta, tb))
}

#[test]
fn test_both_modes_match_reference() {
    for (ta, tb) in [(false, false), (true, false), (false, true), (true, true)] {
        let (mkl, expected) = run(KernelMode::Mkl, 7, 5, 9, ta, tb);
        assert_close(&mkl, &expected);
        let (onednn, _) = run(KernelMode::OneDnn, 7, 5, 9, ta, tb);
        assert_close(&onednn, &mkl);
    }
}

#[test]
fn test_small_product() {
    let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let b = vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0];
    let mut c = vec![0.0f32; 4];
    let ctx = CpuContext::with_mode(KernelMode::Mkl);
    {
        let a = MemRef::contiguous(&a, [2, 3]).unwrap();
        let b = MemRef::contiguous(&b, [3, 2]).unwrap();
        let mut out = MemRefMut::contiguous(&mut c, [2, 2]).unwrap();
        ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, false, false);
    }
    assert_eq!(c, vec![58.0, 64.0, 139.0, 154.0]);
}

#[test]
fn test_padded_rows_are_respected() {
    // A is 2x3 stored with a row stride of 4; C is 2x2 with a row stride of 3
    let a = vec![1.0f32, 2.0, 3.0, -9.0, 4.0, 5.0, 6.0];
    let b = vec![7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0];
    for mode in [KernelMode::Mkl, KernelMode::OneDnn] {
        let mut c = vec![-1.0f32; 5];
        let ctx = CpuContext::with_mode(mode);
        {
            let a = MemRef::new(&a, [2, 3], [4, 1]).unwrap();
            let b = MemRef::contiguous(&b, [3, 2]).unwrap();
            let mut out = MemRefMut::new(&mut c, [2, 2], [3, 1]).unwrap();
            ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, false, false);
        }
        assert!(!ctx.has_failed());
        assert_eq!(c, vec![58.0, 64.0, -1.0, 139.0, 154.0]);
    }
}

#[test]
fn test_contraction_mismatch_leaves_output_untouched() {
    let a = vec![1.0f32; 6];
    let b = vec![1.0f32; 8];
    let mut c = vec![3.0f32; 4];
    let ctx = CpuContext::with_mode(KernelMode::Mkl);
    {
        // (2, 3) x (4, 2): k = 3 vs 4
        let a = MemRef::contiguous(&a, [2, 3]).unwrap();
        let b = MemRef::contiguous(&b, [4, 2]).unwrap();
        let mut out = MemRefMut::contiguous(&mut c, [2, 2]).unwrap();
        ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, false, false);
    }
    let err = ctx.last_error().unwrap();
    assert_eq!(err.kind, ErrorKind::MismatchedContractionDim);
    assert!(err.message.starts_with("mismatch contraction dim for gemm"));
    assert_eq!(c, vec![3.0; 4]);
}

#[test]
fn test_empty_operand_is_a_successful_no_op() {
    let a: Vec<f32> = Vec::new();
    let b = vec![1.0f32; 6];
    let mut c = vec![5.0f32; 2];
    let ctx = CpuContext::with_mode(KernelMode::Mkl);
    {
        // an empty A makes even a shape mismatch irrelevant
        let a = MemRef::contiguous(&a, [0, 3]).unwrap();
        let b = MemRef::contiguous(&b, [3, 2]).unwrap();
        let mut out = MemRefMut::contiguous(&mut c, [1, 2]).unwrap();
        ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, false, false);
    }
    assert!(!ctx.has_failed());
    assert_eq!(c, vec![5.0; 2]);
}

#[test]
fn test_autotune_is_unsupported() {
    let a = vec![1.0f32; 4];
    let mut c = vec![0.0f32; 4];
    let ctx = CpuContext::with_mode(KernelMode::Autotune);
    {
        let a = MemRef::contiguous(&a, [2, 2]).unwrap();
        let mut out = MemRefMut::contiguous(&mut c, [2, 2]).unwrap();
        ral_gemm(&ctx, StreamHandle::null(), &a, &a, &mut out, false, false);
    }
    let err = ctx.last_error().unwrap();
    assert_eq!(err.kind, ErrorKind::UnsupportedMode);
    assert_eq!(err.message, "auto tuning mode for cpu gemm is not supported yet.");
    assert_eq!(c, vec![0.0; 4]);
}

#[test]
fn test_wrong_output_shape_is_rejected() {
    let ones = vec![1.0f32; 6];
    let mut c = vec![0.0f32; 9];
    let ctx = CpuContext::with_mode(KernelMode::OneDnn);
    {
        let a = MemRef::contiguous(&ones, [2, 3]).unwrap();
        let b = MemRef::contiguous(&ones, [3, 2]).unwrap();
        let mut out = MemRefMut::contiguous(&mut c, [3, 3]).unwrap();
        ral_gemm(&ctx, StreamHandle::null(), &a, &b, &mut out, false, false);
    }
    assert_eq!(ctx.last_error().unwrap().kind, ErrorKind::MismatchedOutputShape);
    assert_eq!(c, vec![0.0; 9]);
}
