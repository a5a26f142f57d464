//! # Math Libraries and Dispatch
//!
//! This module holds the two CPU math libraries the kernels can run on and
//! the switch between them.
//!
//! ## Submodules
//!
//! - [`blas`] — CBLAS-style row-major GEMM and strided-batch GEMM ("mkl" mode)
//! - [`dnn`] — descriptor-based matmul, convolution and reorder primitives
//!   ("onednn" mode)
//! - [`dispatch`] — maps a [`crate::backend::KernelMode`] to one library per
//!   primitive
//!
//! ## Notes
//!
//! - Convolution only exists in [`dnn`]; it is used under every supported mode
//! - Both libraries parallelize with `rayon` over output rows or planes
//! - Neither library validates semantics beyond its own argument contract;
//!   shape rules live in [`crate::validate`]

pub mod blas;
pub mod dispatch;
pub mod dnn;
