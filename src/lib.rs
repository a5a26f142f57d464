//! ral_kernels: CPU math kernels for a compiler runtime.
//!
//! Compiled programs call into this crate for dense linear algebra and
//! convolution. Each call names its operands as strided memory references,
//! and the crate validates them, decodes layout metadata and runs the work on
//! one of two math libraries chosen by a process-wide preference.
//!
//! # Features
//!
//! - GEMM, batched GEMM (rank 3 and 4) and N-d convolution over `f32`.
//! - Layout decoding for NCHW/NHWC-style activations and OIHW/HWIO-style filters.
//! - Mode selection through `DISC_CPU_MATH_KERNEL_MODE` (`mkl`, `onednn`, `autotune`).
//! - Failures reported on the execution context instead of panicking.
//!
//! # Modules
//!
//! - [`tensors`] — Memory references and element types.
//! - [`context`] — Execution context, stream handle and error sink.
//! - [`backend`] — Kernel mode selection.
//! - [`layout`] — Layout metadata decoding and convolution parameters.
//! - [`validate`] — Shape and contract checks.
//! - [`ops`] — Math libraries and dispatch.
//! - [`kernels`] — Entry points with the runtime calling convention.
//! - [`registry`] — Kernel registration and lookup by name, dtype and rank.
//! - [`profiling`] — Timers and throughput statistics.
//! - [`error`] — Error types.
//!
//! # Example
//!
//! ```rust
//! use ral_kernels::context::{CpuContext, StreamHandle};
//! use ral_kernels::registry::{cpu_kernels, KernelArgs};
//! use ral_kernels::tensors::{MemRef, MemRefMut};
//!
//! let a = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
//! let b = vec![1.0f32, 1.0, 1.0];
//! let mut c = vec![0.0f32; 2];
//!
//! let ctx = CpuContext::new();
//! let a = MemRef::contiguous(&a, [2, 3]).unwrap();
//! let b = MemRef::contiguous(&b, [3, 1]).unwrap();
//! let mut out = MemRefMut::contiguous(&mut c, [2, 1]).unwrap();
//! cpu_kernels().launch(
//!     "ral_gemm",
//!     &ctx,
//!     StreamHandle::null(),
//!     KernelArgs::Gemm { a: &a, b: &b, c: &mut out, transpose_a: false, transpose_b: false },
//! );
//! assert_eq!(c, [6.0, 15.0]);
//! ```

pub mod backend;
pub mod context;
pub mod error;
pub mod kernels;
pub mod layout;
pub mod ops;
pub mod profiling;
pub mod registry;
pub mod tensors;
pub mod validate;
