//! Kernel registration and lookup.
//!
//! Kernels are registered under a [`KernelKey`] (name, device, element type
//! and operand rank) and launched through a uniform [`KernelFn`] signature.
//! Several keys may share a name: `ral_gemm` resolves to the plain GEMM at
//! rank 2 and to the batched GEMM at ranks 3 and 4.

use std::collections::HashMap;

use lazy_static::lazy_static;
use parking_lot::RwLock;

use crate::context::{ExecutionContext, StreamHandle};
use crate::error::{ErrorKind, KernelError, KernelResult};
use crate::kernels;
use crate::tensors::{DType, MemRef, MemRefMut};

/// Where a kernel runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
}

/// Lookup key of a registered kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub name: String,
    pub device: Device,
    pub dtype: DType,
    pub rank: usize,
}

impl KernelKey {
    #[must_use]
    pub fn new(name: impl Into<String>, device: Device, dtype: DType, rank: usize) -> Self {
        Self {
            name: name.into(),
            device,
            dtype,
            rank,
        }
    }
}

/// Operands of a launch, in the fixed order of each primitive.
#[derive(Debug)]
pub enum KernelArgs<'r, 'a> {
    Gemm {
        a: &'r MemRef<'a>,
        b: &'r MemRef<'a>,
        c: &'r mut MemRefMut<'a>,
        transpose_a: bool,
        transpose_b: bool,
    },
    Conv {
        input: &'r MemRef<'a>,
        kernel: &'r MemRef<'a>,
        padding: &'r MemRef<'a>,
        output: &'r mut MemRefMut<'a>,
        metadata: &'r MemRef<'a>,
    },
}

impl KernelArgs<'_, '_> {
    /// Element type the kernel is selected by.
    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Gemm { a, .. } => a.dtype(),
            Self::Conv { input, .. } => input.dtype(),
        }
    }

    /// Operand rank the kernel is selected by.
    #[must_use]
    pub fn rank(&self) -> usize {
        match self {
            Self::Gemm { a, .. } => a.rank(),
            Self::Conv { input, .. } => input.rank(),
        }
    }
}

/// Uniform kernel signature.
pub type KernelFn = fn(&dyn ExecutionContext, StreamHandle, KernelArgs<'_, '_>);

fn wrong_args(ctx: &dyn ExecutionContext, kernel: &str) {
    ctx.signal_error(
        ErrorKind::InvalidArgument,
        &format!("{kernel} launched with mismatched arguments"),
    );
}

fn gemm_kernel(ctx: &dyn ExecutionContext, stream: StreamHandle, args: KernelArgs<'_, '_>) {
    match args {
        KernelArgs::Gemm {
            a,
            b,
            c,
            transpose_a,
            transpose_b,
        } => kernels::ral_gemm(ctx, stream, a, b, c, transpose_a, transpose_b),
        KernelArgs::Conv { .. } => wrong_args(ctx, "ral_gemm"),
    }
}

fn batch_gemm_kernel(ctx: &dyn ExecutionContext, stream: StreamHandle, args: KernelArgs<'_, '_>) {
    match args {
        KernelArgs::Gemm {
            a,
            b,
            c,
            transpose_a,
            transpose_b,
        } => kernels::ral_batch_gemm(ctx, stream, a, b, c, transpose_a, transpose_b),
        KernelArgs::Conv { .. } => wrong_args(ctx, "ral_gemm"),
    }
}

fn conv_kernel(ctx: &dyn ExecutionContext, stream: StreamHandle, args: KernelArgs<'_, '_>) {
    match args {
        KernelArgs::Conv {
            input,
            kernel,
            padding,
            output,
            metadata,
        } => kernels::ral_conv(ctx, stream, input, kernel, padding, output, metadata),
        KernelArgs::Gemm { .. } => wrong_args(ctx, "ral_conv"),
    }
}

/// A thread-safe table of kernels.
#[derive(Debug, Default)]
pub struct KernelRegistry {
    kernels: RwLock<HashMap<KernelKey, KernelFn>>,
}

impl KernelRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every CPU kernel of this crate.
    #[must_use]
    pub fn cpu() -> Self {
        let cpu = |name: &str, rank: usize, kernel: KernelFn| {
            (KernelKey::new(name, Device::Cpu, DType::F32, rank), kernel)
        };
        let kernels = HashMap::from([
            cpu("ral_gemm", 2, gemm_kernel),
            cpu("ral_gemm", 3, batch_gemm_kernel),
            cpu("ral_gemm", 4, batch_gemm_kernel),
            cpu("ral_conv", 3, conv_kernel),
            cpu("ral_conv", 4, conv_kernel),
        ]);
        Self {
            kernels: RwLock::new(kernels),
        }
    }

    /// Adds a kernel.
    ///
    /// # Errors
    ///
    /// [`KernelError::DuplicateKernel`] if `key` is already taken.
    pub fn register(&self, key: KernelKey, kernel: KernelFn) -> KernelResult<()> {
        let mut kernels = self.kernels.write();
        if kernels.contains_key(&key) {
            return Err(KernelError::DuplicateKernel(format!(
                "{} ({:?}, {}, rank {})",
                key.name, key.device, key.dtype, key.rank
            )));
        }
        log::trace!("registered {} for rank {}", key.name, key.rank);
        kernels.insert(key, kernel);
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, key: &KernelKey) -> Option<KernelFn> {
        self.kernels.read().get(key).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kernels.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernels.read().is_empty()
    }

    /// Runs the CPU kernel `name` selected by the dtype and rank of `args`.
    ///
    /// A missing kernel is signalled on `ctx` as [`ErrorKind::UnknownKernel`].
    pub fn launch(
        &self,
        name: &str,
        ctx: &dyn ExecutionContext,
        stream: StreamHandle,
        args: KernelArgs<'_, '_>,
    ) {
        let key = KernelKey::new(name, Device::Cpu, args.dtype(), args.rank());
        match self.lookup(&key) {
            Some(kernel) => kernel(ctx, stream, args),
            None => {
                let err = KernelError::UnknownKernel(format!(
                    "{name} ({}, rank {})",
                    key.dtype, key.rank
                ));
                ctx.signal_error(err.kind(), &err.to_string());
            }
        }
    }
}

lazy_static! {
    static ref CPU_KERNELS: KernelRegistry = KernelRegistry::cpu();
}

/// Process-wide registry of the CPU kernels.
pub fn cpu_kernels() -> &'static KernelRegistry {
    &CPU_KERNELS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::KernelMode;
    use crate::context::CpuContext;

    fn noop(_: &dyn ExecutionContext, _: StreamHandle, _: KernelArgs<'_, '_>) {}

    #[test]
    fn cpu_registry_contents() {
        let registry = KernelRegistry::cpu();
        assert_eq!(registry.len(), 5);
        for (name, rank) in [("ral_gemm", 2), ("ral_gemm", 3), ("ral_gemm", 4), ("ral_conv", 3), ("ral_conv", 4)] {
            let key = KernelKey::new(name, Device::Cpu, DType::F32, rank);
            assert!(registry.lookup(&key).is_some(), "{name} rank {rank}");
        }
        assert!(registry
            .lookup(&KernelKey::new("ral_conv", Device::Cpu, DType::F64, 4))
            .is_none());
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = KernelRegistry::new();
        assert!(registry.is_empty());
        let key = KernelKey::new("custom", Device::Cpu, DType::F32, 2);
        registry.register(key.clone(), noop).unwrap();
        assert!(matches!(
            registry.register(key, noop),
            Err(KernelError::DuplicateKernel(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn launch_selects_by_rank() {
        let ctx = CpuContext::with_mode(KernelMode::Mkl);
        let a = vec![1.0f32, 2.0, 3.0, 4.0];
        let b = vec![1.0f32, 0.0, 0.0, 1.0];

        let mut out = vec![0.0f32; 4];
        {
            let a = MemRef::contiguous(&a, [2, 2]).unwrap();
            let b = MemRef::contiguous(&b, [2, 2]).unwrap();
            let mut c = MemRefMut::contiguous(&mut out, [2, 2]).unwrap();
            cpu_kernels().launch(
                "ral_gemm",
                &ctx,
                StreamHandle::null(),
                KernelArgs::Gemm { a: &a, b: &b, c: &mut c, transpose_a: false, transpose_b: false },
            );
        }
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        let mut out = vec![0.0f32; 4];
        {
            let a = MemRef::contiguous(&a, [1, 2, 2]).unwrap();
            let b = MemRef::contiguous(&b, [1, 2, 2]).unwrap();
            let mut c = MemRefMut::contiguous(&mut out, [1, 2, 2]).unwrap();
            cpu_kernels().launch(
                "ral_gemm",
                &ctx,
                StreamHandle::null(),
                KernelArgs::Gemm { a: &a, b: &b, c: &mut c, transpose_a: true, transpose_b: false },
            );
        }
        assert_eq!(out, [1.0, 3.0, 2.0, 4.0]);
        assert!(!ctx.has_failed());
    }

    #[test]
    fn unknown_kernel_is_signalled() {
        let ctx = CpuContext::new();
        let a = vec![1.0f32; 4];
        let mut out = vec![0.0f32; 4];
        let a = MemRef::contiguous(&a, [2, 2]).unwrap();
        let mut c = MemRefMut::contiguous(&mut out, [2, 2]).unwrap();
        cpu_kernels().launch(
            "ral_fft",
            &ctx,
            StreamHandle::null(),
            KernelArgs::Gemm { a: &a, b: &a, c: &mut c, transpose_a: false, transpose_b: false },
        );
        assert_eq!(ctx.last_error().unwrap().kind, ErrorKind::UnknownKernel);
    }
}
