//! Kernel mode selection.
//!
//! This module defines which math library backs CPU GEMM, batched GEMM and
//! convolution calls, and resolves the process-wide preference from the
//! environment.
//!
//! # Supported Modes
//!
//! - `Mkl` — BLAS-style library ([`crate::ops::blas`]), the default.
//! - `OneDnn` — DNN-primitives library ([`crate::ops::dnn`]).
//! - `Autotune` — tuning-based selection; recognized but not implemented, so
//!   every kernel reports an unsupported-mode failure when it is selected.
//!
//! The process value is read from [`KERNEL_MODE_ENV`] the first time
//! [`kernel_mode`] is called and never changes afterwards. Execution contexts
//! may carry their own mode; see [`crate::context::ExecutionContext`].

use core::convert::TryFrom;
use core::fmt;
use core::str::FromStr;

/// Environment variable holding the preferred kernel mode.
pub const KERNEL_MODE_ENV: &str = "DISC_CPU_MATH_KERNEL_MODE";

/// Enumeration of the CPU math-kernel preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum KernelMode {
    /// Prefer the BLAS-style library (default).
    #[default]
    Mkl = 0,
    /// Prefer the DNN-primitives library.
    OneDnn = 1,
    /// Select an implementation by autotuning. Not implemented on CPU.
    Autotune = 2,
}

impl KernelMode {
    /// Maps a mode string to a mode, case-insensitively.
    ///
    /// The mapping is total: empty or unrecognized strings yield
    /// [`KernelMode::Mkl`].
    ///
    /// # Example
    ///
    /// ```
    /// use ral_kernels::backend::KernelMode;
    /// assert_eq!(KernelMode::parse("OneDNN"), KernelMode::OneDnn);
    /// assert_eq!(KernelMode::parse("cublas"), KernelMode::Mkl);
    /// ```
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "onednn" => Self::OneDnn,
            "autotune" => Self::Autotune,
            _ => Self::Mkl,
        }
    }

    /// Resolves the mode from [`KERNEL_MODE_ENV`]; an unset variable counts as empty.
    #[must_use]
    pub fn from_env() -> Self {
        let raw = std::env::var(KERNEL_MODE_ENV).unwrap_or_default();
        Self::parse(&raw)
    }

    /// The lower-case name accepted by [`KernelMode::parse`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mkl => "mkl",
            Self::OneDnn => "onednn",
            Self::Autotune => "autotune",
        }
    }
}

impl fmt::Display for KernelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KernelMode {
    type Err = core::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl TryFrom<u8> for KernelMode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Mkl),
            1 => Ok(Self::OneDnn),
            2 => Ok(Self::Autotune),
            _ => Err(()),
        }
    }
}

fn resolve_kernel_mode() -> KernelMode {
    let mode = KernelMode::from_env();
    match mode {
        KernelMode::Mkl => log::debug!("Use MKL as blas by default."),
        KernelMode::OneDnn => log::debug!("Use onednn as blas by default."),
        KernelMode::Autotune => log::debug!("Use auto-tuning strategy for blas."),
    }
    mode
}

lazy_static::lazy_static! {
    /// Process-wide mode, evaluated at most once on first access.
    static ref PROCESS_KERNEL_MODE: KernelMode = resolve_kernel_mode();
}

/// Returns the process-wide kernel mode.
///
/// The first call reads [`KERNEL_MODE_ENV`]; concurrent first calls block
/// until that single evaluation finishes, so every thread observes the same
/// value for the lifetime of the process.
///
/// # Example
///
/// ```
/// use ral_kernels::backend::kernel_mode;
/// let mode = kernel_mode();
/// assert_eq!(mode, kernel_mode());
/// ```
#[must_use]
pub fn kernel_mode() -> KernelMode {
    *PROCESS_KERNEL_MODE
}
