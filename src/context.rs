//! Execution context seen by kernel entry points.
//!
//! The context is the caller's error sink. Kernels report failures through
//! [`ExecutionContext::signal_error`] and return without producing a result;
//! surfacing that as a program failure is the caller's job.

use parking_lot::Mutex;

use crate::backend::{self, KernelMode};
use crate::error::ErrorKind;

/// Opaque stream handle passed through the kernel ABI. Ignored on CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamHandle(usize);

impl StreamHandle {
    #[must_use]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// The handle used by CPU callers.
    #[must_use]
    pub const fn null() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn raw(self) -> usize {
        self.0
    }
}

/// Error sink and configuration for one kernel invocation.
pub trait ExecutionContext: Sync {
    /// Records a failure of the current kernel call.
    fn signal_error(&self, kind: ErrorKind, message: &str);

    /// Math-library preference for this context.
    ///
    /// Defaults to the process-wide [`backend::kernel_mode`].
    fn kernel_mode(&self) -> KernelMode {
        backend::kernel_mode()
    }

    /// Whether per-call statistics should be computed and logged.
    fn verbose(&self) -> bool {
        log::log_enabled!(log::Level::Debug)
    }
}

/// A failure recorded by [`CpuContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaledError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Context for CPU execution that keeps every signalled error.
#[derive(Debug, Default)]
pub struct CpuContext {
    mode: Option<KernelMode>,
    verbose: Option<bool>,
    errors: Mutex<Vec<SignaledError>>,
}

impl CpuContext {
    /// A context following the process-wide kernel mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context pinned to `mode`, regardless of the environment.
    #[must_use]
    pub fn with_mode(mode: KernelMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// Forces statistics on or off instead of following the log level.
    #[must_use]
    pub fn verbosity(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    /// All errors signalled so far, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<SignaledError> {
        self.errors.lock().clone()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<SignaledError> {
        self.errors.lock().last().cloned()
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// Drops recorded errors so the context can be reused.
    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

impl ExecutionContext for CpuContext {
    fn signal_error(&self, kind: ErrorKind, message: &str) {
        log::error!("{kind:?}: {message}");
        self.errors.lock().push(SignaledError {
            kind,
            message: message.to_owned(),
        });
    }

    fn kernel_mode(&self) -> KernelMode {
        self.mode.unwrap_or_else(backend::kernel_mode)
    }

    fn verbose(&self) -> bool {
        self.verbose
            .unwrap_or_else(|| log::log_enabled!(log::Level::Debug))
    }
}
