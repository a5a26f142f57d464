//! Kernel failure reporting.
//!
//! Every failure a kernel can hit is a [`KernelError`]. Internally errors are
//! propagated with `?`; only the entry points in [`crate::kernels`] turn them
//! into an [`ErrorKind`] plus message on the execution context.

use core::fmt;

use thiserror::Error;

use crate::backend::KernelMode;
use crate::tensors::DType;

/// Coarse failure class reported through the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An input, filter or output layout could not be decoded.
    InvalidLayout,
    /// An operand element type is not supported by the kernel.
    InvalidDtype,
    /// GEMM operands disagree on the contraction dimension.
    MismatchedContractionDim,
    /// Batched GEMM operands disagree on the batch size.
    MismatchedBatchSize,
    /// The declared output operand does not match the computed shape.
    MismatchedOutputShape,
    /// The selected kernel mode has no implementation for this primitive.
    UnsupportedMode,
    /// Malformed arguments: ranks, strides, metadata, conv parameters.
    InvalidArgument,
    /// No kernel is registered under the requested key.
    UnknownKernel,
}

/// Which operand of a primitive an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Lhs,
    Rhs,
    Output,
    Input,
    Filter,
    Padding,
    Metadata,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lhs => "lhs",
            Self::Rhs => "rhs",
            Self::Output => "output",
            Self::Input => "input",
            Self::Filter => "filter",
            Self::Padding => "padding",
            Self::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

/// Errors raised while decoding, validating or dispatching a kernel call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("invalid {operand} format for {op} op")]
    InvalidLayout { op: &'static str, operand: Operand },

    #[error("invalid {operand} dtype for {op} op: {dtype}")]
    InvalidDtype {
        op: &'static str,
        operand: Operand,
        dtype: DType,
    },

    #[error("memref holds {found} elements but {expected} was requested")]
    DtypeMismatch { expected: DType, found: DType },

    #[error("mismatch contraction dim for gemm: lhs k = {lhs}, rhs k = {rhs}")]
    MismatchedContractionDim { lhs: usize, rhs: usize },

    #[error("mismatch batch size: lhs = {lhs}, rhs = {rhs}, output = {output}")]
    MismatchedBatchSize { lhs: usize, rhs: usize, output: usize },

    #[error("mismatch {op} params: {reason}")]
    MismatchedOutputShape { op: &'static str, reason: String },

    #[error("{op} input error: empty operand")]
    EmptyOperand { op: &'static str },

    #[error("auto tuning mode for cpu {op} is not supported yet.")]
    UnsupportedMode { op: &'static str, mode: KernelMode },

    #[error("{op} expects rank {expected}, {operand} has rank {found}")]
    UnsupportedRank {
        op: &'static str,
        operand: Operand,
        expected: &'static str,
        found: usize,
    },

    #[error("truncated {operand}: needed {needed} values, found {found}")]
    TruncatedMetadata {
        operand: Operand,
        needed: usize,
        found: usize,
    },

    #[error("invalid memref: {0}")]
    InvalidMemRef(String),

    #[error("invalid conv params: {0}")]
    InvalidConvParams(String),

    #[error("{backend}: {reason}")]
    Backend {
        backend: &'static str,
        reason: String,
    },

    #[error("kernel `{0}` is already registered")]
    DuplicateKernel(String),

    #[error("no kernel registered for `{0}`")]
    UnknownKernel(String),
}

impl KernelError {
    /// The class this error is reported under.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidLayout { .. } => ErrorKind::InvalidLayout,
            Self::InvalidDtype { .. } | Self::DtypeMismatch { .. } => ErrorKind::InvalidDtype,
            Self::MismatchedContractionDim { .. } => ErrorKind::MismatchedContractionDim,
            Self::MismatchedBatchSize { .. } => ErrorKind::MismatchedBatchSize,
            Self::MismatchedOutputShape { .. } => ErrorKind::MismatchedOutputShape,
            Self::UnsupportedMode { .. } => ErrorKind::UnsupportedMode,
            Self::UnknownKernel(_) => ErrorKind::UnknownKernel,
            Self::EmptyOperand { .. }
            | Self::UnsupportedRank { .. }
            | Self::TruncatedMetadata { .. }
            | Self::InvalidMemRef(_)
            | Self::InvalidConvParams(_)
            | Self::Backend { .. }
            | Self::DuplicateKernel(_) => ErrorKind::InvalidArgument,
        }
    }
}

/// Result alias used throughout the crate.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_keep_runtime_wording() {
        let err = KernelError::InvalidLayout {
            op: "conv",
            operand: Operand::Filter,
        };
        assert_eq!(err.to_string(), "invalid filter format for conv op");
        assert_eq!(err.kind(), ErrorKind::InvalidLayout);

        let err = KernelError::UnsupportedMode {
            op: "batch gemm",
            mode: KernelMode::Autotune,
        };
        assert_eq!(
            err.to_string(),
            "auto tuning mode for cpu batch gemm is not supported yet."
        );
        assert_eq!(err.kind(), ErrorKind::UnsupportedMode);
    }

    #[test]
    fn structural_failures_are_invalid_arguments() {
        let err = KernelError::EmptyOperand { op: "ral_batch_gemm" };
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "ral_batch_gemm input error: empty operand");
    }
}
