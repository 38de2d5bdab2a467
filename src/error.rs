//! Error types for code generation.

use thiserror::Error;

/// Failures while lowering chunks to LLVM IR.
///
/// Builder errors only arise from misuse of the LLVM C API and out-of-range
/// jump targets only from a broken optimizer invariant; neither is reachable
/// from well-formed input.
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("LLVM builder error: {0}")]
    Builder(#[from] inkwell::builder::BuilderError),

    #[error("jump target {target} is out of range for {count} chunks")]
    InvalidJumpTarget { target: u32, count: usize },
}

/// Result type alias for code generation.
pub type CodegenResult<T> = Result<T, CodegenError>;
