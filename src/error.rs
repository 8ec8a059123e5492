//! Error types shared by the program cache, execution control and profiler.

use thiserror::Error;

/// Failure reported by a [`ProgramCompiler`](crate::compiler::ProgramCompiler).
///
/// Carries the compiler's diagnostic text verbatim (build log, driver status).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostic}")]
pub struct CompileFailure {
    pub diagnostic: String,
}

impl CompileFailure {
    pub fn new(diagnostic: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("compile failed on device {device} (options: {options:?}): {diagnostic}")]
    CompileFailed {
        device: String,
        options: String,
        diagnostic: String,
    },
    #[error("entry point {name} not found in compiled program: {diagnostic}")]
    EntryPointMissing { name: String, diagnostic: String },
    #[error("no kernel type registered under {0}")]
    UnknownType(String),
    #[error("buffer allocation of {size} bytes failed: {diagnostic}")]
    AllocationFailed { size: usize, diagnostic: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid profiler transition: {op} called while {state}")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },
    #[error("step index {index} out of range (trial has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },
    #[error("trial index {index} out of range (profile has {len} trials)")]
    TrialOutOfRange { index: usize, len: usize },
    #[error("report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProfileResult<T> = Result<T, ProfileError>;
