//! Error types for arc-length continuation and path refinement.

use thiserror::Error;

/// Failures surfaced by the stepper, the refinement scheduler and the orchestrator.
#[derive(Debug, Error)]
pub enum ContinuationError {
    /// The Newton corrector did not meet its tolerances. A singular tangent ends up here too.
    #[error("arc-length step did not converge after {iterations} iterations (residual: {residual:.3e})")]
    ConvergenceFailure { iterations: usize, residual: f64 },

    /// An option value is unknown or out of range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A caller handed in data that does not fit the current run.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The equilibrium problem failed to evaluate a residual or tangent.
    #[error(transparent)]
    Problem(#[from] anyhow::Error),
}

impl ContinuationError {
    pub fn is_convergence_failure(&self) -> bool {
        matches!(self, ContinuationError::ConvergenceFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, ContinuationError>;
