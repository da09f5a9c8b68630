//! The `arclength_core` crate traces equilibrium paths of parametrized
//! nonlinear problems `F(U, λ) = 0` and refines them where a coarse
//! arc-length under-resolves the curve.
//!
//! Key components:
//! - **Continuation**: `ArcLengthIterator`, a predictor–corrector stepper with
//!   load control, Riks, Crisfield and consistent Crisfield constraints.
//! - **Refinement**: `LevelSolutionStore`, `ErrorEstimator`,
//!   `RefinementScheduler` and the `PathRefinement` driver that ties them together.
//! - **Problem**: `EquilibriumProblem`, the residual/tangent capability callers implement.
pub mod continuation;
pub mod error;
pub mod refinement;

#[cfg(test)]
mod test_problems;

pub use continuation::{
    ArcLengthIterator, ArcLengthOptions, ClosureProblem, EquilibriumProblem, SolutionPoint,
    StepReport,
};
pub use error::{ContinuationError, Result};
pub use refinement::{
    ErrorEstimator, LevelSolutionStore, PathRefinement, PointRef, RefinementOutcome,
    RefinementScheduler, RefinementSettings, RefinementTask,
};
