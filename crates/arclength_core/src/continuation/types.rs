//! Equilibrium points, stepper phases and per-step reports.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// A single equilibrium point on the continuation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionPoint {
    pub state: DVector<f64>,
    pub load_factor: f64,
}

impl SolutionPoint {
    pub fn new(state: DVector<f64>, load_factor: f64) -> Self {
        Self { state, load_factor }
    }

    /// The unloaded configuration `(0, 0)` every path starts from.
    pub fn reference(dimension: usize) -> Self {
        Self {
            state: DVector::zeros(dimension),
            load_factor: 0.0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.state.len()
    }
}

/// Phase of the stepper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IteratorState {
    Idle,
    Predicting,
    Correcting,
    Converged,
    Diverged,
}

/// Outcome of one converged step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StepReport {
    pub iterations: usize,
    pub residual_norm: f64,
    pub indicator: f64,
    /// True when the indicator changed sign against the previous baseline.
    pub stability_changed: bool,
}
