use serde::{Deserialize, Serialize};

use crate::continuation::SolutionPoint;

/// Default threshold above which an interval is refined.
pub const DEFAULT_TOLERANCE: f64 = 0.05;

/// Compares a coarse interval endpoint with the endpoint reached by two finer steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ErrorEstimator {
    force_norm: f64,
    tolerance: f64,
}

impl ErrorEstimator {
    pub fn new(force_norm: f64, tolerance: f64) -> Self {
        Self {
            force_norm,
            tolerance,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// `(|λ_c − λ_f| ‖F‖ + ‖U_c − U_f‖) / dL`, with `dL` the arc-length of the finer steps.
    pub fn estimate(&self, coarse: &SolutionPoint, fine: &SolutionPoint, length: f64) -> f64 {
        let load_gap = (coarse.load_factor - fine.load_factor).abs() * self.force_norm;
        let state_gap = (&coarse.state - &fine.state).norm();
        (load_gap + state_gap) / length
    }

    pub fn needs_refinement(&self, error: f64) -> bool {
        error > self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn point(state: &[f64], load_factor: f64) -> SolutionPoint {
        SolutionPoint::new(DVector::from_column_slice(state), load_factor)
    }

    #[test]
    fn identical_points_have_zero_error() {
        let estimator = ErrorEstimator::new(3.0, DEFAULT_TOLERANCE);
        let p = point(&[0.4, -1.2], 0.7);
        assert_eq!(estimator.estimate(&p, &p.clone(), 0.25), 0.0);
        assert!(!estimator.needs_refinement(0.0));
    }

    #[test]
    fn error_combines_load_and_state_gaps() {
        let estimator = ErrorEstimator::new(2.0, DEFAULT_TOLERANCE);
        let coarse = point(&[3.0, 4.0], 1.0);
        let fine = point(&[0.0, 0.0], 0.75);
        // (0.25 * 2 + 5) / 0.5
        assert!((estimator.estimate(&coarse, &fine, 0.5) - 11.0).abs() < 1e-12);
        assert!((estimator.estimate(&fine, &coarse, 0.5) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn error_is_never_negative() {
        let estimator = ErrorEstimator::new(1.5, DEFAULT_TOLERANCE);
        let samples = [
            point(&[1.0, -2.0], -0.3),
            point(&[-1.0, 2.0], 0.3),
            point(&[0.0, 0.0], 0.0),
            point(&[1e-9, 0.0], -1e-9),
        ];
        for a in &samples {
            for b in &samples {
                assert!(estimator.estimate(a, b, 0.125) >= 0.0);
            }
        }
    }

    #[test]
    fn threshold_is_strict() {
        let estimator = ErrorEstimator::new(1.0, 0.05);
        assert!(!estimator.needs_refinement(0.05));
        assert!(estimator.needs_refinement(0.10));
    }
}
