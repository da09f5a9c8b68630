//! Small analytic equilibrium problems shared by the unit tests.

use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::convert::serial::convert_dense_csr;
use nalgebra_sparse::CsrMatrix;

use crate::continuation::{EquilibriumProblem, SolutionPoint};

/// `K U = λ F` with constant stiffness.
pub(crate) struct LinearSpring {
    stiffness: DMatrix<f64>,
    force: DVector<f64>,
}

impl LinearSpring {
    pub(crate) fn scalar(stiffness: f64) -> Self {
        Self {
            stiffness: DMatrix::from_element(1, 1, stiffness),
            force: DVector::from_element(1, 1.0),
        }
    }

    pub(crate) fn force(&self) -> DVector<f64> {
        self.force.clone()
    }
}

impl EquilibriumProblem for LinearSpring {
    fn dimension(&self) -> usize {
        self.force.len()
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        load_factor: f64,
        force: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        Ok(&self.stiffness * state - force * load_factor)
    }

    fn jacobian(&mut self, _state: &DVector<f64>) -> Result<CsrMatrix<f64>> {
        Ok(convert_dense_csr(&self.stiffness))
    }
}

/// Two-degree-of-freedom snap-through model.
///
/// The first unknown follows the cubic `λ = u − 1.5u² + 0.5u³`, which has a load
/// maximum at `u = 1 − 1/√3` and a minimum at `u = 1 + 1/√3` before stiffening
/// again; the second is a linear spring loaded by half the reference force.
pub(crate) struct SnapThrough {
    pub(crate) evaluations: usize,
}

impl SnapThrough {
    pub(crate) const LIMIT_DISPLACEMENT: f64 = 0.42264973081037416;
    pub(crate) const LIMIT_LOAD: f64 = 0.19245008972987526;
    pub(crate) const MINIMUM_DISPLACEMENT: f64 = 1.5773502691896257;

    pub(crate) fn new() -> Self {
        Self { evaluations: 0 }
    }

    pub(crate) fn force(&self) -> DVector<f64> {
        DVector::from_vec(vec![1.0, 0.5])
    }

    fn internal(state: &DVector<f64>) -> DVector<f64> {
        let u = state[0];
        DVector::from_vec(vec![u - 1.5 * u * u + 0.5 * u * u * u, 2.0 * state[1]])
    }

    /// Residual norm of a stored point.
    pub(crate) fn equilibrium_gap(&self, point: &SolutionPoint) -> f64 {
        (Self::internal(&point.state) - self.force() * point.load_factor).norm()
    }
}

impl EquilibriumProblem for SnapThrough {
    fn dimension(&self) -> usize {
        2
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        load_factor: f64,
        force: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        self.evaluations += 1;
        Ok(Self::internal(state) - force * load_factor)
    }

    fn jacobian(&mut self, state: &DVector<f64>) -> Result<CsrMatrix<f64>> {
        let u = state[0];
        let dense = DMatrix::from_row_slice(2, 2, &[1.0 - 3.0 * u + 1.5 * u * u, 0.0, 0.0, 2.0]);
        Ok(convert_dense_csr(&dense))
    }
}
