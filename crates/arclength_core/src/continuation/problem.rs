use anyhow::Result;
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

/// Residual and tangent of a parametrized equilibrium problem `F(U, λ) = 0`.
///
/// Implementations may cache an internal configuration between calls, so the
/// stepper borrows the problem mutably for the duration of every step and never
/// evaluates it from more than one place at a time.
pub trait EquilibriumProblem {
    /// Number of unknowns in the state vector.
    fn dimension(&self) -> usize;

    /// Out-of-balance force `F(U, λ)` for the given state, load factor and reference force.
    fn residual(
        &mut self,
        state: &DVector<f64>,
        load_factor: f64,
        force: &DVector<f64>,
    ) -> Result<DVector<f64>>;

    /// Tangent stiffness `∂F/∂U` at the given state.
    fn jacobian(&mut self, state: &DVector<f64>) -> Result<CsrMatrix<f64>>;
}

/// Adapts a pair of closures to [`EquilibriumProblem`].
pub struct ClosureProblem<R, J> {
    dimension: usize,
    residual: R,
    jacobian: J,
}

impl<R, J> ClosureProblem<R, J>
where
    R: FnMut(&DVector<f64>, f64, &DVector<f64>) -> Result<DVector<f64>>,
    J: FnMut(&DVector<f64>) -> Result<CsrMatrix<f64>>,
{
    pub fn new(dimension: usize, residual: R, jacobian: J) -> Self {
        Self {
            dimension,
            residual,
            jacobian,
        }
    }
}

impl<R, J> EquilibriumProblem for ClosureProblem<R, J>
where
    R: FnMut(&DVector<f64>, f64, &DVector<f64>) -> Result<DVector<f64>>,
    J: FnMut(&DVector<f64>) -> Result<CsrMatrix<f64>>,
{
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn residual(
        &mut self,
        state: &DVector<f64>,
        load_factor: f64,
        force: &DVector<f64>,
    ) -> Result<DVector<f64>> {
        (self.residual)(state, load_factor, force)
    }

    fn jacobian(&mut self, state: &DVector<f64>) -> Result<CsrMatrix<f64>> {
        (self.jacobian)(state)
    }
}
