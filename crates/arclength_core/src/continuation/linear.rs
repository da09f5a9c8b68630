//! Factorizations of the tangent stiffness and the bifurcation indicator.

use anyhow::{anyhow, bail, Result};
use nalgebra::linalg::{FullPivLU, LU};
use nalgebra::{DMatrix, DVector, Dyn, SymmetricEigen};
use nalgebra_sparse::convert::serial::convert_csr_dense;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};

use super::settings::{BifurcationMethod, LinearSolver};

/// A factored tangent, reusable across several solves.
pub(crate) enum Factorization {
    Cholesky(CscCholesky<f64>),
    Lu(LU<f64, Dyn, Dyn>),
    FullPivLu(FullPivLU<f64, Dyn, Dyn>),
}

impl Factorization {
    pub(crate) fn new(solver: LinearSolver, jacobian: &CsrMatrix<f64>) -> Result<Self> {
        if jacobian.nrows() != jacobian.ncols() {
            bail!(
                "Tangent must be square, got {}x{}",
                jacobian.nrows(),
                jacobian.ncols()
            );
        }
        if jacobian.values().iter().any(|v| !v.is_finite()) {
            bail!("Tangent contains non-finite entries");
        }

        match solver {
            LinearSolver::Cholesky => {
                let csc = CscMatrix::from(jacobian);
                let factor = CscCholesky::factor(&csc)
                    .map_err(|err| anyhow!("Cholesky factorization failed: {:?}", err))?;
                Ok(Factorization::Cholesky(factor))
            }
            LinearSolver::Lu => Ok(Factorization::Lu(convert_csr_dense(jacobian).lu())),
            LinearSolver::FullPivLu => Ok(Factorization::FullPivLu(
                convert_csr_dense(jacobian).full_piv_lu(),
            )),
        }
    }

    pub(crate) fn solve(&self, rhs: &DVector<f64>) -> Result<DVector<f64>> {
        let solution = match self {
            Factorization::Cholesky(factor) => {
                let b = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
                let x = factor.solve(&b);
                DVector::from_column_slice(x.as_slice())
            }
            Factorization::Lu(lu) => lu
                .solve(rhs)
                .ok_or_else(|| anyhow!("Singular tangent in LU solve"))?,
            Factorization::FullPivLu(lu) => lu
                .solve(rhs)
                .ok_or_else(|| anyhow!("Singular tangent in full-pivot LU solve"))?,
        };

        if !solution.iter().all(|v| v.is_finite()) {
            bail!("Linear solve produced non-finite values");
        }
        Ok(solution)
    }
}

/// Signed scalar whose sign flips when the tangent passes through singularity.
pub(crate) fn stability_indicator(method: BifurcationMethod, jacobian: &CsrMatrix<f64>) -> f64 {
    let dense = convert_csr_dense(jacobian);
    if dense.nrows() == 0 {
        return 0.0;
    }

    match method {
        BifurcationMethod::Determinant => dense.lu().determinant(),
        BifurcationMethod::Eigenvalue => {
            let symmetric = (&dense + dense.transpose()) * 0.5;
            let eig = SymmetricEigen::new(symmetric);
            eig.eigenvalues
                .iter()
                .copied()
                .filter(|v| v.is_finite())
                .fold(f64::INFINITY, f64::min)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::convert::serial::convert_dense_csr;

    fn tangent(values: &[f64]) -> CsrMatrix<f64> {
        convert_dense_csr(&DMatrix::from_row_slice(2, 2, values))
    }

    #[test]
    fn solvers_agree_on_spd_tangent() {
        let k = tangent(&[4.0, 1.0, 1.0, 3.0]);
        let rhs = DVector::from_vec(vec![1.0, 2.0]);
        let expected = DVector::from_vec(vec![1.0 / 11.0, 7.0 / 11.0]);

        for solver in [
            LinearSolver::Cholesky,
            LinearSolver::Lu,
            LinearSolver::FullPivLu,
        ] {
            let factor = Factorization::new(solver, &k).unwrap();
            let x = factor.solve(&rhs).unwrap();
            assert!(
                (x - &expected).norm() < 1e-12,
                "{:?} gave a wrong solution",
                solver
            );
        }
    }

    #[test]
    fn cholesky_rejects_indefinite_tangent() {
        let k = tangent(&[-1.0, 0.0, 0.0, 2.0]);
        assert!(Factorization::new(LinearSolver::Cholesky, &k).is_err());
        assert!(Factorization::new(LinearSolver::Lu, &k).is_ok());
    }

    #[test]
    fn singular_tangent_fails_to_solve() {
        let k = tangent(&[1.0, 2.0, 2.0, 4.0]);
        let factor = Factorization::new(LinearSolver::Lu, &k).unwrap();
        assert!(factor.solve(&DVector::from_vec(vec![1.0, 0.0])).is_err());
    }

    #[test]
    fn indicator_sign_follows_definiteness() {
        let positive = tangent(&[2.0, 0.0, 0.0, 3.0]);
        let negative = tangent(&[-2.0, 0.0, 0.0, 3.0]);

        for method in [BifurcationMethod::Determinant, BifurcationMethod::Eigenvalue] {
            assert!(stability_indicator(method, &positive) > 0.0);
            assert!(stability_indicator(method, &negative) < 0.0);
        }
        assert!((stability_indicator(BifurcationMethod::Eigenvalue, &negative) + 2.0).abs() < 1e-12);
    }
}
