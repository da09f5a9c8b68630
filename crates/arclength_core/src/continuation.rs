pub mod linear;
pub mod problem;
pub mod settings;
pub mod types;
pub(crate) mod util;

pub use problem::{ClosureProblem, EquilibriumProblem};
pub use settings::{
    AngleMethod, ArcLengthMethod, ArcLengthOptions, ArcLengthSettings, BifurcationMethod,
    LinearSolver, NewtonMode,
};
pub use types::{IteratorState, SolutionPoint, StepReport};

use log::Level;
use nalgebra::DVector;

use crate::error::{ContinuationError, Result};
use linear::{stability_indicator, Factorization};
use util::{
    crisfield_correction, is_finite, linearized_sphere_correction, riks_correction,
    scaled_to_length,
};

/// Step increment `(ΔU, Δλ)` relative to the base point.
#[derive(Debug, Clone)]
struct Increment {
    du: DVector<f64>,
    dl: f64,
}

/// Predictor–corrector stepper for `F(U, λ) = 0` under an arc-length constraint.
///
/// The iterator owns the continuation state: the converged base point, the
/// arc-length, the previous increment used by the secant predictor and the
/// bifurcation indicator. A step either converges and moves the base point, or
/// fails and leaves all of it untouched.
pub struct ArcLengthIterator {
    settings: ArcLengthSettings,
    force: DVector<f64>,
    force_norm: f64,
    u: DVector<f64>,
    lambda: f64,
    length: f64,
    previous: Option<Increment>,
    guess: Option<SolutionPoint>,
    factorization: Option<Factorization>,
    reuse_count: usize,
    indicator: f64,
    state: IteratorState,
    converged: bool,
    iterations: usize,
    residual_norm: f64,
}

impl ArcLengthIterator {
    pub fn new(force: DVector<f64>, options: &ArcLengthOptions) -> Result<Self> {
        let settings = ArcLengthSettings::try_from(options)?;
        Self::with_settings(force, settings)
    }

    pub fn with_settings(force: DVector<f64>, settings: ArcLengthSettings) -> Result<Self> {
        if force.is_empty() {
            return Err(ContinuationError::Precondition(
                "reference force has zero dimension".to_string(),
            ));
        }
        let force_norm = force.norm();
        if !(force_norm > 0.0 && force_norm.is_finite()) {
            return Err(ContinuationError::Precondition(format!(
                "reference force must have a finite, non-zero norm, got {force_norm}"
            )));
        }

        let dim = force.len();
        Ok(Self {
            length: settings.length,
            settings,
            force,
            force_norm,
            u: DVector::zeros(dim),
            lambda: 0.0,
            previous: None,
            guess: None,
            factorization: None,
            reuse_count: 0,
            indicator: 0.0,
            state: IteratorState::Idle,
            converged: false,
            iterations: 0,
            residual_norm: 0.0,
        })
    }

    pub fn settings(&self) -> &ArcLengthSettings {
        &self.settings
    }

    pub fn dimension(&self) -> usize {
        self.force.len()
    }

    pub fn force(&self) -> &DVector<f64> {
        &self.force
    }

    pub fn force_norm(&self) -> f64 {
        self.force_norm
    }

    pub fn set_length(&mut self, length: f64) {
        self.length = length;
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    /// Makes `(state, load_factor)` the base point of the next step.
    pub fn set_solution(&mut self, state: &DVector<f64>, load_factor: f64) -> Result<()> {
        self.check_dimension("solution", state.len())?;
        self.u.copy_from(state);
        self.lambda = load_factor;
        self.state = IteratorState::Idle;
        Ok(())
    }

    /// Points the next predictor at a known nearby point.
    pub fn set_initial_guess(&mut self, state: &DVector<f64>, load_factor: f64) -> Result<()> {
        self.check_dimension("initial guess", state.len())?;
        self.guess = Some(SolutionPoint::new(state.clone(), load_factor));
        Ok(())
    }

    /// Forgets the previous increment and any cached tangent.
    pub fn reset_step(&mut self) {
        self.previous = None;
        self.factorization = None;
        self.reuse_count = 0;
        self.iterations = 0;
        self.residual_norm = 0.0;
        self.state = IteratorState::Idle;
    }

    pub fn set_indicator(&mut self, indicator: f64) {
        self.indicator = indicator;
    }

    pub fn indicator(&self) -> f64 {
        self.indicator
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    pub fn solution_u(&self) -> &DVector<f64> {
        &self.u
    }

    pub fn solution_l(&self) -> f64 {
        self.lambda
    }

    pub fn solution(&self) -> SolutionPoint {
        SolutionPoint::new(self.u.clone(), self.lambda)
    }

    /// Corrector iterations spent by the last converged step.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn residual_norm(&self) -> f64 {
        self.residual_norm
    }

    /// Advances the base point by one arc-length increment.
    ///
    /// On failure the state machine ends in [`IteratorState::Diverged`] and the
    /// base point, the previous increment and a pending initial guess are kept
    /// as they were, so the caller may retry with a shorter length.
    pub fn step<P: EquilibriumProblem + ?Sized>(&mut self, problem: &mut P) -> Result<StepReport> {
        self.check_dimension("problem", problem.dimension())?;
        self.converged = false;
        self.state = IteratorState::Predicting;
        if let NewtonMode::Quasi { window: 0 } = self.settings.newton {
            self.factorization = None;
        }

        match self.advance(problem) {
            Ok(report) => {
                self.converged = true;
                self.state = IteratorState::Converged;
                Ok(report)
            }
            Err(err) => {
                log::debug!("step from λ = {:.6e} failed: {}", self.lambda, err);
                self.state = IteratorState::Diverged;
                self.factorization = None;
                self.reuse_count = 0;
                Err(err)
            }
        }
    }

    fn advance<P: EquilibriumProblem + ?Sized>(&mut self, problem: &mut P) -> Result<StepReport> {
        let psi = self.scaling();
        let psi2ff = psi * psi * self.force.dot(&self.force);

        let predictor = self.predictor(problem, psi2ff)?;
        self.state = IteratorState::Correcting;
        let (du, dl, iterations, residual_norm) = self.correct(problem, &predictor, psi2ff)?;

        let trial = &self.u + &du;
        let jacobian = problem.jacobian(&trial)?;
        let indicator = stability_indicator(self.settings.bifurcation, &jacobian);
        let stability_changed = self.indicator * indicator < 0.0;
        if stability_changed {
            log::info!(
                "indicator changed sign ({:.3e} -> {:.3e}) near λ = {:.6e}",
                self.indicator,
                indicator,
                self.lambda + dl
            );
        }

        self.u = trial;
        self.lambda += dl;
        self.previous = Some(Increment { du, dl });
        self.guess = None;
        self.indicator = indicator;
        self.iterations = iterations;
        self.residual_norm = residual_norm;

        if let Some(desired) = self.settings.adaptive_iterations {
            let ratio = desired as f64 / iterations.max(1) as f64;
            self.length *= ratio.sqrt();
            log::debug!("adapted arc-length to {:.6e}", self.length);
        }

        log::debug!(
            "converged in {} iterations: |U| = {:.6e}, λ = {:.6e}",
            iterations,
            self.u.norm(),
            self.lambda
        );

        Ok(StepReport {
            iterations,
            residual_norm,
            indicator,
            stability_changed,
        })
    }

    /// Weight of the load term in the constraint.
    fn scaling(&self) -> f64 {
        if self.settings.scaling > 0.0 {
            return self.settings.scaling;
        }
        let u_norm = self.u.norm();
        if self.lambda != 0.0 && u_norm > 0.0 {
            u_norm / (self.lambda.abs() * self.force_norm)
        } else {
            1.0
        }
    }

    fn predictor<P: EquilibriumProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        psi2ff: f64,
    ) -> Result<Increment> {
        if self.settings.method == ArcLengthMethod::LoadControl {
            let tangent = self.tangent_at_base(problem)?;
            return Ok(Increment {
                du: tangent * self.length,
                dl: self.length,
            });
        }

        let direction = match (&self.guess, &self.previous) {
            (Some(guess), _) => Some((&guess.state - &self.u, guess.load_factor - self.lambda)),
            (None, Some(previous)) => Some((previous.du.clone(), previous.dl)),
            (None, None) => None,
        };
        if let Some((du, dl)) = direction {
            if let Some((du, dl)) = scaled_to_length(&du, dl, psi2ff, self.length) {
                return Ok(Increment { du, dl });
            }
        }

        let tangent = self.tangent_at_base(problem)?;
        let dl = self.length / (tangent.dot(&tangent) + psi2ff).sqrt();
        Ok(Increment {
            du: tangent * dl,
            dl,
        })
    }

    /// Solves `K(U) δU_t = F` at the base point.
    fn tangent_at_base<P: EquilibriumProblem + ?Sized>(
        &mut self,
        problem: &mut P,
    ) -> Result<DVector<f64>> {
        let factorization = self.factorize(problem, &self.u, 0, 0.0)?;
        let tangent = self.solve(&factorization, &self.force, 0, 0.0)?;
        if let NewtonMode::Quasi { .. } = self.settings.newton {
            self.factorization = Some(factorization);
            self.reuse_count = 0;
        }
        Ok(tangent)
    }

    fn correct<P: EquilibriumProblem + ?Sized>(
        &mut self,
        problem: &mut P,
        predictor: &Increment,
        psi2ff: f64,
    ) -> Result<(DVector<f64>, f64, usize, f64)> {
        let settings = self.settings;
        let level = if settings.verbose {
            Level::Info
        } else {
            Level::Trace
        };

        let mut du = predictor.du.clone();
        let mut dl = predictor.dl;
        let mut residual = problem.residual(&(&self.u + &du), self.lambda + dl, &self.force)?;
        let mut residual_norm = residual.norm();
        let mut previous_norm = residual_norm;
        let mut decreasing = true;
        let mut limit = settings.max_iterations;
        let mut extended = false;
        let mut iteration = 0;

        loop {
            if iteration >= limit {
                if settings.method == ArcLengthMethod::ExtendedIterations && !extended && decreasing
                {
                    extended = true;
                    limit += settings.max_iterations;
                    log::log!(
                        level,
                        "extending corrector by {} iterations (|R| = {:.3e})",
                        settings.max_iterations,
                        residual_norm
                    );
                } else {
                    return Err(ContinuationError::ConvergenceFailure {
                        iterations: iteration,
                        residual: residual_norm,
                    });
                }
            }
            iteration += 1;

            let factorization = match self.factorization.take() {
                Some(factorization) if !self.needs_refactor() => factorization,
                _ => {
                    self.reuse_count = 0;
                    self.factorize(problem, &(&self.u + &du), iteration, residual_norm)?
                }
            };
            self.reuse_count += 1;
            let du_bar = self.solve(&factorization, &(-&residual), iteration, residual_norm)?;
            let du_t = self.solve(&factorization, &self.force, iteration, residual_norm)?;
            self.factorization = Some(factorization);

            let dlam = match settings.method {
                ArcLengthMethod::LoadControl => 0.0,
                ArcLengthMethod::Riks => riks_correction(
                    &du,
                    dl,
                    &du_bar,
                    &du_t,
                    psi2ff,
                    (&predictor.du, predictor.dl),
                ),
                ArcLengthMethod::ConsistentCrisfield => {
                    linearized_sphere_correction(&du, dl, &du_bar, &du_t, psi2ff, self.length)
                }
                ArcLengthMethod::Crisfield | ArcLengthMethod::ExtendedIterations => {
                    let reference = match settings.angle {
                        AngleMethod::Step => (&predictor.du, predictor.dl),
                        AngleMethod::Iteration => (&du, dl),
                    };
                    crisfield_correction(&du, dl, &du_bar, &du_t, psi2ff, self.length, reference)
                        .unwrap_or_else(|| {
                            log::log!(level, "no real Crisfield root, using linearized constraint");
                            linearized_sphere_correction(
                                &du, dl, &du_bar, &du_t, psi2ff, self.length,
                            )
                        })
                }
            };

            let delta_u = (du_bar + &du_t * dlam) * settings.relaxation;
            let delta_l = dlam * settings.relaxation;
            du += &delta_u;
            dl += delta_l;
            if !is_finite(&du) || !dl.is_finite() {
                return Err(ContinuationError::ConvergenceFailure {
                    iterations: iteration,
                    residual: f64::NAN,
                });
            }

            residual = problem.residual(&(&self.u + &du), self.lambda + dl, &self.force)?;
            residual_norm = residual.norm();
            if !residual_norm.is_finite() {
                return Err(ContinuationError::ConvergenceFailure {
                    iterations: iteration,
                    residual: residual_norm,
                });
            }

            let du_norm = du.norm();
            let conv_u = if du_norm > 0.0 {
                delta_u.norm() / du_norm
            } else {
                delta_u.norm()
            };
            let conv_f = residual_norm / self.force_norm;
            log::log!(
                level,
                "iteration {}: |R| = {:.3e}, |dU|/|DU| = {:.3e}, |R|/|F| = {:.3e}, dλ = {:.3e}",
                iteration,
                residual_norm,
                conv_u,
                conv_f,
                delta_l
            );

            if residual_norm < settings.tol || (conv_u < settings.tol_u && conv_f < settings.tol_f)
            {
                return Ok((du, dl, iteration, residual_norm));
            }

            decreasing = residual_norm < previous_norm;
            previous_norm = residual_norm;
        }
    }

    fn needs_refactor(&self) -> bool {
        match self.settings.newton {
            NewtonMode::Full => true,
            NewtonMode::Quasi { window } => window > 0 && self.reuse_count >= window,
        }
    }

    fn factorize<P: EquilibriumProblem + ?Sized>(
        &self,
        problem: &mut P,
        state: &DVector<f64>,
        iteration: usize,
        residual: f64,
    ) -> Result<Factorization> {
        let jacobian = problem.jacobian(state)?;
        if jacobian.nrows() != self.dimension() {
            return Err(ContinuationError::Precondition(format!(
                "tangent has {} rows, expected {}",
                jacobian.nrows(),
                self.dimension()
            )));
        }
        Factorization::new(self.settings.solver, &jacobian).map_err(|err| {
            log::debug!("tangent factorization failed: {err:#}");
            ContinuationError::ConvergenceFailure {
                iterations: iteration,
                residual,
            }
        })
    }

    fn solve(
        &self,
        factorization: &Factorization,
        rhs: &DVector<f64>,
        iteration: usize,
        residual: f64,
    ) -> Result<DVector<f64>> {
        factorization.solve(rhs).map_err(|err| {
            log::debug!("tangent solve failed: {err:#}");
            ContinuationError::ConvergenceFailure {
                iterations: iteration,
                residual,
            }
        })
    }

    fn check_dimension(&self, what: &str, len: usize) -> Result<()> {
        if len != self.dimension() {
            return Err(ContinuationError::Precondition(format!(
                "{what} has dimension {len}, expected {}",
                self.dimension()
            )));
        }
        Ok(())
    }
}
