//! Option list for the arc-length stepper and its validated form.
//!
//! [`ArcLengthOptions`] mirrors the recognized option names one to one
//! (`Method`, `TolU`, `QuasiIterations`, ...) and keeps the raw integer codes.
//! [`ArcLengthSettings`] is what the stepper runs on; converting between the
//! two rejects unknown codes and out-of-range values before any step is taken.

use serde::{Deserialize, Serialize};

use crate::error::{ContinuationError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ArcLengthOptions {
    /// 0: sparse Cholesky, 1: dense LU, 2: dense LU with full pivoting.
    pub solver: i32,
    /// 0: determinant sign, 1: lowest eigenvalue sign.
    pub bifurcation_method: i32,
    /// 0: load control, 1: Riks, 2: Crisfield, 3: consistent Crisfield, 4: extended iterations.
    pub method: i32,
    pub length: f64,
    /// 0: per step, 1: per iteration.
    pub angle_method: i32,
    pub adaptive_length: bool,
    pub adaptive_iterations: i32,
    /// Load term weight in the constraint; 0 picks it from the current point.
    pub scaling: f64,
    pub tol: f64,
    pub tol_u: f64,
    pub tol_f: f64,
    pub max_iter: i32,
    pub verbose: bool,
    pub relaxation: f64,
    pub quasi: bool,
    pub quasi_iterations: i32,
}

impl Default for ArcLengthOptions {
    fn default() -> Self {
        Self {
            solver: 1,
            bifurcation_method: 0,
            method: 2,
            length: 0.5,
            angle_method: 0,
            adaptive_length: false,
            adaptive_iterations: 5,
            scaling: 1.0,
            tol: 1e-6,
            tol_u: 1e-6,
            tol_f: 1e-3,
            max_iter: 20,
            verbose: false,
            relaxation: 1.0,
            quasi: false,
            quasi_iterations: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ArcLengthMethod {
    LoadControl,
    Riks,
    Crisfield,
    ConsistentCrisfield,
    ExtendedIterations,
}

impl TryFrom<i32> for ArcLengthMethod {
    type Error = ContinuationError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(ArcLengthMethod::LoadControl),
            1 => Ok(ArcLengthMethod::Riks),
            2 => Ok(ArcLengthMethod::Crisfield),
            3 => Ok(ArcLengthMethod::ConsistentCrisfield),
            4 => Ok(ArcLengthMethod::ExtendedIterations),
            other => Err(ContinuationError::Configuration(format!(
                "unknown Method {other}; expected 0 (load control), 1 (Riks), 2 (Crisfield), 3 (consistent Crisfield) or 4 (extended iterations)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LinearSolver {
    Cholesky,
    Lu,
    FullPivLu,
}

impl TryFrom<i32> for LinearSolver {
    type Error = ContinuationError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(LinearSolver::Cholesky),
            1 => Ok(LinearSolver::Lu),
            2 => Ok(LinearSolver::FullPivLu),
            other => Err(ContinuationError::Configuration(format!(
                "unknown Solver {other}; expected 0 (Cholesky), 1 (LU) or 2 (full-pivot LU)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BifurcationMethod {
    Determinant,
    Eigenvalue,
}

impl TryFrom<i32> for BifurcationMethod {
    type Error = ContinuationError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(BifurcationMethod::Determinant),
            1 => Ok(BifurcationMethod::Eigenvalue),
            other => Err(ContinuationError::Configuration(format!(
                "unknown BifurcationMethod {other}; expected 0 (determinant) or 1 (eigenvalue)"
            ))),
        }
    }
}

/// Reference direction for picking between the two Crisfield roots.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AngleMethod {
    /// Compare against the predictor of the current step.
    Step,
    /// Compare against the increment accumulated up to the current iteration.
    Iteration,
}

impl TryFrom<i32> for AngleMethod {
    type Error = ContinuationError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            0 => Ok(AngleMethod::Step),
            1 => Ok(AngleMethod::Iteration),
            other => Err(ContinuationError::Configuration(format!(
                "unknown AngleMethod {other}; expected 0 (step) or 1 (iteration)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NewtonMode {
    Full,
    /// Reuse a factored tangent for `window` corrections; 0 keeps it for a whole step.
    Quasi { window: usize },
}

/// Validated stepper configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ArcLengthSettings {
    pub method: ArcLengthMethod,
    pub solver: LinearSolver,
    pub bifurcation: BifurcationMethod,
    pub angle: AngleMethod,
    pub length: f64,
    /// Desired iteration count when the arc-length adapts after each step.
    pub adaptive_iterations: Option<usize>,
    pub scaling: f64,
    pub tol: f64,
    pub tol_u: f64,
    pub tol_f: f64,
    pub max_iterations: usize,
    pub verbose: bool,
    pub relaxation: f64,
    pub newton: NewtonMode,
}

impl TryFrom<&ArcLengthOptions> for ArcLengthSettings {
    type Error = ContinuationError;

    fn try_from(options: &ArcLengthOptions) -> Result<Self> {
        let method = ArcLengthMethod::try_from(options.method)?;
        let solver = LinearSolver::try_from(options.solver)?;
        let bifurcation = BifurcationMethod::try_from(options.bifurcation_method)?;
        let angle = AngleMethod::try_from(options.angle_method)?;

        require_positive("Length", options.length)?;
        require_positive("Tol", options.tol)?;
        require_positive("TolU", options.tol_u)?;
        require_positive("TolF", options.tol_f)?;
        require_positive("Relaxation", options.relaxation)?;
        if !(options.scaling >= 0.0 && options.scaling.is_finite()) {
            return Err(ContinuationError::Configuration(format!(
                "Scaling must be non-negative, got {}",
                options.scaling
            )));
        }
        if options.max_iter < 1 {
            return Err(ContinuationError::Configuration(format!(
                "MaxIter must be at least 1, got {}",
                options.max_iter
            )));
        }

        let adaptive_iterations = if options.adaptive_length {
            if options.adaptive_iterations < 1 {
                return Err(ContinuationError::Configuration(format!(
                    "AdaptiveIterations must be at least 1, got {}",
                    options.adaptive_iterations
                )));
            }
            Some(options.adaptive_iterations as usize)
        } else {
            None
        };

        let newton = if options.quasi {
            NewtonMode::Quasi {
                window: options.quasi_iterations.max(0) as usize,
            }
        } else {
            NewtonMode::Full
        };

        Ok(Self {
            method,
            solver,
            bifurcation,
            angle,
            length: options.length,
            adaptive_iterations,
            scaling: options.scaling,
            tol: options.tol,
            tol_u: options.tol_u,
            tol_f: options.tol_f,
            max_iterations: options.max_iter as usize,
            verbose: options.verbose,
            relaxation: options.relaxation,
            newton,
        })
    }
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ContinuationError::Configuration(format!(
            "{name} must be positive, got {value}"
        )))
    }
}
