//! Hierarchical refinement of a continuation path.
//!
//! Level 0 is traced with uniform steps of the base arc-length. Every level-0
//! interval is then re-solved with two steps of half that length on level 1;
//! intervals whose coarse endpoint disagrees with the finer one by more than
//! the tolerance are queued again one level deeper, up to `max_level`.

pub mod estimator;
pub mod scheduler;
pub mod store;

pub use estimator::ErrorEstimator;
pub use scheduler::{RefinementScheduler, RefinementSettings, RefinementTask, TaskOutcome};
pub use store::{ErrorTable, LevelSolutionStore, PointRef};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::continuation::{ArcLengthIterator, ArcLengthOptions, EquilibriumProblem};
use crate::error::{ContinuationError, Result};

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefinementOutcome {
    pub store: LevelSolutionStore,
    pub errors: ErrorTable,
    pub dropped: Vec<RefinementTask>,
    pub processed: usize,
}

/// Drives the level-0 sweep and the refinement queue with one iterator.
pub struct PathRefinement {
    iterator: ArcLengthIterator,
    settings: RefinementSettings,
    base_length: f64,
    store: LevelSolutionStore,
    errors: ErrorTable,
    scheduler: RefinementScheduler,
    started: bool,
}

impl PathRefinement {
    pub fn new(
        force: DVector<f64>,
        options: &ArcLengthOptions,
        settings: RefinementSettings,
    ) -> Result<Self> {
        if settings.steps == 0 {
            return Err(ContinuationError::Configuration(
                "level 0 needs at least one step".to_string(),
            ));
        }
        if !(settings.tolerance > 0.0) {
            return Err(ContinuationError::Configuration(format!(
                "refinement tolerance must be positive, got {}",
                settings.tolerance
            )));
        }

        let iterator = ArcLengthIterator::new(force, options)?;
        let base_length = iterator.length();
        let dimension = iterator.dimension();
        let scheduler = RefinementScheduler::new(settings, base_length, iterator.force_norm());
        Ok(Self {
            iterator,
            settings,
            base_length,
            store: LevelSolutionStore::new(dimension),
            errors: ErrorTable::new(),
            scheduler,
            started: false,
        })
    }

    pub fn iterator(&self) -> &ArcLengthIterator {
        &self.iterator
    }

    pub fn settings(&self) -> &RefinementSettings {
        &self.settings
    }

    /// Points stored so far, including those of a run that failed.
    pub fn store(&self) -> &LevelSolutionStore {
        &self.store
    }

    pub fn errors(&self) -> &ErrorTable {
        &self.errors
    }

    pub fn dropped(&self) -> &[RefinementTask] {
        self.scheduler.dropped()
    }

    /// Traces level 0 and refines it.
    ///
    /// Any divergence aborts the run; the points stored up to that moment stay
    /// available through [`PathRefinement::store`]. A path is traced once: later
    /// calls fail with [`ContinuationError::Precondition`], even after a failed run.
    pub fn run<P: EquilibriumProblem + ?Sized>(
        &mut self,
        problem: &mut P,
    ) -> Result<RefinementOutcome> {
        if self.started {
            return Err(ContinuationError::Precondition(
                "path refinement has already run; level 0 is traced only once".to_string(),
            ));
        }
        self.started = true;
        self.trace_base_level(problem)?;

        if self.settings.max_level >= 1 {
            for index in 0..self.store.size(0) - 1 {
                self.scheduler.enqueue(RefinementTask::new(1, 0, index));
            }
            log::info!(
                "refining {} intervals up to level {}",
                self.scheduler.pending(),
                self.settings.max_level
            );
            self.scheduler.run(
                &mut self.iterator,
                problem,
                &mut self.store,
                &mut self.errors,
            )?;
        }

        for level in 0..self.store.num_levels() {
            log::info!("level {}: {} points", level, self.store.size(level));
        }
        if !self.scheduler.dropped().is_empty() {
            log::warn!(
                "{} refinement tasks exceeded level {}",
                self.scheduler.dropped().len(),
                self.settings.max_level
            );
        }

        Ok(RefinementOutcome {
            store: self.store.clone(),
            errors: self.errors.clone(),
            dropped: self.scheduler.dropped().to_vec(),
            processed: self.scheduler.processed(),
        })
    }

    fn trace_base_level<P: EquilibriumProblem + ?Sized>(&mut self, problem: &mut P) -> Result<()> {
        log::info!(
            "level 0: {} steps with dL = {:.6e}",
            self.settings.steps,
            self.base_length
        );
        self.store.ensure_level(0);
        let origin = DVector::zeros(self.iterator.dimension());
        self.iterator.set_solution(&origin, 0.0)?;
        self.iterator.reset_step();
        self.iterator.set_indicator(0.0);
        self.iterator.set_length(self.base_length);

        for k in 0..self.settings.steps {
            let report = self.iterator.step(problem)?;
            if report.stability_changed {
                log::info!(
                    "stability changed between points {} and {} of level 0",
                    k,
                    k + 1
                );
            }
            self.store.append(0, self.iterator.solution());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::continuation::{ClosureProblem, SolutionPoint};
    use crate::test_problems::{LinearSpring, SnapThrough};
    use nalgebra::DMatrix;
    use nalgebra_sparse::convert::serial::convert_dense_csr;

    fn options(length: f64) -> ArcLengthOptions {
        ArcLengthOptions {
            length,
            tol: 1e-10,
            tol_u: 1e-9,
            tol_f: 1e-9,
            max_iter: 25,
            ..ArcLengthOptions::default()
        }
    }

    fn settings(steps: usize, max_level: usize) -> RefinementSettings {
        RefinementSettings {
            steps,
            max_level,
            ..RefinementSettings::default()
        }
    }

    #[test]
    fn base_level_only() {
        let mut problem = LinearSpring::scalar(2.0);
        let mut refinement =
            PathRefinement::new(problem.force(), &options(0.5), settings(10, 0)).unwrap();

        let outcome = refinement.run(&mut problem).unwrap();

        assert_eq!(outcome.store.size(0), 11);
        assert_eq!(outcome.store.size(1), 0);
        assert_eq!(outcome.store.num_levels(), 1);
        assert_eq!(outcome.processed, 0);
        assert!(outcome.dropped.is_empty());
        assert_eq!(outcome.store.at(0, 0), &SolutionPoint::reference(1));
    }

    #[test]
    fn linear_path_needs_one_level() {
        let mut problem = LinearSpring::scalar(1.0);
        let mut refinement =
            PathRefinement::new(problem.force(), &options(0.5), settings(10, 3)).unwrap();

        let outcome = refinement.run(&mut problem).unwrap();

        assert_eq!(outcome.store.size(1), 21);
        assert_eq!(outcome.store.num_levels(), 2);
        assert_eq!(outcome.processed, 10);
        for interval in 0..10 {
            assert!(outcome.errors.get(0, interval).unwrap() < 1e-9);
        }
        assert_eq!(outcome.store.path().len(), 11 + 21);
    }

    fn snap_through_settings() -> RefinementSettings {
        RefinementSettings {
            tolerance: 0.01,
            ..settings(8, 2)
        }
    }

    #[test]
    fn snap_through_refinement_stays_on_path() {
        let mut problem = SnapThrough::new();
        let mut refinement =
            PathRefinement::new(problem.force(), &options(0.3), snap_through_settings()).unwrap();

        let outcome = refinement.run(&mut problem).unwrap();

        // Curved stretches on either side of the limit point need level 2.
        assert_eq!(outcome.store.num_levels(), 3);
        assert_eq!(outcome.processed, 16);
        assert_eq!(outcome.store.size(2), 17);
        assert!(!outcome.dropped.is_empty());
        for level in 0..outcome.store.num_levels() {
            let points = outcome.store.level(level);
            assert_eq!(points[0], SolutionPoint::reference(2));
            assert_eq!((points.len() - 1) % 2, 0, "level {level}");
            for point in points {
                assert!(problem.equilibrium_gap(point) < 1e-6, "level {level}");
            }
        }
        for task in &outcome.dropped {
            assert_eq!(task.target_level, 3);
        }
        for point_ref in outcome.store.path() {
            assert!(outcome.store.resolve(*point_ref).is_some());
        }
    }

    #[test]
    fn runs_are_deterministic() {
        let run = || {
            let mut problem = SnapThrough::new();
            let mut refinement =
                PathRefinement::new(problem.force(), &options(0.3), snap_through_settings())
                    .unwrap();
            let outcome = refinement.run(&mut problem).unwrap();
            (outcome, problem.evaluations)
        };

        let (first, first_evaluations) = run();
        let (second, second_evaluations) = run();
        assert_eq!(first, second);
        assert_eq!(first_evaluations, second_evaluations);
    }

    #[test]
    fn divergence_aborts_run_and_keeps_store() {
        let mut problem = ClosureProblem::new(
            1,
            |_: &DVector<f64>, _: f64, _: &DVector<f64>| Ok(DVector::from_element(1, 1.0)),
            |_: &DVector<f64>| Ok(convert_dense_csr(&DMatrix::<f64>::identity(1, 1))),
        );
        let opts = ArcLengthOptions {
            method: 0,
            max_iter: 5,
            ..options(0.5)
        };
        let mut refinement =
            PathRefinement::new(DVector::from_element(1, 1.0), &opts, settings(10, 2)).unwrap();

        let err = refinement.run(&mut problem).unwrap_err();

        assert!(err.is_convergence_failure());
        assert_eq!(refinement.store().size(0), 1);
        assert_eq!(refinement.store().num_levels(), 1);
        assert!(!refinement.iterator().converged());
    }

    #[test]
    fn second_run_leaves_base_level_alone() {
        let mut problem = LinearSpring::scalar(1.0);
        let mut refinement =
            PathRefinement::new(problem.force(), &options(0.5), settings(3, 0)).unwrap();

        let first = refinement.run(&mut problem).unwrap();
        let err = refinement.run(&mut problem).unwrap_err();

        assert!(matches!(err, ContinuationError::Precondition(_)));
        assert_eq!(refinement.store().size(0), 4);
        assert_eq!(refinement.store(), &first.store);
        let loads: Vec<f64> = refinement.store().level(0).iter().map(|p| p.load_factor).collect();
        assert!(loads.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let force = DVector::from_element(1, 1.0);
        assert!(matches!(
            PathRefinement::new(force.clone(), &options(0.5), settings(0, 2)),
            Err(ContinuationError::Configuration(_))
        ));
        let negative = RefinementSettings {
            tolerance: -1.0,
            ..RefinementSettings::default()
        };
        assert!(matches!(
            PathRefinement::new(force.clone(), &options(0.5), negative),
            Err(ContinuationError::Configuration(_))
        ));
        assert!(matches!(
            PathRefinement::new(force, &options(-0.5), RefinementSettings::default()),
            Err(ContinuationError::Configuration(_))
        ));
    }
}
