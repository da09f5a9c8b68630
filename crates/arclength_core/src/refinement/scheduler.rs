use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::estimator::{ErrorEstimator, DEFAULT_TOLERANCE};
use super::store::{ErrorTable, LevelSolutionStore, PointRef};
use crate::continuation::{ArcLengthIterator, EquilibriumProblem, StepReport};
use crate::error::{ContinuationError, Result};

/// Re-solve interval `[source_index, source_index + 1]` of `source_level` at
/// the arc-length of `target_level`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RefinementTask {
    pub target_level: usize,
    pub source_level: usize,
    pub source_index: usize,
}

impl RefinementTask {
    pub fn new(target_level: usize, source_level: usize, source_index: usize) -> Self {
        Self {
            target_level,
            source_level,
            source_index,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RefinementSettings {
    /// Uniform steps on level 0.
    pub steps: usize,
    pub max_level: usize,
    /// Error above which an interval is refined again.
    pub tolerance: f64,
    /// Retries of a diverged step at half the arc-length. Zero fails fast.
    pub max_bisections: usize,
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self {
            steps: 10,
            max_level: 2,
            tolerance: DEFAULT_TOLERANCE,
            max_bisections: 0,
        }
    }
}

/// What processing a single task produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskOutcome {
    pub task: RefinementTask,
    pub error: f64,
    pub midpoint: PointRef,
    pub endpoint: PointRef,
    /// Whether follow-up tasks were requested.
    pub refined: bool,
}

/// FIFO queue of refinement tasks.
///
/// Tasks aimed past `max_level` never enter the queue; they are kept in
/// [`RefinementScheduler::dropped`] instead.
#[derive(Debug, Clone)]
pub struct RefinementScheduler {
    settings: RefinementSettings,
    base_length: f64,
    estimator: ErrorEstimator,
    queue: VecDeque<RefinementTask>,
    dropped: Vec<RefinementTask>,
    processed: usize,
}

impl RefinementScheduler {
    pub fn new(settings: RefinementSettings, base_length: f64, force_norm: f64) -> Self {
        Self {
            estimator: ErrorEstimator::new(force_norm, settings.tolerance),
            settings,
            base_length,
            queue: VecDeque::new(),
            dropped: Vec::new(),
            processed: 0,
        }
    }

    pub fn settings(&self) -> &RefinementSettings {
        &self.settings
    }

    /// Arc-length used by steps on `level`.
    pub fn level_length(&self, level: usize) -> f64 {
        self.base_length / 2f64.powi(level as i32)
    }

    pub fn enqueue(&mut self, task: RefinementTask) {
        if task.target_level > self.settings.max_level {
            log::warn!(
                "dropping refinement of interval {} on level {}: level {} exceeds max level {}",
                task.source_index,
                task.source_level,
                task.target_level,
                self.settings.max_level
            );
            self.dropped.push(task);
        } else {
            self.queue.push_back(task);
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> impl Iterator<Item = &RefinementTask> {
        self.queue.iter()
    }

    pub fn dropped(&self) -> &[RefinementTask] {
        &self.dropped
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Processes queued tasks in FIFO order until the queue is empty.
    ///
    /// Stops at the first failing task; its entry is not put back.
    pub fn run<P: EquilibriumProblem + ?Sized>(
        &mut self,
        iterator: &mut ArcLengthIterator,
        problem: &mut P,
        store: &mut LevelSolutionStore,
        errors: &mut ErrorTable,
    ) -> Result<()> {
        while let Some(task) = self.queue.pop_front() {
            self.process_task(task, iterator, problem, store, errors)?;
        }
        Ok(())
    }

    /// Solves two steps from `(source_level, source_index)` at the target
    /// arc-length, appends them to `target_level` and compares the second one
    /// with the coarse endpoint.
    pub fn process_task<P: EquilibriumProblem + ?Sized>(
        &mut self,
        task: RefinementTask,
        iterator: &mut ArcLengthIterator,
        problem: &mut P,
        store: &mut LevelSolutionStore,
        errors: &mut ErrorTable,
    ) -> Result<TaskOutcome> {
        validate_task(&task, store)?;
        let RefinementTask {
            target_level,
            source_level,
            source_index,
        } = task;

        store.ensure_level(target_level);
        errors.ensure_level(target_level - 1);

        let start = store.at(source_level, source_index).clone();
        let coarse = store.at(source_level, source_index + 1).clone();
        let length = self.level_length(target_level);
        log::debug!(
            "refining interval {source_index} of level {source_level} on level {target_level} (dL = {length:.6e})"
        );

        iterator.set_solution(&start.state, start.load_factor)?;
        iterator.reset_step();
        iterator.set_initial_guess(&coarse.state, coarse.load_factor)?;

        self.advance(iterator, problem, length)?;
        let midpoint = store.append(target_level, iterator.solution());
        self.advance(iterator, problem, length)?;
        let endpoint = store.append(target_level, iterator.solution());

        let error = self
            .estimator
            .estimate(&coarse, store.at(target_level, endpoint), length);
        errors.set(source_level, source_index, error);
        self.processed += 1;

        let refined = self.estimator.needs_refinement(error);
        if refined {
            log::info!(
                "interval {source_index} of level {source_level}: error {error:.3e} exceeds {:.3e}",
                self.estimator.tolerance()
            );
            self.enqueue(RefinementTask::new(target_level + 1, source_level, source_index));
            self.enqueue(RefinementTask::new(target_level + 1, target_level, midpoint));
        } else {
            log::debug!("interval {source_index} of level {source_level}: error {error:.3e}");
        }

        Ok(TaskOutcome {
            task,
            error,
            midpoint: PointRef {
                level: target_level,
                index: midpoint,
            },
            endpoint: PointRef {
                level: target_level,
                index: endpoint,
            },
            refined,
        })
    }

    /// One step at `length`, halving it on divergence up to `max_bisections` times.
    fn advance<P: EquilibriumProblem + ?Sized>(
        &self,
        iterator: &mut ArcLengthIterator,
        problem: &mut P,
        length: f64,
    ) -> Result<StepReport> {
        let mut trial = length;
        let mut bisections = 0;
        loop {
            iterator.set_length(trial);
            match iterator.step(problem) {
                Ok(report) => {
                    iterator.set_length(length);
                    return Ok(report);
                }
                Err(err)
                    if err.is_convergence_failure() && bisections < self.settings.max_bisections =>
                {
                    bisections += 1;
                    trial *= 0.5;
                    log::warn!("{err}; retrying with dL = {trial:.6e}");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn validate_task(task: &RefinementTask, store: &LevelSolutionStore) -> Result<()> {
    if task.target_level <= task.source_level {
        return Err(ContinuationError::Precondition(format!(
            "task targets level {} from level {}",
            task.target_level, task.source_level
        )));
    }
    if store.get(task.source_level, task.source_index + 1).is_none() {
        return Err(ContinuationError::Precondition(format!(
            "interval {} of level {} is not stored (level holds {} points)",
            task.source_index,
            task.source_level,
            store.size(task.source_level)
        )));
    }
    Ok(())
}
