//! Damped fixed-point solver configuration, per-location state, and the batch loop.
//!
//! Every iteration evaluates the model's update for all live locations in one
//! pass (data-parallel above [`SolverOptions::parallel_threshold`]), damps it,
//! and records each location's residual: the model's estimate of the distance
//! to the solution, not the step length. The batch stops once every location
//! is within tolerance or the iteration cap is reached.

use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DomainViolation, QolError, Result};
use crate::model::{Proposal, QolModel};

/// How a location's raw update is produced each iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRule {
    /// Apply the model's fixed-point map.
    #[default]
    FixedPoint,
    /// Take a Newton step on the equilibrium residual.
    Newton,
}

/// Configuration for the damped iteration that recovers quality of life.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Supremum-norm tolerance on the per-location distance to the solution.
    pub tolerance: f64,
    /// Maximum number of iterations before the remaining locations are abandoned.
    pub max_iterations: usize,
    /// Under-relaxation factor (`conv`); 1.0 takes the full update.
    pub damping: f64,
    /// Update rule applied to every location.
    pub rule: UpdateRule,
    /// Batches at least this large are evaluated with rayon.
    pub parallel_threshold: usize,
    /// Reject the whole call when any observation is non-positive.
    pub strict_observations: bool,
    /// Emit a progress record every this many iterations.
    pub progress_interval: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 10_000,
            damping: 0.5,
            rule: UpdateRule::FixedPoint,
            parallel_threshold: 4_096,
            strict_observations: false,
            progress_interval: 1_000,
        }
    }
}

impl SolverOptions {
    /// Checks the iteration controls against their domains.
    pub fn validate(&self) -> Result<()> {
        if !(self.damping > 0.0 && self.damping <= 1.0) {
            return Err(QolError::invalid_parameter(
                "conv",
                self.damping,
                "(0, 1]",
            ));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(QolError::invalid_parameter(
                "tolerance",
                self.tolerance,
                "(0, inf)",
            ));
        }
        if self.max_iterations == 0 {
            return Err(QolError::invalid_parameter("maxiter", 0.0, "[1, inf)"));
        }
        Ok(())
    }
}

/// Progress of a single location through the solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum RowState {
    /// Still iterating.
    Pending,
    /// Within tolerance since `iteration`.
    Converged { iteration: usize },
    /// Dropped at `iteration` (0 means before iterating).
    Failed {
        iteration: usize,
        reason: DomainViolation,
    },
    /// Iteration cap reached while still outside tolerance.
    Exhausted,
}

impl RowState {
    /// True when the location produced a trustworthy value.
    pub fn is_converged(&self) -> bool {
        matches!(self, RowState::Converged { .. })
    }

    /// True for locations removed from the iteration.
    pub fn is_failed(&self) -> bool {
        matches!(self, RowState::Failed { .. })
    }
}

/// Diagnostics returned alongside the recovered quality of life.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverSummary {
    /// Number of iterations performed.
    pub iterations: usize,
    /// Largest residual among non-failed locations in the final iteration.
    pub max_residual: f64,
    /// Number of locations that met the tolerance.
    pub converged: usize,
    /// Locations dropped because of a domain violation.
    pub failed: Vec<usize>,
    /// Locations still outside tolerance when the iteration cap was reached.
    pub exhausted: Vec<usize>,
}

impl SolverSummary {
    /// True when every location converged.
    pub fn all_converged(&self) -> bool {
        self.failed.is_empty() && self.exhausted.is_empty()
    }

    /// Number of locations without a usable value.
    pub fn missing(&self) -> usize {
        self.failed.len() + self.exhausted.len()
    }
}

/// Raw solver output before it is assembled into an inversion result.
#[derive(Clone, Debug)]
pub struct Solution {
    /// Final estimate per location; `NaN` for failed locations.
    pub estimates: Vec<f64>,
    /// Final residual per location; `NaN` for failed locations.
    pub residuals: Vec<f64>,
    /// Terminal state per location.
    pub states: Vec<RowState>,
    /// Batch-level diagnostics.
    pub summary: SolverSummary,
}

/// Runs the damped iteration for `model` until the batch converges or the cap is hit.
pub fn solve<M: QolModel>(model: &M, options: &SolverOptions) -> Result<Solution> {
    options.validate()?;
    if !model.supports(options.rule) {
        return Err(QolError::UnsupportedUpdateRule {
            model: model.name(),
            rule: options.rule,
        });
    }

    let n = model.len();
    let mut estimates = vec![f64::NAN; n];
    let mut residuals = vec![f64::INFINITY; n];
    let mut states = vec![RowState::Pending; n];

    for index in 0..n {
        match model.initial_estimate(index) {
            Ok(value) => estimates[index] = value,
            Err(reason) => {
                residuals[index] = f64::NAN;
                states[index] = RowState::Failed {
                    iteration: 0,
                    reason,
                };
            }
        }
    }

    let freeze_converged = model.is_row_independent();
    let parallel = n >= options.parallel_threshold;
    let mut iteration = 0usize;
    let mut max_residual = batch_residual(&residuals, &states);

    while iteration < options.max_iterations && states.contains(&RowState::Pending) {
        iteration += 1;
        let coupling = model.couple(&estimates, &states);
        let step = |(index, ((estimate, state), residual)): (
            usize,
            ((&mut f64, &mut RowState), &mut f64),
        )| {
            step_location(
                model,
                &coupling,
                options,
                freeze_converged,
                iteration,
                index,
                estimate,
                state,
                residual,
            )
        };

        if parallel {
            estimates
                .par_iter_mut()
                .zip(states.par_iter_mut())
                .zip(residuals.par_iter_mut())
                .enumerate()
                .for_each(step);
        } else {
            estimates
                .iter_mut()
                .zip(states.iter_mut())
                .zip(residuals.iter_mut())
                .enumerate()
                .for_each(step);
        }

        max_residual = batch_residual(&residuals, &states);
        if options.progress_interval > 0 && iteration % options.progress_interval == 0 {
            let pending = states.iter().filter(|s| **s == RowState::Pending).count();
            debug!(
                "iteration {iteration}/{}: max residual {max_residual:e}, {pending} locations pending",
                options.max_iterations
            );
        }
    }

    for state in states.iter_mut() {
        if *state == RowState::Pending {
            *state = RowState::Exhausted;
        }
    }

    let summary = summarize(iteration, max_residual, &states);
    if summary.all_converged() {
        info!(
            "quality of life converged for {} locations after {iteration} iterations (max residual {max_residual:e})",
            summary.converged
        );
    } else {
        warn!(
            "{} of {n} locations missing after {iteration} iterations: {} failed, {} exhausted (max residual {max_residual:e})",
            summary.missing(),
            summary.failed.len(),
            summary.exhausted.len()
        );
    }

    Ok(Solution {
        estimates,
        residuals,
        states,
        summary,
    })
}

#[allow(clippy::too_many_arguments)]
fn step_location<M: QolModel>(
    model: &M,
    coupling: &M::Coupling,
    options: &SolverOptions,
    freeze_converged: bool,
    iteration: usize,
    index: usize,
    estimate: &mut f64,
    state: &mut RowState,
    residual: &mut f64,
) {
    match *state {
        RowState::Failed { .. } | RowState::Exhausted => return,
        RowState::Converged { .. } if freeze_converged => return,
        _ => {}
    }

    match model.propose(index, *estimate, coupling, options.rule) {
        Ok(Proposal {
            update,
            residual: distance,
        }) => {
            *estimate += options.damping * (update - *estimate);
            *residual = distance;
            *state = if *residual <= options.tolerance {
                match *state {
                    RowState::Converged { iteration: since } => {
                        RowState::Converged { iteration: since }
                    }
                    _ => RowState::Converged { iteration },
                }
            } else {
                RowState::Pending
            };
        }
        Err(reason) => {
            *estimate = f64::NAN;
            *residual = f64::NAN;
            *state = RowState::Failed { iteration, reason };
        }
    }
}

/// Supremum of the residuals over locations that are still part of the batch.
fn batch_residual(residuals: &[f64], states: &[RowState]) -> f64 {
    residuals
        .iter()
        .zip(states)
        .filter(|(_, state)| !state.is_failed())
        .fold(0.0_f64, |acc, (residual, _)| acc.max(*residual))
}

fn summarize(iterations: usize, max_residual: f64, states: &[RowState]) -> SolverSummary {
    let mut summary = SolverSummary {
        iterations,
        max_residual,
        converged: 0,
        failed: Vec::new(),
        exhausted: Vec::new(),
    };
    for (index, state) in states.iter().enumerate() {
        match state {
            RowState::Converged { .. } => summary.converged += 1,
            RowState::Failed { .. } => summary.failed.push(index),
            RowState::Exhausted | RowState::Pending => summary.exhausted.push(index),
        }
    }
    summary
}
