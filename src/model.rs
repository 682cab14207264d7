//! Structural primitives: composite price index, migration allocation, and the
//! row-independent local-ties model.
//!
//! Workers value a location through indirect utility `V = A * w / P`, where `A`
//! is quality of life and `P` the Cobb-Douglas price index. Hometown ties make
//! locals reluctant to leave: they stay with weight `e^xi V^gamma` against an
//! outside option of unit utility. Outsiders come from a large economy whose
//! own allocation the location does not move, so their inflow grows with
//! `V^gamma` without bound. Scaling the inflow so a location of unit utility
//! keeps exactly its hometown population gives residents per hometown resident
//!
//! ```text
//! R(t) = sigma(t + xi) + sigma(-xi) e^t,    t = gamma * ln V
//! ```
//!
//! which rises from 0 to infinity and equals 1 at `V = 1`. Inverting quality
//! of life means solving `R(t) = L / L_b` for `A`.

use crate::data::{Observation, Observations};
use crate::error::{DomainViolation, Result};
use crate::options::StructuralParameters;
use crate::solving::{RowState, UpdateRule};

/// A structural model whose equilibrium condition the solver drives to a fixed point.
///
/// Implementations are built from a batch of observations and then queried per
/// location. `couple` runs once per iteration, before any location is updated,
/// and carries whatever batch-level aggregates the update needs.
pub trait QolModel: Sync {
    /// Batch-level quantities shared by every location within one iteration.
    type Coupling: Sync;

    /// Short identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Number of locations.
    fn len(&self) -> usize;

    /// True for a model built over no locations.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when no location's update depends on another location.
    fn is_row_independent(&self) -> bool;

    /// Whether the model can produce updates under `rule`.
    fn supports(&self, rule: UpdateRule) -> bool;

    /// Starting value for a location, or the reason it cannot be solved at all.
    fn initial_estimate(&self, index: usize) -> std::result::Result<f64, DomainViolation>;

    /// Recomputes batch-level aggregates from the current estimates.
    fn couple(&self, estimates: &[f64], states: &[RowState]) -> Self::Coupling;

    /// Raw (undamped) update for one location and its distance from equilibrium.
    fn propose(
        &self,
        index: usize,
        current: f64,
        coupling: &Self::Coupling,
        rule: UpdateRule,
    ) -> std::result::Result<Proposal, DomainViolation>;
}

/// Undamped update for one location.
///
/// `residual` estimates how far the current estimate lies from the solution,
/// in quality-of-life units, and is what the solver compares with its
/// tolerance. A bare step length understates that distance whenever the
/// update map contracts slowly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Proposal {
    /// Next estimate before damping.
    pub update: f64,
    /// Estimated distance of the current estimate from the solution.
    pub residual: f64,
}

impl Proposal {
    /// Proposal whose distance from equilibrium is known directly.
    pub fn new(update: f64, residual: f64) -> Self {
        Self { update, residual }
    }

    /// Proposal from a map that contracts at `rate` around its fixed point:
    /// the remaining distance is the step divided by `1 - rate`.
    pub fn contracting(current: f64, update: f64, rate: f64) -> Self {
        let step = (update - current).abs();
        let residual = if step == 0.0 {
            0.0
        } else if rate < 1.0 {
            step / (1.0 - rate.max(0.0))
        } else {
            f64::INFINITY
        };
        Self { update, residual }
    }
}

/// Logarithm of the Cobb-Douglas price index `P_t^(alpha beta) p_n^(alpha (1-beta)) p_H^(1-alpha)`.
pub fn log_price_index(params: &StructuralParameters, row: &Observation) -> f64 {
    let [tradable, services, housing] = params.price_exponents();
    tradable * row.tradable_price.ln()
        + services * row.services_price.ln()
        + housing * row.floor_price.ln()
}

/// Cobb-Douglas price index of a location.
pub fn price_index(params: &StructuralParameters, row: &Observation) -> f64 {
    log_price_index(params, row).exp()
}

/// Numerically stable logistic function.
pub(crate) fn logistic(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// `ln sigma(-xi)`, the log inflow share at unit utility.
fn log_entry_share(xi: f64) -> f64 {
    -(xi + (-xi).exp().ln_1p())
}

/// `R(t) - 1` in a form that keeps full relative precision near `t = 0`.
fn allocation_excess(t: f64, xi: f64) -> f64 {
    logistic(-xi) * (t.exp_m1() - logistic(t + xi) * (-t).exp_m1())
}

/// Residents per hometown resident implied by the log utility index `t`.
pub fn allocation_ratio(t: f64, xi: f64) -> f64 {
    if t.abs() <= 1.0 {
        1.0 + allocation_excess(t, xi)
    } else {
        logistic(t + xi) + (t + log_entry_share(xi)).exp()
    }
}

/// `ln R(t)`; exactly zero at `t = 0`.
pub fn log_allocation_ratio(t: f64, xi: f64) -> f64 {
    if t.abs() <= 1.0 {
        allocation_excess(t, xi).ln_1p()
    } else {
        allocation_ratio(t, xi).ln()
    }
}

/// Elasticity `d ln R / d t` of [`allocation_ratio`], in `(0, 1]`.
pub fn allocation_elasticity(t: f64, xi: f64) -> f64 {
    let stay = logistic(t + xi) * logistic(-t - xi);
    let enter = (t + log_entry_share(xi)).exp();
    (stay + enter) / allocation_ratio(t, xi)
}

/// Largest Newton move in the utility index per iteration. The allocation is
/// nearly flat between the stay and move-in margins, where an uncapped step
/// overshoots by orders of magnitude.
const NEWTON_STEP_LIMIT: f64 = 2.0;

#[derive(Clone, Copy, Debug)]
struct LocalRow {
    /// `ln P - ln w`; quality of life equals `exp(log_cost + t / gamma)`.
    log_cost: f64,
    /// Observed `L / L_b`.
    ratio: f64,
    invalid: Option<DomainViolation>,
}

/// Row-independent local-ties model (the default inversion model).
///
/// Each location is solved against a reference economy of unit utility, so no
/// location's result depends on another's data or convergence.
#[derive(Clone, Debug)]
pub struct LocalTiesModel {
    params: StructuralParameters,
    rows: Vec<LocalRow>,
}

impl LocalTiesModel {
    /// Prepares per-location terms for `data` under `params`.
    pub fn new(data: &Observations, params: &StructuralParameters) -> Result<Self> {
        params.validate()?;
        let rows = data
            .rows()
            .map(|row| {
                if let Some((field, _)) = row.invalid_field() {
                    return LocalRow {
                        log_cost: f64::NAN,
                        ratio: f64::NAN,
                        invalid: Some(DomainViolation::InvalidObservation { field }),
                    };
                }
                let ratio = row.residents / row.hometown;
                let invalid = (!(ratio.is_finite() && ratio > 0.0))
                    .then_some(DomainViolation::UnattainableAllocation { ratio });
                LocalRow {
                    log_cost: log_price_index(params, &row) - row.wage.ln(),
                    ratio,
                    invalid,
                }
            })
            .collect();

        Ok(Self {
            params: *params,
            rows,
        })
    }

    /// Structural parameters the model was built with.
    pub fn parameters(&self) -> &StructuralParameters {
        &self.params
    }

    /// Residents implied by quality of life `qol` at a location (forward model).
    pub fn simulate_residents(params: &StructuralParameters, row: &Observation, qol: f64) -> f64 {
        let t = params.gamma * (qol.ln() + row.wage.ln() - log_price_index(params, row));
        row.hometown * allocation_ratio(t, params.xi)
    }

    fn utility_index(&self, row: &LocalRow, qol: f64) -> std::result::Result<f64, DomainViolation> {
        if !(qol.is_finite() && qol > 0.0) {
            return Err(DomainViolation::NonPositiveEstimate);
        }
        let t = self.params.gamma * (qol.ln() - row.log_cost);
        if t.is_finite() {
            Ok(t)
        } else {
            Err(DomainViolation::NonFiniteUtility)
        }
    }
}

impl QolModel for LocalTiesModel {
    type Coupling = ();

    fn name(&self) -> &'static str {
        "local_ties"
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn is_row_independent(&self) -> bool {
        true
    }

    fn supports(&self, _rule: UpdateRule) -> bool {
        true
    }

    fn initial_estimate(&self, index: usize) -> std::result::Result<f64, DomainViolation> {
        let row = &self.rows[index];
        match row.invalid {
            Some(reason) => Err(reason),
            // Solution when residents equal the hometown population.
            None => Ok(row.log_cost.exp()),
        }
    }

    fn couple(&self, _estimates: &[f64], _states: &[RowState]) {}

    fn propose(
        &self,
        index: usize,
        current: f64,
        _coupling: &(),
        rule: UpdateRule,
    ) -> std::result::Result<Proposal, DomainViolation> {
        let row = &self.rows[index];
        let t = self.utility_index(row, current)?;
        let xi = self.params.xi;
        if !(allocation_ratio(t, xi) > 0.0) {
            return Err(DomainViolation::DegenerateAllocation);
        }
        let gap = row.ratio.ln() - log_allocation_ratio(t, xi);
        let elasticity = allocation_elasticity(t, xi);

        let log_step = match rule {
            UpdateRule::FixedPoint => gap / self.params.gamma,
            UpdateRule::Newton => {
                if !(elasticity > 0.0) {
                    return Err(DomainViolation::DegenerateAllocation);
                }
                (gap / elasticity).clamp(-NEWTON_STEP_LIMIT, NEWTON_STEP_LIMIT) / self.params.gamma
            }
        };

        // First-order distance to the root, independent of the rule's step length.
        let residual = if gap == 0.0 {
            0.0
        } else if elasticity > 0.0 {
            current * gap.abs() / (self.params.gamma * elasticity)
        } else {
            f64::INFINITY
        };

        let update = current * log_step.exp();
        if update.is_finite() && update > 0.0 {
            Ok(Proposal::new(update, residual))
        } else {
            Err(DomainViolation::NonFiniteUpdate)
        }
    }
}
