//! ABRS relative quality-of-life measure with an economy-wide migration allocation.
//!
//! Unlike [`LocalTiesModel`](crate::model::LocalTiesModel), every location here
//! competes for the same pool of workers: the share of hometown-`b` workers
//! choosing location `j` is proportional to `(A_j w_j / P_j)^gamma`, with a
//! premium `e^xi` for staying at home. The aggregation shares therefore sum
//! over the whole batch, which [`RelativeModel::couple`] recomputes between
//! iterations. Quality of life is identified up to a constant and reported
//! relative to a reference location.
//!
//! Every update is normalised by the reference location's allocation. If the
//! reference location leaves the model's domain during iteration, no other
//! location can be normalised either, and all of them fail with
//! [`DomainViolation::ReferenceLost`].

use crate::data::Observations;
use crate::error::{DomainViolation, QolError, Result};
use crate::model::{log_price_index, Proposal, QolModel};
use crate::options::StructuralParameters;
use crate::solving::{RowState, UpdateRule};

#[derive(Clone, Copy, Debug)]
struct RelativeRow {
    /// Hometown population rescaled so that its total matches residents.
    hometown: f64,
    /// Residents relative to the reference location.
    residents_hat: f64,
    /// `P_hat / w_hat`, the update's price-wage term.
    cost_hat: f64,
    /// `w / P`, real wage in levels.
    real_wage: f64,
    invalid: Option<DomainViolation>,
}

/// Batch aggregates of the migration allocation at the current estimates.
#[derive(Clone, Debug)]
pub struct Allocation {
    /// Aggregation share `Psi_j` per location; `NaN` where undefined.
    shares: Vec<f64>,
    /// `sum_b L_b Psi_b` over live locations.
    base: f64,
    /// `calL` of the reference location.
    reference: f64,
}

/// Coupled relative model, normalised so the reference location has quality of life one.
#[derive(Clone, Debug)]
pub struct RelativeModel {
    params: StructuralParameters,
    reference: usize,
    /// `e^xi - 1`.
    ties: f64,
    rows: Vec<RelativeRow>,
}

impl RelativeModel {
    /// Rescales hometown populations, expresses variables relative to
    /// `reference`, and prepares per-location terms.
    ///
    /// Locations with non-positive inputs are excluded from the aggregates and
    /// fail individually; the reference location itself must be valid.
    pub fn new(
        data: &Observations,
        params: &StructuralParameters,
        reference: usize,
    ) -> Result<Self> {
        params.validate()?;
        if reference >= data.len() {
            return Err(QolError::InvalidReference {
                index: reference,
                reason: "index is outside the batch",
            });
        }
        let anchor = data.row(reference);
        if anchor.invalid_field().is_some() {
            return Err(QolError::InvalidReference {
                index: reference,
                reason: "reference observation is not strictly positive",
            });
        }

        let valid: Vec<bool> = data.rows().map(|row| row.invalid_field().is_none()).collect();
        let (residents_total, hometown_total) = data
            .rows()
            .zip(&valid)
            .filter(|(_, ok)| **ok)
            .fold((0.0, 0.0), |(l, lb), (row, _)| {
                (l + row.residents, lb + row.hometown)
            });
        let scale = residents_total / hometown_total;

        let anchor_log_cost = log_price_index(params, &anchor) - anchor.wage.ln();
        let rows = data
            .rows()
            .zip(&valid)
            .map(|(row, ok)| {
                if !*ok {
                    let field = row.invalid_field().map(|(field, _)| field);
                    return RelativeRow {
                        hometown: f64::NAN,
                        residents_hat: f64::NAN,
                        cost_hat: f64::NAN,
                        real_wage: f64::NAN,
                        invalid: field.map(|field| DomainViolation::InvalidObservation { field }),
                    };
                }
                let log_cost = log_price_index(params, &row) - row.wage.ln();
                RelativeRow {
                    hometown: row.hometown * scale,
                    residents_hat: row.residents / anchor.residents,
                    cost_hat: (log_cost - anchor_log_cost).exp(),
                    real_wage: (-log_cost).exp(),
                    invalid: None,
                }
            })
            .collect();

        Ok(Self {
            params: *params,
            reference,
            ties: params.xi.exp_m1(),
            rows,
        })
    }

    /// Index of the normalising location.
    pub fn reference(&self) -> usize {
        self.reference
    }

    /// Residents implied by relative quality of life under the economy-wide allocation.
    ///
    /// `hometown` is used as given. Because allocation probabilities sum to one,
    /// the simulated residents always total the hometown population.
    pub fn simulate_residents(
        data: &Observations,
        params: &StructuralParameters,
        qol: &[f64],
    ) -> Result<Vec<f64>> {
        if qol.len() != data.len() {
            return Err(QolError::dimension_mismatch("qol length", data.len(), qol.len()));
        }
        let attraction: Vec<f64> = data
            .rows()
            .zip(qol)
            .map(|(row, a)| {
                (params.gamma * (a.ln() + row.wage.ln() - log_price_index(params, &row))).exp()
            })
            .collect();
        let total: f64 = attraction.iter().sum();
        let ties = params.xi.exp_m1();

        let mut residents = vec![0.0; data.len()];
        for (origin, hometown) in data.hometown().iter().enumerate() {
            let denominator = total + ties * attraction[origin];
            for (destination, slot) in residents.iter_mut().enumerate() {
                let premium = if destination == origin { ties + 1.0 } else { 1.0 };
                *slot += hometown * premium * attraction[destination] / denominator;
            }
        }
        Ok(residents)
    }

    fn attraction(&self, row: &RelativeRow, qol: f64) -> f64 {
        (qol * row.real_wage).powf(self.params.gamma)
    }
}

impl QolModel for RelativeModel {
    type Coupling = Allocation;

    fn name(&self) -> &'static str {
        "relative"
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn is_row_independent(&self) -> bool {
        false
    }

    fn supports(&self, rule: UpdateRule) -> bool {
        rule == UpdateRule::FixedPoint
    }

    fn initial_estimate(&self, index: usize) -> std::result::Result<f64, DomainViolation> {
        match self.rows[index].invalid {
            Some(reason) => Err(reason),
            None => Ok(1.0),
        }
    }

    fn couple(&self, estimates: &[f64], states: &[RowState]) -> Allocation {
        let attraction: Vec<f64> = self
            .rows
            .iter()
            .zip(estimates)
            .zip(states)
            .map(|((row, qol), state)| {
                if state.is_failed() || !(*qol > 0.0) {
                    f64::NAN
                } else {
                    self.attraction(row, *qol)
                }
            })
            .collect();
        let total: f64 = attraction.iter().filter(|a| a.is_finite()).sum();

        let shares: Vec<f64> = attraction
            .iter()
            .map(|a| {
                if a.is_finite() {
                    1.0 / (self.ties * a / total + 1.0)
                } else {
                    f64::NAN
                }
            })
            .collect();
        let base: f64 = self
            .rows
            .iter()
            .zip(&shares)
            .filter(|(_, psi)| psi.is_finite())
            .map(|(row, psi)| row.hometown * psi)
            .sum();
        let reference =
            base + self.rows[self.reference].hometown * shares[self.reference] * self.ties;

        Allocation {
            shares,
            base,
            reference,
        }
    }

    fn propose(
        &self,
        index: usize,
        current: f64,
        allocation: &Allocation,
        _rule: UpdateRule,
    ) -> std::result::Result<Proposal, DomainViolation> {
        if !(current.is_finite() && current > 0.0) {
            return Err(DomainViolation::NonPositiveEstimate);
        }
        let psi = allocation.shares[index];
        if !psi.is_finite() {
            return Err(DomainViolation::NonFiniteUtility);
        }
        if !(allocation.reference.is_finite() && allocation.reference > 0.0) {
            return Err(DomainViolation::ReferenceLost);
        }
        let row = &self.rows[index];
        let local = allocation.base + row.hometown * psi * self.ties;
        if !(local > 0.0) {
            return Err(DomainViolation::DegenerateAllocation);
        }

        let update = row.cost_hat
            * (row.residents_hat * allocation.reference / local).powf(1.0 / self.params.gamma);
        if !(update.is_finite() && update > 0.0) {
            return Err(DomainViolation::NonFiniteUpdate);
        }
        // Own-location slope of the log update: a higher estimate lowers
        // Psi_j and with it calL_j. Bounded above by 1 - Psi_j.
        let rate = row.hometown * (self.ties + 1.0) * psi * (1.0 - psi) / local;
        Ok(Proposal::contracting(current, update, rate))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use nalgebra::DVector;

    use super::*;
    use crate::data::{Observation, ObservationsBuilder};

    fn batch() -> Observations {
        ObservationsBuilder::new()
            .wage(DVector::from_vec(vec![1.0, 1.2, 0.8]))
            .floor_price(DVector::from_vec(vec![1.0, 1.8, 0.6]))
            .tradable_price(DVector::from_vec(vec![1.0, 1.05, 0.95]))
            .services_price(DVector::from_vec(vec![1.0, 1.3, 0.8]))
            .residents(DVector::from_vec(vec![100.0, 310.0, 45.0]))
            .hometown(DVector::from_vec(vec![100.0, 300.0, 50.0]))
            .build()
            .unwrap()
    }

    #[test]
    fn simulated_residents_preserve_total_population() {
        let data = batch();
        let params = StructuralParameters::default();
        let residents = RelativeModel::simulate_residents(&data, &params, &[1.0, 1.3, 0.7]).unwrap();
        let total: f64 = residents.iter().sum();
        assert_relative_eq!(total, 450.0, epsilon = 1e-9);
    }

    #[test]
    fn reference_location_update_is_one() {
        let data = batch();
        let model = RelativeModel::new(&data, &StructuralParameters::default(), 0).unwrap();
        let estimates = [1.0, 1.4, 0.6];
        let states = [RowState::Pending; 3];
        let allocation = model.couple(&estimates, &states);
        let proposal = model
            .propose(0, 1.0, &allocation, UpdateRule::FixedPoint)
            .unwrap();
        assert_relative_eq!(proposal.update, 1.0, epsilon = 1e-14);
        assert!(proposal.residual < 1e-14);
    }

    #[test]
    fn residual_exceeds_step_by_own_location_feedback() {
        let data = batch();
        let model = RelativeModel::new(&data, &StructuralParameters::default(), 0).unwrap();
        let estimates = [1.0, 1.4, 0.6];
        let allocation = model.couple(&estimates, &[RowState::Pending; 3]);
        let proposal = model
            .propose(1, 1.4, &allocation, UpdateRule::FixedPoint)
            .unwrap();
        let step = (proposal.update - 1.4).abs();
        assert!(step > 0.0);
        assert!(proposal.residual > step);
    }

    #[test]
    fn losing_the_reference_location_is_reported_as_such() {
        let data = batch();
        let model = RelativeModel::new(&data, &StructuralParameters::default(), 0).unwrap();
        let states = [
            RowState::Failed {
                iteration: 3,
                reason: DomainViolation::NonFiniteUpdate,
            },
            RowState::Pending,
            RowState::Pending,
        ];
        let allocation = model.couple(&[f64::NAN, 1.2, 0.9], &states);
        for index in [1, 2] {
            assert_eq!(
                model.propose(index, 1.0, &allocation, UpdateRule::FixedPoint),
                Err(DomainViolation::ReferenceLost)
            );
        }
    }

    #[test]
    fn invalid_reference_is_fatal_but_other_invalid_rows_are_local() {
        let mut rows: Vec<Observation> = batch().rows().collect();
        rows[2].hometown = 0.0;
        let data = Observations::from_rows(&rows).unwrap();
        let params = StructuralParameters::default();

        assert!(matches!(
            RelativeModel::new(&data, &params, 2),
            Err(QolError::InvalidReference { index: 2, .. })
        ));
        assert!(matches!(
            RelativeModel::new(&data, &params, 7),
            Err(QolError::InvalidReference { index: 7, .. })
        ));

        let model = RelativeModel::new(&data, &params, 0).unwrap();
        assert!(model.initial_estimate(1).is_ok());
        assert!(matches!(
            model.initial_estimate(2),
            Err(DomainViolation::InvalidObservation { .. })
        ));
    }

    #[test]
    fn newton_is_not_offered() {
        let model = RelativeModel::new(&batch(), &StructuralParameters::default(), 0).unwrap();
        assert!(model.supports(UpdateRule::FixedPoint));
        assert!(!model.supports(UpdateRule::Newton));
    }
}
