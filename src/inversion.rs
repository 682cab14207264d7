//! Batch orchestration: validate inputs, run the solver once, and align results with input order.

use nalgebra::DVector;

use crate::columns::ColumnSink;
use crate::data::Observations;
use crate::error::Result;
use crate::model::{LocalTiesModel, QolModel};
use crate::options::{InversionOptions, ModelKind};
use crate::relative::RelativeModel;
use crate::solving::{solve, RowState, SolverOptions, SolverSummary};

/// Inversion problem over a fixed batch of locations.
#[derive(Clone, Debug)]
pub struct QolProblem {
    data: Observations,
}

impl QolProblem {
    /// Wraps a batch of observations.
    pub fn new(data: Observations) -> Self {
        Self { data }
    }

    /// Accessor for the observations.
    pub fn data(&self) -> &Observations {
        &self.data
    }

    /// Inverts quality of life with the model and settings described by `options`.
    pub fn invert(&self, options: &InversionOptions) -> Result<InversionResult> {
        options.validate()?;
        match options.model {
            ModelKind::LocalTies => {
                let model = LocalTiesModel::new(&self.data, &options.parameters)?;
                self.invert_with(&model, &options.solver)
            }
            ModelKind::Relative { reference } => {
                let model = RelativeModel::new(&self.data, &options.parameters, reference)?;
                self.invert_with(&model, &options.solver)
            }
        }
    }

    /// Inverts quality of life with an explicitly constructed model.
    pub fn invert_with<M: QolModel>(
        &self,
        model: &M,
        options: &SolverOptions,
    ) -> Result<InversionResult> {
        if options.strict_observations {
            self.data.validate_strict()?;
        }
        if model.len() != self.data.len() {
            return Err(crate::error::QolError::dimension_mismatch(
                "model locations",
                self.data.len(),
                model.len(),
            ));
        }

        let solution = solve(model, options)?;
        let qol = DVector::from_iterator(
            solution.estimates.len(),
            solution
                .estimates
                .iter()
                .zip(&solution.states)
                .map(|(value, state)| if state.is_converged() { *value } else { f64::NAN }),
        );

        Ok(InversionResult {
            qol,
            estimates: DVector::from_vec(solution.estimates),
            residuals: DVector::from_vec(solution.residuals),
            states: solution.states,
            summary: solution.summary,
        })
    }
}

/// Describes the outcome of one inversion call.
#[derive(Clone, Debug)]
pub struct InversionResult {
    /// Quality of life per location in input order; `NaN` unless converged.
    pub qol: DVector<f64>,
    /// Last iterate per location, including exhausted ones; `NaN` for failures.
    pub estimates: DVector<f64>,
    /// Final update magnitude per location.
    pub residuals: DVector<f64>,
    /// Terminal state per location.
    pub states: Vec<RowState>,
    /// Batch-level diagnostics.
    pub summary: SolverSummary,
}

impl InversionResult {
    /// Quality of life per location; missing values are `NaN`.
    pub fn qol(&self) -> &DVector<f64> {
        &self.qol
    }

    /// Quality of life per location with missing values as `None`.
    pub fn values(&self) -> Vec<Option<f64>> {
        self.qol
            .iter()
            .map(|value| value.is_finite().then_some(*value))
            .collect()
    }

    /// Writes the quality-of-life column into the caller's table under `name`.
    pub fn attach_to<T: ColumnSink + ?Sized>(&self, table: &mut T, name: &str) {
        table.insert_column(name, self.qol.iter().copied().collect());
    }
}
