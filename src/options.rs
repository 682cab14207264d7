//! Configuration structures for the structural model and the inversion call.
//!
//! Every option has a documented default matching the ABRS toolkit, so a
//! partially specified configuration file only needs to list what it changes.

use serde::{Deserialize, Serialize};

use crate::error::{QolError, Result};
use crate::solving::{SolverOptions, UpdateRule};

/// Largest local-ties valuation for which `e^xi` stays finite with headroom.
pub const MAX_XI: f64 = 700.0;

/// Structural parameters shared by every location in a batch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralParameters {
    /// Income share spent on non-housing consumption.
    pub alpha: f64,
    /// Share of tradable goods in non-housing consumption.
    pub beta: f64,
    /// Idiosyncratic taste dispersion (inverse labour supply elasticity).
    pub gamma: f64,
    /// Valuation of local ties.
    pub xi: f64,
}

impl Default for StructuralParameters {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            beta: 0.5,
            gamma: 3.0,
            xi: 5.5,
        }
    }
}

impl StructuralParameters {
    /// Checks every parameter against its domain.
    pub fn validate(&self) -> Result<()> {
        let open_unit = |value: f64| value > 0.0 && value < 1.0;
        if !open_unit(self.alpha) {
            return Err(QolError::invalid_parameter("alpha", self.alpha, "(0, 1)"));
        }
        if !open_unit(self.beta) {
            return Err(QolError::invalid_parameter("beta", self.beta, "(0, 1)"));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(QolError::invalid_parameter(
                "gamma",
                self.gamma,
                "(0, inf)",
            ));
        }
        if !(self.xi > 0.0 && self.xi <= MAX_XI) {
            return Err(QolError::invalid_parameter("xi", self.xi, "(0, 700]"));
        }
        Ok(())
    }

    /// Exponents of `(P_t, p_n, p_H)` in the Cobb-Douglas price index.
    pub fn price_exponents(&self) -> [f64; 3] {
        [
            self.alpha * self.beta,
            self.alpha * (1.0 - self.beta),
            1.0 - self.alpha,
        ]
    }
}

/// Structural model used to invert quality of life.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    /// Row-independent local-ties model; each location is solved on its own.
    #[default]
    LocalTies,
    /// ABRS relative measure: locations interact through the aggregate
    /// migration allocation and results are normalised to `reference`.
    Relative {
        /// Index of the location whose quality of life is normalised to one.
        reference: usize,
    },
}

/// Aggregated configuration for one inversion call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InversionOptions {
    /// Structural parameters of the equilibrium model.
    pub parameters: StructuralParameters,
    /// Iteration controls for the damped solver.
    pub solver: SolverOptions,
    /// Which structural model to invert.
    pub model: ModelKind,
}

impl InversionOptions {
    /// Override the structural parameters while preserving other defaults.
    pub fn with_parameters(mut self, parameters: StructuralParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Override the solver settings while preserving other defaults.
    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    /// Select the structural model.
    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    /// Set the damping factor (`conv`).
    pub fn with_damping(mut self, damping: f64) -> Self {
        self.solver.damping = damping;
        self
    }

    /// Set the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.solver.tolerance = tolerance;
        self
    }

    /// Set the iteration cap (`maxiter`).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.solver.max_iterations = max_iterations;
        self
    }

    /// Choose between fixed-point and Newton updates.
    pub fn with_rule(mut self, rule: UpdateRule) -> Self {
        self.solver.rule = rule;
        self
    }

    /// Validates parameters and solver settings together.
    pub fn validate(&self) -> Result<()> {
        self.parameters.validate()?;
        self.solver.validate()
    }
}
