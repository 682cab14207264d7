use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::Field;

/// Unified error type for `qolrs` operations.
///
/// Every variant is fatal for the call that raised it. Failures that only
/// concern a single location are reported through [`DomainViolation`] inside
/// the per-row state instead.
#[derive(Debug, Error)]
pub enum QolError {
    /// Raised when provided columns have incompatible lengths.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required length, usually the number of locations.
        expected: usize,
        /// The length that was actually supplied.
        found: usize,
    },

    /// Raised when a batch contains no locations.
    #[error("at least one observation is required")]
    EmptyBatch,

    /// Raised when a structural or solver parameter lies outside its domain.
    #[error("parameter `{name}` = {value} is outside its domain {domain}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        domain: &'static str,
    },

    /// Raised in strict mode when an observation is non-positive or non-finite.
    #[error("observation {index} has invalid {field} = {value}; inputs must be strictly positive")]
    InvalidObservation {
        index: usize,
        field: Field,
        value: f64,
    },

    /// Raised when a column requested by name is absent from the input table.
    #[error("column `{name}` for {field} is missing from the input table")]
    MissingColumn { field: Field, name: String },

    /// Raised when the chosen model cannot drive the requested update rule.
    #[error("model `{model}` does not support the {rule:?} update rule")]
    UnsupportedUpdateRule {
        model: &'static str,
        rule: crate::solving::UpdateRule,
    },

    /// Raised when the normalisation reference of a relative measure is unusable.
    #[error("reference location {index} cannot normalise the batch: {reason}")]
    InvalidReference { index: usize, reason: &'static str },
}

impl QolError {
    /// Helper to format a [`DimensionMismatch`](QolError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper for rejecting a parameter outside its documented domain.
    pub fn invalid_parameter(name: &'static str, value: f64, domain: &'static str) -> Self {
        Self::InvalidParameter {
            name,
            value,
            domain,
        }
    }
}

/// Row-local failure: the affected location is reported as missing while the
/// rest of the batch keeps iterating.
#[derive(Clone, Copy, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum DomainViolation {
    /// An input field was non-positive or non-finite.
    #[error("{field} must be strictly positive and finite")]
    InvalidObservation { field: Field },

    /// The observed population ratio is not a finite positive number.
    #[error("population ratio {ratio} is not a finite positive number")]
    UnattainableAllocation { ratio: f64 },

    /// A candidate QoL was non-positive or non-finite.
    #[error("candidate quality of life left the positive region")]
    NonPositiveEstimate,

    /// Utility terms overflowed or became NaN.
    #[error("indirect utility is not finite")]
    NonFiniteUtility,

    /// The migration allocation collapsed to zero.
    #[error("migration allocation degenerated to zero")]
    DegenerateAllocation,

    /// The normalising reference location failed, so this location cannot be normalised.
    #[error("reference location left the model's domain")]
    ReferenceLost,

    /// The raw update was non-finite or non-positive.
    #[error("update is not a finite positive number")]
    NonFiniteUpdate,
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, QolError>;
