//! Quality-of-life inversion under spatial frictions.
//!
//! This crate recovers an unobserved quality-of-life index for every location
//! in a batch from wages, floor-space prices, tradable and local-services
//! prices, residents, and hometown populations. It follows the quantitative
//! spatial model of Ahlfeldt, Bald, Roth and Seidel (2024), *Measuring quality
//! of life under spatial frictions*, where mobility frictions come from
//! idiosyncratic tastes (`gamma`) and local ties (`xi`).
//!
//! The crate provides tools to
//!
//! - hold and validate location-level data (`data`, `columns` modules),
//! - evaluate the structural equilibrium condition (`model`, `relative` modules),
//! - drive every location to its fixed point with a damped, data-parallel
//!   iteration (`solving` module), and
//! - assemble results aligned with the input order (`inversion` module).
//!
//! Locations whose inputs are invalid, whose iteration leaves the model's
//! domain, or that exhaust the iteration budget are reported as `NaN` and
//! listed in the summary; they never abort the rest of the batch.
//!
//! # Quick start
//!
//! ```no_run
//! use qolrs::data::ObservationsBuilder;
//! use qolrs::{InversionOptions, QolProblem};
//! use nalgebra::DVector;
//!
//! let observations = ObservationsBuilder::new()
//!     .wage(DVector::from_vec(vec![1.0, 1.2, 0.9]))
//!     .floor_price(DVector::from_vec(vec![1.0, 1.8, 0.7]))
//!     .tradable_price(DVector::from_vec(vec![1.0, 1.05, 0.98]))
//!     .services_price(DVector::from_vec(vec![1.0, 1.3, 0.9]))
//!     .residents(DVector::from_vec(vec![100.0, 320.0, 45.0]))
//!     .hometown(DVector::from_vec(vec![100.0, 300.0, 50.0]))
//!     .build()
//!     .expect("aligned columns");
//!
//! let options = InversionOptions::default()
//!     .with_damping(0.3)
//!     .with_tolerance(1e-11)
//!     .with_max_iterations(50_000);
//!
//! let result = QolProblem::new(observations)
//!     .invert(&options)
//!     .expect("valid parameters");
//! println!("quality of life: {:?}", result.qol());
//! println!("missing locations: {}", result.summary.missing());
//! ```
//!
//! Quality of life is identified up to a constant. The default local-ties model
//! solves each location on its own; [`ModelKind::Relative`] reproduces the
//! economy-wide relative measure normalised to a reference location.

pub mod columns;
pub mod data;
pub mod error;
pub mod inversion;
pub mod model;
pub mod options;
pub mod relative;
pub mod simulation;
pub mod solving;

pub use error::{DomainViolation, QolError, Result};
pub use inversion::{InversionResult, QolProblem};
pub use model::{LocalTiesModel, Proposal, QolModel};
pub use options::{InversionOptions, ModelKind, StructuralParameters};
pub use relative::RelativeModel;
pub use solving::{RowState, SolverOptions, SolverSummary, UpdateRule};
