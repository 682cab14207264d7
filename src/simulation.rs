//! Synthetic batches generated by forward-simulating the structural models.
//!
//! Wages, prices, hometown populations and quality of life are drawn at random;
//! residents are then computed from the model so the true quality of life of
//! every location is known. Useful for validation and benchmarking.

use nalgebra::DVector;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal, Uniform};
use serde::{Deserialize, Serialize};

use crate::data::{Observation, Observations};
use crate::error::{QolError, Result};
use crate::model::LocalTiesModel;
use crate::options::StructuralParameters;
use crate::relative::RelativeModel;

/// Dispersion of the randomly drawn location characteristics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticDesign {
    /// Number of locations to draw.
    pub locations: usize,
    /// Seed for the random number generator.
    pub seed: u64,
    /// Log standard deviation of quality of life.
    pub qol_dispersion: f64,
    /// Log standard deviation of wages and prices.
    pub price_dispersion: f64,
    /// Range of hometown populations.
    pub hometown_range: (f64, f64),
}

impl Default for SyntheticDesign {
    fn default() -> Self {
        Self {
            locations: 100,
            seed: 42,
            qol_dispersion: 0.1,
            price_dispersion: 0.2,
            hometown_range: (1_000.0, 100_000.0),
        }
    }
}

/// Observations together with the quality of life that generated them.
#[derive(Clone, Debug)]
pub struct SyntheticBatch {
    /// Simulated observations; residents are model-consistent.
    pub observations: Observations,
    /// True quality of life per location.
    pub qol: DVector<f64>,
}

impl SyntheticBatch {
    /// Draws a batch whose residents follow the local-ties model.
    pub fn local_ties(design: &SyntheticDesign, params: &StructuralParameters) -> Result<Self> {
        params.validate()?;
        let (rows, qol) = draw_locations(design)?;
        let pairs: Vec<(Observation, f64)> = rows.into_iter().zip(qol.iter().copied()).collect();
        Ok(Self {
            observations: local_ties_observations(params, &pairs)?,
            qol: DVector::from_vec(qol),
        })
    }

    /// Draws a batch whose residents follow the economy-wide relative model.
    ///
    /// Quality of life is normalised so the first location has value one.
    pub fn relative(design: &SyntheticDesign, params: &StructuralParameters) -> Result<Self> {
        params.validate()?;
        let (rows, mut qol) = draw_locations(design)?;
        let anchor = qol[0];
        qol.iter_mut().for_each(|a| *a /= anchor);

        let skeleton = Observations::from_rows(&rows)?;
        let residents = RelativeModel::simulate_residents(&skeleton, params, &qol)?;
        Ok(Self {
            observations: skeleton.with_residents(DVector::from_vec(residents))?,
            qol: DVector::from_vec(qol),
        })
    }
}

/// Builds observations from `(location, quality of life)` pairs, computing
/// residents with the local-ties model. Any residents already set are replaced.
pub fn local_ties_observations(
    params: &StructuralParameters,
    rows: &[(Observation, f64)],
) -> Result<Observations> {
    params.validate()?;
    let rows: Vec<Observation> = rows
        .iter()
        .map(|(row, qol)| Observation {
            residents: LocalTiesModel::simulate_residents(params, row, *qol),
            ..*row
        })
        .collect();
    Observations::from_rows(&rows)
}

fn draw_locations(design: &SyntheticDesign) -> Result<(Vec<Observation>, Vec<f64>)> {
    if design.locations == 0 {
        return Err(QolError::EmptyBatch);
    }
    let (low, high) = design.hometown_range;
    if !(low > 0.0 && high > low) {
        return Err(QolError::invalid_parameter(
            "hometown_range",
            low,
            "0 < low < high",
        ));
    }
    let qol_dist = LogNormal::new(0.0, design.qol_dispersion)
        .map_err(|_| QolError::invalid_parameter("qol_dispersion", design.qol_dispersion, "[0, inf)"))?;
    let price_dist = LogNormal::new(0.0, design.price_dispersion).map_err(|_| {
        QolError::invalid_parameter("price_dispersion", design.price_dispersion, "[0, inf)")
    })?;
    let hometown_dist = Uniform::new(low, high);

    let mut rng = SmallRng::seed_from_u64(design.seed);
    let mut rows = Vec::with_capacity(design.locations);
    let mut qol = Vec::with_capacity(design.locations);
    for _ in 0..design.locations {
        rows.push(Observation {
            wage: price_dist.sample(&mut rng),
            floor_price: price_dist.sample(&mut rng),
            tradable_price: price_dist.sample(&mut rng),
            services_price: price_dist.sample(&mut rng),
            residents: f64::NAN,
            hometown: hometown_dist.sample(&mut rng),
        });
        qol.push(qol_dist.sample(&mut rng));
    }
    Ok((rows, qol))
}
