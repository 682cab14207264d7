//! Location-level data containers and validation utilities used by the inversion engine.

use std::fmt;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::columns::{ColumnNames, ColumnSource};
use crate::error::{QolError, Result};

/// Observed variables carried by every location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Wage index, `w`.
    Wage,
    /// Floor-space price, `p_H`.
    FloorPrice,
    /// Tradable goods price, `P_t`.
    TradablePrice,
    /// Local services price, `p_n`.
    ServicesPrice,
    /// Residence population, `L`.
    Residents,
    /// Hometown population, `L_b`.
    Hometown,
}

impl Field {
    /// All fields in canonical column order.
    pub const ALL: [Field; 6] = [
        Field::Wage,
        Field::FloorPrice,
        Field::TradablePrice,
        Field::ServicesPrice,
        Field::Residents,
        Field::Hometown,
    ];

    /// Conventional column name used by the ABRS toolkit.
    pub fn canonical_name(self) -> &'static str {
        match self {
            Field::Wage => "w",
            Field::FloorPrice => "p_H",
            Field::TradablePrice => "P_t",
            Field::ServicesPrice => "p_n",
            Field::Residents => "L",
            Field::Hometown => "L_b",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// A single location read out of [`Observations`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Wage index, `w`.
    pub wage: f64,
    /// Floor-space price, `p_H`.
    pub floor_price: f64,
    /// Tradable goods price, `P_t`.
    pub tradable_price: f64,
    /// Local services price, `p_n`.
    pub services_price: f64,
    /// Residence population, `L`.
    pub residents: f64,
    /// Hometown population, `L_b`.
    pub hometown: f64,
}

impl Observation {
    /// Value of a single field.
    pub fn get(&self, field: Field) -> f64 {
        match field {
            Field::Wage => self.wage,
            Field::FloorPrice => self.floor_price,
            Field::TradablePrice => self.tradable_price,
            Field::ServicesPrice => self.services_price,
            Field::Residents => self.residents,
            Field::Hometown => self.hometown,
        }
    }

    /// First field that is non-positive or non-finite, if any.
    pub fn invalid_field(&self) -> Option<(Field, f64)> {
        Field::ALL
            .into_iter()
            .map(|field| (field, self.get(field)))
            .find(|(_, value)| !(value.is_finite() && *value > 0.0))
    }
}

/// Column-oriented batch of locations.
///
/// Construction only checks shapes. Non-positive entries are kept so that the
/// solver can fail the affected rows individually; use
/// [`Observations::validate_strict`] to reject them up front instead.
#[derive(Clone, Debug)]
pub struct Observations {
    wage: DVector<f64>,
    floor_price: DVector<f64>,
    tradable_price: DVector<f64>,
    services_price: DVector<f64>,
    residents: DVector<f64>,
    hometown: DVector<f64>,
}

impl Observations {
    /// Creates `Observations` from a slice of row records.
    pub fn from_rows(rows: &[Observation]) -> Result<Self> {
        let column = |field: Field| DVector::from_iterator(rows.len(), rows.iter().map(|r| r.get(field)));
        ObservationsBuilder::new()
            .wage(column(Field::Wage))
            .floor_price(column(Field::FloorPrice))
            .tradable_price(column(Field::TradablePrice))
            .services_price(column(Field::ServicesPrice))
            .residents(column(Field::Residents))
            .hometown(column(Field::Hometown))
            .build()
    }

    /// Resolves each field through `names` and copies the columns out of `table`.
    pub fn from_table<T: ColumnSource + ?Sized>(table: &T, names: &ColumnNames) -> Result<Self> {
        let mut builder = ObservationsBuilder::new();
        for field in Field::ALL {
            let name = names.get(field);
            let values = table.column(name).ok_or_else(|| QolError::MissingColumn {
                field,
                name: name.to_string(),
            })?;
            builder = builder.column(field, DVector::from_column_slice(values));
        }
        builder.build()
    }

    /// Number of locations in the batch.
    pub fn len(&self) -> usize {
        self.wage.len()
    }

    /// True when the batch holds no locations; never the case once built.
    pub fn is_empty(&self) -> bool {
        self.wage.is_empty()
    }

    /// Returns a read-only view of one column.
    pub fn column(&self, field: Field) -> &DVector<f64> {
        match field {
            Field::Wage => &self.wage,
            Field::FloorPrice => &self.floor_price,
            Field::TradablePrice => &self.tradable_price,
            Field::ServicesPrice => &self.services_price,
            Field::Residents => &self.residents,
            Field::Hometown => &self.hometown,
        }
    }

    /// Returns the wage column (`w`).
    pub fn wage(&self) -> &DVector<f64> {
        &self.wage
    }

    /// Returns the residence population column (`L`).
    pub fn residents(&self) -> &DVector<f64> {
        &self.residents
    }

    /// Returns the hometown population column (`L_b`).
    pub fn hometown(&self) -> &DVector<f64> {
        &self.hometown
    }

    /// Reads location `index` as a row record.
    pub fn row(&self, index: usize) -> Observation {
        Observation {
            wage: self.wage[index],
            floor_price: self.floor_price[index],
            tradable_price: self.tradable_price[index],
            services_price: self.services_price[index],
            residents: self.residents[index],
            hometown: self.hometown[index],
        }
    }

    /// Iterates over the locations as row records.
    pub fn rows(&self) -> impl Iterator<Item = Observation> + '_ {
        (0..self.len()).map(move |index| self.row(index))
    }

    /// Rejects the batch if any location carries a non-positive or non-finite entry.
    pub fn validate_strict(&self) -> Result<()> {
        for (index, row) in self.rows().enumerate() {
            if let Some((field, value)) = row.invalid_field() {
                return Err(QolError::InvalidObservation {
                    index,
                    field,
                    value,
                });
            }
        }
        Ok(())
    }

    /// Returns a copy of the batch with the residents column replaced.
    ///
    /// Used to feed forward-simulated populations back through the inversion.
    pub fn with_residents(&self, residents: DVector<f64>) -> Result<Self> {
        if residents.len() != self.len() {
            return Err(QolError::dimension_mismatch(
                "residents length",
                self.len(),
                residents.len(),
            ));
        }
        Ok(Self {
            residents,
            ..self.clone()
        })
    }
}

/// Builder that validates column shapes before constructing [`Observations`].
#[derive(Debug, Default)]
pub struct ObservationsBuilder {
    wage: Option<DVector<f64>>,
    floor_price: Option<DVector<f64>>,
    tradable_price: Option<DVector<f64>>,
    services_price: Option<DVector<f64>>,
    residents: Option<DVector<f64>>,
    hometown: Option<DVector<f64>>,
}

impl ObservationsBuilder {
    /// Starts an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the column for `field`.
    pub fn column(mut self, field: Field, values: DVector<f64>) -> Self {
        let slot = match field {
            Field::Wage => &mut self.wage,
            Field::FloorPrice => &mut self.floor_price,
            Field::TradablePrice => &mut self.tradable_price,
            Field::ServicesPrice => &mut self.services_price,
            Field::Residents => &mut self.residents,
            Field::Hometown => &mut self.hometown,
        };
        *slot = Some(values);
        self
    }

    /// Sets the wage column (`w`).
    pub fn wage(self, values: DVector<f64>) -> Self {
        self.column(Field::Wage, values)
    }

    /// Sets the floor-space price column (`p_H`).
    pub fn floor_price(self, values: DVector<f64>) -> Self {
        self.column(Field::FloorPrice, values)
    }

    /// Sets the tradable goods price column (`P_t`).
    pub fn tradable_price(self, values: DVector<f64>) -> Self {
        self.column(Field::TradablePrice, values)
    }

    /// Sets the local services price column (`p_n`).
    pub fn services_price(self, values: DVector<f64>) -> Self {
        self.column(Field::ServicesPrice, values)
    }

    /// Sets the residence population column (`L`).
    pub fn residents(self, values: DVector<f64>) -> Self {
        self.column(Field::Residents, values)
    }

    /// Sets the hometown population column (`L_b`).
    pub fn hometown(self, values: DVector<f64>) -> Self {
        self.column(Field::Hometown, values)
    }

    /// Finalizes construction after checking that every column is present and aligned.
    pub fn build(self) -> Result<Observations> {
        let wage = self.wage.ok_or(QolError::EmptyBatch)?;
        let n = wage.len();
        if n == 0 {
            return Err(QolError::EmptyBatch);
        }

        let take = |column: Option<DVector<f64>>, context: &'static str| -> Result<DVector<f64>> {
            let column = column.ok_or_else(|| QolError::dimension_mismatch(context, n, 0))?;
            if column.len() != n {
                return Err(QolError::dimension_mismatch(context, n, column.len()));
            }
            Ok(column)
        };

        Ok(Observations {
            floor_price: take(self.floor_price, "p_H length")?,
            tradable_price: take(self.tradable_price, "P_t length")?,
            services_price: take(self.services_price, "p_n length")?,
            residents: take(self.residents, "L length")?,
            hometown: take(self.hometown, "L_b length")?,
            wage,
        })
    }
}
