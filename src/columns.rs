//! Mapping between the model's variables and the caller's column names.
//!
//! The calling application owns the table; the engine only needs to know which
//! column holds which variable. Names default to the toolkit's conventions
//! (`w`, `p_H`, `P_t`, `p_n`, `L`, `L_b`).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::data::Field;

/// Column name for every observed variable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub w: String,
    pub p_h: String,
    pub p_t: String,
    pub p_n: String,
    pub l: String,
    pub l_b: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            w: Field::Wage.canonical_name().to_string(),
            p_h: Field::FloorPrice.canonical_name().to_string(),
            p_t: Field::TradablePrice.canonical_name().to_string(),
            p_n: Field::ServicesPrice.canonical_name().to_string(),
            l: Field::Residents.canonical_name().to_string(),
            l_b: Field::Hometown.canonical_name().to_string(),
        }
    }
}

impl ColumnNames {
    /// Returns the column name bound to `field`.
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Wage => &self.w,
            Field::FloorPrice => &self.p_h,
            Field::TradablePrice => &self.p_t,
            Field::ServicesPrice => &self.p_n,
            Field::Residents => &self.l,
            Field::Hometown => &self.l_b,
        }
    }

    /// Rebinds `field` to another column while keeping the other names.
    pub fn with<S: Into<String>>(mut self, field: Field, name: S) -> Self {
        let slot = match field {
            Field::Wage => &mut self.w,
            Field::FloorPrice => &mut self.p_h,
            Field::TradablePrice => &mut self.p_t,
            Field::ServicesPrice => &mut self.p_n,
            Field::Residents => &mut self.l,
            Field::Hometown => &mut self.l_b,
        };
        *slot = name.into();
        self
    }
}

/// Read access to named numeric columns of a caller-owned table.
pub trait ColumnSource {
    /// Returns the column called `name`, if present.
    fn column(&self, name: &str) -> Option<&[f64]>;
}

impl ColumnSource for HashMap<String, Vec<f64>> {
    fn column(&self, name: &str) -> Option<&[f64]> {
        self.get(name).map(Vec::as_slice)
    }
}

impl ColumnSource for BTreeMap<String, Vec<f64>> {
    fn column(&self, name: &str) -> Option<&[f64]> {
        self.get(name).map(Vec::as_slice)
    }
}

/// Write access used to attach a result column back onto the caller's table.
pub trait ColumnSink {
    /// Stores `values` under `name`, replacing any existing column.
    fn insert_column(&mut self, name: &str, values: Vec<f64>);
}

impl ColumnSink for HashMap<String, Vec<f64>> {
    fn insert_column(&mut self, name: &str, values: Vec<f64>) {
        self.insert(name.to_string(), values);
    }
}

impl ColumnSink for BTreeMap<String, Vec<f64>> {
    fn insert_column(&mut self, name: &str, values: Vec<f64>) {
        self.insert(name.to_string(), values);
    }
}
