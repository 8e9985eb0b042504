//! Sensitivity analysis for ordinal covariates that are Missing Not At
//! Random (MNAR).
//!
//! The workflow: inject MNAR missingness into an ordinal column with
//! outcome- and level-dependent probabilities, multiply-impute the missing
//! values under a MAR assumption, shift the fitted ordinal-probit thresholds
//! by user-chosen deltas to construct several plausible MNAR re-imputations
//! from the same MAR fit, compare the imputed-category proportions, and pool
//! the final analysis model across imputations with Rubin's rule.
//!
//! # Example
//!
//! ```ignore
//! use ordmnar::{
//!     missing_mask, ChainedEquationsImputer, ImputeConfig, Imputer,
//!     MissingnessInjector, ProportionComparator, ShiftTable,
//!     ThresholdShiftRelabeler,
//! };
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cohort = ordmnar::simulate_cohort(
//!         &ordmnar::SimulationConfig::default(),
//!         &mut StdRng::seed_from_u64(7),
//!     )?;
//!
//!     let mut rng = StdRng::seed_from_u64(7);
//!     let with_missing = MissingnessInjector::new(cohort, "outcome", "severity")
//!         .group_a(&[2], 0.5)
//!         .group_b(&[4], 0.8)
//!         .id_column("id")
//!         .inject(&mut rng)?;
//!     let mask = missing_mask(&with_missing, "severity_mnar")?;
//!
//!     let imputer = ChainedEquationsImputer::new("severity_mnar ~ outcome + age", 5)?;
//!     let ensemble = imputer.impute(&with_missing, &ImputeConfig::default(), &mut rng)?;
//!
//!     let mut shifts = ShiftTable::new(5);
//!     shifts
//!         .scenario("delta0", &[0.0, 0.0, 0.0, 0.0])?
//!         .scenario("delta1", &[-0.5, -0.5, -0.5, -0.5])?;
//!     let relabeled = ThresholdShiftRelabeler::new(5)
//!         .relabel(&ensemble, &mask, &shifts, 7)?;
//!
//!     ProportionComparator::compare(&relabeled, &mask)?.summary();
//!     ordmnar::pooled_probit(&ensemble, "outcome ~ severity_mnar + age")?.summary();
//!     Ok(())
//! }
//! ```

use polars::prelude::{DataFrame, PolarsError};
use std::fmt;

pub mod compare;
pub mod design;
pub mod formula;
pub mod impute;
pub mod inject;
pub mod math;
pub mod pool;
pub mod relabel;
pub mod seed;
pub mod simulate;

pub use crate::compare::{ProportionColumn, ProportionComparator, ProportionTable};
pub use crate::design::{build_design, DesignMatrix};
pub use crate::formula::ModelFormula;
pub use crate::impute::{
    ChainedEquationsImputer, ImputationEnsemble, ImputeConfig, ImputedMember, Imputer,
    MultilevelImputer,
};
pub use crate::inject::MissingnessInjector;
pub use crate::pool::{pool, pooled_probit, MemberFit, PooledModel, PooledTerm};
pub use crate::relabel::{
    RelabeledEnsemble, ShiftTable, ThresholdShiftRelabeler, UnresolvedCount,
};
pub use crate::simulate::{simulate_cohort, SimulationConfig};

/// Error type for the `ordmnar` library.
#[derive(Debug)]
pub enum MnarError {
    /// Wraps a `PolarsError`.
    PolarsError(PolarsError),
    /// A named column does not exist in the DataFrame.
    ColumnNotFound(String),
    /// Malformed input: wrong coding, out-of-range probabilities, unknown
    /// levels. Raised before any mutation.
    Validation(String),
    /// A threshold vector from a regression fit is mis-sized or not strictly
    /// increasing. Never silently corrected.
    InvalidThresholds(String),
    /// A linear-algebra operation failed, e.g. a singular information matrix.
    NalgebraError(String),
}

impl From<PolarsError> for MnarError {
    fn from(err: PolarsError) -> Self {
        MnarError::PolarsError(err)
    }
}

impl fmt::Display for MnarError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MnarError::PolarsError(e) => write!(f, "Polars error: {}", e),
            MnarError::ColumnNotFound(s) => write!(f, "Column not found: {}", s),
            MnarError::Validation(s) => write!(f, "Validation error: {}", s),
            MnarError::InvalidThresholds(s) => write!(f, "Invalid thresholds: {}", s),
            MnarError::NalgebraError(s) => write!(f, "Nalgebra error: {}", s),
        }
    }
}

impl std::error::Error for MnarError {}

/// Returns the null mask of `column`: `true` where the value is missing.
///
/// Computed on the dataset that enters imputation, this is the
/// originally-missing mask the relabeler and the comparator consume.
pub fn missing_mask(df: &DataFrame, column: &str) -> Result<Vec<bool>, MnarError> {
    let col = df
        .column(column)
        .map_err(|_| MnarError::ColumnNotFound(column.to_string()))?;
    Ok(col
        .as_materialized_series()
        .is_null()
        .into_iter()
        .map(|v| v.unwrap_or(false))
        .collect())
}
