//! MNAR missingness injection.
//!
//! Marks a probability-driven subset of an ordinal column as missing,
//! conditional on the binary outcome and on membership in two configurable
//! level groups, optionally stratified by a categorical column. The original
//! column is never modified; the nulls land in a freshly appended copy.

use crate::design::{i64_values, str_values};
use crate::MnarError;
use log::warn;
use polars::prelude::*;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};

/// Rounds to the nearest integer with ties going to the even integer
/// (round-half-to-even). Counts are clamped to the pool size by the caller.
pub(crate) fn round_half_to_even(x: f64) -> usize {
    let floor = x.floor();
    if (x - floor - 0.5).abs() < 1e-9 {
        let f = floor as i64;
        (if f % 2 == 0 { f } else { f + 1 }) as usize
    } else {
        x.round() as usize
    }
}

/// Builder that injects MNAR missingness into an ordinal column.
///
/// Rows with `outcome == 1` and a value in group A are nulled with
/// probability `prob_a`; rows with `outcome == 0` and a value in group B are
/// nulled with probability `prob_b`. The group B pass runs against the column
/// state left behind by the group A pass, not against the original column.
#[derive(Debug, Clone)]
pub struct MissingnessInjector {
    dataframe: DataFrame,
    outcome: String,
    ordinal: String,
    id: Option<String>,
    output: Option<String>,
    levels: Option<Vec<i64>>,
    group_a: Vec<i64>,
    prob_a: f64,
    group_b: Vec<i64>,
    prob_b: f64,
    strata: Option<String>,
    strata_probabilities: BTreeMap<String, (f64, f64)>,
}

impl MissingnessInjector {
    /// Creates a new injector over `dataframe` for the given outcome and
    /// ordinal column names.
    pub fn new(dataframe: DataFrame, outcome: &str, ordinal: &str) -> Self {
        Self {
            dataframe,
            outcome: outcome.to_string(),
            ordinal: ordinal.to_string(),
            id: None,
            output: None,
            levels: None,
            group_a: Vec::new(),
            prob_a: 0.0,
            group_b: Vec::new(),
            prob_b: 0.0,
            strata: None,
            strata_probabilities: BTreeMap::new(),
        }
    }

    /// Levels removed among rows with `outcome == 1`, and their probability.
    pub fn group_a(&mut self, levels: &[i64], probability: f64) -> &mut Self {
        self.group_a = levels.to_vec();
        self.prob_a = probability;
        self
    }

    /// Levels removed among rows with `outcome == 0`, and their probability.
    pub fn group_b(&mut self, levels: &[i64], probability: f64) -> &mut Self {
        self.group_b = levels.to_vec();
        self.prob_b = probability;
        self
    }

    /// Declares the ordered level set. Without this, the distinct observed
    /// values are used.
    pub fn levels(&mut self, levels: &[i64]) -> &mut Self {
        self.levels = Some(levels.to_vec());
        self
    }

    /// Row-identity column, carried through the stratified recombine step.
    pub fn id_column(&mut self, id: &str) -> &mut Self {
        self.id = Some(id.to_string());
        self
    }

    /// Name of the appended column. Defaults to `<ordinal>_mnar`.
    pub fn output_column(&mut self, name: &str) -> &mut Self {
        self.output = Some(name.to_string());
        self
    }

    /// Stratifies the injection: each stratum value maps to its own
    /// `(prob_a, prob_b)` pair, applied independently within the stratum.
    pub fn strata(&mut self, column: &str, probabilities: &[(&str, f64, f64)]) -> &mut Self {
        self.strata = Some(column.to_string());
        self.strata_probabilities = probabilities
            .iter()
            .map(|(stratum, a, b)| (stratum.to_string(), (*a, *b)))
            .collect();
        self
    }

    /// Runs the injection and returns the dataset with the new column
    /// appended. Fails without touching anything when any precondition is
    /// violated.
    pub fn inject<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DataFrame, MnarError> {
        let outcome = i64_values(&self.dataframe, &self.outcome)?;
        let ordinal = i64_values(&self.dataframe, &self.ordinal)?;
        let output_name = self
            .output
            .clone()
            .unwrap_or_else(|| format!("{}_mnar", self.ordinal));
        self.validate(&outcome, &ordinal, &output_name)?;

        let mut derived: Vec<Option<i64>> = ordinal.iter().copied().map(Some).collect();

        match &self.strata {
            None => {
                remove_pass(
                    &mut derived,
                    |i| outcome[i] == 1,
                    &self.group_a,
                    self.prob_a,
                    rng,
                    "group A",
                );
                remove_pass(
                    &mut derived,
                    |i| outcome[i] == 0,
                    &self.group_b,
                    self.prob_b,
                    rng,
                    "group B",
                );
            }
            Some(strata_column) => {
                let strata = str_values(&self.dataframe, strata_column)?;
                // one generator consumed sequentially across strata, in
                // sorted stratum order
                for (stratum, (prob_a, prob_b)) in &self.strata_probabilities {
                    remove_pass(
                        &mut derived,
                        |i| strata[i] == *stratum && outcome[i] == 1,
                        &self.group_a,
                        *prob_a,
                        rng,
                        &format!("group A, stratum '{}'", stratum),
                    );
                    remove_pass(
                        &mut derived,
                        |i| strata[i] == *stratum && outcome[i] == 0,
                        &self.group_b,
                        *prob_b,
                        rng,
                        &format!("group B, stratum '{}'", stratum),
                    );
                }
            }
        }

        let mut augmented = self.dataframe.clone();
        augmented.with_column(Series::new(output_name.as_str().into(), derived))?;

        match &self.strata {
            None => Ok(augmented),
            Some(strata_column) => recombine_by_stratum(&augmented, strata_column),
        }
    }

    fn validate(
        &self,
        outcome: &[i64],
        ordinal: &[i64],
        output_name: &str,
    ) -> Result<(), MnarError> {
        if outcome.iter().any(|&v| v != 0 && v != 1) {
            return Err(MnarError::Validation(format!(
                "outcome column '{}' must be coded 0/1",
                self.outcome
            )));
        }
        let level_set: BTreeSet<i64> = match &self.levels {
            Some(declared) => {
                let declared: BTreeSet<i64> = declared.iter().copied().collect();
                if let Some(v) = ordinal.iter().find(|v| !declared.contains(v)) {
                    return Err(MnarError::Validation(format!(
                        "ordinal column '{}' holds value {} outside the declared level set",
                        self.ordinal, v
                    )));
                }
                declared
            }
            None => ordinal.iter().copied().collect(),
        };
        for (group, name) in [(&self.group_a, "group_a_levels"), (&self.group_b, "group_b_levels")]
        {
            if let Some(v) = group.iter().find(|v| !level_set.contains(v)) {
                return Err(MnarError::Validation(format!(
                    "{}: level {} is not in the level set of '{}'",
                    name, v, self.ordinal
                )));
            }
        }
        for (probability, name) in [(self.prob_a, "prob_a"), (self.prob_b, "prob_b")] {
            if !(0.0..=1.0).contains(&probability) {
                return Err(MnarError::Validation(format!(
                    "{}: probability {} is outside [0, 1]",
                    name, probability
                )));
            }
        }
        if let Some(strata_column) = &self.strata {
            let strata = str_values(&self.dataframe, strata_column)?;
            for stratum in strata.iter().collect::<BTreeSet<_>>() {
                match self.strata_probabilities.get(stratum) {
                    None => {
                        return Err(MnarError::Validation(format!(
                            "strata_probabilities: no entry for stratum '{}'",
                            stratum
                        )))
                    }
                    Some((a, b)) => {
                        if !(0.0..=1.0).contains(a) || !(0.0..=1.0).contains(b) {
                            return Err(MnarError::Validation(format!(
                                "strata_probabilities['{}']: probabilities must lie in [0, 1]",
                                stratum
                            )));
                        }
                    }
                }
            }
        }
        if let Some(id) = &self.id {
            if self.dataframe.column(id).is_err() {
                return Err(MnarError::ColumnNotFound(id.clone()));
            }
        }
        if self.dataframe.column(output_name).is_ok() {
            return Err(MnarError::Validation(format!(
                "output column '{}' already exists",
                output_name
            )));
        }
        Ok(())
    }
}

/// One removal pass: collect the candidate pool against the *current* column
/// state, then null `round(pool × probability)` sampled rows.
fn remove_pass<R: Rng + ?Sized>(
    derived: &mut [Option<i64>],
    eligible: impl Fn(usize) -> bool,
    levels: &[i64],
    probability: f64,
    rng: &mut R,
    label: &str,
) {
    let pool: Vec<usize> = (0..derived.len())
        .filter(|&i| eligible(i) && matches!(derived[i], Some(v) if levels.contains(&v)))
        .collect();
    if pool.is_empty() {
        warn!("missingness injection: empty candidate pool for {}; nothing removed", label);
        return;
    }
    let count = round_half_to_even(pool.len() as f64 * probability).min(pool.len());
    for picked in rand::seq::index::sample(rng, pool.len(), count) {
        derived[pool[picked]] = None;
    }
}

/// Split-apply-combine step of the stratified variant: partitions the frame
/// by stratum and stacks the partitions back. Row order across strata is not
/// preserved; row identity is.
fn recombine_by_stratum(df: &DataFrame, strata_column: &str) -> Result<DataFrame, MnarError> {
    let strata = str_values(df, strata_column)?;
    let keys: BTreeSet<&String> = strata.iter().collect();
    let mut combined: Option<DataFrame> = None;
    for key in keys {
        let mask_values: Vec<bool> = strata.iter().map(|s| s == key).collect();
        let mask = BooleanChunked::from_slice("mask".into(), &mask_values);
        let part = df.filter(&mask)?;
        combined = Some(match combined {
            None => part,
            Some(acc) => acc.vstack(&part)?,
        });
    }
    combined.ok_or_else(|| MnarError::Validation("stratified injection: empty dataset".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_ties_go_to_even() {
        assert_eq!(round_half_to_even(2.5), 2);
        assert_eq!(round_half_to_even(3.5), 4);
        assert_eq!(round_half_to_even(4.5), 4);
        assert_eq!(round_half_to_even(0.5), 0);
        assert_eq!(round_half_to_even(1.5), 2);
    }

    #[test]
    fn rounding_away_from_ties_is_nearest() {
        assert_eq!(round_half_to_even(2.49), 2);
        assert_eq!(round_half_to_even(2.51), 3);
        assert_eq!(round_half_to_even(0.0), 0);
        assert_eq!(round_half_to_even(7.0), 7);
    }
}
