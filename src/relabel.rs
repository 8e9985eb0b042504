//! Threshold-shift relabeling of MAR-completed datasets.
//!
//! For every ensemble member and every MNAR scenario, the fitted thresholds
//! are shifted by the scenario's delta vector and the originally-missing rows
//! are re-assigned the category whose shifted interval contains a perturbed
//! latent score. Originally-observed rows are copied from the MAR completion
//! and never touched.

use crate::impute::ImputationEnsemble;
use crate::seed::child_seed;
use crate::MnarError;
use getset::Getters;
use log::warn;
use polars::prelude::*;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::Normal;

/// A table of MNAR scenarios: per scenario one shift vector of length
/// `level_count − 1`, added elementwise to the fitted thresholds.
#[derive(Debug, Clone)]
pub struct ShiftTable {
    level_count: usize,
    scenarios: Vec<Scenario>,
}

#[derive(Debug, Clone)]
struct Scenario {
    name: String,
    shifts: Vec<f64>,
}

impl ShiftTable {
    pub fn new(level_count: usize) -> Self {
        Self {
            level_count,
            scenarios: Vec::new(),
        }
    }

    /// Adds a named scenario. The shift vector must have `level_count − 1`
    /// finite entries and the name must be unused.
    pub fn scenario(&mut self, name: &str, shifts: &[f64]) -> Result<&mut Self, MnarError> {
        if shifts.len() + 1 != self.level_count {
            return Err(MnarError::Validation(format!(
                "shift table: scenario '{}' has {} entries, expected {}",
                name,
                shifts.len(),
                self.level_count - 1
            )));
        }
        if shifts.iter().any(|v| !v.is_finite()) {
            return Err(MnarError::Validation(format!(
                "shift table: scenario '{}' holds a non-finite shift",
                name
            )));
        }
        if self.scenarios.iter().any(|s| s.name == name) {
            return Err(MnarError::Validation(format!(
                "shift table: duplicate scenario name '{}'",
                name
            )));
        }
        self.scenarios.push(Scenario {
            name: name.to_string(),
            shifts: shifts.to_vec(),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }
}

/// Count of rows whose latent score could not be placed in any interval and
/// were back-filled by a uniform draw from the resolved values of the same
/// column.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedCount {
    pub member: usize,
    pub scenario: String,
    pub rows: usize,
}

/// The relabeled ensemble: per member the completed dataset with one new
/// column per scenario, plus the column names and the unresolved-row counts.
#[derive(Debug, Getters)]
#[getset(get = "pub")]
pub struct RelabeledEnsemble {
    members: Vec<DataFrame>,
    mar_column: String,
    scenario_columns: Vec<String>,
    level_count: usize,
    unresolved: Vec<UnresolvedCount>,
}

/// Re-labels originally-missing rows under shifted-threshold scenarios.
#[derive(Debug, Clone)]
pub struct ThresholdShiftRelabeler {
    level_count: usize,
    noise_mean: f64,
    noise_sd: f64,
}

impl ThresholdShiftRelabeler {
    pub fn new(level_count: usize) -> Self {
        Self {
            level_count,
            noise_mean: 0.0,
            noise_sd: 1.0,
        }
    }

    /// Sets the latent-noise distribution. A zero standard deviation is
    /// allowed and makes the scores deterministic.
    pub fn noise(&mut self, mean: f64, sd: f64) -> &mut Self {
        self.noise_mean = mean;
        self.noise_sd = sd;
        self
    }

    /// Runs the relabeling.
    ///
    /// Noise is drawn fresh for every (member, scenario) pair from a
    /// sub-stream of `seed`, so a parallel run matches a sequential one.
    /// Non-increasing member thresholds fail with
    /// [`MnarError::InvalidThresholds`]; they are never sorted.
    pub fn relabel(
        &self,
        ensemble: &ImputationEnsemble,
        missing_mask: &[bool],
        shifts: &ShiftTable,
        seed: u64,
    ) -> Result<RelabeledEnsemble, MnarError> {
        self.validate(ensemble, missing_mask, shifts)?;

        let mar_column = ensemble.ordinal_column().to_string();
        let level_count = self.level_count;
        let scenario_columns: Vec<String> = shifts
            .scenarios
            .iter()
            .map(|s| format!("{}_{}", mar_column, s.name))
            .collect();

        let outputs: Vec<(DataFrame, Vec<UnresolvedCount>)> = ensemble
            .members()
            .par_iter()
            .enumerate()
            .map(|(member_index, member)| {
                self.relabel_member(
                    member_index,
                    member.data(),
                    member.thresholds(),
                    member.linear_predictor(),
                    &mar_column,
                    missing_mask,
                    shifts,
                    seed,
                )
            })
            .collect::<Result<Vec<_>, MnarError>>()?;

        let mut members = Vec::with_capacity(outputs.len());
        let mut unresolved = Vec::new();
        for (data, counts) in outputs {
            members.push(data);
            unresolved.extend(counts);
        }
        Ok(RelabeledEnsemble {
            members,
            mar_column,
            scenario_columns,
            level_count,
            unresolved,
        })
    }

    fn validate(
        &self,
        ensemble: &ImputationEnsemble,
        missing_mask: &[bool],
        shifts: &ShiftTable,
    ) -> Result<(), MnarError> {
        if self.level_count < 2 {
            return Err(MnarError::Validation(
                "relabel: level_count must be at least 2".to_string(),
            ));
        }
        if ensemble.level_count() != self.level_count {
            return Err(MnarError::Validation(format!(
                "relabel: ensemble has {} levels but the relabeler expects {}",
                ensemble.level_count(),
                self.level_count
            )));
        }
        if shifts.level_count != self.level_count {
            return Err(MnarError::Validation(format!(
                "relabel: shift table is sized for {} levels, expected {}",
                shifts.level_count, self.level_count
            )));
        }
        if shifts.is_empty() {
            return Err(MnarError::Validation(
                "relabel: shift table holds no scenarios".to_string(),
            ));
        }
        if !self.noise_sd.is_finite() || self.noise_sd < 0.0 {
            return Err(MnarError::Validation(format!(
                "relabel: noise_sd {} must be finite and non-negative",
                self.noise_sd
            )));
        }
        if !self.noise_mean.is_finite() {
            return Err(MnarError::Validation(
                "relabel: noise_mean must be finite".to_string(),
            ));
        }
        let k1 = self.level_count - 1;
        for (m, member) in ensemble.members().iter().enumerate() {
            let thresholds = member.thresholds();
            if thresholds.len() != k1 {
                return Err(MnarError::InvalidThresholds(format!(
                    "member {}: {} thresholds for {} levels",
                    m,
                    thresholds.len(),
                    self.level_count
                )));
            }
            if thresholds.windows(2).any(|w| w[1] <= w[0]) {
                return Err(MnarError::InvalidThresholds(format!(
                    "member {}: thresholds are not strictly increasing",
                    m
                )));
            }
            if member.data().height() != missing_mask.len() {
                return Err(MnarError::Validation(format!(
                    "relabel: member {} has {} rows but the mask has {}",
                    m,
                    member.data().height(),
                    missing_mask.len()
                )));
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn relabel_member(
        &self,
        member_index: usize,
        data: &DataFrame,
        thresholds: &[f64],
        linear_predictor: &[f64],
        mar_column: &str,
        missing_mask: &[bool],
        shifts: &ShiftTable,
        seed: u64,
    ) -> Result<(DataFrame, Vec<UnresolvedCount>), MnarError> {
        let mar_values = crate::design::i64_values(data, mar_column)?;
        for &v in &mar_values {
            if v < 1 || v > self.level_count as i64 {
                return Err(MnarError::Validation(format!(
                    "relabel: member {} holds completed category {} outside 1..={}",
                    member_index, v, self.level_count
                )));
            }
        }

        let n = mar_values.len();
        let mut output = data.clone();
        let mut unresolved_counts = Vec::new();

        for (scenario_index, scenario) in shifts.scenarios.iter().enumerate() {
            let mut rng = StdRng::seed_from_u64(child_seed(
                seed,
                member_index as u64,
                scenario_index as u64,
            ));
            let shifted: Vec<f64> = thresholds
                .iter()
                .zip(scenario.shifts.iter())
                .map(|(t, s)| t + s)
                .collect();
            let noise = self.draw_noise(n, &mut rng);

            let mut labels: Vec<Option<i64>> = Vec::with_capacity(n);
            let mut unresolved_rows = Vec::new();
            for i in 0..n {
                if !missing_mask[i] {
                    labels.push(Some(mar_values[i]));
                    continue;
                }
                let score = linear_predictor[i] + noise[i];
                if !score.is_finite() {
                    labels.push(None);
                    unresolved_rows.push(i);
                    continue;
                }
                // smallest category whose shifted upper bound covers the
                // score; ties go to the lower category, +infinity on top
                let mut category = self.level_count as i64;
                for (kdx, &cut) in shifted.iter().enumerate() {
                    if score <= cut {
                        category = kdx as i64 + 1;
                        break;
                    }
                }
                labels.push(Some(category));
            }

            if !unresolved_rows.is_empty() {
                let resolved: Vec<i64> = labels.iter().filter_map(|v| *v).collect();
                if resolved.is_empty() {
                    return Err(MnarError::Validation(format!(
                        "relabel: member {}, scenario '{}': no resolved values to back-fill from",
                        member_index, scenario.name
                    )));
                }
                for &i in &unresolved_rows {
                    labels[i] = Some(resolved[rng.gen_range(0..resolved.len())]);
                }
                warn!(
                    "relabel: member {}, scenario '{}': {} unresolved rows back-filled from resolved values",
                    member_index,
                    scenario.name,
                    unresolved_rows.len()
                );
                unresolved_counts.push(UnresolvedCount {
                    member: member_index,
                    scenario: scenario.name.clone(),
                    rows: unresolved_rows.len(),
                });
            }

            let final_labels: Vec<i64> = labels.into_iter().map(|v| v.unwrap()).collect();
            let column_name = format!("{}_{}", mar_column, scenario.name);
            output.with_column(Series::new(column_name.as_str().into(), final_labels))?;
        }

        Ok((output, unresolved_counts))
    }

    fn draw_noise<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<f64> {
        if self.noise_sd == 0.0 {
            return vec![self.noise_mean; n];
        }
        // construction is guarded by validate(): sd is finite and positive here
        let normal = Normal::new(self.noise_mean, self.noise_sd).unwrap();
        (0..n).map(|_| normal.sample(rng)).collect()
    }
}
