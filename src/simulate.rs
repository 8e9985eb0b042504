//! Synthetic cohort generation for examples and tests.

use crate::MnarError;
use polars::prelude::*;
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::{ContinuousCDF, Normal};

/// Configuration for [`simulate_cohort`].
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of records.
    pub rows: usize,
    /// Number of ordered levels of the ordinal variable.
    pub level_count: usize,
    /// Stratum labels; empty for no stratum column.
    pub strata: Vec<String>,
    /// Number of clusters; 0 for no cluster column.
    pub clusters: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            rows: 1000,
            level_count: 5,
            strata: Vec::new(),
            clusters: 0,
        }
    }
}

/// Simulates a cohort with an id, a continuous auxiliary covariate, a binary
/// outcome from a probit model and an ordinal variable cut from a latent
/// normal whose mean depends on the outcome and the auxiliary covariate.
/// Optional stratum and cluster columns are appended when configured.
pub fn simulate_cohort<R: Rng + ?Sized>(
    config: &SimulationConfig,
    rng: &mut R,
) -> Result<DataFrame, MnarError> {
    if config.rows == 0 {
        return Err(MnarError::Validation(
            "simulate: rows must be positive".to_string(),
        ));
    }
    if config.level_count < 2 {
        return Err(MnarError::Validation(
            "simulate: level_count must be at least 2".to_string(),
        ));
    }

    let n = config.rows;
    let k = config.level_count;
    let normal = Normal::new(0.0, 1.0).unwrap();
    // evenly spaced quantile cuts keep the marginal categories balanced
    let cuts: Vec<f64> = (1..k)
        .map(|j| normal.inverse_cdf(j as f64 / k as f64))
        .collect();

    let cluster_effects: Vec<f64> = (0..config.clusters)
        .map(|_| 0.4 * normal.sample(rng))
        .collect();

    let ids: Vec<i64> = (1..=n as i64).collect();
    let mut ages = Vec::with_capacity(n);
    let mut outcomes = Vec::with_capacity(n);
    let mut severities = Vec::with_capacity(n);
    let mut strata = Vec::with_capacity(n);
    let mut clusters = Vec::with_capacity(n);

    for _ in 0..n {
        let age: f64 = rng.gen_range(20.0..80.0);
        let outcome_prob = normal.cdf(-0.3 + 0.012 * (age - 50.0));
        let outcome: i64 = if rng.gen_bool(outcome_prob) { 1 } else { 0 };

        let cluster = if config.clusters > 0 {
            rng.gen_range(0..config.clusters)
        } else {
            0
        };
        let cluster_shift = if config.clusters > 0 {
            cluster_effects[cluster]
        } else {
            0.0
        };

        let latent = 0.45 * outcome as f64 + 0.010 * (age - 50.0) + cluster_shift
            + normal.sample(rng);
        let mut severity = k as i64;
        for (kdx, &cut) in cuts.iter().enumerate() {
            if latent <= cut {
                severity = kdx as i64 + 1;
                break;
            }
        }

        ages.push(age);
        outcomes.push(outcome);
        severities.push(severity);
        if !config.strata.is_empty() {
            strata.push(config.strata[rng.gen_range(0..config.strata.len())].clone());
        }
        if config.clusters > 0 {
            clusters.push(cluster as i64 + 1);
        }
    }

    let mut df = df!(
        "id" => ids,
        "age" => ages,
        "outcome" => outcomes,
        "severity" => severities
    )?;
    if !config.strata.is_empty() {
        df.with_column(Series::new("stratum".into(), strata))?;
    }
    if config.clusters > 0 {
        df.with_column(Series::new("cluster".into(), clusters))?;
    }
    Ok(df)
}
