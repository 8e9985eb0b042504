//! Multiple imputation of the ordinal column under MAR.
//!
//! Two engines implement the same [`Imputer`] contract: a single-level
//! chained-equations engine and a two-level variant with cluster random
//! intercepts. Both fit a cumulative probit of the target on the formula's
//! predictors over the observed rows, then per member draw parameters from
//! the large-sample posterior approximation, draw a latent score per missing
//! row and assign the category whose threshold interval contains it.

use crate::design::{build_design, opt_i64_values, str_values, DesignMatrix};
use crate::formula::ModelFormula;
use crate::math::ordinal_probit::{ordinal_probit, OrdinalProbitFit};
use crate::MnarError;
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use polars::prelude::*;
use rand::distributions::Distribution;
use rand::RngCore;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use std::collections::BTreeMap;

/// Imputation configuration shared by both engines.
#[derive(Debug, Clone)]
pub struct ImputeConfig {
    /// Number of completed datasets to produce.
    pub imputations: usize,
    /// Iteration cap for the ordinal probit fit.
    pub max_iter: usize,
    /// Convergence tolerance for the ordinal probit fit.
    pub tol: f64,
}

impl Default for ImputeConfig {
    fn default() -> Self {
        Self {
            imputations: 5,
            max_iter: 200,
            tol: 1e-8,
        }
    }
}

/// One completed dataset plus the fit artifacts the relabeler consumes.
#[derive(Debug, Clone)]
pub struct ImputedMember {
    data: DataFrame,
    thresholds: Vec<f64>,
    linear_predictor: Vec<f64>,
}

impl ImputedMember {
    /// Assembles a member from a completed dataset, its fitted thresholds and
    /// its per-record linear predictor. Threshold ordering is deliberately
    /// not checked here: the relabeler validates it and reports the member.
    pub fn new(
        data: DataFrame,
        thresholds: Vec<f64>,
        linear_predictor: Vec<f64>,
    ) -> Result<Self, MnarError> {
        if linear_predictor.len() != data.height() {
            return Err(MnarError::Validation(format!(
                "imputed member: {} linear-predictor values for {} rows",
                linear_predictor.len(),
                data.height()
            )));
        }
        Ok(Self {
            data,
            thresholds,
            linear_predictor,
        })
    }

    pub fn data(&self) -> &DataFrame {
        &self.data
    }

    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    pub fn linear_predictor(&self) -> &[f64] {
        &self.linear_predictor
    }
}

/// An ordered collection of M completed datasets produced under MAR.
///
/// Members are extracted either by index ([`member`](Self::member)) or as a
/// slice ([`members`](Self::members)); both styles expose the same data.
#[derive(Debug, Clone)]
pub struct ImputationEnsemble {
    members: Vec<ImputedMember>,
    ordinal_column: String,
    level_count: usize,
}

impl ImputationEnsemble {
    pub fn from_members(
        members: Vec<ImputedMember>,
        ordinal_column: &str,
        level_count: usize,
    ) -> Result<Self, MnarError> {
        if members.is_empty() {
            return Err(MnarError::Validation(
                "imputation ensemble: no members".to_string(),
            ));
        }
        if level_count < 2 {
            return Err(MnarError::Validation(
                "imputation ensemble: level_count must be at least 2".to_string(),
            ));
        }
        Ok(Self {
            members,
            ordinal_column: ordinal_column.to_string(),
            level_count,
        })
    }

    pub fn member(&self, index: usize) -> Option<&ImputedMember> {
        self.members.get(index)
    }

    pub fn members(&self) -> &[ImputedMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Name of the completed ordinal column.
    pub fn ordinal_column(&self) -> &str {
        &self.ordinal_column
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }
}

/// A multiple-imputation engine.
pub trait Imputer {
    /// Fills the nulls of the formula's response column under MAR and
    /// reports the fitted thresholds and per-record linear predictor of
    /// every completed dataset.
    fn impute(
        &self,
        df: &DataFrame,
        config: &ImputeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<ImputationEnsemble, MnarError>;
}

/// Single-level chained-equations engine.
#[derive(Debug, Clone)]
pub struct ChainedEquationsImputer {
    formula: ModelFormula,
    level_count: usize,
}

impl ChainedEquationsImputer {
    pub fn new(formula: &str, level_count: usize) -> Result<Self, MnarError> {
        Ok(Self {
            formula: ModelFormula::parse(formula)?,
            level_count,
        })
    }
}

impl Imputer for ChainedEquationsImputer {
    fn impute(
        &self,
        df: &DataFrame,
        config: &ImputeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<ImputationEnsemble, MnarError> {
        fit_and_complete(df, &self.formula, self.level_count, None, config, rng)
    }
}

/// Two-level engine: the conditional model gains a per-cluster random
/// intercept, approximated by empirical-Bayes shrinkage of the mean latent
/// residual within each cluster.
#[derive(Debug, Clone)]
pub struct MultilevelImputer {
    formula: ModelFormula,
    level_count: usize,
    cluster: String,
}

impl MultilevelImputer {
    pub fn new(formula: &str, level_count: usize, cluster: &str) -> Result<Self, MnarError> {
        Ok(Self {
            formula: ModelFormula::parse(formula)?,
            level_count,
            cluster: cluster.to_string(),
        })
    }
}

impl Imputer for MultilevelImputer {
    fn impute(
        &self,
        df: &DataFrame,
        config: &ImputeConfig,
        rng: &mut dyn RngCore,
    ) -> Result<ImputationEnsemble, MnarError> {
        fit_and_complete(
            df,
            &self.formula,
            self.level_count,
            Some(&self.cluster),
            config,
            rng,
        )
    }
}

fn fit_and_complete(
    df: &DataFrame,
    formula: &ModelFormula,
    level_count: usize,
    cluster: Option<&str>,
    config: &ImputeConfig,
    rng: &mut dyn RngCore,
) -> Result<ImputationEnsemble, MnarError> {
    if config.imputations == 0 {
        return Err(MnarError::Validation(
            "impute: at least one imputation is required".to_string(),
        ));
    }
    let target = &formula.response;
    let values = opt_i64_values(df, target)?;
    let n = df.height();
    let k1 = level_count - 1;

    for v in values.iter().flatten() {
        if *v < 1 || *v > level_count as i64 {
            return Err(MnarError::Validation(format!(
                "impute: observed category {} outside 1..={} in '{}'",
                v, level_count, target
            )));
        }
    }
    let observed_idx: Vec<usize> = (0..n).filter(|&i| values[i].is_some()).collect();
    if observed_idx.is_empty() {
        return Err(MnarError::Validation(format!(
            "impute: column '{}' has no observed values",
            target
        )));
    }

    // thresholds absorb the intercept
    let design = build_design(df, &formula.numeric_terms, &formula.categorical_terms, false)?;
    let p = design.matrix.ncols();
    let x_observed = DMatrix::from_fn(observed_idx.len(), p, |r, c| {
        design.matrix[(observed_idx[r], c)]
    });
    let y_observed: Vec<i64> = observed_idx.iter().map(|&i| values[i].unwrap()).collect();

    let fit = ordinal_probit(&y_observed, &x_observed, level_count, config.max_iter, config.tol)?;
    if !fit.converged {
        warn!(
            "impute: ordinal probit did not converge in {} iterations; draws use the last iterate",
            fit.iterations
        );
    }

    let offsets = match cluster {
        Some(cluster_column) => {
            cluster_offsets(df, &fit, &design, &values, cluster_column, level_count)?
        }
        None => vec![0.0; n],
    };

    let dim = k1 + p;
    let mut theta_hat = DVector::zeros(dim);
    for (kdx, &cut) in fit.thresholds.iter().enumerate() {
        theta_hat[kdx] = cut;
    }
    for j in 0..p {
        theta_hat[k1 + j] = fit.coefficients[j];
    }
    let posterior_root = {
        let mut vcov = fit.vcov.clone();
        for j in 0..dim {
            vcov[(j, j)] += 1e-10;
        }
        vcov.cholesky()
    };
    if posterior_root.is_none() {
        warn!("impute: fit covariance is not positive definite; posterior draws collapse to the ML estimate");
    }

    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut members = Vec::with_capacity(config.imputations);
    for member in 0..config.imputations {
        let theta = match &posterior_root {
            Some(root) => draw_ordered_theta(&theta_hat, root, k1, &normal, rng),
            None => theta_hat.clone(),
        };
        let tau: Vec<f64> = theta.as_slice()[..k1].to_vec();
        let beta = theta.rows(k1, p).into_owned();
        let lp_vec = &design.matrix * &beta;
        let linear_predictor: Vec<f64> = (0..n).map(|i| lp_vec[i] + offsets[i]).collect();

        let mut completed: Vec<i64> = Vec::with_capacity(n);
        for i in 0..n {
            match values[i] {
                Some(v) => completed.push(v),
                None => {
                    let latent = linear_predictor[i] + normal.sample(rng);
                    completed.push(assign_category(latent, &tau, level_count));
                }
            }
        }
        debug!(
            "impute: member {} completed {} missing cells",
            member,
            n - observed_idx.len()
        );

        let mut data = df.clone();
        data.with_column(Series::new(target.as_str().into(), completed))?;
        members.push(ImputedMember::new(data, tau, linear_predictor)?);
    }

    ImputationEnsemble::from_members(members, target, level_count)
}

/// Smallest category whose upper threshold bounds the latent score;
/// `score <= τ_k` ties to the lower category, +∞ closes the top interval.
fn assign_category(latent: f64, thresholds: &[f64], level_count: usize) -> i64 {
    for (kdx, &cut) in thresholds.iter().enumerate() {
        if latent <= cut {
            return kdx as i64 + 1;
        }
    }
    level_count as i64
}

/// One draw from N(θ̂, V̂), rejecting draws whose thresholds lose their strict
/// ordering; after bounded retries the ML estimate is used.
fn draw_ordered_theta(
    theta_hat: &DVector<f64>,
    root: &nalgebra::Cholesky<f64, nalgebra::Dyn>,
    k1: usize,
    normal: &Normal,
    rng: &mut dyn RngCore,
) -> DVector<f64> {
    for _ in 0..20 {
        let z = DVector::from_fn(theta_hat.len(), |_, _| normal.sample(rng));
        let candidate = theta_hat + root.l() * z;
        if (1..k1).all(|j| candidate[j] > candidate[j - 1]) {
            return candidate;
        }
    }
    warn!("impute: posterior draw kept non-increasing thresholds after 20 tries; using the ML estimate");
    theta_hat.clone()
}

/// Empirical-Bayes cluster intercepts on the latent scale.
///
/// For each observed row the conditional mean latent residual given its
/// category is the truncated-normal mean over the fitted interval; cluster
/// means of those residuals are shrunk by n_j σ̂_b² / (n_j σ̂_b² + σ̂_w²).
fn cluster_offsets(
    df: &DataFrame,
    fit: &OrdinalProbitFit,
    design: &DesignMatrix,
    values: &[Option<i64>],
    cluster_column: &str,
    level_count: usize,
) -> Result<Vec<f64>, MnarError> {
    let clusters = str_values(df, cluster_column)?;
    let n = df.height();
    let normal = Normal::new(0.0, 1.0).unwrap();
    let lp = &design.matrix * &fit.coefficients;
    let k1 = level_count - 1;

    let mut residuals: BTreeMap<&String, Vec<f64>> = BTreeMap::new();
    for i in 0..n {
        let Some(category) = values[i] else { continue };
        let c = category as usize;
        let lower = if c > 1 {
            fit.thresholds[c - 2] - lp[i]
        } else {
            f64::NEG_INFINITY
        };
        let upper = if c <= k1 {
            fit.thresholds[c - 1] - lp[i]
        } else {
            f64::INFINITY
        };
        let lower_cdf = if lower.is_infinite() { 0.0 } else { normal.cdf(lower) };
        let upper_cdf = if upper.is_infinite() { 1.0 } else { normal.cdf(upper) };
        let mass = (upper_cdf - lower_cdf).max(1e-12);
        let lower_pdf = if lower.is_infinite() { 0.0 } else { normal.pdf(lower) };
        let upper_pdf = if upper.is_infinite() { 0.0 } else { normal.pdf(upper) };
        residuals
            .entry(&clusters[i])
            .or_default()
            .push((lower_pdf - upper_pdf) / mass);
    }
    if residuals.is_empty() {
        return Ok(vec![0.0; n]);
    }

    let cluster_means: BTreeMap<&String, (f64, usize)> = residuals
        .iter()
        .map(|(key, rs)| {
            let mean = rs.iter().sum::<f64>() / rs.len() as f64;
            (*key, (mean, rs.len()))
        })
        .collect();

    // moment estimates: pooled within-cluster variance and the excess
    // between-cluster variance of the means
    let mut within_sum = 0.0;
    let mut within_n = 0usize;
    for (key, rs) in &residuals {
        let (mean, _) = cluster_means[key];
        within_sum += rs.iter().map(|r| (r - mean).powi(2)).sum::<f64>();
        within_n += rs.len();
    }
    let sigma_w2 = if within_n > residuals.len() {
        (within_sum / (within_n - residuals.len()) as f64).max(1e-6)
    } else {
        1.0
    };
    let grand = cluster_means.values().map(|(m, _)| m).sum::<f64>() / cluster_means.len() as f64;
    let mean_var = cluster_means
        .values()
        .map(|(m, _)| (m - grand).powi(2))
        .sum::<f64>()
        / cluster_means.len().max(1) as f64;
    let mean_noise = cluster_means
        .values()
        .map(|(_, count)| sigma_w2 / *count as f64)
        .sum::<f64>()
        / cluster_means.len() as f64;
    let sigma_b2 = (mean_var - mean_noise).max(0.0);
    if sigma_b2 == 0.0 {
        debug!("impute: no between-cluster variance detected; offsets are zero");
        return Ok(vec![0.0; n]);
    }

    Ok((0..n)
        .map(|i| match cluster_means.get(&clusters[i]) {
            Some((mean, count)) => {
                let weight = *count as f64 * sigma_b2 / (*count as f64 * sigma_b2 + sigma_w2);
                weight * mean
            }
            None => 0.0,
        })
        .collect())
}
