//! Pooling of per-imputation analysis-model fits by Rubin's rule.
//!
//! The final analysis model is a binary probit of the outcome on a formula
//! over each completed dataset; the per-member estimates are combined into a
//! single estimate with a between-imputation variance inflation and
//! Barnard–Rubin adjusted degrees of freedom.

use crate::design::{build_design, f64_values};
use crate::formula::ModelFormula;
use crate::impute::ImputationEnsemble;
use crate::math::probit::probit;
use crate::MnarError;
use comfy_table::{Cell, Table};
use getset::Getters;
use nalgebra::DVector;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// One per-imputation fit: point estimates and squared standard errors, in
/// term order.
#[derive(Debug, Clone)]
pub struct MemberFit {
    pub estimates: Vec<f64>,
    pub variances: Vec<f64>,
}

/// A pooled coefficient.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct PooledTerm {
    name: String,
    estimate: f64,
    std_err: f64,
    df: f64,
    t_stat: f64,
    p_value: f64,
    ci_lower: f64,
    ci_upper: f64,
}

/// The pooled analysis model.
#[derive(Debug, Clone, Getters, Serialize)]
#[getset(get = "pub")]
pub struct PooledModel {
    terms: Vec<PooledTerm>,
    imputations: usize,
}

/// Combines per-imputation fits with Rubin's rule.
///
/// `complete_df` is the complete-data degrees of freedom (n − k), used both
/// inside the Barnard–Rubin adjustment and as the reference distribution when
/// the between-imputation variance is zero.
pub fn pool(
    term_names: &[String],
    fits: &[MemberFit],
    complete_df: f64,
) -> Result<PooledModel, MnarError> {
    if fits.is_empty() {
        return Err(MnarError::Validation(
            "pool: no per-imputation fits".to_string(),
        ));
    }
    let k = term_names.len();
    for (m, fit) in fits.iter().enumerate() {
        if fit.estimates.len() != k || fit.variances.len() != k {
            return Err(MnarError::Validation(format!(
                "pool: member {} reports {} estimates and {} variances for {} terms",
                m,
                fit.estimates.len(),
                fit.variances.len(),
                k
            )));
        }
    }
    if !(complete_df > 0.0) {
        return Err(MnarError::Validation(format!(
            "pool: complete-data degrees of freedom {} must be positive",
            complete_df
        )));
    }

    let m = fits.len() as f64;
    let mut terms = Vec::with_capacity(k);
    for j in 0..k {
        let estimates: Vec<f64> = fits.iter().map(|f| f.estimates[j]).collect();
        let pooled = estimates.iter().sum::<f64>() / m;
        let within = fits.iter().map(|f| f.variances[j]).sum::<f64>() / m;
        let between = if fits.len() > 1 {
            estimates.iter().map(|e| (e - pooled).powi(2)).sum::<f64>() / (m - 1.0)
        } else {
            0.0
        };
        let total = within + (1.0 + 1.0 / m) * between;
        let std_err = total.sqrt();

        let df = if between > 0.0 && fits.len() > 1 {
            let increase = (1.0 + 1.0 / m) * between / within.max(1e-300);
            let df_old = (m - 1.0) * (1.0 + 1.0 / increase).powi(2);
            let lambda = (1.0 + 1.0 / m) * between / total;
            let df_obs =
                (complete_df + 1.0) / (complete_df + 3.0) * complete_df * (1.0 - lambda);
            1.0 / (1.0 / df_old + 1.0 / df_obs)
        } else {
            complete_df
        };

        let reference = StudentsT::new(0.0, 1.0, df.max(1.0)).map_err(|e| {
            MnarError::Validation(format!("pool: invalid reference distribution: {}", e))
        })?;
        let t_stat = if std_err > 0.0 {
            pooled / std_err
        } else {
            f64::NAN
        };
        let p_value = if t_stat.is_finite() {
            2.0 * (1.0 - reference.cdf(t_stat.abs()))
        } else {
            f64::NAN
        };
        let quantile = reference.inverse_cdf(0.975);
        terms.push(PooledTerm {
            name: term_names[j].clone(),
            estimate: pooled,
            std_err,
            df,
            t_stat,
            p_value,
            ci_lower: pooled - quantile * std_err,
            ci_upper: pooled + quantile * std_err,
        });
    }

    Ok(PooledModel {
        terms,
        imputations: fits.len(),
    })
}

/// Fits the binary-probit analysis model on every ensemble member and pools
/// the coefficients.
pub fn pooled_probit(
    ensemble: &ImputationEnsemble,
    formula: &str,
) -> Result<PooledModel, MnarError> {
    let formula = ModelFormula::parse(formula)?;
    let mut fits = Vec::with_capacity(ensemble.len());
    let mut term_names: Vec<String> = Vec::new();
    let mut complete_df = 0.0;
    for member in ensemble.members() {
        let data = member.data();
        let design = build_design(
            data,
            &formula.numeric_terms,
            &formula.categorical_terms,
            true,
        )?;
        let outcome = DVector::from_vec(f64_values(data, &formula.response)?);
        let fit = probit(&outcome, &design.matrix, 100, 1e-8)?;
        let variances = (0..design.matrix.ncols())
            .map(|j| fit.vcov[(j, j)])
            .collect();
        fits.push(MemberFit {
            estimates: fit.coefficients.iter().copied().collect(),
            variances,
        });
        complete_df = (design.matrix.nrows() - design.matrix.ncols()) as f64;
        term_names = design.names;
    }
    pool(&term_names, &fits, complete_df)
}

impl PooledModel {
    /// Prints the pooled estimates to the console.
    pub fn summary(&self) {
        println!(
            "Pooled analysis model ({} imputations, Rubin's rule)",
            self.imputations
        );
        let mut table = Table::new();
        table.set_header(vec![
            "Term", "Estimate", "Std. Err.", "df", "t", "p-value", "95% CI",
        ]);
        for term in &self.terms {
            table.add_row(vec![
                Cell::new(&term.name),
                Cell::new(format!("{:.4}", term.estimate)),
                Cell::new(format!("{:.4}", term.std_err)),
                Cell::new(format!("{:.1}", term.df)),
                Cell::new(format!("{:.3}", term.t_stat)),
                Cell::new(format!("{:.4}", term.p_value)),
                Cell::new(format!("[{:.3}, {:.3}]", term.ci_lower, term.ci_upper)),
            ]);
        }
        println!("{}", table);
    }

    /// Serializes the pooled model to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Renders the pooled model as a Markdown pipe table.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from(
            "| Term | Estimate | Std. Err. | df | t | p-value | 95% CI |\n|---|---|---|---|---|---|---|\n",
        );
        for term in &self.terms {
            out.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.1} | {:.3} | {:.4} | [{:.3}, {:.3}] |\n",
                term.name,
                term.estimate,
                term.std_err,
                term.df,
                term.t_stat,
                term.p_value,
                term.ci_lower,
                term.ci_upper
            ));
        }
        out
    }
}
