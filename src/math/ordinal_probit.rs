use crate::MnarError;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// A fitted cumulative (ordinal) probit model.
///
/// The latent model is `y* = x'β + ε`, `ε ~ N(0,1)`, with observed category
/// `k` whenever `τ_{k−1} < y* <= τ_k` (τ₀ = −∞, τ_K = +∞). There is no
/// intercept column: the K−1 thresholds absorb it. The joint
/// variance-covariance matrix is ordered thresholds first, then coefficients.
#[derive(Debug, Clone)]
pub struct OrdinalProbitFit {
    pub thresholds: Vec<f64>,
    pub coefficients: DVector<f64>,
    pub vcov: DMatrix<f64>,
    pub log_likelihood: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Fits a cumulative probit regression by BHHH scoring.
///
/// `y` holds categories `1..=level_count`; `x` is the n×p predictor matrix
/// without an intercept column. The outer-product information keeps every
/// step positive definite; a backtracking line search guards both the
/// likelihood and the strict ordering of the thresholds.
pub fn ordinal_probit(
    y: &[i64],
    x: &DMatrix<f64>,
    level_count: usize,
    max_iter: usize,
    tol: f64,
) -> Result<OrdinalProbitFit, MnarError> {
    let n = x.nrows();
    let p = x.ncols();
    if level_count < 2 {
        return Err(MnarError::Validation(
            "ordinal probit: level_count must be at least 2".to_string(),
        ));
    }
    if y.len() != n {
        return Err(MnarError::Validation(format!(
            "ordinal probit: outcome has {} rows but design has {}",
            y.len(),
            n
        )));
    }
    if n == 0 {
        return Err(MnarError::Validation(
            "ordinal probit: no observations".to_string(),
        ));
    }
    for &yi in y {
        if yi < 1 || yi > level_count as i64 {
            return Err(MnarError::Validation(format!(
                "ordinal probit: category {} outside 1..={}",
                yi, level_count
            )));
        }
    }

    let k1 = level_count - 1;
    let dim = k1 + p;
    let normal = Normal::new(0.0, 1.0).unwrap();

    // Start at β = 0 with thresholds from the empirical cumulative proportions.
    let mut counts = vec![0usize; level_count];
    for &yi in y {
        counts[(yi - 1) as usize] += 1;
    }
    let mut theta = DVector::zeros(dim);
    let mut cumulative = 0.0;
    let mut previous = f64::NEG_INFINITY;
    for (kdx, &count) in counts.iter().take(k1).enumerate() {
        cumulative += count as f64 / n as f64;
        let mut cut = normal.inverse_cdf(cumulative.clamp(1e-6, 1.0 - 1e-6));
        if cut <= previous {
            cut = previous + 1e-3;
        }
        theta[kdx] = cut;
        previous = cut;
    }

    let mut log_lik = log_likelihood(y, x, &theta, k1, &normal);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..max_iter {
        iterations = iter + 1;
        let (score, info) = score_and_bhhh(y, x, &theta, k1, &normal);
        let mut regularized = info;
        for j in 0..dim {
            regularized[(j, j)] += 1e-8;
        }
        let chol = regularized.cholesky().ok_or_else(|| {
            MnarError::NalgebraError(
                "ordinal probit: information matrix is singular; predictors may be collinear"
                    .to_string(),
            )
        })?;
        let step = chol.solve(&score);

        let mut scale = 1.0;
        let mut accepted = false;
        for _ in 0..30 {
            let candidate = &theta + &step * scale;
            if thresholds_increasing(&candidate, k1) {
                let candidate_lik = log_likelihood(y, x, &candidate, k1, &normal);
                if candidate_lik.is_finite() && candidate_lik >= log_lik - 1e-12 {
                    let moved = step.norm() * scale;
                    let gained = candidate_lik - log_lik;
                    theta = candidate;
                    log_lik = candidate_lik;
                    accepted = true;
                    if moved < tol || gained.abs() < tol {
                        converged = true;
                    }
                    break;
                }
            }
            scale *= 0.5;
        }
        // no step of any length improves the likelihood: treat as converged
        if !accepted {
            converged = true;
            break;
        }
        if converged {
            break;
        }
    }

    let (_, info) = score_and_bhhh(y, x, &theta, k1, &normal);
    let mut info = info;
    for j in 0..dim {
        info[(j, j)] += 1e-8;
    }
    let vcov = info
        .cholesky()
        .ok_or_else(|| {
            MnarError::NalgebraError(
                "ordinal probit: information matrix is singular at the optimum".to_string(),
            )
        })?
        .inverse();

    Ok(OrdinalProbitFit {
        thresholds: theta.as_slice()[..k1].to_vec(),
        coefficients: theta.rows(k1, p).into_owned(),
        vcov,
        log_likelihood: log_lik,
        converged,
        iterations,
    })
}

fn thresholds_increasing(theta: &DVector<f64>, k1: usize) -> bool {
    (1..k1).all(|j| theta[j] > theta[j - 1])
}

/// Per-observation interval bounds on the latent scale: τ_{k−1} − η, τ_k − η.
fn interval(theta: &DVector<f64>, k1: usize, eta: f64, category: i64) -> (f64, f64) {
    let c = category as usize;
    let lower = if c > 1 {
        theta[c - 2] - eta
    } else {
        f64::NEG_INFINITY
    };
    let upper = if c <= k1 { theta[c - 1] - eta } else { f64::INFINITY };
    (lower, upper)
}

fn cell_probability(normal: &Normal, lower: f64, upper: f64) -> f64 {
    let upper_cdf = if upper.is_infinite() { 1.0 } else { normal.cdf(upper) };
    let lower_cdf = if lower.is_infinite() { 0.0 } else { normal.cdf(lower) };
    (upper_cdf - lower_cdf).max(1e-12)
}

fn log_likelihood(
    y: &[i64],
    x: &DMatrix<f64>,
    theta: &DVector<f64>,
    k1: usize,
    normal: &Normal,
) -> f64 {
    let p = x.ncols();
    let beta = theta.rows(k1, p);
    let eta = x * beta;
    y.iter()
        .enumerate()
        .map(|(i, &yi)| {
            let (lower, upper) = interval(theta, k1, eta[i], yi);
            cell_probability(normal, lower, upper).ln()
        })
        .sum()
}

fn score_and_bhhh(
    y: &[i64],
    x: &DMatrix<f64>,
    theta: &DVector<f64>,
    k1: usize,
    normal: &Normal,
) -> (DVector<f64>, DMatrix<f64>) {
    let p = x.ncols();
    let dim = k1 + p;
    let beta = theta.rows(k1, p).into_owned();
    let eta = x * &beta;
    let mut score = DVector::zeros(dim);
    let mut info = DMatrix::zeros(dim, dim);
    let mut gradient = DVector::zeros(dim);
    for (i, &yi) in y.iter().enumerate() {
        let (lower, upper) = interval(theta, k1, eta[i], yi);
        let prob = cell_probability(normal, lower, upper);
        let upper_pdf = if upper.is_infinite() { 0.0 } else { normal.pdf(upper) };
        let lower_pdf = if lower.is_infinite() { 0.0 } else { normal.pdf(lower) };

        gradient.fill(0.0);
        let c = yi as usize;
        if c <= k1 {
            gradient[c - 1] = upper_pdf / prob;
        }
        if c > 1 {
            gradient[c - 2] -= lower_pdf / prob;
        }
        // ∂ℓ/∂η: the bounds are τ − η, so the η-derivative flips sign
        let d_eta = (lower_pdf - upper_pdf) / prob;
        for j in 0..p {
            gradient[k1 + j] = d_eta * x[(i, j)];
        }
        score += &gradient;
        info += &gradient * gradient.transpose();
    }
    (score, info)
}
