use crate::MnarError;
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// A fitted binary probit model, P(y = 1 | x) = Φ(x'β).
#[derive(Debug, Clone)]
pub struct ProbitFit {
    pub coefficients: DVector<f64>,
    pub vcov: DMatrix<f64>,
    pub log_likelihood: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// Fits a binary probit regression by Fisher scoring.
///
/// `y` must hold only 0.0 and 1.0; `x` must already carry an intercept column
/// when one is wanted. The variance-covariance matrix is the inverse of the
/// expected information at the final estimate.
pub fn probit(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    max_iter: usize,
    tol: f64,
) -> Result<ProbitFit, MnarError> {
    let n = x.nrows();
    let k = x.ncols();
    if y.len() != n {
        return Err(MnarError::Validation(format!(
            "probit: outcome has {} rows but design has {}",
            y.len(),
            n
        )));
    }
    if y.iter().any(|&v| v != 0.0 && v != 1.0) {
        return Err(MnarError::Validation(
            "probit: outcome must be coded 0/1".to_string(),
        ));
    }

    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut beta = DVector::zeros(k);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..max_iter {
        iterations = iter + 1;
        let (score, info) = score_and_information(y, x, &beta, &normal);
        let step = solve_information(&info, &score)?;
        beta += &step;
        if step.norm() < tol {
            converged = true;
            break;
        }
    }

    let (_, info) = score_and_information(y, x, &beta, &normal);
    let mut info = info;
    for j in 0..k {
        info[(j, j)] += 1e-9;
    }
    let vcov = info
        .cholesky()
        .ok_or_else(|| {
            MnarError::NalgebraError(
                "probit: information matrix is singular at the optimum".to_string(),
            )
        })?
        .inverse();

    let eta = x * &beta;
    let log_likelihood = (0..n)
        .map(|i| {
            let p = normal.cdf(eta[i]).clamp(1e-10, 1.0 - 1e-10);
            if y[i] > 0.5 {
                p.ln()
            } else {
                (1.0 - p).ln()
            }
        })
        .sum();

    Ok(ProbitFit {
        coefficients: beta,
        vcov,
        log_likelihood,
        converged,
        iterations,
    })
}

fn score_and_information(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    beta: &DVector<f64>,
    normal: &Normal,
) -> (DVector<f64>, DMatrix<f64>) {
    let n = x.nrows();
    let k = x.ncols();
    let eta = x * beta;
    let mut score = DVector::zeros(k);
    let mut info = DMatrix::zeros(k, k);
    for i in 0..n {
        let p = normal.cdf(eta[i]).clamp(1e-10, 1.0 - 1e-10);
        let d = normal.pdf(eta[i]);
        let xi = x.row(i).transpose();
        // score: φ(η)(y − Φ(η)) / (Φ(1−Φ)); expected weight: φ² / (Φ(1−Φ))
        let denom = p * (1.0 - p);
        score += &xi * (d * (y[i] - p) / denom);
        info += &xi * xi.transpose() * (d * d / denom);
    }
    (score, info)
}

fn solve_information(
    info: &DMatrix<f64>,
    score: &DVector<f64>,
) -> Result<DVector<f64>, MnarError> {
    let k = info.nrows();
    let mut regularized = info.clone();
    for j in 0..k {
        regularized[(j, j)] += 1e-9;
    }
    let chol = regularized.cholesky().ok_or_else(|| {
        MnarError::NalgebraError(
            "probit: information matrix is singular; predictors may be collinear".to_string(),
        )
    })?;
    Ok(chol.solve(score))
}
