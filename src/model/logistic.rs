//! Binary logistic regression.
//!
//! Minimises `C * sum_i s_i * logloss_i + penalty(w)` where `s_i` is the
//! sample weight implied by the class weights. The intercept is never
//! penalised.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Diagonal jitter keeping the Newton system solvable without a penalty.
const RIDGE_JITTER: f64 = 1e-10;

/// Armijo constant for the backtracking line search.
const ARMIJO: f64 = 1e-4;

/// Errors for logistic regression
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model has not been fitted yet")]
    NotFitted,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Training set is empty")]
    EmptyTrainingSet,

    #[error("Labels must be 0 or 1, found {0}")]
    InvalidLabel(f64),

    #[error("Training labels contain a single class")]
    SingleClass,

    #[error("Input contains NaN or infinite values")]
    NonFiniteInput,

    #[error("Invalid hyperparameter: {0}")]
    InvalidParameter(String),

    #[error("Newton system is singular")]
    SingularSystem,

    #[error("model file I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("model file format: {0}")]
    Format(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Hyperparameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Penalty {
    #[default]
    L2,
    L1,
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Solver {
    /// Damped Newton iterations on the full objective.
    #[default]
    Newton,
    /// Full-batch gradient descent (proximal step for L1).
    GradientDescent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightPreset {
    /// `n_samples / (2 * n_samples_in_class)`
    Balanced,
}

/// Per-class sample weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassWeight {
    Preset(WeightPreset),
    Explicit { negative: f64, positive: f64 },
}

/// Recognised hyperparameters; unknown keys are rejected when deserialising.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogisticConfig {
    /// Inverse regularization strength.
    #[serde(rename = "C")]
    pub c: f64,
    pub penalty: Penalty,
    pub solver: Solver,
    pub max_iter: usize,
    /// Convergence tolerance.
    pub tol: f64,
    pub fit_intercept: bool,
    pub class_weight: Option<ClassWeight>,
    /// Step size, gradient descent only.
    pub learning_rate: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            penalty: Penalty::L2,
            solver: Solver::Newton,
            max_iter: 100,
            tol: 1e-4,
            fit_intercept: true,
            class_weight: None,
            learning_rate: 0.01,
        }
    }
}

impl LogisticConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: String| Err(ModelError::InvalidParameter(msg));
        if !(self.c > 0.0 && self.c.is_finite()) {
            return invalid(format!("C must be a positive number, got {}", self.c));
        }
        if self.max_iter == 0 {
            return invalid("max_iter must be at least 1".into());
        }
        if !(self.tol >= 0.0) {
            return invalid(format!("tol must be non-negative, got {}", self.tol));
        }
        if !(self.learning_rate > 0.0) {
            return invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            ));
        }
        if self.penalty == Penalty::L1 && self.solver != Solver::GradientDescent {
            return invalid("penalty l1 requires solver gradient_descent".into());
        }
        if let Some(ClassWeight::Explicit { negative, positive }) = self.class_weight {
            if !(negative > 0.0 && positive > 0.0) {
                return invalid("class weights must be positive".into());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Logistic Regression classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    config: LogisticConfig,
    /// Column names the coefficients refer to, in order.
    pub feature_names: Vec<String>,
    /// Fitted coefficients
    pub coefficients: Option<Array1<f64>>,
    /// Intercept term
    pub intercept: Option<f64>,
    /// Iterations run by the last fit.
    pub n_iter: usize,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(LogisticConfig::default())
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let exp_z = z.exp();
        exp_z / (1.0 + exp_z)
    }
}

/// `ln(1 + e^z)` without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

impl LogisticRegression {
    pub fn new(config: LogisticConfig) -> Self {
        Self {
            config,
            feature_names: Vec::new(),
            coefficients: None,
            intercept: None,
            n_iter: 0,
        }
    }

    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = names;
        self
    }

    pub fn config(&self) -> &LogisticConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.coefficients.is_some()
    }

    /// Fit on `x` (n_samples x n_features) and 0/1 labels `y`.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(), ModelError> {
        self.config.validate()?;
        let (n, d) = x.dim();
        if n == 0 {
            return Err(ModelError::EmptyTrainingSet);
        }
        if y.len() != n {
            return Err(ModelError::DimensionMismatch {
                expected: n,
                got: y.len(),
            });
        }
        if !self.feature_names.is_empty() && self.feature_names.len() != d {
            return Err(ModelError::DimensionMismatch {
                expected: self.feature_names.len(),
                got: d,
            });
        }
        if let Some(&bad) = y.iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(ModelError::InvalidLabel(bad));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput);
        }
        let positives = y.iter().filter(|&&v| v == 1.0).count();
        if positives == 0 || positives == n {
            return Err(ModelError::SingleClass);
        }

        let weights = self.sample_weights(y, positives);
        let (theta, n_iter) = match self.config.solver {
            Solver::Newton => self.fit_newton(x, y, &weights)?,
            Solver::GradientDescent => self.fit_gradient_descent(x, y, &weights),
        };

        self.coefficients = Some(theta.slice(ndarray::s![..d]).to_owned());
        self.intercept = Some(if self.config.fit_intercept { theta[d] } else { 0.0 });
        self.n_iter = n_iter;
        log::debug!("Logistic regression fitted in {n_iter} iterations");
        Ok(())
    }

    fn sample_weights(&self, y: &Array1<f64>, positives: usize) -> Array1<f64> {
        let n = y.len() as f64;
        let (neg_w, pos_w) = match self.config.class_weight {
            None => (1.0, 1.0),
            Some(ClassWeight::Preset(WeightPreset::Balanced)) => (
                n / (2.0 * (y.len() - positives) as f64),
                n / (2.0 * positives as f64),
            ),
            Some(ClassWeight::Explicit { negative, positive }) => (negative, positive),
        };
        y.mapv(|v| if v == 1.0 { pos_w } else { neg_w })
    }

    /// Append a column of ones when fitting an intercept.
    fn design(&self, x: &Array2<f64>) -> Array2<f64> {
        if !self.config.fit_intercept {
            return x.to_owned();
        }
        let (n, d) = x.dim();
        let mut xa = Array2::<f64>::ones((n, d + 1));
        xa.slice_mut(ndarray::s![.., ..d]).assign(x);
        xa
    }

    /// 1.0 for penalised parameters, 0.0 for the intercept / no penalty.
    fn penalty_mask(&self, d: usize, p: usize) -> Array1<f64> {
        let on = if self.config.penalty == Penalty::L2 { 1.0 } else { 0.0 };
        Array1::from_shape_fn(p, |j| if j < d { on } else { 0.0 })
    }

    fn objective(
        &self,
        xa: &Array2<f64>,
        y: &Array1<f64>,
        sw: &Array1<f64>,
        theta: &Array1<f64>,
        mask: &Array1<f64>,
    ) -> f64 {
        let z = xa.dot(theta);
        let loss: f64 = z
            .iter()
            .zip(y)
            .zip(sw)
            .map(|((&z, &y), &s)| s * (softplus(z) - y * z))
            .sum();
        let reg: f64 = theta.iter().zip(mask).map(|(t, m)| m * t * t).sum();
        self.config.c * loss + 0.5 * reg
    }

    fn fit_newton(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        sw: &Array1<f64>,
    ) -> Result<(Array1<f64>, usize), ModelError> {
        let c = self.config.c;
        let d = x.ncols();
        let xa = self.design(x);
        let p = xa.ncols();
        let mask = self.penalty_mask(d, p);
        let scale = c * sw.sum();
        let mut theta = Array1::<f64>::zeros(p);

        for iter in 0..self.config.max_iter {
            let prob = xa.dot(&theta).mapv(sigmoid);
            let resid = (&prob - y) * sw;
            let grad = xa.t().dot(&resid) * c + &(&theta * &mask);

            let grad_norm = grad.iter().fold(0.0f64, |m, g| m.max(g.abs())) / scale;
            if grad_norm <= self.config.tol {
                return Ok((theta, iter));
            }

            let curvature = prob.mapv(|q| q * (1.0 - q)) * sw * c;
            let weighted = &xa * &curvature.view().insert_axis(Axis(1));
            let mut hessian = xa.t().dot(&weighted);
            for j in 0..p {
                hessian[[j, j]] += mask[j] + RIDGE_JITTER;
            }
            let step = solve(hessian, grad.clone())?;

            // Backtracking keeps every iteration a descent step.
            let f0 = self.objective(&xa, y, sw, &theta, &mask);
            let slope = grad.dot(&step);
            let mut t = 1.0;
            loop {
                let candidate = &theta - &(&step * t);
                let f = self.objective(&xa, y, sw, &candidate, &mask);
                if f <= f0 - ARMIJO * t * slope || t < 1e-10 {
                    theta = candidate;
                    break;
                }
                t *= 0.5;
            }
        }

        log::warn!(
            "Logistic regression did not converge in {} iterations",
            self.config.max_iter
        );
        Ok((theta, self.config.max_iter))
    }

    fn fit_gradient_descent(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        sw: &Array1<f64>,
    ) -> (Array1<f64>, usize) {
        let d = x.ncols();
        let lr = self.config.learning_rate;
        let sw_sum = sw.sum();
        // Objective divided by C * sum(sw) so the step size is scale-free.
        let reg = 1.0 / (self.config.c * sw_sum);

        let mut weights = Array1::<f64>::zeros(d);
        let mut bias = 0.0;
        let mut prev_cost: Option<f64> = None;

        for iter in 0..self.config.max_iter {
            let z = x.dot(&weights) + bias;
            let prob = z.mapv(sigmoid);
            let resid = (&prob - y) * sw / sw_sum;

            let mut dw = x.t().dot(&resid);
            let db = resid.sum();
            if self.config.penalty == Penalty::L2 {
                dw = dw + &(&weights * reg);
            }

            weights = &weights - &(&dw * lr);
            if self.config.fit_intercept {
                bias -= lr * db;
            }
            if self.config.penalty == Penalty::L1 {
                let threshold = lr * reg;
                weights.mapv_inplace(|w| w.signum() * (w.abs() - threshold).max(0.0));
            }

            let z = x.dot(&weights) + bias;
            let loss: f64 = z
                .iter()
                .zip(y)
                .zip(sw)
                .map(|((&z, &y), &s)| s * (softplus(z) - y * z))
                .sum::<f64>()
                / sw_sum;
            let penalty = match self.config.penalty {
                Penalty::L2 => 0.5 * reg * weights.dot(&weights),
                Penalty::L1 => reg * weights.iter().map(|w| w.abs()).sum::<f64>(),
                Penalty::None => 0.0,
            };
            let cost = loss + penalty;

            if let Some(prev) = prev_cost {
                if (prev - cost).abs() < self.config.tol {
                    log::debug!("Converged at iteration {}", iter);
                    let mut theta = weights.to_vec();
                    theta.push(bias);
                    return (Array1::from_vec(theta), iter + 1);
                }
            }
            prev_cost = Some(cost);
        }

        log::warn!(
            "Gradient descent did not converge in {} iterations",
            self.config.max_iter
        );
        let mut theta = weights.to_vec();
        theta.push(bias);
        (Array1::from_vec(theta), self.config.max_iter)
    }

    /// Get decision function values (log-odds)
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        let weights = self.coefficients.as_ref().ok_or(ModelError::NotFitted)?;
        let bias = self.intercept.ok_or(ModelError::NotFitted)?;
        if x.ncols() != weights.len() {
            return Err(ModelError::DimensionMismatch {
                expected: weights.len(),
                got: x.ncols(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput);
        }
        Ok(x.dot(weights) + bias)
    }

    /// Probability of the positive class.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        Ok(self.decision_function(x)?.mapv(sigmoid))
    }

    /// Predict class labels (0 or 1): positive when the log-odds are > 0.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        Ok(self
            .decision_function(x)?
            .mapv(|z| if z > 0.0 { 1.0 } else { 0.0 }))
    }

    /// Coefficients paired with their feature names.
    pub fn named_coefficients(&self) -> Vec<(String, f64)> {
        let Some(coef) = &self.coefficients else {
            return Vec::new();
        };
        coef.iter()
            .enumerate()
            .map(|(i, &c)| {
                let name = self
                    .feature_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("x{i}"));
                (name, c)
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Fit a model and, when `save_path` is given, persist it there as well.
pub fn fit_logistic_regression(
    x: &Array2<f64>,
    y: &Array1<f64>,
    feature_names: Vec<String>,
    config: &LogisticConfig,
    save_path: Option<&Path>,
) -> Result<LogisticRegression, ModelError> {
    let mut model = LogisticRegression::new(config.clone()).with_feature_names(feature_names);
    model.fit(x, y)?;
    log::info!("Logistic Regression fitted");
    for (name, c) in model.named_coefficients() {
        log::debug!("  {name:<32} {c:>12.6}");
    }

    if let Some(path) = save_path {
        model.save(path)?;
        log::info!("Trained model object saved to {}", path.display());
    }
    Ok(model)
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if !(a[[pivot, col]].abs() > f64::MIN_POSITIVE) {
            return Err(ModelError::SingularSystem);
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}
