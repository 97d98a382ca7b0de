//! Classification metrics for the binary cloud classifier
//!
//! Scores follow the usual library definitions: AUC from the positive-class
//! probability, everything else from the thresholded prediction.

use std::fmt;
use std::path::Path;

use anyhow::Context;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::logistic::{LogisticRegression, ModelError};

pub const AUC_ACCURACY_FILE: &str = "auc_accuracy.txt";
pub const CLASS_REPORT_FILE: &str = "class_report.txt";
pub const CONFUSION_FILE: &str = "confusion.csv";

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("no samples to score")]
    Empty,

    #[error("{labels} labels but {scores} scores")]
    LengthMismatch { labels: usize, scores: usize },

    #[error("labels must be 0 or 1, found {0}")]
    InvalidLabel(f64),

    #[error("AUC is undefined when only one class is present")]
    SingleClass,

    #[error("score at row {0} is not a finite number")]
    NonFiniteScore(usize),

    #[error(transparent)]
    Model(#[from] ModelError),
}

// ---------------------------------------------------------------------------
// Confusion matrix
// ---------------------------------------------------------------------------

/// Confusion matrix for binary classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    /// True negatives
    pub tn: usize,
    /// False positives
    pub fp: usize,
    /// False negatives
    pub fn_: usize,
    /// True positives
    pub tp: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        let mut cm = ConfusionMatrix {
            tn: 0,
            fp: 0,
            fn_: 0,
            tp: 0,
        };
        for (&t, &p) in y_true.iter().zip(y_pred) {
            match (t == 1.0, p == 1.0) {
                (true, true) => cm.tp += 1,
                (false, false) => cm.tn += 1,
                (false, true) => cm.fp += 1,
                (true, false) => cm.fn_ += 1,
            }
        }
        cm
    }

    /// Rows are actual {negative, positive}, columns predicted {negative, positive}.
    pub fn as_array(&self) -> [[usize; 2]; 2] {
        [[self.tn, self.fp], [self.fn_, self.tp]]
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }
}

// ---------------------------------------------------------------------------
// Classification report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassScores {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Per-class precision / recall / F1 plus averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub negative: ClassScores,
    pub positive: ClassScores,
    pub accuracy: f64,
    pub macro_avg: ClassScores,
    pub weighted_avg: ClassScores,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn class_scores(tp: usize, fp: usize, fn_: usize) -> ClassScores {
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    ClassScores {
        precision,
        recall,
        f1,
        support: tp + fn_,
    }
}

impl ClassificationReport {
    pub fn from_confusion(cm: &ConfusionMatrix) -> Self {
        let negative = class_scores(cm.tn, cm.fn_, cm.fp);
        let positive = class_scores(cm.tp, cm.fp, cm.fn_);
        let total = cm.total();

        let macro_avg = ClassScores {
            precision: (negative.precision + positive.precision) / 2.0,
            recall: (negative.recall + positive.recall) / 2.0,
            f1: (negative.f1 + positive.f1) / 2.0,
            support: total,
        };
        let weigh = |f: fn(&ClassScores) -> f64| {
            if total == 0 {
                0.0
            } else {
                (f(&negative) * negative.support as f64 + f(&positive) * positive.support as f64)
                    / total as f64
            }
        };
        let weighted_avg = ClassScores {
            precision: weigh(|s| s.precision),
            recall: weigh(|s| s.recall),
            f1: weigh(|s| s.f1),
            support: total,
        };

        ClassificationReport {
            negative,
            positive,
            accuracy: ratio(cm.tp + cm.tn, total),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    /// Same layout as the text report of the common Python ML toolkit.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let row = |f: &mut fmt::Formatter<'_>, name: &str, s: &ClassScores| {
            writeln!(
                f,
                "{name:>12}  {:>9.2} {:>9.2} {:>9.2} {:>9}",
                s.precision, s.recall, s.f1, s.support
            )
        };

        writeln!(
            f,
            "{:>12}  {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        row(f, "0.0", &self.negative)?;
        row(f, "1.0", &self.positive)?;
        writeln!(f)?;
        writeln!(
            f,
            "{:>12}  {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        row(f, "macro avg", &self.macro_avg)?;
        row(f, "weighted avg", &self.weighted_avg)
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub auc: f64,
    pub accuracy: f64,
    pub confusion_matrix: ConfusionMatrix,
    pub classification_report: ClassificationReport,
}

impl Metrics {
    /// Score positive-class probabilities against 0/1 labels. A sample is
    /// predicted positive when its probability is above 0.5.
    pub fn from_probabilities(
        y_true: &Array1<f64>,
        proba: &Array1<f64>,
    ) -> Result<Self, MetricsError> {
        let y_pred = proba.mapv(|p| if p > 0.5 { 1.0 } else { 0.0 });
        Self::from_predictions(y_true, &y_pred, proba)
    }

    pub fn from_predictions(
        y_true: &Array1<f64>,
        y_pred: &Array1<f64>,
        proba: &Array1<f64>,
    ) -> Result<Self, MetricsError> {
        if y_true.is_empty() {
            return Err(MetricsError::Empty);
        }
        for other in [y_pred.len(), proba.len()] {
            if other != y_true.len() {
                return Err(MetricsError::LengthMismatch {
                    labels: y_true.len(),
                    scores: other,
                });
            }
        }
        if let Some(&bad) = y_true.iter().find(|&&v| v != 0.0 && v != 1.0) {
            return Err(MetricsError::InvalidLabel(bad));
        }

        let confusion_matrix = ConfusionMatrix::from_predictions(y_true, y_pred);
        let classification_report = ClassificationReport::from_confusion(&confusion_matrix);
        Ok(Metrics {
            auc: auc_roc(y_true, proba)?,
            accuracy: classification_report.accuracy,
            confusion_matrix,
            classification_report,
        })
    }
}

/// Score a fitted model on held-out data.
pub fn score(
    x_test: &Array2<f64>,
    y_test: &Array1<f64>,
    model: &LogisticRegression,
) -> Result<Metrics, MetricsError> {
    let proba = model.predict_proba(x_test)?;
    let y_pred = model.predict(x_test)?;
    Metrics::from_predictions(y_test, &y_pred, &proba)
}

/// AUC-ROC by the trapezoid rule over distinct score thresholds; tied
/// scores count half.
pub fn auc_roc(y_true: &Array1<f64>, y_proba: &Array1<f64>) -> Result<f64, MetricsError> {
    let mut pairs: Vec<(f64, bool)> = y_proba
        .iter()
        .zip(y_true)
        .map(|(&p, &t)| (p, t == 1.0))
        .collect();
    if let Some(row) = y_proba.iter().position(|p| !p.is_finite()) {
        return Err(MetricsError::NonFiniteScore(row));
    }
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let n_pos = pairs.iter().filter(|(_, t)| *t).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return Err(MetricsError::SingleClass);
    }

    let (mut tp, mut fp) = (0.0, 0.0);
    let (mut tpr_prev, mut fpr_prev) = (0.0, 0.0);
    let mut auc = 0.0;
    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].0;
        while i < pairs.len() && pairs[i].0.total_cmp(&score).is_eq() {
            if pairs[i].1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let (tpr, fpr) = (tp / n_pos, fp / n_neg);
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }
    Ok(auc)
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Round to 3 decimals, halves to even, judged on the exact binary value
/// rather than on the rounded product.
fn round3(x: f64) -> f64 {
    let scaled = x * 1000.0;
    let residual = x.mul_add(1000.0, -scaled);
    let rounded = if (scaled - scaled.trunc()).abs() == 0.5 && residual != 0.0 {
        if residual > 0.0 { scaled.ceil() } else { scaled.floor() }
    } else {
        scaled.round_ties_even()
    };
    rounded / 1000.0
}

/// Decimal text of a metric; whole numbers keep a trailing `.0`.
fn metric_text(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        x.to_string()
    }
}

/// Parsed content of `auc_accuracy.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AucAccuracy {
    #[serde(rename = "AUC")]
    pub auc: f64,
    #[serde(rename = "Accuracy")]
    pub accuracy: f64,
}

/// Write `auc_accuracy.txt`, `class_report.txt` and `confusion.csv` into `dir`.
pub fn write_metrics(metrics: &Metrics, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating metrics directory {}", dir.display()))?;

    let summary = format!(
        "AUC: {} \nAccuracy: {} \n\n",
        metric_text(round3(metrics.auc)),
        metric_text(round3(metrics.accuracy))
    );
    std::fs::write(dir.join(AUC_ACCURACY_FILE), summary).context("writing AUC/accuracy")?;

    std::fs::write(
        dir.join(CLASS_REPORT_FILE),
        metrics.classification_report.to_string(),
    )
    .context("writing classification report")?;

    let mut writer =
        csv::Writer::from_path(dir.join(CONFUSION_FILE)).context("creating confusion csv")?;
    writer.write_record(["", "Predicted negative", "Predicted positive"])?;
    let [[tn, fp], [fn_, tp]] = metrics.confusion_matrix.as_array();
    writer.write_record(["Actual negative".to_string(), tn.to_string(), fp.to_string()])?;
    writer.write_record(["Actual positive".to_string(), fn_.to_string(), tp.to_string()])?;
    writer.flush()?;

    log::info!("Model metrics saved in {}", dir.display());
    Ok(())
}

/// Read back the AUC / accuracy summary.
pub fn read_auc_accuracy(path: &Path) -> anyhow::Result<AucAccuracy> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading metrics from {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing metrics in {}", path.display()))
}
