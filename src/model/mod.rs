/// Model layer: classifier, data split and scoring.
///
/// ```text
///   FeatureTable ──► (X, y)
///                      │
///                      ▼
///               ┌─────────────┐
///               │    split    │  train / test rows
///               └─────────────┘
///                      │
///                      ▼
///               ┌─────────────┐
///               │  logistic   │  fit, predict_proba, save / load
///               └─────────────┘
///                      │
///                      ▼
///               ┌─────────────┐
///               │   metrics   │  AUC, accuracy, confusion, report
///               └─────────────┘
/// ```

pub mod logistic;
pub mod metrics;
pub mod split;

pub use logistic::{
    ClassWeight, LogisticConfig, LogisticRegression, ModelError, Penalty, Solver, WeightPreset,
    fit_logistic_regression,
};
pub use metrics::{Metrics, MetricsError, score, write_metrics};
pub use split::{SplitConfig, SplitError, TrainTestSplit, train_test_split};
