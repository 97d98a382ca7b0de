use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("test_size must be in (0, 1), got {0}")]
    InvalidTestSize(f64),

    #[error("cannot split {n_samples} samples with test_size {test_size}: one side would be empty")]
    TooFewSamples { n_samples: usize, test_size: f64 },

    #[error("features have {rows} rows but labels have {labels}")]
    LengthMismatch { rows: usize, labels: usize },
}

/// Train/test split settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitConfig {
    /// Fraction of rows held out for testing.
    pub test_size: f64,
    /// Seed for the shuffle; `None` draws one from the OS.
    pub random_state: Option<u64>,
    pub shuffle: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: 0.25,
            random_state: None,
            shuffle: true,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<(), SplitError> {
        if self.test_size > 0.0 && self.test_size < 1.0 {
            Ok(())
        } else {
            Err(SplitError::InvalidTestSize(self.test_size))
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_test: Array1<f64>,
}

/// Split rows into train and test sets.
///
/// The test set has `ceil(test_size * n)` rows. With `shuffle` the rows are
/// permuted first; otherwise the last rows form the test set.
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    config: &SplitConfig,
) -> Result<TrainTestSplit, SplitError> {
    config.validate()?;
    let n = x.nrows();
    if y.len() != n {
        return Err(SplitError::LengthMismatch {
            rows: n,
            labels: y.len(),
        });
    }

    let n_test = (config.test_size * n as f64).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(SplitError::TooFewSamples {
            n_samples: n,
            test_size: config.test_size,
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    let (test_idx, train_idx) = if config.shuffle {
        let mut rng = match config.random_state {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        order.shuffle(&mut rng);
        let (test, train) = order.split_at(n_test);
        (test.to_vec(), train.to_vec())
    } else {
        let (train, test) = order.split_at(n - n_test);
        (test.to_vec(), train.to_vec())
    };

    log::debug!(
        "Split {n} rows into {} train / {} test",
        train_idx.len(),
        test_idx.len()
    );
    Ok(TrainTestSplit {
        x_train: x.select(Axis(0), &train_idx),
        x_test: x.select(Axis(0), &test_idx),
        y_train: y.select(Axis(0), &train_idx),
        y_test: y.select(Axis(0), &test_idx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| (i * 10 + j) as f64);
        let y = Array1::from_shape_fn(n, |i| (i % 2) as f64);
        (x, y)
    }

    #[test]
    fn test_split_sizes() {
        let (x, y) = data(10);
        let config = SplitConfig {
            test_size: 0.25,
            random_state: Some(42),
            shuffle: true,
        };
        let split = train_test_split(&x, &y, &config).unwrap();
        assert_eq!(split.x_test.nrows(), 3);
        assert_eq!(split.x_train.nrows(), 7);
        assert_eq!(split.y_train.len(), 7);
    }

    #[test]
    fn test_split_keeps_rows_aligned() {
        let (x, y) = data(20);
        let split = train_test_split(&x, &y, &SplitConfig::default()).unwrap();
        for (row, label) in split.x_train.rows().into_iter().zip(&split.y_train) {
            let i = (row[0] / 10.0) as usize;
            assert_eq!(*label, (i % 2) as f64);
        }
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let (x, y) = data(30);
        let config = SplitConfig {
            random_state: Some(7),
            ..Default::default()
        };
        let a = train_test_split(&x, &y, &config).unwrap();
        let b = train_test_split(&x, &y, &config).unwrap();
        assert_eq!(a.x_test, b.x_test);
        assert_eq!(a.y_train, b.y_train);
    }

    #[test]
    fn test_no_shuffle_takes_tail() {
        let (x, y) = data(4);
        let config = SplitConfig {
            test_size: 0.5,
            random_state: None,
            shuffle: false,
        };
        let split = train_test_split(&x, &y, &config).unwrap();
        assert_eq!(split.x_test.column(0).to_vec(), vec![20.0, 30.0]);
    }

    #[test]
    fn test_invalid_sizes() {
        let (x, y) = data(2);
        let bad = SplitConfig {
            test_size: 1.0,
            ..Default::default()
        };
        assert_eq!(
            train_test_split(&x, &y, &bad).unwrap_err(),
            SplitError::InvalidTestSize(1.0)
        );
        let (x1, y1) = data(1);
        assert!(matches!(
            train_test_split(&x1, &y1, &SplitConfig::default()),
            Err(SplitError::TooFewSamples { .. })
        ));
    }
}
