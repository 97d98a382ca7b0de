//! YAML configuration for the pipeline stages.
//!
//! Every section is optional at parse time; a stage asks for the sections it
//! needs and gets [`ConfigError::MissingKey`] when one is absent.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::data::raw::LineRange;
use crate::model::{LogisticConfig, SplitConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("configuration has no '{0}' section")]
    MissingKey(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AcquireConfig {
    pub url: String,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
}

/// Line ranges of the two classes in the raw file plus the column names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanConfig {
    pub c1_start_ix: usize,
    pub c1_end_ix: usize,
    pub c2_start_ix: usize,
    pub c2_end_ix: usize,
    pub column_names: Vec<String>,
}

impl CleanConfig {
    pub fn class1_range(&self) -> LineRange {
        LineRange::new(self.c1_start_ix, self.c1_end_ix)
    }

    pub fn class2_range(&self) -> LineRange {
        LineRange::new(self.c2_start_ix, self.c2_end_ix)
    }
}

fn default_features_path() -> PathBuf {
    PathBuf::from("data/features.csv")
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("metrics/auc_accuracy.txt")
}

/// Expectations for the reproducibility check.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub dependent_cols: Vec<String>,
    pub new_features: Vec<String>,
    pub expected_auc: f64,
    pub expected_accuracy: f64,
    #[serde(default = "default_features_path")]
    pub features_path: PathBuf,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub acquire: Option<AcquireConfig>,
    #[serde(default)]
    pub clean: Option<CleanConfig>,
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub train_test_split: SplitConfig,
    #[serde(default)]
    pub lr_config: LogisticConfig,
    #[serde(default)]
    pub check: Option<CheckConfig>,
}

impl PipelineConfig {
    pub fn acquire(&self) -> Result<&AcquireConfig, ConfigError> {
        self.acquire.as_ref().ok_or(ConfigError::MissingKey("acquire"))
    }

    pub fn clean(&self) -> Result<&CleanConfig, ConfigError> {
        self.clean.as_ref().ok_or(ConfigError::MissingKey("clean"))
    }

    pub fn features(&self) -> Result<&[String], ConfigError> {
        self.features
            .as_deref()
            .ok_or(ConfigError::MissingKey("features"))
    }

    pub fn check(&self) -> Result<&CheckConfig, ConfigError> {
        self.check.as_ref().ok_or(ConfigError::MissingKey("check"))
    }

    /// Reject hyperparameters the fitting stages would refuse later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.train_test_split
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("train_test_split: {e}")))?;
        self.lr_config
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("lr_config: {e}")))?;
        if let Some(clean) = &self.clean {
            if clean.column_names.is_empty() {
                return Err(ConfigError::Invalid(
                    "clean.column_names is empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Load and validate a [`PipelineConfig`] from a YAML file.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PipelineConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    log::debug!("Configuration loaded from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Penalty, Solver};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_yaml(yaml: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        f
    }

    const FULL: &str = r#"
acquire:
  url: https://example.org/cloud.data
  save_path: data/cloud.data
clean:
  c1_start_ix: 53
  c1_end_ix: 1077
  c2_start_ix: 1082
  c2_end_ix: 2105
  column_names: [visible_mean, visible_max, visible_min]
features: [visible_mean, visible_range, IR_norm_range]
train_test_split:
  test_size: 0.4
  random_state: 42
lr_config:
  C: 0.5
  max_iter: 200
check:
  dependent_cols: [visible_max, visible_min]
  new_features: [visible_range]
  expected_auc: 0.9
  expected_accuracy: 0.85
"#;

    #[test]
    fn test_load_full_config() {
        let f = write_yaml(FULL);
        let config = load_config(f.path()).unwrap();

        assert_eq!(config.acquire().unwrap().url, "https://example.org/cloud.data");
        let clean = config.clean().unwrap();
        assert_eq!(clean.class1_range(), LineRange::new(53, 1077));
        assert_eq!(clean.class2_range(), LineRange::new(1082, 2105));
        assert_eq!(config.features().unwrap().len(), 3);
        assert_eq!(config.train_test_split.test_size, 0.4);
        assert_eq!(config.train_test_split.random_state, Some(42));
        assert!(config.train_test_split.shuffle);
        assert_eq!(config.lr_config.c, 0.5);
        assert_eq!(config.lr_config.max_iter, 200);
        assert_eq!(config.lr_config.penalty, Penalty::L2);
        assert_eq!(config.lr_config.solver, Solver::Newton);

        let check = config.check().unwrap();
        assert_eq!(check.expected_accuracy, 0.85);
        assert_eq!(check.metrics_path, PathBuf::from("metrics/auc_accuracy.txt"));
    }

    #[test]
    fn test_missing_sections() {
        let f = write_yaml("features: [visible_mean]\n");
        let config = load_config(f.path()).unwrap();
        assert!(matches!(config.clean(), Err(ConfigError::MissingKey("clean"))));
        assert!(matches!(config.check(), Err(ConfigError::MissingKey("check"))));
        assert!(matches!(config.acquire(), Err(ConfigError::MissingKey("acquire"))));
        assert_eq!(config.lr_config, LogisticConfig::default());
    }

    #[test]
    fn test_unknown_hyperparameter_rejected() {
        let f = write_yaml("lr_config:\n  C: 1.0\n  warm_start: true\n");
        assert!(matches!(
            load_config(f.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let f = write_yaml("lr_config:\n  C: -1.0\n");
        assert!(matches!(load_config(f.path()), Err(ConfigError::Invalid(_))));

        let f = write_yaml("train_test_split:\n  test_size: 1.5\n");
        assert!(matches!(load_config(f.path()), Err(ConfigError::Invalid(_))));

        let f = write_yaml("lr_config:\n  penalty: l1\n  solver: newton\n");
        assert!(matches!(load_config(f.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
