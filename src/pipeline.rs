//! Pipeline stages, each reading its inputs from disk and writing its
//! outputs back, so stages can be re-run independently.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ndarray::{Array1, Array2};

use crate::config::{CheckConfig, CleanConfig, PipelineConfig};
use crate::data::features::{self, Derivation, FeatureMode};
use crate::data::loader::{load_table, save_table};
use crate::data::model::{CLASS_COLUMN, FeatureTable};
use crate::data::raw;
use crate::model::metrics::{self, AUC_ACCURACY_FILE, AucAccuracy, Metrics};
use crate::model::{
    LogisticConfig, LogisticRegression, SplitConfig, fit_logistic_regression, train_test_split,
};

/// Which step of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Stage {
    /// Download the raw data file.
    Acquire,
    /// Parse the raw file into a labelled table.
    Clean,
    /// Add derived feature columns.
    Featurize,
    /// Fit on a training split and score on the held-out rows.
    Test,
    /// Fit on every row and persist the model.
    Fit,
    /// Verify the feature file and metrics against expectations.
    Check,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Acquire => "acquire",
            Stage::Clean => "clean",
            Stage::Featurize => "featurize",
            Stage::Test => "test",
            Stage::Fit => "fit",
            Stage::Check => "check",
        };
        f.write_str(name)
    }
}

/// Paths and options given on the command line.
#[derive(Debug, Clone, Default)]
pub struct StageArgs {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub mode: FeatureMode,
}

impl StageArgs {
    fn input(&self, stage: Stage) -> Result<&Path> {
        match &self.input {
            Some(p) => Ok(p),
            None => bail!("stage '{stage}' requires --input"),
        }
    }

    fn output(&self, stage: Stage) -> Result<&Path> {
        match &self.output {
            Some(p) => Ok(p),
            None => bail!("stage '{stage}' requires --output"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Fetch `url` and store the response body at `path`.
pub fn acquire(url: &str, path: &Path) -> Result<()> {
    let response = reqwest::blocking::get(url)
        .with_context(|| format!("requesting {url}"))?
        .error_for_status()
        .with_context(|| format!("fetching {url}"))?;
    let body = response.bytes().context("reading response body")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, &body).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Raw data saved to {} ({} bytes)", path.display(), body.len());
    Ok(())
}

/// Parse the raw file and write the labelled table.
pub fn clean(input: &Path, output: &Path, config: &CleanConfig) -> Result<FeatureTable> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("reading raw data from {}", input.display()))?;
    let parsed = raw::parse(
        &source,
        config.class1_range(),
        config.class2_range(),
        &config.column_names,
    )
    .with_context(|| format!("parsing {}", input.display()))?;

    save_table(&parsed.table, output)?;
    log::info!("Clean data saved to {}: {}", output.display(), parsed.table);
    Ok(parsed.table)
}

/// Add the derived features and write the enlarged table.
pub fn featurize(input: &Path, output: &Path, mode: FeatureMode) -> Result<Derivation> {
    let table = load_table(input)?;
    let derivation = features::derive_with(mode, table)
        .with_context(|| format!("deriving features for {}", input.display()))?;
    save_table(&derivation.table, output)?;
    log::info!(
        "{} of {} features created; saved to {}",
        derivation.derived().len(),
        features::DERIVED_FEATURES.len(),
        output.display()
    );
    Ok(derivation)
}

/// Configured features that the table actually has, in configured order.
pub fn model_features(table: &FeatureTable, configured: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for name in configured {
        if table.has_column(name) && !selected.contains(name) {
            selected.push(name.clone());
        } else if !table.has_column(name) {
            log::warn!("Feature '{name}' not in table; left out of the model");
        }
    }
    selected
}

fn design(
    table: &FeatureTable,
    configured: &[String],
) -> Result<(Vec<String>, Array2<f64>, Array1<f64>)> {
    let names = model_features(table, configured);
    if names.is_empty() {
        bail!("none of the configured features are present in the table");
    }
    let x = table.to_matrix(&names)?;
    let y = table.to_vector(CLASS_COLUMN)?;
    log::debug!("Modeling {} rows on {} features: {:?}", x.nrows(), names.len(), names);
    Ok((names, x, y))
}

/// Fit on a training split, score the held-out rows and write the metric
/// artifacts into `output_dir`.
pub fn evaluate(
    input: &Path,
    output_dir: &Path,
    configured: &[String],
    split: &SplitConfig,
    lr_config: &LogisticConfig,
) -> Result<Metrics> {
    let table = load_table(input)?;
    let (names, x, y) = design(&table, configured)?;

    let parts = train_test_split(&x, &y, split)?;
    let model = fit_logistic_regression(&parts.x_train, &parts.y_train, names, lr_config, None)?;
    let metrics = metrics::score(&parts.x_test, &parts.y_test, &model)?;
    log::info!("AUC {:.3}, accuracy {:.3}", metrics.auc, metrics.accuracy);

    metrics::write_metrics(&metrics, output_dir)?;
    Ok(metrics)
}

/// Fit on every row; persist the model when `output` is given.
pub fn fit(
    input: &Path,
    output: Option<&Path>,
    configured: &[String],
    lr_config: &LogisticConfig,
) -> Result<LogisticRegression> {
    let table = load_table(input)?;
    let (names, x, y) = design(&table, configured)?;
    Ok(fit_logistic_regression(&x, &y, names, lr_config, output)?)
}

/// Outcome of the reproducibility check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    /// Required columns absent from the feature file.
    pub missing_columns: Vec<String>,
    pub metrics: AucAccuracy,
    pub metrics_match: bool,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.missing_columns.is_empty() && self.metrics_match
    }
}

const METRIC_TOLERANCE: f64 = 1e-9;

/// Compare the feature file and the stored metrics with the expectations.
pub fn check(
    features_path: &Path,
    metrics_path: &Path,
    config: &CheckConfig,
) -> Result<CheckReport> {
    let table = load_table(features_path)?;
    let missing_columns: Vec<String> = config
        .dependent_cols
        .iter()
        .chain(&config.new_features)
        .filter(|c| !table.has_column(c))
        .cloned()
        .collect();
    if missing_columns.is_empty() {
        log::info!("All features present");
    } else {
        log::warn!("Not all features present; missing {missing_columns:?}");
    }

    let metrics = metrics::read_auc_accuracy(metrics_path)?;
    let metrics_match = (metrics.auc - config.expected_auc).abs() < METRIC_TOLERANCE
        && (metrics.accuracy - config.expected_accuracy).abs() < METRIC_TOLERANCE;
    if metrics_match {
        log::info!("Model metrics as expected");
    } else {
        log::warn!(
            "Model not reproduced successfully: AUC {} (expected {}), accuracy {} (expected {})",
            metrics.auc,
            config.expected_auc,
            metrics.accuracy,
            config.expected_accuracy
        );
    }

    Ok(CheckReport {
        missing_columns,
        metrics,
        metrics_match,
    })
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run one stage with paths from `args` and settings from `config`.
pub fn run(stage: Stage, args: &StageArgs, config: &PipelineConfig) -> Result<()> {
    log::debug!("Running stage '{stage}'");
    match stage {
        Stage::Acquire => {
            let settings = config.acquire()?;
            let path = match (&args.output, &settings.save_path) {
                (Some(p), _) | (None, Some(p)) => p.as_path(),
                (None, None) => bail!("stage 'acquire' requires --output or acquire.save_path"),
            };
            acquire(&settings.url, path)
        }
        Stage::Clean => {
            clean(args.input(stage)?, args.output(stage)?, config.clean()?)?;
            Ok(())
        }
        Stage::Featurize => {
            let derivation = featurize(args.input(stage)?, args.output(stage)?, args.mode)?;
            for skip in &derivation.skipped {
                log::debug!("skipped {} ({})", skip.feature, skip.reason.code());
            }
            Ok(())
        }
        Stage::Test => {
            evaluate(
                args.input(stage)?,
                args.output(stage)?,
                config.features()?,
                &config.train_test_split,
                &config.lr_config,
            )?;
            Ok(())
        }
        Stage::Fit => {
            fit(
                args.input(stage)?,
                args.output.as_deref(),
                config.features()?,
                &config.lr_config,
            )?;
            Ok(())
        }
        Stage::Check => {
            let check_config = config.check()?;
            let features_path = args
                .input
                .as_deref()
                .unwrap_or(check_config.features_path.as_path());
            let metrics_path = match &args.output {
                Some(dir) => dir.join(AUC_ACCURACY_FILE),
                None => check_config.metrics_path.clone(),
            };
            let report = check(features_path, &metrics_path, check_config)?;
            if !report.passed() {
                bail!("reproducibility check failed");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::Column;

    fn table() -> FeatureTable {
        FeatureTable::from_columns(vec![
            Column::numeric("visible_mean", vec![1.0, 2.0]),
            Column::numeric("IR_mean", vec![3.0, 4.0]),
            Column::numeric(CLASS_COLUMN, vec![0.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_model_features_keep_config_order() {
        let configured = vec![
            "IR_mean".to_string(),
            "visible_range".to_string(),
            "visible_mean".to_string(),
            "IR_mean".to_string(),
        ];
        assert_eq!(
            model_features(&table(), &configured),
            vec!["IR_mean".to_string(), "visible_mean".to_string()]
        );
    }

    #[test]
    fn test_stage_display_matches_cli_name() {
        use clap::ValueEnum;
        for stage in Stage::value_variants() {
            let pv = stage.to_possible_value().unwrap();
            assert_eq!(pv.get_name(), stage.to_string());
        }
    }

    #[test]
    fn test_missing_paths_are_errors() {
        let args = StageArgs::default();
        let err = args.input(Stage::Clean).unwrap_err();
        assert!(err.to_string().contains("--input"));
    }

    #[test]
    fn test_check_reports_missing_columns() {
        let dir = tempfile::TempDir::new().unwrap();
        let features_path = dir.path().join("features.csv");
        save_table(&table(), &features_path).unwrap();
        let metrics_path = dir.path().join(AUC_ACCURACY_FILE);
        std::fs::write(&metrics_path, "AUC: 0.9 \nAccuracy: 0.85 \n\n").unwrap();

        let config = CheckConfig {
            dependent_cols: vec!["visible_mean".into()],
            new_features: vec!["visible_range".into()],
            expected_auc: 0.9,
            expected_accuracy: 0.85,
            features_path: features_path.clone(),
            metrics_path: metrics_path.clone(),
        };
        let report = check(&features_path, &metrics_path, &config).unwrap();
        assert_eq!(report.missing_columns, vec!["visible_range".to_string()]);
        assert!(report.metrics_match);
        assert!(!report.passed());
    }
}
