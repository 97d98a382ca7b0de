use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use cloud_repro::data::features::{DERIVED_FEATURES, FeatureMode};
use cloud_repro::data::loader::load_table;
use cloud_repro::data::raw::CLOUD_COLUMNS;
use cloud_repro::model::{LogisticConfig, LogisticRegression, SplitConfig};
use cloud_repro::model::metrics::{AUC_ACCURACY_FILE, CLASS_REPORT_FILE, CONFUSION_FILE, read_auc_accuracy};
use cloud_repro::pipeline::{self, Stage, StageArgs};
use cloud_repro::{PipelineConfig, load_config};

const HEADER: usize = 3;
const ROWS: usize = 40;
const GAP: usize = 2;

fn raw_record(rng: &mut StdRng, positive: bool) -> Vec<f64> {
    let shift = if positive { 1.0 } else { 0.0 };
    let mean = 5.0 + 10.0 * shift + rng.random::<f64>() * 6.0;
    let ir = 230.0 - 15.0 * shift + rng.random::<f64>() * 12.0;
    vec![
        mean,
        mean + 1.0 + rng.random::<f64>() * 3.0,
        mean - 1.0 - rng.random::<f64>(),
        rng.random::<f64>(),
        100.0 + 300.0 * shift + rng.random::<f64>() * 150.0,
        1.5 + shift + rng.random::<f64>(),
        rng.random::<f64>() * 0.5,
        ir,
        ir + 5.0 + rng.random::<f64>() * 5.0,
        ir - 5.0 - rng.random::<f64>() * 5.0,
    ]
}

fn write_raw(path: &Path) {
    let mut rng = StdRng::seed_from_u64(3);
    let mut text = String::new();
    for _ in 0..HEADER {
        writeln!(text, "header text").unwrap();
    }
    for class in [false, true] {
        for _ in 0..ROWS {
            for v in raw_record(&mut rng, class) {
                write!(text, " {v:.4}").unwrap();
            }
            writeln!(text).unwrap();
        }
        if !class {
            for _ in 0..GAP {
                writeln!(text).unwrap();
            }
        }
    }
    std::fs::write(path, text).unwrap();
}

fn write_config(dir: &Path, expected: Option<(f64, f64)>) -> PipelineConfig {
    let c2_start = HEADER + ROWS + GAP;
    let mut yaml = format!(
        "clean:\n  c1_start_ix: {HEADER}\n  c1_end_ix: {}\n  c2_start_ix: {c2_start}\n  c2_end_ix: {}\n  column_names: [{}]\n",
        HEADER + ROWS,
        c2_start + ROWS,
        CLOUD_COLUMNS.join(", ")
    );
    yaml.push_str("features: [visible_mean, visible_range, log_entropy, IR_mean, IR_norm_range]\n");
    yaml.push_str("train_test_split:\n  test_size: 0.25\n  random_state: 11\n");
    yaml.push_str("lr_config:\n  C: 1.0\n  max_iter: 100\n");
    if let Some((auc, accuracy)) = expected {
        write!(
            yaml,
            "check:\n  dependent_cols: [visible_max, visible_min, IR_mean]\n  new_features: [visible_range, IR_norm_range]\n  expected_auc: {auc}\n  expected_accuracy: {accuracy}\n"
        )
        .unwrap();
    }
    let path = dir.join("config.yaml");
    std::fs::write(&path, yaml).unwrap();
    load_config(&path).unwrap()
}

fn args(input: &Path, output: &Path) -> StageArgs {
    StageArgs {
        input: Some(input.to_path_buf()),
        output: Some(output.to_path_buf()),
        mode: FeatureMode::Strict,
    }
}

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        write_raw(&root.join("cloud.data"));
        Workspace { _dir: dir, root }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[test]
fn test_full_pipeline() {
    let ws = Workspace::new();
    let config = write_config(&ws.root, None);

    pipeline::run(Stage::Clean, &args(&ws.path("cloud.data"), &ws.path("clean.csv")), &config)
        .unwrap();
    let clean = load_table(&ws.path("clean.csv")).unwrap();
    assert_eq!(clean.n_rows(), 2 * ROWS);
    assert_eq!(clean.n_columns(), CLOUD_COLUMNS.len() + 1);

    pipeline::run(
        Stage::Featurize,
        &args(&ws.path("clean.csv"), &ws.path("features.csv")),
        &config,
    )
    .unwrap();
    let features = load_table(&ws.path("features.csv")).unwrap();
    for name in DERIVED_FEATURES {
        assert!(features.has_column(name), "{name} missing");
    }

    let metrics_dir = ws.path("metrics");
    pipeline::run(Stage::Test, &args(&ws.path("features.csv"), &metrics_dir), &config).unwrap();
    for file in [AUC_ACCURACY_FILE, CLASS_REPORT_FILE, CONFUSION_FILE] {
        assert!(metrics_dir.join(file).exists(), "{file} not written");
    }
    let scores = read_auc_accuracy(&metrics_dir.join(AUC_ACCURACY_FILE)).unwrap();
    assert!(scores.auc > 0.9, "auc {}", scores.auc);
    assert!(scores.accuracy > 0.8, "accuracy {}", scores.accuracy);

    let model_path = ws.path("models/model.json");
    pipeline::run(Stage::Fit, &args(&ws.path("features.csv"), &model_path), &config).unwrap();
    let model = LogisticRegression::load(&model_path).unwrap();
    assert!(model.is_fitted());
    assert_eq!(model.named_coefficients().len(), 5);

    // Reproducibility check against the metrics just written.
    let config = write_config(&ws.root, Some((scores.auc, scores.accuracy)));
    pipeline::run(Stage::Check, &args(&ws.path("features.csv"), &metrics_dir), &config).unwrap();

    let wrong = write_config(&ws.root, Some((scores.auc, 0.123)));
    assert!(
        pipeline::run(Stage::Check, &args(&ws.path("features.csv"), &metrics_dir), &wrong).is_err()
    );
}

#[test]
fn test_seeded_test_stage_is_reproducible() {
    let ws = Workspace::new();
    let config = write_config(&ws.root, None);
    pipeline::run(Stage::Clean, &args(&ws.path("cloud.data"), &ws.path("clean.csv")), &config)
        .unwrap();
    pipeline::run(
        Stage::Featurize,
        &args(&ws.path("clean.csv"), &ws.path("features.csv")),
        &config,
    )
    .unwrap();

    let a = pipeline::evaluate(
        &ws.path("features.csv"),
        &ws.path("m1"),
        config.features().unwrap(),
        &config.train_test_split,
        &config.lr_config,
    )
    .unwrap();
    let b = pipeline::evaluate(
        &ws.path("features.csv"),
        &ws.path("m2"),
        config.features().unwrap(),
        &config.train_test_split,
        &config.lr_config,
    )
    .unwrap();
    assert_eq!(a.confusion_matrix, b.confusion_matrix);
    assert_eq!(
        std::fs::read_to_string(ws.path("m1").join(AUC_ACCURACY_FILE)).unwrap(),
        std::fs::read_to_string(ws.path("m2").join(AUC_ACCURACY_FILE)).unwrap()
    );
}

#[test]
fn test_bulk_mode_and_missing_section() {
    let ws = Workspace::new();
    let config = write_config(&ws.root, None);
    pipeline::run(Stage::Clean, &args(&ws.path("cloud.data"), &ws.path("clean.csv")), &config)
        .unwrap();

    let derivation =
        pipeline::featurize(&ws.path("clean.csv"), &ws.path("bulk.parquet"), FeatureMode::Bulk)
            .unwrap();
    assert!(derivation.skipped.is_empty());
    let bulk = load_table(&ws.path("bulk.parquet")).unwrap();
    assert!(bulk.has_column("IR_norm_range"));

    let err = pipeline::run(Stage::Check, &args(&ws.path("bulk.parquet"), &ws.root), &config)
        .unwrap_err();
    assert!(err.to_string().contains("check"), "{err}");
}

#[test]
fn test_stage_fails_on_missing_value_in_held_out_row() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("features.csv");
    let mut csv = String::from("visible_mean,class\n");
    for i in 0..11 {
        let class = i % 2;
        let value = if class == 1 { 2.0 + i as f64 } else { -2.0 - i as f64 };
        writeln!(csv, "{value},{class}").unwrap();
    }
    csv.push_str(",1\n");
    std::fs::write(&path, csv).unwrap();

    let split = SplitConfig {
        test_size: 0.25,
        random_state: None,
        shuffle: false,
    };
    let err = pipeline::evaluate(
        &path,
        &dir.path().join("metrics"),
        &["visible_mean".to_string()],
        &split,
        &LogisticConfig::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("NaN"), "{err}");
    assert!(!dir.path().join("metrics").join(AUC_ACCURACY_FILE).exists());
}
