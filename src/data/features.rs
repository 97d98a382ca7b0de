//! Derived feature columns.
//!
//! Two entry points share one rule table:
//!
//! * [`derive`] checks every rule on its own (column presence, numeric type,
//!   then one pass per domain condition) and adds only the columns whose
//!   conditions hold on every row.
//! * [`derive_bulk`] checks column presence once for all rules and then
//!   computes every column without domain checks; meant for inputs that
//!   were already validated.
//!
//! A skipped feature is never an error: it is logged and returned in
//! [`Derivation::skipped`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::{Column, FeatureTable, TableError};

/// Names of the derived columns, in the order they are added.
pub const DERIVED_FEATURES: [&str; 6] = [
    "visible_range",
    "visible_norm_range",
    "log_entropy",
    "entropy_x_contrast",
    "IR_range",
    "IR_norm_range",
];

/// Columns [`derive_bulk`] needs before it computes anything.
pub const BULK_COLUMNS: [&str; 8] = [
    "visible_max",
    "visible_min",
    "visible_mean",
    "visible_entropy",
    "visible_contrast",
    "IR_max",
    "IR_min",
    "IR_mean",
];

// ---------------------------------------------------------------------------
// Skip reporting
// ---------------------------------------------------------------------------

/// Why a derived column was not produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    MissingColumn,
    NonNumeric,
    /// An upper-bound column was below its lower bound.
    OrderingViolation { row: usize },
    /// A divisor column held a zero.
    ZeroDivisor { row: usize },
    /// A value outside the domain of the transform (log of a value <= 0).
    OutOfDomain { row: usize },
}

impl SkipReason {
    /// Stable code used in logs and reports.
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::MissingColumn => "missing_column",
            SkipReason::NonNumeric => "non_numeric",
            SkipReason::OrderingViolation { .. } => "ordering_violation",
            SkipReason::ZeroDivisor { .. } => "zero_divisor",
            SkipReason::OutOfDomain { .. } => "out_of_domain",
        }
    }

    /// First offending row, for the per-row conditions.
    pub fn row(&self) -> Option<usize> {
        match self {
            SkipReason::OrderingViolation { row }
            | SkipReason::ZeroDivisor { row }
            | SkipReason::OutOfDomain { row } => Some(*row),
            SkipReason::MissingColumn | SkipReason::NonNumeric => None,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row() {
            Some(row) => write!(f, "{} at row {row}", self.code()),
            None => write!(f, "{}", self.code()),
        }
    }
}

/// A derived column that was not added, with the column that blocked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFeature {
    pub feature: &'static str,
    pub column: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

impl fmt::Display for SkippedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} not created; {} in '{}'",
            self.feature, self.reason, self.column
        )
    }
}

/// Result of a derivation pass.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub table: FeatureTable,
    pub skipped: Vec<SkippedFeature>,
}

impl Derivation {
    /// Derived columns present in the output table.
    pub fn derived(&self) -> Vec<&'static str> {
        DERIVED_FEATURES
            .iter()
            .copied()
            .filter(|name| self.table.has_column(name))
            .collect()
    }

    pub fn skip_for(&self, feature: &str) -> Option<&SkippedFeature> {
        self.skipped.iter().find(|s| s.feature == feature)
    }
}

/// Which derivation path the `featurize` stage runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FeatureMode {
    #[default]
    Strict,
    Bulk,
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A per-row condition on the inputs of a rule.
enum Check {
    /// `upper >= lower` on every row.
    Ordering {
        upper: &'static str,
        lower: &'static str,
    },
    /// Divisor is never zero.
    NonZero(&'static str),
    /// Strictly positive on every row.
    Positive(&'static str),
}

struct Rule {
    name: &'static str,
    inputs: &'static [&'static str],
    checks: &'static [Check],
    compute: fn(&[&[f64]]) -> Vec<f64>,
}

fn difference(cols: &[&[f64]]) -> Vec<f64> {
    cols[0].iter().zip(cols[1]).map(|(a, b)| a - b).collect()
}

fn normalized_difference(cols: &[&[f64]]) -> Vec<f64> {
    cols[0]
        .iter()
        .zip(cols[1])
        .zip(cols[2])
        .map(|((a, b), m)| (a - b) / m)
        .collect()
}

fn natural_log(cols: &[&[f64]]) -> Vec<f64> {
    cols[0].iter().map(|v| v.ln()).collect()
}

fn product(cols: &[&[f64]]) -> Vec<f64> {
    cols[0].iter().zip(cols[1]).map(|(a, b)| a * b).collect()
}

static RULES: [Rule; 6] = [
    Rule {
        name: "visible_range",
        inputs: &["visible_max", "visible_min"],
        checks: &[Check::Ordering {
            upper: "visible_max",
            lower: "visible_min",
        }],
        compute: difference,
    },
    Rule {
        name: "visible_norm_range",
        inputs: &["visible_max", "visible_min", "visible_mean"],
        checks: &[
            Check::Ordering {
                upper: "visible_max",
                lower: "visible_min",
            },
            Check::NonZero("visible_mean"),
        ],
        compute: normalized_difference,
    },
    Rule {
        name: "log_entropy",
        inputs: &["visible_entropy"],
        checks: &[Check::Positive("visible_entropy")],
        compute: natural_log,
    },
    Rule {
        name: "entropy_x_contrast",
        inputs: &["visible_contrast", "visible_entropy"],
        checks: &[],
        compute: product,
    },
    Rule {
        name: "IR_range",
        inputs: &["IR_max", "IR_min"],
        checks: &[Check::Ordering {
            upper: "IR_max",
            lower: "IR_min",
        }],
        compute: difference,
    },
    Rule {
        name: "IR_norm_range",
        inputs: &["IR_max", "IR_min", "IR_mean"],
        checks: &[
            Check::Ordering {
                upper: "IR_max",
                lower: "IR_min",
            },
            Check::NonZero("IR_mean"),
        ],
        compute: normalized_difference,
    },
];

impl Rule {
    fn skip(&self, column: &str, reason: SkipReason) -> SkippedFeature {
        SkippedFeature {
            feature: self.name,
            column: column.to_string(),
            reason,
        }
    }

    /// Resolve the input columns: all must exist, then all must be numeric.
    fn inputs<'t>(&self, table: &'t FeatureTable) -> Result<Vec<&'t [f64]>, SkippedFeature> {
        if let Some(missing) = self.inputs.iter().find(|name| !table.has_column(name)) {
            return Err(self.skip(missing, SkipReason::MissingColumn));
        }
        self.inputs
            .iter()
            .map(|name| {
                table
                    .numeric(name)
                    .ok_or_else(|| self.skip(name, SkipReason::NonNumeric))
            })
            .collect()
    }

    /// Run each per-row condition in a single pass, stopping at the first
    /// offending row.
    fn validate(&self, table: &FeatureTable) -> Result<(), SkippedFeature> {
        for check in self.checks {
            let failure = match *check {
                Check::Ordering { upper, lower } => column_pair(table, upper, lower)
                    .and_then(|(u, l)| u.iter().zip(l).position(|(u, l)| u < l))
                    .map(|row| (upper, SkipReason::OrderingViolation { row })),
                Check::NonZero(col) => table
                    .numeric(col)
                    .and_then(|v| v.iter().position(|x| *x == 0.0))
                    .map(|row| (col, SkipReason::ZeroDivisor { row })),
                Check::Positive(col) => table
                    .numeric(col)
                    .and_then(|v| v.iter().position(|x| *x <= 0.0))
                    .map(|row| (col, SkipReason::OutOfDomain { row })),
            };
            if let Some((column, reason)) = failure {
                return Err(self.skip(column, reason));
            }
        }
        Ok(())
    }

    fn evaluate(&self, table: &FeatureTable) -> Result<Column, SkippedFeature> {
        let inputs = self.inputs(table)?;
        self.validate(table)?;
        Ok(Column::numeric(self.name, (self.compute)(&inputs)))
    }
}

fn column_pair<'t>(table: &'t FeatureTable, a: &str, b: &str) -> Option<(&'t [f64], &'t [f64])> {
    Some((table.numeric(a)?, table.numeric(b)?))
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Apply every rule independently, adding each column whose conditions hold
/// for the whole table.
pub fn derive(mut table: FeatureTable) -> Result<Derivation, TableError> {
    let mut skipped = Vec::new();
    for rule in RULES.iter() {
        match rule.evaluate(&table) {
            Ok(column) => {
                table.set_column(column)?;
                log::info!("{} created", rule.name);
            }
            Err(skip) => {
                log::warn!("{skip}");
                skipped.push(skip);
            }
        }
    }
    Ok(Derivation { table, skipped })
}

/// Compute all six columns at once when every input column is present and
/// numeric; otherwise add nothing.
pub fn derive_bulk(mut table: FeatureTable) -> Result<Derivation, TableError> {
    let blocker = BULK_COLUMNS.iter().find_map(|name| match table.column(name) {
        None => Some((*name, SkipReason::MissingColumn)),
        Some(c) if !c.is_numeric() => Some((*name, SkipReason::NonNumeric)),
        Some(_) => None,
    });

    if let Some((column, reason)) = blocker {
        log::warn!(
            "Not all required columns present; no additional features generated ({reason} in '{column}')"
        );
        let skipped = RULES.iter().map(|rule| rule.skip(column, reason)).collect();
        return Ok(Derivation { table, skipped });
    }

    log::info!("Creating additional features");
    for rule in RULES.iter() {
        let column = {
            let inputs: Vec<&[f64]> = rule
                .inputs
                .iter()
                .filter_map(|name| table.numeric(name))
                .collect();
            Column::numeric(rule.name, (rule.compute)(&inputs))
        };
        table.set_column(column)?;
    }
    Ok(Derivation {
        table,
        skipped: Vec::new(),
    })
}

/// Run the path selected by `mode`.
pub fn derive_with(mode: FeatureMode, table: FeatureTable) -> Result<Derivation, TableError> {
    match mode {
        FeatureMode::Strict => derive(table),
        FeatureMode::Bulk => derive_bulk(table),
    }
}
