use std::fmt;

use thiserror::Error;

use super::model::{CLASS_COLUMN, Column, FeatureTable, TableError};

/// Column names of the cloud dataset, in file order.
pub const CLOUD_COLUMNS: [&str; 10] = [
    "visible_mean",
    "visible_max",
    "visible_min",
    "visible_mean_distribution",
    "visible_contrast",
    "visible_entropy",
    "visible_second_angular_momentum",
    "IR_mean",
    "IR_max",
    "IR_min",
];

/// Errors that abort parsing of the raw file.
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("{class} range {start}..{end} is inverted")]
    InvalidRange {
        class: CloudClass,
        start: usize,
        end: usize,
    },

    #[error("{class} range {start}..{end} exceeds the {lines} lines of the source")]
    RangeOutOfBounds {
        class: CloudClass,
        start: usize,
        end: usize,
        lines: usize,
    },

    #[error("malformed record at line {line} ({class}): expected {expected} values, found {found}")]
    MalformedRecord {
        line: usize,
        class: CloudClass,
        expected: usize,
        found: usize,
    },

    #[error("line {line} ({class}): '{token}' is not a number")]
    InvalidNumber {
        line: usize,
        class: CloudClass,
        token: String,
    },

    #[error(transparent)]
    Table(#[from] TableError),
}

/// The two labelled line ranges of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudClass {
    First,
    Second,
}

impl CloudClass {
    pub fn label(self) -> f64 {
        match self {
            CloudClass::First => 0.0,
            CloudClass::Second => 1.0,
        }
    }
}

impl fmt::Display for CloudClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloudClass::First => write!(f, "class 0"),
            CloudClass::Second => write!(f, "class 1"),
        }
    }
}

/// Half-open range of 0-based line indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        LineRange { start, end }
    }
}

/// How the parsed columns were named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Record width matched the expected column names.
    Named,
    /// Width did not match; columns are named by position.
    Positional { expected: usize, found: usize },
}

/// Outcome of [`parse`]: the table plus how its columns were named.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub table: FeatureTable,
    pub schema: Schema,
}

impl ParsedTable {
    pub fn is_degraded(&self) -> bool {
        matches!(self.schema, Schema::Positional { .. })
    }
}

/// Parse the raw whitespace-delimited source into a two-class table.
///
/// Every record in both ranges must have the width of the first record
/// read. Rows of `class1` come first, labelled 0; rows of `class2` follow,
/// labelled 1.
pub fn parse(
    source: &str,
    class1: LineRange,
    class2: LineRange,
    column_names: &[String],
) -> Result<ParsedTable, ParseError> {
    let lines: Vec<Vec<&str>> = source
        .lines()
        .map(|line| line.split_whitespace().collect())
        .collect();

    let first = extract(&lines, class1, CloudClass::First)?;
    let second = extract(&lines, class2, CloudClass::Second)?;

    let width = first
        .first()
        .or_else(|| second.first())
        .map(|(_, values)| values.len())
        .unwrap_or(column_names.len());

    for (class, records) in [(CloudClass::First, &first), (CloudClass::Second, &second)] {
        if let Some((line, values)) = records.iter().find(|(_, v)| v.len() != width) {
            return Err(ParseError::MalformedRecord {
                line: *line,
                class,
                expected: width,
                found: values.len(),
            });
        }
    }

    let (names, schema) = if width == column_names.len() {
        log::info!("Raw data features all present");
        (column_names.to_vec(), Schema::Named)
    } else {
        log::warn!(
            "Not all expected features found in raw data: expected {}, found {}",
            column_names.len(),
            width
        );
        (
            (0..width).map(|i| i.to_string()).collect(),
            Schema::Positional {
                expected: column_names.len(),
                found: width,
            },
        )
    };

    let table = build_class_table(&names, &first, CloudClass::First)?
        .concat(&build_class_table(&names, &second, CloudClass::Second)?)?;

    log::info!(
        "Parsed {} class-0 and {} class-1 records",
        first.len(),
        second.len()
    );
    Ok(ParsedTable { table, schema })
}

/// Parse the records of one range, keeping their line indices.
fn extract(
    lines: &[Vec<&str>],
    range: LineRange,
    class: CloudClass,
) -> Result<Vec<(usize, Vec<f64>)>, ParseError> {
    let LineRange { start, end } = range;
    if start > end {
        return Err(ParseError::InvalidRange { class, start, end });
    }
    if end > lines.len() {
        return Err(ParseError::RangeOutOfBounds {
            class,
            start,
            end,
            lines: lines.len(),
        });
    }

    (start..end)
        .map(|line| {
            let values = lines[line]
                .iter()
                .map(|tok| parse_token(tok, line, class))
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, ParseError>((line, values))
        })
        .collect()
}

fn parse_token(token: &str, line: usize, class: CloudClass) -> Result<f64, ParseError> {
    let cleaned = token.replace("/n", "").replace("\\n", "");
    cleaned
        .trim()
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber {
            line,
            class,
            token: token.to_string(),
        })
}

fn build_class_table(
    names: &[String],
    records: &[(usize, Vec<f64>)],
    class: CloudClass,
) -> Result<FeatureTable, TableError> {
    let mut columns: Vec<Column> = names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            Column::numeric(
                name.clone(),
                records.iter().map(|(_, values)| values[j]).collect(),
            )
        })
        .collect();
    columns.push(Column::numeric(
        CLASS_COLUMN,
        vec![class.label(); records.len()],
    ));
    FeatureTable::from_columns(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        CLOUD_COLUMNS.iter().map(|s| s.to_string()).collect()
    }

    fn record(seed: f64) -> String {
        (0..10)
            .map(|i| format!("{:.2}", seed + i as f64))
            .collect::<Vec<_>>()
            .join("  ")
    }

    fn source(n: usize) -> String {
        (0..n).map(|i| record(i as f64)).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_parse_two_ranges() {
        let parsed = parse(&source(4), LineRange::new(0, 2), LineRange::new(2, 4), &names()).unwrap();
        assert_eq!(parsed.schema, Schema::Named);
        assert_eq!(parsed.table.n_rows(), 4);
        assert_eq!(
            parsed.table.numeric(CLASS_COLUMN).unwrap(),
            &[0.0, 0.0, 1.0, 1.0]
        );
        assert_eq!(
            parsed.table.numeric("visible_mean").unwrap(),
            &[0.0, 1.0, 2.0, 3.0]
        );
        assert_eq!(parsed.table.n_columns(), 11);
    }

    #[test]
    fn test_parse_skips_header_lines() {
        let text = format!("header line\n\n{}", source(3));
        let parsed = parse(&text, LineRange::new(2, 3), LineRange::new(3, 5), &names()).unwrap();
        assert_eq!(parsed.table.n_rows(), 3);
        assert_eq!(parsed.table.numeric(CLASS_COLUMN).unwrap(), &[0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_parse_empty_range() {
        let parsed = parse(&source(2), LineRange::new(1, 1), LineRange::new(1, 1), &names()).unwrap();
        assert_eq!(parsed.table.n_rows(), 0);
        assert!(parsed.table.has_column("IR_min"));
        assert!(parsed.table.has_column(CLASS_COLUMN));
    }

    #[test]
    fn test_parse_one_empty_range() {
        let parsed = parse(&source(3), LineRange::new(0, 0), LineRange::new(0, 3), &names()).unwrap();
        assert_eq!(parsed.table.numeric(CLASS_COLUMN).unwrap(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_parse_degraded_schema() {
        let text = "1 2 3\n4 5 6\n7 8 9";
        let parsed = parse(text, LineRange::new(0, 1), LineRange::new(1, 3), &names()).unwrap();
        assert!(parsed.is_degraded());
        assert_eq!(
            parsed.schema,
            Schema::Positional {
                expected: 10,
                found: 3
            }
        );
        assert_eq!(parsed.table.column_names(), vec!["0", "1", "2", "class"]);
        assert_eq!(parsed.table.numeric("2").unwrap(), &[3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_parse_inconsistent_width() {
        let text = format!("{}\n1 2 3\n{}", record(0.0), record(1.0));
        let err = parse(&text, LineRange::new(0, 1), LineRange::new(1, 3), &names()).unwrap_err();
        assert_eq!(
            err,
            ParseError::MalformedRecord {
                line: 1,
                class: CloudClass::Second,
                expected: 10,
                found: 3
            }
        );
    }

    #[test]
    fn test_parse_invalid_number() {
        let text = "1 2 x";
        let err = parse(text, LineRange::new(0, 1), LineRange::new(1, 1), &names()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { line: 0, .. }));
    }

    #[test]
    fn test_parse_strips_newline_artifacts() {
        let mut line = record(0.0);
        line.push_str("/n");
        let parsed = parse(&line, LineRange::new(0, 1), LineRange::new(1, 1), &names()).unwrap();
        assert_eq!(parsed.table.numeric("IR_min").unwrap(), &[9.0]);
    }

    #[test]
    fn test_parse_range_errors() {
        let text = source(2);
        assert!(matches!(
            parse(&text, LineRange::new(2, 1), LineRange::new(0, 0), &names()),
            Err(ParseError::InvalidRange { .. })
        ));
        assert!(matches!(
            parse(&text, LineRange::new(0, 1), LineRange::new(1, 5), &names()),
            Err(ParseError::RangeOutOfBounds { lines: 2, .. })
        ));
    }
}
