use std::fmt;

use ndarray::{Array1, Array2};
use thiserror::Error;

/// Name of the label column appended by the raw parser.
pub const CLASS_COLUMN: &str = "class";

/// Errors raised while assembling or querying a [`FeatureTable`].
#[derive(Error, Debug, PartialEq)]
pub enum TableError {
    #[error("column '{name}' has {found} rows, table has {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("column '{0}' not found")]
    MissingColumn(String),

    #[error("column '{0}' is not numeric")]
    NonNumeric(String),

    #[error("cannot concatenate tables with different columns: {left:?} vs {right:?}")]
    SchemaMismatch {
        left: Vec<String>,
        right: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// ColumnData – the values of one column
// ---------------------------------------------------------------------------

/// Column storage mirroring the two dtypes the pipeline cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    /// Floating point values; empty cells are `NaN`.
    Numeric(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(v) => v.len(),
            ColumnData::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_numeric(&self) -> Option<&[f64]> {
        match self {
            ColumnData::Numeric(v) => Some(v),
            ColumnData::Text(_) => None,
        }
    }

    /// Render a single cell the way it is written to text formats.
    pub fn cell(&self, row: usize) -> String {
        match self {
            ColumnData::Numeric(v) => {
                let x = v[row];
                if x.is_nan() { String::new() } else { x.to_string() }
            }
            ColumnData::Text(v) => v[row].clone(),
        }
    }

    fn extend(&mut self, other: &ColumnData) {
        // Numeric + text promotes to text.
        if let (ColumnData::Numeric(a), ColumnData::Text(_)) = (&*self, other) {
            let promoted = ColumnData::Text(a.iter().map(|x| x.to_string()).collect());
            *self = promoted;
        }
        match (self, other) {
            (ColumnData::Numeric(a), ColumnData::Numeric(b)) => a.extend_from_slice(b),
            (ColumnData::Text(a), ColumnData::Text(b)) => a.extend_from_slice(b),
            (ColumnData::Text(a), ColumnData::Numeric(b)) => {
                a.extend(b.iter().map(|x| x.to_string()))
            }
            (ColumnData::Numeric(_), ColumnData::Text(_)) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Column – a named column
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<f64>) -> Self {
        Column {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn text(name: impl Into<String>, values: Vec<String>) -> Self {
        Column {
            name: name.into(),
            data: ColumnData::Text(values),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.data, ColumnData::Numeric(_))
    }
}

// ---------------------------------------------------------------------------
// FeatureTable – the table every stage reads and writes
// ---------------------------------------------------------------------------

/// Column-oriented table with unique column names and a fixed row count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<Column>,
    n_rows: usize,
}

impl FeatureTable {
    /// An empty table with `n_rows` rows and no columns.
    pub fn with_rows(n_rows: usize) -> Self {
        FeatureTable {
            columns: Vec::new(),
            n_rows,
        }
    }

    /// Build a table, checking that names are unique and lengths agree.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, TableError> {
        let n_rows = columns.first().map(|c| c.data.len()).unwrap_or(0);
        let mut table = FeatureTable::with_rows(n_rows);
        for column in columns {
            if table.column(&column.name).is_some() {
                return Err(TableError::DuplicateColumn(column.name));
            }
            table.set_column(column)?;
        }
        Ok(table)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Numeric values of a column, `None` if absent or text.
    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        self.column(name).and_then(|c| c.data.as_numeric())
    }

    /// Add a column, or replace an existing one of the same name in place.
    pub fn set_column(&mut self, column: Column) -> Result<(), TableError> {
        let found = column.data.len();
        if found != self.n_rows && !(self.columns.is_empty() && self.n_rows == 0) {
            return Err(TableError::LengthMismatch {
                name: column.name,
                expected: self.n_rows,
                found,
            });
        }
        if self.columns.is_empty() {
            self.n_rows = found;
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Remove and return a column.
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    /// Append the rows of `other`, which must have the same column names in
    /// the same order. A column that is text on either side stays text.
    pub fn concat(mut self, other: &FeatureTable) -> Result<Self, TableError> {
        if self.columns.is_empty() && self.n_rows == 0 {
            return Ok(other.clone());
        }
        let left = self.column_names();
        let right = other.column_names();
        if left != right {
            return Err(TableError::SchemaMismatch { left, right });
        }
        for (mine, theirs) in self.columns.iter_mut().zip(&other.columns) {
            mine.data.extend(&theirs.data);
        }
        self.n_rows += other.n_rows;
        Ok(self)
    }

    /// Gather the named numeric columns into an `n_rows x names.len()` matrix.
    pub fn to_matrix(&self, names: &[String]) -> Result<Array2<f64>, TableError> {
        let mut matrix = Array2::<f64>::zeros((self.n_rows, names.len()));
        for (j, name) in names.iter().enumerate() {
            let values = self.numeric_or_err(name)?;
            for (i, &v) in values.iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }
        Ok(matrix)
    }

    /// A single numeric column as an owned vector.
    pub fn to_vector(&self, name: &str) -> Result<Array1<f64>, TableError> {
        Ok(Array1::from_vec(self.numeric_or_err(name)?.to_vec()))
    }

    fn numeric_or_err(&self, name: &str) -> Result<&[f64], TableError> {
        let column = self
            .column(name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))?;
        column
            .data
            .as_numeric()
            .ok_or_else(|| TableError::NonNumeric(name.to_string()))
    }
}

impl fmt::Display for FeatureTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows x {} columns [{}]",
            self.n_rows,
            self.columns.len(),
            self.column_names().join(", ")
        )
    }
}
