use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Number, Value as JsonValue};

use super::model::{Column, ColumnData, FeatureTable};

/// Header pandas writes above its index column.
const INDEX_HEADER: &str = "";

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableFormat {
    Csv,
    Json,
    Parquet,
}

/// Dispatch by extension; anything unrecognised is treated as CSV only when
/// it has no extension at all.
fn format_of(path: &Path) -> Result<TableFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "csv" | "" => Ok(TableFormat::Csv),
        "json" => Ok(TableFormat::Json),
        "parquet" | "pq" => Ok(TableFormat::Parquet),
        other => bail!("Unsupported table extension: .{other}"),
    }
}

/// Load a feature table from a file.
///
/// Supported formats:
/// * `.csv`     – header row, one record per line (default)
/// * `.json`    – `[{ "visible_mean": 1.0, ..., "class": 0.0 }, ...]`
/// * `.parquet` – flat numeric / string columns
pub fn load_table(path: &Path) -> Result<FeatureTable> {
    let table = match format_of(path)? {
        TableFormat::Csv => load_csv(path),
        TableFormat::Json => load_json(path),
        TableFormat::Parquet => load_parquet(path),
    }
    .with_context(|| format!("loading table from {}", path.display()))?;
    log::info!("Loaded {table} from {}", path.display());
    Ok(table)
}

/// Write a feature table, choosing the format from the extension.
pub fn save_table(table: &FeatureTable, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    match format_of(path)? {
        TableFormat::Csv => save_csv(table, path),
        TableFormat::Json => save_json(table, path),
        TableFormat::Parquet => save_parquet(table, path),
    }
    .with_context(|| format!("saving table to {}", path.display()))?;
    log::info!("Saved {table} to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// A column is numeric when every non-empty cell parses as a float.
fn infer_column(name: &str, cells: Vec<String>) -> Column {
    let parsed: Option<Vec<f64>> = cells
        .iter()
        .map(|s| {
            let s = s.trim();
            if s.is_empty() {
                Some(f64::NAN)
            } else {
                s.parse::<f64>().ok()
            }
        })
        .collect();
    match parsed {
        Some(values) => Column::numeric(name, values),
        None => Column::text(name, cells),
    }
}

fn load_csv(path: &Path) -> Result<FeatureTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    // Files written with a leading index column carry an empty first header.
    let skip_index = headers.first().map(String::as_str) == Some(INDEX_HEADER);

    let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "CSV row {row_no}: {} fields, header has {}",
                record.len(),
                headers.len()
            );
        }
        for (col, value) in record.iter().enumerate() {
            cells[col].push(value.to_string());
        }
    }

    let columns = headers
        .iter()
        .zip(cells)
        .enumerate()
        .filter(|(i, _)| !(skip_index && *i == 0))
        .map(|(_, (name, values))| infer_column(name, values))
        .collect();

    Ok(FeatureTable::from_columns(columns)?)
}

fn save_csv(table: &FeatureTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).context("creating CSV")?;
    writer
        .write_record(table.column_names())
        .context("writing CSV header")?;
    for row in 0..table.n_rows() {
        writer
            .write_record(table.columns().iter().map(|c| c.data.cell(row)))
            .with_context(|| format!("writing CSV row {row}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

/// Records-oriented layout, as produced by `df.to_json(orient='records')`.
fn load_json(path: &Path) -> Result<FeatureTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let names: Vec<String> = match records.first() {
        Some(first) => first
            .as_object()
            .context("Row 0 is not a JSON object")?
            .keys()
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let mut cells: Vec<Vec<&JsonValue>> = vec![Vec::with_capacity(records.len()); names.len()];
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for (col, name) in names.iter().enumerate() {
            let value = obj
                .get(name)
                .with_context(|| format!("Row {i}: missing '{name}'"))?;
            cells[col].push(value);
        }
    }

    let columns = names
        .iter()
        .zip(cells)
        .map(|(name, values)| json_column(name, &values))
        .collect();
    Ok(FeatureTable::from_columns(columns)?)
}

fn json_column(name: &str, values: &[&JsonValue]) -> Column {
    let numeric: Option<Vec<f64>> = values
        .iter()
        .map(|v| match v {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::Null => Some(f64::NAN),
            _ => None,
        })
        .collect();
    match numeric {
        Some(values) => Column::numeric(name, values),
        None => Column::text(
            name,
            values
                .iter()
                .map(|v| match v {
                    JsonValue::String(s) => s.clone(),
                    JsonValue::Null => String::new(),
                    other => other.to_string(),
                })
                .collect(),
        ),
    }
}

fn save_json(table: &FeatureTable, path: &Path) -> Result<()> {
    let records: Vec<JsonValue> = (0..table.n_rows())
        .map(|row| {
            let mut obj = Map::new();
            for column in table.columns() {
                let value = match &column.data {
                    ColumnData::Numeric(v) => Number::from_f64(v[row])
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null),
                    ColumnData::Text(v) => JsonValue::String(v[row].clone()),
                };
                obj.insert(column.name.clone(), value);
            }
            JsonValue::Object(obj)
        })
        .collect();
    let text = serde_json::to_string_pretty(&records).context("serializing JSON")?;
    std::fs::write(path, text).context("writing JSON file")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

/// Works with files written by **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`); nulls become `NaN` / empty strings.
fn load_parquet(path: &Path) -> Result<FeatureTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;

    // Keep the schema so a file with no row groups still yields its columns.
    let schema = builder.schema().clone();
    let reader = builder.build().context("building parquet reader")?;

    let mut table: Option<FeatureTable> = None;
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let columns = batch
            .schema()
            .fields()
            .iter()
            .enumerate()
            .map(|(i, field)| {
                extract_column(batch.column(i))
                    .map(|data| Column {
                        name: field.name().clone(),
                        data,
                    })
                    .with_context(|| format!("column '{}'", field.name()))
            })
            .collect::<Result<Vec<_>>>()?;
        let part = FeatureTable::from_columns(columns)?;
        table = Some(match table {
            Some(acc) => acc.concat(&part)?,
            None => part,
        });
    }

    match table {
        Some(table) => Ok(table),
        None => {
            let columns = schema
                .fields()
                .iter()
                .map(|f| match f.data_type() {
                    DataType::Utf8 | DataType::LargeUtf8 => Column::text(f.name().clone(), Vec::new()),
                    _ => Column::numeric(f.name().clone(), Vec::new()),
                })
                .collect();
            Ok(FeatureTable::from_columns(columns)?)
        }
    }
}

/// Convert one Arrow column into table storage.
fn extract_column(col: &ArrayRef) -> Result<ColumnData> {
    fn numeric<T, F>(col: &ArrayRef, f: F) -> Result<ColumnData>
    where
        T: Array + 'static,
        F: Fn(&T, usize) -> f64,
    {
        let arr = col
            .as_any()
            .downcast_ref::<T>()
            .context("unexpected array type")?;
        Ok(ColumnData::Numeric(
            (0..arr.len())
                .map(|i| if arr.is_null(i) { f64::NAN } else { f(arr, i) })
                .collect(),
        ))
    }

    match col.data_type() {
        DataType::Float64 => numeric::<Float64Array, _>(col, |a, i| a.value(i)),
        DataType::Float32 => numeric::<Float32Array, _>(col, |a, i| a.value(i) as f64),
        DataType::Int64 => numeric::<Int64Array, _>(col, |a, i| a.value(i) as f64),
        DataType::Int32 => numeric::<Int32Array, _>(col, |a, i| a.value(i) as f64),
        DataType::Boolean => {
            numeric::<BooleanArray, _>(col, |a, i| if a.value(i) { 1.0 } else { 0.0 })
        }
        DataType::Utf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<StringArray>()
                .context("expected StringArray")?;
            Ok(ColumnData::Text(
                arr.iter().map(|v| v.unwrap_or("").to_string()).collect(),
            ))
        }
        DataType::LargeUtf8 => {
            let arr = col
                .as_any()
                .downcast_ref::<LargeStringArray>()
                .context("expected LargeStringArray")?;
            Ok(ColumnData::Text(
                arr.iter().map(|v| v.unwrap_or("").to_string()).collect(),
            ))
        }
        other => bail!("unsupported column type {other:?}"),
    }
}

fn save_parquet(table: &FeatureTable, path: &Path) -> Result<()> {
    let fields: Vec<Field> = table
        .columns()
        .iter()
        .map(|c| match c.data {
            ColumnData::Numeric(_) => Field::new(c.name.clone(), DataType::Float64, true),
            ColumnData::Text(_) => Field::new(c.name.clone(), DataType::Utf8, true),
        })
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let arrays: Vec<ArrayRef> = table
        .columns()
        .iter()
        .map(|c| -> ArrayRef {
            match &c.data {
                ColumnData::Numeric(v) => Arc::new(Float64Array::from(v.clone())),
                ColumnData::Text(v) => Arc::new(StringArray::from(v.clone())),
            }
        })
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;
    let file = std::fs::File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
