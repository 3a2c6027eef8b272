//! CSV loading for the CLI.

use std::path::Path;

use csv::ReaderBuilder;

use cp_types::{input_error, CpResult, Dataset, Label};

/// Load a headed CSV file; `label_column` holds integer labels and every
/// other column is a numeric feature.
pub fn load_csv(path: impl AsRef<Path>, label_column: &str) -> CpResult<Dataset> {
    let path = path.as_ref();
    tracing::info!("Loading CSV data from: {}", path.display());

    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| input_error!("Failed to open CSV file {}: {}", path.display(), e))?;

    let headers = rdr
        .headers()
        .map_err(|e| input_error!("Failed to read CSV headers: {}", e))?
        .clone();
    tracing::debug!("CSV headers: {:?}", headers);
    let label_idx = headers
        .iter()
        .position(|h| h == label_column)
        .ok_or_else(|| input_error!("{} has no column named {:?}", path.display(), label_column))?;

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    for (line_num, result) in rdr.records().enumerate() {
        let line = line_num + 2;
        let record = result.map_err(|e| input_error!("Failed to read CSV record at line {}: {}", line, e))?;

        let mut row = Vec::with_capacity(record.len().saturating_sub(1));
        for (col, field) in record.iter().enumerate() {
            if col == label_idx {
                labels.push(parse_label(field).ok_or_else(|| {
                    input_error!("line {}: label {:?} is not an integer", line, field)
                })?);
            } else {
                row.push(field.parse::<f64>().map_err(|_| {
                    input_error!("line {}, column {:?}: {:?} is not a number", line, &headers[col], field)
                })?);
            }
        }
        rows.push(row);
    }

    tracing::info!("Loaded {} rows from CSV file", rows.len());
    Dataset::new(rows, labels)
}

fn parse_label(field: &str) -> Option<Label> {
    if let Ok(v) = field.parse::<Label>() {
        return Some(v);
    }
    let v = field.parse::<f64>().ok()?;
    (v.fract() == 0.0 && v.is_finite()).then_some(v as Label)
}
