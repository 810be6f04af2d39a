//! The bundled fixed-sample dataset.
//!
//! A small labeled numeric table (four tumour measurements and a benign/
//! malignant label) compiled into the binary. It needs no text processing
//! and goes straight to the trainer.

use crate::errors::AcquireError;
use crate::matrix::{CsrMatrix, LabeledDataset};

const SAMPLE_CSV: &str = include_str!("../data/sample.csv");

/// Column names of the bundled sample, in feature order.
pub const SAMPLE_FEATURES: [&str; 4] = [
    "mean_radius",
    "mean_texture",
    "mean_smoothness",
    "mean_concavity",
];

/// Load the bundled sample as a labeled dataset.
pub fn load_sample() -> Result<LabeledDataset, AcquireError> {
    parse_labeled_csv(SAMPLE_CSV)
}

/// Parse `feature,...,label` lines. Blank lines and `#` comments are skipped;
/// the label column must be 0 or 1.
pub fn parse_labeled_csv(content: &str) -> Result<LabeledDataset, AcquireError> {
    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut width = None;

    for (line_idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 2 {
            return Err(AcquireError::Sample(format!(
                "line {}: expected at least 2 columns",
                line_idx + 1
            )));
        }
        let features = parts.len() - 1;
        match width {
            None => width = Some(features),
            Some(w) if w != features => {
                return Err(AcquireError::Sample(format!(
                    "line {}: expected {} features, got {}",
                    line_idx + 1,
                    w,
                    features
                )))
            }
            _ => {}
        }

        let mut row = Vec::with_capacity(features);
        for (col, part) in parts[..features].iter().enumerate() {
            let value = part.parse::<f64>().map_err(|_| {
                AcquireError::Sample(format!(
                    "line {}, column {}: invalid number '{}'",
                    line_idx + 1,
                    col + 1,
                    part
                ))
            })?;
            row.push(value);
        }

        let label = match parts[features] {
            "0" => 0.0,
            "1" => 1.0,
            other => {
                return Err(AcquireError::Sample(format!(
                    "line {}: label must be 0 or 1, got '{}'",
                    line_idx + 1,
                    other
                )))
            }
        };

        rows.push(row);
        labels.push(label);
    }

    if rows.is_empty() {
        return Err(AcquireError::Sample("dataset is empty".to_string()));
    }

    let matrix = CsrMatrix::from_dense(&rows).map_err(|e| AcquireError::Sample(e.to_string()))?;
    LabeledDataset::new(matrix, labels).map_err(|e| AcquireError::Sample(e.to_string()))
}
