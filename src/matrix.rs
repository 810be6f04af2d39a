//! Compressed sparse row matrix and the labeled dataset handed to trainers.

use crate::errors::PipelineError;

/// Row-major sparse matrix of `f64`. Zeros are never stored and column
/// indices within a row are strictly increasing.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// An empty matrix with `cols` columns and no rows.
    pub fn new(cols: usize) -> Self {
        Self {
            cols,
            indptr: vec![0],
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Append a row given as `(column, value)` pairs in any order.
    /// Zero values are dropped and duplicate columns are summed.
    ///
    /// # Panics
    ///
    /// Panics if a column index is out of range.
    pub fn push_row<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut row: Vec<(usize, f64)> = entries.into_iter().collect();
        row.sort_by_key(|(col, _)| *col);

        let mut last: Option<usize> = None;
        for (col, value) in row {
            assert!(col < self.cols, "column {} out of range ({})", col, self.cols);
            if last == Some(col) {
                if let Some(v) = self.values.last_mut() {
                    *v += value;
                }
                continue;
            }
            self.indices.push(col);
            self.values.push(value);
            last = Some(col);
        }

        // Summed duplicates may cancel out; drop any zeros in this row.
        let start = self.indptr[self.indptr.len() - 1];
        let mut write = start;
        for read in start..self.values.len() {
            if self.values[read] != 0.0 {
                self.indices[write] = self.indices[read];
                self.values[write] = self.values[read];
                write += 1;
            }
        }
        self.indices.truncate(write);
        self.values.truncate(write);
        self.indptr.push(write);
    }

    /// Build from dense rows; every row must have the same width.
    pub fn from_dense(rows: &[Vec<f64>]) -> Result<Self, PipelineError> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut matrix = Self::new(cols);
        for row in rows {
            if row.len() != cols {
                return Err(PipelineError::ColumnMismatch {
                    expected: cols,
                    actual: row.len(),
                });
            }
            matrix.push_row(row.iter().copied().enumerate());
        }
        Ok(matrix)
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.cols
    }

    /// Number of stored (non-zero) entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        (&self.indices[start..end], &self.values[start..end])
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (indices, values) = self.row(i);
        match indices.binary_search(&j) {
            Ok(pos) => values[pos],
            Err(_) => 0.0,
        }
    }

    /// Column-major copy: for each column, the `(row, value)` pairs in row order.
    pub fn columns(&self) -> Vec<Vec<(usize, f64)>> {
        let mut cols = vec![Vec::new(); self.cols];
        for i in 0..self.n_rows() {
            let (indices, values) = self.row(i);
            for (&j, &v) in indices.iter().zip(values) {
                cols[j].push((i, v));
            }
        }
        cols
    }

    /// Multiply every stored value in column `j` by `factors[j]`.
    pub fn scale_columns(&mut self, factors: &[f64]) -> Result<(), PipelineError> {
        if factors.len() != self.cols {
            return Err(PipelineError::ColumnMismatch {
                expected: self.cols,
                actual: factors.len(),
            });
        }
        for (j, v) in self.indices.iter().zip(self.values.iter_mut()) {
            *v *= factors[*j];
        }
        Ok(())
    }

    /// Scale each row to unit Euclidean length. All-zero rows are left alone.
    pub fn normalize_rows_l2(&mut self) {
        for i in 0..self.n_rows() {
            let (start, end) = (self.indptr[i], self.indptr[i + 1]);
            let norm = self.values[start..end]
                .iter()
                .map(|v| v * v)
                .sum::<f64>()
                .sqrt();
            if norm > 0.0 {
                for v in &mut self.values[start..end] {
                    *v /= norm;
                }
            }
        }
    }
}

/// A feature matrix paired with one 0/1 label per row.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    pub features: CsrMatrix,
    pub labels: Vec<f64>,
}

impl LabeledDataset {
    pub fn new(features: CsrMatrix, labels: Vec<f64>) -> Result<Self, PipelineError> {
        if features.n_rows() != labels.len() {
            return Err(PipelineError::LabelMismatch {
                rows: features.n_rows(),
                labels: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&y| y > 0.5).count()
    }
}
