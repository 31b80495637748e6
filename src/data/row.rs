use crate::data::FeaId;

/// A single labelled sparse row: binary label, optional example weight, and
/// an ordered sequence of (feature ID, optional value) pairs. A missing
/// value means 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub label: f32,
    pub weight: Option<f32>,
    pub features: Vec<FeaId>,
    pub values: Option<Vec<f32>>,
}

impl Row {
    pub fn new(label: f32, features: Vec<FeaId>) -> Self {
        Self {
            label,
            weight: None,
            features,
            values: None,
        }
    }

    pub fn with_values(mut self, values: Vec<f32>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// A batched representation of rows: labels, a CSR-style offset array of
/// length n+1, a flat index array, and optional value/weight arrays. Row i
/// spans `offsets[i]..offsets[i+1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock<I> {
    pub labels: Vec<f32>,
    pub offsets: Vec<u32>,
    pub indices: Vec<I>,
    pub values: Option<Vec<f32>>,
    pub weights: Option<Vec<f32>>,
}

impl<I: Copy> RowBlock<I> {
    pub fn num_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn row(&self, i: usize) -> &[I] {
        let lo = self.offsets[i] as usize;
        let hi = self.offsets[i + 1] as usize;
        &self.indices[lo..hi]
    }

    pub fn row_values(&self, i: usize) -> Option<&[f32]> {
        self.values.as_ref().map(|v| {
            let lo = self.offsets[i] as usize;
            let hi = self.offsets[i + 1] as usize;
            &v[lo..hi]
        })
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl RowBlock<FeaId> {
    pub fn from_rows(rows: &[Row]) -> Self {
        let mut labels = Vec::with_capacity(rows.len());
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        let mut weights = Vec::new();
        let mut has_values = false;
        let mut has_weights = false;

        offsets.push(0u32);
        for row in rows {
            labels.push(row.label);
            indices.extend_from_slice(&row.features);
            if let Some(v) = &row.values {
                has_values = true;
                values.extend_from_slice(v);
            } else {
                values.extend(std::iter::repeat(1.0f32).take(row.features.len()));
            }
            if let Some(w) = row.weight {
                has_weights = true;
                weights.push(w);
            } else {
                weights.push(1.0);
            }
            offsets.push(indices.len() as u32);
        }

        Self {
            labels,
            offsets,
            indices,
            values: if has_values { Some(values) } else { None },
            weights: if has_weights { Some(weights) } else { None },
        }
    }
}

/// A row block whose indices have been remapped into `[0, U)`, carried with
/// the dictionary mapping local indices back to original feature IDs.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRowBlock {
    pub block: RowBlock<u32>,
    /// Sorted unique original feature IDs; `dictionary[j]` is the original
    /// ID for local index `j`.
    pub dictionary: Vec<FeaId>,
}

impl LocalRowBlock {
    pub fn num_unique(&self) -> usize {
        self.dictionary.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_row_block_with_implicit_unit_values() {
        let rows = vec![Row::new(1.0, vec![10, 20]), Row::new(-1.0, vec![30])];
        let block = RowBlock::from_rows(&rows);
        assert_eq!(block.num_rows(), 2);
        assert_eq!(block.nnz(), 3);
        assert_eq!(block.row(0), &[10, 20]);
        assert_eq!(block.row(1), &[30]);
        assert!(block.values.is_none());
        assert!(block.weights.is_none());
    }

    #[test]
    fn carries_explicit_values() {
        let rows = vec![Row::new(1.0, vec![1, 2]).with_values(vec![0.5, 2.0])];
        let block = RowBlock::from_rows(&rows);
        assert_eq!(block.row_values(0), Some(&[0.5, 2.0][..]));
    }
}
