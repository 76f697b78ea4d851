//! In-memory datasets feeding the upstream batch iterator.
//!
//! Provides the [`Dataset`] trait and the [`ArrowDataset`] implementation.
//! A dataset is a sequence of Arrow record batches ("parts"); rows are
//! addressed by a global index across all parts.

use std::{ops::Range, sync::Arc};

use arrow::{array::RecordBatch, compute::concat_batches, datatypes::SchemaRef};

use crate::error::{Error, Result};

/// A dataset that can be iterated over.
///
/// Datasets provide access to tabular data stored as Arrow RecordBatches.
/// All implementations must be thread-safe (Send + Sync).
pub trait Dataset: Send + Sync {
    /// Returns the total number of rows in the dataset.
    fn len(&self) -> usize;

    /// Returns true if the dataset contains no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a single row as a RecordBatch with one row.
    ///
    /// Returns `None` if the index is out of bounds.
    fn get(&self, index: usize) -> Option<RecordBatch>;

    /// Returns the schema of the dataset.
    fn schema(&self) -> SchemaRef;

    /// Returns the number of batches in the dataset.
    fn num_batches(&self) -> usize;

    /// Returns a specific batch by index.
    fn get_batch(&self, index: usize) -> Option<&RecordBatch>;

    /// Returns `len` consecutive rows starting at `start`.
    ///
    /// Returns `None` if the range is out of bounds.
    fn slice(&self, start: usize, len: usize) -> Option<RecordBatch> {
        if start + len > self.len() {
            return None;
        }
        let rows = (start..start + len)
            .map(|i| self.get(i))
            .collect::<Option<Vec<_>>>()?;
        concat_batches(&self.schema(), &rows).ok()
    }

    /// Global row ranges of each part, in order.
    fn part_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        (0..self.num_batches())
            .filter_map(|i| self.get_batch(i))
            .map(|batch| {
                let range = start..start + batch.num_rows();
                start = range.end;
                range
            })
            .collect()
    }
}

/// An in-memory dataset backed by Arrow RecordBatches.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use arrow::{
///     array::{ArrayRef, Int64Array, RecordBatch},
///     datatypes::{DataType, Field, Schema},
/// };
/// use puente::{ArrowDataset, Dataset};
///
/// let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
/// let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
/// let batch = RecordBatch::try_new(schema, vec![ids]).unwrap();
/// let dataset = ArrowDataset::from_batch(batch).unwrap();
/// assert_eq!(dataset.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ArrowDataset {
    batches: Vec<RecordBatch>,
    schema: SchemaRef,
    row_count: usize,
}

impl ArrowDataset {
    /// Creates a new ArrowDataset from a vector of RecordBatches.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The batches vector is empty
    /// - The batches have inconsistent schemas
    pub fn new(batches: Vec<RecordBatch>) -> Result<Self> {
        if batches.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let schema = batches[0].schema();

        for (i, batch) in batches.iter().enumerate().skip(1) {
            if batch.schema() != schema {
                return Err(Error::schema_mismatch(format!(
                    "Batch {} has different schema than batch 0",
                    i
                )));
            }
        }

        let row_count = batches.iter().map(|b| b.num_rows()).sum();

        Ok(Self {
            batches,
            schema,
            row_count,
        })
    }

    /// Creates an ArrowDataset from a single RecordBatch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch is empty.
    pub fn from_batch(batch: RecordBatch) -> Result<Self> {
        Self::new(vec![batch])
    }

    /// Returns the underlying batches.
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Consumes the dataset and returns the underlying batches.
    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }

    /// Finds the batch and local row index for a global row index.
    fn find_row(&self, global_index: usize) -> Option<(usize, usize)> {
        if global_index >= self.row_count {
            return None;
        }

        let mut remaining = global_index;
        for (batch_idx, batch) in self.batches.iter().enumerate() {
            let batch_rows = batch.num_rows();
            if remaining < batch_rows {
                return Some((batch_idx, remaining));
            }
            remaining -= batch_rows;
        }

        None
    }
}

impl Dataset for ArrowDataset {
    fn len(&self) -> usize {
        self.row_count
    }

    fn get(&self, index: usize) -> Option<RecordBatch> {
        let (batch_idx, local_idx) = self.find_row(index)?;
        let batch = &self.batches[batch_idx];
        Some(batch.slice(local_idx, 1))
    }

    fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn get_batch(&self, index: usize) -> Option<&RecordBatch> {
        self.batches.get(index)
    }

    /// Slices parts in place; a range within one part shares its buffers.
    fn slice(&self, start: usize, len: usize) -> Option<RecordBatch> {
        if start + len > self.row_count {
            return None;
        }
        let (mut batch_idx, mut offset) = match self.find_row(start) {
            Some(found) => found,
            None => return (len == 0).then(|| RecordBatch::new_empty(self.schema())),
        };
        let mut pieces = Vec::new();
        let mut needed = len;
        while needed > 0 {
            let batch = self.batches.get(batch_idx)?;
            let take = needed.min(batch.num_rows() - offset);
            pieces.push(batch.slice(offset, take));
            needed -= take;
            batch_idx += 1;
            offset = 0;
        }
        match pieces.len() {
            0 => Some(RecordBatch::new_empty(self.schema())),
            1 => pieces.pop(),
            _ => concat_batches(&self.schema, &pieces).ok(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::uninlined_format_args
)]
mod tests {
    use arrow::{
        array::{Array, Int32Array, Int64Array, ListArray},
        datatypes::{DataType, Field, Int64Type, Schema},
    };

    use super::*;

    fn create_test_batch(start: i32, count: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int32, false),
            Field::new("label", DataType::Int64, false),
        ]));

        let ids: Vec<i32> = (start..start + count as i32).collect();
        let labels: Vec<i64> = ids.iter().map(|&i| i64::from(i % 2)).collect();

        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from(ids)), Arc::new(Int64Array::from(labels))],
        )
        .ok()
        .unwrap_or_else(|| panic!("Failed to create test batch"))
    }

    fn ids(batch: &RecordBatch) -> Vec<i32> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap_or_else(|| panic!("id column should be Int32"))
            .values()
            .to_vec()
    }

    #[test]
    fn test_new_dataset() {
        let batch = create_test_batch(0, 10);
        let dataset = ArrowDataset::new(vec![batch])
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));
        assert_eq!(dataset.len(), 10);
        assert!(!dataset.is_empty());
    }

    #[test]
    fn test_empty_dataset_error() {
        let result = ArrowDataset::new(vec![]);
        assert!(matches!(result, Err(Error::EmptyDataset)));
    }

    #[test]
    fn test_schema_mismatch() {
        let other = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1i64]))],
        )
        .ok()
        .unwrap_or_else(|| panic!("Should create batch"));
        let result = ArrowDataset::new(vec![create_test_batch(0, 2), other]);
        assert!(matches!(result, Err(Error::SchemaMismatch { .. })));
    }

    #[test]
    fn test_get_row_across_batches() {
        let dataset = ArrowDataset::new(vec![create_test_batch(0, 5), create_test_batch(5, 5)])
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));

        assert_eq!(dataset.num_batches(), 2);
        let row = dataset.get(7).unwrap_or_else(|| panic!("Row should exist"));
        assert_eq!(ids(&row), vec![7]);
        assert!(dataset.get(10).is_none());
        assert!(dataset.get_batch(1).is_some());
        assert!(dataset.get_batch(2).is_none());
    }

    #[test]
    fn test_slice_within_part_shares_buffers() {
        let batch = create_test_batch(0, 10);
        let ptr = batch.column(0).to_data().buffers()[0].as_ptr();
        let dataset = ArrowDataset::from_batch(batch)
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));

        let slice = dataset.slice(0, 4).unwrap_or_else(|| panic!("Slice should exist"));
        assert_eq!(ids(&slice), vec![0, 1, 2, 3]);
        assert_eq!(slice.column(0).to_data().buffers()[0].as_ptr(), ptr);
    }

    #[test]
    fn test_slice_across_parts() {
        let dataset = ArrowDataset::new(vec![create_test_batch(0, 3), create_test_batch(3, 3)])
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));

        let slice = dataset.slice(2, 3).unwrap_or_else(|| panic!("Slice should exist"));
        assert_eq!(ids(&slice), vec![2, 3, 4]);
        assert!(dataset.slice(5, 2).is_none());
        assert_eq!(dataset.slice(6, 0).map(|b| b.num_rows()), Some(0));
    }

    #[test]
    fn test_part_ranges() {
        let dataset = ArrowDataset::new(vec![create_test_batch(0, 3), create_test_batch(3, 4)])
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));
        assert_eq!(dataset.part_ranges(), vec![0..3, 3..7]);
    }

    #[test]
    fn test_list_rows() {
        let list = ListArray::from_iter_primitive::<Int64Type, _, _>(vec![
            Some(vec![Some(1)]),
            Some(vec![Some(2), Some(3)]),
            Some(vec![]),
        ]);
        let schema = Arc::new(Schema::new(vec![Field::new(
            "tags",
            list.data_type().clone(),
            true,
        )]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(list)])
            .ok()
            .unwrap_or_else(|| panic!("Should create batch"));
        let dataset = ArrowDataset::from_batch(batch)
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));

        let row = dataset.get(1).unwrap_or_else(|| panic!("Row should exist"));
        assert_eq!(row.num_rows(), 1);
    }

    #[test]
    fn test_clone_and_into_batches() {
        let dataset = ArrowDataset::from_batch(create_test_batch(0, 5))
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"));
        let cloned = dataset.clone();
        assert_eq!(cloned.len(), dataset.len());
        assert_eq!(dataset.into_batches().len(), 1);
    }
}
