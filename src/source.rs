//! Upstream batch sources.
//!
//! A [`BatchSource`] is whatever produces raw `(inputs, targets)` batches:
//! batching, shuffling and sharding all happen behind it. The loader only
//! needs `next`, a non-consuming `peek`, and the array library the source
//! emits so the conversion functions can be resolved up front.

use std::{collections::VecDeque, iter::Peekable};

use arrow::array::RecordBatch;

use crate::{
    batch::RawBatch,
    column::ColumnKind,
    dataloader::{DataLoader, DataLoaderIterator},
    dataset::Dataset,
    device::Device,
    error::{Error, Result},
};

/// Produces raw batches for a loader.
pub trait BatchSource {
    /// Returns the next batch, or `None` at the end of the epoch.
    fn next_batch(&mut self) -> Option<Result<RawBatch>>;

    /// Returns the batch `next_batch` would return, without consuming it.
    fn peek_batch(&mut self) -> Option<Result<RawBatch>>;

    /// The representation this source's columns are in.
    fn array_kind(&self) -> ColumnKind;

    /// Bounds on the number of batches left.
    fn remaining(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// A source yielding pre-built batches in order.
#[derive(Debug, Clone)]
pub struct QueueSource {
    batches: VecDeque<RawBatch>,
    kind: ColumnKind,
}

impl QueueSource {
    /// Creates a source over `batches`, whose columns are of `kind`.
    pub fn new(batches: impl IntoIterator<Item = RawBatch>, kind: ColumnKind) -> Self {
        Self {
            batches: batches.into_iter().collect(),
            kind,
        }
    }

    /// Appends a batch.
    pub fn push(&mut self, batch: RawBatch) {
        self.batches.push_back(batch);
    }

    /// Number of queued batches.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Returns true if no batches are queued.
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

impl BatchSource for QueueSource {
    fn next_batch(&mut self) -> Option<Result<RawBatch>> {
        self.batches.pop_front().map(Ok)
    }

    fn peek_batch(&mut self) -> Option<Result<RawBatch>> {
        self.batches.front().cloned().map(Ok)
    }

    fn array_kind(&self) -> ColumnKind {
        self.kind
    }

    fn remaining(&self) -> (usize, Option<usize>) {
        (self.batches.len(), Some(self.batches.len()))
    }
}

/// Adapts a [`DataLoader`] into a batch source.
///
/// Each record batch is split into inputs and the named target columns.
/// When `device` is the accelerator, columns are uploaded so the source
/// emits accelerator arrays.
pub struct DatasetSource<D: Dataset> {
    batches: Peekable<DataLoaderIterator<D>>,
    targets: Vec<String>,
    device: Device,
}

impl<D: Dataset> DatasetSource<D> {
    /// Creates a source over a loader's epoch.
    pub fn new(loader: DataLoader<D>, targets: Vec<String>, device: Device) -> Self {
        Self {
            batches: loader.into_iter().peekable(),
            targets,
            device,
        }
    }

    /// Names of the target columns.
    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

fn split(batch: &RecordBatch, targets: &[String], device: Device) -> Result<RawBatch> {
    let raw = RawBatch::from_record_batch(batch, targets)?;
    match device {
        Device::Host => Ok(raw),
        Device::Accelerator => raw.upload(),
    }
}

impl<D: Dataset> BatchSource for DatasetSource<D> {
    fn next_batch(&mut self) -> Option<Result<RawBatch>> {
        let batch = self.batches.next()?;
        Some(batch.and_then(|batch| split(&batch, &self.targets, self.device)))
    }

    fn peek_batch(&mut self) -> Option<Result<RawBatch>> {
        let (targets, device) = (&self.targets, self.device);
        match self.batches.peek()? {
            Ok(batch) => Some(split(batch, targets, device)),
            Err(e) => Some(Err(Error::upstream(e.to_string()))),
        }
    }

    fn array_kind(&self) -> ColumnKind {
        match self.device {
            Device::Host => ColumnKind::Host,
            Device::Accelerator => ColumnKind::Accelerator,
        }
    }

    fn remaining(&self) -> (usize, Option<usize>) {
        self.batches.size_hint()
    }
}

impl<D: Dataset> std::fmt::Debug for DatasetSource<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetSource")
            .field("targets", &self.targets)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, Int64Array},
        datatypes::{DataType, Field, Schema},
    };

    use super::*;
    use crate::{batch::Targets, column::RawColumn, dataset::ArrowDataset, map::NamedMap};

    fn dataset(rows: i64) -> ArrowDataset {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("label", DataType::Int64, false),
        ]));
        let x: ArrayRef = Arc::new(Int64Array::from_iter_values(0..rows));
        let label: ArrayRef = Arc::new(Int64Array::from_iter_values((0..rows).map(|v| v % 2)));
        let batch = RecordBatch::try_new(schema, vec![x, label]).unwrap();
        ArrowDataset::from_batch(batch).unwrap()
    }

    #[test]
    fn test_queue_peek_does_not_consume() {
        let raw = |v: i64| {
            let array: ArrayRef = Arc::new(Int64Array::from(vec![v]));
            let inputs: NamedMap<RawColumn> = [("x", RawColumn::new(array))].into_iter().collect();
            RawBatch::new(Some(inputs), Targets::None)
        };
        let mut source = QueueSource::new(vec![raw(1), raw(2)], ColumnKind::Host);
        assert_eq!(source.remaining(), (2, Some(2)));
        assert!(source.peek_batch().is_some());
        assert!(source.peek_batch().is_some());
        assert_eq!(source.len(), 2);
        assert!(source.next_batch().is_some());
        assert!(source.next_batch().is_some());
        assert!(source.next_batch().is_none());
        assert!(source.peek_batch().is_none());
        assert!(source.is_empty());
    }

    #[test]
    fn test_dataset_source_splits_targets() {
        let loader = DataLoader::new(dataset(5)).batch_size(2);
        let mut source = DatasetSource::new(loader, vec!["label".to_string()], Device::Host);
        assert_eq!(source.array_kind(), ColumnKind::Host);
        assert_eq!(source.remaining(), (3, Some(3)));

        let batch = source.next_batch().unwrap().unwrap();
        let inputs = batch.inputs.unwrap();
        assert_eq!(inputs.keys().collect::<Vec<_>>(), vec!["x"]);
        assert!(batch.targets.as_single().is_some());
    }

    #[test]
    fn test_dataset_source_peek() {
        let loader = DataLoader::new(dataset(4)).batch_size(2);
        let mut source = DatasetSource::new(loader, Vec::new(), Device::Host);
        let _ = source.peek_batch().unwrap().unwrap();
        let _ = source.peek_batch().unwrap().unwrap();
        assert_eq!(source.remaining(), (2, Some(2)));
        let _ = source.next_batch().unwrap().unwrap();
        assert_eq!(source.remaining(), (1, Some(1)));
    }

    #[test]
    fn test_dataset_source_uploads() {
        let loader = DataLoader::new(dataset(3)).batch_size(3);
        let mut source = DatasetSource::new(loader, Vec::new(), Device::Accelerator);
        assert_eq!(source.array_kind(), ColumnKind::Accelerator);
        let batch = source.next_batch().unwrap().unwrap();
        let x = batch.inputs.unwrap();
        assert_eq!(x.get("x").unwrap().values().kind(), ColumnKind::Accelerator);
    }

    #[test]
    fn test_dataset_source_missing_target() {
        let loader = DataLoader::new(dataset(3)).batch_size(3);
        let mut source = DatasetSource::new(loader, vec!["nope".to_string()], Device::Host);
        assert!(source.next_batch().unwrap().is_err());
    }
}
