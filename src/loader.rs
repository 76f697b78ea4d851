//! Iterating a batch source as framework batches.
//!
//! [`FrameworkLoader`] pairs a [`BatchSource`] with a [`BatchConverter`].
//! The converter is built once, from the source's declared array kind, so
//! the conversion functions are never re-selected per batch.
//!
//! ```
//! use std::sync::Arc;
//!
//! use arrow::{
//!     array::{Float32Array, Int64Array, RecordBatch},
//!     datatypes::{DataType, Field, Schema},
//! };
//! use puente::{ArrowDataset, FrameworkLoader, LoaderConfig};
//!
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("x", DataType::Float32, false),
//!     Field::new("y", DataType::Int64, false),
//! ]));
//! let batch = RecordBatch::try_new(
//!     schema,
//!     vec![
//!         Arc::new(Float32Array::from(vec![0.5, 1.5, 2.5])),
//!         Arc::new(Int64Array::from(vec![0, 1, 0])),
//!     ],
//! )
//! .unwrap();
//! let dataset = ArrowDataset::from_batch(batch).unwrap();
//!
//! let config = LoaderConfig::new().batch_size(2);
//! let loader = FrameworkLoader::from_dataset(dataset, &config, vec!["y".into()]).unwrap();
//! assert_eq!(loader.size_hint(), (2, Some(2)));
//!
//! for batch in loader {
//!     let batch = batch.unwrap();
//!     assert!(batch.inputs.contains_key("x"));
//!     assert!(batch.targets.as_single().is_some());
//! }
//! ```

use tracing::debug;

use crate::{
    batch::{BatchConverter, ConvertedBatch, Targets},
    column::NativeArray,
    config::LoaderConfig,
    dataloader::DataLoader,
    dataset::Dataset,
    device::Device,
    error::Result,
    map::FlatMap,
    source::{BatchSource, DatasetSource},
    transform::BatchTransform,
};

/// Yields converted batches from an upstream source.
pub struct FrameworkLoader<S: BatchSource> {
    source: S,
    converter: BatchConverter,
}

impl<S: BatchSource> FrameworkLoader<S> {
    /// Wraps `source`, selecting conversions for its array kind.
    pub fn new(source: S) -> Self {
        let kind = source.array_kind();
        debug!(source = %kind, "building framework loader");
        Self {
            source,
            converter: BatchConverter::new(kind),
        }
    }

    /// Fixes the output device.
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.converter = self.converter.with_device(device);
        self
    }

    /// Registers a function to run on every batch after conversion.
    #[must_use]
    pub fn map<F>(mut self, func: F) -> Self
    where
        F: Fn(FlatMap, Targets<NativeArray>) -> Result<(FlatMap, Targets<NativeArray>)>
            + Send
            + Sync
            + 'static,
    {
        self.converter = self.converter.map(func);
        self
    }

    /// Registers a transform to run on every batch after conversion.
    #[must_use]
    pub fn with_transform<T: BatchTransform + 'static>(mut self, transform: T) -> Self {
        self.converter = self.converter.with_transform(transform);
        self
    }

    /// The converter applied to each batch.
    pub fn converter(&self) -> &BatchConverter {
        &self.converter
    }

    /// The upstream source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Consumes the loader, returning the upstream source.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Converts the next batch without advancing the source.
    ///
    /// Registered transforms are not applied to the peeked batch; they run
    /// once, when [`Iterator::next`] yields the same batch.
    pub fn peek(&mut self) -> Option<Result<ConvertedBatch>> {
        let batch = self.source.peek_batch()?;
        Some(batch.and_then(|batch| self.converter.convert_batch(batch)))
    }
}

impl<D: Dataset> FrameworkLoader<DatasetSource<D>> {
    /// Builds a loader over an in-memory dataset.
    ///
    /// Columns named in `targets` are split off into the batch targets.
    /// When the config fixes a device, upstream columns are produced there
    /// and the output is fixed to it as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    pub fn from_dataset(dataset: D, config: &LoaderConfig, targets: Vec<String>) -> Result<Self> {
        let loader = DataLoader::from_config(dataset, config)?;
        let device = config.device.unwrap_or(Device::Host);
        let mut framework = Self::new(DatasetSource::new(loader, targets, device));
        if let Some(device) = config.device {
            framework = framework.with_device(device);
        }
        Ok(framework)
    }
}

impl<S: BatchSource> Iterator for FrameworkLoader<S> {
    type Item = Result<ConvertedBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.source.next_batch()?;
        Some(batch.and_then(|batch| self.converter.process(batch)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.source.remaining()
    }
}

impl<S: BatchSource + std::fmt::Debug> std::fmt::Debug for FrameworkLoader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkLoader")
            .field("source", &self.source)
            .field("converter", &self.converter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use arrow::array::{Array, ArrayRef, Int64Array, RecordBatch};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;
    use crate::{
        batch::RawBatch,
        column::{ColumnKind, RawColumn},
        dataset::ArrowDataset,
        error::Error,
        map::NamedMap,
        source::QueueSource,
    };

    fn raw(values: Vec<i64>) -> RawBatch {
        let array: ArrayRef = Arc::new(Int64Array::from(values));
        let inputs: NamedMap<RawColumn> = [("x", RawColumn::new(array))].into_iter().collect();
        RawBatch::new(Some(inputs), Targets::None)
    }

    fn first_value(batch: &ConvertedBatch) -> i64 {
        let x = batch.inputs.get("x").unwrap().as_host().unwrap();
        x.as_any().downcast_ref::<Int64Array>().unwrap().value(0)
    }

    fn queue(batches: Vec<RawBatch>) -> FrameworkLoader<QueueSource> {
        FrameworkLoader::new(QueueSource::new(batches, ColumnKind::Host)).with_device(Device::Host)
    }

    #[test]
    fn test_peek_then_next_yield_same_batch() {
        let mut loader = queue(vec![raw(vec![1, 2]), raw(vec![3, 4])]);

        let first = loader.peek().unwrap().unwrap();
        let again = loader.peek().unwrap().unwrap();
        assert_eq!(first_value(&first), 1);
        assert_eq!(first_value(&again), 1);
        assert_eq!(loader.size_hint(), (2, Some(2)));

        assert_eq!(first_value(&loader.next().unwrap().unwrap()), 1);
        assert_eq!(first_value(&loader.next().unwrap().unwrap()), 3);
        assert!(loader.peek().is_none());
        assert!(loader.next().is_none());
    }

    #[test]
    fn test_transforms_skip_peek() {
        let mut loader = queue(vec![raw(vec![5])]).map(|mut inputs, targets| {
            let x = inputs.remove("x").unwrap();
            inputs.insert("renamed", x);
            Ok((inputs, targets))
        });

        let peeked = loader.peek().unwrap().unwrap();
        assert!(peeked.inputs.contains_key("x"));
        assert!(!peeked.inputs.contains_key("renamed"));

        let batch = loader.next().unwrap().unwrap();
        assert!(batch.inputs.contains_key("renamed"));
        assert!(!batch.inputs.contains_key("x"));
    }

    #[test]
    fn test_transform_runs_once_per_batch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut loader = queue(vec![raw(vec![1])]).map(move |inputs, targets| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok((inputs, targets))
        });

        loader.peek().unwrap().unwrap();
        loader.peek().unwrap().unwrap();
        loader.next().unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_transform_error_propagates() {
        let mut loader = queue(vec![raw(vec![1])]).map(|_, _| Err(Error::transform("boom")));
        assert!(matches!(loader.next(), Some(Err(Error::Transform { .. }))));
        assert!(loader.next().is_none());
    }

    #[test]
    fn test_output_follows_input_device() {
        let mut loader =
            FrameworkLoader::new(QueueSource::new(vec![raw(vec![1])], ColumnKind::Host));
        let batch = loader.next().unwrap().unwrap();
        assert_eq!(batch.inputs.get("x").unwrap().kind(), ColumnKind::Host);

        let on_device: NamedMap<RawColumn> =
            [("x", RawColumn::new(crate::accel::DeviceArray::from_slice(&[1i64])))]
                .into_iter()
                .collect();
        let mut loader = FrameworkLoader::new(QueueSource::new(
            vec![RawBatch::new(Some(on_device), Targets::None)],
            ColumnKind::Accelerator,
        ));
        let batch = loader.next().unwrap().unwrap();
        assert_eq!(batch.inputs.get("x").unwrap().kind(), ColumnKind::Framework);
    }

    #[test]
    fn test_from_dataset() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
        ]));
        let col = |v: i64| -> ArrayRef { Arc::new(Int64Array::from(vec![v; 4])) };
        let batch = RecordBatch::try_new(schema, vec![col(1), col(2), col(3)]).unwrap();
        let dataset = ArrowDataset::from_batch(batch).unwrap();

        let config = LoaderConfig::new().batch_size(3).device(Device::Accelerator);
        let loader =
            FrameworkLoader::from_dataset(dataset, &config, vec!["a".into(), "b".into()]).unwrap();
        assert_eq!(loader.converter().device(), Some(Device::Accelerator));
        assert_eq!(loader.source().array_kind(), ColumnKind::Accelerator);

        let batches: Vec<_> = loader.collect::<Result<_>>().unwrap();
        assert_eq!(batches.len(), 2);
        let targets = batches[0].targets.as_multi().unwrap();
        assert_eq!(targets.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(targets.get("a").unwrap().kind(), ColumnKind::Framework);
    }

    #[test]
    fn test_from_dataset_rejects_invalid_config() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, false)])),
            vec![Arc::new(Int64Array::from(vec![1]))],
        )
        .unwrap();
        let dataset = ArrowDataset::from_batch(batch).unwrap();
        let config = LoaderConfig::new().batch_size(0);
        assert!(FrameworkLoader::from_dataset(dataset, &config, Vec::new()).is_err());
    }
}
