//! Upstream batching over an in-memory dataset.
//!
//! [`DataLoader`] turns a [`Dataset`] into an epoch of record batches. It
//! owns everything that decides which rows land in which batch: batch
//! size, chunked shuffling, worker sharding and `drop_last`.
//!
//! Shuffling works on a window of `parts_per_chunk` dataset parts at a
//! time: the part order is shuffled, then rows are shuffled within each
//! window. With one window covering the whole dataset this is a full
//! shuffle.

use std::{ops::Range, sync::Arc};

use arrow::{array::RecordBatch, compute::concat_batches, error::ArrowError};
#[cfg(feature = "shuffle")]
use rand::{seq::SliceRandom, SeedableRng};

use crate::{config::LoaderConfig, dataset::Dataset, error::Result};

/// Batches one worker's share of a dataset.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use arrow::{
/// #     array::{ArrayRef, Int64Array, RecordBatch},
/// #     datatypes::{DataType, Field, Schema},
/// # };
/// use puente::{ArrowDataset, DataLoader};
///
/// # let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
/// # let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(0..100));
/// # let batch = RecordBatch::try_new(schema, vec![ids]).unwrap();
/// let dataset = ArrowDataset::from_batch(batch).unwrap();
/// let loader = DataLoader::new(dataset)
///     .batch_size(32)
///     .shuffle(true)
///     .seed(42);
///
/// for batch in loader {
///     println!("Processing batch with {} rows", batch.unwrap().num_rows());
/// }
/// ```
#[derive(Debug)]
pub struct DataLoader<D: Dataset> {
    dataset: Arc<D>,
    batch_size: usize,
    #[allow(dead_code)] // Used only with shuffle feature
    shuffle: bool,
    drop_last: bool,
    #[allow(dead_code)] // Used only with shuffle feature
    seed: Option<u64>,
    #[allow(dead_code)] // Used only with shuffle feature
    parts_per_chunk: usize,
    global_size: usize,
    global_rank: usize,
}

impl<D: Dataset> DataLoader<D> {
    /// Creates a new DataLoader wrapping the given dataset.
    ///
    /// Default configuration:
    /// - batch_size: 1
    /// - shuffle: false
    /// - drop_last: false
    /// - seed: None (random)
    /// - parts_per_chunk: 1
    /// - unsharded
    pub fn new(dataset: D) -> Self {
        Self {
            dataset: Arc::new(dataset),
            batch_size: 1,
            shuffle: false,
            drop_last: false,
            seed: None,
            parts_per_chunk: 1,
            global_size: 1,
            global_rank: 0,
        }
    }

    /// Creates a DataLoader from a validated config.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is inconsistent, or if it asks for
    /// shuffling without the `shuffle` feature.
    pub fn from_config(dataset: D, config: &LoaderConfig) -> Result<Self> {
        config.validate()?;

        #[allow(unused_mut)]
        let mut loader = Self::new(dataset)
            .batch_size(config.batch_size)
            .drop_last(config.drop_last)
            .parts_per_chunk(config.parts_per_chunk)
            .shard(config.shards(), config.rank());

        #[cfg(feature = "shuffle")]
        {
            loader = loader.shuffle(config.shuffle);
            if let Some(seed) = config.seed {
                loader = loader.seed(seed);
            }
        }
        #[cfg(not(feature = "shuffle"))]
        if config.shuffle {
            return Err(crate::error::Error::invalid_config(
                "shuffling requires the `shuffle` feature",
            ));
        }

        Ok(loader)
    }

    /// Sets the batch size.
    ///
    /// Each iteration will yield a RecordBatch with at most this many rows.
    /// The final batch may have fewer rows unless `drop_last` is set.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Enables or disables shuffling.
    ///
    /// When enabled, the row order is randomized before each epoch.
    /// Requires the `shuffle` feature.
    #[cfg(feature = "shuffle")]
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Sets whether to drop the last incomplete batch.
    ///
    /// When true, if the shard size is not evenly divisible by the batch
    /// size, the final partial batch is skipped.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Sets the random seed for shuffling.
    ///
    /// Setting a seed makes shuffling deterministic and reproducible.
    /// Requires the `shuffle` feature.
    #[cfg(feature = "shuffle")]
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets how many dataset parts are shuffled together.
    #[must_use]
    pub fn parts_per_chunk(mut self, parts: usize) -> Self {
        self.parts_per_chunk = parts.max(1);
        self
    }

    /// Restricts iteration to shard `rank` of `size` contiguous shards.
    #[must_use]
    pub fn shard(mut self, size: usize, rank: usize) -> Self {
        self.global_size = size.max(1);
        self.global_rank = rank.min(self.global_size - 1);
        self
    }

    /// Returns the configured batch size.
    pub fn get_batch_size(&self) -> usize {
        self.batch_size
    }

    /// Returns whether shuffling is enabled.
    pub fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    /// Returns whether drop_last is enabled.
    pub fn is_drop_last(&self) -> bool {
        self.drop_last
    }

    /// The global rows this worker reads.
    pub fn shard_range(&self) -> Range<usize> {
        let len = self.dataset.len();
        let start = len * self.global_rank / self.global_size;
        let end = len * (self.global_rank + 1) / self.global_size;
        start..end
    }

    /// Returns the number of batches that will be yielded.
    pub fn num_batches(&self) -> usize {
        let len = self.shard_range().len();
        if self.drop_last {
            len / self.batch_size
        } else {
            len.div_ceil(self.batch_size)
        }
    }

    /// Returns the total number of rows in the underlying dataset.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    /// Returns true if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Row order for one epoch.
    fn epoch_indices(&self) -> Vec<usize> {
        let shard = self.shard_range();
        let parts: Vec<Range<usize>> = self
            .dataset
            .part_ranges()
            .into_iter()
            .map(|part| part.start.max(shard.start)..part.end.min(shard.end))
            .filter(|part| !part.is_empty())
            .collect();

        #[cfg(feature = "shuffle")]
        if self.shuffle {
            let mut rng = match self.seed {
                Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
                None => rand::rngs::StdRng::from_entropy(),
            };
            let mut parts = parts;
            parts.shuffle(&mut rng);
            return parts
                .chunks(self.parts_per_chunk)
                .flat_map(|window| {
                    let mut rows: Vec<usize> = window.iter().cloned().flatten().collect();
                    rows.shuffle(&mut rng);
                    rows
                })
                .collect();
        }

        parts.into_iter().flatten().collect()
    }
}

impl<D: Dataset> IntoIterator for DataLoader<D> {
    type Item = Result<RecordBatch>;
    type IntoIter = DataLoaderIterator<D>;

    fn into_iter(self) -> Self::IntoIter {
        let indices = self.epoch_indices();
        DataLoaderIterator {
            dataset: self.dataset,
            batch_size: self.batch_size,
            drop_last: self.drop_last,
            indices,
            position: 0,
        }
    }
}

/// One epoch of record batches.
pub struct DataLoaderIterator<D: Dataset> {
    dataset: Arc<D>,
    batch_size: usize,
    drop_last: bool,
    indices: Vec<usize>,
    position: usize,
}

impl<D: Dataset> DataLoaderIterator<D> {
    /// Gathers rows, slicing runs of consecutive indices in one go.
    fn gather(&self, rows: &[usize]) -> Result<RecordBatch> {
        let mut pieces = Vec::new();
        let mut rest = rows;
        while let Some(&start) = rest.first() {
            let run = rest
                .iter()
                .enumerate()
                .take_while(|&(i, &row)| row == start + i)
                .count();
            let piece = self.dataset.slice(start, run).ok_or_else(|| {
                ArrowError::InvalidArgumentError(format!(
                    "rows {start}..{} out of bounds for {} rows",
                    start + run,
                    self.dataset.len()
                ))
            })?;
            pieces.push(piece);
            rest = &rest[run..];
        }
        if pieces.len() == 1 {
            if let Some(piece) = pieces.pop() {
                return Ok(piece);
            }
        }
        Ok(concat_batches(&self.dataset.schema(), &pieces)?)
    }
}

impl<D: Dataset> Iterator for DataLoaderIterator<D> {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.indices.len() {
            return None;
        }

        let remaining = self.indices.len() - self.position;
        let batch_size = remaining.min(self.batch_size);

        // Skip incomplete batch if drop_last is set
        if self.drop_last && batch_size < self.batch_size {
            return None;
        }

        let start = self.position;
        self.position += batch_size;
        Some(self.gather(&self.indices[start..start + batch_size]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.indices.len().saturating_sub(self.position);
        let batches = if self.drop_last {
            remaining / self.batch_size
        } else {
            remaining.div_ceil(self.batch_size)
        };
        (batches, Some(batches))
    }
}

impl<D: Dataset> std::fmt::Debug for DataLoaderIterator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoaderIterator")
            .field("batch_size", &self.batch_size)
            .field("position", &self.position)
            .field("rows", &self.indices.len())
            .finish()
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
        array::{Array, Int32Array},
        datatypes::{DataType, Field, Schema},
    };

    use super::*;
    use crate::{error::Error, ArrowDataset};

    fn create_part(start: i32, rows: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
        let ids: Vec<i32> = (start..start + rows as i32).collect();
        RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(ids))])
            .ok()
            .unwrap_or_else(|| panic!("Should create batch"))
    }

    fn create_test_dataset(rows: usize) -> ArrowDataset {
        ArrowDataset::from_batch(create_part(0, rows))
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"))
    }

    fn create_parted_dataset(parts: usize, rows_per_part: usize) -> ArrowDataset {
        let batches = (0..parts)
            .map(|p| create_part((p * rows_per_part) as i32, rows_per_part))
            .collect();
        ArrowDataset::new(batches)
            .ok()
            .unwrap_or_else(|| panic!("Should create dataset"))
    }

    fn ids(batch: &RecordBatch) -> Vec<i32> {
        batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap_or_else(|| panic!("Should be Int32Array"))
            .values()
            .to_vec()
    }

    fn collect_ids<D: Dataset>(loader: DataLoader<D>) -> Vec<Vec<i32>> {
        loader
            .into_iter()
            .map(|batch| ids(&batch.unwrap_or_else(|e| panic!("batch failed: {e}"))))
            .collect()
    }

    #[test]
    fn test_basic_iteration() {
        let loader = DataLoader::new(create_test_dataset(10)).batch_size(3);
        let batches = collect_ids(loader);
        assert_eq!(batches.len(), 4); // 3 + 3 + 3 + 1
        assert_eq!(batches[0], vec![0, 1, 2]);
        assert_eq!(batches[3], vec![9]);
    }

    #[test]
    fn test_batches_span_parts() {
        let loader = DataLoader::new(create_parted_dataset(3, 2)).batch_size(4);
        let batches = collect_ids(loader);
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_drop_last() {
        let loader = DataLoader::new(create_test_dataset(10))
            .batch_size(3)
            .drop_last(true);
        let batches = collect_ids(loader);
        assert_eq!(batches.len(), 3); // Only full batches
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[cfg(feature = "shuffle")]
    #[test]
    fn test_shuffle_deterministic() {
        let dataset = create_test_dataset(100);
        let first = collect_ids(
            DataLoader::new(dataset.clone())
                .batch_size(10)
                .shuffle(true)
                .seed(42),
        );
        let second = collect_ids(DataLoader::new(dataset).batch_size(10).shuffle(true).seed(42));
        assert_eq!(first, second);
    }

    #[cfg(feature = "shuffle")]
    #[test]
    fn test_all_rows_covered() {
        let loader = DataLoader::new(create_test_dataset(25))
            .batch_size(7)
            .shuffle(true)
            .seed(99);

        let mut seen: Vec<i32> = collect_ids(loader).into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..25).collect::<Vec<i32>>());
    }

    #[cfg(feature = "shuffle")]
    #[test]
    fn test_chunked_shuffle_stays_within_window() {
        let loader = DataLoader::new(create_parted_dataset(4, 5))
            .batch_size(5)
            .shuffle(true)
            .seed(3)
            .parts_per_chunk(1);
        for batch in collect_ids(loader) {
            let part = batch[0] / 5;
            assert!(batch.iter().all(|id| id / 5 == part), "{:?} mixes parts", batch);
        }
    }

    #[test]
    fn test_sharding_is_disjoint_and_complete() {
        let dataset = create_parted_dataset(3, 4);
        let mut seen = Vec::new();
        for rank in 0..3 {
            let loader = DataLoader::new(dataset.clone()).batch_size(100).shard(3, rank);
            assert_eq!(loader.shard_range(), rank * 4..(rank + 1) * 4);
            seen.extend(collect_ids(loader).into_iter().flatten());
        }
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_uneven_shards() {
        let dataset = create_test_dataset(10);
        let sizes: Vec<usize> = (0..3)
            .map(|rank| DataLoader::new(dataset.clone()).shard(3, rank).shard_range().len())
            .collect();
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().all(|&s| s == 3 || s == 4));
    }

    #[test]
    fn test_num_batches() {
        let dataset = create_test_dataset(10);

        let loader = DataLoader::new(dataset.clone()).batch_size(3);
        assert_eq!(loader.num_batches(), 4);

        let loader = DataLoader::new(dataset.clone()).batch_size(3).drop_last(true);
        assert_eq!(loader.num_batches(), 3);

        let loader = DataLoader::new(dataset).batch_size(3).shard(2, 1);
        assert_eq!(loader.num_batches(), 2);
    }

    #[cfg(feature = "shuffle")]
    #[test]
    fn test_from_config() {
        let config = LoaderConfig::new()
            .batch_size(5)
            .shuffle(true)
            .seed(42)
            .drop_last(true)
            .shard(2, 0);
        let loader = DataLoader::from_config(create_test_dataset(10), &config)
            .ok()
            .unwrap_or_else(|| panic!("Should build loader"));

        assert_eq!(loader.get_batch_size(), 5);
        assert!(loader.is_shuffle());
        assert!(loader.is_drop_last());
        assert_eq!(loader.shard_range(), 0..5);
    }

    #[test]
    fn test_from_config_rejects_zero_batch_size() {
        let config = LoaderConfig::new().batch_size(0);
        let result = DataLoader::from_config(create_test_dataset(10), &config);
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_size_hint() {
        let loader = DataLoader::new(create_test_dataset(10)).batch_size(3);

        let mut iter = loader.into_iter();
        assert_eq!(iter.size_hint(), (4, Some(4)));

        let _ = iter.next();
        assert_eq!(iter.size_hint(), (3, Some(3)));
    }

    #[cfg(feature = "shuffle")]
    #[test]
    fn test_getters() {
        let loader = DataLoader::new(create_test_dataset(10))
            .batch_size(5)
            .shuffle(true)
            .drop_last(true);

        assert_eq!(loader.get_batch_size(), 5);
        assert!(loader.is_shuffle());
        assert!(loader.is_drop_last());
        assert_eq!(loader.len(), 10);
        assert!(!loader.is_empty());
    }

    #[test]
    fn test_batch_size_min_one() {
        let loader = DataLoader::new(create_test_dataset(10)).batch_size(0);
        assert_eq!(loader.get_batch_size(), 1);
    }
}
