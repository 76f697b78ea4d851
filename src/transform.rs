//! Post-conversion batch transforms.
//!
//! Transforms run after a batch has been converted, in the order they were
//! registered, each receiving the previous one's output.

use crate::{
    batch::{ConvertedBatch, Targets},
    column::NativeArray,
    error::Result,
    map::FlatMap,
};

/// A transformation applied to every converted batch.
///
/// Transforms must be thread-safe (Send + Sync) so a loader can be moved
/// to a training thread.
pub trait BatchTransform: Send + Sync {
    /// Applies the transform to a converted batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the transform cannot be applied to the batch.
    fn apply(&self, batch: ConvertedBatch) -> Result<ConvertedBatch>;
}

/// A transform built from a function over the `(inputs, targets)` pair.
///
/// # Example
///
/// ```
/// use puente::{BatchTransform, ConvertedBatch, Map, Targets};
///
/// let drop_targets = Map::new(|inputs, _targets| Ok((inputs, Targets::None)));
/// let batch = drop_targets.apply(ConvertedBatch::default()).unwrap();
/// assert!(batch.targets.is_none());
/// ```
pub struct Map<F>
where
    F: Fn(FlatMap, Targets<NativeArray>) -> Result<(FlatMap, Targets<NativeArray>)> + Send + Sync,
{
    func: F,
}

impl<F> Map<F>
where
    F: Fn(FlatMap, Targets<NativeArray>) -> Result<(FlatMap, Targets<NativeArray>)> + Send + Sync,
{
    /// Creates a new Map transform with the given function.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> BatchTransform for Map<F>
where
    F: Fn(FlatMap, Targets<NativeArray>) -> Result<(FlatMap, Targets<NativeArray>)> + Send + Sync,
{
    fn apply(&self, batch: ConvertedBatch) -> Result<ConvertedBatch> {
        let (inputs, targets) = (self.func)(batch.inputs, batch.targets)?;
        Ok(ConvertedBatch { inputs, targets })
    }
}

impl<F> std::fmt::Debug for Map<F>
where
    F: Fn(FlatMap, Targets<NativeArray>) -> Result<(FlatMap, Targets<NativeArray>)> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map").finish_non_exhaustive()
    }
}

/// A sequence of transforms applied in order.
#[derive(Default)]
pub struct Chain {
    transforms: Vec<Box<dyn BatchTransform>>,
}

impl Chain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transform to the chain.
    #[must_use]
    pub fn then<T: BatchTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    /// Number of transforms in the chain.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Returns true if the chain has no transforms.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl BatchTransform for Chain {
    fn apply(&self, batch: ConvertedBatch) -> Result<ConvertedBatch> {
        self.transforms
            .iter()
            .try_fold(batch, |batch, transform| transform.apply(batch))
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("transforms", &self.transforms.len())
            .finish()
    }
}
