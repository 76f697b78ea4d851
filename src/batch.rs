//! Whole-batch conversion.
//!
//! A [`BatchConverter`] turns the `(inputs, targets)` pair produced by the
//! upstream iterator into the flat structures the training step consumes:
//!
//! ```text
//! RawBatch ──► Table ──► convert each column ──► FlatMap ──► transforms ──► ConvertedBatch
//! ```
//!
//! The output representation is decided per batch from the inputs'
//! dominant device (or a configured override): accelerator batches become
//! framework tensors, host batches stay host arrays.

use arrow::record_batch::RecordBatch;

use crate::{
    column::{Column, ColumnKind, NativeArray, RawColumn},
    convert::{convert_column, ConversionPair},
    device::{Device, OnDevice},
    error::{Error, Result},
    map::{FlatMap, NamedMap},
    table::Table,
    transform::{BatchTransform, Chain, Map},
};

/// The target half of a batch.
#[derive(Debug, Clone, Default)]
pub enum Targets<T> {
    /// No targets.
    #[default]
    None,
    /// A single target buffer.
    Single(T),
    /// Named target buffers.
    Multi(NamedMap<T>),
}

impl<T> Targets<T> {
    /// Returns true if there are no targets.
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// The single target, if that's the shape.
    pub fn as_single(&self) -> Option<&T> {
        match self {
            Self::Single(value) => Some(value),
            _ => None,
        }
    }

    /// The named targets, if that's the shape.
    pub fn as_multi(&self) -> Option<&NamedMap<T>> {
        match self {
            Self::Multi(map) => Some(map),
            _ => None,
        }
    }

    /// Applies a fallible function to every target, keeping the shape.
    ///
    /// # Errors
    ///
    /// Returns the first error `f` produces.
    pub fn try_map<U>(self, mut f: impl FnMut(T) -> Result<U>) -> Result<Targets<U>> {
        Ok(match self {
            Self::None => Targets::None,
            Self::Single(value) => Targets::Single(f(value)?),
            Self::Multi(map) => Targets::Multi(map.try_map_values(|_, value| f(value))?),
        })
    }
}

/// A batch as produced by the upstream iterator.
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    /// Input columns, if the batch has any.
    pub inputs: Option<NamedMap<RawColumn>>,
    /// Target columns.
    pub targets: Targets<RawColumn>,
}

impl RawBatch {
    /// Creates a raw batch.
    pub fn new(inputs: Option<NamedMap<RawColumn>>, targets: Targets<RawColumn>) -> Self {
        Self { inputs, targets }
    }

    /// Splits a record batch into inputs and the named target columns.
    ///
    /// No names gives [`Targets::None`], one gives [`Targets::Single`], and
    /// more give [`Targets::Multi`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ColumnNotFound`] if a target column is missing.
    pub fn from_record_batch<S: AsRef<str>>(
        batch: &RecordBatch,
        target_names: &[S],
    ) -> Result<Self> {
        let mut inputs = NamedMap::<RawColumn>::from(batch);
        let mut targets = NamedMap::new();
        for name in target_names {
            let name = name.as_ref();
            let column = inputs
                .remove(name)
                .ok_or_else(|| Error::column_not_found(name))?;
            targets.insert(name, column);
        }
        let targets = if target_names.len() > 1 {
            Targets::Multi(targets)
        } else {
            targets
                .into_iter()
                .next()
                .map_or(Targets::None, |(_, column)| Targets::Single(column))
        };
        Ok(Self {
            inputs: Some(inputs),
            targets,
        })
    }

    /// Moves every host column into accelerator memory.
    ///
    /// # Errors
    ///
    /// Returns an error if a column can't be uploaded.
    pub fn upload(self) -> Result<Self> {
        Ok(Self {
            inputs: self
                .inputs
                .map(|inputs| inputs.try_map_values(|_, column| column.upload()))
                .transpose()?,
            targets: self.targets.try_map(RawColumn::upload)?,
        })
    }
}

/// A batch in the shape the training step consumes.
#[derive(Debug, Clone, Default)]
pub struct ConvertedBatch {
    /// Flat inputs, list columns split into `__values`/`__offsets` entries.
    pub inputs: FlatMap,
    /// Converted targets.
    pub targets: Targets<NativeArray>,
}

impl ConvertedBatch {
    /// Consumes the batch, returning `(inputs, targets)`.
    pub fn into_parts(self) -> (FlatMap, Targets<NativeArray>) {
        (self.inputs, self.targets)
    }
}

/// Converts raw batches into framework batches.
///
/// The export/import functions are resolved once, at construction, for the
/// upstream's declared array library.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use arrow::array::{ArrayRef, Int64Array};
/// use puente::{BatchConverter, ColumnKind, NamedMap, RawBatch, RawColumn, Targets};
///
/// let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
/// let inputs: NamedMap<RawColumn> = [("id", RawColumn::new(ids))].into_iter().collect();
///
/// let converter = BatchConverter::new(ColumnKind::Host);
/// let batch = converter.process(RawBatch::new(Some(inputs), Targets::None)).unwrap();
/// assert!(batch.inputs.contains_key("id"));
/// ```
#[derive(Debug)]
pub struct BatchConverter {
    source: ColumnKind,
    host_pair: ConversionPair,
    framework_pair: ConversionPair,
    device: Option<Device>,
    transforms: Chain,
}

impl BatchConverter {
    /// Creates a converter for batches of the `source` representation.
    pub fn new(source: ColumnKind) -> Self {
        Self {
            source,
            host_pair: ConversionPair::select(source, ColumnKind::Host),
            framework_pair: ConversionPair::select(source, ColumnKind::Framework),
            device: None,
            transforms: Chain::new(),
        }
    }

    /// Fixes the output device instead of deriving it from each batch.
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Registers a function over `(inputs, targets)` to run after conversion.
    ///
    /// Functions run in registration order.
    #[must_use]
    pub fn map<F>(self, func: F) -> Self
    where
        F: Fn(FlatMap, Targets<NativeArray>) -> Result<(FlatMap, Targets<NativeArray>)>
            + Send
            + Sync
            + 'static,
    {
        self.with_transform(Map::new(func))
    }

    /// Registers a transform to run after conversion.
    #[must_use]
    pub fn with_transform<T: BatchTransform + 'static>(mut self, transform: T) -> Self {
        self.transforms = self.transforms.then(transform);
        self
    }

    /// The representation batches arrive in.
    pub fn source(&self) -> ColumnKind {
        self.source
    }

    /// The configured device override.
    pub fn device(&self) -> Option<Device> {
        self.device
    }

    /// Number of registered transforms.
    pub fn num_transforms(&self) -> usize {
        self.transforms.len()
    }

    /// The representation a batch with these inputs is converted into.
    pub fn target_kind(&self, inputs: Option<&Table>) -> ColumnKind {
        let device = self
            .device
            .or_else(|| inputs.map(OnDevice::device))
            .unwrap_or(Device::Accelerator);
        ColumnKind::for_device(device)
    }

    fn pair_for(&self, target: ColumnKind) -> &ConversionPair {
        match target {
            ColumnKind::Host => &self.host_pair,
            ColumnKind::Accelerator | ColumnKind::Framework => &self.framework_pair,
        }
    }

    /// Converts a batch without running transforms.
    ///
    /// Either every column converts or an error is returned; no partial
    /// batch is produced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedConversion`] if a column can't be
    /// represented in the output, [`Error::DuplicateColumn`] if list
    /// flattening collides with another key, and a shape error for a list
    /// column given as the single target or a host column with nulls.
    pub fn convert_batch(&self, batch: RawBatch) -> Result<ConvertedBatch> {
        let RawBatch { inputs, targets } = batch;
        let inputs = inputs.map(Table::from_mapping_unchecked).transpose()?;
        let target = self.target_kind(inputs.as_ref());
        let pair = self.pair_for(target);

        let inputs = match inputs {
            Some(table) => convert_table(table, target, pair)?.into_mapping()?,
            None => FlatMap::new(),
        };
        let targets = match targets {
            Targets::None => Targets::None,
            Targets::Single(raw) => {
                let (values, offsets) = raw.describe()?;
                if offsets.is_some() {
                    return Err(Error::shape(
                        "a single target must be a scalar column; pass list targets by name",
                    ));
                }
                let column =
                    convert_column(Column::new_unchecked(values, None), target, Some(pair))?;
                let (values, _) = column.into_parts();
                Targets::Single(values.into_array())
            }
            Targets::Multi(raw) => {
                let table = Table::from_mapping_unchecked(raw)?;
                Targets::Multi(convert_table(table, target, pair)?.into_mapping()?)
            }
        };
        Ok(ConvertedBatch { inputs, targets })
    }

    /// Runs the registered transforms over a converted batch.
    ///
    /// # Errors
    ///
    /// Returns the first transform error.
    pub fn apply_transforms(&self, batch: ConvertedBatch) -> Result<ConvertedBatch> {
        self.transforms.apply(batch)
    }

    /// Converts a batch and runs the registered transforms over it.
    ///
    /// # Errors
    ///
    /// Returns any conversion or transform error.
    pub fn process(&self, batch: RawBatch) -> Result<ConvertedBatch> {
        let converted = self.convert_batch(batch)?;
        self.apply_transforms(converted)
    }
}

fn convert_table(table: Table, target: ColumnKind, pair: &ConversionPair) -> Result<Table> {
    let columns = table
        .into_columns()
        .try_map_values(|_, column| convert_column(column, target, Some(pair)))?;
    Ok(Table::from_columns(columns))
}
