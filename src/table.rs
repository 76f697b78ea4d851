//! Ordered collections of columns for one batch.

use crate::{
    column::{Column, RawColumn},
    device::{Device, OnDevice},
    error::Result,
    map::{FlatMap, NamedMap},
};

/// Suffix of the flat key holding a list column's values.
pub const VALUES_SUFFIX: &str = "__values";

/// Suffix of the flat key holding a list column's offsets.
pub const OFFSETS_SUFFIX: &str = "__offsets";

/// Flat key of a list column's values buffer.
pub fn values_key(name: &str) -> String {
    format!("{name}{VALUES_SUFFIX}")
}

/// Flat key of a list column's offsets buffer.
pub fn offsets_key(name: &str) -> String {
    format!("{name}{OFFSETS_SUFFIX}")
}

/// The named columns of one batch, in arrival order.
///
/// Tables are built per batch and consumed by conversion; nothing in a
/// table is shared with another batch except reference-counted buffers.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: NamedMap<Column>,
}

impl Table {
    /// Wraps each raw entry with [`Column::new_checked`].
    ///
    /// # Errors
    ///
    /// Returns the first column's validation error.
    pub fn from_mapping_checked(raw: NamedMap<RawColumn>) -> Result<Self> {
        let columns = raw.try_map_values(|_, column| Column::new_checked(column))?;
        Ok(Self { columns })
    }

    /// Wraps each raw entry from its metadata alone, skipping validation.
    ///
    /// # Errors
    ///
    /// Returns an error only if an entry has no dense dtype at all.
    pub fn from_mapping_unchecked(raw: NamedMap<RawColumn>) -> Result<Self> {
        let columns = raw.try_map_values(|_, column| {
            let (values, offsets) = column.describe()?;
            Ok(Column::new_unchecked(values, offsets))
        })?;
        Ok(Self { columns })
    }

    /// Builds a table from already-wrapped columns.
    pub fn from_columns(columns: NamedMap<Column>) -> Self {
        Self { columns }
    }

    /// Columns in insertion order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter()
    }

    /// Returns the column called `name`.
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the table has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Consumes the table, returning its columns.
    pub fn into_columns(self) -> NamedMap<Column> {
        self.columns
    }

    /// Flattens the table into one native buffer per key.
    ///
    /// Scalar columns keep their name; list columns become a
    /// `<name>__values` and a `<name>__offsets` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateColumn`] if flattening produces a
    /// key twice.
    pub fn to_mapping(&self) -> Result<FlatMap> {
        self.clone().into_mapping()
    }

    /// Like [`Table::to_mapping`], but consumes the table.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::DuplicateColumn`] if flattening produces a
    /// key twice.
    pub fn into_mapping(self) -> Result<FlatMap> {
        let mut flat = FlatMap::new();
        for (name, column) in self.columns {
            match column.into_parts() {
                (values, Some(offsets)) => {
                    flat.try_insert(values_key(&name), values.into_array())?;
                    flat.try_insert(offsets_key(&name), offsets.into_array())?;
                }
                (values, None) => flat.try_insert(name, values.into_array())?,
            }
        }
        Ok(flat)
    }
}

impl OnDevice for Table {
    /// The dominant device: the accelerator if any column lives there.
    fn device(&self) -> Device {
        if self.columns.values().any(|c| c.device().is_accelerator()) {
            Device::Accelerator
        } else {
            Device::Host
        }
    }
}
