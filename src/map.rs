//! Insertion-ordered name → value maps.
//!
//! Batches are keyed by column name, and the order columns arrive in is
//! the order they are converted and handed to the consumer. [`NamedMap`]
//! keeps that order with a plain vector; batches have tens of columns, so
//! a linear lookup is cheaper than hashing.

use std::sync::Arc;

use arrow::record_batch::RecordBatch;

use crate::{
    column::{NativeArray, RawColumn},
    error::{Error, Result},
};

/// A map from column name to value that iterates in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMap<V> {
    entries: Vec<(String, V)>,
}

/// Flat output mapping: one buffer per key, list columns expanded into
/// `<name>__values` and `<name>__offsets`.
pub type FlatMap = NamedMap<NativeArray>;

impl<V> Default for NamedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> NamedMap<V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing (in place) any existing value for `name`.
    ///
    /// Returns the replaced value.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<V> {
        let name = name.into();
        match self.position(&name) {
            Some(i) => Some(std::mem::replace(&mut self.entries[i].1, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    /// Inserts a value, failing if `name` is already present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateColumn`] if the key exists.
    pub fn try_insert(&mut self, name: impl Into<String>, value: V) -> Result<()> {
        let name = name.into();
        if self.contains_key(&name) {
            return Err(Error::duplicate_column(name));
        }
        self.entries.push((name, value));
        Ok(())
    }

    /// Returns the value for `name`.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.position(name).map(|i| &self.entries[i].1)
    }

    /// Returns a mutable reference to the value for `name`.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut V> {
        self.position(name).map(move |i| &mut self.entries[i].1)
    }

    /// Returns true if `name` is present.
    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Removes `name`, keeping the order of the remaining entries.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Applies a fallible function to every value, keeping keys and order.
    ///
    /// # Errors
    ///
    /// Returns the first error `f` produces; no partial map is returned.
    pub fn try_map_values<U>(self, mut f: impl FnMut(&str, V) -> Result<U>) -> Result<NamedMap<U>> {
        let entries = self
            .entries
            .into_iter()
            .map(|(k, v)| {
                let mapped = f(&k, v)?;
                Ok((k, mapped))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(NamedMap { entries })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == name)
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for NamedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V> IntoIterator for NamedMap<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl From<&RecordBatch> for NamedMap<RawColumn> {
    fn from(batch: &RecordBatch) -> Self {
        batch
            .schema()
            .fields()
            .iter()
            .zip(batch.columns())
            .map(|(field, array)| (field.name().clone(), RawColumn::new(Arc::clone(array))))
            .collect()
    }
}
