//! Column conversion between representations.
//!
//! [`convert_column`] moves a [`Column`] into a target [`ColumnKind`] along
//! the cheapest path available:
//!
//! 1. a column already in the target representation is returned as is;
//! 2. if the source buffer already lives on the target's device, it is
//!    exported into a [`SharedTensor`] capsule and imported on the other
//!    side without copying payload bytes;
//! 3. otherwise the capsule is copied across devices first.
//!
//! The export/import functions are resolved once into a [`ConversionPair`]
//! by the batch converter and reused for every column.

use std::fmt;

use tracing::{debug, trace};

use crate::{
    column::{Column, ColumnKind, TypedData},
    device::OnDevice,
    error::{Error, Result},
    shared::{self, ExportFn, ImportFn, SharedTensor},
};

/// Export and import functions for one source/target combination.
#[derive(Clone, Copy)]
pub struct ConversionPair {
    source: ColumnKind,
    target: ColumnKind,
    to_shared: ExportFn,
    from_shared: ImportFn,
}

impl ConversionPair {
    /// Resolves the functions converting `source` columns into `target`.
    pub fn select(source: ColumnKind, target: ColumnKind) -> Self {
        Self {
            source,
            target,
            to_shared: shared::export_fn(source),
            from_shared: shared::import_fn(target),
        }
    }

    /// Resolves the pair for a probe column.
    pub fn for_column(probe: &Column, target: ColumnKind) -> Self {
        Self::select(probe.kind(), target)
    }

    /// Source representation.
    pub fn source(&self) -> ColumnKind {
        self.source
    }

    /// Target representation.
    pub fn target(&self) -> ColumnKind {
        self.target
    }

    /// Returns true if this pair converts `source` columns into `target`.
    pub fn applies_to(&self, source: ColumnKind, target: ColumnKind) -> bool {
        self.source == source && self.target == target
    }

    /// Exports a payload of the source representation.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not of the source representation.
    pub fn export(&self, data: &TypedData) -> Result<SharedTensor> {
        (self.to_shared)(data)
    }

    /// Imports a capsule into the target representation.
    ///
    /// # Errors
    ///
    /// Returns an error if the target can't view the capsule's memory.
    pub fn import(&self, capsule: SharedTensor) -> Result<TypedData> {
        (self.from_shared)(capsule)
    }
}

impl fmt::Debug for ConversionPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionPair")
            .field("source", &self.source)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Converts a column into the `target` representation.
///
/// `pair` is used when it matches the column's representation; otherwise
/// a pair is resolved for this call.
///
/// # Errors
///
/// Returns [`Error::UnsupportedConversion`] if the target can't hold the
/// column's dtype or can't be reached from its representation.
pub fn convert_column(
    column: Column,
    target: ColumnKind,
    pair: Option<&ConversionPair>,
) -> Result<Column> {
    let source = column.kind();
    if source == target {
        trace!("{source} column already in target representation");
        return Ok(column);
    }
    check_supported(&column, target)?;

    let derived;
    let pair = match pair {
        Some(pair) if pair.applies_to(source, target) => pair,
        other => {
            if let Some(stale) = other {
                debug!(
                    "conversion pair {:?} doesn't apply to {source} -> {target}, re-deriving",
                    stale
                );
            }
            derived = ConversionPair::select(source, target);
            &derived
        }
    };

    let (values, offsets) = column.into_parts();
    let values = convert_data(&values, pair)?;
    let offsets = offsets.map(|o| convert_data(&o, pair)).transpose()?;
    Ok(Column::new_unchecked(values, offsets))
}

fn check_supported(column: &Column, target: ColumnKind) -> Result<()> {
    let dtypes = std::iter::once(column.dtype()).chain(column.offsets().map(TypedData::dtype));
    for dtype in dtypes {
        if !target.supports(dtype) {
            return Err(Error::unsupported(
                format!("{} {dtype}", column.kind()),
                target.to_string(),
                format!("{target} has no {dtype} representation"),
            ));
        }
    }
    Ok(())
}

fn convert_data(data: &TypedData, pair: &ConversionPair) -> Result<TypedData> {
    let target = pair.target();
    let device = target.device();
    let capsule = pair.export(data)?;
    let capsule = if capsule.device() == device {
        capsule
    } else {
        debug!(
            "{} -> {device} copy of {} {:?} for {target}",
            capsule.device(),
            data.dtype(),
            data.shape()
        );
        capsule.copy_to(device)
    };
    if data.kind().aliases(data.dtype()) && target.aliases(data.dtype()) {
        trace!("shared {} bytes with {target}", capsule.byte_len());
    } else {
        debug!("{} values repacked for {target}", data.dtype());
    }
    pair.import(capsule)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, ListArray, UInt32Array},
        datatypes::Int32Type,
    };

    use super::*;
    use crate::{
        accel::DeviceArray,
        column::{NativeArray, RawColumn},
        device::Device,
        tensor::Tensor,
    };

    fn checked(raw: impl Into<RawColumn>) -> Column {
        Column::new_checked(raw.into()).unwrap()
    }

    #[test]
    fn test_noop_returns_same_buffer() {
        let array = DeviceArray::from_slice(&[1.0f32, 2.0]);
        let ptr = array.as_ptr();
        let column = checked(array);
        let converted = convert_column(column, ColumnKind::Accelerator, None).unwrap();
        assert_eq!(converted.values().array().values_ptr(), Some(ptr));

        let tensor = Tensor::from_vec(vec![3i64, 4], vec![2]).unwrap();
        let ptr = tensor.as_ptr();
        let column = Column::new_checked(RawColumn::new(tensor)).unwrap();
        let converted = convert_column(column, ColumnKind::Framework, None).unwrap();
        assert_eq!(converted.values().array().values_ptr(), Some(ptr));
    }

    #[test]
    fn test_accelerator_to_framework_is_zero_copy() {
        let array = DeviceArray::from_slice(&[1i64, 2, 3]);
        let ptr = array.as_ptr();
        let pair = ConversionPair::select(ColumnKind::Accelerator, ColumnKind::Framework);
        let converted = convert_column(checked(array), ColumnKind::Framework, Some(&pair)).unwrap();
        let tensor = converted.values().array().as_tensor().unwrap();
        assert_eq!(tensor.as_ptr(), ptr);
        assert_eq!(tensor.device(), Device::Accelerator);
    }

    #[test]
    fn test_host_to_framework_copies() {
        let array: ArrayRef = Arc::new(Int64Array::from(vec![5i64, 6]));
        let converted = convert_column(checked(Arc::clone(&array)), ColumnKind::Framework, None)
            .unwrap();
        let tensor = converted.values().array().as_tensor().unwrap();
        assert_eq!(tensor.device(), Device::Accelerator);
        assert_eq!(tensor.to_vec::<i64>().unwrap(), vec![5, 6]);
        assert_ne!(Some(tensor.as_ptr()), NativeArray::Host(array).values_ptr());
    }

    #[test]
    fn test_framework_to_host_roundtrip() {
        let array = DeviceArray::from_slice(&[1.5f64, 2.5]);
        let column = convert_column(checked(array), ColumnKind::Framework, None).unwrap();
        let host = convert_column(column, ColumnKind::Host, None).unwrap();
        let array = host.values().array().as_host().unwrap();
        let values = array.as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(values.values().to_vec(), vec![1.5, 2.5]);
    }

    #[test]
    fn test_list_column_converts_both_buffers() {
        let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![
            Some(vec![Some(1), Some(2)]),
            Some(vec![Some(3)]),
        ]);
        let array: ArrayRef = Arc::new(list);
        let converted = convert_column(checked(array), ColumnKind::Framework, None).unwrap();
        assert!(converted.is_list());
        let offsets = converted.offsets().unwrap().array().as_tensor().unwrap();
        assert_eq!(offsets.to_vec::<i32>().unwrap(), vec![0, 2, 3]);
        let values = converted.values().array().as_tensor().unwrap();
        assert_eq!(values.to_vec::<i32>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_bool_column_to_framework() {
        let array: ArrayRef = Arc::new(BooleanArray::from(vec![true, false]));
        let converted = convert_column(checked(array), ColumnKind::Framework, None).unwrap();
        assert_eq!(converted.dtype(), crate::dtype::DType::Bool);
        assert_eq!(converted.device(), Device::Accelerator);
    }

    #[test]
    fn test_unsupported_dtype() {
        let array: ArrayRef = Arc::new(UInt32Array::from(vec![1u32, 2]));
        let err = convert_column(checked(array), ColumnKind::Framework, None).unwrap_err();
        assert!(err.is_unsupported_conversion());
    }

    #[test]
    fn test_stale_pair_rederived() {
        let pair = ConversionPair::select(ColumnKind::Host, ColumnKind::Framework);
        let array = DeviceArray::from_slice(&[7i32]);
        let converted = convert_column(checked(array), ColumnKind::Framework, Some(&pair)).unwrap();
        assert_eq!(converted.kind(), ColumnKind::Framework);
    }

    #[test]
    fn test_pair_debug() {
        let pair = ConversionPair::select(ColumnKind::Host, ColumnKind::Framework);
        let debug = format!("{pair:?}");
        assert!(debug.contains("Host"));
        assert!(pair.applies_to(ColumnKind::Host, ColumnKind::Framework));
        assert!(!pair.applies_to(ColumnKind::Accelerator, ColumnKind::Framework));
    }
}
