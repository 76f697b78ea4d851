//! Typed column views over one batch's buffers.
//!
//! A [`Column`] is one named field of a batch: a values buffer and, for
//! variable-length ("list") columns, an offsets buffer marking where each
//! row's values start. Columns never own data apart from their backing
//! buffers; cloning one only bumps reference counts.
//!
//! Two constructors exist. [`Column::new_checked`] validates dtype, shape,
//! nulls and offsets. [`Column::new_unchecked`] takes already-described
//! [`TypedData`] and trusts it, which is what the conversion hot path uses.

use std::{fmt, sync::Arc};

use arrow::{
    array::{
        make_array, Array, ArrayData, ArrayRef, AsArray, GenericListArray, OffsetSizeTrait,
    },
    buffer::Buffer,
    datatypes::DataType,
};

use crate::{
    accel::DeviceArray,
    device::{Device, OnDevice},
    dtype::{self, DType},
    error::{Error, Result},
    shared,
    tensor::Tensor,
};

/// Which array library a buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// Arrow arrays in host memory.
    Host,
    /// Accelerator array library.
    Accelerator,
    /// The training framework's tensor type.
    Framework,
}

impl ColumnKind {
    /// Device a conversion into this kind places its output on.
    pub fn device(self) -> Device {
        match self {
            Self::Host => Device::Host,
            Self::Accelerator | Self::Framework => Device::Accelerator,
        }
    }

    /// Kind a batch classified under `device` is converted into.
    pub fn for_device(device: Device) -> Self {
        match device {
            Device::Host => Self::Host,
            Device::Accelerator => Self::Framework,
        }
    }

    /// Returns true if this kind can hold `dtype` at all.
    pub fn supports(self, dtype: DType) -> bool {
        match self {
            Self::Framework => Tensor::supports(dtype),
            Self::Host | Self::Accelerator => true,
        }
    }

    /// Returns true if this kind can view a dense `dtype` buffer in place.
    pub fn aliases(self, dtype: DType) -> bool {
        match self {
            Self::Host => dtype != DType::Bool,
            Self::Accelerator | Self::Framework => true,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host array"),
            Self::Accelerator => f.write_str("accelerator array"),
            Self::Framework => f.write_str("framework tensor"),
        }
    }
}

/// A buffer in one of the supported representations.
#[derive(Debug, Clone)]
pub enum NativeArray {
    /// Arrow array in host memory.
    Host(ArrayRef),
    /// Accelerator array.
    Accelerator(DeviceArray),
    /// Framework tensor.
    Framework(Tensor),
}

impl NativeArray {
    /// The representation this buffer belongs to.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Host(_) => ColumnKind::Host,
            Self::Accelerator(_) => ColumnKind::Accelerator,
            Self::Framework(_) => ColumnKind::Framework,
        }
    }

    /// The Arrow array, if this is a host buffer.
    pub fn as_host(&self) -> Option<&ArrayRef> {
        match self {
            Self::Host(array) => Some(array),
            _ => None,
        }
    }

    /// The accelerator array, if this is one.
    pub fn as_accelerator(&self) -> Option<&DeviceArray> {
        match self {
            Self::Accelerator(array) => Some(array),
            _ => None,
        }
    }

    /// The framework tensor, if this is one.
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Self::Framework(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// Address of the first value byte, for zero-copy checks.
    ///
    /// Returns `None` for bit-packed Arrow booleans and for host arrays
    /// without a dense layout.
    pub fn values_ptr(&self) -> Option<*const u8> {
        match self {
            Self::Host(array) if array.data_type() == &DataType::Boolean => None,
            Self::Host(array) => shared::host_bytes(array.as_ref()).ok().map(|b| b.as_ptr()),
            Self::Accelerator(array) => Some(array.as_ptr()),
            Self::Framework(tensor) => Some(tensor.as_ptr()),
        }
    }
}

impl OnDevice for NativeArray {
    fn device(&self) -> Device {
        match self {
            Self::Host(array) => array.device(),
            Self::Accelerator(array) => array.device(),
            Self::Framework(tensor) => tensor.device(),
        }
    }
}

impl From<ArrayRef> for NativeArray {
    fn from(array: ArrayRef) -> Self {
        Self::Host(array)
    }
}

impl From<DeviceArray> for NativeArray {
    fn from(array: DeviceArray) -> Self {
        Self::Accelerator(array)
    }
}

impl From<Tensor> for NativeArray {
    fn from(tensor: Tensor) -> Self {
        Self::Framework(tensor)
    }
}

/// Dtype and shape of a dense Arrow array.
pub(crate) fn dense_layout(array: &dyn Array) -> Result<(DType, Vec<usize>)> {
    match array.data_type() {
        DataType::FixedSizeList(field, width) => {
            let dtype = DType::from_arrow(field.data_type()).ok_or_else(|| {
                Error::unsupported(
                    format!("{}", array.data_type()),
                    "column",
                    "fixed-size list children must be primitive",
                )
            })?;
            let width = usize::try_from(*width)
                .map_err(|_| Error::shape(format!("negative list width {width}")))?;
            Ok((dtype, vec![array.len(), width]))
        }
        DataType::List(_) | DataType::LargeList(_) => Err(Error::shape(
            "variable-length lists must be split into values and offsets",
        )),
        other => {
            let dtype = DType::from_arrow(other).ok_or_else(|| {
                Error::unsupported(format!("{other}"), "column", "no dense dtype")
            })?;
            Ok((dtype, vec![array.len()]))
        }
    }
}

pub(crate) fn host_nulls(array: &dyn Array) -> usize {
    match array.data_type() {
        DataType::FixedSizeList(_, _) => {
            array.null_count() + array.as_fixed_size_list().values().null_count()
        }
        _ => array.null_count(),
    }
}

/// A buffer together with its dtype and shape.
#[derive(Debug, Clone)]
pub struct TypedData {
    array: NativeArray,
    dtype: DType,
    shape: Vec<usize>,
}

impl TypedData {
    /// Derives dtype and shape from the buffer's own metadata.
    ///
    /// Nothing beyond the metadata is inspected; the caller vouches for
    /// the buffer's contents.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-conversion error for Arrow types with no
    /// dense dtype, and a shape error for unsplit list arrays.
    pub fn describe(array: NativeArray) -> Result<Self> {
        let (dtype, shape) = match &array {
            NativeArray::Host(host) => dense_layout(host.as_ref())?,
            NativeArray::Accelerator(device) => (device.dtype(), device.shape().to_vec()),
            NativeArray::Framework(tensor) => (tensor.dtype(), tensor.shape().to_vec()),
        };
        Ok(Self {
            array,
            dtype,
            shape,
        })
    }

    /// Describes the buffer and checks it can back a dense column.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the buffer contains nulls or its size
    /// disagrees with its shape.
    pub fn validate(array: NativeArray) -> Result<Self> {
        let data = Self::describe(array)?;
        if let NativeArray::Host(host) = &data.array {
            let nulls = host_nulls(host.as_ref());
            if nulls > 0 {
                return Err(Error::shape(format!(
                    "{nulls} null values cannot be represented in a dense buffer"
                )));
            }
        }
        let capsule = shared::export(&data)?;
        let expected = dtype::numel(&data.shape) * data.dtype.byte_width();
        if capsule.byte_len() != expected {
            return Err(Error::shape(format!(
                "buffer holds {} bytes, {} {:?} needs {expected}",
                capsule.byte_len(),
                data.dtype,
                data.shape
            )));
        }
        Ok(data)
    }

    /// Pairs a buffer with metadata already known to be correct.
    pub(crate) fn trusted(array: NativeArray, dtype: DType, shape: Vec<usize>) -> Self {
        Self {
            array,
            dtype,
            shape,
        }
    }

    /// The underlying buffer.
    pub fn array(&self) -> &NativeArray {
        &self.array
    }

    /// Consumes the payload, returning the buffer.
    pub fn into_array(self) -> NativeArray {
        self.array
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Shape of the buffer.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Length of the leading dimension.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Returns true if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        dtype::numel(&self.shape) == 0
    }

    /// Representation of the buffer.
    pub fn kind(&self) -> ColumnKind {
        self.array.kind()
    }

    /// Reads an integer buffer as `i64` on the host.
    pub(crate) fn read_i64(&self) -> Result<Vec<i64>> {
        let capsule = shared::export(self)?;
        let capsule = if capsule.device() == Device::Host {
            capsule
        } else {
            capsule.copy_to(Device::Host)
        };
        dtype::widen_to_i64(capsule.buffer(), self.dtype)
    }
}

impl OnDevice for TypedData {
    fn device(&self) -> Device {
        self.array.device()
    }
}

/// A column as produced by the upstream iterator.
///
/// Offsets may be given explicitly or, for Arrow `List`/`LargeList`
/// arrays, are taken from the list itself.
#[derive(Debug, Clone)]
pub struct RawColumn {
    values: NativeArray,
    offsets: Option<NativeArray>,
}

impl RawColumn {
    /// A column backed by a single buffer.
    pub fn new(values: impl Into<NativeArray>) -> Self {
        Self {
            values: values.into(),
            offsets: None,
        }
    }

    /// A list column with explicit values and offsets buffers.
    pub fn list(values: impl Into<NativeArray>, offsets: impl Into<NativeArray>) -> Self {
        Self {
            values: values.into(),
            offsets: Some(offsets.into()),
        }
    }

    /// The values buffer.
    pub fn values(&self) -> &NativeArray {
        &self.values
    }

    /// The explicit offsets buffer, if any.
    pub fn offsets(&self) -> Option<&NativeArray> {
        self.offsets.as_ref()
    }

    /// Splits Arrow list arrays into values and offsets.
    ///
    /// # Errors
    ///
    /// Returns an error if Arrow rejects the offsets buffer.
    pub fn split(self) -> Result<(NativeArray, Option<NativeArray>)> {
        if self.offsets.is_some() {
            return Ok((self.values, self.offsets));
        }
        let NativeArray::Host(array) = &self.values else {
            return Ok((self.values, None));
        };
        let split = match array.data_type() {
            DataType::List(_) => Some(split_list(array.as_list::<i32>())?),
            DataType::LargeList(_) => Some(split_list(array.as_list::<i64>())?),
            _ => None,
        };
        Ok(match split {
            Some((values, offsets)) => {
                (NativeArray::Host(values), Some(NativeArray::Host(offsets)))
            }
            None => (self.values, None),
        })
    }

    /// Splits and describes both buffers without validating them.
    ///
    /// # Errors
    ///
    /// Returns an error if either buffer has no dense dtype.
    pub fn describe(self) -> Result<(TypedData, Option<TypedData>)> {
        let (values, offsets) = self.split()?;
        Ok((
            TypedData::describe(values)?,
            offsets.map(TypedData::describe).transpose()?,
        ))
    }

    /// Moves host buffers into accelerator memory.
    ///
    /// Buffers already on the accelerator are left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if a host buffer has nulls or no dense dtype.
    pub fn upload(self) -> Result<Self> {
        let (values, offsets) = self.split()?;
        Ok(Self {
            values: upload_array(values)?,
            offsets: offsets.map(upload_array).transpose()?,
        })
    }
}

fn upload_array(array: NativeArray) -> Result<NativeArray> {
    Ok(match array {
        NativeArray::Host(host) => {
            NativeArray::Accelerator(DeviceArray::from_arrow(host.as_ref())?)
        }
        NativeArray::Framework(tensor) => {
            NativeArray::Framework(tensor.to_device(Device::Accelerator))
        }
        device @ NativeArray::Accelerator(_) => device,
    })
}

impl From<NativeArray> for RawColumn {
    fn from(values: NativeArray) -> Self {
        Self::new(values)
    }
}

impl From<ArrayRef> for RawColumn {
    fn from(values: ArrayRef) -> Self {
        Self::new(values)
    }
}

impl From<DeviceArray> for RawColumn {
    fn from(values: DeviceArray) -> Self {
        Self::new(values)
    }
}

/// Splits a list array into its flat values and offsets arrays.
///
/// The buffers are shared with the list unless it is a slice that doesn't
/// start at offset zero, in which case the offsets are rebased.
fn split_list<O: OffsetSizeTrait>(list: &GenericListArray<O>) -> Result<(ArrayRef, ArrayRef)> {
    let offsets = list.offsets();
    let first = offsets[0];
    let last = offsets[offsets.len() - 1];
    let values = if first.as_usize() == 0 && last.as_usize() == list.values().len() {
        Arc::clone(list.values())
    } else {
        list.values().slice(first.as_usize(), (last - first).as_usize())
    };
    let buffer = if first.as_usize() == 0 {
        offsets.inner().inner().clone()
    } else {
        Buffer::from_vec(offsets.iter().map(|&o| o - first).collect::<Vec<O>>())
    };
    let offsets_type = if O::IS_LARGE {
        DataType::Int64
    } else {
        DataType::Int32
    };
    let offsets = ArrayData::builder(offsets_type)
        .len(offsets.len())
        .add_buffer(buffer)
        .build()?;
    Ok((values, make_array(offsets)))
}

/// One named field of a batch.
#[derive(Debug, Clone)]
pub struct Column {
    values: TypedData,
    offsets: Option<TypedData>,
}

impl Column {
    /// Wraps a raw column, validating every invariant.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the buffers contain nulls, disagree with
    /// their shapes, or if list offsets are not integers starting at zero,
    /// non-decreasing, and ending at the number of values. Returns an
    /// unsupported-conversion error for dtypes with no dense layout.
    pub fn new_checked(raw: RawColumn) -> Result<Self> {
        let (values, offsets) = raw.split()?;
        let values = TypedData::validate(values)?;
        let offsets = offsets.map(TypedData::validate).transpose()?;
        if let Some(offsets) = &offsets {
            check_offsets(&values, offsets)?;
        }
        Ok(Self { values, offsets })
    }

    /// Builds a column from payloads the caller guarantees are consistent.
    pub fn new_unchecked(values: TypedData, offsets: Option<TypedData>) -> Self {
        Self { values, offsets }
    }

    /// The values payload.
    pub fn values(&self) -> &TypedData {
        &self.values
    }

    /// The offsets payload of a list column.
    pub fn offsets(&self) -> Option<&TypedData> {
        self.offsets.as_ref()
    }

    /// Consumes the column, returning its payloads.
    pub fn into_parts(self) -> (TypedData, Option<TypedData>) {
        (self.values, self.offsets)
    }

    /// Returns true for variable-length list columns.
    pub fn is_list(&self) -> bool {
        self.offsets.is_some()
    }

    /// Element type of the values.
    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    /// Shape of the values buffer.
    pub fn shape(&self) -> &[usize] {
        self.values.shape()
    }

    /// Number of rows: list entries for list columns, otherwise the
    /// leading dimension.
    pub fn num_rows(&self) -> usize {
        match &self.offsets {
            Some(offsets) => offsets.len().saturating_sub(1),
            None => self.values.len(),
        }
    }

    /// Representation of the column's buffers.
    pub fn kind(&self) -> ColumnKind {
        self.values.kind()
    }
}

impl OnDevice for Column {
    fn device(&self) -> Device {
        self.values.device()
    }
}

fn check_offsets(values: &TypedData, offsets: &TypedData) -> Result<()> {
    if offsets.kind() != values.kind() {
        return Err(Error::shape(format!(
            "offsets are a {} but values are a {}",
            offsets.kind(),
            values.kind()
        )));
    }
    if !offsets.dtype().is_integer() {
        return Err(Error::shape(format!(
            "offsets must be integers, got {}",
            offsets.dtype()
        )));
    }
    if offsets.shape().len() != 1 || offsets.is_empty() {
        return Err(Error::shape(format!(
            "offsets must be a non-empty vector, got shape {:?}",
            offsets.shape()
        )));
    }
    let bounds = offsets.read_i64()?;
    if bounds[0] != 0 {
        return Err(Error::shape(format!("offsets start at {}, not 0", bounds[0])));
    }
    if let Some(pair) = bounds.windows(2).find(|pair| pair[1] < pair[0]) {
        return Err(Error::shape(format!(
            "offsets decrease from {} to {}",
            pair[0], pair[1]
        )));
    }
    let last = bounds[bounds.len() - 1];
    if usize::try_from(last).ok() != Some(values.len()) {
        return Err(Error::shape(format!(
            "offsets end at {last} but there are {} values",
            values.len()
        )));
    }
    Ok(())
}
