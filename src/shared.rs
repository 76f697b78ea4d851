//! Zero-copy buffer interchange between column representations.
//!
//! A [`SharedTensor`] is a DLPack-style capsule: a reference-counted byte
//! buffer plus the device, dtype and shape needed to interpret it.
//! Exporting a column clones the buffer handle, importing wraps it, so the
//! capsule (and whatever is built from it) keeps the exporter's bytes
//! alive without duplicating them.

use std::sync::Arc;

use arrow::{
    array::{make_array, Array, ArrayData, ArrayRef, AsArray, BooleanArray, FixedSizeListArray},
    buffer::Buffer,
    datatypes::{DataType, Field},
};
use tracing::debug;

use crate::{
    accel::{DeviceArray, DeviceBuffer},
    column::{self, ColumnKind, NativeArray, TypedData},
    device::{Device, OnDevice},
    dtype::{self, DType},
    error::{Error, Result},
    tensor::{Storage, Tensor},
};

/// Exports a column payload into a capsule.
pub type ExportFn = fn(&TypedData) -> Result<SharedTensor>;

/// Builds a column payload from a capsule.
pub type ImportFn = fn(SharedTensor) -> Result<TypedData>;

/// A buffer handed between representations without copying.
#[derive(Debug, Clone)]
pub struct SharedTensor {
    buffer: Buffer,
    device: Device,
    dtype: DType,
    shape: Vec<usize>,
}

impl SharedTensor {
    /// Creates a capsule, checking the buffer size against dtype and shape.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the byte length doesn't match.
    pub fn new(buffer: Buffer, device: Device, dtype: DType, shape: Vec<usize>) -> Result<Self> {
        let expected = dtype::numel(&shape) * dtype.byte_width();
        if buffer.len() != expected {
            return Err(Error::shape(format!(
                "capsule holds {} bytes, {dtype} {shape:?} needs {expected}",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            device,
            dtype,
            shape,
        })
    }

    /// Copies the payload into a fresh allocation on `device`.
    ///
    /// This is the only operation here that moves bytes, including across
    /// the host/accelerator boundary.
    pub fn copy_to(&self, device: Device) -> Self {
        let buffer = match (self.device, device) {
            (Device::Host, Device::Accelerator) => {
                DeviceBuffer::upload(self.buffer.as_slice()).share()
            }
            (Device::Accelerator, Device::Host) => {
                DeviceBuffer::adopt(self.buffer.clone()).download()
            }
            (from, _) => {
                debug!("{from} copy: {} bytes", self.buffer.len());
                Buffer::from_slice_ref(self.buffer.as_slice())
            }
        };
        Self {
            buffer,
            device,
            dtype: self.dtype,
            shape: self.shape.clone(),
        }
    }

    /// The shared bytes.
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Shape of the payload.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Address of the first byte, for zero-copy checks.
    pub fn data_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }

    /// Number of payload bytes.
    pub fn byte_len(&self) -> usize {
        self.buffer.len()
    }
}

impl OnDevice for SharedTensor {
    fn device(&self) -> Device {
        self.device
    }
}

/// The export function for a representation.
pub fn export_fn(kind: ColumnKind) -> ExportFn {
    match kind {
        ColumnKind::Host => export_host,
        ColumnKind::Accelerator => export_accelerator,
        ColumnKind::Framework => export_framework,
    }
}

/// The import function for a representation.
pub fn import_fn(kind: ColumnKind) -> ImportFn {
    match kind {
        ColumnKind::Host => import_host,
        ColumnKind::Accelerator => import_accelerator,
        ColumnKind::Framework => import_framework,
    }
}

/// Exports a payload with the function matching its own representation.
///
/// # Errors
///
/// Returns an error if the payload can't be described as a dense buffer.
pub fn export(data: &TypedData) -> Result<SharedTensor> {
    export_fn(data.kind())(data)
}

fn mismatch(data: &TypedData, expected: ColumnKind) -> Error {
    Error::unsupported(
        data.kind().to_string(),
        expected.to_string(),
        format!("{expected} export called on a {} payload", data.kind()),
    )
}

fn export_host(data: &TypedData) -> Result<SharedTensor> {
    let NativeArray::Host(array) = data.array() else {
        return Err(mismatch(data, ColumnKind::Host));
    };
    let nulls = column::host_nulls(array.as_ref());
    if nulls > 0 {
        return Err(Error::shape(format!(
            "cannot export {nulls} null values as a dense buffer"
        )));
    }
    let buffer = host_bytes(array.as_ref())?;
    SharedTensor::new(buffer, Device::Host, data.dtype(), data.shape().to_vec())
}

fn export_accelerator(data: &TypedData) -> Result<SharedTensor> {
    let NativeArray::Accelerator(array) = data.array() else {
        return Err(mismatch(data, ColumnKind::Accelerator));
    };
    SharedTensor::new(
        array.buffer().share(),
        Device::Accelerator,
        array.dtype(),
        array.shape().to_vec(),
    )
}

fn export_framework(data: &TypedData) -> Result<SharedTensor> {
    let NativeArray::Framework(tensor) = data.array() else {
        return Err(mismatch(data, ColumnKind::Framework));
    };
    let (buffer, device) = match tensor.storage() {
        Storage::Host(buffer) => (buffer.clone(), Device::Host),
        Storage::Accelerator(buffer) => (buffer.share(), Device::Accelerator),
    };
    SharedTensor::new(buffer, device, tensor.dtype(), tensor.shape().to_vec())
}

/// The dense bytes behind a host array.
///
/// Primitive arrays are sliced in place. Booleans are bit-packed in Arrow,
/// so they are unpacked into a new one-byte-per-value buffer.
pub(crate) fn host_bytes(array: &dyn Array) -> Result<Buffer> {
    match array.data_type() {
        DataType::Boolean => {
            let bytes: Vec<u8> = array
                .as_boolean()
                .values()
                .iter()
                .map(u8::from)
                .collect();
            Ok(Buffer::from_vec(bytes))
        }
        DataType::FixedSizeList(_, width) => {
            let list = array.as_fixed_size_list();
            let width = usize::try_from(*width)
                .map_err(|_| Error::shape(format!("negative list width {width}")))?;
            let start = usize::try_from(list.value_offset(0)).unwrap_or(0);
            let child = list.values().slice(start, list.len() * width);
            host_bytes(child.as_ref())
        }
        other => {
            let dtype = DType::from_arrow(other)
                .ok_or_else(|| Error::unsupported(format!("{other}"), "host", "no dense dtype"))?;
            let data = array.to_data();
            let width = dtype.byte_width();
            Ok(data.buffers()[0].slice_with_length(data.offset() * width, data.len() * width))
        }
    }
}

fn import_host(capsule: SharedTensor) -> Result<TypedData> {
    if capsule.device != Device::Host {
        return Err(Error::unsupported(
            capsule.device.to_string(),
            ColumnKind::Host.to_string(),
            "host arrays cannot view accelerator memory",
        ));
    }
    let SharedTensor {
        buffer,
        dtype,
        shape,
        ..
    } = capsule;
    let len = dtype::numel(&shape);
    let values: ArrayRef = if dtype == DType::Bool {
        let bools: Vec<bool> = buffer.as_slice().iter().map(|&b| b != 0).collect();
        Arc::new(BooleanArray::from(bools))
    } else {
        make_array(
            ArrayData::builder(dtype.to_arrow())
                .len(len)
                .add_buffer(buffer)
                .build()?,
        )
    };
    let (array, shape): (ArrayRef, Vec<usize>) = match shape.len() {
        0 => (values, vec![1]),
        1 => (values, shape),
        2 if shape[1] == 0 && shape[0] > 0 => {
            return Err(Error::unsupported(
                format!("{shape:?} {dtype}"),
                ColumnKind::Host.to_string(),
                "zero-width rows cannot be held in a fixed-size list",
            ))
        }
        2 => {
            let width = shape[1];
            let size = i32::try_from(width)
                .map_err(|_| Error::shape(format!("list width {width} overflows i32")))?;
            let field = Arc::new(Field::new("item", dtype.to_arrow(), false));
            let list = FixedSizeListArray::try_new(field, size, values, None)?;
            (Arc::new(list), shape)
        }
        rank => {
            return Err(Error::unsupported(
                format!("rank-{rank} {dtype}"),
                ColumnKind::Host.to_string(),
                "host arrays hold at most two dimensions",
            ))
        }
    };
    Ok(TypedData::trusted(NativeArray::Host(array), dtype, shape))
}

fn import_accelerator(capsule: SharedTensor) -> Result<TypedData> {
    if capsule.device != Device::Accelerator {
        return Err(Error::unsupported(
            capsule.device.to_string(),
            ColumnKind::Accelerator.to_string(),
            "accelerator arrays cannot view host memory",
        ));
    }
    let SharedTensor {
        buffer,
        dtype,
        shape,
        ..
    } = capsule;
    let array = DeviceArray::new(DeviceBuffer::adopt(buffer), dtype, shape.clone())?;
    Ok(TypedData::trusted(NativeArray::Accelerator(array), dtype, shape))
}

fn import_framework(capsule: SharedTensor) -> Result<TypedData> {
    let SharedTensor {
        buffer,
        device,
        dtype,
        shape,
    } = capsule;
    let storage = match device {
        Device::Host => Storage::Host(buffer),
        Device::Accelerator => Storage::Accelerator(DeviceBuffer::adopt(buffer)),
    };
    let tensor = Tensor::from_parts(storage, dtype, shape.clone())?;
    Ok(TypedData::trusted(NativeArray::Framework(tensor), dtype, shape))
}
