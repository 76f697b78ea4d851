//! Accelerator-resident arrays.
//!
//! A [`DeviceBuffer`] is a reference-counted region of accelerator memory.
//! Bytes only cross the host/accelerator boundary through
//! [`DeviceBuffer::upload`] and [`DeviceBuffer::download`], both of which
//! are synchronous copies. Cloning a buffer or a [`DeviceArray`] shares the
//! same device allocation.

use arrow::{array::Array, buffer::Buffer, datatypes::ToByteSlice};
use tracing::debug;

use crate::{
    column,
    device::{Device, OnDevice},
    dtype::{self, DType, Element},
    error::{Error, Result},
    shared,
};

/// A region of accelerator memory.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    bytes: Buffer,
}

impl DeviceBuffer {
    /// Copies host bytes into a fresh accelerator allocation.
    pub fn upload(host: &[u8]) -> Self {
        debug!("HtoD transfer: {} bytes", host.len());
        Self {
            bytes: Buffer::from_slice_ref(host),
        }
    }

    /// Copies the allocation back into host memory.
    pub fn download(&self) -> Buffer {
        debug!("DtoH transfer: {} bytes", self.bytes.len());
        Buffer::from_slice_ref(self.bytes.as_slice())
    }

    /// Size of the allocation in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if the allocation holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Device address of the first byte.
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// Hands out another reference to the same allocation.
    pub(crate) fn share(&self) -> Buffer {
        self.bytes.clone()
    }

    /// Adopts a buffer that already lives in accelerator memory.
    pub(crate) fn adopt(bytes: Buffer) -> Self {
        Self { bytes }
    }
}

/// A typed, shaped array in accelerator memory.
#[derive(Debug, Clone)]
pub struct DeviceArray {
    buffer: DeviceBuffer,
    dtype: DType,
    shape: Vec<usize>,
}

impl DeviceArray {
    /// Wraps a device buffer, checking its size against `dtype` and `shape`.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the byte length doesn't match.
    pub fn new(buffer: DeviceBuffer, dtype: DType, shape: Vec<usize>) -> Result<Self> {
        let expected = dtype::numel(&shape) * dtype.byte_width();
        if buffer.len() != expected {
            return Err(Error::shape(format!(
                "device buffer holds {} bytes, {dtype} {shape:?} needs {expected}",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            dtype,
            shape,
        })
    }

    /// Uploads a 1-D slice of host values.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        Self {
            buffer: DeviceBuffer::upload(values.to_byte_slice()),
            dtype: T::DTYPE,
            shape: vec![values.len()],
        }
    }

    /// Uploads booleans, one byte per value.
    pub fn from_bools(values: &[bool]) -> Self {
        let bytes: Vec<u8> = values.iter().map(|&v| u8::from(v)).collect();
        Self {
            buffer: DeviceBuffer::upload(&bytes),
            dtype: DType::Bool,
            shape: vec![values.len()],
        }
    }

    /// Uploads a dense Arrow array (primitive, boolean or fixed-size list).
    ///
    /// # Errors
    ///
    /// Returns an error if the array has nulls or no dense dtype.
    pub fn from_arrow(array: &dyn Array) -> Result<Self> {
        if column::host_nulls(array) > 0 {
            return Err(Error::shape("cannot upload an array containing nulls"));
        }
        let (dtype, shape) = column::dense_layout(array)?;
        let bytes = shared::host_bytes(array)?;
        Self::new(DeviceBuffer::upload(bytes.as_slice()), dtype, shape)
    }

    /// Reinterprets the array under a new shape with the same element count.
    ///
    /// # Errors
    ///
    /// Returns a shape error if the element counts differ.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self> {
        if dtype::numel(&shape) != dtype::numel(&self.shape) {
            return Err(Error::shape(format!(
                "cannot reshape {:?} into {shape:?}",
                self.shape
            )));
        }
        Ok(Self { shape, ..self })
    }

    /// Downloads the values as a host vector.
    ///
    /// # Errors
    ///
    /// Returns a shape error if `T` isn't this array's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::shape(format!(
                "array is {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(dtype::read_values(&self.buffer.download()))
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Shape of the array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Length of the leading dimension.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Returns true if the array holds no elements.
    pub fn is_empty(&self) -> bool {
        dtype::numel(&self.shape) == 0
    }

    /// The backing allocation.
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }

    /// Device address of the first element.
    pub fn as_ptr(&self) -> *const u8 {
        self.buffer.as_ptr()
    }
}

impl OnDevice for DeviceArray {
    fn device(&self) -> Device {
        Device::Accelerator
    }
}
