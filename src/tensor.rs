//! Training-framework tensors.
//!
//! [`Tensor`] is the representation the training step consumes. Its storage
//! lives either in host memory or in an accelerator [`DeviceBuffer`], so a
//! tensor can be handed over from either side without copying when the
//! devices agree.
//!
//! # Example
//!
//! ```
//! use puente::{Device, Tensor};
//!
//! # fn main() -> puente::Result<()> {
//! let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3])?;
//! assert_eq!(tensor.shape(), &[2, 3]);
//!
//! let on_device = tensor.to_device(Device::Accelerator);
//! assert_eq!(on_device.to_vec::<f32>()?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! # Ok(())
//! # }
//! ```

use arrow::buffer::Buffer;

use crate::{
    accel::DeviceBuffer,
    device::{Device, OnDevice},
    dtype::{self, DType, Element},
    error::{Error, Result},
};

/// Dtypes the framework has no tensor type for.
const UNREPRESENTABLE: [DType; 3] = [DType::UInt16, DType::UInt32, DType::UInt64];

/// Where a tensor's bytes are stored.
#[derive(Debug, Clone)]
pub enum Storage {
    /// Host memory.
    Host(Buffer),
    /// Accelerator memory.
    Accelerator(DeviceBuffer),
}

impl Storage {
    fn byte_len(&self) -> usize {
        match self {
            Self::Host(buffer) => buffer.len(),
            Self::Accelerator(buffer) => buffer.len(),
        }
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            Self::Host(buffer) => buffer.as_ptr(),
            Self::Accelerator(buffer) => buffer.as_ptr(),
        }
    }
}

/// A dense tensor owned by the training framework.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: Storage,
    dtype: DType,
    shape: Vec<usize>,
}

impl Tensor {
    /// Returns true if the framework has a tensor type for `dtype`.
    pub fn supports(dtype: DType) -> bool {
        !UNREPRESENTABLE.contains(&dtype)
    }

    /// Creates a host tensor from existing data and shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length doesn't match the shape, or if
    /// the framework can't represent `T`.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: Vec<usize>) -> Result<Self> {
        if data.len() != dtype::numel(&shape) {
            return Err(Error::shape(format!(
                "Data length {} doesn't match shape {:?}",
                data.len(),
                shape
            )));
        }
        Self::from_parts(Storage::Host(Buffer::from_vec(data)), T::DTYPE, shape)
    }

    /// Creates a tensor over existing storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage size doesn't match `dtype` and
    /// `shape`, or if the framework can't represent `dtype`.
    pub fn from_parts(storage: Storage, dtype: DType, shape: Vec<usize>) -> Result<Self> {
        if !Self::supports(dtype) {
            return Err(Error::unsupported(
                dtype.to_string(),
                "framework tensor",
                "the framework has no tensor type for this dtype",
            ));
        }
        let expected = dtype::numel(&shape) * dtype.byte_width();
        if storage.byte_len() != expected {
            return Err(Error::shape(format!(
                "tensor storage holds {} bytes, {dtype} {shape:?} needs {expected}",
                storage.byte_len()
            )));
        }
        Ok(Self {
            storage,
            dtype,
            shape,
        })
    }

    /// Returns a copy of this tensor placed on `device`.
    ///
    /// A tensor already on `device` is returned as a cheap clone sharing
    /// the same storage.
    pub fn to_device(&self, device: Device) -> Self {
        let storage = match (&self.storage, device) {
            (Storage::Host(buffer), Device::Accelerator) => {
                Storage::Accelerator(DeviceBuffer::upload(buffer.as_slice()))
            }
            (Storage::Accelerator(buffer), Device::Host) => Storage::Host(buffer.download()),
            (storage, _) => storage.clone(),
        };
        Self {
            storage,
            dtype: self.dtype,
            shape: self.shape.clone(),
        }
    }

    /// Copies the tensor's values to a host vector.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` isn't the tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::shape(format!(
                "tensor is {}, requested {}",
                self.dtype,
                T::DTYPE
            )));
        }
        let values = match &self.storage {
            Storage::Host(buffer) => dtype::read_values(buffer),
            Storage::Accelerator(buffer) => dtype::read_values(&buffer.download()),
        };
        Ok(values)
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the number of elements.
    pub fn numel(&self) -> usize {
        dtype::numel(&self.shape)
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// The tensor's storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Returns a raw pointer to the first byte of the tensor's storage.
    ///
    /// Two tensors with the same pointer alias the same bytes.
    pub fn as_ptr(&self) -> *const u8 {
        self.storage.as_ptr()
    }
}

impl OnDevice for Tensor {
    fn device(&self) -> Device {
        match self.storage {
            Storage::Host(_) => Device::Host,
            Storage::Accelerator(_) => Device::Accelerator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::device_of;

    #[test]
    fn test_tensor_from_vec() {
        let tensor = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]).unwrap();
        assert_eq!(tensor.shape(), &[2, 3]);
        assert_eq!(tensor.rank(), 2);
        assert_eq!(tensor.numel(), 6);
        assert_eq!(tensor.dtype(), DType::Float32);
        assert_eq!(device_of(&tensor), Device::Host);
    }

    #[test]
    fn test_tensor_from_vec_invalid_shape() {
        let result = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], vec![2, 3]);
        assert!(result.unwrap_err().is_shape());
    }

    #[test]
    fn test_tensor_rejects_wide_unsigned() {
        let result = Tensor::from_vec(vec![1u32, 2, 3], vec![3]);
        assert!(result.unwrap_err().is_unsupported_conversion());
        assert!(Tensor::supports(DType::UInt8));
        assert!(!Tensor::supports(DType::UInt64));
    }

    #[test]
    fn test_to_device_roundtrip() {
        let tensor = Tensor::from_vec(vec![1i64, 2, 3], vec![3]).unwrap();
        let device = tensor.to_device(Device::Accelerator);
        assert_eq!(device_of(&device), Device::Accelerator);
        assert_ne!(device.as_ptr(), tensor.as_ptr());

        let back = device.to_device(Device::Host);
        assert_eq!(back.to_vec::<i64>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_to_same_device_shares_storage() {
        let tensor = Tensor::from_vec(vec![1i32, 2], vec![2]).unwrap();
        let same = tensor.to_device(Device::Host);
        assert_eq!(same.as_ptr(), tensor.as_ptr());
    }

    #[test]
    fn test_to_vec_wrong_type() {
        let tensor = Tensor::from_vec(vec![1i32, 2], vec![2]).unwrap();
        assert!(tensor.to_vec::<f32>().is_err());
    }

    #[test]
    fn test_from_parts_checks_size() {
        let storage = Storage::Accelerator(DeviceBuffer::upload(&[0u8; 12]));
        assert!(Tensor::from_parts(storage.clone(), DType::Float32, vec![3]).is_ok());
        assert!(Tensor::from_parts(storage, DType::Float64, vec![3]).is_err());
    }

    #[test]
    fn test_tensor_debug() {
        let tensor = Tensor::from_vec(vec![1.0f32], vec![1]).unwrap();
        let debug = format!("{:?}", tensor);
        assert!(debug.contains("Tensor"));
    }
}
