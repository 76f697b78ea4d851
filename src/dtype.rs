//! Element types shared by every column representation.

use std::fmt;

use arrow::{buffer::Buffer, datatypes::ArrowNativeType, datatypes::DataType};

use crate::error::{Error, Result};

/// Primitive element type of a column buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// Boolean, one byte per value outside Arrow.
    Bool,
    /// Signed 8-bit integer.
    Int8,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 32-bit integer (also used for categorical string codes).
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// Unsigned 8-bit integer.
    UInt8,
    /// Unsigned 16-bit integer.
    UInt16,
    /// Unsigned 32-bit integer.
    UInt32,
    /// Unsigned 64-bit integer.
    UInt64,
    /// 32-bit float.
    Float32,
    /// 64-bit float.
    Float64,
}

impl DType {
    /// Size in bytes of one element in a dense buffer.
    pub fn byte_width(self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Returns true for signed and unsigned integers.
    pub fn is_integer(self) -> bool {
        !matches!(self, Self::Bool | Self::Float32 | Self::Float64)
    }

    /// Maps an Arrow type to a dtype, if it has a dense equivalent.
    pub fn from_arrow(data_type: &DataType) -> Option<Self> {
        let dtype = match data_type {
            DataType::Boolean => Self::Bool,
            DataType::Int8 => Self::Int8,
            DataType::Int16 => Self::Int16,
            DataType::Int32 => Self::Int32,
            DataType::Int64 => Self::Int64,
            DataType::UInt8 => Self::UInt8,
            DataType::UInt16 => Self::UInt16,
            DataType::UInt32 => Self::UInt32,
            DataType::UInt64 => Self::UInt64,
            DataType::Float32 => Self::Float32,
            DataType::Float64 => Self::Float64,
            _ => return None,
        };
        Some(dtype)
    }

    /// The Arrow type used for host arrays of this dtype.
    pub fn to_arrow(self) -> DataType {
        match self {
            Self::Bool => DataType::Boolean,
            Self::Int8 => DataType::Int8,
            Self::Int16 => DataType::Int16,
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
            Self::UInt8 => DataType::UInt8,
            Self::UInt16 => DataType::UInt16,
            Self::UInt32 => DataType::UInt32,
            Self::UInt64 => DataType::UInt64,
            Self::Float32 => DataType::Float32,
            Self::Float64 => DataType::Float64,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Rust scalar types that can back a dense column buffer.
pub trait Element: ArrowNativeType {
    /// The dtype this scalar type is stored as.
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(impl Element for $ty {
            const DTYPE: DType = DType::$dtype;
        })*
    };
}

impl_element!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
);

/// Number of elements described by a shape. A rank-0 shape holds one.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Copies a dense buffer out as typed values, realigning if needed.
pub(crate) fn read_values<T: ArrowNativeType>(buffer: &Buffer) -> Vec<T> {
    if buffer.as_ptr().align_offset(std::mem::align_of::<T>()) == 0 {
        buffer.typed_data::<T>().to_vec()
    } else {
        Buffer::from_slice_ref(buffer.as_slice())
            .typed_data::<T>()
            .to_vec()
    }
}

/// Reads an integer buffer as `i64`, used to inspect list offsets.
pub(crate) fn widen_to_i64(buffer: &Buffer, dtype: DType) -> Result<Vec<i64>> {
    let values = match dtype {
        DType::Int8 => read_values::<i8>(buffer).into_iter().map(i64::from).collect(),
        DType::Int16 => read_values::<i16>(buffer).into_iter().map(i64::from).collect(),
        DType::Int32 => read_values::<i32>(buffer).into_iter().map(i64::from).collect(),
        DType::Int64 => read_values::<i64>(buffer),
        DType::UInt8 => read_values::<u8>(buffer).into_iter().map(i64::from).collect(),
        DType::UInt16 => read_values::<u16>(buffer).into_iter().map(i64::from).collect(),
        DType::UInt32 => read_values::<u32>(buffer).into_iter().map(i64::from).collect(),
        DType::UInt64 => read_values::<u64>(buffer)
            .into_iter()
            .map(|v| i64::try_from(v).map_err(|_| Error::shape(format!("offset {v} overflows"))))
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(Error::shape(format!(
                "offsets must be integers, got {other}"
            )))
        }
    };
    Ok(values)
}
