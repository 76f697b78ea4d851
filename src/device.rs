//! Where a buffer's bytes live.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Memory a buffer resides in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Host (CPU) memory.
    #[default]
    Host,
    /// Accelerator (GPU) memory.
    Accelerator,
}

impl Device {
    /// Returns true for accelerator memory.
    pub fn is_accelerator(self) -> bool {
        self == Self::Accelerator
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// Anything whose storage location can be read without touching its bytes.
pub trait OnDevice {
    /// Returns the device holding this value's bytes.
    fn device(&self) -> Device;
}

impl OnDevice for arrow::array::ArrayRef {
    fn device(&self) -> Device {
        Device::Host
    }
}

/// Returns the device of any supported buffer.
pub fn device_of<B: OnDevice + ?Sized>(buffer: &B) -> Device {
    buffer.device()
}
