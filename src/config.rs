//! Loader construction options.
//!
//! [`LoaderConfig`] collects everything a
//! [`FrameworkLoader`](crate::FrameworkLoader) is built with. All options
//! except `device` shape the upstream batching; `device` fixes the output
//! representation instead of deriving it from each batch.
//!
//! ```
//! use puente::{Device, LoaderConfig};
//!
//! let config = LoaderConfig::from_json(r#"{"batch_size": 64, "device": "accelerator"}"#).unwrap();
//! assert_eq!(config.batch_size, 64);
//! assert_eq!(config.device, Some(Device::Accelerator));
//! assert!(!config.shuffle);
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    device::Device,
    error::{Error, Result},
};

/// Options recognized when building a loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Rows per batch.
    pub batch_size: usize,
    /// Shuffle rows each epoch.
    pub shuffle: bool,
    /// Seed for shuffling; `None` draws one from entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Number of dataset parts whose rows are shuffled together.
    pub parts_per_chunk: usize,
    /// Number of workers the dataset is sharded across.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_size: Option<usize>,
    /// This worker's shard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_rank: Option<usize>,
    /// Skip the last batch if it is incomplete.
    pub drop_last: bool,
    /// Output device override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: false,
            seed: None,
            parts_per_chunk: 1,
            global_size: None,
            global_rank: None,
            drop_last: false,
            device: None,
        }
    }
}

impl LoaderConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a config from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the options are
    /// inconsistent.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| Error::invalid_config(format!("Invalid loader JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the config to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::invalid_config(format!("Cannot serialize loader config: {e}")))
    }

    /// Checks the options are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero batch size or chunk
    /// size, a zero shard count, a rank without a shard count, or a rank
    /// outside the shard count.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::invalid_config("batch_size must be greater than 0"));
        }
        if self.parts_per_chunk == 0 {
            return Err(Error::invalid_config(
                "parts_per_chunk must be greater than 0",
            ));
        }
        match (self.global_size, self.global_rank) {
            (Some(0), _) => Err(Error::invalid_config("global_size must be greater than 0")),
            (None, Some(rank)) => Err(Error::invalid_config(format!(
                "global_rank {rank} given without global_size"
            ))),
            (Some(size), Some(rank)) if rank >= size => Err(Error::invalid_config(format!(
                "global_rank {rank} out of range for global_size {size}"
            ))),
            _ => Ok(()),
        }
    }

    /// Number of shards, 1 when unsharded.
    pub fn shards(&self) -> usize {
        self.global_size.unwrap_or(1)
    }

    /// This worker's shard, 0 when unsharded.
    pub fn rank(&self) -> usize {
        self.global_rank.unwrap_or(0)
    }

    /// Sets the batch size.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets whether to shuffle.
    #[must_use]
    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Sets the shuffle seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Sets how many dataset parts are shuffled together.
    #[must_use]
    pub fn parts_per_chunk(mut self, parts: usize) -> Self {
        self.parts_per_chunk = parts;
        self
    }

    /// Shards the dataset across `size` workers, reading shard `rank`.
    #[must_use]
    pub fn shard(mut self, size: usize, rank: usize) -> Self {
        self.global_size = Some(size);
        self.global_rank = Some(rank);
        self
    }

    /// Sets whether to drop the last incomplete batch.
    #[must_use]
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    /// Fixes the output device.
    #[must_use]
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }
}
