//! puente - Columnar batches to framework tensors
//!
//! Bridges Arrow `RecordBatch` data into the tensor type a training
//! framework consumes, on whichever device the data already lives.
//!
//! # Design Principles
//!
//! 1. **Zero-copy first** - buffers are shared through a DLPack-style
//!    capsule whenever source and target devices agree
//! 2. **Pairs chosen once** - the export/import functions are selected per
//!    loader, not per batch
//! 3. **Flat output** - list columns become `<name>__values` and
//!    `<name>__offsets` entries in one flat mapping
//! 4. **All or nothing** - a batch converts completely or fails
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use arrow::{
//!     array::{Array, Int64Array, ListArray, RecordBatch},
//!     datatypes::{DataType, Field, Int64Type, Schema},
//! };
//! use puente::{ArrowDataset, FrameworkLoader, LoaderConfig};
//!
//! let tags = ListArray::from_iter_primitive::<Int64Type, _, _>(vec![
//!     Some(vec![Some(1), Some(2)]),
//!     Some(vec![Some(3)]),
//! ]);
//! let schema = Arc::new(Schema::new(vec![
//!     Field::new("tags", tags.data_type().clone(), false),
//!     Field::new("label", DataType::Int64, false),
//! ]));
//! let batch = RecordBatch::try_new(
//!     schema,
//!     vec![Arc::new(tags), Arc::new(Int64Array::from(vec![0, 1]))],
//! )
//! .unwrap();
//!
//! let dataset = ArrowDataset::from_batch(batch).unwrap();
//! let config = LoaderConfig::new().batch_size(2);
//! let mut loader = FrameworkLoader::from_dataset(dataset, &config, vec!["label".into()]).unwrap();
//!
//! let batch = loader.next().unwrap().unwrap();
//! assert!(batch.inputs.contains_key("tags__values"));
//! assert!(batch.inputs.contains_key("tags__offsets"));
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
// Allow common test patterns
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::cast_lossless,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::redundant_clone,
        clippy::needless_collect,
        clippy::too_many_lines,
        clippy::float_cmp,
        clippy::similar_names
    )
)]
// Allow some pedantic lints for cleaner code
#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::module_name_repetitions)]

pub mod accel;
pub mod batch;
pub mod column;
pub mod config;
pub mod convert;
pub mod dataloader;
pub mod dataset;
pub mod device;
pub mod dtype;
pub mod error;
pub mod loader;
pub mod map;
pub mod shared;
pub mod source;
pub mod table;
pub mod tensor;
pub mod transform;

// Re-exports for convenience
pub use accel::{DeviceArray, DeviceBuffer};
pub use arrow::{
    array::RecordBatch,
    datatypes::{Schema, SchemaRef},
};
pub use batch::{BatchConverter, ConvertedBatch, RawBatch, Targets};
pub use column::{Column, ColumnKind, NativeArray, RawColumn, TypedData};
pub use config::LoaderConfig;
pub use convert::{convert_column, ConversionPair};
pub use dataloader::DataLoader;
pub use dataset::{ArrowDataset, Dataset};
pub use device::{device_of, Device, OnDevice};
pub use dtype::{DType, Element};
pub use error::{Error, Result};
pub use loader::FrameworkLoader;
pub use map::{FlatMap, NamedMap};
pub use shared::SharedTensor;
pub use source::{BatchSource, DatasetSource, QueueSource};
pub use table::Table;
pub use tensor::Tensor;
pub use transform::{BatchTransform, Chain, Map};
