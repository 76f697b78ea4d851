//! Integration tests for puente.

#![allow(
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::uninlined_format_args
)]

use std::sync::Arc;

use arrow::{
    array::{Array, ArrayRef, Float32Array, Int64Array, ListArray, RecordBatch, UInt64Array},
    datatypes::{DataType, Field, Int64Type, Schema},
};
use puente::{
    convert_column, ArrowDataset, BatchConverter, Column, ColumnKind, DType, Device,
    DeviceArray, Error, FrameworkLoader, LoaderConfig, NamedMap, OnDevice, QueueSource, RawBatch,
    RawColumn, Targets,
};

/// Creates a dataset with a float feature, a list feature and an int label.
fn create_test_dataset(rows: usize) -> ArrowDataset {
    let features: Vec<f32> = (0..rows).map(|i| i as f32 * 0.5).collect();
    let tags = ListArray::from_iter_primitive::<Int64Type, _, _>(
        (0..rows as i64).map(|i| Some((0..i % 3).map(|v| Some(i * 10 + v)).collect::<Vec<_>>())),
    );
    let labels: Vec<i64> = (0..rows as i64).map(|i| i % 2).collect();

    let schema = Arc::new(Schema::new(vec![
        Field::new("feature", DataType::Float32, false),
        Field::new("tags", tags.data_type().clone(), false),
        Field::new("label", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Float32Array::from(features)),
            Arc::new(tags),
            Arc::new(Int64Array::from(labels)),
        ],
    )
    .ok()
    .unwrap_or_else(|| panic!("Should create batch"));

    ArrowDataset::from_batch(batch)
        .ok()
        .unwrap_or_else(|| panic!("Should create dataset"))
}

fn host_inputs(columns: Vec<(&str, ArrayRef)>) -> NamedMap<RawColumn> {
    columns
        .into_iter()
        .map(|(name, array)| (name, RawColumn::new(array)))
        .collect()
}

#[test]
fn test_end_to_end_framework_batches() {
    let config = LoaderConfig::new().batch_size(4).device(Device::Accelerator);
    let loader =
        FrameworkLoader::from_dataset(create_test_dataset(10), &config, vec!["label".into()])
            .unwrap();

    let mut rows = 0;
    for batch in loader {
        let batch = batch.unwrap();
        let keys: Vec<&str> = batch.inputs.keys().collect();
        assert_eq!(keys, vec!["feature", "tags__values", "tags__offsets"]);

        let feature = batch.inputs.get("feature").unwrap().as_tensor().unwrap();
        assert_eq!(feature.dtype(), DType::Float32);
        assert_eq!(feature.device(), Device::Accelerator);

        let offsets = batch.inputs.get("tags__offsets").unwrap().as_tensor().unwrap();
        let offsets = offsets.to_vec::<i32>().unwrap();
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets.len(), feature.shape()[0] + 1);

        let label = batch.targets.as_single().unwrap().as_tensor().unwrap();
        assert_eq!(label.dtype(), DType::Int64);
        rows += label.shape()[0];
    }
    assert_eq!(rows, 10);
}

#[test]
fn test_list_values_follow_offsets() {
    let config = LoaderConfig::new().batch_size(6).device(Device::Host);
    let mut loader =
        FrameworkLoader::from_dataset(create_test_dataset(6), &config, Vec::new()).unwrap();

    let batch = loader.next().unwrap().unwrap();
    let values = batch.inputs.get("tags__values").unwrap().as_host().unwrap();
    let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
    let offsets = batch.inputs.get("tags__offsets").unwrap().as_host().unwrap();
    assert_eq!(offsets.len(), 7);

    // Row i holds i % 3 values: 0, 1, 2, 0, 1, 2.
    assert_eq!(values.values().to_vec(), vec![10, 20, 21, 40, 50, 51]);
    assert!(loader.next().is_none());
}

#[test]
fn test_accelerator_column_makes_batch_accelerator() {
    let on_device = DeviceArray::from_slice(&[1.0f32, 2.0, 3.0]);
    let device_ptr = on_device.as_ptr();
    let host: ArrayRef = Arc::new(Int64Array::from(vec![7, 8, 9]));
    let host_ptr = host.to_data().buffers()[0].as_ptr();

    let mut inputs = NamedMap::new();
    inputs.insert("gpu", RawColumn::new(on_device));
    inputs.insert("cpu", RawColumn::new(host));

    let converter = BatchConverter::new(ColumnKind::Host);
    let batch = converter
        .process(RawBatch::new(Some(inputs), Targets::None))
        .unwrap();

    let gpu = batch.inputs.get("gpu").unwrap();
    assert_eq!(gpu.kind(), ColumnKind::Framework);
    assert_eq!(gpu.values_ptr(), Some(device_ptr));

    let cpu = batch.inputs.get("cpu").unwrap();
    assert_eq!(cpu.kind(), ColumnKind::Framework);
    assert_eq!(cpu.device(), Device::Accelerator);
    assert_ne!(cpu.values_ptr(), Some(host_ptr));
    assert_eq!(cpu.as_tensor().unwrap().to_vec::<i64>().unwrap(), vec![7, 8, 9]);
}

#[test]
fn test_host_override_shares_buffers() {
    let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 3]));
    let ptr = ids.to_data().buffers()[0].as_ptr();

    let converter = BatchConverter::new(ColumnKind::Host).with_device(Device::Host);
    let batch = converter
        .process(RawBatch::new(
            Some(host_inputs(vec![("ids", ids)])),
            Targets::None,
        ))
        .unwrap();

    let ids = batch.inputs.get("ids").unwrap();
    assert_eq!(ids.kind(), ColumnKind::Host);
    assert_eq!(ids.values_ptr(), Some(ptr));
}

#[test]
fn test_target_shapes_are_preserved() {
    let converter = BatchConverter::new(ColumnKind::Host).with_device(Device::Accelerator);
    let col = |v: i64| -> ArrayRef { Arc::new(Int64Array::from(vec![v, v])) };

    let none = converter
        .process(RawBatch::new(Some(host_inputs(vec![("x", col(0))])), Targets::None))
        .unwrap();
    assert!(none.targets.is_none());

    let single = converter
        .process(RawBatch::new(
            Some(host_inputs(vec![("x", col(0))])),
            Targets::Single(RawColumn::new(col(1))),
        ))
        .unwrap();
    assert_eq!(
        single.targets.as_single().unwrap().kind(),
        ColumnKind::Framework
    );

    let multi = converter
        .process(RawBatch::new(
            Some(host_inputs(vec![("x", col(0))])),
            Targets::Multi(host_inputs(vec![("a", col(1)), ("b", col(2))])),
        ))
        .unwrap();
    let targets = multi.targets.as_multi().unwrap();
    assert_eq!(targets.keys().collect::<Vec<_>>(), vec!["a", "b"]);
}

#[test]
fn test_host_batch_stays_on_host() {
    let unsigned: ArrayRef = Arc::new(UInt64Array::from(vec![1u64, 2]));
    let converter = BatchConverter::new(ColumnKind::Host);
    let batch = converter
        .process(RawBatch::new(
            Some(host_inputs(vec![("unsigned", unsigned)])),
            Targets::None,
        ))
        .unwrap();
    assert_eq!(
        batch.inputs.get("unsigned").unwrap().kind(),
        ColumnKind::Host
    );
}

#[test]
fn test_missing_inputs_default_to_framework() {
    let label: ArrayRef = Arc::new(Int64Array::from(vec![1, 0]));
    let converter = BatchConverter::new(ColumnKind::Host);
    let batch = converter
        .process(RawBatch::new(None, Targets::Single(RawColumn::new(label))))
        .unwrap();
    assert!(batch.inputs.is_empty());
    assert_eq!(
        batch.targets.as_single().unwrap().kind(),
        ColumnKind::Framework
    );
}

#[test]
fn test_unrepresentable_dtype_fails_whole_batch() {
    let ok: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
    let unsigned: ArrayRef = Arc::new(UInt64Array::from(vec![1u64, 2]));
    let mut loader = FrameworkLoader::new(QueueSource::new(
        vec![RawBatch::new(
            Some(host_inputs(vec![("ok", ok), ("unsigned", unsigned)])),
            Targets::None,
        )],
        ColumnKind::Host,
    ))
    .with_device(Device::Accelerator);

    let result = loader.next().unwrap();
    assert!(matches!(result, Err(Error::UnsupportedConversion { .. })));
    assert!(loader.next().is_none());
}

#[test]
fn test_flattening_collision_is_reported() {
    let list: ArrayRef = Arc::new(ListArray::from_iter_primitive::<Int64Type, _, _>(vec![
        Some(vec![Some(1)]),
    ]));
    let clash: ArrayRef = Arc::new(Int64Array::from(vec![0]));
    let converter = BatchConverter::new(ColumnKind::Host).with_device(Device::Host);
    let inputs = host_inputs(vec![("a", list), ("a__values", clash)]);

    let result = converter.process(RawBatch::new(Some(inputs), Targets::None));
    assert!(matches!(result, Err(Error::DuplicateColumn { .. })));
}

#[test]
fn test_peek_then_next() {
    let config = LoaderConfig::new().batch_size(3).device(Device::Accelerator);
    let mut loader =
        FrameworkLoader::from_dataset(create_test_dataset(6), &config, vec!["label".into()])
            .unwrap()
            .map(|inputs, targets| Ok((inputs, targets)));

    let peeked = loader.peek().unwrap().unwrap();
    let peeked_again = loader.peek().unwrap().unwrap();
    let first = loader.next().unwrap().unwrap();
    let read = |batch: &puente::ConvertedBatch| {
        batch
            .inputs
            .get("feature")
            .unwrap()
            .as_tensor()
            .unwrap()
            .to_vec::<f32>()
            .unwrap()
    };
    assert_eq!(read(&peeked), read(&first));
    assert_eq!(read(&peeked_again), read(&first));

    let second = loader.next().unwrap().unwrap();
    assert_ne!(read(&second), read(&first));
    assert!(loader.next().is_none());
}

#[test]
fn test_transforms_run_in_order() {
    let col: ArrayRef = Arc::new(Int64Array::from(vec![1]));
    let mut loader = FrameworkLoader::new(QueueSource::new(
        vec![RawBatch::new(Some(host_inputs(vec![("x", col)])), Targets::None)],
        ColumnKind::Host,
    ))
    .with_device(Device::Host)
    .map(|mut inputs, targets| {
        let x = inputs.remove("x").unwrap();
        inputs.insert("y", x);
        Ok((inputs, targets))
    })
    .map(|inputs, targets| {
        if inputs.contains_key("y") {
            Ok((inputs, targets))
        } else {
            Err(Error::transform("second transform ran first"))
        }
    });

    let batch = loader.next().unwrap().unwrap();
    assert!(batch.inputs.contains_key("y"));
}

#[test]
fn test_round_trip_host_framework_host() {
    let values: ArrayRef = Arc::new(Float32Array::from(vec![0.25, -1.0, 8.5]));
    let column = Column::new_checked(RawColumn::new(Arc::clone(&values))).unwrap();

    let tensor = convert_column(column, ColumnKind::Framework, None).unwrap();
    assert_eq!(tensor.kind(), ColumnKind::Framework);
    let back = convert_column(tensor, ColumnKind::Host, None).unwrap();
    assert_eq!(back.kind(), ColumnKind::Host);

    let (data, offsets) = back.into_parts();
    assert!(offsets.is_none());
    let array = data.array().as_host().unwrap();
    assert_eq!(array.as_ref(), values.as_ref());
}

#[test]
fn test_sharded_loaders_cover_dataset_once() {
    let mut seen = Vec::new();
    for rank in 0..3 {
        let config = LoaderConfig::new().batch_size(4).shard(3, rank).device(Device::Host);
        let loader =
            FrameworkLoader::from_dataset(create_test_dataset(10), &config, Vec::new()).unwrap();
        for batch in loader {
            let batch = batch.unwrap();
            let feature = batch.inputs.get("feature").unwrap().as_host().unwrap();
            let feature = feature.as_any().downcast_ref::<Float32Array>().unwrap();
            seen.extend(feature.values().iter().map(|v| (v * 2.0) as i64));
        }
    }
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}

#[cfg(feature = "shuffle")]
#[test]
fn test_seeded_shuffle_is_reproducible() {
    let epoch = || {
        let config = LoaderConfig::new().batch_size(10).shuffle(true).seed(11).device(Device::Host);
        let mut loader =
            FrameworkLoader::from_dataset(create_test_dataset(10), &config, Vec::new()).unwrap();
        let batch = loader.next().unwrap().unwrap();
        let feature = batch.inputs.get("feature").unwrap().as_host().unwrap();
        feature
            .as_any()
            .downcast_ref::<Float32Array>()
            .unwrap()
            .values()
            .to_vec()
    };
    let first = epoch();
    assert_eq!(first, epoch());

    let mut sorted = first.clone();
    sorted.sort_by(f32::total_cmp);
    assert_eq!(sorted, (0..10).map(|i| i as f32 * 0.5).collect::<Vec<_>>());
}
