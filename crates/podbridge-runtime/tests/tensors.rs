mod common;

use anyhow::{ensure, Result};
use bytes::{Bytes, BytesMut};
use podbridge_runtime::{
    Allocator, BindingError, ByteOrder, Element, NativeEngine, RawBuffer, Shape, Tensor,
    TensorBuffer, TensorType, TensorValues,
};
use proptest::prelude::*;

use common::fixture;

const SHAPES: &[&[usize]] = &[&[], &[0], &[2, 2], &[3, 1, 4]];

fn round_trip<T: Element>(allocator: &Allocator, make: impl Fn(usize) -> T) -> Result<()> {
    for dims in SHAPES {
        let shape = Shape::from_slice(dims);
        let data: Vec<T> = (0..shape.element_count()?).map(&make).collect();

        let tensor = allocator.copy_from(&data, shape.clone())?;
        ensure!(tensor.tensor_type()? == T::TENSOR_TYPE);
        ensure!(tensor.shape()? == shape, "dims {dims:?}");
        ensure!(tensor.element_count()? == data.len());
        ensure!(tensor.to_vec::<T>()? == data, "contents differ for dims {dims:?}");
    }
    Ok(())
}

#[test]
fn typed_round_trip_across_types_and_shapes() -> Result<()> {
    let (_engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;

    round_trip(&allocator, |i| i as f32 * 0.5 - 3.0)?;
    round_trip(&allocator, |i| i as f64 * -1.25)?;
    round_trip(&allocator, |i| i as i32 - 7)?;
    round_trip(&allocator, |i| (i as i64) << 40)?;
    Ok(())
}

#[test]
fn typed_buffer_picks_the_element_type() -> Result<()> {
    let (_engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;

    let ints = vec![1i64, 2, 3];
    let tensor = allocator.create_from_typed_buffer(&ints, [3])?;
    ensure!(tensor.tensor_type()? == TensorType::Int64);
    ensure!(tensor.values()? == TensorValues::Int64(ints));

    let floats = [0.5f32, 1.5];
    let tensor = allocator.create_from_typed_buffer(TensorBuffer::from(&floats), [1, 2])?;
    ensure!(tensor.to_f32_vec()? == floats.to_vec());
    Ok(())
}

#[test]
fn element_at_follows_row_major_order() -> Result<()> {
    let (_engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;

    let matrix = allocator.copy_from(&[1.0f32, 2.0, 3.0, 4.0], [2, 2])?;
    ensure!(matrix.element_at::<f32>(&[0, 0])? == 1.0);
    ensure!(matrix.element_at::<f32>(&[0, 1])? == 2.0);
    ensure!(matrix.element_at::<f32>(&[1, 0])? == 3.0);
    ensure!(matrix.element_at::<f32>(&[1, 1])? == 4.0);

    let data: Vec<i64> = (0..24).collect();
    let cube = allocator.copy_from(&data, [1, 2, 3, 4])?;
    ensure!(cube.element_at::<i64>(&[0, 1, 2, 3])? == 23);
    ensure!(cube.element_at::<i64>(&[0, 1, 0, 2])? == 14);

    ensure!(matches!(
        matrix.element_at::<f32>(&[2, 0]),
        Err(BindingError::IndexOutOfBounds { .. })
    ));
    ensure!(matches!(
        matrix.element_at::<f32>(&[1]),
        Err(BindingError::RankMismatch { expected: 2, actual: 1 })
    ));
    ensure!(matches!(
        matrix.element_at::<i32>(&[0, 0]),
        Err(BindingError::TypeMismatch {
            expected: TensorType::Int32,
            actual: TensorType::Float32
        })
    ));
    Ok(())
}

#[test]
fn wrong_data_length_is_rejected_before_allocation() -> Result<()> {
    let (engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;
    let before = engine.live_objects();

    ensure!(matches!(
        allocator.copy_from(&[1.0f64, 2.0, 3.0], [2, 2]),
        Err(BindingError::DataLengthMismatch { expected: 4, actual: 3 })
    ));
    ensure!(matches!(
        allocator.create_from_raw_bytes(RawBuffer::heap(vec![0; 6]), [2], TensorType::Int32),
        Err(BindingError::DataLengthMismatch { expected: 8, actual: 6 })
    ));
    ensure!(matches!(
        allocator.create_from_strings(&["a", "b"], [3]),
        Err(BindingError::DataLengthMismatch { expected: 3, actual: 2 })
    ));
    ensure!(engine.live_objects() == before);
    Ok(())
}

#[test]
fn oversized_shapes_are_rejected_on_every_path() -> Result<()> {
    let (engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;
    let before = engine.live_objects();
    let overflows = |result: podbridge_runtime::Result<Tensor>| {
        matches!(result, Err(BindingError::ShapeOverflow { .. }))
    };

    let wide = [usize::MAX, 2];
    ensure!(overflows(allocator.copy_from::<f32>(&[], wide)));
    ensure!(overflows(allocator.create_from_typed_buffer(&[0i64; 0], wide)));
    ensure!(overflows(allocator.create_from_strings::<&str>(&[], wide)));
    ensure!(overflows(allocator.create_from_raw_bytes(
        RawBuffer::heap(Vec::new()),
        wide,
        TensorType::Float64,
    )));

    // element count fits, byte length does not
    let long = [1usize << 62];
    ensure!(overflows(allocator.create_from_raw_bytes(
        RawBuffer::direct(BytesMut::new()),
        long,
        TensorType::Float32,
    )));

    // zero elements, but the dims cannot cross the boundary
    ensure!(overflows(allocator.copy_from::<i32>(&[], [0, usize::MAX])));

    ensure!(engine.live_objects() == before, "nothing may reach the engine");
    Ok(())
}

#[test]
fn unsupported_types_are_rejected_on_every_path() -> Result<()> {
    let (engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;

    for tensor_type in [
        TensorType::Uint32,
        TensorType::Int8,
        TensorType::Uint64,
        TensorType::String,
    ] {
        let width = tensor_type.element_byte_width().unwrap_or(1);
        let result = allocator.create_from_raw_bytes(
            RawBuffer::heap(vec![0; 2 * width]),
            [2],
            tensor_type,
        );
        ensure!(
            matches!(result, Err(BindingError::UnsupportedTensorType(t)) if t == tensor_type),
            "{tensor_type} should be rejected"
        );
    }

    // a uint32 tensor produced on the engine side is unreadable here too
    let raw_allocator = runtime.generic_allocator()?;
    let handle = runtime.engine().allocate_tensor(
        &[2],
        TensorType::Uint32.code(),
        None,
        raw_allocator.handle()?,
    )?;
    let tensor = Tensor::from_handle(&runtime, handle)?;
    ensure!(matches!(
        tensor.to_i32_vec(),
        Err(BindingError::UnsupportedTensorType(TensorType::Uint32))
    ));
    ensure!(matches!(
        tensor.values(),
        Err(BindingError::UnsupportedTensorType(TensorType::Uint32))
    ));
    drop(tensor);
    ensure!(!engine.contains(handle));
    Ok(())
}

#[test]
fn direct_native_buffers_are_adopted_without_copy() -> Result<()> {
    let (engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;

    let mut region = BytesMut::with_capacity(16);
    for v in [1.0f32, 2.0, 3.0, 4.0] {
        region.extend_from_slice(&v.to_ne_bytes());
    }
    let ptr = region.as_ptr() as usize;

    let tensor =
        allocator.create_from_raw_bytes(RawBuffer::direct(region), [2, 2], TensorType::Float32)?;
    ensure!(
        engine.tensor_storage_ptr(tensor.handle()?) == Some(ptr),
        "direct native-order buffer should back the tensor"
    );
    ensure!(tensor.to_f32_vec()? == vec![1.0, 2.0, 3.0, 4.0]);

    // the values handed back are a copy, not a view of the region
    let mut out = tensor.to_f32_vec()?;
    out[0] = 99.0;
    ensure!(tensor.element_at::<f32>(&[0, 0])? == 1.0);
    Ok(())
}

#[test]
fn other_buffers_are_copied_silently() -> Result<()> {
    let (engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;
    let values = [10i32, -20, 30];
    let native: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();

    let read_only = Bytes::from(native.clone());
    let read_only_ptr = read_only.as_ptr() as usize;
    let tensor =
        allocator.create_from_raw_bytes(RawBuffer::read_only(read_only), [3], TensorType::Int32)?;
    ensure!(engine.tensor_storage_ptr(tensor.handle()?) != Some(read_only_ptr));
    ensure!(tensor.to_i32_vec()? == values.to_vec());

    let heap = allocator.create_from_raw_bytes(RawBuffer::heap(native), [3], TensorType::Int32)?;
    ensure!(heap.to_i32_vec()? == values.to_vec());

    let (foreign, encoded): (ByteOrder, Vec<u8>) = if ByteOrder::native() == ByteOrder::Little {
        (ByteOrder::Big, values.iter().flat_map(|v| v.to_be_bytes()).collect())
    } else {
        (ByteOrder::Little, values.iter().flat_map(|v| v.to_le_bytes()).collect())
    };
    let mut region = BytesMut::new();
    region.extend_from_slice(&encoded);
    let region_ptr = region.as_ptr() as usize;
    let swapped = allocator.create_from_raw_bytes(
        RawBuffer::direct(region).with_order(foreign),
        [3],
        TensorType::Int32,
    )?;
    ensure!(engine.tensor_storage_ptr(swapped.handle()?) != Some(region_ptr));
    ensure!(swapped.to_i32_vec()? == values.to_vec());
    Ok(())
}

#[test]
fn string_tensors_copy_in_and_out() -> Result<()> {
    let (engine, runtime) = fixture()?;
    let allocator = runtime.generic_allocator()?;
    let words = ["alpha", "beta", "gamma", "delta"];

    let tensor = allocator.create_from_strings(&words, [2, 2])?;
    ensure!(tensor.tensor_type()? == TensorType::String);
    ensure!(tensor.to_string_list()? == words);
    ensure!(tensor.get_string(&[1, 0])? == "gamma");
    ensure!(matches!(
        tensor.to_f32_vec(),
        Err(BindingError::TypeMismatch {
            expected: TensorType::Float32,
            actual: TensorType::String
        })
    ));
    ensure!(matches!(
        tensor.get_string(&[0, 2]),
        Err(BindingError::IndexOutOfBounds { .. })
    ));

    let reads = engine.string_reads();
    for (i, expected) in words.iter().enumerate() {
        ensure!(tensor.get_string(&[i / 2, i % 2])? == *expected);
    }
    ensure!(tensor.to_string_list()? == words);
    ensure!(engine.string_reads() == reads, "string contents are read once per tensor");

    let numbers = allocator.copy_from(&[1i32], [1])?;
    ensure!(matches!(
        numbers.to_string_list(),
        Err(BindingError::TypeMismatch { expected: TensorType::String, .. })
    ));
    Ok(())
}

proptest! {
    #[test]
    fn arbitrary_shapes_round_trip(
        dims in prop::collection::vec(0usize..4, 0..4),
        seed in any::<i64>(),
    ) {
        let (_engine, runtime) = fixture().unwrap();
        let allocator = runtime.generic_allocator().unwrap();
        let shape = Shape::from_slice(&dims);
        let data: Vec<i64> = (0..shape.element_count().unwrap() as i64).map(|i| seed.wrapping_add(i)).collect();

        let tensor = allocator.copy_from(&data, shape.clone()).unwrap();
        prop_assert_eq!(tensor.dims().unwrap(), dims);
        prop_assert_eq!(tensor.to_i64_vec().unwrap(), data);
    }
}
