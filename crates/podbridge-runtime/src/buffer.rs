//! Host-side buffers and the element types that can cross the boundary.

use std::fmt;

use bytes::{Bytes, BytesMut};
use podbridge_core::TensorType;

mod sealed {
    pub trait Sealed {}
}

/// Numeric element type with a fixed width and native-order encoding.
///
/// Implemented for exactly `f32`, `f64`, `i32` and `i64`.
pub trait Element: sealed::Sealed + Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const TENSOR_TYPE: TensorType;
    const WIDTH: usize;

    /// Decode from exactly `WIDTH` native-order bytes.
    fn read_ne(bytes: &[u8]) -> Self;
    fn write_ne(self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($ty:ty, $tensor_type:expr, $width:literal) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const TENSOR_TYPE: TensorType = $tensor_type;
            const WIDTH: usize = $width;

            fn read_ne(bytes: &[u8]) -> Self {
                let mut raw = [0u8; $width];
                raw.copy_from_slice(&bytes[..$width]);
                <$ty>::from_ne_bytes(raw)
            }

            fn write_ne(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_element!(f32, TensorType::Float32, 4);
impl_element!(f64, TensorType::Float64, 8);
impl_element!(i32, TensorType::Int32, 4);
impl_element!(i64, TensorType::Int64, 8);

pub(crate) fn decode_ne<T: Element>(bytes: &[u8]) -> Vec<T> {
    bytes.chunks_exact(T::WIDTH).map(T::read_ne).collect()
}

pub(crate) fn encode_ne<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::WIDTH);
    for v in values {
        v.write_ne(&mut out);
    }
    out
}

/// Borrowed typed data for the copying creation path.
#[derive(Clone, Copy, Debug)]
pub enum TensorBuffer<'a> {
    Float32(&'a [f32]),
    Float64(&'a [f64]),
    Int32(&'a [i32]),
    Int64(&'a [i64]),
}

impl TensorBuffer<'_> {
    pub fn tensor_type(&self) -> TensorType {
        match self {
            TensorBuffer::Float32(_) => TensorType::Float32,
            TensorBuffer::Float64(_) => TensorType::Float64,
            TensorBuffer::Int32(_) => TensorType::Int32,
            TensorBuffer::Int64(_) => TensorType::Int64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorBuffer::Float32(v) => v.len(),
            TensorBuffer::Float64(v) => v.len(),
            TensorBuffer::Int32(v) => v.len(),
            TensorBuffer::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn to_native_bytes(self) -> Vec<u8> {
        match self {
            TensorBuffer::Float32(v) => encode_ne(v),
            TensorBuffer::Float64(v) => encode_ne(v),
            TensorBuffer::Int32(v) => encode_ne(v),
            TensorBuffer::Int64(v) => encode_ne(v),
        }
    }
}

macro_rules! impl_from_slice {
    ($ty:ty, $variant:ident) => {
        impl<'a> From<&'a [$ty]> for TensorBuffer<'a> {
            fn from(v: &'a [$ty]) -> Self {
                TensorBuffer::$variant(v)
            }
        }

        impl<'a> From<&'a Vec<$ty>> for TensorBuffer<'a> {
            fn from(v: &'a Vec<$ty>) -> Self {
                TensorBuffer::$variant(v.as_slice())
            }
        }

        impl<'a, const N: usize> From<&'a [$ty; N]> for TensorBuffer<'a> {
            fn from(v: &'a [$ty; N]) -> Self {
                TensorBuffer::$variant(v.as_slice())
            }
        }
    };
}

impl_from_slice!(f32, Float32);
impl_from_slice!(f64, Float64);
impl_from_slice!(i32, Int32);
impl_from_slice!(i64, Int64);

/// Owned copy of a tensor's contents.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorValues {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    String(Vec<String>),
}

impl TensorValues {
    pub fn tensor_type(&self) -> TensorType {
        match self {
            TensorValues::Float32(_) => TensorType::Float32,
            TensorValues::Float64(_) => TensorType::Float64,
            TensorValues::Int32(_) => TensorType::Int32,
            TensorValues::Int64(_) => TensorType::Int64,
            TensorValues::String(_) => TensorType::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorValues::Float32(v) => v.len(),
            TensorValues::Float64(v) => v.len(),
            TensorValues::Int32(v) => v.len(),
            TensorValues::Int64(v) => v.len(),
            TensorValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

#[derive(Debug)]
enum RawStorage {
    /// Caller-owned, directly addressable and writable region.
    Direct(BytesMut),
    ReadOnly(Bytes),
    /// Ordinary heap bytes the engine cannot adopt as tensor storage.
    Heap(Vec<u8>),
}

/// Untyped caller bytes for [`crate::Allocator::create_from_raw_bytes`].
///
/// No copy is made only when the buffer is directly addressable, in
/// native byte order and mutable, i.e. built with [`RawBuffer::direct`]
/// and left in native order. Any other buffer is copied silently into
/// fresh native storage, converting the byte order if needed.
#[derive(Debug)]
pub struct RawBuffer {
    storage: RawStorage,
    order: ByteOrder,
}

impl RawBuffer {
    pub fn direct(bytes: BytesMut) -> Self {
        Self {
            storage: RawStorage::Direct(bytes),
            order: ByteOrder::native(),
        }
    }

    pub fn read_only(bytes: Bytes) -> Self {
        Self {
            storage: RawStorage::ReadOnly(bytes),
            order: ByteOrder::native(),
        }
    }

    pub fn heap(bytes: Vec<u8>) -> Self {
        Self {
            storage: RawStorage::Heap(bytes),
            order: ByteOrder::native(),
        }
    }

    /// Declare the byte order the contents are encoded in.
    pub fn with_order(mut self, order: ByteOrder) -> Self {
        self.order = order;
        self
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn is_direct(&self) -> bool {
        !matches!(self.storage, RawStorage::Heap(_))
    }

    pub fn is_mutable(&self) -> bool {
        !matches!(self.storage, RawStorage::ReadOnly(_))
    }

    pub fn is_zero_copy_candidate(&self) -> bool {
        self.is_direct() && self.is_mutable() && self.order == ByteOrder::native()
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            RawStorage::Direct(b) => b,
            RawStorage::ReadOnly(b) => b,
            RawStorage::Heap(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native-order storage for the engine, and whether it is the caller's
    /// own region (no copy). `width` is the element width for byte swaps.
    pub(crate) fn into_native(self, width: usize) -> (Bytes, bool) {
        let zero_copy = self.is_zero_copy_candidate();
        let order = self.order;
        match self.storage {
            RawStorage::Direct(b) if zero_copy => (b.freeze(), true),
            storage => {
                let src: &[u8] = match &storage {
                    RawStorage::Direct(b) => b,
                    RawStorage::ReadOnly(b) => b,
                    RawStorage::Heap(b) => b,
                };
                (Bytes::from(to_native_order(src, width, order)), false)
            }
        }
    }
}

fn to_native_order(src: &[u8], width: usize, order: ByteOrder) -> Vec<u8> {
    let mut out = src.to_vec();
    if order != ByteOrder::native() && width > 1 {
        for chunk in out.chunks_exact_mut(width) {
            chunk.reverse();
        }
    }
    out
}
