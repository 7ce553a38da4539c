use bytes::Bytes;
use podbridge_core::{
    BindingError, NativeHandle, NativeKind, NativeResultExt, Result, Shape, TensorType,
};
use tracing::debug;

use crate::buffer::encode_ne;
use crate::{Element, NativeObject, RawBuffer, Runtime, Tensor, TensorBuffer};

/// Which native memory backend an allocator draws from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocatorScope {
    /// Backend-agnostic; usable without a model.
    Generic,
    /// Tensors feed the named model without conversion. They are not
    /// guaranteed to be valid input to models on another backend.
    Model { name: String },
}

/// Factory for tensors backed by native storage.
#[derive(Debug)]
pub struct Allocator {
    object: NativeObject,
    scope: AllocatorScope,
}

impl Allocator {
    pub(crate) fn generic(runtime: &Runtime) -> Result<Self> {
        let handle = runtime
            .engine()
            .generic_allocator()
            .native_context("get_generic_allocator")?;
        Ok(Self {
            object: NativeObject::bound(runtime, NativeKind::Allocator, handle)?,
            scope: AllocatorScope::Generic,
        })
    }

    pub(crate) fn for_model(runtime: &Runtime, model: NativeHandle, name: String) -> Result<Self> {
        let handle = runtime
            .engine()
            .model_allocator(model)
            .native_context("get_allocator")?;
        Ok(Self {
            object: NativeObject::bound(runtime, NativeKind::Allocator, handle)?,
            scope: AllocatorScope::Model { name },
        })
    }

    pub fn scope(&self) -> &AllocatorScope {
        &self.scope
    }

    pub fn handle(&self) -> Result<NativeHandle> {
        self.object.handle()
    }

    /// Copy typed data into fresh native storage. The element type comes
    /// from the buffer variant.
    pub fn create_from_typed_buffer<'a>(
        &self,
        data: impl Into<TensorBuffer<'a>>,
        shape: impl Into<Shape>,
    ) -> Result<Tensor> {
        let data = data.into();
        let shape = shape.into();
        let expected = shape.element_count()?;
        if data.len() != expected {
            return Err(BindingError::DataLengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        self.allocate(data.tensor_type(), &shape, Bytes::from(data.to_native_bytes()))
    }

    /// Copy `data` into fresh native storage as a tensor of `T`.
    pub fn copy_from<T: Element>(&self, data: &[T], shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        let expected = shape.element_count()?;
        if data.len() != expected {
            return Err(BindingError::DataLengthMismatch {
                expected,
                actual: data.len(),
            });
        }
        self.allocate(T::TENSOR_TYPE, &shape, Bytes::from(encode_ne(data)))
    }

    /// Build a tensor from untyped bytes.
    ///
    /// No copy is guaranteed only when the buffer is directly addressable,
    /// in native byte order and mutable (see [`RawBuffer`]); otherwise a
    /// copy occurs silently. On the no-copy path the tensor takes over the
    /// caller's region.
    pub fn create_from_raw_bytes(
        &self,
        buffer: RawBuffer,
        shape: impl Into<Shape>,
        tensor_type: TensorType,
    ) -> Result<Tensor> {
        let width = numeric_width(tensor_type)?;
        let shape = shape.into();
        let expected = shape.byte_len(width)?;
        if buffer.len() != expected {
            return Err(BindingError::DataLengthMismatch {
                expected,
                actual: buffer.len(),
            });
        }

        let (bytes, zero_copy) = buffer.into_native(width);
        debug!(
            %tensor_type,
            dims = ?shape.dims(),
            zero_copy,
            "creating tensor from raw bytes"
        );
        self.allocate(tensor_type, &shape, bytes)
    }

    /// Strings are always copied into a native string tensor.
    pub fn create_from_strings<S: AsRef<str>>(
        &self,
        strings: &[S],
        shape: impl Into<Shape>,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let expected = shape.element_count()?;
        if strings.len() != expected {
            return Err(BindingError::DataLengthMismatch {
                expected,
                actual: strings.len(),
            });
        }

        let allocator = self.object.handle()?;
        let owned: Vec<String> = strings.iter().map(|s| s.as_ref().to_owned()).collect();
        let runtime = self.object.runtime();
        let handle = runtime
            .engine()
            .create_string_tensor(&owned, &shape.to_native()?, allocator)
            .native_context("create_string_tensor")?;
        Tensor::from_handle(runtime, handle)
    }

    pub fn release(&self) {
        self.object.release();
    }

    fn allocate(&self, tensor_type: TensorType, shape: &Shape, bytes: Bytes) -> Result<Tensor> {
        let allocator = self.object.handle()?;
        let runtime = self.object.runtime();
        let handle = runtime
            .engine()
            .allocate_tensor(&shape.to_native()?, tensor_type.code(), Some(bytes), allocator)
            .native_context("allocate_tensor")?;
        Tensor::from_handle(runtime, handle)
    }
}

fn numeric_width(tensor_type: TensorType) -> Result<usize> {
    match tensor_type.element_byte_width() {
        Some(width) if tensor_type.is_numeric() => Ok(width),
        _ => Err(BindingError::UnsupportedTensorType(tensor_type)),
    }
}
