use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use podbridge_core::{
    BindingError, NativeHandle, NativeKind, NativeResultExt, Result, Shape, TensorType,
};

use crate::buffer::decode_ne;
use crate::{Element, NativeObject, Runtime, TensorValues};

/// A native tensor seen from the host.
///
/// Created by an [`crate::Allocator`] or returned by
/// [`crate::Model::infer`]. Every accessor copies out of native storage;
/// nothing handed to the caller aliases it. After [`Tensor::release`]
/// every accessor fails with `ObjectNotBound`.
#[derive(Debug)]
pub struct Tensor {
    object: NativeObject,
    shape: Shape,
    tensor_type: TensorType,
    // fetched once at construction, dropped on release
    storage: Mutex<Option<Storage>>,
}

#[derive(Clone, Debug)]
enum Storage {
    /// Native-order view of the engine's buffer.
    Numeric(Bytes),
    Strings(Arc<[String]>),
}

impl Tensor {
    /// Wrap an engine tensor handle, taking one reference to it.
    pub fn from_handle(runtime: &Runtime, handle: NativeHandle) -> Result<Self> {
        Self::from_object(NativeObject::bound(runtime, NativeKind::Tensor, handle)?)
    }

    pub(crate) fn from_object(object: NativeObject) -> Result<Self> {
        let handle = object.handle()?;
        let engine = object.runtime().engine();

        let dims = engine.tensor_dims(handle).native_context("get_dims")?;
        let shape = Shape::from_native(&dims)?;
        let tensor_type =
            TensorType::from_code(engine.tensor_type(handle).native_context("get_tensor_type")?)?;

        let storage = match tensor_type.element_byte_width() {
            Some(width) => {
                let bytes = engine.tensor_bytes(handle).native_context("get_tensor_bytes")?;
                let expected = shape.byte_len(width)?;
                if bytes.len() != expected {
                    return Err(BindingError::Native {
                        op: "get_tensor_bytes",
                        message: format!(
                            "tensor {handle} has {} bytes, shape {:?} of {tensor_type} needs {expected}",
                            bytes.len(),
                            shape.dims()
                        ),
                    });
                }
                Some(Storage::Numeric(bytes))
            }
            None if tensor_type == TensorType::String => {
                let strings = engine
                    .tensor_strings(handle)
                    .native_context("get_tensor_strings")?;
                let expected = shape.element_count()?;
                if strings.len() != expected {
                    return Err(BindingError::Native {
                        op: "get_tensor_strings",
                        message: format!(
                            "string tensor {handle} holds {} entries, shape {:?} needs {expected}",
                            strings.len(),
                            shape.dims()
                        ),
                    });
                }
                Some(Storage::Strings(strings.into()))
            }
            None => None,
        };

        Ok(Self {
            object,
            shape,
            tensor_type,
            storage: Mutex::new(storage),
        })
    }

    pub fn handle(&self) -> Result<NativeHandle> {
        self.object.handle()
    }

    pub fn is_released(&self) -> bool {
        !self.object.is_bound()
    }

    pub fn shape(&self) -> Result<Shape> {
        self.object.handle()?;
        Ok(self.shape.clone())
    }

    pub fn dims(&self) -> Result<Vec<usize>> {
        self.object.handle()?;
        Ok(self.shape.dims().to_vec())
    }

    pub fn element_count(&self) -> Result<usize> {
        self.object.handle()?;
        self.shape.element_count()
    }

    pub fn tensor_type(&self) -> Result<TensorType> {
        self.object.handle()?;
        Ok(self.tensor_type)
    }

    /// Copy the contents out as `T`. Fails with `TypeMismatch` unless the
    /// tensor holds `T` elements.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let bytes = self.numeric_bytes(T::TENSOR_TYPE)?;
        Ok(decode_ne(&bytes))
    }

    pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
        self.to_vec()
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        self.to_vec()
    }

    pub fn to_i32_vec(&self) -> Result<Vec<i32>> {
        self.to_vec()
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        self.to_vec()
    }

    /// Element at a row-major multi-index, e.g. `&[i, j]` on a matrix.
    pub fn element_at<T: Element>(&self, index: &[usize]) -> Result<T> {
        let bytes = self.numeric_bytes(T::TENSOR_TYPE)?;
        let pos = self.shape.row_major_offset(index)?;
        let start = pos * T::WIDTH;
        Ok(T::read_ne(&bytes[start..start + T::WIDTH]))
    }

    pub fn to_string_list(&self) -> Result<Vec<String>> {
        Ok(self.strings()?.to_vec())
    }

    /// String element at a row-major multi-index.
    pub fn get_string(&self, index: &[usize]) -> Result<String> {
        let strings = self.strings()?;
        let pos = self.shape.row_major_offset(index)?;
        Ok(strings[pos].clone())
    }

    /// Copy the contents out, whatever the element type.
    pub fn values(&self) -> Result<TensorValues> {
        self.object.handle()?;
        Ok(match self.tensor_type.ensure_supported()? {
            TensorType::Float32 => TensorValues::Float32(self.to_vec()?),
            TensorType::Float64 => TensorValues::Float64(self.to_vec()?),
            TensorType::Int32 => TensorValues::Int32(self.to_vec()?),
            TensorType::Int64 => TensorValues::Int64(self.to_vec()?),
            TensorType::String => TensorValues::String(self.to_string_list()?),
            other => return Err(BindingError::UnsupportedTensorType(other)),
        })
    }

    /// Another wrapper over the same native tensor with its own reference;
    /// the tensor is deleted once both are released.
    pub fn share(&self) -> Result<Tensor> {
        let object = self.object.share()?;
        let storage = self.storage.lock().clone();
        Ok(Tensor {
            object,
            shape: self.shape.clone(),
            tensor_type: self.tensor_type,
            storage: Mutex::new(storage),
        })
    }

    /// Idempotent. Also drops this wrapper's view of native storage.
    pub fn release(&self) {
        self.storage.lock().take();
        self.object.release();
    }

    fn check_type(&self, expected: TensorType) -> Result<()> {
        let actual = self.tensor_type.ensure_supported()?;
        if actual != expected {
            return Err(BindingError::TypeMismatch { expected, actual });
        }
        Ok(())
    }

    fn numeric_bytes(&self, expected: TensorType) -> Result<Bytes> {
        self.object.handle()?;
        self.check_type(expected)?;
        match self.storage.lock().as_ref() {
            Some(Storage::Numeric(bytes)) => Ok(bytes.clone()),
            _ => Err(self.not_bound()),
        }
    }

    fn strings(&self) -> Result<Arc<[String]>> {
        self.object.handle()?;
        self.check_type(TensorType::String)?;
        match self.storage.lock().as_ref() {
            Some(Storage::Strings(strings)) => Ok(Arc::clone(strings)),
            _ => Err(self.not_bound()),
        }
    }

    fn not_bound(&self) -> BindingError {
        BindingError::ObjectNotBound {
            kind: NativeKind::Tensor,
        }
    }
}
