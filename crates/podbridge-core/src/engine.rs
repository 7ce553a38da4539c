use std::path::Path;

use anyhow::Result;
use bytes::Bytes;

use crate::{NativeHandle, NativeKind, RuntimeOptions};

/// One declared dimension as the engine reports it: a non-negative size,
/// -1 for "any", or -2 together with a symbol name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeDimension {
    pub value: i64,
    pub symbol: Option<String>,
}

impl NativeDimension {
    pub fn fixed(value: i64) -> Self {
        Self {
            value,
            symbol: None,
        }
    }

    pub fn any() -> Self {
        Self {
            value: -1,
            symbol: None,
        }
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Self {
            value: -2,
            symbol: Some(name.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeTensorSpec {
    pub name: String,
    pub type_code: i32,
    pub dims: Vec<NativeDimension>,
}

/// Named tensor handles, the shape of the infer call on both sides.
pub type NamedHandles = Vec<(String, NativeHandle)>;

/// The inference engine, reached only through opaque handles.
///
/// Every call is synchronous. Handles returned by the engine are owned
/// by the caller until passed to [`NativeEngine::delete`] with the
/// matching [`NativeKind`].
pub trait NativeEngine: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn load_library(&self) -> Result<bool>;
    fn is_loaded(&self) -> bool;

    /// Marshal runtime options into a native options object.
    fn new_options(&self, options: &RuntimeOptions) -> Result<NativeHandle>;

    fn new_model(&self, path: &Path, options: Option<NativeHandle>) -> Result<NativeHandle>;
    fn load_model(&self, model: NativeHandle) -> Result<()>;
    fn model_name(&self, model: NativeHandle) -> Result<String>;
    fn model_platform(&self, model: NativeHandle) -> Result<String>;
    fn input_specs(&self, model: NativeHandle) -> Result<Vec<NativeTensorSpec>>;
    fn output_specs(&self, model: NativeHandle) -> Result<Vec<NativeTensorSpec>>;

    fn model_allocator(&self, model: NativeHandle) -> Result<NativeHandle>;
    fn generic_allocator(&self) -> Result<NativeHandle>;

    /// Create a numeric tensor. With `Some(source)` the engine adopts the
    /// given bytes as the tensor's storage (they are already in native
    /// order and sized for the shape); with `None` it allocates zeroed
    /// storage.
    fn allocate_tensor(
        &self,
        dims: &[i64],
        type_code: i32,
        source: Option<Bytes>,
        allocator: NativeHandle,
    ) -> Result<NativeHandle>;

    fn create_string_tensor(
        &self,
        strings: &[String],
        dims: &[i64],
        allocator: NativeHandle,
    ) -> Result<NativeHandle>;

    /// Tensor storage in native byte order. Implementations may return a
    /// shared view of their own storage.
    fn tensor_bytes(&self, tensor: NativeHandle) -> Result<Bytes>;
    fn tensor_strings(&self, tensor: NativeHandle) -> Result<Vec<String>>;
    fn tensor_dims(&self, tensor: NativeHandle) -> Result<Vec<i64>>;
    fn tensor_type(&self, tensor: NativeHandle) -> Result<i32>;
    fn element_count(&self, tensor: NativeHandle) -> Result<u64>;

    fn infer(&self, inputs: &[(String, NativeHandle)], model: NativeHandle)
        -> Result<NamedHandles>;

    fn delete(&self, handle: NativeHandle, kind: NativeKind) -> Result<()>;
}
