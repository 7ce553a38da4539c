//! Host-side lifecycle and marshaling over a handle-based inference engine.
//!
//! Every wrapper here owns exactly one native handle through a
//! [`NativeObject`]; handle reference counts live in the [`HandleRegistry`]
//! owned by the [`Runtime`] context, and native objects are deleted when
//! their last wrapper is released or dropped.

pub mod allocator;
pub mod buffer;
pub mod context;
pub mod model;
pub mod native;
pub mod registry;
pub mod tensor;

pub use allocator::*;
pub use buffer::{ByteOrder, Element, RawBuffer, TensorBuffer, TensorValues};
pub use context::*;
pub use model::*;
pub use native::*;
pub use registry::*;
pub use tensor::*;

pub use podbridge_core::{
    BindingError, Device, Dimension, NativeEngine, NativeHandle, NativeKind, Result,
    RuntimeOptions, Shape, TensorSpec, TensorType,
};
