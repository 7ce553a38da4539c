use thiserror::Error;

use crate::{NativeKind, TensorType};

pub type Result<T> = std::result::Result<T, BindingError>;

/// Everything that can go wrong at the binding boundary.
///
/// Contract violations are raised locally before the engine is contacted.
/// Engine failures arrive as [`BindingError::Native`] or
/// [`BindingError::Load`] with the engine's message kept intact.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("{kind} object is not bound to a native handle")]
    ObjectNotBound { kind: NativeKind },

    #[error("unsupported tensor type: {0}")]
    UnsupportedTensorType(TensorType),

    #[error("unknown tensor type code: {0}")]
    UnknownTensorType(i32),

    #[error("tensor type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: TensorType,
        actual: TensorType,
    },

    #[error("input '{name}' has type {actual}, model expects {expected}")]
    InputTypeMismatch {
        name: String,
        expected: TensorType,
        actual: TensorType,
    },

    #[error("input '{name}' has an incompatible shape: {reason}")]
    ShapeMismatch { name: String, reason: String },

    #[error("index has {actual} dimensions but the tensor has {expected}")]
    RankMismatch { expected: usize, actual: usize },

    #[error("index {index:?} is out of bounds for dims {dims:?}")]
    IndexOutOfBounds { index: Vec<usize>, dims: Vec<usize> },

    #[error("data holds {actual} elements (or bytes) but the shape requires {expected}")]
    DataLengthMismatch { expected: usize, actual: usize },

    #[error("shape {dims:?} is too large to address")]
    ShapeOverflow { dims: Vec<usize> },

    #[error("input '{0}' is required by the model but was not provided")]
    MissingInput(String),

    #[error("input '{0}' is not declared by the model")]
    UnexpectedInput(String),

    #[error("model is not loaded")]
    ModelNotLoaded,

    #[error("failed to load {what}: {message}")]
    Load { what: String, message: String },

    #[error("native engine error in {op}: {message}")]
    Native { op: &'static str, message: String },
}

impl BindingError {
    /// Wraps an engine failure, keeping the full context chain in the message.
    pub fn native(op: &'static str, err: anyhow::Error) -> Self {
        BindingError::Native {
            op,
            message: format!("{err:#}"),
        }
    }

    pub fn load(what: impl Into<String>, err: anyhow::Error) -> Self {
        BindingError::Load {
            what: what.into(),
            message: format!("{err:#}"),
        }
    }
}

/// `.native_context("op")` on engine results, in the spirit of
/// `anyhow::Context`.
pub trait NativeResultExt<T> {
    fn native_context(self, op: &'static str) -> Result<T>;
}

impl<T> NativeResultExt<T> for anyhow::Result<T> {
    fn native_context(self, op: &'static str) -> Result<T> {
        self.map_err(|err| BindingError::native(op, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn native_errors_keep_the_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("graph exploded")).context("run session");
        let wrapped = err.native_context("infer").unwrap_err();
        let text = wrapped.to_string();
        assert!(text.contains("infer"));
        assert!(text.contains("run session"));
        assert!(text.contains("graph exploded"));
    }
}
