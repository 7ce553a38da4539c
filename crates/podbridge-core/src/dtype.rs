use std::fmt;

use crate::{BindingError, Result};

/// Element kind of a native tensor.
///
/// The integer codes are the ones the engine speaks across the boundary.
/// Only float32, float64, int32, int64 and string are accepted by the
/// binding; the remaining kinds exist natively and are rejected with
/// [`BindingError::UnsupportedTensorType`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorType {
    Float32,
    Float64,
    Int32,
    Int64,
    String,
    Int8,
    Int16,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
}

impl TensorType {
    pub const ALL: [TensorType; 11] = [
        TensorType::Float32,
        TensorType::Float64,
        TensorType::Int32,
        TensorType::Int64,
        TensorType::String,
        TensorType::Int8,
        TensorType::Int16,
        TensorType::Uint8,
        TensorType::Uint16,
        TensorType::Uint32,
        TensorType::Uint64,
    ];

    pub fn code(self) -> i32 {
        match self {
            TensorType::Float32 => 0,
            TensorType::Float64 => 1,
            TensorType::Int32 => 2,
            TensorType::Int64 => 3,
            TensorType::String => 4,
            TensorType::Int8 => 5,
            TensorType::Int16 => 6,
            TensorType::Uint8 => 7,
            TensorType::Uint16 => 8,
            TensorType::Uint32 => 9,
            TensorType::Uint64 => 10,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        Ok(match code {
            0 => TensorType::Float32,
            1 => TensorType::Float64,
            2 => TensorType::Int32,
            3 => TensorType::Int64,
            4 => TensorType::String,
            5 => TensorType::Int8,
            6 => TensorType::Int16,
            7 => TensorType::Uint8,
            8 => TensorType::Uint16,
            9 => TensorType::Uint32,
            10 => TensorType::Uint64,
            other => return Err(BindingError::UnknownTensorType(other)),
        })
    }

    /// Bytes per element; `None` for strings, which have no fixed width.
    pub fn element_byte_width(self) -> Option<usize> {
        match self {
            TensorType::Int8 | TensorType::Uint8 => Some(1),
            TensorType::Int16 | TensorType::Uint16 => Some(2),
            TensorType::Float32 | TensorType::Int32 | TensorType::Uint32 => Some(4),
            TensorType::Float64 | TensorType::Int64 | TensorType::Uint64 => Some(8),
            TensorType::String => None,
        }
    }

    pub fn is_supported_at_boundary(self) -> bool {
        matches!(
            self,
            TensorType::Float32
                | TensorType::Float64
                | TensorType::Int32
                | TensorType::Int64
                | TensorType::String
        )
    }

    pub fn ensure_supported(self) -> Result<Self> {
        if self.is_supported_at_boundary() {
            Ok(self)
        } else {
            Err(BindingError::UnsupportedTensorType(self))
        }
    }

    /// Supported kinds with a flat byte buffer (everything but string).
    pub fn is_numeric(self) -> bool {
        self.is_supported_at_boundary() && self != TensorType::String
    }

    pub fn name(self) -> &'static str {
        match self {
            TensorType::Float32 => "float32",
            TensorType::Float64 => "float64",
            TensorType::Int32 => "int32",
            TensorType::Int64 => "int64",
            TensorType::String => "string",
            TensorType::Int8 => "int8",
            TensorType::Int16 => "int16",
            TensorType::Uint8 => "uint8",
            TensorType::Uint16 => "uint16",
            TensorType::Uint32 => "uint32",
            TensorType::Uint64 => "uint64",
        }
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
