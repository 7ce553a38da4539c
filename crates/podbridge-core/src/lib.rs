//! Leaf types shared by every podbridge crate: handles, the tensor type
//! table, shapes and specs, runtime options, the error taxonomy, and the
//! `NativeEngine` seam behind which the inference engine lives.

pub mod dtype;
pub mod engine;
pub mod error;
pub mod handle;
pub mod options;
pub mod shape;
pub mod spec;

pub use dtype::*;
pub use engine::*;
pub use error::*;
pub use handle::*;
pub use options::*;
pub use shape::*;
pub use spec::*;
