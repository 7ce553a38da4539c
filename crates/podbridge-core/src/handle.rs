use std::fmt;

/// Opaque identifier of a resource owned by the native engine.
///
/// Zero is reserved: it means "no handle bound" and is never handed out
/// by a well-behaved engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Resource kind behind a handle; selects the native destructor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeKind {
    Tensor,
    Model,
    Allocator,
    Options,
}

impl NativeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NativeKind::Tensor => "tensor",
            NativeKind::Model => "model",
            NativeKind::Allocator => "allocator",
            NativeKind::Options => "options",
        }
    }
}

impl fmt::Display for NativeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
