//! Scoped ownership of one native handle.
//!
//! `Unbound -> Bound -> Released`. Binding acquires a registry reference,
//! releasing drops it, and the native destructor for the object's kind
//! runs when the last reference goes away. Release also runs on drop, so
//! every exit path of the owning scope cleans up.

use parking_lot::Mutex;
use podbridge_core::{BindingError, NativeHandle, NativeKind, Result};
use tracing::{debug, error};

use crate::Runtime;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Binding {
    Unbound,
    Bound(NativeHandle),
    Released,
}

pub struct NativeObject {
    runtime: Runtime,
    kind: NativeKind,
    state: Mutex<Binding>,
}

impl NativeObject {
    /// A wrapper with no handle yet, for factories that build the wrapper
    /// before the engine hands back a handle.
    pub fn unbound(runtime: &Runtime, kind: NativeKind) -> Self {
        Self {
            runtime: runtime.clone(),
            kind,
            state: Mutex::new(Binding::Unbound),
        }
    }

    pub fn bound(runtime: &Runtime, kind: NativeKind, handle: NativeHandle) -> Result<Self> {
        let object = Self::unbound(runtime, kind);
        object.bind(handle)?;
        Ok(object)
    }

    /// Attach `handle`. A different handle bound earlier is released
    /// first, then the new one is acquired.
    pub fn bind(&self, handle: NativeHandle) -> Result<()> {
        if handle.is_null() {
            return Err(BindingError::Native {
                op: "bind",
                message: format!("engine returned a null {} handle", self.kind),
            });
        }

        let mut state = self.state.lock();
        if let Binding::Bound(old) = *state {
            if old == handle {
                return Ok(());
            }
            self.drop_reference(old);
        }
        let count = self.runtime.registry().acquire(handle);
        debug!(kind = %self.kind, %handle, count, "bound native handle");
        *state = Binding::Bound(handle);
        Ok(())
    }

    pub fn handle(&self) -> Result<NativeHandle> {
        match *self.state.lock() {
            Binding::Bound(handle) => Ok(handle),
            Binding::Unbound | Binding::Released => {
                Err(BindingError::ObjectNotBound { kind: self.kind })
            }
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(*self.state.lock(), Binding::Bound(_))
    }

    pub fn kind(&self) -> NativeKind {
        self.kind
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// A second wrapper over the same handle, holding its own reference.
    pub fn share(&self) -> Result<NativeObject> {
        NativeObject::bound(&self.runtime, self.kind, self.handle()?)
    }

    /// Idempotent; never fails. Delete errors go to the log.
    pub fn release(&self) {
        let handle = {
            let mut state = self.state.lock();
            match *state {
                Binding::Bound(handle) => {
                    *state = Binding::Released;
                    handle
                }
                Binding::Unbound | Binding::Released => return,
            }
        };
        self.drop_reference(handle);
    }

    fn drop_reference(&self, handle: NativeHandle) {
        if !self.runtime.registry().release(handle) {
            debug!(kind = %self.kind, %handle, "released shared native handle");
            return;
        }

        match self.runtime.engine().delete(handle, self.kind) {
            Ok(()) => debug!(kind = %self.kind, %handle, "deleted native object"),
            Err(err) => error!(
                kind = %self.kind,
                %handle,
                error = %format!("{err:#}"),
                "native delete failed"
            ),
        }
    }
}

impl Drop for NativeObject {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeObject")
            .field("kind", &self.kind)
            .field("state", &*self.state.lock())
            .finish()
    }
}
