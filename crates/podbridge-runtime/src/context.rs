use std::path::Path;
use std::sync::Arc;

use podbridge_core::{BindingError, NativeEngine, Result, RuntimeOptions};
use tracing::info;

use crate::{Allocator, HandleRegistry, Model};

/// Process-wide binding context: the engine plus the handle registry that
/// every wrapper created through it shares.
///
/// Cloning is cheap; clones refer to the same engine and registry.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    engine: Arc<dyn NativeEngine>,
    registry: Arc<HandleRegistry>,
}

impl Runtime {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Result<Self> {
        Self::with_registry(engine, Arc::new(HandleRegistry::new()))
    }

    /// Build a context around an existing registry, e.g. one a test wants
    /// to observe directly.
    pub fn with_registry(
        engine: Arc<dyn NativeEngine>,
        registry: Arc<HandleRegistry>,
    ) -> Result<Self> {
        if !engine.is_loaded() {
            let loaded = engine
                .load_library()
                .map_err(|e| BindingError::load(format!("{} library", engine.name()), e))?;
            if !loaded {
                return Err(BindingError::Load {
                    what: format!("{} library", engine.name()),
                    message: "engine reported the library could not be loaded".to_string(),
                });
            }
            info!(engine = engine.name(), "native library loaded");
        }

        Ok(Self {
            inner: Arc::new(RuntimeInner { engine, registry }),
        })
    }

    pub fn engine(&self) -> &dyn NativeEngine {
        self.inner.engine.as_ref()
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.inner.registry
    }

    /// Distinct native handles currently referenced by some wrapper.
    pub fn live_handles(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn generic_allocator(&self) -> Result<Allocator> {
        Allocator::generic(self)
    }

    pub fn open_model(&self, path: impl AsRef<Path>, options: RuntimeOptions) -> Result<Model> {
        Model::open(self, path, options)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.inner.engine.name())
            .field("live_handles", &self.live_handles())
            .finish()
    }
}
