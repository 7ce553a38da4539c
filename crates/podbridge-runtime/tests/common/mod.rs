#![allow(dead_code)]

use std::sync::Arc;

use podbridge_backend_memory::{MemoryEngine, MemoryModel};
use podbridge_runtime::{Result, Runtime};
use tracing_subscriber::EnvFilter;

pub const ADDITION: &str = "models/addition";
pub const STRINGS: &str = "models/string_reverse";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A memory engine with the stock models registered, and a runtime over it.
pub fn fixture() -> Result<(Arc<MemoryEngine>, Runtime)> {
    init_tracing();
    let engine = Arc::new(MemoryEngine::new());
    engine.register(ADDITION, MemoryModel::addition());
    engine.register(STRINGS, MemoryModel::string_reverse());
    let runtime = Runtime::new(engine.clone())?;
    Ok((engine, runtime))
}
