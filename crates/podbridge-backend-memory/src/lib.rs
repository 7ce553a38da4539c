//! In-process `NativeEngine` with its own handle table.
//!
//! Models are registered per path as host-side kernels. Tensors live in
//! the table as native-order `Bytes` (adopted without copying when the
//! binding hands over a region) or as string lists. The engine also
//! records what it was asked to do so tests can check deletes, overlap
//! of inference calls and storage aliasing.

mod model;

pub use model::*;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, ensure, Context, Result};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use podbridge_core::{
    NamedHandles, NativeEngine, NativeHandle, NativeKind, NativeTensorSpec, RuntimeOptions,
    TensorType,
};
use tracing::{debug, trace};

type DeleteHook = Arc<dyn Fn(NativeHandle, NativeKind) + Send + Sync>;

enum Slot {
    Options(RuntimeOptions),
    Model(ModelSlot),
    Allocator(AllocatorSlot),
    Tensor(HostTensor),
}

impl Slot {
    fn kind(&self) -> NativeKind {
        match self {
            Slot::Options(_) => NativeKind::Options,
            Slot::Model(_) => NativeKind::Model,
            Slot::Allocator(_) => NativeKind::Allocator,
            Slot::Tensor(_) => NativeKind::Tensor,
        }
    }
}

struct ModelSlot {
    def: Arc<MemoryModel>,
    loaded: bool,
    options: RuntimeOptions,
    in_flight: Arc<AtomicBool>,
}

struct AllocatorSlot {
    /// Model whose backend this allocator serves; `None` for generic.
    model: Option<NativeHandle>,
}

pub struct MemoryEngine {
    library_available: bool,
    library_loaded: AtomicBool,
    next_handle: AtomicU64,
    slots: Mutex<HashMap<NativeHandle, Slot>>,
    models: Mutex<HashMap<PathBuf, Arc<MemoryModel>>>,
    delete_log: Mutex<Vec<(NativeHandle, NativeKind)>>,
    delete_hook: Mutex<Option<DeleteHook>>,
    fail_deletes: AtomicBool,
    infer_calls: AtomicUsize,
    string_reads: AtomicUsize,
    active_infers: AtomicUsize,
    max_active_infers: AtomicUsize,
    reentrancy_violations: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            library_available: true,
            library_loaded: AtomicBool::new(false),
            next_handle: AtomicU64::new(1),
            slots: Mutex::new(HashMap::new()),
            models: Mutex::new(HashMap::new()),
            delete_log: Mutex::new(Vec::new()),
            delete_hook: Mutex::new(None),
            fail_deletes: AtomicBool::new(false),
            infer_calls: AtomicUsize::new(0),
            string_reads: AtomicUsize::new(0),
            active_infers: AtomicUsize::new(0),
            max_active_infers: AtomicUsize::new(0),
            reentrancy_violations: AtomicUsize::new(0),
        }
    }

    /// An engine whose library never loads.
    pub fn unavailable() -> Self {
        Self {
            library_available: false,
            ..Self::new()
        }
    }

    /// Make `model` loadable from `path`.
    pub fn register(&self, path: impl Into<PathBuf>, model: MemoryModel) {
        self.models.lock().insert(path.into(), Arc::new(model));
    }

    /// Native objects currently alive in the table.
    pub fn live_objects(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn live_objects_of(&self, kind: NativeKind) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.kind() == kind)
            .count()
    }

    pub fn contains(&self, handle: NativeHandle) -> bool {
        self.slots.lock().contains_key(&handle)
    }

    /// Every successful delete, in call order.
    pub fn delete_log(&self) -> Vec<(NativeHandle, NativeKind)> {
        self.delete_log.lock().clone()
    }

    pub fn deletes_of(&self, handle: NativeHandle) -> usize {
        self.delete_log
            .lock()
            .iter()
            .filter(|(h, _)| *h == handle)
            .count()
    }

    /// Called with each handle right before it is deleted.
    pub fn set_delete_hook(&self, hook: impl Fn(NativeHandle, NativeKind) + Send + Sync + 'static) {
        *self.delete_hook.lock() = Some(Arc::new(hook));
    }

    /// Make every `delete` fail (the object stays in the table).
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn infer_calls(&self) -> usize {
        self.infer_calls.load(Ordering::SeqCst)
    }

    /// Calls to `tensor_strings`.
    pub fn string_reads(&self) -> usize {
        self.string_reads.load(Ordering::SeqCst)
    }

    /// Highest number of `infer` calls seen running at once, across models.
    pub fn max_concurrent_infers(&self) -> usize {
        self.max_active_infers.load(Ordering::SeqCst)
    }

    /// Times an `infer` started on a model that already had one running.
    pub fn reentrancy_violations(&self) -> usize {
        self.reentrancy_violations.load(Ordering::SeqCst)
    }

    /// Address of a numeric tensor's storage, for aliasing checks.
    pub fn tensor_storage_ptr(&self, handle: NativeHandle) -> Option<usize> {
        match self.slots.lock().get(&handle) {
            Some(Slot::Tensor(HostTensor {
                data: HostData::Bytes(bytes),
                ..
            })) => Some(bytes.as_ptr() as usize),
            _ => None,
        }
    }

    /// Options the engine received for a model.
    pub fn model_options(&self, model: NativeHandle) -> Option<RuntimeOptions> {
        match self.slots.lock().get(&model) {
            Some(Slot::Model(slot)) => Some(slot.options.clone()),
            _ => None,
        }
    }

    fn insert(&self, slot: Slot) -> NativeHandle {
        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        trace!(%handle, kind = %slot.kind(), "created native object");
        self.slots.lock().insert(handle, slot);
        handle
    }

    fn with_model<T>(&self, model: NativeHandle, f: impl FnOnce(&mut ModelSlot) -> T) -> Result<T> {
        match self.slots.lock().get_mut(&model) {
            Some(Slot::Model(slot)) => Ok(f(slot)),
            Some(other) => bail!("handle {model} is a {}, not a model", other.kind()),
            None => bail!("unknown model handle {model}"),
        }
    }

    fn with_tensor<T>(&self, tensor: NativeHandle, f: impl FnOnce(&HostTensor) -> T) -> Result<T> {
        match self.slots.lock().get(&tensor) {
            Some(Slot::Tensor(t)) => Ok(f(t)),
            Some(other) => bail!("handle {tensor} is a {}, not a tensor", other.kind()),
            None => bail!("unknown tensor handle {tensor}"),
        }
    }

    fn check_allocator(&self, allocator: NativeHandle) -> Result<()> {
        let slots = self.slots.lock();
        match slots.get(&allocator) {
            Some(Slot::Allocator(AllocatorSlot { model: Some(model) })) => {
                ensure!(
                    matches!(slots.get(model), Some(Slot::Model(_))),
                    "allocator {allocator} belongs to deleted model {model}"
                );
                Ok(())
            }
            Some(Slot::Allocator(_)) => Ok(()),
            Some(other) => bail!("handle {allocator} is a {}, not an allocator", other.kind()),
            None => bail!("unknown allocator handle {allocator}"),
        }
    }

    fn loaded_model(&self, model: NativeHandle) -> Result<Arc<MemoryModel>> {
        let (def, loaded) = self.with_model(model, |slot| (Arc::clone(&slot.def), slot.loaded))?;
        ensure!(loaded, "model '{}' is not loaded", def.name);
        Ok(def)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn load_library(&self) -> Result<bool> {
        if self.library_available {
            self.library_loaded.store(true, Ordering::SeqCst);
        }
        Ok(self.library_available)
    }

    fn is_loaded(&self) -> bool {
        self.library_loaded.load(Ordering::SeqCst)
    }

    fn new_options(&self, options: &RuntimeOptions) -> Result<NativeHandle> {
        Ok(self.insert(Slot::Options(options.clone())))
    }

    fn new_model(&self, path: &Path, options: Option<NativeHandle>) -> Result<NativeHandle> {
        let def = self
            .models
            .lock()
            .get(path)
            .cloned()
            .with_context(|| format!("no model registered at {}", path.display()))?;

        let options = match options {
            Some(handle) => match self.slots.lock().get(&handle) {
                Some(Slot::Options(opts)) => opts.clone(),
                _ => bail!("handle {handle} is not a runtime options object"),
            },
            None => RuntimeOptions::default(),
        };

        debug!(model = %def.name, path = %path.display(), "constructing model");
        Ok(self.insert(Slot::Model(ModelSlot {
            def,
            loaded: options.load_model_at_construction,
            options,
            in_flight: Arc::new(AtomicBool::new(false)),
        })))
    }

    fn load_model(&self, model: NativeHandle) -> Result<()> {
        self.with_model(model, |slot| slot.loaded = true)
    }

    fn model_name(&self, model: NativeHandle) -> Result<String> {
        self.with_model(model, |slot| slot.def.name.clone())
    }

    fn model_platform(&self, model: NativeHandle) -> Result<String> {
        self.with_model(model, |slot| slot.def.platform.clone())
    }

    fn input_specs(&self, model: NativeHandle) -> Result<Vec<NativeTensorSpec>> {
        Ok(self.loaded_model(model)?.inputs.clone())
    }

    fn output_specs(&self, model: NativeHandle) -> Result<Vec<NativeTensorSpec>> {
        Ok(self.loaded_model(model)?.outputs.clone())
    }

    fn model_allocator(&self, model: NativeHandle) -> Result<NativeHandle> {
        self.loaded_model(model)?;
        Ok(self.insert(Slot::Allocator(AllocatorSlot { model: Some(model) })))
    }

    fn generic_allocator(&self) -> Result<NativeHandle> {
        Ok(self.insert(Slot::Allocator(AllocatorSlot { model: None })))
    }

    fn allocate_tensor(
        &self,
        dims: &[i64],
        type_code: i32,
        source: Option<Bytes>,
        allocator: NativeHandle,
    ) -> Result<NativeHandle> {
        self.check_allocator(allocator)?;
        let tensor_type = TensorType::from_code(type_code)?;
        let width = tensor_type
            .element_byte_width()
            .with_context(|| format!("{tensor_type} tensors have no flat storage"))?;
        let byte_len = element_count(dims)?
            .checked_mul(width)
            .with_context(|| format!("dims {dims:?} of {tensor_type} overflow the byte length"))?;

        let bytes = match source {
            Some(bytes) => {
                ensure!(
                    bytes.len() == byte_len,
                    "source holds {} bytes, dims {dims:?} of {tensor_type} need {byte_len}",
                    bytes.len(),
                );
                bytes
            }
            None => BytesMut::zeroed(byte_len).freeze(),
        };

        Ok(self.insert(Slot::Tensor(HostTensor {
            dims: dims.to_vec(),
            type_code,
            data: HostData::Bytes(bytes),
        })))
    }

    fn create_string_tensor(
        &self,
        strings: &[String],
        dims: &[i64],
        allocator: NativeHandle,
    ) -> Result<NativeHandle> {
        self.check_allocator(allocator)?;
        let count = element_count(dims)?;
        ensure!(
            strings.len() == count,
            "{} strings for dims {dims:?}",
            strings.len()
        );
        Ok(self.insert(Slot::Tensor(HostTensor::strings(
            dims.to_vec(),
            strings.to_vec(),
        ))))
    }

    fn tensor_bytes(&self, tensor: NativeHandle) -> Result<Bytes> {
        self.with_tensor(tensor, |t| match &t.data {
            HostData::Bytes(bytes) => Ok(bytes.clone()),
            HostData::Strings(_) => Err(anyhow::anyhow!("tensor {tensor} holds strings")),
        })?
    }

    fn tensor_strings(&self, tensor: NativeHandle) -> Result<Vec<String>> {
        self.string_reads.fetch_add(1, Ordering::SeqCst);
        self.with_tensor(tensor, |t| match &t.data {
            HostData::Strings(strings) => Ok(strings.clone()),
            HostData::Bytes(_) => Err(anyhow::anyhow!("tensor {tensor} is not a string tensor")),
        })?
    }

    fn tensor_dims(&self, tensor: NativeHandle) -> Result<Vec<i64>> {
        self.with_tensor(tensor, |t| t.dims.clone())
    }

    fn tensor_type(&self, tensor: NativeHandle) -> Result<i32> {
        self.with_tensor(tensor, |t| t.type_code)
    }

    fn element_count(&self, tensor: NativeHandle) -> Result<u64> {
        let dims = self.with_tensor(tensor, |t| t.dims.clone())?;
        Ok(element_count(&dims)? as u64)
    }

    fn infer(&self, inputs: &[(String, NativeHandle)], model: NativeHandle) -> Result<NamedHandles> {
        let (def, loaded, in_flight) = self.with_model(model, |slot| {
            (Arc::clone(&slot.def), slot.loaded, Arc::clone(&slot.in_flight))
        })?;
        ensure!(loaded, "model '{}' is not loaded", def.name);

        let host_inputs = {
            let slots = self.slots.lock();
            let mut host_inputs = HashMap::with_capacity(inputs.len());
            for (name, handle) in inputs {
                match slots.get(handle) {
                    Some(Slot::Tensor(t)) => {
                        host_inputs.insert(name.clone(), t.clone());
                    }
                    _ => bail!("input '{name}' refers to unknown tensor handle {handle}"),
                }
            }
            host_inputs
        };

        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        if in_flight.swap(true, Ordering::SeqCst) {
            self.reentrancy_violations.fetch_add(1, Ordering::SeqCst);
        }
        let active = self.active_infers.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_infers.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = def.delay {
            std::thread::sleep(delay);
        }
        let result = (def.kernel)(&host_inputs);

        self.active_infers.fetch_sub(1, Ordering::SeqCst);
        in_flight.store(false, Ordering::SeqCst);

        let outputs = result.with_context(|| format!("model '{}' kernel failed", def.name))?;
        Ok(outputs
            .into_iter()
            .map(|(name, tensor)| (name, self.insert(Slot::Tensor(tensor))))
            .collect())
    }

    fn delete(&self, handle: NativeHandle, kind: NativeKind) -> Result<()> {
        ensure!(
            !self.fail_deletes.load(Ordering::SeqCst),
            "delete of {kind} {handle} rejected"
        );

        let hook = self.delete_hook.lock().clone();
        if let Some(hook) = hook {
            hook(handle, kind);
        }

        let mut slots = self.slots.lock();
        match slots.get(&handle) {
            Some(slot) if slot.kind() == kind => {}
            Some(slot) => bail!("handle {handle} is a {}, not a {kind}", slot.kind()),
            None => bail!("double delete or unknown handle {handle}"),
        }
        slots.remove(&handle);
        drop(slots);

        self.delete_log.lock().push((handle, kind));
        trace!(%handle, %kind, "deleted native object");
        Ok(())
    }
}

fn element_count(dims: &[i64]) -> Result<usize> {
    let dims = dims
        .iter()
        .map(|&d| usize::try_from(d).with_context(|| format!("negative dimension in {dims:?}")))
        .collect::<Result<Vec<_>>>()?;
    if dims.contains(&0) {
        return Ok(0);
    }
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .with_context(|| format!("dims {dims:?} overflow the element count"))
}
