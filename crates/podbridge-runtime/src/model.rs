use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use podbridge_core::{
    BindingError, Dimension, NativeHandle, NativeKind, NativeResultExt, Result, RuntimeOptions,
    TensorSpec,
};
use tracing::{debug, info};

use crate::{Allocator, NativeObject, Runtime, Tensor};

/// Named tensors going into or coming out of an inference call.
pub type TensorMap = BTreeMap<String, Tensor>;

/// Input and output slots declared by a loaded model.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelSignature {
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

/// A model loaded (or about to be loaded) by the engine.
///
/// Inference calls on one `Model` are serialized: the engine keeps a
/// single execution context per model. Distinct models run independently.
pub struct Model {
    object: NativeObject,
    path: PathBuf,
    options: RuntimeOptions,
    loaded: AtomicBool,
    signature: OnceCell<ModelSignature>,
    exec: Mutex<()>,
}

impl Model {
    pub fn open(runtime: &Runtime, path: impl AsRef<Path>, options: RuntimeOptions) -> Result<Self> {
        let path = path.as_ref();
        let engine = runtime.engine();

        // The options object only lives for the duration of construction.
        let native_options = NativeObject::bound(
            runtime,
            NativeKind::Options,
            engine.new_options(&options).native_context("new_options")?,
        )?;
        let handle = engine
            .new_model(path, Some(native_options.handle()?))
            .map_err(|e| BindingError::load(format!("model {}", path.display()), e))?;
        native_options.release();

        let model = Self {
            object: NativeObject::bound(runtime, NativeKind::Model, handle)?,
            path: path.to_path_buf(),
            loaded: AtomicBool::new(options.load_model_at_construction),
            options,
            signature: OnceCell::new(),
            exec: Mutex::new(()),
        };

        if model.is_loaded() {
            model.signature()?;
        }
        info!(
            path = %model.path.display(),
            loaded = model.is_loaded(),
            device = %model.options.visible_device,
            "opened model"
        );
        Ok(model)
    }

    pub fn open_default(runtime: &Runtime, path: impl AsRef<Path>) -> Result<Self> {
        Self::open(runtime, path, RuntimeOptions::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn handle(&self) -> Result<NativeHandle> {
        self.object.handle()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Load a model opened with `load_model_at_construction = false`.
    /// A no-op once loaded.
    pub fn load(&self) -> Result<()> {
        let _exec = self.exec.lock();
        let handle = self.object.handle()?;
        if self.is_loaded() {
            return Ok(());
        }

        self.object
            .runtime()
            .engine()
            .load_model(handle)
            .map_err(|e| BindingError::load(format!("model {}", self.path.display()), e))?;
        self.loaded.store(true, Ordering::Release);
        info!(path = %self.path.display(), "loaded model");

        self.signature()?;
        Ok(())
    }

    pub fn name(&self) -> Result<String> {
        let handle = self.object.handle()?;
        self.object
            .runtime()
            .engine()
            .model_name(handle)
            .native_context("get_name")
    }

    pub fn platform(&self) -> Result<String> {
        let handle = self.object.handle()?;
        self.object
            .runtime()
            .engine()
            .model_platform(handle)
            .native_context("get_platform")
    }

    pub fn input_specs(&self) -> Result<Vec<TensorSpec>> {
        Ok(self.signature()?.inputs.clone())
    }

    pub fn output_specs(&self) -> Result<Vec<TensorSpec>> {
        Ok(self.signature()?.outputs.clone())
    }

    /// Allocator scoped to this model's memory backend.
    pub fn allocator(&self) -> Result<Allocator> {
        let handle = self.loaded_handle()?;
        Allocator::for_model(self.object.runtime(), handle, self.name()?)
    }

    /// Run the model.
    ///
    /// Every declared input must be present. Unless shape and type
    /// checking is disabled, input types must match their specs and
    /// concrete spec dimensions must match the tensor's. The caller owns
    /// every returned tensor.
    pub fn infer(&self, inputs: &TensorMap) -> Result<TensorMap> {
        self.loaded_handle()?;
        let signature = self.signature()?;
        self.validate(&signature.inputs, inputs)?;

        let native_inputs = inputs
            .iter()
            .map(|(name, tensor)| Ok((name.clone(), tensor.handle()?)))
            .collect::<Result<Vec<_>>>()?;

        let runtime = self.object.runtime();
        let raw_outputs = {
            let _exec = self.exec.lock();
            // release() takes the same lock, so the handle stays valid here
            let handle = self.object.handle()?;
            debug!(model = %handle, inputs = native_inputs.len(), "running inference");
            runtime
                .engine()
                .infer(&native_inputs, handle)
                .native_context("infer")?
        };

        // Take ownership of every returned handle before touching any of
        // them, so a failure part way through still releases the rest.
        let mut bound = Vec::with_capacity(raw_outputs.len());
        let mut failure = None;
        for (name, handle) in raw_outputs {
            let object = NativeObject::unbound(runtime, NativeKind::Tensor);
            match object.bind(handle) {
                Ok(()) => bound.push((name, object)),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let mut outputs = TensorMap::new();
        for (name, object) in bound {
            outputs.insert(name, Tensor::from_object(object)?);
        }
        Ok(outputs)
    }

    /// Idempotent; waits for an in-flight `infer` to finish first.
    pub fn release(&self) {
        let _exec = self.exec.lock();
        self.object.release();
    }

    fn loaded_handle(&self) -> Result<NativeHandle> {
        let handle = self.object.handle()?;
        if !self.is_loaded() {
            return Err(BindingError::ModelNotLoaded);
        }
        Ok(handle)
    }

    fn signature(&self) -> Result<&ModelSignature> {
        let handle = self.loaded_handle()?;
        self.signature.get_or_try_init(|| {
            let engine = self.object.runtime().engine();
            let inputs = engine
                .input_specs(handle)
                .native_context("get_input_specs")?
                .iter()
                .map(TensorSpec::from_native)
                .collect::<Result<Vec<_>>>()?;
            let outputs = engine
                .output_specs(handle)
                .native_context("get_output_specs")?
                .iter()
                .map(TensorSpec::from_native)
                .collect::<Result<Vec<_>>>()?;
            Ok(ModelSignature { inputs, outputs })
        })
    }

    fn validate(&self, specs: &[TensorSpec], inputs: &TensorMap) -> Result<()> {
        for spec in specs {
            if !inputs.contains_key(&spec.name) {
                return Err(BindingError::MissingInput(spec.name.clone()));
            }
        }

        if self.options.disable_shape_and_type_checking {
            return Ok(());
        }

        for name in inputs.keys() {
            if !specs.iter().any(|spec| &spec.name == name) {
                return Err(BindingError::UnexpectedInput(name.clone()));
            }
        }

        let mut symbols: HashMap<&str, (usize, &str)> = HashMap::new();
        for spec in specs {
            let Some(tensor) = inputs.get(&spec.name) else {
                continue;
            };

            let actual = tensor.tensor_type()?;
            if actual != spec.tensor_type {
                return Err(BindingError::InputTypeMismatch {
                    name: spec.name.clone(),
                    expected: spec.tensor_type,
                    actual,
                });
            }

            let shape = tensor.shape()?;
            if shape.rank() != spec.rank() {
                return Err(BindingError::ShapeMismatch {
                    name: spec.name.clone(),
                    reason: format!(
                        "tensor has rank {}, spec {spec} declares rank {}",
                        shape.rank(),
                        spec.rank()
                    ),
                });
            }

            for (axis, (dim, &size)) in spec.dims.iter().zip(shape.dims()).enumerate() {
                match dim {
                    Dimension::Fixed(expected) if *expected != size => {
                        return Err(BindingError::ShapeMismatch {
                            name: spec.name.clone(),
                            reason: format!(
                                "dimension {axis} is {size}, spec {spec} requires {expected}"
                            ),
                        });
                    }
                    Dimension::Symbol(symbol) => match symbols.get(symbol.as_str()) {
                        Some(&(bound, first)) if bound != size => {
                            return Err(BindingError::ShapeMismatch {
                                name: spec.name.clone(),
                                reason: format!(
                                    "dimension {axis} is {size}, but '{symbol}' is {bound} in input '{first}'"
                                ),
                            });
                        }
                        Some(_) => {}
                        None => {
                            symbols.insert(symbol.as_str(), (size, spec.name.as_str()));
                        }
                    },
                    Dimension::Fixed(_) | Dimension::Any => {}
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("path", &self.path)
            .field("object", &self.object)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
