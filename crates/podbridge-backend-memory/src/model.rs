use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure, Result};
use bytes::Bytes;
use podbridge_core::{NativeDimension, NativeTensorSpec, TensorType};

/// Contents of a tensor held by the engine.
#[derive(Clone, Debug)]
pub enum HostData {
    Bytes(Bytes),
    Strings(Vec<String>),
}

#[derive(Clone, Debug)]
pub struct HostTensor {
    pub dims: Vec<i64>,
    pub type_code: i32,
    pub data: HostData,
}

impl HostTensor {
    pub fn f32(dims: Vec<i64>, values: &[f32]) -> Self {
        Self {
            dims,
            type_code: TensorType::Float32.code(),
            data: HostData::Bytes(Bytes::from(f32_to_bytes(values))),
        }
    }

    pub fn strings(dims: Vec<i64>, values: Vec<String>) -> Self {
        Self {
            dims,
            type_code: TensorType::String.code(),
            data: HostData::Strings(values),
        }
    }

    pub fn to_f32(&self) -> Result<Vec<f32>> {
        ensure!(
            self.type_code == TensorType::Float32.code(),
            "expected a float32 tensor, got type code {}",
            self.type_code
        );
        match &self.data {
            HostData::Bytes(bytes) => Ok(bytes_to_f32(bytes)),
            HostData::Strings(_) => bail!("float32 tensor holds strings"),
        }
    }
}

/// Computes a model's outputs from its named inputs.
pub type Kernel =
    Arc<dyn Fn(&HashMap<String, HostTensor>) -> Result<Vec<(String, HostTensor)>> + Send + Sync>;

/// A model the memory engine can serve.
#[derive(Clone)]
pub struct MemoryModel {
    pub name: String,
    pub platform: String,
    pub inputs: Vec<NativeTensorSpec>,
    pub outputs: Vec<NativeTensorSpec>,
    pub kernel: Kernel,
    /// Simulated kernel latency, for overlap tests.
    pub delay: Option<Duration>,
}

impl MemoryModel {
    pub fn new(
        name: impl Into<String>,
        kernel: impl Fn(&HashMap<String, HostTensor>) -> Result<Vec<(String, HostTensor)>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            platform: "memory".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            kernel: Arc::new(kernel),
            delay: None,
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_input(mut self, name: &str, tensor_type: TensorType, dims: Vec<NativeDimension>) -> Self {
        self.inputs.push(spec(name, tensor_type, dims));
        self
    }

    pub fn with_output(mut self, name: &str, tensor_type: TensorType, dims: Vec<NativeDimension>) -> Self {
        self.outputs.push(spec(name, tensor_type, dims));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `out = x + y` over two float32 matrices of any matching shape.
    pub fn addition() -> Self {
        let any2 = || vec![NativeDimension::any(), NativeDimension::any()];
        Self::new("addition_model", |inputs| {
            let x = input(inputs, "x")?;
            let y = input(inputs, "y")?;
            ensure!(
                x.dims == y.dims,
                "x has dims {:?} but y has {:?}",
                x.dims,
                y.dims
            );
            let sum: Vec<f32> = x
                .to_f32()?
                .iter()
                .zip(y.to_f32()?)
                .map(|(a, b)| a + b)
                .collect();
            Ok(vec![("out".to_string(), HostTensor::f32(x.dims.clone(), &sum))])
        })
        .with_input("x", TensorType::Float32, any2())
        .with_input("y", TensorType::Float32, any2())
        .with_output("out", TensorType::Float32, any2())
    }

    /// Returns each string input reversed, under the same name with an
    /// `_reversed` suffix.
    pub fn string_reverse() -> Self {
        Self::new("string_reverse", |inputs| {
            let text = input(inputs, "text")?;
            let HostData::Strings(values) = &text.data else {
                bail!("input 'text' is not a string tensor");
            };
            let reversed = values.iter().map(|s| s.chars().rev().collect()).collect();
            Ok(vec![(
                "text_reversed".to_string(),
                HostTensor::strings(text.dims.clone(), reversed),
            )])
        })
        .with_input("text", TensorType::String, vec![NativeDimension::any()])
        .with_output("text_reversed", TensorType::String, vec![NativeDimension::any()])
    }
}

impl std::fmt::Debug for MemoryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryModel")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("delay", &self.delay)
            .finish()
    }
}

pub fn input<'a>(inputs: &'a HashMap<String, HostTensor>, name: &str) -> Result<&'a HostTensor> {
    match inputs.get(name) {
        Some(tensor) => Ok(tensor),
        None => bail!("missing input '{name}'"),
    }
}

fn spec(name: &str, tensor_type: TensorType, dims: Vec<NativeDimension>) -> NativeTensorSpec {
    NativeTensorSpec {
        name: name.to_string(),
        type_code: tensor_type.code(),
        dims,
    }
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn f32_to_bytes(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_ne_bytes());
    }
    out
}
