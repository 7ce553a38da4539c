use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{BindingError, Result};

/// Device the engine should run a model on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Gpu(u32),
}

impl Device {
    pub const CPU_CODE: i32 = -1;

    /// Native code: -1 for CPU, the GPU index otherwise.
    pub fn code(self) -> i32 {
        match self {
            Device::Cpu => Self::CPU_CODE,
            Device::Gpu(index) => index as i32,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::CPU_CODE => Some(Device::Cpu),
            c if c >= 0 => Some(Device::Gpu(c as u32)),
            _ => None,
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::Gpu(0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Gpu(index) => write!(f, "gpu:{index}"),
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        if raw.eq_ignore_ascii_case("cpu") {
            return Ok(Device::Cpu);
        }

        let rest = raw
            .strip_prefix("gpu:")
            .or_else(|| raw.strip_prefix("cuda:"));
        if let Some(rest) = rest {
            let index: u32 = rest
                .parse()
                .map_err(|e| format!("invalid gpu index '{rest}': {e}"))?;
            return Ok(Device::Gpu(index));
        }

        Err(format!("unsupported device: {raw} (expected cpu or gpu:N)"))
    }
}

/// Options handed to the engine when a model is constructed.
///
/// This is a plain value; it only becomes a native object for the
/// duration of the model construction call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    pub free_memory_every_cycle: bool,
    pub control_queue_name: String,
    pub visible_device: Device,
    pub load_model_at_construction: bool,
    pub disable_shape_and_type_checking: bool,
    /// Run the model out of process; forwarded to the engine untouched.
    pub use_ope: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            free_memory_every_cycle: true,
            control_queue_name: String::new(),
            visible_device: Device::default(),
            load_model_at_construction: true,
            disable_shape_and_type_checking: false,
            use_ope: false,
        }
    }
}

impl RuntimeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| BindingError::Load {
            what: "runtime options".to_string(),
            message: e.to_string(),
        })
    }

    pub fn with_free_memory_every_cycle(mut self, value: bool) -> Self {
        self.free_memory_every_cycle = value;
        self
    }

    pub fn with_control_queue_name(mut self, name: impl Into<String>) -> Self {
        self.control_queue_name = name.into();
        self
    }

    pub fn with_visible_device(mut self, device: Device) -> Self {
        self.visible_device = device;
        self
    }

    pub fn with_load_model_at_construction(mut self, value: bool) -> Self {
        self.load_model_at_construction = value;
        self
    }

    pub fn with_disable_shape_and_type_checking(mut self, value: bool) -> Self {
        self.disable_shape_and_type_checking = value;
        self
    }

    pub fn with_use_ope(mut self, value: bool) -> Self {
        self.use_ope = value;
        self
    }
}
