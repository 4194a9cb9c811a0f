//! Per-model compilation options.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::ir::DType;
use crate::pack::{OffsetWidth, PackOptions};

/// Only quantization scheme the runtime ships kernels for.
pub const QUANTIZE_INT8: &str = "int8";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Element type for tensors that do not declare one.
    #[serde(deserialize_with = "de_dtype")]
    pub data_type: DType,
    /// `"int8"` forces `I8` as the element type.
    pub quantize_schema: Option<String>,
    pub offset_width: OffsetWidth,
    pub write_magic: bool,
    /// Arena alignment in bytes, power of two.
    pub tensor_alignment: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            data_type: DType::F32,
            quantize_schema: None,
            offset_width: OffsetWidth::U32,
            write_magic: false,
            tensor_alignment: 4,
        }
    }
}

impl ModelConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: Self = serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.tensor_alignment.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "tensor_alignment must be a power of two, got {}",
                self.tensor_alignment
            )));
        }
        match self.quantize_schema.as_deref() {
            None | Some(QUANTIZE_INT8) => Ok(()),
            Some(other) => Err(Error::InvalidConfig(format!(
                "unsupported quantize_schema '{other}'"
            ))),
        }
    }

    pub fn is_quantized(&self) -> bool {
        self.quantize_schema.as_deref() == Some(QUANTIZE_INT8)
    }

    /// Element type applied to tensors without an explicit dtype.
    pub fn effective_dtype(&self) -> DType {
        if self.is_quantized() {
            DType::I8
        } else {
            self.data_type
        }
    }

    pub fn pack_options(&self) -> PackOptions {
        PackOptions {
            offset_width: self.offset_width,
            write_magic: self.write_magic,
        }
    }
}

fn de_dtype<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DType, D::Error> {
    let name = String::deserialize(deserializer)?;
    DType::parse(&name)
        .ok_or_else(|| serde::de::Error::custom(format!("unknown data_type '{name}'")))
}
