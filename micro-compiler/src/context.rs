use std::path::{Path, PathBuf};

use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Everything a compilation run needs besides the graph itself.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub output_root: PathBuf,
    pub model_name: String,
    pub config: ModelConfig,
}

impl CompileContext {
    /// Model names become Rust identifiers and file names, so they must be
    /// `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn new(
        output_root: impl Into<PathBuf>,
        model_name: impl Into<String>,
        config: ModelConfig,
    ) -> Result<Self> {
        let model_name = model_name.into();
        if !is_identifier(&model_name) {
            return Err(Error::InvalidConfig(format!(
                "model name '{model_name}' is not a valid identifier"
            )));
        }
        config.validate()?;
        Ok(Self {
            output_root: output_root.into(),
            model_name,
            config,
        })
    }

    /// `<output_root>/<model>.bin`
    pub fn blob_path(&self) -> PathBuf {
        self.output_root.join(format!("{}.bin", self.model_name))
    }

    /// `<output_root>/<model>/`, home of the generated sources.
    pub fn model_dir(&self) -> PathBuf {
        self.output_root.join(&self.model_name)
    }

    pub fn source_path(&self, file: impl AsRef<Path>) -> PathBuf {
        self.model_dir().join(file)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name != "_"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_the_model_name() {
        let ctx = CompileContext::new("/out", "mnist", ModelConfig::default()).unwrap();
        assert_eq!(ctx.blob_path(), PathBuf::from("/out/mnist.bin"));
        assert_eq!(ctx.source_path("lib.rs"), PathBuf::from("/out/mnist/lib.rs"));
    }

    #[test]
    fn model_names_must_be_identifiers() {
        for ok in ["mnist", "_m", "kws_v2"] {
            assert!(CompileContext::new("/out", ok, ModelConfig::default()).is_ok(), "{ok}");
        }
        for bad in ["", "2fast", "my-model", "a b", "_", "../evil"] {
            assert!(
                matches!(
                    CompileContext::new("/out", bad, ModelConfig::default()),
                    Err(Error::InvalidConfig(_))
                ),
                "{bad}"
            );
        }
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = ModelConfig {
            tensor_alignment: 3,
            ..ModelConfig::default()
        };
        assert!(CompileContext::new("/out", "m", config).is_err());
    }
}
