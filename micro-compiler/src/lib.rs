//! Model compiler: turns a neural-network description into a packed blob and
//! Rust sources targeting the `micro_engine` embedded runtime.

pub mod artifact;
pub mod codegen;
pub mod config;
pub mod context;
pub mod error;
pub mod ir;
pub mod kernels;
pub mod memory;
pub mod pack;
pub mod package;
pub mod parse;
pub mod pipeline;
pub mod records;

pub use config::ModelConfig;
pub use context::CompileContext;
pub use error::{Error, Result};
pub use pipeline::{compile, compile_batch, compile_file, BatchReport, CompiledModel};
