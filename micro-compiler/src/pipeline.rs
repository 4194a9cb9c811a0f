//! The per-model compilation pipeline and the batch driver.
//!
//! description -> plan memory -> resolve kernels -> build records -> pack ->
//! assemble blob -> generate sources -> staged write.

use std::path::{Path, PathBuf};

use crate::artifact::{assemble, ArtifactLayout, ArtifactWriter};
use crate::codegen::{self, CodegenInput, GeneratedFile};
use crate::config::ModelConfig;
use crate::context::CompileContext;
use crate::error::{Error, Result};
use crate::kernels::resolve_kernels;
use crate::memory::plan_memory;
use crate::pack::{pack, ExcludePolicy};
use crate::parse::{load_model, LoadedModel};
use crate::records::{build_graph_record, build_net_def, net_def_excludes};

/// Everything a compilation produces, before anything touches the disk.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub blob: Vec<u8>,
    pub layout: ArtifactLayout,
    /// Relative to the model's source directory.
    pub sources: Vec<GeneratedFile>,
    pub kernel_classes: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct CompiledModel {
    pub name: String,
    pub blob_path: PathBuf,
    pub layout: ArtifactLayout,
    /// Every file written, blob first.
    pub files: Vec<PathBuf>,
    pub kernel_classes: Vec<&'static str>,
}

/// Run every stage in memory.
pub fn build(ctx: &CompileContext, model: LoadedModel) -> Result<Artifacts> {
    let LoadedModel { mut graph, weights } = model;
    let config = &ctx.config;
    let options = config.pack_options();

    let plan = plan_memory(&mut graph, config.tensor_alignment)?;
    log::info!(
        "{}: planned {} tensors into {} bytes",
        ctx.model_name,
        plan.assignments.len(),
        plan.total_size
    );

    let resolved = resolve_kernels(&mut graph, config)?;
    log::info!(
        "{}: {} ops on {} kernels, scratch {} bytes",
        ctx.model_name,
        graph.ops.len(),
        resolved.kernels.len(),
        resolved.scratch_buffer_size
    );

    let net_def = pack(&build_net_def(&graph)?, &net_def_excludes(), options)?;
    let graph_bytes = pack(&build_graph_record(&graph)?, &ExcludePolicy::none(), options)?;
    let (blob, layout) = assemble(
        &net_def,
        &graph_bytes,
        &weights,
        plan.total_size,
        resolved.scratch_buffer_size,
    )?;
    log::info!(
        "{}: blob {} bytes (net_def {}, graph {}, weights {})",
        ctx.model_name,
        blob.len(),
        net_def.len(),
        graph_bytes.len(),
        weights.len()
    );

    let sources = codegen::generate(&CodegenInput {
        model_name: &ctx.model_name,
        blob: &blob,
        layout: &layout,
        input_size: graph.inputs.len(),
        kernels: &resolved,
    })?;

    Ok(Artifacts {
        blob,
        layout,
        sources,
        kernel_classes: resolved.class_names(),
    })
}

/// Stage and publish the artifacts of one model. Nothing is left behind on failure.
pub fn write(ctx: &CompileContext, artifacts: &Artifacts) -> Result<Vec<PathBuf>> {
    let mut writer = ArtifactWriter::new();
    writer.stage(ctx.blob_path(), &artifacts.blob)?;
    for file in &artifacts.sources {
        writer.stage(ctx.source_path(&file.path), file.contents.as_bytes())?;
    }
    writer.commit()
}

pub fn compile(ctx: &CompileContext, model: LoadedModel) -> Result<CompiledModel> {
    let artifacts = build(ctx, model)?;
    let files = write(ctx, &artifacts)?;
    log::info!("{}: wrote {} files to {}", ctx.model_name, files.len(), ctx.output_root.display());
    Ok(CompiledModel {
        name: ctx.model_name.clone(),
        blob_path: ctx.blob_path(),
        layout: artifacts.layout,
        files,
        kernel_classes: artifacts.kernel_classes,
    })
}

/// Load a description and compile it under the model name it declares.
pub fn compile_file(description: &Path, output_root: &Path, config: &ModelConfig) -> Result<CompiledModel> {
    let model = load_model(description, config)?;
    let ctx = CompileContext::new(output_root, model.graph.name.clone(), config.clone())?;
    compile(&ctx, model)
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub compiled: Vec<CompiledModel>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Compile each description independently; a failure is recorded and the batch moves on.
pub fn compile_batch(descriptions: &[PathBuf], output_root: &Path, config: &ModelConfig) -> BatchReport {
    let mut report = BatchReport::default();
    for path in descriptions {
        match compile_file(path, output_root, config) {
            Ok(model) => report.compiled.push(model),
            Err(err) => {
                log::warn!("{}: {err}", path.display());
                report.failed.push((path.clone(), err));
            }
        }
    }
    log::info!(
        "batch: {} compiled, {} failed",
        report.compiled.len(),
        report.failed.len()
    );
    report
}
