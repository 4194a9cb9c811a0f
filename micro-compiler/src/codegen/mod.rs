//! Rust sources for a compiled model.
//!
//! Generation is split in two:
//! - `render`: token streams for every `.rs` file
//! - Root module: file set, formatting, build manifest

mod render;

use std::path::PathBuf;

use proc_macro2::{Ident, Span, TokenStream};

use crate::artifact::ArtifactLayout;
use crate::error::{Error, Result};
use crate::kernels::ResolvedKernels;

pub use render::kernel_static_name;

/// Version of the `micro_engine` runtime the generated crate builds against.
pub const RUNTIME_VERSION: &str = "0.1";

/// Already-computed values the generated sources are filled from.
#[derive(Debug, Clone, Copy)]
pub struct CodegenInput<'a> {
    pub model_name: &'a str,
    /// The assembled blob; sections are sliced out with `layout`.
    pub blob: &'a [u8],
    pub layout: &'a ArtifactLayout,
    /// Number of graph inputs.
    pub input_size: usize,
    pub kernels: &'a ResolvedKernels,
}

/// A generated file, relative to the model's source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Rust files in the order they are written; the manifest comes last.
pub const SOURCE_FILES: [&str; 8] = [
    "net_def_data.rs",
    "graph_data.rs",
    "model_data.rs",
    "engine_config.rs",
    "ops_list.rs",
    "engine_factory.rs",
    "c_interface.rs",
    "lib.rs",
];

pub fn factory_name(model_name: &str) -> String {
    format!("create_{model_name}_engine")
}

pub fn init_symbol(model_name: &str) -> String {
    format!("{model_name}_engine_init")
}

pub fn generate(input: &CodegenInput) -> Result<Vec<GeneratedFile>> {
    let blob = input.blob;
    let layout = input.layout;
    if blob.len() != layout.weights_end {
        return Err(Error::Codegen(format!(
            "blob is {} bytes but the layout ends at {}",
            blob.len(),
            layout.weights_end
        )));
    }

    let factory = Ident::new(&factory_name(input.model_name), Span::call_site());
    let init = Ident::new(&init_symbol(input.model_name), Span::call_site());

    let token_files: [(&str, TokenStream); 8] = [
        (
            SOURCE_FILES[0],
            render::render_section(" Packed net definition.", "NET_DEF_DATA", &blob[layout.net_def()]),
        ),
        (
            SOURCE_FILES[1],
            render::render_section(" Packed runtime graph.", "GRAPH_DATA", &blob[layout.graph()]),
        ),
        (
            SOURCE_FILES[2],
            render::render_section(" Model weights.", "MODEL_DATA", &blob[layout.weights()]),
        ),
        (SOURCE_FILES[3], render::render_engine_config(input)),
        (
            SOURCE_FILES[4],
            render::render_ops_list(&input.kernels.sources, &input.kernels.kernels)?,
        ),
        (SOURCE_FILES[5], render::render_engine_factory(&factory)),
        (SOURCE_FILES[6], render::render_c_interface(&factory, &init)),
        (SOURCE_FILES[7], render::render_lib(input.model_name)),
    ];

    let mut files = Vec::with_capacity(token_files.len() + 1);
    for (name, tokens) in token_files {
        files.push(GeneratedFile {
            path: PathBuf::from(name),
            contents: format_file(name, tokens)?,
        });
    }
    files.push(GeneratedFile {
        path: PathBuf::from("Cargo.toml"),
        contents: manifest(input.model_name),
    });

    log::debug!(
        "generated {} files for '{}' ({} kernels)",
        files.len(),
        input.model_name,
        input.kernels.kernels.len()
    );
    Ok(files)
}

fn format_file(name: &str, tokens: TokenStream) -> Result<String> {
    let file = syn::parse2::<syn::File>(tokens)
        .map_err(|e| Error::Codegen(format!("{name}: generated code does not parse: {e}")))?;
    Ok(prettyplease::unparse(&file))
}

/// Build manifest of the generated crate. `include` lists every generated source.
fn manifest(model_name: &str) -> String {
    let include = SOURCE_FILES
        .iter()
        .map(|f| format!("    \"{f}\","))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "# Generated by micro-compiler.\n\
         [package]\n\
         name = \"{model_name}\"\n\
         version = \"0.1.0\"\n\
         edition = \"2021\"\n\
         include = [\n{include}\n]\n\
         \n\
         [lib]\n\
         path = \"lib.rs\"\n\
         \n\
         [dependencies]\n\
         micro_engine = \"{RUNTIME_VERSION}\"\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::assemble;
    use crate::kernels::KernelRef;

    fn kernels() -> ResolvedKernels {
        ResolvedKernels {
            kernels: vec![
                KernelRef {
                    class_name: "Conv2dRefOp",
                    source: "ops/nhwc/conv_2d_ref.rs",
                },
                KernelRef {
                    class_name: "SoftmaxOp",
                    source: "ops/softmax.rs",
                },
            ],
            sources: vec!["ops/nhwc/conv_2d_ref.rs", "ops/softmax.rs"],
            scratch_buffer_size: 96,
        }
    }

    fn file<'a>(files: &'a [GeneratedFile], name: &str) -> &'a str {
        files
            .iter()
            .find(|f| f.path == PathBuf::from(name))
            .map(|f| f.contents.as_str())
            .unwrap_or_else(|| panic!("{name} not generated"))
    }

    /// Value of the byte-string literal initializing `symbol`.
    fn embedded_bytes(source: &str, symbol: &str) -> Vec<u8> {
        let file: syn::File = syn::parse_str(source).unwrap();
        for item in file.items {
            if let syn::Item::Static(s) = item {
                if s.ident != symbol {
                    continue;
                }
                let syn::Expr::Call(call) = *s.expr else { panic!("{symbol}: not a call") };
                let Some(syn::Expr::Unary(deref)) = call.args.first() else {
                    panic!("{symbol}: not a deref")
                };
                let syn::Expr::Lit(syn::ExprLit { lit: syn::Lit::ByteStr(lit), .. }) = &*deref.expr
                else {
                    panic!("{symbol}: not a byte string")
                };
                return lit.value();
            }
        }
        panic!("{symbol} not found");
    }

    #[test]
    fn sections_are_embedded_byte_exactly() {
        let net_def: Vec<u8> = (0..=255).collect();
        let graph = b"\0\"\\\n\x7f graph".to_vec();
        let weights = vec![0xAB; 33];
        let (blob, layout) = assemble(&net_def, &graph, &weights, 152, 96).unwrap();
        let kernels = kernels();
        let input = CodegenInput {
            model_name: "mnist",
            blob: &blob,
            layout: &layout,
            input_size: 1,
            kernels: &kernels,
        };

        let files = generate(&input).unwrap();
        assert_eq!(files.len(), 9);
        assert_eq!(embedded_bytes(file(&files, "net_def_data.rs"), "NET_DEF_DATA"), net_def);
        assert_eq!(embedded_bytes(file(&files, "graph_data.rs"), "GRAPH_DATA"), graph);
        assert_eq!(embedded_bytes(file(&files, "model_data.rs"), "MODEL_DATA"), weights);
        assert!(file(&files, "graph_data.rs").contains(&format!("GRAPH_DATA_SIZE: usize = {}", graph.len())));
    }

    #[test]
    fn config_and_glue_carry_the_computed_values() {
        let (blob, layout) = assemble(&[1; 4], &[2; 4], &[], 152, 96).unwrap();
        let kernels = kernels();
        let files = generate(&CodegenInput {
            model_name: "kws",
            blob: &blob,
            layout: &layout,
            input_size: 2,
            kernels: &kernels,
        })
        .unwrap();

        let config = file(&files, "engine_config.rs");
        assert!(config.contains("pub const TENSOR_MEM_SIZE: usize = 152;"));
        assert!(config.contains("pub const INPUT_SIZE: usize = 2;"));
        assert!(config.contains("pub const SCRATCH_BUFFER_SIZE: usize = 96;"));

        let ops = file(&files, "ops_list.rs");
        assert!(ops.contains("static CONV2D_REF_OP: micro_engine::ops::Conv2dRefOp"));
        assert!(ops.contains("[&CONV2D_REF_OP, &SOFTMAX_OP]"));
        assert!(ops.contains("\"ops/softmax.rs\""));

        assert!(file(&files, "engine_factory.rs").contains("pub fn create_kws_engine()"));
        assert!(file(&files, "c_interface.rs").contains("extern \"C\" fn kws_engine_init("));

        let manifest = file(&files, "Cargo.toml");
        assert!(manifest.contains("name = \"kws\""));
        for source in SOURCE_FILES {
            assert!(manifest.contains(&format!("\"{source}\"")), "{source} missing from include");
        }
    }

    #[test]
    fn mismatched_layout_is_a_codegen_error() {
        let (blob, layout) = assemble(&[1; 4], &[], &[], 0, 0).unwrap();
        let kernels = kernels();
        let input = CodegenInput {
            model_name: "m",
            blob: &blob[..blob.len() - 1],
            layout: &layout,
            input_size: 0,
            kernels: &kernels,
        };
        assert!(matches!(generate(&input), Err(Error::Codegen(_))));
    }
}
