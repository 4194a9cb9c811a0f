//! Command-line driver.
//!
//! Usage:
//!   micro-compiler compile mnist.json kws.json -o out/ --config int8.json
//!   micro-compiler inspect out/mnist.bin

use std::fs;
use std::path::PathBuf;
use std::process;

use micro_compiler::artifact::BlobHeader;
use micro_compiler::pack::OffsetWidth;
use micro_compiler::{compile_batch, ModelConfig};

const COMPILE_USAGE: &str =
    "Usage: micro-compiler compile <model.json>... [-o <dir>] [--config <file>] [--offset16] [--write-magic]";

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(|s| s.as_str()) {
        Some("compile") => cmd_compile(&args[1..]),
        Some("inspect") => cmd_inspect(&args[1..]),
        Some("--help") | Some("-h") | None => print_usage(),
        Some(other) => {
            eprintln!("error: unknown subcommand '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("micro-compiler - model compiler for the micro_engine runtime");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  micro-compiler compile <model.json>... [-o <dir>] [--config <file>]");
    eprintln!("  micro-compiler inspect <model.bin>");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  compile   Compile model descriptions into blobs + Rust sources");
    eprintln!("  inspect   Print the section layout of a compiled blob");
}

// ---------------------------------------------------------------------------
// compile
// ---------------------------------------------------------------------------

fn cmd_compile(args: &[String]) {
    let mut models: Vec<PathBuf> = Vec::new();
    let mut out_dir: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut offset16 = false;
    let mut write_magic = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--out" | "-o" => {
                i += 1;
                out_dir = Some(PathBuf::from(required(args.get(i))));
            }
            "--config" | "-c" => {
                i += 1;
                config_path = Some(PathBuf::from(required(args.get(i))));
            }
            "--offset16" => offset16 = true,
            "--write-magic" => write_magic = true,
            "--help" | "-h" => {
                eprintln!("{COMPILE_USAGE}");
                eprintln!();
                eprintln!("Compile model descriptions into <dir>/<model>.bin and <dir>/<model>/.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  -o, --out <DIR>        Output directory (default: current directory)");
                eprintln!("  -c, --config <FILE>    JSON model configuration");
                eprintln!("      --offset16         Pack records with 16-bit offsets");
                eprintln!("      --write-magic      Prefix packed records with the format magic");
                process::exit(0);
            }
            flag if flag.starts_with('-') => {
                eprintln!("Unexpected argument: {flag}");
                eprintln!("{COMPILE_USAGE}");
                process::exit(1);
            }
            model => models.push(PathBuf::from(model)),
        }
        i += 1;
    }

    if models.is_empty() {
        eprintln!("{COMPILE_USAGE}");
        process::exit(1);
    }

    let mut config = match &config_path {
        Some(path) => ModelConfig::load(path).unwrap_or_else(|err| {
            eprintln!("error: {err}");
            process::exit(1);
        }),
        None => ModelConfig::default(),
    };
    if offset16 {
        config.offset_width = OffsetWidth::U16;
    }
    config.write_magic |= write_magic;

    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("."));
    let report = compile_batch(&models, &out_dir, &config);

    for model in &report.compiled {
        eprintln!(
            "Compiled {}: {} ({} bytes, tensor memory {}, scratch {})",
            model.name,
            model.blob_path.display(),
            model.layout.weights_end,
            model.layout.tensor_mem_size,
            model.layout.scratch_buffer_size
        );
    }
    for (path, err) in &report.failed {
        eprintln!("error: {}: {err}", path.display());
    }
    if !report.is_success() {
        process::exit(1);
    }
}

fn required(value: Option<&String>) -> &str {
    value.map(|s| s.as_str()).unwrap_or_else(|| {
        eprintln!("{COMPILE_USAGE}");
        process::exit(1);
    })
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

fn cmd_inspect(args: &[String]) {
    let [path] = args else {
        eprintln!("Usage: micro-compiler inspect <model.bin>");
        process::exit(1);
    };

    let blob = fs::read(path).unwrap_or_else(|err| {
        eprintln!("error: failed to read {path}: {err}");
        process::exit(1);
    });
    let header = BlobHeader::parse(&blob).unwrap_or_else(|err| {
        eprintln!("error: {err}");
        process::exit(1);
    });

    let layout = header.layout;
    println!("{path}: {} bytes", blob.len());
    println!("  net_def   {:>10} .. {:<10} ({} bytes)", layout.net_def_offset, layout.graph_offset, layout.net_def().len());
    println!("  graph     {:>10} .. {:<10} ({} bytes)", layout.graph_offset, layout.weights_offset, layout.graph().len());
    println!("  weights   {:>10} .. {:<10} ({} bytes)", layout.weights_offset, layout.weights_end, layout.weights().len());
    println!("  tensor memory  {} bytes", layout.tensor_mem_size);
    println!("  scratch buffer {} bytes", layout.scratch_buffer_size);
}
