//! bslc — BSL shading-language transpiler driver.
//!
//! Reads one shader source, harvests symbol tables from its include
//! dependencies, runs the lowering pipeline, and writes three outputs:
//! the transformed source, the metadata registration text (plus a JSON
//! sidecar), and the create-info declarations.
//!
//! Exit status is nonzero iff any diagnostic was reported.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, warn};

use bslc_base::{Diagnostic, Reporter};
use bslc_compile::{Language, SourceProcessor};

#[derive(Parser)]
#[command(name = "bslc", version, about = "BSL shading-language source transpiler")]
struct Args {
    /// Shader source file (.bsl, .hh, .msl, .glsl).
    input: PathBuf,
    /// Output path for the transformed shader source.
    output: PathBuf,
    /// Output path for the metadata registration source.
    metadata_out: PathBuf,
    /// Output path for the create-info declarations.
    infos_out: PathBuf,
    /// Directories searched for include dependencies.
    include_dirs: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(errors) => {
            eprintln!("bslc: {errors} error(s)");
            ExitCode::FAILURE
        }
        Err(error) => {
            eprintln!("bslc: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> std::io::Result<usize> {
    let input_name = args.input.to_string_lossy().to_string();
    let source = fs::read_to_string(&args.input)?;

    let language = Language::from_filename(&input_name);

    let diagnostic_path = input_name.clone();
    let reporter = Reporter::new(Box::new(move |d: &Diagnostic| {
        eprintln!("{diagnostic_path}:{d}");
        if !d.line_text.is_empty() {
            eprintln!("  {}", d.line_text);
        }
    }));

    // Harvest the namespace symbols of every resolvable dependency so
    // unqualified references to them resolve during namespace lowering.
    let scan_reporter = Reporter::sink();
    let scan = SourceProcessor::new(&source, &input_name, language, &scan_reporter)
        .parse_include_and_symbols();
    let mut symbols = Vec::new();
    for dependency in &scan.dependencies {
        let Some(path) = resolve_include(dependency, &args.include_dirs) else {
            warn!("dependency {dependency:?} not found in include directories");
            continue;
        };
        debug!("harvesting symbols from {}", path.display());
        let text = fs::read_to_string(&path)?;
        let dep_name = path.to_string_lossy().to_string();
        let dep_language = Language::from_filename(&dep_name);
        let dep_scan = SourceProcessor::new(&text, &dep_name, dep_language, &scan_reporter)
            .parse_include_and_symbols();
        symbols.extend(dep_scan.symbol_table);
    }

    let processor = SourceProcessor::new(&source, &input_name, language, &reporter);
    let result = processor.convert(symbols);

    fs::write(&args.output, &result.source)?;

    let register_fn = format!("{}_metadata_register", sanitize_identifier(&input_name));
    fs::write(&args.metadata_out, result.metadata.serialize(&register_fn))?;
    let json = serde_json::to_string_pretty(&result.metadata)
        .expect("metadata record serializes to JSON");
    fs::write(args.metadata_out.with_extension("json"), json)?;

    fs::write(&args.infos_out, result.metadata.serialize_infos())?;

    Ok(reporter.error_count())
}

fn resolve_include(dependency: &str, include_dirs: &[PathBuf]) -> Option<PathBuf> {
    for dir in include_dirs {
        let candidate = dir.join(dependency);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Turns a file path into a C identifier for the registration function.
fn sanitize_identifier(path: &str) -> String {
    let stem = Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
