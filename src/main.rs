//! kmp2gltf - converts KMP asset containers to glTF 2.0
//!
//! Each input file (or every `*.kmp` file in an input directory) becomes
//! `<stem>.glb`, or `<stem>.gltf` plus its buffers, in the output directory.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use pbr::ProgressBar;
use rayon::prelude::*;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, error, info};

use kmp2gltf::gltf::{
    compile_to_multiple_files, write_multiple_files, write_single_binary, CancelFlag,
};
use kmp2gltf::{kmp, ExportConfig, Exporter, OutputFormat, SkeletonVariant};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Glb,
    Gltf,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Glb => OutputFormat::Glb,
            FormatArg::Gltf => OutputFormat::Gltf,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VariantArg {
    /// Bones store the inverse of their parent-relative transform
    InverseRelative,
    /// Bones store direct transforms and the second table holds inverse binds
    DirectWithInverseBind,
}

impl From<VariantArg> for SkeletonVariant {
    fn from(value: VariantArg) -> Self {
        match value {
            VariantArg::InverseRelative => SkeletonVariant::InverseRelative,
            VariantArg::DirectWithInverseBind => SkeletonVariant::DirectWithInverseBind,
        }
    }
}

#[derive(Parser)]
#[command(name = "kmp2gltf")]
#[command(about = "Convert KMP asset containers to glTF 2.0")]
#[command(version)]
struct Cli {
    /// KMP files, or directories containing them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Output format (overrides the config file)
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// JSON export configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory textures are loaded from (default: next to each input)
    #[arg(long)]
    textures: Option<PathBuf>,

    /// Skeleton storage convention (default: inverse-relative)
    #[arg(long, value_enum)]
    skeleton_variant: Option<VariantArg>,

    /// Also export collision meshes
    #[arg(long)]
    collision: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn export_config(&self) -> Result<ExportConfig> {
        let mut config = match &self.config {
            Some(path) => ExportConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => ExportConfig::default(),
        };
        if let Some(format) = self.format {
            config.format = format.into();
        }
        if let Some(variant) = self.skeleton_variant {
            config.skeleton_variant = Some(variant.into());
        }
        if self.collision {
            config.include_collision_meshes = true;
        }
        Ok(config)
    }
}

/// Expands directories into the `*.kmp` files directly inside them.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("listing {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("kmp"))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn convert(
    input: &Path,
    output_dir: &Path,
    texture_dir: Option<&Path>,
    config: &ExportConfig,
    runtime: &Handle,
    cancel: &CancelFlag,
) -> Result<PathBuf> {
    let container =
        kmp::decode_file(input).with_context(|| format!("decoding {}", input.display()))?;
    let texture_root = texture_dir
        .or_else(|| input.parent())
        .unwrap_or_else(|| Path::new("."));
    let document = Exporter::new(&container, config.clone())
        .export(texture_root)
        .with_context(|| format!("exporting {}", input.display()))?;

    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    let output = output_dir.join(format!("{stem}.{}", config.format.extension()));

    match config.format {
        OutputFormat::Glb => {
            let file = File::create(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            write_single_binary(&document, BufWriter::new(file))
                .with_context(|| format!("writing {}", output.display()))?;
        }
        OutputFormat::Gltf => {
            let files = compile_to_multiple_files(&document, &stem)?;
            debug!("{}: {} output files", input.display(), files.len());
            runtime
                .block_on(write_multiple_files(output_dir, files, cancel))
                .with_context(|| format!("writing {}", output.display()))?;
        }
    }
    Ok(output)
}

fn run(cli: Cli) -> Result<usize> {
    let config = cli.export_config()?;
    let inputs = collect_inputs(&cli.inputs)?;
    fs::create_dir_all(&cli.output)
        .with_context(|| format!("creating {}", cli.output.display()))?;

    let runtime = Runtime::new().context("starting tokio runtime")?;
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    info!("converting {} files to {}", inputs.len(), cli.output.display());
    let progress = Mutex::new(ProgressBar::new(inputs.len() as u64));
    let failures = inputs
        .par_iter()
        .filter(|input| {
            let result = if cancel.is_cancelled() {
                Err(anyhow::anyhow!("cancelled before {}", input.display()))
            } else {
                convert(
                    input,
                    &cli.output,
                    cli.textures.as_deref(),
                    &config,
                    runtime.handle(),
                    &cancel,
                )
            };
            progress.lock().inc();
            match result {
                Ok(output) => {
                    debug!("{} -> {}", input.display(), output.display());
                    false
                }
                Err(err) => {
                    error!("{:#}", err);
                    true
                }
            }
        })
        .count();
    progress.into_inner().finish_print("done");

    Ok(failures)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            error!("{} conversions failed", failures);
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
