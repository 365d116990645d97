// raw_nodes - command line front end for the RAW loader nodes
// Lists node schemas, executes nodes and saves their outputs as PNG

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use raw_nodes::tensor::{self, ImageTensor};
use raw_nodes::thumbnail::ThumbnailTag;
use raw_nodes::{ExifTool, FileResolver, InputDirectory, LibRaw, NodeRegistry};

#[derive(Parser)]
#[command(name = "raw_nodes", version, about = "RAW image loader nodes (LibRaw + ExifTool)")]
struct Args {
    /// Directory RAW file references are resolved against
    #[arg(long, default_value = ".")]
    input_dir: PathBuf,

    /// Directory outputs are written to
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print node schemas as JSON
    Nodes,

    /// Execute a node and save image, preview and thumbnail
    Run {
        /// "Load Raw Image" or "Load Raw Image Advanced"
        node: String,

        /// Inputs as a JSON object, or @path to a JSON file
        #[arg(long)]
        inputs: String,
    },

    /// Print the change fingerprint for a node's inputs
    Fingerprint {
        node: String,

        #[arg(long)]
        inputs: String,
    },

    /// Dump every embedded JPEG of a RAW file via exiftool
    Thumbnails { file: String },

    /// Report LibRaw and exiftool versions
    Probe,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args = Args::parse();
    let files = InputDirectory::new(&args.input_dir).with_output(&args.output_dir);

    match args.command {
        Command::Nodes => {
            let registry = NodeRegistry::new(files);
            println!("{}", serde_json::to_string_pretty(&registry.schemas())?);
        }
        Command::Run { node, inputs } => {
            let registry = NodeRegistry::new(files);
            let inputs = parse_inputs(&inputs)?;
            let output = registry
                .execute(&node, &inputs)
                .with_context(|| format!("{} failed", node))?;

            std::fs::create_dir_all(&args.output_dir)
                .context("Failed to create output directory")?;
            let stem = file_stem(&inputs);

            let image_path = args.output_dir.join(format!("{}.png", stem));
            tensor::tensor_to_rgb16(&output.image)
                .save(&image_path)
                .with_context(|| format!("Failed to write {}", image_path.display()))?;
            info!("✓ Image: {}", image_path.display());

            save_auxiliary(&output.preview, &args.output_dir.join(format!("{}_preview.png", stem)))?;
            save_auxiliary(&output.thumbnail, &args.output_dir.join(format!("{}_thumbnail.png", stem)))?;
        }
        Command::Fingerprint { node, inputs } => {
            let registry = NodeRegistry::new(files);
            println!("{}", registry.fingerprint(&node, &parse_inputs(&inputs)?)?);
        }
        Command::Thumbnails { file } => {
            let exiftool = ExifTool::from_env();
            if !exiftool.available() {
                bail!("{} is not available", exiftool.program().display());
            }

            let raw_path = files.resolve(&file);
            std::fs::create_dir_all(&args.output_dir)
                .context("Failed to create output directory")?;

            for tag in ThumbnailTag::ALL {
                match exiftool.extract(&raw_path, tag) {
                    Some(bytes) => {
                        let out = args.output_dir.join(format!("{}.jpg", tag.as_str()));
                        std::fs::write(&out, &bytes)
                            .with_context(|| format!("Failed to write {}", out.display()))?;
                        info!("✓ {}: {} bytes -> {}", tag.as_str(), bytes.len(), out.display());
                    }
                    None => warn!("{} not present in {}", tag.as_str(), raw_path.display()),
                }
            }
        }
        Command::Probe => {
            println!("LibRaw: {}", LibRaw::version());
            let exiftool = ExifTool::from_env();
            match exiftool.version() {
                Some(version) => println!("exiftool: {}", version),
                None => println!("exiftool: not available ({})", exiftool.program().display()),
            }
        }
    }

    Ok(())
}

/// Accept inline JSON or `@file.json`
fn parse_inputs(arg: &str) -> Result<Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inputs from {}", path))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Inputs are not valid JSON")
}

fn file_stem(inputs: &Value) -> String {
    inputs["image"]
        .as_str()
        .and_then(|name| Path::new(name).file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "raw".to_string())
}

fn save_auxiliary(image: &ImageTensor, path: &Path) -> Result<()> {
    if tensor::is_sentinel(image) {
        warn!("Skipping empty output {}", path.display());
        return Ok(());
    }
    tensor::tensor_to_rgb8(image)
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("✓ {}", path.display());
    Ok(())
}
