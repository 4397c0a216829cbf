use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facecrop_core::types::parse_zoom;
use facecrop_core::{pixel, AspectRatio, FaceCropper, OutputFormat, ProcessingParams, ScrfdDetector};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facecrop", about = "Crop images around the largest detected face")]
struct Cli {
    /// TOML config file (takes precedence over FACECROP_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crop a single image
    Crop {
        /// Image to process
        input: PathBuf,
        /// Output file (.png for lossless, anything else is written as JPEG)
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Crop many images concurrently
    Batch {
        /// Images to process
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Directory for processed_<name>.jpg outputs
        #[arg(long)]
        out_dir: PathBuf,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Print detected faces as JSON
    Detect {
        /// Image to inspect
        input: PathBuf,
    },
}

#[derive(Args, Clone, Copy)]
struct ParamArgs {
    /// Output aspect ratio: original, square, 2:3 or 9:16
    #[arg(short, long, default_value = "original", value_parser = AspectRatio::from_str)]
    aspect_ratio: AspectRatio,
    /// 0.0 pads the face by its own size on every side, 1.0 crops the face box exactly
    #[arg(short, long, default_value = "0.2", value_parser = parse_zoom)]
    zoom: f64,
}

impl ParamArgs {
    fn to_params(self) -> Result<ProcessingParams> {
        Ok(ProcessingParams::new(self.aspect_ratio, self.zoom)?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let model_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&model_path)
        .with_context(|| format!("loading face detector from {model_path}"))?;
    tracing::info!(path = %model_path, "SCRFD detector loaded");

    let cropper = FaceCropper::new(Arc::new(detector), config.processor.clone());

    match cli.command {
        Commands::Crop {
            input,
            output,
            params,
        } => {
            let params = params.to_params()?;
            crop_file(&cropper, &input, &output, &params).await?;
            println!("{}", output.display());
        }
        Commands::Batch {
            inputs,
            out_dir,
            params,
        } => {
            let params = params.to_params()?;
            run_batch(&cropper, inputs, &out_dir, params).await?;
        }
        Commands::Detect { input } => {
            let bytes = tokio::fs::read(&input)
                .await
                .with_context(|| format!("reading {}", input.display()))?;
            let detection = cropper.detect(&bytes).await?;
            let report = serde_json::json!({
                "input": input.display().to_string(),
                "width": detection.width,
                "height": detection.height,
                "faces": detection.faces,
                "primary": detection.primary,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn crop_file(
    cropper: &FaceCropper,
    input: &Path,
    output: &Path,
    params: &ProcessingParams,
) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let processed = cropper
        .process(&bytes, params)
        .await
        .with_context(|| format!("processing {}", input.display()))?;

    let format = output_format(output, cropper.config().jpeg_quality);
    let encoded = pixel::encode(processed.image(), format)?;
    tokio::fs::write(output, encoded)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

async fn run_batch(
    cropper: &FaceCropper,
    inputs: Vec<PathBuf>,
    out_dir: &Path,
    params: ProcessingParams,
) -> Result<()> {
    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let total = inputs.len();
    let mut tasks = tokio::task::JoinSet::new();
    for input in inputs {
        let cropper = cropper.clone();
        let output = out_dir.join(batch_output_name(&input));
        tasks.spawn(async move {
            let result = crop_file(&cropper, &input, &output, &params).await;
            (input, output, result)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (input, output, result) = joined.context("batch task panicked")?;
        match result {
            Ok(()) => println!("{} -> {}", input.display(), output.display()),
            Err(e) => {
                failed += 1;
                tracing::error!(input = %input.display(), error = %format!("{e:#}"), "batch item failed");
                eprintln!("{}: {e:#}", input.display());
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} images failed");
    }
    Ok(())
}

/// `photos/me.png` → `processed_me.jpg`.
fn batch_output_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    format!("processed_{stem}.jpg")
}

fn output_format(path: &Path, jpeg_quality: u8) -> OutputFormat {
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if is_png {
        OutputFormat::Png
    } else {
        OutputFormat::Jpeg {
            quality: jpeg_quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_output_name() {
        assert_eq!(batch_output_name(Path::new("photos/me.png")), "processed_me.jpg");
        assert_eq!(batch_output_name(Path::new("scan")), "processed_scan.jpg");
    }

    #[test]
    fn test_output_format_by_extension() {
        assert_eq!(output_format(Path::new("a.PNG"), 80), OutputFormat::Png);
        assert_eq!(output_format(Path::new("a.jpg"), 80), OutputFormat::Jpeg { quality: 80 });
        assert_eq!(output_format(Path::new("a"), 75), OutputFormat::Jpeg { quality: 75 });
    }

    #[test]
    fn test_cli_parses_crop_params() {
        let cli = Cli::try_parse_from([
            "facecrop", "crop", "in.jpg", "-o", "out.jpg", "--aspect-ratio", "9:16", "--zoom", "1.0",
        ])
        .unwrap();
        let Commands::Crop { params, .. } = cli.command else {
            panic!("expected crop");
        };
        assert_eq!(params.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(params.zoom, 1.0);
    }

    #[test]
    fn test_cli_rejects_bad_params() {
        assert!(Cli::try_parse_from(["facecrop", "crop", "in.jpg", "-o", "o.jpg", "--zoom", "1.5"]).is_err());
        assert!(Cli::try_parse_from(["facecrop", "crop", "in.jpg", "-o", "o.jpg", "-a", "4:3"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["facecrop", "batch", "a.jpg", "b.jpg", "--out-dir", "out"]).unwrap();
        let Commands::Batch { inputs, params, .. } = cli.command else {
            panic!("expected batch");
        };
        assert_eq!(inputs.len(), 2);
        assert_eq!(params.aspect_ratio, AspectRatio::Original);
        assert_eq!(params.zoom, 0.2);
    }
}
