use clap::{Parser, Subcommand};
use std::path::PathBuf;

use proposal_cropper::{BatchConfig, BatchSummary, run_batch, run_single};

#[derive(Parser)]
#[command(name = "proposal-cropper")]
#[command(about = "Crop object proposals out of images and record their geometry")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crop proposals from one image into OUTPUT_DIR/crops and OUTPUT_DIR/bing_meta.csv.
    Single {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Number of proposals to keep (0 or negative keeps none)
        #[arg(value_name = "COUNT", allow_negative_numbers = true)]
        count: i64,

        /// Directory receiving crops and metadata
        #[arg(value_name = "OUTPUT_DIR")]
        output_dir: PathBuf,

        /// JSON config supplying the scorer and output format
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Crop proposals from every image in the configured directory.
    Batch {
        /// JSON config describing the run (defaults apply when omitted)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Process images on all cores
        #[arg(long)]
        parallel: bool,

        /// Save proposal overlays to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BatchConfig> {
    match path {
        Some(path) => BatchConfig::load(path),
        None => {
            let config = BatchConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    let c = &summary.counters;
    println!("Images seen:      {}", c.images_seen);
    println!("Images processed: {}", c.images_processed);
    println!("Images failed:    {}", c.images_failed);
    println!("Images unready:   {}", c.images_unready);
    println!("Crops saved:      {}", c.crops_saved);
    if summary.halted {
        println!("Batch stopped early: scorer model not loaded");
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match args.command {
        Commands::Single {
            image_path,
            count,
            output_dir,
            config,
        } => {
            let config = load_config(config.as_ref())?;
            let generator = config.build_generator();
            let summary = run_single(
                &image_path,
                count,
                &output_dir,
                generator.as_ref(),
                config.output_format,
            )?;
            print_summary(&summary);
            println!(
                "Metadata written to {}",
                output_dir
                    .join(proposal_cropper::pipeline::SINGLE_METADATA_FILE)
                    .display()
            );
        }
        Commands::Batch {
            config,
            parallel,
            debug_out,
        } => {
            let mut config = load_config(config.as_ref())?;
            config.parallel |= parallel;
            let generator = config.build_generator();
            let summary = run_batch(&config, generator.as_ref(), debug_out)?;
            print_summary(&summary);
            println!("Cropped images saved to: {}", config.crops_dir().display());
            println!("CSV metadata saved to: {}", config.metadata_path().display());
        }
    }

    Ok(())
}
