use anyhow::Context;
use clap::{Parser, Subcommand};
use hsimap::{HsiPipeline, PipelineConfig, Stage};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hsimap")]
#[command(author, version, about = "Habitat suitability index mapping", long_about = None)]
struct Cli {
    /// Pipeline configuration (JSON); built-in study region defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured output directory
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Process only the first N time steps
    #[arg(long, global = true)]
    sample: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resample CHL, SST and salinity onto the target grid
    Preprocess,
    /// Score the preprocessed variables into suitability indices
    Score,
    /// Aggregate daily fields into calendar months
    Aggregate,
    /// Write one GeoJSON point collection per month
    Export,
    /// Remove exported points that fall on land
    FilterLand,
    /// Run every stage in order
    All,
    /// Print the resolved configuration and target grid
    Info,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = cli.output_dir {
        config.output_dir = dir;
    }
    if cli.sample.is_some() {
        config.max_time_steps = cli.sample;
    }

    let pipeline = HsiPipeline::new(config).context("invalid configuration")?;

    let stage = match cli.command {
        Command::Preprocess => Some(Stage::Preprocess),
        Command::Score => Some(Stage::Score),
        Command::Aggregate => Some(Stage::Aggregate),
        Command::Export => Some(Stage::Export),
        Command::FilterLand => Some(Stage::FilterLand),
        Command::All => None,
        Command::Info => {
            let grid = pipeline.grid()?;
            println!("{:#?}", pipeline.config());
            println!(
                "Target grid: {} x {} cells, bounds {:?}",
                grid.shape().0,
                grid.shape().1,
                grid.bounds()
            );
            return Ok(());
        }
    };

    match stage {
        Some(stage) => pipeline
            .run(stage)
            .with_context(|| format!("stage {} failed", stage))?,
        None => pipeline.run_all().context("pipeline failed")?,
    }

    Ok(())
}
