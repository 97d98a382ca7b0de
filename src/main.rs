use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use cloud_repro::data::features::FeatureMode;
use cloud_repro::pipeline::{self, Stage, StageArgs};

/// Develop a model to predict cloud types
#[derive(Parser, Debug)]
#[command(name = "cloud-repro", version, about)]
struct Cli {
    /// Which step to run
    #[arg(value_enum)]
    stage: Stage,

    /// Path to input
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Path to save output
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Feature derivation path for the featurize stage
    #[arg(long, value_enum, default_value_t = FeatureMode::Strict)]
    mode: FeatureMode,
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{:<12} {:<8} {}",
                record.target(),
                record.level(),
                record.args()
            )
        })
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = cloud_repro::load_config(&cli.config)?;
    let args = StageArgs {
        input: cli.input,
        output: cli.output,
        mode: cli.mode,
    };
    pipeline::run(cli.stage, &args, &config)
}
