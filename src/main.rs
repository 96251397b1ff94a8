use clap::Parser;
use log::{error, info};
use std::process::ExitCode;

use phenotile::{process_dataset, process_inference, Args, PipelineConfig};

fn main() -> ExitCode {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match PipelineConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = if config.inference {
        info!("Tiling {} for inference...", config.input_dir.display());
        process_inference(&config).map(|tiles| info!("Created {} tiles.", tiles.len()))
    } else {
        info!("Building tiled dataset from {}...", config.input_dir.display());
        process_dataset(&config).map(|_| info!("Conversion process completed successfully."))
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to process dataset: {}", e);
            ExitCode::FAILURE
        }
    }
}
