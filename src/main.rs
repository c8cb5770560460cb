mod arguments;
mod error;
mod frame;
mod model;
mod pipeline;
mod toolkit;
mod video;

#[cfg(test)]
mod testing;

use arguments::{Arguments, Config};
use clap::Parser;
use error::Error;
use model::RealEsrgan;
use pipeline::{format_elapsed, Pipeline};
use toolkit::Ffmpeg;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_pipeline() -> Result<(), Error> {
    let arguments = Arguments::parse();
    init_logging(arguments.verbose);

    let inputs = arguments.inputs.clone();
    let config = Config::try_from(arguments)?;
    config.check_ffmpeg()?;

    let engine = RealEsrgan::new(&config);
    info!("Engine:     {}", engine);
    info!("Batches:    {}s, {} concurrent, {}s stagger", config.batch_length, config.max_concurrent_batches, config.stagger_delay.as_secs_f64());
    info!("Work dir:   {}", config.work_dir.display());

    let toolkit = Ffmpeg::new(&config);
    let pipeline = Pipeline::new(Arc::new(config), Arc::new(toolkit), Arc::new(engine));
    let summary = pipeline.execute(&inputs);

    if summary.processed > 0 {
        info!(
            "Processed {}/{} videos. Total elapsed time: {}",
            summary.processed, summary.total, format_elapsed(summary.elapsed)
        );
    } else {
        info!("No videos were processed.");
    }
    Ok(())
}

fn main() {
    if let Err(error) = run_pipeline() {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    } else {
        println!("Completed!");
    }
}
