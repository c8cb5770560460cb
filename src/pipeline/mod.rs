pub mod assemble;
pub mod batch;
pub mod plan;
pub mod progress;
pub mod schedule;

use assemble::Assembler;
use batch::BatchWorker;
use progress::{Progress, Reporter};
use schedule::Scheduler;

use crate::arguments::Config;
use crate::error::Error;
use crate::model::Upscaler;
use crate::toolkit::VideoToolkit;
use crate::video::{VideoInfo, VideoJob};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

pub struct Summary {
    pub processed: usize,
    pub total: usize,
    pub elapsed: Duration,
}

pub struct Pipeline {
    config: Arc<Config>,
    toolkit: Arc<dyn VideoToolkit>,
    engine: Arc<dyn Upscaler>,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, toolkit: Arc<dyn VideoToolkit>, engine: Arc<dyn Upscaler>) -> Self {
        Self { config, toolkit, engine }
    }

    /// Processes videos one after another; a failed video does not stop the run.
    pub fn execute(&self, inputs: &[PathBuf]) -> Summary {
        let mut summary = Summary { processed: 0, total: inputs.len(), elapsed: Duration::ZERO };

        for (i, input) in inputs.iter().enumerate() {
            info!("--- Processing video {}/{}: {} ---", i + 1, summary.total, input.display());
            match self.process_video(input, i + 1, summary.total) {
                Ok(Some(elapsed)) => {
                    summary.processed += 1;
                    summary.elapsed += elapsed;
                    info!("Global progress: {}/{} videos processed.", summary.processed, summary.total);
                }
                Ok(None) => {}
                Err(error) => error!("Failed to process {}: {}", input.display(), error),
            }
        }

        summary
    }

    /// Returns the elapsed time, or `None` when the video was skipped.
    pub fn process_video(&self, input: &Path, position: usize, total: usize) -> Result<Option<Duration>, Error> {
        let info = VideoInfo::probe(self.toolkit.as_ref(), input);
        if info.duration <= 0.0 {
            warn!("Skipping {} due to zero duration.", input.display());
            return Ok(None);
        }

        let started = Instant::now();
        let mut job = VideoJob::new(input, info, self.config.batch_length);
        job.normalize(self.toolkit.as_ref(), &self.config.work_dir)?;
        info!(
            "{}: {:.3} fps -> {} fps, {:.2}s (time base {}), {} frames in {} batches",
            input.display(), job.fps, job.output_fps, job.duration, job.time_base, job.total_frames, job.batch_count
        );

        let progress = Progress::new();
        let reporter = Reporter::start(
            progress.clone(),
            format!("Video {}/{}", position, total),
            job.total_frames,
            job.batch_count,
        );
        let worker = BatchWorker::new(
            Arc::clone(&self.config),
            Arc::clone(&self.toolkit),
            Arc::clone(&self.engine),
            progress.clone(),
            &job,
        );
        let specs = plan::plan(job.duration, self.config.batch_length);
        let table = Scheduler::new(&self.config).run(specs, &progress, |spec| worker.process(spec));
        reporter.finish();
        if job.is_normalized_copy() {
            job.remove_normalized();
        }

        let output = self.config.output_path(input);
        Assembler::new(self.toolkit.as_ref(), &self.config.work_dir).execute(&table, input, &output)?;

        let elapsed = started.elapsed();
        info!("Finished processing {}. Output saved to {}", input.display(), output.display());
        info!("Elapsed time for this video: {}", format_elapsed(elapsed));
        Ok(Some(elapsed))
    }
}

pub fn format_elapsed(elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    format!("{} min {:4.1} sec", (seconds / 60.0).floor() as u64, seconds % 60.0)
}
