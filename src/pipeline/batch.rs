use crate::arguments::Config;
use crate::error::Error;
use crate::frame::{count_frames, list_frames, EditList, FrameDescriptor};
use crate::model::Upscaler;
use crate::pipeline::plan::BatchSpec;
use crate::pipeline::progress::Progress;
use crate::toolkit::VideoToolkit;
use crate::video::VideoJob;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS: usize = 3;
const MIN_FRAMES: usize = 2;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const FALLBACK_GEOMETRY: (u32, u32) = (1280, 720);

/// Result of one batch. Exactly one is produced per [`BatchSpec`].
#[derive(Debug)]
pub enum BatchOutcome {
    Segment(PathBuf),
    /// Reassembly still running on its own thread.
    Deferred(JoinHandle<Option<PathBuf>>),
    Failed,
}

impl BatchOutcome {
    /// Blocks until a deferred reassembly has finished.
    pub fn resolve(self) -> Option<PathBuf> {
        match self {
            BatchOutcome::Segment(path) => Some(path),
            BatchOutcome::Deferred(handle) => handle.join().unwrap_or_else(|_| {
                error!("Deferred reassembly panicked");
                None
            }),
            BatchOutcome::Failed => None,
        }
    }
}

impl From<Option<PathBuf>> for BatchOutcome {
    fn from(segment: Option<PathBuf>) -> Self {
        segment.map_or(BatchOutcome::Failed, BatchOutcome::Segment)
    }
}

/// Working paths of one batch. Names carry the batch index and a timestamp so
/// concurrent batches never share a directory.
struct BatchFiles {
    index: usize,
    extraction: PathBuf,
    processed: PathBuf,
    placeholder: PathBuf,
    segment: PathBuf,
    edit_list: PathBuf,
}

impl BatchFiles {
    fn create(work_dir: &Path, stem: &str, index: usize) -> Result<Self, Error> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        let id = format!("{}_batch_{}_{}", stem, index, timestamp);
        let files = Self {
            index,
            extraction: work_dir.join(format!("{}_extraction", id)),
            processed: work_dir.join(format!("{}_processed", id)),
            placeholder: work_dir.join(format!("{}_placeholder.mp4", id)),
            segment: work_dir.join(format!("{}_segment.mp4", id)),
            edit_list: work_dir.join(format!("{}_frames.txt", id)),
        };
        fs::create_dir_all(&files.extraction)?;
        fs::create_dir_all(&files.processed)?;
        Ok(files)
    }

    fn remove_dirs(&self) {
        let _ = fs::remove_dir_all(&self.extraction);
        let _ = fs::remove_dir_all(&self.processed);
    }
}

/// A black filler clip standing in for a batch that produced no usable frames.
struct Placeholder {
    toolkit: Arc<dyn VideoToolkit>,
    path: PathBuf,
    index: usize,
    duration: f64,
    fps: u32,
    geometry: (u32, u32),
}

impl Placeholder {
    fn synthesize(&self) -> Option<PathBuf> {
        let (width, height) = self.geometry;
        match self.toolkit.generate_placeholder(&self.path, self.duration, self.fps, width, height) {
            Ok(()) => Some(self.path.clone()),
            Err(error) => {
                error!("Error generating placeholder segment for batch {}: {}", self.index, error);
                let _ = fs::remove_file(&self.path);
                None
            }
        }
    }
}

/// Turns upscaled frames back into a fixed-rate segment.
struct Reassembly {
    toolkit: Arc<dyn VideoToolkit>,
    index: usize,
    fps: u32,
    encode_args: Vec<String>,
    frames_dir: PathBuf,
    edit_list: PathBuf,
    segment: PathBuf,
    placeholder: Placeholder,
}

impl Reassembly {
    fn run(self) -> Option<PathBuf> {
        let frames = list_frames(&self.frames_dir).unwrap_or_else(|error| {
            warn!("Failed to read processed frames for batch {}: {}", self.index, error);
            Vec::new()
        });
        let descriptors = frames
            .iter()
            .filter_map(|path| {
                let descriptor = FrameDescriptor::parse(path, self.fps);
                if descriptor.is_none() {
                    warn!("Error parsing frame index from {}", path.display());
                }
                descriptor
            })
            .collect();
        let edit_list = EditList::new(descriptors, self.fps);

        let segment = if edit_list.is_empty() {
            warn!("No processed frames found for batch {}. Creating a placeholder segment.", self.index);
            self.placeholder.synthesize()
        } else {
            self.encode(&edit_list)
        };

        let _ = fs::remove_file(&self.edit_list);
        let _ = fs::remove_dir_all(&self.frames_dir);
        segment
    }

    fn encode(&self, edit_list: &EditList) -> Option<PathBuf> {
        if let Err(error) = fs::write(&self.edit_list, edit_list.render()) {
            error!("Failed to write edit list for batch {}: {}", self.index, error);
            return None;
        }
        debug!("Batch {}: reassembling {} frames", self.index, edit_list.len());
        match self.toolkit.concat_frames(&self.edit_list, self.fps, &self.encode_args, &self.segment) {
            Ok(()) => Some(self.segment.clone()),
            Err(error) => {
                error!("Error reassembling video segment for batch {}: {}", self.index, error);
                let _ = fs::remove_file(&self.segment);
                None
            }
        }
    }
}

/// Reports newly written frames of a directory to the shared progress until stopped.
struct Poller {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Poller {
    fn start(dir: PathBuf, progress: Progress) -> Self {
        let (stop, stopped) = bounded::<()>(0);
        let handle = thread::spawn(move || {
            let mut last_count = 0;
            loop {
                let count = count_frames(&dir);
                if count > last_count {
                    progress.add_frames((count - last_count) as u64);
                    last_count = count;
                }
                match stopped.recv_timeout(POLL_INTERVAL) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    _ => break,
                }
            }
            let count = count_frames(&dir);
            if count > last_count {
                progress.add_frames((count - last_count) as u64);
            }
        });
        Self { stop, handle }
    }

    fn stop(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

/// Runs one batch through extraction, upscaling and reassembly.
pub struct BatchWorker {
    config: Arc<Config>,
    toolkit: Arc<dyn VideoToolkit>,
    engine: Arc<dyn Upscaler>,
    progress: Progress,
    input: PathBuf,
    stem: String,
    fps: u32,
}

impl BatchWorker {
    pub fn new(
        config: Arc<Config>,
        toolkit: Arc<dyn VideoToolkit>,
        engine: Arc<dyn Upscaler>,
        progress: Progress,
        job: &VideoJob,
    ) -> Self {
        Self {
            config,
            toolkit,
            engine,
            progress,
            input: job.input().to_path_buf(),
            stem: job.stem(),
            fps: job.output_fps,
        }
    }

    pub fn process(&self, spec: &BatchSpec) -> BatchOutcome {
        let files = match BatchFiles::create(&self.config.work_dir, &self.stem, spec.index) {
            Ok(files) => files,
            Err(error) => {
                error!("Failed to create working directories for batch {}: {}", spec.index, error);
                return BatchOutcome::Failed;
            }
        };

        if let Err(error) = self.toolkit.extract_frames(&self.input, spec.start, spec.duration, self.fps, &files.extraction) {
            warn!("Error extracting frames for batch {}: {}", spec.index, error);
        }

        let extracted = count_frames(&files.extraction);
        let placeholder = self.placeholder(&files, spec);
        if extracted < MIN_FRAMES {
            info!("Batch {}: too few extracted frames ({}). Creating placeholder segment.", spec.index, extracted);
            let segment = placeholder.synthesize();
            files.remove_dirs();
            self.progress.add_frames(extracted as u64);
            return segment.into();
        }

        if !self.upscale_with_retry(&files) {
            warn!(
                "Upscaling failed for batch {} after {} attempts. Creating placeholder segment.",
                spec.index, MAX_ATTEMPTS
            );
            let segment = placeholder.synthesize();
            files.remove_dirs();
            return segment.into();
        }

        let reassembly = Reassembly {
            toolkit: Arc::clone(&self.toolkit),
            index: spec.index,
            fps: self.fps,
            encode_args: self.config.reassembly_args.clone(),
            frames_dir: files.processed.clone(),
            edit_list: files.edit_list.clone(),
            segment: files.segment.clone(),
            placeholder,
        };

        if self.config.is_serial() {
            self.defer(&files, reassembly)
        } else {
            let segment = reassembly.run();
            let _ = fs::remove_dir_all(&files.extraction);
            segment.into()
        }
    }

    /// Hands reassembly to a background thread so the next batch can start extracting.
    fn defer(&self, files: &BatchFiles, mut reassembly: Reassembly) -> BatchOutcome {
        let handoff = PathBuf::from(format!("{}_for_reassembly", files.processed.display()));
        match fs::rename(&files.processed, &handoff) {
            Ok(()) => reassembly.frames_dir = handoff,
            Err(error) => warn!("Failed to hand off frames of batch {}: {}", files.index, error),
        }
        let _ = fs::remove_dir_all(&files.extraction);
        BatchOutcome::Deferred(thread::spawn(move || reassembly.run()))
    }

    fn upscale_with_retry(&self, files: &BatchFiles) -> bool {
        let poller = Poller::start(files.processed.clone(), self.progress.clone());
        let timeout = self.config.upscale_timeout;
        let mut succeeded = false;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.engine.upscale(&files.extraction, &files.processed, timeout) {
                Ok(()) => {
                    succeeded = true;
                    break;
                }
                Err(Error::Timeout { .. }) => warn!(
                    "Timeout: upscaling batch {} didn't finish in {}s, attempt {}",
                    files.index, timeout.as_secs(), attempt
                ),
                Err(error) => warn!(
                    "Error processing frames for batch {}, attempt {}: {}",
                    files.index, attempt, error
                ),
            }
            if attempt < MAX_ATTEMPTS {
                thread::sleep(self.config.retry_delay);
            }
        }

        poller.stop();
        succeeded
    }

    fn placeholder(&self, files: &BatchFiles, spec: &BatchSpec) -> Placeholder {
        Placeholder {
            toolkit: Arc::clone(&self.toolkit),
            path: files.placeholder.clone(),
            index: spec.index,
            duration: spec.duration,
            fps: self.fps,
            geometry: self.upscaled_geometry(&files.extraction),
        }
    }

    /// Size of the first extracted frame times the scale factor, rounded down to even for yuv420p.
    fn upscaled_geometry(&self, extraction: &Path) -> (u32, u32) {
        let first_frame = list_frames(extraction)
            .ok()
            .and_then(|frames| frames.into_iter().min());
        match first_frame.map(|frame| image::image_dimensions(&frame)) {
            Some(Ok((width, height))) => {
                let even = |value: u32| (value * self.config.scale) & !1;
                (even(width).max(2), even(height).max(2))
            }
            _ => FALLBACK_GEOMETRY,
        }
    }
}
