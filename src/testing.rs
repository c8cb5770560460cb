//! In-memory stand-ins for ffmpeg and the upscaling engine.

use crate::arguments::Config;
use crate::error::Error;
use crate::frame::list_frames;
use crate::model::Upscaler;
use crate::toolkit::VideoToolkit;
use crate::video::{VideoInfo, VideoJob};

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn test_config(work_dir: &Path) -> Config {
    Config {
        stagger_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        upscale_timeout: Duration::from_secs(5),
        work_dir: work_dir.to_path_buf(),
        output_dir: work_dir.join("output"),
        ..Config::default()
    }
}

pub fn test_job(fps: f64, duration: f64, batch_length: f64) -> VideoJob {
    let info = VideoInfo { fps, duration, time_base: 0.001 };
    VideoJob::new(Path::new("clip.mp4"), info, batch_length)
}

fn failure(operation: &str) -> Error {
    Error::Process {
        program: operation.to_string(),
        status: "exit status: 1".to_string(),
        output: format!("{} failed", operation),
    }
}

#[derive(Default)]
pub struct FakeToolkit {
    stream_probe: String,
    format_probe: String,
    time_base_probe: String,
    probe_fails: bool,
    frames: usize,
    failing: Vec<String>,
    failing_after_output: Vec<String>,
    calls: Mutex<Vec<String>>,
    edit_lists: Mutex<Vec<String>>,
    segment_lists: Mutex<Vec<String>>,
}

impl FakeToolkit {
    pub fn with_probe(mut self, stream: &str, format: &str, time_base: &str) -> Self {
        self.stream_probe = stream.to_string();
        self.format_probe = format.to_string();
        self.time_base_probe = time_base.to_string();
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    /// Number of frames written by each extraction.
    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    pub fn failing(mut self, operation: &str) -> Self {
        self.failing.push(operation.to_string());
        self
    }

    /// Writes the operation's output file before failing, like a tool that dies mid-encode.
    pub fn failing_after_output(mut self, operation: &str) -> Self {
        self.failing_after_output.push(operation.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn edit_lists(&self) -> Vec<String> {
        self.edit_lists.lock().unwrap().clone()
    }

    pub fn segment_lists(&self) -> Vec<String> {
        self.segment_lists.lock().unwrap().clone()
    }

    fn record(&self, operation: &str, call: String) -> Result<(), Error> {
        self.calls.lock().unwrap().push(call);
        if self.failing.iter().any(|failing| failing == operation) {
            Err(failure(operation))
        } else {
            Ok(())
        }
    }

    fn write_output(&self, operation: &str, output: &Path, contents: &[u8]) -> Result<(), Error> {
        fs::write(output, contents)?;
        if self.failing_after_output.iter().any(|failing| failing == operation) {
            Err(failure(operation))
        } else {
            Ok(())
        }
    }
}

impl VideoToolkit for FakeToolkit {
    fn probe_stream(&self, _input: &Path, entries: &str) -> Result<String, Error> {
        if self.probe_fails {
            return Err(failure("ffprobe"));
        }
        if entries.contains("avg_frame_rate") {
            Ok(self.stream_probe.clone())
        } else {
            Ok(self.time_base_probe.clone())
        }
    }

    fn probe_format_duration(&self, _input: &Path) -> Result<String, Error> {
        if self.probe_fails {
            return Err(failure("ffprobe"));
        }
        Ok(self.format_probe.clone())
    }

    fn remux(&self, _input: &Path, output: &Path) -> Result<(), Error> {
        self.record("remux", "remux".to_string())?;
        fs::write(output, b"remuxed")?;
        Ok(())
    }

    fn reencode(&self, _input: &Path, output: &Path, fps: u32) -> Result<(), Error> {
        self.record("reencode", format!("reencode {}", fps))?;
        fs::write(output, b"reencoded")?;
        Ok(())
    }

    fn extract_frames(&self, input: &Path, start: f64, _duration: f64, fps: u32, output_dir: &Path) -> Result<(), Error> {
        let name = input.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.record("extract", format!("extract {} {} {}", name, start, fps))?;
        for sequence in 1..=self.frames {
            fs::write(output_dir.join(format!("frame_{:06}.png", sequence)), b"")?;
        }
        Ok(())
    }

    fn generate_placeholder(&self, output: &Path, duration: f64, _fps: u32, width: u32, height: u32) -> Result<(), Error> {
        self.record("placeholder", format!("placeholder {} {}x{}", duration, width, height))?;
        self.write_output("placeholder", output, b"placeholder")
    }

    fn concat_frames(&self, edit_list: &Path, _fps: u32, _encode_args: &[String], output: &Path) -> Result<(), Error> {
        self.record("concat_frames", "concat_frames".to_string())?;
        self.edit_lists.lock().unwrap().push(fs::read_to_string(edit_list)?);
        self.write_output("concat_frames", output, b"segment")
    }

    fn concat_segments(&self, list: &Path, output: &Path) -> Result<(), Error> {
        self.record("concat_segments", "concat_segments".to_string())?;
        self.segment_lists.lock().unwrap().push(fs::read_to_string(list)?);
        fs::write(output, b"video")?;
        Ok(())
    }

    fn merge_audio(&self, _video: &Path, _source: &Path, output: &Path) -> Result<(), Error> {
        self.record("merge", "merge".to_string())?;
        fs::write(output, b"final")?;
        Ok(())
    }
}

/// Fails a fixed number of attempts, then writes one output image per input image.
pub struct FakeEngine {
    failures: usize,
    timeouts: bool,
    output_names: Option<Vec<String>>,
    attempts: AtomicUsize,
}

impl FakeEngine {
    pub fn failing_first(failures: usize) -> Self {
        Self { failures, timeouts: false, output_names: None, attempts: AtomicUsize::new(0) }
    }

    pub fn with_timeouts(mut self) -> Self {
        self.timeouts = true;
        self
    }

    pub fn with_output_names(mut self, names: &[&str]) -> Self {
        self.output_names = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Upscaler for FakeEngine {
    fn upscale(&self, input_dir: &Path, output_dir: &Path, timeout: Duration) -> Result<(), Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(if self.timeouts {
                Error::Timeout { program: "engine".to_string(), timeout }
            } else {
                failure("engine")
            });
        }

        let names = match &self.output_names {
            Some(names) => names.clone(),
            None => list_frames(input_dir)?
                .iter()
                .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect(),
        };
        for name in names {
            fs::write(output_dir.join(name), b"")?;
        }
        Ok(())
    }
}
