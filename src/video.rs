use crate::error::Error;
use crate::pipeline::plan;
use crate::toolkit::VideoToolkit;

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

const TARGET_CONTAINER: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub duration: f64,
    pub time_base: f64,
}

impl VideoInfo {
    pub const FALLBACK: VideoInfo = VideoInfo { fps: 24.0, duration: 0.0, time_base: 1.0 / 1000.0 };

    /// Never fails: a probe error yields [`VideoInfo::FALLBACK`], whose zero duration makes the caller skip the video.
    pub fn probe(toolkit: &dyn VideoToolkit, input: &Path) -> Self {
        match Self::try_probe(toolkit, input) {
            Ok(info) => info,
            Err(error) => {
                warn!("Error getting video info: {}", error);
                Self::FALLBACK
            }
        }
    }

    fn try_probe(toolkit: &dyn VideoToolkit, input: &Path) -> Result<Self, Error> {
        let probe_error = |reason: String| Error::Probe { path: input.to_path_buf(), reason };

        let output = toolkit.probe_stream(input, "stream=avg_frame_rate,duration")?;
        let mut lines = output.lines().map(str::trim).filter(|line| !line.is_empty());
        let (fps_value, duration_value) = match (lines.next(), lines.next()) {
            (Some(fps), Some(duration)) => (fps.to_string(), duration.to_string()),
            _ => return Err(probe_error("probe output incomplete".to_string())),
        };

        let duration_value = if duration_value == "N/A" {
            debug!("Stream duration unreported, falling back to container duration");
            toolkit.probe_format_duration(input)?.trim().to_string()
        } else {
            duration_value
        };

        let fps = parse_rational(&fps_value)
            .ok_or_else(|| probe_error(format!("invalid frame rate: {}", fps_value)))?;
        let duration = duration_value.parse::<f64>()
            .ok()
            .filter(|duration| duration.is_finite())
            .ok_or_else(|| probe_error(format!("invalid duration: {}", duration_value)))?;

        let time_base_value = toolkit.probe_stream(input, "stream=time_base")?;
        let time_base = parse_rational(time_base_value.trim())
            .ok_or_else(|| probe_error(format!("invalid time base: {}", time_base_value.trim())))?;

        Ok(Self { fps, duration, time_base })
    }
}

/// Parses `num/den` or a plain decimal.
pub fn parse_rational(value: &str) -> Option<f64> {
    let parsed = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => value.trim().parse::<f64>().ok()?,
    };
    parsed.is_finite().then_some(parsed)
}

pub fn is_integer_fps(fps: f64) -> bool {
    (fps - fps.round()).abs() < 1e-6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    Unchanged,
    Remux,
    Reencode { fps: u32 },
}

impl Normalization {
    pub fn decide(input: &Path, fps: f64) -> Self {
        let is_target_container = input
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(TARGET_CONTAINER));

        match (is_integer_fps(fps), is_target_container) {
            (true, true) => Normalization::Unchanged,
            (true, false) => Normalization::Remux,
            (false, _) => Normalization::Reencode { fps: output_fps(fps) },
        }
    }

    pub fn apply(&self, toolkit: &dyn VideoToolkit, input: &Path, work_dir: &Path) -> Result<Option<PathBuf>, Error> {
        let converted = work_dir.join(format!("{}_converted.{}", file_stem(input), TARGET_CONTAINER));
        let conversion_error = |source: Error| {
            let _ = std::fs::remove_file(&converted);
            Error::Conversion { path: input.to_path_buf(), source: Box::new(source) }
        };

        match self {
            Normalization::Unchanged => {
                info!("Skipping conversion (integer fps & already {}): {}", TARGET_CONTAINER, input.display());
                Ok(None)
            }
            Normalization::Remux => {
                info!("Remuxing {} to .{} (no re-encode)", input.display(), TARGET_CONTAINER);
                toolkit.remux(input, &converted).map_err(conversion_error)?;
                Ok(Some(converted))
            }
            Normalization::Reencode { fps } => {
                info!("Re-encoding {} to .{} with fps={}", input.display(), TARGET_CONTAINER, fps);
                toolkit.reencode(input, &converted, *fps).map_err(conversion_error)?;
                Ok(Some(converted))
            }
        }
    }
}

pub fn output_fps(fps: f64) -> u32 {
    (fps.round() as u32).max(1)
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("video"))
}

/// One input file and everything derived from probing it.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub source: PathBuf,
    pub fps: f64,
    pub duration: f64,
    pub time_base: f64,
    pub output_fps: u32,
    pub total_frames: u64,
    pub batch_count: usize,
    normalized: Option<PathBuf>,
}

impl VideoJob {
    pub fn new(source: &Path, info: VideoInfo, batch_length: f64) -> Self {
        let output_fps = output_fps(info.fps);
        Self {
            source: source.to_path_buf(),
            fps: info.fps,
            duration: info.duration,
            time_base: info.time_base,
            output_fps,
            total_frames: (info.duration * output_fps as f64).ceil().max(0.0) as u64,
            batch_count: plan::batch_count(info.duration, batch_length),
            normalized: None,
        }
    }

    pub fn normalize(&mut self, toolkit: &dyn VideoToolkit, work_dir: &Path) -> Result<(), Error> {
        self.normalized = Normalization::decide(&self.source, self.fps).apply(toolkit, &self.source, work_dir)?;
        Ok(())
    }

    /// The file batches are extracted from.
    pub fn input(&self) -> &Path {
        self.normalized.as_deref().unwrap_or(&self.source)
    }

    pub fn is_normalized_copy(&self) -> bool {
        self.normalized.is_some()
    }

    pub fn stem(&self) -> String {
        file_stem(&self.source)
    }

    pub fn remove_normalized(&self) {
        if let Some(path) = &self.normalized {
            if let Err(error) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), error);
            }
        }
    }
}
