use crate::error::Error;
use crate::toolkit::quote_concat_path;

use std::fmt::Write;
use std::path::{Path, PathBuf};

pub const FRAME_PATTERN: &str = "frame_%06d.png";
const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "png";

/// An image on disk together with its position in the batch timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescriptor {
    pub path: PathBuf,
    pub sequence: u64,
    pub timestamp: f64,
}

impl FrameDescriptor {
    /// Sequence numbers are 1-based, so frame `n` is presented at `(n - 1) / fps`.
    pub fn parse(path: &Path, fps: u32) -> Option<Self> {
        let sequence = sequence_number(path)?;
        let timestamp = sequence.saturating_sub(1) as f64 / fps as f64;
        Some(Self { path: path.to_path_buf(), sequence, timestamp })
    }
}

fn sequence_number(path: &Path) -> Option<u64> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case(FRAME_EXTENSION) {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(FRAME_PREFIX)?
        .parse()
        .ok()
}

fn is_frame_file(path: &Path) -> bool {
    let named_like_frame = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(FRAME_PREFIX));
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(FRAME_EXTENSION));
    named_like_frame && is_png
}

pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let mut frames = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_frame_file(&path) {
            frames.push(path);
        }
    }
    Ok(frames)
}

/// Missing or unreadable directories count as empty.
pub fn count_frames(dir: &Path) -> usize {
    list_frames(dir).map(|frames| frames.len()).unwrap_or(0)
}

/// Frames ordered by presentation time, ready to be written as an ffconcat edit-list.
pub struct EditList {
    frames: Vec<FrameDescriptor>,
    fps: u32,
}

impl EditList {
    pub fn new(mut frames: Vec<FrameDescriptor>, fps: u32) -> Self {
        frames.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Self { frames, fps }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[cfg(test)]
    pub fn frames(&self) -> &[FrameDescriptor] {
        &self.frames
    }

    /// Every entry lasts one frame interval except the last, which is held with a zero duration.
    pub fn render(&self) -> String {
        let frame_duration = 1.0 / self.fps as f64;
        let mut rendered = String::from("ffconcat version 1.0\n");
        for (i, frame) in self.frames.iter().enumerate() {
            let duration = if i + 1 < self.frames.len() { frame_duration } else { 0.0 };
            let _ = writeln!(rendered, "file {}", quote_concat_path(&frame.path));
            let _ = writeln!(rendered, "duration {:.6}", duration);
        }
        rendered
    }
}
