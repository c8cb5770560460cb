use crate::error::Error;
use crate::pipeline::batch::BatchOutcome;
use crate::toolkit::{quote_concat_path, VideoToolkit};
use crate::video::file_stem;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Final segment per batch index; `None` marks a batch that produced nothing usable.
#[derive(Debug, Default)]
pub struct SegmentTable {
    slots: Vec<Option<PathBuf>>,
}

impl SegmentTable {
    /// Joins every deferred reassembly exactly once.
    pub fn resolve(outcomes: Vec<Option<BatchOutcome>>) -> Self {
        let slots = outcomes
            .into_iter()
            .map(|outcome| outcome.and_then(BatchOutcome::resolve))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn missing(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    /// Resolved segments in batch order.
    pub fn segments(&self) -> impl Iterator<Item = &PathBuf> + '_ {
        self.slots.iter().flatten()
    }

    /// Flat concat list in batch order, skipping missing batches with a warning.
    pub fn concat_list(&self) -> String {
        let mut list = String::new();
        for (index, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(segment) => {
                    list.push_str(&format!("file {}\n", quote_concat_path(segment)));
                }
                None => warn!("Segment of batch {} is missing and will be skipped", index),
            }
        }
        list
    }
}

impl From<Vec<Option<PathBuf>>> for SegmentTable {
    fn from(slots: Vec<Option<PathBuf>>) -> Self {
        Self { slots }
    }
}

/// Concatenates batch segments and restores the source's audio and metadata.
pub struct Assembler<'a> {
    toolkit: &'a dyn VideoToolkit,
    work_dir: &'a Path,
}

impl<'a> Assembler<'a> {
    pub fn new(toolkit: &'a dyn VideoToolkit, work_dir: &'a Path) -> Self {
        Self { toolkit, work_dir }
    }

    /// Intermediate files are removed whether or not assembly succeeds.
    pub fn execute(&self, table: &SegmentTable, source: &Path, output: &Path) -> Result<(), Error> {
        let stem = file_stem(source);
        let list = self.work_dir.join(format!("{}_segments.txt", stem));
        let video_only = self.work_dir.join(format!("{}_no_audio.mp4", stem));

        let result = self.concat_and_merge(table, source, &list, &video_only, output);

        for segment in table.segments() {
            let _ = fs::remove_file(segment);
        }
        let _ = fs::remove_file(&list);
        let _ = fs::remove_file(&video_only);
        result
    }

    fn concat_and_merge(
        &self,
        table: &SegmentTable,
        source: &Path,
        list: &Path,
        video_only: &Path,
        output: &Path,
    ) -> Result<(), Error> {
        if table.segments().next().is_none() {
            return Err(Error::NoSegments);
        }
        if table.missing() > 0 {
            warn!("{} of {} batch segments are missing; the output will be shorter than the source", table.missing(), table.len());
        }

        fs::write(list, table.concat_list())?;
        self.toolkit
            .concat_segments(list, video_only)
            .map_err(|error| Error::Concat(Box::new(error)))?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        self.toolkit
            .merge_audio(video_only, source, output)
            .map_err(|error| Error::Merge(Box::new(error)))?;

        info!("Assembled {} segments into {}", table.len() - table.missing(), output.display());
        Ok(())
    }
}
