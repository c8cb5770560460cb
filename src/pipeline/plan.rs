/// A contiguous time slice `[start, start + duration)` of the source video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSpec {
    pub index: usize,
    pub start: f64,
    pub duration: f64,
}

/// A batch length of 0 covers the whole video with a single batch.
pub fn batch_count(duration: f64, batch_length: f64) -> usize {
    if batch_length <= 0.0 {
        1
    } else {
        ((duration / batch_length).ceil() as usize).max(1)
    }
}

pub fn plan(duration: f64, batch_length: f64) -> Vec<BatchSpec> {
    let step = if batch_length <= 0.0 { duration } else { batch_length };
    (0..batch_count(duration, batch_length))
        .map(|index| {
            let start = index as f64 * step;
            BatchSpec { index, start, duration: step.min(duration - start) }
        })
        .collect()
}
