use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use indicatif::{ProgressBar, ProgressStyle};

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Counters {
    frames: u64,
    batches: usize,
}

/// Frame and batch counters shared by every worker of a job.
#[derive(Clone)]
pub struct Progress {
    counters: Arc<Mutex<Counters>>,
    started: Instant,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Mutex::new(Counters::default())),
            started: Instant::now(),
        }
    }

    pub fn add_frames(&self, delta: u64) {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).frames += delta;
    }

    pub fn complete_batch(&self) {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner).batches += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            frames: counters.frames,
            batches: counters.batches,
            elapsed: self.started.elapsed(),
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Snapshot {
    pub frames: u64,
    pub batches: usize,
    pub elapsed: Duration,
}

impl Snapshot {
    /// Frames per second since the job started.
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed.as_secs_f64();
        if elapsed > 0.0 { self.frames as f64 / elapsed } else { 0.0 }
    }

    pub fn percentage(&self, total_frames: u64) -> f64 {
        if total_frames == 0 {
            return 0.0;
        }
        self.frames as f64 / total_frames as f64 * 100.0
    }

    /// `None` while nothing has been processed yet.
    pub fn eta(&self, total_frames: u64) -> Option<Duration> {
        let throughput = self.throughput();
        if throughput <= 0.0 {
            return None;
        }
        let remaining = total_frames.saturating_sub(self.frames) as f64;
        Some(Duration::from_secs_f64(remaining / throughput))
    }
}

/// Redraws a single status line every second until [`Reporter::finish`] is called.
pub struct Reporter {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Reporter {
    pub fn start(progress: Progress, label: String, total_frames: u64, total_batches: usize) -> Self {
        let (stop, stopped) = bounded::<()>(0);
        let progress_bar = create_progress_bar(total_frames);

        let handle = thread::spawn(move || {
            let line = StatusLine { label, total_frames, total_batches };
            line.render(&progress_bar, &progress.snapshot(), false);
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(REPORT_INTERVAL) {
                line.render(&progress_bar, &progress.snapshot(), false);
            }
            line.render(&progress_bar, &progress.snapshot(), true);
            progress_bar.finish();
        });

        Self { stop, handle }
    }

    pub fn finish(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}

fn create_progress_bar(total_frames: u64) -> ProgressBar {
    let progress_bar = ProgressBar::new(total_frames);
    let progress_style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] [{wide_bar:.white/green}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░-");
    progress_bar.set_style(progress_style);
    progress_bar
}

struct StatusLine {
    label: String,
    total_frames: u64,
    total_batches: usize,
}

impl StatusLine {
    fn render(&self, progress_bar: &ProgressBar, snapshot: &Snapshot, finished: bool) {
        progress_bar.set_position(snapshot.frames.min(self.total_frames));
        progress_bar.set_message(self.message(snapshot, finished));
    }

    fn message(&self, snapshot: &Snapshot, finished: bool) -> String {
        let eta = if finished {
            String::from("0.0 min")
        } else {
            match snapshot.eta(self.total_frames) {
                Some(eta) => format!("{:.1} min", eta.as_secs_f64() / 60.0),
                None => String::from("inf"),
            }
        };
        format!(
            "{} | Batches: {}/{} | Progress: {:6.2}% ({}/{} frames) | Speed: {:6.2} fps | ETA: {}",
            self.label,
            snapshot.batches,
            self.total_batches,
            snapshot.percentage(self.total_frames),
            snapshot.frames,
            self.total_frames,
            snapshot.throughput(),
            eta,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_increments_are_summed_and_monotonic() {
        let progress = Progress::new();
        let workers: Vec<_> = (0..8u64)
            .map(|worker| {
                let progress = progress.clone();
                thread::spawn(move || {
                    for delta in 1..=100 {
                        progress.add_frames(delta + worker);
                    }
                    progress.complete_batch();
                })
            })
            .collect();

        let observer = {
            let progress = progress.clone();
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1000 {
                    let frames = progress.snapshot().frames;
                    assert!(frames >= last);
                    last = frames;
                }
            })
        };

        for worker in workers {
            worker.join().unwrap();
        }
        observer.join().unwrap();

        let expected: u64 = (0..8u64).map(|worker| (1..=100).map(|d| d + worker).sum::<u64>()).sum();
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.frames, expected);
        assert_eq!(snapshot.batches, 8);
    }

    #[test]
    fn snapshot_arithmetic() {
        let snapshot = Snapshot { frames: 300, batches: 1, elapsed: Duration::from_secs(10) };
        assert_eq!(snapshot.throughput(), 30.0);
        assert_eq!(snapshot.percentage(1200), 25.0);
        assert_eq!(snapshot.eta(1200), Some(Duration::from_secs(30)));
    }

    #[test]
    fn eta_is_unbounded_without_throughput() {
        let snapshot = Snapshot { frames: 0, batches: 0, elapsed: Duration::from_secs(5) };
        assert_eq!(snapshot.eta(1200), None);
        assert_eq!(snapshot.percentage(0), 0.0);
    }

    #[test]
    fn final_line_reports_zero_eta() {
        let line = StatusLine { label: "Video 1/2".to_string(), total_frames: 1200, total_batches: 3 };
        let snapshot = Snapshot { frames: 0, batches: 0, elapsed: Duration::from_secs(5) };

        assert!(line.message(&snapshot, false).ends_with("ETA: inf"));
        let finished = line.message(&snapshot, true);
        assert!(finished.starts_with("Video 1/2 | Batches: 0/3"));
        assert!(finished.ends_with("ETA: 0.0 min"));
    }

    #[test]
    fn reporter_stops_promptly() {
        let progress = Progress::new();
        let reporter = Reporter::start(progress.clone(), "Video 1/1".to_string(), 10, 1);
        progress.add_frames(10);
        let started = Instant::now();
        reporter.finish();
        assert!(started.elapsed() < REPORT_INTERVAL);
    }
}
