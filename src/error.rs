use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    Process {
        program: String,
        status: String,
        output: String,
    },

    #[error("{program} did not finish within {}s", timeout.as_secs())]
    Timeout {
        program: String,
        timeout: Duration,
    },

    #[error("Failed to probe {}: {reason}", path.display())]
    Probe {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to convert {}: {source}", path.display())]
    Conversion {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("No batch produced a usable segment")]
    NoSegments,

    #[error("Failed to concatenate segments: {0}")]
    Concat(#[source] Box<Error>),

    #[error("Failed to merge audio and video: {0}")]
    Merge(#[source] Box<Error>),

    #[error("FFmpeg is not available on this system")]
    FFmpegNotAvailable,

    #[error("Invalid argument provided: {0}")]
    InvalidArgument(String),
}
