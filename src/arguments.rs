use crate::error::Error;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "batch_upscaler")]
#[command(about = "Upscale videos in time-bounded batches with an external upscaling engine")]
pub struct Arguments {
    /// Input video files, processed one after another
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Directory receiving the final videos
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Number of batches processed concurrently
    #[arg(short = 'j', long, default_value_t = 5)]
    pub max_concurrent_batches: usize,

    /// Upscaling model name passed to the engine
    #[arg(short, long, default_value = "realesr-animevideov3-x2")]
    pub model: String,

    /// Seconds to wait before submitting each batch
    #[arg(long, default_value_t = 10.0)]
    pub stagger_delay: f64,

    /// Scale factor; must match the model's native multiplier
    #[arg(short, long, default_value_t = 2)]
    pub scale: u32,

    /// Engine tile size (0 lets the engine choose)
    #[arg(short, long, default_value_t = 1920)]
    pub tile_size: u32,

    /// Extra arguments appended to every engine invocation
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub engine_args: String,

    /// Batch length in seconds (0 processes the whole video as one batch)
    #[arg(short, long, default_value_t = 20.0)]
    pub batch_length: f64,

    /// Encoding arguments used when reassembling upscaled frames
    #[arg(long, default_value = "-c:v libx265 -pix_fmt yuv420p", allow_hyphen_values = true)]
    pub reassembly_args: String,

    /// Final container extension, or "keep" to reuse the source container
    #[arg(long, default_value = ".mkv")]
    pub final_container: String,

    /// Seconds an engine attempt may run before it is killed
    #[arg(long, default_value_t = 600)]
    pub upscale_timeout: u64,

    /// Seconds to wait between engine attempts
    #[arg(long, default_value_t = 5)]
    pub retry_delay: u64,

    /// Path to the upscaling engine executable
    #[arg(long, default_value = "realesrgan-ncnn-vulkan")]
    pub engine_binary: PathBuf,

    /// Path to the ffmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Path to the ffprobe executable
    #[arg(long, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// Directory for temporary batch files (defaults to the system temp dir)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Immutable settings shared by the planner, scheduler and workers.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_concurrent_batches: usize,
    pub model: String,
    pub stagger_delay: Duration,
    pub scale: u32,
    pub tile_size: u32,
    pub engine_args: Vec<String>,
    pub batch_length: f64,
    pub reassembly_args: Vec<String>,
    pub final_container: Option<String>,
    pub upscale_timeout: Duration,
    pub retry_delay: Duration,
    pub engine_binary: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_batches: 5,
            model: String::from("realesr-animevideov3-x2"),
            stagger_delay: Duration::from_secs(10),
            scale: 2,
            tile_size: 1920,
            engine_args: Vec::new(),
            batch_length: 20.0,
            reassembly_args: split_args("-c:v libx265 -pix_fmt yuv420p"),
            final_container: Some(String::from(".mkv")),
            upscale_timeout: Duration::from_secs(600),
            retry_delay: Duration::from_secs(5),
            engine_binary: PathBuf::from("realesrgan-ncnn-vulkan"),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            work_dir: std::env::temp_dir(),
            output_dir: PathBuf::from("output"),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrent_batches == 0 {
            return Err(Error::InvalidArgument("max concurrent batches must be at least 1".to_string()));
        }
        if !(1..=4).contains(&self.scale) {
            return Err(Error::InvalidArgument(format!("scale must be 1, 2, 3, or 4, got {}", self.scale)));
        }
        if !self.batch_length.is_finite() || self.batch_length < 0.0 {
            return Err(Error::InvalidArgument(format!("batch length must be >= 0, got {}", self.batch_length)));
        }
        if self.model.trim().is_empty() {
            return Err(Error::InvalidArgument("model must not be empty".to_string()));
        }
        Ok(())
    }

    /// The reassembly stage is handed off to a background task when batches run one at a time.
    pub fn is_serial(&self) -> bool {
        self.max_concurrent_batches == 1
    }

    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let extension = match &self.final_container {
            Some(container) => container.clone(),
            None => source.extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default(),
        };
        self.output_dir.join(format!("{}{}", stem, extension))
    }

    pub fn check_ffmpeg(&self) -> Result<(), Error> {
        Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-version"])
            .output()
            .map(|_| ())
            .map_err(|_| Error::FFmpegNotAvailable)
    }
}

impl TryFrom<Arguments> for Config {
    type Error = Error;

    fn try_from(arguments: Arguments) -> Result<Self, Error> {
        for input in &arguments.inputs {
            if !input.is_file() {
                return Err(Error::InvalidArgument(format!("input is not a file: {}", input.display())));
            }
        }
        let stagger_delay = Duration::try_from_secs_f64(arguments.stagger_delay).map_err(|_| {
            Error::InvalidArgument(format!("stagger delay must be a non-negative number of seconds, got {}", arguments.stagger_delay))
        })?;

        let config = Self {
            max_concurrent_batches: arguments.max_concurrent_batches,
            model: arguments.model,
            stagger_delay,
            scale: arguments.scale,
            tile_size: arguments.tile_size,
            engine_args: split_args(&arguments.engine_args),
            batch_length: arguments.batch_length,
            reassembly_args: split_args(&arguments.reassembly_args),
            final_container: parse_container(&arguments.final_container),
            upscale_timeout: Duration::from_secs(arguments.upscale_timeout),
            retry_delay: Duration::from_secs(arguments.retry_delay),
            engine_binary: arguments.engine_binary,
            ffmpeg: arguments.ffmpeg,
            ffprobe: arguments.ffprobe,
            work_dir: arguments.work_dir.unwrap_or_else(std::env::temp_dir),
            output_dir: arguments.output_dir,
        };
        config.validate()?;
        Ok(config)
    }
}

pub fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_owned).collect()
}

fn parse_container(value: &str) -> Option<String> {
    let value = value.trim();
    match value.to_lowercase().as_str() {
        "" | "false" | "keep" => None,
        _ if value.starts_with('.') => Some(value.to_string()),
        _ => Some(format!(".{}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reassembly_args, vec!["-c:v", "libx265", "-pix_fmt", "yuv420p"]);
        assert!(!config.is_serial());
    }

    #[test]
    fn rejects_zero_pool_and_bad_scale() {
        let config = Config { max_concurrent_batches: 0, ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));

        let config = Config { scale: 5, ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));

        let config = Config { batch_length: -1.0, ..Config::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn container_override_and_keep() {
        assert_eq!(parse_container(".mp4"), Some(".mp4".to_string()));
        assert_eq!(parse_container("mkv"), Some(".mkv".to_string()));
        assert_eq!(parse_container("false"), None);
        assert_eq!(parse_container("keep"), None);
    }

    #[test]
    fn output_path_uses_override_or_source_extension() {
        let config = Config { output_dir: PathBuf::from("out"), ..Config::default() };
        assert_eq!(config.output_path(Path::new("in/clip.avi")), PathBuf::from("out/clip.mkv"));

        let config = Config { output_dir: PathBuf::from("out"), final_container: None, ..Config::default() };
        assert_eq!(config.output_path(Path::new("in/clip.avi")), PathBuf::from("out/clip.avi"));
    }

    #[test]
    fn arguments_convert_into_config() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"").unwrap();

        let arguments = Arguments::try_parse_from([
            "batch_upscaler",
            input.to_str().unwrap(),
            "-j", "1",
            "--stagger-delay", "0.5",
            "--engine-args", "-g 0 -j 1:2:2",
            "--final-container", "keep",
        ]).unwrap();
        let config = Config::try_from(arguments).unwrap();

        assert!(config.is_serial());
        assert_eq!(config.stagger_delay, Duration::from_millis(500));
        assert_eq!(config.engine_args, vec!["-g", "0", "-j", "1:2:2"]);
        assert_eq!(config.final_container, None);
    }

    #[test]
    fn out_of_range_stagger_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"").unwrap();

        for delay in ["1e20", "NaN", "inf"] {
            let arguments = Arguments::try_parse_from([
                "batch_upscaler",
                input.to_str().unwrap(),
                "--stagger-delay",
                delay,
            ]).unwrap();
            assert!(matches!(Config::try_from(arguments), Err(Error::InvalidArgument(_))), "accepted {}", delay);
        }
    }

    #[test]
    fn empty_model_is_named_in_the_error() {
        let config = Config { model: "  ".to_string(), ..Config::default() };
        let message = config.validate().unwrap_err().to_string();
        assert_eq!(message, "Invalid argument provided: model must not be empty");
    }

    #[test]
    fn missing_input_is_rejected() {
        let arguments = Arguments::try_parse_from(["batch_upscaler", "/definitely/not/here.mp4"]).unwrap();
        assert!(matches!(Config::try_from(arguments), Err(Error::InvalidArgument(_))));
    }
}
