use crate::arguments::Config;
use crate::error::Error;
use crate::toolkit;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Upscales every image of `input_dir` into `output_dir`, keeping file names.
pub trait Upscaler: Sync + Send {
    fn upscale(&self, input_dir: &Path, output_dir: &Path, timeout: Duration) -> Result<(), Error>;
}

/// The `realesrgan-ncnn-vulkan` command line engine.
pub struct RealEsrgan {
    binary: PathBuf,
    model: String,
    scale: u32,
    tile_size: u32,
    extra_args: Vec<String>,
}

impl RealEsrgan {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.engine_binary.clone(),
            model: config.model.clone(),
            scale: config.scale,
            tile_size: config.tile_size,
            extra_args: config.engine_args.clone(),
        }
    }

    fn command(&self, input_dir: &Path, output_dir: &Path) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i").arg(input_dir)
            .arg("-o").arg(output_dir)
            .args(["-n", &self.model])
            .args(["-s", &self.scale.to_string()])
            .args(["-t", &self.tile_size.to_string()])
            .args(&self.extra_args);
        command
    }
}

impl Upscaler for RealEsrgan {
    fn upscale(&self, input_dir: &Path, output_dir: &Path, timeout: Duration) -> Result<(), Error> {
        toolkit::run(&mut self.command(input_dir, output_dir), Some(timeout)).map(drop)
    }
}

impl std::fmt::Display for RealEsrgan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (x{}, tile {})", self.model, self.scale, self.tile_size)
    }
}
