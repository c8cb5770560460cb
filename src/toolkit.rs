use crate::arguments::Config;
use crate::error::Error;
use crate::frame::FRAME_PATTERN;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Process boundary to the video toolkit: probing, extraction, transcoding and muxing.
pub trait VideoToolkit: Send + Sync {
    /// Raw `nokey` probe output for the first video stream, one value per line.
    fn probe_stream(&self, input: &Path, entries: &str) -> Result<String, Error>;
    fn probe_format_duration(&self, input: &Path) -> Result<String, Error>;
    fn remux(&self, input: &Path, output: &Path) -> Result<(), Error>;
    fn reencode(&self, input: &Path, output: &Path, fps: u32) -> Result<(), Error>;
    fn extract_frames(&self, input: &Path, start: f64, duration: f64, fps: u32, output_dir: &Path) -> Result<(), Error>;
    fn generate_placeholder(&self, output: &Path, duration: f64, fps: u32, width: u32, height: u32) -> Result<(), Error>;
    fn concat_frames(&self, edit_list: &Path, fps: u32, encode_args: &[String], output: &Path) -> Result<(), Error>;
    fn concat_segments(&self, list: &Path, output: &Path) -> Result<(), Error>;
    fn merge_audio(&self, video: &Path, source: &Path, output: &Path) -> Result<(), Error>;
}

pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            ffprobe: config.ffprobe.clone(),
        }
    }

    fn ffmpeg(&self) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command.args(["-hide_banner", "-loglevel", "error"]);
        command
    }

    fn ffprobe(&self) -> Command {
        let mut command = Command::new(&self.ffprobe);
        command.args(["-v", "error"]);
        command
    }
}

impl VideoToolkit for Ffmpeg {
    fn probe_stream(&self, input: &Path, entries: &str) -> Result<String, Error> {
        let mut command = self.ffprobe();
        command
            .args(["-select_streams", "v:0", "-show_entries", entries])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input);
        run(&mut command, None)
    }

    fn probe_format_duration(&self, input: &Path) -> Result<String, Error> {
        let mut command = self.ffprobe();
        command
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input);
        run(&mut command, None)
    }

    fn remux(&self, input: &Path, output: &Path) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command.arg("-y").arg("-i").arg(input).args(["-c", "copy"]).arg(output);
        run(&mut command, None).map(drop)
    }

    fn reencode(&self, input: &Path, output: &Path, fps: u32) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command
            .arg("-y")
            .arg("-i").arg(input)
            .args(["-r", &fps.to_string()])
            .args(["-c:v", "libx264", "-preset", "fast", "-crf", "18"])
            .arg(output);
        run(&mut command, None).map(drop)
    }

    fn extract_frames(&self, input: &Path, start: f64, duration: f64, fps: u32, output_dir: &Path) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command
            .args(["-ss", &start.to_string(), "-t", &duration.to_string()])
            .arg("-y")
            .arg("-i").arg(input)
            .args(["-r", &fps.to_string()])
            .arg(output_dir.join(FRAME_PATTERN));
        run(&mut command, None).map(drop)
    }

    fn generate_placeholder(&self, output: &Path, duration: f64, fps: u32, width: u32, height: u32) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command
            .args(["-y", "-f", "lavfi"])
            .args(["-i", &format!("color=c=black:s={}x{}:d={}", width, height, duration)])
            .args(["-r", &fps.to_string()])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(output);
        run(&mut command, None).map(drop)
    }

    fn concat_frames(&self, edit_list: &Path, fps: u32, encode_args: &[String], output: &Path) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command
            .args(["-f", "concat", "-safe", "0"])
            .arg("-i").arg(edit_list)
            .args(["-r", &fps.to_string()])
            .args(encode_args)
            .arg("-y")
            .arg(output);
        run(&mut command, None).map(drop)
    }

    fn concat_segments(&self, list: &Path, output: &Path) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command
            .args(["-f", "concat", "-safe", "0", "-y"])
            .arg("-i").arg(list)
            .args(["-c", "copy"])
            .arg(output);
        run(&mut command, None).map(drop)
    }

    fn merge_audio(&self, video: &Path, source: &Path, output: &Path) -> Result<(), Error> {
        let mut command = self.ffmpeg();
        command
            .arg("-y")
            .arg("-i").arg(video)
            .arg("-i").arg(source)
            .args(["-map", "0:v", "-map", "1:a?"])
            .args(["-c", "copy", "-map_metadata", "1"])
            .arg(output);
        run(&mut command, None).map(drop)
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs a command to completion and returns its stdout.
///
/// Both pipes are drained on helper threads so a chatty child never blocks on a
/// full pipe. With a timeout the child is killed once it overruns.
pub fn run(command: &mut Command, timeout: Option<Duration>) -> Result<String, Error> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn { program: program.clone(), source })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        Some(timeout) => match wait_with_timeout(&mut child, timeout)? {
            Some(status) => status,
            None => return Err(Error::Timeout { program, timeout }),
        },
        None => child.wait()?,
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    if status.success() {
        Ok(stdout)
    } else {
        let output = [stderr.trim(), stdout.trim()]
            .iter()
            .filter(|text| !text.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        Err(Error::Process { program, status: status.to_string(), output })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut bytes);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>, Error> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Quotes a path for an ffconcat `file` directive.
pub fn quote_concat_path(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\\', "\\\\").replace('\'', "'\\''");
    format!("'{}'", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_backslashes_and_single_quotes() {
        assert_eq!(quote_concat_path(Path::new("/tmp/a.mp4")), "'/tmp/a.mp4'");
        assert_eq!(quote_concat_path(Path::new("/tmp/it's.mp4")), "'/tmp/it'\\''s.mp4'");
        assert_eq!(quote_concat_path(Path::new("C:\\x\\a.mp4")), "'C:\\\\x\\\\a.mp4'");
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_on_success() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo 30000/1001"]);
        assert_eq!(run(&mut command, None).unwrap().trim(), "30000/1001");
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_carries_output() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo broken >&2; exit 3"]);
        match run(&mut command, None) {
            Err(Error::Process { program, output, .. }) => {
                assert_eq!(program, "sh");
                assert_eq!(output, "broken");
            }
            other => panic!("expected process error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn overrunning_child_is_killed() {
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let started = Instant::now();
        let result = run(&mut command, Some(Duration::from_millis(200)));
        assert!(matches!(result, Err(Error::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let mut command = Command::new("definitely-not-an-installed-tool");
        assert!(matches!(run(&mut command, None), Err(Error::Spawn { .. })));
    }
}
