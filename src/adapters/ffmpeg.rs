//! Media engine backed by the `ffmpeg` command line tool.

use crate::ports::media::{MediaEngine, MediaError, MuxInputs, TranscodeProfile};
use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Keep only the tail of ffmpeg's stderr; the useful part is at the end.
const STDERR_TAIL: usize = 4000;

#[derive(Clone, Debug)]
pub struct FfmpegEngine {
    binary: PathBuf,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, operation: &'static str, args: Vec<OsString>) -> Result<(), MediaError> {
        debug!(operation, binary = %self.binary.display(), ?args, "running ffmpeg");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(operation, e))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(MediaError::NonZeroExit {
            operation,
            exit_code: output.status.code(),
            stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
        })
    }

    fn spawn_error(&self, operation: &'static str, err: io::Error) -> MediaError {
        if err.kind() == io::ErrorKind::NotFound {
            MediaError::EngineNotFound(self.binary.display().to_string())
        } else {
            MediaError::Io {
                operation,
                source: err,
            }
        }
    }
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

async fn require_input(operation: &'static str, path: &Path) -> Result<(), MediaError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(_) => Err(MediaError::InvalidInput {
            operation,
            reason: format!("{} is empty or not a file", path.display()),
        }),
        Err(_) => Err(MediaError::InvalidInput {
            operation,
            reason: format!("{} does not exist", path.display()),
        }),
    }
}

fn args<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

pub(crate) fn fix_timestamps_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut a = args(["-y", "-nostdin", "-fflags", "+genpts", "-i"]);
    a.push(input.into());
    a.extend(args(["-c", "copy", "-avoid_negative_ts", "make_zero"]));
    a.push(output.into());
    a
}

pub(crate) fn transcode_args(input: &Path, output: &Path, profile: TranscodeProfile) -> Vec<OsString> {
    let mut a = args(["-y", "-nostdin", "-i"]);
    a.push(input.into());
    match profile {
        TranscodeProfile::H264Video => {
            a.extend(args(["-an", "-c:v", "libx264", "-preset", "medium", "-crf", "23"]));
        }
        TranscodeProfile::AacAudio => {
            a.extend(args(["-vn", "-c:a", "aac", "-b:a", "128k"]));
        }
        TranscodeProfile::PcmWaveform => {
            a.extend(args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"]));
        }
    }
    a.push(output.into());
    a
}

pub(crate) fn mux_args(inputs: &MuxInputs, output: &Path) -> Vec<OsString> {
    let mut a = args(["-y", "-nostdin", "-i"]);
    a.push(inputs.video.as_os_str().into());
    a.push("-i".into());
    a.push(inputs.audio.as_os_str().into());
    if let Some(srt) = &inputs.subtitles {
        a.push("-i".into());
        a.push(srt.as_os_str().into());
    }

    a.extend(args(["-map", "0:v:0", "-map", "1:a:0"]));
    if inputs.subtitles.is_some() {
        a.extend(args(["-map", "2:s:0"]));
    }
    a.extend(args(["-c:v", "copy", "-c:a", "copy"]));
    if inputs.subtitles.is_some() {
        a.extend(args([
            "-c:s",
            "mov_text",
            "-metadata:s:s:0",
            "language=eng",
        ]));
    }
    a.push("-shortest".into());
    a.push(output.into());
    a
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn check_available(&self) -> Result<(), MediaError> {
        self.run("version check", args(["-version"])).await?;
        info!(binary = %self.binary.display(), "ffmpeg is available");
        Ok(())
    }

    /// WebM fragments from the recorder are continuation clusters of one
    /// stream, so they are joined byte for byte. `fix_timestamps` repairs the
    /// result.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), MediaError> {
        const OP: &str = "concat";
        if inputs.is_empty() {
            return Err(MediaError::InvalidInput {
                operation: OP,
                reason: "no input files".to_string(),
            });
        }

        let io_err = |source| MediaError::Io {
            operation: OP,
            source,
        };

        let mut out = tokio::fs::File::create(output).await.map_err(io_err)?;
        for input in inputs {
            require_input(OP, input).await?;
            let mut file = tokio::fs::File::open(input).await.map_err(io_err)?;
            tokio::io::copy(&mut file, &mut out).await.map_err(io_err)?;
        }
        out.flush().await.map_err(io_err)?;

        debug!(count = inputs.len(), output = %output.display(), "concatenated fragments");
        Ok(())
    }

    async fn fix_timestamps(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        require_input("fix timestamps", input).await?;
        self.run("fix timestamps", fix_timestamps_args(input, output))
            .await
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        profile: TranscodeProfile,
    ) -> Result<(), MediaError> {
        require_input("transcode", input).await?;
        self.run("transcode", transcode_args(input, output, profile))
            .await
    }

    async fn mux(&self, inputs: &MuxInputs, output: &Path) -> Result<(), MediaError> {
        require_input("mux", &inputs.video).await?;
        require_input("mux", &inputs.audio).await?;
        if let Some(srt) = &inputs.subtitles {
            require_input("mux", srt).await?;
        }
        self.run("mux", mux_args(inputs, output)).await
    }
}
