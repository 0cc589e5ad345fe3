use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::inspector::{MediaInspector, ProbeReport};
use super::model::{AudioPolicy, PASS_ORDER, TranscodeRequest, fitted_frame};
use crate::common::error::ProcessError;
use crate::common::process::{self, STDERR_LOG_LIMIT};

pub const ENCODE_TIMEOUT: Duration = Duration::from_secs(240);

/// Normalizes videos into an H.264 baseline / yuv420p / fast-start MP4 the
/// platform accepts.
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: PathBuf,
    inspector: MediaInspector,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, inspector: MediaInspector) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            inspector,
            timeout: ENCODE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Encodes `req.input` and returns the path of the normalized file.
    ///
    /// Each pass of [`PASS_ORDER`] is tried once; a non-zero exit or timeout
    /// moves on to the next pass. When every pass fails, any partial output is
    /// removed and the untouched input path is returned so the caller can
    /// still publish the original asset.
    pub async fn normalize(&self, req: &TranscodeRequest) -> PathBuf {
        let output = req
            .output
            .clone()
            .unwrap_or_else(|| generated_output(&req.input));

        for (pass, policy) in PASS_ORDER.iter().enumerate() {
            if *policy == AudioPolicy::Strip {
                info!("Retrying by stripping audio for compatibility");
            }

            let args = encoder_args(req, &output, *policy);
            info!(
                "🎥 Running ffmpeg transcode (pass {}, audio {:?}): {} -> {}",
                pass + 1,
                policy,
                req.input.display(),
                output.display()
            );

            match process::run_with_timeout(&self.ffmpeg, &args, self.timeout).await {
                Ok(out) => {
                    debug!(
                        "ffmpeg stderr: {}",
                        process::truncate(&String::from_utf8_lossy(&out.stderr), STDERR_LOG_LIMIT)
                    );
                    // Diagnostics only; the outcome never changes the result.
                    if let Some(report) = self.inspector.inspect(&output).await {
                        check_frame(req, &report);
                    }
                    return output;
                }
                Err(ProcessError::NotFound { .. }) => {
                    warn!("ffmpeg not found, skipping transcode");
                    break;
                }
                Err(e @ ProcessError::Timeout { .. }) => {
                    warn!("ffmpeg transcode pass {} timed out: {}", pass + 1, e);
                }
                Err(e) => {
                    warn!("ffmpeg transcode pass {} failed: {}", pass + 1, e);
                }
            }
        }

        discard_partial(&output, &req.input).await;
        warn!(
            "All transcode passes failed, publishing original {}",
            req.input.display()
        );
        req.input.clone()
    }
}

fn check_frame(req: &TranscodeRequest, report: &ProbeReport) {
    let Some((w, h)) = report.video_stream().and_then(|v| v.width.zip(v.height)) else {
        warn!("Transcoded output has no video stream: {}", req.input.display());
        return;
    };
    if fitted_frame(w, h, req.width, req.height) != (w, h) {
        warn!(
            "Transcoded frame {}x{} does not fit {}x{}",
            w, h, req.width, req.height
        );
    }
    if !report.has_audio() {
        debug!("Transcoded output carries no audio");
    }
}

/// Full encoder argument list for one pass.
pub fn encoder_args(req: &TranscodeRequest, output: &Path, policy: AudioPolicy) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), req.input.clone().into()];

    for arg in [
        "-c:v", "libx264", "-preset", "veryfast", "-profile:v", "baseline", "-level", "3.1",
    ] {
        args.push(arg.into());
    }
    args.push("-crf".into());
    args.push(req.crf.to_string().into());
    args.push("-r".into());
    args.push(req.fps.to_string().into());
    args.push("-vf".into());
    args.push(req.filter_chain().into());
    args.push("-pix_fmt".into());
    args.push("yuv420p".into());

    match policy {
        AudioPolicy::Retain => {
            args.push("-c:a".into());
            args.push("aac".into());
            args.push("-b:a".into());
            args.push(req.audio_bitrate.clone().into());
        }
        AudioPolicy::Strip => args.push("-an".into()),
    }

    args.push("-movflags".into());
    args.push("+faststart".into());
    args.push(output.as_os_str().to_owned());
    args
}

fn generated_output(input: &Path) -> PathBuf {
    let dir = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    dir.join(format!("{}.mp4", Uuid::new_v4()))
}

async fn discard_partial(output: &Path, input: &Path) {
    if output == input {
        return;
    }
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!("Removed partial transcode output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove partial transcode output {}: {}",
            output.display(),
            e
        ),
    }
}
