use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::common::error::ProcessError;
use crate::common::process::{self, STDERR_LOG_LIMIT};

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub format: serde_json::Value,
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeStream {
    pub index: Option<u32>,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub pix_fmt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
}

impl ProbeReport {
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn has_audio(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    }
}

#[derive(Debug, Clone)]
pub struct MediaInspector {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl MediaInspector {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            timeout: PROBE_TIMEOUT,
        }
    }

    /// Probes `path` for diagnostics. Any failure is logged and yields `None`.
    pub async fn inspect(&self, path: &Path) -> Option<ProbeReport> {
        match self.probe(path).await {
            Ok(report) => {
                log_report(path, &report);
                Some(report)
            }
            Err(ProcessError::NotFound { .. }) => {
                warn!("ffprobe not found, skipping inspect of {}", path.display());
                None
            }
            Err(e) => {
                warn!("ffprobe failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn probe(&self, path: &Path) -> Result<ProbeReport, ProcessError> {
        let args: [&OsStr; 7] = [
            OsStr::new("-v"),
            OsStr::new("quiet"),
            OsStr::new("-print_format"),
            OsStr::new("json"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
            path.as_os_str(),
        ];
        let output = process::run_with_timeout(&self.ffprobe, args, self.timeout).await?;
        parse_report(&output.stdout).map_err(|e| ProcessError::Io {
            program: self.ffprobe.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

pub fn parse_report(stdout: &[u8]) -> Result<ProbeReport, serde_json::Error> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Ok(ProbeReport::default());
    }
    serde_json::from_str(&text)
}

fn log_report(path: &Path, report: &ProbeReport) {
    let format = serde_json::to_string_pretty(&report.format).unwrap_or_default();
    info!(
        "ffprobe format for {}: {}",
        path.display(),
        process::truncate(&format, STDERR_LOG_LIMIT)
    );
    for s in &report.streams {
        info!(
            "stream idx={:?} codec={:?} pix_fmt={:?} width={:?} height={:?} r_frame_rate={:?}",
            s.index, s.codec_name, s.pix_fmt, s.width, s.height, s.r_frame_rate
        );
    }
}
