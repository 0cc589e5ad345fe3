use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Extensions the transcoder normalizes before publishing.
pub const TRANSCODABLE_EXTENSIONS: [&str; 5] = ["mp4", "mov", "m4v", "avi", "webm"];

/// Extensions the remote accepts on the video publish route.
pub const VIDEO_ROUTE_EXTENSIONS: [&str; 3] = ["mp4", "mov", "m4v"];

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Suffix of the transcoder output written next to a publish candidate.
pub const TRANSCODED_SUFFIX: &str = ".ig.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        if has_extension(path, &TRANSCODABLE_EXTENSIONS) {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// Which remote call a file is published through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishRoute {
    Image,
    Video,
}

impl PublishRoute {
    pub fn for_path(path: &Path) -> Self {
        if has_extension(path, &VIDEO_ROUTE_EXTENSIONS) {
            PublishRoute::Video
        } else {
            PublishRoute::Image
        }
    }
}

/// A locally produced file waiting to be published.
#[derive(Debug, Clone, Serialize)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub byte_size: u64,
    pub container: Option<String>,
}

impl MediaAsset {
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let meta = tokio::fs::metadata(&path).await?;
        Ok(Self {
            kind: MediaKind::from_path(&path),
            byte_size: meta.len(),
            container: extension(&path),
            path,
        })
    }
}

/// Sibling path used as the transcoder target, e.g. `clip.mov` -> `clip.ig.mp4`.
pub fn transcode_target(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{TRANSCODED_SUFFIX}"))
}

pub fn is_transcoder_output(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().ends_with(TRANSCODED_SUFFIX))
        .unwrap_or(false)
}

pub fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_lowercase())
}

pub fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    extension(path)
        .map(|ext| allowed.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Audio handling for one encoder pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPolicy {
    /// Keep the audio track, re-encoded at the configured bitrate.
    Retain,
    /// Drop the audio track entirely.
    Strip,
}

/// Encoder passes in the order they are attempted. Stripping audio is only
/// ever a fallback.
pub const PASS_ORDER: [AudioPolicy; 2] = [AudioPolicy::Retain, AudioPolicy::Strip];

/// Platform target the publisher normalizes videos to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub crf: u8,
    pub audio_bitrate: String,
}

impl Default for VideoProfile {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1080,
            fps: 30,
            crf: 23,
            audio_bitrate: "128k".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    /// Where to write the result; a uuid-named sibling of `input` when unset.
    pub output: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Constant rate factor passed to the encoder.
    pub crf: u8,
    pub audio_bitrate: String,
}

impl TranscodeRequest {
    #[cfg(test)]
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self::for_profile(input, &VideoProfile::default())
    }

    pub fn for_profile(input: impl Into<PathBuf>, profile: &VideoProfile) -> Self {
        Self {
            input: input.into(),
            output: None,
            width: profile.width,
            height: profile.height,
            fps: profile.fps,
            crf: profile.crf,
            audio_bitrate: profile.audio_bitrate.clone(),
        }
    }

    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Scale the dimension that overflows the target aspect to fit, let the
    /// encoder derive the other one (`-2` keeps it even), then pad both to even.
    pub fn filter_chain(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!(
            "scale='if(gt(a,{w}/{h}),{w},-2)':'if(gt(a,{w}/{h}),-2,{h})',pad=ceil(iw/2)*2:ceil(ih/2)*2"
        )
    }
}

/// Frame size the filter chain produces for a `src_w`x`src_h` input.
pub fn fitted_frame(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (even_ceil(target_w), even_ceil(target_h));
    }

    let wider = u64::from(src_w) * u64::from(target_h) > u64::from(target_w) * u64::from(src_h);
    let (w, h) = if wider {
        (target_w, rescale_even(target_w, src_h, src_w))
    } else {
        (rescale_even(target_h, src_w, src_h), target_h)
    };

    (even_ceil(w), even_ceil(h))
}

// Mirrors the encoder's `-2` handling: round(a * b / (c * 2)) * 2.
fn rescale_even(a: u32, b: u32, c: u32) -> u32 {
    let num = u64::from(a) * u64::from(b);
    let den = u64::from(c) * 2;
    ((((num + den / 2) / den) * 2) as u32).max(2)
}

fn even_ceil(v: u32) -> u32 {
    v.div_ceil(2) * 2
}
