use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{error, info, warn};

use crate::common::error::Halt;
use crate::modules::media::model::{
    IMAGE_EXTENSIONS, MediaAsset, TRANSCODABLE_EXTENSIONS, has_extension, is_transcoder_output,
};
use crate::modules::publish::orchestrator::{PublishOutcome, Publisher};
use crate::state::AppState;

const PUBLISHED_DIR: &str = "published";
const FAILED_DIR: &str = "failed";

/// Exhausted cycles after which an asset is moved out of the spool.
pub const MAX_SPOOL_FAILURES: u32 = 3;

#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Idle,
    Published(PathBuf),
    Failed(PathBuf),
    /// Failed [`MAX_SPOOL_FAILURES`] times and was moved to `failed/`.
    Quarantined(PathBuf),
}

/// Spool directory plus the exhausted-cycle count of each pending asset.
///
/// Assets with fewer failures go first, so one rejected file never starves
/// the rest. Counts live in memory and reset on restart.
#[derive(Debug)]
pub struct Spool {
    dir: PathBuf,
    failures: HashMap<PathBuf, u32>,
    max_failures: u32,
}

impl Spool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            failures: HashMap::new(),
            max_failures: MAX_SPOOL_FAILURES,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Publishable file with the fewest failures, oldest name first.
    pub async fn next_asset(&self) -> std::io::Result<Option<PathBuf>> {
        let candidates = spooled_media(&self.dir).await?;
        Ok(candidates
            .into_iter()
            .min_by_key(|path| (self.failures.get(path).copied().unwrap_or(0), path.clone())))
    }

    /// Counts an exhausted cycle. Returns `true` once the asset was moved to
    /// `failed/`.
    async fn record_failure(&mut self, asset: &Path) -> std::io::Result<bool> {
        let count = self.failures.entry(asset.to_path_buf()).or_insert(0);
        *count += 1;
        if *count < self.max_failures {
            return Ok(false);
        }

        self.failures.remove(asset);
        self.move_out(asset, FAILED_DIR).await?;
        Ok(true)
    }

    async fn archive(&mut self, asset: &Path) -> std::io::Result<()> {
        self.failures.remove(asset);
        self.move_out(asset, PUBLISHED_DIR).await
    }

    /// Moves `asset` and its caption into `sub`. A caption still needed by
    /// another spooled asset with the same stem stays put.
    async fn move_out(&self, asset: &Path, sub: &str) -> std::io::Result<()> {
        let dest = self.dir.join(sub);
        tokio::fs::create_dir_all(&dest).await?;

        let caption = caption_path(asset);
        let shared = spooled_media(&self.dir)
            .await?
            .iter()
            .any(|other| other != asset && caption_path(other) == caption);

        let mut moves = vec![asset.to_path_buf()];
        if !shared {
            moves.push(caption);
        }
        for path in moves {
            let Some(name) = path.file_name() else {
                continue;
            };
            match tokio::fs::rename(&path, dest.join(name)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Publishes one spooled asset per interval until the safety latch stops it
/// or the process receives ctrl-c.
pub async fn start_publisher_worker(state: AppState) -> Result<()> {
    let mut spool = Spool::new(state.config.spool_dir.clone());
    let interval = Duration::from_secs(state.config.post_interval_secs);
    tokio::fs::create_dir_all(spool.dir()).await?;

    info!(
        "🎬 Publisher worker watching '{}' every {}s",
        spool.dir().display(),
        interval.as_secs()
    );

    loop {
        match run_cycle(&state.publisher, &mut spool, &state.config.default_caption).await {
            Ok(CycleOutcome::Idle) => info!("Spool is empty, nothing to publish"),
            Ok(CycleOutcome::Published(path)) => info!("✅ Published {}", path.display()),
            Ok(CycleOutcome::Failed(path)) => {
                warn!("Publishing {} failed, will retry next cycle", path.display())
            }
            Ok(CycleOutcome::Quarantined(path)) => warn!(
                "Publishing {} failed {} times, moved to '{}'",
                path.display(),
                MAX_SPOOL_FAILURES,
                FAILED_DIR
            ),
            Err(halt) => {
                error!("❌ Publisher stopped due to platform block: {}", halt);
                return Err(anyhow!(halt));
            }
        }

        info!("Sleeping {} seconds", interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested, stopping publisher worker");
                return Ok(());
            }
        }
    }
}

/// Publishes the next spooled asset, if any. Only a [`Halt`] is an error.
pub async fn run_cycle(
    publisher: &Publisher,
    spool: &mut Spool,
    default_caption: &str,
) -> Result<CycleOutcome, Halt> {
    let asset = match spool.next_asset().await {
        Ok(Some(asset)) => asset,
        Ok(None) => return Ok(CycleOutcome::Idle),
        Err(e) => {
            error!("Failed to scan spool {}: {}", spool.dir().display(), e);
            return Ok(CycleOutcome::Idle);
        }
    };

    match MediaAsset::from_path(&asset).await {
        Ok(media) => info!(
            "Next in spool: {} ({:?}, {} bytes)",
            media.path.display(),
            media.kind,
            media.byte_size
        ),
        Err(e) => warn!("Could not stat {}: {}", asset.display(), e),
    }

    let caption = caption_for(&asset, default_caption).await;
    match publisher.publish(&asset, &caption).await? {
        PublishOutcome::Succeeded { .. } => {
            if let Err(e) = spool.archive(&asset).await {
                error!("Failed to archive {}: {}", asset.display(), e);
            }
            Ok(CycleOutcome::Published(asset))
        }
        PublishOutcome::Exhausted { .. } => match spool.record_failure(&asset).await {
            Ok(true) => Ok(CycleOutcome::Quarantined(asset)),
            Ok(false) => Ok(CycleOutcome::Failed(asset)),
            Err(e) => {
                error!("Failed to move {} out of the spool: {}", asset.display(), e);
                Ok(CycleOutcome::Failed(asset))
            }
        },
    }
}

/// Publishable files directly in `dir`, sorted by name, skipping transcoder
/// leftovers.
async fn spooled_media(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() || is_transcoder_output(&path) {
            continue;
        }
        if has_extension(&path, &TRANSCODABLE_EXTENSIONS) || has_extension(&path, &IMAGE_EXTENSIONS)
        {
            candidates.push(path);
        }
    }

    candidates.sort();
    Ok(candidates)
}

// Keyed on the stem, so `a.jpg` and `a.mp4` share `a.txt`.
fn caption_path(asset: &Path) -> PathBuf {
    asset.with_extension("txt")
}

/// Caption from a `<stem>.txt` sidecar, falling back to `default_caption`.
pub async fn caption_for(asset: &Path, default_caption: &str) -> String {
    match tokio::fs::read_to_string(caption_path(asset)).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => default_caption.to_string(),
    }
}
