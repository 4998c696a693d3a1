//! FrameCapture - single-frame grabs and motion snapshots
//!
//! ## Responsibilities
//!
//! - Pull one frame from a stream through the encoder binary
//! - Decode frames to grayscale for motion analysis
//! - Persist JPEG snapshots when motion is detected
//! - Probe encoder availability at startup

use chrono::Utc;
use image::GrayImage;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::recorder::StreamProtocol;

/// FrameCapture instance
pub struct FrameCapture {
    encoder_bin: String,
    snapshot_dir: PathBuf,
    grab_timeout: Duration,
}

impl FrameCapture {
    pub async fn new(
        encoder_bin: impl Into<String>,
        snapshot_dir: impl Into<PathBuf>,
        grab_timeout: Duration,
    ) -> Result<Self> {
        let snapshot_dir = snapshot_dir.into();
        fs::create_dir_all(&snapshot_dir).await?;
        Ok(Self {
            encoder_bin: encoder_bin.into(),
            snapshot_dir,
            grab_timeout,
        })
    }

    /// Grab one frame from `uri` as encoded JPEG bytes.
    ///
    /// The encoder writes to a hidden temp file which is read back and
    /// removed; a grab that exceeds `grab_timeout` is killed.
    pub async fn grab_jpeg(&self, uri: &str) -> Result<Vec<u8>> {
        let protocol = StreamProtocol::classify(uri);
        let tmp = self
            .snapshot_dir
            .join(format!(".grab_{}.jpg", Uuid::new_v4().simple()));

        let mut cmd = Command::new(&self.encoder_bin);
        cmd.args(protocol.input_args(uri))
            .args(["-frames:v", "1", "-q:v", "2", "-f", "image2", "-y"])
            .arg(&tmp)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let status = match timeout(self.grab_timeout, cmd.status()).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = fs::remove_file(&tmp).await;
                return Err(Error::Internal(format!(
                    "frame grab timed out after {:?} for {}",
                    self.grab_timeout, uri
                )));
            }
        };

        if !status.success() {
            let _ = fs::remove_file(&tmp).await;
            return Err(Error::Internal(format!(
                "frame grab for {} exited with {}",
                uri, status
            )));
        }

        let bytes = fs::read(&tmp).await?;
        let _ = fs::remove_file(&tmp).await;
        if bytes.is_empty() {
            return Err(Error::Internal(format!(
                "frame grab for {} produced no data",
                uri
            )));
        }
        Ok(bytes)
    }

    /// Grab one frame and decode it to grayscale
    pub async fn grab_frame(&self, uri: &str) -> Result<GrayImage> {
        let bytes = self.grab_jpeg(uri).await?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| Error::Internal(format!("frame decode failed for {}: {}", uri, e)))?;
        Ok(img.to_luma8())
    }

    /// Grab a frame and persist it as a motion snapshot.
    /// Returns the path of the written JPEG.
    pub async fn save_snapshot(&self, uri: &str, stream_id: Uuid) -> Result<PathBuf> {
        let bytes = self.grab_jpeg(uri).await?;
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let id = stream_id.simple().to_string();
        let path = self
            .snapshot_dir
            .join(format!("snapshot_{}_{}.jpg", stamp, &id[..8]));
        fs::write(&path, &bytes).await?;
        tracing::info!(path = %path.display(), "Motion snapshot saved");
        Ok(path)
    }

    /// First line of the encoder's `-version` output, None when the probe
    /// fails or times out
    pub async fn ffmpeg_version(&self) -> Option<String> {
        let mut cmd = Command::new(&self.encoder_bin);
        cmd.arg("-version").stdin(Stdio::null());
        match timeout(Duration::from_secs(3), cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let line = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                Some(line)
            }
            _ => None,
        }
    }

    /// Whether the configured encoder binary responds to -version
    pub async fn check_ffmpeg(&self) -> bool {
        self.ffmpeg_version().await.is_some()
    }
}
