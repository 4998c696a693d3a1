//! RecordingSupervisor - external encoder process lifecycle
//!
//! ## Responsibilities
//!
//! - Spawn one ffmpeg process per recording stream
//! - Start protocol: spawn, settle, liveness check, all under one timeout
//! - Stop protocol: quit command on stdin, graceful wait, forced kill fallback
//! - Output verification (existence + minimum size)
//! - Recording directory queries and deletion
//!
//! The supervisor never performs liveness waits that would close the child's
//! stdin; ffmpeg interprets stdin EOF as a quit request, so stdin stays open
//! for the whole recording and is only written to (and closed) at stop time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::error::{Error, Result};

pub mod profile;

pub use profile::StreamProtocol;

/// Hard cap on one recording segment, enforced by the encoder itself
const MAX_SEGMENT_SECS: u32 = 3600;
/// An output below this size is noise from a failed run, not a recording
const MIN_VALID_OUTPUT_BYTES: u64 = 1024;

/// Protocol wait intervals. Injectable so tests run in milliseconds.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Budget for the whole start protocol (spawn + settle + check)
    pub start_timeout: Duration,
    /// Pause between spawn and the liveness check
    pub spawn_settle: Duration,
    /// Budget for a graceful exit after the quit command
    pub stop_timeout: Duration,
    /// Pause before inspecting the output file after a clean exit
    pub fs_settle: Duration,
    /// Pause after a forced kill before abandoning the process
    pub kill_grace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            spawn_settle: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(8),
            fs_settle: Duration::from_secs(1),
            kill_grace: Duration::from_secs(1),
        }
    }
}

/// A live encoder process writing one output file.
#[derive(Debug)]
pub struct RecordingSession {
    child: Child,
    output_path: PathBuf,
    uri: String,
    protocol: StreamProtocol,
    started_at: DateTime<Utc>,
    sequence: u32,
}

impl RecordingSession {
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn protocol(&self) -> StreamProtocol {
        self.protocol
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited on its own after the quit command
    Graceful,
    /// Ignored the quit command and was killed
    Forced,
    /// Was already gone when the stop was requested
    AlreadyExited { clean: bool },
}

/// Result of stopping one session
#[derive(Debug)]
pub struct StopOutcome {
    pub termination: Termination,
    pub verification: Verification,
}

/// State of a recording's output file after its encoder ended
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Exists and exceeds the minimum valid size
    Valid(VerifiedFile),
    /// Exists but is too small to be a usable recording
    TooSmall { path: PathBuf, size_bytes: u64 },
    /// Was never written
    Missing,
}

impl Verification {
    /// The verified file, if the output passed
    pub fn into_file(self) -> Option<VerifiedFile> {
        match self {
            Verification::Valid(file) => Some(file),
            _ => None,
        }
    }
}

/// An output file that passed verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// One file in the recordings directory
#[derive(Debug, Clone, Serialize)]
pub struct RecordingFileInfo {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// RecordingSupervisor instance
pub struct RecordingSupervisor {
    encoder_bin: String,
    recordings_dir: PathBuf,
    timing: Timing,
}

impl RecordingSupervisor {
    pub async fn new(
        encoder_bin: impl Into<String>,
        recordings_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let recordings_dir = recordings_dir.into();
        fs::create_dir_all(&recordings_dir).await?;
        Ok(Self {
            encoder_bin: encoder_bin.into(),
            recordings_dir,
            timing: Timing::default(),
        })
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    fn output_path(&self, sequence: u32) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        self.recordings_dir
            .join(format!("REC_{}_{}.mp4", stamp, sequence))
    }

    /// Start a recording for `uri`.
    ///
    /// The encoder is spawned, given `spawn_settle` to come up, then polled
    /// once; a process that already exited means the source is unreachable
    /// or the arguments were rejected. The whole sequence runs under
    /// `start_timeout`.
    pub async fn start(&self, uri: &str, sequence: u32) -> Result<RecordingSession> {
        let output_path = self.output_path(sequence);
        let protocol = StreamProtocol::classify(uri);
        let args = profile::recording_args(uri, MAX_SEGMENT_SECS);

        tracing::info!(
            uri = %uri,
            protocol = ?protocol,
            output = %output_path.display(),
            "Starting recording"
        );

        let mut cmd = Command::new(&self.encoder_bin);
        cmd.args(&args)
            .arg(&output_path)
            .stdin(Stdio::piped())
            // stdout/stderr are never drained; pipes here would stall the
            // encoder once the buffer fills.
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let settle = self.timing.spawn_settle;
        let spawn_and_check = async {
            let mut child = cmd
                .spawn()
                .map_err(|e| Error::FailedToStart(format!("{}: {}", uri, e)))?;
            // wait() would close stdin, which the encoder treats as a quit
            // request, so liveness is checked with try_wait only.
            tokio::time::sleep(settle).await;
            match child.try_wait() {
                Ok(Some(status)) => Err(Error::FailedToStart(format!(
                    "encoder for {} exited immediately ({})",
                    uri, status
                ))),
                Ok(None) => Ok(child),
                Err(e) => {
                    let _ = child.start_kill();
                    Err(Error::FailedToStart(format!("{}: {}", uri, e)))
                }
            }
        };

        let child = timeout(self.timing.start_timeout, spawn_and_check)
            .await
            .map_err(|_| {
                Error::FailedToStart(format!(
                    "encoder for {} did not come up within {:?}",
                    uri, self.timing.start_timeout
                ))
            })??;

        tracing::info!(uri = %uri, pid = ?child.id(), "Recording started");

        Ok(RecordingSession {
            child,
            output_path,
            uri: uri.to_string(),
            protocol,
            started_at: Utc::now(),
            sequence,
        })
    }

    /// Stop a session and verify its output.
    ///
    /// A session that already exited is reported as such; a live one gets
    /// the quit command and `stop_timeout` to finish writing the MP4
    /// trailer, after which it is killed. Verification runs in every case,
    /// so the termination is always reported alongside whatever the encoder
    /// left on disk, including a partial file after a forced kill.
    pub async fn stop(&self, mut session: RecordingSession) -> StopOutcome {
        match session.child.try_wait() {
            Ok(Some(status)) => {
                let clean = status.success();
                tracing::info!(
                    uri = %session.uri,
                    status = %status,
                    "Encoder already exited before stop"
                );
                let verification = self.settle_and_verify(&session.output_path).await;
                return StopOutcome {
                    termination: Termination::AlreadyExited { clean },
                    verification,
                };
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(uri = %session.uri, error = %e, "Could not poll encoder state");
            }
        }

        // 'q' asks ffmpeg to finalize the output; dropping stdin afterwards
        // closes the pipe, which doubles as a quit signal.
        if let Some(mut stdin) = session.child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q\n").await {
                tracing::debug!(uri = %session.uri, error = %e, "Quit command not delivered");
            }
        }

        match timeout(self.timing.stop_timeout, session.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(uri = %session.uri, status = %status, "Encoder stopped");
                let verification = self.settle_and_verify(&session.output_path).await;
                StopOutcome {
                    termination: Termination::Graceful,
                    verification,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(uri = %session.uri, error = %e, "Encoder wait failed, killing");
                self.force_kill(&mut session.child).await;
                let verification = self.settle_and_verify(&session.output_path).await;
                StopOutcome {
                    termination: Termination::Forced,
                    verification,
                }
            }
            Err(_) => {
                tracing::warn!(
                    uri = %session.uri,
                    timeout = ?self.timing.stop_timeout,
                    "Encoder ignored quit command, killing"
                );
                self.force_kill(&mut session.child).await;
                let verification = self.settle_and_verify(&session.output_path).await;
                StopOutcome {
                    termination: Termination::Forced,
                    verification,
                }
            }
        }
    }

    async fn force_kill(&self, child: &mut Child) {
        let _ = child.start_kill();
        let _ = timeout(self.timing.kill_grace, child.wait()).await;
    }

    async fn settle_and_verify(&self, path: &Path) -> Verification {
        // Give the filesystem a moment to flush the trailer.
        tokio::time::sleep(self.timing.fs_settle).await;
        self.verify_output(path).await
    }

    async fn verify_output(&self, path: &Path) -> Verification {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() && meta.len() > MIN_VALID_OUTPUT_BYTES => {
                Verification::Valid(VerifiedFile {
                    path: path.to_path_buf(),
                    size_bytes: meta.len(),
                })
            }
            Ok(meta) if meta.is_file() => Verification::TooSmall {
                path: path.to_path_buf(),
                size_bytes: meta.len(),
            },
            _ => Verification::Missing,
        }
    }

    /// MP4 files currently in the recordings directory, sorted by name
    pub async fn list_recordings(&self) -> Result<Vec<RecordingFileInfo>> {
        let mut entries = fs::read_dir(&self.recordings_dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("mp4") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            files.push(RecordingFileInfo {
                name,
                size_bytes: meta.len(),
                modified: meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Delete one file from the recordings directory by bare name
    pub async fn delete_recording(&self, name: &str) -> Result<()> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(Error::Config(format!("invalid recording name: {}", name)));
        }
        let path = self.recordings_dir.join(name);
        if fs::metadata(&path).await.is_err() {
            return Err(Error::NotFound(format!("recording {}", name)));
        }
        fs::remove_file(&path).await?;
        tracing::info!(name = %name, "Recording deleted");
        Ok(())
    }
}
