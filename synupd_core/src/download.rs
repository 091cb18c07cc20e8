/*============================================================
  Synavera Project: Syn-Upd
  Module: synupd_core::download
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Stream an advertised artifact into the cache directory on a
    background task, publishing coalesced progress and a
    terminal state to a single observer.

  Security / Safety Notes:
    Writes only below the configured cache directory; the file
    name is the decoded last segment of a URL we built, and any
    partial file is removed on failure or cancellation.

  Dependencies:
    tokio (fs, watch, select), tokio-util CancellationToken,
    futures-util for body streams.

  Operational Scope:
    Driven by the `download` command; the retained artifact path
    is persisted for cleanup on the next run.

  Revision History:
    2025-11-12 COD  Authored cancellable download pipeline.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Latest-value-wins progress, observer never blocks writer
    - Cooperative cancellation at chunk boundaries
    - Guaranteed removal of partial artifacts
============================================================*/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::ArtifactSource;
use crate::error::{Result, SynupdError};
use crate::logger::Logger;
use crate::manifest::AvailableVersion;
use crate::state::StateStore;

/// Read and write granularity.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Snapshot of transfer progress. `bytes_total` is 0 when unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl DownloadProgress {
    /// Whole percent complete, or `None` when the total is unknown.
    pub fn percent(&self) -> Option<u64> {
        (self.bytes_total > 0).then(|| percent_of(self.bytes_done, self.bytes_total))
    }
}

/// Pipeline lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadState {
    Idle,
    Fetching,
    Streaming,
    Completed(PathBuf),
    Failed(String),
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed(_) | DownloadState::Failed(_) | DownloadState::Cancelled
        )
    }
}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    pub bytes: u64,
}

/// Handle to a running download.
pub struct DownloadTask {
    version: AvailableVersion,
    save_path: PathBuf,
    cancel: CancellationToken,
    progress: watch::Receiver<DownloadProgress>,
    state: watch::Receiver<DownloadState>,
    handle: JoinHandle<Result<DownloadOutcome>>,
}

impl DownloadTask {
    /// Resolve the artifact location and start the transfer in the background.
    pub fn start(
        source: Arc<dyn ArtifactSource>,
        store: StateStore,
        version: AvailableVersion,
        download_base: &str,
        cache_dir: &Path,
        logger: Arc<Logger>,
    ) -> Result<Self> {
        let url = version.download_url(download_base)?;
        let name = last_path_segment(&url).ok_or_else(|| {
            SynupdError::InvalidArtifact(format!("No file name in artifact URL {url}"))
        })?;
        let save_path = cache_dir.join(name);

        let (progress_tx, progress_rx) = watch::channel(DownloadProgress::default());
        let (state_tx, state_rx) = watch::channel(DownloadState::Idle);
        let cancel = CancellationToken::new();

        let pipeline = Pipeline {
            source,
            store,
            url,
            save_path: save_path.clone(),
            cancel: cancel.clone(),
            progress: progress_tx,
            state: state_tx,
            logger,
        };
        let handle = tokio::spawn(pipeline.run());

        Ok(Self {
            version,
            save_path,
            cancel,
            progress: progress_rx,
            state: state_rx,
            handle,
        })
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn version(&self) -> &AvailableVersion {
        &self.version
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    /// Latest-value progress slot; older values are overwritten.
    pub fn progress(&self) -> watch::Receiver<DownloadProgress> {
        self.progress.clone()
    }

    pub fn state(&self) -> watch::Receiver<DownloadState> {
        self.state.clone()
    }

    /// Wait for the terminal state.
    pub async fn wait(self) -> Result<DownloadOutcome> {
        self.handle
            .await
            .map_err(|err| SynupdError::Runtime(format!("Download task failed: {err}")))?
    }
}

struct Pipeline {
    source: Arc<dyn ArtifactSource>,
    store: StateStore,
    url: String,
    save_path: PathBuf,
    cancel: CancellationToken,
    progress: watch::Sender<DownloadProgress>,
    state: watch::Sender<DownloadState>,
    logger: Arc<Logger>,
}

impl Pipeline {
    async fn run(self) -> Result<DownloadOutcome> {
        match on_store(&self.store, StateStore::remove_saved_file).await {
            Ok(Some(stale)) => self
                .logger
                .info("CLEANUP", format!("Removed retained artifact {}", stale.display())),
            Ok(None) => {}
            Err(err) => self
                .logger
                .warn("CLEANUP", format!("Could not clear retained artifact: {err}")),
        }

        self.state.send_replace(DownloadState::Fetching);
        self.logger.info("DOWNLOAD", format!("Fetching {}", self.url));

        match self.transfer().await {
            Ok(bytes) => {
                let saved = self.save_path.clone();
                let recorded =
                    on_store(&self.store, move |store| store.set_saved_file(Some(saved))).await;
                if let Err(err) = recorded {
                    self.logger
                        .warn("DOWNLOAD", format!("Could not record retained artifact: {err}"));
                }
                self.logger.info(
                    "DOWNLOAD",
                    format!("Done, {bytes} bytes → {}", self.save_path.display()),
                );
                self.state
                    .send_replace(DownloadState::Completed(self.save_path.clone()));
                Ok(DownloadOutcome {
                    path: self.save_path.clone(),
                    bytes,
                })
            }
            Err(err) => {
                discard_partial(&self.save_path).await;
                if err.is_cancelled() {
                    self.logger.info("DOWNLOAD", "Cancelled by operator");
                    self.state.send_replace(DownloadState::Cancelled);
                } else {
                    self.logger.error("DOWNLOAD", format!("Failed: {err}"));
                    self.state.send_replace(DownloadState::Failed(err.to_string()));
                }
                Err(err)
            }
        }
    }

    async fn transfer(&self) -> Result<u64> {
        let body = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SynupdError::Cancelled),
            body = self.source.open(&self.url) => body?,
        };
        self.state.send_replace(DownloadState::Streaming);

        if let Some(parent) = self.save_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                SynupdError::Filesystem(format!(
                    "Failed to create cache directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let file = File::create(&self.save_path).await.map_err(|err| {
            SynupdError::Filesystem(format!(
                "Failed to create {}: {err}",
                self.save_path.display()
            ))
        })?;
        let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
        let mut stream = body.stream;

        stream_to_writer(&mut stream, body.total, &mut writer, &self.cancel, |progress| {
            self.logger.debug(
                "PROGRESS",
                format!("{} of {}", progress.bytes_done, progress.bytes_total),
            );
            self.progress.send_replace(progress);
        })
        .await
    }
}

/// Run a state store operation on the blocking pool.
async fn on_store<T, F>(store: &StateStore, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&StateStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|err| SynupdError::Runtime(format!("State store task failed: {err}")))?
}

/// Copy `stream` into `writer`, emitting progress at start, whenever the
/// whole percentage changes, and once more at natural completion.
///
/// Cancellation is observed before each chunk; after it fires nothing more
/// is written or emitted.
pub async fn stream_to_writer<W, F>(
    stream: &mut BoxStream<'static, Result<Bytes>>,
    total: Option<u64>,
    writer: &mut W,
    cancel: &CancellationToken,
    mut emit: F,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
    F: FnMut(DownloadProgress),
{
    let bytes_total = total.unwrap_or(0);
    let mut bytes_done = 0u64;
    let mut last_percent = 0u64;

    if cancel.is_cancelled() {
        return Err(SynupdError::Cancelled);
    }
    emit(DownloadProgress {
        bytes_done,
        bytes_total,
    });

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SynupdError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;

        for piece in chunk.chunks(CHUNK_SIZE) {
            if cancel.is_cancelled() {
                return Err(SynupdError::Cancelled);
            }
            writer.write_all(piece).await?;
            bytes_done += piece.len() as u64;

            if bytes_total > 0 {
                let percent = percent_of(bytes_done, bytes_total);
                if percent != last_percent {
                    last_percent = percent;
                    emit(DownloadProgress {
                        bytes_done,
                        bytes_total,
                    });
                }
            }
        }
    }

    writer.flush().await?;
    emit(DownloadProgress {
        bytes_done,
        bytes_total,
    });
    Ok(bytes_done)
}

fn percent_of(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((done as u128 * 100) / total as u128).min(100) as u64
}

fn last_path_segment(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.rsplit('/').next().filter(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(segment).ok()?.into_owned();
    if decoded.contains('/') || decoded.contains('\\') || decoded == ".." {
        return None;
    }
    Some(decoded)
}

async fn discard_partial(path: &Path) {
    // The file may never have been created.
    let _ = tokio::fs::remove_file(path).await;
}
