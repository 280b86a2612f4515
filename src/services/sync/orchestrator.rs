use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::{FutureExt, StreamExt, stream};
#[cfg(test)]
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;
use tracing::instrument;

use crate::ports::catalog::{CatalogService, CatalogTrack};
use crate::ports::credentials::CredentialProvider;
use crate::ports::materializer::{TrackMaterializer, TrackSyncOutcome};
use crate::services::sync::cancellation::CancellationController;
#[cfg(test)]
use crate::services::sync::change_detector::PlaylistTrackCountCache;
use crate::services::sync::change_detector::{ChangeDetector, PlaylistSelection};
use crate::services::sync::error::{SyncError, panic_message};
use crate::services::sync::progress::{Progress, ProgressCell, SyncStatus};
use crate::services::sync::track_task::sync_one_track;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Parameters of a single run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub playlists: PlaylistSelection,
    pub directory: PathBuf,
    pub tracks_concurrency: usize,
    pub playlist_concurrency: usize,
}

impl SyncRequest {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.directory.as_os_str().is_empty() {
            return Err(SyncError::MissingDirectory);
        }
        if self.tracks_concurrency == 0 {
            return Err(SyncError::InvalidConcurrency { stage: "Track" });
        }
        if self.playlist_concurrency == 0 {
            return Err(SyncError::InvalidConcurrency { stage: "Playlist" });
        }
        Ok(())
    }
}

/// Drives playlist and track fetches through two bounded pools, owns the run
/// lifecycle and publishes progress.
pub struct SyncOrchestrator<C, M, P> {
    catalog: C,
    materializer: M,
    credentials: P,
    progress: ProgressCell,
    cancellation: CancellationController,
    detector: ChangeDetector,
    /// Single-flight lock. Separate from `status`, since `cancel()` flips the status
    /// before the run has drained.
    in_flight: AtomicBool,
    tick_interval: Duration,
}

impl<C, M, P> SyncOrchestrator<C, M, P>
where
    C: CatalogService,
    M: TrackMaterializer,
    P: CredentialProvider,
{
    pub fn new(catalog: C, materializer: M, credentials: P) -> Self {
        Self {
            catalog,
            materializer,
            credentials,
            progress: ProgressCell::new(),
            cancellation: CancellationController::new(),
            detector: ChangeDetector::new(),
            in_flight: AtomicBool::new(false),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn credentials(&self) -> &P {
        &self.credentials
    }

    pub fn snapshot(&self) -> Progress {
        self.progress.snapshot()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    pub fn stream(&self) -> WatchStream<Progress> {
        self.progress.stream()
    }

    #[cfg(test)]
    pub fn cache(&self) -> &PlaylistTrackCountCache {
        self.detector.cache()
    }

    #[cfg(test)]
    pub fn active_tasks(&self) -> usize {
        self.cancellation.active_tasks()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Request a cooperative stop of the current run.
    ///
    /// Returns `false` when nothing is running. The status flips to `canceled`
    /// immediately; in-flight tracks are left to finish and queued ones are skipped.
    pub fn cancel(&self) -> bool {
        let cancellation = &self.cancellation;
        let canceled = self.progress.update_if(|progress| {
            if progress.status != SyncStatus::Running {
                return false;
            }
            cancellation.request_stop();
            progress.status = SyncStatus::Canceled;
            true
        });
        if canceled {
            tracing::info!(
                active_tasks = self.cancellation.active_tasks(),
                "Sync cancel requested, draining in-flight tracks"
            );
        }
        canceled
    }

    /// Only sync the playlists whose track count changed since the last check.
    ///
    /// Returns `Ok(None)` when a run is already in flight or nothing changed.
    #[instrument(skip(self, request), fields(num_playlists = request.playlists.len()))]
    pub async fn check_and_sync_playlists(
        &self,
        request: SyncRequest,
        sync_if_missing_in_cache: bool,
    ) -> Result<Option<Progress>, SyncError> {
        if self.is_in_flight() {
            tracing::info!("Sync already running, skipping change detection");
            return Ok(None);
        }

        let changed = self
            .detector
            .select_changed(
                &self.catalog,
                &request.playlists,
                request.playlist_concurrency,
                sync_if_missing_in_cache,
            )
            .await;

        if changed.is_empty() {
            tracing::info!("No playlist changes detected");
            return Ok(None);
        }

        self.sync_playlists(SyncRequest {
            playlists: changed,
            ..request
        })
        .await
    }

    /// Run the full pipeline over `request.playlists`.
    ///
    /// Returns the terminal snapshot, or `Ok(None)` if another run is in flight.
    #[instrument(skip(self, request), fields(num_playlists = request.playlists.len()))]
    pub async fn sync_playlists(
        &self,
        request: SyncRequest,
    ) -> Result<Option<Progress>, SyncError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::info!("Sync already running, ignoring request");
            return Ok(None);
        }

        self.cancellation.clear();
        self.progress.update(|progress| *progress = Progress::running(Utc::now()));
        let _guard = RunGuard {
            in_flight: &self.in_flight,
            cancellation: &self.cancellation,
            progress: &self.progress,
            clock: spawn_clock(self.progress.clone(), self.tick_interval),
        };

        tracing::info!(
            directory = %request.directory.display(),
            tracks_concurrency = request.tracks_concurrency,
            playlist_concurrency = request.playlist_concurrency,
            "Starting playlist sync"
        );

        let result = AssertUnwindSafe(self.run_pipeline(&request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(SyncError::Aborted(panic_message(panic.as_ref()))));

        tracing::debug!(
            drained = self.cancellation.is_drained(),
            "Track stage finished"
        );

        let now = Utc::now();
        let cancellation = &self.cancellation;
        self.progress.update(|progress| {
            // read under the cell's lock so a concurrent cancel() cannot be lost
            let stop_requested = cancellation.is_stop_requested();
            if let Err(e) = &result {
                progress.error = Some(e.to_string());
            }
            progress.status = if stop_requested {
                SyncStatus::Canceled
            } else if result.is_err() {
                SyncStatus::Error
            } else {
                SyncStatus::Done
            };
            progress.refresh_timing(now);
            progress.eta_ms = Some(0);
        });

        let snapshot = self.progress.snapshot();
        tracing::info!(
            status = ?snapshot.status,
            total = snapshot.total,
            processed = snapshot.processed,
            downloaded = snapshot.downloaded,
            streamed = snapshot.streamed,
            skipped = snapshot.skipped,
            unsupported = snapshot.unsupported,
            errors = snapshot.errors,
            elapsed_ms = snapshot.elapsed_ms,
            "Playlist sync finished"
        );

        result.map(|()| Some(snapshot))
    }

    async fn run_pipeline(&self, request: &SyncRequest) -> Result<(), SyncError> {
        request.validate()?;

        let pairs = self.fetch_track_lists(request).await;
        let total = pairs.len() as u64;
        self.progress.update(|progress| progress.total = total);
        tracing::info!(total, "Collected tracks to sync");

        stream::iter(pairs)
            .map(|(track, playlist_title)| self.run_track(track, playlist_title, &request.directory))
            .buffer_unordered(request.tracks_concurrency)
            .for_each(|outcome| async move {
                self.progress.update(|progress| {
                    progress.record(&outcome);
                    progress.refresh_timing(Utc::now());
                });
            })
            .await;

        Ok(())
    }

    /// Playlist stage: fetch every track list, then flatten into `(track, playlist title)`.
    async fn fetch_track_lists(&self, request: &SyncRequest) -> Vec<(CatalogTrack, String)> {
        let lists: Vec<(String, Vec<CatalogTrack>)> = stream::iter(request.playlists.iter())
            .map(|(playlist_id, title)| async move {
                match self.catalog.fetch_playlist_tracks(playlist_id).await {
                    Ok(tracks) => {
                        tracing::debug!(
                            playlist_id = %playlist_id,
                            num_tracks = tracks.len(),
                            "Fetched playlist tracks"
                        );
                        (title.clone(), tracks)
                    }
                    Err(e) => {
                        tracing::warn!(
                            playlist_id = %playlist_id,
                            error = ?e,
                            "Failed to fetch playlist tracks, skipping playlist"
                        );
                        let message = format!("Failed to fetch tracks for {}: {}", title, e);
                        self.progress.update(|progress| progress.error = Some(message));
                        (title.clone(), Vec::new())
                    }
                }
            })
            .buffer_unordered(request.playlist_concurrency)
            .collect()
            .await;

        lists
            .into_iter()
            .flat_map(|(title, tracks)| {
                tracks
                    .into_iter()
                    .map(move |track| (track, title.clone()))
            })
            .collect()
    }

    async fn run_track(
        &self,
        track: CatalogTrack,
        playlist_title: String,
        directory: &Path,
    ) -> TrackSyncOutcome {
        let Some(_task) = self.cancellation.admit() else {
            return TrackSyncOutcome::canceled();
        };

        sync_one_track(
            &self.catalog,
            &self.materializer,
            &self.credentials,
            track,
            &playlist_title,
            directory,
        )
        .await
    }
}

/// Releases the single-flight lock when the run ends, even if the run future is dropped.
struct RunGuard<'a> {
    in_flight: &'a AtomicBool,
    cancellation: &'a CancellationController,
    progress: &'a ProgressCell,
    clock: JoinHandle<()>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.clock.abort();
        // Only still running when the run future was dropped before finalizing.
        self.progress.update_if(|progress| {
            if progress.status != SyncStatus::Running {
                return false;
            }
            progress.status = SyncStatus::Canceled;
            true
        });
        self.cancellation.clear();
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Recompute elapsed/rate/ETA on a fixed period until the run leaves `running`.
fn spawn_clock(progress: ProgressCell, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let running = progress.update_if(|snapshot| {
                if snapshot.status != SyncStatus::Running {
                    return false;
                }
                snapshot.refresh_timing(Utc::now());
                true
            });
            if !running {
                break;
            }
        }
    })
}
