use std::panic::AssertUnwindSafe;
use std::path::Path;

use futures::FutureExt;
use tracing::instrument;

use crate::ports::catalog::{CatalogService, CatalogTrack};
use crate::ports::credentials::CredentialProvider;
use crate::ports::materializer::{MaterializeRequest, TrackMaterializer, TrackSyncOutcome};
use crate::services::sync::error::panic_message;

/// How a track is going to be transferred, decided from its catalog flags alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Download,
    Stream,
    Ineligible,
}

impl TransferMethod {
    pub fn for_track(track: &CatalogTrack) -> Self {
        if track.downloadable && track.download_url.is_some() {
            TransferMethod::Download
        } else if track.streamable && track.stream_url.is_some() {
            TransferMethod::Stream
        } else {
            TransferMethod::Ineligible
        }
    }
}

/// Produce exactly one outcome for `track`. Never fails; every error, panics
/// included, becomes an `error` outcome so sibling tasks keep going.
///
/// The materializer is always called: it alone decides between `skipped`,
/// `unsupported` and the actual transfer.
#[instrument(skip_all, fields(track_id = track.id, playlist = %playlist_title))]
pub async fn sync_one_track<C, M, P>(
    catalog: &C,
    materializer: &M,
    credentials: &P,
    mut track: CatalogTrack,
    playlist_title: &str,
    directory: &Path,
) -> TrackSyncOutcome
where
    C: CatalogService + ?Sized,
    M: TrackMaterializer + ?Sized,
    P: CredentialProvider + ?Sized,
{
    let token = match credentials.current_access_token().await {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = ?e, "No access token available for track");
            return TrackSyncOutcome::error(e.to_string());
        }
    };

    if TransferMethod::for_track(&track) == TransferMethod::Stream {
        match catalog.resolve_stream_url(track.id).await {
            Ok(url) => track.http_mp3_128_url = Some(url),
            // Best effort: the materializer decides what to do with an unresolved stream.
            Err(e) => tracing::warn!(error = ?e, "Failed to resolve stream url"),
        }
    }

    let request = MaterializeRequest {
        track,
        playlist_title: playlist_title.to_string(),
        directory: directory.to_path_buf(),
        token,
    };

    match AssertUnwindSafe(materializer.materialize(request))
        .catch_unwind()
        .await
    {
        Ok(Ok(outcome)) => {
            tracing::debug!(action = %outcome.action, path = %outcome.path, "Track materialized");
            outcome
        }
        Ok(Err(e)) => {
            tracing::warn!(error = ?e, "Track materialization failed");
            TrackSyncOutcome::error(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(error = %message, "Track materialization panicked");
            TrackSyncOutcome::error(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::catalog::MockCatalogService;
    use crate::ports::credentials::MockCredentialProvider;
    use crate::ports::materializer::{MockTrackMaterializer, SyncAction};
    use crate::services::materializer::FsMaterializer;
    use crate::test_utils::{downloadable_track, ineligible_track, streamable_track};
    use color_eyre::eyre::eyre;
    use std::path::PathBuf;

    fn credentials() -> MockCredentialProvider {
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_current_access_token()
            .returning(|| Ok("token-1".to_string()));
        credentials
    }

    #[test]
    fn test_transfer_method_prefers_download() {
        let mut track = streamable_track(1, "Both");
        track.downloadable = true;
        track.download_url = Some("https://example.com/d".to_string());

        assert_eq!(TransferMethod::for_track(&track), TransferMethod::Download);
    }

    #[test]
    fn test_transfer_method_requires_urls() {
        let mut track = downloadable_track(1, "No url");
        track.download_url = None;
        assert_eq!(TransferMethod::for_track(&track), TransferMethod::Ineligible);

        let mut track = streamable_track(2, "No stream");
        track.stream_url = None;
        assert_eq!(TransferMethod::for_track(&track), TransferMethod::Ineligible);
    }

    #[tokio::test]
    async fn test_download_passes_token_and_context() {
        let catalog = MockCatalogService::new();
        let mut materializer = MockTrackMaterializer::new();
        materializer
            .expect_materialize()
            .withf(|request| {
                request.token == "token-1"
                    && request.playlist_title == "Mix"
                    && request.directory == PathBuf::from("/music")
                    && request.track.http_mp3_128_url.is_none()
            })
            .times(1)
            .returning(|_| {
                Ok(TrackSyncOutcome::new(
                    SyncAction::Downloaded,
                    "/music/Mix/Song.mp3",
                    None,
                ))
            });

        let outcome = sync_one_track(
            &catalog,
            &materializer,
            &credentials(),
            downloadable_track(1, "Song"),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Downloaded);
    }

    #[tokio::test]
    async fn test_stream_resolves_url_before_materializing() {
        let mut catalog = MockCatalogService::new();
        catalog
            .expect_resolve_stream_url()
            .withf(|id| *id == 7)
            .returning(|_| Ok("https://cdn.example.com/7.mp3".to_string()));
        let mut materializer = MockTrackMaterializer::new();
        materializer
            .expect_materialize()
            .withf(|request| {
                request.track.http_mp3_128_url.as_deref() == Some("https://cdn.example.com/7.mp3")
            })
            .returning(|_| Ok(TrackSyncOutcome::new(SyncAction::Streamed, "/x.mp3", None)));

        let outcome = sync_one_track(
            &catalog,
            &materializer,
            &credentials(),
            streamable_track(7, "Stream"),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Streamed);
    }

    #[tokio::test]
    async fn test_stream_resolution_failure_still_materializes() {
        let mut catalog = MockCatalogService::new();
        catalog
            .expect_resolve_stream_url()
            .returning(|_| Err(eyre!("transcodings unavailable")));
        let mut materializer = MockTrackMaterializer::new();
        materializer
            .expect_materialize()
            .withf(|request| request.track.http_mp3_128_url.is_none())
            .times(1)
            .returning(|_| {
                Ok(TrackSyncOutcome::new(
                    SyncAction::Error,
                    "/x.mp3",
                    Some("missing_http_mp3_128_url"),
                ))
            });

        let outcome = sync_one_track(
            &catalog,
            &materializer,
            &credentials(),
            streamable_track(8, "Stream"),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Error);
        assert_eq!(outcome.reason.as_deref(), Some("missing_http_mp3_128_url"));
    }

    #[tokio::test]
    async fn test_ineligible_track_still_reaches_materializer() {
        let mut catalog = MockCatalogService::new();
        catalog.expect_resolve_stream_url().never();
        let mut materializer = MockTrackMaterializer::new();
        materializer
            .expect_materialize()
            .withf(|request| request.track.id == 3 && request.track.http_mp3_128_url.is_none())
            .times(1)
            .returning(|_| {
                Ok(TrackSyncOutcome::new(
                    SyncAction::Skipped,
                    "/music/Mix/track-3.mp3",
                    Some("already_exists"),
                ))
            });

        let outcome = sync_one_track(
            &catalog,
            &materializer,
            &credentials(),
            ineligible_track(3),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Skipped);
        assert_eq!(outcome.reason.as_deref(), Some("already_exists"));
    }

    #[tokio::test]
    async fn test_ineligible_track_without_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = MockCatalogService::new();

        let outcome = sync_one_track(
            &catalog,
            &FsMaterializer::new(),
            &credentials(),
            ineligible_track(4),
            "Mix",
            dir.path(),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Unsupported);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("not_downloadable_nor_streamable")
        );
        assert!(outcome.path.ends_with("track-4.mp3"));
    }

    struct PanickingMaterializer;

    #[async_trait::async_trait]
    impl TrackMaterializer for PanickingMaterializer {
        async fn materialize(
            &self,
            _request: MaterializeRequest,
        ) -> color_eyre::Result<TrackSyncOutcome> {
            panic!("disk went away")
        }
    }

    #[tokio::test]
    async fn test_materializer_panic_becomes_error_outcome() {
        let catalog = MockCatalogService::new();

        let outcome = sync_one_track(
            &catalog,
            &PanickingMaterializer,
            &credentials(),
            downloadable_track(1, "Song"),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Error);
        assert_eq!(outcome.reason.as_deref(), Some("disk went away"));
    }

    #[tokio::test]
    async fn test_materializer_failure_becomes_error_outcome() {
        let catalog = MockCatalogService::new();
        let mut materializer = MockTrackMaterializer::new();
        materializer
            .expect_materialize()
            .returning(|_| Err(eyre!("connection reset")));

        let outcome = sync_one_track(
            &catalog,
            &materializer,
            &credentials(),
            downloadable_track(1, "Song"),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Error);
        assert_eq!(outcome.reason.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_missing_token_becomes_error_outcome() {
        let catalog = MockCatalogService::new();
        let mut materializer = MockTrackMaterializer::new();
        materializer.expect_materialize().never();
        let mut credentials = MockCredentialProvider::new();
        credentials
            .expect_current_access_token()
            .returning(|| Err(eyre!("login required")));

        let outcome = sync_one_track(
            &catalog,
            &materializer,
            &credentials,
            downloadable_track(1, "Song"),
            "Mix",
            Path::new("/music"),
        )
        .await;

        assert_eq!(outcome.action, SyncAction::Error);
    }
}
