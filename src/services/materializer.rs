use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr, eyre};
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::ports::catalog::CatalogTrack;
use crate::ports::materializer::{
    MaterializeRequest, SyncAction, TrackMaterializer, TrackSyncOutcome,
};

const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are not allowed in file names on common filesystems.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<directory>/<playlist>/<title>.mp3`, both components sanitized.
pub fn target_path(directory: &Path, playlist_title: &str, track: &CatalogTrack) -> PathBuf {
    directory
        .join(sanitize_filename(playlist_title))
        .join(format!("{}.mp3", sanitize_filename(&track.display_title())))
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

/// Writes tracks below the target directory, one file per track.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    http: Client,
}

impl Default for FsMaterializer {
    fn default() -> Self {
        Self::new()
    }
}

impl FsMaterializer {
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    pub fn with_client(http: Client) -> Self {
        Self { http }
    }

    async fn download(&self, url: &str, token: &str, target: &Path) -> Result<()> {
        let response = self.get(url, token).await?;
        let bytes = response.bytes().await?;

        let partial = prepare_partial(target).await?;
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }

    async fn stream_capture(&self, url: &str, token: &str, target: &Path) -> Result<()> {
        let response = self.get(url, token).await?;

        let partial = prepare_partial(target).await?;
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(e).wrap_err("Stream interrupted");
                }
            };
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }

    async fn get(&self, url: &str, token: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .header("Authorization", format!("OAuth {}", token))
            .timeout(Duration::from_secs(300))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(eyre!("HTTP error {} while fetching {}", status, url));
        }
        Ok(response)
    }
}

async fn prepare_partial(target: &Path) -> Result<PathBuf> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .wrap_err_with(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(partial_path(target))
}

#[async_trait::async_trait]
impl TrackMaterializer for FsMaterializer {
    #[instrument(skip_all, fields(track_id = request.track.id))]
    async fn materialize(&self, request: MaterializeRequest) -> Result<TrackSyncOutcome> {
        let MaterializeRequest {
            track,
            playlist_title,
            directory,
            token,
        } = request;
        let path = target_path(&directory, &playlist_title, &track);
        let display_path = path.to_string_lossy().to_string();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(TrackSyncOutcome::new(
                SyncAction::Skipped,
                display_path,
                Some("already_exists"),
            ));
        }

        if track.downloadable
            && let Some(url) = track.download_url.as_deref()
        {
            tracing::debug!(path = %display_path, "Downloading track");
            self.download(url, &token, &path).await?;
            return Ok(TrackSyncOutcome::new(
                SyncAction::Downloaded,
                display_path,
                None,
            ));
        }

        if track.streamable {
            return match track.http_mp3_128_url.as_deref() {
                Some(url) => {
                    tracing::debug!(path = %display_path, "Capturing track stream");
                    self.stream_capture(url, &token, &path).await?;
                    Ok(TrackSyncOutcome::new(SyncAction::Streamed, display_path, None))
                }
                None => Ok(TrackSyncOutcome::new(
                    SyncAction::Error,
                    display_path,
                    Some("missing_http_mp3_128_url"),
                )),
            };
        }

        Ok(TrackSyncOutcome::new(
            SyncAction::Unsupported,
            display_path,
            Some("not_downloadable_nor_streamable"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{downloadable_track, streamable_track};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(track: CatalogTrack, directory: &Path) -> MaterializeRequest {
        MaterializeRequest {
            track,
            playlist_title: "Late: Night/Mix".to_string(),
            directory: directory.to_path_buf(),
            token: "secret".to_string(),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(" a<b>c:d\"e/f\\g|h?i*j "), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_filename("Plain title"), "Plain title");
    }

    #[test]
    fn test_target_path_falls_back_to_track_id() {
        let track = CatalogTrack {
            id: 42,
            ..CatalogTrack::default()
        };
        assert_eq!(
            target_path(Path::new("/music"), "Mix?", &track),
            PathBuf::from("/music/Mix_/track-42.mp3")
        );
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/music/Mix/a.mp3")),
            PathBuf::from("/music/Mix/a.mp3.part")
        );
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let track = downloadable_track(1, "Song");
        let existing = target_path(dir.path(), "Late: Night/Mix", &track);
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"old").unwrap();

        let outcome = FsMaterializer::new()
            .materialize(request(track, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.action, SyncAction::Skipped);
        assert_eq!(outcome.reason.as_deref(), Some("already_exists"));
        assert_eq!(std::fs::read(&existing).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/download/1"))
            .and(header("Authorization", "OAuth secret"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp3-bytes".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut track = downloadable_track(1, "Song");
        track.download_url = Some(format!("{}/download/1", server.uri()));

        let outcome = FsMaterializer::new()
            .materialize(request(track, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.action, SyncAction::Downloaded);
        let written = dir.path().join("Late_ Night_Mix").join("Song.mp3");
        assert_eq!(outcome.path, written.to_string_lossy());
        assert_eq!(std::fs::read(&written).unwrap(), b"mp3-bytes");
        assert!(!partial_path(&written).exists());
    }

    #[tokio::test]
    async fn test_stream_capture_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream/2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut track = streamable_track(2, "Live");
        track.http_mp3_128_url = Some(format!("{}/stream/2", server.uri()));

        let outcome = FsMaterializer::new()
            .materialize(request(track, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.action, SyncAction::Streamed);
        let written = dir.path().join("Late_ Night_Mix").join("Live.mp3");
        assert_eq!(std::fs::read(&written).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_stream_without_resolved_url_is_error() {
        let dir = tempfile::tempdir().unwrap();

        let outcome = FsMaterializer::new()
            .materialize(request(streamable_track(3, "Live"), dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.action, SyncAction::Error);
        assert_eq!(outcome.reason.as_deref(), Some("missing_http_mp3_128_url"));
    }

    #[tokio::test]
    async fn test_ineligible_track_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let track = CatalogTrack {
            id: 4,
            ..CatalogTrack::default()
        };

        let outcome = FsMaterializer::new()
            .materialize(request(track, dir.path()))
            .await
            .unwrap();

        assert_eq!(outcome.action, SyncAction::Unsupported);
    }

    #[tokio::test]
    async fn test_http_failure_is_err_and_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut track = downloadable_track(5, "Gone");
        track.download_url = Some(format!("{}/download/5", server.uri()));

        let result = FsMaterializer::new()
            .materialize(request(track, dir.path()))
            .await;

        assert!(result.is_err());
        assert!(!dir.path().join("Late_ Night_Mix").join("Gone.mp3").exists());
    }
}
