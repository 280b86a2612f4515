use std::future::Future;

use color_eyre::eyre::{OptionExt, Result};
use tracing::instrument;

use crate::ports::catalog::{CatalogPlaylist, CatalogService, CatalogTrack, PlaylistMeta};
use crate::ports::credentials::CredentialProvider;
use crate::soundcloud_rs::{SoundCloudClient, SoundCloudError};

/// `CatalogService` backed by the SoundCloud HTTP API.
pub struct SoundCloudCatalog<P> {
    client: SoundCloudClient,
    credentials: P,
}

impl<P: CredentialProvider> SoundCloudCatalog<P> {
    pub fn new(client: SoundCloudClient, credentials: P) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Run `request` with the current token. A 401/403 triggers one refresh and one
    /// retry; if that does not help the provider is told a new login is needed.
    async fn with_token<T, F, Fut>(&self, request: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, SoundCloudError>>,
    {
        let token = self.credentials.current_access_token().await?;
        let error = match request(token).await {
            Err(e) if e.is_unauthorized() => e,
            other => return Ok(other?),
        };

        tracing::warn!(error = %error, "SoundCloud rejected the token, refreshing");
        if !self.credentials.refresh().await? {
            self.credentials.mark_login_required();
            return Err(error.into());
        }

        let token = self.credentials.current_access_token().await?;
        match request(token).await {
            Err(e) if e.is_unauthorized() => {
                self.credentials.mark_login_required();
                Err(e.into())
            }
            other => Ok(other?),
        }
    }

    pub async fn current_username(&self) -> Result<Option<String>> {
        let me = self
            .with_token(|token| async move { self.client.get_me(&token).await })
            .await?;
        Ok(me.username)
    }
}

#[async_trait::async_trait]
impl<P: CredentialProvider> CatalogService for SoundCloudCatalog<P> {
    #[instrument(skip(self))]
    async fn fetch_playlist_meta(&self, playlist_id: &str) -> Result<PlaylistMeta> {
        let playlist = self
            .with_token(|token| async move {
                self.client.get_playlist(playlist_id, false, &token).await
            })
            .await?;

        Ok(PlaylistMeta {
            title: playlist.title,
            track_count: playlist.track_count.unwrap_or(0),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_playlist_tracks(&self, playlist_id: &str) -> Result<Vec<CatalogTrack>> {
        let tracks = self
            .with_token(|token| async move {
                self.client.get_playlist_tracks(playlist_id, &token).await
            })
            .await?;

        Ok(tracks.into_iter().map(CatalogTrack::from).collect())
    }

    #[instrument(skip(self))]
    async fn resolve_stream_url(&self, track_id: i64) -> Result<String> {
        let streams = self
            .with_token(|token| async move { self.client.get_track_streams(track_id, &token).await })
            .await?;

        streams
            .http_mp3_128_url
            .ok_or_eyre("Track has no http_mp3_128_url stream")
    }

    async fn list_playlists(&self) -> Result<Vec<CatalogPlaylist>> {
        let (own, liked) = tokio::try_join!(
            self.with_token(|token| async move { self.client.get_my_playlists(&token).await }),
            self.with_token(|token| async move { self.client.get_liked_playlists(&token).await }),
        )?;

        Ok(own
            .into_iter()
            .map(|playlist| playlist.into_catalog_playlist(false))
            .chain(
                liked
                    .into_iter()
                    .map(|playlist| playlist.into_catalog_playlist(true)),
            )
            .collect())
    }
}
