use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    Quota, RateLimiter, clock::DefaultClock, state::InMemoryState, state::direct::NotKeyed,
};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::soundcloud_rs::types::{
    Collection, SoundCloudPlaylist, SoundCloudStreams, SoundCloudTrack, SoundCloudUser,
};

pub const SOUNDCLOUD_API_BASE: &str = "https://api.soundcloud.com";

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, thiserror::Error)]
pub enum SoundCloudError {
    /// 401/403: the token is no longer accepted and the user has to log in again
    #[error("SoundCloud rejected the access token ({status})")]
    Unauthorized { status: StatusCode },
    #[error("SoundCloud returned {status} for {url}")]
    Status { status: StatusCode, url: String },
    #[error("Failed to send http request: {0}")]
    Request(reqwest::Error),
    #[error("Failed to parse response: {0}")]
    Decode(reqwest::Error),
}

impl SoundCloudError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SoundCloudError::Unauthorized { .. })
    }
}

/// SoundCloud API client
///
/// The access token is passed per call, so one client can outlive token refreshes.
pub struct SoundCloudClient {
    client: reqwest::Client,
    api_base: String,
    rate_limiter: DirectRateLimiter,
}

impl SoundCloudClient {
    pub fn new(api_base: impl Into<String>, requests_per_second: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::direct(quota),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> Result<T, SoundCloudError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!(url = %url, "SoundCloud request");
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("OAuth {}", access_token))
            .header("Accept", "application/json; charset=utf-8")
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(SoundCloudError::Request)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SoundCloudError::Unauthorized { status });
        }
        if !status.is_success() {
            return Err(SoundCloudError::Status {
                status,
                url: url.to_string(),
            });
        }

        response.json().await.map_err(SoundCloudError::Decode)
    }

    /// Follow `next_href` links until the collection is exhausted.
    async fn get_collection<T: DeserializeOwned>(
        &self,
        first_url: String,
        access_token: &str,
    ) -> Result<Vec<T>, SoundCloudError> {
        let mut all_items = Vec::new();
        let mut next_url = Some(first_url);

        while let Some(url) = next_url {
            let page: Collection<T> = self.get_json(&url, access_token).await?;
            let (items, next) = page.into_parts();
            all_items.extend(items);
            next_url = next;
        }

        Ok(all_items)
    }

    /// Get the current user's profile
    pub async fn get_me(&self, access_token: &str) -> Result<SoundCloudUser, SoundCloudError> {
        self.get_json(&format!("{}/me", self.api_base), access_token)
            .await
    }

    /// Get all playlists created by the current user
    pub async fn get_my_playlists(
        &self,
        access_token: &str,
    ) -> Result<Vec<SoundCloudPlaylist>, SoundCloudError> {
        self.get_collection(
            format!(
                "{}/me/playlists?show_tracks=false&linked_partitioning=true&limit=50",
                self.api_base
            ),
            access_token,
        )
        .await
    }

    /// Get all playlists the current user liked
    pub async fn get_liked_playlists(
        &self,
        access_token: &str,
    ) -> Result<Vec<SoundCloudPlaylist>, SoundCloudError> {
        self.get_collection(
            format!(
                "{}/me/likes/playlists?linked_partitioning=true&limit=50",
                self.api_base
            ),
            access_token,
        )
        .await
    }

    pub async fn get_playlist(
        &self,
        playlist_id: &str,
        show_tracks: bool,
        access_token: &str,
    ) -> Result<SoundCloudPlaylist, SoundCloudError> {
        self.get_json(
            &format!(
                "{}/playlists/{}?show_tracks={}",
                self.api_base,
                urlencoding::encode(playlist_id),
                show_tracks
            ),
            access_token,
        )
        .await
    }

    /// Get all tracks in a playlist
    pub async fn get_playlist_tracks(
        &self,
        playlist_id: &str,
        access_token: &str,
    ) -> Result<Vec<SoundCloudTrack>, SoundCloudError> {
        self.get_collection(
            format!(
                "{}/playlists/{}/tracks?linked_partitioning=true&limit=200",
                self.api_base,
                urlencoding::encode(playlist_id)
            ),
            access_token,
        )
        .await
    }

    pub async fn get_track_streams(
        &self,
        track_id: i64,
        access_token: &str,
    ) -> Result<SoundCloudStreams, SoundCloudError> {
        self.get_json(
            &format!("{}/tracks/soundcloud:tracks:{}/streams", self.api_base, track_id),
            access_token,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_sends_oauth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("Authorization", "OAuth abc"))
            .and(header("Accept", "application/json; charset=utf-8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": 1, "username": "dj"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = SoundCloudClient::new(server.uri(), 100);
        let me = client.get_me("abc").await.unwrap();

        assert_eq!(me.id, 1);
        assert_eq!(me.username.as_deref(), Some("dj"));
    }

    #[tokio::test]
    async fn test_playlist_tracks_follow_next_href() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/playlists/77/tracks"))
            .and(query_param_is_missing("cursor"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collection": [{"id": 1, "title": "One"}, {"id": 2, "title": "Two"}],
                "next_href": format!("{}/playlists/77/tracks?cursor=abc", server.uri()),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/playlists/77/tracks"))
            .and(query_param("cursor", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collection": [{"id": 3, "title": "Three"}],
                "next_href": null,
            })))
            .mount(&server)
            .await;

        let client = SoundCloudClient::new(server.uri(), 100);
        let tracks = client.get_playlist_tracks("77", "abc").await.unwrap();

        let ids: Vec<i64> = tracks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/playlists/1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/playlists/2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SoundCloudClient::new(server.uri(), 100);

        let err = client.get_playlist("1", false, "abc").await.unwrap_err();
        assert!(err.is_unauthorized());

        let err = client.get_playlist("2", false, "abc").await.unwrap_err();
        assert!(matches!(
            err,
            SoundCloudError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_track_streams_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tracks/soundcloud:tracks:42/streams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "http_mp3_128_url": "https://cdn.example.com/42.mp3",
            })))
            .mount(&server)
            .await;

        let client = SoundCloudClient::new(server.uri(), 100);
        let streams = client.get_track_streams(42, "abc").await.unwrap();

        assert_eq!(
            streams.http_mp3_128_url.as_deref(),
            Some("https://cdn.example.com/42.mp3")
        );
    }
}
