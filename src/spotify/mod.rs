// Spotify Web API client - read-only library endpoints behind a bearer token
// Pages come back typed; the paginator decides what to do with them

pub mod auth;
pub mod credentials;
pub mod models;

use crate::error::{FetchError, Result};
use crate::snapshot::paginator::PageSource;
use async_trait::async_trait;
use models::{CurrentUser, Page};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub use auth::SpotifyAuth;
pub use credentials::{CredentialStore, Credentials};

pub const API_BASE: &str = "https://api.spotify.com/v1";
pub const PAGE_LIMIT: u32 = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PLAYLIST_TRACK_FIELDS: &str =
    "items(added_at,added_by.id,track(name,id,uri,artists(name),album(name,id))),next,total";

pub struct SpotifyClient {
    http: reqwest::Client,
    access_token: String,
    api_base: String,
}

impl SpotifyClient {
    pub fn http_client() -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("spotify-snapshot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::from)?;
        Ok(client)
    }

    /// Resolve a token (cache, refresh or browser authorization) and build a client.
    pub async fn connect(credentials: Credentials) -> Result<Self> {
        let http = Self::http_client()?;
        let auth = SpotifyAuth::new(http.clone(), credentials);
        let access_token = auth.access_token().await?;
        Ok(Self::with_token(http, access_token))
    }

    pub fn with_token(http: reqwest::Client, access_token: String) -> Self {
        Self {
            http,
            access_token,
            api_base: API_BASE.to_string(),
        }
    }

    pub fn saved_tracks_url(&self) -> String {
        format!("{}/me/tracks?limit={}", self.api_base, PAGE_LIMIT)
    }

    pub fn saved_albums_url(&self) -> String {
        format!("{}/me/albums?limit={}", self.api_base, PAGE_LIMIT)
    }

    pub fn playlists_url(&self) -> String {
        format!("{}/me/playlists?limit={}", self.api_base, PAGE_LIMIT)
    }

    pub fn playlist_tracks_url(&self, playlist_id: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("limit", &PAGE_LIMIT.to_string())
            .append_pair("fields", PLAYLIST_TRACK_FIELDS)
            .finish();
        format!("{}/playlists/{}/tracks?{}", self.api_base, playlist_id, query)
    }

    pub async fn current_user(&self) -> std::result::Result<CurrentUser, FetchError> {
        self.get_json(&format!("{}/me", self.api_base)).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, FetchError> {
        debug!(url, "GET");
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
                .unwrap_or(Duration::from_secs(1));
            return Err(FetchError::RateLimited { retry_after });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(map_send_error)?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl<T> PageSource<T> for SpotifyClient
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch_page(&self, url: &str) -> std::result::Result<Page<T>, FetchError> {
        self.get_json(url).await
    }
}

fn map_send_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

/// `Retry-After` in whole seconds. Spotify never sends the HTTP-date form.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SpotifyClient {
        SpotifyClient::with_token(reqwest::Client::new(), "token".to_string())
    }

    #[test]
    fn test_collection_urls_use_page_limit() {
        let client = client();
        assert_eq!(client.saved_tracks_url(), "https://api.spotify.com/v1/me/tracks?limit=50");
        assert_eq!(client.saved_albums_url(), "https://api.spotify.com/v1/me/albums?limit=50");
        assert_eq!(client.playlists_url(), "https://api.spotify.com/v1/me/playlists?limit=50");
    }

    #[test]
    fn test_playlist_tracks_url_restricts_fields() {
        let url = url::Url::parse(&client().playlist_tracks_url("37i9dQZF")).unwrap();
        assert_eq!(url.path(), "/v1/playlists/37i9dQZF/tracks");

        let fields = url
            .query_pairs()
            .find(|(k, _)| k == "fields")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert_eq!(fields, PLAYLIST_TRACK_FIELDS);
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
