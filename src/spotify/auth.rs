// Spotify OAuth - authorization-code flow with a 0600 JSON token cache
// Unattended runs only ever refresh; the first run asks for the redirected URL

use super::credentials::Credentials;
use crate::error::{FetchError, Result, SnapshotError};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const REDIRECT_URI: &str = "http://localhost:8000/callback";
pub const SCOPES: &[&str] = &[
    "user-library-read",
    "playlist-read-private",
    "playlist-read-collaborative",
];

/// Refresh this long before Spotify would reject the token.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl CachedToken {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_cached(self, previous_refresh: Option<String>) -> CachedToken {
        CachedToken {
            access_token: self.access_token,
            // Spotify may omit the refresh token on refresh; the old one stays valid
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Utc::now() + ChronoDuration::seconds(self.expires_in),
            scope: self.scope,
        }
    }
}

pub struct SpotifyAuth {
    http: reqwest::Client,
    credentials: Credentials,
    cache_path: PathBuf,
}

impl SpotifyAuth {
    pub fn new(http: reqwest::Client, credentials: Credentials) -> Self {
        Self::with_cache_path(http, credentials, default_cache_path())
    }

    pub fn with_cache_path(
        http: reqwest::Client,
        credentials: Credentials,
        cache_path: PathBuf,
    ) -> Self {
        Self {
            http,
            credentials,
            cache_path,
        }
    }

    /// A usable bearer token: cached, refreshed, or freshly authorized.
    #[instrument(skip(self))]
    pub async fn access_token(&self) -> Result<String> {
        if let Some(cached) = read_cache(&self.cache_path)? {
            if cached.is_fresh(Utc::now()) {
                debug!("Using cached Spotify token");
                return Ok(cached.access_token);
            }

            if let Some(refresh_token) = cached.refresh_token.clone() {
                match self.refresh(&refresh_token).await {
                    Ok(token) => {
                        write_cache(&self.cache_path, &token)?;
                        return Ok(token.access_token);
                    }
                    Err(e) => warn!("Refreshing the Spotify token failed, re-authorizing: {}", e),
                }
            }
        }

        if !std::io::stdin().is_terminal() {
            return Err(SnapshotError::InvalidCredentials(
                "no usable Spotify authorization cached; \
                 run spotify-snapshot once from a terminal to authorize"
                    .to_string(),
            ));
        }

        let token = self.authorize_interactively().await?;
        write_cache(&self.cache_path, &token)?;
        Ok(token.access_token)
    }

    pub fn authorize_url(&self, state: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", REDIRECT_URI)
            .append_pair("scope", &SCOPES.join(" "))
            .append_pair("state", state)
            .finish();
        format!("{}?{}", AUTHORIZE_URL, query)
    }

    async fn authorize_interactively(&self) -> Result<CachedToken> {
        let state = new_state();
        println!(
            "Authorize spotify-snapshot by opening this URL in a browser:\n\n    {}\n",
            self.authorize_url(&state)
        );

        let redirected = inquire::Text::new("Paste the URL you were redirected to:").prompt()?;
        let code = parse_redirect(&redirected, &state)?;

        let token = self.exchange_code(&code).await?;
        info!("Spotify authorization complete");
        Ok(token)
    }

    async fn exchange_code(&self, code: &str) -> Result<CachedToken> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
        ];
        Ok(self.request_token(&form).await?.into_cached(None))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CachedToken> {
        let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        let token = self.request_token(&form).await?;
        debug!("Refreshed Spotify access token (expires in {}s)", token.expires_in);
        Ok(token.into_cached(Some(refresh_token.to_string())))
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(TOKEN_URL)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(form)
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await.map_err(FetchError::from)?;
            return Ok(serde_json::from_str(&body).map_err(FetchError::from)?);
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 400 || status.as_u16() == 401 {
            return Err(SnapshotError::InvalidCredentials(body));
        }
        Err(FetchError::Http {
            status: status.as_u16(),
            body,
        }
        .into())
    }
}

pub fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("spotify-snapshot")
        .join("auth_cache.json")
}

/// Pulls the authorization code out of the redirect URL, checking `state`.
pub fn parse_redirect(redirected: &str, expected_state: &str) -> Result<String> {
    let url = Url::parse(redirected.trim())
        .map_err(|e| SnapshotError::InvalidCredentials(format!("not a URL: {}", e)))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(SnapshotError::InvalidCredentials(format!("authorization denied: {}", error)));
    }
    if state.as_deref() != Some(expected_state) {
        return Err(SnapshotError::InvalidCredentials(
            "state parameter did not match; start the authorization again".to_string(),
        ));
    }
    code.ok_or_else(|| {
        SnapshotError::InvalidCredentials("redirect URL has no code parameter".to_string())
    })
}

pub fn read_cache(path: &Path) -> Result<Option<CachedToken>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(token) => Ok(Some(token)),
        Err(e) => {
            warn!("Ignoring unreadable token cache {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

pub fn write_cache(path: &Path, token: &CachedToken) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(token)?)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

/// 16 random bytes, hex encoded.
fn new_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
