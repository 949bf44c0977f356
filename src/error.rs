// Error taxonomy for spotify-snapshot
// Per-item problems are absorbed where they happen; these are the ones that travel

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the Spotify Web API.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited by Spotify (retry after {retry_after:?})")]
    RateLimited { retry_after: Duration },
    #[error("Spotify rejected the access token")]
    Unauthorized,
    #[error("Spotify returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("could not decode Spotify response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// Worth retrying the same request after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::RateLimited { .. })
    }
}

/// Failures of the optional push step. None of these undo the commit.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("push declined at the confirmation prompt")]
    Declined,
    #[error("HEAD is detached; check out a branch before pushing")]
    DetachedHead,
    #[error("remote URL {url} is not an SSH remote; only SSH remotes can be pushed unattended")]
    NonSshRemote { url: String },
    #[error("no SSH key found at {path} and no ssh-agent is running")]
    MissingSshKey { path: PathBuf },
    #[error("SSH authentication failed: {message}. Is the key added to the remote host?")]
    AuthenticationFailed { message: String },
    #[error(
        "pulling from the remote produced merge conflicts; \
         resolve them in the snapshot repo by hand"
    )]
    MergeConflict,
    #[error("remote rejected {refname}: {status}")]
    Rejected { refname: String, status: String },
    #[error("git error during push: {0}")]
    Git(#[from] git2::Error),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Spotify API credentials are missing.\n{0}")]
    MissingCredentials(String),
    #[error("Spotify API credentials were rejected: {0}")]
    InvalidCredentials(String),
    #[error(
        "another spotify-snapshot run is in progress (lock held at {path}). \
         Remove it if that run is gone"
    )]
    LockHeld { path: PathBuf },
    #[error("could not set up the snapshot repository at {path}: {reason}")]
    RepoSetup { path: PathBuf, reason: String },
    #[error("invalid config file {path}: {reason}")]
    Config { path: PathBuf, reason: String },
    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("prompt failed: {0}")]
    Prompt(#[from] inquire::InquireError),
    #[error("crontab update failed: {0}")]
    Schedule(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Push(#[from] PushError),
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not serialize config: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;
