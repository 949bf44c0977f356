// Spotify API client credentials
// Environment first, then the OS keyring, then an interactive prompt that stores them

use crate::error::{Result, SnapshotError};
use keyring::Entry;
use std::io::IsTerminal;
use tracing::{debug, info};

pub const SERVICE_NAME: &str = "spotify-snapshot";
pub const CLIENT_ID_ENV: &str = "SPOTIFY_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "SPOTIFY_CLIENT_SECRET";

const CLIENT_ID_KEY: &str = "client_id";
const CLIENT_SECRET_KEY: &str = "client_secret";

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

// Secrets stay out of logs
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Keyring-backed credential storage.
pub struct CredentialStore {
    service_name: String,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::with_service_name(SERVICE_NAME)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Ok(Entry::new(&self.service_name, key)?)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) if !value.is_empty() => Ok(Some(value)),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load(&self) -> Result<Option<Credentials>> {
        let client_id = self.get(CLIENT_ID_KEY)?;
        let client_secret = self.get(CLIENT_SECRET_KEY)?;

        Ok(match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Some(Credentials {
                client_id,
                client_secret,
            }),
            _ => None,
        })
    }

    pub fn store(&self, credentials: &Credentials) -> Result<()> {
        self.entry(CLIENT_ID_KEY)?.set_password(&credentials.client_id)?;
        self.entry(CLIENT_SECRET_KEY)?.set_password(&credentials.client_secret)?;
        debug!(service = %self.service_name, "Stored credentials in keyring");
        Ok(())
    }

    /// Returns whether anything was removed.
    pub fn remove(&self) -> Result<bool> {
        let mut removed = false;
        for key in [CLIENT_ID_KEY, CLIENT_SECRET_KEY] {
            match self.entry(key)?.delete_credential() {
                Ok(()) => removed = true,
                Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Environment, then keyring, then prompt. Fails fast when nobody can be asked.
    pub fn resolve(&self) -> Result<Credentials> {
        if let Some(credentials) = from_env() {
            debug!("Using Spotify credentials from the environment");
            return Ok(credentials);
        }

        if let Some(credentials) = self.load()? {
            debug!("Using Spotify credentials from the keyring");
            return Ok(credentials);
        }

        if !std::io::stdin().is_terminal() {
            return Err(SnapshotError::MissingCredentials(remediation()));
        }

        self.prompt_and_store()
    }

    pub fn prompt_and_store(&self) -> Result<Credentials> {
        println!("Please enter your Spotify API credentials.");
        println!("{}", setup_steps());

        let client_id = inquire::Text::new("Spotify Client ID:").prompt()?;
        let client_secret = inquire::Password::new("Spotify Client Secret:")
            .without_confirmation()
            .prompt()?;

        let credentials = Credentials {
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
        };
        if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
            return Err(SnapshotError::MissingCredentials(remediation()));
        }

        self.store(&credentials)?;
        info!("Credentials stored in the keyring");
        Ok(credentials)
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

fn from_env() -> Option<Credentials> {
    let client_id = std::env::var(CLIENT_ID_ENV).ok().filter(|v| !v.is_empty())?;
    let client_secret = std::env::var(CLIENT_SECRET_ENV).ok().filter(|v| !v.is_empty())?;
    Some(Credentials {
        client_id,
        client_secret,
    })
}

fn setup_steps() -> String {
    format!(
        "To get these credentials:\n\
         1. Go to https://developer.spotify.com/dashboard\n\
         2. Create a new application\n\
         3. Set the redirect URI to {}\n\
         4. Copy the Client ID and Client Secret",
        super::auth::REDIRECT_URI
    )
}

fn remediation() -> String {
    format!(
        "{}\n\nThen either run `spotify-snapshot --set-credentials` from a terminal, \
         or export them:\n\n    \
         export {}=your_client_id\n    export {}=your_client_secret",
        setup_steps(),
        CLIENT_ID_ENV,
        CLIENT_SECRET_ENV
    )
}
