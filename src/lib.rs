// spotify-snapshot library - the pieces behind the CLI
// Pages in from Spotify, sorted TSV files out, one git commit per run

pub mod backup;    // one full run, start to finish
pub mod config;    // TOML settings
pub mod error;     // typed errors shared by every module
pub mod lock;      // keeps overlapping runs apart
pub mod logging;   // tracing setup
pub mod repo;      // git working tree, reconcile, commit, push
pub mod schedule;  // crontab install/uninstall
pub mod snapshot;  // paginate, serialize, pretty-print
pub mod spotify;   // Web API client, OAuth, credentials

// Export the stuff callers actually use
pub use backup::{BackupOptions, Selection};
pub use config::Config;
pub use error::{FetchError, PushError, Result, SnapshotError};
pub use repo::SnapshotRepo;
