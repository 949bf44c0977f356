// Backup run for spotify-snapshot
// Fetch the library, write the snapshot files, reconcile, commit and optionally push

use crate::config::Config;
use crate::error::Result;
use crate::lock::{ProcessLock, DEFAULT_LOCK_NAME};
use crate::repo::{
    finalize_commit, maybe_push, reconcile, CommitOutcome, PushOutcome, RemoteSettings,
    SnapshotRepo,
};
use crate::snapshot::paginator::{fetch_all, PagePolicy, PageSource};
use crate::snapshot::writer;
use crate::spotify::models::{Playlist, PlaylistTrackEntry, SavedAlbum, SavedTrack};
use crate::spotify::{CredentialStore, SpotifyClient};
use anyhow::Context;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Which collections a run writes. All of them unless narrowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub liked_songs: bool,
    pub saved_albums: bool,
    pub playlists: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self {
            liked_songs: true,
            saved_albums: true,
            playlists: true,
        }
    }

    /// No flag at all means everything.
    pub fn from_flags(all: bool, liked_songs: bool, saved_albums: bool, playlists: bool) -> Self {
        if all || !(liked_songs || saved_albums || playlists) {
            return Self::all();
        }
        Self {
            liked_songs,
            saved_albums,
            playlists,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub prod_run: bool,
    pub selection: Selection,
    pub commit: bool,
    pub push: bool,
    pub auto_confirm: bool,
}

/// The endpoints a snapshot reads from.
pub trait LibrarySource:
    PageSource<SavedTrack>
    + PageSource<SavedAlbum>
    + PageSource<Playlist>
    + PageSource<PlaylistTrackEntry>
{
    fn saved_tracks_url(&self) -> String;
    fn saved_albums_url(&self) -> String;
    fn playlists_url(&self) -> String;
    fn playlist_tracks_url(&self, playlist_id: &str) -> String;
}

impl LibrarySource for SpotifyClient {
    fn saved_tracks_url(&self) -> String {
        SpotifyClient::saved_tracks_url(self)
    }

    fn saved_albums_url(&self) -> String {
        SpotifyClient::saved_albums_url(self)
    }

    fn playlists_url(&self) -> String {
        SpotifyClient::playlists_url(self)
    }

    fn playlist_tracks_url(&self, playlist_id: &str) -> String {
        SpotifyClient::playlist_tracks_url(self, playlist_id)
    }
}

#[derive(Debug, Default)]
pub struct SnapshotSummary {
    pub liked_songs: Option<usize>,
    pub saved_albums: Option<usize>,
    pub playlists: Option<usize>,
    /// Playlists whose tracks could not be fetched; their old files are kept
    pub skipped_playlists: Vec<String>,
    pub empty_playlists: Vec<String>,
}

/// Fetch the selected collections and write them under `root`.
pub async fn write_snapshot<L: LibrarySource>(
    library: &L,
    root: &Path,
    selection: Selection,
    policy: &PagePolicy,
) -> Result<SnapshotSummary> {
    let mut summary = SnapshotSummary::default();

    if selection.liked_songs {
        info!("Getting liked songs...");
        let url = library.saved_tracks_url();
        let liked = fetch_all::<SavedTrack, _>(library, &url, policy, "liked songs").await?;
        writer::write_liked_songs(&liked.records, root)?;
        summary.liked_songs = Some(liked.len());
    }

    if selection.saved_albums {
        info!("Getting saved albums...");
        let url = library.saved_albums_url();
        let albums = fetch_all::<SavedAlbum, _>(library, &url, policy, "albums").await?;
        writer::write_saved_albums(&albums.records, root)?;
        summary.saved_albums = Some(albums.len());
    }

    if selection.playlists {
        backup_playlists(library, root, policy, &mut summary).await?;
    }

    Ok(summary)
}

async fn backup_playlists<L: LibrarySource>(
    library: &L,
    root: &Path,
    policy: &PagePolicy,
    summary: &mut SnapshotSummary,
) -> Result<()> {
    info!("Getting playlists...");
    let url = library.playlists_url();
    let playlists = fetch_all::<Playlist, _>(library, &url, policy, "playlists").await?;
    writer::write_playlist_index(&playlists.records, root)?;
    summary.playlists = Some(playlists.len());

    let mut ordered: Vec<&Playlist> = playlists.records.values().collect();
    ordered.sort_by(|a, b| a.display_name().cmp(b.display_name()).then_with(|| a.id.cmp(&b.id)));

    for playlist in ordered {
        let name = playlist.display_name();
        info!("Backing up playlist: {}", name);

        let url = library.playlist_tracks_url(&playlist.id);
        let fetched = fetch_all::<PlaylistTrackEntry, _>(library, &url, policy, "tracks").await;
        let tracks = match fetched {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("Skipping playlist {} ({}): {}", name, playlist.id, e);
                summary.skipped_playlists.push(name.to_string());
                continue;
            }
        };

        if tracks.is_empty() {
            summary.empty_playlists.push(name.to_string());
        }
        writer::write_playlist_tracks(&tracks.records, &writer::playlist_file(playlist), root)?;
    }

    if !summary.empty_playlists.is_empty() {
        info!(
            "{} empty playlists: {}",
            summary.empty_playlists.len(),
            summary.empty_playlists.join(", ")
        );
    }
    if !summary.skipped_playlists.is_empty() {
        warn!(
            "{} playlists could not be fetched and were left as they were: {}",
            summary.skipped_playlists.len(),
            summary.skipped_playlists.join(", ")
        );
    }
    Ok(())
}

/// The full backup run behind the default command.
#[instrument(skip_all, fields(prod = options.prod_run))]
pub async fn run(config: &Config, options: &BackupOptions) -> anyhow::Result<()> {
    let _lock = ProcessLock::acquire(&std::env::temp_dir(), DEFAULT_LOCK_NAME)?;

    let target = config.target_dir(options.prod_run)?;
    info!("Snapshot directory: {}", target.display());

    let credentials = CredentialStore::new().resolve()?;
    let client = SpotifyClient::connect(credentials)
        .await
        .context("Failed to authenticate with Spotify")?;
    let user = client.current_user().await.context("Failed to look up the Spotify user")?;

    let remote = config.remote_url().map(|url| RemoteSettings {
        url: url.to_string(),
        ssh_keys: config.ssh_key_candidates(),
    });
    let repo = SnapshotRepo::open_or_create(&target, remote.as_ref())?;

    let policy = PagePolicy::default();
    let summary = write_snapshot(&client, repo.root(), options.selection, &policy).await?;
    info!(
        liked_songs = ?summary.liked_songs,
        saved_albums = ?summary.saved_albums,
        playlists = ?summary.playlists,
        "Snapshot written"
    );

    if !options.commit {
        info!("Not committing (--no-commit)");
        repo.close();
        return Ok(());
    }

    let deleted = reconcile(&repo).context("Failed to reconcile deleted playlists")?;
    match finalize_commit(&repo, user.label(), &deleted).context("Failed to commit snapshot")? {
        CommitOutcome::NoChanges => println!("No changes to commit"),
        CommitOutcome::Committed { message, .. } => println!("{}", message),
    }

    if options.push {
        let pushed = maybe_push(&repo, remote.as_ref(), options.auto_confirm)
            .context("Push failed, the commit is kept locally")?;
        match pushed {
            PushOutcome::NoRemote => {
                println!("No git remote configured; set git_remote_url in the config to push")
            }
            PushOutcome::Pushed { branch } => println!("Pushed {}", branch),
        }
    }

    repo.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::repo::test_support::config_identity;
    use crate::snapshot::layout::{LIKED_SONGS_FILE, PLAYLISTS_INDEX_FILE, SAVED_ALBUMS_FILE};
    use crate::spotify::models::Page;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeLibrary {
        liked: Vec<serde_json::Value>,
        albums: Vec<serde_json::Value>,
        playlists: Vec<serde_json::Value>,
        /// Playlists without an entry fail with a server error
        playlist_tracks: HashMap<String, Vec<serde_json::Value>>,
    }

    fn page<T: serde::de::DeserializeOwned>(
        items: &[serde_json::Value],
    ) -> std::result::Result<Page<T>, FetchError> {
        let value = json!({ "items": items, "next": null, "total": items.len() });
        Ok(serde_json::from_value(value)?)
    }

    #[async_trait]
    impl PageSource<SavedTrack> for FakeLibrary {
        async fn fetch_page(
            &self,
            _url: &str,
        ) -> std::result::Result<Page<SavedTrack>, FetchError> {
            page(&self.liked)
        }
    }

    #[async_trait]
    impl PageSource<SavedAlbum> for FakeLibrary {
        async fn fetch_page(
            &self,
            _url: &str,
        ) -> std::result::Result<Page<SavedAlbum>, FetchError> {
            page(&self.albums)
        }
    }

    #[async_trait]
    impl PageSource<Playlist> for FakeLibrary {
        async fn fetch_page(
            &self,
            _url: &str,
        ) -> std::result::Result<Page<Playlist>, FetchError> {
            page(&self.playlists)
        }
    }

    #[async_trait]
    impl PageSource<PlaylistTrackEntry> for FakeLibrary {
        async fn fetch_page(
            &self,
            url: &str,
        ) -> std::result::Result<Page<PlaylistTrackEntry>, FetchError> {
            match self.playlist_tracks.get(url) {
                Some(items) => page(items),
                None => Err(FetchError::Http {
                    status: 502,
                    body: "bad gateway".into(),
                }),
            }
        }
    }

    impl LibrarySource for FakeLibrary {
        fn saved_tracks_url(&self) -> String {
            "liked".into()
        }

        fn saved_albums_url(&self) -> String {
            "albums".into()
        }

        fn playlists_url(&self) -> String {
            "playlists".into()
        }

        fn playlist_tracks_url(&self, playlist_id: &str) -> String {
            playlist_id.to_string()
        }
    }

    fn track(id: &str, name: &str) -> serde_json::Value {
        json!({
            "name": name,
            "id": id,
            "uri": format!("spotify:track:{}", id),
            "artists": [{"name": "Artist"}],
            "album": {"name": "Album", "id": "al"}
        })
    }

    fn playlist(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "description": "",
            "owner": {"id": "me"},
            "collaborative": false,
            "tracks": {"total": 1}
        })
    }

    fn library() -> FakeLibrary {
        let mut library = FakeLibrary {
            liked: vec![
                json!({"added_at": "2024-01-02T00:00:00Z", "track": track("t2", "Second")}),
                json!({"added_at": "2024-01-01T00:00:00Z", "track": track("t1", "First")}),
                json!({"added_at": "2024-01-03T00:00:00Z", "track": null}),
            ],
            albums: vec![json!({
                "added_at": "2024-01-01T00:00:00Z",
                "album": {"name": "Album", "id": "al", "artists": [{"name": "Artist"}]}
            })],
            playlists: vec![playlist("p1", "Road/Trip"), playlist("p2", "Empty")],
            ..FakeLibrary::default()
        };
        library.playlist_tracks.insert(
            "p1".into(),
            vec![json!({
                "added_at": "2024-01-01T00:00:00Z",
                "added_by": {"id": ""},
                "track": track("t1", "First")
            })],
        );
        library.playlist_tracks.insert("p2".into(), Vec::new());
        library
    }

    #[test]
    fn test_selection_defaults_to_everything() {
        assert_eq!(Selection::from_flags(false, false, false, false), Selection::all());
        assert_eq!(Selection::from_flags(true, true, false, false), Selection::all());

        let only_albums = Selection::from_flags(false, false, true, false);
        assert!(only_albums.saved_albums && !only_albums.liked_songs && !only_albums.playlists);
    }

    #[tokio::test]
    async fn test_write_snapshot_writes_every_file() {
        let temp_dir = TempDir::new().unwrap();
        let policy = PagePolicy::without_delays();
        let summary = write_snapshot(&library(), temp_dir.path(), Selection::all(), &policy)
            .await
            .unwrap();

        assert_eq!(summary.liked_songs, Some(2));
        assert_eq!(summary.saved_albums, Some(1));
        assert_eq!(summary.playlists, Some(2));
        assert_eq!(summary.empty_playlists, vec!["Empty".to_string()]);

        let liked = fs::read_to_string(temp_dir.path().join(LIKED_SONGS_FILE)).unwrap();
        assert_eq!(liked.lines().count(), 3);
        assert!(liked.lines().nth(1).unwrap().starts_with("First\t"));

        assert!(temp_dir.path().join(SAVED_ALBUMS_FILE).exists());
        assert!(temp_dir.path().join(PLAYLISTS_INDEX_FILE).exists());

        let road_trip_path = temp_dir.path().join("playlists/Road\u{2215}Trip (p1).tsv");
        let road_trip = fs::read_to_string(road_trip_path).unwrap();
        assert!(road_trip.contains("\t<unknown>\tt1"));
        let empty = fs::read_to_string(temp_dir.path().join("playlists/Empty (p2).tsv")).unwrap();
        assert_eq!(empty.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_unfetchable_playlist_keeps_old_file() {
        let temp_dir = TempDir::new().unwrap();
        let old_file = temp_dir.path().join("playlists/Road\u{2215}Trip (p1).tsv");
        fs::create_dir_all(old_file.parent().unwrap()).unwrap();
        fs::write(&old_file, "previous contents\n").unwrap();

        let mut library = library();
        library.playlist_tracks.remove("p1");
        let selection = Selection::from_flags(false, false, false, true);
        let policy = PagePolicy::without_delays();
        let summary = write_snapshot(&library, temp_dir.path(), selection, &policy)
            .await
            .unwrap();

        assert_eq!(summary.skipped_playlists, vec!["Road/Trip".to_string()]);
        assert_eq!(fs::read_to_string(&old_file).unwrap(), "previous contents\n");
        assert!(!temp_dir.path().join(LIKED_SONGS_FILE).exists());
    }

    #[tokio::test]
    async fn test_second_identical_run_commits_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SnapshotRepo::open_or_create(temp_dir.path(), None).unwrap();
        config_identity(&repo);
        let policy = PagePolicy::without_delays();

        write_snapshot(&library(), repo.root(), Selection::all(), &policy).await.unwrap();
        let first = finalize_commit(&repo, "me", &reconcile(&repo).unwrap()).unwrap();
        assert!(matches!(first, CommitOutcome::Committed { .. }));
        let before = fs::read(repo.root().join(LIKED_SONGS_FILE)).unwrap();

        write_snapshot(&library(), repo.root(), Selection::all(), &policy).await.unwrap();
        let second = finalize_commit(&repo, "me", &reconcile(&repo).unwrap()).unwrap();
        assert!(matches!(second, CommitOutcome::NoChanges));
        assert_eq!(fs::read(repo.root().join(LIKED_SONGS_FILE)).unwrap(), before);
    }
}
