// Snapshot repository - the working tree and the git repository behind it
// Opened once per run and lent to the reconciler, the commit composer and the publisher

pub mod commit;
pub mod publish;
pub mod reconcile;

use crate::error::{Result, SnapshotError};
use crate::snapshot::layout::README_FILE;
use git2::build::RepoBuilder;
use git2::{Commit, ErrorCode, FetchOptions, Repository, Signature};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

pub use commit::{finalize_commit, CommitOutcome};
pub use publish::{maybe_push, PushOutcome, RemoteSettings};
pub use reconcile::{reconcile, DeletedPlaylist};

pub const REMOTE_NAME: &str = "origin";
const FALLBACK_NAME: &str = "spotify-snapshot";
const FALLBACK_EMAIL: &str = "spotify-snapshot@localhost";

const README_SCAFFOLD: &str = "# Spotify Library Snapshots\n\
\n\
This repository is written by `spotify-snapshot`. Every commit is one snapshot\n\
of a Spotify library:\n\
\n\
- `liked_songs.tsv`: liked songs\n\
- `saved_albums.tsv`: saved albums\n\
- `playlists.tsv`: every playlist, one row each\n\
- `playlists/`: the tracks of each playlist, one file per playlist\n\
\n\
Files are tab-separated and sorted, so `git log -p` shows exactly what changed.\n\
Use `spotify-snapshot --pretty-print <file>` to view one as a table.\n";

pub struct SnapshotRepo {
    repo: Repository,
    root: PathBuf,
}

impl SnapshotRepo {
    /// Open `path`, or create it by cloning `remote` (or `git init` without one).
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open_or_create(path: &Path, remote: Option<&RemoteSettings>) -> Result<Self> {
        let repo = if path.join(".git").exists() {
            debug!("Opening existing snapshot repository");
            Repository::open(path)?
        } else if let Some(remote) = remote {
            clone_or_init(path, remote)?
        } else {
            info!("Initializing new snapshot repository at {}", path.display());
            fs::create_dir_all(path)?;
            Repository::init(path)?
        };

        let root = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| setup_error(path, "repository has no working tree"))?;

        let snapshot_repo = Self { repo, root };
        snapshot_repo.ensure_readme()?;
        Ok(snapshot_repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// `None` while the repository has no commits.
    pub fn head_commit(&self) -> Result<Option<Commit<'_>>> {
        match self.repo.head() {
            Ok(head) => Ok(Some(head.peel_to_commit()?)),
            Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Content of `relative` as committed at HEAD, if HEAD exists and tracks it.
    pub fn read_head_file(&self, relative: &Path) -> Result<Option<String>> {
        let Some(commit) = self.head_commit()? else {
            return Ok(None);
        };
        let entry = match commit.tree()?.get_path(relative) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob = self.repo.find_blob(entry.id())?;
        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }

    /// The user's git identity, or a fixed one when none is configured.
    pub fn signature(&self) -> Result<Signature<'static>> {
        match self.repo.signature() {
            Ok(signature) => Ok(signature.to_owned()),
            Err(_) => Ok(Signature::now(FALLBACK_NAME, FALLBACK_EMAIL)?),
        }
    }

    fn ensure_readme(&self) -> Result<()> {
        let readme = self.root.join(README_FILE);
        if !readme.exists() {
            fs::write(&readme, README_SCAFFOLD)?;
            debug!("Created {}", readme.display());
        }
        Ok(())
    }

    pub fn close(self) {
        debug!("Closing snapshot repository {}", self.root.display());
    }
}

fn clone_or_init(path: &Path, remote: &RemoteSettings) -> Result<Repository> {
    if has_entries(path)? {
        return Err(setup_error(
            path,
            "directory is not empty and is not a git repository; \
             move its contents away or point backup_dir somewhere else",
        ));
    }
    info!("Cloning {} into {}", remote.url, path.display());

    let auth = publish::SshAuth::resolve(&remote.ssh_keys).ok();
    let attempts = std::cell::Cell::new(0);
    let mut fetch_options = FetchOptions::new();
    if let Some(auth) = auth.as_ref() {
        fetch_options.remote_callbacks(publish::callbacks(auth, &attempts));
    }
    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options);
    match builder.clone(&remote.url, path) {
        Ok(repo) => Ok(repo),
        Err(e) if is_empty_remote(&e) => {
            warn!("Remote {} has no commits yet, initializing locally", remote.url);
            fs::create_dir_all(path)?;
            let repo = Repository::init(path)?;
            repo.remote(REMOTE_NAME, &remote.url)?;
            Ok(repo)
        }
        Err(e) => {
            let reason = format!("cloning {} failed: {}", remote.url, e.message());
            Err(setup_error(path, &reason))
        }
    }
}

fn has_entries(path: &Path) -> Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

// Older libgit2 refuses to clone a remote without a HEAD
fn is_empty_remote(e: &git2::Error) -> bool {
    let message = e.message().to_lowercase();
    message.contains("remote head")
        || message.contains("unborn")
        || message.contains("empty repository")
}

fn setup_error(path: &Path, reason: &str) -> SnapshotError {
    SnapshotError::RepoSetup {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

impl Drop for SnapshotRepo {
    fn drop(&mut self) {
        debug!("Released snapshot repository {}", self.root.display());
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_readme_once() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshots");

        let repo = SnapshotRepo::open_or_create(&path, None).unwrap();
        assert!(path.join(".git").exists());
        assert!(repo.head_commit().unwrap().is_none());

        fs::write(path.join(README_FILE), "my notes\n").unwrap();
        repo.close();

        let _reopened = SnapshotRepo::open_or_create(&path, None).unwrap();
        assert_eq!(fs::read_to_string(path.join(README_FILE)).unwrap(), "my notes\n");
    }

    #[test]
    fn test_read_head_file() {
        let temp_dir = TempDir::new().unwrap();
        let repo = SnapshotRepo::open_or_create(temp_dir.path(), None).unwrap();
        config_identity(&repo);

        assert!(repo.read_head_file(Path::new("a.tsv")).unwrap().is_none());

        write(&repo, "a.tsv", "committed\n");
        commit_all(&repo, "first");
        write(&repo, "a.tsv", "working copy\n");

        assert_eq!(
            repo.read_head_file(Path::new("a.tsv")).unwrap().as_deref(),
            Some("committed\n")
        );
        assert!(repo.read_head_file(Path::new("missing.tsv")).unwrap().is_none());
    }

    #[test]
    fn test_failed_clone_is_setup_error() {
        let temp_dir = TempDir::new().unwrap();
        let remote = RemoteSettings {
            url: temp_dir.path().join("no-such-remote").display().to_string(),
            ssh_keys: Vec::new(),
        };

        let result = SnapshotRepo::open_or_create(&temp_dir.path().join("clone"), Some(&remote));
        assert!(matches!(result, Err(SnapshotError::RepoSetup { .. })));
    }

    #[test]
    fn test_clone_into_unrelated_directory_is_refused() {
        let temp_dir = TempDir::new().unwrap();
        let upstream_path = temp_dir.path().join("upstream");
        let upstream = SnapshotRepo::open_or_create(&upstream_path, None).unwrap();
        config_identity(&upstream);
        commit_all(&upstream, "seed");

        let target = temp_dir.path().join("target");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("unrelated.txt"), "keep me\n").unwrap();

        let remote = RemoteSettings {
            url: upstream_path.display().to_string(),
            ssh_keys: Vec::new(),
        };
        let result = SnapshotRepo::open_or_create(&target, Some(&remote));

        assert!(matches!(result, Err(SnapshotError::RepoSetup { .. })));
        assert!(!target.join(".git").exists());
        assert_eq!(
            fs::read_to_string(target.join("unrelated.txt")).unwrap(),
            "keep me\n"
        );
    }

    #[test]
    fn test_clone_of_empty_remote_keeps_origin() {
        let temp_dir = TempDir::new().unwrap();
        let upstream_path = temp_dir.path().join("upstream");
        Repository::init(&upstream_path).unwrap();

        let remote = RemoteSettings {
            url: upstream_path.display().to_string(),
            ssh_keys: Vec::new(),
        };
        let clone_path = temp_dir.path().join("clone");
        let clone = SnapshotRepo::open_or_create(&clone_path, Some(&remote)).unwrap();

        assert!(clone.head_commit().unwrap().is_none());
        let origin = clone.repository().find_remote(REMOTE_NAME).unwrap();
        assert_eq!(origin.url(), Some(remote.url.as_str()));
    }

    #[test]
    fn test_clone_from_local_remote() {
        let temp_dir = TempDir::new().unwrap();
        let upstream_path = temp_dir.path().join("upstream");
        let upstream = SnapshotRepo::open_or_create(&upstream_path, None).unwrap();
        config_identity(&upstream);
        commit_all(&upstream, "seed");

        let remote = RemoteSettings {
            url: upstream_path.display().to_string(),
            ssh_keys: Vec::new(),
        };
        let clone_path = temp_dir.path().join("clone");
        let clone = SnapshotRepo::open_or_create(&clone_path, Some(&remote)).unwrap();

        assert!(clone.head_commit().unwrap().is_some());
        assert!(clone.root().join(README_FILE).exists());
    }
}
