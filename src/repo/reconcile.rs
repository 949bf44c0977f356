// Change reconciler - compares the committed playlist index with the freshly
// written one and clears out track files that no longer belong in the tree

use super::SnapshotRepo;
use crate::error::Result;
use crate::snapshot::layout::{PlaylistFile, PLAYLISTS_DIR, PLAYLISTS_INDEX_FILE};
use crate::snapshot::writer::parse_playlist_index;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

/// A playlist that was in the last snapshot and is gone from this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedPlaylist {
    pub name: String,
    pub id: String,
}

impl DeletedPlaylist {
    pub fn file(&self) -> PlaylistFile {
        PlaylistFile::new(self.name.clone(), self.id.clone())
    }
}

/// Find playlists deleted since HEAD and remove their track files.
///
/// Also removes track files still named after a playlist's previous title,
/// so a rename shows up as a rename. Does nothing before the first commit or
/// when the index was not rewritten this run.
pub fn reconcile(repo: &SnapshotRepo) -> Result<Vec<DeletedPlaylist>> {
    let Some(old_index) = repo.read_head_file(Path::new(PLAYLISTS_INDEX_FILE))? else {
        debug!("No committed playlist index, nothing to reconcile");
        return Ok(Vec::new());
    };

    let new_index = match fs::read_to_string(repo.root().join(PLAYLISTS_INDEX_FILE)) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let current: HashMap<String, PlaylistFile> = parse_playlist_index(&new_index)
        .into_iter()
        .map(|file| (file.id.clone(), file))
        .collect();

    let deleted: Vec<DeletedPlaylist> = parse_playlist_index(&old_index)
        .into_iter()
        .filter(|old| !current.contains_key(&old.id))
        .map(|old| DeletedPlaylist {
            name: old.name,
            id: old.id,
        })
        .collect();

    for playlist in &deleted {
        let path = repo.root().join(playlist.file().relative_path());
        info!("Deleting {}", path.display());
        remove_if_present(&path)?;
    }

    let deleted_ids: HashSet<&str> = deleted.iter().map(|d| d.id.as_str()).collect();
    sweep_playlist_dir(repo, &current, &deleted_ids)?;

    Ok(deleted)
}

/// Remove leftovers of deleted playlists and files under a playlist's old name.
fn sweep_playlist_dir(
    repo: &SnapshotRepo,
    current: &HashMap<String, PlaylistFile>,
    deleted_ids: &HashSet<&str>,
) -> Result<()> {
    let dir = repo.root().join(PLAYLISTS_DIR);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut listing = Vec::new();
    for entry in entries {
        if let Some(name) = entry?.file_name().to_str() {
            listing.push(name.to_string());
        }
    }

    for name in stale_files(&listing, current, deleted_ids) {
        let path = dir.join(&name);
        debug!("Removing stale playlist file {}", path.display());
        remove_if_present(&path)?;
    }
    Ok(())
}

/// Names in `listing` that no longer belong in the playlist directory.
///
/// An old name only goes once the new name is its own entry in the same
/// listing. On a case-insensitive file system a case-only rename keeps one
/// entry, and that entry is the only copy of the tracks.
fn stale_files(
    listing: &[String],
    current: &HashMap<String, PlaylistFile>,
    deleted_ids: &HashSet<&str>,
) -> Vec<String> {
    let present: HashSet<&str> = listing.iter().map(String::as_str).collect();

    listing
        .iter()
        .filter(|name| {
            let Some(on_disk) = PlaylistFile::parse(name) else {
                return false;
            };
            if deleted_ids.contains(on_disk.id.as_str()) {
                return true;
            }
            match current.get(&on_disk.id) {
                Some(canonical) => {
                    let canonical_name = canonical.file_name();
                    canonical_name != on_disk.file_name()
                        && present.contains(canonical_name.as_str())
                }
                None => false,
            }
        })
        .cloned()
        .collect()
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("{} was already gone", path.display());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
