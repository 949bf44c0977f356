// Commit composer - git only has per-file stats for a commit that exists
// so a provisional commit is made, diffed against its parent and amended with the summary

use super::reconcile::DeletedPlaylist;
use super::SnapshotRepo;
use crate::error::Result;
use crate::snapshot::layout::{PlaylistFile, LIKED_SONGS_FILE, SAVED_ALBUMS_FILE};
use chrono::Local;
use git2::{
    Commit, Delta, Diff, DiffFindOptions, DiffOptions, IndexAddOption, Oid, Patch, Repository,
    ResetType, Tree,
};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

pub const PROVISIONAL_MESSAGE: &str = "spotify-snapshot: provisional commit";
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub insertions: usize,
    pub deletions: usize,
    /// Data rows in the new version of the file, header excluded
    pub rows: usize,
}

impl FileStats {
    fn touched(&self) -> bool {
        self.insertions > 0 || self.deletions > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistChange {
    Created { file: PlaylistFile, stats: FileStats },
    Deleted { file: PlaylistFile },
    Renamed { from: PlaylistFile, to: PlaylistFile, stats: FileStats },
    Changed { file: PlaylistFile, stats: FileStats },
}

/// What one commit did to the snapshot files.
#[derive(Debug, Default)]
pub struct CommitStats {
    pub first_commit: bool,
    pub liked_songs: Option<FileStats>,
    pub saved_albums: Option<FileStats>,
    pub playlists: Vec<PlaylistChange>,
}

#[derive(Debug)]
pub enum CommitOutcome {
    NoChanges,
    Committed { oid: Oid, message: String },
}

/// Stage the working tree and commit it with a generated summary.
///
/// `user` goes into the title; `deleted` comes from the reconciler.
#[instrument(skip_all)]
pub fn finalize_commit(
    repo: &SnapshotRepo,
    user: &str,
    deleted: &[DeletedPlaylist],
) -> Result<CommitOutcome> {
    let git = repo.repository();

    let mut index = git.index()?;
    index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"], None)?;
    index.write()?;
    let tree_id = index.write_tree()?;

    let parent = repo.head_commit()?;
    let unchanged = match &parent {
        Some(parent) => parent.tree_id() == tree_id,
        None => index.is_empty(),
    };
    if unchanged {
        info!("No changes to commit");
        return Ok(CommitOutcome::NoChanges);
    }

    let tree = git.find_tree(tree_id)?;
    let signature = repo.signature()?;
    let parents: Vec<&Commit> = parent.iter().collect();
    let provisional = git.commit(
        Some("HEAD"),
        &signature,
        &signature,
        PROVISIONAL_MESSAGE,
        &tree,
        &parents,
    )?;
    debug!(%provisional, "Created provisional commit");

    match amend_with_summary(git, provisional, user, deleted) {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            if let Err(undo_error) = undo_provisional(git, parent.as_ref()) {
                warn!("Could not undo provisional commit: {}", undo_error);
            }
            Err(e)
        }
    }
}

/// Move HEAD back to `parent`, or back to an unborn branch on the first commit.
/// The index keeps the staged tree either way.
fn undo_provisional(git: &Repository, parent: Option<&Commit>) -> Result<()> {
    match parent {
        Some(parent) => git.reset(parent.as_object(), ResetType::Soft, None)?,
        None => git.head()?.delete()?,
    }
    Ok(())
}

fn amend_with_summary(
    git: &Repository,
    provisional: Oid,
    user: &str,
    deleted: &[DeletedPlaylist],
) -> Result<CommitOutcome> {
    let commit = git.find_commit(provisional)?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };

    let stats = collect_stats(git, parent_tree.as_ref(), &commit.tree()?)?;
    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    let message = compose_message(&stats, deleted, user, &timestamp);

    let oid = commit.amend(Some("HEAD"), None, None, None, Some(message.as_str()), None)?;
    info!("Committed snapshot {}", oid);
    Ok(CommitOutcome::Committed { oid, message })
}

/// Per-file statistics of `new` against `old`, with playlist renames resolved.
pub fn collect_stats(git: &Repository, old: Option<&Tree>, new: &Tree) -> Result<CommitStats> {
    let mut diff = git.diff_tree_to_tree(old, Some(new), Some(&mut DiffOptions::new()))?;
    let mut find = DiffFindOptions::new();
    find.renames(true);
    diff.find_similar(Some(&mut find))?;

    let mut stats = CommitStats {
        first_commit: old.is_none(),
        ..CommitStats::default()
    };
    let mut added: Vec<(PlaylistFile, Oid, FileStats)> = Vec::new();
    let mut removed: Vec<(PlaylistFile, Oid)> = Vec::new();

    for (idx, delta) in diff.deltas().enumerate() {
        let file_stats = patch_stats(git, &diff, idx, delta.new_file().id())?;
        let old_path = delta.old_file().path();
        let new_path = delta.new_file().path();

        if delta.status() != Delta::Deleted {
            if new_path == Some(Path::new(LIKED_SONGS_FILE)) {
                stats.liked_songs = Some(file_stats);
                continue;
            }
            if new_path == Some(Path::new(SAVED_ALBUMS_FILE)) {
                stats.saved_albums = Some(file_stats);
                continue;
            }
        }

        let old_file = old_path.and_then(PlaylistFile::from_repo_path);
        let new_file = new_path.and_then(PlaylistFile::from_repo_path);

        match delta.status() {
            Delta::Added => {
                if let Some(file) = new_file {
                    added.push((file, delta.new_file().id(), file_stats));
                }
            }
            Delta::Deleted => {
                if let Some(file) = old_file {
                    removed.push((file, delta.old_file().id()));
                }
            }
            Delta::Modified => {
                if let Some(file) = new_file {
                    stats.playlists.push(PlaylistChange::Changed { file, stats: file_stats });
                }
            }
            Delta::Renamed => match (old_file, new_file) {
                (Some(from), Some(to)) if from.id == to.id => {
                    stats.playlists.push(PlaylistChange::Renamed { from, to, stats: file_stats });
                }
                // Content looked alike but these are different playlists
                (from, to) => {
                    if let Some(from) = from {
                        removed.push((from, delta.old_file().id()));
                    }
                    if let Some(to) = to {
                        added.push((to, delta.new_file().id(), file_stats));
                    }
                }
            },
            _ => {}
        }
    }

    // Same ID on both sides is a rename git's similarity check missed
    for (file, old_blob) in removed {
        match added.iter().position(|(candidate, _, _)| candidate.id == file.id) {
            Some(pos) => {
                let (to, new_blob, new_stats) = added.remove(pos);
                let mut rename_stats = blob_stats(git, old_blob, new_blob)?;
                rename_stats.rows = new_stats.rows;
                stats.playlists.push(PlaylistChange::Renamed {
                    from: file,
                    to,
                    stats: rename_stats,
                });
            }
            None => stats.playlists.push(PlaylistChange::Deleted { file }),
        }
    }
    for (file, _, file_stats) in added {
        stats.playlists.push(PlaylistChange::Created { file, stats: file_stats });
    }

    Ok(stats)
}

fn patch_stats(git: &Repository, diff: &Diff<'_>, idx: usize, new_blob: Oid) -> Result<FileStats> {
    let (insertions, deletions) = match Patch::from_diff(diff, idx)? {
        Some(patch) => {
            let (_, insertions, deletions) = patch.line_stats()?;
            (insertions, deletions)
        }
        None => (0, 0),
    };
    Ok(FileStats {
        insertions,
        deletions,
        rows: data_rows(git, new_blob)?,
    })
}

fn blob_stats(git: &Repository, old: Oid, new: Oid) -> Result<FileStats> {
    let old_blob = git.find_blob(old)?;
    let new_blob = git.find_blob(new)?;
    let patch = Patch::from_blobs(&old_blob, None, &new_blob, None, None)?;
    let (_, insertions, deletions) = patch.line_stats()?;
    Ok(FileStats {
        insertions,
        deletions,
        rows: 0,
    })
}

fn data_rows(git: &Repository, blob: Oid) -> Result<usize> {
    if blob.is_zero() {
        return Ok(0);
    }
    let blob = git.find_blob(blob)?;
    let lines = blob.content().iter().filter(|&&b| b == b'\n').count();
    Ok(lines.saturating_sub(1))
}

/// Build the commit message from the statistics of the provisional commit.
pub fn compose_message(
    stats: &CommitStats,
    deleted: &[DeletedPlaylist],
    user: &str,
    timestamp: &str,
) -> String {
    let mut lines: Vec<String> = Vec::new();

    let title = if stats.first_commit {
        // A new file's insertions are its rows plus the header
        if let Some(liked) = stats.liked_songs {
            let tracks = liked.insertions.saturating_sub(1);
            lines.push(format!("Liked Songs        : {} tracks", tracks));
        }
        if let Some(albums) = stats.saved_albums {
            let count = albums.insertions.saturating_sub(1);
            lines.push(format!("Saved Albums       : {} albums", count));
        }

        let mut playlists: Vec<(&str, usize)> = stats
            .playlists
            .iter()
            .filter_map(|change| match change {
                PlaylistChange::Created { file, stats } => {
                    Some((file.name.as_str(), stats.insertions.saturating_sub(1)))
                }
                _ => None,
            })
            .collect();
        playlists.sort();

        lines.push(format!("Number of Playlists: {}", playlists.len()));
        push_section(
            &mut lines,
            "Playlist Details:",
            playlists
                .iter()
                .map(|(name, tracks)| format!("- {}: {} tracks", name, tracks))
                .collect(),
        );

        format!("Initial Snapshot – {} – {}", user, timestamp)
    } else {
        if let Some(liked) = stats.liked_songs {
            lines.push(format!("Liked Songs        : {} tracks ({:+})", liked.rows, net(&liked)));
            lines.push(format!("Liked Songs Changes: +{}, -{}", liked.insertions, liked.deletions));
        }
        if let Some(albums) = stats.saved_albums {
            lines.push(format!("Saved Albums       : {} albums ({:+})", albums.rows, net(&albums)));
            lines.push(format!(
                "Saved Albums Changes: +{}, -{}",
                albums.insertions, albums.deletions
            ));
        }

        let renamed_ids: HashSet<&str> = stats
            .playlists
            .iter()
            .filter_map(|change| match change {
                PlaylistChange::Renamed { to, .. } => Some(to.id.as_str()),
                _ => None,
            })
            .collect();
        let deleted_ids: HashSet<&str> = deleted.iter().map(|d| d.id.as_str()).collect();

        let mut created = Vec::new();
        let mut renamed = Vec::new();
        let mut changed = Vec::new();
        for change in &stats.playlists {
            match change {
                PlaylistChange::Created { file, stats }
                    if !deleted_ids.contains(file.id.as_str()) =>
                {
                    created.push(format!("- {} ({} tracks)", file.name, stats.rows));
                }
                PlaylistChange::Renamed { from, to, stats } => {
                    renamed.push(format!("- {} → {}", from.name, to.name));
                    if stats.touched() {
                        changed.push(changed_line(&to.name, stats));
                    }
                }
                PlaylistChange::Changed { file, stats } if stats.touched() => {
                    changed.push(changed_line(&file.name, stats));
                }
                _ => {}
            }
        }
        let mut removed: Vec<String> = deleted
            .iter()
            .filter(|d| !renamed_ids.contains(d.id.as_str()))
            .map(|d| format!("- {}", d.name))
            .collect();

        created.sort();
        removed.sort();
        renamed.sort();
        changed.sort();

        push_section(&mut lines, "Created Playlists:", created);
        push_section(&mut lines, "Deleted Playlists:", removed);
        push_section(&mut lines, "Renamed Playlists:", renamed);
        push_section(&mut lines, "Changed Playlists:", changed);

        format!("Snapshot – {} – {}", user, timestamp)
    };

    let body = lines.join("\n");
    let body = body.trim_start_matches('\n');
    if body.is_empty() {
        title
    } else {
        format!("{}\n\n{}", title, body)
    }
}

fn net(stats: &FileStats) -> i64 {
    stats.insertions as i64 - stats.deletions as i64
}

fn changed_line(name: &str, stats: &FileStats) -> String {
    format!("- {}: +{} -{}", name, stats.insertions, stats.deletions)
}

fn push_section(lines: &mut Vec<String>, heading: &str, items: Vec<String>) {
    if items.is_empty() {
        return;
    }
    lines.push(String::new());
    lines.push(heading.to_string());
    lines.extend(items);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::reconcile::reconcile;
    use crate::repo::test_support::{commit_all, config_identity, write};
    use crate::snapshot::layout::PLAYLISTS_INDEX_FILE;
    use crate::snapshot::writer::{LIKED_SONGS_HEADER, PLAYLIST_INDEX_HEADER};
    use tempfile::TempDir;

    fn setup() -> (TempDir, SnapshotRepo) {
        let temp_dir = TempDir::new().unwrap();
        let repo = SnapshotRepo::open_or_create(temp_dir.path(), None).unwrap();
        config_identity(&repo);
        (temp_dir, repo)
    }

    fn index(rows: &[(&str, &str)]) -> String {
        let mut content = format!("{}\n", PLAYLIST_INDEX_HEADER.join("\t"));
        for (name, id) in rows {
            content.push_str(&format!("{}\t\t0\tme\tfalse\t{}\n", name, id));
        }
        content
    }

    fn tracks(n: usize) -> String {
        let mut content = format!("{}\n", LIKED_SONGS_HEADER.join("\t"));
        for i in 0..n {
            content.push_str(&format!(
                "Song {i}\tArtist\tAlbum\t2024-01-01T00:00:{:02}Z\tid{i}\n",
                i % 60
            ));
        }
        content
    }

    fn committed_message(outcome: CommitOutcome) -> String {
        match outcome {
            CommitOutcome::Committed { message, .. } => message,
            CommitOutcome::NoChanges => panic!("expected a commit"),
        }
    }

    fn run(repo: &SnapshotRepo) -> CommitOutcome {
        let deleted = reconcile(repo).unwrap();
        finalize_commit(repo, "tester", &deleted).unwrap()
    }

    #[test]
    fn test_first_commit_excludes_header_rows() {
        let (_temp_dir, repo) = setup();
        write(&repo, LIKED_SONGS_FILE, &tracks(100));
        write(&repo, PLAYLISTS_INDEX_FILE, &index(&[("Mix", "m1")]));
        write(&repo, "playlists/Mix (m1).tsv", &tracks(7));

        let message = committed_message(run(&repo));

        assert!(message.starts_with("Initial Snapshot – tester – "));
        assert!(message.contains("Liked Songs        : 100 tracks"));
        assert!(message.contains("Number of Playlists: 1"));
        assert!(message.contains("- Mix: 7 tracks"));

        // One commit, carrying the real message
        let head = repo.head_commit().unwrap().unwrap();
        assert_eq!(head.parent_count(), 0);
        assert_eq!(head.message(), Some(message.as_str()));
    }

    #[test]
    fn test_unchanged_tree_is_no_changes() {
        let (_temp_dir, repo) = setup();
        write(&repo, LIKED_SONGS_FILE, &tracks(3));
        committed_message(run(&repo));
        let head = repo.head_commit().unwrap().unwrap().id();

        write(&repo, LIKED_SONGS_FILE, &tracks(3));
        assert!(matches!(run(&repo), CommitOutcome::NoChanges));
        assert_eq!(repo.head_commit().unwrap().unwrap().id(), head);
    }

    #[test]
    fn test_liked_songs_changes() {
        let (_temp_dir, repo) = setup();
        write(&repo, LIKED_SONGS_FILE, &tracks(3));
        committed_message(run(&repo));

        write(&repo, LIKED_SONGS_FILE, &tracks(5));
        let message = committed_message(run(&repo));

        assert!(message.starts_with("Snapshot – tester – "));
        assert!(message.contains("Liked Songs        : 5 tracks (+2)"));
        assert!(message.contains("Liked Songs Changes: +2, -0"));
        assert_eq!(repo.head_commit().unwrap().unwrap().parent_count(), 1);
    }

    #[test]
    fn test_rename_is_reported_once() {
        let (_temp_dir, repo) = setup();
        write(&repo, PLAYLISTS_INDEX_FILE, &index(&[("Old", "x")]));
        write(&repo, "playlists/Old (x).tsv", &tracks(4));
        committed_message(run(&repo));

        write(&repo, PLAYLISTS_INDEX_FILE, &index(&[("New", "x")]));
        write(&repo, "playlists/New (x).tsv", &tracks(4));
        let message = committed_message(run(&repo));

        assert!(message.contains("Renamed Playlists:\n- Old → New"));
        assert!(!message.contains("Created Playlists"));
        assert!(!message.contains("Deleted Playlists"));
        assert!(!repo.root().join("playlists/Old (x).tsv").exists());
    }

    #[test]
    fn test_created_deleted_and_changed_playlists() {
        let (_temp_dir, repo) = setup();
        write(&repo, PLAYLISTS_INDEX_FILE, &index(&[("Doomed", "d"), ("Grows", "g")]));
        write(&repo, "playlists/Doomed (d).tsv", &tracks(2));
        write(&repo, "playlists/Grows (g).tsv", &tracks(2));
        committed_message(run(&repo));

        write(&repo, PLAYLISTS_INDEX_FILE, &index(&[("Fresh", "f"), ("Grows", "g")]));
        write(&repo, "playlists/Fresh (f).tsv", &tracks(9));
        write(&repo, "playlists/Grows (g).tsv", &tracks(3));
        let message = committed_message(run(&repo));

        assert!(message.contains("Created Playlists:\n- Fresh (9 tracks)"));
        assert!(message.contains("Deleted Playlists:\n- Doomed"));
        assert!(message.contains("Changed Playlists:\n- Grows: +1 -0"));
        assert!(!message.contains("Renamed Playlists"));
        assert!(!repo.root().join("playlists/Doomed (d).tsv").exists());
    }

    #[test]
    fn test_compose_omits_empty_sections() {
        let stats = CommitStats {
            first_commit: false,
            liked_songs: None,
            saved_albums: None,
            playlists: vec![PlaylistChange::Changed {
                file: PlaylistFile::new("Quiet", "q"),
                stats: FileStats::default(),
            }],
        };

        let message = compose_message(&stats, &[], "me", "01/02/2024, 03:04:05");
        assert_eq!(message, "Snapshot – me – 01/02/2024, 03:04:05");
    }

    #[test]
    fn test_compose_filters_renamed_ids_from_deleted() {
        let stats = CommitStats {
            first_commit: false,
            liked_songs: None,
            saved_albums: None,
            playlists: vec![PlaylistChange::Renamed {
                from: PlaylistFile::new("A", "1"),
                to: PlaylistFile::new("B", "1"),
                stats: FileStats::default(),
            }],
        };
        let deleted = vec![DeletedPlaylist {
            name: "A".into(),
            id: "1".into(),
        }];

        let message = compose_message(&stats, &deleted, "me", "ts");
        assert_eq!(message, "Snapshot – me – ts\n\nRenamed Playlists:\n- A → B");
    }

    #[test]
    fn test_undo_first_provisional_leaves_branch_unborn() {
        let (_temp_dir, repo) = setup();
        write(&repo, LIKED_SONGS_FILE, &tracks(1));
        commit_all(&repo, PROVISIONAL_MESSAGE);
        assert!(repo.head_commit().unwrap().is_some());

        undo_provisional(repo.repository(), None).unwrap();

        assert!(repo.head_commit().unwrap().is_none());
        // Still staged for the next attempt
        let index = repo.repository().index().unwrap();
        assert!(index.get_path(Path::new(LIKED_SONGS_FILE), 0).is_some());
    }

    #[test]
    fn test_undo_later_provisional_resets_to_parent() {
        let (_temp_dir, repo) = setup();
        write(&repo, LIKED_SONGS_FILE, &tracks(1));
        let first = commit_all(&repo, "first");
        write(&repo, LIKED_SONGS_FILE, &tracks(2));
        commit_all(&repo, PROVISIONAL_MESSAGE);

        let parent = repo.repository().find_commit(first).unwrap();
        undo_provisional(repo.repository(), Some(&parent)).unwrap();

        assert_eq!(repo.head_commit().unwrap().unwrap().id(), first);
    }
}
