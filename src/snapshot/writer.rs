// TSV writer - one header row, then one row per record
// Rows are sorted by a key that never ties so an unchanged library rewrites identical bytes

use super::layout::{PlaylistFile, LIKED_SONGS_FILE, PLAYLISTS_INDEX_FILE, SAVED_ALBUMS_FILE};
use crate::spotify::models::{join_artists, LibraryAlbum, LikedSong, Playlist, PlaylistTrack};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

pub const LIKED_SONGS_HEADER: &[&str] = &[
    "TRACK NAME",
    "TRACK ARTIST(S)",
    "ALBUM",
    "DATE ADDED",
    "TRACK ID",
];
pub const SAVED_ALBUMS_HEADER: &[&str] =
    &["ALBUM NAME", "ALBUM ARTIST(S)", "DATE ADDED", "ALBUM ID"];
pub const PLAYLIST_INDEX_HEADER: &[&str] = &[
    "PLAYLIST NAME",
    "PLAYLIST DESCRIPTION",
    "LENGTH",
    "OWNER",
    "COLLABORATIVE",
    "PLAYLIST ID",
];
pub const PLAYLIST_TRACKS_HEADER: &[&str] = &[
    "TRACK NAME",
    "TRACK ARTIST(S)",
    "ALBUM",
    "DATE ADDED",
    "ADDED BY",
    "TRACK ID",
];

/// Shown in the ADDED BY column for Spotify-curated playlists.
pub const UNKNOWN_USER: &str = "<unknown>";

/// Write `header` plus one row per record to `dest`, sorted ascending by `sort_key`.
///
/// Parent directories are created; an existing file is replaced.
pub fn write_records<R, K, S, F>(
    records: &HashMap<String, R>,
    sort_key: S,
    header: &[&str],
    row: F,
    dest: &Path,
) -> io::Result<()>
where
    K: Ord,
    S: Fn(&str, &R) -> K,
    F: Fn(&str, &R) -> Vec<String>,
{
    let mut entries: Vec<(&String, &R)> = records.iter().collect();
    entries.sort_by_cached_key(|(id, record)| sort_key(id, record));

    let mut out = String::new();
    push_row(&mut out, header.iter().copied());
    for (id, record) in entries {
        let fields = row(id, record);
        push_row(&mut out, fields.iter().map(String::as_str));
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, out)?;
    debug!("Wrote {} rows to {}", records.len(), dest.display());
    Ok(())
}

fn push_row<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push('\t');
        }
        out.push_str(&sanitize(field));
    }
    out.push('\n');
}

/// One record, one line: tabs and line breaks become spaces.
pub fn sanitize(field: &str) -> String {
    field
        .chars()
        .map(|c| if matches!(c, '\t' | '\r' | '\n') { ' ' } else { c })
        .collect()
}

/// The on-disk identity of a playlist's track file.
pub fn playlist_file(playlist: &Playlist) -> PlaylistFile {
    PlaylistFile::new(sanitize(playlist.display_name()), playlist.id.clone())
}

pub fn write_liked_songs(records: &HashMap<String, LikedSong>, root: &Path) -> io::Result<()> {
    write_records(
        records,
        |id, song| (song.added_at.clone(), song.track.name.clone(), id.to_string()),
        LIKED_SONGS_HEADER,
        |id, song| {
            vec![
                song.track.name.clone(),
                join_artists(&song.track.artists),
                song.track.album_name().to_string(),
                song.added_at.clone(),
                id.to_string(),
            ]
        },
        &root.join(LIKED_SONGS_FILE),
    )
}

pub fn write_saved_albums(records: &HashMap<String, LibraryAlbum>, root: &Path) -> io::Result<()> {
    write_records(
        records,
        |id, saved| (saved.added_at.clone(), saved.album.name.clone(), id.to_string()),
        SAVED_ALBUMS_HEADER,
        |id, saved| {
            vec![
                saved.album.name.clone(),
                join_artists(&saved.album.artists),
                saved.added_at.clone(),
                id.to_string(),
            ]
        },
        &root.join(SAVED_ALBUMS_FILE),
    )
}

/// Sorted by ID so a rename only touches its own row.
pub fn write_playlist_index(records: &HashMap<String, Playlist>, root: &Path) -> io::Result<()> {
    write_records(
        records,
        |id, _| id.to_string(),
        PLAYLIST_INDEX_HEADER,
        |id, playlist| {
            vec![
                playlist.display_name().to_string(),
                playlist.description.clone().unwrap_or_default(),
                playlist.track_total().to_string(),
                playlist.owner_id().to_string(),
                playlist.collaborative.to_string(),
                id.to_string(),
            ]
        },
        &root.join(PLAYLISTS_INDEX_FILE),
    )
}

pub fn write_playlist_tracks(
    records: &HashMap<String, PlaylistTrack>,
    file: &PlaylistFile,
    root: &Path,
) -> io::Result<()> {
    write_records(
        records,
        |id, entry| (entry.added_at.clone(), entry.track.name.clone(), id.to_string()),
        PLAYLIST_TRACKS_HEADER,
        |id, entry| {
            let added_by = if entry.added_by.is_empty() {
                UNKNOWN_USER.to_string()
            } else {
                entry.added_by.clone()
            };
            vec![
                entry.track.name.clone(),
                join_artists(&entry.track.artists),
                entry.track.album_name().to_string(),
                entry.added_at.clone(),
                added_by,
                id.to_string(),
            ]
        },
        &root.join(file.relative_path()),
    )
}

/// Read the (name, id) pairs back out of a playlist index file's content.
pub fn parse_playlist_index(content: &str) -> Vec<PlaylistFile> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?;
            let id = fields.last()?;
            (!id.is_empty()).then(|| PlaylistFile::new(name, id))
        })
        .collect()
}
