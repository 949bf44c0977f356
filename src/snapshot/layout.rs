// Where every snapshot file lives inside the working tree, and how playlist
// file names encode both the display name and the playlist ID

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const LIKED_SONGS_FILE: &str = "liked_songs.tsv";
pub const SAVED_ALBUMS_FILE: &str = "saved_albums.tsv";
pub const PLAYLISTS_INDEX_FILE: &str = "playlists.tsv";
pub const PLAYLISTS_DIR: &str = "playlists";
pub const README_FILE: &str = "README.md";

/// DIVISION SLASH, looks like `/` but is legal in a path segment.
pub const SLASH_SUBSTITUTE: char = '\u{2215}';

static PLAYLIST_FILE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn playlist_file_pattern() -> Option<&'static Regex> {
    PLAYLIST_FILE_PATTERN
        .get_or_init(|| Regex::new(r"^(?P<name>.*) \((?P<id>[^()/]*)\)\.tsv$").ok())
        .as_ref()
}

pub fn escape_name(name: &str) -> String {
    name.replace('/', &SLASH_SUBSTITUTE.to_string())
}

pub fn unescape_name(name: &str) -> String {
    name.replace(SLASH_SUBSTITUTE, "/")
}

/// A playlist track file, identified by display name and ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlaylistFile {
    pub name: String,
    pub id: String,
}

impl PlaylistFile {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{} ({}).tsv", escape_name(&self.name), self.id)
    }

    /// Path relative to the working tree root.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(PLAYLISTS_DIR).join(self.file_name())
    }

    /// Parse `{escaped name} ({id}).tsv`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let caps = playlist_file_pattern()?.captures(file_name)?;
        let id = caps.name("id")?.as_str();
        if id.is_empty() {
            return None;
        }
        Some(Self::new(unescape_name(caps.name("name")?.as_str()), id))
    }

    /// Parse a repository-relative path, accepting only direct children of `playlists/`.
    pub fn from_repo_path(path: &Path) -> Option<Self> {
        let parent = path.parent()?;
        if parent != Path::new(PLAYLISTS_DIR) {
            return None;
        }
        Self::parse(path.file_name()?.to_str()?)
    }
}
