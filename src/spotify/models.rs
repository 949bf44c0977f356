// Typed Spotify records - validated once when the JSON comes in, plain fields after that

use serde::{Deserialize, Deserializer};

pub const UNNAMED_PLAYLIST: &str = "Unnamed Playlist";

/// One page of a cursor-paginated endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Page<T> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub total: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, next: Option<String>, total: u32) -> Self {
        Self { items, next, total }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Artist {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlbumRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Track {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    /// Absent for local files
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
}

impl Track {
    /// Spotify ID, or the `spotify:local:` URI for local files so they stay distinct.
    pub fn key(&self) -> Option<String> {
        self.id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| self.uri.clone().filter(|uri| !uri.is_empty()))
    }

    pub fn album_name(&self) -> &str {
        self.album.as_ref().map(|a| a.name.as_str()).unwrap_or("")
    }
}

/// Entry of the "liked songs" collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedTrack {
    #[serde(default, deserialize_with = "null_as_default")]
    pub added_at: String,
    /// Null for tracks Spotify has tombstoned
    #[serde(default)]
    pub track: Option<Track>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserRef {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaylistTrackEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub added_at: String,
    #[serde(default)]
    pub added_by: Option<UserRef>,
    #[serde(default)]
    pub track: Option<Track>,
}

impl PlaylistTrackEntry {
    /// Empty for Spotify-curated playlists.
    pub fn added_by_id(&self) -> &str {
        self.added_by.as_ref().map(|u| u.id.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Album {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artists: Vec<Artist>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SavedAlbum {
    #[serde(default, deserialize_with = "null_as_default")]
    pub added_at: String,
    #[serde(default)]
    pub album: Option<Album>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct TrackCount {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Playlist {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<UserRef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub collaborative: bool,
    #[serde(default)]
    pub tracks: Option<TrackCount>,
}

impl Playlist {
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => UNNAMED_PLAYLIST,
        }
    }

    pub fn track_total(&self) -> u32 {
        self.tracks.as_ref().map(|t| t.total).unwrap_or(0)
    }

    pub fn owner_id(&self) -> &str {
        self.owner.as_ref().map(|o| o.id.as_str()).unwrap_or("")
    }
}

/// `GET /v1/me`
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl CurrentUser {
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.id)
    }
}

/// A liked song with its track guaranteed present.
#[derive(Debug, Clone, PartialEq)]
pub struct LikedSong {
    pub added_at: String,
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LibraryAlbum {
    pub added_at: String,
    pub album: Album,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistTrack {
    pub added_at: String,
    pub added_by: String,
    pub track: Track,
}

/// Turns a raw page item into its snapshot key and record.
///
/// `None` means the item carries no usable entity (Spotify tombstones) and
/// is counted as skipped by the paginator.
pub trait SnapshotItem {
    type Record;

    fn into_record(self) -> Option<(String, Self::Record)>;
}

impl SnapshotItem for SavedTrack {
    type Record = LikedSong;

    fn into_record(self) -> Option<(String, LikedSong)> {
        let track = self.track?;
        let key = track.key()?;
        Some((
            key,
            LikedSong {
                added_at: self.added_at,
                track,
            },
        ))
    }
}

impl SnapshotItem for SavedAlbum {
    type Record = LibraryAlbum;

    fn into_record(self) -> Option<(String, LibraryAlbum)> {
        let album = self.album.filter(|a| !a.id.is_empty())?;
        Some((
            album.id.clone(),
            LibraryAlbum {
                added_at: self.added_at,
                album,
            },
        ))
    }
}

impl SnapshotItem for PlaylistTrackEntry {
    type Record = PlaylistTrack;

    fn into_record(self) -> Option<(String, PlaylistTrack)> {
        let added_by = self.added_by_id().to_string();
        let track = self.track?;
        let key = track.key()?;
        Some((
            key,
            PlaylistTrack {
                added_at: self.added_at,
                added_by,
                track,
            },
        ))
    }
}

impl SnapshotItem for Playlist {
    type Record = Playlist;

    fn into_record(self) -> Option<(String, Playlist)> {
        if self.id.is_empty() {
            return None;
        }
        Some((self.id.clone(), self))
    }
}

pub fn join_artists(artists: &[Artist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// Spotify sends explicit nulls where a default is what we mean
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
