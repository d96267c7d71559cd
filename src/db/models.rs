use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::format::Format;
use crate::span::Span;

/// Declares a 128-bit random identifier type for one entity kind.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub(crate) fn random() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                self.0.to_sql()
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                Uuid::column_result(value).map(Self)
            }
        }
    };
}

entity_id!(
    /// Identifies a tombstone in the deletion ledger.
    DeletionId
);
entity_id!(
    /// Identifies a physical audio file.
    FileId
);
entity_id!(ArtistId);
entity_id!(AlbumId);
entity_id!(
    /// Identifies a logical track (a whole file or a slice of one).
    TrackId
);

/// Lifecycle of a file. `Tombstoned` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "deletion", rename_all = "lowercase")]
pub enum FileState {
    Active,
    Tombstoned(DeletionId),
}

impl FileState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn deletion(&self) -> Option<DeletionId> {
        match self {
            Self::Active => None,
            Self::Tombstoned(id) => Some(*id),
        }
    }
}

impl From<Option<DeletionId>> for FileState {
    fn from(deletion: Option<DeletionId>) -> Self {
        deletion.map_or(Self::Active, Self::Tombstoned)
    }
}

/// A tombstone record. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deletion {
    pub id: DeletionId,
    pub timestamp: DateTime<Utc>,
    pub comment: Option<String>,
}

/// Data for ingesting a file (hash and duration are computed upstream).
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub hash: Vec<u8>,
    pub size: i64,
    pub format: Format,
    pub duration: f64,
}

/// A file row read from the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub path: String,
    #[serde(with = "hex_bytes")]
    pub hash: Vec<u8>,
    pub size: i64,
    pub format: Format,
    pub duration: f64,
    pub added: DateTime<Utc>,
    pub state: FileState,
}

impl File {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

/// A file removed from the library, paired with its tombstone.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub file: File,
    pub deletion: Deletion,
}

/// Hashes carried by more than one file (active or not).
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub hash: Vec<u8>,
    pub files: Vec<FileId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: ArtistId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub title: Option<String>,
    pub year: Option<u16>,
}

/// Descriptive, mutable fields of a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub album: Option<AlbumId>,
    pub disc_number: Option<u8>,
    pub track_number: Option<u8>,
    pub genre: Option<String>,
    pub rating: Option<f64>,
}

/// Data for creating a track on an existing file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTrack {
    pub span: Span,
    pub info: TrackInfo,
}

impl NewTrack {
    pub fn whole(title: impl Into<String>) -> Self {
        Self {
            span: Span::whole(),
            info: TrackInfo {
                title: Some(title.into()),
                ..TrackInfo::default()
            },
        }
    }

    pub fn slice(span: Span, title: impl Into<String>) -> Self {
        Self {
            span,
            info: TrackInfo {
                title: Some(title.into()),
                ..TrackInfo::default()
            },
        }
    }
}

/// A track row read from the database. The file binding never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub file: FileId,
    pub span: Span,
    #[serde(flatten)]
    pub info: TrackInfo,
}

/// Two tracks on the same file whose spans overlap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanOverlap {
    pub first: TrackId,
    pub second: TrackId,
}

/// Result of splitting a file into tracks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitOutcome {
    pub tracks: Vec<TrackId>,
    pub overlaps: Vec<SpanOverlap>,
}

/// One entry of a track's ordered credit list.
#[derive(Debug, Clone, PartialEq)]
pub struct Credit {
    pub artist: ArtistId,
    pub artist_name: String,
    pub role: String,
    pub ord: f64,
}

/// A credit row as stored, including its insertion sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditRecord {
    pub track: TrackId,
    pub artist: ArtistId,
    pub ord: f64,
    pub role: String,
    pub seq: i64,
}

/// An active track joined with its file, album and credits.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryTrack {
    pub track: Track,
    pub path: String,
    pub album_title: Option<String>,
    pub album_year: Option<u16>,
    pub credits: Vec<Credit>,
}

/// Rows removed by an orphan sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    pub artists: usize,
    pub albums: usize,
}

impl GcReport {
    pub fn total(&self) -> usize {
        self.artists + self.albums
    }
}

/// Album lookup key used during an import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AlbumRef {
    pub title: Option<String>,
    pub year: Option<u16>,
}

/// How an imported track names its album.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlbumLink {
    /// Reuse the album with exactly this title and year, or create it.
    Lookup(AlbumRef),
    /// Always create a new album, even when one with the same title and
    /// year already exists.
    Create(AlbumRef),
    /// An album already in the catalog.
    Existing(AlbumId),
}

impl From<AlbumRef> for AlbumLink {
    fn from(r: AlbumRef) -> Self {
        Self::Lookup(r)
    }
}

/// An artist credit named the way the ingestion source saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportCredit {
    pub artist: String,
    pub role: String,
}

impl ImportCredit {
    pub fn new(artist: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            role: role.into(),
        }
    }
}

/// A track to create during an import, with names still unresolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportTrack {
    pub span: Span,
    pub title: Option<String>,
    pub album: Option<AlbumLink>,
    pub disc_number: Option<u8>,
    pub track_number: Option<u8>,
    pub genre: Option<String>,
    pub rating: Option<f64>,
    /// Credits in display order; the position becomes the credit's `ord`.
    pub credits: Vec<ImportCredit>,
}

/// A file together with the tracks decomposed from it.
#[derive(Debug, Clone)]
pub struct ImportFile {
    pub file: NewFile,
    pub tracks: Vec<ImportTrack>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub file: FileId,
    pub tracks: Vec<TrackId>,
    pub overlaps: Vec<SpanOverlap>,
}

/// Library statistics.
#[derive(Debug)]
pub struct LibraryStats {
    pub active_files: i64,
    pub tombstoned_files: i64,
    pub tracks: i64,
    pub artists: i64,
    pub albums: i64,
    pub credits: i64,
    pub duplicate_hashes: i64,
    pub formats: Vec<(String, i64)>,
}

/// Serialize content hashes as lowercase hex strings.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_and_display_roundtrip() {
        let id = FileId::random();
        let parsed: FileId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TrackId>().is_err());
    }

    #[test]
    fn file_state_from_nullable_column() {
        assert_eq!(FileState::from(None), FileState::Active);
        let d = DeletionId::random();
        let state = FileState::from(Some(d));
        assert!(!state.is_active());
        assert_eq!(state.deletion(), Some(d));
    }

    #[test]
    fn file_hash_serializes_as_hex() {
        let file = File {
            id: FileId::random(),
            path: "/a.flac".into(),
            hash: vec![0xde, 0xad, 0xbe, 0xef],
            size: 10,
            format: Format::Flac,
            duration: 1.5,
            added: Utc::now(),
            state: FileState::Active,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["hash"], "deadbeef");
        assert_eq!(json["state"]["kind"], "active");
        let back: File = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }

    #[test]
    fn tombstoned_state_carries_deletion_id() {
        let d = DeletionId::random();
        let json = serde_json::to_value(FileState::Tombstoned(d)).unwrap();
        assert_eq!(json["kind"], "tombstoned");
        assert_eq!(json["deletion"], d.to_string());
    }
}
