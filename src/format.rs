use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Audio container/codec formats the catalog accepts.
///
/// This set is closed: the `file.format` column carries a CHECK constraint
/// listing exactly these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Aac,
    Aiff,
    Alac,
    Ape,
    Flac,
    Mp3,
    Mp4,
    Ogg,
    Opus,
    Wav,
    Wma,
    Wv,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown audio format: {0}")]
pub struct UnknownFormat(pub String);

impl Format {
    pub const ALL: [Format; 12] = [
        Format::Aac,
        Format::Aiff,
        Format::Alac,
        Format::Ape,
        Format::Flac,
        Format::Mp3,
        Format::Mp4,
        Format::Ogg,
        Format::Opus,
        Format::Wav,
        Format::Wma,
        Format::Wv,
    ];

    /// The tag stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aac => "aac",
            Self::Aiff => "aiff",
            Self::Alac => "alac",
            Self::Ape => "ape",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Mp4 => "mp4",
            Self::Ogg => "ogg",
            Self::Opus => "opus",
            Self::Wav => "wav",
            Self::Wma => "wma",
            Self::Wv => "wv",
        }
    }

    /// Map a file extension (case-insensitive, no dot) to its format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "aac" => Some(Self::Aac),
            "aif" | "aiff" => Some(Self::Aiff),
            "alac" => Some(Self::Alac),
            "ape" => Some(Self::Ape),
            "flac" => Some(Self::Flac),
            "mp3" => Some(Self::Mp3),
            "m4a" | "mp4" => Some(Self::Mp4),
            "ogg" | "oga" => Some(Self::Ogg),
            "opus" => Some(Self::Opus),
            "wav" => Some(Self::Wav),
            "wma" => Some(Self::Wma),
            "wv" => Some(Self::Wv),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

impl ToSql for Format {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Format {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_map_to_formats() {
        assert_eq!(Format::from_extension("FLAC"), Some(Format::Flac));
        assert_eq!(Format::from_extension("m4a"), Some(Format::Mp4));
        assert_eq!(Format::from_extension("aif"), Some(Format::Aiff));
        assert_eq!(Format::from_extension("txt"), None);
        assert_eq!(
            Format::from_path(Path::new("/music/side a.Opus")),
            Some(Format::Opus)
        );
        assert_eq!(Format::from_path(Path::new("/music/no_extension")), None);
    }

    #[test]
    fn tags_parse_back() {
        for format in Format::ALL {
            assert_eq!(format.as_str().parse::<Format>(), Ok(format));
            assert_eq!(format.to_string(), format.as_str());
        }
        assert_eq!(
            "midi".parse::<Format>(),
            Err(UnknownFormat("midi".to_string()))
        );
    }
}
