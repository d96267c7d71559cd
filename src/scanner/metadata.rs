use chrono::Datelike;
use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::collections::HashSet;
use std::path::Path;

/// Tags and stream properties read from an audio file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TagInfo {
    pub title: Option<String>,
    /// Track artists, in tag order, without duplicates.
    pub artists: Vec<String>,
    pub composers: Vec<String>,
    pub remixers: Vec<String>,
    pub album: Option<String>,
    pub year: Option<u16>,
    pub track_number: Option<u8>,
    pub disc_number: Option<u8>,
    pub genre: Option<String>,
    pub duration_secs: f64,
}

/// Read tags from an audio file.
///
/// A file lofty cannot open is an error. A readable file without any tag
/// still yields its duration.
pub fn read_tags(path: &Path) -> Result<TagInfo, lofty::error::LoftyError> {
    let tagged_file = lofty::read_from_path(path)?;
    let duration_secs = tagged_file.properties().duration().as_secs_f64();

    // Try primary tag, then fall back
    let Some(tag) = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
    else {
        log::debug!("No tags in {}", path.display());
        return Ok(TagInfo {
            duration_secs,
            ..TagInfo::default()
        });
    };

    let mut artists: Vec<String> = tag
        .get_strings(&ItemKey::TrackArtist)
        .map(str::to_string)
        .collect();
    if artists.is_empty() {
        artists.extend(tag.artist().map(|s| s.to_string()));
    }

    let year = tag
        .year()
        .and_then(|y| plausible_year(i64::from(y)))
        .or_else(|| {
            tag.get_string(&ItemKey::RecordingDate)
                .and_then(parse_year)
        });

    Ok(TagInfo {
        title: non_empty(tag.title().map(|s| s.to_string())),
        artists: distinct_names(artists),
        composers: distinct_names(tag.get_strings(&ItemKey::Composer).map(str::to_string)),
        remixers: distinct_names(tag.get_strings(&ItemKey::Remixer).map(str::to_string)),
        album: non_empty(tag.album().map(|s| s.to_string())),
        year,
        track_number: tag.track().and_then(|n| u8::try_from(n).ok()),
        disc_number: tag.disk().and_then(|n| u8::try_from(n).ok()),
        genre: non_empty(tag.genre().map(|s| s.to_string())),
        duration_secs,
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Years before recorded sound or after next year are tag noise.
pub fn plausible_year(year: i64) -> Option<u16> {
    let max = i64::from(chrono::Utc::now().year()) + 1;
    if (1861..=max).contains(&year) {
        u16::try_from(year).ok()
    } else {
        None
    }
}

/// Pull a year out of a date string such as `1977-05-08` or `1977`.
pub fn parse_year(date: &str) -> Option<u16> {
    let start = date.find(|c: char| c.is_ascii_digit())?;
    let digits: String = date[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .take(4)
        .collect();
    if digits.len() < 4 {
        return None;
    }
    plausible_year(digits.parse().ok()?)
}

/// Trim names, drop blanks and drop repeats that differ only in case or spacing.
pub fn distinct_names(names: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|n| !n.is_empty() && seen.insert(n.to_lowercase()))
        .collect()
}
