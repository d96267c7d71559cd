use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;

use crate::db::CatalogError;
use crate::span::Span;

/// CUE timestamps count 75 frames per second.
const FRAMES_PER_SECOND: f64 = 75.0;

static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z]+)\s*(.*?)\s*$").unwrap());
static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^"(.*)"$"#).unwrap());
static FILE_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:"(.+)"|(\S+))(?:\s+\w+)?$"#).unwrap());
static TRACK_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})(?:\s+\S+)?$").unwrap());
static INDEX_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})\s+(\d+):(\d{1,2}):(\d{1,2})$").unwrap());
static REM_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^DATE\s+(\d{4})").unwrap());

#[derive(Error, Debug)]
pub enum CueError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("track {0} has no INDEX 01")]
    MissingIndex(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CueTrack {
    pub number: u8,
    pub title: Option<String>,
    pub performer: Option<String>,
    /// Seconds from the start of the file (INDEX 01).
    pub start: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CueFile {
    pub name: String,
    pub tracks: Vec<CueTrack>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CueSheet {
    pub title: Option<String>,
    pub performer: Option<String>,
    pub year: Option<u16>,
    pub files: Vec<CueFile>,
}

fn unquote(value: &str) -> String {
    QUOTED
        .captures(value)
        .and_then(|c| c.get(1))
        .map_or(value, |m| m.as_str())
        .to_string()
}

fn syntax(line: usize, message: impl Into<String>) -> CueError {
    CueError::Syntax {
        line,
        message: message.into(),
    }
}

struct PendingTrack {
    number: u8,
    title: Option<String>,
    performer: Option<String>,
    start: Option<f64>,
}

impl PendingTrack {
    fn finish(self) -> Result<CueTrack, CueError> {
        Ok(CueTrack {
            number: self.number,
            title: self.title,
            performer: self.performer,
            start: self.start.ok_or(CueError::MissingIndex(self.number))?,
        })
    }
}

impl CueSheet {
    /// Parse the text of a CUE sheet. Unknown commands are ignored.
    pub fn parse(text: &str) -> Result<Self, CueError> {
        let mut sheet = CueSheet::default();
        let mut track: Option<PendingTrack> = None;

        for (i, raw) in text.trim_start_matches('\u{feff}').lines().enumerate() {
            let line = i + 1;
            let Some(caps) = COMMAND.captures(raw) else {
                continue;
            };
            let command = caps[1].to_ascii_uppercase();
            let value = &caps[2];

            match command.as_str() {
                "FILE" => {
                    if let Some(t) = track.take() {
                        Self::push_track(&mut sheet, line, t)?;
                    }
                    let m = FILE_ENTRY
                        .captures(value)
                        .ok_or_else(|| syntax(line, format!("bad FILE entry: {value}")))?;
                    let name = m.get(1).or_else(|| m.get(2)).map_or("", |g| g.as_str());
                    sheet.files.push(CueFile {
                        name: name.to_string(),
                        tracks: Vec::new(),
                    });
                }
                "TRACK" => {
                    if let Some(t) = track.take() {
                        Self::push_track(&mut sheet, line, t)?;
                    }
                    let m = TRACK_ENTRY
                        .captures(value)
                        .ok_or_else(|| syntax(line, format!("bad TRACK entry: {value}")))?;
                    let number = m[1]
                        .parse()
                        .map_err(|_| syntax(line, "track number out of range"))?;
                    track = Some(PendingTrack {
                        number,
                        title: None,
                        performer: None,
                        start: None,
                    });
                }
                "INDEX" => {
                    let m = INDEX_ENTRY
                        .captures(value)
                        .ok_or_else(|| syntax(line, format!("bad INDEX entry: {value}")))?;
                    let Some(t) = track.as_mut() else {
                        return Err(syntax(line, "INDEX outside of a TRACK"));
                    };
                    if &m[1] == "01" || &m[1] == "1" {
                        let minutes: f64 = m[2].parse().map_err(|_| syntax(line, "bad minutes"))?;
                        let seconds: f64 = m[3].parse().map_err(|_| syntax(line, "bad seconds"))?;
                        let frames: f64 = m[4].parse().map_err(|_| syntax(line, "bad frames"))?;
                        t.start = Some(minutes * 60.0 + seconds + frames / FRAMES_PER_SECOND);
                    }
                }
                "TITLE" => match track.as_mut() {
                    Some(t) => t.title = Some(unquote(value)),
                    None => sheet.title = Some(unquote(value)),
                },
                "PERFORMER" => match track.as_mut() {
                    Some(t) => t.performer = Some(unquote(value)),
                    None => sheet.performer = Some(unquote(value)),
                },
                "REM" => {
                    if let Some(m) = REM_DATE.captures(value) {
                        sheet.year = m[1].parse().ok();
                    }
                }
                _ => {}
            }
        }

        if let Some(t) = track.take() {
            Self::push_track(&mut sheet, text.lines().count(), t)?;
        }
        Ok(sheet)
    }

    fn push_track(sheet: &mut CueSheet, line: usize, t: PendingTrack) -> Result<(), CueError> {
        let file = sheet
            .files
            .last_mut()
            .ok_or_else(|| syntax(line, "TRACK before any FILE"))?;
        file.tracks.push(t.finish()?);
        Ok(())
    }

    /// The FILE entry naming `audio`, matched on file name, case-insensitively.
    pub fn file_for(&self, audio: &Path) -> Option<&CueFile> {
        let wanted = audio.file_name()?.to_str()?;
        self.files.iter().find(|f| {
            Path::new(&f.name.replace('\\', "/"))
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.eq_ignore_ascii_case(wanted))
        })
    }
}

impl CueFile {
    /// One span per track: each ends where the next begins, the last runs to
    /// the end of the file.
    pub fn spans(&self) -> Result<Vec<Span>, CatalogError> {
        let mut spans = Vec::with_capacity(self.tracks.len());
        for (i, t) in self.tracks.iter().enumerate() {
            let end = self.tracks.get(i + 1).map(|next| next.start);
            spans.push(Span::new(Some(t.start), end)?);
        }
        Ok(spans)
    }
}

/// Find a sibling `.cue` sheet whose FILE entry names `audio`.
pub fn sheet_for(audio: &Path) -> Result<Option<CueSheet>, CueError> {
    let Some(dir) = audio.parent() else {
        return Ok(None);
    };
    let io_err = |source| CueError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_err)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("cue"))
        })
        .collect();
    // Prefer the sheet that shares the audio file's stem
    candidates.sort_by_key(|p| p.file_stem() != audio.file_stem());

    for path in candidates {
        let bytes = std::fs::read(&path).map_err(|source| CueError::Io {
            path: path.clone(),
            source,
        })?;
        let sheet = match CueSheet::parse(&String::from_utf8_lossy(&bytes)) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Ignoring {}: {}", path.display(), e);
                continue;
            }
        };
        if sheet.file_for(audio).is_some_and(|f| !f.tracks.is_empty()) {
            log::debug!("Using {} for {}", path.display(), audio.display());
            return Ok(Some(sheet));
        }
    }
    Ok(None)
}
