pub mod albums;
pub mod classify;
pub mod cue;
pub mod metadata;

use crate::config::AppConfig;
use crate::db::models::{AlbumLink, AlbumRef, ImportCredit, ImportFile, ImportTrack, NewFile};
use crate::db::{CatalogError, Database};
use crate::format::Format;
use crate::span::Span;
use albums::AlbumGroups;
use classify::{ExistingFiles, Hashed};
use cue::CueSheet;
use indicatif::{ProgressBar, ProgressStyle};
use metadata::TagInfo;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Comment written on tombstones for files that vanished from disk.
pub const MISSING_COMMENT: &str = "missing from disk";

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot resolve scan root {path}: {source}")]
    Root {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Database error: {0}")]
    Db(#[from] CatalogError),
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: String, message: String },
    #[error("CUE sheet error: {0}")]
    Cue(#[from] cue::CueError),
    #[error("Thread pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub workers: usize,
    pub tombstone_missing: bool,
    pub follow_links: bool,
}

impl ScanOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.resolve_workers(),
            tombstone_missing: config.scan.tombstone_missing,
            follow_links: config.scan.follow_links,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub discovered: u64,
    pub unchanged: u64,
    pub moved: u64,
    pub modified: u64,
    pub new: u64,
    pub tracks: u64,
    pub tombstoned: u64,
    pub errors: u64,
}

/// Scan directories for audio files and reconcile them with the catalog.
pub fn scan(db: &Database, roots: &[PathBuf], opts: &ScanOptions) -> Result<ScanResult, ScanError> {
    let mut result = ScanResult::default();

    // Catalogued paths are absolute, so roots must be too
    let roots = roots
        .iter()
        .map(|r| {
            std::fs::canonicalize(r).map_err(|source| ScanError::Root {
                path: r.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let audio_files = discover(&roots, opts.follow_links);
    result.discovered = audio_files.len() as u64;
    log::info!("Found {} audio files", audio_files.len());

    let pb = ProgressBar::new(audio_files.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message("Hashing...");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.workers.max(1))
        .build()?;
    let hashed: Vec<(PathBuf, std::io::Result<Hashed>)> = pool.install(|| {
        audio_files
            .into_par_iter()
            .map(|path| {
                let h = hash_file(&path);
                pb.inc(1);
                (path, h)
            })
            .collect()
    });
    pb.finish_with_message("Hashed");

    let mut found = Vec::with_capacity(hashed.len());
    for (path, h) in hashed {
        match h {
            Ok(h) => found.push(h),
            Err(e) => {
                log::warn!("Error hashing {}: {}", path.display(), e);
                result.errors += 1;
            }
        }
    }

    let existing = ExistingFiles::new(&db.active_files()?);
    let plan = classify::plan(found, &existing, &roots, |p| Path::new(p).exists());
    result.unchanged = plan.unchanged.len() as u64;

    for (id, f) in &plan.moved {
        match db.relocate_file(*id, &f.path) {
            Ok(()) => result.moved += 1,
            Err(e) => {
                log::warn!("Error relocating {} to {}: {}", id, f.path, e);
                result.errors += 1;
            }
        }
    }

    for (id, f) in &plan.modified {
        let refreshed = metadata::read_tags(Path::new(&f.path))
            .map_err(|e| ScanError::Metadata {
                path: f.path.clone(),
                message: e.to_string(),
            })
            .and_then(|tags| Ok(db.refresh_file(*id, &f.hash, f.size, tags.duration_secs)?));
        match refreshed {
            Ok(()) => result.modified += 1,
            Err(e) => {
                log::warn!("Error refreshing {}: {}", f.path, e);
                result.errors += 1;
            }
        }
    }

    let mut groups = AlbumGroups::new(&db.active_files()?);
    for f in &plan.new {
        match import_new(db, f, &mut groups) {
            Ok(tracks) => {
                result.new += 1;
                result.tracks += tracks as u64;
            }
            Err(e) => {
                log::warn!("Error importing {}: {}", f.path, e);
                result.errors += 1;
            }
        }
    }

    if opts.tombstone_missing {
        for id in &plan.missing {
            match db.soft_delete(*id, Some(MISSING_COMMENT)) {
                Ok(_) => result.tombstoned += 1,
                Err(e) => {
                    log::warn!("Error tombstoning {}: {}", id, e);
                    result.errors += 1;
                }
            }
        }
    } else if !plan.missing.is_empty() {
        log::info!(
            "{} catalogued file(s) are missing from disk (left active)",
            plan.missing.len()
        );
    }

    Ok(result)
}

/// Collect files under `roots` whose extension maps to a known format.
fn discover(roots: &[PathBuf], follow_links: bool) -> Vec<PathBuf> {
    let mut audio_files = Vec::new();
    for root in roots {
        for entry in WalkDir::new(root).follow_links(follow_links) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if entry.file_type().is_file() && Format::from_path(entry.path()).is_some() {
                audio_files.push(entry.into_path());
            }
        }
    }
    audio_files.sort();
    audio_files.dedup();
    audio_files
}

fn hash_file(path: &Path) -> std::io::Result<Hashed> {
    let file = std::fs::File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Sha256::new();
    std::io::copy(&mut BufReader::new(file), &mut hasher)?;
    Ok(Hashed {
        path: path.to_string_lossy().into_owned(),
        hash: hasher.finalize().to_vec(),
        size: i64::try_from(size).unwrap_or(i64::MAX),
    })
}

fn import_new(db: &Database, f: &Hashed, groups: &mut AlbumGroups) -> Result<usize, ScanError> {
    let path = Path::new(&f.path);
    let format = Format::from_path(path).ok_or_else(|| ScanError::Metadata {
        path: f.path.clone(),
        message: "unsupported extension".into(),
    })?;
    let tags = metadata::read_tags(path).map_err(|e| ScanError::Metadata {
        path: f.path.clone(),
        message: e.to_string(),
    })?;
    let sheet = cue::sheet_for(path)?;

    let file = NewFile {
        path: f.path.clone(),
        hash: f.hash.clone(),
        size: f.size,
        format,
        duration: tags.duration_secs,
    };
    let mut unit = build_import(file, &tags, sheet.as_ref())?;
    groups.assign(db, &mut unit)?;
    let outcome = db.import(&unit)?;
    groups.record(db, &unit, &outcome)?;
    Ok(outcome.tracks.len())
}

/// Credits for one track: performers, then composers, then remixers. An
/// artist appears once, under the first role that names them.
fn credits_from(performers: &[String], tags: &TagInfo) -> Vec<ImportCredit> {
    let roles = [
        (performers, "performer"),
        (tags.composers.as_slice(), "composer"),
        (tags.remixers.as_slice(), "remixer"),
    ];
    let mut seen = std::collections::HashSet::new();
    let mut credits = Vec::new();
    for (names, role) in roles {
        for name in names {
            let key = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
            if !key.is_empty() && seen.insert(key) {
                credits.push(ImportCredit::new(name.clone(), role));
            }
        }
    }
    credits
}

/// Turn tags, and a CUE sheet when one names this file, into an import unit.
/// Albums are named by title and year; the scan narrows them to the file's
/// album directory before importing.
pub fn build_import(
    file: NewFile,
    tags: &TagInfo,
    sheet: Option<&CueSheet>,
) -> Result<ImportFile, ScanError> {
    let path = PathBuf::from(&file.path);
    let cue_file = sheet.and_then(|s| s.file_for(&path));

    let tracks = match (sheet, cue_file) {
        (Some(sheet), Some(cf)) if !cf.tracks.is_empty() && file.duration > 0.0 => {
            let album = AlbumRef {
                title: sheet.title.clone().or_else(|| tags.album.clone()),
                year: sheet.year.or(tags.year),
            };
            let spans = cf.spans()?;
            cf.tracks
                .iter()
                .zip(spans)
                .map(|(t, span)| {
                    let performers: Vec<String> = t
                        .performer
                        .clone()
                        .or_else(|| sheet.performer.clone())
                        .map_or_else(|| tags.artists.clone(), |p| vec![p]);
                    ImportTrack {
                        span,
                        title: t.title.clone(),
                        album: Some(AlbumLink::Lookup(album.clone())),
                        disc_number: tags.disc_number,
                        track_number: Some(t.number),
                        genre: tags.genre.clone(),
                        rating: None,
                        credits: credits_from(&performers, tags),
                    }
                })
                .collect()
        }
        (_, cf) => {
            if cf.is_some() {
                log::warn!(
                    "{} has a CUE sheet but no readable duration; importing as one track",
                    file.path
                );
            }
            let album = (tags.album.is_some() || tags.year.is_some()).then(|| {
                AlbumLink::Lookup(AlbumRef {
                    title: tags.album.clone(),
                    year: tags.year,
                })
            });
            vec![ImportTrack {
                span: Span::whole(),
                title: tags.title.clone(),
                album,
                disc_number: tags.disc_number,
                track_number: tags.track_number,
                genre: tags.genre.clone(),
                rating: None,
                credits: credits_from(&tags.artists, tags),
            }]
        }
    };

    Ok(ImportFile { file, tracks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file(path: &str, duration: f64) -> NewFile {
        NewFile {
            path: path.to_string(),
            hash: vec![1; 32],
            size: 100,
            format: Format::Flac,
            duration,
        }
    }

    fn tags() -> TagInfo {
        TagInfo {
            title: Some("So What".into()),
            artists: vec!["Miles Davis".into(), "John Coltrane".into()],
            composers: vec!["miles davis".into(), "Bill Evans".into()],
            remixers: vec![],
            album: Some("Kind of Blue".into()),
            year: Some(1959),
            track_number: Some(1),
            disc_number: None,
            genre: Some("Jazz".into()),
            duration_secs: 545.0,
        }
    }

    #[test]
    fn whole_file_import_from_tags() {
        let unit = build_import(new_file("/m/so_what.flac", 545.0), &tags(), None).unwrap();
        assert_eq!(unit.tracks.len(), 1);
        let t = &unit.tracks[0];
        assert!(t.span.is_whole());
        assert_eq!(t.title.as_deref(), Some("So What"));
        assert_eq!(
            t.album,
            Some(AlbumLink::Lookup(AlbumRef {
                title: Some("Kind of Blue".into()),
                year: Some(1959)
            }))
        );
        // Miles is a performer and a composer; credited once, as performer
        let credits: Vec<_> = t
            .credits
            .iter()
            .map(|c| (c.artist.as_str(), c.role.as_str()))
            .collect();
        assert_eq!(
            credits,
            vec![
                ("Miles Davis", "performer"),
                ("John Coltrane", "performer"),
                ("Bill Evans", "composer"),
            ]
        );
    }

    #[test]
    fn untagged_file_has_no_album() {
        let bare = TagInfo {
            duration_secs: 10.0,
            ..TagInfo::default()
        };
        let unit = build_import(new_file("/m/x.wav", 10.0), &bare, None).unwrap();
        assert_eq!(unit.tracks[0].album, None);
        assert!(unit.tracks[0].credits.is_empty());
    }

    #[test]
    fn cue_sheet_splits_the_file() {
        let sheet = CueSheet::parse(
            "PERFORMER \"Miles Davis\"\nTITLE \"Kind of Blue\"\nFILE \"kob.flac\" WAVE\n\
             TRACK 01 AUDIO\nTITLE \"So What\"\nINDEX 01 00:00:00\n\
             TRACK 02 AUDIO\nTITLE \"Freddie Freeloader\"\nINDEX 01 09:05:00\n",
        )
        .unwrap();
        let unit =
            build_import(new_file("/m/kob.flac", 1000.0), &tags(), Some(&sheet)).unwrap();
        assert_eq!(unit.tracks.len(), 2);
        assert_eq!(unit.tracks[0].span.end(), Some(545.0));
        assert_eq!(unit.tracks[1].span.end(), None);
        assert_eq!(unit.tracks[1].title.as_deref(), Some("Freddie Freeloader"));
        assert_eq!(unit.tracks[1].track_number, Some(2));
        assert_eq!(unit.tracks[0].credits[0].artist, "Miles Davis");
        assert_eq!(unit.tracks[0].album, unit.tracks[1].album);
    }

    #[test]
    fn cue_without_duration_falls_back_to_one_track() {
        let sheet = CueSheet::parse(
            "FILE \"kob.flac\" WAVE\nTRACK 01 AUDIO\nINDEX 01 00:00:00\n\
             TRACK 02 AUDIO\nINDEX 01 01:00:00\n",
        )
        .unwrap();
        let unit = build_import(new_file("/m/kob.flac", 0.0), &tags(), Some(&sheet)).unwrap();
        assert_eq!(unit.tracks.len(), 1);
        assert!(unit.tracks[0].span.is_whole());
    }

    #[test]
    fn scan_moves_and_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let db = Database::open_in_memory().unwrap();

        // Catalogue two files directly, as an earlier scan would have
        let a_path = root.join("a.flac");
        let b_path = root.join("b.flac");
        std::fs::write(&a_path, b"aaaa").unwrap();
        let a = hash_file(&a_path).unwrap();
        let a_id = db
            .ingest(&NewFile {
                path: a.path.clone(),
                hash: a.hash.clone(),
                size: a.size,
                format: Format::Flac,
                duration: 0.0,
            })
            .unwrap();
        let b_id = db
            .ingest(&NewFile {
                path: b_path.to_string_lossy().into_owned(),
                hash: vec![9; 32],
                size: 4,
                format: Format::Flac,
                duration: 0.0,
            })
            .unwrap();

        // a.flac moves into a subfolder; b.flac never existed on disk
        let moved = root.join("sub").join("a.flac");
        std::fs::create_dir_all(moved.parent().unwrap()).unwrap();
        std::fs::rename(&a_path, &moved).unwrap();

        let opts = ScanOptions {
            workers: 2,
            tombstone_missing: true,
            follow_links: false,
        };
        let result = scan(&db, &[root], &opts).unwrap();
        assert_eq!(result.discovered, 1);
        assert_eq!(result.moved, 1);
        assert_eq!(result.tombstoned, 1);
        assert_eq!(result.new, 0);

        assert_eq!(db.get_file(a_id).unwrap().path, moved.to_string_lossy());
        assert!(db.is_active(a_id).unwrap());
        assert!(!db.is_active(b_id).unwrap());
        let stones = db.tombstones().unwrap();
        assert_eq!(stones[0].deletion.comment.as_deref(), Some(MISSING_COMMENT));
    }

    #[test]
    fn relative_root_matches_catalogued_paths() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let music = base.join("music");
        std::fs::create_dir_all(&music).unwrap();
        let a_path = music.join("a.flac");
        std::fs::write(&a_path, b"aaaa").unwrap();
        let a = hash_file(&a_path).unwrap();

        let db = Database::open_in_memory().unwrap();
        let id = db
            .ingest(&NewFile {
                path: a.path.clone(),
                hash: a.hash.clone(),
                size: a.size,
                format: Format::Flac,
                duration: 0.0,
            })
            .unwrap();

        let opts = ScanOptions {
            workers: 1,
            tombstone_missing: true,
            follow_links: false,
        };
        let cwd = std::env::current_dir().unwrap();
        std::env::set_current_dir(&base).unwrap();
        let result = scan(&db, &[PathBuf::from("music")], &opts);
        std::env::set_current_dir(cwd).unwrap();
        let result = result.unwrap();

        assert_eq!(result.unchanged, 1);
        assert_eq!(result.new, 0);
        assert_eq!(result.tombstoned, 0);
        let active = db.active_files().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let opts = ScanOptions {
            workers: 1,
            tombstone_missing: true,
            follow_links: false,
        };
        assert!(matches!(
            scan(&db, &[dir.path().join("unmounted")], &opts),
            Err(ScanError::Root { .. })
        ));
    }
}
