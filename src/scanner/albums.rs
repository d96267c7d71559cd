//! Group newly found files into albums by directory.
//!
//! Two files belong to the same album when they carry the same album title
//! and live in the same album directory. A `Disc 2` or `CD1` folder counts as
//! its parent. Matching on title and year alone would merge every
//! "Greatest Hits" in the library into one album.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::db::models::{AlbumId, AlbumLink, File, FileId, ImportFile, ImportOutcome};
use crate::db::{Database, Result};

const DISC_PREFIXES: &[&str] = &["disc", "disk", "cd"];

/// True for folder names like `Disc 1`, `CD2` or `disk 10`.
pub fn is_disc_folder(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    DISC_PREFIXES.iter().any(|prefix| {
        lower.strip_prefix(prefix).is_some_and(|rest| {
            let rest = rest.trim();
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        })
    })
}

/// The directory that identifies the album a file belongs to.
pub fn album_directory(path: &Path) -> Option<PathBuf> {
    let parent = path.parent()?;
    match parent.file_name().and_then(|n| n.to_str()) {
        Some(name) if is_disc_folder(name) => parent.parent().map(Path::to_path_buf),
        _ => Some(parent.to_path_buf()),
    }
}

type AlbumKey = (PathBuf, Option<String>);

pub struct AlbumGroups {
    catalogued: HashMap<PathBuf, Vec<FileId>>,
    resolved: HashMap<AlbumKey, AlbumId>,
}

impl AlbumGroups {
    /// Index the active catalog by album directory so files added to an
    /// existing album folder join the album already there.
    pub fn new(active: &[File]) -> Self {
        let mut catalogued: HashMap<PathBuf, Vec<FileId>> = HashMap::new();
        for f in active {
            if let Some(dir) = album_directory(Path::new(&f.path)) {
                catalogued.entry(dir).or_default().push(f.id);
            }
        }
        Self {
            catalogued,
            resolved: HashMap::new(),
        }
    }

    /// Rewrite the title/year album lookups of `unit` into directory-scoped
    /// links: an album already seen for this directory and title, or a new one.
    pub fn assign(&mut self, db: &Database, unit: &mut ImportFile) -> Result<()> {
        let Some(dir) = album_directory(Path::new(&unit.file.path)) else {
            return Ok(());
        };
        for t in &mut unit.tracks {
            let Some(AlbumLink::Lookup(r)) = &t.album else {
                continue;
            };
            let key = (dir.clone(), r.title.clone());
            let link = match self.find(db, &key)? {
                Some(id) => AlbumLink::Existing(id),
                None => AlbumLink::Create(r.clone()),
            };
            t.album = Some(link);
        }
        Ok(())
    }

    /// Remember the albums an import created so later files in the same
    /// directory join them.
    pub fn record(
        &mut self,
        db: &Database,
        unit: &ImportFile,
        outcome: &ImportOutcome,
    ) -> Result<()> {
        let Some(dir) = album_directory(Path::new(&unit.file.path)) else {
            return Ok(());
        };
        for (t, id) in unit.tracks.iter().zip(&outcome.tracks) {
            if let Some(AlbumLink::Create(r)) = &t.album {
                if let Some(album) = db.get_track(*id)?.info.album {
                    self.resolved.insert((dir.clone(), r.title.clone()), album);
                }
            }
        }
        Ok(())
    }

    fn find(&mut self, db: &Database, key: &AlbumKey) -> Result<Option<AlbumId>> {
        if let Some(id) = self.resolved.get(key) {
            return Ok(Some(*id));
        }
        let Some(files) = self.catalogued.get(&key.0) else {
            return Ok(None);
        };
        for file in files {
            for track in db.tracks_for_file(*file)? {
                let Some(album) = track.info.album else {
                    continue;
                };
                if db.get_album(album)?.title == key.1 {
                    log::debug!("{} joins album {album}", key.0.display());
                    self.resolved.insert(key.clone(), album);
                    return Ok(Some(album));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Span;
    use crate::db::files::tests::sample_file;
    use crate::db::models::{AlbumRef, ImportTrack};

    fn unit(path: &str, seed: u8, album: &str) -> ImportFile {
        ImportFile {
            file: sample_file(path, seed),
            tracks: vec![ImportTrack {
                span: Span::whole(),
                album: Some(AlbumLink::Lookup(AlbumRef {
                    title: Some(album.into()),
                    year: None,
                })),
                ..ImportTrack::default()
            }],
        }
    }

    fn import(db: &Database, groups: &mut AlbumGroups, mut u: ImportFile) -> AlbumId {
        groups.assign(db, &mut u).unwrap();
        let out = db.import(&u).unwrap();
        groups.record(db, &u, &out).unwrap();
        db.get_track(out.tracks[0]).unwrap().info.album.unwrap()
    }

    #[test]
    fn disc_folders() {
        assert!(is_disc_folder("Disc 1"));
        assert!(is_disc_folder("CD2"));
        assert!(is_disc_folder("disk 10"));
        assert!(!is_disc_folder("Discography"));
        assert!(!is_disc_folder("CD"));
        assert!(!is_disc_folder("Bonus"));
    }

    #[test]
    fn album_directory_looks_through_disc_folders() {
        assert_eq!(
            album_directory(Path::new("/m/Wall/CD1/01.flac")),
            Some(PathBuf::from("/m/Wall"))
        );
        assert_eq!(
            album_directory(Path::new("/m/Wall/Disc 2/01.flac")),
            Some(PathBuf::from("/m/Wall"))
        );
        assert_eq!(
            album_directory(Path::new("/m/Blue/01.flac")),
            Some(PathBuf::from("/m/Blue"))
        );
    }

    #[test]
    fn same_title_in_sibling_directories_stays_separate() {
        let db = Database::open_in_memory().unwrap();
        let mut groups = AlbumGroups::new(&[]);

        let a1 = import(&db, &mut groups, unit("/m/Queen/01.flac", 1, "Greatest Hits"));
        let a2 = import(&db, &mut groups, unit("/m/Queen/02.flac", 2, "Greatest Hits"));
        let b1 = import(&db, &mut groups, unit("/m/ABBA/01.flac", 3, "Greatest Hits"));

        assert_eq!(a1, a2);
        assert_ne!(a1, b1);
        assert_eq!(db.albums().unwrap().len(), 2);
    }

    #[test]
    fn disc_folders_share_one_album() {
        let db = Database::open_in_memory().unwrap();
        let mut groups = AlbumGroups::new(&[]);

        let d1 = import(&db, &mut groups, unit("/m/Wall/CD1/01.flac", 1, "The Wall"));
        let d2 = import(&db, &mut groups, unit("/m/Wall/CD2/01.flac", 2, "The Wall"));
        let other = import(&db, &mut groups, unit("/m/Wall/CD2/02.flac", 3, "Bonus"));

        assert_eq!(d1, d2);
        assert_ne!(d1, other);
    }

    #[test]
    fn later_scan_joins_the_catalogued_album() {
        let db = Database::open_in_memory().unwrap();
        let first = {
            let mut groups = AlbumGroups::new(&[]);
            import(&db, &mut groups, unit("/m/Queen/01.flac", 1, "Greatest Hits"))
        };

        let mut groups = AlbumGroups::new(&db.active_files().unwrap());
        let added = import(&db, &mut groups, unit("/m/Queen/03.flac", 4, "Greatest Hits"));
        let elsewhere = import(&db, &mut groups, unit("/m/ABBA/01.flac", 5, "Greatest Hits"));

        assert_eq!(added, first);
        assert_ne!(elsewhere, first);
    }
}
