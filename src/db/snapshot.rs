use serde::{Deserialize, Serialize};

use super::models::{Album, Artist, CreditRecord, Deletion, File, LibraryStats, Track};
use super::{CatalogError, Database, Result, credits, deletions, files, registry, tracks};

const SNAPSHOT_VERSION: u32 = 1;

/// Every entity in the catalog, tombstones and orphans included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub version: u32,
    pub deletions: Vec<Deletion>,
    pub files: Vec<File>,
    pub artists: Vec<Artist>,
    pub albums: Vec<Album>,
    pub tracks: Vec<Track>,
    pub credits: Vec<CreditRecord>,
}

impl CatalogSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

impl Database {
    /// Capture the whole catalog from a single read snapshot.
    pub fn export_snapshot(&self) -> Result<CatalogSnapshot> {
        let tx = self.read_tx()?;
        let snapshot = CatalogSnapshot {
            version: SNAPSHOT_VERSION,
            deletions: deletions::all_deletions(&tx)?,
            files: files::all_files(&tx)?,
            artists: registry::all_artists(&tx)?,
            albums: registry::all_albums(&tx)?,
            tracks: tracks::all_tracks(&tx)?,
            credits: credits::all_credits(&tx)?,
        };
        tx.commit()?;
        Ok(snapshot)
    }

    /// Load a snapshot into an empty catalog, keeping every id.
    pub fn import_snapshot(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CatalogError::InvalidMetadata(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let tx = self.write_tx()?;
        let existing: i64 = tx.query_row(
            "SELECT (SELECT COUNT(*) FROM file) + (SELECT COUNT(*) FROM artist)
                  + (SELECT COUNT(*) FROM album) + (SELECT COUNT(*) FROM deletion)",
            [],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Err(CatalogError::InvalidMetadata(
                "snapshots can only be imported into an empty catalog".into(),
            ));
        }

        for d in &snapshot.deletions {
            deletions::insert_deletion_record(&tx, d)?;
        }
        for f in &snapshot.files {
            files::insert_file_record(&tx, f)?;
        }
        for a in &snapshot.artists {
            registry::insert_artist_record(&tx, a)?;
        }
        for a in &snapshot.albums {
            registry::insert_album_record(&tx, a)?;
        }
        for t in &snapshot.tracks {
            tracks::insert_track_record(&tx, t)?;
        }
        for c in &snapshot.credits {
            credits::insert_credit_record(&tx, c)?;
        }
        tx.commit()?;

        log::info!(
            "Imported snapshot: {} file(s), {} track(s), {} artist(s), {} album(s)",
            snapshot.files.len(),
            snapshot.tracks.len(),
            snapshot.artists.len(),
            snapshot.albums.len()
        );
        Ok(())
    }

    /// Get library statistics.
    pub fn stats(&self) -> Result<LibraryStats> {
        let tx = self.read_tx()?;
        let count = |sql: &str| -> Result<i64> { Ok(tx.query_row(sql, [], |row| row.get(0))?) };

        let active_files = count("SELECT COUNT(*) FROM file WHERE deletion IS NULL")?;
        let tombstoned_files = count("SELECT COUNT(*) FROM file WHERE deletion IS NOT NULL")?;
        let tracks = count("SELECT COUNT(*) FROM track")?;
        let artists = count("SELECT COUNT(*) FROM artist")?;
        let albums = count("SELECT COUNT(*) FROM album")?;
        let credits = count("SELECT COUNT(*) FROM credit")?;
        let duplicate_hashes = count(
            "SELECT COUNT(*) FROM (SELECT hash FROM file GROUP BY hash HAVING COUNT(*) > 1)",
        )?;

        let formats = {
            let mut stmt = tx.prepare(
                "SELECT format, COUNT(*) FROM file WHERE deletion IS NULL
                 GROUP BY format ORDER BY COUNT(*) DESC, format",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        tx.commit()?;

        Ok(LibraryStats {
            active_files,
            tombstoned_files,
            tracks,
            artists,
            albums,
            credits,
            duplicate_hashes,
            formats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Span;
    use crate::db::files::tests::sample_file;
    use crate::db::models::NewTrack;

    fn populated() -> Database {
        let db = Database::open_in_memory().unwrap();
        let a = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let b = db.ingest(&sample_file("/b.flac", 1)).unwrap();
        let album = db.get_or_create_album(Some("Side Trips"), Some(1972)).unwrap();

        let mut side_a = NewTrack::slice(Span::between(0.0, 1800.0).unwrap(), "Side A");
        side_a.info.album = Some(album);
        side_a.info.rating = Some(3.5);
        let t = db.create_track(a, &side_a).unwrap();
        db.create_track(b, &NewTrack::whole("Dupe")).unwrap();

        let p = db.get_or_create_artist("Alice Coltrane").unwrap();
        let q = db.get_or_create_artist("Pharoah Sanders").unwrap();
        db.add_credit(t, p, 0.0, "performer").unwrap();
        db.add_credit(t, q, 0.0, "performer").unwrap();
        db.get_or_create_artist("Orphaned Artist").unwrap();

        db.soft_delete(b, Some("duplicate")).unwrap();
        db
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let src = populated();
        let snap = src.export_snapshot().unwrap();
        assert_eq!(snap.artists.len(), 3);
        assert_eq!(snap.deletions.len(), 1);

        let json = snap.to_json().unwrap();
        let parsed = CatalogSnapshot::from_json(&json).unwrap();
        assert_eq!(parsed, snap);

        let dst = Database::open_in_memory().unwrap();
        dst.import_snapshot(&parsed).unwrap();
        assert_eq!(dst.export_snapshot().unwrap(), snap);

        // relationships survive, including credit tie-breaks
        let lib = dst.library_tracks().unwrap();
        assert_eq!(lib.len(), 1);
        let names: Vec<_> = lib[0].credits.iter().map(|c| c.artist_name.as_str()).collect();
        assert_eq!(names, ["Alice Coltrane", "Pharoah Sanders"]);
        assert!(dst.find_artist("orphaned artist").unwrap().is_some());
    }

    #[test]
    fn test_snapshot_keeps_full_float_precision() {
        // needs all 17 significant digits to survive the JSON text
        let x = 198.620_068_517_663_38_f64;
        let src = Database::open_in_memory().unwrap();
        let mut file = sample_file("/live.flac", 4);
        file.duration = x;
        let f = src.ingest(&file).unwrap();
        let mut t = NewTrack::slice(Span::between(0.0, x).unwrap(), "Set One");
        t.info.rating = Some(x);
        let track = src.create_track(f, &t).unwrap();
        let artist = src.get_or_create_artist("Sun Ra").unwrap();
        src.add_credit(track, artist, x, "performer").unwrap();

        let snap = src.export_snapshot().unwrap();
        let parsed = CatalogSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
        assert_eq!(parsed.files[0].duration.to_bits(), x.to_bits());
        assert_eq!(parsed.tracks[0].span.end().map(f64::to_bits), Some(x.to_bits()));
        assert_eq!(parsed.tracks[0].info.rating.map(f64::to_bits), Some(x.to_bits()));
        assert_eq!(parsed.credits[0].ord.to_bits(), x.to_bits());
        assert_eq!(parsed, snap);
    }

    #[test]
    fn test_snapshot_requires_empty_catalog() {
        let src = populated();
        let snap = src.export_snapshot().unwrap();
        assert!(matches!(
            src.import_snapshot(&snap),
            Err(CatalogError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_stats() {
        let db = populated();
        let s = db.stats().unwrap();
        assert_eq!(s.active_files, 1);
        assert_eq!(s.tombstoned_files, 1);
        assert_eq!(s.tracks, 2);
        assert_eq!(s.artists, 3);
        assert_eq!(s.albums, 1);
        assert_eq!(s.credits, 2);
        assert_eq!(s.duplicate_hashes, 1);
        assert_eq!(s.formats, vec![("flac".to_string(), 1)]);
    }
}
