use rusqlite::{Connection, OptionalExtension, Row, params};

use super::credits;
use super::files::{load_file, require_active};
use super::models::{
    AlbumId, FileId, LibraryTrack, NewTrack, SpanOverlap, SplitOutcome, Track, TrackId, TrackInfo,
};
use super::{CatalogError, Database, Result};
use crate::span::Span;

const TRACK_COLUMNS: &str = "id, file, start_position, end_position, title, album, \
                             disc_number, track_number, genre, rating";

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<Track> {
    Ok(Track {
        id: row.get(0)?,
        file: row.get(1)?,
        span: Span::from_columns(row.get(2)?, row.get(3)?),
        info: TrackInfo {
            title: row.get(4)?,
            album: row.get(5)?,
            disc_number: row.get(6)?,
            track_number: row.get(7)?,
            genre: row.get(8)?,
            rating: row.get(9)?,
        },
    })
}

fn check_info(conn: &Connection, info: &TrackInfo) -> Result<()> {
    if let Some(r) = info.rating {
        if !r.is_finite() {
            return Err(CatalogError::InvalidMetadata(format!(
                "rating {r} is not a finite number"
            )));
        }
    }
    if let Some(album) = info.album {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM album WHERE id = ?1)",
            params![album],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(CatalogError::not_found("album", album));
        }
    }
    Ok(())
}

pub(crate) fn load_track(conn: &Connection, id: TrackId) -> Result<Track> {
    conn.query_row(
        &format!("SELECT {TRACK_COLUMNS} FROM track WHERE id = ?1"),
        params![id],
        track_from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::not_found("track", id))
}

fn tracks_on(conn: &Connection, file: FileId) -> Result<Vec<Track>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRACK_COLUMNS} FROM track WHERE file = ?1
         ORDER BY COALESCE(start_position, 0), disc_number, track_number, id"
    ))?;
    let tracks = stmt
        .query_map(params![file], track_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tracks)
}

pub(crate) fn all_tracks(conn: &Connection) -> Result<Vec<Track>> {
    let mut stmt = conn.prepare(&format!("SELECT {TRACK_COLUMNS} FROM track ORDER BY id"))?;
    let tracks = stmt
        .query_map([], track_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tracks)
}

/// Insert one track row on an active file. The caller owns the transaction.
pub(crate) fn insert_track(conn: &Connection, file: FileId, t: &NewTrack) -> Result<TrackId> {
    let f = require_active(conn, file)?;
    t.span.check_within(f.duration)?;
    check_info(conn, &t.info)?;
    let id = TrackId::random();
    insert_row(conn, id, file, &t.span, &t.info)?;
    Ok(id)
}

pub(crate) fn insert_track_record(conn: &Connection, t: &Track) -> Result<()> {
    insert_row(conn, t.id, t.file, &t.span, &t.info)
}

fn insert_row(
    conn: &Connection,
    id: TrackId,
    file: FileId,
    span: &Span,
    info: &TrackInfo,
) -> Result<()> {
    conn.execute(
        "INSERT INTO track (
            id, file, start_position, end_position, title, album,
            disc_number, track_number, genre, rating
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            file,
            span.start(),
            span.end(),
            info.title,
            info.album,
            info.disc_number,
            info.track_number,
            info.genre,
            info.rating,
        ],
    )?;
    Ok(())
}

/// Create every track in `new`, then report overlaps that involve a new span.
pub(crate) fn split_in(conn: &Connection, file: FileId, new: &[NewTrack]) -> Result<SplitOutcome> {
    let mut ids = Vec::with_capacity(new.len());
    for t in new {
        ids.push(insert_track(conn, file, t)?);
    }

    let f = load_file(conn, file)?;
    let all = tracks_on(conn, file)?;
    let mut overlaps = Vec::new();
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            if !ids.contains(&a.id) && !ids.contains(&b.id) {
                continue;
            }
            if a.span.overlaps(&b.span, f.duration) {
                log::warn!(
                    "Overlapping tracks on {}: {} and {}",
                    f.path,
                    a.id,
                    b.id
                );
                overlaps.push(SpanOverlap {
                    first: a.id,
                    second: b.id,
                });
            }
        }
    }

    Ok(SplitOutcome {
        tracks: ids,
        overlaps,
    })
}

impl Database {
    /// Create a single track on an active file. Spans are never clamped.
    pub fn create_track(&self, file: FileId, t: &NewTrack) -> Result<TrackId> {
        let tx = self.write_tx()?;
        let id = insert_track(&tx, file, t)?;
        tx.commit()?;
        Ok(id)
    }

    /// Decompose a file into several tracks at once.
    ///
    /// Any invalid span aborts the whole batch. Overlapping spans are
    /// accepted and reported.
    pub fn split_file(&self, file: FileId, tracks: &[NewTrack]) -> Result<SplitOutcome> {
        let tx = self.write_tx()?;
        let outcome = split_in(&tx, file, tracks)?;
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_track(&self, id: TrackId) -> Result<Track> {
        load_track(&self.conn, id)
    }

    /// All tracks on a file, in playback order. Works for tombstoned files.
    pub fn tracks_for_file(&self, file: FileId) -> Result<Vec<Track>> {
        load_file(&self.conn, file)?;
        tracks_on(&self.conn, file)
    }

    /// A track is active while its file is.
    pub fn is_track_active(&self, id: TrackId) -> Result<bool> {
        let track = load_track(&self.conn, id)?;
        self.is_active(track.file)
    }

    /// Replace a track's descriptive fields. The file binding and span stay.
    pub fn update_track(&self, id: TrackId, info: &TrackInfo) -> Result<()> {
        let tx = self.write_tx()?;
        check_info(&tx, info)?;
        let n = tx.execute(
            "UPDATE track SET title = ?1, album = ?2, disc_number = ?3,
                    track_number = ?4, genre = ?5, rating = ?6
             WHERE id = ?7",
            params![
                info.title,
                info.album,
                info.disc_number,
                info.track_number,
                info.genre,
                info.rating,
                id,
            ],
        )?;
        if n == 0 {
            return Err(CatalogError::not_found("track", id));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn retitle(&self, id: TrackId, title: Option<&str>) -> Result<()> {
        let tx = self.write_tx()?;
        let n = tx.execute(
            "UPDATE track SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        if n == 0 {
            return Err(CatalogError::not_found("track", id));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn relink_album(&self, id: TrackId, album: Option<AlbumId>) -> Result<()> {
        let tx = self.write_tx()?;
        let info = TrackInfo {
            album,
            ..TrackInfo::default()
        };
        check_info(&tx, &info)?;
        let n = tx.execute(
            "UPDATE track SET album = ?1 WHERE id = ?2",
            params![album, id],
        )?;
        if n == 0 {
            return Err(CatalogError::not_found("track", id));
        }
        tx.commit()?;
        Ok(())
    }

    /// Every track on an active file, with its path, album and ordered credits.
    pub fn library_tracks(&self) -> Result<Vec<LibraryTrack>> {
        let tx = self.read_tx()?;
        let rows = {
            let mut stmt = tx.prepare(
                "SELECT t.id, t.file, t.start_position, t.end_position, t.title, t.album,
                        t.disc_number, t.track_number, t.genre, t.rating,
                        f.path, a.title, a.year
                 FROM track t
                 JOIN file f ON f.id = t.file
                 LEFT JOIN album a ON a.id = t.album
                 WHERE f.deletion IS NULL
                 ORDER BY f.path, COALESCE(t.start_position, 0), t.disc_number,
                          t.track_number, t.id",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        track_from_row(row)?,
                        row.get::<_, String>(10)?,
                        row.get::<_, Option<String>>(11)?,
                        row.get::<_, Option<u16>>(12)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut library = Vec::with_capacity(rows.len());
        for (track, path, album_title, album_year) in rows {
            let credits = credits::credits_in(&tx, track.id)?;
            library.push(LibraryTrack {
                track,
                path,
                album_title,
                album_year,
                credits,
            });
        }
        tx.commit()?;
        Ok(library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::tests::sample_file;

    fn side(start: f64, end: f64, title: &str) -> NewTrack {
        NewTrack::slice(Span::between(start, end).unwrap(), title)
    }

    #[test]
    fn test_two_sides_survive_soft_delete() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let a = db.create_track(f, &side(0.0, 1800.0, "Side A")).unwrap();
        let b = db.create_track(f, &side(1800.0, 3600.0, "Side B")).unwrap();
        assert!(db.is_track_active(a).unwrap());

        db.soft_delete(f, None).unwrap();
        assert!(!db.is_active(f).unwrap());
        assert!(!db.is_track_active(a).unwrap());

        let tracks = db.tracks_for_file(f).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(db.get_track(a).unwrap().info.title.as_deref(), Some("Side A"));
        assert_eq!(db.get_track(b).unwrap().info.title.as_deref(), Some("Side B"));
        assert!(db.library_tracks().unwrap().is_empty());
    }

    #[test]
    fn test_span_past_duration_rejected() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let err = db.create_track(f, &side(0.0, 3600.5, "Too long")).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidSpan(_)));

        let open = NewTrack::slice(Span::new(Some(3600.0), None).unwrap(), "Empty");
        assert!(matches!(
            db.create_track(f, &open),
            Err(CatalogError::InvalidSpan(_))
        ));
        assert!(db.tracks_for_file(f).unwrap().is_empty());
    }

    #[test]
    fn test_track_on_tombstoned_or_missing_file() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        db.soft_delete(f, None).unwrap();
        assert!(matches!(
            db.create_track(f, &NewTrack::whole("x")),
            Err(CatalogError::FileTombstoned(_))
        ));
        assert!(matches!(
            db.create_track(FileId::random(), &NewTrack::whole("x")),
            Err(CatalogError::NotFound { entity: "file", .. })
        ));
    }

    #[test]
    fn test_invalid_rating_and_missing_album() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();

        let mut t = NewTrack::whole("x");
        t.info.rating = Some(f64::NAN);
        assert!(matches!(
            db.create_track(f, &t),
            Err(CatalogError::InvalidMetadata(_))
        ));

        let mut t = NewTrack::whole("x");
        t.info.album = Some(AlbumId::random());
        assert!(matches!(
            db.create_track(f, &t),
            Err(CatalogError::NotFound { entity: "album", .. })
        ));
    }

    #[test]
    fn test_split_is_atomic() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let batch = vec![
            side(0.0, 600.0, "One"),
            side(600.0, 1200.0, "Two"),
            side(1200.0, 4000.0, "Bad"),
        ];
        assert!(matches!(
            db.split_file(f, &batch),
            Err(CatalogError::InvalidSpan(_))
        ));
        assert!(db.tracks_for_file(f).unwrap().is_empty());
    }

    #[test]
    fn test_split_reports_overlaps_without_rejecting() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let existing = db.create_track(f, &side(0.0, 1000.0, "Existing")).unwrap();

        let out = db
            .split_file(
                f,
                &[side(900.0, 2000.0, "Overlaps"), side(2000.0, 3600.0, "Clean")],
            )
            .unwrap();
        assert_eq!(out.tracks.len(), 2);
        assert_eq!(out.overlaps.len(), 1);
        let o = out.overlaps[0];
        let pair = [o.first, o.second];
        assert!(pair.contains(&existing));
        assert!(pair.contains(&out.tracks[0]));
        assert_eq!(db.tracks_for_file(f).unwrap().len(), 3);
    }

    #[test]
    fn test_track_file_binding_is_immutable() {
        let db = Database::open_in_memory().unwrap();
        let f1 = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let f2 = db.ingest(&sample_file("/b.flac", 2)).unwrap();
        let t = db.create_track(f1, &NewTrack::whole("x")).unwrap();
        let res = db
            .conn
            .execute("UPDATE track SET file = ?1 WHERE id = ?2", params![f2, t]);
        assert!(res.is_err());
        assert_eq!(db.get_track(t).unwrap().file, f1);
    }

    #[test]
    fn test_metadata_edits() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let t = db.create_track(f, &NewTrack::whole("Draft")).unwrap();
        let album = db.get_or_create_album(Some("Kind of Blue"), Some(1959)).unwrap();

        db.retitle(t, Some("So What")).unwrap();
        db.relink_album(t, Some(album)).unwrap();
        let track = db.get_track(t).unwrap();
        assert_eq!(track.info.title.as_deref(), Some("So What"));
        assert_eq!(track.info.album, Some(album));

        db.update_track(
            t,
            &TrackInfo {
                title: Some("Freddie Freeloader".into()),
                album: Some(album),
                disc_number: Some(1),
                track_number: Some(2),
                genre: Some("Jazz".into()),
                rating: Some(4.5),
            },
        )
        .unwrap();
        let track = db.get_track(t).unwrap();
        assert_eq!(track.info.track_number, Some(2));
        assert_eq!(track.info.rating, Some(4.5));
        assert_eq!(track.span, Span::whole());

        assert!(matches!(
            db.retitle(TrackId::random(), None),
            Err(CatalogError::NotFound { .. })
        ));
        assert!(matches!(
            db.relink_album(t, Some(AlbumId::random())),
            Err(CatalogError::NotFound { entity: "album", .. })
        ));
    }

    #[test]
    fn test_library_tracks_projection() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let gone = db.ingest(&sample_file("/gone.flac", 2)).unwrap();
        let album = db.get_or_create_album(Some("Kind of Blue"), Some(1959)).unwrap();

        let mut t = NewTrack::whole("So What");
        t.info.album = Some(album);
        let id = db.create_track(f, &t).unwrap();
        db.create_track(gone, &NewTrack::whole("Hidden")).unwrap();
        db.soft_delete(gone, None).unwrap();

        let miles = db.get_or_create_artist("Miles Davis").unwrap();
        db.add_credit(id, miles, 0.0, "performer").unwrap();

        let lib = db.library_tracks().unwrap();
        assert_eq!(lib.len(), 1);
        assert_eq!(lib[0].track.id, id);
        assert_eq!(lib[0].path, "/a.flac");
        assert_eq!(lib[0].album_title.as_deref(), Some("Kind of Blue"));
        assert_eq!(lib[0].album_year, Some(1959));
        assert_eq!(lib[0].credits.len(), 1);
        assert_eq!(lib[0].credits[0].artist_name, "Miles Davis");
    }
}
