use rusqlite::{Connection, OptionalExtension, params};

use super::models::{Album, AlbumId, Artist, ArtistId, GcReport};
use super::{CatalogError, Database, Result};

/// Trim and collapse runs of whitespace to a single space.
pub fn normalize_artist_name(name: &str) -> Result<String> {
    let normalized = name.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(CatalogError::InvalidName(format!(
            "artist name {name:?} is empty"
        )));
    }
    Ok(normalized)
}

/// Narrow a tag's year to the album year range. Values outside 0..=65535
/// are rejected rather than clamped.
pub fn album_year_from(year: i64) -> Result<u16> {
    u16::try_from(year)
        .map_err(|_| CatalogError::InvalidMetadata(format!("album year {year} is out of range")))
}

fn lookup_artist(conn: &Connection, normalized: &str) -> Result<Option<ArtistId>> {
    // `name` is declared COLLATE NOCASE, so this compares case-insensitively
    Ok(conn
        .query_row(
            "SELECT id FROM artist WHERE name = ?1",
            params![normalized],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn get_or_create_artist_in(conn: &Connection, name: &str) -> Result<ArtistId> {
    let normalized = normalize_artist_name(name)?;
    if let Some(id) = lookup_artist(conn, &normalized)? {
        log::debug!("Artist {normalized:?} resolved to {id}");
        return Ok(id);
    }
    let id = ArtistId::random();
    conn.execute(
        "INSERT INTO artist (id, name) VALUES (?1, ?2)",
        params![id, normalized],
    )?;
    log::debug!("Created artist {normalized:?} ({id})");
    Ok(id)
}

pub(crate) fn get_or_create_album_in(
    conn: &Connection,
    title: Option<&str>,
    year: Option<u16>,
) -> Result<AlbumId> {
    if title.is_some() || year.is_some() {
        let existing: Option<AlbumId> = conn
            .query_row(
                "SELECT id FROM album WHERE title IS ?1 AND year IS ?2
                 ORDER BY rowid LIMIT 1",
                params![title, year],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
    }
    // An album with neither title nor year is anonymous: never shared
    create_album_in(conn, title, year)
}

pub(crate) fn create_album_in(
    conn: &Connection,
    title: Option<&str>,
    year: Option<u16>,
) -> Result<AlbumId> {
    let id = AlbumId::random();
    conn.execute(
        "INSERT INTO album (id, title, year) VALUES (?1, ?2, ?3)",
        params![id, title, year],
    )?;
    log::debug!("Created album {title:?} ({id})");
    Ok(id)
}

pub(crate) fn all_artists(conn: &Connection) -> Result<Vec<Artist>> {
    let mut stmt = conn.prepare("SELECT id, name FROM artist ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Artist {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn all_albums(conn: &Connection) -> Result<Vec<Album>> {
    let mut stmt = conn.prepare("SELECT id, title, year FROM album ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Album {
                id: row.get(0)?,
                title: row.get(1)?,
                year: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn insert_artist_record(conn: &Connection, a: &Artist) -> Result<()> {
    conn.execute(
        "INSERT INTO artist (id, name) VALUES (?1, ?2)",
        params![a.id, a.name],
    )?;
    Ok(())
}

pub(crate) fn insert_album_record(conn: &Connection, a: &Album) -> Result<()> {
    conn.execute(
        "INSERT INTO album (id, title, year) VALUES (?1, ?2, ?3)",
        params![a.id, a.title, a.year],
    )?;
    Ok(())
}

impl Database {
    /// Resolve an artist by name, creating it on first use.
    pub fn get_or_create_artist(&self, name: &str) -> Result<ArtistId> {
        let tx = self.write_tx()?;
        let id = get_or_create_artist_in(&tx, name)?;
        tx.commit()?;
        Ok(id)
    }

    /// Resolve an album by exact (title, year), creating it if absent.
    /// With both unset a fresh anonymous album is created on every call.
    pub fn get_or_create_album(&self, title: Option<&str>, year: Option<u16>) -> Result<AlbumId> {
        let tx = self.write_tx()?;
        let id = get_or_create_album_in(&tx, title, year)?;
        tx.commit()?;
        Ok(id)
    }

    pub fn find_artist(&self, name: &str) -> Result<Option<ArtistId>> {
        let normalized = normalize_artist_name(name)?;
        lookup_artist(&self.conn, &normalized)
    }

    pub fn get_artist(&self, id: ArtistId) -> Result<Artist> {
        self.conn
            .query_row(
                "SELECT id, name FROM artist WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Artist {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CatalogError::not_found("artist", id))
    }

    pub fn get_album(&self, id: AlbumId) -> Result<Album> {
        self.conn
            .query_row(
                "SELECT id, title, year FROM album WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Album {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        year: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| CatalogError::not_found("album", id))
    }

    pub fn artists(&self) -> Result<Vec<Artist>> {
        all_artists(&self.conn)
    }

    pub fn albums(&self) -> Result<Vec<Album>> {
        all_albums(&self.conn)
    }

    /// Delete artists with no credits and albums with no tracks.
    ///
    /// Tracks of tombstoned files still hold their references.
    pub fn gc_orphans(&self) -> Result<GcReport> {
        let tx = self.write_tx()?;
        let artists = tx.execute(
            "DELETE FROM artist
             WHERE NOT EXISTS (SELECT 1 FROM credit c WHERE c.artist = artist.id)",
            [],
        )?;
        let albums = tx.execute(
            "DELETE FROM album
             WHERE NOT EXISTS (SELECT 1 FROM track t WHERE t.album = album.id)",
            [],
        )?;
        tx.commit()?;

        let report = GcReport { artists, albums };
        if report.total() > 0 {
            log::info!("Removed {artists} orphan artist(s) and {albums} orphan album(s)");
        }
        Ok(report)
    }
}
