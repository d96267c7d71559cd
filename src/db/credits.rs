use rusqlite::{Connection, params};

use super::models::{ArtistId, Credit, CreditRecord, TrackId};
use super::tracks::load_track;
use super::{CatalogError, Database, Result, is_unique_violation};

fn check_ord(ord: f64) -> Result<()> {
    if !ord.is_finite() {
        return Err(CatalogError::InvalidMetadata(format!(
            "credit order {ord} is not a finite number"
        )));
    }
    Ok(())
}

fn artist_exists(conn: &Connection, artist: ArtistId) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM artist WHERE id = ?1)",
        params![artist],
        |row| row.get(0),
    )?)
}

/// Credit `artist` on `track`. The caller owns the transaction.
pub(crate) fn add_credit_in(
    conn: &Connection,
    track: TrackId,
    artist: ArtistId,
    ord: f64,
    role: &str,
) -> Result<()> {
    check_ord(ord)?;
    load_track(conn, track)?;
    if !artist_exists(conn, artist)? {
        return Err(CatalogError::not_found("artist", artist));
    }

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM credit WHERE track = ?1 AND artist = ?2)",
        params![track, artist],
        |row| row.get(0),
    )?;
    if exists {
        return Err(CatalogError::DuplicateCredit { track, artist });
    }

    conn.execute(
        "INSERT INTO credit (track, artist, ord, role, seq)
         VALUES (?1, ?2, ?3, ?4,
                 (SELECT COALESCE(MAX(seq), 0) + 1 FROM credit WHERE track = ?1))",
        params![track, artist, ord, role],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CatalogError::DuplicateCredit { track, artist }
        } else {
            e.into()
        }
    })?;
    Ok(())
}

/// Ordered credits of a track that is known to exist.
pub(crate) fn credits_in(conn: &Connection, track: TrackId) -> Result<Vec<Credit>> {
    let mut stmt = conn.prepare(
        "SELECT c.artist, a.name, c.role, c.ord
         FROM credit c
         JOIN artist a ON a.id = c.artist
         WHERE c.track = ?1
         ORDER BY c.ord, c.seq",
    )?;
    let credits = stmt
        .query_map(params![track], |row| {
            Ok(Credit {
                artist: row.get(0)?,
                artist_name: row.get(1)?,
                role: row.get(2)?,
                ord: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(credits)
}

pub(crate) fn all_credits(conn: &Connection) -> Result<Vec<CreditRecord>> {
    let mut stmt =
        conn.prepare("SELECT track, artist, ord, role, seq FROM credit ORDER BY track, seq")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CreditRecord {
                track: row.get(0)?,
                artist: row.get(1)?,
                ord: row.get(2)?,
                role: row.get(3)?,
                seq: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn insert_credit_record(conn: &Connection, c: &CreditRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO credit (track, artist, ord, role, seq) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![c.track, c.artist, c.ord, c.role, c.seq],
    )?;
    Ok(())
}

impl Database {
    pub fn add_credit(&self, track: TrackId, artist: ArtistId, ord: f64, role: &str) -> Result<()> {
        let tx = self.write_tx()?;
        add_credit_in(&tx, track, artist, ord, role)?;
        tx.commit()?;
        Ok(())
    }

    /// Change a credit's position and/or role. The insertion sequence is kept.
    pub fn update_credit(
        &self,
        track: TrackId,
        artist: ArtistId,
        ord: Option<f64>,
        role: Option<&str>,
    ) -> Result<()> {
        if let Some(o) = ord {
            check_ord(o)?;
        }
        let tx = self.write_tx()?;
        let n = tx.execute(
            "UPDATE credit SET ord = COALESCE(?3, ord), role = COALESCE(?4, role)
             WHERE track = ?1 AND artist = ?2",
            params![track, artist, ord, role],
        )?;
        if n == 0 {
            return Err(CatalogError::not_found("credit", format!("{track}/{artist}")));
        }
        tx.commit()?;
        Ok(())
    }

    pub fn reorder(&self, track: TrackId, artist: ArtistId, new_ord: f64) -> Result<()> {
        self.update_credit(track, artist, Some(new_ord), None)
    }

    /// Credits of a track, ascending by (ord, insertion order).
    pub fn credits_for(&self, track: TrackId) -> Result<Vec<Credit>> {
        let tx = self.read_tx()?;
        load_track(&tx, track)?;
        let credits = credits_in(&tx, track)?;
        tx.commit()?;
        Ok(credits)
    }
}
