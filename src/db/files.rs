use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::deletions;
use super::models::{DeletionId, DuplicateGroup, File, FileId, FileState, NewFile, TrackId};
use super::{CatalogError, Database, Result, is_unique_violation};
use crate::span::Span;

pub(crate) const FILE_COLUMNS: &str = "id, path, hash, size, format, duration, added, deletion";

pub(crate) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<File> {
    let deletion: Option<DeletionId> = row.get(7)?;
    Ok(File {
        id: row.get(0)?,
        path: row.get(1)?,
        hash: row.get(2)?,
        size: row.get(3)?,
        format: row.get(4)?,
        duration: row.get(5)?,
        added: row.get(6)?,
        state: FileState::from(deletion),
    })
}

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(CatalogError::InvalidMetadata("path is empty".into()));
    }
    Ok(())
}

fn check_content(hash: &[u8], size: i64, duration: f64) -> Result<()> {
    if hash.is_empty() {
        return Err(CatalogError::InvalidMetadata("content hash is empty".into()));
    }
    if size < 0 {
        return Err(CatalogError::InvalidMetadata(format!("size {size} is negative")));
    }
    if !duration.is_finite() || duration < 0.0 {
        return Err(CatalogError::InvalidMetadata(format!(
            "duration {duration} is not a finite, non-negative number of seconds"
        )));
    }
    Ok(())
}

fn active_id_at(conn: &Connection, path: &str) -> Result<Option<FileId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM file WHERE path = ?1 AND deletion IS NULL",
            params![path],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert a new active file. The caller owns the transaction.
pub(crate) fn insert_file(conn: &Connection, f: &NewFile) -> Result<FileId> {
    check_path(&f.path)?;
    check_content(&f.hash, f.size, f.duration)?;
    if active_id_at(conn, &f.path)?.is_some() {
        return Err(CatalogError::DuplicatePath(f.path.clone()));
    }

    let shared: i64 = conn.query_row(
        "SELECT COUNT(*) FROM file WHERE hash = ?1",
        params![f.hash],
        |row| row.get(0),
    )?;

    let id = FileId::random();
    conn.execute(
        "INSERT INTO file (id, path, hash, size, format, duration, added)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, f.path, f.hash, f.size, f.format, f.duration, Utc::now()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CatalogError::DuplicatePath(f.path.clone())
        } else {
            e.into()
        }
    })?;

    if shared > 0 {
        log::info!(
            "{} shares its content hash with {shared} other file(s)",
            f.path
        );
    }
    log::debug!("Ingested {} as {id}", f.path);
    Ok(id)
}

/// Re-insert a file row exactly as exported, state included.
pub(crate) fn insert_file_record(conn: &Connection, f: &File) -> Result<()> {
    conn.execute(
        "INSERT INTO file (id, path, hash, size, format, duration, added, deletion)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            f.id,
            f.path,
            f.hash,
            f.size,
            f.format,
            f.duration,
            f.added,
            f.state.deletion()
        ],
    )?;
    Ok(())
}

pub(crate) fn load_file(conn: &Connection, id: FileId) -> Result<File> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM file WHERE id = ?1"),
        params![id],
        file_from_row,
    )
    .optional()?
    .ok_or_else(|| CatalogError::not_found("file", id))
}

/// Load a file that must still be part of the library.
pub(crate) fn require_active(conn: &Connection, id: FileId) -> Result<File> {
    let file = load_file(conn, id)?;
    if !file.is_active() {
        return Err(CatalogError::FileTombstoned(id));
    }
    Ok(file)
}

pub(crate) fn tombstone(conn: &Connection, id: FileId, comment: Option<&str>) -> Result<DeletionId> {
    let file = load_file(conn, id)?;
    if !file.is_active() {
        return Err(CatalogError::AlreadyDeleted(id));
    }
    let deletion = deletions::insert_deletion(conn, comment)?;
    conn.execute(
        "UPDATE file SET deletion = ?1 WHERE id = ?2 AND deletion IS NULL",
        params![deletion, id],
    )?;
    log::info!("Tombstoned {} ({id})", file.path);
    Ok(deletion)
}

pub(crate) fn all_files(conn: &Connection) -> Result<Vec<File>> {
    let mut stmt = conn.prepare(&format!("SELECT {FILE_COLUMNS} FROM file ORDER BY id"))?;
    let files = stmt
        .query_map([], file_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

impl Database {
    /// Add a physical file to the library.
    ///
    /// Fails with `DuplicatePath` when an active file already sits at the same
    /// path. Identical content under another path is allowed.
    pub fn ingest(&self, f: &NewFile) -> Result<FileId> {
        let tx = self.write_tx()?;
        let id = insert_file(&tx, f)?;
        tx.commit()?;
        Ok(id)
    }

    /// Tombstone a file. Its row and its tracks are kept.
    pub fn soft_delete(&self, id: FileId, comment: Option<&str>) -> Result<DeletionId> {
        let tx = self.write_tx()?;
        let deletion = tombstone(&tx, id, comment)?;
        tx.commit()?;
        Ok(deletion)
    }

    /// Every file carrying `hash`, tombstoned ones included, oldest first.
    pub fn find_by_hash(&self, hash: &[u8]) -> Result<Vec<FileId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM file WHERE hash = ?1 ORDER BY added, id")?;
        let ids = stmt
            .query_map(params![hash], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// True iff the file exists and has not been tombstoned.
    pub fn is_active(&self, id: FileId) -> Result<bool> {
        let active: Option<bool> = self
            .conn
            .query_row(
                "SELECT deletion IS NULL FROM file WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(active.unwrap_or(false))
    }

    pub fn get_file(&self, id: FileId) -> Result<File> {
        load_file(&self.conn, id)
    }

    /// The active library, ordered by path.
    pub fn active_files(&self) -> Result<Vec<File>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM file WHERE deletion IS NULL ORDER BY path"
        ))?;
        let files = stmt
            .query_map([], file_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Hashes held by more than one file. Detection only.
    pub fn duplicate_hashes(&self) -> Result<Vec<DuplicateGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash FROM file GROUP BY hash HAVING COUNT(*) > 1 ORDER BY hash",
        )?;
        let hashes = stmt
            .query_map([], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut groups = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let files = self.find_by_hash(&hash)?;
            groups.push(DuplicateGroup { hash, files });
        }
        Ok(groups)
    }

    /// Point an active file at a new path, keeping its identity and tracks.
    pub fn relocate_file(&self, id: FileId, new_path: &str) -> Result<()> {
        check_path(new_path)?;
        let tx = self.write_tx()?;
        let file = require_active(&tx, id)?;
        if file.path == new_path {
            return Ok(());
        }
        if active_id_at(&tx, new_path)?.is_some() {
            return Err(CatalogError::DuplicatePath(new_path.to_string()));
        }
        tx.execute(
            "UPDATE file SET path = ?1 WHERE id = ?2",
            params![new_path, id],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CatalogError::DuplicatePath(new_path.to_string())
            } else {
                e.into()
            }
        })?;
        tx.commit()?;
        log::info!("Relocated {} -> {new_path}", file.path);
        Ok(())
    }

    /// Record new content for an active file that changed in place.
    ///
    /// Existing track spans are not revalidated; any that now run past the
    /// new duration are logged.
    pub fn refresh_file(&self, id: FileId, hash: &[u8], size: i64, duration: f64) -> Result<()> {
        check_content(hash, size, duration)?;
        let tx = self.write_tx()?;
        let file = require_active(&tx, id)?;
        tx.execute(
            "UPDATE file SET hash = ?1, size = ?2, duration = ?3 WHERE id = ?4",
            params![hash, size, duration, id],
        )?;

        let mut stmt =
            tx.prepare("SELECT id, start_position, end_position FROM track WHERE file = ?1")?;
        let spans = stmt
            .query_map(params![id], |row| {
                Ok((
                    row.get::<_, TrackId>(0)?,
                    Span::from_columns(row.get(1)?, row.get(2)?),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        for (track, span) in spans {
            if span.check_within(duration).is_err() {
                log::warn!(
                    "Track {track} on {} no longer fits the file ({duration:.1}s)",
                    file.path
                );
            }
        }

        tx.commit()?;
        log::info!("Refreshed {}", file.path);
        Ok(())
    }
}
