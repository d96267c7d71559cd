use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::files::file_from_row;
use super::models::{Deletion, DeletionId, Tombstone};
use super::{CatalogError, Database, Result};

fn deletion_from_row(row: &Row<'_>) -> rusqlite::Result<Deletion> {
    Ok(Deletion {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        comment: row.get(2)?,
    })
}

/// Append a new tombstone record stamped with the current UTC time.
pub(crate) fn insert_deletion(conn: &Connection, comment: Option<&str>) -> Result<DeletionId> {
    let id = DeletionId::random();
    conn.execute(
        "INSERT INTO deletion (id, timestamp, comment) VALUES (?1, ?2, ?3)",
        params![id, Utc::now(), comment],
    )?;
    Ok(id)
}

pub(crate) fn insert_deletion_record(conn: &Connection, d: &Deletion) -> Result<()> {
    conn.execute(
        "INSERT INTO deletion (id, timestamp, comment) VALUES (?1, ?2, ?3)",
        params![d.id, d.timestamp, d.comment],
    )?;
    Ok(())
}

pub(crate) fn all_deletions(conn: &Connection) -> Result<Vec<Deletion>> {
    let mut stmt =
        conn.prepare("SELECT id, timestamp, comment FROM deletion ORDER BY timestamp, id")?;
    let rows = stmt
        .query_map([], deletion_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

impl Database {
    pub fn get_deletion(&self, id: DeletionId) -> Result<Deletion> {
        self.conn
            .query_row(
                "SELECT id, timestamp, comment FROM deletion WHERE id = ?1",
                params![id],
                deletion_from_row,
            )
            .optional()?
            .ok_or_else(|| CatalogError::not_found("deletion", id))
    }

    /// The whole ledger, oldest first.
    pub fn deletions(&self) -> Result<Vec<Deletion>> {
        all_deletions(&self.conn)
    }

    /// Every tombstoned file with its deletion record, oldest first.
    pub fn tombstones(&self) -> Result<Vec<Tombstone>> {
        let mut stmt = self.conn.prepare(
            "SELECT f.id, f.path, f.hash, f.size, f.format, f.duration, f.added, f.deletion,
                    d.id, d.timestamp, d.comment
             FROM file f
             JOIN deletion d ON d.id = f.deletion
             ORDER BY d.timestamp, f.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Tombstone {
                    file: file_from_row(row)?,
                    deletion: Deletion {
                        id: row.get(8)?,
                        timestamp: row.get(9)?,
                        comment: row.get(10)?,
                    },
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::files::tests::sample_file;

    #[test]
    fn test_ledger_records_each_tombstone() {
        let db = Database::open_in_memory().unwrap();
        let a = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let b = db.ingest(&sample_file("/b.flac", 2)).unwrap();

        let da = db.soft_delete(a, Some("bad rip")).unwrap();
        let db_ = db.soft_delete(b, None).unwrap();
        assert_ne!(da, db_);

        let ledger = db.deletions().unwrap();
        assert_eq!(ledger.len(), 2);

        let rec = db.get_deletion(da).unwrap();
        assert_eq!(rec.comment.as_deref(), Some("bad rip"));
        assert!(db.get_deletion(db_).unwrap().comment.is_none());

        let stones = db.tombstones().unwrap();
        assert_eq!(stones.len(), 2);
        let for_a = stones.iter().find(|t| t.file.id == a).unwrap();
        assert_eq!(for_a.deletion.id, da);
    }

    #[test]
    fn test_deletion_rows_are_immutable() {
        let db = Database::open_in_memory().unwrap();
        let f = db.ingest(&sample_file("/a.flac", 1)).unwrap();
        let d = db.soft_delete(f, Some("x")).unwrap();

        assert!(
            db.conn
                .execute("UPDATE deletion SET comment = 'y' WHERE id = ?1", params![d])
                .is_err()
        );
        assert!(
            db.conn
                .execute("DELETE FROM deletion WHERE id = ?1", params![d])
                .is_err()
        );
        assert_eq!(db.get_deletion(d).unwrap().comment.as_deref(), Some("x"));
    }

    #[test]
    fn test_unknown_deletion_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_deletion(DeletionId::random()),
            Err(CatalogError::NotFound { entity: "deletion", .. })
        ));
    }
}
