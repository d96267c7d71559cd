pub mod credits;
pub mod deletions;
pub mod files;
pub mod import;
pub mod models;
pub mod registry;
pub mod snapshot;
pub mod tracks;

use models::{ArtistId, FileId, TrackId};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// How long a writer waits for another connection's write lock by default.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const SCHEMA_VERSION: i32 = 1;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("path is already catalogued: {0}")]
    DuplicatePath(String),
    #[error("artist {artist} is already credited on track {track}")]
    DuplicateCredit { track: TrackId, artist: ArtistId },
    #[error("file {0} is already deleted")]
    AlreadyDeleted(FileId),
    #[error("file {0} has been removed from the library")]
    FileTombstoned(FileId),
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("invalid span: {0}")]
    InvalidSpan(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
}

impl CatalogError {
    pub(crate) fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// True when `err` is a UNIQUE / PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

/// A handle on the catalog store.
///
/// Each worker opens its own handle on the same database file. Every
/// mutation runs in an immediate transaction, so writers serialize on the
/// SQLite write lock and readers keep seeing the last committed snapshot.
pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| CatalogError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init(busy_timeout)?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init(DEFAULT_BUSY_TIMEOUT)?;
        Ok(db)
    }

    fn init(&self, busy_timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(busy_timeout)?;
        // WAL gives readers a stable snapshot while a writer is active
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version > SCHEMA_VERSION {
            return Err(CatalogError::Migration(format!(
                "database schema v{version} is newer than this build (v{SCHEMA_VERSION})"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        if version != SCHEMA_VERSION {
            self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(())
    }

    /// V1: files, tombstones, tracks, artists, albums and credits.
    ///
    /// The `format` CHECK list is the closed set in `crate::format::Format`;
    /// adding a format means adding a migration that rebuilds `file`.
    fn migrate_v1(&self) -> Result<()> {
        let tx = self.write_tx()?;
        tx.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS deletion (
                id          BLOB PRIMARY KEY,
                timestamp   TEXT NOT NULL,
                comment     TEXT
            );

            CREATE TABLE IF NOT EXISTS file (
                id          BLOB PRIMARY KEY,
                path        TEXT NOT NULL CHECK (length(path) > 0),
                hash        BLOB NOT NULL CHECK (length(hash) > 0),
                size        INTEGER NOT NULL CHECK (size >= 0),
                format      TEXT NOT NULL CHECK (format IN (
                                'aac', 'aiff', 'alac', 'ape', 'flac', 'mp3',
                                'mp4', 'ogg', 'opus', 'wav', 'wma', 'wv'
                            )),
                duration    REAL NOT NULL CHECK (duration >= 0),
                added       TEXT NOT NULL,
                deletion    BLOB REFERENCES deletion(id)
            );

            -- One active file per path; tombstoned rows keep their old path
            CREATE UNIQUE INDEX IF NOT EXISTS idx_file_active_path
                ON file(path) WHERE deletion IS NULL;
            CREATE INDEX IF NOT EXISTS idx_file_path ON file(path);
            CREATE INDEX IF NOT EXISTS idx_file_hash ON file(hash);

            CREATE TABLE IF NOT EXISTS artist (
                id          BLOB PRIMARY KEY,
                name        TEXT NOT NULL UNIQUE COLLATE NOCASE CHECK (length(name) > 0)
            );

            CREATE TABLE IF NOT EXISTS album (
                id          BLOB PRIMARY KEY,
                title       TEXT,
                year        INTEGER CHECK (year BETWEEN 0 AND 65535)
            );
            CREATE INDEX IF NOT EXISTS idx_album_title_year ON album(title, year);

            CREATE TABLE IF NOT EXISTS track (
                id              BLOB PRIMARY KEY,
                file            BLOB NOT NULL REFERENCES file(id),
                start_position  REAL CHECK (start_position >= 0),
                end_position    REAL CHECK (end_position >= 0),
                title           TEXT,
                album           BLOB REFERENCES album(id),
                disc_number     INTEGER CHECK (disc_number BETWEEN 0 AND 255),
                track_number    INTEGER CHECK (track_number BETWEEN 0 AND 255),
                genre           TEXT,
                rating          REAL,
                CHECK (start_position IS NULL OR end_position IS NULL
                       OR start_position < end_position)
            );
            CREATE INDEX IF NOT EXISTS idx_track_file ON track(file);
            CREATE INDEX IF NOT EXISTS idx_track_album ON track(album);

            CREATE TABLE IF NOT EXISTS credit (
                track       BLOB NOT NULL REFERENCES track(id),
                artist      BLOB NOT NULL REFERENCES artist(id),
                ord         REAL NOT NULL,
                role        TEXT NOT NULL,
                seq         INTEGER NOT NULL,
                PRIMARY KEY (track, artist)
            );
            CREATE INDEX IF NOT EXISTS idx_credit_artist ON credit(artist);

            CREATE TRIGGER IF NOT EXISTS track_file_immutable
            BEFORE UPDATE OF file ON track
            WHEN NEW.file IS NOT OLD.file
            BEGIN
                SELECT RAISE(ABORT, 'a track cannot be moved to another file');
            END;

            CREATE TRIGGER IF NOT EXISTS file_never_deleted
            BEFORE DELETE ON file
            BEGIN
                SELECT RAISE(ABORT, 'files are tombstoned, never deleted');
            END;

            CREATE TRIGGER IF NOT EXISTS file_tombstone_terminal
            BEFORE UPDATE OF deletion ON file
            WHEN OLD.deletion IS NOT NULL
            BEGIN
                SELECT RAISE(ABORT, 'a tombstoned file cannot be restored');
            END;

            CREATE TRIGGER IF NOT EXISTS deletion_immutable
            BEFORE UPDATE ON deletion
            BEGIN
                SELECT RAISE(ABORT, 'deletion records are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS deletion_append_only
            BEFORE DELETE ON deletion
            BEGIN
                SELECT RAISE(ABORT, 'deletion records are append-only');
            END;
            ",
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Begin a transaction that takes the write lock immediately.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub(crate) fn write_tx(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    /// Begin a read transaction so multi-statement projections see one snapshot.
    pub(crate) fn read_tx(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Deferred,
        )?)
    }
}
