//! SQLite library index
//!
//! Tracks installed game packages and the files each one placed.

use std::path::Path;

use chrono::{DateTime, Utc};
use depot_schema::{GameId, RepoKey, VersionMarker};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No library entry for {0}")]
    EntryNotFound(GameId),

    #[error("Corrupt library row: {0}")]
    Corrupt(String),
}

/// One installed package as recorded in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub game_id: GameId,
    pub version: VersionMarker,
    pub repository: RepoKey,
    pub installed_at: DateTime<Utc>,
    /// Paths relative to the package directory, sorted.
    pub files: Vec<String>,
}

/// Library index database
pub struct StateDb {
    conn: Connection,
}

impl std::fmt::Debug for StateDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDb").finish_non_exhaustive()
    }
}

impl StateDb {
    /// Open or create the index at `path`.
    pub fn open_at(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS entries (
                game_id INTEGER PRIMARY KEY,
                version TEXT NOT NULL,
                repository TEXT NOT NULL,
                installed_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                game_id INTEGER NOT NULL REFERENCES entries(game_id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                PRIMARY KEY (game_id, path)
            );
            ",
        )?;
        Ok(())
    }

    /// Insert or replace an entry together with its file rows.
    pub fn record(&mut self, entry: &LibraryEntry) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM files WHERE game_id = ?1",
            params![entry.game_id.get()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO entries (game_id, version, repository, installed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.game_id.get(),
                entry.version.as_str(),
                entry.repository.as_str(),
                entry.installed_at.timestamp()
            ],
        )?;
        {
            let mut stmt = tx.prepare("INSERT INTO files (game_id, path) VALUES (?1, ?2)")?;
            for path in &entry.files {
                stmt.execute(params![entry.game_id.get(), path])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove an entry, returning the file paths it recorded.
    pub fn remove(&mut self, game_id: GameId) -> Result<Vec<String>, DbError> {
        let files = self.files(game_id)?;
        let deleted = self.conn.execute(
            "DELETE FROM entries WHERE game_id = ?1",
            params![game_id.get()],
        )?;
        if deleted == 0 {
            return Err(DbError::EntryNotFound(game_id));
        }
        Ok(files)
    }

    pub fn entry(&self, game_id: GameId) -> Result<Option<LibraryEntry>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT game_id, version, repository, installed_at FROM entries WHERE game_id = ?1",
                params![game_id.get()],
                read_row,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(self.complete(raw)?)),
            None => Ok(None),
        }
    }

    /// Every entry, ordered by game ID.
    pub fn entries(&self) -> Result<Vec<LibraryEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT game_id, version, repository, installed_at FROM entries ORDER BY game_id",
        )?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|raw| self.complete(raw)).collect()
    }

    fn files(&self, game_id: GameId) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM files WHERE game_id = ?1 ORDER BY path")?;
        let files = stmt.query_map(params![game_id.get()], |row| row.get(0))?;
        files.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn complete(&self, raw: RawEntry) -> Result<LibraryEntry, DbError> {
        let (id, version, repository, installed_at) = raw;
        let game_id = GameId::new(id);
        let repository =
            RepoKey::new(repository).map_err(|e| DbError::Corrupt(format!("{game_id}: {e}")))?;
        Ok(LibraryEntry {
            game_id,
            version: VersionMarker::new(version),
            repository,
            installed_at: DateTime::from_timestamp(installed_at, 0).unwrap_or_default(),
            files: self.files(game_id)?,
        })
    }
}

type RawEntry = (u32, String, String, i64);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: u32, version: &str, files: &[&str]) -> LibraryEntry {
        LibraryEntry {
            game_id: GameId::new(id),
            version: VersionMarker::new(version),
            repository: RepoKey::new("swa").unwrap(),
            installed_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            files: files.iter().map(|f| (*f).to_string()).collect(),
        }
    }

    #[test]
    fn record_and_list() {
        let dir = tempdir().unwrap();
        let mut db = StateDb::open_at(&dir.path().join("library.db")).unwrap();

        db.record(&entry(730, "5", &["730.lua", "depotcache/731_1.manifest"]))
            .unwrap();
        db.record(&entry(400, "1", &["400.lua"])).unwrap();

        let entries = db.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].game_id, GameId::new(400));
        assert_eq!(entries[1].files.len(), 2);
    }

    #[test]
    fn record_replaces_file_rows() {
        let dir = tempdir().unwrap();
        let mut db = StateDb::open_at(&dir.path().join("library.db")).unwrap();

        db.record(&entry(730, "5", &["730.lua", "old.manifest"]))
            .unwrap();
        db.record(&entry(730, "6", &["730.lua"])).unwrap();

        let stored = db.entry(GameId::new(730)).unwrap().unwrap();
        assert_eq!(stored.version.as_str(), "6");
        assert_eq!(stored.files, vec!["730.lua"]);
        assert_eq!(db.entries().unwrap().len(), 1);
    }

    #[test]
    fn remove_returns_files() {
        let dir = tempdir().unwrap();
        let mut db = StateDb::open_at(&dir.path().join("library.db")).unwrap();

        db.record(&entry(730, "5", &["730.lua"])).unwrap();
        assert_eq!(db.remove(GameId::new(730)).unwrap(), vec!["730.lua"]);
        assert!(db.entry(GameId::new(730)).unwrap().is_none());
        assert!(matches!(
            db.remove(GameId::new(730)),
            Err(DbError::EntryNotFound(_))
        ));
    }

    #[test]
    fn reopen_keeps_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("library.db");
        {
            let mut db = StateDb::open_at(&path).unwrap();
            db.record(&entry(730, "5", &["730.lua"])).unwrap();
        }
        let db = StateDb::open_at(&path).unwrap();
        assert_eq!(db.entry(GameId::new(730)).unwrap().unwrap(), entry(730, "5", &["730.lua"]));
    }
}
