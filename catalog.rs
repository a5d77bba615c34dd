use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, named_params};
use tracing::debug;

use crate::error::{Error, Result};
use crate::track::{FormatExtents, Track};

const CHECK_EXISTENCE: &str = "
    SELECT 1 FROM sqlite_master
    WHERE type = 'table' AND name = 'library'
    LIMIT 1";

const DROP_IF_EXISTS: &str = "DROP TABLE IF EXISTS library";

const CREATE_TABLE: &str = "
    CREATE TABLE library (
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        album TEXT,
        download_url TEXT DEFAULT NULL,
        PRIMARY KEY (title, artist)
    )";

const SELECT_ALL: &str = "
    SELECT title, artist, album, download_url FROM library
    ORDER BY title ASC, artist ASC";

const SELECT_FORMAT: &str = "
    SELECT
        IFNULL(MAX(LENGTH(title)), 0),
        IFNULL(MAX(LENGTH(artist)), 0),
        IFNULL(MAX(IFNULL(LENGTH(album), 0)), 0),
        IFNULL(MAX(IFNULL(LENGTH(download_url), 0)), 0)
    FROM library";

/// The persistent track relation, stored in a single SQLite file.
pub struct Catalog {
    conn: Connection,
}

impl Catalog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Catalog { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Catalog { conn })
    }

    /// Creates an empty `library` relation. With `force`, an existing one is
    /// dropped first and its rows are lost.
    pub fn initialize(&mut self, force: bool) -> Result<()> {
        let tx = self.conn.transaction()?;
        if force {
            tx.execute(DROP_IF_EXISTS, [])?;
        } else if is_initialized(&tx)? {
            return Err(Error::AlreadyInitialized);
        }
        tx.execute(CREATE_TABLE, [])?;
        tx.commit()?;
        debug!(force, "library initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> Result<bool> {
        is_initialized(&self.conn)
    }

    pub fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized()? {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    pub fn exists(&self, title: &str, artist: &str) -> Result<bool> {
        exists(&self.conn, title, artist)
    }

    pub fn insert_or_ignore(&self, track: &Track) -> Result<bool> {
        insert_or_ignore(&self.conn, track)
    }

    pub fn delete(&self, title: &str, artist: &str) -> Result<bool> {
        delete(&self.conn, title, artist)
    }

    pub fn scan_all(&self) -> Result<Vec<Track>> {
        scan_all(&self.conn)
    }

    pub fn format_extents(&self) -> Result<FormatExtents> {
        format_extents(&self.conn)
    }

    pub fn set_url(&self, title: &str, artist: &str, url: Option<&str>) -> Result<bool> {
        set_url(&self.conn, title, artist, url)
    }

    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }
}

// The functions below take a plain connection so they can run either directly
// or inside a `Transaction`, which derefs to `Connection`.

pub(crate) fn is_initialized(conn: &Connection) -> Result<bool> {
    let found = conn
        .query_row(CHECK_EXISTENCE, [], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn exists(conn: &Connection, title: &str, artist: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM library WHERE title = :title AND artist = :artist",
            named_params! { ":title": title, ":artist": artist },
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Returns whether a row was inserted; an existing key is left untouched.
pub(crate) fn insert_or_ignore(conn: &Connection, track: &Track) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO library (title, artist, album)
         VALUES (:title, :artist, :album)",
        named_params! {
            ":title": track.title,
            ":artist": track.artist,
            ":album": track.album,
        },
    )?;
    Ok(inserted == 1)
}

/// Returns whether a row was deleted; an absent key is not an error.
pub(crate) fn delete(conn: &Connection, title: &str, artist: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM library WHERE title = :title AND artist = :artist",
        named_params! { ":title": title, ":artist": artist },
    )?;
    Ok(deleted == 1)
}

pub(crate) fn scan_all(conn: &Connection) -> Result<Vec<Track>> {
    let mut stmt = conn.prepare(SELECT_ALL)?;
    let tracks = stmt
        .query_map([], |row| {
            Ok(Track {
                title: row.get(0)?,
                artist: row.get(1)?,
                album: row.get(2)?,
                source_url: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tracks)
}

pub(crate) fn format_extents(conn: &Connection) -> Result<FormatExtents> {
    let extents = conn.query_row(SELECT_FORMAT, [], |row| {
        let column = |i: usize| row.get::<_, i64>(i).map(|n| n.max(0) as usize);
        Ok(FormatExtents {
            title: column(0)?,
            artist: column(1)?,
            album: column(2)?,
            url: column(3)?,
        })
    })?;
    Ok(extents)
}

/// Returns whether a track with that key was found.
pub(crate) fn set_url(
    conn: &Connection,
    title: &str,
    artist: &str,
    url: Option<&str>,
) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE library SET download_url = :url
         WHERE title = :title AND artist = :artist",
        named_params! { ":url": url, ":title": title, ":artist": artist },
    )?;
    Ok(updated == 1)
}
