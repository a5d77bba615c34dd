//! Batch add/remove with duplicate and missing detection.
//!
//! Candidate rows are loaded into a TEMP table inside the operation's
//! transaction, diffed against `library`, reported, and then committed in a
//! single statement. Any failure drops the transaction, which also discards
//! the staging table.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, named_params};
use tracing::{debug, info, warn};

use crate::catalog::{self, Catalog};
use crate::error::Result;
use crate::files::dedup_paths;
use crate::tags::TagReader;
use crate::track::{Track, TrackKey};

const CREATE_ADD_STAGING: &str = "
    CREATE TEMP TABLE to_be_added (
        title TEXT NOT NULL,
        artist TEXT NOT NULL,
        album TEXT
    )";

const INSERT_ADD_STAGING: &str = "
    INSERT INTO to_be_added (title, artist, album)
    VALUES (:title, :artist, :album)";

const CHECK_DUPLICATES: &str = "
    SELECT DISTINCT title, artist FROM to_be_added
    WHERE (title, artist) IN (
        SELECT title, artist FROM library
    )
    ORDER BY title ASC, artist ASC";

const COPY_NEW_TRACKS: &str = "
    INSERT OR IGNORE INTO library (title, artist, album)
    SELECT title, artist, album FROM to_be_added
    WHERE (title, artist) NOT IN (
        SELECT title, artist FROM library
    )";

const CREATE_REMOVE_STAGING: &str = "
    CREATE TEMP TABLE to_be_deleted (
        title TEXT NOT NULL,
        artist TEXT NOT NULL
    )";

const INSERT_REMOVE_STAGING: &str = "
    INSERT INTO to_be_deleted (title, artist)
    VALUES (:title, :artist)";

const CHECK_MISSING: &str = "
    SELECT DISTINCT title, artist FROM to_be_deleted
    WHERE (title, artist) NOT IN (
        SELECT title, artist FROM library
    )
    ORDER BY title ASC, artist ASC";

const DELETE_STAGED: &str = "
    DELETE FROM library WHERE (title, artist) IN (
        SELECT title, artist FROM to_be_deleted
    )";

/// Outcome of an add or remove batch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of distinct input files resolved into the batch.
    pub staged: usize,
    /// Rows actually inserted or deleted.
    pub changed: usize,
    /// Keys already present (add) or absent (remove). Always empty when
    /// checking was disabled.
    pub conflicts: Vec<TrackKey>,
}

fn resolve(tags: &dyn TagReader, paths: Vec<PathBuf>) -> Result<Vec<Track>> {
    dedup_paths(paths)
        .iter()
        .map(|path| resolve_one(tags, path))
        .collect()
}

fn resolve_one(tags: &dyn TagReader, path: &Path) -> Result<Track> {
    let track: Track = tags.read_tags(path)?.into();
    match &track.album {
        Some(album) => debug!(
            "processing: {} -> \"{}\" from \"{}\" on \"{}\"",
            path.display(),
            track.title,
            track.artist,
            album
        ),
        None => debug!(
            "processing: {} -> \"{}\" from \"{}\"",
            path.display(),
            track.title,
            track.artist
        ),
    }
    Ok(track)
}

fn query_keys(conn: &Connection, sql: &str) -> Result<Vec<TrackKey>> {
    let mut stmt = conn.prepare(sql)?;
    let keys = stmt
        .query_map([], |row| Ok(TrackKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

/// Adds the tracks described by `paths`.
///
/// Every path is resolved before the catalog is touched, so a metadata error
/// leaves it unchanged. With `warn_duplicates`, keys already in the catalog
/// are reported and skipped; without it they are silently ignored.
pub fn add(
    catalog: &mut Catalog,
    tags: &dyn TagReader,
    paths: Vec<PathBuf>,
    warn_duplicates: bool,
) -> Result<BatchReport> {
    let tracks = resolve(tags, paths)?;
    let mut report = BatchReport {
        staged: tracks.len(),
        ..Default::default()
    };

    let tx = catalog.transaction()?;
    if warn_duplicates {
        tx.execute(CREATE_ADD_STAGING, [])?;
        {
            let mut stmt = tx.prepare(INSERT_ADD_STAGING)?;
            for track in &tracks {
                stmt.execute(named_params! {
                    ":title": track.title,
                    ":artist": track.artist,
                    ":album": track.album,
                })?;
            }
        }
        report.conflicts = query_keys(&tx, CHECK_DUPLICATES)?;
        for key in &report.conflicts {
            warn!("duplicated: \"{}\" from \"{}\"", key.title, key.artist);
        }
        report.changed = tx.execute(COPY_NEW_TRACKS, [])?;
        tx.execute("DROP TABLE to_be_added", [])?;
    } else {
        for track in &tracks {
            if catalog::insert_or_ignore(&tx, track)? {
                report.changed += 1;
            }
        }
    }
    tx.commit()?;

    info!("added {} of {} tracks", report.changed, report.staged);
    Ok(report)
}

/// Removes the tracks described by `paths`. The files themselves are kept.
///
/// With `warn_missing`, keys not in the catalog are reported; either way they
/// do not affect the delete.
pub fn remove(
    catalog: &mut Catalog,
    tags: &dyn TagReader,
    paths: Vec<PathBuf>,
    warn_missing: bool,
) -> Result<BatchReport> {
    let keys: Vec<TrackKey> = resolve(tags, paths)?.iter().map(Track::key).collect();
    let mut report = BatchReport {
        staged: keys.len(),
        ..Default::default()
    };

    let tx = catalog.transaction()?;
    if warn_missing {
        tx.execute(CREATE_REMOVE_STAGING, [])?;
        {
            let mut stmt = tx.prepare(INSERT_REMOVE_STAGING)?;
            for key in &keys {
                stmt.execute(named_params! { ":title": key.title, ":artist": key.artist })?;
            }
        }
        report.conflicts = query_keys(&tx, CHECK_MISSING)?;
        for key in &report.conflicts {
            warn!("missing: \"{}\" from \"{}\"", key.title, key.artist);
        }
        report.changed = tx.execute(DELETE_STAGED, [])?;
        tx.execute("DROP TABLE to_be_deleted", [])?;
    } else {
        for key in &keys {
            if catalog::delete(&tx, &key.title, &key.artist)? {
                report.changed += 1;
            }
        }
    }
    tx.commit()?;

    info!("removed {} of {} tracks", report.changed, report.staged);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::track::TrackTags;
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::Level;

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Runs `f` with warnings recorded, and returns its result with the
    /// recorded lines.
    fn with_warnings<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_ansi(false)
            .without_time()
            .with_writer(move || writer.clone())
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        (result, text.lines().map(str::to_string).collect())
    }

    /// Resolves paths from a fixed table instead of reading files.
    #[derive(Default)]
    struct FakeTags {
        entries: HashMap<PathBuf, TrackTags>,
    }

    impl FakeTags {
        fn with(mut self, path: &str, title: &str, artist: &str, album: Option<&str>) -> Self {
            self.entries.insert(
                PathBuf::from(path),
                TrackTags {
                    title: title.to_string(),
                    artist: artist.to_string(),
                    album: album.map(str::to_string),
                },
            );
            self
        }
    }

    impl TagReader for FakeTags {
        fn read_tags(&self, path: &Path) -> Result<TrackTags> {
            self.entries
                .get(path)
                .cloned()
                .ok_or_else(|| Error::metadata(path, "unknown test file"))
        }
    }

    fn paths(list: &[&str]) -> Vec<PathBuf> {
        list.iter().map(PathBuf::from).collect()
    }

    fn create_catalog() -> Catalog {
        let mut catalog = Catalog::open_in_memory().unwrap();
        catalog.initialize(false).unwrap();
        catalog
    }

    fn fake_tags() -> FakeTags {
        FakeTags::default()
            .with("a.mp3", "A", "B", Some("Album"))
            .with("a-copy.mp3", "A", "B", None)
            .with("c.mp3", "C", "D", None)
    }

    #[test]
    fn add_reports_duplicates_once_and_keeps_one_track() {
        let mut catalog = create_catalog();
        let tags = fake_tags();

        let first = add(&mut catalog, &tags, paths(&["a.mp3"]), true).unwrap();
        assert_eq!(first.changed, 1);
        assert!(first.conflicts.is_empty());

        let (second, warnings) =
            with_warnings(|| add(&mut catalog, &tags, paths(&["a-copy.mp3", "c.mp3"]), true).unwrap());
        assert_eq!(second.conflicts, vec![TrackKey::new("A", "B")]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].ends_with("duplicated: \"A\" from \"B\""), "{}", warnings[0]);
        assert_eq!(second.changed, 1);

        let tracks = catalog.scan_all().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].album.as_deref(), Some("Album"));
    }

    #[test]
    fn add_without_checking_drops_duplicates_silently() {
        let mut catalog = create_catalog();
        let tags = fake_tags();

        add(&mut catalog, &tags, paths(&["a.mp3"]), false).unwrap();
        let (second, warnings) =
            with_warnings(|| add(&mut catalog, &tags, paths(&["a-copy.mp3"]), false).unwrap());
        assert!(warnings.is_empty(), "{:?}", warnings);

        assert!(second.conflicts.is_empty());
        assert_eq!(second.changed, 0);
        assert_eq!(catalog.scan_all().unwrap().len(), 1);
    }

    #[test]
    fn repeated_input_paths_are_staged_once() {
        let mut catalog = create_catalog();
        let report = add(&mut catalog, &fake_tags(), paths(&["c.mp3", "c.mp3"]), true).unwrap();
        assert_eq!(report.staged, 1);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn metadata_error_aborts_the_whole_batch() {
        let mut catalog = create_catalog();
        let result = add(&mut catalog, &fake_tags(), paths(&["c.mp3", "broken.mp3"]), true);

        assert!(matches!(result, Err(Error::Metadata { .. })));
        assert!(catalog.scan_all().unwrap().is_empty());
    }

    #[test]
    fn staging_table_does_not_outlive_the_batch() {
        let mut catalog = create_catalog();
        add(&mut catalog, &fake_tags(), paths(&["a.mp3"]), true).unwrap();
        add(&mut catalog, &fake_tags(), paths(&["c.mp3"]), true).unwrap();
        remove(&mut catalog, &fake_tags(), paths(&["a.mp3"]), true).unwrap();
        remove(&mut catalog, &fake_tags(), paths(&["c.mp3"]), true).unwrap();
        assert!(catalog.scan_all().unwrap().is_empty());
    }

    #[test]
    fn remove_reports_missing_and_leaves_catalog_unchanged() {
        let mut catalog = create_catalog();
        let tags = fake_tags();
        add(&mut catalog, &tags, paths(&["a.mp3"]), true).unwrap();

        let (report, warnings) =
            with_warnings(|| remove(&mut catalog, &tags, paths(&["c.mp3"]), true).unwrap());
        assert_eq!(report.conflicts, vec![TrackKey::new("C", "D")]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].ends_with("missing: \"C\" from \"D\""), "{}", warnings[0]);
        assert_eq!(report.changed, 0);
        assert!(catalog.exists("A", "B").unwrap());
    }

    #[test]
    fn remove_without_checking_is_silent() {
        let mut catalog = create_catalog();
        let (report, warnings) =
            with_warnings(|| remove(&mut catalog, &fake_tags(), paths(&["c.mp3"]), false).unwrap());
        assert!(warnings.is_empty(), "{:?}", warnings);
        assert_eq!(report, BatchReport { staged: 1, changed: 0, conflicts: vec![] });
    }

    #[test]
    fn remove_deletes_present_keys_and_reports_the_rest() {
        let mut catalog = create_catalog();
        let tags = fake_tags();
        add(&mut catalog, &tags, paths(&["a.mp3"]), true).unwrap();

        let report = remove(&mut catalog, &tags, paths(&["a-copy.mp3", "c.mp3"]), true).unwrap();
        assert_eq!(report.changed, 1);
        assert_eq!(report.conflicts, vec![TrackKey::new("C", "D")]);
        assert!(catalog.scan_all().unwrap().is_empty());
    }
}
