//! Downloads every track that has a source URL and tags the resulting file.
//!
//! The network side is an external program (yt-dlp or youtube-dl) behind the
//! [`Fetcher`] trait. youtube-dl only reports the file name from before audio
//! extraction, so the real file is found by globbing for its stem.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use globset::Glob;
use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::settings::{DownloaderKind, DownloaderSettings};
use crate::tags::TagWriter;
use crate::track::{Track, TrackTags};

/// Where a fetched file ended up, as far as the fetcher can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedFile {
    /// The path after post-processing.
    Final(PathBuf),
    /// The path before post-processing; the extension is not reliable.
    BeforePostProcessing(PathBuf),
}

pub trait Fetcher {
    /// Fails with [`Error::RequiresExternalDownloader`] when the fetcher
    /// cannot run at all.
    fn ensure_available(&self) -> Result<()>;

    /// Downloads the best available audio behind `url`.
    fn fetch(&self, url: &str) -> Result<FetchedFile>;

    /// Extension the fetcher converts audio to.
    fn audio_format(&self) -> &str;
}

pub struct ExternalDownloader {
    program: String,
    kind: DownloaderKind,
    audio_format: String,
}

impl ExternalDownloader {
    pub fn new(settings: &DownloaderSettings) -> Self {
        ExternalDownloader {
            program: settings.program.clone(),
            kind: settings.kind,
            audio_format: settings.audio_format.clone(),
        }
    }

    fn missing(&self) -> Error {
        Error::RequiresExternalDownloader {
            program: self.program.clone(),
        }
    }
}

impl Fetcher for ExternalDownloader {
    fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(self.missing()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(self.missing()),
            Err(err) => Err(err.into()),
        }
    }

    fn fetch(&self, url: &str) -> Result<FetchedFile> {
        let mut command = Command::new(&self.program);
        command.args(["-f", "bestaudio/best", "-x", "--audio-format", self.audio_format.as_str()]);
        match self.kind {
            DownloaderKind::YtDlp => {
                command.args(["--no-simulate", "--print", "after_move:filepath"]);
            }
            DownloaderKind::YoutubeDl => {
                command.arg("--print-json");
            }
        }
        command.arg("--").arg(url).stderr(Stdio::inherit());
        debug!("running {:?}", command);

        let output = command.output().map_err(|err| match err.kind() {
            ErrorKind::NotFound => self.missing(),
            _ => err.into(),
        })?;
        if !output.status.success() {
            return Err(Error::Fetch {
                url: url.to_string(),
                reason: format!("{} exited with {}", self.program, output.status),
            });
        }
        parse_fetch_output(self.kind, &String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            Error::Fetch {
                url: url.to_string(),
                reason: format!("{} did not report a file name", self.program),
            }
        })
    }

    fn audio_format(&self) -> &str {
        &self.audio_format
    }
}

/// Reads the downloaded file name from the downloader's standard output.
pub fn parse_fetch_output(kind: DownloaderKind, stdout: &str) -> Option<FetchedFile> {
    let last_line = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    match kind {
        DownloaderKind::YtDlp => Some(FetchedFile::Final(PathBuf::from(last_line))),
        DownloaderKind::YoutubeDl => {
            let info: serde_json::Value = serde_json::from_str(last_line).ok()?;
            let filename = info.get("_filename")?.as_str()?;
            Some(FetchedFile::BeforePostProcessing(PathBuf::from(filename)))
        }
    }
}

/// Finds the file that shares the stem of `reported`, whatever its extension.
///
/// Candidates are sorted; one with the `preferred` extension wins, otherwise
/// the first is used.
pub fn locate_output(reported: &Path, preferred: &str) -> Result<PathBuf> {
    let not_found = || Error::OutputNotFound {
        reported: reported.to_path_buf(),
    };
    let stem = reported.file_stem().ok_or_else(not_found)?.to_string_lossy();
    let dir = match reported.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let pattern = format!("{}.*", globset::escape(&stem));
    let matcher = Glob::new(&pattern)
        .map_err(|e| Error::Io(std::io::Error::new(ErrorKind::InvalidInput, e)))?
        .compile_matcher();

    let mut candidates: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.file_name().is_some_and(|name| matcher.is_match(name)))
        .collect();
    candidates.sort();
    debug!("candidates for {}: {:?}", reported.display(), candidates);

    let preferred_index = candidates.iter().position(|path| {
        path.extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(preferred))
    });
    match preferred_index {
        Some(i) => Ok(candidates.swap_remove(i)),
        None => candidates.into_iter().next().ok_or_else(not_found),
    }
}

pub fn progress_line(n: usize, total: usize, track: &Track) -> String {
    format!("{} of {}: {} - {}", n, total, track.title, track.artist)
}

/// Fetches and tags every track with a source URL, in catalog order. Stops at
/// the first failure.
pub fn download_all(
    catalog: &Catalog,
    fetcher: &dyn Fetcher,
    tags: &dyn TagWriter,
    progress: &ProgressBar,
    log: &mut dyn Write,
) -> Result<Vec<PathBuf>> {
    fetcher.ensure_available()?;

    let tracks: Vec<Track> = catalog
        .scan_all()?
        .into_iter()
        .filter(|t| t.source_url.as_deref().is_some_and(|url| !url.is_empty()))
        .collect();
    let total = tracks.len();
    progress.set_length(total as u64);

    let mut downloaded = Vec::with_capacity(total);
    for (i, track) in tracks.iter().enumerate() {
        let Some(url) = track.source_url.as_deref() else {
            continue;
        };
        progress.suspend(|| writeln!(log, "{}", progress_line(i + 1, total, track)))?;
        progress.set_message(track.title.clone());

        let file = match fetcher.fetch(url)? {
            FetchedFile::Final(path) => path,
            FetchedFile::BeforePostProcessing(path) => {
                locate_output(&path, fetcher.audio_format())?
            }
        };
        tags.write_tags(&file, &TrackTags::from(track))?;
        info!("saved \"{}\" to {}", track.title, file.display());

        downloaded.push(file);
        progress.inc(1);
    }
    progress.finish_with_message("Download complete");
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    /// Writes an empty `<stem>.mp3` into `dir` and reports `<stem>.webm`.
    struct FakeFetcher {
        dir: PathBuf,
        available: bool,
        fail_on: Option<&'static str>,
        availability_checks: Cell<usize>,
        fetched: RefCell<Vec<String>>,
    }

    impl FakeFetcher {
        fn new(dir: &Path) -> Self {
            FakeFetcher {
                dir: dir.to_path_buf(),
                available: true,
                fail_on: None,
                availability_checks: Cell::new(0),
                fetched: RefCell::new(Vec::new()),
            }
        }
    }

    impl Fetcher for FakeFetcher {
        fn ensure_available(&self) -> Result<()> {
            self.availability_checks.set(self.availability_checks.get() + 1);
            if self.available {
                Ok(())
            } else {
                Err(Error::RequiresExternalDownloader {
                    program: "fake-dl".to_string(),
                })
            }
        }

        fn fetch(&self, url: &str) -> Result<FetchedFile> {
            self.fetched.borrow_mut().push(url.to_string());
            if self.fail_on == Some(url) {
                return Err(Error::Fetch {
                    url: url.to_string(),
                    reason: "offline".to_string(),
                });
            }
            let stem = url.rsplit('/').next().unwrap();
            fs::write(self.dir.join(format!("{}.mp3", stem)), b"").unwrap();
            Ok(FetchedFile::BeforePostProcessing(
                self.dir.join(format!("{}.webm", stem)),
            ))
        }

        fn audio_format(&self) -> &str {
            "mp3"
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        written: RefCell<Vec<(PathBuf, TrackTags)>>,
    }

    impl TagWriter for RecordingWriter {
        fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()> {
            self.written
                .borrow_mut()
                .push((path.to_path_buf(), tags.clone()));
            Ok(())
        }
    }

    fn create_catalog() -> Catalog {
        let mut catalog = Catalog::open_in_memory().unwrap();
        catalog.initialize(false).unwrap();
        catalog.insert_or_ignore(&Track::new("B side", "Band", Some("LP"))).unwrap();
        catalog.insert_or_ignore(&Track::new("A side", "Band", None)).unwrap();
        catalog.insert_or_ignore(&Track::new("No url", "Band", None)).unwrap();
        catalog.set_url("B side", "Band", Some("http://x/b")).unwrap();
        catalog.set_url("A side", "Band", Some("http://x/a")).unwrap();
        catalog
    }

    #[test]
    fn downloads_and_tags_tracks_with_urls_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = create_catalog();
        let fetcher = FakeFetcher::new(temp_dir.path());
        let writer = RecordingWriter::default();
        let mut log = Vec::new();

        let files = download_all(&catalog, &fetcher, &writer, &ProgressBar::hidden(), &mut log).unwrap();

        assert_eq!(fetcher.availability_checks.get(), 1);

        assert_eq!(
            String::from_utf8(log).unwrap(),
            "1 of 2: A side - Band\n2 of 2: B side - Band\n"
        );
        assert_eq!(
            files,
            vec![temp_dir.path().join("a.mp3"), temp_dir.path().join("b.mp3")]
        );
        let written = writer.written.borrow();
        assert_eq!(written.len(), 2);
        assert_eq!(
            written[1].1,
            TrackTags {
                title: "B side".to_string(),
                artist: "Band".to_string(),
                album: Some("LP".to_string()),
            }
        );
    }

    #[test]
    fn missing_downloader_fails_before_reading_the_catalog() {
        let temp_dir = TempDir::new().unwrap();
        let uninitialized = Catalog::open_in_memory().unwrap();
        let fetcher = FakeFetcher {
            available: false,
            ..FakeFetcher::new(temp_dir.path())
        };

        let result = download_all(
            &uninitialized,
            &fetcher,
            &RecordingWriter::default(),
            &ProgressBar::hidden(),
            &mut Vec::new(),
        );
        assert!(matches!(result, Err(Error::RequiresExternalDownloader { .. })));
    }

    #[test]
    fn first_failure_stops_the_run() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = create_catalog();
        let fetcher = FakeFetcher {
            fail_on: Some("http://x/a"),
            ..FakeFetcher::new(temp_dir.path())
        };
        let writer = RecordingWriter::default();

        let result = download_all(&catalog, &fetcher, &writer, &ProgressBar::hidden(), &mut Vec::new());
        assert!(matches!(result, Err(Error::Fetch { .. })));
        assert_eq!(*fetcher.fetched.borrow(), vec!["http://x/a".to_string()]);
        assert!(writer.written.borrow().is_empty());
    }

    #[test]
    fn locate_prefers_the_audio_format() {
        let temp_dir = TempDir::new().unwrap();
        for name in ["My [Song].m4a", "My [Song].mp3", "My.mp3", "Other.mp3"] {
            fs::write(temp_dir.path().join(name), b"").unwrap();
        }
        let reported = temp_dir.path().join("My [Song].webm");

        assert_eq!(
            locate_output(&reported, "mp3").unwrap(),
            temp_dir.path().join("My [Song].mp3")
        );
        assert_eq!(
            locate_output(&reported, "opus").unwrap(),
            temp_dir.path().join("My [Song].m4a")
        );
    }

    #[test]
    fn locate_without_match_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("unrelated.mp3"), b"").unwrap();
        let result = locate_output(&temp_dir.path().join("song.webm"), "mp3");
        assert!(matches!(result, Err(Error::OutputNotFound { .. })));
    }

    #[test]
    fn parses_downloader_output() {
        assert_eq!(
            parse_fetch_output(DownloaderKind::YtDlp, "[info] noise\n/music/a.mp3\n"),
            Some(FetchedFile::Final(PathBuf::from("/music/a.mp3")))
        );
        assert_eq!(
            parse_fetch_output(
                DownloaderKind::YoutubeDl,
                "{\"title\": \"a\", \"_filename\": \"a-xyz.webm\"}\n"
            ),
            Some(FetchedFile::BeforePostProcessing(PathBuf::from("a-xyz.webm")))
        );
        assert_eq!(parse_fetch_output(DownloaderKind::YoutubeDl, "not json"), None);
        assert_eq!(parse_fetch_output(DownloaderKind::YtDlp, "\n"), None);
    }
}
