//! Export and re-import of download URLs.
//!
//! `template` writes one shell-quoted `title artist url` line per track.
//! After hand-editing, `set_from_file` reads the same shape back, so an
//! unmodified template round-trips to the exact URLs it was made from.

use std::io::{BufRead, Write};

use tracing::warn;

use crate::catalog::{self, Catalog};
use crate::error::{Error, Result};
use crate::track::{Track, TrackKey};

const TITLE_PLACEHOLDER: &str = "<title>";
const ARTIST_PLACEHOLDER: &str = "<artist>";
const URL_PLACEHOLDER: &str = "<download url>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UrlFormat {
    /// Human-readable listing with a comment header per track
    #[default]
    #[value(name = "youtube-dl")]
    YoutubeDl,
    /// Only the URLs, one per line
    Raw,
}

/// One parsed line of a url list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlAssignment {
    pub key: TrackKey,
    pub url: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UrlSetReport {
    pub applied: usize,
    /// Lines naming a track that is not in the catalog.
    pub unmatched: Vec<TrackKey>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn quote(value: &str) -> Result<String> {
    if value.is_empty() {
        return Ok("\"\"".to_string());
    }
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("cannot quote {:?}: {}", value, e),
            ))
        })
}

pub fn write_report(tracks: &[Track], out: &mut dyn Write) -> Result<()> {
    for track in tracks {
        match non_empty(&track.album) {
            Some(album) => writeln!(
                out,
                "# \"{}\" from \"{}\" by \"{}\"",
                track.title, album, track.artist
            )?,
            None => writeln!(out, "# \"{}\" by \"{}\"", track.title, track.artist)?,
        }
        match non_empty(&track.source_url) {
            Some(url) => writeln!(out, "{}", url)?,
            None => writeln!(out, "; (No download URL)")?,
        }
    }
    Ok(())
}

pub fn write_raw(tracks: &[Track], out: &mut dyn Write) -> Result<()> {
    for url in tracks.iter().filter_map(|t| non_empty(&t.source_url)) {
        writeln!(out, "{}", url)?;
    }
    Ok(())
}

pub fn write_template(tracks: &[Track], out: &mut dyn Write) -> Result<()> {
    let mut title_len = TITLE_PLACEHOLDER.len();
    let mut artist_len = ARTIST_PLACEHOLDER.len();
    let mut rows = Vec::with_capacity(tracks.len());
    for track in tracks {
        let title = quote(&track.title)?;
        let artist = quote(&track.artist)?;
        let url = quote(track.source_url.as_deref().unwrap_or(""))?;
        title_len = title_len.max(title.chars().count());
        artist_len = artist_len.max(artist.chars().count());
        rows.push((title, artist, url));
    }

    // "# " shifts the header, so the title placeholder gets two columns less.
    writeln!(
        out,
        "# {:<tw$} {:<aw$} {}",
        TITLE_PLACEHOLDER,
        ARTIST_PLACEHOLDER,
        URL_PLACEHOLDER,
        tw = title_len - 2,
        aw = artist_len
    )?;
    for (title, artist, url) in rows {
        writeln!(
            out,
            "{:<tw$} {:<aw$} {}",
            title,
            artist,
            url,
            tw = title_len,
            aw = artist_len
        )?;
    }
    Ok(())
}

/// Splits one line the way a POSIX shell would. `Ok(None)` for blank and
/// comment-only lines.
pub fn parse_line(line: &str) -> Result<Option<UrlAssignment>> {
    let tokens = shlex::split(line).ok_or_else(|| malformed(line))?;
    assignment_from_tokens(line, tokens)
}

fn malformed(line: &str) -> Error {
    Error::MalformedFile {
        line: line.to_string(),
    }
}

fn assignment_from_tokens(line: &str, tokens: Vec<String>) -> Result<Option<UrlAssignment>> {
    if tokens.is_empty() {
        return Ok(None);
    }
    let [title, artist, url]: [String; 3] = tokens.try_into().map_err(|_| malformed(line))?;
    Ok(Some(UrlAssignment {
        key: TrackKey::new(title, artist),
        url: if url.is_empty() { None } else { Some(url) },
    }))
}

fn strip_line_ending(line: &str) -> &str {
    match line.strip_suffix('\n') {
        Some(line) => line.strip_suffix('\r').unwrap_or(line),
        None => line,
    }
}

/// Parses a whole url list, stopping at the first malformed line.
///
/// Quoted values may contain newlines, so a line that ends inside a quote is
/// continued on the next one. A quote still open at the end of input is
/// malformed.
pub fn parse_template(input: &mut dyn BufRead) -> Result<Vec<UrlAssignment>> {
    let mut assignments = Vec::new();
    let mut record = String::new();
    while input.read_line(&mut record)? > 0 {
        let line = strip_line_ending(&record);
        let Some(tokens) = shlex::split(line) else {
            continue;
        };
        if let Some(assignment) = assignment_from_tokens(line, tokens)? {
            assignments.push(assignment);
        }
        record.clear();
    }
    if !record.is_empty() {
        return Err(malformed(strip_line_ending(&record)));
    }
    Ok(assignments)
}

pub fn get(catalog: &Catalog, format: UrlFormat, out: &mut dyn Write) -> Result<()> {
    let tracks = catalog.scan_all()?;
    match format {
        UrlFormat::YoutubeDl => write_report(&tracks, out),
        UrlFormat::Raw => write_raw(&tracks, out),
    }
}

pub fn template(catalog: &Catalog, out: &mut dyn Write) -> Result<()> {
    write_template(&catalog.scan_all()?, out)
}

/// Applies every line of `input` in one transaction. Nothing is written when
/// any line is malformed.
pub fn set_from_file(catalog: &mut Catalog, input: &mut dyn BufRead) -> Result<UrlSetReport> {
    let assignments = parse_template(input)?;
    let mut report = UrlSetReport::default();

    let tx = catalog.transaction()?;
    for UrlAssignment { key, url } in assignments {
        if catalog::set_url(&tx, &key.title, &key.artist, url.as_deref())? {
            report.applied += 1;
        } else {
            warn!("not in library: \"{}\" from \"{}\"", key.title, key.artist);
            report.unmatched.push(key);
        }
    }
    tx.commit()?;
    Ok(report)
}
