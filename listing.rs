use std::io::Write;

use crate::catalog::Catalog;
use crate::error::Result;
use crate::track::{FormatExtents, Track};

/// Every track in catalog order, plus the column widths needed to print them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub tracks: Vec<Track>,
    pub extents: FormatExtents,
}

pub fn do_list(catalog: &Catalog) -> Result<Listing> {
    Ok(Listing {
        tracks: catalog.scan_all()?,
        extents: catalog.format_extents()?,
    })
}

pub fn write_table(listing: &Listing, out: &mut dyn Write) -> Result<()> {
    const TITLE: &str = "TITLE";
    const ARTIST: &str = "ARTIST";
    const ALBUM: &str = "ALBUM";
    let t_l = listing.extents.title.max(TITLE.len());
    let ar_l = listing.extents.artist.max(ARTIST.len());
    let al_l = listing.extents.album.max(ALBUM.len());

    writeln!(out, "{:^t_l$} | {:^ar_l$} | {:^al_l$}", TITLE, ARTIST, ALBUM)?;
    writeln!(
        out,
        "{}-|-{}-|-{}",
        "-".repeat(t_l),
        "-".repeat(ar_l),
        "-".repeat(al_l)
    )?;
    for track in &listing.tracks {
        writeln!(
            out,
            "{:t_l$} | {:ar_l$} | {:al_l$}",
            track.title,
            track.artist,
            track.album.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

pub fn to_json(tracks: &[Track], compact: bool) -> Result<String> {
    let json = if compact {
        serde_json::to_string(tracks)?
    } else {
        serde_json::to_string_pretty(tracks)?
    };
    Ok(json)
}
