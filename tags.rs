//! Reading and writing the title/artist/album tags of audio files.
//!
//! The staging engine and the download pipeline only see the [`TagReader`]
//! and [`TagWriter`] traits, so tests can swap in fakes that never touch disk.

use std::path::Path;

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::prelude::{Accessor, ItemKey, TagExt};
use lofty::tag::Tag;

use crate::error::{Error, Result};
use crate::track::TrackTags;

pub trait TagReader {
    fn read_tags(&self, path: &Path) -> Result<TrackTags>;
}

pub trait TagWriter {
    /// Overwrites title, artist and album. An absent album removes the field.
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()>;
}

/// Tag access backed by `lofty`, for every format it can parse.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyTags;

impl TagReader for LoftyTags {
    fn read_tags(&self, path: &Path) -> Result<TrackTags> {
        let tagged_file = lofty::read_from_path(path).map_err(|e| Error::metadata(path, e))?;
        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
            .ok_or_else(|| Error::metadata(path, "no tags found in file"))?;

        let field = |key: &ItemKey| {
            tag.get_string(key)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let title = field(&ItemKey::TrackTitle).ok_or_else(|| Error::metadata(path, "missing title"))?;
        let artist = field(&ItemKey::TrackArtist).ok_or_else(|| Error::metadata(path, "missing artist"))?;
        let album = field(&ItemKey::AlbumTitle);

        Ok(TrackTags {
            title,
            artist,
            album,
        })
    }
}

impl TagWriter for LoftyTags {
    fn write_tags(&self, path: &Path, tags: &TrackTags) -> Result<()> {
        let mut tagged_file = lofty::read_from_path(path).map_err(|e| Error::metadata(path, e))?;
        if tagged_file.primary_tag().is_none() {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(Tag::new(tag_type));
        }
        let tag = tagged_file
            .primary_tag_mut()
            .ok_or_else(|| Error::metadata(path, "file does not support tags"))?;

        tag.set_title(tags.title.clone());
        tag.set_artist(tags.artist.clone());
        match &tags.album {
            Some(album) => tag.set_album(album.clone()),
            None => tag.remove_album(),
        }

        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| Error::metadata(path, e))
    }
}
