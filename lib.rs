//! A small music library organizer: a SQLite catalog of tracks keyed by
//! title and artist, batch add/remove from tagged audio files, and a
//! text round-trip for attaching download URLs.

pub mod catalog;
pub mod download;
pub mod error;
pub mod files;
pub mod listing;
pub mod settings;
pub mod staging;
pub mod tags;
pub mod track;
pub mod url;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use track::{FormatExtents, Track, TrackKey, TrackTags};
