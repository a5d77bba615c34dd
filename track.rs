use serde::{Deserialize, Serialize};

/// A catalog record. `(title, artist)` is the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    #[serde(rename = "download_url")]
    pub source_url: Option<String>,
}

impl Track {
    pub fn new(title: impl Into<String>, artist: impl Into<String>, album: Option<&str>) -> Self {
        Track {
            title: title.into(),
            artist: artist.into(),
            album: album.map(str::to_string),
            source_url: None,
        }
    }

    pub fn key(&self) -> TrackKey {
        TrackKey {
            title: self.title.clone(),
            artist: self.artist.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackKey {
    pub title: String,
    pub artist: String,
}

impl TrackKey {
    pub fn new(title: impl Into<String>, artist: impl Into<String>) -> Self {
        TrackKey {
            title: title.into(),
            artist: artist.into(),
        }
    }
}

/// The fields stored in an audio file's tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
}

impl From<TrackTags> for Track {
    fn from(tags: TrackTags) -> Self {
        Track {
            title: tags.title,
            artist: tags.artist,
            album: tags.album,
            source_url: None,
        }
    }
}

impl From<&Track> for TrackTags {
    fn from(track: &Track) -> Self {
        TrackTags {
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
        }
    }
}

/// Longest value of each column, in characters. Absent values count as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatExtents {
    pub title: usize,
    pub artist: usize,
    pub album: usize,
    pub url: usize,
}
