use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "~/.config/musiclib/config.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloaderKind {
    /// Reports the post-processed file path directly.
    YtDlp,
    /// Only reports the file name from before audio extraction.
    YoutubeDl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloaderSettings {
    pub program: String,
    pub kind: DownloaderKind,
    pub audio_format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    database: String,
    pub downloader: DownloaderSettings,
}

/// `MUSICLIB_DATABASE`, `MUSICLIB_DOWNLOADER__PROGRAM` and so on. A double
/// underscore separates nested keys.
fn environment() -> Environment {
    Environment::with_prefix("MUSICLIB")
        .prefix_separator("_")
        .separator("__")
}

impl Settings {
    /// Layers built-in defaults, the config file (optional) and `MUSICLIB_*`
    /// environment variables, in that order.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(config_file, environment())
    }

    fn load_with(config_file: Option<&Path>, environment: Environment) -> Result<Self, ConfigError> {
        let path = match config_file {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).to_string()),
        };
        Config::builder()
            .set_default("database", "library.db")?
            .set_default("downloader.program", "yt-dlp")?
            .set_default("downloader.kind", "yt-dlp")?
            .set_default("downloader.audio_format", "mp3")?
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(environment)
            .build()?
            .try_deserialize()
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database).to_string())
    }
}
