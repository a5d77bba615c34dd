use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("already initialized. Use --force to recreate anyway")]
    AlreadyInitialized,

    #[error("library is not initialized. Run `musiclib init` first")]
    NotInitialized,

    /// A url list line that does not split into exactly title, artist and url.
    #[error("failed to parse file: line `{line}` is incomplete")]
    MalformedFile { line: String },

    #[error("cannot read metadata from {}: {reason}", .path.display())]
    Metadata { path: PathBuf, reason: String },

    #[error("this feature requires {program}. Please install it and make sure it is on PATH")]
    RequiresExternalDownloader { program: String },

    #[error("download of {url} failed: {reason}")]
    Fetch { url: String, reason: String },

    #[error("no downloaded file matches {}", .reported.display())]
    OutputNotFound { reported: PathBuf },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Conditions the user can fix from the command line. The binary reports
    /// them as a short message instead of a full error chain.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Error::AlreadyInitialized
                | Error::NotInitialized
                | Error::MalformedFile { .. }
                | Error::RequiresExternalDownloader { .. }
        )
    }

    pub(crate) fn metadata(path: &std::path::Path, reason: impl ToString) -> Self {
        Error::Metadata {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
