use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced by the library boundary.
///
/// Mirrors the taxonomy from the design: filesystem/spawn failures are
/// fatal and abort the run, while build/dep-extraction failures are
/// recorded as failed jobs and never constructed as this type.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: malformed dependency cache: {reason}")]
    Format { path: Utf8PathBuf, reason: String },

    #[error("{from} -> {to}: {source}")]
    Rename {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BulkError>;

pub(crate) trait IoResultExt<T> {
    fn with_path(self, path: &camino::Utf8Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: &camino::Utf8Path) -> Result<T> {
        self.map_err(|source| BulkError::Io {
            path: path.to_owned(),
            source,
        })
    }
}
