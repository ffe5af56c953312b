use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZooError {
    #[error("No pretrained weights registered for \"{0}\"")]
    ModelNotFound(String),

    #[error("Duplicate registry entry: \"{0}\"")]
    DuplicateModel(String),

    #[error("Integrity check failed for {file}: expected {expected}, got {actual}")]
    Integrity {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("Failed to fetch {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("NPY parse error: {0}")]
    Npy(String),

    #[error("Pickle error: {0}")]
    Pickle(String),

    #[error("Unsupported dtype: {0}")]
    UnsupportedDType(String),

    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid anchor pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),

    #[error("Move rule anchor \"{0}\" not found")]
    MissingAnchor(String),

    #[error("Move rule anchor \"{anchor}\" matches {matches} entries")]
    AmbiguousAnchor { anchor: String, matches: usize },

    #[error("Move rule \"{anchor}\" sends index {from} to {to}, outside 0..{len}")]
    MoveOutOfRange {
        anchor: String,
        from: usize,
        to: isize,
        len: usize,
    },

    #[error("Scope \"{scope}\" has {variables} variables but {weights} weights were loaded")]
    CountMismatch {
        scope: String,
        weights: usize,
        variables: usize,
    },

    #[error("Scope \"{scope}\" variable {index} ({name}): expected shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        scope: String,
        index: usize,
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Scope \"{scope}\" variable {index} has no name; keyed assignment needs one")]
    UnnamedVariable { scope: String, index: usize },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("{0}")]
    Other(String),
}

impl ZooError {
    /// Whether a download attempt that failed with this error may be retried.
    pub fn is_transport(&self) -> bool {
        matches!(self, ZooError::Transport { .. } | ZooError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, ZooError>;
