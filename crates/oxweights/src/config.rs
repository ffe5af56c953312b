use std::ffi::OsString;
use std::path::PathBuf;

/// Release prefix for archives copied from the Keras applications.
pub const KERAS_URL: &str = "https://github.com/fchollet/deep-learning-models/releases/download/v0.2/";

/// Release prefix for converted archives; a family path segment follows.
pub const MODEL_URL: &str = "https://github.com/taehoonlee/deep-learning-models/releases/download/";

/// Cache subdirectory every registered archive is stored under.
pub const CACHE_SUBDIR: &str = "models";

/// Overrides the cache root when set.
pub const HOME_ENV: &str = "OXWEIGHTS_HOME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUrls {
    pub keras: String,
    pub models: String,
}

impl Default for ArchiveUrls {
    fn default() -> Self {
        Self {
            keras: KERAS_URL.to_string(),
            models: MODEL_URL.to_string(),
        }
    }
}

/// Immutable settings for a [`crate::Zoo`].
#[derive(Debug, Clone)]
pub struct ZooConfig {
    pub cache_root: PathBuf,
    pub urls: ArchiveUrls,
    /// Extra download attempts after a transport failure.
    pub retries: u32,
}

impl Default for ZooConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            urls: ArchiveUrls::default(),
            retries: 2,
        }
    }
}

impl ZooConfig {
    pub fn with_cache_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: root.into(),
            ..Self::default()
        }
    }
}

/// `$OXWEIGHTS_HOME`, else `<platform cache dir>/oxweights`, else `./.oxweights`.
pub fn default_cache_root() -> PathBuf {
    default_cache_root_from(std::env::var_os(HOME_ENV))
}

/// [`default_cache_root`] with the `OXWEIGHTS_HOME` value passed in; empty means unset.
pub fn default_cache_root_from(home: Option<OsString>) -> PathBuf {
    if let Some(home) = home.filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    dirs::cache_dir()
        .map(|d| d.join("oxweights"))
        .unwrap_or_else(|| PathBuf::from(".oxweights"))
}
