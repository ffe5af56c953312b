//! Verified on-disk cache of downloaded weight archives.

pub mod fetch;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use md5::Md5;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::{Result, ZooError};

pub use fetch::{Fetch, FetchProgress, HttpFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// 64 hex digits means SHA-256; anything else is treated as MD5.
    pub fn detect(hex: &str) -> Self {
        if hex.len() == 64 {
            HashAlgorithm::Sha256
        } else {
            HashAlgorithm::Md5
        }
    }

    pub async fn digest_file(self, path: &Path) -> Result<String> {
        match self {
            HashAlgorithm::Md5 => digest_file::<Md5>(path).await,
            HashAlgorithm::Sha256 => digest_file::<Sha256>(path).await,
        }
    }
}

async fn digest_file<D: Digest>(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Expected digest of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHash {
    pub algorithm: HashAlgorithm,
    pub hex: String,
}

impl ContentHash {
    pub fn new(hex: &str) -> Self {
        Self {
            algorithm: HashAlgorithm::detect(hex),
            hex: hex.to_ascii_lowercase(),
        }
    }

    pub fn matches(&self, actual: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual)
    }
}

/// Where an archive lives remotely and how it is stored and verified locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDescriptor {
    pub filename: String,
    pub url: String,
    pub cache_subdir: String,
    pub hash: ContentHash,
}

impl ArchiveDescriptor {
    pub fn new(filename: &str, url: impl Into<String>, cache_subdir: &str, hash: &str) -> Self {
        Self {
            filename: filename.to_string(),
            url: url.into(),
            cache_subdir: cache_subdir.to_string(),
            hash: ContentHash::new(hash),
        }
    }
}

/// Resolves descriptors to verified local files, downloading on first use.
///
/// Downloads land in a hidden staging file next to the destination and are renamed
/// into place only after the digest matches, so other readers and processes never see
/// a partial archive. Within one process, requests for the same file wait for the
/// first download instead of starting their own.
pub struct ArchiveCache {
    root: PathBuf,
    fetcher: Arc<dyn Fetch>,
    retries: u32,
    inflight: Mutex<AHashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl ArchiveCache {
    pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn Fetch>) -> Self {
        Self {
            root: root.into(),
            fetcher,
            retries: 0,
            inflight: Mutex::new(AHashMap::new()),
        }
    }

    /// Extra attempts after a transport failure. Integrity failures are never retried.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, descriptor: &ArchiveDescriptor) -> PathBuf {
        self.root
            .join(&descriptor.cache_subdir)
            .join(&descriptor.filename)
    }

    pub async fn materialize(&self, descriptor: &ArchiveDescriptor) -> Result<PathBuf> {
        self.materialize_with(descriptor, &|_: u64, _: Option<u64>| {}).await
    }

    pub async fn materialize_with(
        &self,
        descriptor: &ArchiveDescriptor,
        progress: FetchProgress<'_>,
    ) -> Result<PathBuf> {
        let path = self.path_for(descriptor);
        let slot = self.enter(&path);
        let _held = Arc::clone(&slot.lock).lock_owned().await;

        if tokio::fs::try_exists(&path).await? {
            let actual = descriptor.hash.algorithm.digest_file(&path).await?;
            if descriptor.hash.matches(&actual) {
                info!("Using cached {}", path.display());
                return Ok(path);
            }
            warn!(
                "Cached {} does not match its digest (got {actual}, expected {}); downloading again",
                path.display(),
                descriptor.hash.hex
            );
        }

        let dir = self.root.join(&descriptor.cache_subdir);
        tokio::fs::create_dir_all(&dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{}.", descriptor.filename))
            .suffix(".part")
            .tempfile_in(&dir)?
            .into_temp_path();

        let bytes = self.download(descriptor, &staging, progress).await?;

        let actual = descriptor.hash.algorithm.digest_file(&staging).await?;
        if !descriptor.hash.matches(&actual) {
            // Dropping `staging` removes the partial file.
            return Err(ZooError::Integrity {
                file: descriptor.filename.clone(),
                expected: descriptor.hash.hex.clone(),
                actual,
            });
        }

        staging.persist(&path).map_err(|e| e.error)?;
        info!("Cached {} ({bytes} bytes)", path.display());
        Ok(path)
    }

    async fn download(
        &self,
        descriptor: &ArchiveDescriptor,
        dest: &Path,
        progress: FetchProgress<'_>,
    ) -> Result<u64> {
        let mut attempt = 0;
        loop {
            info!("Downloading {} from {}", descriptor.filename, descriptor.url);
            match self.fetcher.fetch(&descriptor.url, dest, progress).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transport() && attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Download of {} failed: {e}; retrying ({attempt}/{})",
                        descriptor.filename, self.retries
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn enter(&self, path: &Path) -> InflightSlot<'_> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        let lock = Arc::clone(inflight.entry(path.to_path_buf()).or_default());
        InflightSlot {
            inflight: &self.inflight,
            path: path.to_path_buf(),
            lock,
        }
    }
}

/// A caller's claim on one path's lock; the map entry goes away with the last claim.
struct InflightSlot<'c> {
    inflight: &'c Mutex<AHashMap<PathBuf, Arc<AsyncMutex<()>>>>,
    path: PathBuf,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here: nobody else holds or waits for it.
        if Arc::strong_count(&self.lock) == 2 {
            inflight.remove(&self.path);
        }
    }
}
