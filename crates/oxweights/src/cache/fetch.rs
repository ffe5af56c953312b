use std::path::Path;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;

/// Byte-level progress: (bytes written so far, total if the server announced it).
pub type FetchProgress<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Transport that writes the body at `url` to `dest`, returning the byte count.
///
/// Implementations must create or truncate `dest`; the cache owns its lifetime and
/// verification.
pub trait Fetch: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: FetchProgress<'a>,
    ) -> BoxFuture<'a, Result<u64>>;
}

/// Streaming HTTP(S) transport.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("oxweights/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        dest: &'a Path,
        progress: FetchProgress<'a>,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?.error_for_status()?;
            let total = response.content_length();
            debug!("GET {url}: {total:?} bytes");

            let mut file = tokio::fs::File::create(dest).await?;
            let mut body = response.bytes_stream();
            let mut loaded = 0u64;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                loaded += chunk.len() as u64;
                progress(loaded, total);
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(loaded)
        })
    }
}
