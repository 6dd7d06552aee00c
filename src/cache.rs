use std::fs;
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::domain::Document;
use crate::error::HarvestError;
use crate::fetch::Fetcher;

/// Write-once page store keyed by a hash of the request URL.
///
/// Entries are never invalidated. Two workers missing on the same URL both
/// fetch it and both write; the content is identical, so the last rename wins
/// without harm.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: Utf8PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn key(url: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn entry_path(&self, url: &str) -> Utf8PathBuf {
        self.root.join(format!("{}.html", Self::key(url)))
    }

    pub fn get(&self, url: &str) -> Result<Option<Document>, HarvestError> {
        let path = self.entry_path(url);
        match fs::read_to_string(path.as_std_path()) {
            Ok(body) => Ok(Some(Document::new(url, body))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(HarvestError::Persistence(format!("read {path}: {err}"))),
        }
    }

    pub fn put(&self, document: &Document) -> Result<(), HarvestError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| HarvestError::Persistence(format!("create {}: {err}", self.root)))?;
        let path = self.entry_path(&document.url);
        let mut temp = tempfile::Builder::new()
            .prefix(".page")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| HarvestError::Persistence(err.to_string()))?;
        temp.write_all(document.body.as_bytes())
            .map_err(|err| HarvestError::Persistence(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HarvestError::Persistence(format!("persist {path}: {err}")))?;
        Ok(())
    }

    pub fn get_or_fetch<F: Fetcher + ?Sized>(
        &self,
        url: &str,
        fetcher: &F,
    ) -> Result<Document, HarvestError> {
        match self.get(url) {
            Ok(Some(document)) => {
                debug!(url, "cache hit");
                return Ok(document);
            }
            Ok(None) => {}
            Err(err) => warn!(url, error = %err, "unreadable cache entry, fetching"),
        }

        let document = fetcher.fetch(url)?;
        if let Err(err) = self.put(&document) {
            warn!(url, error = %err, "failed to cache page");
        }
        Ok(document)
    }
}

/// A [`Fetcher`] that consults a [`ResponseCache`] before the network.
pub struct CachedFetcher<F> {
    cache: ResponseCache,
    inner: F,
}

impl<F: Fetcher> CachedFetcher<F> {
    pub fn new(cache: ResponseCache, inner: F) -> Self {
        Self { cache, inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    fn fetch(&self, url: &str) -> Result<Document, HarvestError> {
        self.cache.get_or_fetch(url, &self.inner)
    }
}
