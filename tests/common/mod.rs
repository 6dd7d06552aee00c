#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use camino::Utf8PathBuf;
use indexmap::IndexMap;
use url::Url;

use scimago_harvest::config::HarvestConfig;
use scimago_harvest::domain::{Document, TargetName};
use scimago_harvest::error::HarvestError;
use scimago_harvest::fetch::Fetcher;
use scimago_harvest::resolver::LinkResolver;

pub const BASE: &str = "https://example.test/";

/// In-memory stand-in for the journal site.
///
/// Search pages that were not registered answer with an empty result list;
/// anything else unknown is a 404.
#[derive(Default)]
pub struct MockSite {
    pages: HashMap<String, String>,
    failing: HashSet<String>,
    calls: AtomicUsize,
    jitter: bool,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds small per-URL sleeps so that workers interleave differently.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    pub fn journal(mut self, title: &str, detail: &str) -> Self {
        let name = name(title);
        let slug = name.as_str().replace(' ', "-");
        let href = format!("journal/{slug}.php");
        self.pages.insert(
            resolver().search_url(&name, 1).unwrap(),
            search_page(&href, title),
        );
        self.pages
            .insert(format!("{BASE}{href}"), detail.to_string());
        self
    }

    /// Every search page of `title` fails at the network level.
    pub fn failing(mut self, title: &str) -> Self {
        let name = name(title);
        for page in 1..=3 {
            self.failing
                .insert(resolver().search_url(&name, page).unwrap());
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockSite {
    fn fetch(&self, url: &str) -> Result<Document, HarvestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.jitter {
            let spread = url.bytes().map(u64::from).sum::<u64>() % 7;
            thread::sleep(Duration::from_millis(spread));
        }
        if self.failing.contains(url) {
            return Err(HarvestError::Http {
                url: url.to_string(),
                message: "connection reset".to_string(),
            });
        }
        if let Some(body) = self.pages.get(url) {
            return Ok(Document::new(url, body.clone()));
        }
        if url.contains("journalsearch.php") {
            return Ok(Document::new(url, search_page_empty()));
        }
        Err(HarvestError::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }
}

pub fn name(value: &str) -> TargetName {
    value.parse().unwrap()
}

pub fn resolver() -> LinkResolver {
    LinkResolver::new(Url::parse(BASE).unwrap(), 3)
}

pub fn search_page(href: &str, title: &str) -> String {
    format!(
        r#"<html><body><div class="journaldescription colblock"><div class="search_results">
        <a href="{href}"><span class="jrnlname">{title}</span></a>
        </div></div></body></html>"#
    )
}

pub fn search_page_empty() -> String {
    r#"<html><body><div class="journaldescription colblock"><div class="search_results"></div></div></body></html>"#
        .to_string()
}

pub fn detail_page(issn: &str) -> String {
    format!(
        r#"<html><body><div class="background"><div class="journalgrid">
        <div><h2>Publisher</h2><p><a href="p.php">Example Press</a></p></div>
        <div><h2>ISSN</h2><p>{issn}</p></div>
        </div></div></body></html>"#
    )
}

pub fn broken_detail_page() -> String {
    "<html><body><p>Service temporarily unavailable</p></body></html>".to_string()
}

pub struct Workspace {
    _temp: tempfile::TempDir,
    pub root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        Self { _temp: temp, root }
    }

    pub fn write_input(&self, titles: &[&str]) {
        let catalog = titles
            .iter()
            .map(|title| {
                (
                    title.to_string(),
                    serde_json::json!({ "areas": ["sciences"], "catalogs": [] }),
                )
            })
            .collect::<IndexMap<_, _>>();
        std::fs::write(
            self.root.join("input.json").as_std_path(),
            serde_json::to_vec_pretty(&catalog).unwrap(),
        )
        .unwrap();
    }

    pub fn config(&self, concurrency: usize) -> HarvestConfig {
        HarvestConfig {
            base_url: BASE.to_string(),
            input: self.root.join("input.json"),
            output: self.root.join("output.json"),
            checkpoint: self.root.join("checkpoint.txt"),
            retry_list: self.root.join("retry.json"),
            partial_prefix: self.root.join("partial"),
            cache_dir: self.root.join("cache"),
            use_cache: false,
            concurrency,
            delay_min_ms: 0,
            delay_max_ms: 0,
            ..HarvestConfig::default()
        }
    }
}
