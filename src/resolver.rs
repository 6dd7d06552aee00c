use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::{Url, form_urlencoded};

use crate::domain::TargetName;
use crate::error::HarvestError;
use crate::fetch::Fetcher;

pub const DEFAULT_MAX_PAGES: u32 = 3;

static RESULTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.journaldescription.colblock div.search_results")
        .expect("results selector")
});
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("anchor selector"));
static JOURNAL_NAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.jrnlname").expect("name selector"));

/// Finds the detail page of a title through the site's search endpoint.
#[derive(Debug, Clone)]
pub struct LinkResolver {
    base: Url,
    max_pages: u32,
}

impl LinkResolver {
    pub fn new(base: Url, max_pages: u32) -> Self {
        Self { base, max_pages }
    }

    pub fn search_url(&self, target: &TargetName, page: u32) -> Result<String, HarvestError> {
        let query = target
            .as_str()
            .split_whitespace()
            .map(|word| form_urlencoded::byte_serialize(word.as_bytes()).collect::<String>())
            .collect::<Vec<_>>()
            .join("+");
        let mut url = self.join("journalsearch.php")?;
        if page > 1 {
            url.set_query(Some(&format!("q={query}&page={page}")));
        } else {
            url.set_query(Some(&format!("q={query}")));
        }
        Ok(url.into())
    }

    /// Walks up to `max_pages` search pages and returns the absolute detail
    /// URL of the first candidate whose displayed name equals `target`.
    ///
    /// Pages that cannot be fetched are skipped; only when no page could be
    /// fetched at all is the last fetch error returned.
    pub fn resolve<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        target: &TargetName,
    ) -> Result<Option<String>, HarvestError> {
        let mut last_error = None;
        let mut fetched_any = false;

        for page in 1..=self.max_pages {
            let url = self.search_url(target, page)?;
            debug!(title = %target, page, "searching");
            let document = match fetcher.fetch(&url) {
                Ok(document) => document,
                Err(err) => {
                    warn!(title = %target, page, error = %err, "search page unavailable");
                    last_error = Some(err);
                    continue;
                }
            };
            fetched_any = true;

            if let Some(href) = candidate_link(&document.html(), target) {
                return self.join(&href).map(|url| Some(url.into()));
            }
        }

        match last_error {
            Some(err) if !fetched_any => Err(err),
            _ => Ok(None),
        }
    }

    fn join(&self, href: &str) -> Result<Url, HarvestError> {
        self.base.join(href).map_err(|err| HarvestError::InvalidUrl {
            url: href.to_string(),
            message: err.to_string(),
        })
    }
}

/// The `href` of the page's first result, if that result is `target`.
pub fn candidate_link(html: &Html, target: &TargetName) -> Option<String> {
    let Some(results) = html.select(&RESULTS).next() else {
        debug!(title = %target, "no results container");
        return None;
    };
    let anchor = results.select(&ANCHOR).next()?;
    let displayed = anchor
        .select(&JOURNAL_NAME)
        .next()
        .map(|span: ElementRef<'_>| span.text().collect::<String>())?;
    if !target.matches(&displayed) {
        debug!(title = %target, displayed = displayed.trim(), "first result differs");
        return None;
    }
    anchor.value().attr("href").map(str::to_string)
}
