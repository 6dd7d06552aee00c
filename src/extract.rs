use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::domain::{JournalRecord, TargetName, Widget};
use crate::error::HarvestError;
use crate::fetch::Fetcher;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static GRID: LazyLock<Selector> = LazyLock::new(|| selector("div.background div.journalgrid"));
static DIV: LazyLock<Selector> = LazyLock::new(|| selector("div"));
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| selector("p"));
static ANCHOR: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static AREA_ITEM: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"li[style="display: inline-block;"]"#));
static CATEGORY_TREE: LazyLock<Selector> = LazyLock::new(|| selector("ul.treecategory"));
static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| selector("li"));
static WIDGET_IMAGE: LazyLock<Selector> =
    LazyLock::new(|| selector("div.dashboard img.imgwidget"));
static WIDGET_CODE: LazyLock<Selector> =
    LazyLock::new(|| selector("div.dashboard div.widgetlegend input"));

static SJR_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^SJR\s+\d{4}$").expect("SJR label pattern"));

enum Label {
    Exact(&'static str),
    Pattern(&'static LazyLock<Regex>),
}

impl Label {
    fn matches(&self, heading: &str) -> bool {
        match self {
            Label::Exact(label) => *label == heading,
            Label::Pattern(pattern) => pattern.is_match(heading),
        }
    }
}

struct Section {
    label: Label,
    apply: fn(ElementRef<'_>, &mut JournalRecord),
}

static SECTIONS: &[Section] = &[
    Section {
        label: Label::Exact("Subject Area and Category"),
        apply: subject_areas,
    },
    Section {
        label: Label::Exact("Publisher"),
        apply: publishers,
    },
    Section {
        label: Label::Pattern(&SJR_LABEL),
        apply: sjr_block,
    },
    Section {
        label: Label::Exact("H-Index"),
        apply: h_index_block,
    },
    Section {
        label: Label::Exact("Publication type"),
        apply: publication_types,
    },
    Section {
        label: Label::Exact("ISSN"),
        apply: issn,
    },
    Section {
        label: Label::Exact("Information"),
        apply: homepage,
    },
];

/// Turns a journal detail page into a [`JournalRecord`].
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    base: Url,
}

impl RecordExtractor {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    /// `Ok(None)` means the page was fetched but has no journal grid.
    pub fn extract<F: Fetcher + ?Sized>(
        &self,
        fetcher: &F,
        detail_url: &str,
        target: &TargetName,
    ) -> Result<Option<JournalRecord>, HarvestError> {
        let document = fetcher.fetch(detail_url)?;
        let record = parse_detail(&document.html(), &self.base);
        if record.is_none() {
            warn!(title = %target, url = detail_url, "detail page has no journal grid");
        }
        Ok(record)
    }
}

pub fn parse_detail(html: &Html, base: &Url) -> Option<JournalRecord> {
    let grid = html.select(&GRID).next()?;
    let mut record = JournalRecord::default();

    for block in grid.select(&DIV) {
        let Some(heading) = heading(block) else {
            continue;
        };
        match SECTIONS.iter().find(|section| section.label.matches(&heading)) {
            Some(section) => (section.apply)(block, &mut record),
            None => debug!(heading = %heading, "unhandled section"),
        }
    }

    record.widget = widget(html, base);
    Some(record)
}

fn heading(block: ElementRef<'_>) -> Option<String> {
    block
        .children()
        .filter_map(ElementRef::wrap)
        .find(|child| child.value().name() == "h2")
        .map(text)
}

fn text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn paragraphs(block: ElementRef<'_>) -> impl Iterator<Item = ElementRef<'_>> {
    block.select(&PARAGRAPH)
}

fn subject_areas(block: ElementRef<'_>, record: &mut JournalRecord) {
    for item in block.select(&AREA_ITEM) {
        let Some(group) = item.select(&ANCHOR).next().map(text) else {
            continue;
        };
        let categories = item
            .select(&CATEGORY_TREE)
            .next()
            .map(|tree| {
                tree.select(&LIST_ITEM)
                    .filter_map(|li| li.select(&ANCHOR).next().map(text))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        record.subject_areas.insert(group, categories);
    }
}

fn publishers(block: ElementRef<'_>, record: &mut JournalRecord) {
    record.publishers = paragraphs(block)
        .filter_map(|p| p.select(&ANCHOR).next().map(text))
        .collect();
}

// The site prints the index value in the second paragraph of the SJR block.
fn sjr_block(block: ElementRef<'_>, record: &mut JournalRecord) {
    if let Some(value) = paragraphs(block).nth(1).map(text) {
        record.h_index = Some(value);
    }
}

fn h_index_block(block: ElementRef<'_>, record: &mut JournalRecord) {
    if let Some(value) = paragraphs(block).next().map(text) {
        record.h_index = Some(value);
    }
}

fn publication_types(block: ElementRef<'_>, record: &mut JournalRecord) {
    record.publication_types = paragraphs(block).map(text).collect();
}

fn issn(block: ElementRef<'_>, record: &mut JournalRecord) {
    if let Some(value) = paragraphs(block).last().map(text) {
        record.issn = Some(value);
    }
}

fn homepage(block: ElementRef<'_>, record: &mut JournalRecord) {
    let link = paragraphs(block)
        .filter(|p| text(*p) == "Homepage")
        .find_map(|p| p.select(&ANCHOR).next()?.value().attr("href"));
    if let Some(href) = link {
        record.homepage = Some(href.to_string());
    }
}

fn widget(html: &Html, base: &Url) -> Option<Widget> {
    let image_url = html
        .select(&WIDGET_IMAGE)
        .find_map(|img| img.value().attr("src"))
        .and_then(|src| base.join(src).ok())
        .map(String::from);
    let embed_html = html
        .select(&WIDGET_CODE)
        .find_map(|input| input.value().attr("value"))
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string);

    let widget = Widget {
        image_url,
        embed_html,
    };
    (!widget.is_empty()).then_some(widget)
}
