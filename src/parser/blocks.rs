use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static RELEASES_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("section.releases").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Structural element of the releases section, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    /// `h2` child of the section: introduces a date.
    Heading(String),
    /// `div` child of the section: a release entry, marker is its first class.
    Entry { marker: Option<String> },
    /// Any `p` inside the section.
    Paragraph(String),
}

/// Classify the first `<section class="releases">` of the page.
/// Returns `None` when the page has no such section.
pub fn classify_page(html: &str) -> Option<Vec<Block>> {
    let doc = Html::parse_document(html);
    let section = doc.select(&RELEASES_SEL).next()?;
    Some(classify_section(section))
}

fn classify_section(section: ElementRef<'_>) -> Vec<Block> {
    let mut blocks = Vec::new();
    for node in section.descendants().skip(1) {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let is_child = node.parent().map(|p| p.id()) == Some(section.id());
        match el.value().name() {
            "h2" if is_child => blocks.push(Block::Heading(element_text(el))),
            "div" if is_child => blocks.push(Block::Entry {
                marker: el
                    .value()
                    .attr("class")
                    .and_then(|c| c.split_whitespace().next())
                    .map(str::to_string),
            }),
            "p" => blocks.push(Block::Paragraph(element_text(el))),
            _ => {}
        }
    }
    blocks
}

fn element_text(el: ElementRef<'_>) -> String {
    let raw: String = el.text().collect();
    WS_RE.replace_all(raw.trim(), " ").into_owned()
}
