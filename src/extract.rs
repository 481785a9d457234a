use std::cell::RefCell;

use html5ever::tendril::TendrilSink;
use html5ever::{Attribute, parse_document};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use scraper::{ElementRef, Html, Selector};

use crate::analyzer::TextAnalyzer;
use crate::data_models::ExtractionMethod;

pub const DEFAULT_TITLE: &str = "No Title";

/// Readable text pulled out of one HTML document.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub title: String,
    pub text: String,
}

/// Turns raw HTML into readable text. `None` means nothing usable was found,
/// which lets the caller try the next extractor.
pub trait ContentExtractor: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    fn extract(&self, html: &str) -> Option<Extraction>;
}

/// Collapses whitespace and drops characters outside the allow-list.
pub fn clean_text(text: &str) -> String {
    TextAnalyzer::cleanup().char_filter(text.to_string())
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "template",
];

const BOILERPLATE_TOKENS: &[&str] = &[
    "nav",
    "navbar",
    "menu",
    "sidebar",
    "footer",
    "header",
    "cookie",
    "cookies",
    "banner",
    "promo",
    "ads",
    "advert",
    "advertisement",
    "badge",
    "share",
    "social",
    "related",
    "breadcrumb",
    "breadcrumbs",
];

fn is_block_like(local: &str) -> bool {
    matches!(
        local,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "li"
            | "ul"
            | "ol"
            | "table"
            | "tr"
            | "td"
            | "blockquote"
            | "pre"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "br"
    )
}

fn has_boilerplate_class_or_id(attrs: &RefCell<Vec<Attribute>>) -> bool {
    attrs.borrow().iter().any(|attr| {
        let key = &*attr.name.local;
        if key != "class" && key != "id" {
            return false;
        }
        let value = attr.value.to_lowercase();
        value
            .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
            .any(|token| BOILERPLATE_TOKENS.contains(&token))
    })
}

#[derive(Debug, Default)]
struct Block {
    text: String,
    link_chars: usize,
}

impl Block {
    fn push(&mut self, s: &str, in_link: bool) {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(s);
        if in_link {
            self.link_chars += s.chars().count();
        }
    }

    fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    fn link_density(&self) -> f32 {
        let total = self.text.chars().filter(|c| !c.is_whitespace()).count();
        if total == 0 {
            return 1.0;
        }
        self.link_chars as f32 / total as f32
    }
}

#[derive(Debug, Default)]
struct BlockCollector {
    title: String,
    blocks: Vec<Block>,
    current: Block,
}

impl BlockCollector {
    fn flush(&mut self) {
        if !self.current.text.is_empty() {
            self.blocks.push(std::mem::take(&mut self.current));
        }
    }

    /// Depth-first walk with an explicit stack, so nesting depth is bounded
    /// by the heap rather than the thread stack.
    fn walk(&mut self, root: &Handle) {
        let mut stack = vec![Frame::Enter(root.clone(), false)];
        while let Some(frame) = stack.pop() {
            let (handle, in_link) = match frame {
                Frame::Enter(handle, in_link) => (handle, in_link),
                Frame::CloseBlock => {
                    self.flush();
                    continue;
                }
            };

            let in_link = match &handle.data {
                NodeData::Text { contents } => {
                    let s = contents.borrow();
                    let s = s.trim();
                    if !s.is_empty() {
                        self.current.push(s, in_link);
                    }
                    continue;
                }
                NodeData::Element { name, attrs, .. } => {
                    let local = &*name.local;

                    if local == "title" {
                        if self.title.is_empty() {
                            self.title = collect_text(&handle);
                        }
                        continue;
                    }
                    if SKIPPED_TAGS.contains(&local) || has_boilerplate_class_or_id(attrs) {
                        continue;
                    }
                    if is_block_like(local) {
                        self.flush();
                        stack.push(Frame::CloseBlock);
                    }
                    in_link || local == "a"
                }
                _ => in_link,
            };

            for child in handle.children.borrow().iter().rev() {
                stack.push(Frame::Enter(child.clone(), in_link));
            }
        }
    }
}

enum Frame {
    /// Visit a node; the flag is set inside an `<a>`.
    Enter(Handle, bool),
    CloseBlock,
}

fn collect_text(handle: &Handle) -> String {
    let mut out = String::new();
    let mut stack = vec![handle.clone()];
    while let Some(node) = stack.pop() {
        if let NodeData::Text { contents } = &node.data {
            out.push_str(&contents.borrow());
            out.push(' ');
        }
        stack.extend(node.children.borrow().iter().rev().cloned());
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Boilerplate-aware extractor. Text is grouped into blocks at block-level
/// elements; short blocks and link-heavy blocks are dropped.
#[derive(Debug, Clone)]
pub struct ReadabilityExtractor {
    min_block_words: usize,
    max_link_density: f32,
}

impl Default for ReadabilityExtractor {
    fn default() -> Self {
        Self {
            min_block_words: 5,
            max_link_density: 0.5,
        }
    }
}

impl ReadabilityExtractor {
    pub fn get_dom(html: &str) -> RcDom {
        parse_document(RcDom::default(), Default::default()).one(html)
    }
}

impl ContentExtractor for ReadabilityExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Readability
    }

    fn extract(&self, html: &str) -> Option<Extraction> {
        let dom = Self::get_dom(html);
        let mut collector = BlockCollector::default();
        collector.walk(&dom.document);
        collector.flush();

        let kept = collector
            .blocks
            .iter()
            .filter(|b| {
                b.word_count() >= self.min_block_words && b.link_density() <= self.max_link_density
            })
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>();
        if kept.is_empty() {
            return None;
        }

        let text = clean_text(&kept.join("\n"));
        if text.is_empty() {
            return None;
        }
        let title = if collector.title.is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            collector.title
        };
        Some(Extraction { title, text })
    }
}

const STRUCTURAL_ROOTS: &[&str] = &["main", "article", "body"];
const STRUCTURAL_SKIPPED: &[&str] = &["script", "style", "noscript", "nav", "header", "footer", "aside"];

/// Fallback extractor: every text node under the first of `main`, `article`
/// or `body`, minus anything inside script, style or page chrome.
#[derive(Debug, Clone, Default)]
pub struct StructuralExtractor;

impl StructuralExtractor {
    fn title(document: &Html) -> String {
        Selector::parse("title")
            .ok()
            .and_then(|selector| {
                document
                    .select(&selector)
                    .next()
                    .map(|t| t.text().collect::<String>().trim().to_string())
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string())
    }

    fn root<'a>(document: &'a Html) -> Option<ElementRef<'a>> {
        STRUCTURAL_ROOTS.iter().find_map(|tag| {
            let selector = Selector::parse(tag).ok()?;
            document.select(&selector).next()
        })
    }
}

impl ContentExtractor for StructuralExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Structural
    }

    fn extract(&self, html: &str) -> Option<Extraction> {
        let document = Html::parse_document(html);
        let root = Self::root(&document)?;

        let mut parts = Vec::new();
        for node in root.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let skipped = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|e| STRUCTURAL_SKIPPED.contains(&e.name()))
            });
            if skipped {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }

        let text = clean_text(&parts.join(" "));
        if text.is_empty() {
            return None;
        }
        Some(Extraction {
            title: Self::title(&document),
            text,
        })
    }
}

/// Readability first, structural second.
pub fn default_extractors() -> Vec<Box<dyn ContentExtractor>> {
    vec![
        Box::new(ReadabilityExtractor::default()),
        Box::new(StructuralExtractor),
    ]
}

/// Runs `extractors` in order and returns the first non-empty extraction.
pub fn extract_with(
    extractors: &[Box<dyn ContentExtractor>],
    html: &str,
) -> Option<(ExtractionMethod, Extraction)> {
    extractors.iter().find_map(|extractor| {
        extractor
            .extract(html)
            .filter(|e| !e.text.trim().is_empty())
            .map(|e| (extractor.method(), e))
    })
}
