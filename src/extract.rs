use std::path::PathBuf;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Node};

use crate::cli::ExtractArgs;
use crate::config::DigestConfig;
use crate::digest::FailureReason;
use crate::document::{Block, SemanticDocument, collapse_whitespace, normalize_headings};
use crate::fetch::{Fetch as _, FetchSettings, HttpFetcher, RawDocument};

/// Elements dropped wholesale, both when scoring candidates and when walking.
const DISCARDED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "link", "meta", "iframe", "frame",
    "object", "embed", "video", "audio", "source", "track", "canvas", "svg", "math", "img",
    "picture", "map", "form", "input", "button", "select", "option", "textarea", "label",
    "dialog", "menu", "nav", "aside", "footer",
];

/// Elements that end the current run of inline text.
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "body", "center", "dd", "details", "div", "dl", "dt", "figcaption",
    "figure", "header", "hgroup", "hr", "main", "ol", "pre", "section", "summary", "table",
    "tbody", "td", "tfoot", "th", "thead", "tr", "ul",
];

/// Containers eligible for the density pass.
const CANDIDATE_TAGS: &[&str] = &["body", "div", "section", "td", "center"];

/// Pages nested deeper than this are rejected before any tree walk, which keeps
/// the recursive walks within a blocking thread's stack.
const MAX_NESTING_DEPTH: usize = 512;

/// A density candidate must hold at least this share of the densest page
/// region's text, so a lone wrapped paragraph never beats the article body.
const MIN_TEXT_SHARE: f64 = 0.4;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no readable content after filtering")]
    EmptyContent,

    #[error("parse error: {0}")]
    Parse(String),
}

impl ExtractError {
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::EmptyContent => FailureReason::EmptyContent,
            Self::Parse(_) => FailureReason::ParseError,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub max_heading_depth: u8,
    pub min_text_density: f64,
    pub min_blocks: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from_config(&DigestConfig::default())
    }
}

impl ExtractOptions {
    pub fn from_config(config: &DigestConfig) -> Self {
        Self {
            max_heading_depth: config.max_heading_depth,
            min_text_density: config.min_text_density,
            min_blocks: config.min_blocks,
        }
    }
}

pub async fn run(args: ExtractArgs, config: &DigestConfig) -> anyhow::Result<()> {
    let options = ExtractOptions::from_config(config);

    let raw = match (&args.url, &args.file) {
        (_, Some(path)) => {
            let path = PathBuf::from(path);
            let bytes =
                std::fs::read(&path).with_context(|| format!("read html: {}", path.display()))?;
            let abs = std::path::absolute(&path)
                .with_context(|| format!("resolve path: {}", path.display()))?;
            let source_url = url::Url::from_file_path(&abs)
                .map_err(|()| anyhow::anyhow!("not a file url: {}", abs.display()))?;
            RawDocument {
                source_url,
                media_type: "text/html".to_string(),
                bytes,
                fetched_at: chrono::Utc::now(),
            }
        }
        (Some(url), None) => {
            let fetcher = HttpFetcher::new(FetchSettings::from_config(config))?;
            fetcher
                .fetch(url)
                .await
                .with_context(|| format!("fetch {url}"))?
        }
        (None, None) => anyhow::bail!("either --url or --file is required"),
    };

    let document = extract(&raw, &options).with_context(|| format!("extract {}", raw.source_url))?;
    let json = serde_json::to_string_pretty(&document).context("serialize document")?;
    println!("{json}");
    Ok(())
}

/// Decodes `raw` and reduces it to a [`SemanticDocument`].
///
/// Deterministic: the same bytes and options always yield the same document.
pub fn extract(raw: &RawDocument, options: &ExtractOptions) -> Result<SemanticDocument, ExtractError> {
    let html = decode(raw)?;
    extract_html(&html, raw.source_url.as_str(), options)
}

pub fn extract_html(
    html: &str,
    source_url: &str,
    options: &ExtractOptions,
) -> Result<SemanticDocument, ExtractError> {
    if !html.contains('<') {
        return Err(ExtractError::Parse("document contains no markup".to_string()));
    }

    let document = Html::parse_document(html);
    if exceeds_nesting_depth(&document, MAX_NESTING_DEPTH) {
        return Err(ExtractError::Parse(format!(
            "elements nest deeper than {MAX_NESTING_DEPTH} levels"
        )));
    }
    let region = locate_main_content(&document, options).ok_or(ExtractError::EmptyContent)?;

    let mut walker = Walker::default();
    walker.walk_children(region);
    walker.flush();
    let mut blocks = walker.blocks;
    if blocks.is_empty() {
        return Err(ExtractError::EmptyContent);
    }
    normalize_headings(&mut blocks, options.max_heading_depth);

    let mut doc = SemanticDocument {
        title: metadata_title(&document).unwrap_or_default(),
        author: metadata_author(&document),
        blocks,
    };
    if doc.title.is_empty() {
        doc.title = doc
            .first_heading()
            .map(str::to_owned)
            .unwrap_or_else(|| source_url.to_string());
    }
    Ok(doc)
}

fn decode(raw: &RawDocument) -> Result<String, ExtractError> {
    let encoding = declared_charset(&raw.media_type)
        .or_else(|| meta_charset(&raw.bytes))
        .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        .unwrap_or_else(|| {
            let mut detector = chardetng::EncodingDetector::new();
            let sample = &raw.bytes[..raw.bytes.len().min(64 * 1024)];
            detector.feed(sample, sample.len() == raw.bytes.len());
            detector.guess(None, true)
        });

    let (decoded, used, had_errors) = encoding.decode(&raw.bytes);
    if had_errors {
        return Err(ExtractError::Parse(format!(
            "body is not valid {}",
            used.name()
        )));
    }
    Ok(decoded.into_owned())
}

fn declared_charset(media_type: &str) -> Option<String> {
    media_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_ascii_lowercase())
    })
}

fn meta_charset(bytes: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let label = head[start..]
        .trim_start_matches(['"', '\''])
        .split(|c: char| c == '"' || c == '\'' || c == ';' || c == '>' || c == '/' || c.is_whitespace())
        .next()?;
    (!label.is_empty()).then(|| label.to_string())
}

fn metadata_title(document: &Html) -> Option<String> {
    let elements = || document.root_element().descendants().filter_map(ElementRef::wrap);

    let title = elements()
        .find(|el| el.value().name() == "title")
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());
    if title.is_some() {
        return title;
    }

    elements()
        .find(|el| {
            el.value().name() == "meta" && el.value().attr("property") == Some("og:title")
        })
        .and_then(|el| el.value().attr("content"))
        .map(collapse_whitespace)
        .filter(|t| !t.is_empty())
}

/// Author from `<meta name="author">`, then `article:author`, then the text
/// of a `rel="author"` link. Profile urls are not names and are skipped.
fn metadata_author(document: &Html) -> Option<String> {
    let elements = || document.root_element().descendants().filter_map(ElementRef::wrap);
    let usable = |value: String| {
        (!value.is_empty() && !value.starts_with("http://") && !value.starts_with("https://"))
            .then_some(value)
    };

    let meta = |key: &str, wanted: &str| {
        elements()
            .filter(|el| el.value().name() == "meta" && el.value().attr(key) == Some(wanted))
            .filter_map(|el| el.value().attr("content"))
            .find_map(|content| usable(collapse_whitespace(content)))
    };

    meta("name", "author")
        .or_else(|| meta("property", "article:author"))
        .or_else(|| {
            elements()
                .filter(|el| {
                    el.value()
                        .attr("rel")
                        .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("author")))
                })
                .find_map(|el| usable(collapse_whitespace(&el.text().collect::<String>())))
        })
}

/// Bounded check: never looks further up than `limit` ancestors per node.
fn exceeds_nesting_depth(document: &Html, limit: usize) -> bool {
    document
        .root_element()
        .descendants()
        .any(|node| node.ancestors().take(limit + 1).count() > limit)
}

#[derive(Debug, Default, Clone, Copy)]
struct RegionStats {
    text_chars: usize,
    block_tags: usize,
    content_blocks: usize,
    loose_text: bool,
}

impl RegionStats {
    /// Text characters per block element, the element itself included.
    fn density(&self) -> f64 {
        self.text_chars as f64 / (self.block_tags + 1) as f64
    }

    /// Content blocks, counting the element's own loose text as one.
    fn blocks(&self) -> usize {
        self.content_blocks + usize::from(self.loose_text)
    }
}

fn region_stats(el: ElementRef<'_>) -> RegionStats {
    let mut stats = RegionStats::default();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => {
                let chars = text.chars().filter(|c| !c.is_whitespace()).count();
                stats.text_chars += chars;
                stats.loose_text |= chars > 0;
            }
            Node::Element(_) => {
                let Some(child_el) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_discarded(child_el) {
                    continue;
                }
                let name = child_el.value().name();
                let inner = region_stats(child_el);
                stats.text_chars += inner.text_chars;
                stats.block_tags += inner.block_tags;
                stats.content_blocks += inner.content_blocks;

                let content = is_content_block(name);
                let block = is_block(name);
                if content || block {
                    stats.block_tags += 1;
                }
                if (content && inner.text_chars > 0) || (block && inner.loose_text) {
                    stats.content_blocks += 1;
                } else if !content && !block {
                    // Inline wrappers contribute their text as our own loose text.
                    stats.loose_text |= inner.loose_text;
                }
            }
            _ => {}
        }
    }
    stats
}

/// Semantic containers first, then the densest eligible container.
fn locate_main_content<'a>(document: &'a Html, options: &ExtractOptions) -> Option<ElementRef<'a>> {
    let elements = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| !has_discarded_ancestor(*el))
        .collect::<Vec<_>>();

    let semantic = elements
        .iter()
        .filter(|el| {
            let name = el.value().name();
            name == "article" || name == "main" || el.value().attr("role") == Some("main")
        })
        .map(|el| (*el, region_stats(*el)))
        .filter(|(_, stats)| stats.text_chars > 0 && stats.blocks() >= options.min_blocks)
        .fold(None::<(ElementRef<'a>, RegionStats)>, |best, cur| match best {
            Some(b) if b.1.text_chars >= cur.1.text_chars => Some(b),
            _ => Some(cur),
        });
    if let Some((el, stats)) = semantic {
        tracing::debug!(tag = el.value().name(), chars = stats.text_chars, "semantic container");
        return Some(el);
    }

    let candidates = elements
        .iter()
        .filter(|el| CANDIDATE_TAGS.contains(&el.value().name()))
        .map(|el| (*el, region_stats(*el)))
        .filter(|(_, stats)| stats.text_chars > 0)
        .collect::<Vec<_>>();
    let total_chars = candidates
        .iter()
        .map(|(_, stats)| stats.text_chars)
        .max()
        .unwrap_or(0);

    let picked = candidates
        .into_iter()
        .filter(|(_, stats)| {
            stats.blocks() >= options.min_blocks
                && stats.density() >= options.min_text_density
                && stats.text_chars as f64 >= total_chars as f64 * MIN_TEXT_SHARE
        })
        .fold(None::<(ElementRef<'a>, RegionStats)>, |best, cur| match best {
            Some(b)
                if b.1.density() > cur.1.density()
                    || (b.1.density() == cur.1.density() && b.1.text_chars >= cur.1.text_chars) =>
            {
                Some(b)
            }
            _ => Some(cur),
        });

    match picked {
        Some((el, stats)) => {
            tracing::debug!(
                tag = el.value().name(),
                chars = stats.text_chars,
                density = stats.density(),
                "density container"
            );
            Some(el)
        }
        None => {
            tracing::debug!("no container passed the density threshold");
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Paragraph,
    ListItem,
    Quote,
}

/// Emits blocks in document order. Loose inline text between block elements
/// is gathered into synthetic blocks of the enclosing kind.
#[derive(Debug, Default)]
struct Walker {
    blocks: Vec<Block>,
    inline: String,
    kinds: Vec<TextKind>,
}

impl Walker {
    fn kind(&self) -> TextKind {
        self.kinds.last().copied().unwrap_or(TextKind::Paragraph)
    }

    fn flush(&mut self) {
        let text = collapse_whitespace(&std::mem::take(&mut self.inline));
        if text.is_empty() {
            return;
        }
        self.blocks.push(match self.kind() {
            TextKind::Paragraph => Block::Paragraph { text },
            TextKind::ListItem => Block::ListItem { text },
            TextKind::Quote => Block::Quote { text },
        });
    }

    fn walk_children(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.inline.push_str(text),
                Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.visit(child_el);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit(&mut self, el: ElementRef<'_>) {
        if is_discarded(el) {
            return;
        }
        let name = el.value().name();

        if let Some(level) = heading_level(name) {
            self.flush();
            let mut text = String::new();
            collect_text(el, &mut text);
            let text = collapse_whitespace(&text);
            if !text.is_empty() {
                self.blocks.push(Block::Heading { level, text });
            }
            return;
        }

        match name {
            "br" => self.inline.push(' '),
            "p" => {
                self.flush();
                self.walk_children(el);
                self.flush();
            }
            "li" => self.nested(el, TextKind::ListItem),
            "blockquote" => self.nested(el, TextKind::Quote),
            _ if is_block(name) => {
                self.flush();
                self.walk_children(el);
                self.flush();
            }
            _ => self.walk_children(el),
        }
    }

    fn nested(&mut self, el: ElementRef<'_>, kind: TextKind) {
        self.flush();
        self.kinds.push(kind);
        self.walk_children(el);
        self.flush();
        self.kinds.pop();
    }
}

fn collect_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child)
                    && !is_discarded(child_el)
                {
                    if child_el.value().name() == "br" {
                        out.push(' ');
                    }
                    collect_text(child_el, out);
                }
            }
            _ => {}
        }
    }
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn is_block(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

fn is_content_block(name: &str) -> bool {
    matches!(name, "p" | "li" | "blockquote" | "pre" | "dd") || heading_level(name).is_some()
}

fn is_discarded(el: ElementRef<'_>) -> bool {
    let value = el.value();
    if DISCARDED_TAGS.contains(&value.name()) {
        return true;
    }
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    value.attr("style").is_some_and(|style| {
        let style = style.to_ascii_lowercase().replace(' ', "");
        style.contains("display:none") || style.contains("visibility:hidden")
    })
}

fn has_discarded_ancestor(el: ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(is_discarded)
}
