use std::io::{Cursor, Write as _};

use anyhow::Context as _;
use chrono::NaiveDate;
use zip::write::SimpleFileOptions;

use crate::config::DigestConfig;
use crate::digest::{Digest, DigestEntry, ExtractionOutcome};
use crate::document::{Block, SemanticDocument, is_xml_char};
use crate::formats::{SkipManifest, SkipRecord, StoryRef};

pub const EPUB_MEDIA_TYPE: &str = "application/epub+zip";

const BOOK_CREATOR: &str = "hndigest";

#[derive(Debug, Clone)]
pub struct BookOptions {
    pub title: String,
    /// BCP-47 language tag used for EPUB metadata and XHTML documents.
    pub lang: String,
    pub filename: String,
}

impl BookOptions {
    pub fn for_date(date: NaiveDate, config: &DigestConfig) -> Self {
        let title = config
            .book_title
            .clone()
            .unwrap_or_else(|| default_title(date));
        let lang = config.language.trim();
        Self {
            title,
            lang: if lang.is_empty() { "und" } else { lang }.to_owned(),
            filename: default_filename(date),
        }
    }
}

pub fn default_title(date: NaiveDate) -> String {
    format!("HN Daily - {date}")
}

pub fn default_filename(date: NaiveDate) -> String {
    format!("hn_daily_{date}.epub")
}

/// A packaged book, owned by whoever delivers or stores it.
#[derive(Debug, Clone)]
pub struct BookArtifact {
    pub filename: String,
    pub title: String,
    pub bytes: Vec<u8>,
    pub chapter_count: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("digest has no successful entries")]
    EmptyArtifact,

    #[error("package epub: {0:#}")]
    Package(anyhow::Error),
}

/// Stories that did not make it into the book, in rank order.
pub fn skip_manifest(date: NaiveDate, entries: &[DigestEntry]) -> SkipManifest {
    let skipped = entries
        .iter()
        .filter_map(|entry| match &entry.outcome {
            ExtractionOutcome::Success(_) => None,
            ExtractionOutcome::Failure { reason, detail } => Some(SkipRecord {
                id: entry.story.id.clone(),
                title: entry.story.title.clone(),
                url: entry.story.url.clone(),
                rank: entry.story.rank,
                reason: *reason,
                detail: detail.clone(),
            }),
        })
        .collect();
    SkipManifest {
        date: date.to_string(),
        chapters: entries.iter().filter(|e| e.outcome.is_success()).count(),
        skipped,
    }
}

/// One chapter per successful entry, in rank order. Failed entries only show
/// up in the returned manifest.
pub fn build_book(
    digest: &Digest,
    options: &BookOptions,
) -> Result<(BookArtifact, SkipManifest), BookError> {
    let chapters = digest
        .successes()
        .enumerate()
        .map(|(idx, (story, doc))| ChapterSpec::new(idx, story, doc))
        .collect::<Vec<_>>();
    if chapters.is_empty() {
        return Err(BookError::EmptyArtifact);
    }

    let uuid = book_uuid(digest);
    let bytes = write_package(&options.title, &options.lang, uuid, digest, &chapters)
        .map_err(BookError::Package)?;

    let manifest = skip_manifest(digest.date, &digest.entries);
    tracing::info!(
        chapters = chapters.len(),
        skipped = manifest.skipped.len(),
        bytes = bytes.len(),
        "book built"
    );
    Ok((
        BookArtifact {
            filename: options.filename.clone(),
            title: options.title.clone(),
            bytes,
            chapter_count: chapters.len(),
        },
        manifest,
    ))
}

/// Same date and same stories give the same identifier.
fn book_uuid(digest: &Digest) -> uuid::Uuid {
    let mut name = format!("hndigest:{}", digest.date);
    for (story, _) in digest.successes() {
        name.push(':');
        name.push_str(&story.id);
    }
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, name.as_bytes())
}

fn write_package(
    title: &str,
    lang: &str,
    uuid: uuid::Uuid,
    digest: &Digest,
    chapters: &[ChapterSpec<'_>],
) -> anyhow::Result<Vec<u8>> {
    let modified = digest
        .assembled_at
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let container_xml = render_container_xml();
    let css = default_style_css();
    let nav_xhtml = render_nav_xhtml(title, lang, chapters);
    let toc_ncx = render_toc_ncx(title, uuid, chapters);
    let content_opf = render_content_opf(title, lang, uuid, &modified, digest.date, chapters);

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));

    // `mimetype` must be the first entry and stored uncompressed.
    let mimetype_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    zip.start_file("mimetype", mimetype_options)
        .context("epub start_file mimetype")?;
    zip.write_all(EPUB_MEDIA_TYPE.as_bytes())
        .context("epub write mimetype")?;

    let deflated_options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let fixed = [
        ("META-INF/container.xml", container_xml.as_str()),
        ("OEBPS/content.opf", content_opf.as_str()),
        ("OEBPS/nav.xhtml", nav_xhtml.as_str()),
        ("OEBPS/toc.ncx", toc_ncx.as_str()),
        ("OEBPS/style.css", css),
    ];
    for (path, contents) in fixed {
        zip.start_file(path, deflated_options)
            .with_context(|| format!("epub start_file {path}"))?;
        zip.write_all(contents.as_bytes())
            .with_context(|| format!("epub write {path}"))?;
    }

    for (idx, chapter) in chapters.iter().enumerate() {
        let prev = idx.checked_sub(1).map(|i| chapters[i].stem.as_str());
        let next = chapters.get(idx + 1).map(|c| c.stem.as_str());
        let body = render_chapter_body(chapter, prev, next);
        let xhtml = wrap_xhtml_document(&chapter.story.title, lang, &body);

        zip.start_file(format!("OEBPS/{}.xhtml", chapter.stem), deflated_options)
            .with_context(|| format!("epub start_file chapter: {}", chapter.stem))?;
        zip.write_all(xhtml.as_bytes())
            .with_context(|| format!("epub write chapter: {}", chapter.stem))?;
    }

    let cursor = zip.finish().context("epub finish zip")?;
    Ok(cursor.into_inner())
}

#[derive(Debug)]
struct ChapterSpec<'a> {
    stem: String,
    story: &'a StoryRef,
    doc: &'a SemanticDocument,
    /// Level-1 headings: (anchor id, text).
    sections: Vec<(String, String)>,
}

impl<'a> ChapterSpec<'a> {
    fn new(idx: usize, story: &'a StoryRef, doc: &'a SemanticDocument) -> Self {
        let sections = doc
            .blocks
            .iter()
            .filter_map(|block| match block {
                Block::Heading { level: 1, text } => Some(text.clone()),
                _ => None,
            })
            .enumerate()
            .map(|(n, text)| (section_anchor(n), text))
            .collect();
        Self {
            stem: format!("chapter-{:02}", idx + 1),
            story,
            doc,
            sections,
        }
    }
}

fn section_anchor(n: usize) -> String {
    format!("sec-{}", n + 1)
}

fn render_container_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#
    .to_string()
}

fn default_style_css() -> &'static str {
    r#"@charset "utf-8";

html { font-family: Georgia, serif; }
body { margin: 0; padding: 0 1.2em; line-height: 1.6; }
h1.chapter-title { font-size: 1.8em; margin: 1em 0 0.5em; }
.meta { color: #666; font-size: 0.9em; margin-bottom: 1.5em; border-bottom: 1px solid #eee; padding-bottom: 1em; }
.chapter-nav { margin: 1.2em 0; padding: 0.5em 0; border-top: 1px solid #ccc; font-size: 0.9em; }
.content { text-align: justify; }
blockquote { margin: 1em 0; padding: 0 1em; border-left: 4px solid #ddd; color: #333; }
a { color: #0066cc; }
"#
}

fn render_nav_xhtml(title: &str, lang: &str, chapters: &[ChapterSpec<'_>]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" xmlns:epub=\"http://www.idpf.org/2007/ops\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(&format!("  <h1>{}</h1>\n", xml_escape(title)));
    out.push_str("  <nav epub:type=\"toc\" id=\"toc\">\n");
    out.push_str("    <ol>\n");
    for ch in chapters {
        out.push_str(&format!(
            "      <li><a href=\"{}.xhtml\">{}</a>",
            xml_escape(&ch.stem),
            xml_escape(&ch.story.title)
        ));
        if !ch.sections.is_empty() {
            out.push_str("\n        <ol>\n");
            for (anchor, text) in &ch.sections {
                out.push_str(&format!(
                    "          <li><a href=\"{}.xhtml#{}\">{}</a></li>\n",
                    xml_escape(&ch.stem),
                    xml_escape(anchor),
                    xml_escape(text)
                ));
            }
            out.push_str("        </ol>\n      ");
        }
        out.push_str("</li>\n");
    }
    out.push_str("    </ol>\n");
    out.push_str("  </nav>\n");
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

fn render_toc_ncx(title: &str, uuid: uuid::Uuid, chapters: &[ChapterSpec<'_>]) -> String {
    let depth = if chapters.iter().any(|c| !c.sections.is_empty()) {
        2
    } else {
        1
    };

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(
        "<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\" \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n",
    );
    out.push_str("<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n");
    out.push_str("  <head>\n");
    out.push_str(&format!(
        "    <meta name=\"dtb:uid\" content=\"urn:uuid:{}\" />\n",
        xml_escape(&uuid.to_string())
    ));
    out.push_str(&format!(
        "    <meta name=\"dtb:depth\" content=\"{depth}\" />\n"
    ));
    out.push_str("    <meta name=\"dtb:totalPageCount\" content=\"0\" />\n");
    out.push_str("    <meta name=\"dtb:maxPageNumber\" content=\"0\" />\n");
    out.push_str("  </head>\n");
    out.push_str("  <docTitle><text>");
    out.push_str(&xml_escape(title));
    out.push_str("</text></docTitle>\n");
    out.push_str("  <navMap>\n");
    let mut play = 0;
    for ch in chapters {
        play += 1;
        out.push_str(&format!(
            "    <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
        ));
        out.push_str("      <navLabel><text>");
        out.push_str(&xml_escape(&ch.story.title));
        out.push_str("</text></navLabel>\n");
        out.push_str(&format!(
            "      <content src=\"{}.xhtml\" />\n",
            xml_escape(&ch.stem)
        ));
        for (anchor, text) in &ch.sections {
            play += 1;
            out.push_str(&format!(
                "      <navPoint id=\"navPoint-{play}\" playOrder=\"{play}\">\n"
            ));
            out.push_str("        <navLabel><text>");
            out.push_str(&xml_escape(text));
            out.push_str("</text></navLabel>\n");
            out.push_str(&format!(
                "        <content src=\"{}.xhtml#{}\" />\n",
                xml_escape(&ch.stem),
                xml_escape(anchor)
            ));
            out.push_str("      </navPoint>\n");
        }
        out.push_str("    </navPoint>\n");
    }
    out.push_str("  </navMap>\n");
    out.push_str("</ncx>\n");
    out
}

fn render_content_opf(
    title: &str,
    lang: &str,
    uuid: uuid::Uuid,
    modified: &str,
    date: NaiveDate,
    chapters: &[ChapterSpec<'_>],
) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"3.0\" xml:lang=\"{}\">\n",
        xml_escape(lang)
    ));
    out.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    out.push_str(&format!(
        "    <dc:identifier id=\"bookid\">urn:uuid:{}</dc:identifier>\n",
        xml_escape(&uuid.to_string())
    ));
    out.push_str(&format!("    <dc:title>{}</dc:title>\n", xml_escape(title)));
    out.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        xml_escape(lang)
    ));
    out.push_str(&format!("    <dc:creator>{BOOK_CREATOR}</dc:creator>\n"));
    out.push_str(&format!("    <dc:date>{date}</dc:date>\n"));
    out.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        xml_escape(modified)
    ));
    out.push_str("  </metadata>\n");
    out.push_str("  <manifest>\n");
    out.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\" />\n",
    );
    out.push_str(
        "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\" />\n",
    );
    out.push_str("    <item id=\"css\" href=\"style.css\" media-type=\"text/css\" />\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <item id=\"{}\" href=\"{}.xhtml\" media-type=\"application/xhtml+xml\" />\n",
            xml_escape(&ch.stem),
            xml_escape(&ch.stem)
        ));
    }
    out.push_str("  </manifest>\n");
    out.push_str("  <spine toc=\"ncx\">\n");
    out.push_str("    <itemref idref=\"nav\" />\n");
    for ch in chapters {
        out.push_str(&format!(
            "    <itemref idref=\"{}\" />\n",
            xml_escape(&ch.stem)
        ));
    }
    out.push_str("  </spine>\n");
    out.push_str("</package>\n");
    out
}

fn render_chapter_nav(prev: Option<&str>, next: Option<&str>) -> String {
    let mut links = Vec::new();
    if let Some(prev) = prev {
        links.push(format!("<a href=\"{}.xhtml\">← Previous</a>", xml_escape(prev)));
    }
    links.push("<a href=\"nav.xhtml\">Contents</a>".to_string());
    if let Some(next) = next {
        links.push(format!("<a href=\"{}.xhtml\">Next →</a>", xml_escape(next)));
    }
    format!("<div class=\"chapter-nav\">{}</div>\n", links.join(" | "))
}

fn render_chapter_body(chapter: &ChapterSpec<'_>, prev: Option<&str>, next: Option<&str>) -> String {
    let story = chapter.story;
    let nav = render_chapter_nav(prev, next);

    let mut out = String::new();
    out.push_str(&nav);
    out.push_str(&format!(
        "<h1 class=\"chapter-title\">{}</h1>\n",
        xml_escape(&story.title)
    ));
    out.push_str("<div class=\"meta\">\n");
    let mut byline = Vec::new();
    // The article's own byline beats the submitter.
    if let Some(author) = chapter.doc.author.as_ref().or(story.author.as_ref()) {
        byline.push(format!("By: {}", xml_escape(author)));
    }
    if let Some(points) = story.points {
        byline.push(format!("{points} points"));
    }
    if !byline.is_empty() {
        out.push_str(&format!("<p>{}</p>\n", byline.join(" · ")));
    }
    out.push_str(&format!(
        "<p>Source: <a href=\"{}\">{}</a></p>\n",
        xml_escape(&story.url),
        xml_escape(&display_url(&story.url))
    ));
    out.push_str("</div>\n");
    out.push_str("<div class=\"content\">\n");
    render_blocks(&mut out, &chapter.doc.blocks);
    out.push_str("</div>\n");
    out.push_str(&nav);
    out
}

/// Headings open nested `<section>`s; level 1 maps to `<h2>` since the
/// chapter title owns `<h1>`.
fn render_blocks(out: &mut String, blocks: &[Block]) {
    let mut open_sections: Vec<u8> = Vec::new();
    let mut in_list = false;
    let mut top_level = 0;

    for block in blocks {
        if in_list && !matches!(block, Block::ListItem { .. }) {
            out.push_str("</ul>\n");
            in_list = false;
        }
        match block {
            Block::Heading { level, text } => {
                while open_sections.last().is_some_and(|open| open >= level) {
                    open_sections.pop();
                    out.push_str("</section>\n");
                }
                if *level == 1 {
                    out.push_str(&format!("<section id=\"{}\">\n", section_anchor(top_level)));
                    top_level += 1;
                } else {
                    out.push_str("<section>\n");
                }
                open_sections.push(*level);
                let tag = (level + 1).min(6);
                out.push_str(&format!("<h{tag}>{}</h{tag}>\n", xml_escape(text)));
            }
            Block::Paragraph { text } => {
                out.push_str(&format!("<p>{}</p>\n", xml_escape(text)));
            }
            Block::ListItem { text } => {
                if !in_list {
                    out.push_str("<ul>\n");
                    in_list = true;
                }
                out.push_str(&format!("<li>{}</li>\n", xml_escape(text)));
            }
            Block::Quote { text } => {
                out.push_str(&format!("<blockquote><p>{}</p></blockquote>\n", xml_escape(text)));
            }
        }
    }
    if in_list {
        out.push_str("</ul>\n");
    }
    for _ in open_sections {
        out.push_str("</section>\n");
    }
}

fn display_url(url: &str) -> String {
    const MAX_CHARS: usize = 50;
    if url.chars().count() <= MAX_CHARS {
        return url.to_string();
    }
    let mut short = url.chars().take(MAX_CHARS).collect::<String>();
    short.push_str("...");
    short
}

fn wrap_xhtml_document(title: &str, lang: &str, body_html: &str) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str("<!DOCTYPE html>\n");
    out.push_str(&format!(
        "<html xmlns=\"http://www.w3.org/1999/xhtml\" lang=\"{}\" xml:lang=\"{}\">\n",
        xml_escape(lang),
        xml_escape(lang)
    ));
    out.push_str("<head>\n");
    out.push_str(&format!("  <title>{}</title>\n", xml_escape(title)));
    out.push_str("  <meta charset=\"utf-8\" />\n");
    out.push_str("  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body_html);
    if !body_html.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("</body>\n");
    out.push_str("</html>\n");
    out
}

/// Escapes markup and drops characters XML 1.0 forbids, so story titles and
/// urls from the listing cannot break a chapter either.
fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars().filter(|c| is_xml_char(*c)) {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

    use chrono::Utc;

    use super::*;
    use crate::digest::FailureReason;

    fn story(rank: u32) -> StoryRef {
        StoryRef {
            id: format!("{}", 1000 + rank),
            title: format!("Story <{rank}>"),
            url: format!("https://example.com/{rank}?a=1&b=2"),
            rank,
            author: Some("pg".to_string()),
            points: Some(120),
        }
    }

    fn doc(rank: u32) -> SemanticDocument {
        SemanticDocument {
            title: format!("Story {rank}"),
            author: None,
            blocks: vec![
                Block::Paragraph {
                    text: "Intro & overview.".to_string(),
                },
                Block::Heading {
                    level: 1,
                    text: format!("Part {rank}"),
                },
                Block::Paragraph {
                    text: "Body.".to_string(),
                },
                Block::Heading {
                    level: 2,
                    text: "Detail".to_string(),
                },
                Block::ListItem {
                    text: "one".to_string(),
                },
                Block::ListItem {
                    text: "two".to_string(),
                },
                Block::Quote {
                    text: "quoted".to_string(),
                },
            ],
        }
    }

    fn digest(outcomes: Vec<(u32, ExtractionOutcome)>) -> Digest {
        Digest {
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            assembled_at: Utc::now(),
            entries: outcomes
                .into_iter()
                .map(|(rank, outcome)| DigestEntry {
                    story: story(rank),
                    outcome,
                })
                .collect(),
        }
    }

    fn timeout() -> ExtractionOutcome {
        ExtractionOutcome::Failure {
            reason: FailureReason::Timeout,
            detail: "exceeded 45s task timeout".to_string(),
        }
    }

    fn options() -> BookOptions {
        BookOptions::for_date(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            &DigestConfig::default(),
        )
    }

    fn read_entry(bytes: &[u8], name: &str) -> String {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut file = archive.by_name(name).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn failed_entries_go_to_the_manifest_not_the_book() {
        let digest = digest(vec![
            (1, ExtractionOutcome::Success(doc(1))),
            (2, timeout()),
            (3, ExtractionOutcome::Success(doc(3))),
        ]);
        let (artifact, manifest) = build_book(&digest, &options()).unwrap();

        assert_eq!(artifact.chapter_count, 2);
        assert_eq!(artifact.filename, "hn_daily_2024-05-01.epub");
        assert_eq!(artifact.title, "HN Daily - 2024-05-01");
        assert_eq!(manifest.chapters, 2);
        assert_eq!(manifest.skipped.len(), 1);
        assert_eq!(manifest.skipped[0].rank, 2);
        assert_eq!(manifest.skipped[0].reason, FailureReason::Timeout);

        let mut archive = zip::ZipArchive::new(Cursor::new(&artifact.bytes)).unwrap();
        let names = archive.file_names().map(str::to_owned).collect::<Vec<_>>();
        assert!(names.contains(&"OEBPS/chapter-01.xhtml".to_string()));
        assert!(names.contains(&"OEBPS/chapter-02.xhtml".to_string()));
        assert!(!names.contains(&"OEBPS/chapter-03.xhtml".to_string()));

        let first = archive.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), zip::CompressionMethod::Stored);
    }

    #[test]
    fn toc_lists_chapters_in_rank_order_with_nested_sections() {
        let digest = digest(vec![
            (1, ExtractionOutcome::Success(doc(1))),
            (2, ExtractionOutcome::Success(doc(2))),
        ]);
        let (artifact, _) = build_book(&digest, &options()).unwrap();

        let nav = read_entry(&artifact.bytes, "OEBPS/nav.xhtml");
        let first = nav.find("Story &lt;1&gt;").unwrap();
        let second = nav.find("Story &lt;2&gt;").unwrap();
        assert!(first < second);
        assert!(nav.contains("<a href=\"chapter-01.xhtml#sec-1\">Part 1</a>"));

        let ncx = read_entry(&artifact.bytes, "OEBPS/toc.ncx");
        assert!(ncx.contains("<content src=\"chapter-02.xhtml#sec-1\" />"));
        assert!(ncx.contains("dtb:depth\" content=\"2\""));

        let opf = read_entry(&artifact.bytes, "OEBPS/content.opf");
        let spine_first = opf.find("<itemref idref=\"chapter-01\" />").unwrap();
        let spine_second = opf.find("<itemref idref=\"chapter-02\" />").unwrap();
        assert!(spine_first < spine_second);
    }

    #[test]
    fn chapter_markup_nests_sections_by_heading_level() {
        let digest = digest(vec![
            (1, ExtractionOutcome::Success(doc(1))),
            (2, ExtractionOutcome::Success(doc(2))),
        ]);
        let (artifact, _) = build_book(&digest, &options()).unwrap();
        let chapter = read_entry(&artifact.bytes, "OEBPS/chapter-01.xhtml");

        assert!(chapter.contains("<h1 class=\"chapter-title\">Story &lt;1&gt;</h1>"));
        assert!(chapter.contains("<p>Intro &amp; overview.</p>"));
        assert!(chapter.contains(
            "<section id=\"sec-1\">\n<h2>Part 1</h2>\n<p>Body.</p>\n<section>\n<h3>Detail</h3>\n<ul>\n<li>one</li>\n<li>two</li>\n</ul>\n<blockquote><p>quoted</p></blockquote>\n</section>\n</section>\n"
        ));
        assert!(chapter.contains("href=\"https://example.com/1?a=1&amp;b=2\""));
        assert!(chapter.contains("By: pg · 120 points"));
        assert!(chapter.contains("<a href=\"chapter-02.xhtml\">Next →</a>"));
        assert!(!chapter.contains("Previous"));
    }

    #[test]
    fn page_author_is_preferred_over_submitter() {
        let mut with_author = doc(1);
        with_author.author = Some("Jane Writer".to_string());
        let digest = digest(vec![
            (1, ExtractionOutcome::Success(with_author)),
            (2, ExtractionOutcome::Success(doc(2))),
        ]);
        let (artifact, _) = build_book(&digest, &options()).unwrap();

        let first = read_entry(&artifact.bytes, "OEBPS/chapter-01.xhtml");
        assert!(first.contains("By: Jane Writer · 120 points"));
        assert!(!first.contains("By: pg"));
        let second = read_entry(&artifact.bytes, "OEBPS/chapter-02.xhtml");
        assert!(second.contains("By: pg · 120 points"));
    }

    #[test]
    fn control_characters_never_reach_chapter_markup() {
        let mut dirty = doc(1);
        dirty.blocks.push(Block::Paragraph {
            text: "bad \u{1}\u{8} char".to_string(),
        });
        let mut digest = digest(vec![(1, ExtractionOutcome::Success(dirty))]);
        digest.entries[0].story.title = "Title\u{1b}[0m".to_string();
        let (artifact, _) = build_book(&digest, &options()).unwrap();

        for name in ["OEBPS/chapter-01.xhtml", "OEBPS/nav.xhtml", "OEBPS/toc.ncx", "OEBPS/content.opf"] {
            let xml = read_entry(&artifact.bytes, name);
            assert!(xml.chars().all(is_xml_char), "{name} carries an illegal character");
        }
        let chapter = read_entry(&artifact.bytes, "OEBPS/chapter-01.xhtml");
        assert!(chapter.contains("<p>bad  char</p>"));
        assert!(chapter.contains("Title[0m"));
    }

    #[test]
    fn no_successes_is_an_empty_artifact() {
        let digest = digest(vec![(1, timeout()), (2, timeout())]);
        assert!(matches!(
            build_book(&digest, &options()),
            Err(BookError::EmptyArtifact)
        ));
    }

    #[test]
    fn identifier_is_stable_for_the_same_selection() {
        let a = digest(vec![(1, ExtractionOutcome::Success(doc(1)))]);
        let b = digest(vec![(1, ExtractionOutcome::Success(doc(1)))]);
        let c = digest(vec![(2, ExtractionOutcome::Success(doc(2)))]);
        assert_eq!(book_uuid(&a), book_uuid(&b));
        assert_ne!(book_uuid(&a), book_uuid(&c));
    }

    #[test]
    fn long_urls_are_shortened_for_display() {
        let url = format!("https://example.com/{}", "a".repeat(80));
        let shown = display_url(&url);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 53);
    }
}
