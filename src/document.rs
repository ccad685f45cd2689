use serde::{Deserialize, Serialize};

/// Deepest heading level a block may carry once normalized.
pub const MAX_HEADING_LEVEL: u8 = 6;

/// Normalized heading/paragraph representation of one article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticDocument {
    pub title: String,
    /// Byline taken from the page's own metadata, when it declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { text: String },
    ListItem { text: String },
    Quote { text: String },
}

impl Block {
    pub fn text(&self) -> &str {
        match self {
            Block::Heading { text, .. }
            | Block::Paragraph { text }
            | Block::ListItem { text }
            | Block::Quote { text } => text,
        }
    }
}

impl SemanticDocument {
    pub fn first_heading(&self) -> Option<&str> {
        self.blocks.iter().find_map(|block| match block {
            Block::Heading { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

/// Re-bases heading levels so the shallowest heading becomes level 1, closes
/// up skipped levels (h1 followed by h4 nests as h2), then clamps to
/// `max_depth`. Siblings stay siblings: every heading lands one level below
/// the nearest preceding heading with a shallower source level. Non-heading
/// blocks are left untouched and order is kept.
pub fn normalize_headings(blocks: &mut [Block], max_depth: u8) {
    let max_depth = max_depth.clamp(1, MAX_HEADING_LEVEL);
    let Some(shallowest) = blocks
        .iter()
        .filter_map(|block| match block {
            Block::Heading { level, .. } => Some(*level),
            _ => None,
        })
        .min()
    else {
        return;
    };

    // (source level, normalized level) of the currently open headings.
    let mut open: Vec<(u8, u8)> = Vec::new();
    for block in blocks.iter_mut() {
        let Block::Heading { level, .. } = block else {
            continue;
        };
        let source = level.saturating_sub(shallowest).saturating_add(1);
        while open.last().is_some_and(|(parent, _)| *parent >= source) {
            open.pop();
        }
        let nested = open.last().map_or(1, |(_, parent)| parent.saturating_add(1));
        open.push((source, nested));
        *level = nested.min(max_depth);
    }
}

/// Collapses runs of whitespace (including newlines) into single spaces and
/// drops characters XML 1.0 cannot carry.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        let mut chars = word.chars().filter(|c| is_xml_char(*c)).peekable();
        if chars.peek().is_none() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(chars);
    }
    out
}

/// The `Char` production of XML 1.0.
pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..)
}
