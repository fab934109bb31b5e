//! Natural anchor-text insertion.
//!
//! The link is placed in the first sentence that mentions one of the task's
//! keywords: on the anchor text itself when that sentence already contains
//! it, otherwise as a short clause right after the sentence. Content without
//! any keyword sentence gets a closing sentence carrying the link.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{ContentFormat, GeneratedContent, PlacementInstructions};

/// Characters of context kept on each side of the link.
const CONTEXT_CHARS: usize = 80;

static SENTENCE_RE: OnceLock<Regex> = OnceLock::new();

fn sentence_re() -> &'static Regex {
    SENTENCE_RE.get_or_init(|| {
        Regex::new(r"[^.!?\n]+(?:[.!?]+|\n|$)").expect("Invalid regex for sentence splitting")
    })
}

/// How the link ended up in the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorStrategy {
    /// The content already linked to the target.
    AlreadyPresent,
    /// The anchor text inside a keyword sentence became the link.
    Inline,
    /// A clause with the link follows the first keyword sentence.
    AfterKeywordSentence,
    /// No keyword sentence; a sentence with the link was appended.
    Appended,
}

/// Result of inserting a link.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorPlacement {
    pub content: String,
    pub strategy: AnchorStrategy,
    /// The rendered link (or the bare URL when it was already present).
    pub link: String,
    /// Character offset of the link.
    pub offset: usize,
    pub surrounding_context: String,
}

/// Inserts a link to `target_url` labelled `anchor_text` into `content`.
pub fn insert_anchor(
    content: &str,
    anchor_text: &str,
    target_url: &str,
    keywords: &[String],
    format: ContentFormat,
) -> AnchorPlacement {
    if let Some(byte) = find_url(content, target_url) {
        return placement(
            content.to_string(),
            AnchorStrategy::AlreadyPresent,
            byte,
            target_url.len(),
        );
    }

    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();

    let keyword_sentence = sentence_re().find_iter(content).find(|sentence| {
        let lowered = sentence.as_str().to_lowercase();
        keywords.iter().any(|k| lowered.contains(k.as_str()))
    });

    if let Some(sentence) = keyword_sentence {
        // Inline: link the anchor text where the sentence already uses it.
        let anchor_re = Regex::new(&format!("(?i){}", regex::escape(anchor_text))).ok();
        if let Some(found) = anchor_re.and_then(|re| re.find(sentence.as_str())) {
            let start = sentence.start() + found.start();
            let end = sentence.start() + found.end();
            let link = format.link(&content[start..end], target_url);
            let updated = format!("{}{}{}", &content[..start], link, &content[end..]);
            return placement(updated, AnchorStrategy::Inline, start, link.len());
        }

        let link = format.link(anchor_text, target_url);
        let clause = format!(" See {} for more.", link);
        let insert_at = trimmed_end(content, sentence.end());
        let updated = format!("{}{}{}", &content[..insert_at], clause, &content[insert_at..]);
        let link_start = insert_at + " See ".len();
        return placement(
            updated,
            AnchorStrategy::AfterKeywordSentence,
            link_start,
            link.len(),
        );
    }

    let link = format.link(anchor_text, target_url);
    let (prefix, suffix) = match format {
        ContentFormat::Html => ("<p>For more on this topic, see ", ".</p>"),
        ContentFormat::Markdown | ContentFormat::Text => ("\n\nFor more on this topic, see ", "."),
    };
    let body = content.trim_end();
    let link_start = body.len() + prefix.len();
    let updated = format!("{}{}{}{}", body, prefix, link, suffix);
    placement(updated, AnchorStrategy::Appended, link_start, link.len())
}

/// Inserts the task's link into generated content and records where it went.
///
/// Returns the strategy used and the rendered link.
pub fn apply_anchor(
    content: &mut GeneratedContent,
    anchor_text: &str,
    target_url: &str,
    keywords: &[String],
) -> (AnchorStrategy, String) {
    let placed = insert_anchor(
        &content.content,
        anchor_text,
        target_url,
        keywords,
        content.metadata.format,
    );

    content.content = placed.content;
    content.metadata.word_count = content.content.split_whitespace().count();
    content.placement_instructions = PlacementInstructions {
        anchor_offset: Some(placed.offset),
        surrounding_context: placed.surrounding_context,
    };
    (placed.strategy, placed.link)
}

/// Recomputes the placement instructions after the content was rewritten.
///
/// Clears the offset when the rewrite dropped the link.
pub fn relocate_anchor(content: &mut GeneratedContent, link: &str) {
    content.metadata.word_count = content.content.split_whitespace().count();
    let found = find_url(&content.content, link).or_else(|| content.content.find(link));
    let Some(byte) = found else {
        content.placement_instructions = PlacementInstructions::default();
        return;
    };

    let located = placement(
        content.content.clone(),
        AnchorStrategy::AlreadyPresent,
        byte,
        link.len(),
    );
    content.placement_instructions = PlacementInstructions {
        anchor_offset: Some(located.offset),
        surrounding_context: located.surrounding_context,
    };
}

/// Byte index of the first occurrence of `url` that is not the start of a
/// longer URL.
fn find_url(content: &str, url: &str) -> Option<usize> {
    if url.is_empty() {
        return None;
    }
    content.match_indices(url).map(|(i, _)| i).find(|&i| {
        let mut rest = content[i + url.len()..].chars();
        match rest.next() {
            None => true,
            // Sentence punctuation, unless the URL goes on after it.
            Some('.' | ',' | ';' | ':' | '!' | '?') => !rest.next().is_some_and(continues_url),
            Some(c) => !continues_url(c),
        }
    })
}

fn continues_url(c: char) -> bool {
    c.is_alphanumeric() || "-_~/?#=&%+@".contains(c)
}

/// Byte index before trailing whitespace of `content[..end]`.
fn trimmed_end(content: &str, end: usize) -> usize {
    content[..end].trim_end().len()
}

fn placement(
    content: String,
    strategy: AnchorStrategy,
    byte_start: usize,
    byte_len: usize,
) -> AnchorPlacement {
    let offset = content[..byte_start].chars().count();
    let link = content[byte_start..byte_start + byte_len].to_string();
    let link_chars = link.chars().count();
    let surrounding_context: String = content
        .chars()
        .skip(offset.saturating_sub(CONTEXT_CHARS))
        .take(offset.min(CONTEXT_CHARS) + link_chars + CONTEXT_CHARS)
        .collect();

    AnchorPlacement {
        content,
        strategy,
        link,
        offset,
        surrounding_context,
    }
}
