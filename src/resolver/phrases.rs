//! Visible-text extraction and phrase matching for detail pages.

use crate::error::{IngestError, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use scraper::{Html, Selector};

static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());

/// Which configured phrase list matched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhraseMatch {
    Pending(String),
    Declined(String),
    NoMatch,
}

/// Case-insensitive whole-word matcher over two phrase lists. Pending phrases
/// are checked first.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    pending: Vec<(String, Regex)>,
    declined: Vec<(String, Regex)>,
}

impl PhraseMatcher {
    pub fn new(pending: &[String], declined: &[String]) -> Result<Self> {
        Ok(Self { pending: compile(pending)?, declined: compile(declined)? })
    }

    pub fn classify(&self, text: &str) -> PhraseMatch {
        if let Some((phrase, _)) = self.pending.iter().find(|(_, re)| re.is_match(text)) {
            return PhraseMatch::Pending(phrase.clone());
        }
        if let Some((phrase, _)) = self.declined.iter().find(|(_, re)| re.is_match(text)) {
            return PhraseMatch::Declined(phrase.clone());
        }
        PhraseMatch::NoMatch
    }
}

fn compile(phrases: &[String]) -> Result<Vec<(String, Regex)>> {
    phrases
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|phrase| {
            let pattern = format!(r"\b{}\b", regex::escape(phrase).replace(' ', r"\s+"));
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .map(|re| (phrase.to_string(), re))
                .map_err(|e| IngestError::Config(format!("invalid phrase '{}': {}", phrase, e)))
        })
        .collect()
}

/// Text a reader would see in the page body, whitespace-collapsed. Script,
/// style and template contents are skipped.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let root = match document.select(&BODY).next() {
        Some(body) => body,
        None => document.root_element(),
    };

    let mut words: Vec<&str> = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else { continue };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"))
                .unwrap_or(false)
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{default_declined_phrases, default_pending_phrases};

    fn matcher() -> PhraseMatcher {
        PhraseMatcher::new(&default_pending_phrases(), &default_declined_phrases()).unwrap()
    }

    #[test]
    fn pending_wins_over_declined() {
        let m = matcher();
        assert_eq!(
            m.classify("This item is pending review and may be removed"),
            PhraseMatch::Pending("pending".into())
        );
    }

    #[test]
    fn matching_is_word_bounded_and_case_insensitive() {
        let m = matcher();
        assert_eq!(m.classify("Item REMOVED by staff"), PhraseMatch::Declined("removed".into()));
        assert_eq!(m.classify("unremovedness"), PhraseMatch::NoMatch);
        assert_eq!(m.classify("Not   Available"), PhraseMatch::Declined("not available".into()));
    }

    #[test]
    fn visible_text_skips_scripts() {
        let html = r#"<html><head><title>t</title></head><body>
            <script>var state = "declined";</script>
            <div class="status"><span>Under</span> <b>review</b></div>
        </body></html>"#;
        let text = visible_text(html);
        assert_eq!(text, "Under review");
        assert_eq!(matcher().classify(&text), PhraseMatch::Pending("under review".into()));
    }
}
