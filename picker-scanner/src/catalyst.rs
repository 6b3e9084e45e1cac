//! Catalyst detection from news headlines.
//!
//! The default [`KeywordClassifier`] scans title and summary with a single
//! case-insensitive Aho-Corasick automaton and also honours the feed's own
//! `category` field. Merger activity is disqualifying: such symbols never
//! reach the opportunity list.

use aho_corasick::AhoCorasick;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

use crate::data::NewsItem;

// ============================================================================
// Catalyst Types
// ============================================================================

/// Kind of news event behind a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalystType {
    Earnings,
    Fda,
    Analyst,
    /// Merger, acquisition, buyout or takeover
    Merger,
    Other,
}

impl CatalystType {
    /// Map a feed-provided category string.
    pub fn from_category(category: &str) -> Option<Self> {
        let category = category.trim().to_lowercase();
        if category.is_empty() {
            return None;
        }
        Some(match category.as_str() {
            "earnings" | "earning" => Self::Earnings,
            "fda" | "regulatory" => Self::Fda,
            "analyst" | "rating" | "ratings" => Self::Analyst,
            "merger" | "m&a" | "acquisition" | "buyout" | "takeover" => Self::Merger,
            _ => Self::Other,
        })
    }
}

impl std::fmt::Display for CatalystType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Earnings => write!(f, "earnings"),
            Self::Fda => write!(f, "fda"),
            Self::Analyst => write!(f, "analyst"),
            Self::Merger => write!(f, "merger"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Catalyst classification for one symbol.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CatalystInfo {
    pub has_catalyst: bool,
    pub catalyst_types: BTreeSet<CatalystType>,
    /// First headline that produced a match
    pub headline: Option<String>,
    pub url: Option<String>,
}

impl CatalystInfo {
    /// No catalyst found.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether the symbol must be kept out of the opportunity list.
    pub fn is_disqualifying(&self) -> bool {
        self.catalyst_types.contains(&CatalystType::Merger)
    }
}

// ============================================================================
// Classifier Trait
// ============================================================================

/// Classifies a symbol's news into catalysts. Never fails.
pub trait CatalystClassifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify(&self, symbol: &str, news: &[NewsItem]) -> CatalystInfo;
}

// ============================================================================
// Keyword Classifier
// ============================================================================

/// Default keyword sets per catalyst type.
pub const DEFAULT_KEYWORDS: &[(CatalystType, &[&str])] = &[
    (
        CatalystType::Earnings,
        &["earnings", "beat", "miss", "guidance", "revenue", "eps"],
    ),
    (CatalystType::Fda, &["fda", "approval", "clinical", "trial"]),
    (
        CatalystType::Analyst,
        &["upgrade", "downgrade", "price target", "analyst", "initiates"],
    ),
    (
        CatalystType::Merger,
        &["merger", "acquisition", "acquire", "buyout", "takeover"],
    ),
    (
        CatalystType::Other,
        &[
            "patent",
            "launch",
            "partnership",
            "contract",
            "lawsuit",
            "settlement",
            "investigation",
            "recall",
            "dividend",
            "split",
            "buyback",
            "spinoff",
            "ceo",
            "executive",
            "resignation",
            "appointed",
            "breakthrough",
        ],
    ),
];

/// Word endings accepted after a keyword ("beats", "acquired", "launching").
const INFLECTIONS: &[&str] = &["", "s", "es", "d", "ed", "ing"];

/// Endings accepted after a keyword with its final "e" dropped ("acquiring").
const E_DROP_INFLECTIONS: &[&str] = &["ing"];

/// Keyword classifier over title + summary.
pub struct KeywordClassifier {
    matcher: Option<AhoCorasick>,
    /// Pattern index → catalyst type
    kinds: Vec<CatalystType>,
    /// Pattern index → accepted word endings
    endings: Vec<&'static [&'static str]>,
}

impl KeywordClassifier {
    /// Classifier with the default keyword sets.
    pub fn new() -> Self {
        Self::with_keywords(DEFAULT_KEYWORDS)
    }

    /// Classifier with custom keyword sets.
    pub fn with_keywords(sets: &[(CatalystType, &[&str])]) -> Self {
        let mut patterns = Vec::new();
        let mut kinds = Vec::new();
        let mut endings = Vec::new();
        for (kind, keywords) in sets {
            for keyword in keywords.iter() {
                let keyword = keyword.to_lowercase();
                if let Some(stem) = keyword.strip_suffix('e').filter(|s| s.len() > 2) {
                    patterns.push(stem.to_string());
                    kinds.push(*kind);
                    endings.push(E_DROP_INFLECTIONS);
                }
                patterns.push(keyword);
                kinds.push(*kind);
                endings.push(INFLECTIONS);
            }
        }

        let matcher = match AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(&patterns)
        {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                warn!(error = %e, "Failed to build catalyst keyword matcher");
                None
            }
        };

        Self {
            matcher,
            kinds,
            endings,
        }
    }

    /// Catalyst types whose keywords appear as words in `text`.
    pub fn match_text(&self, text: &str) -> BTreeSet<CatalystType> {
        let mut found = BTreeSet::new();
        let Some(ref matcher) = self.matcher else {
            return found;
        };

        for m in matcher.find_overlapping_iter(text) {
            let pattern = m.pattern().as_usize();
            if is_word_match(text, m.start(), m.end(), self.endings[pattern]) {
                found.insert(self.kinds[pattern]);
            }
        }
        found
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The match must start a word and end it, allowing the given endings.
fn is_word_match(text: &str, start: usize, end: usize, endings: &[&str]) -> bool {
    let starts_word = text[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric());
    if !starts_word {
        return false;
    }

    let rest: String = text[end..]
        .chars()
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    endings.contains(&rest.as_str())
}

impl CatalystClassifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, _symbol: &str, news: &[NewsItem]) -> CatalystInfo {
        let mut info = CatalystInfo::none();

        for item in news {
            let mut types = self.match_text(&item.title);
            if let Some(ref summary) = item.summary {
                types.extend(self.match_text(summary));
            }
            if let Some(kind) = item.category.as_deref().and_then(CatalystType::from_category) {
                types.insert(kind);
            }

            if types.is_empty() {
                continue;
            }
            if info.headline.is_none() {
                info.headline = Some(item.title.clone());
                info.url = item.url.clone();
            }
            info.catalyst_types.extend(types);
        }

        info.has_catalyst = !info.catalyst_types.is_empty();
        info
    }
}

// ============================================================================
// Tests
// ============================================================================
