//! Capture-trigger phrases.
//!
//! Decision-indicating phrases across the languages the team writes in.
//! They serve two roles in Tier 1: embedded at pipeline build as
//! capture-worthy exemplars, and matched literally (case-insensitive for
//! ASCII) to rescue texts whose embedding similarity falls below the noise
//! floor. Teams extend the built-in table through a markdown pattern file
//! next to the config.

use std::path::Path;

use anyhow::{Context, Result};

/// A built-in trigger phrase with its language tag (BCP 47 primary subtag).
pub struct TriggerPhrase {
    pub lang: &'static str,
    pub text: &'static str,
}

/// The built-in trigger table.
pub const TRIGGER_PHRASES: &[TriggerPhrase] = &[
    // English
    TriggerPhrase { lang: "en", text: "we decided to" },
    TriggerPhrase { lang: "en", text: "we chose" },
    TriggerPhrase { lang: "en", text: "we're going with" },
    TriggerPhrase { lang: "en", text: "we agreed to" },
    TriggerPhrase { lang: "en", text: "the decision is" },
    TriggerPhrase { lang: "en", text: "we settled on" },
    TriggerPhrase { lang: "en", text: "we are standardizing on" },
    TriggerPhrase { lang: "en", text: "we rejected" },
    TriggerPhrase { lang: "en", text: "we will not" },
    TriggerPhrase { lang: "en", text: "from now on" },
    TriggerPhrase { lang: "en", text: "the new policy is" },
    TriggerPhrase { lang: "en", text: "lesson learned" },
    TriggerPhrase { lang: "en", text: "post-mortem conclusion" },
    TriggerPhrase { lang: "en", text: "the trade-off was" },
    TriggerPhrase { lang: "en", text: "instead of" },
    TriggerPhrase { lang: "en", text: "after evaluating the alternatives" },
    // Japanese
    TriggerPhrase { lang: "ja", text: "することに決めました" },
    TriggerPhrase { lang: "ja", text: "採用することにしました" },
    TriggerPhrase { lang: "ja", text: "方針とします" },
    TriggerPhrase { lang: "ja", text: "見送ることにしました" },
    TriggerPhrase { lang: "ja", text: "教訓として" },
    // Korean
    TriggerPhrase { lang: "ko", text: "하기로 결정했습니다" },
    TriggerPhrase { lang: "ko", text: "채택하기로 했습니다" },
    TriggerPhrase { lang: "ko", text: "정책으로 정했습니다" },
    // German
    TriggerPhrase { lang: "de", text: "wir haben uns entschieden" },
    TriggerPhrase { lang: "de", text: "wir haben beschlossen" },
    TriggerPhrase { lang: "de", text: "ab sofort gilt" },
    // Spanish
    TriggerPhrase { lang: "es", text: "decidimos usar" },
    TriggerPhrase { lang: "es", text: "hemos decidido" },
    TriggerPhrase { lang: "es", text: "la nueva política es" },
    // French
    TriggerPhrase { lang: "fr", text: "nous avons décidé de" },
    TriggerPhrase { lang: "fr", text: "nous avons choisi" },
];

/// The built-in phrase texts, owned.
pub fn builtin_phrases() -> Vec<String> {
    TRIGGER_PHRASES.iter().map(|p| p.text.to_string()).collect()
}

/// Parse a user pattern file into additional trigger phrases.
///
/// The format is forgiving markdown: bullet lines carrying a quoted or
/// backticked phrase become patterns (`- "we signed off on"`); headers and
/// prose are ignored. A missing file yields no patterns.
pub fn parse_pattern_file(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read pattern file {}", path.display()))?;

    let mut phrases = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('-').or_else(|| line.strip_prefix('*')) else {
            continue;
        };
        let rest = rest.trim();

        let phrase = if let Some(inner) = delimited(rest, '"', '"') {
            inner
        } else if let Some(inner) = delimited(rest, '`', '`') {
            inner
        } else {
            continue;
        };

        // very short fragments match everything
        if phrase.chars().count() >= 5 && !phrases.contains(&phrase) {
            phrases.push(phrase);
        }
    }
    Ok(phrases)
}

fn delimited(s: &str, open: char, close: char) -> Option<String> {
    let rest = s.strip_prefix(open)?;
    let end = rest.find(close)?;
    Some(rest[..end].trim().to_string())
}

/// Literal rescue match against a phrase list. ASCII phrases match
/// case-insensitively; non-ASCII phrases match verbatim.
pub fn matches_any(phrases: &[String], text: &str) -> bool {
    let lowered = text.to_lowercase();
    phrases.iter().any(|p| {
        if p.is_ascii() {
            lowered.contains(&p.to_lowercase())
        } else {
            text.contains(p.as_str())
        }
    })
}
