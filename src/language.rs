//! Lightweight language detection.
//!
//! Unicode-script-based detection for the languages the pipelines care
//! about: enough to tell the LLM prompts when a message is written in a CJK
//! script so extraction and query planning translate their outputs to
//! English. Latin-script text is treated as English — the embedding model
//! is multilingual, so finer-grained Latin detection buys nothing.

/// Dominant script of a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Latin,
    Hangul,
    Kana,
    Cjk,
    Mixed,
}

/// Detected language information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageInfo {
    /// ISO 639-1 code for non-Latin scripts; `None` means treat as English.
    pub code: Option<&'static str>,
    pub script: Script,
}

impl LanguageInfo {
    pub fn is_english(&self) -> bool {
        self.code.is_none()
    }

    /// Human-readable language name for prompt hints.
    pub fn name(&self) -> Option<&'static str> {
        match self.code {
            Some("ko") => Some("Korean"),
            Some("ja") => Some("Japanese"),
            Some("zh") => Some("Chinese"),
            _ => None,
        }
    }
}

const ENGLISH: LanguageInfo = LanguageInfo {
    code: None,
    script: Script::Latin,
};

/// Unicode block ranges mapped to script and language.
const SCRIPT_RANGES: &[(u32, u32, Script, &str)] = &[
    (0xAC00, 0xD7AF, Script::Hangul, "ko"), // Hangul syllables
    (0x1100, 0x11FF, Script::Hangul, "ko"), // Hangul jamo
    (0x3130, 0x318F, Script::Hangul, "ko"), // Hangul compatibility jamo
    (0x3040, 0x309F, Script::Kana, "ja"),   // Hiragana
    (0x30A0, 0x30FF, Script::Kana, "ja"),   // Katakana
    (0x4E00, 0x9FFF, Script::Cjk, "zh"),    // CJK unified ideographs
    (0x3400, 0x4DBF, Script::Cjk, "zh"),    // CJK extension A
];

/// Detect the dominant script of a text.
///
/// Mixed Kana + CJK reads as Japanese (ordinary Japanese prose mixes both).
/// A non-Latin script must cover more than 15% of the counted characters to
/// override the Latin default.
pub fn detect(text: &str) -> LanguageInfo {
    let mut hangul = 0usize;
    let mut kana = 0usize;
    let mut cjk = 0usize;
    let mut total = 0usize;

    for ch in text.chars() {
        if ch.is_whitespace() || ch.is_ascii_punctuation() {
            continue;
        }
        total += 1;
        let cp = ch as u32;
        for &(start, end, script, _) in SCRIPT_RANGES {
            if (start..=end).contains(&cp) {
                match script {
                    Script::Hangul => hangul += 1,
                    Script::Kana => kana += 1,
                    Script::Cjk => cjk += 1,
                    _ => {}
                }
                break;
            }
        }
    }

    if total == 0 {
        return ENGLISH;
    }

    // Japanese prose mixes Kana and CJK; any Kana presence alongside CJK
    // decides for Japanese.
    if kana > 0 && (kana + cjk) * 100 / total > 15 {
        return LanguageInfo {
            code: Some("ja"),
            script: Script::Kana,
        };
    }

    let threshold = total * 15 / 100;
    let non_latin = [
        (hangul, Script::Hangul, "ko"),
        (cjk, Script::Cjk, "zh"),
        (kana, Script::Kana, "ja"),
    ];
    let significant: Vec<(usize, Script, &'static str)> = non_latin
        .into_iter()
        .filter(|(n, _, _)| *n > threshold)
        .collect();

    match significant.as_slice() {
        [] => ENGLISH,
        &[(_, script, code)] => LanguageInfo {
            code: Some(code),
            script,
        },
        _ => LanguageInfo {
            code: None,
            script: Script::Mixed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_english_is_latin() {
        let info = detect("We chose PostgreSQL over MongoDB.");
        assert!(info.is_english());
        assert_eq!(info.script, Script::Latin);
    }

    #[test]
    fn empty_text_defaults_to_english() {
        assert!(detect("").is_english());
        assert!(detect("   ...  ").is_english());
    }

    #[test]
    fn korean_is_detected() {
        let info = detect("PostgreSQL을 채택하기로 했습니다");
        assert_eq!(info.code, Some("ko"));
        assert_eq!(info.script, Script::Hangul);
        assert_eq!(info.name(), Some("Korean"));
    }

    #[test]
    fn japanese_mixes_kana_and_cjk() {
        let info = detect("PostgreSQLを採用することに決めました");
        assert_eq!(info.code, Some("ja"));
        assert_eq!(info.script, Script::Kana);
    }

    #[test]
    fn chinese_without_kana_is_cjk() {
        let info = detect("我们决定使用这个数据库系统来存储所有数据");
        assert_eq!(info.code, Some("zh"));
        assert_eq!(info.script, Script::Cjk);
    }

    #[test]
    fn latin_with_sprinkled_terms_stays_english() {
        // one CJK char in mostly-English text is below the 15% floor
        let info = detect("The team shipped the 欅 feature flag rollout yesterday evening");
        assert!(info.is_english());
    }
}
