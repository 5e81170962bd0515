//! Decision record model.
//!
//! Defines [`DecisionRecord`] (the captured entity stored as encrypted
//! metadata alongside its embedding), the [`Kind`] and [`Certainty`] closed
//! sets, and record id generation. Once inserted, a record is immutable —
//! deletions are allowed but never updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 140;

/// Maximum body length in bytes.
pub const MAX_BODY_BYTES: usize = 4096;

/// The closed set of record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// A concrete choice with consequences (technology, architecture, process).
    Decision,
    /// Reasoning behind a decision, captured separately from it.
    Rationale,
    /// A standard or rule being established or changed.
    Policy,
    /// Something learned from an incident or failure.
    Lesson,
    /// Context worth keeping that fits none of the above.
    Insight,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Rationale => "rationale",
            Self::Policy => "policy",
            Self::Lesson => "lesson",
            Self::Insight => "insight",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "rationale" => Ok(Self::Rationale),
            "policy" => Ok(Self::Policy),
            "lesson" => Ok(Self::Lesson),
            "insight" => Ok(Self::Insight),
            _ => Err(format!("unknown record kind: {s}")),
        }
    }
}

/// Evidence certainty for a record. Fixed at capture time; recall must
/// preserve it — the synthesizer never upgrades a record's certainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Certainty {
    /// Backed by direct evidence; may be stated confidently.
    Supported,
    /// Partial evidence; must be qualified ("likely", "based on available evidence").
    PartiallySupported,
    /// No clear evidence; must be explicitly caveated.
    Unknown,
}

impl Certainty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::PartiallySupported => "partially_supported",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Certainty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Certainty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supported" => Ok(Self::Supported),
            "partially_supported" => Ok(Self::PartiallySupported),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("unknown certainty: {s}")),
        }
    }
}

/// Reference to where a captured utterance originated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Origin class, e.g. `"claude_agent"`, `"slack"`, `"github"`.
    pub origin: String,
    /// Pointer within the origin, e.g. `"channel:#arch"` or a URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// The canonical captured entity, serialized to JSON and stored only as
/// ciphertext metadata next to its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Stable id, format `dec_<utc-date>_<kind>_<rand>`.
    pub id: String,
    /// UTC instant of capture.
    pub timestamp: DateTime<Utc>,
    pub kind: Kind,
    /// Short summary, at most [`MAX_TITLE_CHARS`] characters.
    pub title: String,
    /// Full extracted context, at most [`MAX_BODY_BYTES`] bytes.
    pub body: String,
    /// Actors or roles involved (e.g. `"role:cto"`, `"user:alice"`).
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    pub certainty: Certainty,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl DecisionRecord {
    /// Build a record with a fresh id, clamping title and body to their
    /// limits. `timestamp` is always the current UTC instant.
    pub fn new(kind: Kind, title: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_record_id(now, kind),
            timestamp: now,
            kind,
            title: clamp_chars(&title.into(), MAX_TITLE_CHARS),
            body: clamp_bytes(&body.into(), MAX_BODY_BYTES),
            participants: Vec::new(),
            sources: Vec::new(),
            certainty: Certainty::Unknown,
            tags: Vec::new(),
        }
    }

    /// The Tier-3 degradation path: when extraction fails completely, the
    /// utterance is still preserved as an insight with unknown certainty.
    pub fn minimal(text: &str) -> Self {
        Self::new(Kind::Insight, clamp_chars(text.trim(), 120), text)
    }
}

/// Generate a record id: `dec_<YYYY-MM-DD>_<kind>_<rand>` where `rand` is a
/// 6-hex-char suffix.
pub fn generate_record_id(timestamp: DateTime<Utc>, kind: Kind) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "dec_{}_{}_{}",
        timestamp.format("%Y-%m-%d"),
        kind.as_str(),
        &suffix[..6]
    )
}

/// Truncate to at most `max` characters on a char boundary.
pub fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Truncate to at most `max` bytes, backing up to a char boundary.
fn clamp_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
