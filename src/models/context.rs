use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Domain assigned when a backend returns no usable domain.
pub const DEFAULT_DOMAIN: &str = "general";

/// Domain assigned when classification was unavailable and the human has to
/// supply context manually.
pub const UNKNOWN_DOMAIN: &str = "unknown";

/// The detected (and possibly human-refined) classification of a project
/// description.
///
/// `complexity`, `domain` and `intent` are never empty once a detector has
/// produced the context; [`ProjectContext::normalized`] enforces this for
/// values coming from outside the crate (LLM output, API input).
/// `entities` keeps the order in which keywords first appeared, without
/// duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub complexity: Complexity,
    /// Open tag such as `ai`, `web`, `api`, `data` or `mobile`.
    pub domain: String,
    pub intent: Intent,
    #[serde(default)]
    pub entities: Vec<String>,
    /// True once a human has altered any field at least once.
    #[serde(default)]
    pub refined: bool,
}

impl ProjectContext {
    pub fn new(
        complexity: Complexity,
        domain: impl Into<String>,
        intent: Intent,
        entities: Vec<String>,
    ) -> Self {
        Self {
            complexity,
            domain: domain.into(),
            intent,
            entities,
            refined: false,
        }
        .normalized()
    }

    /// Context offered for review when classification is unavailable.
    pub fn fallback() -> Self {
        Self::new(Complexity::Medium, UNKNOWN_DOMAIN, Intent::NewFeature, vec![])
    }

    /// Lowercase the domain, fill blank required fields and deduplicate
    /// entities.
    pub fn normalized(mut self) -> Self {
        self.domain = normalize_tag(&self.domain);
        if self.domain.is_empty() {
            self.domain = DEFAULT_DOMAIN.to_string();
        }
        if let Intent::Other(ref raw) = self.intent {
            if raw.trim().is_empty() {
                self.intent = Intent::default();
            }
        }
        self.entities = dedup_entities(std::mem::take(&mut self.entities));
        self
    }
}

impl fmt::Display for ProjectContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({})",
            self.complexity, self.domain, self.intent
        )
    }
}

/// How much work a description implies.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    #[default]
    Medium,
    Complex,
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Medium => "medium",
            Self::Complex => "complex",
        }
    }

    /// Parse a complexity label, accepting a few common synonyms.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" | "low" | "easy" | "trivial" => Some(Self::Simple),
            "medium" | "moderate" | "normal" => Some(Self::Medium),
            "complex" | "high" | "hard" => Some(Self::Complex),
            _ => None,
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the requester wants done.
///
/// The set is open: labels that are not one of the known variants are kept
/// verbatim (normalized to snake_case) in [`Intent::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    #[default]
    NewFeature,
    BugFix,
    Refactor,
    Documentation,
    Testing,
    Optimization,
    Other(String),
}

impl Intent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewFeature => "new_feature",
            Self::BugFix => "bug_fix",
            Self::Refactor => "refactor",
            Self::Documentation => "documentation",
            Self::Testing => "testing",
            Self::Optimization => "optimization",
            Self::Other(label) => label,
        }
    }

    pub fn parse(s: &str) -> Self {
        let label = normalize_tag(s);
        match label.as_str() {
            "" => Self::default(),
            "new_feature" | "feature" | "new" => Self::NewFeature,
            "bug_fix" | "bugfix" | "fix" | "bug" => Self::BugFix,
            "refactor" | "refactoring" => Self::Refactor,
            "documentation" | "docs" | "doc" => Self::Documentation,
            "testing" | "test" | "tests" => Self::Testing,
            "optimization" | "optimisation" | "optimize" | "performance" => Self::Optimization,
            _ => Self::Other(label),
        }
    }
}

impl From<String> for Intent {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        intent.as_str().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase, trim, and join words with underscores (`"Bug Fix"` -> `bug_fix`).
pub fn normalize_tag(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

/// Trim entities, drop blanks, and remove case-insensitive duplicates while
/// keeping the first spelling and position.
pub fn dedup_entities(entities: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty() && seen.insert(e.to_lowercase()))
        .collect()
}
