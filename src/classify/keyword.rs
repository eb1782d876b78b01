//! Deterministic keyword classifier.
//!
//! Scores the description against small keyword tables. Explicit statements
//! ("this is a web project", "change domain to data") outweigh incidental
//! keyword hits, which is what makes free-text corrections work.

use async_trait::async_trait;
use regex::Regex;

use super::{Classifier, ClassifyError};
use crate::models::{
    dedup_entities, normalize_tag, Complexity, Intent, ProjectContext, DEFAULT_DOMAIN,
};

/// Weight of an explicit "this is a X project" statement.
const STATEMENT_WEIGHT: u32 = 3;
/// Weight of an assignment such as "domain to X" or "domain: X".
const ASSIGNMENT_WEIGHT: u32 = 10;

struct DomainRule {
    domain: &'static str,
    keywords: &'static [&'static str],
}

const DOMAIN_RULES: &[DomainRule] = &[
    DomainRule {
        domain: "ai",
        keywords: &[
            "ai", "ml", "llm", "rag", "gpt", "chatbot", "embedding", "agent", "neural",
            "nlp", "transformer", "inference", "langchain", "langgraph", "openai", "prompt",
            "vector", "machine learning", "deep learning", "artificial intelligence",
        ],
    },
    DomainRule {
        domain: "web",
        keywords: &[
            "web", "website", "frontend", "front end", "react", "vue", "angular", "svelte",
            "html", "css", "browser", "webpage", "landing page", "ui", "form",
        ],
    },
    DomainRule {
        domain: "api",
        keywords: &[
            "api", "rest", "graphql", "grpc", "endpoint", "backend", "server", "webhook",
            "microservice", "openapi",
        ],
    },
    DomainRule {
        domain: "data",
        keywords: &[
            "data", "etl", "database", "sql", "analytics", "warehouse", "dashboard", "csv",
            "spreadsheet", "reporting", "bigquery", "spark",
        ],
    },
    DomainRule {
        domain: "mobile",
        keywords: &[
            "mobile", "ios", "android", "iphone", "flutter", "swiftui", "kotlin",
            "react native", "tablet",
        ],
    },
    DomainRule {
        domain: "devops",
        keywords: &[
            "devops", "ci", "deploy", "deployment", "docker", "kubernetes", "terraform",
            "infrastructure", "helm", "ansible",
        ],
    },
    DomainRule {
        domain: "cli",
        keywords: &["cli", "terminal", "command line", "shell"],
    },
];

const COMPLEX_SIGNALS: &[&str] = &[
    "rag", "distributed", "microservice", "multi agent", "orchestration", "orchestrator",
    "scalable", "scale", "real time", "realtime", "platform", "architecture", "enterprise",
    "migration", "kubernetes", "pipeline", "recommendation", "complex", "large",
    "end to end",
];

const SIMPLE_SIGNALS: &[&str] = &[
    "typo", "rename", "simple", "small", "tweak", "minor", "quick", "trivial", "button",
    "color", "colour", "label", "script", "tiny", "one line",
];

const INTENT_RULES: &[(&str, &[&str])] = &[
    (
        "bug_fix",
        &[
            "fix", "bug", "broken", "crash", "error", "failing", "fails", "failure",
            "regression", "issue", "incorrect", "wrong",
        ],
    ),
    (
        "refactor",
        &[
            "refactor", "restructure", "cleanup", "clean up", "rewrite", "simplify",
            "reorganize", "reorganise", "modernize", "decouple", "tech debt",
        ],
    ),
    (
        "documentation",
        &["docs", "documentation", "readme", "docstring", "tutorial", "changelog"],
    ),
    (
        "testing",
        &["test", "testing", "coverage", "e2e", "unit test", "integration test"],
    ),
    (
        "optimization",
        &[
            "optimize", "optimise", "optimization", "performance", "faster", "speed up",
            "slow", "latency", "throughput",
        ],
    ),
    (
        "new_feature",
        &[
            "build", "create", "add", "implement", "develop", "new", "make", "introduce",
            "support", "feature", "design", "prototype",
        ],
    ),
];

const COMPLEXITY_WORDS: &[&str] = &[
    "simple", "small", "complex", "large", "big", "huge", "quick", "minor", "trivial", "tiny",
    "complicated", "easy", "hard", "moderate", "medium",
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "for", "with", "to", "of", "in", "on", "at", "by", "from",
    "into", "onto", "that", "this", "these", "those", "is", "are", "was", "were", "be", "been",
    "being", "it", "its", "i", "we", "you", "my", "our", "your", "me", "us", "they", "them",
    "need", "needs", "want", "wants", "should", "would", "could", "can", "will", "shall",
    "please", "some", "any", "all", "using", "use", "via", "so", "as", "but", "not", "no",
    "yes", "also", "just", "actually", "really", "basically", "like", "about", "more",
    "less", "very", "project", "projects", "system", "systems", "app", "apps",
    "application", "applications", "service", "services", "tool", "tools", "thing",
    "things", "stuff", "something", "change", "changes", "refine", "correction", "domain",
    "intent", "complexity", "entities", "instead", "rather", "than", "which", "what", "how",
    "when", "where", "who", "there", "here", "then", "have", "has", "had", "do", "does",
    "let", "lets", "get", "their", "if", "else", "too", "only", "way", "it's",
];

/// Classifier backed by keyword tables. Never fails and never calls out.
pub struct KeywordClassifier {
    word: Regex,
    statement: Regex,
    domain_assignment: Regex,
    intent_assignment: Regex,
    complexity_assignment: Regex,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            word: Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"),
            statement: Regex::new(
                r"\b(?:this is|it's|it is|its)\s+(?:actually\s+|really\s+)?(?:an?\s+)?([\p{L}\p{N}]+)\s+(?:project|app|application|system|service|site|tool|codebase|product|platform|library)",
            )
            .expect("valid regex"),
            domain_assignment: Regex::new(
                r"\bdomain(?:\s+(?:to|is|should be|as)\s+|\s*[:=]\s*)([\p{L}\p{N}_-]+)",
            )
            .expect("valid regex"),
            intent_assignment: Regex::new(
                r"\bintent(?:\s+(?:to|is|should be|as)\s+|\s*[:=]\s*)([\p{L}\p{N}_-]+(?:\s+fix)?)",
            )
            .expect("valid regex"),
            complexity_assignment: Regex::new(
                r"\bcomplexity(?:\s+(?:to|is|should be|as)\s+|\s*[:=]\s*)(\p{L}+)",
            )
            .expect("valid regex"),
        }
    }

    /// Classify synchronously. The async trait method delegates here.
    pub fn classify_text(&self, text: &str, seed: Option<&ProjectContext>) -> ProjectContext {
        let lower = text.to_lowercase().replace('\u{2019}', "'");
        let tokens = Tokens::new(&lower, &self.word);
        let mut consumed: Vec<String> = Vec::new();

        let domain = self.detect_domain(&tokens, &lower, seed, &mut consumed);
        let complexity = self.detect_complexity(&tokens, &lower, &mut consumed);
        let intent = self.detect_intent(&tokens, &lower, &mut consumed);

        let mut entities = seed.map(|s| s.entities.clone()).unwrap_or_default();
        entities.extend(
            tokens
                .words
                .iter()
                .filter(|w| is_entity(w) && !consumed.contains(*w))
                .cloned(),
        );

        let context = ProjectContext {
            complexity: complexity
                .or(seed.map(|s| s.complexity))
                .unwrap_or_default(),
            domain: domain
                .or(seed.map(|s| s.domain.clone()))
                .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
            intent: intent
                .or(seed.map(|s| s.intent.clone()))
                .unwrap_or_default(),
            entities: dedup_entities(entities),
            refined: seed.map(|s| s.refined).unwrap_or(false),
        };
        context.normalized()
    }

    fn detect_domain(
        &self,
        tokens: &Tokens,
        lower: &str,
        seed: Option<&ProjectContext>,
        consumed: &mut Vec<String>,
    ) -> Option<String> {
        let mut scores: Vec<(String, u32)> = DOMAIN_RULES
            .iter()
            .map(|rule| (rule.domain.to_string(), tokens.score(rule.keywords)))
            .collect();

        for caps in self.statement.captures_iter(lower) {
            let word = &caps[1];
            if STOP_WORDS.contains(&word) {
                continue;
            }
            consumed.push(word.to_string());
            add_score(&mut scores, domain_for_word(word), STATEMENT_WEIGHT);
        }

        for caps in self.domain_assignment.captures_iter(lower) {
            let word = &caps[1];
            consumed.push(word.to_string());
            add_score(&mut scores, domain_for_word(word), ASSIGNMENT_WEIGHT);
        }

        let best = scores.iter().map(|(_, score)| *score).max().unwrap_or(0);
        if best == 0 {
            return None;
        }

        let mut tied = scores.iter().filter(|(_, score)| *score == best);
        if let Some(seed) = seed {
            if tied.clone().any(|(domain, _)| *domain == seed.domain) {
                return Some(seed.domain.clone());
            }
        }
        tied.next().map(|(domain, _)| domain.clone())
    }

    fn detect_complexity(
        &self,
        tokens: &Tokens,
        lower: &str,
        consumed: &mut Vec<String>,
    ) -> Option<Complexity> {
        if let Some(caps) = self.complexity_assignment.captures(lower) {
            if let Some(complexity) = Complexity::from_str(&caps[1]) {
                consumed.push(caps[1].to_string());
                return Some(complexity);
            }
        }

        let complex = tokens.score(COMPLEX_SIGNALS);
        let simple = tokens.score(SIMPLE_SIGNALS);
        match complex.cmp(&simple) {
            std::cmp::Ordering::Greater => Some(Complexity::Complex),
            std::cmp::Ordering::Less => Some(Complexity::Simple),
            std::cmp::Ordering::Equal => None,
        }
    }

    fn detect_intent(
        &self,
        tokens: &Tokens,
        lower: &str,
        consumed: &mut Vec<String>,
    ) -> Option<Intent> {
        if let Some(caps) = self.intent_assignment.captures(lower) {
            let label = &caps[1];
            consumed.extend(label.split_whitespace().map(|w| w.to_string()));
            return Some(Intent::parse(label));
        }

        let mut best: Option<(&str, u32)> = None;
        for (label, keywords) in INTENT_RULES {
            let score = tokens.score(keywords);
            if score > 0 && best.map_or(true, |(_, b)| score > b) {
                best = Some((*label, score));
            }
        }
        best.map(|(label, _)| Intent::parse(label))
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(
        &self,
        text: &str,
        seed: Option<&ProjectContext>,
    ) -> Result<ProjectContext, ClassifyError> {
        Ok(self.classify_text(text, seed))
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Lowercased word tokens plus a space-padded form for phrase lookups.
struct Tokens {
    words: Vec<String>,
    joined: String,
}

impl Tokens {
    fn new(lower: &str, word: &Regex) -> Self {
        let words: Vec<String> = word
            .find_iter(lower)
            .map(|m| m.as_str().to_string())
            .collect();
        let joined = format!(" {} ", words.join(" "));
        Self { words, joined }
    }

    fn count(&self, keyword: &str) -> u32 {
        if keyword.contains(' ') {
            self.joined.matches(&format!(" {} ", keyword)).count() as u32
        } else {
            self.words
                .iter()
                .filter(|w| matches_word(w, keyword))
                .count() as u32
        }
    }

    fn score(&self, keywords: &[&str]) -> u32 {
        keywords.iter().map(|k| self.count(k)).sum()
    }
}

/// Exact match, or a simple plural of the keyword.
fn matches_word(word: &str, keyword: &str) -> bool {
    word == keyword
        || word.strip_suffix('s') == Some(keyword)
        || word.strip_suffix("es") == Some(keyword)
}

/// Map a stated word to a known domain, or keep it as an open tag.
fn domain_for_word(word: &str) -> String {
    DOMAIN_RULES
        .iter()
        .find(|rule| {
            rule.domain == word
                || rule
                    .keywords
                    .iter()
                    .any(|k| !k.contains(' ') && matches_word(word, k))
        })
        .map(|rule| rule.domain.to_string())
        .unwrap_or_else(|| normalize_tag(word))
}

fn add_score(scores: &mut Vec<(String, u32)>, domain: String, weight: u32) {
    match scores.iter_mut().find(|(d, _)| *d == domain) {
        Some(entry) => entry.1 += weight,
        None => scores.push((domain, weight)),
    }
}

fn is_entity(word: &str) -> bool {
    word.chars().count() >= 2
        && !word.chars().all(|c| c.is_ascii_digit())
        && !STOP_WORDS.contains(&word)
        && !COMPLEXITY_WORDS.contains(&word)
        && !INTENT_RULES
            .iter()
            .flat_map(|(_, keywords)| keywords.iter())
            .any(|k| !k.contains(' ') && matches_word(word, k))
}
