//! Ollama LLM classification.
//!
//! Asks an Ollama-compatible `/api/generate` endpoint for a JSON object with
//! `complexity`, `domain`, `intent` and `entities`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifyError};
use crate::models::{dedup_entities, Complexity, Intent, ProjectContext, DEFAULT_DOMAIN};

/// Default upper bound on one classification request.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Ollama API classifier.
pub struct OllamaClassifier {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaClassifier {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the Ollama API is reachable.
    pub async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .is_ok()
    }

    async fn request(&self, prompt: String) -> Result<String, ClassifyError> {
        let request = OllamaRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            format: "json",
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::Api(format!("{}: {}", status, body)));
        }

        let response: OllamaResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        Ok(response.response)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClassifyError {
        if e.is_timeout() {
            ClassifyError::Timeout(self.timeout)
        } else if e.is_connect() {
            ClassifyError::Unavailable(format!("ollama at {}", self.base_url))
        } else {
            ClassifyError::Http(e)
        }
    }

    /// Build the classification prompt, including the current context when
    /// the text is a correction.
    fn build_prompt(text: &str, seed: Option<&ProjectContext>) -> String {
        let current = match seed {
            Some(seed) => format!(
                r"
The user is correcting this earlier classification. Keep any field the
correction does not mention.
Current: complexity={}, domain={}, intent={}, entities={}
",
                seed.complexity,
                seed.domain,
                seed.intent,
                seed.entities.join(", ")
            ),
            None => String::new(),
        };

        format!(
            r#"You classify software project requests.
Respond with a single JSON object and nothing else:
{{"complexity": "simple|medium|complex", "domain": "<short lowercase tag such as ai, web, api, data, mobile>", "intent": "new_feature|bug_fix|refactor|documentation|testing|optimization|<other snake_case tag>", "entities": ["<keyword>", ...]}}
{}
Request: {}"#,
            current, text
        )
    }
}

#[async_trait]
impl Classifier for OllamaClassifier {
    async fn classify(
        &self,
        text: &str,
        seed: Option<&ProjectContext>,
    ) -> Result<ProjectContext, ClassifyError> {
        let raw = self.request(Self::build_prompt(text, seed)).await?;
        let parsed = parse_classification(&raw)?;
        tracing::debug!(model = %self.model, ?parsed, "Ollama classification");
        Ok(parsed.into_context(seed))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama API request structure.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
}

/// Ollama API response structure.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Classification as returned by the model. Every field is optional; missing
/// or unusable fields fall back to the seed or the defaults.
#[derive(Debug, Default, Deserialize)]
struct RawClassification {
    complexity: Option<String>,
    domain: Option<String>,
    intent: Option<String>,
    #[serde(default)]
    entities: Vec<String>,
}

impl RawClassification {
    fn into_context(self, seed: Option<&ProjectContext>) -> ProjectContext {
        let complexity = self
            .complexity
            .as_deref()
            .and_then(Complexity::from_str)
            .or(seed.map(|s| s.complexity))
            .unwrap_or_default();
        let domain = self
            .domain
            .filter(|d| !d.trim().is_empty())
            .or(seed.map(|s| s.domain.clone()))
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
        let intent = self
            .intent
            .filter(|i| !i.trim().is_empty())
            .map(|i| Intent::parse(&i))
            .or(seed.map(|s| s.intent.clone()))
            .unwrap_or_default();

        let mut entities = seed.map(|s| s.entities.clone()).unwrap_or_default();
        entities.extend(self.entities.into_iter().map(|e| e.to_lowercase()));

        ProjectContext {
            complexity,
            domain,
            intent,
            entities: dedup_entities(entities),
            refined: seed.map(|s| s.refined).unwrap_or(false),
        }
        .normalized()
    }
}

/// Parse the model's reply, tolerating markdown code fences around the JSON.
fn parse_classification(raw: &str) -> Result<RawClassification, ClassifyError> {
    let trimmed = raw.trim();
    let json = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => return Err(ClassifyError::Parse(format!("no JSON object in: {}", trimmed))),
    };
    serde_json::from_str(json).map_err(|e| ClassifyError::Parse(e.to_string()))
}
