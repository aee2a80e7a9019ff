//! Key/value memory that outlives a single task.

mod store;

pub use store::{MemoryEntry, MemoryError, MemoryStore};

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use super::{Capability, CapabilityResult, Tool, ToolError};
use crate::request::Request;

impl From<MemoryError> for ToolError {
    fn from(e: MemoryError) -> Self {
        ToolError::Storage(e.to_string())
    }
}

/// What a memory request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryIntent {
    /// Two numbers to remember as a pair, stored in both directions.
    StorePair(String, String),
    Store { key: String, value: String },
    /// Free text with no recognizable key.
    StoreNote(String),
    /// Find the partner of any of these numbers.
    RetrievePair(Vec<String>),
    Retrieve(String),
    /// Keyword search when no key can be extracted.
    Search(Vec<String>),
    Unknown,
}

const STORE_VERBS: [&str; 7] = [
    "remember",
    "store",
    "save",
    "memorize",
    "note that",
    "keep in mind",
    "set ",
];

const QUESTION_PREFIXES: [&str; 13] = [
    "what",
    "which",
    "who",
    "when",
    "where",
    "do you",
    "did i",
    "recall",
    "retrieve",
    "get ",
    "look up",
    "tell me",
    "can you recall",
];

const RETRIEVE_MARKERS: [&str; 6] = [
    "recall",
    "retrieve",
    "what was",
    "paired with",
    "previously",
    "earlier",
];

fn number_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{4,}\b").expect("valid number regex"))
}

fn store_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:please\s+)?(?:can\s+you\s+)?(?:remember|store|save|memorize|note|keep\s+in\s+mind|set)(?:\s+(?:that|this|the\s+fact\s+that))?\s*[:,]?\s*",
        )
        .expect("valid store prefix regex")
    })
}

fn key_value() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)^(?:key\s+)?["']?(?P<key>[^=:"']+?)["']?\s*(?:=|:|\bis\b|\bare\b|\bas\b|\bto\b)\s*["']?(?P<value>.+?)["']?\s*[.!]?\s*$"#,
        )
        .expect("valid key/value regex")
    })
}

fn retrieve_subject() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:please\s+)?(?:can\s+you\s+)?(?:what\s+(?:is|was)|what's|whats|which\s+is|recall|retrieve|get|look\s+up|tell\s+me|do\s+you\s+remember)\s+(?:the\s+value\s+(?:of|for)\s+)?(?P<key>.+?)\s*[?.!]?\s*$",
        )
        .expect("valid retrieve regex")
    })
}

/// Canonical key form: lowercase words joined by `_`, without possessives.
pub fn normalize_key(raw: &str) -> String {
    let lowered = raw
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() && c != '_')
        .to_lowercase();
    let mut words: Vec<&str> = lowered
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
        .collect();
    while words
        .first()
        .is_some_and(|w| matches!(*w, "my" | "the" | "our" | "your" | "key"))
    {
        words.remove(0);
    }
    words
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn is_question(lower: &str) -> bool {
    let trimmed = lower.trim();
    trimmed.ends_with('?')
        || QUESTION_PREFIXES
            .iter()
            .any(|p| trimmed.starts_with(p))
}

/// Classify a memory request without touching the store.
pub fn parse_intent(text: &str) -> MemoryIntent {
    let lower = text.to_lowercase();
    let numbers: Vec<String> = number_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let wants_store = STORE_VERBS.iter().any(|v| lower.contains(v)) && !is_question(&lower);
    let wants_retrieve =
        !wants_store && (is_question(&lower) || RETRIEVE_MARKERS.iter().any(|m| lower.contains(m)));

    if wants_store {
        if numbers.len() >= 2 {
            return MemoryIntent::StorePair(numbers[0].clone(), numbers[1].clone());
        }
        let body = store_prefix().replace(text, "");
        if let Some(caps) = key_value().captures(body.trim()) {
            let key = normalize_key(&caps["key"]);
            let value = caps["value"].trim().to_string();
            let key_words = caps["key"].split_whitespace().count();
            if !key.is_empty() && !value.is_empty() && key_words <= 5 {
                return MemoryIntent::Store { key, value };
            }
        }
        return MemoryIntent::StoreNote(text.trim().to_string());
    }

    if wants_retrieve {
        if !numbers.is_empty() {
            return MemoryIntent::RetrievePair(numbers);
        }
        if let Some(caps) = retrieve_subject().captures(text) {
            let key = normalize_key(&caps["key"]);
            if !key.is_empty() && caps["key"].split_whitespace().count() <= 5 {
                return MemoryIntent::Retrieve(key);
            }
        }
        let keywords: Vec<String> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(str::to_string)
            .collect();
        return MemoryIntent::Search(keywords);
    }

    MemoryIntent::Unknown
}

/// Stores and recalls facts across tasks.
pub struct MemoryTool {
    store: Arc<MemoryStore>,
}

impl MemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    async fn retrieve_key(&self, key: &str) -> Result<CapabilityResult, ToolError> {
        if let Some(value) = self.store.retrieve(key).await? {
            return Ok(CapabilityResult::text(value)
                .with_metadata(json!({"action": "retrieve", "key": key})));
        }

        // Free-text notes have no key; fall back to notes mentioning every word of it.
        let words: Vec<String> = key.split('_').map(str::to_string).collect();
        let hits = self.store.search(&words[0]).await?;
        let note = hits.into_iter().find(|(k, v)| {
            let lower = v.to_lowercase();
            k.starts_with("memory_") && words.iter().all(|w| lower.contains(w.as_str()))
        });
        match note {
            Some((note_key, value)) => Ok(CapabilityResult::text(value)
                .with_metadata(json!({"action": "retrieve", "key": note_key}))),
            None => Err(ToolError::KeyNotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn capability(&self) -> Capability {
        Capability::Memory
    }

    fn description(&self) -> &str {
        "Store and retrieve information across sessions (remember, recall, previously, what was my ...)"
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError> {
        let text = request.text_content();
        match parse_intent(&text) {
            MemoryIntent::StorePair(a, b) => {
                self.store.store(&format!("pair_{a}"), &b).await?;
                self.store.store(&format!("pair_{b}"), &a).await?;
                Ok(CapabilityResult::text(format!(
                    "I've stored the number pair {a} and {b} in my memory. I'll remember this for future conversations."
                ))
                .with_metadata(json!({"action": "store", "keys": [format!("pair_{a}"), format!("pair_{b}")]})))
            }
            MemoryIntent::Store { key, value } => {
                self.store.store(&key, &value).await?;
                Ok(CapabilityResult::text(format!("I've stored {key} = {value} in my memory."))
                    .with_metadata(json!({"action": "store", "key": key, "value": value})))
            }
            MemoryIntent::StoreNote(note) => {
                let digest = format!("{:x}", md5::compute(note.as_bytes()));
                let key = format!("memory_{}", &digest[..8]);
                self.store.store(&key, &note).await?;
                Ok(CapabilityResult::text("I've stored this information in my memory.")
                    .with_metadata(json!({"action": "store", "key": key})))
            }
            MemoryIntent::RetrievePair(numbers) => {
                for number in &numbers {
                    if let Some(paired) = self.store.retrieve(&format!("pair_{number}")).await? {
                        return Ok(CapabilityResult::text(paired)
                            .with_metadata(json!({"action": "retrieve", "key": format!("pair_{number}")})));
                    }
                }
                let hits = self.store.search(&numbers[0]).await?;
                match hits.into_iter().next() {
                    Some((key, value)) => Ok(CapabilityResult::text(value)
                        .with_metadata(json!({"action": "retrieve", "key": key}))),
                    None => Err(ToolError::KeyNotFound(numbers[0].clone())),
                }
            }
            MemoryIntent::Retrieve(key) => self.retrieve_key(&key).await,
            MemoryIntent::Search(keywords) => {
                for keyword in &keywords {
                    if let Some((key, value)) = self.store.search(keyword).await?.into_iter().next() {
                        return Ok(CapabilityResult::text(value)
                            .with_metadata(json!({"action": "search", "key": key})));
                    }
                }
                Err(ToolError::KeyNotFound(text))
            }
            MemoryIntent::Unknown => Err(ToolError::NeedsInput(
                "I can store and retrieve information. What would you like me to remember or recall?"
                    .to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_in(dir: &tempfile::TempDir) -> MemoryTool {
        MemoryTool::new(Arc::new(MemoryStore::new(dir.path().join("memory.json"))))
    }

    #[test]
    fn test_parse_store_forms() {
        assert_eq!(
            parse_intent("Remember favorite_color = blue"),
            MemoryIntent::Store {
                key: "favorite_color".to_string(),
                value: "blue".to_string()
            }
        );
        assert_eq!(
            parse_intent("Please remember that my favorite color is blue."),
            MemoryIntent::Store {
                key: "favorite_color".to_string(),
                value: "blue".to_string()
            }
        );
        assert_eq!(
            parse_intent("Store favorite_color: blue"),
            MemoryIntent::Store {
                key: "favorite_color".to_string(),
                value: "blue".to_string()
            }
        );
        assert_eq!(
            parse_intent("Remember the numbers 12345 and 67890"),
            MemoryIntent::StorePair("12345".to_string(), "67890".to_string())
        );
    }

    #[test]
    fn test_parse_retrieve_forms() {
        assert_eq!(
            parse_intent("What is my favorite_color?"),
            MemoryIntent::Retrieve("favorite_color".to_string())
        );
        assert_eq!(
            parse_intent("Do you remember my favorite color?"),
            MemoryIntent::Retrieve("favorite_color".to_string())
        );
        assert_eq!(
            parse_intent("What was paired with 12345?"),
            MemoryIntent::RetrievePair(vec!["12345".to_string()])
        );
        assert_eq!(parse_intent("hello there"), MemoryIntent::Unknown);
    }

    #[tokio::test]
    async fn test_store_then_retrieve_in_separate_requests() {
        let dir = tempfile::tempdir().expect("tempdir");
        tool_in(&dir)
            .execute(&Request::text("Remember favorite_color = blue"))
            .await
            .expect("store");

        // A fresh tool over the same file models a later, independent request.
        let later = tool_in(&dir);
        let first = later
            .execute(&Request::text("What is my favorite_color?"))
            .await
            .expect("retrieve");
        let second = later
            .execute(&Request::text("What is my favorite_color?"))
            .await
            .expect("retrieve again");
        assert_eq!(first.text, "blue");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_key_is_key_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = tool_in(&dir)
            .execute(&Request::text("What is my favorite_color?"))
            .await
            .expect_err("unset key");
        assert!(matches!(err, ToolError::KeyNotFound(k) if k == "favorite_color"));
    }

    #[tokio::test]
    async fn test_number_pairs_are_bidirectional() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = tool_in(&dir);
        tool.execute(&Request::text("Remember the numbers 12345 and 67890"))
            .await
            .expect("store pair");
        let forward = tool
            .execute(&Request::text("What was paired with 12345?"))
            .await
            .expect("forward");
        let backward = tool
            .execute(&Request::text("What was paired with 67890?"))
            .await
            .expect("backward");
        assert_eq!(forward.text, "67890");
        assert_eq!(backward.text, "12345");
    }

    #[tokio::test]
    async fn test_unclear_request_needs_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = tool_in(&dir)
            .execute(&Request::text("hello there"))
            .await
            .expect_err("unclear");
        assert!(matches!(err, ToolError::NeedsInput(_)));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("My Favorite Color"), "favorite_color");
        assert_eq!(normalize_key("'favorite_color'"), "favorite_color");
        assert_eq!(normalize_key("the wifi-password"), "wifi_password");
    }
}
