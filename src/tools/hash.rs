//! Chained cryptographic hash operations.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};

use super::{Capability, CapabilityResult, Tool, ToolError};
use crate::request::Request;

/// Hash functions on the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha512,
    Sha256,
    Md5,
}

impl HashAlgorithm {
    /// Parse an algorithm name such as `SHA-512`, `sha512` or `MD5`.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::UnsupportedAlgorithm` for names outside the allow-list.
    pub fn parse(name: &str) -> Result<Self, ToolError> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "md5" => Ok(HashAlgorithm::Md5),
            _ => Err(ToolError::UnsupportedAlgorithm(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Md5 => "md5",
        }
    }

    /// Lowercase hex digest of `input`.
    pub fn digest_hex(&self, input: &str) -> String {
        match self {
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(input.as_bytes())),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
            HashAlgorithm::Md5 => format!("{:x}", md5::compute(input.as_bytes())),
        }
    }
}

/// Anything that looks like a hash function name, supported or not.
fn algorithm_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(sha-?\d{1,3}|sha3-?\d{3}|md[2456]|blake[23]\w*|crc32|ripemd-?\d{3}|whirlpool)\b")
            .expect("valid algorithm regex")
    })
}

/// `1. sha512` style numbered operations.
fn numbered_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})\.\s*(sha-?\d{1,3}|sha3-?\d{3}|md[2456]|blake[23]\w*|crc32|ripemd-?\d{3}|whirlpool)\b")
            .expect("valid numbered regex")
    })
}

fn double_quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)""#).expect("valid double quote regex"))
}

/// A single-quoted span not glued to a word, so "let's ... that's" is skipped.
fn single_quoted_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|[^\w])'([^']+)'(?:[^\w]|$)").expect("valid single quote regex"))
}

/// The quote style the input is taken from: double quotes always win.
fn input_pattern(text: &str) -> &'static Regex {
    if double_quoted_pattern().is_match(text) {
        double_quoted_pattern()
    } else {
        single_quoted_pattern()
    }
}

/// Extract the string to hash: the first double-quoted span, or failing
/// that the first single-quoted one.
fn extract_input(text: &str) -> Option<String> {
    input_pattern(text)
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Operation names in execution order. Numbered lists win over free mentions.
fn extract_operations(text: &str) -> Vec<String> {
    let mut numbered: Vec<(u32, String)> = numbered_pattern()
        .captures_iter(text)
        .filter_map(|c| {
            let index = c.get(1)?.as_str().parse::<u32>().ok()?;
            Some((index, c.get(2)?.as_str().to_string()))
        })
        .collect();
    if !numbered.is_empty() {
        numbered.sort_by_key(|(index, _)| *index);
        return numbered.into_iter().map(|(_, op)| op).collect();
    }

    // Strip quoted input first so a string like "md5" is not read as an operation.
    let unquoted = input_pattern(text).replace_all(text, " ");
    algorithm_pattern()
        .find_iter(&unquoted)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Run `operations` in order, feeding each hex digest into the next.
///
/// Returns the final digest and a log of each step.
///
/// # Errors
///
/// Fails with `UnsupportedAlgorithm` before hashing anything if any
/// operation is outside the allow-list.
pub fn execute_sequence(
    input: &str,
    operations: &[String],
) -> Result<(String, Vec<String>), ToolError> {
    let algorithms = operations
        .iter()
        .map(|op| HashAlgorithm::parse(op))
        .collect::<Result<Vec<_>, _>>()?;

    let mut current = input.to_string();
    let mut steps = Vec::with_capacity(algorithms.len());
    for (i, algorithm) in algorithms.iter().enumerate() {
        current = algorithm.digest_hex(&current);
        steps.push(format!("Step {} ({}): {}", i + 1, algorithm.name(), current));
    }
    Ok((current, steps))
}

/// Computes chains of SHA-512 / SHA-256 / MD5 digests over a quoted string.
pub struct HashTool;

#[async_trait]
impl Tool for HashTool {
    fn capability(&self) -> Capability {
        Capability::Hash
    }

    fn description(&self) -> &str {
        "Compute cryptographic hashes (sha512, sha256, md5), including ordered sequences of hash operations on a quoted string"
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError> {
        let text = request.text_content();

        let input = extract_input(&text).ok_or_else(|| {
            ToolError::NeedsInput(
                "Which string should I hash? Please put it in quotes.".to_string(),
            )
        })?;

        let operations = extract_operations(&text);
        if operations.is_empty() {
            return Err(ToolError::NeedsInput(
                "Which hash operations should I apply (sha512, sha256, md5)?".to_string(),
            ));
        }

        let (digest, steps) = execute_sequence(&input, &operations)?;
        tracing::info!(operations = ?operations, "Computed hash sequence");

        Ok(CapabilityResult::text(digest).with_metadata(json!({
            "input": input,
            "operations": operations
                .iter()
                .map(|op| op.to_ascii_lowercase())
                .collect::<Vec<_>>(),
            "steps": steps,
        })))
    }
}
