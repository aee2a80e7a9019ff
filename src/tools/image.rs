//! Image labeling through the multimodal LLM.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{Capability, CapabilityResult, Tool, ToolError};
use crate::llm::{ContentPart, LlmClient};
use crate::request::Request;

/// Media types the vision model accepts.
pub const SUPPORTED_MEDIA_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "image/webp"];

const LABEL_INSTRUCTIONS: &str = "You are an image classification assistant.
When asked to identify animals or objects in images:
1. Provide only the general category or class
2. Use simple, common terms (e.g., \"dog\" not \"golden retriever\", \"cat\" not \"persian cat\")
3. Answer with just the word, no extra text or punctuation
4. If asked to choose between options (like \"cat or dog\"), answer with only one of those options

Examples:
Q: What animal is in this image? Please answer with just 'cat' or 'dog'.
A: dog

Q: What is this?
A: car";

fn normalize_media_type(mime_type: &str) -> String {
    let base = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if base == "image/jpg" {
        "image/jpeg".to_string()
    } else {
        base
    }
}

/// Reduce a model reply to a bare label, honoring an explicit "cat or dog" choice.
fn normalize_label(prompt: &str, reply: &str) -> String {
    let answer = reply
        .trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();

    let prompt = prompt.to_lowercase();
    if prompt.contains("cat") && prompt.contains("dog") {
        let has_cat = answer.contains("cat");
        let has_dog = answer.contains("dog");
        if has_cat && !has_dog {
            return "cat".to_string();
        }
        if has_dog && !has_cat {
            return "dog".to_string();
        }
    }
    answer
}

/// Labels the main subject of an attached image.
pub struct ImageLabeler {
    llm: Arc<dyn LlmClient>,
}

impl ImageLabeler {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for ImageLabeler {
    fn capability(&self) -> Capability {
        Capability::Image
    }

    fn description(&self) -> &str {
        "Identify or classify the main subject of an attached image (only when image data is present)"
    }

    fn accepts_attachments(&self) -> bool {
        true
    }

    async fn execute(&self, request: &Request) -> Result<CapabilityResult, ToolError> {
        let attachment = request.attachments().next().ok_or_else(|| {
            ToolError::NeedsInput("Please attach the image you want me to look at.".to_string())
        })?;

        let mime_type = normalize_media_type(&attachment.mime_type);
        if !SUPPORTED_MEDIA_TYPES.contains(&mime_type.as_str()) {
            return Err(ToolError::UnsupportedMediaType(attachment.mime_type.clone()));
        }

        let prompt = request.text_content();
        let question = if prompt.is_empty() {
            "What is this?".to_string()
        } else {
            prompt
        };

        tracing::info!(mime_type = %mime_type, bytes = attachment.data.len(), "Labeling image");
        let reply = self
            .llm
            .generate(&[
                ContentPart::text(LABEL_INSTRUCTIONS),
                ContentPart::text(question.clone()),
                ContentPart::InlineData {
                    mime_type: mime_type.clone(),
                    data: attachment.data.clone(),
                },
            ])
            .await?;

        let label = normalize_label(&question, &reply);
        Ok(CapabilityResult::text(label).with_metadata(json!({"mimeType": mime_type})))
    }
}
