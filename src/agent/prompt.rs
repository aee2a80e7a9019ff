//! Routing prompt for the classification call.

use crate::request::Request;
use crate::tools::ToolRegistry;

/// Build the classification prompt: the capability menu plus the request.
pub fn build_routing_prompt(request: &Request, tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    let media_types: Vec<&str> = request
        .attachments()
        .map(|a| a.mime_type.as_str())
        .collect();
    let attachments = if media_types.is_empty() {
        "The request has no attachments.".to_string()
    } else {
        format!(
            "The request carries {} attachment(s) of type: {}.",
            media_types.len(),
            media_types.join(", ")
        )
    };

    format!(
        r#"Analyze the user's request and select the appropriate tool.

## Tools

{tool_descriptions}

## Rules

1. Pick exactly one tool.
2. Respond with ONLY the tool name, no punctuation or explanation.
3. Use math for calculations that do not fit another tool.

{attachments}

Request: {text}"#,
        tool_descriptions = tool_descriptions,
        attachments = attachments,
        text = request.text_content()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::hash::HashTool;
    use std::sync::Arc;

    #[test]
    fn test_prompt_lists_tools_and_attachments() {
        let tools = ToolRegistry::new().with(Arc::new(HashTool));
        let request = Request::text("what is this").with_attachment("image/png", vec![0]);
        let prompt = build_routing_prompt(&request, &tools);

        assert!(prompt.contains("- **hash**: Compute cryptographic hashes"));
        assert!(prompt.contains("1 attachment(s) of type: image/png"));
        assert!(prompt.ends_with("Request: what is this"));
    }
}
