//! Agent card served for A2A discovery.

use serde::Serialize;

pub const AGENT_NAME: &str = "APE Agent - Agent Protocol Evaluation";
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tags: Vec<&'static str>,
    pub examples: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_modes: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_modes: Option<Vec<&'static str>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: &'static str,
    pub description: &'static str,
    pub url: String,
    pub version: &'static str,
    pub protocol_version: &'static str,
    pub default_input_modes: Vec<&'static str>,
    pub default_output_modes: Vec<&'static str>,
    pub capabilities: AgentCapabilities,
    pub skills: Vec<AgentSkill>,
    pub supports_authenticated_extended_card: bool,
}

fn skill(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    tags: &[&'static str],
    examples: &[&'static str],
) -> AgentSkill {
    AgentSkill {
        id,
        name,
        description,
        tags: tags.to_vec(),
        examples: examples.to_vec(),
        input_modes: None,
        output_modes: None,
    }
}

/// Build the card advertised at `url`.
pub fn agent_card(url: &str) -> AgentCard {
    let mut image = skill(
        "image_understanding",
        "Image Understanding",
        "Analyzes and classifies objects in images, identifying general categories like animals",
        &["vision", "image", "multimodal", "classification"],
        &[
            "What animal is in this image? Please answer with just \"cat\" or \"dog\".",
            "Is this a cat or a dog?",
        ],
    );
    image.input_modes = Some(vec!["image/jpeg", "image/png", "image/gif", "image/webp"]);
    image.output_modes = Some(vec!["text"]);

    AgentCard {
        name: AGENT_NAME,
        description: "An A2A-compliant agent for evaluation testing. Supports elementary math, \
                      hash operations, image understanding, web browsing (Tic-tac-toe), code \
                      generation and execution, and persistent memory.",
        url: url.to_string(),
        version: AGENT_VERSION,
        protocol_version: "0.3.0",
        default_input_modes: vec!["text", "image/jpeg", "image/png"],
        default_output_modes: vec!["text"],
        capabilities: AgentCapabilities {
            streaming: true,
            push_notifications: false,
        },
        skills: vec![
            skill(
                "elementary_math",
                "Elementary Math Solver",
                "Solves elementary-level math problems including arithmetic and simple word problems",
                &["math", "arithmetic", "calculation"],
                &[
                    "What's 3 * 5?",
                    "Calculate 25 + 17",
                    "If I have 12 apples and give away 4, how many do I have left?",
                ],
            ),
            skill(
                "tool_usage",
                "Tool Usage - Hash Operations",
                "Executes sequences of cryptographic hash operations (SHA512, SHA256, MD5) on strings",
                &["tools", "hash", "sha512", "md5", "sequence"],
                &[
                    "Execute sha512 on \"hello\"",
                    "Execute a sequence of hash operations on the string \"hello\". Perform these operations in order: 1. sha512, 2. md5.",
                ],
            ),
            image,
            skill(
                "web_browsing",
                "Web Browsing - Tic-tac-toe",
                "Plays Tic-tac-toe games on web pages using browser automation",
                &["web", "browser", "game", "tic-tac-toe"],
                &["Play Tic-tac-toe", "Beat the computer at Tic-tac-toe"],
            ),
            skill(
                "code_execution",
                "Code Generation and Execution",
                "Writes and runs Python code to solve computational problems",
                &["code", "programming", "python", "computation"],
                &[
                    "Calculate the 50th Fibonacci number",
                    "Find the 10th prime number",
                ],
            ),
            skill(
                "memory",
                "Memory",
                "Remembers information across multiple interactions",
                &["memory", "context", "stateful"],
                &["Remember favorite_color = blue", "What is my favorite_color?"],
            ),
        ],
        supports_authenticated_extended_card: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_wire_shape() {
        let card = serde_json::to_value(agent_card("http://localhost:8000/")).expect("serialize");
        assert_eq!(card["name"], AGENT_NAME);
        assert_eq!(card["version"], "1.4.0");
        assert_eq!(card["url"], "http://localhost:8000/");
        assert_eq!(card["capabilities"]["streaming"], true);
        assert_eq!(card["capabilities"]["pushNotifications"], false);

        let ids: Vec<&str> = card["skills"]
            .as_array()
            .expect("skills")
            .iter()
            .filter_map(|s| s["id"].as_str())
            .collect();
        assert_eq!(
            ids,
            vec![
                "elementary_math",
                "tool_usage",
                "image_understanding",
                "web_browsing",
                "code_execution",
                "memory"
            ]
        );
        assert_eq!(card["skills"][2]["inputModes"][3], "image/webp");
        assert!(card["skills"][0].get("inputModes").is_none());
    }
}
