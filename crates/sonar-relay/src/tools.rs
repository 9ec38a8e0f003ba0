//! Tool registry: the four Sonar-backed assistant tools.

use serde_json::{json, Value};

/// Static description of one exposed tool.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    /// Upstream Sonar model the tool maps to.
    pub model: &'static str,
    /// System prompt prepended to every conversation for this tool.
    pub system_prompt: &'static str,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "perplexity_ask",
        description: "Engage in a conversation and get a direct, well-sourced answer. \
                      Accepts either a full messages array or a single query string.",
        model: "sonar-pro",
        system_prompt: "You are a helpful assistant. Answer concisely and cite your sources.",
    },
    ToolSpec {
        name: "perplexity_search",
        description: "Run a web search and return ranked results with citations.",
        model: "sonar",
        system_prompt: "You are a search assistant. Return the most relevant findings \
                        for the query, each with its source.",
    },
    ToolSpec {
        name: "perplexity_research",
        description: "Perform deep research on a topic: an exhaustive, citation-dense report.",
        model: "sonar-deep-research",
        system_prompt: "You are a research assistant. Produce a thorough report with \
                        inline citations for every claim.",
    },
    ToolSpec {
        name: "perplexity_reason",
        description: "Work through a problem step by step with explicit reasoning.",
        model: "sonar-reasoning-pro",
        system_prompt: "You are a reasoning assistant. Think through the problem step \
                        by step before giving your conclusion.",
    },
];

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}

/// Tool descriptors for the MCP `tools/list` response.
pub fn list_descriptors() -> Value {
    let tools: Vec<Value> = TOOLS
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Question or search query"
                        },
                        "messages": {
                            "type": "array",
                            "description": "Full conversation as role/content pairs",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "role": { "type": "string" },
                                    "content": { "type": "string" }
                                },
                                "required": ["role", "content"]
                            }
                        }
                    }
                }
            })
        })
        .collect();
    json!({ "tools": tools })
}

/// Build the upstream message list from tool-call arguments.
///
/// Accepts `messages` (an array of role/content pairs) or `query` (a single
/// user turn); the tool's system prompt always leads.
pub fn build_messages(spec: &ToolSpec, arguments: &Value) -> Option<Value> {
    let mut messages = vec![json!({ "role": "system", "content": spec.system_prompt })];

    if let Some(user_messages) = arguments.get("messages").and_then(|m| m.as_array()) {
        if user_messages.is_empty() {
            return None;
        }
        messages.extend(user_messages.iter().cloned());
    } else if let Some(query) = arguments.get("query").and_then(|q| q.as_str()) {
        if query.trim().is_empty() {
            return None;
        }
        messages.push(json!({ "role": "user", "content": query }));
    } else {
        return None;
    }

    Some(Value::Array(messages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_tools() {
        assert!(find("perplexity_search").is_some());
        assert!(find("perplexity_sing").is_none());
        assert_eq!(TOOLS.len(), 4);
    }

    #[test]
    fn descriptors_expose_schema_for_every_tool() {
        let listed = list_descriptors();
        let tools = listed["tools"].as_array().unwrap();
        assert_eq!(tools.len(), TOOLS.len());
        assert!(tools
            .iter()
            .all(|t| t.get("inputSchema").is_some() && t.get("description").is_some()));
    }

    #[test]
    fn query_argument_becomes_user_turn_after_system_prompt() {
        let spec = find("perplexity_ask").unwrap();
        let messages = build_messages(spec, &serde_json::json!({ "query": "what is rust?" }))
            .unwrap();
        let messages = messages.as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "what is rust?");
    }

    #[test]
    fn missing_arguments_are_rejected() {
        let spec = find("perplexity_ask").unwrap();
        assert!(build_messages(spec, &serde_json::json!({})).is_none());
        assert!(build_messages(spec, &serde_json::json!({ "query": "  " })).is_none());
        assert!(build_messages(spec, &serde_json::json!({ "messages": [] })).is_none());
    }
}
