//! OpenAI-compatible request serialization and stream chunk parsing.
//!
//! Many servers (OpenAI, vLLM, llama.cpp, Ollama, etc.) accept the chat
//! completions request shape and stream `chat.completion.chunk` objects back.

use agent_core::{tools::ToolSchema, Message};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::provider::Result;
use crate::types::{FinishReason, StreamDelta, ToolCallFragment};

/// Convert [`Message`] values to an OpenAI-compatible JSON array.
pub fn messages_to_openai_compat_json(messages: &[Message]) -> Vec<Value> {
    messages.iter().map(|m| json!(m)).collect()
}

/// Convert [`ToolSchema`] values to the OpenAI `tools` array JSON.
pub fn tools_to_openai_compat_json(tools: &[ToolSchema]) -> Vec<Value> {
    tools.iter().map(|t| json!(t)).collect()
}

/// Build a streaming chat request body. `tools` is omitted when empty.
pub fn build_openai_compat_body(
    model: &str,
    messages: &[Message],
    tools: &[ToolSchema],
    max_output_tokens: Option<u32>,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages_to_openai_compat_json(messages),
        "stream": true,
    });

    if !tools.is_empty() {
        body["tools"] = json!(tools_to_openai_compat_json(tools));
    }

    if let Some(max_tokens) = max_output_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    body
}

// --- streaming chunk parsing ---

#[derive(Debug, Deserialize)]
pub struct OpenAICompatStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAICompatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatChoice {
    #[serde(default)]
    delta: OpenAICompatDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAICompatDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAICompatToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatToolCallDelta {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<OpenAICompatFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Convert one stream chunk into deltas: text first, then every tool call
/// fragment in order, then the finish reason if present.
pub fn parse_openai_compat_chunk(chunk: OpenAICompatStreamChunk) -> Vec<StreamDelta> {
    let mut deltas = Vec::new();
    let Some(choice) = chunk.choices.into_iter().next() else {
        return deltas;
    };

    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
        deltas.push(StreamDelta::Text(content));
    }

    for call in choice.delta.tool_calls.unwrap_or_default() {
        let (name, arguments) = match call.function {
            Some(function) => (function.name, function.arguments),
            None => (None, None),
        };
        deltas.push(StreamDelta::ToolCallFragment(ToolCallFragment {
            index: call.index,
            id: call.id,
            name,
            arguments,
        }));
    }

    if let Some(reason) = choice.finish_reason {
        deltas.push(StreamDelta::Finish(FinishReason::from(reason.as_str())));
    }

    deltas
}

/// Parse an SSE `data:` payload. `[DONE]` and blank payloads yield nothing;
/// invalid JSON is an error.
pub fn parse_openai_compat_sse_data(data: &str) -> Result<Vec<StreamDelta>> {
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(Vec::new());
    }

    let chunk: OpenAICompatStreamChunk = serde_json::from_str(data)?;
    Ok(parse_openai_compat_chunk(chunk))
}
