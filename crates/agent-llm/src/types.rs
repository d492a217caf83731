//! Normalized streaming deltas.

use std::fmt;

/// One incremental piece of a model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    /// Freeform assistant text.
    Text(String),
    /// Part of a tool call; fragments with the same `index` belong together.
    ToolCallFragment(ToolCallFragment),
    /// End of the response.
    Finish(FinishReason),
}

impl StreamDelta {
    pub fn text(value: impl Into<String>) -> Self {
        StreamDelta::Text(value.into())
    }

    /// Argument fragment for an already announced call.
    pub fn arguments(index: u32, fragment: impl Into<String>) -> Self {
        StreamDelta::ToolCallFragment(ToolCallFragment {
            index,
            arguments: Some(fragment.into()),
            ..Default::default()
        })
    }

    /// First fragment of a call, announcing its id and function name.
    pub fn tool_call_start(index: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        StreamDelta::ToolCallFragment(ToolCallFragment {
            index,
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: None,
        })
    }

    pub fn finish(reason: impl Into<FinishReason>) -> Self {
        StreamDelta::Finish(reason.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn as_str(&self) -> &str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other(reason) => reason,
        }
    }
}

impl From<&str> for FinishReason {
    fn from(reason: &str) -> Self {
        match reason {
            "stop" => FinishReason::Stop,
            // "function_call" is the legacy single-function form
            "tool_calls" | "function_call" => FinishReason::ToolCalls,
            "length" => FinishReason::Length,
            "content_filter" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_parses_known_and_unknown_values() {
        assert_eq!(FinishReason::from("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from("function_call"), FinishReason::ToolCalls);
        assert_eq!(
            FinishReason::from("end_turn"),
            FinishReason::Other("end_turn".to_string())
        );
        assert_eq!(FinishReason::from("end_turn").to_string(), "end_turn");
    }

    #[test]
    fn fragment_helpers_fill_expected_fields() {
        let StreamDelta::ToolCallFragment(start) = StreamDelta::tool_call_start(1, "c", "f") else {
            panic!("expected fragment");
        };
        assert_eq!(start.index, 1);
        assert_eq!(start.name.as_deref(), Some("f"));
        assert!(start.arguments.is_none());

        let StreamDelta::ToolCallFragment(args) = StreamDelta::arguments(1, "{") else {
            panic!("expected fragment");
        };
        assert!(args.id.is_none());
        assert_eq!(args.arguments.as_deref(), Some("{"));
    }
}
