//! Splits one streamed model response into user-visible text and tool calls.
//!
//! [`Demultiplexer`] is a synchronous state machine: every [`StreamDelta`] goes
//! in, and the values to push onto the `to_user` and `tool_call` channels come
//! out, in order. Driving it from a stream lives in [`super::handler`].

use std::collections::HashSet;

use agent_core::tools::ToolCall;
use agent_llm::{FinishReason, StreamDelta, ToolCallFragment};

use super::to_user::{ScanEvent, ToUserScanner};

/// Separator pushed between the displayed text of consecutive tool calls.
pub const CALL_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutput {
    Text(String),
    /// The `to_user` value of one tool call is complete.
    SegmentEnd,
    EndOfTurn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallOutput {
    Call(ToolCall),
    End,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DemuxOutput {
    pub to_user: Vec<UserOutput>,
    pub tool_calls: Vec<ToolCallOutput>,
}

/// What the response amounted to once it finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemuxSummary {
    /// Plain assistant text (outside any tool call).
    pub content: String,
    pub deltas: u32,
    pub tool_calls: u32,
    pub dropped_calls: u32,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug)]
struct PendingCall {
    index: u32,
    id: Option<String>,
    name: Option<String>,
    arguments: String,
    scanner: ToUserScanner,
    spoke: bool,
}

impl PendingCall {
    fn new(index: u32) -> Self {
        Self {
            index,
            id: None,
            name: None,
            arguments: String::new(),
            scanner: ToUserScanner::new(),
            spoke: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeMode {
    /// Another call started, or the model said its tool calls are complete.
    Complete,
    /// The response ended for some other reason; only provably whole calls survive.
    Strict,
}

#[derive(Debug, Default)]
pub struct Demultiplexer {
    current: Option<PendingCall>,
    finalized: HashSet<u32>,
    any_call_spoke: bool,
    summary: DemuxSummary,
    finished: bool,
}

impl Demultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn summary(&self) -> &DemuxSummary {
        &self.summary
    }

    pub fn into_summary(self) -> DemuxSummary {
        self.summary
    }

    pub fn process(&mut self, delta: StreamDelta) -> DemuxOutput {
        let mut out = DemuxOutput::default();
        if self.finished {
            log::warn!("Delta received after finish; ignoring");
            return out;
        }
        self.summary.deltas += 1;

        match delta {
            StreamDelta::Text(text) => {
                self.summary.content.push_str(&text);
                out.to_user.push(UserOutput::Text(text));
            }
            StreamDelta::ToolCallFragment(fragment) => self.process_fragment(fragment, &mut out),
            StreamDelta::Finish(reason) => self.finish(reason, &mut out),
        }

        out
    }

    fn process_fragment(&mut self, fragment: ToolCallFragment, out: &mut DemuxOutput) {
        let same_call = matches!(&self.current, Some(call) if call.index == fragment.index);
        if !same_call {
            if self.finalized.contains(&fragment.index) {
                log::warn!(
                    "Fragment for already finalized tool call index {}; dropping",
                    fragment.index
                );
                return;
            }
            self.finalize_current(FinalizeMode::Complete, out);
            self.current = Some(PendingCall::new(fragment.index));
        }

        let Some(call) = self.current.as_mut() else {
            return;
        };

        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            call.id = Some(id);
        }
        if let Some(name) = fragment.name.filter(|name| !name.is_empty()) {
            call.name = Some(name);
        }
        let Some(arguments) = fragment.arguments.filter(|a| !a.is_empty()) else {
            return;
        };
        call.arguments.push_str(&arguments);

        for event in call.scanner.feed(&call.arguments) {
            match event {
                ScanEvent::Text(text) => {
                    if !call.spoke {
                        call.spoke = true;
                        if self.any_call_spoke {
                            out.to_user.push(UserOutput::Text(CALL_SEPARATOR.to_string()));
                        }
                        self.any_call_spoke = true;
                    }
                    out.to_user.push(UserOutput::Text(text));
                }
                ScanEvent::SegmentEnd => out.to_user.push(UserOutput::SegmentEnd),
            }
        }
    }

    fn finish(&mut self, reason: FinishReason, out: &mut DemuxOutput) {
        let mode = if reason == FinishReason::ToolCalls {
            FinalizeMode::Complete
        } else {
            FinalizeMode::Strict
        };
        self.finalize_current(mode, out);

        out.to_user.push(UserOutput::EndOfTurn);
        out.tool_calls.push(ToolCallOutput::End);
        self.summary.finish_reason = Some(reason);
        self.finished = true;
    }

    fn finalize_current(&mut self, mode: FinalizeMode, out: &mut DemuxOutput) {
        let Some(call) = self.current.take() else {
            return;
        };
        self.finalized.insert(call.index);

        if call.scanner.is_mid_value() {
            // Text already shown stays shown; the call itself is unusable.
            log::warn!(
                "Tool call {} ended inside its to_user value; dropping it",
                call.index
            );
            self.summary.dropped_calls += 1;
            return;
        }

        if mode == FinalizeMode::Strict
            && serde_json::from_str::<serde_json::Value>(call.arguments.trim()).is_err()
            && !call.arguments.trim().is_empty()
        {
            log::warn!(
                "Tool call {} has incomplete arguments at end of response; dropping it",
                call.index
            );
            self.summary.dropped_calls += 1;
            return;
        }

        let Some(name) = call.name else {
            log::warn!("Tool call {} has no function name; dropping it", call.index);
            self.summary.dropped_calls += 1;
            return;
        };
        let id = call
            .id
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

        self.summary.tool_calls += 1;
        out.tool_calls
            .push(ToolCallOutput::Call(ToolCall::function(id, name, call.arguments)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(deltas: Vec<StreamDelta>) -> (Vec<UserOutput>, Vec<ToolCallOutput>, DemuxSummary) {
        let mut demux = Demultiplexer::new();
        let mut to_user = Vec::new();
        let mut tool_calls = Vec::new();
        for delta in deltas {
            let out = demux.process(delta);
            to_user.extend(out.to_user);
            tool_calls.extend(out.tool_calls);
        }
        (to_user, tool_calls, demux.into_summary())
    }

    fn user_text(outputs: &[UserOutput]) -> String {
        outputs
            .iter()
            .filter_map(|o| match o {
                UserOutput::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    fn calls(outputs: &[ToolCallOutput]) -> Vec<&ToolCall> {
        outputs
            .iter()
            .filter_map(|o| match o {
                ToolCallOutput::Call(c) => Some(c),
                ToolCallOutput::End => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_is_forwarded_verbatim() {
        let (to_user, tool_calls, summary) = run(vec![
            StreamDelta::text("Hello"),
            StreamDelta::text(" world"),
            StreamDelta::finish("stop"),
        ]);

        assert_eq!(
            to_user,
            vec![
                UserOutput::Text("Hello".into()),
                UserOutput::Text(" world".into()),
                UserOutput::EndOfTurn,
            ]
        );
        assert_eq!(tool_calls, vec![ToolCallOutput::End]);
        assert_eq!(summary.content, "Hello world");
        assert_eq!(summary.finish_reason, Some(FinishReason::Stop));
    }

    #[test]
    fn to_user_streams_while_arguments_assemble() {
        let (to_user, tool_calls, _) = run(vec![
            StreamDelta::tool_call_start(0, "call_1", "search"),
            StreamDelta::arguments(0, r#"{"to_u"#),
            StreamDelta::arguments(0, r#"ser":"Sear"#),
            StreamDelta::arguments(0, r#"ching..."#),
            StreamDelta::arguments(0, r#"","query":"wea"#),
            StreamDelta::arguments(0, r#"ther"}"#),
            StreamDelta::finish("tool_calls"),
        ]);

        assert_eq!(
            to_user,
            vec![
                UserOutput::Text("Sear".into()),
                UserOutput::Text("ching...".into()),
                UserOutput::SegmentEnd,
                UserOutput::EndOfTurn,
            ]
        );

        let calls = calls(&tool_calls);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["query"], "weather");
        assert_eq!(tool_calls.last(), Some(&ToolCallOutput::End));
    }

    #[test]
    fn consecutive_speaking_calls_are_separated_once() {
        let (to_user, tool_calls, summary) = run(vec![
            StreamDelta::tool_call_start(0, "a", "first"),
            StreamDelta::arguments(0, r#"{"to_user":"one"}"#),
            StreamDelta::tool_call_start(1, "b", "second"),
            StreamDelta::arguments(1, r#"{"x":1}"#),
            StreamDelta::tool_call_start(2, "c", "third"),
            StreamDelta::arguments(2, r#"{"to_user":"two"}"#),
            StreamDelta::finish("tool_calls"),
        ]);

        assert_eq!(user_text(&to_user), "one\ntwo");
        let names: Vec<_> = calls(&tool_calls)
            .iter()
            .map(|c| c.function.name.as_str())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(summary.tool_calls, 3);
    }

    #[test]
    fn call_without_to_user_still_finalizes() {
        let (to_user, tool_calls, _) = run(vec![
            StreamDelta::tool_call_start(0, "call_9", "lookup"),
            StreamDelta::arguments(0, r#"{"id":"#),
            StreamDelta::arguments(0, r#"42}"#),
            StreamDelta::finish("tool_calls"),
        ]);

        assert_eq!(to_user, vec![UserOutput::EndOfTurn]);
        assert_eq!(calls(&tool_calls)[0].function.arguments, r#"{"id":42}"#);
    }

    #[test]
    fn call_cut_inside_to_user_is_dropped_without_flush() {
        // Partial text already displayed stays displayed; no segment end and no call.
        let (to_user, tool_calls, summary) = run(vec![
            StreamDelta::tool_call_start(0, "call_1", "search"),
            StreamDelta::arguments(0, r#"{"to_user":"Look"#),
            StreamDelta::finish("length"),
        ]);

        assert_eq!(
            to_user,
            vec![UserOutput::Text("Look".into()), UserOutput::EndOfTurn]
        );
        assert_eq!(tool_calls, vec![ToolCallOutput::End]);
        assert_eq!(summary.dropped_calls, 1);
    }

    #[test]
    fn incomplete_arguments_on_plain_stop_are_dropped() {
        let (_, tool_calls, _) = run(vec![
            StreamDelta::tool_call_start(0, "call_1", "search"),
            StreamDelta::arguments(0, r#"{"to_user":"ok","query":"#),
            StreamDelta::finish("stop"),
        ]);
        assert_eq!(tool_calls, vec![ToolCallOutput::End]);
    }

    #[test]
    fn complete_arguments_on_plain_stop_are_kept() {
        let (_, tool_calls, _) = run(vec![
            StreamDelta::tool_call_start(0, "call_1", "search"),
            StreamDelta::arguments(0, r#"{"query":"rust"}"#),
            StreamDelta::finish("stop"),
        ]);
        assert_eq!(calls(&tool_calls).len(), 1);
    }

    #[test]
    fn missing_id_is_generated_and_missing_name_drops_call() {
        let (_, tool_calls, summary) = run(vec![
            StreamDelta::ToolCallFragment(ToolCallFragment {
                index: 0,
                id: None,
                name: Some("anon".into()),
                arguments: Some("{}".into()),
            }),
            StreamDelta::arguments(1, "{}"),
            StreamDelta::finish("tool_calls"),
        ]);

        let calls = calls(&tool_calls);
        assert_eq!(calls.len(), 1);
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(summary.dropped_calls, 1);
    }

    #[test]
    fn fragments_for_finalized_index_are_dropped() {
        let (_, tool_calls, _) = run(vec![
            StreamDelta::tool_call_start(0, "a", "first"),
            StreamDelta::arguments(0, "{}"),
            StreamDelta::tool_call_start(1, "b", "second"),
            StreamDelta::arguments(0, r#"{"late":true}"#),
            StreamDelta::arguments(1, "{}"),
            StreamDelta::finish("tool_calls"),
        ]);

        let calls = calls(&tool_calls);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.arguments, "{}");
    }

    #[test]
    fn text_and_tool_calls_interleave() {
        let (to_user, tool_calls, summary) = run(vec![
            StreamDelta::text("Let me check. "),
            StreamDelta::tool_call_start(0, "a", "lookup"),
            StreamDelta::arguments(0, r#"{"to_user":"Checking"}"#),
            StreamDelta::finish("tool_calls"),
        ]);

        assert_eq!(user_text(&to_user), "Let me check. Checking");
        assert_eq!(summary.content, "Let me check. ");
        assert_eq!(calls(&tool_calls).len(), 1);
    }

    #[test]
    fn deltas_after_finish_are_ignored() {
        let mut demux = Demultiplexer::new();
        demux.process(StreamDelta::finish("stop"));
        assert!(demux.is_finished());
        assert_eq!(demux.process(StreamDelta::text("late")), DemuxOutput::default());
        assert_eq!(demux.summary().deltas, 1);
    }
}
