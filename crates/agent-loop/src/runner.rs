use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::budget::{trim_for_sending, ConversationContext};
use agent_core::tools::{
    parse_tool_args, strip_display_field, ToolCall, ToolExecutor, ToolResult, ToolSchema,
};
use agent_core::{AgentError, AgentEvent, Message, TokenBudgetUsage, TokenUsage};
use agent_llm::{LLMProvider, StreamAdapter};

use crate::config::AgentLoopConfig;
use crate::sink::DisplaySink;
use crate::stream::{spawn_demux, DemuxChannels, DemuxSummary, ToolCallOutput, UserOutput};

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model answered without calling tools.
    Completed,
    /// A tool invocation failed; no follow-up request was made.
    ToolFailed,
    MaxRounds,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub rounds: usize,
    pub stop: StopReason,
    /// Plain assistant text of the last response.
    pub final_text: String,
    pub usage: TokenUsage,
}

struct ToolRecord {
    call: ToolCall,
    result: ToolResult,
}

#[derive(Default)]
struct ToolDrain {
    records: Vec<ToolRecord>,
    skipped: usize,
    failed: bool,
}

struct TurnOutput {
    summary: DemuxSummary,
    tools: ToolDrain,
}

/// Run the conversation until the model stops calling tools.
///
/// Each round trims the context to its sending budget, streams one response,
/// shows its user-visible text on `sink` while invoking completed tool calls,
/// and appends the assistant message and tool results to `context`.
///
/// Events are sent with backpressure: the receiving end of `event_tx` must be
/// read while the loop runs, or a full channel stalls it.
#[allow(clippy::too_many_arguments)]
pub async fn run_agent_loop(
    context: &mut ConversationContext,
    initial_message: String,
    sink: &mut dyn DisplaySink,
    event_tx: mpsc::Sender<AgentEvent>,
    llm: Arc<dyn LLMProvider>,
    tools: Arc<dyn ToolExecutor>,
    cancel_token: CancellationToken,
    config: AgentLoopConfig,
) -> Result<LoopOutcome> {
    let debug_logger = DebugLogger::new(log::log_enabled!(log::Level::Debug));
    let session_id = config.session_id.clone();

    log::debug!(
        "[{}] Starting agent loop with message: {}",
        session_id,
        initial_message
    );
    debug_logger.log_event(
        &session_id,
        "agent_loop_start",
        serde_json::json!({
            "model": context.model(),
            "max_rounds": config.max_rounds,
            "max_sending_tokens": context.max_sending_tokens(),
            "initial_message_count": context.len(),
        }),
    );

    if !config.skip_initial_user_message {
        context.push(Message::user(initial_message));
    }

    let tool_schemas = resolve_available_tool_schemas(tools.as_ref());
    let mut usage = TokenUsage::default();
    let mut final_text = String::new();

    for round in 0..config.max_rounds {
        if cancel_token.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        debug_logger.log_event(
            &session_id,
            "round_start",
            serde_json::json!({
                "round": round + 1,
                "total_rounds": config.max_rounds,
                "message_count": context.len(),
            }),
        );

        let (request, budget_usage) = prepare_request(context, &tool_schemas);
        usage.prompt_tokens = budget_usage.total_tokens;
        if budget_usage.truncation_occurred() {
            log::info!(
                "[{}] Sending {} messages, {} left out to fit {} tokens",
                session_id,
                budget_usage.kept_messages,
                budget_usage.dropped_messages,
                budget_usage.budget_limit
            );
        }
        let _ = event_tx
            .send(AgentEvent::TokenBudgetUpdated {
                usage: budget_usage,
            })
            .await;

        let timer = Timer::new("llm_request");
        let stream = match llm
            .chat_stream(
                &request,
                &tool_schemas,
                config.max_output_tokens,
                Some(context.model()),
            )
            .await
        {
            Ok(stream) => stream,
            Err(error) => {
                let agent_error = AgentError::LLM(error.to_string());
                send_error(&event_tx, &agent_error).await;
                return Err(agent_error);
            }
        };

        let turn = match run_turn(
            StreamAdapter::new(stream),
            sink,
            &event_tx,
            tools.as_ref(),
            &cancel_token,
            &session_id,
        )
        .await
        {
            Ok(turn) => turn,
            Err(error) => {
                send_error(&event_tx, &error).await;
                return Err(error);
            }
        };
        timer.debug(&session_id);

        let TurnOutput { summary, tools: drain } = turn;
        usage.completion_chunks += summary.deltas;
        usage.tool_calls += drain.records.len() as u32;
        final_text = summary.content.clone();

        if drain.records.is_empty() {
            if drain.skipped > 0 {
                log::warn!(
                    "[{}] All {} tool calls were unusable; ending turn",
                    session_id,
                    drain.skipped
                );
            }
            context.push(Message::assistant(summary.content, None));
            return Ok(finish(&event_tx, round + 1, StopReason::Completed, final_text, usage).await);
        }

        let calls = drain.records.iter().map(|r| r.call.clone()).collect();
        context.push(Message::assistant(summary.content, Some(calls)));
        context.extend(
            drain
                .records
                .into_iter()
                .map(|r| Message::tool_result(r.call.id, r.result.result)),
        );

        if drain.failed {
            log::warn!(
                "[{}] Tool failure in round {}; not sending results back",
                session_id,
                round + 1
            );
            return Ok(finish(&event_tx, round + 1, StopReason::ToolFailed, final_text, usage).await);
        }
    }

    log::warn!(
        "[{}] Stopped after {} rounds with tool calls still pending",
        session_id,
        config.max_rounds
    );
    Ok(finish(&event_tx, config.max_rounds, StopReason::MaxRounds, final_text, usage).await)
}

/// Build the outgoing history for the next request.
///
/// The tool definitions travel with every request, so their cost comes off
/// the budget before the history is trimmed. Tool results whose assistant
/// message was trimmed away are removed.
pub fn prepare_request(
    context: &mut ConversationContext,
    tool_schemas: &[ToolSchema],
) -> (Vec<Message>, TokenBudgetUsage) {
    let overhead = i64::from(tool_spec_overhead(context, tool_schemas));
    let budget_limit = i64::from(context.max_sending_tokens()) - overhead;

    let messages = trim_for_sending(context, None, -overhead);

    let total_tokens = context
        .counter()
        .count_messages(&messages, context.model());
    let history = context.len() + usize::from(context.bead().is_some());

    let usage = TokenBudgetUsage {
        budget_limit,
        total_tokens,
        kept_messages: messages.len(),
        dropped_messages: history.saturating_sub(messages.len()),
    };
    (messages, usage)
}

fn tool_spec_overhead(context: &ConversationContext, tool_schemas: &[ToolSchema]) -> u32 {
    if tool_schemas.is_empty() {
        return 0;
    }
    match serde_json::to_string(tool_schemas) {
        Ok(json) => context.counter().count_text(&json, context.model()),
        Err(error) => {
            log::warn!("Could not serialize tool schemas for counting: {}", error);
            0
        }
    }
}

async fn run_turn(
    stream: StreamAdapter,
    sink: &mut dyn DisplaySink,
    event_tx: &mpsc::Sender<AgentEvent>,
    tools: &dyn ToolExecutor,
    cancel_token: &CancellationToken,
    session_id: &str,
) -> Result<TurnOutput> {
    let DemuxChannels {
        to_user,
        tool_calls,
        task,
    } = spawn_demux(stream, cancel_token.clone(), session_id.to_string());

    let ((), drain) = tokio::join!(
        drain_to_user(to_user, sink),
        drain_tool_calls(tool_calls, event_tx, tools, cancel_token, session_id),
    );

    let summary = task
        .await
        .map_err(|error| AgentError::Stream(error.to_string()))??;

    Ok(TurnOutput {
        summary,
        tools: drain,
    })
}

async fn drain_to_user(mut rx: mpsc::UnboundedReceiver<UserOutput>, sink: &mut dyn DisplaySink) {
    while let Some(item) = rx.recv().await {
        match item {
            UserOutput::Text(chunk) => sink.append(&chunk),
            UserOutput::SegmentEnd => sink.segment_end(),
            UserOutput::EndOfTurn => break,
        }
    }
    sink.end();
}

async fn drain_tool_calls(
    mut rx: mpsc::UnboundedReceiver<ToolCallOutput>,
    event_tx: &mpsc::Sender<AgentEvent>,
    tools: &dyn ToolExecutor,
    cancel_token: &CancellationToken,
    session_id: &str,
) -> ToolDrain {
    let mut drain = ToolDrain::default();

    while let Some(item) = rx.recv().await {
        let call = match item {
            ToolCallOutput::Call(call) => call,
            ToolCallOutput::End => break,
        };

        if cancel_token.is_cancelled() {
            log::debug!(
                "[{}] Discarding tool call {} after cancellation",
                session_id,
                call.id
            );
            continue;
        }

        let args = match parse_tool_args(&call.function.arguments) {
            Ok(args) => strip_display_field(args),
            Err(error) => {
                log::warn!(
                    "[{}] Skipping tool call {} ({}): {}",
                    session_id,
                    call.id,
                    call.function.name,
                    error
                );
                let _ = event_tx
                    .send(AgentEvent::ToolSkipped {
                        tool_call_id: call.id.clone(),
                        tool_name: call.function.name.clone(),
                        reason: error.to_string(),
                    })
                    .await;
                drain.skipped += 1;
                continue;
            }
        };

        let _ = event_tx
            .send(AgentEvent::ToolStart {
                tool_call_id: call.id.clone(),
                tool_name: call.function.name.clone(),
                arguments: Value::Object(args.clone()),
            })
            .await;

        let tool_timer = Timer::new(format!("tool_{}", call.function.name));
        match tools.invoke(&call.function.name, args).await {
            Ok(result) => {
                tool_timer.debug(session_id);
                let _ = event_tx
                    .send(AgentEvent::ToolComplete {
                        tool_call_id: call.id.clone(),
                        result: result.clone(),
                    })
                    .await;
                drain.records.push(ToolRecord { call, result });
            }
            Err(error) => {
                log::warn!(
                    "[{}] Tool {} failed: {}",
                    session_id,
                    call.function.name,
                    error
                );
                let _ = event_tx
                    .send(AgentEvent::ToolError {
                        tool_call_id: call.id.clone(),
                        error: error.to_string(),
                    })
                    .await;
                drain.records.push(ToolRecord {
                    call,
                    result: ToolResult::failed(format!("Error: {error}")),
                });
                drain.failed = true;
            }
        }
    }

    drain
}

async fn send_error(event_tx: &mpsc::Sender<AgentEvent>, error: &AgentError) {
    if matches!(error, AgentError::Cancelled) {
        return;
    }
    let _ = event_tx
        .send(AgentEvent::Error {
            message: error.to_string(),
        })
        .await;
}

async fn finish(
    event_tx: &mpsc::Sender<AgentEvent>,
    rounds: usize,
    stop: StopReason,
    final_text: String,
    usage: TokenUsage,
) -> LoopOutcome {
    let _ = event_tx
        .send(AgentEvent::Complete {
            usage: usage.clone(),
        })
        .await;

    LoopOutcome {
        rounds,
        stop,
        final_text,
        usage,
    }
}

fn resolve_available_tool_schemas(tools: &dyn ToolExecutor) -> Vec<ToolSchema> {
    let mut tool_schemas = tools.list_tools();
    tool_schemas.sort_by(|left, right| left.function.name.cmp(&right.function.name));
    tool_schemas.dedup_by(|left, right| left.function.name == right.function.name);
    tool_schemas
}

struct DebugLogger {
    enabled: bool,
}

impl DebugLogger {
    fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    fn log_event(&self, session_id: &str, event_type: &str, details: serde_json::Value) {
        if !self.enabled {
            return;
        }

        log::debug!("[{}] {}: {}", session_id, event_type, details);
    }
}

struct Timer {
    name: String,
    start: std::time::Instant,
}

impl Timer {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: std::time::Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    fn debug(&self, session_id: &str) {
        log::debug!(
            "[{}] {} completed in {}ms",
            session_id,
            self.name,
            self.elapsed_ms()
        );
    }
}

#[cfg(test)]
mod tests {
    use agent_core::budget::TokenCounter;
    use agent_core::tools::FunctionSchema;

    use super::*;

    struct Words;

    impl TokenCounter for Words {
        fn count_text(&self, text: &str, _model: &str) -> u32 {
            text.split_whitespace().count() as u32
        }
    }

    fn context(max_sending_tokens: u32) -> ConversationContext {
        // Costs with gpt-4o framing (3 per message, 3 priming): 7, 7, 6, 5.
        let mut context = ConversationContext::new("gpt-4o", max_sending_tokens, Arc::new(Words));
        context.extend([
            Message::user("one two three"),
            Message::assistant("", Some(vec![ToolCall::function("c1", "lookup", "{}")])),
            Message::tool_result("c1", "ok"),
            Message::assistant("done", None),
        ]);
        context
    }

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            schema_type: "function".to_string(),
            function: FunctionSchema {
                name: name.to_string(),
                description: "d".to_string(),
                parameters: serde_json::json!({}),
            },
        }
    }

    #[test]
    fn request_keeps_everything_that_fits() {
        let mut context = context(100);
        let (messages, usage) = prepare_request(&mut context, &[]);

        assert_eq!(messages.len(), 4);
        assert_eq!(usage.total_tokens, 3 + 7 + 7 + 6 + 5);
        assert!(!usage.truncation_occurred());
    }

    #[test]
    fn orphaned_tool_result_is_removed_after_trim() {
        // Budget 12 keeps [tool, assistant]; the tool result lost its call.
        let mut context = context(12);
        let (messages, usage) = prepare_request(&mut context, &[]);

        assert_eq!(messages, vec![Message::assistant("done", None)]);
        assert_eq!(usage.kept_messages, 1);
        assert_eq!(usage.dropped_messages, 3);
        assert_eq!(usage.total_tokens, 3 + 5);
        assert_eq!(context.len(), 4);
    }

    #[test]
    fn tool_definitions_come_off_the_budget() {
        let mut context = context(100);
        let (_, usage) = prepare_request(&mut context, &[schema("lookup")]);
        // The serialized schema has no whitespace: one word.
        assert_eq!(usage.budget_limit, 99);
    }

    #[test]
    fn bead_counts_as_history() {
        let mut context = context(100);
        context.pin_bead_at(Message::system("be brief"), 0);
        let (messages, usage) = prepare_request(&mut context, &[]);

        assert_eq!(messages[0], Message::system("be brief"));
        assert_eq!(usage.kept_messages, 5);
        assert_eq!(usage.dropped_messages, 0);
    }

    #[test]
    fn pinned_user_instruction_does_not_keep_orphan_in_request() {
        // Bead costs 6, leaving 12 for history: [tool, assistant] as above.
        let mut context = context(18);
        context.pin_bead_at(Message::user("standing instruction"), 0);
        let (messages, usage) = prepare_request(&mut context, &[]);

        assert_eq!(
            messages,
            vec![
                Message::user("standing instruction"),
                Message::assistant("done", None),
            ]
        );
        assert_eq!(usage.dropped_messages, 3);
    }

    #[test]
    fn request_never_goes_out_empty_after_tool_round() {
        let mut context = context(10);
        context.pop();
        // Only the tool result fits; its call was cut, so the user turn is sent.
        let (messages, usage) = prepare_request(&mut context, &[]);

        assert_eq!(messages, vec![Message::user("one two three")]);
        assert_eq!(usage.kept_messages, 1);
    }
}
