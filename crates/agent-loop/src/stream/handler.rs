use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent_core::AgentError;
use agent_llm::{FinishReason, StreamAdapter, StreamDelta};

use super::demux::{DemuxOutput, DemuxSummary, Demultiplexer, ToolCallOutput, UserOutput};

/// Receiving ends of one demultiplexed response plus the task driving it.
///
/// Both receivers close when the task ends, whether it finished, failed or
/// was cancelled.
pub struct DemuxChannels {
    pub to_user: mpsc::UnboundedReceiver<UserOutput>,
    pub tool_calls: mpsc::UnboundedReceiver<ToolCallOutput>,
    pub task: JoinHandle<Result<DemuxSummary, AgentError>>,
}

/// Spawn the task that parses `stream` and fans it out into two channels.
pub fn spawn_demux(
    stream: StreamAdapter,
    cancel_token: CancellationToken,
    session_id: String,
) -> DemuxChannels {
    let (user_tx, user_rx) = mpsc::unbounded_channel();
    let (call_tx, call_rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        consume_llm_stream(stream, &user_tx, &call_tx, &cancel_token, &session_id).await
    });

    DemuxChannels {
        to_user: user_rx,
        tool_calls: call_rx,
        task,
    }
}

pub async fn consume_llm_stream(
    mut stream: StreamAdapter,
    user_tx: &mpsc::UnboundedSender<UserOutput>,
    call_tx: &mpsc::UnboundedSender<ToolCallOutput>,
    cancel_token: &CancellationToken,
    session_id: &str,
) -> Result<DemuxSummary, AgentError> {
    let mut demux = Demultiplexer::new();

    while !demux.is_finished() {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log::debug!("[{}] Stream parsing cancelled", session_id);
                return Err(AgentError::Cancelled);
            }
            next = stream.next() => next,
        };

        let delta = match next {
            Some(Ok(delta)) => delta,
            Some(Err(error)) => {
                log::warn!("[{}] Model stream error: {}", session_id, error);
                return Err(AgentError::LLM(error.to_string()));
            }
            None => {
                log::warn!("[{}] Model stream closed without finish", session_id);
                StreamDelta::Finish(FinishReason::Stop)
            }
        };

        forward(demux.process(delta), user_tx, call_tx);
    }

    let summary = demux.into_summary();
    log::debug!(
        "[{}] Response parsed: {} deltas, {} tool calls, {} dropped, finish {:?}",
        session_id,
        summary.deltas,
        summary.tool_calls,
        summary.dropped_calls,
        summary.finish_reason
    );
    Ok(summary)
}

fn forward(
    output: DemuxOutput,
    user_tx: &mpsc::UnboundedSender<UserOutput>,
    call_tx: &mpsc::UnboundedSender<ToolCallOutput>,
) {
    // A closed receiver only means nobody is listening any more.
    for item in output.to_user {
        let _ = user_tx.send(item);
    }
    for item in output.tool_calls {
        let _ = call_tx.send(item);
    }
}
