use std::io::{self, Write};

use colored::Colorize;
use tokio::sync::mpsc;

use agent_core::AgentEvent;
use agent_loop::DisplaySink;

/// Writes user-visible text straight to stdout as it arrives.
#[derive(Debug, Default)]
pub struct StdoutSink {
    wrote: bool,
}

impl DisplaySink for StdoutSink {
    fn append(&mut self, chunk: &str) {
        print!("{}", chunk.green());
        let _ = io::stdout().flush();
        self.wrote = true;
    }

    fn end(&mut self) {
        if self.wrote {
            println!();
        }
        self.wrote = false;
    }
}

/// Print loop notifications to stderr until the sender is dropped.
pub async fn print_events(mut event_rx: mpsc::Receiver<AgentEvent>, debug: bool) {
    while let Some(event) = event_rx.recv().await {
        match event {
            AgentEvent::ToolStart {
                tool_name,
                arguments,
                ..
            } => {
                eprintln!("{}", format!("🔧 Executing tool: {}", tool_name).yellow());
                if debug {
                    eprintln!("{}", format!("   Args: {}", arguments).dimmed());
                }
            }
            AgentEvent::ToolComplete { result, .. } => {
                let line = format!("   Result: {}", result.result);
                if result.success {
                    eprintln!("{}", line.dimmed());
                } else {
                    eprintln!("{}", line.red());
                }
            }
            AgentEvent::ToolError { error, .. } => {
                eprintln!("{}", format!("❌ Tool error: {}", error).red());
            }
            AgentEvent::ToolSkipped {
                tool_name, reason, ..
            } => {
                eprintln!(
                    "{}",
                    format!("⚠️  Skipped {}: {}", tool_name, reason).yellow()
                );
            }
            AgentEvent::TokenBudgetUpdated { usage } => {
                if usage.truncation_occurred() || debug {
                    eprintln!(
                        "{}",
                        format!(
                            "[budget] {} tokens in {} messages, {} left out (limit {})",
                            usage.total_tokens,
                            usage.kept_messages,
                            usage.dropped_messages,
                            usage.budget_limit
                        )
                        .dimmed()
                    );
                }
            }
            AgentEvent::Complete { usage } => {
                if debug {
                    eprintln!(
                        "{}",
                        format!(
                            "[DEBUG] prompt {} tokens, {} chunks, {} tool calls",
                            usage.prompt_tokens, usage.completion_chunks, usage.tool_calls
                        )
                        .dimmed()
                    );
                }
            }
            AgentEvent::Error { message } => {
                eprintln!("{}", format!("❌ Error: {}", message).red());
            }
        }
    }
}
