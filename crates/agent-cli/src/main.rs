mod config;
mod display;
mod logging;
mod tools;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use agent_core::budget::{ConversationContext, ModelLimitsRegistry, TiktokenCounter};
use agent_core::tools::ToolRegistry;
use agent_core::Message;
use agent_llm::providers::openai::DEFAULT_MODEL;
use agent_llm::{LLMProvider, OpenAIProvider};
use agent_loop::{run_agent_loop, AgentLoopConfig, StopReason};

use crate::config::Config;
use crate::display::{print_events, StdoutSink};
use crate::tools::CurrentTimeTool;

#[derive(Parser)]
#[command(name = "agent-cli")]
#[command(about = "Token-budgeted chat with tool calling")]
#[command(version)]
struct Cli {
    /// Model name, overrides the config file
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible base URL
    #[arg(long)]
    api_base: Option<String>,

    /// Token budget for the history sent with each request
    #[arg(long)]
    max_sending_tokens: Option<u32>,

    #[arg(long)]
    max_output_tokens: Option<u32>,

    /// System prompt, kept in every request
    #[arg(long)]
    system: Option<String>,

    #[arg(long, default_value_t = 50)]
    max_rounds: usize,

    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive chat
    Chat,
    /// Send a single message
    Send {
        /// Message content
        message: String,
    },
}

impl Cli {
    fn apply_to(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.model = Some(model.clone());
        }
        if let Some(api_base) = &self.api_base {
            config.api_base = Some(api_base.clone());
        }
        if let Some(tokens) = self.max_sending_tokens {
            config.max_sending_tokens = Some(tokens);
        }
        if let Some(tokens) = self.max_output_tokens {
            config.max_output_tokens = Some(tokens);
        }
        if let Some(system) = &self.system {
            config.system_prompt = Some(system.clone());
        }
    }
}

/// Everything a conversation needs between user messages.
struct ChatSession {
    id: String,
    context: ConversationContext,
    llm: Arc<dyn LLMProvider>,
    tools: Arc<ToolRegistry>,
    max_rounds: usize,
    max_output_tokens: Option<u32>,
    debug: bool,
}

impl ChatSession {
    async fn send(&mut self, message: String) -> anyhow::Result<()> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let printer = tokio::spawn(print_events(event_rx, self.debug));

        let cancel_token = CancellationToken::new();
        let ctrl_c = {
            let token = cancel_token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
            })
        };

        let config = AgentLoopConfig {
            max_rounds: self.max_rounds,
            max_output_tokens: self.max_output_tokens,
            session_id: self.id.clone(),
            skip_initial_user_message: false,
        };

        let mut sink = StdoutSink::default();
        let result = run_agent_loop(
            &mut self.context,
            message,
            &mut sink,
            event_tx,
            self.llm.clone(),
            self.tools.clone(),
            cancel_token,
            config,
        )
        .await;

        ctrl_c.abort();
        let _ = printer.await;

        let outcome = result?;
        match outcome.stop {
            StopReason::Completed => {}
            StopReason::ToolFailed => {
                println!("{}", "⚠️  A tool failed; results were not sent back".yellow())
            }
            StopReason::MaxRounds => println!(
                "{}",
                format!("⚠️  Stopped after {} rounds", outcome.rounds).yellow()
            ),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.debug);

    let mut config = Config::load();
    cli.apply_to(&mut config);

    let api_key = config
        .api_key
        .clone()
        .context("no API key: set API_KEY or api_key in ~/.agent-cli/config.json")?;
    let model = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    let mut provider = OpenAIProvider::new(api_key).with_model(&model);
    if let Some(api_base) = &config.api_base {
        provider = provider.with_base_url(api_base);
    }

    let mut limits = ModelLimitsRegistry::new();
    if let Err(error) = limits.load_user_config().await {
        log::warn!("Could not load model limits: {}", error);
    }

    let mut context = ConversationContext::for_model(&model, &limits, TiktokenCounter::shared());
    if let Some(tokens) = config.max_sending_tokens {
        context.set_max_sending_tokens(tokens);
    }
    if let Some(prompt) = &config.system_prompt {
        context.pin_bead(Message::system(prompt.clone()));
    }

    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(CurrentTimeTool)
        .context("registering builtin tools")?;

    let mut session = ChatSession {
        id: uuid::Uuid::new_v4().to_string(),
        context,
        llm: Arc::new(provider),
        tools,
        max_rounds: cli.max_rounds,
        max_output_tokens: config.max_output_tokens,
        debug: cli.debug,
    };

    if cli.debug {
        eprintln!(
            "{}",
            format!(
                "[DEBUG] Model {} with sending budget {} tokens",
                model,
                session.context.max_sending_tokens()
            )
            .dimmed()
        );
    }

    match cli.command {
        Commands::Send { message } => session.send(message).await,
        Commands::Chat => run_interactive_chat(&mut session).await,
    }
}

async fn run_interactive_chat(session: &mut ChatSession) -> anyhow::Result<()> {
    println!("{}", "🤖 Agent Interactive Chat".cyan().bold());
    println!("{}", format!("Session ID: {}", session.id).dimmed());
    println!("{}", "Type 'exit' or 'quit' to leave".dimmed());
    println!();

    loop {
        print!("{} ", "You:".cyan().bold());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("{}", "👋 Goodbye!".cyan());
            break;
        }

        if input.is_empty() {
            continue;
        }

        println!("{}", "Assistant:".green().bold());

        if let Err(e) = session.send(input.to_string()).await {
            println!("{}", format!("❌ Error: {}", e).red());
        }

        println!();
    }

    Ok(())
}
