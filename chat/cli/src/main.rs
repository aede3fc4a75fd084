//! Ollama Chat - Terminal Chat Surface
//!
//! A line-oriented front end over `chat-core`. Type a message to send it,
//! watch the answer stream in, and use slash commands to manage models and
//! the conversation.
//!
//! # Usage
//!
//! ```bash
//! # Local Ollama on the default port
//! ollama-chat
//!
//! # Through a relay, with a specific model
//! ollama-chat --base-url http://localhost:3001 --model llama3.2
//!
//! # With verbose logging (written to stderr)
//! RUST_LOG=debug ollama-chat
//! ```
//!
//! # Environment Variables
//!
//! - `OLLAMA_CHAT_BASE_URL`: Server or relay base URL
//! - `OLLAMA_HOST` / `OLLAMA_PORT`: Server host and port
//! - `OLLAMA_CHAT_MODEL`: Model to select on start
//! - `OLLAMA_CHAT_CONFIG`: Configuration file path
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): Stop the answer being streamed; at the prompt, exit

mod commands;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use chat_core::{
    default_config_path, load_config_from_path, ChatController, ChatTransport, ConfigOverrides,
    OllamaTransport, PendingGeneration, SessionOutcome,
};

use commands::{Command, HELP};

/// Ollama Chat - Stream answers from a local model in your terminal
#[derive(Parser, Debug)]
#[command(name = "ollama-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the Ollama server or relay
    #[arg(short = 'u', long, value_name = "URL")]
    base_url: Option<String>,

    /// Model to select on start
    #[arg(short = 'm', long, value_name = "MODEL")]
    model: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "OLLAMA_CHAT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-attempt connection deadline in milliseconds
    #[arg(long, value_name = "MS")]
    connect_timeout_ms: Option<u64>,

    /// Connection retries before giving up
    #[arg(long, value_name = "N")]
    max_retries: Option<u32>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(url) = &self.base_url {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(model) = &self.model {
            overrides = overrides.with_default_model(model.clone());
        }
        if let Some(ms) = self.connect_timeout_ms {
            overrides = overrides.with_connect_timeout_ms(ms);
        }
        if let Some(n) = self.max_retries {
            overrides = overrides.with_max_retries(n);
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they never interleave with streamed tokens
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_cli=info".parse()?)
                .add_directive("chat_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        base_url = %config.base_url,
        source = %config.source(),
        "Configuration loaded"
    );

    let transport = OllamaTransport::from_config(&config);
    let mut chat = ChatController::new(transport);
    if let Some(model) = &config.default_model {
        chat = chat.with_preferred_model(model.clone());
    }

    match chat.refresh_models().await {
        Ok(models) if models.is_empty() => {
            println!("Connected, but no models are installed. Try `ollama pull llama3.2`.");
        }
        Ok(_) => {
            if let Some(model) = chat.selected_model() {
                println!("Connected to {} using {model}.", config.base_url);
            }
        }
        Err(e) => println!("{e} ({})", config.base_url),
    }
    chat.clear_error();
    println!("Type /help for commands.");

    run_repl(&mut chat).await
}

/// Read lines from stdin until `/quit`, EOF or Ctrl-C at the prompt
async fn run_repl(chat: &mut ChatController<OllamaTransport>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt(chat)?;
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let failure = match Command::parse(&line) {
            Command::Empty => None,
            Command::Quit => break,
            Command::Help => {
                println!("{HELP}");
                None
            }
            Command::Models => {
                print_models(chat);
                None
            }
            Command::Model(name) => match chat.select_model(&name) {
                Ok(()) => {
                    println!("Now using {name}.");
                    None
                }
                Err(e) => {
                    println!("Use /models to list what is available.");
                    Some(e)
                }
            },
            Command::Refresh => match chat.refresh_models().await {
                Ok(models) => {
                    println!("{} model(s) available.", models.len());
                    None
                }
                Err(e) => Some(e),
            },
            Command::Regenerate => match chat.start_regenerate() {
                Ok(pending) => {
                    stream_answer(pending).await;
                    None
                }
                Err(e) => Some(e),
            },
            Command::Clear => {
                chat.clear();
                println!("Conversation cleared.");
                None
            }
            Command::Status => {
                print_status(chat);
                None
            }
            Command::Send(text) => match chat.start_send(&text) {
                Ok(pending) => {
                    stream_answer(pending).await;
                    None
                }
                Err(e) => Some(e),
            },
            Command::MissingArgument(name) => {
                println!("Usage: /{name} <name>");
                None
            }
            Command::Unknown(name) => {
                println!("Unknown command /{name}. Type /help.");
                None
            }
        };

        // Errors from the command itself win over the controller's error slot
        if let Some(error) = failure.or_else(|| chat.last_error().cloned()) {
            eprintln!("error: {error}");
        }
        chat.clear_error();
    }

    Ok(())
}

fn prompt<T: ChatTransport>(chat: &ChatController<T>) -> Result<()> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}> ", chat.selected_model().unwrap_or("no model"))?;
    stdout.flush()?;
    Ok(())
}

/// Stream one answer to stdout; Ctrl-C cancels it
async fn stream_answer<T: ChatTransport>(pending: PendingGeneration<'_, T>) {
    let handle = pending.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    let report = pending
        .run(|token| {
            if let Err(e) = write!(stdout, "{token}").and_then(|()| stdout.flush()) {
                warn!(error = %e, "Failed to write token");
            }
        })
        .await;
    interrupt.abort();

    match report.outcome {
        SessionOutcome::Completed => println!(),
        SessionOutcome::Cancelled => println!(" [stopped]"),
        SessionOutcome::Failed(_) => {
            if report.fragments > 0 {
                println!();
            }
        }
    }
}

fn print_models<T: ChatTransport>(chat: &ChatController<T>) {
    if chat.models().is_empty() {
        println!("No models. Use /refresh once the server is running.");
        return;
    }
    for model in chat.models() {
        let marker = if chat.selected_model() == Some(model.name.as_str()) {
            '*'
        } else {
            ' '
        };
        let details: Vec<String> = [model.display_size(), model.parameter_size.clone()]
            .into_iter()
            .flatten()
            .collect();
        if details.is_empty() {
            println!("{marker} {}", model.name);
        } else {
            println!("{marker} {} ({})", model.name, details.join(", "));
        }
    }
}

fn print_status(chat: &ChatController<OllamaTransport>) {
    println!("Server:   {}", chat.transport().base_url());
    println!("Model:    {}", chat.selected_model().unwrap_or("(none)"));
    println!("Models:   {}", chat.models().len());
    println!("Messages: {}", chat.conversation().len());
}
