#![deny(unsafe_code)]

//! Colloquy CLI — provider-agnostic chat from the terminal.
//!
//! Drives the core client exactly the way a GUI frontend would: issue a
//! request, then consume the normalized event stream, printing deltas
//! as they arrive.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;
use tracing_subscriber::EnvFilter;

use colloquy_config::AppConfig;
use colloquy_core::{build_info, ChatClient, ChatEvent, ChatRequest};

/// Colloquy — streaming chat client for Dify, OpenAI-compatible, and
/// Ollama backends.
#[derive(Parser)]
#[command(name = "colloquy", version = build_info::version_string(), about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "colloquy.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply.
    Ask {
        /// The message text.
        text: String,

        /// Wait for the complete reply instead of streaming deltas.
        #[arg(long)]
        blocking: bool,

        /// Attach a text file as context (repeatable).
        #[arg(long, value_name = "PATH")]
        file: Vec<PathBuf>,

        /// Override the configured model.
        #[arg(long)]
        model: Option<String>,

        /// Hide reasoning output.
        #[arg(long)]
        no_reasoning: bool,
    },

    /// Interactive chat session.
    Chat {
        /// Override the configured model.
        #[arg(long)]
        model: Option<String>,
    },

    /// Probe the provider for reachability.
    Check,

    /// List the models the provider offers.
    Models,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up tracing subscriber with verbosity level
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            text,
            blocking,
            file,
            model,
            no_reasoning,
        } => cmd_ask(&cli.config, text, blocking, file, model, no_reasoning).await?,
        Commands::Chat { model } => cmd_chat(&cli.config, model).await?,
        Commands::Check => cmd_check(&cli.config).await?,
        Commands::Models => cmd_models(&cli.config).await?,
        Commands::Config { show } => cmd_config(&cli.config, show).await?,
    }

    Ok(())
}

async fn cmd_ask(
    config_path: &Path,
    text: String,
    blocking: bool,
    files: Vec<PathBuf>,
    model: Option<String>,
    no_reasoning: bool,
) -> Result<()> {
    let mut config = load_config(config_path).await?;
    if let Some(model) = model {
        config.provider.model = model;
    }
    if no_reasoning {
        config.provider.show_reasoning = false;
    }
    config.validate()?;

    let mut request = ChatRequest::text(&text);
    for path in &files {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        request = request.with_file_context(name, content);
    }

    let (mut client, mut events) = ChatClient::new(&config)?;
    client.send(&request, !blocking);
    drain_request(&mut events).await
}

async fn cmd_chat(config_path: &Path, model: Option<String>) -> Result<()> {
    let mut config = load_config(config_path).await?;
    if let Some(model) = model {
        config.provider.model = model;
    }
    config.validate()?;

    let (mut client, mut events) = ChatClient::new(&config)?;
    println!(
        "Colloquy {} — {} at {}",
        build_info::version_string(),
        config.provider.kind,
        config.provider.base_url
    );
    println!("Type a message. /new starts a fresh conversation, /quit exits.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/quit" | "/exit" => break,
            "/new" => {
                client.reset_conversation();
                println!("(started a new conversation)");
                continue;
            }
            _ => {}
        }
        client.send(&ChatRequest::text(line), true);
        if let Err(err) = drain_request(&mut events).await {
            eprintln!("error: {err}");
        }
    }
    Ok(())
}

async fn cmd_check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path).await?;
    let (mut client, mut events) = ChatClient::new(&config)?;
    println!(
        "Probing {} at {} ...",
        config.provider.kind, config.provider.base_url
    );
    client.check_connection();
    while let Some(event) = events.recv().await {
        if let ChatEvent::ConnectionResult { ok, message } = event {
            if ok {
                println!("Connection OK.");
                return Ok(());
            }
            anyhow::bail!("{message}");
        }
    }
    anyhow::bail!("client event channel closed")
}

async fn cmd_models(config_path: &Path) -> Result<()> {
    let config = load_config(config_path).await?;
    let (mut client, mut events) = ChatClient::new(&config)?;
    client.fetch_models();
    while let Some(event) = events.recv().await {
        if let ChatEvent::ModelsResult {
            ok,
            models,
            message,
        } = event
        {
            if !ok {
                anyhow::bail!("{message}");
            }
            for model in models {
                println!("{model}");
            }
            return Ok(());
        }
    }
    anyhow::bail!("client event channel closed")
}

async fn cmd_config(config_path: &Path, show: bool) -> Result<()> {
    let config = load_config(config_path).await?;
    if show {
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// Print a request's event stream until it terminates. Reasoning and
/// answer deltas go straight to stdout; the blank line marks the
/// reasoning/answer boundary on providers that signal it.
async fn drain_request(events: &mut UnboundedReceiver<ChatEvent>) -> Result<()> {
    let mut out = std::io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::ReasoningDelta(text) | ChatEvent::AnswerDelta(text) => {
                print!("{text}");
                out.flush()?;
            }
            ChatEvent::AnswerStarted => println!(),
            ChatEvent::StreamEnded => {
                println!();
                return Ok(());
            }
            ChatEvent::AnswerComplete { text, is_error } => {
                if is_error {
                    anyhow::bail!("{text}");
                }
                println!("{text}");
                return Ok(());
            }
            ChatEvent::ToolCallRequested(call) => {
                println!("[tool call requested: {}({})]", call.name, call.arguments);
                return Ok(());
            }
            ChatEvent::ConnectionResult { .. } | ChatEvent::ModelsResult { .. } => {}
        }
    }
    anyhow::bail!("client event channel closed")
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        Ok(AppConfig::load(path).await?)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(AppConfig::default())
    }
}
