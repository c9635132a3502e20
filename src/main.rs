//! link-embed main entry point
//!
//! Reads chat messages from stdin, one per line, and writes preview cards to
//! stdout as JSON lines.

use anyhow::{bail, Context};
use clap::Parser;
use link_embed::config::{load_config_with_hash, write_default_config, Config};
use link_embed::preview::JsonLinesSink;
use link_embed::{InboundMessage, MessageId, Orchestrator};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// link-embed: delayed, rate-limited link previews
///
/// Each stdin line is a message whose id is its line number. Two control
/// lines act on earlier messages:
///
///   /embed <id>    the platform attached its own embed to message <id>
///
///   /delete <id>   message <id> was deleted
#[derive(Parser, Debug)]
#[command(name = "link-embed")]
#[command(version = "1.0.0")]
#[command(about = "Delayed, rate-limited link previews", long_about)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and print the effective settings without running
    #[arg(long, conflicts_with = "init")]
    dry_run: bool,

    /// Write a default configuration file to CONFIG and exit
    #[arg(long)]
    init: bool,
}

/// A parsed stdin line
#[derive(Debug, PartialEq, Eq)]
enum InputLine {
    Message(String),
    Embedded(MessageId),
    Deleted(MessageId),
}

impl InputLine {
    fn parse(line: &str) -> Self {
        let control = |prefix: &str| {
            line.strip_prefix(prefix)
                .and_then(|rest| rest.trim().parse::<MessageId>().ok())
        };

        if let Some(id) = control("/embed ") {
            Self::Embedded(id)
        } else if let Some(id) = control("/delete ") {
            Self::Deleted(id)
        } else {
            Self::Message(line.to_string())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the cards
    setup_logging(cli.verbose, cli.quiet);

    if cli.init {
        return handle_init(&cli.config);
    }

    if !cli.config.exists() {
        bail!(
            "Configuration file {} does not exist (create one with --init)",
            cli.config.display()
        );
    }

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_run(config).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("link_embed=info,warn"),
            1 => EnvFilter::new("link_embed=debug,info"),
            2 => EnvFilter::new("link_embed=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --init: writes a default configuration file
fn handle_init(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        bail!("Refusing to overwrite existing {}", path.display());
    }

    write_default_config(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("✓ Wrote default configuration to {}", path.display());
    Ok(())
}

/// Handles --dry-run: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== link-embed Dry Run ===\n");

    println!("Embedding:");
    println!("  Delay: {}s", config.embed.delay_seconds);

    println!("\nCache:");
    println!("  Max entries: {}", config.cache.max_size);
    println!("  TTL: {} min", config.cache.ttl_minutes);

    println!("\nRate limit:");
    println!("  Requests/second: {}", config.rate_limit.requests_per_second);

    println!("\nHTTP:");
    println!("  Timeout: {}ms", config.http.timeout_ms);
    println!("  Max redirects: {}", config.http.max_redirects);
    println!("  User agent: {}", config.http.user_agent);
    println!(
        "  Byte budget: {} -> {} (x{})",
        config.http.initial_range_bytes, config.http.max_html_bytes, config.http.range_growth_factor
    );
    println!(
        "  Block private addresses: {}",
        config.http.block_private_addresses
    );

    println!("\nWorkers:");
    println!(
        "  Concurrency: {}",
        config.workers.effective_concurrency()
    );
    println!("  I/O drivers: {}", config.workers.io_drivers);

    println!("\nImage proxy:");
    if config.image_proxy.enabled {
        println!("  Base: {}", config.image_proxy.base);
        println!("  Hosts: {}", config.image_proxy.hosts.join(", "));
    } else {
        println!("  Disabled");
    }

    println!("\n✓ Configuration is valid");
}

/// Feeds stdin into the pipeline until EOF or Ctrl-C
async fn handle_run(config: Config) -> anyhow::Result<()> {
    let sink = Arc::new(JsonLinesSink::new(std::io::stdout()));
    let orchestrator =
        Orchestrator::new(&config, sink).context("Failed to start the preview pipeline")?;

    let interrupted = tokio::select! {
        result = feed_stdin(&orchestrator) => {
            result?;
            tracing::info!("Input closed, waiting for pending previews");
            tokio::select! {
                _ = orchestrator.wait_idle() => false,
                _ = tokio::signal::ctrl_c() => true,
            }
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        tracing::warn!("Interrupted, discarding pending previews");
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Reads stdin on a dedicated thread so a pending read never holds up exit
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn feed_stdin(orchestrator: &Orchestrator) -> anyhow::Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut line_number: MessageId = 0;

    while let Some(line) = lines.recv().await {
        let line = line.context("Failed to read stdin")?;
        line_number += 1;
        match InputLine::parse(&line) {
            InputLine::Message(content) => {
                orchestrator.on_message(&InboundMessage::new(line_number, content))?;
            }
            InputLine::Embedded(id) => orchestrator.on_message_updated(&InboundMessage {
                has_embeds: true,
                ..InboundMessage::new(id, String::new())
            }),
            InputLine::Deleted(id) => orchestrator.on_message_deleted(id),
        }
    }

    Ok(())
}
