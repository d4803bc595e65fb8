//! Main Entrypoint for the Workshop Terminal Client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Constructing the orchestrator with its HTTP collaborators.
//! 4. Running either a one-shot question or the interactive loop.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use workshop_client::config::Config;
use workshop_client::render::TerminalRenderer;
use workshop_core::Renderer;
use workshop_core::content::HttpContentSource;
use workshop_core::orchestrator::{ExchangeOutcome, Orchestrator, RequestSettings};
use workshop_core::session::Persona;
use workshop_core::transcript::ExportFormat;
use workshop_core::transport::HttpStreamOpener;

#[derive(Parser)]
#[command(name = "workshop", version, about = "Converse with a simulated thinker")]
struct Cli {
    /// Thinker to address: freud, jung, or kuczynski
    #[arg(short, long, default_value = "freud")]
    persona: String,

    /// Ask one question and exit instead of starting the interactive loop
    #[arg(short, long)]
    question: Option<String>,

    /// Hide the rotating quote and fact feeds
    #[arg(long)]
    no_feeds: bool,
}

async fn ask(orchestrator: &mut Orchestrator, persona: Persona, question: &str) {
    let outcome = orchestrator.submit(persona, question).await;
    match outcome.await {
        Ok(ExchangeOutcome::Completed { citation_ids, .. }) => {
            info!(citations = citation_ids.len(), "Exchange completed");
        }
        Ok(ExchangeOutcome::Errored { message }) => {
            info!(error = %message, "Exchange failed");
        }
        Ok(ExchangeOutcome::Cancelled) | Err(_) => {}
    }
}

async fn export(orchestrator: &Orchestrator, format: ExportFormat) {
    match orchestrator.export_session(format).await {
        Some(content) => {
            let path = format!(
                "workshop-session-{}.{}",
                chrono::Local::now().timestamp_millis(),
                format.extension()
            );
            match std::fs::write(&path, content) {
                Ok(()) => println!("Saved {path}"),
                Err(e) => println!("Could not write {path}: {e}"),
            }
        }
        None => println!("No completed exchanges to export yet."),
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /persona <name>   switch thinker (freud, jung, kuczynski)");
    println!("  /export [md|txt]  save the session transcript");
    println!("  /close            close the panel (stops the feeds)");
    println!("  /quit             exit");
    println!("Anything else is sent to the current thinker as a question.");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(server = %config.server_url, "Configuration loaded");

    // --- 3. Construct the Orchestrator ---
    let mut persona = cli
        .persona
        .parse::<Persona>()
        .map_err(anyhow::Error::msg)?;
    let client = reqwest::Client::new();
    let renderer: Arc<dyn Renderer> = Arc::new(TerminalRenderer::new(!cli.no_feeds));
    let mut orchestrator = Orchestrator::new(
        Arc::new(HttpStreamOpener::new(client.clone(), config.server_url.as_str())),
        Arc::new(HttpContentSource::new(client, config.server_url.as_str())),
        renderer,
    )
    .with_settings(RequestSettings {
        provider: config.provider,
        model: config.model,
        enhanced_mode: config.enhanced_mode,
        answer_length: config.answer_length,
        quote_count: config.quote_count,
    });

    // --- 4. One-shot or Interactive ---
    if let Some(question) = cli.question {
        ask(&mut orchestrator, persona, &question).await;
        orchestrator.close_panel().await;
        return Ok(());
    }

    println!(
        "The Thinker's Workshop - talking to {}",
        persona.display_name()
    );
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        use std::io::Write as _;
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(c, rest)| (c, rest)) {
            ("/quit", _) | ("/exit", _) => break,
            ("/help", _) => print_help(),
            ("/persona", name) => match name.trim().parse::<Persona>() {
                Ok(next) => {
                    persona = next;
                    println!("Now talking to {}.", persona.display_name());
                }
                Err(e) => println!("{e}"),
            },
            ("/export", rest) => {
                let format = match rest.trim() {
                    "txt" => ExportFormat::Plain,
                    _ => ExportFormat::Markdown,
                };
                export(&orchestrator, format).await;
            }
            ("/close", _) => orchestrator.close_panel().await,
            _ => ask(&mut orchestrator, persona, line).await,
        }
    }

    orchestrator.close_panel().await;
    info!("Workshop client shut down");
    Ok(())
}
