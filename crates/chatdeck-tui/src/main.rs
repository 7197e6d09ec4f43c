use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatdeck_core::{Assembler, ChatCompletionsClient, Config, Session, StoreBackend, Turn, TurnOutcome};

mod app;
mod handler;
mod input;
mod tui;
mod ui;

use app::App;
use tui::{EventHandler, Tui};

#[derive(Parser)]
#[command(name = "chatdeck", version)]
#[command(about = "Chat with an LLM from the terminal, keeping every conversation")]
struct Cli {
    /// Model id sent with every request
    #[arg(long, global = true)]
    model: Option<String>,

    /// Where conversations are kept: sqlite, rest or memory
    #[arg(long, global = true)]
    store: Option<StoreBackend>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations (the active one is marked with *)
    List,
    /// Send one message and stream the reply to stdout
    Ask {
        message: String,
        /// Conversation to use instead of the first one
        #[arg(short, long)]
        conversation: Option<String>,
    },
    /// Write a conversation as a plain-text transcript
    Export {
        id: String,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace a conversation's messages with a transcript file
    Import { id: String, file: PathBuf },
}

enum Step {
    Event(tui::AppEvent),
    Fragment(Option<String>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let interactive = cli.command.is_none();
    init_logging(interactive)?;

    let mut config = Config::load()?;
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(store) = cli.store {
        config.store.backend = store;
    }

    let store = config.open_store()?;
    let session = Session::start(store, config.session_settings()).await;

    match cli.command {
        None => run_tui(session, &config).await,
        Some(Commands::List) => {
            list_conversations(&session);
            Ok(())
        }
        Some(Commands::Ask { message, conversation }) => {
            let client = config.completion_client()?;
            ask(session, Assembler::new(Arc::new(client)), &message, conversation.as_deref()).await
        }
        Some(Commands::Export { id, output }) => export(session, &id, output).await,
        Some(Commands::Import { id, file }) => import(session, &id, &file).await,
    }
}

/// The TUI owns the terminal, so its logs go to a file; subcommands log to stderr
fn init_logging(to_file: bool) -> Result<()> {
    let default_level = if to_file { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("CHATDECK_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

    if to_file {
        let log_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?
            .join("chatdeck");
        std::fs::create_dir_all(&log_dir)?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("chatdeck.log"))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
    Ok(())
}

async fn run_tui(session: Session, config: &Config) -> Result<()> {
    // Without a key the TUI still opens for browsing; sends fail as unauthorized
    let (client, startup_error) = match config.completion_client() {
        Ok(client) => (client, None),
        Err(e) => {
            warn!(error = %e, "Starting without an API key");
            (ChatCompletionsClient::new(&config.api_base, "", &config.model), Some(e.to_string()))
        }
    };

    let model = client.model().to_string();
    let mut app = App::new(session, Assembler::new(Arc::new(client)), model);
    if let Some(text) = startup_error {
        app.notify_error(text);
    }

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    info!(model = %config.model, "TUI started");

    let result = run_loop(&mut terminal, &mut app).await;

    tui::restore()?;
    result
}

async fn run_loop(terminal: &mut Tui, app: &mut App) -> Result<()> {
    let mut events = EventHandler::new();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        // Terminal input and the streaming reply are polled together so
        // the screen stays live and Esc can cancel mid-reply
        let step = tokio::select! {
            event = events.next() => match event {
                Some(event) => Step::Event(event),
                None => break,
            },
            fragment = next_fragment(&mut app.turn) => Step::Fragment(fragment),
        };

        match step {
            Step::Event(event) => handler::handle_event(app, event).await?,
            Step::Fragment(Some(_)) => app.on_fragment(),
            Step::Fragment(None) => app.finish_turn().await,
        }
    }
    Ok(())
}

/// Next fragment of the streaming reply; never resolves when nothing is streaming
async fn next_fragment(turn: &mut Option<Turn>) -> Option<String> {
    match turn.as_mut() {
        Some(turn) => turn.next_fragment().await,
        None => std::future::pending().await,
    }
}

fn list_conversations(session: &Session) {
    for id in session.list() {
        let marker = if id == session.active_id() { "*" } else { " " };
        println!("{} {}", marker, id);
    }
}

async fn ask(mut session: Session, assembler: Assembler, message: &str, conversation: Option<&str>) -> Result<()> {
    if let Some(id) = conversation {
        session.select(id).await?;
    }

    let mut stdout = io::stdout();
    let outcome = assembler
        .submit(&mut session, message, |fragment| {
            let _ = write!(stdout, "{}", fragment);
            let _ = stdout.flush();
        })
        .await?;
    println!();

    if let TurnOutcome::Interrupted { partial, error } = outcome {
        let kept = if partial.is_some() { "; the partial reply was saved" } else { "" };
        bail!("{} ({}){}", error, error.kind.hint(), kept);
    }
    Ok(())
}

async fn export(mut session: Session, id: &str, output: Option<PathBuf>) -> Result<()> {
    let text = session.export(id).await?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, format!("{}\n", text)).await?;
            eprintln!("Exported {} to {}", id, path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

async fn import(mut session: Session, id: &str, file: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .map_err(|e| anyhow!("Could not read {}: {}", file.display(), e))?;

    let report = session.import(id, &text).await?;
    for issue in &report.skipped {
        eprintln!("skipped {}", issue);
    }
    println!("Imported {} messages into {}", report.imported, id);
    Ok(())
}
