use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use context_gate::{
    api,
    config::Config,
    db::{self, SessionStore},
    error::ContextError,
    mcp,
    review::StdinReviewer,
    workflow::{ContextWorkflow, RunOutcome},
};

#[derive(Parser)]
#[command(name = "ctxg")]
#[command(about = "Detect project context, confirm it with a human, and remember it per session")]
struct Cli {
    /// Session database path (overrides config and CONTEXT_GATE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Start MCP server via stdio
    Mcp,
    /// Detect the context of a description and print it as JSON
    Detect {
        #[arg(required = true)]
        description: Vec<String>,
    },
    /// Detect, review interactively and store the approved context
    Review {
        #[arg(short, long)]
        session: String,

        /// Omit to review the session's stored context
        description: Vec<String>,
    },
    /// Print a session's stored context as JSON
    Show { session: String },
    /// Print a session's approved-context history as JSON
    History { session: String },
    /// List stored sessions
    Sessions,
    /// Reopen review of a stored context if the message contains a trigger phrase
    Reopen {
        #[arg(short, long)]
        session: String,

        #[arg(required = true)]
        message: Vec<String>,
    },
}

/// Initialize tracing with output to stderr (MCP and interactive modes) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "context_gate=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // stdout carries the MCP protocol or the review prompt
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_db(config: &Config) -> anyhow::Result<db::Database> {
    let db = db::Database::from_config(&config.store)?;
    db.migrate()?;
    Ok(db)
}

async fn serve(config: &Config, host: &str, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting context-gate server on {}:{}", host, port);

    let db = open_db(config)?;
    let store: Arc<dyn SessionStore> = Arc::new(db.clone());
    let workflow = ContextWorkflow::from_config(config, store);
    let app = api::create_router(
        api::AppState::new(db, workflow),
        api::SecurityConfig::from_env(),
    );

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    tracing::info!("context-gate server listening on http://{}:{}", host, port);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Cancellation flag raised by ctrl-c.
fn ctrl_c_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_outcome(outcome: RunOutcome) -> anyhow::Result<()> {
    match outcome {
        RunOutcome::Approved(session) => {
            println!("\nApproved and saved for session '{}'.", session.session_id);
            println!("{}", serde_json::to_string_pretty(&session.context)?);
        }
        RunOutcome::Cancelled => {
            println!("\nReview cancelled; nothing was saved.");
        }
    }
    Ok(())
}

fn report(e: ContextError) -> anyhow::Error {
    eprintln!("{}", e.user_message());
    e.into()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = !matches!(cli.command, None | Some(Commands::Serve { .. }));
    init_tracing(use_stderr);

    let mut config = Config::load();
    if let Some(path) = cli.db {
        config.store.database_path = Some(path);
    }

    match cli.command {
        Some(Commands::Serve { port, host }) => serve(&config, &host, port).await?,
        None => serve(&config, "127.0.0.1", 3000).await?,
        Some(Commands::Mcp) => {
            let db = open_db(&config)?;
            let store: Arc<dyn SessionStore> = Arc::new(db.clone());
            let workflow = ContextWorkflow::from_config(&config, store);

            mcp::run_stdio_server(db, workflow).await?;
        }
        Some(Commands::Detect { description }) => {
            let store: Arc<dyn SessionStore> = Arc::new(db::Database::open_memory()?);
            let workflow = ContextWorkflow::from_config(&config, store);
            let detection = workflow
                .detector()
                .detect_or_fallback(&description.join(" "))
                .await
                .map_err(report)?;
            println!("{}", serde_json::to_string_pretty(&detection)?);
        }
        Some(Commands::Review {
            session,
            description,
        }) => {
            let db = open_db(&config).map_err(|e| report(ContextError::Storage(e.to_string())))?;
            let workflow = ContextWorkflow::from_config(&config, Arc::new(db));
            let description = description.join(" ");
            let description = Some(description.as_str()).filter(|d| !d.trim().is_empty());

            let mut reviewer = StdinReviewer::new();
            let mut cancel = ctrl_c_signal();
            let outcome = workflow
                .run(&session, description, &mut reviewer, Some(&mut cancel))
                .await
                .map_err(report)?;
            print_outcome(outcome)?;
        }
        Some(Commands::Reopen { session, message }) => {
            let db = open_db(&config).map_err(|e| report(ContextError::Storage(e.to_string())))?;
            let workflow = ContextWorkflow::from_config(&config, Arc::new(db));

            let mut reviewer = StdinReviewer::new();
            let mut cancel = ctrl_c_signal();
            match workflow
                .run_reopened(&session, &message.join(" "), &mut reviewer, Some(&mut cancel))
                .await
                .map_err(report)?
            {
                Some(outcome) => print_outcome(outcome)?,
                None => println!("No refinement trigger for session '{}'.", session),
            }
        }
        Some(Commands::Show { session }) => {
            let db = open_db(&config)?;
            match db.get_session(&session)? {
                Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                None => {
                    eprintln!("No approved context for session '{}'.", session);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::History { session }) => {
            let db = open_db(&config)?;
            let history = db.get_history(&session)?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Some(Commands::Sessions) => {
            let db = open_db(&config)?;
            for summary in db.list_sessions()? {
                println!(
                    "{}\t{}\t{}\t{}\t{} approvals\t{}",
                    summary.session_id,
                    summary.domain,
                    summary.intent,
                    summary.complexity,
                    summary.history_len,
                    summary.updated_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}
