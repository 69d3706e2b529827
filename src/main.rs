//! # PDF Chat CLI (`pdf-chat`)
//!
//! ## Usage
//!
//! ```bash
//! pdf-chat --config ./config/pdf-chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdf-chat serve` | Start the HTTP API |
//! | `pdf-chat sessions [--user ID]` | Print the session registry |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pdf_chat::config;
use pdf_chat::observability::{init_tracing, TracingConfig};
use pdf_chat::server;
use pdf_chat::sessions::SessionRegistry;

/// PDF Chat: upload PDFs and ask questions about them.
#[derive(Parser)]
#[command(name = "pdf-chat", version, about = "Chat with your PDFs over an HTTP API")]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file is fine; every setting has a default and secrets
    /// come from the environment.
    #[arg(long, global = true, default_value = "./config/pdf-chat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// List sessions in the registry as `session_id<TAB>user_id<TAB>filename`.
    Sessions {
        /// Only sessions owned by this user id.
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&TracingConfig::default());

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Sessions { user } => {
            let registry = SessionRegistry::load(cfg.sessions.path.clone())?;
            let sessions = match user.as_deref() {
                Some(user_id) => registry.list_for_user(user_id),
                None => registry.list(),
            };
            for s in &sessions {
                println!("{}\t{}\t{}", s.session_id, s.user_id, s.filename);
            }
            println!("total: {}", sessions.len());
        }
    }

    Ok(())
}
