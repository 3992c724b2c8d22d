use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::signal;

use tvdiag_admin::config::Config;
use tvdiag_admin::db::Database;
use tvdiag_admin::error::Result;
use tvdiag_admin::interfaces::resource::Resource;
use tvdiag_admin::users::{CreateUser, UserStore};
use tvdiag_admin::validation::Validate;

#[derive(Parser, Debug)]
#[command(name = "tvdiag-admin")]
#[command(about = "Administration API for the set-top-box diagnostic platform")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TVDIAG_GIT_SHA"), ")"))]
struct Cli {
    /// JSON config file; TVDIAG_* environment variables override it.
    #[arg(long, global = true, env = "TVDIAG_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default).
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Create an account, typically the first admin.
    CreateUser {
        #[arg(long)]
        username: String,

        #[arg(long)]
        email: String,

        #[arg(long, env = "TVDIAG_NEW_USER_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long, default_value = "admin")]
        role: String,
    },
    /// Apply pending database migrations and exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    tvdiag_admin::logging::init_tracing(config.log_filter.as_deref());
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let command = cli.command.unwrap_or(Command::Serve {
        host: None,
        port: None,
    });
    if let Command::Serve { host, port } = &command {
        if let Some(host) = host {
            config.host = host.clone();
        }
        if let Some(port) = port {
            config.port = *port;
        }
    }
    config.validate()?;

    match command {
        Command::Serve { .. } => {
            tvdiag_admin::api::run_with_shutdown(config, shutdown_signal()).await
        }
        Command::CreateUser {
            username,
            email,
            password,
            role,
        } => {
            let input = CreateUser {
                username,
                email,
                password,
                display_name: None,
                role: Some(role),
                permissions: None,
                preferences: None,
            };
            input.validate()?;
            let db = Database::open(&config.db_path).await?;
            let user = UserStore::new(db).create(input).await?;
            println!("Created user {} (id {}, role {})", user.username, user.id, user.role);
            Ok(())
        }
        Command::Migrate => {
            let db = Database::open(&config.db_path).await?;
            db.ping().await?;
            println!("Database ready at {}", db.path());
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                tracing::info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
