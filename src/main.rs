use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use namesearch_session::config::{load_config, print_schema};
use namesearch_session::models::Session;
use namesearch_session::startup;
use namesearch_session::utils::fingerprint;
use namesearch_session::utils::logger::init_logging;

#[derive(Parser, Debug)]
#[command(name = "namesearch-session", about = "Name-search session manager")]
struct Cli {
    #[arg(long, env = "NAMESEARCH_CONFIG", default_value = "./config.yaml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the configuration JSON schema.
    Schema,
    /// Initialize the session and print its state.
    Status,
    /// Sign in and persist the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "NAMESEARCH_PASSWORD")]
        password: String,
    },
    /// Clear the persisted session and notify the server.
    Logout,
    /// Follow session changes made by other instances until interrupted.
    Watch,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Command::Schema = cli.command {
        if let Err(e) = print_schema() {
            eprintln!("Failed to render schema: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let config = match load_config(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let manager = match startup::run(config).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("Failed to start session manager: {}", e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Command::Schema => {}
        Command::Status => print_session(&manager.snapshot()),
        Command::Login { email, password } => {
            if let Err(e) = manager.login(&email, &password).await {
                error!("Login failed: {}", e);
                std::process::exit(1);
            }
            print_session(&manager.snapshot());
        }
        Command::Logout => {
            if let Some(notification) = manager.logout() {
                let _ = notification.await;
            }
            print_session(&manager.snapshot());
        }
        Command::Watch => {
            manager.on_unauthenticated(|| info!("Session ended"));
            let mut changes = manager.watch();
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let session = changes.borrow_and_update().clone();
                        print_session(&session);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }
}

fn print_session(session: &Session) {
    let user = session
        .user
        .as_ref()
        .map(|u| u.email.as_str())
        .unwrap_or("-");
    let token = session
        .access_token
        .as_deref()
        .map(fingerprint)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "authenticated={} user={} access_token={} initialized={}{}",
        session.is_authenticated,
        user,
        token,
        session.is_initialized,
        session
            .error
            .as_ref()
            .map(|e| format!(" error=\"{}\"", e))
            .unwrap_or_default()
    );
}
