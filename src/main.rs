//! DocAssist command line
//!
//! Reads commands from stdin, prints answers to stdout and progress to stderr.

use std::io::Write;

use docassist::app::{App, AppError, Command, Outcome};
use docassist::storage::ProfileStore;
use docassist::system::devices::log_devices;
use docassist::types::config::EngineConfig;
use docassist::types::notification::Notification;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docassist=info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    log_devices();

    let profiles = ProfileStore::open(ProfileStore::default_path()?);
    let (mut app, notifications) = App::start(profiles, EngineConfig::default())?;
    let printer = tokio::spawn(print_notifications(notifications));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Error reading stdin: {}", e);
                break;
            }
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match app.execute(command) {
            Ok(Outcome::Quit) => break,
            Ok(Outcome::Report(report)) => {
                for line in report {
                    println!("{line}");
                }
            }
            Ok(Outcome::Submitted(_) | Outcome::Done) => {}
            Err(e) => eprintln!("{e}"),
        }
    }

    // Joining the worker blocks until the request in flight finishes
    tokio::task::spawn_blocking(move || app.shutdown()).await??;
    printer.await?;
    Ok(())
}

/// Runs until the worker drops its notifier
async fn print_notifications(mut notifications: UnboundedReceiver<Notification>) {
    let mut answering = false;
    while let Some(notification) = notifications.recv().await {
        if notification.is_answer() {
            print!("{}", notification.text);
            let _ = std::io::stdout().flush();
            answering = true;
        } else {
            if answering {
                println!();
                answering = false;
            }
            eprintln!(
                "[{}] {}",
                notification.timestamp.format("%Y-%m-%d %H:%M:%S"),
                notification.text
            );
        }
    }
}
