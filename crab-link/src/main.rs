//! # crab-link CLI
//!
//! Manage known printers and send test jobs from a terminal.
//!
//! ```bash
//! # Register a network printer (port defaults to 9100)
//! crab-link register network 192.168.1.50 --name Kitchen
//!
//! # Print on every printer that reconnects
//! crab-link print --text "Order #42"
//!
//! # Go through the print relay instead of opening sockets directly
//! crab-link --relay print --text "Order #42"
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use crab_link::{
    JsonFileStore, LinkConfig, NoPicker, PrinterManager, RedbStore, SnapshotStore, logger,
};
use crab_printer::{NetworkTransport, PrintPayload, ProxyTransport, ReceiptDocument};
use shared::models::PrinterKind;
use std::path::PathBuf;
use std::sync::Arc;

/// crab-link - receipt printer link manager
#[derive(Parser, Debug)]
#[command(name = "crab-link")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the printer snapshot
    #[arg(long, env = "LINK_STORE_DIR", default_value = "./work_dir/printers")]
    store: PathBuf,

    /// Keep the snapshot in a redb database instead of JSON files
    #[arg(long)]
    redb: bool,

    /// Send network jobs through the print relay (LINK_RELAY_URL)
    #[arg(long)]
    relay: bool,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List known printers
    List,
    /// Add a printer by address
    Register {
        /// radio | network | serial
        kind: PrinterKind,
        address: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Open a link to one printer
    Connect { id: String },
    /// Reconnect every printer without prompting
    Reconnect,
    /// Reconnect, then print a test receipt or text
    Print {
        /// Only this printer (default: every connected printer)
        #[arg(long)]
        id: Option<String>,
        /// Plain text instead of the test receipt
        #[arg(long)]
        text: Option<String>,
    },
    /// Remove a printer
    Forget { id: String },
    /// Counts by status and rolling metrics
    Status,
}

fn open_store(cli: &Cli) -> anyhow::Result<Arc<dyn SnapshotStore>> {
    if cli.redb {
        std::fs::create_dir_all(&cli.store)?;
        let store = RedbStore::open(cli.store.join("printers.redb"))
            .context("failed to open redb snapshot store")?;
        Ok(Arc::new(store))
    } else {
        let store = JsonFileStore::open(&cli.store).context("failed to open snapshot directory")?;
        Ok(Arc::new(store))
    }
}

fn build_manager(cli: &Cli, config: LinkConfig) -> anyhow::Result<PrinterManager> {
    let store = open_store(cli)?;
    let mut builder = PrinterManager::builder(config.clone(), store).picker(Arc::new(NoPicker));

    builder = if cli.relay {
        builder.transport(Arc::new(ProxyTransport::with_timeout(
            config.relay_url.clone(),
            config.link_timeout,
        )?))
    } else {
        builder.transport(Arc::new(
            NetworkTransport::new().with_timeout(config.reachability_timeout),
        ))
    };

    #[cfg(feature = "serial")]
    {
        builder = builder.transport(Arc::new(crab_printer::SerialTransport::new(9600)));
    }

    Ok(builder.build()?)
}

fn test_receipt() -> ReceiptDocument {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    ReceiptDocument::new()
        .title("CRAB LINK")
        .separator()
        .pair("Test print", now)
        .text("链路正常")
        .separator()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    logger::init_logger_with_file(&cli.log_level, false, cli.log_dir.as_deref())?;

    let config = LinkConfig::from_env();
    let manager = build_manager(&cli, config)?;

    match &cli.command {
        Commands::List => {
            for printer in manager.printers() {
                println!(
                    "{}  {:<14} {:<24} {}",
                    printer.id, printer.kind, printer.address, printer.name
                );
            }
        }
        Commands::Register {
            kind,
            address,
            name,
        } => {
            let name = name.clone().unwrap_or_else(|| address.clone());
            let printer = manager.register(*kind, address, &name)?;
            println!("Registered {} ({})", printer.name, printer.id);
        }
        Commands::Connect { id } => match manager.connect(id, false).await {
            Ok(outcome) => println!("Connected: {}", outcome.is_connected()),
            Err(e) if e.is_connection_error() => {
                eprintln!("Could not reach the printer: {}", e);
                eprintln!("Check that it is powered on and in range, then retry.");
                manager.shutdown().await;
                std::process::exit(2);
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Reconnect => {
            for outcome in manager.reconnect_all().await {
                match outcome.error {
                    Some(e) => println!("✗ {}: {}", outcome.name, e),
                    None => println!("✓ {}", outcome.name),
                }
            }
        }
        Commands::Print { id, text } => {
            let payload = match text {
                Some(text) => PrintPayload::from(text.as_str()),
                None => PrintPayload::from(test_receipt()),
            };
            match id {
                Some(id) => {
                    manager.connect(id, false).await?;
                    let report = manager.print_one(id, &payload).await?;
                    println!("Sent {} bytes in {} chunk(s)", report.bytes, report.chunks);
                }
                None => {
                    manager.reconnect_all().await;
                    for outcome in manager.print_all(&payload).await? {
                        match outcome.error {
                            Some(e) => println!("✗ {}: {}", outcome.name, e),
                            None => println!("✓ {}", outcome.name),
                        }
                    }
                }
            }
        }
        Commands::Forget { id } => {
            manager.forget(id).await?;
            println!("Forgot {}", id);
        }
        Commands::Status => {
            let summary = manager.status_summary();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    manager.shutdown().await;
    Ok(())
}
