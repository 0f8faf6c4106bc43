//! Ledger node binary
//!
//! Single-sequencer ledger node serving the record-book JSON-RPC protocol.

use clap::Parser;
use env_logger::Env;
use filehub::ledger::book::RecordBook;
use filehub::ledger::server;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ledger-server")]
#[command(about = "Append-only record ledger node", long_about = None)]
struct Args {
    /// Bind address (e.g., 127.0.0.1:8551)
    #[arg(short, long, default_value = "127.0.0.1:8551")]
    bind: String,

    /// Record book directory
    #[arg(short, long, default_value = "/var/lib/filehub/ledger")]
    data: PathBuf,

    /// Record store name submissions must be addressed to
    #[arg(short, long, default_value = "filehub")]
    record_store: String,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    log::info!("Starting ledger node");
    log::info!("  Bind address: {}", args.bind);
    log::info!("  Data path:    {:?}", args.data);
    log::info!("  Record store: {}", args.record_store);

    let book = match RecordBook::open(&args.data, args.record_store.clone()) {
        Ok(book) => Arc::new(book),
        Err(e) => {
            log::error!("Failed to open record book: {}", e);
            process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(&args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("Failed to bind {}: {}", args.bind, e);
            process::exit(1);
        }
    };

    if let Err(e) = server::serve(listener, book).await {
        log::error!("Server error: {}", e);
        process::exit(1);
    }
}
