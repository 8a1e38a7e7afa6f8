//! TellDB benchmark harness
//!
//! Usage:
//!   telldb-bench --commit-manager HOST --server HOST
//!
//! Without a server address the harness drives a smoke workload against the
//! in-process store.

use std::process::exit;
use std::sync::Arc;

use clap::Parser;

use telldb::commit_manager::{LocalCommitManager, TransactionType};
use telldb::data::{Field, FieldType, Schema, TableType, Tuple};
use telldb::store::MemoryStore;
use telldb::txn::ClientContext;

/// Client configuration, parsed from the command line
#[derive(Parser, Debug)]
#[command(name = "telldb-bench")]
#[command(about = "TellDB transactional layer benchmark")]
#[command(version)]
struct ClientConfig {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Commit manager host
    #[arg(short, long)]
    commit_manager: Option<String>,

    /// Storage server host
    #[arg(short, long)]
    server: Option<String>,

    /// Scan memory in bytes
    #[arg(short = 'm', long = "memory", default_value_t = 1024 * 1024 * 1024)]
    scan_memory: u64,

    /// Number of network threads
    #[arg(long, default_value_t = 2)]
    network_threads: usize,
}

fn main() {
    let config = match ClientConfig::try_parse() {
        Ok(config) => config,
        Err(err) => {
            let is_usage = !err.use_stderr();
            let _ = err.print();
            // argument errors exit 1, --help / --version exit 0
            exit(if is_usage { 0 } else { 1 });
        }
    };

    env_logger::Builder::new()
        .parse_filters(&config.log_level)
        .init();

    log::info!("Starting TellDB benchmark");
    log::info!("--- Commit Manager: {}", config.commit_manager.as_deref().unwrap_or("<local>"));
    log::info!("--- Server: {}", config.server.as_deref().unwrap_or("<local>"));
    log::info!("--- Network Threads: {}", config.network_threads);
    log::info!(
        "--- Scan Memory: {:.2}GB",
        config.scan_memory as f64 / (1024.0 * 1024.0 * 1024.0)
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.network_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {}", err);
            exit(1);
        }
    };

    if let Err(err) = runtime.block_on(smoke_workload()) {
        log::error!("benchmark failed: {}", err);
        exit(1);
    }

    log::info!("Exiting TellDB benchmark");
}

/// A small transactional workload against the in-process store
async fn smoke_workload() -> telldb::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let commit_manager = Arc::new(LocalCommitManager::new());
    let context = ClientContext::new(store.clone(), commit_manager).await?;

    let mut schema = Schema::new(TableType::Transactional);
    schema.add_field(FieldType::BigInt, "id", true);
    let name = schema.add_field(FieldType::Text, "name", false);
    schema.add_index("by_name", vec![name]);

    let mut txn = context.start_transaction(TransactionType::ReadWrite).await?;
    let table = txn.create_table("bench", schema).await?;
    let table_schema = txn.schema(table)?;

    for key in 0..1_000u64 {
        let mut tuple = Tuple::new(table_schema.clone());
        tuple.set(0, Field::BigInt(key as i64))?;
        tuple.set(1, Field::Text(format!("row-{:04}", key)))?;
        txn.insert(table, key, tuple)?;
    }
    txn.commit().await?;
    log::info!("inserted 1000 rows in one transaction");

    let mut txn = context.start_transaction(TransactionType::ReadOnly).await?;
    let mut read = 0u64;
    for key in 0..1_000u64 {
        let tuple = txn.get(table, key).await?;
        if !tuple.get(0)?.is_null() {
            read += 1;
        }
    }
    let scanned = txn
        .lower_bound(table, "by_name", &[Field::Text("row-0500".into())])?
        .count();
    txn.commit().await?;
    log::info!("read {} rows, index scan hit {} entries", read, scanned);

    log::info!(
        "store requests: {} gets, {} inserts",
        store.get_count(),
        store.insert_count()
    );
    Ok(())
}
