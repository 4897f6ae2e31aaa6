//! es-bulk-load CLI
//!
//! Streams an NDJSON file of documents into one index through the bulk
//! pipeline.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use es_compat_client::logging::init_tracing;
use es_compat_client::ClientFactory;
use es_compat_core::prelude::*;
use es_compat_writer::{DocumentWriter, IndexMode};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "es-bulk-load")]
#[command(about = "Bulk-load NDJSON documents into a cluster of any supported generation")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "ES_COMPAT_CONFIG")]
    config: Option<String>,

    /// NDJSON input, one document per line
    #[arg(short, long)]
    file: PathBuf,

    /// Target index, overrides bulk.index
    #[arg(short, long)]
    index: Option<String>,

    /// Document type, overrides bulk.doc_type
    #[arg(short = 't', long = "type")]
    doc_type: Option<String>,

    /// Cluster hosts (comma-separated)
    #[arg(long, env = "ES_HOSTS")]
    hosts: Option<String>,

    #[arg(long)]
    protocol: Option<ProtocolVersion>,

    #[arg(long, value_enum, default_value_t = Mode::Index)]
    mode: Mode,

    /// Append terminal failures here as NDJSON
    #[arg(long)]
    failures_out: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Index,
    Create,
    Upsert,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(hosts) = &args.hosts {
        config.elasticsearch.hosts = hosts.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(version) = args.protocol {
        config.elasticsearch.protocol_version = version;
    }
    if args.index.is_some() {
        config.bulk.index = args.index.clone();
    }
    if args.doc_type.is_some() {
        config.bulk.doc_type = args.doc_type.clone();
    }
    init_tracing(&config.observability, args.log_level.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol = %config.elasticsearch.protocol_version,
        file = %args.file.display(),
        "Starting es-bulk-load"
    );

    let (factory, dispatcher) = ClientFactory::connect(&config)?;
    let writer = DocumentWriter::new(dispatcher, &config.bulk)?;

    let loaded = load(&writer, &args).await;
    writer.close().await?;
    factory.shutdown();

    let rejected = loaded?;
    let stats = writer.stats();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    if rejected > 0 {
        warn!(rejected, "Lines rejected before queueing");
    }

    let failures = writer.failures().total_recorded();
    if let Some(path) = &args.failures_out {
        writer.failures().persist(path).await?;
    }
    if failures > 0 {
        error!(failures, "Some documents were not written");
        std::process::exit(2);
    }
    Ok(())
}

/// Queue every line; returns how many lines were rejected up front
async fn load(writer: &DocumentWriter, args: &Args) -> anyhow::Result<u64> {
    let file = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("cannot open {}", args.file.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut line_no = 0u64;
    let mut rejected = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let queued = serde_json::from_str::<Value>(&line)
            .map_err(|e| EsCompatError::decode(format!("invalid JSON: {e}"), line.clone()))
            .and_then(|doc| match args.mode {
                Mode::Index => writer.add_doc(doc, IndexMode::Index, None),
                Mode::Create => writer.add_doc(doc, IndexMode::Create, None),
                Mode::Upsert => writer.upsert_one(doc, None),
            });
        if let Err(e) = queued {
            warn!(line = line_no, error = %e, "Skipping line");
            rejected += 1;
        }
    }
    info!(lines = line_no, rejected, "Input consumed");
    Ok(rejected)
}
