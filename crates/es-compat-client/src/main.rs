//! es-compat CLI
//!
//! Talks to a cluster of any supported generation through the dispatcher.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use es_compat_client::logging::init_tracing;
use es_compat_client::{ClientFactory, Dispatcher};
use es_compat_core::prelude::*;
use futures::{pin_mut, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "es-compat")]
#[command(about = "Multi-version search cluster client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ES_COMPAT_CONFIG", global = true)]
    config: Option<String>,

    /// Cluster hosts (comma-separated), overrides the configuration
    #[arg(long, env = "ES_HOSTS", global = true)]
    hosts: Option<String>,

    /// Protocol generation, e.g. v5.6 or 7.9
    #[arg(long, global = true)]
    protocol: Option<ProtocolVersion>,

    /// Log level, overrides the configuration and RUST_LOG
    #[arg(long, env = "LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cluster banner
    Ping,
    /// Run a search and print the canonical result
    Search(QueryArgs),
    /// Print the total hit count and its relation
    Count(QueryArgs),
    /// Scroll through every hit, one page per line
    Scroll {
        #[command(flatten)]
        query: QueryArgs,
        /// Cursor keep-alive
        #[arg(long, default_value = "1m", value_parser = humantime_serde::re::humantime::parse_duration)]
        keep_alive: Duration,
    },
    /// Print the translated wire request without sending it
    Translate {
        #[command(flatten)]
        query: QueryArgs,
        /// Translate a scroll continuation for this cursor instead
        #[arg(long)]
        scroll_id: Option<String>,
        #[arg(long, default_value = "1m", value_parser = humantime_serde::re::humantime::parse_duration)]
        keep_alive: Duration,
    },
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Indices (comma-separated); empty searches everything
    #[arg(short, long, default_value = "")]
    index: String,

    /// Document type, for generations that have one
    #[arg(short = 't', long = "type")]
    doc_type: Option<String>,

    /// Query body as JSON; defaults to match_all
    #[arg(short, long)]
    query: Option<String>,

    #[arg(long)]
    from: Option<u64>,

    #[arg(long)]
    size: Option<u64>,
}

impl QueryArgs {
    fn to_request(&self) -> anyhow::Result<SearchRequest> {
        let mut body: Value = match &self.query {
            Some(raw) => serde_json::from_str(raw).context("query is not valid JSON")?,
            None => json!({ "query": { "match_all": {} } }),
        };
        if let Some(from) = self.from {
            body["from"] = json!(from);
        }
        if let Some(size) = self.size {
            body["size"] = json!(size);
        }

        let indices = self
            .index
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let mut request = SearchRequest::new(indices, body);
        if let Some(t) = &self.doc_type {
            request = request.with_type(t.clone());
        }
        Ok(request)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(hosts) = &cli.hosts {
        config.elasticsearch.hosts = hosts.split(',').map(|s| s.trim().to_string()).collect();
    }
    if let Some(version) = cli.protocol {
        config.elasticsearch.protocol_version = version;
    }
    init_tracing(&config.observability, cli.log_level.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        protocol = %config.elasticsearch.protocol_version,
        "Starting es-compat"
    );

    let (factory, client) = ClientFactory::connect(&config)?;
    let outcome = run(&client, cli.command).await;

    client.close()?;
    factory.shutdown();
    outcome
}

async fn run(client: &Dispatcher, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ping => {
            let info = client.ping().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Search(query) => {
            let result = client.search(query.to_request()?).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Count(query) => {
            let total = client.count(query.to_request()?).await?;
            println!("{} ({:?})", total.value, total.relation);
        }
        Command::Scroll { query, keep_alive } => {
            let pages = client.scroll_stream(query.to_request()?, keep_alive);
            pin_mut!(pages);
            let mut seen = 0usize;
            while let Some(page) = pages.next().await {
                let page = page?;
                seen += page.hits.len();
                println!("{}", serde_json::to_string(&page.hits)?);
            }
            info!(hits = seen, "Scroll complete");
        }
        Command::Translate {
            query,
            scroll_id,
            keep_alive,
        } => {
            // Nothing is sent; opening the transport performs no I/O
            let wire = match scroll_id {
                Some(id) => client.prepare(&ScrollRequest::new(id, keep_alive))?,
                None => client.prepare(&query.to_request()?)?,
            };
            println!("{}", serde_json::to_string_pretty(&wire)?);
        }
    }
    Ok(())
}
