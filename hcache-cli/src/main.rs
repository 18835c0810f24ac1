//! # HCache CLI
//!
//! Purpose: Issue single cache operations from a shell through the same
//! pooled client applications use.
//!
//! Ctrl-C cancels the in-flight call's context.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use hcache_client::{fields_from_flat, Cache, CacheClient, ClientConfig, Context, FieldMap};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// HCache - talk to a Redis-compatible cache store
#[derive(Parser, Debug)]
#[command(name = "hcache")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Store address
    #[arg(long, short, default_value = "127.0.0.1:6379", env = "HCACHE_ADDR")]
    addr: String,

    /// Upper bound on acquiring a connection, in milliseconds
    #[arg(long, default_value = "1000", env = "HCACHE_CONNECTION_TIMEOUT_MS")]
    connection_timeout_ms: u64,

    /// Read/write/connect timeout of the transport, in milliseconds
    #[arg(long, default_value = "1000", env = "HCACHE_IO_TIMEOUT_MS")]
    io_timeout_ms: u64,

    /// Overall deadline for the call, in milliseconds
    #[arg(long, env = "HCACHE_DEADLINE_MS")]
    deadline_ms: Option<u64>,

    #[command(subcommand)]
    command: Op,
}

#[derive(Subcommand, Debug)]
enum Op {
    /// Check that the store is reachable
    Ping,
    /// Print the value stored at KEY
    Get { key: String },
    /// Store VALUE at KEY
    Set { key: String, value: String },
    /// Store FIELD=VALUE pairs in the hash at KEY
    Hset {
        key: String,
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    /// Print every field of the hash at KEY
    Hgetall { key: String },
    /// Set a TTL on KEY (milliseconds, truncated to whole seconds)
    Expire { key: String, ttl_ms: u64 },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected FIELD=VALUE, got `{raw}`")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hcache=info,hcache_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let io_timeout = Some(Duration::from_millis(cli.io_timeout_ms));
    let client = CacheClient::connect(ClientConfig {
        addr: cli.addr.clone(),
        max_idle: 1,
        max_active: 1,
        connection_timeout: Duration::from_millis(cli.connection_timeout_ms),
        read_timeout: io_timeout,
        write_timeout: io_timeout,
        connect_timeout: io_timeout,
        ..ClientConfig::default()
    });

    let root = Context::background();
    let ctx = match cli.deadline_ms {
        Some(ms) => root.with_timeout(Duration::from_millis(ms)),
        None => root.with_cancel(),
    };

    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let outcome = run(&client, &ctx, cli.command).await;
    client.pool().close();
    outcome.with_context(|| format!("cache call against {} failed", cli.addr))
}

async fn run(cache: &dyn Cache, ctx: &Context, op: Op) -> Result<()> {
    match op {
        Op::Ping => {
            cache.ping(ctx).await?;
            println!("PONG");
        }
        Op::Get { key } => match cache.get(ctx, key.as_bytes()).await? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Op::Set { key, value } => {
            cache.set(ctx, key.as_bytes(), value.as_bytes()).await?;
            println!("OK");
        }
        Op::Hset { key, fields } => {
            let fields: FieldMap = fields
                .into_iter()
                .map(|(field, value)| (field.into_bytes(), value.into_bytes()))
                .collect();
            cache.hset(ctx, key.as_bytes(), &fields).await?;
            println!("OK");
        }
        Op::Hgetall { key } => {
            let fields = fields_from_flat(cache.hget_all(ctx, key.as_bytes()).await?)?;
            if fields.is_empty() {
                println!("(empty)");
            }
            for (field, value) in fields {
                println!(
                    "{}: {}",
                    String::from_utf8_lossy(&field),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Op::Expire { key, ttl_ms } => {
            let applied = cache
                .expire(ctx, key.as_bytes(), Duration::from_millis(ttl_ms))
                .await?;
            println!("{}", if applied { "1" } else { "0" });
        }
    }
    Ok(())
}
