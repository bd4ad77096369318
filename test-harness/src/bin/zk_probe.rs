// Command line probe: runs one request against an ensemble and prints JSON.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::info;
use zk_client::{ClientConfig, CreateMode, FailoverClient, Stat, ZooKeeper, watch_channel};

#[derive(Parser, Debug)]
#[command(name = "zk-probe")]
#[command(about = "Run one request against a coordination ensemble and print the result as JSON")]
struct Args {
    /// Connection string: host[:port][,host[:port]...][/root][?key=value]
    #[arg(long, default_value = "127.0.0.1:2181")]
    connect: String,

    /// Requested session timeout in milliseconds
    #[arg(long)]
    session_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a node's data and stat
    Get { path: String },
    /// List a node's children
    Ls { path: String },
    /// Print a node's stat, or null when it does not exist
    Stat { path: String },
    /// Create a node
    Create {
        path: String,
        data: Option<String>,
        #[arg(long)]
        ephemeral: bool,
        #[arg(long)]
        sequential: bool,
    },
    /// Delete a node
    Delete {
        path: String,
        #[arg(long, default_value_t = -1)]
        version: i32,
    },
    /// Replace a node's data
    Set {
        path: String,
        data: String,
        #[arg(long, default_value_t = -1)]
        version: i32,
    },
    /// Print events from a persistent watch
    Watch {
        path: String,
        #[arg(long)]
        recursive: bool,
        /// Exit after this many events
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

fn stat_json(stat: &Stat) -> Value {
    serde_json::to_value(stat).unwrap_or(Value::Null)
}

fn create_mode(ephemeral: bool, sequential: bool) -> CreateMode {
    match (ephemeral, sequential) {
        (false, false) => CreateMode::Persistent,
        (true, false) => CreateMode::Ephemeral,
        (false, true) => CreateMode::PersistentSequential,
        (true, true) => CreateMode::EphemeralSequential,
    }
}

async fn run(client: &FailoverClient, command: Command) -> Result<Value> {
    let value = match command {
        Command::Get { path } => {
            let node = client.get_data(&path).await?;
            json!({
                "path": path,
                "data": String::from_utf8_lossy(&node.data),
                "stat": stat_json(&node.stat),
            })
        }
        Command::Ls { path } => {
            let children = client.get_children(&path).await?;
            json!({ "path": path, "children": children })
        }
        Command::Stat { path } => {
            let stat = client.exists(&path).await?;
            json!({ "path": path, "stat": stat.as_ref().map(stat_json) })
        }
        Command::Create {
            path,
            data,
            ephemeral,
            sequential,
        } => {
            let data = data.unwrap_or_default().into_bytes();
            let created = client
                .create(&path, data, create_mode(ephemeral, sequential))
                .await?;
            json!({ "created": created })
        }
        Command::Delete { path, version } => {
            client.delete(&path, version).await?;
            json!({ "deleted": path })
        }
        Command::Set {
            path,
            data,
            version,
        } => {
            let stat = client.set_data(&path, data.into_bytes(), version).await?;
            json!({ "path": path, "stat": stat_json(&stat) })
        }
        Command::Watch {
            path,
            recursive,
            count,
        } => {
            let (callback, mut events) = watch_channel();
            let watcher = client.add_watch(&path, recursive, callback).await?;
            let mut seen = Vec::with_capacity(count);
            while seen.len() < count {
                let event = events.recv().await.context("watch channel closed")?;
                println!("{}", serde_json::to_string(&event)?);
                seen.push(event);
            }
            watcher.remove().await?;
            json!({ "path": path, "events": seen.len() })
        }
    };
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = ClientConfig::from_connect_string(&args.connect)?;
    if let Some(timeout) = args.session_timeout_ms {
        config = config.with_session_timeout(Duration::from_millis(timeout));
    }
    info!(connect = %config.to_connect_string(), "probing ensemble");

    let client = FailoverClient::new(config)?;
    let outcome = run(&client, args.command).await;
    client.close().await?;
    println!("{}", serde_json::to_string_pretty(&outcome?)?);
    Ok(())
}
