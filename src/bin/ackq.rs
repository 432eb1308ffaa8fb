//! ackq CLI: operator interface to the queues in a store file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ackq::config::Config;
use ackq::sweeper::{self, SweepPolicy};
use ackq::telemetry::queue::{record_status_transition, start_delivery_span};
use ackq::telemetry::{TelemetryConfig, init_telemetry};
use ackq::{AckId, Discipline, Queue, QueueOptions, Registry, Status};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "ackq", about = "Durable work queues on SQLite")]
struct Cli {
    /// TOML config file; ACKQ_* environment variables are used otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store file, overriding the configured one
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Queue ordering
    #[arg(long, global = true, value_enum, default_value_t = Kind::Fifo)]
    kind: Kind,
    /// Keep acknowledged items as done (true) or delete them (false)
    #[arg(long, global = true)]
    retain: Option<bool>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Fifo,
    Priority,
}

#[derive(Subcommand)]
enum Command {
    /// Add an item
    Enqueue {
        queue: String,
        payload: String,
        /// Priority (lower = served first); priority queues only
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Take the next item
    Dequeue {
        queue: String,
        /// Keep the item in flight until acknowledged
        #[arg(long)]
        ack: bool,
    },
    /// Acknowledge an in-flight item
    Ack { queue: String, ack_id: String },
    /// Return unacknowledged items to pending
    Requeue {
        queue: String,
        /// Only items delivered at least this many seconds ago
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
    /// Print pending payloads in dequeue order
    List { queue: String },
    /// Print the number of pending items
    Len { queue: String },
    /// Print item counts per status
    Stats { queue: String },
    /// Delete every item
    Purge { queue: String },
    /// Run the recovery sweeper until Ctrl-C
    Sweep {
        queue: String,
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        stale_after_secs: Option<u64>,
    },
}

impl Command {
    fn queue(&self) -> &str {
        match self {
            Command::Enqueue { queue, .. }
            | Command::Dequeue { queue, .. }
            | Command::Ack { queue, .. }
            | Command::Requeue { queue, .. }
            | Command::List { queue }
            | Command::Len { queue }
            | Command::Stats { queue }
            | Command::Purge { queue }
            | Command::Sweep { queue, .. } => queue,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "ackq".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let registry = Registry::open_with(&config.database, &config.store_options())?;
    // In-flight rows may belong to live consumers in other processes, so
    // recovery only happens through `requeue` and `sweep`.
    let mut options = QueueOptions::new().recover_on_open(false);
    if let Some(retain) = cli.retain {
        options = options.retain_on_completion(retain);
    }
    let name = cli.command.queue().to_string();

    let result = match cli.kind {
        Kind::Fifo => {
            let queue = registry.queue(&name, options)?;
            match cli.command {
                Command::Enqueue { payload, .. } => {
                    let id = queue.enqueue(payload)?;
                    println!("{id}");
                    Ok(())
                }
                command => cmd_shared(queue, command, &config).await,
            }
        }
        Kind::Priority => {
            let queue = registry.priority_queue(&name, options)?;
            match cli.command {
                Command::Enqueue {
                    payload, priority, ..
                } => {
                    let id = queue.enqueue(payload, priority)?;
                    println!("{id}");
                    Ok(())
                }
                command => cmd_shared(queue, command, &config).await,
            }
        }
    };

    registry.close()?;
    result
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env_with_database(cli.db.clone())?,
    };
    if let Some(db) = &cli.db {
        config.database = db.clone();
    }
    Ok(config)
}

/// Commands whose behavior doesn't depend on the queue's ordering.
async fn cmd_shared<D: Discipline>(
    queue: Queue<D>,
    command: Command,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Command::Enqueue { .. } => unreachable!("enqueue is dispatched per kind"),
        Command::Dequeue { ack: false, .. } => match queue.dequeue()? {
            Some(payload) => println!("{}", String::from_utf8_lossy(&payload)),
            None => println!("(empty)"),
        },
        Command::Dequeue { ack: true, .. } => match queue.dequeue_with_ack()? {
            Some(delivery) => {
                let span = start_delivery_span(queue.name(), &delivery);
                record_status_transition(&span, Status::Pending, Status::Processing);
                println!("id:      {}", delivery.id);
                println!("ack_id:  {}", delivery.ack_id);
                println!("payload: {}", String::from_utf8_lossy(&delivery.payload));
            }
            None => println!("(empty)"),
        },
        Command::Ack { ack_id, .. } => {
            if queue.acknowledge(&AckId::from(ack_id))? {
                println!("acknowledged");
            } else {
                anyhow::bail!("no in-flight item holds that ack id");
            }
        }
        Command::Requeue {
            older_than_secs, ..
        } => {
            let recovered = match older_than_secs {
                Some(secs) => queue.requeue_stale(Duration::from_secs(secs))?,
                None => queue.requeue_unacked()?,
            };
            println!("{recovered} item(s) requeued");
        }
        Command::List { .. } => {
            let values = queue.values()?;
            for (i, payload) in values.iter().enumerate() {
                println!("{:>4}  {}", i + 1, String::from_utf8_lossy(payload));
            }
            println!("\n{} pending item(s)", values.len());
        }
        Command::Len { .. } => println!("{}", queue.len()?),
        Command::Stats { .. } => {
            let stats = queue.stats()?;
            println!("pending:    {}", stats.pending);
            println!("processing: {}", stats.processing);
            println!("done:       {}", stats.done);
        }
        Command::Purge { .. } => {
            queue.purge()?;
            println!("purged");
        }
        Command::Sweep {
            interval_secs,
            stale_after_secs,
            ..
        } => {
            let mut policy = config.sweep_policy().unwrap_or_default();
            if let Some(secs) = interval_secs {
                anyhow::ensure!(secs > 0, "--interval-secs must be at least 1");
                policy.interval = Duration::from_secs(secs);
            }
            if let Some(secs) = stale_after_secs {
                policy.stale_after = Duration::from_secs(secs);
            }
            run_sweeper(Arc::new(queue), policy).await;
        }
    }
    Ok(())
}

async fn run_sweeper<D: Discipline>(queue: Arc<Queue<D>>, policy: SweepPolicy) {
    let handle = sweeper::spawn(queue, policy);
    tokio::signal::ctrl_c().await.ok();
    handle.shutdown().await;
}
