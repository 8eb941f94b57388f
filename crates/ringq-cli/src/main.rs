use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ringq_core::{
    Backpressure, PollPolicy, Queue, QueueError, ReadOptions, RingqConfig, RocksDbStore,
    WriteOptions,
};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "ringq", about = "Bounded at-least-once message queue")]
struct Cli {
    /// Directory of the RocksDB store (overrides config and RINGQ_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Queue (collection) name
    #[arg(long, global = true)]
    queue: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one message given as a JSON object
    Write {
        /// Message payload, e.g. '{"task": "resize"}'
        payload: String,

        /// Partition to write into
        #[arg(long)]
        routing_key: Option<String>,

        /// Seconds after which readers stop returning the message
        #[arg(long, value_parser = parse_secs)]
        expire: Option<Duration>,

        /// Dotted field path that must be unique in the queue
        #[arg(long)]
        unique_key: Option<String>,

        /// Seconds before the message becomes visible
        #[arg(long, value_parser = parse_secs)]
        visibility_timeout: Option<Duration>,

        /// Wait while more than this many messages are deliverable
        #[arg(long)]
        threshold: Option<usize>,

        /// Fraction of writes that run the threshold check (0.0 to 1.0)
        #[arg(long, requires = "threshold", value_parser = parse_probability)]
        check_probability: Option<f64>,
    },

    /// Read messages, printing one JSON document per line
    Read {
        /// Partition to read from
        #[arg(long)]
        routing_key: Option<String>,

        /// Maximum number of messages
        #[arg(short = 'n', long, default_value_t = ReadOptions::DEFAULT_MESSAGES_READ)]
        messages: usize,

        /// Lease the messages for this many seconds instead of peeking
        #[arg(long, value_parser = parse_secs)]
        lease: Option<Duration>,

        /// Wait until a message is deliverable
        #[arg(long)]
        block: bool,

        /// Seconds between checks while blocking
        #[arg(long, value_parser = parse_secs)]
        polling_interval: Option<Duration>,

        /// Give up blocking after this many seconds
        #[arg(long, value_parser = parse_secs)]
        polling_timeout: Option<Duration>,
    },

    /// Acknowledge messages by id
    Ack {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },

    /// Count deliverable messages
    Count {
        #[arg(long)]
        routing_key: Option<String>,
    },
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid seconds {s:?}: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds {s:?}: {e}"))
}

fn parse_probability(s: &str) -> Result<f64, String> {
    let p: f64 = s.parse().map_err(|e| format!("invalid probability {s:?}: {e}"))?;
    if (0.0..=1.0).contains(&p) {
        Ok(p)
    } else {
        Err(format!("probability {p} is outside 0.0..=1.0"))
    }
}

fn load_config() -> RingqConfig {
    let paths = ["ringq.toml", "/etc/ringq/ringq.toml"];

    let mut config = RingqConfig::default();
    for path in &paths {
        if Path::new(path).exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(loaded) => {
                        info!(path, "loaded configuration");
                        config = loaded;
                        break;
                    }
                    Err(e) => {
                        eprintln!("Error: parsing {path}: {e}");
                        process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("Error: reading {path}: {e}");
                    process::exit(1);
                }
            }
        }
    }

    if let Ok(dir) = std::env::var("RINGQ_DATA_DIR") {
        config.store.data_dir = PathBuf::from(dir);
    }
    config
}

fn open_queue(config: &RingqConfig) -> Result<Queue, QueueError> {
    let store = RocksDbStore::open(&config.store.data_dir)?;
    Queue::open(Arc::new(store), config.queue.clone())
}

fn cmd_write(
    queue: &Queue,
    config: &RingqConfig,
    payload: &str,
    mut options: WriteOptions,
    threshold: Option<usize>,
    check_probability: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: Value = serde_json::from_str(payload)
        .map_err(|e| QueueError::InvalidPayload(format!("not valid JSON: {e}")))?;

    if let Some(threshold) = threshold {
        let mut backpressure =
            Backpressure::new(threshold).with_polling(config.polling.policy());
        if let Some(p) = check_probability {
            backpressure = backpressure.with_check_probability(p);
        }
        options = options.with_backpressure(backpressure);
    }

    if queue.write(&payload, &options)? {
        println!("inserted");
    } else {
        println!("duplicate");
    }
    Ok(())
}

fn cmd_read(queue: &Queue, options: &ReadOptions) -> Result<(), Box<dyn std::error::Error>> {
    for message in queue.read(options)? {
        println!("{}", serde_json::to_string(message.document())?);
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config();
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    if let Some(name) = cli.queue {
        config.queue.name = name;
    }

    let queue = open_queue(&config)?;

    match cli.command {
        Commands::Write {
            payload,
            routing_key,
            expire,
            unique_key,
            visibility_timeout,
            threshold,
            check_probability,
        } => {
            let mut options = WriteOptions::new();
            if let Some(key) = routing_key {
                options = options.with_routing_key(key);
            }
            if let Some(expire) = expire {
                options = options.with_expire(expire);
            }
            if let Some(field) = unique_key {
                options = options.with_unique_key(field);
            }
            if let Some(delay) = visibility_timeout {
                options = options.with_visibility_timeout(delay);
            }
            cmd_write(
                &queue,
                &config,
                &payload,
                options,
                threshold,
                check_probability,
            )
        }
        Commands::Read {
            routing_key,
            messages,
            lease,
            block,
            polling_interval,
            polling_timeout,
        } => {
            let mut options = ReadOptions::new().with_messages_read(messages);
            if let Some(key) = routing_key {
                options = options.with_routing_key(key);
            }
            if let Some(lease) = lease {
                options = options.with_visibility_timeout(lease);
            }
            if block {
                let defaults = config.polling.policy();
                let polling = PollPolicy {
                    interval: polling_interval.unwrap_or(defaults.interval),
                    timeout: polling_timeout.or(defaults.timeout),
                };
                options = options.blocking(polling);
            }
            cmd_read(&queue, &options)
        }
        Commands::Ack { ids } => {
            queue.delete_ids(&ids)?;
            println!("acknowledged {}", ids.len());
            Ok(())
        }
        Commands::Count { routing_key } => {
            println!("{}", queue.deliverable_count(routing_key.as_deref())?);
            Ok(())
        }
    }
}

fn main() {
    ringq_core::telemetry::init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
