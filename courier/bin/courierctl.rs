//! Command-line utility for operating courier
//!
//! Works directly against the configured store, so it can be used whether or
//! not the daemon is running:
//! - Channel status and counters
//! - Listing pending and failed messages
//! - Retrying failed messages
//! - Manual cleanup and stall recovery
//! - Enqueueing a message by hand

use std::{path::PathBuf, time::Duration};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use courier::{Courier, config};
use courier_store::{
    EnqueueOptions, Message, MessageId, MessageStatus, MessageStore, SqliteStoreBuilder,
    StoreConfig, message::now,
};
use serde::Serialize;

const SECONDS_PER_DAY: u64 = 86_400;

/// Command-line utility for operating courier
#[derive(Parser, Debug)]
#[command(name = "courierctl")]
#[command(about = "Manage the courier delivery queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the courier configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the `SQLite` database, overriding the configured store
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Ron,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show channel readiness and delivery counters
    Status,
    /// List messages waiting to be delivered
    Pending,
    /// List messages that exhausted their retries
    Failed,
    /// Show everything known about one message
    Show {
        /// Message ID to view
        message_id: String,
    },
    /// Move a failed message back to pending with a fresh retry budget
    Retry {
        /// Message ID to retry
        message_id: String,
    },
    /// Delete sent and failed messages older than the retention window
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value = "7")]
        days: u64,
    },
    /// Return messages stuck in processing to the retry policy
    Recover {
        /// How long a message may stay processing, in seconds
        #[arg(long, default_value = "600")]
        timeout_secs: u64,
    },
    /// Queue a message for delivery
    Enqueue {
        recipient: String,
        body: String,

        /// Higher is delivered first
        #[arg(long, default_value = "0")]
        priority: i32,

        /// Delay before the first attempt, in seconds
        #[arg(long)]
        delay_secs: Option<u64>,

        /// Retry budget for this message
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => Some(path),
        None => config::locate_config_file()?,
    };
    let mut courier = config::load_or_default(config_path.as_deref())?;

    if let Some(database) = cli.database {
        courier.store = StoreConfig::Sqlite(SqliteStoreBuilder::default().path(database));
    }

    run(&courier, cli.command, cli.format).await
}

async fn run(courier: &Courier, command: Commands, format: Format) -> anyhow::Result<()> {
    let service = courier.service()?;

    match command {
        Commands::Status => {
            let status = service.get_status().await?;
            if format == Format::Ron {
                return print_ron(&status);
            }

            println!("Channel ready:   {}", if status.is_ready { "yes" } else { "no" });
            println!(
                "Last heartbeat:  {}",
                status
                    .last_heartbeat
                    .map_or_else(|| "never".to_string(), format_timestamp)
            );
            println!("Sent:            {}", status.message_count);
            println!("Failed:          {}", status.error_count);
            println!("Pending:         {}", status.pending_count);
        }
        Commands::Pending => {
            let pending = service.store().list_pending().await?;
            if format == Format::Ron {
                return print_ron(&pending);
            }
            print_table(&pending);
        }
        Commands::Failed => {
            let failed = service.list_failed().await?;
            if format == Format::Ron {
                return print_ron(&failed);
            }

            println!("{:<28} {:<16} {:<8} ERROR", "MESSAGE ID", "RECIPIENT", "RETRIES");
            println!("{}", "-".repeat(80));
            for message in &failed {
                println!(
                    "{:<28} {:<16} {:<8} {}",
                    message.id,
                    message.recipient,
                    message.retry_count,
                    message.error_message.as_deref().unwrap_or("-")
                );
            }
            println!("\nTotal: {} message(s)", failed.len());
        }
        Commands::Show { message_id } => {
            let message = service.get(&parse_message_id(&message_id)?).await?;
            if format == Format::Ron {
                return print_ron(&message);
            }
            print_message(&message);
        }
        Commands::Retry { message_id } => {
            let id = parse_message_id(&message_id)?;
            if service.retry(&id).await? {
                println!("✓ Message {id} requeued");
            } else {
                anyhow::bail!("Message {id} is not failed; only failed messages can be retried");
            }
        }
        Commands::Cleanup { days } => {
            let deleted = service
                .cleanup(Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)))
                .await?;
            println!("✓ Deleted {deleted} message(s) older than {days} day(s)");
        }
        Commands::Recover { timeout_secs } => {
            let recovered = service
                .recover_stalled(Duration::from_secs(timeout_secs))
                .await?;
            println!("✓ Recovered {recovered} stalled message(s)");
        }
        Commands::Enqueue {
            recipient,
            body,
            priority,
            delay_secs,
            max_retries,
        } => {
            let mut options = EnqueueOptions::default().with_priority(priority);
            if let Some(delay) = delay_secs {
                let delay = chrono::TimeDelta::try_seconds(i64::try_from(delay)?)
                    .ok_or_else(|| anyhow::anyhow!("Delay of {delay}s is out of range"))?;
                options = options.scheduled_at(now() + delay);
            }
            if let Some(max_retries) = max_retries {
                options = options.with_max_retries(max_retries);
            }

            let id = service.enqueue(recipient, body, options).await?;
            println!("✓ Enqueued {id}");
        }
    }

    Ok(())
}

fn parse_message_id(id: &str) -> anyhow::Result<MessageId> {
    id.parse()
        .map_err(|e| anyhow::anyhow!("Invalid message ID '{id}': {e}"))
}

fn print_ron<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!(
        "{}",
        ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default())?
    );
    Ok(())
}

fn print_table(messages: &[Message]) {
    println!(
        "{:<28} {:<16} {:<9} {:<8} {:<20}",
        "MESSAGE ID", "RECIPIENT", "PRIORITY", "RETRIES", "SCHEDULED"
    );
    println!("{}", "-".repeat(85));

    for message in messages {
        println!(
            "{:<28} {:<16} {:<9} {:<8} {:<20}",
            message.id,
            message.recipient,
            message.priority,
            format!("{}/{}", message.retry_count, message.max_retries),
            format_timestamp(message.scheduled_at)
        );
    }

    println!("\nTotal: {} message(s)", messages.len());
}

fn print_message(message: &Message) {
    println!("Message ID: {}", message.id);
    println!("Status:     {}", message.status.as_str());
    println!("Recipient:  {}", message.recipient);
    println!("Priority:   {}", message.priority);
    println!("Retries:    {}/{}", message.retry_count, message.max_retries);
    println!("Created:    {}", format_timestamp(message.created_at));
    println!("Scheduled:  {}", format_timestamp(message.scheduled_at));

    if let Some(claimed_at) = message.claimed_at {
        println!("Claimed:    {}", format_timestamp(claimed_at));
    }
    if let Some(processed_at) = message.processed_at {
        println!("Processed:  {}", format_timestamp(processed_at));
    }
    if let Some(error) = &message.error_message {
        println!("Last error: {error}");
    }
    if message.status == MessageStatus::Pending && message.scheduled_at > now() {
        println!("Next attempt in {}", format_age(message.scheduled_at - now()));
    }

    println!();
    println!("{}", message.body);
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_age(delta: chrono::TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
