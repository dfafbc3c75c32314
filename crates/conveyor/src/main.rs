//! Conveyor binary entry point.
//!
//! Usage:
//!   conveyor consume --group <group> --topic <topic> [--topic <topic> ...]
//!   conveyor produce --topic <topic> --body <json> [--header <json>] [--max-len <n>]

use anyhow::Context;
use clap::{Parser, Subcommand};
use conveyor::logging::{self, LogConfig};
use conveyor::{
    ConsumerEvent, ConsumerOptions, Conveyor, ConveyorConfig, Header, Message, Payload,
    SendOptions,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

/// Conveyor: at-least-once consumer groups over Redis Streams.
#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(about = "At-least-once consumer groups over Redis Streams")]
struct Args {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Consumer name within the group. Generated when omitted.
    #[arg(long, env = "CONVEYOR_CONSUMER_ID")]
    consumer_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume topics as a group member, logging every message.
    Consume {
        #[arg(long)]
        group: String,

        #[arg(long = "topic", required = true)]
        topics: Vec<String>,

        /// Max entries per fetch.
        #[arg(long, env = "CONVEYOR_BATCH_SIZE", default_value = "1")]
        batch_size: usize,

        /// Idle time before a pending entry may be reclaimed.
        #[arg(long, env = "CONVEYOR_TIMEOUT_MS", default_value = "10000")]
        timeout_ms: u64,

        /// Deliveries before a failing message is abandoned.
        #[arg(long, env = "CONVEYOR_MAX_DELIVER_TIMES", default_value = "3")]
        max_deliver_times: u32,
    },

    /// Append one message to a topic.
    Produce {
        #[arg(long)]
        topic: String,

        /// JSON body.
        #[arg(long)]
        body: String,

        /// Optional JSON object header.
        #[arg(long)]
        header: Option<String>,

        /// Trim the topic to roughly this many entries.
        #[arg(long)]
        max_len: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(&LogConfig {
        service_name: "conveyor".into(),
        default_level: args.log_level.clone(),
        json: args.json_logs,
    });

    let mut config = ConveyorConfig::from_env();
    config.redis_url = args.redis_url;
    if let Some(consumer_id) = args.consumer_id {
        config.consumer_id = consumer_id;
    }

    let conveyor = Conveyor::connect(config).await?;

    match args.command {
        Command::Consume {
            group,
            topics,
            batch_size,
            timeout_ms,
            max_deliver_times,
        } => {
            let mut options = ConsumerOptions::default();
            options.config.batch_size = batch_size;
            options.config.timeout = Duration::from_millis(timeout_ms);
            options.config.max_deliver_times = max_deliver_times;

            consume(&conveyor, &group, topics, options).await
        }
        Command::Produce {
            topic,
            body,
            header,
            max_len,
        } => {
            let body: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
            let payload = match header {
                Some(header) => {
                    let header: Header = serde_json::from_str(&header)
                        .context("--header is not a JSON object")?;
                    Payload::with_header(body, header)
                }
                None => Payload::new(body),
            };

            let producer = conveyor.producer(true).await?;
            let id = producer
                .send(&topic, &payload, SendOptions { max_len })
                .await?;
            info!(topic = %topic, message_id = %id, "Message sent");
            println!("{}", id);
            Ok(())
        }
    }
}

async fn consume(
    conveyor: &Conveyor,
    group: &str,
    topics: Vec<String>,
    options: ConsumerOptions,
) -> anyhow::Result<()> {
    let consumer = conveyor
        .consumer::<Value, _>(
            group,
            topics,
            |message: Message<Value>| async move {
                info!(
                    topic = %message.topic(),
                    message_id = %message.id(),
                    deliver_count = message.deliver_count(),
                    body = %message.body(),
                    "Received message"
                );
                anyhow::Ok(())
            },
            options,
        )
        .await?;

    let mut events = consumer.subscribe();
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ConsumerEvent::Error { error, raw } => {
                    error!(error = %error, raw = ?raw, "Consumer error event")
                }
                ConsumerEvent::MessageError { error, message } => {
                    warn!(message_id = %message.id(), error = %error, "Message will be retried")
                }
                ConsumerEvent::MessageAbandoned { error, message } => {
                    warn!(message_id = %message.id(), error = %error, "Message abandoned")
                }
            }
        }
    });

    consumer.start().await?;
    info!(
        consumer = %consumer.id(),
        group = %consumer.group(),
        topics = ?consumer.topics(),
        "Consumer started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, stopping...");

    consumer.stop();
    consumer.stopped().await;
    event_log.abort();

    Ok(())
}
