use std::path::PathBuf;

use anyhow::{Context, Result};
use lapin::{
    options::{
        BasicPublishOptions, ExchangeDeclareOptions, ExchangeDeleteOptions, QueueDeclareOptions,
        QueueDeleteOptions,
    },
    BasicProperties, ExchangeKind,
};
use rust_amqp::config::{self, AmqpSettings};
use rust_amqp::{AmqpClient, MessageMetadata};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("init-config") => {
            let path = args
                .get(2)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(config::CONFIG_FILE_NAME));
            config::create_default_config_file(&path)
        }
        Some("demo") | None => {
            let settings = config::load_config()?;
            run_demo(&settings).await
        }
        Some(other) => {
            eprintln!("Unknown command `{}`. Usage: RustAmqp [demo|init-config [path]]", other);
            std::process::exit(2);
        }
    }
}

/// Declare a direct exchange and a bound queue, publish one JSON message and
/// acknowledge it through the decoded payload.
async fn run_demo(settings: &AmqpSettings) -> Result<()> {
    let demo = &settings.demo;
    let mut client = AmqpClient::connect(&settings.connection.uri)
        .await
        .context("Failed to connect to the broker")?;

    client
        .declare_exchange(&demo.exchange, ExchangeKind::Direct, ExchangeDeclareOptions::default())
        .await?;
    client
        .declare_queue(&demo.queue, QueueDeclareOptions::default())
        .await?;
    client
        .bind_queue(&demo.queue, &demo.exchange, &demo.routing_key)
        .await?;

    client
        .publish_json(
            &json!({"greeting": "hello from RustAmqp", "path": "a/b"}),
            &demo.exchange,
            &demo.routing_key,
            BasicPublishOptions::default(),
            BasicProperties::default(),
        )
        .await?;

    match client.get_json_message(&demo.queue, false).await? {
        Some(mut payload) => {
            client.ack(&payload, false).await?;
            let metadata = MessageMetadata::detach(&mut payload)?;
            info!(
                delivery_tag = metadata.delivery_tag,
                payload = %serde_json::Value::Object(payload),
                "Received and acknowledged"
            );
        }
        None => warn!(queue = %demo.queue, "No message available"),
    }

    if demo.cleanup {
        client
            .delete_queue(&demo.queue, QueueDeleteOptions::default())
            .await?;
        client
            .delete_exchange(&demo.exchange, ExchangeDeleteOptions::default())
            .await?;
    }

    client.close().await?;
    Ok(())
}
