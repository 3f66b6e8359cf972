//! Consume sample device events from an in-process broker and log what they carry.
use std::sync::Arc;

use base64::Engine;
use envconfig::Envconfig;
use pulsar_consumer::memory::MemoryBroker;
use pulsar_consumer::{topic_for_access_id, Client, ConsumerConfig, TokenAuthProvider};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::Config;
use crate::handler::EnvelopeHandler;

mod config;
mod handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env().expect("Invalid configuration:");
    let topic = topic_for_access_id(&config.access_id);

    let broker = MemoryBroker::new();
    broker.create_topic(&topic, config.demo_partitions).await;
    for i in 0..config.demo_messages {
        broker.publish(&topic, sample_event(i)).await;
    }

    let client = Client::new(config.client.clone(), Arc::new(broker));
    let consumer_config = ConsumerConfig::new(
        &topic,
        Arc::new(TokenAuthProvider::new(&config.access_token)),
    )
    .with_flow(config.flow);

    let consumer = match client.new_consumer(consumer_config).await {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(error = %e, "NewConsumer failed");
            client.stop().await;
            return Err(e.into());
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c, shutting down"),
                Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
            }
            shutdown.cancel();
        }
    });

    consumer
        .receive_and_handle(shutdown, Arc::new(EnvelopeHandler))
        .await;

    consumer.stop().await;
    client.stop().await;

    Ok(())
}

fn sample_event(i: usize) -> String {
    let event = serde_json::json!({
        "devId": format!("dev-{i}"),
        "status": [{"code": "switch_1", "value": i % 2 == 0}],
    });
    let data = base64::engine::general_purpose::STANDARD.encode(event.to_string());

    serde_json::json!({
        "data": data,
        "protocol": 4,
        "pv": "2.0",
        "t": 1700000000000i64 + i as i64,
    })
    .to_string()
}
