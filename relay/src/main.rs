use relay::config::{ChannelKind, Config};
use relay::consumer::{self, Consumer};
use relay::publisher::{MemoryChannel, MqttPublisher, PublisherPtr};
use relay::store::StorePtr;
use relay::{db, metrics, mqtt, AppState};
use rumqttc::MqttOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Starting pool telemetry relay");
    info!("Channel: {:?}", config.channel);
    info!("MQTT broker: {}:{}", config.mqtt_broker, config.mqtt_port);
    info!("HTTP server: {}", config.http_addr);
    info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
    }

    let pool = match db::make_pool(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    let store: StorePtr = Arc::new(db::PgStore::new(pool));

    let (publisher, consumer_handle) = start_channel(&config, store.clone());
    let state = AppState::new(config.secret.clone(), publisher, store);
    let app = relay::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr)
        .await
        .unwrap_or_else(|e| {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        });

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap_or_else(|e| {
            error!("HTTP server error: {}", e);
        });
    });

    let consumer_task = async move {
        match consumer_handle {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = consumer_task => {
            error!("Consumer task terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

/// Builds the publisher and, when this process also consumes, spawns the
/// task feeding the consumer.
fn start_channel(config: &Config, store: StorePtr) -> (PublisherPtr, Option<JoinHandle<()>>) {
    let consumer = Arc::new(Consumer::new(store));

    match config.channel {
        ChannelKind::Memory => {
            let (channel, rx) = MemoryChannel::new();
            let handle = tokio::spawn(consumer::run_channel(rx, consumer));
            (Arc::new(channel), Some(handle))
        }
        ChannelKind::Mqtt => {
            let publisher_id = format!("{}-pub-{}", config.mqtt_client_id, uuid::Uuid::new_v4());
            let mut options = MqttOptions::new(publisher_id, &config.mqtt_broker, config.mqtt_port);
            options.set_keep_alive(Duration::from_secs(30));
            let publisher = MqttPublisher::spawn(
                options,
                config.mqtt_topic.clone(),
                config.publish_timeout,
            );

            let handle = config.mqtt_subscribe.then(|| {
                // Persistent session: the id must not be shared between instances.
                let options = MqttOptions::new(
                    format!("{}-sub", config.mqtt_client_id),
                    &config.mqtt_broker,
                    config.mqtt_port,
                );
                let topic = config.mqtt_topic.clone();
                tokio::spawn(async move {
                    if let Err(e) = mqtt::run_subscriber(options, topic, consumer).await {
                        error!("MQTT task failed: {}", e);
                    }
                })
            });

            (Arc::new(publisher), handle)
        }
    }
}
