use crate::consumer::Consumer;
use crate::errors::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delivers channel messages to the consumer, one at a time.
///
/// The session is persistent and acknowledgements are manual: a message is
/// acked only after the consumer has finished with it, so a crash mid-write
/// leads to redelivery rather than loss.
pub async fn run_subscriber(
    mut mqtt_options: MqttOptions,
    topic: String,
    consumer: Arc<Consumer>,
) -> Result<()> {
    let (broker, port) = mqtt_options.broker_address();
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(false);
    mqtt_options.set_manual_acks(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                if connack.session_present {
                    info!("Resumed MQTT session, subscription to {} kept", topic);
                } else {
                    // try_subscribe: this task is the one driving the eventloop.
                    client.try_subscribe(topic.as_str(), QoS::AtLeastOnce)?;
                    info!("Subscribed to {} with QoS 1", topic);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );

                consumer.consume(&publish.payload).await;

                if let Err(e) = client.try_ack(&publish) {
                    warn!("Failed to acknowledge message pkid={}: {}", publish.pkid, e);
                }
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc automatically reconnects, so we just log and continue
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
