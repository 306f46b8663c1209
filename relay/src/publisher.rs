//! Hand-off of accepted readings onto the message channel.
//!
//! [`Publisher`] is the capability the ingress handler depends on. The MQTT
//! implementation only reports success once the broker has acknowledged the
//! packet (QoS 1 PUBACK), never on local buffering.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::envelope::Envelope;
use crate::errors::{Error, Result};
use crate::model::Reading;

/// Identifier assigned to a published message.
pub type MessageId = String;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Serializes `reading` and waits until the channel has accepted it.
    async fn publish(&self, reading: &Reading) -> Result<MessageId>;
}

pub type PublisherPtr = Arc<dyn Publisher>;

/// Capacity of the request and event queues around the MQTT eventloop.
const REQUEST_CAPACITY: usize = 1024;

type AckSender = oneshot::Sender<Result<()>>;

struct PublishRequest {
    payload: Vec<u8>,
    ack: AckSender,
}

/// Publishes envelopes to a single MQTT topic at QoS 1.
///
/// The eventloop is polled by its own task and never cancelled, so a
/// reconnect in progress is not torn down by incoming requests. A second task
/// owns the client and matches the packet ids reported by the eventloop to
/// callers in submission order.
#[derive(Clone)]
pub struct MqttPublisher {
    requests: mpsc::Sender<PublishRequest>,
    timeout: Duration,
}

impl MqttPublisher {
    pub fn spawn(options: MqttOptions, topic: String, timeout: Duration) -> Self {
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = mpsc::channel(REQUEST_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(REQUEST_CAPACITY);

        info!("Publishing readings to MQTT topic {}", topic);
        tokio::spawn(drive_eventloop(eventloop, events_tx));
        tokio::spawn(run_publisher(client, topic, rx, events_rx));

        Self {
            requests: tx,
            timeout,
        }
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, reading: &Reading) -> Result<MessageId> {
        let payload = serde_json::to_vec(reading)?;
        let envelope = Envelope::wrap(&payload);
        let (ack, acked) = oneshot::channel();

        self.requests
            .send(PublishRequest {
                payload: envelope.to_bytes()?,
                ack,
            })
            .await
            .map_err(|_| Error::ChannelClosed)?;

        match tokio::time::timeout(self.timeout, acked).await {
            Ok(Ok(Ok(()))) => Ok(envelope.message.message_id),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => Err(Error::PublishTimeout(self.timeout.as_millis() as u64)),
        }
    }
}

type PollResult = std::result::Result<Event, ConnectionError>;

async fn drive_eventloop(mut eventloop: EventLoop, events: mpsc::Sender<PollResult>) {
    loop {
        let event = eventloop.poll().await;
        let failed = event.is_err();
        if events.send(event).await.is_err() {
            debug!("Publisher stopped, leaving MQTT eventloop");
            break;
        }
        if failed {
            // rumqttc reconnects on the next poll
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn run_publisher(
    client: AsyncClient,
    topic: String,
    mut requests: mpsc::Receiver<PublishRequest>,
    mut events: mpsc::Receiver<PollResult>,
) {
    let mut tracker = AckTracker::default();

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    info!("Publisher dropped, stopping MQTT client");
                    break;
                };
                match client.try_publish(&topic, QoS::AtLeastOnce, false, request.payload) {
                    Ok(()) => tracker.submitted(request.ack),
                    Err(e) => {
                        let _ = request.ack.send(Err(Error::Mqtt(e)));
                    }
                }
            }
            event = events.recv() => match event {
                Some(Ok(Event::Outgoing(Outgoing::Publish(pkid)))) => tracker.sent(pkid),
                Some(Ok(Event::Outgoing(Outgoing::AwaitAck(pkid)))) => tracker.collided(pkid),
                Some(Ok(Event::Incoming(Packet::PubAck(puback)))) => {
                    match tracker.acked(puback.pkid) {
                        Some(ack) => {
                            let _ = ack.send(Ok(()));
                        }
                        None => warn!("Unsolicited PUBACK for pkid={}", puback.pkid),
                    }
                }
                Some(Ok(Event::Incoming(Packet::ConnAck(_)))) => info!("Publisher connected to MQTT broker"),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    // Unacknowledged publishes are replayed by rumqttc after the
                    // reconnect; their callers keep waiting up to their timeout.
                    warn!(
                        "MQTT publisher error with {} publishes awaiting PUBACK: {}",
                        tracker.pending(),
                        e
                    );
                }
                None => {
                    error!("MQTT eventloop stopped");
                    break;
                }
            }
        }
    }
}

/// Matches broker acknowledgements to waiters.
///
/// Waiters are submitted in the same order the eventloop sends packets, so a
/// fresh `Outgoing::Publish` belongs to the oldest queued waiter. A publish
/// for a packet id that is already in flight is a replay after a reconnect
/// and keeps its original waiter.
#[derive(Debug)]
struct AckTracker<T> {
    /// Submitted to the client, waiting for a packet id.
    queued: VecDeque<T>,
    /// Sent to the broker, waiting for PUBACK.
    inflight: HashMap<u16, T>,
    /// Held back by rumqttc until the previous holder of its packet id is acked.
    collision: Option<(u16, T)>,
}

impl<T> Default for AckTracker<T> {
    fn default() -> Self {
        Self {
            queued: VecDeque::new(),
            inflight: HashMap::new(),
            collision: None,
        }
    }
}

impl<T> AckTracker<T> {
    fn submitted(&mut self, waiter: T) {
        self.queued.push_back(waiter);
    }

    fn sent(&mut self, pkid: u16) {
        if matches!(self.collision, Some((held, _)) if held == pkid) {
            // Installed once the previous holder's PUBACK arrives.
            return;
        }
        if self.inflight.contains_key(&pkid) {
            debug!("Publish replayed with pkid={}", pkid);
            return;
        }
        match self.queued.pop_front() {
            Some(waiter) => {
                debug!("Publish sent with pkid={}", pkid);
                self.inflight.insert(pkid, waiter);
            }
            None => warn!("Publish with pkid={} has no waiting caller", pkid),
        }
    }

    fn collided(&mut self, pkid: u16) {
        if let Some(waiter) = self.queued.pop_front() {
            debug!("Publish held back, pkid={} still in flight", pkid);
            self.collision = Some((pkid, waiter));
        }
    }

    fn acked(&mut self, pkid: u16) -> Option<T> {
        let waiter = self.inflight.remove(&pkid);
        if matches!(self.collision, Some((held, _)) if held == pkid) {
            if let Some((held, next)) = self.collision.take() {
                self.inflight.insert(held, next);
            }
        }
        waiter
    }

    fn pending(&self) -> usize {
        self.queued.len() + self.inflight.len() + usize::from(self.collision.is_some())
    }
}

/// In-process channel that hands envelope bytes straight to a receiver.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl MemoryChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Publisher for MemoryChannel {
    async fn publish(&self, reading: &Reading) -> Result<MessageId> {
        let payload = serde_json::to_vec(reading)?;
        let envelope = Envelope::wrap(&payload);
        self.tx
            .send(envelope.to_bytes()?)
            .map_err(|_| Error::ChannelClosed)?;
        Ok(envelope.message.message_id)
    }
}
