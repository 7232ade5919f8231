// Aquaview Bridge - Hosted dashboard service
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! MQTT adapter
//!
//! [`MqttChannel`] implements the core [`MessageChannel`] over a rumqttc
//! [`AsyncClient`]. Requests use the non-blocking `try_*` calls so the app
//! loop never awaits the broker. The event loop runs in its own task
//! ([`spawn_pump`]) and forwards everything as [`ChannelEvent`]s; it also
//! performs the actual reconnection, since rumqttc reconnects on the next
//! poll after a failure.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aquaview::{ChannelError, ChannelEvent, ChannelMetrics, MessageChannel};
use clap::ValueEnum;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Packet, QoS, Transport,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pause after a connection error before polling again
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Transport to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    /// Plain TCP
    Mqtt,
    /// TLS with the platform roots
    Mqtts,
}

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Build rumqttc options
    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        if let Some(username) = &self.username {
            options.set_credentials(username, self.password.as_deref().unwrap_or_default());
        }
        if self.protocol == Protocol::Mqtts {
            options.set_transport(Transport::tls_with_default_config());
        }
        options
    }
}

#[derive(Debug, Default)]
struct Counters {
    connected: AtomicBool,
    bytes_published: AtomicU64,
    messages_published: AtomicU64,
    messages_received: AtomicU64,
    reconnects: AtomicU64,
}

/// Message channel backed by an MQTT broker
#[derive(Clone)]
pub struct MqttChannel {
    client: AsyncClient,
    counters: Arc<Counters>,
}

impl MqttChannel {
    /// Wrap a client; the channel starts disconnected
    pub fn new(client: AsyncClient) -> Self {
        Self {
            client,
            counters: Arc::new(Counters::default()),
        }
    }

    fn set_connected(&self, connected: bool) {
        self.counters.connected.store(connected, Ordering::SeqCst);
    }
}

impl MessageChannel for MqttChannel {
    fn subscribe(&mut self, topics: &[&str]) -> Result<(), ChannelError> {
        for topic in topics {
            self.client
                .try_subscribe(*topic, QoS::AtMostOnce)
                .map_err(client_error)?;
        }
        Ok(())
    }

    fn unsubscribe(&mut self, topics: &[&str]) -> Result<(), ChannelError> {
        for topic in topics {
            self.client.try_unsubscribe(*topic).map_err(client_error)?;
        }
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected {
                reason: "broker connection not established".to_string(),
            });
        }

        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(client_error)?;
        self.counters
            .bytes_published
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.counters
            .messages_published
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.counters.connected.load(Ordering::SeqCst)
    }

    fn reconnect(&mut self) -> Result<(), ChannelError> {
        // The pump reconnects on its next poll; this only records the request
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        debug!("reconnect requested");
        Ok(())
    }

    fn metrics(&self) -> ChannelMetrics {
        ChannelMetrics {
            bytes_published: self.counters.bytes_published.load(Ordering::Relaxed),
            messages_published: self.counters.messages_published.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
        }
    }
}

fn client_error(err: ClientError) -> ChannelError {
    match err {
        ClientError::TryRequest(_) => ChannelError::BufferFull,
        other => ChannelError::Transport(other.to_string()),
    }
}

/// Map a refused ConnAck code
pub fn refusal(code: ConnectReturnCode) -> ChannelError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            ChannelError::AuthFailed {
                reason: format!("{:?}", code),
            }
        }
        other => ChannelError::Refused {
            reason: format!("{:?}", other),
        },
    }
}

/// Map an event loop failure
pub fn connection_error(err: &ConnectionError) -> ChannelError {
    match err {
        ConnectionError::ConnectionRefused(code) => refusal(*code),
        other => ChannelError::Transport(other.to_string()),
    }
}

/// Drive the rumqttc event loop and forward events to the app
///
/// The task ends when the receiving side is dropped.
pub fn spawn_pump(
    mut eventloop: EventLoop,
    channel: MqttChannel,
    events: mpsc::Sender<ChannelEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    channel
                        .counters
                        .messages_received
                        .fetch_add(1, Ordering::Relaxed);
                    ChannelEvent::message(publish.topic, publish.payload.to_vec())
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("mqtt connected");
                        channel.set_connected(true);
                        ChannelEvent::Connected
                    } else {
                        channel.set_connected(false);
                        ChannelEvent::Error(refusal(ack.code))
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("mqtt disconnected");
                    channel.set_connected(false);
                    ChannelEvent::Disconnected
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(error = %e, "mqtt connection error");
                    let was_connected = channel.is_connected();
                    channel.set_connected(false);
                    if was_connected && events.send(ChannelEvent::Disconnected).await.is_err() {
                        break;
                    }
                    if events
                        .send(ChannelEvent::Error(connection_error(&e)))
                        .await
                        .is_err()
                    {
                        break;
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            if events.send(event).await.is_err() {
                break;
            }
        }
        debug!("mqtt pump stopped");
    })
}
