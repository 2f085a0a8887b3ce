//! Realtime alert channel
//!
//! A Socket.IO client over the WebSocket transport. The background task
//! keeps one connection alive per session, answers heartbeats, and forwards
//! scan alerts. Observers only ever see connected/disconnected transitions
//! and alerts.

pub mod codec;

use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

use crate::{config::ChannelConfig, errors::ScanAlertError, models::ScanAlert};
use codec::{encode_connect, EnginePacket, OpenInfo, SocketPacket, SocketPacketType};

const SCAN_EVENT: &str = "scan";

/// Time allowed for the transport and namespace handshakes
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Events visible to the rest of the application
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    Scan(ScanAlert),
}

/// Internal connection state, logged on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Builder for the alert channel of one authenticated session
pub struct ChannelBuilder {
    url: Url,
    token: String,
    backoff: Backoff,
    tx: mpsc::Sender<ChannelEvent>,
    rx: mpsc::Receiver<ChannelEvent>,
}

/// Running alert channel
///
/// Dropping it tears the connection down.
pub struct ChannelClient {
    rx: mpsc::Receiver<ChannelEvent>,
    handle: JoinHandle<Result<(), ScanAlertError>>,
}

impl ChannelBuilder {
    pub fn new(config: &ChannelConfig, token: &str) -> Result<Self, ScanAlertError> {
        let url = channel_url(config)?;
        let (tx, rx) = mpsc::channel(100);

        Ok(Self {
            url,
            token: token.to_string(),
            backoff: Backoff::new(config.reconnect_delay_min, config.reconnect_delay_max),
            tx,
            rx,
        })
    }

    /// Start the background connection task
    pub fn connect(self) -> ChannelClient {
        let handle = tokio::spawn(Self::process_events(
            self.tx,
            self.url,
            self.token,
            self.backoff,
        ));

        ChannelClient {
            rx: self.rx,
            handle,
        }
    }

    /// Keep the channel connected until the receiver goes away
    ///
    /// Transport failures, server disconnects and missed heartbeats lead to
    /// a reconnect after the backoff delay. A rejected token ends the task:
    /// retrying the same credentials cannot succeed.
    async fn process_events(
        tx: mpsc::Sender<ChannelEvent>,
        url: Url,
        token: String,
        mut backoff: Backoff,
    ) -> Result<(), ScanAlertError> {
        loop {
            debug!(state = ?ChannelState::Connecting, "Connecting to {}", url);
            let mut admitted = false;
            let result = Self::run_connection(&tx, &url, &token, &mut admitted).await;

            if admitted {
                backoff.reset();
                debug!(state = ?ChannelState::Disconnected, "Channel disconnected");
                if tx.send(ChannelEvent::Disconnected).await.is_err() {
                    return Ok(());
                }
            }

            match result {
                Ok(()) => info!("Alert channel closed"),
                Err(ScanAlertError::Unauthorized) => {
                    warn!("Alert channel rejected the session token");
                    return Err(ScanAlertError::Unauthorized);
                }
                Err(e) => warn!("Alert channel error: {}", e),
            }

            if tx.is_closed() {
                return Ok(());
            }

            let delay = backoff.next_delay();
            debug!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// One connection from handshake to close
    async fn run_connection(
        tx: &mpsc::Sender<ChannelEvent>,
        url: &Url,
        token: &str,
        admitted: &mut bool,
    ) -> Result<(), ScanAlertError> {
        let connected = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(url.as_str()))
            .await
            .map_err(|_| ScanAlertError::Protocol("connect timed out".to_string()))?;
        let (ws, _) = match connected {
            Ok(connected) => connected,
            // The token can also be refused at the upgrade, before any packet
            Err(WsError::Http(response)) if matches!(response.status().as_u16(), 401 | 403) => {
                warn!("Channel upgrade refused with {}", response.status());
                return Err(ScanAlertError::Unauthorized);
            }
            Err(e) => return Err(e.into()),
        };
        let (mut sink, mut stream) = ws.split();

        let open = match Self::next_packet(&mut stream, HANDSHAKE_TIMEOUT).await? {
            Some(EnginePacket::Open(open)) => open,
            Some(other) => {
                return Err(ScanAlertError::Protocol(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
            None => return Ok(()),
        };
        debug!("Transport open, sid={}", open.sid);

        sink.send(Message::Text(encode_connect(&json!({ "token": token }))))
            .await?;

        // Pings may arrive before the namespace answers
        loop {
            match Self::next_packet(&mut stream, HANDSHAKE_TIMEOUT).await? {
                Some(EnginePacket::Ping(data)) => Self::pong(&mut sink, data).await?,
                Some(EnginePacket::Message(payload)) => {
                    let packet = SocketPacket::decode(&payload)?;
                    match packet.packet_type {
                        SocketPacketType::Connect(_) if packet.is_default_namespace() => break,
                        SocketPacketType::ConnectError(message) => {
                            warn!("Channel handshake refused: {}", message);
                            return Err(ScanAlertError::Unauthorized);
                        }
                        other => debug!("Ignoring packet before connect: {:?}", other),
                    }
                }
                Some(EnginePacket::Close) | None => return Ok(()),
                Some(other) => debug!("Ignoring engine packet: {:?}", other),
            }
        }

        *admitted = true;
        info!(state = ?ChannelState::Connected, "Alert channel connected");
        if tx.send(ChannelEvent::Connected).await.is_err() {
            return Ok(());
        }

        let heartbeat = heartbeat_deadline(&open);
        loop {
            match Self::next_packet(&mut stream, heartbeat).await? {
                Some(EnginePacket::Ping(data)) => Self::pong(&mut sink, data).await?,
                Some(EnginePacket::Message(payload)) => {
                    let packet = match SocketPacket::decode(&payload) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!("Failed to decode packet: {}", e);
                            continue;
                        }
                    };
                    if !packet.is_default_namespace() {
                        debug!("Ignoring packet for namespace {}", packet.namespace);
                        continue;
                    }
                    match packet.packet_type {
                        SocketPacketType::Event { name, args, .. } => {
                            if let Some(alert) = Self::parse_event(&name, args) {
                                if tx.send(ChannelEvent::Scan(alert)).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        SocketPacketType::Disconnect => {
                            info!("Server closed the alert channel");
                            return Ok(());
                        }
                        other => debug!("Ignoring packet: {:?}", other),
                    }
                }
                Some(EnginePacket::Close) | None => return Ok(()),
                Some(other) => debug!("Ignoring engine packet: {:?}", other),
            }
        }
    }

    /// Extract an alert from an event, dropping anything else
    fn parse_event(name: &str, args: Vec<serde_json::Value>) -> Option<ScanAlert> {
        if name != SCAN_EVENT {
            debug!("Ignoring event {}", name);
            return None;
        }
        let Some(payload) = args.into_iter().next() else {
            warn!("Scan event without payload");
            return None;
        };
        match serde_json::from_value(payload) {
            Ok(alert) => Some(alert),
            Err(e) => {
                warn!("Failed to parse scan alert: {}", e);
                None
            }
        }
    }

    /// Next Engine.IO packet, or None when the transport closed
    async fn next_packet<S>(
        stream: &mut S,
        wait: Duration,
    ) -> Result<Option<EnginePacket>, ScanAlertError>
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(wait, stream.next())
                .await
                .map_err(|_| ScanAlertError::Protocol("heartbeat timed out".to_string()))?;
            match message {
                Some(Ok(Message::Text(text))) => return EnginePacket::decode(&text).map(Some),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn pong<S>(sink: &mut S, data: String) -> Result<(), ScanAlertError>
    where
        S: Sink<Message, Error = WsError> + Unpin,
    {
        sink.send(Message::Text(EnginePacket::Pong(data).encode()))
            .await?;
        Ok(())
    }
}

impl ChannelClient {
    /// Receive next event, None once the channel has stopped for good
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Whether the background task is still running
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Tear the connection down
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Silence after which the server is considered gone
fn heartbeat_deadline(open: &OpenInfo) -> Duration {
    Duration::from_millis(open.ping_interval.saturating_add(open.ping_timeout))
}

/// WebSocket endpoint of the Socket.IO server
fn channel_url(config: &ChannelConfig) -> Result<Url, ScanAlertError> {
    let mut url = Url::parse(&config.url).map_err(|e| ScanAlertError::ConfigurationError {
        message: format!("Invalid channel URL {}: {}", config.url, e),
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            error!("Unsupported channel scheme {}", other);
            return Err(ScanAlertError::ConfigurationError {
                message: format!("Unsupported channel URL scheme: {}", other),
            });
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ScanAlertError::ConfigurationError {
            message: format!("Cannot use scheme {} for {}", scheme, config.url),
        })?;

    let path = format!("{}/", config.path.trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}
