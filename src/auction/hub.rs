//! SignalR JSON hub transport.
//!
//! Records are JSON documents terminated by `0x1e`. After the handshake the
//! server pushes invocations (type 1), answers our invocations with
//! completions (type 3), pings (type 6) and may close the hub (type 7).
//! A lost socket is re-opened with capped exponential backoff; callers see
//! the lifecycle as [`HubSignal`]s.

use crate::config::{ClientConfig, TokenProvider};
use crate::error::AppError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const RECORD_SEPARATOR: char = '\u{1e}';
const HANDSHAKE_REQUEST: &str = r#"{"protocol":"json","version":1}"#;
const MESSAGE_INVOCATION: u8 = 1;
const MESSAGE_COMPLETION: u8 = 3;
const MESSAGE_PING: u8 = 6;
const MESSAGE_CLOSE: u8 = 7;
const MAX_RECONNECT_DELAY_MS: u64 = 5_000;

pub type HubSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle and traffic reported by a running transport.
#[derive(Debug, Clone, PartialEq)]
pub enum HubSignal {
    Event { name: String, args: Vec<Value> },
    Reconnecting { reason: String },
    Reconnected,
    /// Terminal. `reason` is `None` after a requested stop.
    Closed { reason: Option<String> },
}

#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Opens the connection; the receiver yields signals until `Closed`.
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<HubSignal>, AppError>;

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, AppError>;

    async fn stop(&self);
}

#[derive(Clone)]
pub struct HubConfig {
    pub hub_url: String,
    pub token: TokenProvider,
    pub keep_alive_interval: Duration,
    pub invocation_timeout: Duration,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl HubConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            hub_url: format!("{}{}", config.api_base_url, config.hub_path),
            token: config.token_provider(),
            keep_alive_interval: config.keep_alive_interval(),
            invocation_timeout: config.request_timeout(),
            reconnect_base_delay_ms: config.reconnect_base_delay_ms,
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Result<Value, String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    Other(u8),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubFrame {
    #[serde(rename = "type")]
    kind: u8,
    target: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    invocation_id: Option<String>,
    result: Option<Value>,
    error: Option<String>,
    allow_reconnect: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct HandshakeReply {
    error: Option<String>,
}

pub fn hub_ws_url(hub_url: &str, access_token: Option<&str>) -> Result<String, AppError> {
    let mut url = Url::parse(hub_url)
        .map_err(|error| AppError::InvalidArgument(format!("invalid hub url '{hub_url}': {error}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(AppError::InvalidArgument(format!(
                "unsupported hub url scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AppError::InvalidArgument(format!("cannot use scheme {scheme} for {hub_url}")))?;
    if let Some(token) = access_token.filter(|token| !token.is_empty()) {
        url.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(url.into())
}

pub fn split_records(payload: &str) -> impl Iterator<Item = &str> {
    payload
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

pub fn parse_record(record: &str) -> Result<HubMessage, AppError> {
    let mut owned = record.as_bytes().to_vec();
    let frame: HubFrame = simd_json::serde::from_slice(owned.as_mut_slice())?;
    let message = match frame.kind {
        MESSAGE_INVOCATION => HubMessage::Invocation {
            target: frame
                .target
                .ok_or_else(|| AppError::malformed("invocation", "missing target"))?,
            arguments: frame.arguments,
        },
        MESSAGE_COMPLETION => HubMessage::Completion {
            invocation_id: frame.invocation_id.unwrap_or_default(),
            result: match frame.error {
                Some(error) => Err(error),
                None => Ok(frame.result.unwrap_or(Value::Null)),
            },
        },
        MESSAGE_PING => HubMessage::Ping,
        MESSAGE_CLOSE => HubMessage::Close {
            error: frame.error,
            allow_reconnect: frame.allow_reconnect.unwrap_or(false),
        },
        other => HubMessage::Other(other),
    };
    Ok(message)
}

fn check_handshake(record: &str) -> Result<(), AppError> {
    let mut owned = record.as_bytes().to_vec();
    let reply: HandshakeReply = simd_json::serde::from_slice(owned.as_mut_slice())
        .map_err(|error| AppError::HubHandshake(format!("unreadable reply: {error}")))?;
    match reply.error {
        Some(error) => Err(AppError::HubHandshake(error)),
        None => Ok(()),
    }
}

fn encode_invocation(invocation_id: &str, method: &str, args: &[Value]) -> Result<String, AppError> {
    let frame = json!({
        "type": MESSAGE_INVOCATION,
        "invocationId": invocation_id,
        "target": method,
        "arguments": args,
    });
    Ok(format!("{}{RECORD_SEPARATOR}", serde_json::to_string(&frame)?))
}

fn ping_record() -> String {
    format!("{{\"type\":{MESSAGE_PING}}}{RECORD_SEPARATOR}")
}

fn reconnect_delay(base_delay_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.min(6);
    let base_ms = base_delay_ms.saturating_mul(1_u64 << exponent);
    let jitter_ms = (now_unix_ms().unsigned_abs() % 250).min(249);
    Duration::from_millis(base_ms.saturating_add(jitter_ms).min(MAX_RECONNECT_DELAY_MS))
}

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

async fn next_text(stream: &mut HubSocket) -> Result<String, AppError> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => return Ok(text),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(AppError::HubHandshake(
        "socket closed during handshake".to_string(),
    ))
}

async fn open_connection(config: &HubConfig) -> Result<(HubSocket, Vec<String>), AppError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(16 << 20),
        max_frame_size: Some(4 << 20),
        ..Default::default()
    };
    let token = (config.token)();
    let request = hub_ws_url(&config.hub_url, token.as_deref())?;
    let (mut stream, _) = connect_async_with_config(request, Some(ws_config), true).await?;

    stream
        .send(Message::Text(format!("{HANDSHAKE_REQUEST}{RECORD_SEPARATOR}")))
        .await?;
    let reply = tokio::time::timeout(config.invocation_timeout, next_text(&mut stream))
        .await
        .map_err(|_| AppError::HubHandshake("timed out waiting for reply".to_string()))??;

    let mut records = split_records(&reply).map(str::to_string);
    let handshake = records
        .next()
        .ok_or_else(|| AppError::HubHandshake("empty reply".to_string()))?;
    check_handshake(&handshake)?;
    Ok((stream, records.collect()))
}

type PendingReply = (String, oneshot::Sender<Result<Value, AppError>>);

#[derive(Default)]
struct TransportShared {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<String, PendingReply>>,
    next_invocation_id: AtomicU64,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TransportShared {
    fn install_outbound(&self) -> mpsc::UnboundedReceiver<String> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.outbound.lock() = Some(sender);
        receiver
    }

    fn drop_connection(&self, reason: &str) {
        self.outbound.lock().take();
        let pending: Vec<PendingReply> = self.pending.lock().drain().map(|(_, reply)| reply).collect();
        for (_, reply) in pending {
            let _ = reply.send(Err(AppError::HubClosed(reason.to_string())));
        }
    }

    fn complete(&self, invocation_id: &str, result: Result<Value, String>) {
        let Some((method, reply)) = self.pending.lock().remove(invocation_id) else {
            debug!(invocation_id, "completion for unknown invocation");
            return;
        };
        let outcome = result.map_err(|message| AppError::HubInvocation { method, message });
        let _ = reply.send(outcome);
    }
}

enum ConnectionEnd {
    Stopped,
    Lost(String),
    Fatal(String),
}

pub struct SignalRTransport {
    config: HubConfig,
    shared: Arc<TransportShared>,
}

impl SignalRTransport {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            shared: Arc::new(TransportShared::default()),
        }
    }
}

#[async_trait]
impl HubTransport for SignalRTransport {
    async fn start(&self) -> Result<mpsc::UnboundedReceiver<HubSignal>, AppError> {
        self.stop().await;

        let (stream, leftover) = open_connection(&self.config).await?;
        info!(hub_url = %self.config.hub_url, "hub connected");

        let (signal_sender, signal_receiver) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let outbound = self.shared.install_outbound();
        let handle = tokio::spawn(run_transport(
            self.config.clone(),
            Arc::clone(&self.shared),
            signal_sender,
            cancel_token.clone(),
            (stream, leftover, outbound),
        ));

        *self.shared.cancel.lock() = Some(cancel_token);
        *self.shared.task.lock() = Some(handle);
        Ok(signal_receiver)
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, AppError> {
        let outbound = self
            .shared
            .outbound
            .lock()
            .clone()
            .ok_or(AppError::HubNotConnected)?;
        let invocation_id = self
            .shared
            .next_invocation_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let frame = encode_invocation(&invocation_id, method, &args)?;

        let (reply_sender, reply_receiver) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .insert(invocation_id.clone(), (method.to_string(), reply_sender));
        if outbound.send(frame).is_err() {
            self.shared.pending.lock().remove(&invocation_id);
            return Err(AppError::HubNotConnected);
        }

        match tokio::time::timeout(self.config.invocation_timeout, reply_receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AppError::HubClosed(
                "connection dropped before completion".to_string(),
            )),
            Err(_) => {
                self.shared.pending.lock().remove(&invocation_id);
                Err(AppError::HubInvocation {
                    method: method.to_string(),
                    message: "timed out waiting for completion".to_string(),
                })
            }
        }
    }

    async fn stop(&self) {
        if let Some(cancel_token) = self.shared.cancel.lock().take() {
            cancel_token.cancel();
        }
        let handle = self.shared.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_transport(
    config: HubConfig,
    shared: Arc<TransportShared>,
    signals: mpsc::UnboundedSender<HubSignal>,
    cancel_token: CancellationToken,
    first: (HubSocket, Vec<String>, mpsc::UnboundedReceiver<String>),
) {
    let mut connection = Some(first);

    while let Some((stream, leftover, outbound)) = connection.take() {
        let end = run_connection(
            stream,
            leftover,
            outbound,
            &shared,
            &signals,
            &cancel_token,
            config.keep_alive_interval,
        )
        .await;

        let reason = match end {
            ConnectionEnd::Stopped => {
                shared.drop_connection("hub stopped");
                let _ = signals.send(HubSignal::Closed { reason: None });
                return;
            }
            ConnectionEnd::Fatal(reason) => {
                warn!(%reason, "hub closed by server");
                shared.drop_connection(&reason);
                let _ = signals.send(HubSignal::Closed {
                    reason: Some(reason),
                });
                return;
            }
            ConnectionEnd::Lost(reason) => reason,
        };

        warn!(%reason, "hub connection lost");
        shared.drop_connection(&reason);
        let _ = signals.send(HubSignal::Reconnecting {
            reason: reason.clone(),
        });

        let mut last_error = reason;
        let mut reconnect_attempt = 0_u32;
        while connection.is_none() {
            if reconnect_attempt >= config.max_reconnect_attempts {
                let _ = signals.send(HubSignal::Closed {
                    reason: Some(format!(
                        "gave up after {reconnect_attempt} reconnect attempts: {last_error}"
                    )),
                });
                return;
            }

            reconnect_attempt = reconnect_attempt.saturating_add(1);
            let delay = reconnect_delay(config.reconnect_base_delay_ms, reconnect_attempt);
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    let _ = signals.send(HubSignal::Closed { reason: None });
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match open_connection(&config).await {
                Ok((stream, leftover)) => {
                    info!(reconnect_attempt, "hub reconnected");
                    let outbound = shared.install_outbound();
                    connection = Some((stream, leftover, outbound));
                    let _ = signals.send(HubSignal::Reconnected);
                }
                Err(error) => {
                    warn!(reconnect_attempt, %error, "hub reconnect failed");
                    last_error = error.to_string();
                }
            }
        }
    }
}

fn dispatch(
    record: &str,
    shared: &TransportShared,
    signals: &mpsc::UnboundedSender<HubSignal>,
) -> Option<ConnectionEnd> {
    let message = match parse_record(record) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "dropping unreadable hub record");
            return None;
        }
    };

    match message {
        HubMessage::Invocation { target, arguments } => {
            let _ = signals.send(HubSignal::Event {
                name: target,
                args: arguments,
            });
        }
        HubMessage::Completion {
            invocation_id,
            result,
        } => shared.complete(&invocation_id, result),
        HubMessage::Ping => {}
        HubMessage::Close {
            error,
            allow_reconnect,
        } => {
            let reason = error.unwrap_or_else(|| "server closed the hub".to_string());
            return Some(if allow_reconnect {
                ConnectionEnd::Lost(reason)
            } else {
                ConnectionEnd::Fatal(reason)
            });
        }
        HubMessage::Other(kind) => debug!(kind, "ignoring hub message"),
    }
    None
}

async fn run_connection(
    stream: HubSocket,
    leftover: Vec<String>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    shared: &TransportShared,
    signals: &mpsc::UnboundedSender<HubSignal>,
    cancel_token: &CancellationToken,
    keep_alive_interval: Duration,
) -> ConnectionEnd {
    for record in &leftover {
        if let Some(end) = dispatch(record, shared, signals) {
            return end;
        }
    }

    let (mut sink, mut source) = stream.split();
    let server_timeout = keep_alive_interval.saturating_mul(2);
    let mut last_received = Instant::now();
    let mut keep_alive = tokio::time::interval(keep_alive_interval);
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Skip);
    keep_alive.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return ConnectionEnd::Stopped;
            }
            Some(frame) = outbound.recv() => {
                if let Err(error) = sink.send(Message::Text(frame)).await {
                    return ConnectionEnd::Lost(format!("websocket write error: {error}"));
                }
            }
            _ = keep_alive.tick() => {
                if last_received.elapsed() > server_timeout {
                    return ConnectionEnd::Lost("server timeout".to_string());
                }
                if let Err(error) = sink.send(Message::Text(ping_record())).await {
                    return ConnectionEnd::Lost(format!("websocket write error: {error}"));
                }
            }
            next_frame = source.next() => {
                let Some(frame_result) = next_frame else {
                    return ConnectionEnd::Lost("websocket stream ended".to_string());
                };
                match frame_result {
                    Ok(Message::Text(payload)) => {
                        last_received = Instant::now();
                        for record in split_records(&payload) {
                            if let Some(end) = dispatch(record, shared, signals) {
                                return end;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        return ConnectionEnd::Lost("websocket closed by server".to_string());
                    }
                    Ok(_) => last_received = Instant::now(),
                    Err(error) => {
                        return ConnectionEnd::Lost(format!("websocket frame error: {error}"));
                    }
                }
            }
        }
    }
}
