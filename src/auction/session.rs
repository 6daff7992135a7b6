//! Process-wide hub session shared by every view.
//!
//! Views never talk to the transport directly. They `join_scope` /
//! `leave_scope` by auction id and read normalized events from
//! [`HubSession::subscribe`]. Scope membership is reference counted; the
//! join command goes out on the first reference and again, exactly once per
//! scope, after every (re)connect.

use crate::auction::hub::{HubSignal, HubTransport};
use crate::auction::normalizer::{normalize, CanonicalEvent, Normalized};
use crate::auction::types::ConnectionState;
use crate::auction::EVENT_CHANNEL_CAPACITY;
use crate::config::ClientConfig;
use crate::error::AppError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ScopeEntry {
    auction_id: String,
    refs: usize,
}

struct PumpHandle {
    cancel_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

pub struct HubSession {
    transport: Arc<dyn HubTransport>,
    join_command: String,
    leave_command: String,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<CanonicalEvent>,
    scopes: Mutex<HashMap<String, ScopeEntry>>,
    pump: tokio::sync::Mutex<Option<PumpHandle>>,
}

fn scope_key(auction_id: &str) -> String {
    auction_id.trim().to_ascii_lowercase()
}

impl HubSession {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        join_command: impl Into<String>,
        leave_command: impl Into<String>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            transport,
            join_command: join_command.into(),
            leave_command: leave_command.into(),
            state,
            events,
            scopes: Mutex::new(HashMap::new()),
            pump: tokio::sync::Mutex::new(None),
        })
    }

    pub fn from_config(transport: Arc<dyn HubTransport>, config: &ClientConfig) -> Arc<Self> {
        Self::new(transport, &config.join_command, &config.leave_command)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CanonicalEvent> {
        self.events.subscribe()
    }

    pub fn scope_refs(&self, auction_id: &str) -> usize {
        self.scopes
            .lock()
            .get(&scope_key(auction_id))
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = previous.as_str(), to = next.as_str(), "hub state changed");
        }
    }

    /// Moves to `Connected` and snapshots the scopes to rejoin under one
    /// lock, so a concurrent `join_scope` sends its command exactly once.
    fn mark_connected(&self) -> Vec<String> {
        let scopes = self.scopes.lock();
        self.set_state(ConnectionState::Connected);
        scopes.values().map(|entry| entry.auction_id.clone()).collect()
    }

    /// Idempotent: a running session is left untouched.
    pub async fn connect(self: &Arc<Self>) -> Result<(), AppError> {
        let mut pump = self.pump.lock().await;
        if let Some(running) = pump.as_ref() {
            if !running.join_handle.is_finished() {
                return Ok(());
            }
        }

        self.set_state(ConnectionState::Connecting);
        let signals = match self.transport.start().await {
            Ok(signals) => signals,
            Err(error) => {
                warn!(%error, "hub connect failed");
                self.set_state(ConnectionState::Error);
                return Err(error);
            }
        };

        info!("hub session connected");
        let rejoin = self.mark_connected();
        for auction_id in rejoin {
            self.send_scope_command(&self.join_command, &auction_id).await;
        }

        let cancel_token = CancellationToken::new();
        let join_handle = tokio::spawn(run_signal_pump(
            Arc::downgrade(self),
            signals,
            cancel_token.clone(),
        ));
        *pump = Some(PumpHandle {
            cancel_token,
            join_handle,
        });
        Ok(())
    }

    pub async fn disconnect(&self) {
        let mut pump = self.pump.lock().await;
        let running = pump.take();
        if let Some(running) = running.as_ref() {
            running.cancel_token.cancel();
        }
        self.transport.stop().await;
        if let Some(running) = running {
            let _ = running.join_handle.await;
        }
        self.set_state(ConnectionState::Disconnected);
        info!("hub session disconnected");
    }

    pub async fn join_scope(&self, auction_id: &str) {
        let should_send = {
            let mut scopes = self.scopes.lock();
            let entry = scopes
                .entry(scope_key(auction_id))
                .or_insert_with(|| ScopeEntry {
                    auction_id: auction_id.trim().to_string(),
                    refs: 0,
                });
            entry.refs += 1;
            entry.refs == 1 && self.connection_state() == ConnectionState::Connected
        };

        if should_send {
            self.send_scope_command(&self.join_command, auction_id.trim())
                .await;
        }
    }

    pub async fn leave_scope(&self, auction_id: &str) {
        let should_send = {
            let mut scopes = self.scopes.lock();
            let key = scope_key(auction_id);
            match scopes.get_mut(&key) {
                None => {
                    debug!(auction_id, "leave for scope that was never joined");
                    false
                }
                Some(entry) if entry.refs > 1 => {
                    entry.refs -= 1;
                    false
                }
                Some(_) => {
                    scopes.remove(&key);
                    self.connection_state() == ConnectionState::Connected
                }
            }
        };

        if should_send {
            self.send_scope_command(&self.leave_command, auction_id.trim())
                .await;
        }
    }

    async fn send_scope_command(&self, method: &str, auction_id: &str) {
        let args = vec![Value::from(auction_id)];
        match self.transport.invoke(method, args).await {
            Ok(_) => debug!(method, auction_id, "scope command sent"),
            Err(error) => warn!(method, auction_id, %error, "scope command failed"),
        }
    }

    /// Returns `true` once the transport is closed for good.
    async fn handle_signal(&self, signal: HubSignal) -> bool {
        match signal {
            HubSignal::Event { name, args } => {
                match normalize(&name, &args) {
                    Ok(Normalized::Event(event)) => {
                        let _ = self.events.send(event);
                    }
                    Ok(Normalized::Unrecognized(name)) => debug!(%name, "unrecognized hub event"),
                    Err(error) => warn!(%error, "dropping malformed hub event"),
                }
                false
            }
            HubSignal::Reconnecting { reason } => {
                warn!(%reason, "hub reconnecting");
                self.set_state(ConnectionState::Reconnecting);
                false
            }
            HubSignal::Reconnected => {
                let rejoin = self.mark_connected();
                info!(scopes = rejoin.len(), "hub reconnected, rejoining scopes");
                for auction_id in rejoin {
                    self.send_scope_command(&self.join_command, &auction_id)
                        .await;
                }
                false
            }
            HubSignal::Closed { reason: None } => {
                self.set_state(ConnectionState::Disconnected);
                true
            }
            HubSignal::Closed {
                reason: Some(reason),
            } => {
                if self.connection_state() == ConnectionState::Reconnecting {
                    warn!(%reason, "hub reconnection abandoned");
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    warn!(%reason, "hub closed");
                    self.set_state(ConnectionState::Error);
                }
                true
            }
        }
    }
}

async fn run_signal_pump(
    session: Weak<HubSession>,
    mut signals: mpsc::UnboundedReceiver<HubSignal>,
    cancel_token: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel_token.cancelled() => break,
            signal = signals.recv() => signal,
        };

        let Some(session) = session.upgrade() else {
            break;
        };
        let Some(signal) = signal else {
            session.set_state(ConnectionState::Disconnected);
            break;
        };
        if session.handle_signal(signal).await {
            break;
        }
    }
}
