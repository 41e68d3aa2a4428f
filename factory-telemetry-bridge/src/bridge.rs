// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The [`TelemetryBridge`]: one MQTT session translated into typed events.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, QoS};
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::ConnectOverrides;
use crate::events::{BridgeEvent, EventKind, EventListeners};
use crate::telemetry::{self, TelemetryCategory, TelemetryEvent, TOPIC_FILTERS};
use crate::transport::{self, Transport, TransportSignal};

/// Capacity of the request channel between the client handle and its event loop.
const REQUEST_CAPACITY: usize = 100;
/// How long `disconnect` waits for the event loop task to exit before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
/// How long a shutting-down event loop keeps polling to get a DISCONNECT out.
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub phase: ConnectionState,
    /// Reconnect signals since the last successful connect.
    pub reconnect_attempts: u32,
    /// Bumped whenever a session is opened or closed.
    pub epoch: u64,
}

/// Bridges the factory telemetry topics of one MQTT broker to typed events.
///
/// Construct one, attach handlers through [`listeners`](Self::listeners), then
/// [`connect`](Self::connect). The bridge is meant to be shared behind an `Arc`
/// by everything that consumes telemetry.
pub struct TelemetryBridge {
    shared: Arc<BridgeShared>,
    session: RwLock<Option<Session>>,
}

/// State shared between the bridge handle and its event loop task.
struct BridgeShared {
    state: watch::Sender<SessionState>,
    listeners: EventListeners,
}

/// What signal processing needs to know about the session a signal came from.
#[derive(Clone)]
struct SessionLink {
    epoch: u64,
    client_id: Arc<str>,
    transport: Arc<dyn Transport>,
}

struct Session {
    link: SessionLink,
    /// `true` asks the loop to flush a queued DISCONNECT before stopping.
    shutdown_tx: oneshot::Sender<bool>,
    task: JoinHandle<()>,
}

impl Default for TelemetryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryBridge {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            shared: Arc::new(BridgeShared {
                state,
                listeners: EventListeners::new(),
            }),
            session: RwLock::new(None),
        }
    }

    /// The registry application code attaches handlers to.
    pub fn listeners(&self) -> &EventListeners {
        &self.shared.listeners
    }

    /// Open a session to `broker_url` and subscribe to the factory topics once connected.
    ///
    /// Returns an error only when the session cannot be set up at all (bad URL,
    /// unsupported scheme, unusable options). Connection failures after that are
    /// reported through [`EventKind::Error`] listeners. Any previous session is
    /// torn down first.
    pub async fn connect(&self, broker_url: &str, overrides: ConnectOverrides) -> Result<()> {
        let options = overrides.resolve();
        let (mqtt_opts, network_opts) = transport::mqtt_options(broker_url, &options)?;

        let mut session = self.session.write().await;
        if let Some(previous) = session.take() {
            self.close_session(previous).await;
        }

        if self.shared.listeners.listener_count(EventKind::Error) == 0 {
            warn!(
                "[{}] No error listener attached; transport errors will only be logged",
                options.client_id
            );
        }
        info!(
            "[{}] Connecting to MQTT broker at {broker_url} (clean={}, reconnect_period={:?})",
            options.client_id, options.clean, options.reconnect_period
        );

        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, REQUEST_CAPACITY);
        eventloop.set_network_options(network_opts);

        let link = SessionLink {
            epoch: self.shared.begin_session(),
            client_id: Arc::from(options.client_id.as_str()),
            transport: Arc::new(client),
        };
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(
            self.shared.clone(),
            link.clone(),
            eventloop,
            options.reconnect_period,
            shutdown_rx,
        ));

        *session = Some(Session {
            link,
            shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Subscribe to `filter` with QoS 1. Skipped silently while not connected.
    pub async fn subscribe(&self, filter: &str) {
        self.subscribe_with_qos(filter, QoS::AtLeastOnce).await;
    }

    /// Subscribe to `filter`. Skipped silently while not connected; failures are only logged.
    pub async fn subscribe_with_qos(&self, filter: &str, qos: QoS) {
        if let Some(link) = self.active_link().await {
            self.shared.subscribe(&link, filter, qos).await;
        }
    }

    /// Unsubscribe from `filter`. Skipped silently while not connected; failures are only logged.
    pub async fn unsubscribe(&self, filter: &str) {
        if let Some(link) = self.active_link().await {
            self.shared.unsubscribe(&link, filter).await;
        }
    }

    /// Tear the session down immediately. Does nothing without an active session.
    pub async fn disconnect(&self) {
        let previous = self.session.write().await.take();
        if let Some(session) = previous {
            self.close_session(session).await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state.borrow().phase
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.borrow().reconnect_attempts
    }

    /// Follow state changes without registering a listener.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    async fn active_link(&self) -> Option<SessionLink> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.link.clone())
    }

    async fn close_session(&self, session: Session) {
        let Session {
            link,
            shutdown_tx,
            mut task,
        } = session;

        let previous = self.shared.end_session();
        let flush = previous == ConnectionState::Connected && {
            match link.transport.disconnect().await {
                Ok(()) => true,
                Err(e) => {
                    warn!("[{}] Could not queue DISCONNECT: {e}", link.client_id);
                    false
                }
            }
        };
        let _ = shutdown_tx.send(flush);
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
            warn!("[{}] Event loop did not stop in time, aborting it", link.client_id);
            task.abort();
        }

        info!("[{}] MQTT session closed", link.client_id);
        if previous != ConnectionState::Disconnected {
            self.shared.listeners.emit(&BridgeEvent::Disconnected);
        }
    }
}

impl BridgeShared {
    fn is_connected(&self) -> bool {
        self.state.borrow().phase == ConnectionState::Connected
    }

    fn begin_session(&self) -> u64 {
        let mut epoch = 0;
        self.state.send_modify(|state| {
            state.epoch += 1;
            state.phase = ConnectionState::Connecting;
            state.reconnect_attempts = 0;
            epoch = state.epoch;
        });
        epoch
    }

    /// Mark the current session closed and return the phase it was in.
    fn end_session(&self) -> ConnectionState {
        let mut previous = ConnectionState::Disconnected;
        self.state.send_modify(|state| {
            previous = state.phase;
            state.epoch += 1;
            state.phase = ConnectionState::Disconnected;
        });
        previous
    }

    /// Apply `change` only if `link` still belongs to the current session.
    ///
    /// The epoch check and the write happen under one lock, so a concurrent
    /// `end_session` can never be overwritten by a late signal.
    fn transition(&self, link: &SessionLink, change: impl FnOnce(&mut SessionState)) -> bool {
        self.state.send_if_modified(|state| {
            if state.epoch != link.epoch {
                return false;
            }
            change(state);
            true
        })
    }

    fn is_current(&self, link: &SessionLink) -> bool {
        self.state.borrow().epoch == link.epoch
    }

    async fn handle_signal(&self, link: &SessionLink, signal: TransportSignal) {
        match signal {
            TransportSignal::Connect { session_present } => {
                let applied = self.transition(link, |state| {
                    state.phase = ConnectionState::Connected;
                    state.reconnect_attempts = 0;
                });
                if !applied {
                    debug!("[{}] Ignoring connect from a closed session", link.client_id);
                    return;
                }
                info!("[{}] MQTT connected (session_present={session_present})", link.client_id);
                self.listeners.emit(&BridgeEvent::Connected);

                for filter in TOPIC_FILTERS {
                    self.subscribe(link, filter, QoS::AtLeastOnce).await;
                }
            }
            TransportSignal::Message { topic, payload } => {
                if self.is_current(link) {
                    self.handle_message(link, &topic, payload);
                }
            }
            TransportSignal::SubscriptionRejected { pkid } => {
                warn!("[{}] Broker rejected subscription (pkid={pkid})", link.client_id);
            }
            TransportSignal::Reconnect => {
                let mut attempt = 0;
                let applied = self.transition(link, |state| {
                    state.reconnect_attempts += 1;
                    state.phase = ConnectionState::Connecting;
                    attempt = state.reconnect_attempts;
                });
                if !applied {
                    return;
                }
                info!("[{}] Reconnecting... attempt {attempt}", link.client_id);
                self.listeners.emit(&BridgeEvent::Reconnecting { attempt });
            }
            TransportSignal::Error(e) => {
                if self.is_current(link) {
                    error!("[{}] MQTT connection error: {e}", link.client_id);
                    self.listeners.emit(&BridgeEvent::Error(e));
                }
            }
            TransportSignal::Close => {
                if !self.transition(link, |state| state.phase = ConnectionState::Disconnected) {
                    return;
                }
                info!("[{}] MQTT connection closed", link.client_id);
                self.listeners.emit(&BridgeEvent::Disconnected);
            }
        }
    }

    async fn subscribe(&self, link: &SessionLink, filter: &str, qos: QoS) {
        if !self.is_connected() {
            debug!("[{}] Not connected, skipping subscribe to '{filter}'", link.client_id);
            return;
        }
        match link.transport.subscribe(filter, qos).await {
            Ok(()) => info!("[{}] Subscribing to '{filter}' ({qos:?})", link.client_id),
            Err(e) => warn!("[{}] Subscribe to '{filter}' failed: {e}", link.client_id),
        }
    }

    async fn unsubscribe(&self, link: &SessionLink, filter: &str) {
        if !self.is_connected() {
            debug!("[{}] Not connected, skipping unsubscribe from '{filter}'", link.client_id);
            return;
        }
        match link.transport.unsubscribe(filter).await {
            Ok(()) => debug!("[{}] Unsubscribed from '{filter}'", link.client_id),
            Err(e) => warn!("[{}] Unsubscribe from '{filter}' failed: {e}", link.client_id),
        }
    }

    fn handle_message(&self, link: &SessionLink, topic: &str, payload: Bytes) {
        match telemetry::parse_message(topic, payload, Utc::now()) {
            Ok(event) => {
                debug!("[{}] Telemetry on '{topic}'", link.client_id);
                self.dispatch_telemetry(Arc::new(event));
            }
            Err(e) => {
                warn!("[{}] Failed to parse payload on topic '{topic}': {}", link.client_id, e.error);
                self.listeners.emit(&BridgeEvent::MessageError(e));
            }
        }
    }

    fn dispatch_telemetry(&self, event: Arc<TelemetryEvent>) {
        let category = TelemetryCategory::classify(&event.topic, event.message_type.as_deref());
        self.listeners.emit(&BridgeEvent::Message(event.clone()));

        match category {
            Some(TelemetryCategory::Status) => {
                self.listeners.emit(&BridgeEvent::StatusUpdate(event));
            }
            Some(TelemetryCategory::Data) => {
                self.listeners.emit(&BridgeEvent::DataUpdate(event));
            }
            Some(TelemetryCategory::Lwt) => {
                self.listeners.emit(&BridgeEvent::DeviceLwt(event));
            }
            None => {}
        }
    }
}

/// Drives one session's `rumqttc` event loop until shutdown.
///
/// A poll error is reported as an error followed by a close. With a non-zero
/// reconnect period the loop waits that long, signals a reconnect and polls
/// again (which makes `rumqttc` dial a fresh connection); otherwise it stops.
async fn run_event_loop(
    shared: Arc<BridgeShared>,
    link: SessionLink,
    mut eventloop: EventLoop,
    reconnect_period: Duration,
    mut shutdown_rx: oneshot::Receiver<bool>,
) {
    info!("[{}] MQTT event loop started", link.client_id);
    loop {
        tokio::select! {
            biased;
            flush = &mut shutdown_rx => {
                info!("[{}] Shutdown signal received", link.client_id);
                if flush.unwrap_or(false) {
                    flush_disconnect(&link, &mut eventloop).await;
                }
                break;
            }
            event = eventloop.poll() => {
                match event {
                    Ok(event) => {
                        if let Some(signal) = transport::route_event(&event) {
                            shared.handle_signal(&link, signal).await;
                        }
                    }
                    Err(e) => {
                        shared.handle_signal(&link, TransportSignal::Error(e)).await;
                        shared.handle_signal(&link, TransportSignal::Close).await;

                        if reconnect_period.is_zero() {
                            info!("[{}] Auto-reconnect disabled, stopping event loop", link.client_id);
                            break;
                        }
                        let shutdown = tokio::select! {
                            biased;
                            _ = &mut shutdown_rx => true,
                            _ = tokio::time::sleep(reconnect_period) => false,
                        };
                        if shutdown {
                            info!("[{}] Shutdown signal received", link.client_id);
                            break;
                        }
                        shared.handle_signal(&link, TransportSignal::Reconnect).await;
                    }
                }
            }
        }
    }
    info!("[{}] MQTT event loop stopped", link.client_id);
}

/// Poll until the queued DISCONNECT has been written, bounded by [`DISCONNECT_FLUSH`].
async fn flush_disconnect(link: &SessionLink, eventloop: &mut EventLoop) {
    let flushed = tokio::time::timeout(DISCONNECT_FLUSH, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await;
    match flushed {
        Ok(true) => debug!("[{}] DISCONNECT sent", link.client_id),
        _ => debug!("[{}] DISCONNECT not sent before shutdown", link.client_id),
    }
}
