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

//! Application events emitted by the bridge and the registry consumers attach handlers to.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use rumqttc::ConnectionError;
use uuid::Uuid;

use crate::telemetry::{MessageError, TelemetryEvent};

/// An event emitted by [`TelemetryBridge`](crate::TelemetryBridge).
#[derive(Debug)]
pub enum BridgeEvent {
    Connected,
    Disconnected,
    /// The transport is about to retry; `attempt` counts since the last successful connect.
    Reconnecting { attempt: u32 },
    Error(ConnectionError),
    /// Every successfully parsed message.
    Message(Arc<TelemetryEvent>),
    StatusUpdate(Arc<TelemetryEvent>),
    DataUpdate(Arc<TelemetryEvent>),
    DeviceLwt(Arc<TelemetryEvent>),
    MessageError(MessageError),
}

impl BridgeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Error(_) => EventKind::Error,
            Self::Message(_) => EventKind::Message,
            Self::StatusUpdate(_) => EventKind::StatusUpdate,
            Self::DataUpdate(_) => EventKind::DataUpdate,
            Self::DeviceLwt(_) => EventKind::DeviceLwt,
            Self::MessageError(_) => EventKind::MessageError,
        }
    }

    /// The telemetry carried by message events.
    pub fn telemetry(&self) -> Option<&Arc<TelemetryEvent>> {
        match self {
            Self::Message(event)
            | Self::StatusUpdate(event)
            | Self::DataUpdate(event)
            | Self::DeviceLwt(event) => Some(event),
            _ => None,
        }
    }
}

/// Discriminant of [`BridgeEvent`], used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    Message,
    StatusUpdate,
    DataUpdate,
    DeviceLwt,
    MessageError,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Error,
        EventKind::Message,
        EventKind::StatusUpdate,
        EventKind::DataUpdate,
        EventKind::DeviceLwt,
        EventKind::MessageError,
    ];

    /// Event name as used by dashboard code.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnecting => "reconnecting",
            EventKind::Error => "error",
            EventKind::Message => "message",
            EventKind::StatusUpdate => "status-update",
            EventKind::DataUpdate => "data-update",
            EventKind::DeviceLwt => "device-lwt",
            EventKind::MessageError => "message-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a registered handler so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

type Handler = Arc<dyn Fn(&BridgeEvent) + Send + Sync>;

/// Typed listener registry.
///
/// Handlers for one event kind run in registration order on the task that
/// processes transport signals, so they should return quickly. A handler may
/// register or remove listeners while it runs.
#[derive(Default)]
pub struct EventListeners {
    handlers: DashMap<EventKind, Vec<(ListenerId, Handler)>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that receives every event of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&BridgeEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(Uuid::new_v4());
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_connected<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Connected, move |_| handler())
    }

    pub fn on_disconnected<F>(&self, handler: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on(EventKind::Disconnected, move |_| handler())
    }

    pub fn on_reconnecting<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on(EventKind::Reconnecting, move |event| {
            if let BridgeEvent::Reconnecting { attempt } = event {
                handler(*attempt);
            }
        })
    }

    /// Transport errors. Without at least one of these, connection failures are only logged.
    pub fn on_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let BridgeEvent::Error(error) = event {
                handler(error);
            }
        })
    }

    pub fn on_message<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Arc<TelemetryEvent>) + Send + Sync + 'static,
    {
        self.on_telemetry(EventKind::Message, handler)
    }

    pub fn on_status_update<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Arc<TelemetryEvent>) + Send + Sync + 'static,
    {
        self.on_telemetry(EventKind::StatusUpdate, handler)
    }

    pub fn on_data_update<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Arc<TelemetryEvent>) + Send + Sync + 'static,
    {
        self.on_telemetry(EventKind::DataUpdate, handler)
    }

    pub fn on_device_lwt<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Arc<TelemetryEvent>) + Send + Sync + 'static,
    {
        self.on_telemetry(EventKind::DeviceLwt, handler)
    }

    pub fn on_message_error<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&MessageError) + Send + Sync + 'static,
    {
        self.on(EventKind::MessageError, move |event| {
            if let BridgeEvent::MessageError(error) = event {
                handler(error);
            }
        })
    }

    fn on_telemetry<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Arc<TelemetryEvent>) + Send + Sync + 'static,
    {
        self.on(kind, move |event| {
            if let Some(telemetry) = event.telemetry() {
                handler(telemetry);
            }
        })
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        for mut entry in self.handlers.iter_mut() {
            let handlers = entry.value_mut();
            if let Some(pos) = handlers.iter().position(|(existing, _)| *existing == id) {
                handlers.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, |handlers| handlers.len())
    }

    /// Invoke every handler registered for the event's kind. Returns how many ran.
    pub(crate) fn emit(&self, event: &BridgeEvent) -> usize {
        // Snapshot first so handlers can touch the registry without deadlocking.
        let handlers: Vec<Handler> = match self.handlers.get(&event.kind()) {
            Some(entry) => entry.iter().map(|(_, handler)| handler.clone()).collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            let count = self.listener_count(kind);
            if count > 0 {
                map.entry(&kind.as_str(), &count);
            }
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use bytes::Bytes;
    use chrono::Utc;

    use crate::telemetry::parse_message;

    fn telemetry(topic: &str) -> Arc<TelemetryEvent> {
        Arc::new(parse_message(topic, Bytes::from_static(b"{}"), Utc::now()).unwrap())
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let listeners = EventListeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let seen = seen.clone();
            listeners.on_connected(move || seen.lock().unwrap().push(label));
        }

        assert_eq!(listeners.emit(&BridgeEvent::Connected), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_handlers_only_see_their_kind() {
        let listeners = EventListeners::new();
        let data = Arc::new(AtomicUsize::new(0));
        let status = Arc::new(AtomicUsize::new(0));

        let counter = data.clone();
        listeners.on_data_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = status.clone();
        listeners.on_status_update(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&BridgeEvent::DataUpdate(telemetry("factory/l/d/data")));

        assert_eq!(data.load(Ordering::SeqCst), 1);
        assert_eq!(status.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_remove_listener() {
        let listeners = EventListeners::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let id = listeners.on_reconnecting(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        listeners.emit(&BridgeEvent::Reconnecting { attempt: 1 });
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.emit(&BridgeEvent::Reconnecting { attempt: 2 });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.listener_count(EventKind::Reconnecting), 0);
    }

    #[test]
    fn test_handler_may_register_listeners() {
        let listeners = Arc::new(EventListeners::new());

        let registry = listeners.clone();
        listeners.on_connected(move || {
            registry.on_disconnected(|| {});
        });

        listeners.emit(&BridgeEvent::Connected);
        assert_eq!(listeners.listener_count(EventKind::Disconnected), 1);
    }

    #[test]
    fn test_emit_without_listeners() {
        let listeners = EventListeners::new();
        assert_eq!(listeners.emit(&BridgeEvent::Disconnected), 0);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::StatusUpdate.to_string(), "status-update");
        assert_eq!(EventKind::DataUpdate.as_str(), "data-update");
        assert_eq!(EventKind::DeviceLwt.as_str(), "device-lwt");
        assert_eq!(EventKind::MessageError.as_str(), "message-error");
        assert_eq!(BridgeEvent::Reconnecting { attempt: 3 }.kind(), EventKind::Reconnecting);
    }
}
