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

//! Factory telemetry bridge.
//!
//! Connects to an MQTT broker, subscribes to `factory/+/+/data`,
//! `factory/+/+/status` and `factory/lwt/+`, parses JSON payloads and
//! re-emits them as typed [`BridgeEvent`]s to registered listeners.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use factory_telemetry_bridge::{ConnectOverrides, TelemetryBridge};
//!
//! let bridge = Arc::new(TelemetryBridge::new());
//! bridge.listeners().on_error(|e| eprintln!("MQTT error: {e}"));
//! bridge.listeners().on_status_update(|event| {
//!     println!("{} is now {}", event.device_id.as_deref().unwrap_or("?"), event.to_json());
//! });
//!
//! bridge
//!     .connect("mqtt://broker.local:1883", ConnectOverrides::new().reconnect_period_ms(5000))
//!     .await?;
//! ```

pub mod bridge;
pub mod config;
pub mod events;
pub mod telemetry;
pub mod transport;

pub use bridge::{ConnectionState, SessionState, TelemetryBridge};
pub use config::{ConnectOptions, ConnectOverrides};
pub use events::{BridgeEvent, EventKind, EventListeners, ListenerId};
pub use telemetry::{MessageError, TelemetryCategory, TelemetryEvent, TOPIC_FILTERS};
pub use transport::{Transport, TransportSignal};

pub use rumqttc::QoS;
