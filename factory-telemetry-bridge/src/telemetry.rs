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

//! Converting factory MQTT payloads into [`TelemetryEvent`]s.

use std::borrow::Cow;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Per-device measurements: `factory/<line>/<device>/data`.
pub const DATA_FILTER: &str = "factory/+/+/data";
/// Per-device status reports: `factory/<line>/<device>/status`.
pub const STATUS_FILTER: &str = "factory/+/+/status";
/// Last-will notices published by the broker: `factory/lwt/<device>`.
pub const LWT_FILTER: &str = "factory/lwt/+";

/// Filters subscribed on every successful connect.
pub const TOPIC_FILTERS: [&str; 3] = [DATA_FILTER, STATUS_FILTER, LWT_FILTER];

/// Keys the flattened JSON view reserves for derived fields.
pub const RESERVED_FIELDS: [&str; 5] = ["topic", "line", "deviceId", "messageType", "timestamp"];

/// An inbound telemetry message with the fields derived from its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    /// Raw topic the message arrived on.
    pub topic: String,
    /// Second topic segment.
    pub line: Option<String>,
    /// Third topic segment.
    pub device_id: Option<String>,
    /// Fourth topic segment (`data` or `status` for device topics).
    pub message_type: Option<String>,
    /// When the bridge received the message.
    pub timestamp: DateTime<Utc>,
    /// The payload exactly as published.
    pub payload: Value,
}

impl TelemetryEvent {
    /// Look up a field of an object payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.as_object().and_then(|map| map.get(name))
    }

    /// Receipt time as ISO-8601 with millisecond precision, e.g. `2025-03-01T08:00:00.000Z`.
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// The flat shape dashboards consume: payload fields followed by the derived fields.
    ///
    /// Derived fields shadow payload fields of the same name. Fields whose topic
    /// segment is missing are omitted.
    pub fn to_json(&self) -> Value {
        let mut map = match &self.payload {
            Value::Object(fields) => fields.clone(),
            _ => Map::new(),
        };
        map.insert("topic".into(), Value::String(self.topic.clone()));
        let derived = [
            ("line", &self.line),
            ("deviceId", &self.device_id),
            ("messageType", &self.message_type),
        ];
        for (key, value) in derived {
            match value {
                Some(value) => {
                    map.insert(key.into(), Value::String(value.clone()));
                }
                None => {
                    map.remove(key);
                }
            }
        }
        map.insert("timestamp".into(), Value::String(self.timestamp_iso()));
        Value::Object(map)
    }
}

impl Serialize for TelemetryEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// The specialized event a telemetry message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryCategory {
    Status,
    Data,
    Lwt,
}

impl TelemetryCategory {
    /// Precedence is status, then data, then any topic containing `lwt`.
    pub fn classify(topic: &str, message_type: Option<&str>) -> Option<Self> {
        match message_type {
            Some("status") => Some(Self::Status),
            Some("data") => Some(Self::Data),
            _ if topic.contains("lwt") => Some(Self::Lwt),
            _ => None,
        }
    }
}

/// A message whose payload could not be parsed.
#[derive(Debug)]
pub struct MessageError {
    pub topic: String,
    pub raw_message: Bytes,
    pub error: serde_json::Error,
}

impl MessageError {
    /// The payload decoded as UTF-8, with invalid sequences replaced.
    pub fn raw_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_message)
    }
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid payload on topic '{}': {}", self.topic, self.error)
    }
}

impl std::error::Error for MessageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Parses a raw MQTT payload into a [`TelemetryEvent`].
///
/// The payload is decoded as UTF-8 (lossily) and parsed as JSON; any JSON value
/// is accepted. The topic is split on `/` and segments 1, 2 and 3 become the
/// line, device ID and message type.
pub fn parse_message(
    topic: &str,
    payload: Bytes,
    received_at: DateTime<Utc>,
) -> Result<TelemetryEvent, MessageError> {
    let parsed = serde_json::from_str::<Value>(&String::from_utf8_lossy(&payload));
    let payload = match parsed {
        Ok(value) => value,
        Err(error) => {
            return Err(MessageError {
                topic: topic.to_string(),
                raw_message: payload,
                error,
            })
        }
    };

    let mut segments = topic.split('/').skip(1).map(str::to_string);

    Ok(TelemetryEvent {
        topic: topic.to_string(),
        line: segments.next(),
        device_id: segments.next(),
        message_type: segments.next(),
        timestamp: received_at,
        payload,
    })
}
