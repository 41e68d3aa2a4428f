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

//! Topics and JSON payloads published by a simulated device.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Operating status reported on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Running,
    Idle,
    Maintenance,
    Error,
    Offline,
}

impl DeviceStatus {
    /// Mostly running, with an occasional idle, maintenance or error report.
    pub fn for_tick(tick: u64) -> Self {
        match tick % 20 {
            7 | 13 => Self::Idle,
            17 => Self::Maintenance,
            19 => Self::Error,
            _ => Self::Running,
        }
    }
}

pub fn data_topic(line: &str, device_id: &str) -> String {
    format!("factory/{line}/{device_id}/data")
}

pub fn status_topic(line: &str, device_id: &str) -> String {
    format!("factory/{line}/{device_id}/status")
}

/// Topic the broker publishes the device's last will on.
pub fn lwt_topic(device_id: &str) -> String {
    format!("factory/lwt/{device_id}")
}

fn base_payload(device_id: &str, device_type: &str, now: DateTime<Utc>) -> Value {
    json!({
        "version": "1.0",
        "deviceId": device_id,
        "deviceType": device_type,
        "timestamp": now.to_rfc3339(),
    })
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(base_map), Value::Object(extra_map)) = (&mut base, extra) {
        base_map.extend(extra_map);
    }
    base
}

/// Status report for one tick.
pub fn status_payload(
    device_id: &str,
    device_type: &str,
    status: DeviceStatus,
    now: DateTime<Utc>,
) -> serde_json::Result<Vec<u8>> {
    let payload = merge(
        base_payload(device_id, device_type, now),
        json!({
            "status": status,
            "online": status != DeviceStatus::Offline,
        }),
    );
    serde_json::to_vec(&payload)
}

/// Retained offline status published on a clean shutdown.
pub fn offline_payload(
    device_id: &str,
    device_type: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> serde_json::Result<Vec<u8>> {
    let payload = merge(
        base_payload(device_id, device_type, now),
        json!({
            "status": DeviceStatus::Offline,
            "online": false,
            "reason": reason,
        }),
    );
    serde_json::to_vec(&payload)
}

/// Measurements for one tick. Values follow smooth waves so dashboards have something to plot.
pub fn data_payload(
    device_id: &str,
    device_type: &str,
    tick: u64,
    now: DateTime<Utc>,
) -> serde_json::Result<Vec<u8>> {
    let phase = tick as f64 * 0.3;
    let round2 = |v: f64| (v * 100.0).round() / 100.0;

    let payload = merge(
        base_payload(device_id, device_type, now),
        json!({
            "status": DeviceStatus::for_tick(tick),
            "metrics": {
                "temperature": round2(52.5 + 32.5 * phase.sin()),
                "pressure": round2(5.5 + 5.0 * (phase * 0.7).cos()),
                "vibration": round2(2.55 + 2.45 * (phase * 1.3).sin()),
                "output": 85 + (tick % 16) as i64,
            },
            "telemetry": {
                "uptime": tick,
                "cpuUsage": round2(52.5 + 42.5 * (phase * 0.5).sin()),
            },
        }),
    );
    serde_json::to_vec(&payload)
}

/// Last will registered at connect time; the broker publishes it if the device drops.
pub fn will_payload(
    device_id: &str,
    device_type: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&json!({
        "deviceId": device_id,
        "deviceType": device_type,
        "status": DeviceStatus::Offline,
        "lastUpdate": now.to_rfc3339(),
        "online": false,
        "reason": reason,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use factory_telemetry_bridge::telemetry::{parse_message, TelemetryEvent};
    use factory_telemetry_bridge::TelemetryCategory;

    fn parse(topic: &str, payload: Vec<u8>) -> TelemetryEvent {
        parse_message(topic, payload.into(), Utc::now()).unwrap()
    }

    #[test]
    fn test_topics() {
        assert_eq!(data_topic("line_2", "device_04"), "factory/line_2/device_04/data");
        assert_eq!(status_topic("line_2", "device_04"), "factory/line_2/device_04/status");
        assert_eq!(lwt_topic("device_04"), "factory/lwt/device_04");
    }

    #[test]
    fn test_status_payload() {
        let bytes = status_payload("device_01", "sensor", DeviceStatus::Idle, Utc::now()).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["deviceId"], "device_01");
        assert_eq!(parsed["deviceType"], "sensor");
        assert_eq!(parsed["status"], "idle");
        assert_eq!(parsed["online"], true);
        assert_eq!(parsed["version"], "1.0");
    }

    #[test]
    fn test_offline_payload() {
        let bytes = offline_payload("device_01", "sensor", "normal_shutdown", Utc::now()).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(parsed["status"], "offline");
        assert_eq!(parsed["online"], false);
        assert_eq!(parsed["reason"], "normal_shutdown");
    }

    #[test]
    fn test_data_payload_ranges() {
        for tick in 0..50 {
            let bytes = data_payload("device_03", "motor", tick, Utc::now()).unwrap();
            let parsed: Value = serde_json::from_slice(&bytes).unwrap();

            let temperature = parsed["metrics"]["temperature"].as_f64().unwrap();
            assert!((20.0..=85.0).contains(&temperature), "temperature {temperature}");
            let output = parsed["metrics"]["output"].as_i64().unwrap();
            assert!((85..=100).contains(&output));
            assert_eq!(parsed["telemetry"]["uptime"], tick);
        }
    }

    #[test]
    fn test_status_cycle() {
        assert_eq!(DeviceStatus::for_tick(0), DeviceStatus::Running);
        assert_eq!(DeviceStatus::for_tick(7), DeviceStatus::Idle);
        assert_eq!(DeviceStatus::for_tick(17), DeviceStatus::Maintenance);
        assert_eq!(DeviceStatus::for_tick(39), DeviceStatus::Error);
    }

    #[test]
    fn test_bridge_routes_simulated_traffic() {
        let now = Utc::now();

        let status = parse(
            &status_topic("line_1", "device_01"),
            status_payload("device_01", "sensor", DeviceStatus::Running, now).unwrap(),
        );
        assert_eq!(
            TelemetryCategory::classify(&status.topic, status.message_type.as_deref()),
            Some(TelemetryCategory::Status)
        );

        let data = parse(
            &data_topic("line_1", "device_01"),
            data_payload("device_01", "sensor", 3, now).unwrap(),
        );
        assert_eq!(
            TelemetryCategory::classify(&data.topic, data.message_type.as_deref()),
            Some(TelemetryCategory::Data)
        );

        let will = parse(
            &lwt_topic("device_01"),
            will_payload("device_01", "sensor", "abnormal_disconnection", now).unwrap(),
        );
        assert_eq!(
            TelemetryCategory::classify(&will.topic, will.message_type.as_deref()),
            Some(TelemetryCategory::Lwt)
        );
        assert_eq!(will.device_id.as_deref(), Some("device_01"));
        assert_eq!(will.field("reason").unwrap(), "abnormal_disconnection");
    }
}
