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

//! Configuration types for a simulated factory device.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for one simulated device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceSimulatorConfig {
    /// Device identifier, used as the third topic segment (e.g. `device_04`).
    pub device_id: String,
    /// Broker URL (`mqtt://`, `mqtts://`, `ws://`, `wss://`).
    pub broker_url: String,
    /// Production line, used as the second topic segment (default: `"line_1"`).
    pub line: String,
    /// Free-form device type reported in every payload (default: `"sensor"`).
    pub device_type: String,
    /// Time between publications (default: 15 s).
    #[serde(with = "secs")]
    pub interval: Duration,
    /// MQTT client ID. Defaults to the device ID.
    pub client_id: String,
    /// Optional MQTT username for authentication.
    pub username: Option<String>,
    /// Optional MQTT password for authentication.
    pub password: Option<String>,
}

impl DeviceSimulatorConfig {
    /// Start building a new config with the required fields.
    pub fn builder(
        device_id: impl Into<String>,
        broker_url: impl Into<String>,
    ) -> DeviceSimulatorConfigBuilder {
        let device_id = device_id.into();
        DeviceSimulatorConfigBuilder {
            client_id: device_id.clone(),
            device_id,
            broker_url: broker_url.into(),
            line: "line_1".to_string(),
            device_type: "sensor".to_string(),
            interval: Duration::from_secs(15),
            username: None,
            password: None,
        }
    }
}

/// Builder for [`DeviceSimulatorConfig`].
pub struct DeviceSimulatorConfigBuilder {
    device_id: String,
    broker_url: String,
    line: String,
    device_type: String,
    interval: Duration,
    client_id: String,
    username: Option<String>,
    password: Option<String>,
}

impl DeviceSimulatorConfigBuilder {
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.line = line.into();
        self
    }

    pub fn device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Build the config.
    pub fn build(self) -> DeviceSimulatorConfig {
        DeviceSimulatorConfig {
            device_id: self.device_id,
            broker_url: self.broker_url,
            line: self.line,
            device_type: self.device_type,
            interval: self.interval,
            client_id: self.client_id,
            username: self.username,
            password: self.password,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
