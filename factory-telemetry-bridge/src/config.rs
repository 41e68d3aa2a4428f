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

//! Connection options for the telemetry bridge.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default delay between a dropped connection and the next attempt.
pub const DEFAULT_RECONNECT_PERIOD_MS: u64 = 2000;
/// Default time allowed for the transport to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3000;
/// Default MQTT keep-alive interval.
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Fully resolved options for one MQTT session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// MQTT client ID presented to the broker.
    pub client_id: String,
    /// Start without a persisted broker session.
    pub clean: bool,
    /// Delay before reconnecting after the connection drops. Zero disables auto-reconnect.
    pub reconnect_period: Duration,
    /// Time allowed for the transport to connect.
    pub connect_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Optional MQTT username for authentication.
    pub username: Option<String>,
    /// Optional MQTT password for authentication.
    pub password: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: random_client_id("web-client"),
            clean: true,
            reconnect_period: Duration::from_millis(DEFAULT_RECONNECT_PERIOD_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            username: None,
            password: None,
        }
    }
}

impl ConnectOptions {
    /// Whether the session should re-establish itself after the connection drops.
    pub fn auto_reconnect(&self) -> bool {
        !self.reconnect_period.is_zero()
    }
}

/// Client ID of the form `<prefix>_<8 hex digits>`.
pub fn random_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &suffix[..8])
}

/// Caller-supplied overrides, merged field-by-field onto [`ConnectOptions::default`].
///
/// Deserializes from the camelCase keys a dashboard configuration uses
/// (`clientId`, `clean`, `reconnectPeriod`, `connectTimeout`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectOverrides {
    pub client_id: Option<String>,
    pub clean: Option<bool>,
    #[serde(alias = "reconnectPeriod")]
    pub reconnect_period_ms: Option<u64>,
    #[serde(alias = "connectTimeout")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(alias = "keepalive")]
    pub keep_alive_secs: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = Some(clean);
        self
    }

    pub fn reconnect_period_ms(mut self, millis: u64) -> Self {
        self.reconnect_period_ms = Some(millis);
        self
    }

    pub fn connect_timeout_ms(mut self, millis: u64) -> Self {
        self.connect_timeout_ms = Some(millis);
        self
    }

    pub fn keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = Some(secs);
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

    /// Read overrides from `MQTT_*` environment variables. Unset variables stay `None`.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            client_id: env::var("MQTT_CLIENT_ID").ok(),
            clean: env_parse("MQTT_CLEAN")?,
            reconnect_period_ms: env_parse("MQTT_RECONNECT_PERIOD_MS")?,
            connect_timeout_ms: env_parse("MQTT_CONNECT_TIMEOUT_MS")?,
            keep_alive_secs: env_parse("MQTT_KEEP_ALIVE_SECS")?,
            username: env::var("MQTT_USERNAME").ok(),
            password: env::var("MQTT_PASSWORD").ok(),
        })
    }

    /// Apply these overrides on top of `base`.
    pub fn apply(self, base: ConnectOptions) -> ConnectOptions {
        ConnectOptions {
            client_id: self.client_id.unwrap_or(base.client_id),
            clean: self.clean.unwrap_or(base.clean),
            reconnect_period: self
                .reconnect_period_ms
                .map(Duration::from_millis)
                .unwrap_or(base.reconnect_period),
            connect_timeout: self
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.connect_timeout),
            keep_alive: self
                .keep_alive_secs
                .map(Duration::from_secs)
                .unwrap_or(base.keep_alive),
            username: self.username.or(base.username),
            password: self.password.or(base.password),
        }
    }

    /// Apply these overrides on top of the defaults.
    pub fn resolve(self) -> ConnectOptions {
        self.apply(ConnectOptions::default())
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {name}: '{raw}'")),
        Err(_) => Ok(None),
    }
}
