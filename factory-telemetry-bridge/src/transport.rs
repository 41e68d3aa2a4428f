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

//! The seam between the bridge and the MQTT client library.
//!
//! [`mqtt_options`] turns a broker URL and [`ConnectOptions`] into `rumqttc`
//! options, [`route_event`] reduces `rumqttc` events to the few
//! [`TransportSignal`]s the bridge reacts to, and [`Transport`] is the
//! request side the bridge drives.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ConnectionError, Event, Incoming, MqttOptions, NetworkOptions, QoS,
    SubscribeReasonCode, Transport as WireTransport,
};
use url::Url;

use crate::config::ConnectOptions;

/// Requests the bridge issues against a live session.
///
/// Calls are made from inside the event loop task, so implementations must
/// not wait on the loop to make progress.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()>;
    async fn unsubscribe(&self, filter: &str) -> Result<()>;
    /// Queue a DISCONNECT for the broker.
    async fn disconnect(&self) -> Result<()>;
}

// The request channel is drained by the same task that issues these calls,
// so a full channel is reported as an error instead of awaited.
#[async_trait]
impl Transport for AsyncClient {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<()> {
        self.try_subscribe(filter, qos)
            .map_err(|e| anyhow!("MQTT subscribe failed: {e}"))
    }

    async fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.try_unsubscribe(filter)
            .map_err(|e| anyhow!("MQTT unsubscribe failed: {e}"))
    }

    async fn disconnect(&self) -> Result<()> {
        self.try_disconnect()
            .map_err(|e| anyhow!("MQTT disconnect failed: {e}"))
    }
}

/// Lifecycle and message signals fed into the bridge, in arrival order.
#[derive(Debug)]
pub enum TransportSignal {
    /// The broker accepted the connection.
    Connect { session_present: bool },
    /// A PUBLISH arrived on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// The broker refused at least one filter of a SUBSCRIBE.
    SubscriptionRejected { pkid: u16 },
    /// The next poll will attempt a new connection.
    Reconnect,
    Error(ConnectionError),
    Close,
}

/// Map a `rumqttc` event to the signal the bridge cares about, if any.
pub fn route_event(event: &Event) -> Option<TransportSignal> {
    match event {
        Event::Incoming(Incoming::ConnAck(connack)) => Some(TransportSignal::Connect {
            session_present: connack.session_present,
        }),
        Event::Incoming(Incoming::Publish(publish)) => Some(TransportSignal::Message {
            topic: publish.topic.clone(),
            payload: publish.payload.clone(),
        }),
        Event::Incoming(Incoming::SubAck(suback))
            if suback
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure)) =>
        {
            Some(TransportSignal::SubscriptionRejected { pkid: suback.pkid })
        }
        Event::Incoming(Incoming::Disconnect { .. }) => Some(TransportSignal::Close),
        _ => None,
    }
}

/// Transports a broker URL can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

impl BrokerScheme {
    pub fn parse(scheme: &str) -> Result<Self> {
        match scheme {
            "mqtt" | "tcp" => Ok(Self::Tcp),
            "mqtts" | "ssl" => Ok(Self::Tls),
            "ws" => Ok(Self::Ws),
            "wss" => Ok(Self::Wss),
            other => bail!("Unsupported broker URL scheme '{other}'"),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::Tcp => 1883,
            Self::Tls => 8883,
            Self::Ws => 80,
            Self::Wss => 443,
        }
    }
}

/// Build `rumqttc` options for `broker_url`.
///
/// Fails on a malformed URL, an unsupported scheme, a missing host, an
/// unusable client ID, or a password given without a username.
pub fn mqtt_options(
    broker_url: &str,
    options: &ConnectOptions,
) -> Result<(MqttOptions, NetworkOptions)> {
    let url = Url::parse(broker_url).with_context(|| format!("Invalid broker URL '{broker_url}'"))?;
    let scheme = BrokerScheme::parse(url.scheme())?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow!("Broker URL '{broker_url}' has no host"))?;
    let port = url.port().unwrap_or(scheme.default_port());

    if options.client_id.trim().is_empty() || options.client_id.starts_with(char::is_whitespace) {
        bail!("Invalid MQTT client ID '{}'", options.client_id);
    }

    let mut mqtt_opts = match scheme {
        BrokerScheme::Tcp | BrokerScheme::Tls => MqttOptions::new(&options.client_id, host, port),
        BrokerScheme::Ws | BrokerScheme::Wss => {
            // The websocket transport dials the full URL, so pin the port into it.
            let mut ws_url = url.clone();
            ws_url
                .set_port(Some(port))
                .map_err(|_| anyhow!("Broker URL '{broker_url}' cannot carry a port"))?;
            MqttOptions::new(&options.client_id, ws_url.as_str(), port)
        }
    };

    match scheme {
        BrokerScheme::Tcp => {}
        BrokerScheme::Tls => {
            mqtt_opts.set_transport(WireTransport::tls_with_default_config());
        }
        BrokerScheme::Ws => {
            mqtt_opts.set_transport(WireTransport::Ws);
        }
        BrokerScheme::Wss => {
            mqtt_opts.set_transport(WireTransport::wss_with_default_config());
        }
    }

    mqtt_opts.set_clean_session(options.clean);
    mqtt_opts.set_keep_alive(options.keep_alive);

    match (&options.username, &options.password) {
        (Some(user), pass) => {
            mqtt_opts.set_credentials(user, pass.as_deref().unwrap_or_default());
        }
        (None, Some(_)) => bail!("MQTT password supplied without a username"),
        (None, None) => {}
    }

    let mut network_opts = NetworkOptions::new();
    network_opts.set_connection_timeout(connect_timeout_secs(options));

    Ok((mqtt_opts, network_opts))
}

/// `rumqttc` takes whole seconds; round up and never go below one.
fn connect_timeout_secs(options: &ConnectOptions) -> u64 {
    let millis = options.connect_timeout.as_millis();
    u64::try_from(millis.div_ceil(1000).max(1)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rumqttc::{ConnAck, ConnectReturnCode, Outgoing, Publish, SubAck};

    use crate::config::ConnectOverrides;

    fn options() -> ConnectOptions {
        ConnectOverrides::new().client_id("dashboard-test").resolve()
    }

    #[test]
    fn test_tcp_defaults() {
        let (mqtt_opts, _) = mqtt_options("mqtt://broker.local", &options()).unwrap();

        assert_eq!(mqtt_opts.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(mqtt_opts.client_id(), "dashboard-test");
        assert!(mqtt_opts.clean_session());
        assert_eq!(mqtt_opts.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_explicit_port_and_tls() {
        let (mqtt_opts, _) = mqtt_options("mqtts://broker.local:9883", &options()).unwrap();
        assert_eq!(mqtt_opts.broker_address(), ("broker.local".to_string(), 9883));

        let (mqtt_opts, _) = mqtt_options("ssl://broker.local", &options()).unwrap();
        assert_eq!(mqtt_opts.broker_address().1, 8883);
    }

    #[test]
    fn test_websocket_url_keeps_path() {
        let (mqtt_opts, _) = mqtt_options("ws://broker.local:8083/mqtt", &options()).unwrap();
        let (addr, port) = mqtt_opts.broker_address();

        assert_eq!(addr, "ws://broker.local:8083/mqtt");
        assert_eq!(port, 8083);
    }

    #[test]
    fn test_clean_flag_passthrough() {
        let options = ConnectOverrides::new().client_id("c").clean(false).resolve();
        let (mqtt_opts, _) = mqtt_options("mqtt://localhost", &options).unwrap();
        assert!(!mqtt_opts.clean_session());
    }

    #[test]
    fn test_setup_errors() {
        assert!(mqtt_options("not a url", &options()).is_err());
        assert!(mqtt_options("http://broker.local", &options()).is_err());
        assert!(mqtt_options("mqtt://", &options()).is_err());

        let blank = ConnectOverrides::new().client_id("  ").resolve();
        assert!(mqtt_options("mqtt://localhost", &blank).is_err());

        let orphan_password = ConnectOverrides::new().client_id("c").password("p").resolve();
        assert!(mqtt_options("mqtt://localhost", &orphan_password).is_err());
    }

    #[test]
    fn test_connect_timeout_rounds_up() {
        let mut options = options();
        assert_eq!(connect_timeout_secs(&options), 3);

        options.connect_timeout = Duration::from_millis(2500);
        assert_eq!(connect_timeout_secs(&options), 3);

        options.connect_timeout = Duration::ZERO;
        assert_eq!(connect_timeout_secs(&options), 1);
    }

    #[test]
    fn test_route_connack_and_publish() {
        let connack = Event::Incoming(Incoming::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert!(matches!(
            route_event(&connack),
            Some(TransportSignal::Connect { session_present: false })
        ));

        let publish = Event::Incoming(Incoming::Publish(Publish::new(
            "factory/line_1/device_01/data",
            QoS::AtLeastOnce,
            r#"{"rpm": 1200}"#,
        )));
        match route_event(&publish) {
            Some(TransportSignal::Message { topic, payload }) => {
                assert_eq!(topic, "factory/line_1/device_01/data");
                assert_eq!(&payload[..], br#"{"rpm": 1200}"#);
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn test_route_suback() {
        let granted = Event::Incoming(Incoming::SubAck(SubAck {
            pkid: 7,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        }));
        assert!(route_event(&granted).is_none());

        let rejected = Event::Incoming(Incoming::SubAck(SubAck {
            pkid: 8,
            return_codes: vec![
                SubscribeReasonCode::Success(QoS::AtLeastOnce),
                SubscribeReasonCode::Failure,
            ],
        }));
        assert!(matches!(
            route_event(&rejected),
            Some(TransportSignal::SubscriptionRejected { pkid: 8 })
        ));
    }

    #[tokio::test]
    async fn test_client_requests_never_wait_on_a_full_queue() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("queue-test", "localhost", 1883), 1);

        assert!(Transport::subscribe(&client, "factory/a", QoS::AtLeastOnce).await.is_ok());
        assert!(Transport::subscribe(&client, "factory/b", QoS::AtLeastOnce).await.is_err());
        assert!(Transport::unsubscribe(&client, "factory/a").await.is_err());
        assert!(Transport::disconnect(&client).await.is_err());
    }

    #[test]
    fn test_route_ignores_outgoing() {
        assert!(route_event(&Event::Outgoing(Outgoing::Subscribe(3))).is_none());
    }
}
