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

//! A simulated factory device publishing over its own MQTT session.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, ConnectionError, Event, Incoming, LastWill, Outgoing, QoS};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use factory_telemetry_bridge::transport::mqtt_options;
use factory_telemetry_bridge::ConnectOverrides;

use crate::config::DeviceSimulatorConfig;
use crate::publisher::{self, DeviceStatus};

/// How long `stop` lets the event loop flush the offline status and DISCONNECT.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Publishes `status` and `data` telemetry for one device until stopped.
///
/// The connection carries a last will on `factory/lwt/<device>`, so the broker
/// announces the device as offline if it drops without calling [`stop`](Self::stop).
pub struct DeviceSimulator {
    config: DeviceSimulatorConfig,
    running: Mutex<Option<Running>>,
}

struct Running {
    client: AsyncClient,
    stop_tx: watch::Sender<bool>,
    publisher: JoinHandle<()>,
    driver: JoinHandle<()>,
}

impl DeviceSimulator {
    pub fn new(config: DeviceSimulatorConfig) -> Self {
        Self {
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DeviceSimulatorConfig {
        &self.config
    }

    /// Connect and start publishing. Fails if the broker options are unusable
    /// or the simulator is already running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            bail!("[{}] Device simulator already running", self.config.device_id);
        }

        info!(
            "[{}] Starting device simulator (broker={}, line={}, interval={:?})",
            self.config.device_id, self.config.broker_url, self.config.line, self.config.interval
        );

        let mut overrides = ConnectOverrides::new().client_id(&self.config.client_id);
        if let Some(user) = &self.config.username {
            overrides = overrides.username(user);
        }
        if let Some(pass) = &self.config.password {
            overrides = overrides.password(pass);
        }
        let (mut mqtt_opts, network_opts) =
            mqtt_options(&self.config.broker_url, &overrides.resolve())?;

        let will = publisher::will_payload(
            &self.config.device_id,
            &self.config.device_type,
            "abnormal_disconnection",
            Utc::now(),
        )
        .map_err(|e| anyhow!("Failed to serialize last will: {e}"))?;
        mqtt_opts.set_last_will(LastWill::new(
            publisher::lwt_topic(&self.config.device_id),
            will,
            QoS::AtLeastOnce,
            false,
        ));

        let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 100);
        eventloop.set_network_options(network_opts);
        let (stop_tx, mut publisher_stop) = watch::channel(false);

        // Spawn the MQTT eventloop driver (keeps connection alive). It ends once
        // the DISCONNECT from `stop` goes out or every client handle is gone.
        let device_id = self.config.device_id.clone();
        let driver = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        info!("[{device_id}] Connected to MQTT broker");
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("[{device_id}] Disconnected from MQTT broker");
                        break;
                    }
                    Ok(_) => {}
                    Err(ConnectionError::RequestsDone) => break,
                    Err(e) => {
                        warn!("[{device_id}] MQTT eventloop error (will reconnect): {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        // Spawn the publishing loop: one status and one data message per interval.
        let config = self.config.clone();
        let publish_client = client.clone();
        let publisher = tokio::spawn(async move {
            let device_id = &config.device_id;
            let status_topic = publisher::status_topic(&config.line, device_id);
            let data_topic = publisher::data_topic(&config.line, device_id);
            let mut ticker = tokio::time::interval(config.interval);
            let mut tick: u64 = 0;

            loop {
                tokio::select! {
                    _ = publisher_stop.changed() => {
                        if *publisher_stop.borrow() {
                            info!("[{device_id}] Stop signal received");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        let status = publisher::status_payload(
                            device_id,
                            &config.device_type,
                            DeviceStatus::for_tick(tick),
                            now,
                        );
                        let data = publisher::data_payload(device_id, &config.device_type, tick, now);

                        // try_publish never blocks, so a stop request is seen even
                        // while the broker is unreachable and the request queue is full.
                        match (status, data) {
                            (Ok(status), Ok(data)) => {
                                if let Err(e) =
                                    publish_client.try_publish(&status_topic, QoS::AtLeastOnce, true, status)
                                {
                                    error!("[{device_id}] Failed to publish status: {e}");
                                }
                                if let Err(e) =
                                    publish_client.try_publish(&data_topic, QoS::AtLeastOnce, false, data)
                                {
                                    error!("[{device_id}] Failed to publish data: {e}");
                                }
                                debug!("[{device_id}] Published tick {tick}");
                            }
                            (Err(e), _) | (_, Err(e)) => {
                                error!("[{device_id}] Failed to build payload: {e}");
                            }
                        }
                        tick += 1;
                    }
                }
            }
        });

        *running = Some(Running {
            client,
            stop_tx,
            publisher,
            driver,
        });
        info!("[{}] Device simulator started", self.config.device_id);
        Ok(())
    }

    /// Publish a retained offline status and disconnect cleanly, so no last will fires.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };
        let Running {
            client,
            stop_tx,
            publisher,
            mut driver,
        } = running;
        let device_id = &self.config.device_id;

        let _ = stop_tx.send(true);
        let _ = publisher.await;

        match publisher::offline_payload(device_id, &self.config.device_type, "normal_shutdown", Utc::now()) {
            Ok(payload) => {
                let topic = publisher::status_topic(&self.config.line, device_id);
                if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, true, payload) {
                    warn!("[{device_id}] Failed to publish offline status: {e}");
                }
            }
            Err(e) => warn!("[{device_id}] Failed to build offline status: {e}"),
        }
        if let Err(e) = client.try_disconnect() {
            warn!("[{device_id}] Failed to request disconnect: {e}");
        }

        if tokio::time::timeout(STOP_GRACE, &mut driver).await.is_err() {
            warn!("[{device_id}] Event loop did not finish in time, aborting it");
            driver.abort();
        }
        info!("[{device_id}] Device simulator stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_rejects_bad_broker_url() {
        let config = DeviceSimulatorConfig::builder("device_01", "http://localhost").build();
        let simulator = DeviceSimulator::new(config);

        assert!(simulator.start().await.is_err());
        assert!(!simulator.is_running().await);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let config = DeviceSimulatorConfig::builder("device_01", "mqtt://localhost").build();
        let simulator = DeviceSimulator::new(config);

        simulator.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let config = DeviceSimulatorConfig::builder("device_01", "mqtt://127.0.0.1:1")
            .interval(Duration::from_secs(60))
            .build();
        let simulator = DeviceSimulator::new(config);

        simulator.start().await.unwrap();
        assert!(simulator.is_running().await);
        assert!(simulator.start().await.is_err());

        simulator.stop().await.unwrap();
        assert!(!simulator.is_running().await);
    }
}
