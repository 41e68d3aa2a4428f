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

//! Feeds a (logging) dashboard from factory telemetry.
//!
//! Reads broker settings from `MQTT_*` environment variables, optionally
//! starts `SIMULATED_DEVICES` simulated devices, and logs every bridge event
//! until Ctrl-C.

use std::time::Duration;

use anyhow::{Context, Result};
use factory_device_simulator::{DeviceSimulator, DeviceSimulatorConfig};
use factory_telemetry_bridge::{ConnectOverrides, TelemetryBridge};
use log::{debug, error, info, warn};

const DEVICE_TYPES: [&str; 4] = ["sensor", "motor", "pump", "conveyor"];

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {name}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}

fn attach_logging(bridge: &TelemetryBridge) {
    let listeners = bridge.listeners();

    listeners.on_connected(|| info!("[bridge] connected"));
    listeners.on_disconnected(|| warn!("[bridge] disconnected"));
    listeners.on_reconnecting(|attempt| info!("[bridge] reconnecting (attempt {attempt})"));
    listeners.on_error(|e| error!("[bridge] connection error: {e}"));
    listeners.on_message(|event| debug!("[bridge] message on {}", event.topic));
    listeners.on_status_update(|event| {
        info!(
            "[status] {} {}: {}",
            event.line.as_deref().unwrap_or("-"),
            event.device_id.as_deref().unwrap_or("-"),
            event.to_json()
        )
    });
    listeners.on_data_update(|event| {
        info!(
            "[data] {} {}: {}",
            event.line.as_deref().unwrap_or("-"),
            event.device_id.as_deref().unwrap_or("-"),
            event.to_json()
        )
    });
    listeners.on_device_lwt(|event| {
        warn!(
            "[lwt] {} went away: {}",
            event.device_id.as_deref().unwrap_or("-"),
            event.to_json()
        )
    });
    listeners.on_message_error(|e| warn!("[bridge] {e}; raw={}", e.raw_text()));
}

async fn start_simulators(broker_url: &str) -> Result<Vec<DeviceSimulator>> {
    let count: usize = env_or("SIMULATED_DEVICES", 0)?;
    let interval = Duration::from_secs(env_or("SIMULATED_INTERVAL_SECS", 15)?);

    let mut simulators = Vec::with_capacity(count);
    for index in 0..count {
        let device_id = format!("device_{:02}", index + 1);
        let config = DeviceSimulatorConfig::builder(&device_id, broker_url)
            .line(format!("line_{}", index % 3 + 1))
            .device_type(DEVICE_TYPES[index % DEVICE_TYPES.len()])
            .client_id(format!("sim-{device_id}"))
            .interval(interval)
            .build();

        let simulator = DeviceSimulator::new(config);
        simulator.start().await?;
        simulators.push(simulator);
    }
    if count > 0 {
        info!("Started {count} simulated devices (interval={interval:?})");
    }
    Ok(simulators)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting dashboard feed...");

    let broker_url = std::env::var("MQTT_BROKER_URL").context("MQTT_BROKER_URL must be set")?;
    let overrides = ConnectOverrides::from_env()?;

    let bridge = TelemetryBridge::new();
    attach_logging(&bridge);
    bridge.connect(&broker_url, overrides).await?;

    let simulators = start_simulators(&broker_url).await?;

    // Keep running until signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for simulator in &simulators {
        if let Err(e) = simulator.stop().await {
            warn!("Failed to stop {}: {e}", simulator.config().device_id);
        }
    }
    bridge.disconnect().await;
    info!("Dashboard feed stopped");
    Ok(())
}
