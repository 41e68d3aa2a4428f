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

//! Simulated factory devices.
//!
//! Each [`DeviceSimulator`] opens its own MQTT session and periodically
//! publishes JSON telemetry on `factory/<line>/<device>/status` and
//! `factory/<line>/<device>/data`, with a last will on `factory/lwt/<device>`.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use factory_device_simulator::{DeviceSimulator, DeviceSimulatorConfig};
//!
//! let config = DeviceSimulatorConfig::builder("device_04", "mqtt://localhost:1883")
//!     .line("line_2")
//!     .device_type("motor")
//!     .interval(Duration::from_secs(5))
//!     .build();
//!
//! let simulator = DeviceSimulator::new(config);
//! simulator.start().await?;
//! // ...
//! simulator.stop().await?;
//! ```

pub mod config;
pub mod device;
pub mod publisher;

pub use config::{DeviceSimulatorConfig, DeviceSimulatorConfigBuilder};
pub use device::DeviceSimulator;
pub use publisher::DeviceStatus;
