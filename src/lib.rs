// Copyright 2026 Daniel Pelikan
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

//! Serial-over-BLE for HM-10 class modules.
//!
//! [`BluetoothSerial`] drives scan → connect → service discovery →
//! characteristic discovery → subscribe, and turns the module's serial
//! characteristic into string/byte events delivered to a [`SerialDelegate`].
//!
//! ```ignore
//! use hm10_serial::bluetooth::{BluetoothSerial, BluezTransport, CandidateSet};
//! use hm10_serial::events::ChannelDelegate;
//!
//! let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
//! let transport = BluezTransport::new(event_tx).await?;
//! let (delegate, mut serial_events) = ChannelDelegate::channel();
//! let serial = BluetoothSerial::new(transport, CandidateSet::default(), delegate);
//!
//! let pump = serial.clone();
//! tokio::spawn(async move { pump.run(event_rx).await });
//! serial.start_scan();
//! ```

pub mod bluetooth;
pub mod config;
pub mod events;

pub use bluetooth::{BluetoothSerial, CandidateSet, PeripheralHandle, Transport, TransportEvent};
pub use events::{Notification, SerialDelegate, SerialEvent};
