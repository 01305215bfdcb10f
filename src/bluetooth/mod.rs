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

//! Bluetooth communication module.
//!
//! Connects to an HM-10 class module as a GATT client and exposes it as a
//! serial byte/string stream.

#[cfg(feature = "bluez")]
mod bluez;
mod dispatcher;
mod machine;
pub mod mock;
mod negotiator;
mod serial;
mod transport;
pub mod uuids;

#[cfg(feature = "bluez")]
pub use bluez::BluezTransport;
pub use dispatcher::{Direction, FrameDispatcher, NOTIFICATION_CAPACITY};
pub use machine::{ConnectionMachine, ConnectionPhase, LinkOutcome};
pub use negotiator::Negotiator;
pub use serial::BluetoothSerial;
pub use transport::{
    AdapterState, CharacteristicInfo, CharacteristicProperties, CharacteristicRef,
    PeripheralHandle, PeripheralId, ServiceRef, Transport, TransportEvent, WriteMode,
};
pub use uuids::CandidateSet;
