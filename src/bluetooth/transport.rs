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

//! Boundary to the platform BLE stack.
//!
//! A [`Transport`] only *requests* radio operations. Every request completes
//! later as a [`TransportEvent`] delivered, in order, to
//! [`BluetoothSerial::handle_event`](super::BluetoothSerial::handle_event).

use std::fmt;
use uuid::Uuid;

/// Power/authorization state of the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Unknown => "unknown",
            AdapterState::Resetting => "resetting",
            AdapterState::Unsupported => "unsupported",
            AdapterState::Unauthorized => "unauthorized",
            AdapterState::PoweredOff => "poweredOff",
            AdapterState::PoweredOn => "poweredOn",
        }
    }
}

/// Transport-assigned peripheral identifier (a MAC address on BlueZ).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discoverable/connectable remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub id: PeripheralId,
    pub name: Option<String>,
}

impl PeripheralHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: PeripheralId::new(id),
            name,
        }
    }

    /// Name for log lines and UIs.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.id)
    }
}

/// A discovered GATT service, keyed by its attribute id on the peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    pub id: u16,
    pub uuid: Uuid,
}

/// Key into the transport's live characteristic table.
///
/// Holding one does not keep the characteristic alive; it is only valid
/// while its peripheral stays connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub peripheral: PeripheralId,
    pub service: u16,
    pub id: u16,
    pub uuid: Uuid,
}

/// Advertised GATT characteristic properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Decode the GATT characteristic properties byte.
    pub fn from_bits(bits: u8) -> Self {
        Self {
            broadcast: bits & 0x01 != 0,
            read: bits & 0x02 != 0,
            write_without_response: bits & 0x04 != 0,
            write: bits & 0x08 != 0,
            notify: bits & 0x10 != 0,
            indicate: bits & 0x20 != 0,
        }
    }
}

/// A discovered characteristic together with its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub reference: CharacteristicRef,
    pub properties: CharacteristicProperties,
}

/// How outbound writes are issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// ATT Write Request; the peripheral acknowledges each write.
    WithResponse,
    /// ATT Write Command.
    #[default]
    WithoutResponse,
}

impl WriteMode {
    /// Modules that advertise plain `write` (Bolutek-style clones) need
    /// acknowledged writes; genuine HM-10 firmware only takes commands.
    pub fn from_properties(properties: &CharacteristicProperties) -> Self {
        if properties.write {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        }
    }
}

/// Events delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Adapter power/authorization state changed.
    StateChanged(AdapterState),
    /// Advertiser seen while scanning.
    Discovered {
        peripheral: PeripheralHandle,
        rssi: Option<i16>,
    },
    /// Answer to [`Transport::retrieve_connected`].
    RetrievedConnected(Vec<PeripheralHandle>),
    /// Link established.
    Connected(PeripheralHandle),
    /// Pending connection failed.
    FailedToConnect {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    /// Link closed, locally or by the remote.
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    /// Answer to [`Transport::discover_services`].
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<ServiceRef>,
        error: Option<String>,
    },
    /// Answer to [`Transport::discover_characteristics`].
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: ServiceRef,
        characteristics: Vec<CharacteristicInfo>,
        error: Option<String>,
    },
    /// Notification or read value from a characteristic.
    ValueUpdated {
        characteristic: CharacteristicRef,
        value: Option<Vec<u8>>,
    },
    /// Acknowledged write completed.
    ValueWritten {
        characteristic: CharacteristicRef,
        value: Option<Vec<u8>>,
        error: Option<String>,
    },
    /// Answer to [`Transport::read_signal_strength`].
    RssiRead {
        peripheral: PeripheralId,
        rssi: i16,
        error: Option<String>,
    },
    /// The peripheral changed its GATT database.
    ServicesInvalidated(PeripheralId),
}

/// Platform BLE capability.
///
/// Methods must not block: they start an operation and return. Results come
/// back as [`TransportEvent`]s on the transport's event queue.
pub trait Transport: Send {
    /// Current adapter state.
    fn state(&self) -> AdapterState;

    /// Whether a scan is running.
    fn is_scanning(&self) -> bool;

    /// Start scanning. `None` accepts any advertiser.
    fn start_scan(&mut self, services: Option<&[Uuid]>);

    fn stop_scan(&mut self);

    /// Look up peripherals already connected to the system that expose one
    /// of `services`. Answered by [`TransportEvent::RetrievedConnected`].
    fn retrieve_connected(&mut self, services: &[Uuid]);

    fn connect(&mut self, peripheral: &PeripheralHandle);

    fn cancel_connection(&mut self, peripheral: &PeripheralHandle);

    fn discover_services(&mut self, peripheral: &PeripheralId, services: &[Uuid]);

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &ServiceRef,
        characteristics: &[Uuid],
    );

    fn set_notify(&mut self, characteristic: &CharacteristicRef, enabled: bool);

    fn write(&mut self, characteristic: &CharacteristicRef, value: &[u8], mode: WriteMode);

    fn read_signal_strength(&mut self, peripheral: &PeripheralId);
}
