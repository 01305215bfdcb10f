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

//! Events delivered to the application and the delegate that receives them.

use tokio::sync::mpsc;
use tracing::debug;

use crate::bluetooth::{AdapterState, PeripheralHandle};

/// Events emitted by the serial handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SerialEvent {
    /// Adapter state changed (e.g. Bluetooth turned on/off).
    StateChanged(AdapterState),
    /// Peripheral seen while scanning. `rssi` is `None` for peripherals that
    /// were already connected to the system.
    PeripheralDiscovered {
        peripheral: PeripheralHandle,
        rssi: Option<i16>,
    },
    /// Link established, not yet ready for communication.
    Connected(PeripheralHandle),
    /// Pending connection failed.
    FailedToConnect {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    /// Link closed.
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<String>,
    },
    /// Serial characteristic found and subscribed.
    Ready(PeripheralHandle),
    StringReceived(String),
    BytesReceived(Vec<u8>),
    DataReceived(Vec<u8>),
    StringSent(String),
    BytesSent(Vec<u8>),
    DataSent(Vec<u8>),
    RssiRead(i16),
}

/// Out-of-band notifications for listeners that do not hold the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    StringReceived(String),
    StringSent(String),
    /// Connected, disconnected, ready or adapter state changed.
    LinkStateChanged,
}

/// Receiver of serial events.
///
/// `state_changed` and `disconnected` must be implemented; everything else
/// defaults to a no-op. Callbacks run on the event-processing context after
/// the handler's internal lock is released, so they may call back into
/// [`BluetoothSerial`](crate::bluetooth::BluetoothSerial).
pub trait SerialDelegate: Send {
    fn state_changed(&mut self, state: AdapterState);

    fn disconnected(&mut self, peripheral: &PeripheralHandle, error: Option<&str>);

    fn string_received(&mut self, _text: &str) {}

    fn bytes_received(&mut self, _bytes: &[u8]) {}

    fn data_received(&mut self, _data: &[u8]) {}

    fn string_sent(&mut self, _text: &str) {}

    fn bytes_sent(&mut self, _bytes: &[u8]) {}

    fn data_sent(&mut self, _data: &[u8]) {}

    fn rssi_read(&mut self, _rssi: i16) {}

    fn peripheral_discovered(&mut self, _peripheral: &PeripheralHandle, _rssi: Option<i16>) {}

    fn connected(&mut self, _peripheral: &PeripheralHandle) {}

    fn failed_to_connect(&mut self, _peripheral: &PeripheralHandle, _error: Option<&str>) {}

    fn ready(&mut self, _peripheral: &PeripheralHandle) {}

    /// Route one event to the matching callback.
    fn handle(&mut self, event: &SerialEvent) {
        match event {
            SerialEvent::StateChanged(state) => self.state_changed(*state),
            SerialEvent::PeripheralDiscovered { peripheral, rssi } => {
                self.peripheral_discovered(peripheral, *rssi)
            }
            SerialEvent::Connected(peripheral) => self.connected(peripheral),
            SerialEvent::FailedToConnect { peripheral, error } => {
                self.failed_to_connect(peripheral, error.as_deref())
            }
            SerialEvent::Disconnected { peripheral, error } => {
                self.disconnected(peripheral, error.as_deref())
            }
            SerialEvent::Ready(peripheral) => self.ready(peripheral),
            SerialEvent::StringReceived(text) => self.string_received(text),
            SerialEvent::BytesReceived(bytes) => self.bytes_received(bytes),
            SerialEvent::DataReceived(data) => self.data_received(data),
            SerialEvent::StringSent(text) => self.string_sent(text),
            SerialEvent::BytesSent(bytes) => self.bytes_sent(bytes),
            SerialEvent::DataSent(data) => self.data_sent(data),
            SerialEvent::RssiRead(rssi) => self.rssi_read(*rssi),
        }
    }
}

/// Delegate that forwards every event into a channel.
///
/// Useful when the consumer lives in an async task and wants to `select!`
/// over serial events and other inputs.
pub struct ChannelDelegate {
    event_tx: mpsc::UnboundedSender<SerialEvent>,
}

impl ChannelDelegate {
    pub fn new(event_tx: mpsc::UnboundedSender<SerialEvent>) -> Self {
        Self { event_tx }
    }

    /// Create a delegate and the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SerialEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self::new(event_tx), event_rx)
    }
}

impl SerialDelegate for ChannelDelegate {
    fn state_changed(&mut self, state: AdapterState) {
        self.handle(&SerialEvent::StateChanged(state));
    }

    fn disconnected(&mut self, peripheral: &PeripheralHandle, error: Option<&str>) {
        self.handle(&SerialEvent::Disconnected {
            peripheral: peripheral.clone(),
            error: error.map(str::to_string),
        });
    }

    fn handle(&mut self, event: &SerialEvent) {
        if self.event_tx.send(event.clone()).is_err() {
            debug!("Event receiver dropped, discarding {:?}", event);
        }
    }
}
