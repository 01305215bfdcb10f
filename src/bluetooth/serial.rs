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

//! Serial handler: the public surface applications talk to.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::dispatcher::{Direction, FrameDispatcher};
use super::machine::{ConnectionMachine, ConnectionPhase, LinkOutcome};
use super::negotiator::Negotiator;
use super::transport::{
    AdapterState, CharacteristicRef, PeripheralHandle, Transport, TransportEvent, WriteMode,
};
use super::uuids::CandidateSet;
use crate::events::{Notification, SerialDelegate, SerialEvent};

/// State guarded by the handler's lock.
struct SerialCore<T> {
    transport: T,
    machine: ConnectionMachine,
    negotiator: Negotiator,
    dispatcher: FrameDispatcher,
}

impl<T: Transport> SerialCore<T> {
    fn is_powered_on(&self) -> bool {
        self.transport.state() == AdapterState::PoweredOn
    }

    fn is_ready(&self) -> bool {
        self.is_powered_on()
            && self.machine.connected().is_some()
            && self.negotiator.write_characteristic().is_some()
    }

    fn disconnect(&mut self) {
        match self.machine.disconnect_target().cloned() {
            Some(peripheral) => {
                info!("Cancelling connection to {}", peripheral);
                self.transport.cancel_connection(&peripheral);
            }
            None => debug!("Nothing to disconnect"),
        }
    }

    fn link_changed(&mut self, event: SerialEvent) {
        self.dispatcher.publish(event);
        self.dispatcher.notify(Notification::LinkStateChanged);
    }

    fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                info!("Adapter state: {}", state.as_str());
                // No disconnect event follows when the radio goes away
                self.machine.reset();
                self.negotiator.reset();
                self.link_changed(SerialEvent::StateChanged(state));
            }
            TransportEvent::Discovered { peripheral, rssi } => {
                debug!("Discovered {} rssi={:?}", peripheral, rssi);
                self.dispatcher
                    .publish(SerialEvent::PeripheralDiscovered { peripheral, rssi });
            }
            TransportEvent::RetrievedConnected(peripherals) => {
                for peripheral in peripherals {
                    debug!("Already connected: {}", peripheral);
                    self.dispatcher.publish(SerialEvent::PeripheralDiscovered {
                        peripheral,
                        rssi: None,
                    });
                }
            }
            TransportEvent::Connected(peripheral) => self.handle_connected(peripheral),
            TransportEvent::FailedToConnect { peripheral, error } => {
                if !self.machine.on_failed_to_connect(&peripheral.id) {
                    debug!("Ignoring failure of replaced attempt {}", peripheral);
                    return;
                }
                warn!(
                    "Failed to connect to {}: {}",
                    peripheral,
                    error.as_deref().unwrap_or("no error given")
                );
                self.dispatcher
                    .publish(SerialEvent::FailedToConnect { peripheral, error });
            }
            TransportEvent::Disconnected { peripheral, error } => {
                if !self.machine.on_disconnected(&peripheral.id) {
                    debug!("Ignoring disconnect of unrelated {}", peripheral);
                    return;
                }
                self.negotiator.reset();
                info!(
                    "Disconnected from {} ({})",
                    peripheral,
                    error.as_deref().unwrap_or("no error")
                );
                self.link_changed(SerialEvent::Disconnected { peripheral, error });
            }
            TransportEvent::ServicesDiscovered {
                peripheral,
                services,
                error,
            } => {
                if !self.machine.is_connected_to(&peripheral) {
                    debug!("Ignoring services of {}", peripheral);
                    return;
                }
                if let Some(error) = error {
                    warn!("Service discovery on {} reported: {}", peripheral, error);
                }
                // Ask every returned service; only one is expected to match
                let characteristics = self.negotiator.candidates().characteristics();
                for service in &services {
                    debug!("Discovering characteristics of service {}", service.uuid);
                    self.transport
                        .discover_characteristics(&peripheral, service, &characteristics);
                }
                if !services.is_empty() {
                    self.machine.characteristics_requested();
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                characteristics,
                error,
            } => {
                if !self.machine.is_connected_to(&peripheral) {
                    debug!("Ignoring characteristics of {}", peripheral);
                    return;
                }
                if let Some(error) = error {
                    warn!("Characteristic discovery on {} reported: {}", service.uuid, error);
                }
                for info in &characteristics {
                    if let Some(characteristic) = self.negotiator.accept(info) {
                        self.handle_negotiated(characteristic);
                    }
                }
            }
            TransportEvent::ValueUpdated {
                characteristic,
                value,
            } => {
                if !self.machine.is_connected_to(&characteristic.peripheral) {
                    debug!("Dropping value from {}", characteristic.peripheral);
                    return;
                }
                self.dispatcher
                    .dispatch_frame(Direction::Received, value.as_deref());
            }
            TransportEvent::ValueWritten {
                characteristic,
                value,
                error,
            } => {
                if !self.machine.is_connected_to(&characteristic.peripheral) {
                    debug!("Dropping write confirmation from {}", characteristic.peripheral);
                    return;
                }
                if let Some(error) = error {
                    warn!("Write to {} failed: {}", characteristic.uuid, error);
                    return;
                }
                self.dispatcher.dispatch_frame(Direction::Sent, value.as_deref());
            }
            TransportEvent::RssiRead {
                peripheral,
                rssi,
                error,
            } => {
                if let Some(error) = error {
                    warn!("RSSI read on {} failed: {}", peripheral, error);
                    return;
                }
                debug!("RSSI of {}: {}", peripheral, rssi);
                self.dispatcher.publish(SerialEvent::RssiRead(rssi));
            }
            TransportEvent::ServicesInvalidated(peripheral) => {
                if !self.machine.is_connected_to(&peripheral) {
                    return;
                }
                info!("Services of {} changed, dropping link", peripheral);
                self.negotiator.reset();
                self.disconnect();
            }
        }
    }

    fn handle_connected(&mut self, peripheral: PeripheralHandle) {
        match self.machine.on_connected(&peripheral) {
            LinkOutcome::Accepted => {}
            LinkOutcome::Duplicate => {
                debug!("Already connected to {}", peripheral);
                return;
            }
            LinkOutcome::Stale => {
                warn!("Connected to replaced attempt {}, cancelling it", peripheral);
                self.transport.cancel_connection(&peripheral);
                return;
            }
        }

        info!("Connected to {}", peripheral);
        self.negotiator.reset();
        self.link_changed(SerialEvent::Connected(peripheral.clone()));

        // Connected is not ready: the serial characteristic comes next
        let services = self.negotiator.candidates().services();
        self.transport.discover_services(&peripheral.id, &services);
        self.machine.services_requested();
    }

    fn handle_negotiated(&mut self, characteristic: CharacteristicRef) {
        self.transport.set_notify(&characteristic, true);
        self.machine.mark_ready();

        if let Some(peripheral) = self.machine.connected().cloned() {
            info!("{} ready for communication", peripheral);
            self.link_changed(SerialEvent::Ready(peripheral));
        }
    }

    fn write_raw(&mut self, value: &[u8]) {
        if !self.is_ready() {
            debug!("Not ready, dropping {} bytes", value.len());
            return;
        }
        if let Some(characteristic) = self.negotiator.write_characteristic().cloned() {
            let mode = self.negotiator.write_mode();
            self.transport.write(&characteristic, value, mode);
        }
    }
}

/// Serial-over-BLE handler for HM-10 class modules.
///
/// Cloning yields another handle to the same handler. Transport events must
/// be fed in delivery order through [`handle_event`](Self::handle_event) or
/// [`run`](Self::run); application calls may come from any thread and are
/// serialized against event processing.
pub struct BluetoothSerial<T> {
    core: Arc<Mutex<SerialCore<T>>>,
    delegate: Arc<Mutex<Box<dyn SerialDelegate>>>,
}

impl<T> Clone for BluetoothSerial<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            delegate: self.delegate.clone(),
        }
    }
}

impl<T: Transport> BluetoothSerial<T> {
    /// Create a handler on top of `transport`.
    pub fn new(
        transport: T,
        candidates: CandidateSet,
        delegate: impl SerialDelegate + 'static,
    ) -> Self {
        info!(
            "Serial handler created, services {} / {}",
            candidates.service_uuid, candidates.alt_service_uuid
        );
        Self {
            core: Arc::new(Mutex::new(SerialCore {
                transport,
                machine: ConnectionMachine::new(),
                negotiator: Negotiator::new(candidates),
                dispatcher: FrameDispatcher::new(),
            })),
            delegate: Arc::new(Mutex::new(Box::new(delegate))),
        }
    }

    /// Replace the delegate. Must not be called from a delegate callback.
    pub fn set_delegate(&self, delegate: impl SerialDelegate + 'static) {
        debug!("Delegate replaced");
        *self.delegate.lock() = Box::new(delegate);
    }

    /// Listen for string and link notifications without a delegate.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.core.lock().dispatcher.subscribe()
    }

    /// Change the candidate UUIDs. Refused while a connection exists.
    pub fn set_candidates(&self, candidates: CandidateSet) -> bool {
        let mut core = self.core.lock();
        if core.machine.disconnect_target().is_some() {
            warn!("Refusing to change UUIDs while connected");
            return false;
        }
        core.negotiator.set_candidates(candidates);
        true
    }

    pub fn candidates(&self) -> CandidateSet {
        *self.core.lock().negotiator.candidates()
    }

    /// Start scanning for peripherals. Ignored unless powered on.
    pub fn start_scan(&self) {
        {
            let mut core = self.core.lock();
            if !core.is_powered_on() {
                debug!("Adapter not powered on, scan ignored");
                return;
            }
            debug!("Starting scan");
            // Unfiltered so the application can list every advertiser
            core.transport.start_scan(None);
            let services = core.negotiator.candidates().services();
            core.transport.retrieve_connected(&services);
            core.machine.scan_started();
        }
        self.flush();
    }

    pub fn stop_scan(&self) {
        debug!("Stopping scan");
        let mut core = self.core.lock();
        core.transport.stop_scan();
        core.machine.scan_stopped();
    }

    /// Try to connect to `peripheral`. A still-pending earlier attempt is
    /// replaced but not cancelled.
    pub fn connect_to_peripheral(&self, peripheral: &PeripheralHandle) {
        debug!("Connecting to {}", peripheral);
        let mut core = self.core.lock();
        if let Some(replaced) = core.machine.begin_connect(peripheral.clone()) {
            if replaced.id != peripheral.id {
                warn!("Replacing pending connection to {}", replaced);
            }
        }
        core.transport.connect(peripheral);
    }

    /// Disconnect from the connected peripheral or stop connecting to the
    /// pending one.
    pub fn disconnect(&self) {
        debug!("Disconnect requested");
        self.core.lock().disconnect();
    }

    /// Request the RSSI; the answer arrives as [`SerialEvent::RssiRead`].
    pub fn read_signal_strength(&self) {
        let mut core = self.core.lock();
        if !core.is_ready() {
            debug!("Not ready, RSSI read ignored");
            return;
        }
        if let Some(peripheral) = core.machine.connected().map(|p| p.id.clone()) {
            core.transport.read_signal_strength(&peripheral);
        }
    }

    /// Send a string as UTF-8.
    pub fn send_string(&self, message: &str) {
        debug!("Sending string: {}", message);
        self.core.lock().write_raw(message.as_bytes());
    }

    /// Send a slice of bytes.
    pub fn send_bytes(&self, bytes: &[u8]) {
        debug!("Sending bytes: {:?}", bytes);
        self.core.lock().write_raw(bytes);
    }

    /// Send an owned buffer.
    pub fn send_data(&self, data: Vec<u8>) {
        debug!("Sending data: {} bytes", data.len());
        self.core.lock().write_raw(&data);
    }

    /// Powered on, connected and the serial characteristic negotiated.
    pub fn is_ready(&self) -> bool {
        self.core.lock().is_ready()
    }

    pub fn is_scanning(&self) -> bool {
        self.core.lock().transport.is_scanning()
    }

    pub fn is_powered_on(&self) -> bool {
        self.core.lock().is_powered_on()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.core.lock().machine.phase()
    }

    pub fn connected_peripheral(&self) -> Option<PeripheralHandle> {
        self.core.lock().machine.connected().cloned()
    }

    pub fn pending_peripheral(&self) -> Option<PeripheralHandle> {
        self.core.lock().machine.pending().cloned()
    }

    /// Neither connected nor connecting.
    pub fn is_idle(&self) -> bool {
        self.core.lock().machine.disconnect_target().is_none()
    }

    /// Write mode picked by the last successful negotiation.
    pub fn write_mode(&self) -> Option<WriteMode> {
        let core = self.core.lock();
        core.negotiator
            .write_characteristic()
            .map(|_| core.negotiator.write_mode())
    }

    /// Process one transport event and deliver the resulting events.
    pub fn handle_event(&self, event: TransportEvent) {
        self.core.lock().handle(event);
        self.flush();
    }

    /// Process transport events until the transport closes its queue.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!("Transport event queue closed");
    }

    /// Deliver queued events to the delegate, in order.
    ///
    /// Whoever holds the delegate lock delivers; a nested call from inside a
    /// callback finds it taken and leaves its events to the outer loop.
    fn flush(&self) {
        loop {
            let Some(mut delegate) = self.delegate.try_lock() else {
                return;
            };
            loop {
                let next = self.core.lock().dispatcher.next_event();
                match next {
                    Some(event) => delegate.handle(&event),
                    None => break,
                }
            }
            drop(delegate);

            if !self.core.lock().dispatcher.has_pending() {
                return;
            }
        }
    }
}
