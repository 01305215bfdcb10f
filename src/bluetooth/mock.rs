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

//! Recording transport for tests and simulations.
//!
//! Performs no radio work. Every request is appended to a shared call log
//! that a [`MockHandle`] can inspect after the transport has been moved into
//! a [`BluetoothSerial`](super::BluetoothSerial).

use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

use super::transport::{
    AdapterState, CharacteristicRef, PeripheralHandle, PeripheralId, ServiceRef, Transport,
    WriteMode,
};

/// A request made to the mock transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    StartScan(Option<Vec<Uuid>>),
    StopScan,
    RetrieveConnected(Vec<Uuid>),
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    DiscoverServices {
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    DiscoverCharacteristics {
        peripheral: PeripheralId,
        service: ServiceRef,
        characteristics: Vec<Uuid>,
    },
    SetNotify {
        characteristic: CharacteristicRef,
        enabled: bool,
    },
    Write {
        characteristic: CharacteristicRef,
        value: Vec<u8>,
        mode: WriteMode,
    },
    ReadSignalStrength(PeripheralId),
}

#[derive(Debug)]
struct MockState {
    adapter: AdapterState,
    scanning: bool,
    calls: Vec<TransportCall>,
}

/// Transport that records requests instead of performing them.
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

/// Inspection handle for a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(adapter: AdapterState) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState {
            adapter,
            scanning: false,
            calls: Vec::new(),
        }));
        (
            Self {
                state: state.clone(),
            },
            MockHandle { state },
        )
    }

    fn record(&self, call: TransportCall) {
        self.state.lock().calls.push(call);
    }
}

impl MockHandle {
    /// Change what the transport reports as the adapter state.
    ///
    /// Pair with a [`TransportEvent::StateChanged`](super::TransportEvent)
    /// to simulate the radio being toggled.
    pub fn set_adapter_state(&self, adapter: AdapterState) {
        let mut state = self.state.lock();
        state.adapter = adapter;
        if adapter != AdapterState::PoweredOn {
            state.scanning = false;
        }
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    /// Recorded calls, clearing the log.
    pub fn take_calls(&self) -> Vec<TransportCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Recorded writes as `(value, mode)`.
    pub fn writes(&self) -> Vec<(Vec<u8>, WriteMode)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write { value, mode, .. } => Some((value.clone(), *mode)),
                _ => None,
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn state(&self) -> AdapterState {
        self.state.lock().adapter
    }

    fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    fn start_scan(&mut self, services: Option<&[Uuid]>) {
        self.state.lock().scanning = true;
        self.record(TransportCall::StartScan(services.map(<[Uuid]>::to_vec)));
    }

    fn stop_scan(&mut self) {
        self.state.lock().scanning = false;
        self.record(TransportCall::StopScan);
    }

    fn retrieve_connected(&mut self, services: &[Uuid]) {
        self.record(TransportCall::RetrieveConnected(services.to_vec()));
    }

    fn connect(&mut self, peripheral: &PeripheralHandle) {
        self.record(TransportCall::Connect(peripheral.id.clone()));
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralHandle) {
        self.record(TransportCall::CancelConnection(peripheral.id.clone()));
    }

    fn discover_services(&mut self, peripheral: &PeripheralId, services: &[Uuid]) {
        self.record(TransportCall::DiscoverServices {
            peripheral: peripheral.clone(),
            services: services.to_vec(),
        });
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &ServiceRef,
        characteristics: &[Uuid],
    ) {
        self.record(TransportCall::DiscoverCharacteristics {
            peripheral: peripheral.clone(),
            service: *service,
            characteristics: characteristics.to_vec(),
        });
    }

    fn set_notify(&mut self, characteristic: &CharacteristicRef, enabled: bool) {
        self.record(TransportCall::SetNotify {
            characteristic: characteristic.clone(),
            enabled,
        });
    }

    fn write(&mut self, characteristic: &CharacteristicRef, value: &[u8], mode: WriteMode) {
        self.record(TransportCall::Write {
            characteristic: characteristic.clone(),
            value: value.to_vec(),
            mode,
        });
    }

    fn read_signal_strength(&mut self, peripheral: &PeripheralId) {
        self.record(TransportCall::ReadSignalStrength(peripheral.clone()));
    }
}
