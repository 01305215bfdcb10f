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

//! BlueZ transport built on `bluer`.
//!
//! Each request runs as a tokio task; results are sent back on the event
//! channel handed to [`BluezTransport::new`], which gives the serial handler
//! the same single ordered event queue CoreBluetooth-style stacks provide.

use anyhow::{anyhow, Result};
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest, Service};
use bluer::gatt::WriteOp;
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, DeviceEvent, DeviceProperty};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transport::{
    AdapterState, CharacteristicInfo, CharacteristicProperties, CharacteristicRef,
    PeripheralHandle, PeripheralId, ServiceRef, Transport, TransportEvent, WriteMode,
};

/// How often to check whether BlueZ finished resolving services.
const SERVICE_RESOLVE_INTERVAL: Duration = Duration::from_millis(250);

/// Checks before reporting whatever services BlueZ has so far.
const SERVICE_RESOLVE_ATTEMPTS: u32 = 40;

type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Live GATT objects and the tasks bound to them.
#[derive(Default)]
struct Tables {
    services: HashMap<(PeripheralId, u16), Service>,
    characteristics: HashMap<CharacteristicRef, Characteristic>,
    notify_tasks: HashMap<CharacteristicRef, JoinHandle<()>>,
    link_tasks: HashMap<PeripheralId, JoinHandle<()>>,
}

impl Tables {
    /// Drop everything belonging to `peripheral`.
    fn forget(&mut self, peripheral: &PeripheralId) {
        self.services.retain(|(id, _), _| id != peripheral);
        self.characteristics.retain(|c, _| &c.peripheral != peripheral);
        self.notify_tasks.retain(|c, task| {
            if &c.peripheral == peripheral {
                task.abort();
                false
            } else {
                true
            }
        });
    }
}

/// Queued outbound write. Writes go through one task so they reach the
/// module in the order they were issued.
struct WriteJob {
    characteristic: CharacteristicRef,
    remote: Characteristic,
    value: Vec<u8>,
    mode: WriteMode,
}

/// [`Transport`] backed by the local BlueZ daemon.
pub struct BluezTransport {
    adapter: Adapter,
    runtime: Handle,
    event_tx: EventSender,
    state: Arc<Mutex<AdapterState>>,
    tables: Arc<Mutex<Tables>>,
    write_tx: mpsc::UnboundedSender<WriteJob>,
    scan_task: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl BluezTransport {
    /// Open the default adapter. Must be called inside a tokio runtime.
    pub async fn new(event_tx: EventSender) -> Result<Self> {
        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        let initial = if adapter.is_powered().await? {
            AdapterState::PoweredOn
        } else {
            AdapterState::PoweredOff
        };
        let state = Arc::new(Mutex::new(initial));

        // Report the initial state like a freshly created central would
        Self::send(&event_tx, TransportEvent::StateChanged(initial));

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let background = vec![
            tokio::spawn(Self::watch_adapter(
                adapter.clone(),
                state.clone(),
                event_tx.clone(),
            )),
            tokio::spawn(Self::write_loop(write_rx, event_tx.clone())),
        ];

        Ok(Self {
            adapter,
            runtime: Handle::current(),
            event_tx,
            state,
            tables: Arc::new(Mutex::new(Tables::default())),
            write_tx,
            scan_task: None,
            background,
        })
    }

    fn address_of(id: &PeripheralId) -> Result<Address> {
        id.as_str()
            .parse::<Address>()
            .map_err(|_| anyhow!("invalid Bluetooth address: {}", id))
    }

    fn send(event_tx: &EventSender, event: TransportEvent) {
        if event_tx.send(event).is_err() {
            debug!("Event queue closed, dropping transport event");
        }
    }

    async fn watch_adapter(adapter: Adapter, state: Arc<Mutex<AdapterState>>, event_tx: EventSender) {
        let events = match adapter.events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Cannot watch adapter: {}", e);
                return;
            }
        };
        pin_mut!(events);

        while let Some(event) = events.next().await {
            if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                let new_state = if powered {
                    AdapterState::PoweredOn
                } else {
                    AdapterState::PoweredOff
                };
                *state.lock() = new_state;
                if event_tx.send(TransportEvent::StateChanged(new_state)).is_err() {
                    break;
                }
            }
        }
    }

    async fn write_loop(mut write_rx: mpsc::UnboundedReceiver<WriteJob>, event_tx: EventSender) {
        while let Some(job) = write_rx.recv().await {
            let request = CharacteristicWriteRequest {
                op_type: match job.mode {
                    WriteMode::WithResponse => WriteOp::Request,
                    WriteMode::WithoutResponse => WriteOp::Command,
                },
                ..Default::default()
            };

            match job.remote.write_ext(&job.value, &request).await {
                // Commands are never acknowledged, so there is nothing to confirm
                Ok(()) if job.mode == WriteMode::WithoutResponse => {}
                Ok(()) => Self::send(
                    &event_tx,
                    TransportEvent::ValueWritten {
                        characteristic: job.characteristic,
                        value: Some(job.value),
                        error: None,
                    },
                ),
                Err(e) => Self::send(
                    &event_tx,
                    TransportEvent::ValueWritten {
                        characteristic: job.characteristic,
                        value: Some(job.value),
                        error: Some(e.to_string()),
                    },
                ),
            }
        }
    }

    async fn scan(adapter: Adapter, filter: Option<Vec<Uuid>>, event_tx: EventSender) -> Result<()> {
        let events = adapter.discover_devices().await?;
        pin_mut!(events);

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };
            let device = adapter.device(address)?;

            if let Some(filter) = &filter {
                let uuids = device.uuids().await?.unwrap_or_default();
                if !filter.iter().any(|uuid| uuids.contains(uuid)) {
                    continue;
                }
            }

            let peripheral = PeripheralHandle::new(address.to_string(), device.name().await?);
            let rssi = device.rssi().await?;
            if event_tx
                .send(TransportEvent::Discovered { peripheral, rssi })
                .is_err()
            {
                break;
            }
        }
        Ok(())
    }

    async fn connected_devices(adapter: &Adapter, services: &[Uuid]) -> Result<Vec<PeripheralHandle>> {
        let mut found = Vec::new();
        for address in adapter.device_addresses().await? {
            let device = adapter.device(address)?;
            if !device.is_connected().await? {
                continue;
            }
            let uuids = device.uuids().await?.unwrap_or_default();
            if services.iter().any(|uuid| uuids.contains(uuid)) {
                found.push(PeripheralHandle::new(address.to_string(), device.name().await?));
            }
        }
        Ok(found)
    }

    async fn link(
        adapter: Adapter,
        peripheral: PeripheralHandle,
        tables: Arc<Mutex<Tables>>,
        event_tx: EventSender,
    ) {
        let device = match Self::address_of(&peripheral.id).and_then(|a| Ok(adapter.device(a)?)) {
            Ok(device) => device,
            Err(e) => {
                Self::send(
                    &event_tx,
                    TransportEvent::FailedToConnect {
                        peripheral,
                        error: Some(e.to_string()),
                    },
                );
                return;
            }
        };

        if let Err(e) = device.connect().await {
            Self::send(
                &event_tx,
                TransportEvent::FailedToConnect {
                    peripheral,
                    error: Some(e.to_string()),
                },
            );
            return;
        }

        // Subscribe before reporting so a quick drop is not missed
        let events = device.events().await;
        Self::send(&event_tx, TransportEvent::Connected(peripheral.clone()));

        let events = match events {
            Ok(events) => events,
            Err(e) => {
                warn!("Cannot watch {}: {}", peripheral, e);
                return;
            }
        };
        pin_mut!(events);

        while let Some(event) = events.next().await {
            if let DeviceEvent::PropertyChanged(DeviceProperty::Connected(false)) = event {
                tables.lock().forget(&peripheral.id);
                Self::send(
                    &event_tx,
                    TransportEvent::Disconnected {
                        peripheral,
                        error: Some("link lost".to_string()),
                    },
                );
                return;
            }
        }
    }

    async fn resolve_services(
        adapter: &Adapter,
        peripheral: &PeripheralId,
        wanted: &[Uuid],
        tables: &Mutex<Tables>,
    ) -> Result<Vec<ServiceRef>> {
        let device = adapter.device(Self::address_of(peripheral)?)?;

        // BlueZ walks the GATT database on its own after connecting
        for _ in 0..SERVICE_RESOLVE_ATTEMPTS {
            if device.is_services_resolved().await? {
                break;
            }
            tokio::time::sleep(SERVICE_RESOLVE_INTERVAL).await;
        }

        let mut found = Vec::new();
        for service in device.services().await? {
            let uuid = service.uuid().await?;
            if !wanted.is_empty() && !wanted.contains(&uuid) {
                continue;
            }
            let reference = ServiceRef {
                id: service.id(),
                uuid,
            };
            tables
                .lock()
                .services
                .insert((peripheral.clone(), reference.id), service);
            found.push(reference);
        }
        Ok(found)
    }

    async fn resolve_characteristics(
        peripheral: &PeripheralId,
        service: Service,
        service_ref: ServiceRef,
        wanted: &[Uuid],
        tables: &Mutex<Tables>,
    ) -> Result<Vec<CharacteristicInfo>> {
        let mut found = Vec::new();
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid().await?;
            if !wanted.is_empty() && !wanted.contains(&uuid) {
                continue;
            }
            let flags = characteristic.flags().await?;
            let properties = CharacteristicProperties {
                broadcast: flags.broadcast,
                read: flags.read,
                write_without_response: flags.write_without_response,
                write: flags.write,
                notify: flags.notify,
                indicate: flags.indicate,
            };
            let reference = CharacteristicRef {
                peripheral: peripheral.clone(),
                service: service_ref.id,
                id: characteristic.id(),
                uuid,
            };
            tables
                .lock()
                .characteristics
                .insert(reference.clone(), characteristic);
            found.push(CharacteristicInfo {
                reference,
                properties,
            });
        }
        Ok(found)
    }
}

impl Transport for BluezTransport {
    fn state(&self) -> AdapterState {
        *self.state.lock()
    }

    fn is_scanning(&self) -> bool {
        self.scan_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn start_scan(&mut self, services: Option<&[Uuid]>) {
        if self.is_scanning() {
            debug!("Scan already running");
            return;
        }
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let filter = services.map(<[Uuid]>::to_vec);

        self.scan_task = Some(self.runtime.spawn(async move {
            if let Err(e) = Self::scan(adapter, filter, event_tx).await {
                error!("Scan failed: {}", e);
            }
        }));
    }

    fn stop_scan(&mut self) {
        // Dropping the discovery stream ends the scan
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
    }

    fn retrieve_connected(&mut self, services: &[Uuid]) {
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let services = services.to_vec();

        self.runtime.spawn(async move {
            match Self::connected_devices(&adapter, &services).await {
                Ok(peripherals) => {
                    Self::send(&event_tx, TransportEvent::RetrievedConnected(peripherals))
                }
                Err(e) => warn!("Cannot list connected devices: {}", e),
            }
        });
    }

    fn connect(&mut self, peripheral: &PeripheralHandle) {
        let task = self.runtime.spawn(Self::link(
            self.adapter.clone(),
            peripheral.clone(),
            self.tables.clone(),
            self.event_tx.clone(),
        ));
        if let Some(previous) = self.tables.lock().link_tasks.insert(peripheral.id.clone(), task) {
            previous.abort();
        }
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralHandle) {
        {
            let mut tables = self.tables.lock();
            if let Some(task) = tables.link_tasks.remove(&peripheral.id) {
                task.abort();
            }
            tables.forget(&peripheral.id);
        }

        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let peripheral = peripheral.clone();

        self.runtime.spawn(async move {
            let result = match Self::address_of(&peripheral.id) {
                Ok(address) => match adapter.device(address) {
                    Ok(device) => device.disconnect().await.map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                debug!("Disconnect of {} reported: {}", peripheral, e);
            }
            Self::send(
                &event_tx,
                TransportEvent::Disconnected {
                    peripheral,
                    error: None,
                },
            );
        });
    }

    fn discover_services(&mut self, peripheral: &PeripheralId, services: &[Uuid]) {
        let adapter = self.adapter.clone();
        let tables = self.tables.clone();
        let event_tx = self.event_tx.clone();
        let peripheral = peripheral.clone();
        let wanted = services.to_vec();

        self.runtime.spawn(async move {
            let event = match Self::resolve_services(&adapter, &peripheral, &wanted, &tables).await {
                Ok(services) => TransportEvent::ServicesDiscovered {
                    peripheral,
                    services,
                    error: None,
                },
                Err(e) => TransportEvent::ServicesDiscovered {
                    peripheral,
                    services: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            Self::send(&event_tx, event);
        });
    }

    fn discover_characteristics(
        &mut self,
        peripheral: &PeripheralId,
        service: &ServiceRef,
        characteristics: &[Uuid],
    ) {
        let remote = self
            .tables
            .lock()
            .services
            .get(&(peripheral.clone(), service.id))
            .cloned();
        let tables = self.tables.clone();
        let event_tx = self.event_tx.clone();
        let peripheral = peripheral.clone();
        let service = *service;
        let wanted = characteristics.to_vec();

        self.runtime.spawn(async move {
            let result = match remote {
                Some(remote) => {
                    Self::resolve_characteristics(&peripheral, remote, service, &wanted, &tables).await
                }
                None => Err(anyhow!("service {} is no longer available", service.uuid)),
            };
            let event = match result {
                Ok(characteristics) => TransportEvent::CharacteristicsDiscovered {
                    peripheral,
                    service,
                    characteristics,
                    error: None,
                },
                Err(e) => TransportEvent::CharacteristicsDiscovered {
                    peripheral,
                    service,
                    characteristics: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            Self::send(&event_tx, event);
        });
    }

    fn set_notify(&mut self, characteristic: &CharacteristicRef, enabled: bool) {
        let mut tables = self.tables.lock();
        if let Some(task) = tables.notify_tasks.remove(characteristic) {
            task.abort();
        }
        if !enabled {
            return;
        }
        let Some(remote) = tables.characteristics.get(characteristic).cloned() else {
            warn!("Cannot subscribe to unknown characteristic {}", characteristic.uuid);
            return;
        };

        let event_tx = self.event_tx.clone();
        let reference = characteristic.clone();
        let task = self.runtime.spawn(async move {
            let values = match remote.notify().await {
                Ok(values) => values,
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", reference.uuid, e);
                    return;
                }
            };
            pin_mut!(values);
            debug!("Notifications enabled on {}", reference.uuid);

            while let Some(value) = values.next().await {
                let event = TransportEvent::ValueUpdated {
                    characteristic: reference.clone(),
                    value: Some(value),
                };
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });
        tables.notify_tasks.insert(characteristic.clone(), task);
    }

    fn write(&mut self, characteristic: &CharacteristicRef, value: &[u8], mode: WriteMode) {
        let Some(remote) = self.tables.lock().characteristics.get(characteristic).cloned() else {
            warn!("Dropping write to unknown characteristic {}", characteristic.uuid);
            return;
        };
        let job = WriteJob {
            characteristic: characteristic.clone(),
            remote,
            value: value.to_vec(),
            mode,
        };
        if self.write_tx.send(job).is_err() {
            error!("Write queue closed");
        }
    }

    fn read_signal_strength(&mut self, peripheral: &PeripheralId) {
        let adapter = self.adapter.clone();
        let event_tx = self.event_tx.clone();
        let peripheral = peripheral.clone();

        self.runtime.spawn(async move {
            let result = match Self::address_of(&peripheral) {
                Ok(address) => match adapter.device(address) {
                    Ok(device) => device.rssi().await.map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };
            let event = match result {
                Ok(Some(rssi)) => TransportEvent::RssiRead {
                    peripheral,
                    rssi,
                    error: None,
                },
                Ok(None) => TransportEvent::RssiRead {
                    peripheral,
                    rssi: 0,
                    error: Some("RSSI not available".to_string()),
                },
                Err(e) => TransportEvent::RssiRead {
                    peripheral,
                    rssi: 0,
                    error: Some(e.to_string()),
                },
            };
            Self::send(&event_tx, event);
        });
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        for task in self.background.drain(..) {
            task.abort();
        }
        let mut tables = self.tables.lock();
        for (_, task) in tables.link_tasks.drain() {
            task.abort();
        }
        for (_, task) in tables.notify_tasks.drain() {
            task.abort();
        }
    }
}
