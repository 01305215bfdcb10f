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

//! Connection lifecycle of a single peripheral.

use tracing::debug;

use super::transport::{PeripheralHandle, PeripheralId};

/// Phase of the current connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Nothing in flight.
    Idle,
    /// Scanning, no connection in flight.
    Scanning,
    /// Connection requested, waiting for the link.
    Connecting,
    /// Link up, discovery not started yet.
    Connected,
    /// Waiting for the service list.
    DiscoveringServices,
    /// Waiting for characteristic lists.
    DiscoveringCharacteristics,
    /// Serial characteristic subscribed.
    Ready,
}

impl ConnectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "Idle",
            ConnectionPhase::Scanning => "Scanning",
            ConnectionPhase::Connecting => "Connecting...",
            ConnectionPhase::Connected => "Connected",
            ConnectionPhase::DiscoveringServices => "Discovering services...",
            ConnectionPhase::DiscoveringCharacteristics => "Discovering characteristics...",
            ConnectionPhase::Ready => "Ready",
        }
    }
}

/// How an adapter "connected" event relates to the current attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// It resolves the pending attempt.
    Accepted,
    /// The peripheral is already the connected one.
    Duplicate,
    /// It belongs to an attempt that was replaced.
    Stale,
}

/// Tracks the pending and connected peripherals.
///
/// At most one of each is set. Events that name neither are stale
/// resolutions of replaced attempts and leave the state untouched.
#[derive(Debug)]
pub struct ConnectionMachine {
    phase: ConnectionPhase,
    pending: Option<PeripheralHandle>,
    connected: Option<PeripheralHandle>,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            pending: None,
            connected: None,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn pending(&self) -> Option<&PeripheralHandle> {
        self.pending.as_ref()
    }

    pub fn connected(&self) -> Option<&PeripheralHandle> {
        self.connected.as_ref()
    }

    /// Whether `id` is the connected peripheral.
    pub fn is_connected_to(&self, id: &PeripheralId) -> bool {
        self.connected.as_ref().is_some_and(|p| &p.id == id)
    }

    fn is_pending(&self, id: &PeripheralId) -> bool {
        self.pending.as_ref().is_some_and(|p| &p.id == id)
    }

    pub fn scan_started(&mut self) {
        if self.phase == ConnectionPhase::Idle {
            self.set_phase(ConnectionPhase::Scanning);
        }
    }

    pub fn scan_stopped(&mut self) {
        if self.phase == ConnectionPhase::Scanning {
            self.set_phase(ConnectionPhase::Idle);
        }
    }

    /// Record a new connection attempt.
    ///
    /// Returns the attempt it replaced, if any. The replaced attempt is not
    /// cancelled here.
    pub fn begin_connect(&mut self, peripheral: PeripheralHandle) -> Option<PeripheralHandle> {
        if self.is_connected_to(&peripheral.id) {
            debug!("{} is already connected", peripheral);
            return None;
        }
        let replaced = self.pending.replace(peripheral);
        if self.connected.is_none() {
            self.set_phase(ConnectionPhase::Connecting);
        }
        replaced
    }

    /// Peripheral `disconnect()` should cancel: connected first, else pending.
    pub fn disconnect_target(&self) -> Option<&PeripheralHandle> {
        self.connected.as_ref().or(self.pending.as_ref())
    }

    pub fn on_connected(&mut self, peripheral: &PeripheralHandle) -> LinkOutcome {
        if self.is_connected_to(&peripheral.id) {
            if self.is_pending(&peripheral.id) {
                self.pending = None;
            }
            return LinkOutcome::Duplicate;
        }
        if !self.is_pending(&peripheral.id) {
            return LinkOutcome::Stale;
        }

        self.pending = None;
        self.connected = Some(peripheral.clone());
        self.set_phase(ConnectionPhase::Connected);
        LinkOutcome::Accepted
    }

    /// Returns `false` when `id` is neither connected nor pending.
    pub fn on_disconnected(&mut self, id: &PeripheralId) -> bool {
        if !self.is_connected_to(id) && !self.is_pending(id) {
            return false;
        }
        self.reset();
        true
    }

    /// Returns `false` when `id` is not the pending peripheral.
    pub fn on_failed_to_connect(&mut self, id: &PeripheralId) -> bool {
        if !self.is_pending(id) {
            return false;
        }
        self.pending = None;
        if self.connected.is_none() {
            self.set_phase(ConnectionPhase::Idle);
        }
        true
    }

    pub fn services_requested(&mut self) {
        self.set_phase(ConnectionPhase::DiscoveringServices);
    }

    pub fn characteristics_requested(&mut self) {
        if self.phase != ConnectionPhase::Ready {
            self.set_phase(ConnectionPhase::DiscoveringCharacteristics);
        }
    }

    pub fn mark_ready(&mut self) {
        self.set_phase(ConnectionPhase::Ready);
    }

    /// Forget both peripherals. Used for disconnects and adapter state
    /// changes, which may arrive without a disconnect event.
    pub fn reset(&mut self) {
        self.pending = None;
        self.connected = None;
        self.set_phase(ConnectionPhase::Idle);
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            debug!("Connection phase: {} -> {}", self.phase.as_str(), phase.as_str());
            self.phase = phase;
        }
    }
}
