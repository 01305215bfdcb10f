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

//! GATT service and characteristic UUIDs used by HM-10 class modules.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bluetooth SIG base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BASE_UUID | ((short as u128) << 96))
}

/// Serial service exposed by genuine HM-10 modules (JNHuaMao firmware).
pub const SERVICE_UUID: Uuid = uuid_from_u16(0xFFE0);

/// Serial characteristic of [`SERVICE_UUID`].
/// Properties: Read, Write Without Response, Notify (and Write on clones)
pub const CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0xFFE1);

/// Serial service exposed by alternate hardware and test rigs.
pub const ALT_SERVICE_UUID: Uuid = uuid_from_u16(0xFFF0);

/// Serial characteristic of [`ALT_SERVICE_UUID`].
pub const ALT_CHARACTERISTIC_UUID: Uuid = uuid_from_u16(0xFFF1);

/// The service/characteristic pairs the negotiator searches for.
///
/// Index 0 is the production module, index 1 the alternate hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateSet {
    /// Primary service UUID.
    pub service_uuid: Uuid,
    /// Primary characteristic UUID.
    pub characteristic_uuid: Uuid,
    /// Alternate/test service UUID.
    pub alt_service_uuid: Uuid,
    /// Alternate/test characteristic UUID.
    pub alt_characteristic_uuid: Uuid,
}

impl Default for CandidateSet {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            characteristic_uuid: CHARACTERISTIC_UUID,
            alt_service_uuid: ALT_SERVICE_UUID,
            alt_characteristic_uuid: ALT_CHARACTERISTIC_UUID,
        }
    }
}

impl CandidateSet {
    /// Both candidate service UUIDs, primary first.
    pub fn services(&self) -> [Uuid; 2] {
        [self.service_uuid, self.alt_service_uuid]
    }

    /// Both candidate characteristic UUIDs, primary first.
    pub fn characteristics(&self) -> [Uuid; 2] {
        [self.characteristic_uuid, self.alt_characteristic_uuid]
    }

    /// Whether `uuid` is one of the candidate characteristics.
    pub fn is_candidate_characteristic(&self, uuid: &Uuid) -> bool {
        *uuid == self.characteristic_uuid || *uuid == self.alt_characteristic_uuid
    }
}
