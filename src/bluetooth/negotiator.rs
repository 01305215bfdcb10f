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

//! Serial characteristic selection.
//!
//! Two incompatible module variants answer to the same name: genuine HM-10
//! boards only accept write-without-response, clones need write-with-response.
//! The write mode is therefore read off the characteristic at runtime.

use tracing::{debug, info};

use super::transport::{CharacteristicInfo, CharacteristicRef, WriteMode};
use super::uuids::CandidateSet;

/// Picks the serial characteristic and its write mode.
#[derive(Debug)]
pub struct Negotiator {
    candidates: CandidateSet,
    write_characteristic: Option<CharacteristicRef>,
    write_mode: WriteMode,
}

impl Negotiator {
    pub fn new(candidates: CandidateSet) -> Self {
        Self {
            candidates,
            write_characteristic: None,
            write_mode: WriteMode::default(),
        }
    }

    pub fn candidates(&self) -> &CandidateSet {
        &self.candidates
    }

    pub fn set_candidates(&mut self, candidates: CandidateSet) {
        self.candidates = candidates;
    }

    /// The negotiated characteristic, if negotiation completed.
    pub fn write_characteristic(&self) -> Option<&CharacteristicRef> {
        self.write_characteristic.as_ref()
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// Consider one discovered characteristic.
    ///
    /// Returns its reference when it is a serial candidate. A later match
    /// overwrites an earlier one.
    pub fn accept(&mut self, info: &CharacteristicInfo) -> Option<CharacteristicRef> {
        if !self.candidates.is_candidate_characteristic(&info.reference.uuid) {
            debug!("Skipping characteristic {}", info.reference.uuid);
            return None;
        }

        self.write_mode = WriteMode::from_properties(&info.properties);
        self.write_characteristic = Some(info.reference.clone());

        info!(
            "Serial characteristic {} selected, write mode {:?}",
            info.reference.uuid, self.write_mode
        );
        Some(info.reference.clone())
    }

    /// Drop the characteristic reference.
    pub fn reset(&mut self) {
        if self.write_characteristic.take().is_some() {
            debug!("Write characteristic cleared");
        }
    }
}
