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

//! Fan-out of raw frames to the delegate and the broadcast channel.

use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::events::{Notification, SerialEvent};

/// Capacity of the out-of-band notification channel.
pub const NOTIFICATION_CAPACITY: usize = 64;

/// Whether a frame came from the module or was written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Received,
    Sent,
}

/// Publishes to two independent registries: a queue drained into the
/// delegate, and a broadcast channel for decoupled listeners.
pub struct FrameDispatcher {
    outbox: VecDeque<SerialEvent>,
    notifications: broadcast::Sender<Notification>,
}

impl Default for FrameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDispatcher {
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            outbox: VecDeque::new(),
            notifications,
        }
    }

    /// Register a decoupled listener.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Queue an event for the delegate.
    pub fn publish(&mut self, event: SerialEvent) {
        trace!("Queued {:?}", event);
        self.outbox.push_back(event);
    }

    /// Send a notification to decoupled listeners.
    pub fn notify(&self, notification: Notification) {
        // No listeners is fine
        let _ = self.notifications.send(notification);
    }

    /// Fan a frame out as data, string (when valid UTF-8) and bytes.
    ///
    /// Returns `false` when the frame was empty and nothing was emitted.
    pub fn dispatch_frame(&mut self, direction: Direction, value: Option<&[u8]>) -> bool {
        let data = match value {
            Some(data) if !data.is_empty() => data,
            _ => {
                debug!("Dropping empty {:?} frame", direction);
                return false;
            }
        };

        self.publish(match direction {
            Direction::Received => SerialEvent::DataReceived(data.to_vec()),
            Direction::Sent => SerialEvent::DataSent(data.to_vec()),
        });

        match std::str::from_utf8(data) {
            Ok(text) => {
                let text = text.to_string();
                let (event, notification) = match direction {
                    Direction::Received => (
                        SerialEvent::StringReceived(text.clone()),
                        Notification::StringReceived(text),
                    ),
                    Direction::Sent => (
                        SerialEvent::StringSent(text.clone()),
                        Notification::StringSent(text),
                    ),
                };
                self.publish(event);
                self.notify(notification);
            }
            Err(e) => {
                trace!("{:?} frame is not UTF-8: {}", direction, e);
            }
        }

        self.publish(match direction {
            Direction::Received => SerialEvent::BytesReceived(data.to_vec()),
            Direction::Sent => SerialEvent::BytesSent(data.to_vec()),
        });

        true
    }

    /// Next event for the delegate.
    pub fn next_event(&mut self) -> Option<SerialEvent> {
        self.outbox.pop_front()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }
}
