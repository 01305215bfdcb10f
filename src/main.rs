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

//! HM-10 serial console.
//!
//! Usage: `hm10-serial [TARGET]` where TARGET is a name or address
//! substring. Without a target, discovered peripherals are only listed.

use anyhow::Result;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hm10_serial::bluetooth::{AdapterState, BluetoothSerial, BluezTransport, PeripheralHandle};
use hm10_serial::config::Config;
use hm10_serial::events::{ChannelDelegate, SerialEvent};

fn is_target(target: Option<&str>, peripheral: &PeripheralHandle) -> bool {
    match target {
        Some(t) => {
            peripheral.id.as_str().contains(t)
                || peripheral.name.as_deref().is_some_and(|name| name.contains(t))
        }
        None => false,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("Starting hm10-serial v{}...", env!("CARGO_PKG_VERSION"));

    // Command line wins over the config file
    let target = std::env::args().nth(1).or_else(|| config.scan.target.clone());

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = BluezTransport::new(transport_tx).await?;

    let (delegate, mut events) = ChannelDelegate::channel();
    let serial = BluetoothSerial::new(transport, config.serial, delegate);

    let pump = serial.clone();
    tokio::spawn(async move { pump.run(transport_rx).await });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let scan_deadline = tokio::time::sleep(Duration::from_secs(config.scan.duration_secs));
    tokio::pin!(scan_deadline);

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                SerialEvent::StateChanged(AdapterState::PoweredOn) => {
                    info!("Adapter powered on, scanning...");
                    serial.start_scan();
                }
                SerialEvent::StateChanged(state) => {
                    warn!("Adapter state: {}", state.as_str());
                }
                SerialEvent::PeripheralDiscovered { peripheral, rssi } => {
                    info!("Found {} rssi={:?}", peripheral, rssi);
                    if serial.is_idle() && is_target(target.as_deref(), &peripheral) {
                        serial.stop_scan();
                        serial.connect_to_peripheral(&peripheral);
                    }
                }
                SerialEvent::Connected(peripheral) => {
                    info!("Connected to {}, looking for the serial characteristic", peripheral);
                }
                SerialEvent::Ready(peripheral) => {
                    info!("{} ready ({:?}), type to send", peripheral, serial.write_mode());
                }
                SerialEvent::FailedToConnect { peripheral, error } => {
                    error!("Failed to connect to {}: {:?}", peripheral, error);
                    break;
                }
                SerialEvent::Disconnected { peripheral, error } => {
                    warn!("Disconnected from {}: {:?}", peripheral, error);
                    break;
                }
                SerialEvent::StringReceived(text) => {
                    let mut stdout = std::io::stdout();
                    write!(stdout, "{}", text)?;
                    stdout.flush()?;
                }
                SerialEvent::BytesReceived(bytes) => {
                    debug!("Received {} bytes: {:02x?}", bytes.len(), bytes);
                }
                SerialEvent::StringSent(text) => {
                    debug!("Module acknowledged: {:?}", text);
                }
                SerialEvent::RssiRead(rssi) => {
                    info!("RSSI: {} dBm", rssi);
                }
                _ => {}
            },
            line = stdin.next_line() => match line? {
                Some(line) if line.trim() == "/rssi" => serial.read_signal_strength(),
                Some(line) if serial.is_ready() => serial.send_string(&format!("{}\n", line)),
                Some(_) => warn!("Not connected, input dropped"),
                None => break,
            },
            _ = &mut scan_deadline, if serial.is_idle() => {
                info!("Scan finished after {}s", config.scan.duration_secs);
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    serial.stop_scan();
    if !serial.is_idle() {
        serial.disconnect();
        // Give BlueZ a moment to tear the link down before the runtime stops
        let _ = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(event) = events.recv().await {
                if matches!(event, SerialEvent::Disconnected { .. }) {
                    break;
                }
            }
        })
        .await;
    }

    info!("hm10-serial stopped");
    Ok(())
}
