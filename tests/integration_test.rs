//! Integration tests for the full connection and framing flow.

use hm10_serial::bluetooth::mock::{MockHandle, MockTransport, TransportCall};
use hm10_serial::bluetooth::uuids::{
    uuid_from_u16, ALT_CHARACTERISTIC_UUID, ALT_SERVICE_UUID, CHARACTERISTIC_UUID, SERVICE_UUID,
};
use hm10_serial::bluetooth::{
    AdapterState, BluetoothSerial, CandidateSet, CharacteristicInfo, CharacteristicProperties,
    CharacteristicRef, ConnectionPhase, PeripheralHandle, PeripheralId, ServiceRef,
    TransportEvent, WriteMode,
};
use hm10_serial::events::{ChannelDelegate, Notification, SerialDelegate, SerialEvent};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

struct Harness {
    serial: BluetoothSerial<MockTransport>,
    mock: MockHandle,
    events: UnboundedReceiver<SerialEvent>,
}

impl Harness {
    fn new(state: AdapterState) -> Self {
        let (transport, mock) = MockTransport::new(state);
        let (delegate, events) = ChannelDelegate::channel();
        let serial = BluetoothSerial::new(transport, CandidateSet::default(), delegate);
        Self {
            serial,
            mock,
            events,
        }
    }

    fn events(&mut self) -> Vec<SerialEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn send(&self, event: TransportEvent) {
        self.serial.handle_event(event);
    }

    /// Drive a peripheral from connect request to Ready.
    fn make_ready(&mut self, peripheral: &PeripheralHandle, properties: CharacteristicProperties) {
        self.serial.connect_to_peripheral(peripheral);
        self.send(TransportEvent::Connected(peripheral.clone()));
        self.send(services(&peripheral.id, &[(1, SERVICE_UUID)]));
        self.send(characteristics(
            &peripheral.id,
            ServiceRef { id: 1, uuid: SERVICE_UUID },
            vec![info(&peripheral.id, 1, 2, CHARACTERISTIC_UUID, properties)],
        ));
    }

    /// Readiness must always equal powered-on && connected && negotiated.
    fn assert_readiness_invariant(&self) {
        let expected = self.serial.is_powered_on()
            && self.serial.connected_peripheral().is_some()
            && self.serial.write_mode().is_some();
        assert_eq!(self.serial.is_ready(), expected);
    }
}

fn hm10(id: &str) -> PeripheralHandle {
    PeripheralHandle::new(id, Some("HMSoft".to_string()))
}

fn genuine() -> CharacteristicProperties {
    CharacteristicProperties {
        notify: true,
        write_without_response: true,
        ..Default::default()
    }
}

fn clone_module() -> CharacteristicProperties {
    CharacteristicProperties::from_bits(0x1E)
}

fn char_ref(peripheral: &PeripheralId, service: u16, id: u16, uuid: Uuid) -> CharacteristicRef {
    CharacteristicRef {
        peripheral: peripheral.clone(),
        service,
        id,
        uuid,
    }
}

fn info(
    peripheral: &PeripheralId,
    service: u16,
    id: u16,
    uuid: Uuid,
    properties: CharacteristicProperties,
) -> CharacteristicInfo {
    CharacteristicInfo {
        reference: char_ref(peripheral, service, id, uuid),
        properties,
    }
}

fn services(peripheral: &PeripheralId, list: &[(u16, Uuid)]) -> TransportEvent {
    TransportEvent::ServicesDiscovered {
        peripheral: peripheral.clone(),
        services: list
            .iter()
            .map(|(id, uuid)| ServiceRef { id: *id, uuid: *uuid })
            .collect(),
        error: None,
    }
}

fn characteristics(
    peripheral: &PeripheralId,
    service: ServiceRef,
    characteristics: Vec<CharacteristicInfo>,
) -> TransportEvent {
    TransportEvent::CharacteristicsDiscovered {
        peripheral: peripheral.clone(),
        service,
        characteristics,
        error: None,
    }
}

fn count_ready(events: &[SerialEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SerialEvent::Ready(_)))
        .count()
}

#[test]
fn test_genuine_module_negotiation() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:01");

    h.serial.connect_to_peripheral(&module);
    assert_eq!(h.serial.phase(), ConnectionPhase::Connecting);
    h.send(TransportEvent::Connected(module.clone()));

    // Connected is not ready
    assert!(!h.serial.is_ready());
    assert_eq!(h.serial.phase(), ConnectionPhase::DiscoveringServices);
    assert!(h.mock.calls().contains(&TransportCall::DiscoverServices {
        peripheral: module.id.clone(),
        services: vec![SERVICE_UUID, ALT_SERVICE_UUID],
    }));

    h.send(services(&module.id, &[(1, SERVICE_UUID)]));
    assert_eq!(h.serial.phase(), ConnectionPhase::DiscoveringCharacteristics);
    assert!(h.mock.calls().contains(&TransportCall::DiscoverCharacteristics {
        peripheral: module.id.clone(),
        service: ServiceRef { id: 1, uuid: SERVICE_UUID },
        characteristics: vec![CHARACTERISTIC_UUID, ALT_CHARACTERISTIC_UUID],
    }));

    h.send(characteristics(
        &module.id,
        ServiceRef { id: 1, uuid: SERVICE_UUID },
        vec![info(&module.id, 1, 2, CHARACTERISTIC_UUID, genuine())],
    ));

    assert!(h.serial.is_ready());
    assert_eq!(h.serial.phase(), ConnectionPhase::Ready);
    assert_eq!(h.serial.write_mode(), Some(WriteMode::WithoutResponse));
    assert!(h.mock.calls().contains(&TransportCall::SetNotify {
        characteristic: char_ref(&module.id, 1, 2, CHARACTERISTIC_UUID),
        enabled: true,
    }));

    let events = h.events();
    assert_eq!(events[0], SerialEvent::Connected(module.clone()));
    assert_eq!(count_ready(&events), 1);
}

#[test]
fn test_clone_module_on_alternate_service() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:02");

    h.serial.connect_to_peripheral(&module);
    h.send(TransportEvent::Connected(module.clone()));
    // Discovery is asked of every returned service
    h.send(services(&module.id, &[(1, uuid_from_u16(0x180A)), (9, ALT_SERVICE_UUID)]));

    let asked: Vec<_> = h
        .mock
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::DiscoverCharacteristics { .. }))
        .collect();
    assert_eq!(asked.len(), 2);

    h.send(characteristics(
        &module.id,
        ServiceRef { id: 1, uuid: uuid_from_u16(0x180A) },
        vec![info(&module.id, 1, 3, uuid_from_u16(0x2A29), CharacteristicProperties::from_bits(0x02))],
    ));
    assert!(!h.serial.is_ready());

    h.send(characteristics(
        &module.id,
        ServiceRef { id: 9, uuid: ALT_SERVICE_UUID },
        vec![info(&module.id, 9, 10, ALT_CHARACTERISTIC_UUID, clone_module())],
    ));
    assert!(h.serial.is_ready());
    assert_eq!(h.serial.write_mode(), Some(WriteMode::WithResponse));

    h.serial.send_string("AT");
    assert_eq!(h.mock.writes(), vec![(b"AT".to_vec(), WriteMode::WithResponse)]);
}

#[test]
fn test_no_matching_characteristic_stays_silent() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:03");

    h.serial.connect_to_peripheral(&module);
    h.send(TransportEvent::Connected(module.clone()));
    h.send(services(&module.id, &[(1, SERVICE_UUID)]));
    h.send(characteristics(
        &module.id,
        ServiceRef { id: 1, uuid: SERVICE_UUID },
        vec![info(&module.id, 1, 2, uuid_from_u16(0xFFE2), genuine())],
    ));

    assert!(!h.serial.is_ready());
    assert_eq!(count_ready(&h.events()), 0);

    h.serial.send_string("lost");
    assert!(h.mock.writes().is_empty());
}

#[test]
fn test_send_when_not_ready_is_noop() {
    let mut h = Harness::new(AdapterState::PoweredOn);

    h.serial.send_string("hello");
    h.serial.send_bytes(&[1, 2, 3]);
    h.serial.send_data(vec![4, 5]);
    h.serial.read_signal_strength();

    assert!(h.mock.calls().is_empty());
    assert!(h.events().is_empty());
}

#[test]
fn test_send_funnels_through_one_primitive() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:04");
    h.make_ready(&module, genuine());

    h.serial.send_string("héllo");
    h.serial.send_bytes(&[0x01, 0xFF]);
    h.serial.send_data(vec![0x80]);

    assert_eq!(
        h.mock.writes(),
        vec![
            ("héllo".as_bytes().to_vec(), WriteMode::WithoutResponse),
            (vec![0x01, 0xFF], WriteMode::WithoutResponse),
            (vec![0x80], WriteMode::WithoutResponse),
        ]
    );
}

#[test]
fn test_write_confirmation_round_trip() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:05");
    h.make_ready(&module, clone_module());
    let mut listener = h.serial.subscribe();
    h.events();

    h.serial.send_string("Hello HM-10");
    let (value, _) = h.mock.writes().remove(0);
    h.send(TransportEvent::ValueWritten {
        characteristic: char_ref(&module.id, 1, 2, CHARACTERISTIC_UUID),
        value: Some(value),
        error: None,
    });

    assert_eq!(
        h.events(),
        vec![
            SerialEvent::DataSent(b"Hello HM-10".to_vec()),
            SerialEvent::StringSent("Hello HM-10".to_string()),
            SerialEvent::BytesSent(b"Hello HM-10".to_vec()),
        ]
    );
    assert_eq!(
        listener.try_recv().unwrap(),
        Notification::StringSent("Hello HM-10".to_string())
    );
}

#[test]
fn test_failed_write_emits_nothing() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:06");
    h.make_ready(&module, clone_module());
    h.events();

    h.send(TransportEvent::ValueWritten {
        characteristic: char_ref(&module.id, 1, 2, CHARACTERISTIC_UUID),
        value: Some(b"x".to_vec()),
        error: Some("ATT error 0x03".to_string()),
    });
    assert!(h.events().is_empty());
}

#[test]
fn test_inbound_frames() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:07");
    h.make_ready(&module, genuine());
    let mut listener = h.serial.subscribe();
    h.events();

    let characteristic = char_ref(&module.id, 1, 2, CHARACTERISTIC_UUID);
    h.send(TransportEvent::ValueUpdated {
        characteristic: characteristic.clone(),
        value: Some(b"OK".to_vec()),
    });
    assert_eq!(
        h.events(),
        vec![
            SerialEvent::DataReceived(b"OK".to_vec()),
            SerialEvent::StringReceived("OK".to_string()),
            SerialEvent::BytesReceived(b"OK".to_vec()),
        ]
    );
    assert_eq!(
        listener.try_recv().unwrap(),
        Notification::StringReceived("OK".to_string())
    );

    // Lone continuation byte: bytes only
    h.send(TransportEvent::ValueUpdated {
        characteristic: characteristic.clone(),
        value: Some(vec![0x80]),
    });
    assert_eq!(
        h.events(),
        vec![
            SerialEvent::DataReceived(vec![0x80]),
            SerialEvent::BytesReceived(vec![0x80]),
        ]
    );
    assert!(listener.try_recv().is_err());

    // Empty and absent values are dropped
    h.send(TransportEvent::ValueUpdated {
        characteristic: characteristic.clone(),
        value: Some(Vec::new()),
    });
    h.send(TransportEvent::ValueUpdated {
        characteristic,
        value: None,
    });
    assert!(h.events().is_empty());
}

#[test]
fn test_explicit_disconnect_clears_state() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:08");
    h.make_ready(&module, genuine());
    h.mock.take_calls();
    h.events();

    h.serial.disconnect();
    assert_eq!(
        h.mock.calls(),
        vec![TransportCall::CancelConnection(module.id.clone())]
    );

    h.send(TransportEvent::Disconnected {
        peripheral: module.clone(),
        error: None,
    });
    assert!(!h.serial.is_ready());
    assert!(h.serial.connected_peripheral().is_none());
    assert!(h.serial.pending_peripheral().is_none());
    assert!(h.serial.write_mode().is_none());
    assert_eq!(
        h.events(),
        vec![SerialEvent::Disconnected {
            peripheral: module,
            error: None,
        }]
    );

    // Nothing left to cancel
    h.mock.take_calls();
    h.serial.disconnect();
    assert!(h.mock.calls().is_empty());
}

#[test]
fn test_disconnect_cancels_pending_attempt() {
    let h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:09");

    h.serial.connect_to_peripheral(&module);
    h.serial.disconnect();
    assert_eq!(
        h.mock.calls(),
        vec![
            TransportCall::Connect(module.id.clone()),
            TransportCall::CancelConnection(module.id.clone()),
        ]
    );

    h.send(TransportEvent::Disconnected {
        peripheral: module,
        error: None,
    });
    assert!(h.serial.pending_peripheral().is_none());
}

#[test]
fn test_power_off_resets_without_disconnect_event() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:0A");
    h.make_ready(&module, genuine());
    h.serial.connect_to_peripheral(&hm10("AA:BB:CC:DD:EE:0B"));
    let mut listener = h.serial.subscribe();
    h.events();

    h.mock.set_adapter_state(AdapterState::PoweredOff);
    h.send(TransportEvent::StateChanged(AdapterState::PoweredOff));

    assert!(!h.serial.is_ready());
    assert!(!h.serial.is_powered_on());
    assert!(h.serial.connected_peripheral().is_none());
    assert!(h.serial.pending_peripheral().is_none());
    assert!(h.serial.write_mode().is_none());
    assert_eq!(
        h.events(),
        vec![SerialEvent::StateChanged(AdapterState::PoweredOff)]
    );
    assert_eq!(listener.try_recv().unwrap(), Notification::LinkStateChanged);

    // Powering back on does not resurrect the old link
    h.mock.set_adapter_state(AdapterState::PoweredOn);
    h.send(TransportEvent::StateChanged(AdapterState::PoweredOn));
    assert!(!h.serial.is_ready());
}

#[test]
fn test_services_invalidated_forces_disconnect() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:0C");
    h.make_ready(&module, genuine());
    h.mock.take_calls();

    h.send(TransportEvent::ServicesInvalidated(module.id.clone()));

    // Write reference is gone right away; the link follows
    assert!(!h.serial.is_ready());
    assert_eq!(
        h.mock.calls(),
        vec![TransportCall::CancelConnection(module.id.clone())]
    );
    h.serial.send_string("stale");
    assert!(h.mock.writes().is_empty());

    h.send(TransportEvent::Disconnected {
        peripheral: module.clone(),
        error: None,
    });
    assert!(h.serial.connected_peripheral().is_none());
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, SerialEvent::Disconnected { .. })));
}

#[test]
fn test_back_to_back_connection_attempts() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let first = hm10("AA:BB:CC:DD:EE:01");
    let second = hm10("AA:BB:CC:DD:EE:02");

    assert!(h.serial.is_idle());
    h.serial.connect_to_peripheral(&first);
    // An attempt in flight is not idle
    assert!(!h.serial.is_idle());
    h.serial.connect_to_peripheral(&second);
    assert_eq!(h.serial.pending_peripheral(), Some(second.clone()));
    // The replaced attempt is not cancelled
    assert!(!h
        .mock
        .calls()
        .contains(&TransportCall::CancelConnection(first.id.clone())));

    // First attempt fails late: second is untouched
    h.send(TransportEvent::FailedToConnect {
        peripheral: first.clone(),
        error: Some("timeout".to_string()),
    });
    assert_eq!(h.serial.pending_peripheral(), Some(second.clone()));
    assert!(h.events().is_empty());

    // First attempt succeeds late: the stray link is dropped
    h.send(TransportEvent::Connected(first.clone()));
    assert_eq!(h.serial.pending_peripheral(), Some(second.clone()));
    assert!(h.serial.connected_peripheral().is_none());
    assert!(h
        .mock
        .calls()
        .contains(&TransportCall::CancelConnection(first.id.clone())));
    h.send(TransportEvent::Disconnected {
        peripheral: first,
        error: None,
    });
    assert_eq!(h.serial.pending_peripheral(), Some(second.clone()));
    assert!(h.events().is_empty());

    h.send(TransportEvent::Connected(second.clone()));
    assert_eq!(h.serial.connected_peripheral(), Some(second.clone()));
    assert!(!h.serial.is_idle());
    assert_eq!(h.events(), vec![SerialEvent::Connected(second)]);
}

#[test]
fn test_connect_to_already_connected_peripheral() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:17");
    h.make_ready(&module, genuine());
    h.events();

    h.serial.connect_to_peripheral(&module);
    h.send(TransportEvent::Connected(module.clone()));

    assert!(h.serial.pending_peripheral().is_none());
    assert_eq!(h.serial.connected_peripheral(), Some(module.clone()));
    assert!(h.serial.is_ready());
    assert!(h.events().is_empty());

    // Nothing pending, so the candidates unlock once the link is gone
    h.send(TransportEvent::Disconnected {
        peripheral: module,
        error: None,
    });
    assert!(h.serial.set_candidates(CandidateSet::default()));
}

#[test]
fn test_write_confirmation_after_disconnect_is_dropped() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:18");
    h.make_ready(&module, clone_module());
    h.serial.send_string("hi");
    let mut listener = h.serial.subscribe();

    h.send(TransportEvent::Disconnected {
        peripheral: module.clone(),
        error: Some("link lost".to_string()),
    });
    h.events();
    assert_eq!(listener.try_recv().unwrap(), Notification::LinkStateChanged);

    // Queued write completes after the link went away
    h.send(TransportEvent::ValueWritten {
        characteristic: char_ref(&module.id, 1, 2, CHARACTERISTIC_UUID),
        value: Some(b"hi".to_vec()),
        error: None,
    });
    assert!(h.events().is_empty());
    assert!(listener.try_recv().is_err());
}

#[test]
fn test_failed_to_connect() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:0D");

    h.serial.connect_to_peripheral(&module);
    h.send(TransportEvent::FailedToConnect {
        peripheral: module.clone(),
        error: Some("le-connection-abort-by-local".to_string()),
    });

    assert!(h.serial.pending_peripheral().is_none());
    assert_eq!(h.serial.phase(), ConnectionPhase::Idle);
    assert!(h.serial.is_idle());
    assert_eq!(
        h.events(),
        vec![SerialEvent::FailedToConnect {
            peripheral: module,
            error: Some("le-connection-abort-by-local".to_string()),
        }]
    );
}

#[test]
fn test_scan_requires_power() {
    let mut h = Harness::new(AdapterState::PoweredOff);

    h.serial.start_scan();
    assert!(h.mock.calls().is_empty());
    assert!(!h.serial.is_scanning());

    h.mock.set_adapter_state(AdapterState::PoweredOn);
    h.send(TransportEvent::StateChanged(AdapterState::PoweredOn));
    h.serial.start_scan();
    assert!(h.serial.is_scanning());
    assert_eq!(
        h.mock.calls(),
        vec![
            TransportCall::StartScan(None),
            TransportCall::RetrieveConnected(vec![SERVICE_UUID, ALT_SERVICE_UUID]),
        ]
    );

    h.serial.stop_scan();
    h.serial.stop_scan();
    assert!(!h.serial.is_scanning());
    assert_eq!(h.events().len(), 1);
}

#[test]
fn test_discovery_events() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let seen = hm10("AA:BB:CC:DD:EE:10");
    let attached = hm10("AA:BB:CC:DD:EE:11");

    h.serial.start_scan();
    h.send(TransportEvent::Discovered {
        peripheral: seen.clone(),
        rssi: Some(-58),
    });
    h.send(TransportEvent::RetrievedConnected(vec![attached.clone()]));

    assert_eq!(
        h.events(),
        vec![
            SerialEvent::PeripheralDiscovered {
                peripheral: seen,
                rssi: Some(-58),
            },
            SerialEvent::PeripheralDiscovered {
                peripheral: attached,
                rssi: None,
            },
        ]
    );
}

#[test]
fn test_rssi_read() {
    let mut h = Harness::new(AdapterState::PoweredOn);
    let module = hm10("AA:BB:CC:DD:EE:12");
    h.make_ready(&module, genuine());
    h.events();

    h.serial.read_signal_strength();
    assert!(h
        .mock
        .calls()
        .contains(&TransportCall::ReadSignalStrength(module.id.clone())));

    h.send(TransportEvent::RssiRead {
        peripheral: module.id.clone(),
        rssi: -71,
        error: None,
    });
    assert_eq!(h.events(), vec![SerialEvent::RssiRead(-71)]);
}

#[test]
fn test_readiness_invariant_over_event_sequence() {
    const ID: &str = "AA:BB:CC:DD:EE:13";
    let mut h = Harness::new(AdapterState::PoweredOn);

    let set_power = |h: &mut Harness, state: AdapterState| {
        h.mock.set_adapter_state(state);
        h.send(TransportEvent::StateChanged(state));
    };
    let steps: Vec<Box<dyn Fn(&mut Harness)>> = vec![
        Box::new(|h: &mut Harness| h.serial.connect_to_peripheral(&hm10(ID))),
        Box::new(|h: &mut Harness| h.send(TransportEvent::Connected(hm10(ID)))),
        Box::new(|h: &mut Harness| {
            let id = PeripheralId::new(ID);
            h.send(characteristics(
                &id,
                ServiceRef { id: 1, uuid: SERVICE_UUID },
                vec![info(&id, 1, 2, CHARACTERISTIC_UUID, genuine())],
            ))
        }),
        Box::new(move |h: &mut Harness| set_power(h, AdapterState::Resetting)),
        Box::new(move |h: &mut Harness| set_power(h, AdapterState::PoweredOn)),
        Box::new(|h: &mut Harness| h.make_ready(&hm10(ID), clone_module())),
        // Radio reports a new state before the event arrives
        Box::new(|h: &mut Harness| h.mock.set_adapter_state(AdapterState::Unauthorized)),
        Box::new(|h: &mut Harness| h.mock.set_adapter_state(AdapterState::PoweredOn)),
        Box::new(|h: &mut Harness| {
            h.send(TransportEvent::Disconnected {
                peripheral: hm10(ID),
                error: Some("supervision timeout".to_string()),
            })
        }),
    ];

    let mut was_ready = false;
    for step in &steps {
        step(&mut h);
        h.assert_readiness_invariant();
        was_ready |= h.serial.is_ready();
    }
    assert!(was_ready);
    assert!(!h.serial.is_ready());
}

#[test]
fn test_candidates_locked_while_connected() {
    let h = Harness::new(AdapterState::PoweredOn);
    let custom = CandidateSet {
        service_uuid: uuid_from_u16(0xFEE0),
        ..CandidateSet::default()
    };

    h.serial.connect_to_peripheral(&hm10("AA:BB:CC:DD:EE:14"));
    assert!(!h.serial.set_candidates(custom));
    assert_eq!(h.serial.candidates(), CandidateSet::default());

    h.send(TransportEvent::FailedToConnect {
        peripheral: hm10("AA:BB:CC:DD:EE:14"),
        error: None,
    });
    assert!(h.serial.set_candidates(custom));
    assert_eq!(h.serial.candidates().service_uuid, uuid_from_u16(0xFEE0));
}

/// Delegate that reconnects from inside a callback.
struct Reconnector {
    serial: Option<BluetoothSerial<MockTransport>>,
    disconnects: usize,
}

impl SerialDelegate for Reconnector {
    fn state_changed(&mut self, _state: AdapterState) {}

    fn disconnected(&mut self, peripheral: &PeripheralHandle, _error: Option<&str>) {
        self.disconnects += 1;
        if let Some(serial) = &self.serial {
            serial.connect_to_peripheral(peripheral);
        }
    }
}

#[test]
fn test_delegate_may_call_back_into_handler() {
    let (transport, mock) = MockTransport::new(AdapterState::PoweredOn);
    let serial = BluetoothSerial::new(
        transport,
        CandidateSet::default(),
        Reconnector {
            serial: None,
            disconnects: 0,
        },
    );
    serial.set_delegate(Reconnector {
        serial: Some(serial.clone()),
        disconnects: 0,
    });

    let module = hm10("AA:BB:CC:DD:EE:15");
    serial.connect_to_peripheral(&module);
    serial.handle_event(TransportEvent::Connected(module.clone()));
    serial.handle_event(TransportEvent::Disconnected {
        peripheral: module.clone(),
        error: Some("link lost".to_string()),
    });

    assert_eq!(serial.pending_peripheral(), Some(module.clone()));
    let connects = mock
        .calls()
        .into_iter()
        .filter(|c| *c == TransportCall::Connect(module.id.clone()))
        .count();
    assert_eq!(connects, 2);
}

#[tokio::test]
async fn test_run_processes_queue_in_order() {
    let (transport, mock) = MockTransport::new(AdapterState::PoweredOn);
    let (delegate, mut events) = ChannelDelegate::channel();
    let serial = BluetoothSerial::new(transport, CandidateSet::default(), delegate);
    let module = hm10("AA:BB:CC:DD:EE:16");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    serial.connect_to_peripheral(&module);
    tx.send(TransportEvent::Connected(module.clone())).unwrap();
    tx.send(services(&module.id, &[(1, SERVICE_UUID)])).unwrap();
    tx.send(characteristics(
        &module.id,
        ServiceRef { id: 1, uuid: SERVICE_UUID },
        vec![info(&module.id, 1, 2, CHARACTERISTIC_UUID, genuine())],
    ))
    .unwrap();
    tx.send(TransportEvent::ValueUpdated {
        characteristic: char_ref(&module.id, 1, 2, CHARACTERISTIC_UUID),
        value: Some(b"hi".to_vec()),
    })
    .unwrap();
    drop(tx);

    serial.run(rx).await;

    assert!(serial.is_ready());
    assert_eq!(events.recv().await, Some(SerialEvent::Connected(module.clone())));
    assert_eq!(events.recv().await, Some(SerialEvent::Ready(module)));
    assert_eq!(events.recv().await, Some(SerialEvent::DataReceived(b"hi".to_vec())));
    assert!(mock
        .calls()
        .iter()
        .any(|c| matches!(c, TransportCall::SetNotify { enabled: true, .. })));
}
