mod mock;

use std::time::Duration;

use mock::{MockTransport, ms};
use oepl_ble::{Error, OperationConfig, TagClient, TransportError};
use oepl_proto::tlv::{DisplayConfig, LedConfig, SystemConfig};
use oepl_proto::{DeviceCapabilities, Protocol};
use tokio::time::Instant;

const ADDR: &str = "AA:BB:CC:DD:EE:02";

fn atc_display_info() -> Vec<u8> {
    let mut r = vec![0u8; 33];
    r[1] = 0x05;
    let payload = &mut r[2..];
    payload[19] = 1;
    payload[22..24].copy_from_slice(&128u16.to_le_bytes());
    payload[24..26].copy_from_slice(&296u16.to_le_bytes());
    payload[30] = 2;
    r
}

fn config_blob(rotation: u8) -> Vec<u8> {
    let mut display = DisplayConfig::from_bytes(&[0; DisplayConfig::SIZE]);
    display.pixel_width = 296;
    display.pixel_height = 128;
    display.rotation = rotation;
    display.color_scheme = 1;
    display.transmission_modes = 0x0A;

    let mut packets = vec![0x00, 0x20];
    packets.extend_from_slice(&display.to_bytes());
    packets.extend_from_slice(&[0x00, 0x01]);
    packets.extend_from_slice(&[0; SystemConfig::SIZE]);
    packets.extend_from_slice(&[0x00, 0x21]);
    packets.extend_from_slice(&[0; LedConfig::SIZE]);

    let mut blob = (packets.len() as u16).to_le_bytes().to_vec();
    blob.push(1);
    blob.extend_from_slice(&packets);
    blob.extend_from_slice(&[0xAB, 0xCD]);
    blob
}

/// Split `blob` into the chunked `READ_CONFIG` notifications
fn config_chunks(blob: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    for (number, size) in sizes.iter().enumerate() {
        let mut chunk = vec![0x00, 0x40];
        chunk.extend_from_slice(&(number as u16).to_le_bytes());
        if number == 0 {
            chunk.extend_from_slice(&(blob.len() as u16).to_le_bytes());
        }
        chunk.extend_from_slice(&blob[offset..offset + size]);
        offset += size;
        chunks.push(chunk);
    }
    chunks
}

fn oepl_config_tag(rotation: u8, sizes: &'static [usize]) -> MockTransport {
    let blob = config_blob(rotation);
    MockTransport::new(move |frame| match frame {
        [0x00, 0x40] => config_chunks(&blob, sizes)
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| (ms(10 * (i as u64 + 1)), chunk))
            .collect(),
        _ => Vec::new(),
    })
}

#[tokio::test(start_paused = true)]
async fn atc_interrogation_waits_out_init() {
    let transport = MockTransport::new(|frame| match frame {
        [0x00, 0x05] => vec![(ms(20), atc_display_info())],
        _ => Vec::new(),
    });
    let client = TagClient::new(transport.clone());
    let started = Instant::now();

    let caps = client.interrogate(ADDR, Protocol::Atc).await.unwrap();

    assert_eq!(
        caps,
        DeviceCapabilities {
            width: 296,
            height: 128,
            color_scheme: 1,
            rotatebuffer: 1,
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(2));
    let log = transport.log();
    assert_eq!(log.writes, vec![vec![0x01, 0x01], vec![0x00, 0x05]]);
    assert_eq!(log.disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn short_atc_response_is_a_protocol_error() {
    let transport = MockTransport::new(|frame| match frame {
        [0x00, 0x05] => vec![(ms(20), vec![0x00, 0x05, 0x01])],
        _ => Vec::new(),
    });
    let client = TagClient::new(transport.clone());

    let err = client.interrogate(ADDR, Protocol::Atc).await.unwrap_err();

    assert!(matches!(err, Error::Protocol { .. }), "{err}");
    assert_eq!(transport.log().connects, 3);
}

#[tokio::test(start_paused = true)]
async fn oepl_interrogation_reassembles_three_chunks() {
    let transport = oepl_config_tag(0, &[40, 40, 21]);
    let client = TagClient::new(transport.clone());

    let caps = client.interrogate(ADDR, Protocol::Oepl).await.unwrap();

    assert_eq!(
        caps,
        DeviceCapabilities {
            width: 296,
            height: 128,
            color_scheme: 1,
            rotatebuffer: 0,
        }
    );
    let log = transport.log();
    assert_eq!(log.writes, vec![vec![0x00, 0x40]]);
    assert_eq!(log.delivered.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rotated_display_swaps_dimensions() {
    let transport = oepl_config_tag(90, &[101]);
    let client = TagClient::new(transport);

    let caps = client.interrogate(ADDR, Protocol::Oepl).await.unwrap();

    assert_eq!((caps.width, caps.height, caps.rotatebuffer), (128, 296, 1));
}

#[tokio::test(start_paused = true)]
async fn read_config_returns_every_section() {
    let transport = oepl_config_tag(0, &[60, 41]);
    let client = TagClient::new(transport);

    let config = client.read_config(ADDR, Protocol::Oepl).await.unwrap();

    assert_eq!(config.displays.len(), 1);
    assert_eq!(config.displays[0].transmission_modes, 0x0A);
    assert_eq!(config.leds.len(), 1);
    assert!(config.system.is_some());
    assert!(config.power.is_none());
}

#[tokio::test(start_paused = true)]
async fn missing_config_chunk_is_a_protocol_error() {
    let transport = oepl_config_tag(0, &[40, 40]);
    let client = TagClient::new(transport.clone());

    let err = client.read_config(ADDR, Protocol::Oepl).await.unwrap_err();

    assert!(matches!(err, Error::Protocol { .. }), "{err}");
    assert_eq!(transport.log().connects, 3);
}

#[tokio::test(start_paused = true)]
async fn firmware_version_is_retried_after_a_timeout() {
    let mut calls = 0;
    let transport = MockTransport::new(move |frame| match frame {
        [0x00, 0x43] => {
            calls += 1;
            if calls == 1 {
                Vec::new()
            } else {
                let mut reply = vec![0x00, 0x43, 1, 2, 7];
                reply.extend_from_slice(b"abcdef0");
                vec![(ms(10), reply)]
            }
        }
        _ => Vec::new(),
    });
    let config = OperationConfig {
        response_timeout: Duration::from_secs(1),
        ..OperationConfig::default()
    };
    let client = TagClient::with_config(transport.clone(), config);
    let started = Instant::now();

    let version = client.read_firmware_version(ADDR, Protocol::Oepl).await.unwrap();

    assert_eq!((version.major, version.minor), (1, 2));
    assert_eq!(version.sha, "abcdef0");
    assert_eq!(version.raw(), 0x0102);
    assert!(started.elapsed() >= ms(1250));
    let log = transport.log();
    assert_eq!(log.connects, 2);
    assert_eq!(log.disconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn oepl_only_operations_refuse_atc() {
    let transport = MockTransport::silent();
    let client = TagClient::new(transport.clone());

    let err = client
        .read_firmware_version(ADDR, Protocol::Atc)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotSupported { .. }), "{err}");
    let log = transport.log();
    assert_eq!(log.connects, 1);
    assert_eq!(log.disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn slot_exhaustion_is_not_retried() {
    let transport = MockTransport::silent();
    transport.fail_connect(TransportError::NoSlots);
    let client = TagClient::new(transport.clone());

    let err = client.ping(ADDR, Protocol::Oepl).await.unwrap_err();

    assert!(matches!(err, Error::NoSlots { .. }), "{err}");
    assert_eq!(transport.log().connects, 1);
    assert!(!client.locks().is_locked(ADDR));
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_is_retried_three_times() {
    let transport = MockTransport::silent();
    for _ in 0..3 {
        transport.fail_connect(TransportError::NotFound);
    }
    let client = TagClient::new(transport.clone());
    let started = Instant::now();

    let err = client.ping(ADDR, Protocol::Oepl).await.unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }), "{err}");
    assert_eq!(transport.log().connects, 3);
    assert_eq!(started.elapsed(), ms(250 + 500));
}

#[tokio::test(start_paused = true)]
async fn missing_characteristic_disconnects() {
    let transport = MockTransport::silent().without_characteristic();
    let client = TagClient::new(transport.clone());

    let err = client.ping(ADDR, Protocol::Oepl).await.unwrap_err();

    assert!(matches!(err, Error::CharacteristicNotFound { .. }), "{err}");
    let log = transport.log();
    assert_eq!(log.connects, 3);
    assert_eq!(log.disconnects, 3);
}

#[tokio::test(start_paused = true)]
async fn led_and_clock_commands() {
    let transport = MockTransport::silent();
    let client = TagClient::new(transport.clone());

    client.turn_led_on(ADDR, Protocol::Oepl).await.unwrap();
    client.turn_led_off(ADDR, Protocol::Oepl).await.unwrap();
    client
        .set_clock_mode(ADDR, Protocol::Oepl, 0x6500_0001)
        .await
        .unwrap();
    client.disable_clock_mode(ADDR, Protocol::Oepl).await.unwrap();

    let log = transport.log();
    assert_eq!(
        log.writes,
        vec![
            vec![0x00, 0x01, 0x03],
            vec![0x00, 0x01, 0x00],
            vec![0x00, 0x00],
            vec![0x00, 0x0B, 0x01, 0x00, 0x00, 0x65],
            vec![0x00, 0x0C],
        ]
    );
    assert_eq!(log.connects, 4);
    assert_eq!(log.disconnects, 4);
}

#[tokio::test(start_paused = true)]
async fn same_device_operations_are_serialized() {
    let transport = MockTransport::silent();
    let client = TagClient::new(transport.clone());
    let started = Instant::now();

    let (a, b) = tokio::join!(client.ping(ADDR, Protocol::Atc), client.ping(ADDR, Protocol::Atc));
    a.unwrap();
    b.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(4));
    let log = transport.log();
    let sessions: Vec<&str> = log
        .events
        .iter()
        .filter_map(|e| e.split(' ').next())
        .filter(|kind| matches!(*kind, "connect" | "disconnect"))
        .collect();
    assert_eq!(sessions, ["connect", "disconnect", "connect", "disconnect"]);
}

#[tokio::test(start_paused = true)]
async fn different_devices_run_in_parallel() {
    let transport = MockTransport::silent();
    let client = TagClient::new(transport.clone());
    let started = Instant::now();

    let (a, b) = tokio::join!(
        client.ping("AA:AA:AA:AA:AA:AA", Protocol::Atc),
        client.ping("BB:BB:BB:BB:BB:BB", Protocol::Atc)
    );
    a.unwrap();
    b.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(transport.log().connects, 2);
}
