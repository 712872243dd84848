//! TLV device configuration
//!
//! A configuration document is a stream of fixed-size packets:
//!
//! ```text
//! [instance:1][packet_type:1][payload:N]   N depends only on packet_type
//! ```
//!
//! Stored documents may carry a 16-byte little-endian header
//! (`magic = 0xDEADBEEF`, `version`, `crc32`, `data_length`). Over BLE the
//! firmware sends the raw packet stream without it.

mod sections;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::color::{ColorScheme, describe_color_scheme};
use crate::protocol::DeviceCapabilities;

pub use sections::{
    BinaryInputs, DataBus, DisplayConfig, LedConfig, ManufacturerData, PacketType, PowerOption,
    SensorData, SystemConfig,
};

pub const CONFIG_MAGIC: u32 = 0xDEAD_BEEF;
pub const HEADER_SIZE: usize = 16;
/// `[instance][packet_type]`
pub const PACKET_HEADER_SIZE: usize = 2;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config data too short: {0} bytes")]
    TooShort(usize),
    #[error("config header declares {declared} payload bytes, only {available} present")]
    LengthMismatch { declared: usize, available: usize },
    #[error("config CRC mismatch: header {expected:#010x}, computed {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("unknown packet type {packet_type:#04x} at offset {offset}")]
    UnknownPacket { packet_type: u8, offset: usize },
    #[error("{name} packet at offset {offset} needs {expected} bytes, {available} left")]
    Truncated {
        name: &'static str,
        offset: usize,
        expected: usize,
        available: usize,
    },
    #[error("no display configuration found")]
    NoDisplay,
    #[error("invalid display dimensions {width}x{height}")]
    InvalidDimensions { width: u16, height: u16 },
    #[error("config encoding is not implemented")]
    EncodeNotImplemented,
}

/// The optional 16-byte document header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigHeader {
    pub version: u32,
    pub crc: u32,
    pub data_length: u32,
}

/// A parsed configuration document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub header: Option<ConfigHeader>,
    pub system: Option<SystemConfig>,
    pub manufacturer: Option<ManufacturerData>,
    pub power: Option<PowerOption>,
    pub displays: Vec<DisplayConfig>,
    pub leds: Vec<LedConfig>,
    pub sensors: Vec<SensorData>,
    pub data_buses: Vec<DataBus>,
    pub binary_inputs: Vec<BinaryInputs>,
}

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Parse a configuration document, with or without the 16-byte header
pub fn parse(data: &[u8]) -> Result<GlobalConfig, ConfigError> {
    if data.len() < PACKET_HEADER_SIZE {
        return Err(ConfigError::TooShort(data.len()));
    }

    if data.len() >= HEADER_SIZE && le32(data, 0) == CONFIG_MAGIC {
        let header = ConfigHeader {
            version: le32(data, 4),
            crc: le32(data, 8),
            data_length: le32(data, 12),
        };
        let declared = header.data_length as usize;
        let available = data.len() - HEADER_SIZE;
        if declared > available {
            return Err(ConfigError::LengthMismatch {
                declared,
                available,
            });
        }
        let payload = &data[HEADER_SIZE..HEADER_SIZE + declared];
        let actual = crc32fast::hash(payload);
        if actual != header.crc {
            return Err(ConfigError::CrcMismatch {
                expected: header.crc,
                actual,
            });
        }
        let mut config = parse_packets(payload)?;
        config.header = Some(header);
        return Ok(config);
    }

    parse_packets(data)
}

/// Parse the blob a tag returns for `READ_CONFIG`
///
/// Layout is `[length:2][version:1][packets...][crc:2]`; the inner header and
/// the trailing CRC are stripped before the packets are parsed.
pub fn parse_device_blob(data: &[u8]) -> Result<GlobalConfig, ConfigError> {
    const INNER_HEADER: usize = 3;
    const CRC_TRAILER: usize = 2;

    if data.len() < INNER_HEADER + CRC_TRAILER + PACKET_HEADER_SIZE {
        return Err(ConfigError::TooShort(data.len()));
    }
    let length = u16::from_le_bytes([data[0], data[1]]);
    tracing::debug!(length, version = data[2], "config blob header");
    parse_packets(&data[INNER_HEADER..data.len() - CRC_TRAILER])
}

/// Walk a raw packet stream
fn parse_packets(data: &[u8]) -> Result<GlobalConfig, ConfigError> {
    let mut config = GlobalConfig::default();
    let mut offset = 0;

    while data.len() - offset >= PACKET_HEADER_SIZE {
        let type_byte = data[offset + 1];
        let packet_type =
            PacketType::from_byte(type_byte).ok_or(ConfigError::UnknownPacket {
                packet_type: type_byte,
                offset,
            })?;

        let start = offset + PACKET_HEADER_SIZE;
        let size = packet_type.payload_size();
        let rest = &data[start..];
        let truncated = || ConfigError::Truncated {
            name: packet_type.name(),
            offset,
            expected: size,
            available: rest.len(),
        };

        match packet_type {
            PacketType::System => {
                config.system = Some(SystemConfig::from_bytes(
                    rest.first_chunk().ok_or_else(truncated)?,
                ))
            }
            PacketType::Manufacturer => {
                config.manufacturer = Some(ManufacturerData::from_bytes(
                    rest.first_chunk().ok_or_else(truncated)?,
                ))
            }
            PacketType::Power => {
                config.power = Some(PowerOption::from_bytes(
                    rest.first_chunk().ok_or_else(truncated)?,
                ))
            }
            PacketType::Display => config.displays.push(DisplayConfig::from_bytes(
                rest.first_chunk().ok_or_else(truncated)?,
            )),
            PacketType::Led => config.leds.push(LedConfig::from_bytes(
                rest.first_chunk().ok_or_else(truncated)?,
            )),
            PacketType::Sensor => config.sensors.push(SensorData::from_bytes(
                rest.first_chunk().ok_or_else(truncated)?,
            )),
            PacketType::DataBus => config.data_buses.push(DataBus::from_bytes(
                rest.first_chunk().ok_or_else(truncated)?,
            )),
            PacketType::BinaryInput => config.binary_inputs.push(BinaryInputs::from_bytes(
                rest.first_chunk().ok_or_else(truncated)?,
            )),
        }

        offset = start + size;
    }

    if offset < data.len() {
        tracing::debug!(trailing = data.len() - offset, "ignoring trailing config bytes");
    }
    Ok(config)
}

/// Serialize a configuration document
///
/// Every section knows its own `to_bytes`, but writing a configuration back to
/// a tag is not supported by any firmware yet.
pub fn encode(_config: &GlobalConfig) -> Result<Vec<u8>, ConfigError> {
    Err(ConfigError::EncodeNotImplemented)
}

/// Width, height, colour scheme and rotation of the first display
pub fn extract_display_capabilities(
    config: &GlobalConfig,
) -> Result<DeviceCapabilities, ConfigError> {
    let display = config.displays.first().ok_or(ConfigError::NoDisplay)?;
    if display.quarter_turns().is_none() {
        let rotation = display.rotation;
        tracing::warn!(rotation, "unknown display rotation, assuming none");
    }
    let rotated = display.is_quarter_rotated();
    let (width, height) = if rotated {
        (display.pixel_height, display.pixel_width)
    } else {
        (display.pixel_width, display.pixel_height)
    };
    Ok(DeviceCapabilities {
        width,
        height,
        color_scheme: display.color_scheme,
        rotatebuffer: u8::from(rotated),
    })
}

/// Model name such as `2.9" BWR`, or `296x128 BWR` without physical size
pub fn generate_model_name(display: &DisplayConfig) -> Result<String, ConfigError> {
    if display.pixel_width == 0 || display.pixel_height == 0 {
        return Err(ConfigError::InvalidDimensions {
            width: display.pixel_width,
            height: display.pixel_height,
        });
    }

    let color = match ColorScheme::try_from_code(display.color_scheme) {
        Some(ColorScheme::Mono) => "BW".to_string(),
        Some(scheme) => scheme.name().to_string(),
        None => format!("color={}", display.color_scheme),
    };

    Ok(match display.diagonal_inches() {
        Some(diag) => format!("{diag:.1}\" {color}"),
        None => format!("{}x{} {color}", display.pixel_width, display.pixel_height),
    })
}

impl fmt::Display for GlobalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(system) = &self.system {
            writeln!(
                f,
                "system: ic={} modes={:#04x} flags={:#04x}",
                system.ic_name(),
                system.communication_modes,
                system.device_flags
            )?;
        }
        if let Some(m) = &self.manufacturer {
            writeln!(
                f,
                "manufacturer: id={:#06x} board={} rev={}",
                m.manufacturer_id, m.board_type, m.board_revision
            )?;
        }
        if let Some(p) = &self.power {
            writeln!(
                f,
                "power: mode={} battery={}mAh sleep_timeout={}ms tx_power={}dBm",
                p.power_mode, p.battery_capacity_mah, p.sleep_timeout_ms, p.tx_power
            )?;
        }
        for d in &self.displays {
            write!(
                f,
                "display[{}]: {}x{} {} rotation={} modes={:#04x}",
                d.instance_number,
                d.pixel_width,
                d.pixel_height,
                describe_color_scheme(d.color_scheme),
                d.rotation,
                d.transmission_modes
            )?;
            if let Some(diag) = d.diagonal_inches() {
                write!(f, " ({diag:.1}\")")?;
            }
            writeln!(f)?;
        }
        for led in &self.leds {
            writeln!(
                f,
                "led[{}]: type={} flags={:#04x}",
                led.instance_number, led.led_type, led.led_flags
            )?;
        }
        for s in &self.sensors {
            writeln!(
                f,
                "sensor[{}]: type={:#06x} bus={}",
                s.instance_number, s.sensor_type, s.bus_id
            )?;
        }
        for bus in &self.data_buses {
            writeln!(
                f,
                "bus[{}]: {} {}Hz",
                bus.instance_number,
                bus.bus_name(),
                bus.bus_speed_hz
            )?;
        }
        for input in &self.binary_inputs {
            writeln!(
                f,
                "input[{}]: type={} flags={:#04x}",
                input.instance_number, input.input_type, input.input_flags
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn display(instance: u8, width: u16, height: u16, rotation: u8, scheme: u8) -> DisplayConfig {
        let mut raw = [0u8; DisplayConfig::SIZE];
        raw[0] = instance;
        raw[4..6].copy_from_slice(&width.to_le_bytes());
        raw[6..8].copy_from_slice(&height.to_le_bytes());
        raw[14] = rotation;
        raw[21] = scheme;
        DisplayConfig::from_bytes(&raw)
    }

    fn packet(instance: u8, packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![instance, packet_type as u8];
        out.extend_from_slice(payload);
        out
    }

    fn with_header(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&CONFIG_MAGIC.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn sample() -> Vec<u8> {
        let mut led = [0u8; LedConfig::SIZE];
        led[1] = 2;
        let mut data = packet(0, PacketType::Led, &led);
        data.extend(packet(0, PacketType::Display, &display(0, 296, 128, 0, 1).to_bytes()));
        data.extend(packet(1, PacketType::Display, &display(1, 200, 200, 90, 3).to_bytes()));
        data
    }

    #[test]
    fn raw_stream_keeps_arrival_order() {
        let config = parse(&sample()).unwrap();
        assert_eq!(config.header, None);
        assert_eq!(config.displays.len(), 2);
        assert_eq!(config.displays[0].pixel_width, 296);
        assert_eq!(config.displays[1].rotation, 90);
        assert_eq!(config.leds[0].led_type, 2);
        assert!(config.system.is_none());
    }

    #[test]
    fn single_instance_sections_overwrite() {
        let mut first = [0u8; SystemConfig::SIZE];
        first[0] = 1;
        let mut second = first;
        second[0] = 3;
        let mut data = packet(0, PacketType::System, &first);
        data.extend(packet(0, PacketType::System, &second));
        assert_eq!(parse(&data).unwrap().system.unwrap().ic_type, 3);
    }

    #[test]
    fn unknown_packet_type_fails() {
        let mut data = sample();
        data.extend([0, 0x7F, 0, 0]);
        assert!(matches!(
            parse(&data),
            Err(ConfigError::UnknownPacket {
                packet_type: 0x7F,
                ..
            })
        ));
    }

    #[test]
    fn single_trailing_byte_is_ignored() {
        let mut data = sample();
        data.push(0);
        assert_eq!(parse(&data).unwrap().displays.len(), 2);
    }

    #[test]
    fn header_crc_is_checked() {
        let body = sample();
        let config = parse(&with_header(&body)).unwrap();
        assert_eq!(config.header.unwrap().version, 1);
        assert_eq!(config.displays.len(), 2);

        let mut short = with_header(&body);
        short.truncate(short.len() - 1);
        assert!(matches!(
            parse(&short),
            Err(ConfigError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn device_blob_strips_inner_header_and_crc() {
        let body = sample();
        let mut blob = (body.len() as u16 + 3).to_le_bytes().to_vec();
        blob.push(1);
        blob.extend_from_slice(&body);
        blob.extend_from_slice(&[0xAB, 0xCD]);
        let config = parse_device_blob(&blob).unwrap();
        assert_eq!(config.displays.len(), 2);
        assert_eq!(config.leds.len(), 1);
    }

    #[test]
    fn capabilities_follow_rotation() {
        let mut config = GlobalConfig::default();
        assert_eq!(
            extract_display_capabilities(&config),
            Err(ConfigError::NoDisplay)
        );

        config.displays.push(display(0, 296, 128, 90, 1));
        let caps = extract_display_capabilities(&config).unwrap();
        assert_eq!((caps.width, caps.height), (128, 296));
        assert_eq!(caps.rotatebuffer, 1);

        for (rotation, swapped) in [(0, false), (1, true), (2, false), (3, true), (180, false), (45, false)] {
            config.displays[0].rotation = rotation;
            let caps = extract_display_capabilities(&config).unwrap();
            let expected = if swapped { (128, 296) } else { (296, 128) };
            assert_eq!((caps.width, caps.height), expected, "rotation {rotation}");
            assert_eq!(caps.rotatebuffer, u8::from(swapped), "rotation {rotation}");
        }
    }

    #[test]
    fn model_names() {
        let mut d = display(0, 296, 128, 0, 1);
        assert_eq!(generate_model_name(&d).unwrap(), "296x128 BWR");
        d.active_width_mm = 67;
        d.active_height_mm = 29;
        assert_eq!(generate_model_name(&d).unwrap(), "2.9\" BWR");
        d.color_scheme = 0;
        assert_eq!(generate_model_name(&d).unwrap(), "2.9\" BW");
        d.color_scheme = 9;
        assert_eq!(generate_model_name(&d).unwrap(), "2.9\" color=9");
        d.pixel_height = 0;
        assert!(generate_model_name(&d).is_err());
    }

    #[test]
    fn encode_refuses() {
        assert_eq!(
            encode(&GlobalConfig::default()),
            Err(ConfigError::EncodeNotImplemented)
        );
    }

    #[test]
    fn summary_mentions_every_display() {
        let summary = parse(&sample()).unwrap().to_string();
        assert!(summary.contains("display[0]: 296x128 BWR"));
        assert!(summary.contains("display[1]: 200x200 BWRY"));
        assert!(summary.contains("led[0]: type=2"));
    }

    #[test]
    fn json_uses_hex_for_reserved_bytes() {
        let config = parse(&sample()).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(&format!("\"reserved\":\"{}\"", "00".repeat(15))));
        let back: GlobalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    /// One arbitrary packet per known type
    fn any_packet() -> impl Strategy<Value = (PacketType, Vec<u8>)> {
        prop_oneof![
            Just(PacketType::System),
            Just(PacketType::Manufacturer),
            Just(PacketType::Power),
            Just(PacketType::Display),
            Just(PacketType::Led),
            Just(PacketType::Sensor),
            Just(PacketType::DataBus),
            Just(PacketType::BinaryInput),
        ]
        .prop_flat_map(|t| {
            proptest::collection::vec(any::<u8>(), t.payload_size()).prop_map(move |p| (t, p))
        })
    }

    /// Re-serialize whatever the parser recovered, in section order
    fn reencode(config: &GlobalConfig) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        out.extend(config.system.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.manufacturer.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.power.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.displays.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.leds.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.sensors.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.data_buses.iter().map(|s| s.to_bytes().to_vec()));
        out.extend(config.binary_inputs.iter().map(|s| s.to_bytes().to_vec()));
        out
    }

    proptest! {
        #[test]
        fn parse_recovers_every_section(packets in proptest::collection::vec(any_packet(), 1..12)) {
            let mut data = Vec::new();
            for (t, payload) in &packets {
                data.extend(packet(0, *t, payload));
            }
            let config = parse(&data).unwrap();

            // last instance wins for single-instance types, multi-instance keep order
            let order = [
                PacketType::System,
                PacketType::Manufacturer,
                PacketType::Power,
                PacketType::Display,
                PacketType::Led,
                PacketType::Sensor,
                PacketType::DataBus,
                PacketType::BinaryInput,
            ];
            let mut expected = Vec::new();
            for t in order {
                let of_type = packets.iter().filter(|(pt, _)| *pt == t).map(|(_, p)| p.clone());
                match t {
                    PacketType::System | PacketType::Manufacturer | PacketType::Power => {
                        expected.extend(of_type.last())
                    }
                    _ => expected.extend(of_type),
                }
            }
            prop_assert_eq!(reencode(&config), expected);
        }

        #[test]
        fn truncation_inside_a_section_fails(
            (t, payload) in any_packet(),
            cut in 1usize..46,
        ) {
            let data = packet(0, t, &payload);
            let cut = cut.min(payload.len());
            let short = &data[..data.len() - cut];
            prop_assume!(short.len() >= PACKET_HEADER_SIZE);
            let truncated = matches!(parse(short), Err(ConfigError::Truncated { .. }));
            prop_assert!(truncated);
        }

        #[test]
        fn flipped_payload_byte_breaks_crc(
            (t, payload) in any_packet(),
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let body = packet(0, t, &payload);
            let mut doc = with_header(&body);
            let at = HEADER_SIZE + index.index(body.len());
            doc[at] ^= mask;
            let crc_failed = matches!(parse(&doc), Err(ConfigError::CrcMismatch { .. }));
            prop_assert!(crc_failed);
        }
    }
}
