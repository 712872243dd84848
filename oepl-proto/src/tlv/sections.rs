//! Fixed-size TLV sections
//!
//! Every section has a payload size that depends only on its packet type.
//! Bytes the firmware marks as reserved are kept verbatim so that a section
//! can be written back exactly as it was read.

use serde::{Deserialize, Serialize};

/// Packet type byte of each known section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    System = 0x01,
    Manufacturer = 0x02,
    Power = 0x04,
    Display = 0x20,
    Led = 0x21,
    Sensor = 0x23,
    DataBus = 0x24,
    BinaryInput = 0x25,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => PacketType::System,
            0x02 => PacketType::Manufacturer,
            0x04 => PacketType::Power,
            0x20 => PacketType::Display,
            0x21 => PacketType::Led,
            0x23 => PacketType::Sensor,
            0x24 => PacketType::DataBus,
            0x25 => PacketType::BinaryInput,
            _ => return None,
        })
    }

    /// Payload size, excluding the 2-byte `[instance][type]` packet header
    pub fn payload_size(self) -> usize {
        match self {
            PacketType::System => SystemConfig::SIZE,
            PacketType::Manufacturer => ManufacturerData::SIZE,
            PacketType::Power => PowerOption::SIZE,
            PacketType::Display => DisplayConfig::SIZE,
            PacketType::Led => LedConfig::SIZE,
            PacketType::Sensor => SensorData::SIZE,
            PacketType::DataBus => DataBus::SIZE,
            PacketType::BinaryInput => BinaryInputs::SIZE,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::System => "SystemConfig",
            PacketType::Manufacturer => "ManufacturerData",
            PacketType::Power => "PowerOption",
            PacketType::Display => "DisplayConfig",
            PacketType::Led => "LedConfig",
            PacketType::Sensor => "SensorData",
            PacketType::DataBus => "DataBus",
            PacketType::BinaryInput => "BinaryInputs",
        }
    }
}

/// Little-endian cursor over a section payload whose length was already checked
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }

    fn i8(&mut self) -> i8 {
        self.u8() as i8
    }

    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        v
    }

    fn u24(&mut self) -> u32 {
        let b = &self.data[self.pos..self.pos + 3];
        self.pos += 3;
        u32::from_le_bytes([b[0], b[1], b[2], 0])
    }

    fn u32(&mut self) -> u32 {
        let b = &self.data[self.pos..self.pos + 4];
        self.pos += 4;
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    fn bytes<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

/// Serde helper: byte arrays as lowercase hex strings
mod hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.serialize_str(&data_encoding::HEXLOWER.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = data_encoding::HEXLOWER
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)?;
        T::try_from(bytes).map_err(|_| serde::de::Error::custom("unexpected byte length"))
    }
}

/// Packet 0x01
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub ic_type: u16,
    /// Supported communication modes (bitfield)
    pub communication_modes: u8,
    pub device_flags: u8,
    /// 0xFF when not present
    pub pwr_pin: u8,
    #[serde(with = "hex")]
    pub reserved: [u8; 17],
}

impl SystemConfig {
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            ic_type: r.u16(),
            communication_modes: r.u8(),
            device_flags: r.u8(),
            pwr_pin: r.u8(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.ic_type.to_le_bytes());
        buf.extend_from_slice(&[self.communication_modes, self.device_flags, self.pwr_pin]);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }

    pub fn ic_name(&self) -> String {
        match self.ic_type {
            1 => "nRF52840".to_string(),
            2 => "ESP32-S3".to_string(),
            3 => "ESP32-C3".to_string(),
            4 => "ESP32-C6".to_string(),
            other => format!("Unknown ({other})"),
        }
    }
}

/// Packet 0x02
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerData {
    pub manufacturer_id: u16,
    pub board_type: u8,
    pub board_revision: u8,
    #[serde(with = "hex")]
    pub reserved: [u8; 18],
}

impl ManufacturerData {
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            manufacturer_id: r.u16(),
            board_type: r.u8(),
            board_revision: r.u8(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&self.manufacturer_id.to_le_bytes());
        buf.extend_from_slice(&[self.board_type, self.board_revision]);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }
}

/// Packet 0x04
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerOption {
    /// 1 = battery, 2 = USB, 3 = solar
    pub power_mode: u8,
    /// 24-bit on the wire
    pub battery_capacity_mah: u32,
    pub sleep_timeout_ms: u16,
    pub tx_power: i8,
    pub sleep_flags: u8,
    pub battery_sense_pin: u8,
    pub battery_sense_enable_pin: u8,
    pub battery_sense_flags: u8,
    pub capacity_estimator: u8,
    pub voltage_scaling_factor: u16,
    pub deep_sleep_current_ua: u32,
    #[serde(with = "hex")]
    pub reserved: [u8; 12],
}

impl PowerOption {
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            power_mode: r.u8(),
            battery_capacity_mah: r.u24(),
            sleep_timeout_ms: r.u16(),
            tx_power: r.i8(),
            sleep_flags: r.u8(),
            battery_sense_pin: r.u8(),
            battery_sense_enable_pin: r.u8(),
            battery_sense_flags: r.u8(),
            capacity_estimator: r.u8(),
            voltage_scaling_factor: r.u16(),
            deep_sleep_current_ua: r.u32(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.power_mode);
        buf.extend_from_slice(&self.battery_capacity_mah.to_le_bytes()[..3]);
        buf.extend_from_slice(&self.sleep_timeout_ms.to_le_bytes());
        buf.extend_from_slice(&[
            self.tx_power as u8,
            self.sleep_flags,
            self.battery_sense_pin,
            self.battery_sense_enable_pin,
            self.battery_sense_flags,
            self.capacity_estimator,
        ]);
        buf.extend_from_slice(&self.voltage_scaling_factor.to_le_bytes());
        buf.extend_from_slice(&self.deep_sleep_current_ua.to_le_bytes());
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }
}

/// Packet 0x20, one per panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub instance_number: u8,
    pub display_technology: u8,
    pub panel_ic_type: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
    pub active_width_mm: u16,
    pub active_height_mm: u16,
    /// Legacy OEPL tag type
    pub oepl_tagtype: u16,
    /// Physical rotation, either a quarter-turn count (0..=3) or degrees;
    /// a single byte cannot carry 270, so that one only arrives as 3
    pub rotation: u8,
    pub reset_pin: u8,
    pub busy_pin: u8,
    pub dc_pin: u8,
    pub cs_pin: u8,
    pub data_pin: u8,
    pub partial_update_support: u8,
    pub color_scheme: u8,
    /// Supported transfer modes (bitfield), see `protocol::transmission_modes`
    pub transmission_modes: u8,
    pub clk_pin: u8,
    #[serde(with = "hex")]
    pub reserved_pins: [u8; 7],
    #[serde(with = "hex")]
    pub reserved: [u8; 15],
}

impl DisplayConfig {
    pub const SIZE: usize = 46;

    /// Rotation as clockwise quarter turns, `None` for values that are
    /// neither a quarter-turn count nor 90 or 180 degrees
    pub fn quarter_turns(&self) -> Option<u8> {
        match self.rotation {
            0..=3 => Some(self.rotation),
            90 => Some(1),
            180 => Some(2),
            _ => None,
        }
    }

    /// Whether the panel is mounted at 90 or 270 degrees
    pub fn is_quarter_rotated(&self) -> bool {
        matches!(self.quarter_turns(), Some(1 | 3))
    }

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            instance_number: r.u8(),
            display_technology: r.u8(),
            panel_ic_type: r.u16(),
            pixel_width: r.u16(),
            pixel_height: r.u16(),
            active_width_mm: r.u16(),
            active_height_mm: r.u16(),
            oepl_tagtype: r.u16(),
            rotation: r.u8(),
            reset_pin: r.u8(),
            busy_pin: r.u8(),
            dc_pin: r.u8(),
            cs_pin: r.u8(),
            data_pin: r.u8(),
            partial_update_support: r.u8(),
            color_scheme: r.u8(),
            transmission_modes: r.u8(),
            clk_pin: r.u8(),
            reserved_pins: r.bytes(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&[self.instance_number, self.display_technology]);
        for v in [
            self.panel_ic_type,
            self.pixel_width,
            self.pixel_height,
            self.active_width_mm,
            self.active_height_mm,
            self.oepl_tagtype,
        ] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&[
            self.rotation,
            self.reset_pin,
            self.busy_pin,
            self.dc_pin,
            self.cs_pin,
            self.data_pin,
            self.partial_update_support,
            self.color_scheme,
            self.transmission_modes,
            self.clk_pin,
        ]);
        buf.extend_from_slice(&self.reserved_pins);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }

    /// Diagonal in inches, `None` when the physical size is not reported
    pub fn diagonal_inches(&self) -> Option<f64> {
        if self.active_width_mm == 0 || self.active_height_mm == 0 {
            return None;
        }
        let w = f64::from(self.active_width_mm);
        let h = f64::from(self.active_height_mm);
        Some((w * w + h * h).sqrt() / 25.4)
    }
}

/// Packet 0x21
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedConfig {
    pub instance_number: u8,
    pub led_type: u8,
    pub led_1_r: u8,
    pub led_2_g: u8,
    pub led_3_b: u8,
    pub led_4: u8,
    pub led_flags: u8,
    #[serde(with = "hex")]
    pub reserved: [u8; 15],
}

impl LedConfig {
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            instance_number: r.u8(),
            led_type: r.u8(),
            led_1_r: r.u8(),
            led_2_g: r.u8(),
            led_3_b: r.u8(),
            led_4: r.u8(),
            led_flags: r.u8(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&[
            self.instance_number,
            self.led_type,
            self.led_1_r,
            self.led_2_g,
            self.led_3_b,
            self.led_4,
            self.led_flags,
        ]);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }
}

/// Packet 0x23
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorData {
    pub instance_number: u8,
    pub sensor_type: u16,
    /// Instance number of the data bus the sensor sits on
    pub bus_id: u8,
    #[serde(with = "hex")]
    pub reserved: [u8; 26],
}

impl SensorData {
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            instance_number: r.u8(),
            sensor_type: r.u16(),
            bus_id: r.u8(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(self.instance_number);
        buf.extend_from_slice(&self.sensor_type.to_le_bytes());
        buf.push(self.bus_id);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }
}

/// Packet 0x24, I2C or SPI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataBus {
    pub instance_number: u8,
    /// 0 = I2C, 1 = SPI
    pub bus_type: u8,
    pub pins: [u8; 7],
    pub bus_speed_hz: u32,
    pub bus_flags: u8,
    pub pullups: u8,
    pub pulldowns: u8,
    #[serde(with = "hex")]
    pub reserved: [u8; 14],
}

impl DataBus {
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            instance_number: r.u8(),
            bus_type: r.u8(),
            pins: r.bytes(),
            bus_speed_hz: r.u32(),
            bus_flags: r.u8(),
            pullups: r.u8(),
            pulldowns: r.u8(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&[self.instance_number, self.bus_type]);
        buf.extend_from_slice(&self.pins);
        buf.extend_from_slice(&self.bus_speed_hz.to_le_bytes());
        buf.extend_from_slice(&[self.bus_flags, self.pullups, self.pulldowns]);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }

    pub fn bus_name(&self) -> &'static str {
        match self.bus_type {
            0 => "I2C",
            1 => "SPI",
            _ => "Unknown",
        }
    }
}

/// Packet 0x25
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInputs {
    pub instance_number: u8,
    pub input_type: u8,
    pub display_as: u8,
    #[serde(with = "hex")]
    pub reserved_pins: [u8; 8],
    pub input_flags: u8,
    pub invert: u8,
    pub pullups: u8,
    pub pulldowns: u8,
    #[serde(with = "hex")]
    pub reserved: [u8; 15],
}

impl BinaryInputs {
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut r = Reader::new(data);
        Self {
            instance_number: r.u8(),
            input_type: r.u8(),
            display_as: r.u8(),
            reserved_pins: r.bytes(),
            input_flags: r.u8(),
            invert: r.u8(),
            pullups: r.u8(),
            pulldowns: r.u8(),
            reserved: r.bytes(),
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&[self.instance_number, self.input_type, self.display_as]);
        buf.extend_from_slice(&self.reserved_pins);
        buf.extend_from_slice(&[self.input_flags, self.invert, self.pullups, self.pulldowns]);
        buf.extend_from_slice(&self.reserved);
        fixed(buf)
    }
}

/// Every `to_bytes` above writes exactly `N` bytes
fn fixed<const N: usize>(buf: Vec<u8>) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_option_layout() {
        let mut raw = [0u8; PowerOption::SIZE];
        raw[0] = 1;
        raw[1..4].copy_from_slice(&[0x10, 0x27, 0x00]); // 10000 mAh
        raw[4..6].copy_from_slice(&60_000u16.to_le_bytes());
        raw[6] = (-4i8) as u8;
        raw[14..18].copy_from_slice(&12u32.to_le_bytes());
        raw[29] = 0xAA;

        let power = PowerOption::from_bytes(&raw);
        assert_eq!(power.power_mode, 1);
        assert_eq!(power.battery_capacity_mah, 10_000);
        assert_eq!(power.sleep_timeout_ms, 60_000);
        assert_eq!(power.tx_power, -4);
        assert_eq!(power.deep_sleep_current_ua, 12);
        assert_eq!(power.reserved[11], 0xAA);
        assert_eq!(power.to_bytes(), raw);
    }

    #[test]
    fn display_layout() {
        let mut raw = [0u8; DisplayConfig::SIZE];
        raw[4..6].copy_from_slice(&296u16.to_le_bytes());
        raw[6..8].copy_from_slice(&128u16.to_le_bytes());
        raw[14] = 90;
        raw[21] = 3;
        raw[22] = 0x0A;
        raw[45] = 0x55;

        let display = DisplayConfig::from_bytes(&raw);
        assert_eq!(display.pixel_width, 296);
        assert_eq!(display.pixel_height, 128);
        assert_eq!(display.rotation, 90);
        assert_eq!(display.color_scheme, 3);
        assert_eq!(display.transmission_modes, 0x0A);
        assert_eq!(display.reserved[14], 0x55);
        assert_eq!(display.to_bytes(), raw);
    }

    #[test]
    fn every_type_has_its_size() {
        for (byte, size) in [
            (0x01, 22),
            (0x02, 22),
            (0x04, 30),
            (0x20, 46),
            (0x21, 22),
            (0x23, 30),
            (0x24, 30),
            (0x25, 30),
        ] {
            assert_eq!(PacketType::from_byte(byte).unwrap().payload_size(), size);
        }
        assert_eq!(PacketType::from_byte(0x03), None);
    }
}
