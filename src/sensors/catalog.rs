//! Mode tables of the supported sensor models.
//!
//! Index 0 of every table is the mode entered at probe time.

use super::mode::{DataType, ModeInfo, PinState, SensorInfo};
use crate::bus::I2cTransport;
use crate::errors::TransportResult;

#[cfg(feature = "ht_smux")]
use super::ht_smux;
#[cfg(feature = "ms_servo")]
use super::ms_servo;

/// Identification registers common to NXT I2C devices
pub const FIRMWARE_VERSION_REG: u8 = 0x00;
pub const VENDOR_ID_REG: u8 = 0x08;
pub const PRODUCT_ID_REG: u8 = 0x10;
pub const ID_STRING_LEN: usize = 8;

/// Table used when a device cannot be identified
pub const GENERIC_SENSOR: &str = "nxt-i2c";

const US_SET_MODE_REG: u8 = 0x41;

pub static SENSOR_DEFS: &[SensorInfo] = &[
    SensorInfo {
        name: GENERIC_SENSOR,
        vendor_id: "UNKNOWN",
        product_id: "unknown",
        modes: &[
            ModeInfo::new("I2C-U8", 0x42),
            ModeInfo::new("I2C-S8", 0x42).data(DataType::S8, 1),
            ModeInfo::new("I2C-S16", 0x42).data(DataType::S16, 1),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "lego-nxt-ultrasonic",
        vendor_id: "LEGO",
        product_id: "Sonar",
        modes: &[
            ModeInfo::new("NXT-US-CM", 0x42)
                .units("cm")
                .set_mode(US_SET_MODE_REG, 0x02)
                .pin1(PinState::High),
            ModeInfo::new("NXT-US-IN", 0x42)
                .units("in")
                .si(0, 1000)
                .decimals(1)
                .set_mode(US_SET_MODE_REG, 0x02)
                .pin1(PinState::High),
            // single-shot: a new value is measured each time the mode is set
            ModeInfo::new("NXT-US-SI-CM", 0x42)
                .units("cm")
                .set_mode(US_SET_MODE_REG, 0x01)
                .pin1(PinState::High),
            ModeInfo::new("NXT-US-SI-IN", 0x42)
                .units("in")
                .si(0, 1000)
                .decimals(1)
                .set_mode(US_SET_MODE_REG, 0x01)
                .pin1(PinState::High),
            ModeInfo::new("NXT-US-LIST", 0x42)
                .raw(0, 1)
                .si(0, 1)
                .set_mode(US_SET_MODE_REG, 0x03)
                .pin1(PinState::High),
        ],
        read_only_count: Some(2),
        slow: true,
        hooks: None,
    },
    SensorInfo {
        name: "lego-power-storage",
        vendor_id: "LEGO",
        product_id: "",
        modes: &[
            ModeInfo::new("ES-IN-VOLT", 0x0A)
                .units("V")
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-IN-AMP", 0x0C)
                .units("A")
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-OUT-VOLT", 0x0E)
                .units("V")
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-OUT-AMP", 0x10)
                .units("A")
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-JOULE", 0x12)
                .units("J")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-IN-WATT", 0x14)
                .units("W")
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-OUT-WATT", 0x16)
                .units("W")
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 1),
            ModeInfo::new("ES-ALL", 0x0A)
                .raw(0, 10000)
                .si(0, 10000)
                .decimals(3)
                .data(DataType::S16Be, 7),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-pir",
        vendor_id: "HITECHNC",
        product_id: "PIR",
        modes: &[ModeInfo::new("HT-PIR", 0x42)
            .units("pct")
            .pct(-100, 100)
            .si(-100, 100)],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-barometric",
        vendor_id: "HiTechnc",
        product_id: "Barometr",
        modes: &[
            // raw range descends: higher pressure means lower altitude
            ModeInfo::new("HT-BAR-PRES", 0x42)
                .units("m")
                .raw(30400, 29400)
                .si(0, 3000)
                .decimals(1),
            ModeInfo::new("HT-BAR-TEMP", 0x42)
                .units("C")
                .raw(0, 1000)
                .si(0, 1000)
                .decimals(1),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-ir-seeker-v2",
        vendor_id: "HiTechnc",
        product_id: "NewIRDir",
        modes: &[
            ModeInfo::new("HT-DIR-DC", 0x42).raw(0, 9).si(0, 9),
            ModeInfo::new("HT-DIR-AC", 0x49).raw(0, 9).si(0, 9),
            ModeInfo::new("HT-DIR-DALL", 0x42).data(DataType::U8, 7),
            ModeInfo::new("HT-DIR-AALL", 0x49).data(DataType::U8, 6),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-color",
        vendor_id: "HiTechnc",
        product_id: "Color",
        modes: &[
            ModeInfo::new("HT-COL1-COL", 0x42).raw(0, 17).si(0, 17),
            ModeInfo::new("HT-COL1-RED", 0x43),
            ModeInfo::new("HT-COL1-GRN", 0x44),
            ModeInfo::new("HT-COL1-BLU", 0x45),
            ModeInfo::new("HT-COL1-RAW", 0x46)
                .raw(0, u16::MAX as i32)
                .si(0, u16::MAX as i32)
                .data(DataType::U16, 3),
            ModeInfo::new("HT-COL1-NRM", 0x4C).data(DataType::U8, 4),
            ModeInfo::new("HT-COL1-ALL", 0x42).data(DataType::U8, 4),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-color-v2",
        vendor_id: "HiTechnc",
        product_id: "ColorPD",
        modes: &[
            ModeInfo::new("HT-COL2-COL", 0x42).raw(0, 17).si(0, 17).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-RED", 0x43).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-GRN", 0x44).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-BLU", 0x45).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-WHT", 0x46).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-NRM", 0x47).data(DataType::U8, 4).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-ALL", 0x42).data(DataType::U8, 5).set_mode(0x41, 0x00),
            ModeInfo::new("HT-COL2-RAW", 0x42)
                .raw(0, u16::MAX as i32)
                .si(0, u16::MAX as i32)
                .data(DataType::U16, 4)
                .set_mode(0x41, 0x03),
        ],
        read_only_count: Some(7),
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-angle",
        vendor_id: "HITECHNC",
        product_id: "AnglSnsr",
        modes: &[
            // angle / 2, so 0..180 covers a full turn
            ModeInfo::new("HT-ANG-DEG2", 0x42).units("deg").raw(0, 180).si(0, 180),
            // Assumed little-endian like every other multi-byte value here.
            // The device's byte order for the accumulated angle is unconfirmed.
            ModeInfo::new("HT-ANG-ACC", 0x44)
                .units("deg")
                .raw(i32::MIN, i32::MAX)
                .si(i32::MIN, i32::MAX)
                .data(DataType::S32, 1)
                .figures(9),
            ModeInfo::new("HT-ANG-RPM", 0x46)
                .units("RPM")
                .raw(i16::MIN as i32, i16::MAX as i32)
                .si(i16::MIN as i32, i16::MAX as i32)
                .data(DataType::S16, 1),
            // same as HT-ANG-DEG2, but entering the mode resets the angle
            ModeInfo::new("HT-ANG-RSET", 0x42)
                .units("deg")
                .raw(0, 180)
                .si(0, 180)
                .set_mode(0x41, 0x52),
        ],
        read_only_count: Some(3),
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-compass",
        vendor_id: "HiTechnc",
        product_id: "Compass",
        modes: &[ModeInfo::new("HT-CMP-DEG2", 0x42)
            .units("deg")
            .raw(0, 180)
            .si(0, 180)
            .data(DataType::S8, 1)],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-ir-receiver",
        vendor_id: "HiTechnc",
        product_id: "IRRecv",
        modes: &[
            // -128 is brake, speeds come in steps of 14 from -100 to 100
            ModeInfo::new("HT-IRRECV", 0x42).units("pct").data(DataType::S8, 1),
            ModeInfo::new("HT-IRRECV-8", 0x42).units("pct").data(DataType::S8, 8),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-accel",
        vendor_id: "HITECHNC",
        product_id: "Accel.",
        modes: &[
            ModeInfo::new("HT-ACCL", 0x42),
            // Three MSBs then three LSB bytes, reported unmerged. Which two
            // bits of each LSB byte complete the 10-bit value is unconfirmed.
            ModeInfo::new("HT-ACCL-ALL", 0x42).data(DataType::U8, 6),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-nxt-ir-link",
        vendor_id: "HiTechnc",
        product_id: "IRLink",
        modes: &[ModeInfo::new("HT-IRLINK", 0x42)],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    SensorInfo {
        name: "ht-super-pro",
        vendor_id: "HiTechnc",
        product_id: "SuperPro",
        modes: &[
            ModeInfo::new("HT-SPRO-AIN", 0x42).data(DataType::U16, 4),
            ModeInfo::new("HT-SPRO-DIN", 0x4C),
            ModeInfo::new("HT-SPRO-DOT", 0x4D),
            ModeInfo::new("HT-SPRO-DCT", 0x4E),
            ModeInfo::new("HT-SPRO-STB", 0x50),
        ],
        read_only_count: None,
        slow: false,
        hooks: None,
    },
    #[cfg(feature = "ht_smux")]
    SensorInfo {
        name: "ht-nxt-smux",
        vendor_id: "HiTechnc",
        product_id: "SensrMUX",
        modes: &[
            // value 0 is the active command, value 1 the status bits
            ModeInfo::new(ht_smux::MODE_NAMES[ht_smux::MODE_RUN], ht_smux::COMMAND_REG)
                .data(DataType::U8, 2)
                .read_len(32)
                .set_mode(ht_smux::COMMAND_REG, ht_smux::COMMAND_RUN),
            ModeInfo::new(ht_smux::MODE_NAMES[ht_smux::MODE_DETECT], ht_smux::COMMAND_REG)
                .data(DataType::U8, 2)
                .read_len(32)
                .set_mode(ht_smux::COMMAND_REG, ht_smux::COMMAND_DETECT),
            ModeInfo::new(ht_smux::MODE_NAMES[ht_smux::MODE_HALT], ht_smux::COMMAND_REG)
                .data(DataType::U8, 2)
                .read_len(32)
                .set_mode(ht_smux::COMMAND_REG, ht_smux::COMMAND_HALT),
        ],
        read_only_count: Some(1),
        slow: false,
        hooks: Some(&ht_smux::HT_SMUX_HOOKS),
    },
    #[cfg(feature = "ms_servo")]
    SensorInfo {
        name: "ms-8ch-servo",
        vendor_id: "mndsnsrs",
        product_id: "NXTServo",
        modes: &[
            // battery voltage
            ModeInfo::new("MS-8CH-SERVO-V3", 0x62)
                .units("V")
                .raw(127, 255)
                .si(4700, 9400)
                .decimals(3),
            ModeInfo::new("MS-8CH-SERVO", 0x41)
                .units("V")
                .raw(127, 255)
                .si(4700, 9400)
                .decimals(3),
        ],
        read_only_count: None,
        slow: false,
        hooks: Some(&ms_servo::MS_SERVO_HOOKS),
    },
    SensorInfo {
        name: "ms-light-array",
        vendor_id: "mndsnsrs",
        product_id: "LSArray",
        modes: &[
            ModeInfo::new("MS-LSA-CAL", 0x42)
                .units("pct")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::U8, 8),
            ModeInfo::new("MS-LSA-RAW", 0x6A)
                .raw(0, u16::MAX as i32)
                .si(0, u16::MAX as i32)
                .data(DataType::S16, 8),
            // calibration commands
            ModeInfo::new("MS-LSA-C-W", 0x42)
                .units("pct")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::U8, 8)
                .set_mode(0x41, b'W'),
            ModeInfo::new("MS-LSA-C-B", 0x42)
                .units("pct")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::U8, 8)
                .set_mode(0x41, b'B'),
            ModeInfo::new("MS-LSA-C-A", 0x42)
                .units("pct")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::U8, 8)
                .set_mode(0x41, b'A'),
            ModeInfo::new("MS-LSA-C-E", 0x42)
                .units("pct")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::U8, 8)
                .set_mode(0x41, b'E'),
            ModeInfo::new("MS-LSA-C-U", 0x42)
                .units("pct")
                .raw(0, 100)
                .si(0, 100)
                .data(DataType::U8, 8)
                .set_mode(0x41, b'U'),
        ],
        read_only_count: Some(2),
        slow: false,
        hooks: None,
    },
];

pub fn find_sensor_info(driver: &str) -> Option<&'static SensorInfo> {
    SENSOR_DEFS.iter().find(|info| info.name == driver)
}

/// Vendor and product strings reported by a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub firmware: String,
    pub vendor_id: String,
    pub product_id: String,
}

fn id_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

pub async fn read_identity(bus: &mut dyn I2cTransport, address: u8) -> TransportResult<DeviceIdentity> {
    let mut firmware = [0u8; ID_STRING_LEN];
    let mut vendor = [0u8; ID_STRING_LEN];
    let mut product = [0u8; ID_STRING_LEN];
    bus.read_block(address, FIRMWARE_VERSION_REG, &mut firmware).await?;
    bus.read_block(address, VENDOR_ID_REG, &mut vendor).await?;
    bus.read_block(address, PRODUCT_ID_REG, &mut product).await?;

    Ok(DeviceIdentity {
        firmware: id_string(&firmware),
        vendor_id: id_string(&vendor),
        product_id: id_string(&product),
    })
}

/// Picks the table matching a device's identification strings
pub fn identify(identity: &DeviceIdentity) -> Option<&'static SensorInfo> {
    SENSOR_DEFS
        .iter()
        .find(|info| info.vendor_id == identity.vendor_id && info.product_id == identity.product_id)
}
