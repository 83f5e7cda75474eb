use super::mode::{DataType, ModeInfo};
use serde::{Deserialize, Serialize};

/// One decoded scalar with both scalings applied
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ScaledValue {
    pub raw: i64,
    pub percent: f64,
    /// SI value in the table's integer units; see [`ScaledValue::si_value`]
    pub si: f64,
}

impl ScaledValue {
    /// SI value with the mode's implied decimal point applied
    pub fn si_value(&self, decimals: u8) -> f64 {
        self.si / 10f64.powi(decimals as i32)
    }
}

/// Decoded reading of one mode
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModeValues {
    pub mode: String,
    pub units: String,
    pub decimals: u8,
    pub figures: u8,
    pub values: Vec<ScaledValue>,
}

/// Decodes one scalar at the start of `bytes`; `None` if there are too few
pub fn decode_raw(data_type: DataType, bytes: &[u8]) -> Option<i64> {
    let bytes = bytes.get(..data_type.width())?;
    let raw = match data_type {
        DataType::U8 => bytes[0] as i64,
        DataType::S8 => bytes[0] as i8 as i64,
        DataType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        DataType::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        DataType::S16Be => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
        DataType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        DataType::S32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
    };
    Some(raw)
}

/// Affine map of `raw` from `[raw_min, raw_max]` onto `[out_min, out_max]`.
/// Values outside the raw domain extrapolate linearly.
pub fn scale(raw: i64, raw_min: i32, raw_max: i32, out_min: i32, out_max: i32) -> f64 {
    let span = raw_max as f64 - raw_min as f64;
    (raw as f64 - raw_min as f64) * (out_max as f64 - out_min as f64) / span + out_min as f64
}

/// Inverse of [`scale`]
pub fn unscale(value: f64, raw_min: i32, raw_max: i32, out_min: i32, out_max: i32) -> f64 {
    let span = out_max as f64 - out_min as f64;
    (value - out_min as f64) * (raw_max as f64 - raw_min as f64) / span + raw_min as f64
}

/// Decodes `mode.data_sets` values from the start of `raw`.
///
/// Returns `None` when `raw` is shorter than the mode's value layout.
pub fn decode(mode: &ModeInfo, raw: &[u8]) -> Option<ModeValues> {
    let width = mode.data_type.width();
    if raw.len() < mode.value_len() {
        return None;
    }

    let values = raw
        .chunks_exact(width)
        .take(mode.data_sets)
        .map(|chunk| {
            let raw = decode_raw(mode.data_type, chunk)?;
            Some(ScaledValue {
                raw,
                percent: scale(raw, mode.raw_min, mode.raw_max, mode.pct_min, mode.pct_max),
                si: scale(raw, mode.raw_min, mode.raw_max, mode.si_min, mode.si_max),
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(ModeValues {
        mode: mode.name.to_string(),
        units: mode.units.to_string(),
        decimals: mode.decimals,
        figures: mode.figures,
        values,
    })
}
