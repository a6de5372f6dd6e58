// # Wire Parser
//
// Stateless decoder for device report frames.
//
// ## Record format
//
// Comma-separated text. A frame is a digital-input report when it carries
// the `GTDIS` marker; field 2 holds the device identifier and field 5 the
// event code:
//
// ```text
// +RESP:GTDIS,300400,860599001234567,GV300,,11,0,0.0,0,...,20250109120000,0001
//             ^0     ^1     ^2          ^3   ^4 ^5
// ```
//
// | code | input | asserted |
// |------|-------|----------|
// | 10   | in1   | false    |
// | 11   | in1   | true     |
// | 20   | in2   | false    |
// | 21   | in2   | true     |
// | 30   | in3   | false    |
// | 31   | in3   | true     |
//
// Anything else decodes to `None`. The parser never fails.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Marker token identifying a digital-input report
pub const DIO_REPORT_MARKER: &str = "GTDIS";

/// Field separator of the wire record
pub const FIELD_DELIMITER: char = ',';

/// Device identifier used when the frame has no identifier field
pub const UNKNOWN_DEVICE_ID: &str = "N/A";

const DEVICE_ID_FIELD: usize = 2;
const EVENT_CODE_FIELD: usize = 5;

/// One of the three monitored digital inputs of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputId {
    In1,
    In2,
    In3,
}

impl InputId {
    /// All monitored inputs, in wire order
    pub const ALL: [InputId; 3] = [InputId::In1, InputId::In2, InputId::In3];

    /// Raw identifier (`in1`, `in2`, `in3`)
    pub fn as_str(&self) -> &'static str {
        match self {
            InputId::In1 => "in1",
            InputId::In2 => "in2",
            InputId::In3 => "in3",
        }
    }
}

impl fmt::Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in1" => Ok(InputId::In1),
            "in2" => Ok(InputId::In2),
            "in3" => Ok(InputId::In3),
            other => Err(crate::Error::invalid_input(format!(
                "unknown input '{}' (expected in1, in2 or in3)",
                other
            ))),
        }
    }
}

/// A decoded digital-input report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    /// Reporting device (hardware serial)
    pub device_id: String,
    /// Input the report is about
    pub input: InputId,
    /// `true` when the alarm condition is active
    pub asserted: bool,
}

impl DeviceEvent {
    /// Create a new device event
    pub fn new(device_id: impl Into<String>, input: InputId, asserted: bool) -> Self {
        Self {
            device_id: device_id.into(),
            input,
            asserted,
        }
    }
}

/// Map an event code to `(input, asserted)`
pub fn decode_event_code(code: u32) -> Option<(InputId, bool)> {
    match code {
        10 => Some((InputId::In1, false)),
        11 => Some((InputId::In1, true)),
        20 => Some((InputId::In2, false)),
        21 => Some((InputId::In2, true)),
        30 => Some((InputId::In3, false)),
        31 => Some((InputId::In3, true)),
        _ => None,
    }
}

/// Decode one frame into a device event
///
/// Returns `None` for frames without the digital-input marker, frames too
/// short to carry an event code, and unknown or non-numeric codes.
pub fn parse(frame: &[u8]) -> Option<DeviceEvent> {
    let text = String::from_utf8_lossy(frame);
    let text = text.trim().trim_end_matches('$').trim_end();

    if !text.contains(DIO_REPORT_MARKER) {
        return None;
    }

    let fields: Vec<&str> = text.split(FIELD_DELIMITER).collect();

    let code: u32 = fields.get(EVENT_CODE_FIELD)?.trim().parse().ok()?;
    let (input, asserted) = decode_event_code(code)?;

    let device_id = fields
        .get(DEVICE_ID_FIELD)
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .unwrap_or(UNKNOWN_DEVICE_ID);

    Some(DeviceEvent::new(device_id, input, asserted))
}
