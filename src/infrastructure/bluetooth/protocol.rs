//! Board LED Protocol
//!
//! UUIDs and the packet encoder for pushing lit holds to the board.
//!
//! # Packet Structure
//!
//! ```text
//! [0]      : 0x01 (start of header)
//! [1]      : payload length
//! [2]      : checksum of payload
//! [3]      : 0x02 (start of payload)
//! [4..n+4] : payload
//! [n+4]    : 0x03 (end of packet)
//! ```
//!
//! The payload begins with a one-byte format marker followed by one entry
//! per lit hold:
//!
//! ```text
//! Rgb222 (API level 2, marker 'P'), 2 bytes per hold:
//!   byte0 : position bits 0-7
//!   byte1 : RRGGBB << 2 | position bits 8-9
//!
//! Rgb332 (API level 3, marker 'T'), 3 bytes per hold:
//!   byte0 : position bits 0-7
//!   byte1 : position bits 8-15
//!   byte2 : RRRGGGBB
//! ```

use crate::domain::models::{BleColorTriplet, HoldLight, LedPosition};
use crate::error::EncodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

/// Service UUID the board advertises; used to filter scans
pub const ADVERTISING_SERVICE_UUID: Uuid = Uuid::from_u128(0x4488b571_7806_4df6_bcff_a2897e4953ff);

/// Nordic UART service carrying hold data
pub const DATA_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Write characteristic for hold packets
pub const DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

const PACKET_START: u8 = 0x01;
const PAYLOAD_START: u8 = 0x02;
const PACKET_END: u8 = 0x03;
const FRAMING_LEN: usize = 5;

/// Hold-data byte packing understood by the board firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// API level 2: 10-bit positions, 2 bits per color channel
    Rgb222,
    /// API level 3: 16-bit positions, 3/3/2 bit color
    Rgb332,
}

impl WireFormat {
    pub fn api_level(self) -> u8 {
        match self {
            Self::Rgb222 => 2,
            Self::Rgb332 => 3,
        }
    }

    /// First payload byte
    pub fn marker(self) -> u8 {
        match self {
            Self::Rgb222 => b'P',
            Self::Rgb332 => b'T',
        }
    }

    /// Bytes written per hold
    pub fn entry_len(self) -> usize {
        match self {
            Self::Rgb222 => 2,
            Self::Rgb332 => 3,
        }
    }

    /// Highest addressable LED position
    pub fn max_position(self) -> LedPosition {
        match self {
            Self::Rgb222 => 0x3ff,
            Self::Rgb332 => 0xffff,
        }
    }

    /// Reduce an 8-bit color to the format's channel depth
    pub fn quantize(self, color: BleColorTriplet) -> u8 {
        let BleColorTriplet { r, g, b } = color;
        match self {
            Self::Rgb222 => ((r >> 6) << 4) | ((g >> 6) << 2) | (b >> 6),
            Self::Rgb332 => ((r >> 5) << 5) | ((g >> 5) << 2) | (b >> 6),
        }
    }

    /// Append one hold entry to `payload`
    pub fn write_entry(self, light: &HoldLight, payload: &mut Vec<u8>) -> Result<(), EncodeError> {
        let position = light.position;
        if position > self.max_position() {
            return Err(EncodeError::PositionOutOfRange {
                position,
                format: self,
                max: self.max_position(),
            });
        }

        let color = self.quantize(light.color);
        match self {
            Self::Rgb222 => {
                payload.push((position & 0xff) as u8);
                payload.push(((position >> 8) & 0x03) as u8 | (color << 2));
            }
            Self::Rgb332 => {
                payload.push((position & 0xff) as u8);
                payload.push(((position >> 8) & 0xff) as u8);
                payload.push(color);
            }
        }
        Ok(())
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rgb222 => f.write_str("rgb222"),
            Self::Rgb332 => f.write_str("rgb332"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rgb222" | "2" => Ok(Self::Rgb222),
            "rgb332" | "3" => Ok(Self::Rgb332),
            other => Err(anyhow::anyhow!("Unknown wire format: {}", other)),
        }
    }
}

/// A complete, framed packet ready to write to the data characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet(Vec<u8>);

impl Packet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn payload_len(&self) -> usize {
        usize::from(self.0[1])
    }

    pub fn checksum(&self) -> u8 {
        self.0[2]
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[4..self.0.len() - 1]
    }

    pub fn to_hex(&self) -> String {
        hex_dump(&self.0)
    }
}

/// Ones'-complement of the byte sum
pub fn checksum(payload: &[u8]) -> u8 {
    !payload.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Format marker followed by every hold entry
pub fn serialize_entries(lights: &[HoldLight], format: WireFormat) -> Result<Vec<u8>, EncodeError> {
    let mut payload = Vec::with_capacity(1 + lights.len() * format.entry_len());
    payload.push(format.marker());
    for light in lights {
        format.write_entry(light, &mut payload)?;
    }
    Ok(payload)
}

/// Wrap a payload in the board's framing
pub fn frame_packet(payload: &[u8]) -> Result<Packet, EncodeError> {
    let len = u8::try_from(payload.len())
        .map_err(|_| EncodeError::PayloadTooLong { len: payload.len() })?;

    let mut packet = Vec::with_capacity(payload.len() + FRAMING_LEN);
    packet.extend_from_slice(&[PACKET_START, len, checksum(payload), PAYLOAD_START]);
    packet.extend_from_slice(payload);
    packet.push(PACKET_END);
    Ok(Packet(packet))
}

/// Encode lit holds into one framed packet.
///
/// An empty list yields a packet carrying only the format marker, which
/// turns every light off.
pub fn encode_holds(lights: &[HoldLight], format: WireFormat) -> Result<Packet, EncodeError> {
    let payload = serialize_entries(lights, format)?;
    let packet = frame_packet(&payload)?;

    info!(
        "Encoded packet {} API level {} ({} bytes): {}",
        format,
        format.api_level(),
        packet.len(),
        packet.to_hex()
    );

    Ok(packet)
}

/// Space separated upper-case hex, e.g. `01 02 AB`
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}
