//! Error types shared across the crate.
//!
//! Codec and resolver errors are local to a single entry and are logged and
//! skipped by their callers. Encode errors fail a whole packet. Connection
//! errors never escape the connection handle as anything but `false`, except
//! through the explicit `try_*` calls.

use crate::domain::models::{DeviceId, LedPosition};
use crate::infrastructure::bluetooth::protocol::WireFormat;
use thiserror::Error;

/// Frame token input that is not text.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frames input is not valid UTF-8: {0}")]
    NotText(#[from] std::str::Utf8Error),
}

/// A role's LED color is not exactly six hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorFormatError {
    #[error("LED color {0:?} must be exactly 6 hex digits")]
    Length(String),
    #[error("LED color {0:?} contains a non-hex digit")]
    Digit(String),
}

/// Failures that abort a whole packet encode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("LED position {position} exceeds {max} addressable by {format}")]
    PositionOutOfRange {
        position: LedPosition,
        format: WireFormat,
        max: LedPosition,
    },
    #[error("payload of {len} bytes does not fit the one-byte length field")]
    PayloadTooLong { len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Bluetooth adapter is not powered on")]
    NotPoweredOn,
    #[error("no connected device")]
    NotConnected,
    #[error("already connected to {0}")]
    AlreadyConnected(DeviceId),
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("connection to {device} failed: {reason}")]
    Connect { device: DeviceId, reason: String },
    #[error("service discovery on {device} failed: {reason}")]
    Discovery { device: DeviceId, reason: String },
    #[error("write of {len} bytes to {device} failed: {reason}")]
    Write {
        device: DeviceId,
        len: usize,
        reason: String,
    },
    #[error("no boards found")]
    NoBoardFound,
    #[error("liveness check of {device} failed: {reason}")]
    LinkCheck { device: DeviceId, reason: String },
    #[error("connection manager has stopped")]
    ManagerStopped,
}
