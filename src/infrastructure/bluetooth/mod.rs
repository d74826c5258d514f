//! Bluetooth Module
//!
//! Provides BLE communication with climbing board LED controllers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │  (Single task owning the link - driven by a handle)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Scan    │  │ - Connect  │  │ - UUIDs  │
//! │   session │  │ - GATT     │  │ - Packet │
//! │ - Devices │  │   writes   │  │   framing│
//! └─────┬─────┘  └─────┬──────┘  └──────────┘
//!       │              │
//!       └──────┬───────┘
//!              ▼
//!       ┌─────────────┐
//!       │ BleBackend  │  btleplug on real hardware
//!       └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Board wire format, packet framing and UUIDs
//! - [`backend`] - Radio abstraction and adapter events
//! - [`platform`] - btleplug implementation of the backend
//! - [`scanner`] - Scan session and discovered device list
//! - [`connection`] - Link operations and connection config
//! - [`service`] - Connection manager state machine

pub mod backend;
pub mod connection;
pub mod platform;
pub mod protocol;
pub mod scanner;
pub mod service;

#[cfg(test)]
pub(crate) mod mock;

// Re-export main service for convenience
pub use service::{ConnectionHandle, ConnectionManager};
