//! Drive the LED controller of an interactive climbing board over BLE.
//!
//! A climb is a set of `(placement, role)` pairs. [`domain::frames`] moves it
//! to and from its compact text form, [`domain::placements`] resolves it
//! against board data into LED lights, and
//! [`infrastructure::bluetooth::protocol`] frames the lights into one packet
//! for the board. The [`infrastructure::bluetooth::ConnectionManager`] owns
//! the single BLE link the packet is written over.

pub mod domain;
pub mod error;
pub mod infrastructure;
