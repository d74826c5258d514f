//! Climb sender
//!
//! Glue between the authoring side and the link: resolve a climb against
//! the loaded board data, encode it, and write the packet to the board.

use crate::domain::board::BoardData;
use crate::domain::models::ClimbPlacements;
use crate::domain::placements::{self, ResolveIssue};
use crate::error::EncodeError;
use crate::infrastructure::bluetooth::protocol::{self, Packet, WireFormat};
use crate::infrastructure::bluetooth::ConnectionHandle;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resolve and encode a climb without touching the radio.
///
/// Returns the packet together with the entries that had to be skipped.
pub fn build_packet(
    board: &BoardData,
    placements: &ClimbPlacements,
    format: WireFormat,
) -> Result<(Packet, Vec<ResolveIssue>), EncodeError> {
    let resolved = placements::resolve(placements, &board.geometry, &board.colors);
    let packet = protocol::encode_holds(&resolved.lights, format)?;
    Ok((packet, resolved.issues))
}

pub struct ClimbSender {
    connection: ConnectionHandle,
    board: Option<Arc<BoardData>>,
    format: WireFormat,
}

impl ClimbSender {
    pub fn new(connection: ConnectionHandle, format: WireFormat) -> Self {
        Self {
            connection,
            board: None,
            format,
        }
    }

    /// Board data arrives after the sender exists; until then sends fail.
    pub fn set_board_data(&mut self, board: Arc<BoardData>) {
        self.board = Some(board);
    }

    pub fn set_format(&mut self, format: WireFormat) {
        self.format = format;
    }

    pub fn is_ready(&self) -> bool {
        self.board.is_some() && self.connection.is_connected()
    }

    /// Light `placements` on the board.
    ///
    /// An empty climb is still sent; it clears the board. Returns `false`
    /// when there is no board data, no connection, or the write fails.
    pub async fn send(&self, placements: &ClimbPlacements) -> bool {
        let Some(board) = self.board.as_deref() else {
            error!("Cannot send to board - missing data or connection");
            return false;
        };
        if !self.connection.is_connected() {
            error!("Cannot send to board - missing data or connection");
            return false;
        }

        let (packet, issues) = match build_packet(board, placements, self.format) {
            Ok(built) => built,
            Err(e) => {
                error!("Error sending climb to board: {}", e);
                return false;
            }
        };
        if !issues.is_empty() {
            warn!(
                "Sending climb with {} of {} holds skipped",
                issues.len(),
                placements.len()
            );
        }

        if !self.connection.write(packet.as_bytes()).await {
            return false;
        }

        if placements.is_empty() {
            info!("Successfully cleared board");
        } else {
            info!(
                "Successfully sent climb data ({} holds, {} bytes)",
                placements.len() - issues.len(),
                packet.len()
            );
        }
        true
    }

    /// Turn every LED off
    pub async fn clear(&self) -> bool {
        self.send(&ClimbPlacements::new()).await
    }
}
