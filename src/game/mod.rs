//! Match core: state machine, storm, player lifecycle, revives and reboots

pub mod combat;
pub mod geometry;
pub mod lifecycle;
pub mod r#match;
pub mod reboot;
pub mod revive;
pub mod snapshot;
pub mod storm;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, MatchState, MatchSummary};

use crate::ws::protocol::ClientMsg;
use uuid::Uuid;

/// Player request received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: Uuid,
    pub msg: ClientMsg,
    /// Sender presented an admin token
    pub is_admin: bool,
    pub received_at: u64,
}
