//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use glam::Vec3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::combat::HitLocation;
use crate::game::lifecycle::{EliminationSource, ItemStack, LifeStatus, WorldItem};
use crate::game::r#match::MatchState;
use crate::game::storm::StormSubState;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join the lobby of the match this connection is bound to
    Join {
        display_name: Option<String>,
    },

    /// Leave the match (also sent on disconnect)
    Leave,

    /// Vote to start before the lobby countdown ends
    Ready,

    /// Leave the deploy flight
    Jump,

    /// Position reported by the movement/glider collaborator
    Position {
        position: Vec3,
    },

    /// Hit reported by the weapon system
    Hit {
        target: Uuid,
        amount: f32,
        location: HitLocation,
        weapon: String,
    },

    /// Consumable used
    Heal {
        amount: f32,
    },

    /// Shield item used
    Shield {
        amount: f32,
    },

    /// Current inventory contents, as tracked by the inventory collaborator
    Inventory {
        items: Vec<ItemStack>,
    },

    StartRevive {
        target: Uuid,
    },

    CancelRevive,

    /// Pick up a teammate's reboot card
    CollectCard {
        owner: Uuid,
    },

    /// Deliver a held card at a beacon
    StartReboot {
        beacon: u32,
        owner: Uuid,
    },

    /// Privileged debug command
    Admin {
        command: AdminCommand,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Debug commands accepted from admin connections only
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    ForceState { state: MatchState },
    SetInvincible { player: Uuid, enabled: bool },
    StartStormPhase { phase: usize },
    Eliminate { player: Uuid },
}

/// Data carried by a match state transition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TransitionPayload {
    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Storm circle state as broadcast to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormState {
    /// 1-indexed phase, 0 before the storm starts
    pub phase: usize,
    pub sub_state: StormSubState,
    pub center: Vec3,
    pub radius: f32,
    pub next_center: Vec3,
    pub next_radius: f32,
    pub seconds_remaining: f32,
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: Uuid,
        match_id: Uuid,
        server_time: u64,
    },

    MatchStateChanged {
        previous: MatchState,
        current: MatchState,
        payload: TransitionPayload,
    },

    /// Lobby countdown started or ticking
    MatchCountdown {
        seconds_remaining: f32,
    },

    CountdownCancelled,

    FlightPath {
        start: Vec3,
        end: Vec3,
        duration: f32,
    },

    PlayerJumped {
        player_id: Uuid,
        position: Vec3,
        forced: bool,
    },

    StormUpdate(StormState),

    PlayerEliminated {
        victim_id: Uuid,
        killer_id: Option<Uuid>,
        weapon: Option<String>,
        source: EliminationSource,
        placement: u32,
    },

    PlayerDowned {
        player_id: Uuid,
        position: Vec3,
    },

    PlayerRevived {
        player_id: Uuid,
        position: Vec3,
    },

    PlayerBledOut {
        player_id: Uuid,
        position: Vec3,
    },

    ReviveStarted {
        reviver_id: Uuid,
        target_id: Uuid,
        duration: f32,
    },

    ReviveCancelled {
        reviver_id: Uuid,
        target_id: Uuid,
        reason: String,
    },

    RebootCardDropped {
        owner_id: Uuid,
        position: Vec3,
        expires_at: f32,
    },

    RebootCardCollected {
        owner_id: Uuid,
        collector_id: Uuid,
    },

    RebootCardExpired {
        owner_id: Uuid,
    },

    RebootStarted {
        beacon_id: u32,
        player_id: Uuid,
        owner_id: Uuid,
    },

    RebootProgress {
        beacon_id: u32,
        progress: f32,
    },

    RebootCompleted {
        beacon_id: u32,
        player_id: Uuid,
        position: Vec3,
    },

    RebootCancelled {
        beacon_id: u32,
        player_id: Uuid,
        reason: String,
    },

    /// Beacon left the safe zone and can no longer be used
    RebootBeaconDisabled {
        beacon_id: u32,
    },

    PlayerCountUpdate {
        alive_count: usize,
        total_count: usize,
    },

    SupplyDrop {
        position: Vec3,
    },

    LootDropped {
        owner_id: Uuid,
        items: Vec<WorldItem>,
    },

    /// A request was rejected
    Denied {
        player_id: Uuid,
        action: String,
        reason: String,
    },

    /// Full match state (sent at regular intervals)
    Snapshot {
        tick: u64,
        state: MatchState,
        storm: StormState,
        players: Vec<PlayerSnapshot>,
    },

    /// Error message
    Error {
        code: String,
        message: String,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player state in a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: Uuid,
    pub display_name: String,
    pub team_id: u32,
    pub status: LifeStatus,
    pub health: f32,
    pub shield: f32,
    pub position: Vec3,
    pub placement: Option<u32>,
}
