//! Periodic full-state snapshots

use crate::ws::protocol::{PlayerSnapshot, ServerMsg, StormState};

use super::lifecycle::LifecycleTracker;
use super::r#match::MatchState;

/// Decides when to send a snapshot and builds it
pub struct SnapshotBuilder {
    /// Tick counter since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in ticks
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (state transitions)
    pub fn force_next(&mut self) {
        self.ticks_since_snapshot = self.snapshot_interval;
    }

    pub fn build(
        &self,
        tick: u64,
        state: MatchState,
        storm: StormState,
        players: &LifecycleTracker,
    ) -> ServerMsg {
        let players = players
            .records()
            .map(|r| PlayerSnapshot {
                player_id: r.player_id,
                display_name: r.display_name.clone(),
                team_id: r.team_id,
                status: r.status(),
                health: r.health,
                shield: r.shield,
                position: r.position,
                placement: r.placement,
            })
            .collect();

        ServerMsg::Snapshot {
            tick,
            state,
            storm,
            players,
        }
    }
}
