//! Reboot cards and beacons
//!
//! A card drops where a teammate was eliminated. A standing teammate picks it
//! up and carries it to a beacon; holding the beacon for the reboot duration
//! brings the owner back. Cards expire a fixed time after the drop. A beacon
//! the storm has swallowed stays dark until the match resets.

use glam::Vec3;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MatchRules;
use crate::ws::protocol::ServerMsg;

use super::geometry::{scatter_around, Circle};
use super::lifecycle::{Elimination, LifecycleTracker};

/// How far from the beacon a rebooted player reappears
const RESPAWN_SPREAD: f32 = 2.0;

/// Progress broadcasts per reboot
const PROGRESS_STEPS: f32 = 10.0;

/// Why a card pickup or reboot request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RebootDenied {
    #[error("reboots are disabled in this mode")]
    Disabled,

    #[error("player must be standing")]
    NotStanding,

    #[error("no reboot card for that player")]
    NoCard,

    #[error("card belongs to another team")]
    NotTeammate,

    #[error("card already collected")]
    CardTaken,

    #[error("out of range")]
    OutOfRange,

    #[error("unknown beacon")]
    UnknownBeacon,

    #[error("beacon is inactive")]
    BeaconInactive,

    #[error("beacon is cooling down")]
    OnCooldown,

    #[error("beacon is in use")]
    InUse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebootCard {
    pub owner_id: Uuid,
    pub team_id: u32,
    pub drop_position: Vec3,
    pub created_at: f32,
    pub expires_at: f32,
    /// Teammate carrying the card, `None` while it lies in the world
    pub holder: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebootBeacon {
    pub id: u32,
    pub position: Vec3,
    pub active: bool,
    pub cooldown_ends_at: f32,
    pub current_user: Option<Uuid>,
    /// Owner of the card being delivered
    pub target: Option<Uuid>,
    pub started_at: f32,
    pub progress: f32,
    reported_step: u32,
}

impl RebootBeacon {
    fn new(id: u32, position: Vec3) -> Self {
        Self {
            id,
            position,
            active: true,
            cooldown_ends_at: 0.0,
            current_user: None,
            target: None,
            started_at: 0.0,
            progress: 0.0,
            reported_step: 0,
        }
    }

    fn release(&mut self) {
        self.current_user = None;
        self.target = None;
        self.progress = 0.0;
        self.reported_step = 0;
    }
}

#[derive(Debug)]
pub struct RebootSystem {
    rules: Arc<MatchRules>,
    cards: HashMap<Uuid, RebootCard>,
    beacons: Vec<RebootBeacon>,
}

impl RebootSystem {
    pub fn new(rules: Arc<MatchRules>) -> Self {
        let beacons = Self::build_beacons(&rules);
        Self {
            rules,
            cards: HashMap::new(),
            beacons,
        }
    }

    fn build_beacons(rules: &MatchRules) -> Vec<RebootBeacon> {
        rules
            .reboot_beacons
            .iter()
            .enumerate()
            .map(|(i, pos)| RebootBeacon::new(i as u32, *pos))
            .collect()
    }

    pub fn reset(&mut self) {
        self.cards.clear();
        self.beacons = Self::build_beacons(&self.rules);
    }

    /// React to an elimination: cancel any reboot the victim was running,
    /// put a card they carried back in the world, then drop their own card.
    pub fn on_player_eliminated(
        &mut self,
        now: f32,
        elimination: &Elimination,
        out: &mut Vec<ServerMsg>,
    ) {
        let victim = elimination.victim_id;

        for beacon in self
            .beacons
            .iter_mut()
            .filter(|b| b.current_user == Some(victim))
        {
            Self::cancel_beacon(beacon, "user_down", out);
        }

        let mut carried: Vec<&mut RebootCard> = self
            .cards
            .values_mut()
            .filter(|c| c.holder == Some(victim))
            .collect();
        carried.sort_by_key(|c| c.owner_id);
        for card in carried {
            card.holder = None;
            card.drop_position = elimination.position;
            debug!(owner = %card.owner_id, carrier = %victim, "Carried card returned to world");
            out.push(ServerMsg::RebootCardDropped {
                owner_id: card.owner_id,
                position: card.drop_position,
                expires_at: card.expires_at,
            });
        }

        self.drop_card(now, elimination, out);
    }

    /// Leave the victim's card at the death position. Team modes only.
    pub fn drop_card(
        &mut self,
        now: f32,
        elimination: &Elimination,
        out: &mut Vec<ServerMsg>,
    ) -> bool {
        if !self.rules.reboot_active() {
            return false;
        }

        let card = RebootCard {
            owner_id: elimination.victim_id,
            team_id: elimination.team_id,
            drop_position: elimination.position,
            created_at: now,
            expires_at: now + self.rules.card_ttl,
            holder: None,
        };
        out.push(ServerMsg::RebootCardDropped {
            owner_id: card.owner_id,
            position: card.drop_position,
            expires_at: card.expires_at,
        });
        self.cards.insert(card.owner_id, card);
        true
    }

    /// Pick up a teammate's card. First come, first served.
    pub fn collect_card(
        &mut self,
        players: &LifecycleTracker,
        collector: Uuid,
        owner: Uuid,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), RebootDenied> {
        if !self.rules.reboot_active() {
            return Err(RebootDenied::Disabled);
        }
        let record = players
            .get(&collector)
            .filter(|r| r.is_standing())
            .ok_or(RebootDenied::NotStanding)?;
        let card = self.cards.get_mut(&owner).ok_or(RebootDenied::NoCard)?;

        if card.team_id != record.team_id {
            return Err(RebootDenied::NotTeammate);
        }
        if card.holder.is_some() {
            return Err(RebootDenied::CardTaken);
        }
        if record.position.distance(card.drop_position) > self.rules.card_collection_range {
            return Err(RebootDenied::OutOfRange);
        }

        card.holder = Some(collector);
        debug!(owner = %owner, collector = %collector, "Reboot card collected");
        out.push(ServerMsg::RebootCardCollected {
            owner_id: owner,
            collector_id: collector,
        });
        Ok(())
    }

    /// Lock a beacon to `player` to deliver `owner`'s card
    pub fn start_reboot(
        &mut self,
        now: f32,
        players: &LifecycleTracker,
        player: Uuid,
        beacon_id: u32,
        owner: Uuid,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), RebootDenied> {
        if !self.rules.reboot_active() {
            return Err(RebootDenied::Disabled);
        }
        let position = players
            .get(&player)
            .filter(|r| r.is_standing())
            .ok_or(RebootDenied::NotStanding)?
            .position;
        if self.beacons.iter().any(|b| b.current_user == Some(player)) {
            return Err(RebootDenied::InUse);
        }

        let beacon = self
            .beacons
            .get_mut(beacon_id as usize)
            .ok_or(RebootDenied::UnknownBeacon)?;
        if !beacon.active {
            return Err(RebootDenied::BeaconInactive);
        }
        if now < beacon.cooldown_ends_at {
            return Err(RebootDenied::OnCooldown);
        }
        if beacon.current_user.is_some() {
            return Err(RebootDenied::InUse);
        }
        if !self
            .cards
            .get(&owner)
            .is_some_and(|c| c.holder == Some(player))
        {
            return Err(RebootDenied::NoCard);
        }
        if position.distance(beacon.position) > self.rules.reboot_range {
            return Err(RebootDenied::OutOfRange);
        }

        beacon.current_user = Some(player);
        beacon.target = Some(owner);
        beacon.started_at = now;
        beacon.progress = 0.0;
        beacon.reported_step = 0;

        info!(beacon_id, player_id = %player, owner = %owner, "Reboot started");
        out.push(ServerMsg::RebootStarted {
            beacon_id,
            player_id: player,
            owner_id: owner,
        });
        Ok(())
    }

    /// Switch off every active beacon outside `zone`, cancelling its reboot.
    /// Returns the ids disabled this call.
    pub fn disable_beacons_outside(
        &mut self,
        zone: &Circle,
        out: &mut Vec<ServerMsg>,
    ) -> Vec<u32> {
        if !self.rules.reboot_active() {
            return Vec::new();
        }

        let mut disabled = Vec::new();
        for beacon in self
            .beacons
            .iter_mut()
            .filter(|b| b.active && !zone.contains(b.position))
        {
            Self::cancel_beacon(beacon, "beacon_inactive", out);
            beacon.active = false;
            info!(beacon_id = beacon.id, "Reboot beacon outside safe zone, disabled");
            out.push(ServerMsg::RebootBeaconDisabled {
                beacon_id: beacon.id,
            });
            disabled.push(beacon.id);
        }
        disabled
    }

    /// Expire cards and advance beacons. Returns the players brought back.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        now: f32,
        players: &mut LifecycleTracker,
        rng: &mut R,
        out: &mut Vec<ServerMsg>,
    ) -> Vec<Uuid> {
        self.expire_cards(now, out);

        let mut rebooted = Vec::new();
        for beacon in self.beacons.iter_mut() {
            let (Some(user), Some(owner)) = (beacon.current_user, beacon.target) else {
                continue;
            };

            let failure = match players.get(&user) {
                Some(r) if !r.is_standing() => Some("user_down"),
                Some(r) if r.position.distance(beacon.position) > self.rules.reboot_range => {
                    Some("out_of_range")
                }
                Some(_) if !self.cards.contains_key(&owner) => Some("card_expired"),
                Some(_) => None,
                None => Some("user_down"),
            };
            if let Some(reason) = failure {
                Self::cancel_beacon(beacon, reason, out);
                continue;
            }

            beacon.progress = if self.rules.reboot_duration > 0.0 {
                ((now - beacon.started_at) / self.rules.reboot_duration).min(1.0)
            } else {
                1.0
            };

            if beacon.progress < 1.0 {
                let step = (beacon.progress * PROGRESS_STEPS) as u32;
                if step > beacon.reported_step {
                    beacon.reported_step = step;
                    out.push(ServerMsg::RebootProgress {
                        beacon_id: beacon.id,
                        progress: beacon.progress,
                    });
                }
                continue;
            }

            let spawn = scatter_around(rng, beacon.position, RESPAWN_SPREAD, 1)
                .pop()
                .unwrap_or(beacon.position);
            self.cards.remove(&owner);

            if players.respawn(owner, spawn, self.rules.reboot_health, out) {
                info!(beacon_id = beacon.id, player_id = %owner, "Reboot complete");
                out.push(ServerMsg::RebootCompleted {
                    beacon_id: beacon.id,
                    player_id: owner,
                    position: spawn,
                });
                rebooted.push(owner);
                beacon.cooldown_ends_at = now + self.rules.reboot_cooldown;
                beacon.release();
            } else {
                Self::cancel_beacon(beacon, "target_unavailable", out);
            }
        }

        rebooted
    }

    fn expire_cards(&mut self, now: f32, out: &mut Vec<ServerMsg>) {
        let mut expired: Vec<Uuid> = self
            .cards
            .values()
            .filter(|c| now >= c.expires_at)
            .map(|c| c.owner_id)
            .collect();
        expired.sort();

        for owner in expired {
            self.cards.remove(&owner);
            debug!(owner = %owner, "Reboot card expired");
            out.push(ServerMsg::RebootCardExpired { owner_id: owner });
        }
    }

    fn cancel_beacon(beacon: &mut RebootBeacon, reason: &str, out: &mut Vec<ServerMsg>) {
        let Some(user) = beacon.current_user else {
            return;
        };
        debug!(beacon_id = beacon.id, player_id = %user, reason, "Reboot cancelled");
        out.push(ServerMsg::RebootCancelled {
            beacon_id: beacon.id,
            player_id: user,
            reason: reason.to_string(),
        });
        beacon.release();
    }

    pub fn card(&self, owner: &Uuid) -> Option<&RebootCard> {
        self.cards.get(owner)
    }

    pub fn beacon(&self, id: u32) -> Option<&RebootBeacon> {
        self.beacons.get(id as usize)
    }

    pub fn beacons(&self) -> &[RebootBeacon] {
        &self.beacons
    }
}
