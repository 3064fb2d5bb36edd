//! Player lifecycle tracker
//!
//! Sole owner of every [`PlayerMatchRecord`]. Other subsystems read records
//! through [`LifecycleTracker::get`] and change them only through the
//! operations here.
//!
//! Status flow: Alive -> Downed (team modes) -> Alive | Eliminated, and
//! Eliminated -> Alive only through a reboot.

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MatchRules;
use crate::ws::protocol::ServerMsg;

use super::combat::{CombatSystem, HitLocation};
use super::geometry::scatter_around;

/// Coarse status derived from a record's flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifeStatus {
    Alive,
    Downed,
    Eliminated,
}

/// What ended a player's run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EliminationSource {
    Weapon,
    Storm,
    Bleedout,
    TeamWipe,
    Disconnect,
    Admin,
}

/// Inventory contents as reported by the inventory collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_id: String,
    pub quantity: u32,
}

/// An item lying in the world after a death drop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldItem {
    pub item_id: String,
    pub quantity: u32,
    pub position: Vec3,
}

/// Who or what dealt damage
#[derive(Debug, Clone, PartialEq)]
pub struct DamageSource {
    pub attacker: Option<Uuid>,
    pub weapon: Option<String>,
    pub source: EliminationSource,
}

impl DamageSource {
    pub fn weapon(attacker: Uuid, weapon: impl Into<String>) -> Self {
        Self {
            attacker: Some(attacker),
            weapon: Some(weapon.into()),
            source: EliminationSource::Weapon,
        }
    }

    pub fn environment(source: EliminationSource) -> Self {
        Self {
            attacker: None,
            weapon: None,
            source,
        }
    }
}

/// Per-player state for one match
#[derive(Debug, Clone)]
pub struct PlayerMatchRecord {
    pub player_id: Uuid,
    pub display_name: String,
    pub team_id: u32,

    /// Still in the match (standing or downed)
    pub alive: bool,
    pub downed: bool,
    pub eliminated: bool,

    /// Health while standing, remaining downed health while downed
    pub health: f32,
    pub shield: f32,

    pub downed_since: Option<f32>,
    pub bleedout_deadline: Option<f32>,
    /// Multiplier on the base bleed rate, only ever raised while downed
    pub bleed_multiplier: f32,
    /// Last attacker to down this player, credited if they bleed out
    pub downed_by: Option<(Uuid, Option<String>)>,
    /// Teammate currently reviving this player
    pub reviver: Option<Uuid>,

    pub placement: Option<u32>,
    pub position: Vec3,
    pub inventory: Vec<ItemStack>,
    pub invincible: bool,

    pub kills: u32,
    pub damage_dealt: f32,
    pub damage_taken: f32,
}

impl PlayerMatchRecord {
    fn new(player_id: Uuid, display_name: String, team_id: u32, position: Vec3, health: f32) -> Self {
        Self {
            player_id,
            display_name,
            team_id,
            alive: true,
            downed: false,
            eliminated: false,
            health,
            shield: 0.0,
            downed_since: None,
            bleedout_deadline: None,
            bleed_multiplier: 1.0,
            downed_by: None,
            reviver: None,
            placement: None,
            position,
            inventory: Vec::new(),
            invincible: false,
            kills: 0,
            damage_dealt: 0.0,
            damage_taken: 0.0,
        }
    }

    pub fn status(&self) -> LifeStatus {
        if self.eliminated {
            LifeStatus::Eliminated
        } else if self.downed {
            LifeStatus::Downed
        } else {
            LifeStatus::Alive
        }
    }

    /// In the match and not downed
    pub fn is_standing(&self) -> bool {
        self.alive && !self.downed
    }

    fn clear_downed(&mut self) {
        self.downed = false;
        self.downed_since = None;
        self.bleedout_deadline = None;
        self.bleed_multiplier = 1.0;
        self.downed_by = None;
        self.reviver = None;
    }
}

/// Logged elimination
#[derive(Debug, Clone, PartialEq)]
pub struct EliminationRecord {
    pub victim_id: Uuid,
    pub killer_id: Option<Uuid>,
    pub weapon: Option<String>,
    pub source: EliminationSource,
    pub placement: u32,
    pub at: f32,
}

/// Result of an elimination, for the subsystems that react to it
#[derive(Debug, Clone, PartialEq)]
pub struct Elimination {
    pub victim_id: Uuid,
    pub team_id: u32,
    pub killer_id: Option<Uuid>,
    pub source: EliminationSource,
    pub placement: u32,
    pub position: Vec3,
    pub dropped: Vec<WorldItem>,
}

/// What a damage event did
#[derive(Debug, Clone, PartialEq)]
pub enum DamageOutcome {
    /// Unknown, eliminated or invincible target, or nothing to apply
    Ignored,
    Damaged {
        shield_damage: f32,
        health_damage: f32,
    },
    /// Standing player knocked into the downed state
    Downed,
    /// Downed player hit but not finished
    DownedDamaged {
        remaining: f32,
        bleed_multiplier: f32,
    },
    Eliminated(Elimination),
}

/// Owns the per-player match records
#[derive(Debug)]
pub struct LifecycleTracker {
    rules: Arc<MatchRules>,
    records: HashMap<Uuid, PlayerMatchRecord>,
    /// Registration order, for deterministic iteration
    order: Vec<Uuid>,
    next_placement: u32,
    eliminations: Vec<EliminationRecord>,
}

impl LifecycleTracker {
    pub fn new(rules: Arc<MatchRules>) -> Self {
        Self {
            rules,
            records: HashMap::new(),
            order: Vec::new(),
            next_placement: 0,
            eliminations: Vec::new(),
        }
    }

    /// Drop every record
    pub fn reset(&mut self) {
        self.records.clear();
        self.order.clear();
        self.next_placement = 0;
        self.eliminations.clear();
    }

    /// Register a participant as alive. Returns false if already registered.
    pub fn register(
        &mut self,
        player_id: Uuid,
        display_name: String,
        team_id: u32,
        position: Vec3,
    ) -> bool {
        if self.records.contains_key(&player_id) {
            return false;
        }

        let record = PlayerMatchRecord::new(
            player_id,
            display_name,
            team_id,
            position,
            self.rules.max_health,
        );
        self.records.insert(player_id, record);
        self.order.push(player_id);
        self.next_placement += 1;
        true
    }

    pub fn get(&self, player_id: &Uuid) -> Option<&PlayerMatchRecord> {
        self.records.get(player_id)
    }

    /// Records in registration order
    pub fn records(&self) -> impl Iterator<Item = &PlayerMatchRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn contains(&self, player_id: &Uuid) -> bool {
        self.records.contains_key(player_id)
    }

    pub fn set_position(&mut self, player_id: Uuid, position: Vec3) {
        if let Some(record) = self.records.get_mut(&player_id) {
            if record.alive {
                record.position = position;
            }
        }
    }

    pub fn set_inventory(&mut self, player_id: Uuid, items: Vec<ItemStack>) {
        if let Some(record) = self.records.get_mut(&player_id) {
            if record.alive {
                record.inventory = items;
            }
        }
    }

    /// Toggle damage immunity, returns false for unknown players
    pub fn set_invincible(&mut self, player_id: Uuid, enabled: bool) -> bool {
        match self.records.get_mut(&player_id) {
            Some(record) => {
                record.invincible = enabled;
                true
            }
            None => false,
        }
    }

    /// Mark or clear the teammate reviving `target`
    pub fn set_reviver(&mut self, target: Uuid, reviver: Option<Uuid>) {
        if let Some(record) = self.records.get_mut(&target) {
            record.reviver = reviver.filter(|_| record.downed);
        }
    }

    /// Apply a hit. Damage to eliminated or unknown players is ignored.
    pub fn apply_damage<R: Rng + ?Sized>(
        &mut self,
        now: f32,
        victim: Uuid,
        amount: f32,
        location: HitLocation,
        source: &DamageSource,
        rng: &mut R,
        out: &mut Vec<ServerMsg>,
    ) -> DamageOutcome {
        let scaled = CombatSystem::scaled_damage(amount, location, &self.rules.hit_multipliers);
        let team_mode = self.rules.mode.is_team();
        let base_rate = self.base_bleed_rate();

        let Some(record) = self.records.get(&victim) else {
            return DamageOutcome::Ignored;
        };
        if record.eliminated || record.invincible || scaled <= 0.0 {
            return DamageOutcome::Ignored;
        }
        let was_downed = record.downed;
        let team_id = record.team_id;
        let has_standing_teammate = team_mode && self.team_has_standing_except(team_id, victim);

        if let Some(attacker) = source.attacker.and_then(|id| self.records.get_mut(&id)) {
            attacker.damage_dealt += scaled;
        }

        let Some(record) = self.records.get_mut(&victim) else {
            return DamageOutcome::Ignored;
        };
        record.damage_taken += scaled;

        if was_downed {
            record.health -= scaled;
            if record.health <= 0.0 {
                return self.finish(now, victim, source, rng, out);
            }

            record.bleed_multiplier = (record.bleed_multiplier + self.rules.downed_bleed_step)
                .min(self.rules.max_bleed_multiplier);
            let rate = base_rate * record.bleed_multiplier;
            record.bleedout_deadline = Some(now + record.health / rate);
            if source.attacker.is_some() {
                record.downed_by = source.attacker.map(|id| (id, source.weapon.clone()));
            }

            return DamageOutcome::DownedDamaged {
                remaining: record.health,
                bleed_multiplier: record.bleed_multiplier,
            };
        }

        let absorbed = CombatSystem::absorb(record.shield, record.health, scaled);
        record.shield = absorbed.shield;
        record.health = absorbed.health;

        if !absorbed.is_lethal() {
            return DamageOutcome::Damaged {
                shield_damage: absorbed.shield_damage,
                health_damage: absorbed.health_damage,
            };
        }

        if !has_standing_teammate {
            return self.finish(now, victim, source, rng, out);
        }

        record.downed = true;
        record.shield = 0.0;
        record.health = self.rules.max_health * 0.5;
        record.downed_since = Some(now);
        record.bleed_multiplier = 1.0;
        record.bleedout_deadline = Some(now + self.rules.bleedout_duration);
        record.downed_by = source.attacker.map(|id| (id, source.weapon.clone()));

        info!(player_id = %victim, "Player downed");
        out.push(ServerMsg::PlayerDowned {
            player_id: victim,
            position: record.position,
        });
        DamageOutcome::Downed
    }

    fn finish<R: Rng + ?Sized>(
        &mut self,
        now: f32,
        victim: Uuid,
        source: &DamageSource,
        rng: &mut R,
        out: &mut Vec<ServerMsg>,
    ) -> DamageOutcome {
        match self.eliminate(now, victim, source, rng, out) {
            Some(elimination) => DamageOutcome::Eliminated(elimination),
            None => DamageOutcome::Ignored,
        }
    }

    /// Remove a player from the alive set and assign the next placement.
    ///
    /// Returns `None` for unknown or already eliminated players.
    pub fn eliminate<R: Rng + ?Sized>(
        &mut self,
        now: f32,
        victim: Uuid,
        source: &DamageSource,
        rng: &mut R,
        out: &mut Vec<ServerMsg>,
    ) -> Option<Elimination> {
        let scatter_radius = self.rules.loot_scatter_radius;
        let placement = self.next_placement.max(1);

        let record = self.records.get_mut(&victim)?;
        if record.eliminated {
            return None;
        }

        // Bleed-outs and wipes credit whoever downed the player
        let (killer_id, weapon) = match (&source.attacker, &record.downed_by) {
            (Some(attacker), _) => (Some(*attacker), source.weapon.clone()),
            (None, Some((downer, weapon))) => (Some(*downer), weapon.clone()),
            (None, None) => (None, source.weapon.clone()),
        };

        record.clear_downed();
        record.alive = false;
        record.eliminated = true;
        record.health = 0.0;
        record.shield = 0.0;
        record.placement = Some(placement);

        let position = record.position;
        let team_id = record.team_id;
        let items = std::mem::take(&mut record.inventory);

        self.next_placement = self.next_placement.saturating_sub(1);

        let spots = scatter_around(rng, position, scatter_radius, items.len());
        let dropped: Vec<WorldItem> = items
            .into_iter()
            .zip(spots)
            .map(|(item, spot)| WorldItem {
                item_id: item.item_id,
                quantity: item.quantity,
                position: spot,
            })
            .collect();

        if let Some(killer) = killer_id.filter(|id| *id != victim) {
            if let Some(killer) = self.records.get_mut(&killer) {
                killer.kills += 1;
            }
        }

        self.eliminations.push(EliminationRecord {
            victim_id: victim,
            killer_id,
            weapon: weapon.clone(),
            source: source.source,
            placement,
            at: now,
        });

        info!(
            player_id = %victim,
            placement,
            source = ?source.source,
            "Player eliminated"
        );

        out.push(ServerMsg::PlayerEliminated {
            victim_id: victim,
            killer_id,
            weapon,
            source: source.source,
            placement,
        });
        if !dropped.is_empty() {
            out.push(ServerMsg::LootDropped {
                owner_id: victim,
                items: dropped.clone(),
            });
        }
        out.push(self.count_update());

        Some(Elimination {
            victim_id: victim,
            team_id,
            killer_id,
            source: source.source,
            placement,
            position,
            dropped,
        })
    }

    /// Drain downed health, returns players whose bleed-out deadline has passed
    pub fn tick_downed(&mut self, now: f32) -> Vec<Uuid> {
        let base = self.base_bleed_rate();
        let mut expired = Vec::new();

        for id in &self.order {
            let Some(record) = self.records.get_mut(id) else {
                continue;
            };
            if !record.downed {
                continue;
            }
            let Some(deadline) = record.bleedout_deadline else {
                continue;
            };

            if now >= deadline {
                record.health = 0.0;
                expired.push(*id);
            } else {
                record.health = (deadline - now) * base * record.bleed_multiplier;
            }
        }

        expired
    }

    /// Downed -> Alive with `health`. Returns the revived player's position.
    pub fn revive(&mut self, target: Uuid, health: f32, out: &mut Vec<ServerMsg>) -> Option<Vec3> {
        let max_health = self.rules.max_health;
        let record = self.records.get_mut(&target)?;
        if !record.downed || record.eliminated {
            return None;
        }

        record.clear_downed();
        record.health = health.clamp(1.0, max_health);

        info!(player_id = %target, "Player revived");
        out.push(ServerMsg::PlayerRevived {
            player_id: target,
            position: record.position,
        });
        Some(record.position)
    }

    /// Eliminated -> Alive at `position` with `health`.
    ///
    /// The vacated placement is closed up: lower placements move up one and
    /// the counter moves back, so placements stay unique.
    pub fn respawn(
        &mut self,
        player_id: Uuid,
        position: Vec3,
        health: f32,
        out: &mut Vec<ServerMsg>,
    ) -> bool {
        let max_health = self.rules.max_health;
        let Some(record) = self.records.get_mut(&player_id) else {
            return false;
        };
        if !record.eliminated {
            return false;
        }

        let vacated = record.placement.take().unwrap_or(0);
        record.alive = true;
        record.eliminated = false;
        record.clear_downed();
        record.health = health.clamp(1.0, max_health);
        record.shield = 0.0;
        record.position = position;

        for other in self.records.values_mut() {
            if let Some(placement) = other.placement.as_mut() {
                if other.eliminated && *placement < vacated {
                    *placement += 1;
                }
            }
        }
        self.next_placement += 1;

        debug!(player_id = %player_id, vacated, "Player respawned");
        out.push(self.count_update());
        true
    }

    /// Restore health to a standing player, returns the amount gained
    pub fn heal(&mut self, player_id: Uuid, amount: f32) -> f32 {
        let max = self.rules.max_health;
        match self.records.get_mut(&player_id) {
            Some(record) if record.is_standing() => {
                let (health, gained) = CombatSystem::restore(record.health, amount, max);
                record.health = health;
                gained
            }
            _ => 0.0,
        }
    }

    /// Add shield to a standing player, returns the amount gained
    pub fn add_shield(&mut self, player_id: Uuid, amount: f32) -> f32 {
        let max = self.rules.max_shield;
        match self.records.get_mut(&player_id) {
            Some(record) if record.is_standing() => {
                let (shield, gained) = CombatSystem::restore(record.shield, amount, max);
                record.shield = shield;
                gained
            }
            _ => 0.0,
        }
    }

    /// Give placement 1 to every remaining member of the winning team
    pub fn award_win(&mut self, team_id: u32) {
        for record in self.records.values_mut() {
            if record.alive && record.team_id == team_id {
                record.placement = Some(1);
            }
        }
    }

    /// Players still in the match (standing or downed)
    pub fn alive_count(&self) -> usize {
        self.records.values().filter(|r| r.alive).count()
    }

    pub fn total_count(&self) -> usize {
        self.records.len()
    }

    pub fn alive_ids(&self) -> Vec<Uuid> {
        self.records().filter(|r| r.alive).map(|r| r.player_id).collect()
    }

    /// Positions of everyone the storm can hurt
    pub fn alive_positions(&self) -> Vec<(Uuid, Vec3)> {
        self.records()
            .filter(|r| r.alive)
            .map(|r| (r.player_id, r.position))
            .collect()
    }

    /// Teams with at least one member still in the match
    pub fn remaining_teams(&self) -> BTreeSet<u32> {
        self.records
            .values()
            .filter(|r| r.alive)
            .map(|r| r.team_id)
            .collect()
    }

    pub fn is_teammate(&self, a: &Uuid, b: &Uuid) -> bool {
        match (self.records.get(a), self.records.get(b)) {
            (Some(a), Some(b)) => a.team_id == b.team_id,
            _ => false,
        }
    }

    pub fn team_has_standing(&self, team_id: u32) -> bool {
        self.records
            .values()
            .any(|r| r.team_id == team_id && r.is_standing())
    }

    fn team_has_standing_except(&self, team_id: u32, excluded: Uuid) -> bool {
        self.records
            .values()
            .any(|r| r.team_id == team_id && r.player_id != excluded && r.is_standing())
    }

    /// Downed members of a team, in registration order
    pub fn downed_members(&self, team_id: u32) -> Vec<Uuid> {
        self.records()
            .filter(|r| r.team_id == team_id && r.downed && r.alive)
            .map(|r| r.player_id)
            .collect()
    }

    pub fn eliminations(&self) -> &[EliminationRecord] {
        &self.eliminations
    }

    pub fn count_update(&self) -> ServerMsg {
        ServerMsg::PlayerCountUpdate {
            alive_count: self.alive_count(),
            total_count: self.total_count(),
        }
    }

    /// Downed health lost per second at multiplier 1
    fn base_bleed_rate(&self) -> f32 {
        let pool = self.rules.max_health * 0.5;
        pool / self.rules.bleedout_duration.max(f32::EPSILON)
    }
}
