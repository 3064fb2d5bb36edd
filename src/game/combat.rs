//! Combat rules - hit locations, shield absorption, healing caps

use serde::{Deserialize, Serialize};

use crate::config::HitMultipliers;

/// Where a hit landed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitLocation {
    Head,
    Body,
    Limb,
    /// Environmental damage (storm, falls) that ignores location
    None,
}

/// Result of absorbing damage into shield and health
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Absorbed {
    pub shield: f32,
    pub health: f32,
    /// Damage taken by the shield
    pub shield_damage: f32,
    /// Damage taken by health
    pub health_damage: f32,
}

impl Absorbed {
    pub fn is_lethal(&self) -> bool {
        self.health <= 0.0
    }
}

/// Combat rules shared by every damage path
pub struct CombatSystem;

impl CombatSystem {
    /// Damage multiplier for a hit location
    pub fn multiplier(location: HitLocation, multipliers: &HitMultipliers) -> f32 {
        match location {
            HitLocation::Head => multipliers.head,
            HitLocation::Body => multipliers.body,
            HitLocation::Limb => multipliers.limb,
            HitLocation::None => 1.0,
        }
    }

    /// Scale raw damage by hit location, negative amounts count as zero
    pub fn scaled_damage(amount: f32, location: HitLocation, multipliers: &HitMultipliers) -> f32 {
        amount.max(0.0) * Self::multiplier(location, multipliers)
    }

    /// Shield soaks damage first, the remainder comes off health
    pub fn absorb(shield: f32, health: f32, damage: f32) -> Absorbed {
        let shield_damage = damage.min(shield).max(0.0);
        let health_damage = (damage - shield_damage).min(health).max(0.0);
        Absorbed {
            shield: shield - shield_damage,
            health: (health - health_damage).max(0.0),
            shield_damage,
            health_damage,
        }
    }

    /// Add `amount` to `current` without exceeding `max`, returns (new, gained)
    pub fn restore(current: f32, amount: f32, max: f32) -> (f32, f32) {
        let new = (current + amount.max(0.0)).min(max);
        (new, (new - current).max(0.0))
    }

    /// Storm damage for one damage tick
    pub fn storm_damage(damage_per_second: f32, interval: f32) -> f32 {
        damage_per_second * interval
    }
}
