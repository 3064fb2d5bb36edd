//! Gameplay tuning for a match

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{parse_var, ConfigError};

/// Team layout of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Solo,
    Duos,
    Squads,
}

impl MatchMode {
    pub fn team_size(&self) -> usize {
        match self {
            MatchMode::Solo => 1,
            MatchMode::Duos => 2,
            MatchMode::Squads => 4,
        }
    }

    /// Team modes use the downed state; solo eliminates on lethal damage
    pub fn is_team(&self) -> bool {
        self.team_size() > 1
    }
}

impl FromStr for MatchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "solo" => Ok(MatchMode::Solo),
            "duos" | "duo" => Ok(MatchMode::Duos),
            "squads" | "squad" => Ok(MatchMode::Squads),
            _ => Err(()),
        }
    }
}

/// How players enter the map once loading finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    /// Players spawn on the ground, Loading goes straight to Playing
    DirectSpawn,
    /// Players ride a flight across the map and jump out
    AirDrop,
}

impl FromStr for DeployMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" | "direct_spawn" => Ok(DeployMode::DirectSpawn),
            "air_drop" | "airdrop" | "bus" => Ok(DeployMode::AirDrop),
            _ => Err(()),
        }
    }
}

/// One stage of the storm schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StormPhaseConfig {
    /// Seconds the storm holds before shrinking
    pub wait_duration: f32,
    /// Seconds the shrink takes
    pub shrink_duration: f32,
    pub damage_per_second: f32,
    /// Radius at phase start, as a fraction of the map radius
    pub start_radius_fraction: f32,
    /// Radius at phase end, as a fraction of the map radius
    pub end_radius_fraction: f32,
}

impl StormPhaseConfig {
    pub const fn new(
        wait_duration: f32,
        shrink_duration: f32,
        damage_per_second: f32,
        start_radius_fraction: f32,
        end_radius_fraction: f32,
    ) -> Self {
        Self {
            wait_duration,
            shrink_duration,
            damage_per_second,
            start_radius_fraction,
            end_radius_fraction,
        }
    }
}

/// Damage multiplier per hit location
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitMultipliers {
    pub head: f32,
    pub body: f32,
    pub limb: f32,
}

impl Default for HitMultipliers {
    fn default() -> Self {
        Self {
            head: 2.0,
            body: 1.0,
            limb: 0.75,
        }
    }
}

/// Gameplay rules for a match
#[derive(Debug, Clone)]
pub struct MatchRules {
    pub mode: MatchMode,
    pub deploy_mode: DeployMode,

    // Lobby
    pub min_players: usize,
    pub max_players: usize,
    /// Seconds of countdown once the minimum is reached
    pub lobby_countdown: f32,
    /// Fraction of connected players that must be ready to skip the countdown
    pub ready_quorum: Option<f32>,
    /// Suppress the auto-win when only one player started (local testing)
    pub solo_testing: bool,

    // Phase timings
    pub loading_delay: f32,
    pub ending_duration: f32,
    pub reset_delay: f32,

    // Map
    pub map_center: Vec3,
    pub map_radius: f32,

    // Deploy flight
    pub flight_duration: f32,
    pub flight_altitude: f32,
    /// Max distance of the flight line from the map centre, as a fraction of the radius
    pub flight_lateral_jitter: f32,

    // Supply drops
    pub supply_drop_initial: f32,
    pub supply_drop_growth: f32,

    // Storm
    pub storm_phases: Vec<StormPhaseConfig>,
    pub storm_damage_interval: f32,
    /// Margin kept between the next circle edge and the current one when picking a centre
    pub storm_center_buffer: f32,
    /// Margin applied when a picked centre has to be pulled back inside
    pub storm_clamp_buffer: f32,

    // Health
    pub max_health: f32,
    pub max_shield: f32,
    pub hit_multipliers: HitMultipliers,

    // Downed / revive
    pub bleedout_duration: f32,
    /// Bleed multiplier added by each hit on a downed player
    pub downed_bleed_step: f32,
    pub max_bleed_multiplier: f32,
    pub revive_range: f32,
    pub revive_duration: f32,
    pub revive_health: f32,

    // Reboot
    pub reboot_enabled: bool,
    pub card_ttl: f32,
    pub card_collection_range: f32,
    pub reboot_range: f32,
    pub reboot_duration: f32,
    pub reboot_cooldown: f32,
    pub reboot_health: f32,
    pub reboot_beacons: Vec<Vec3>,

    // Loot
    pub loot_scatter_radius: f32,
}

impl MatchRules {
    /// Default rules with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut rules = Self::default();

        if let Some(mode) = parse_var::<MatchMode>("MATCH_MODE")? {
            rules.mode = mode;
        }
        if let Some(deploy) = parse_var::<DeployMode>("DEPLOY_MODE")? {
            rules.deploy_mode = deploy;
        }
        if let Some(min) = parse_var("MIN_PLAYERS")? {
            rules.min_players = min;
        }
        if let Some(max) = parse_var("MAX_PLAYERS")? {
            rules.max_players = max;
        }
        if let Some(secs) = parse_var("LOBBY_COUNTDOWN_SECS")? {
            rules.lobby_countdown = secs;
        }
        if let Some(radius) = parse_var("MAP_RADIUS")? {
            rules.map_radius = radius;
            rules.reboot_beacons = default_beacons(radius);
        }
        if let Some(enabled) = parse_var("REBOOT_ENABLED")? {
            rules.reboot_enabled = enabled;
        }
        if let Some(testing) = parse_var("SOLO_TESTING")? {
            rules.solo_testing = testing;
        }

        Ok(rules)
    }

    /// Check player limits, comeback health and the storm table
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_players == 0 || self.max_players < self.min_players {
            return Err(ConfigError::Invalid("MIN_PLAYERS/MAX_PLAYERS"));
        }

        for (name, health) in [
            ("revive_health", self.revive_health),
            ("reboot_health", self.reboot_health),
        ] {
            if health <= 0.0 || health >= self.max_health {
                return Err(ConfigError::InvalidRule(format!(
                    "{name} must be above 0 and below max_health"
                )));
            }
        }

        let phases = &self.storm_phases;
        let last = phases
            .last()
            .ok_or_else(|| ConfigError::InvalidStormTable("no phases".to_string()))?;

        for (i, phase) in phases.iter().enumerate() {
            let n = i + 1;
            if phase.wait_duration < 0.0 || phase.shrink_duration < 0.0 {
                return Err(ConfigError::InvalidStormTable(format!(
                    "phase {n} has a negative duration"
                )));
            }
            if phase.end_radius_fraction >= phase.start_radius_fraction {
                return Err(ConfigError::InvalidStormTable(format!(
                    "phase {n} does not shrink"
                )));
            }
            if let Some(next) = phases.get(i + 1) {
                if next.start_radius_fraction >= phase.start_radius_fraction
                    || next.end_radius_fraction >= phase.end_radius_fraction
                {
                    return Err(ConfigError::InvalidStormTable(format!(
                        "fractions increase between phase {n} and {}",
                        n + 1
                    )));
                }
            }
        }

        if last.end_radius_fraction != 0.0 {
            return Err(ConfigError::InvalidStormTable(
                "final phase must close to zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether eliminated teammates leave a reboot card behind
    pub fn reboot_active(&self) -> bool {
        self.reboot_enabled && self.mode.is_team()
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        let map_radius = 2000.0;
        Self {
            mode: MatchMode::Squads,
            deploy_mode: DeployMode::AirDrop,

            min_players: 2,
            max_players: 100,
            lobby_countdown: 30.0,
            ready_quorum: Some(1.0),
            solo_testing: false,

            loading_delay: 3.0,
            ending_duration: 10.0,
            reset_delay: 5.0,

            map_center: Vec3::ZERO,
            map_radius,

            flight_duration: 45.0,
            flight_altitude: 800.0,
            flight_lateral_jitter: 0.3,

            supply_drop_initial: 90.0,
            supply_drop_growth: 1.5,

            storm_phases: vec![
                StormPhaseConfig::new(180.0, 120.0, 1.0, 1.0, 0.6),
                StormPhaseConfig::new(120.0, 90.0, 2.0, 0.6, 0.35),
                StormPhaseConfig::new(90.0, 60.0, 5.0, 0.35, 0.18),
                StormPhaseConfig::new(60.0, 45.0, 8.0, 0.18, 0.08),
                StormPhaseConfig::new(45.0, 30.0, 10.0, 0.08, 0.03),
                StormPhaseConfig::new(30.0, 30.0, 15.0, 0.03, 0.0),
            ],
            storm_damage_interval: 1.0,
            storm_center_buffer: 50.0,
            storm_clamp_buffer: 1.0,

            max_health: 100.0,
            max_shield: 100.0,
            hit_multipliers: HitMultipliers::default(),

            bleedout_duration: 90.0,
            downed_bleed_step: 0.25,
            max_bleed_multiplier: 3.0,
            revive_range: 3.0,
            revive_duration: 10.0,
            revive_health: 30.0,

            reboot_enabled: true,
            card_ttl: 90.0,
            card_collection_range: 3.0,
            reboot_range: 4.0,
            reboot_duration: 10.0,
            reboot_cooldown: 30.0,
            reboot_health: 50.0,
            reboot_beacons: default_beacons(map_radius),

            loot_scatter_radius: 2.0,
        }
    }
}

/// Four beacons on the cardinal points at half the map radius
fn default_beacons(map_radius: f32) -> Vec<Vec3> {
    let d = map_radius * 0.5;
    vec![
        Vec3::new(d, 0.0, 0.0),
        Vec3::new(-d, 0.0, 0.0),
        Vec3::new(0.0, 0.0, d),
        Vec3::new(0.0, 0.0, -d),
    ]
}
