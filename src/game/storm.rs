//! Safe-zone (storm) controller
//!
//! Owns the three live circles of a match: `current` (authoritative and
//! interpolated every tick), `next` (the target of the active shrink) and
//! `shrink_start` (a snapshot of `current` taken when a shrink begins, used
//! as the interpolation source). Radii never grow over a match.

use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MatchRules, StormPhaseConfig};
use crate::ws::protocol::{ServerMsg, StormState};

use super::combat::CombatSystem;
use super::geometry::{horizontal_direction, horizontal_distance, Circle};

/// Where the storm is within its current phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StormSubState {
    /// Not started yet
    Idle,
    /// Holding before the shrink
    Waiting,
    /// Interpolating towards the next circle
    Shrinking,
    /// Final phase complete, zone fully closed
    Closed,
}

/// Storm damage owed to one player after a damage tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StormDamage {
    pub player_id: Uuid,
    pub amount: f32,
}

/// Pick the centre of the next circle.
///
/// The radial weight is squared so picks cluster towards the current centre.
/// If the result would poke out of the current circle it is pulled back along
/// the same direction so it fits with `clamp_buffer` to spare.
pub fn select_next_center<R: Rng + ?Sized>(
    rng: &mut R,
    current: &Circle,
    next_radius: f32,
    safety_buffer: f32,
    clamp_buffer: f32,
) -> Vec3 {
    let max_offset = (current.radius - next_radius - safety_buffer).max(0.0);
    let angle = rng.gen_range(0.0..TAU);
    let weight = rng.gen::<f32>().powi(2);
    let distance = weight * max_offset;

    let direction = horizontal_direction(angle);
    let candidate = current.center + direction * distance;

    if horizontal_distance(candidate, current.center) + next_radius > current.radius {
        let allowed = (current.radius - next_radius - clamp_buffer).max(0.0);
        return current.center + direction * allowed;
    }

    candidate
}

/// Shrinking safe zone for one match
#[derive(Debug)]
pub struct StormController {
    phases: Vec<StormPhaseConfig>,
    damage_interval: f32,
    center_buffer: f32,
    clamp_buffer: f32,

    map_center: Vec3,
    map_radius: f32,

    current: Circle,
    next: Circle,
    shrink_start: Circle,

    /// 1-indexed active phase, 0 before the first phase
    phase: usize,
    sub_state: StormSubState,
    timer: f32,
    damage_accumulator: f32,

    rng: ChaCha8Rng,
}

impl StormController {
    pub fn new(rules: &MatchRules, seed: u64) -> Self {
        let full = Circle::new(rules.map_center, rules.map_radius);
        Self {
            phases: rules.storm_phases.clone(),
            damage_interval: rules.storm_damage_interval,
            center_buffer: rules.storm_center_buffer,
            clamp_buffer: rules.storm_clamp_buffer,
            map_center: rules.map_center,
            map_radius: rules.map_radius,
            current: full,
            next: full,
            shrink_start: full,
            phase: 0,
            sub_state: StormSubState::Idle,
            timer: 0.0,
            damage_accumulator: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Reset every circle to the full map
    pub fn initialize(&mut self, map_center: Vec3, map_radius: f32) {
        self.map_center = map_center;
        self.map_radius = map_radius.max(0.0);

        let full = Circle::new(map_center, self.map_radius);
        self.current = full;
        self.next = full;
        self.shrink_start = full;
        self.phase = 0;
        self.sub_state = StormSubState::Idle;
        self.timer = 0.0;
        self.damage_accumulator = 0.0;
    }

    pub fn reset(&mut self) {
        self.initialize(self.map_center, self.map_radius);
    }

    /// Begin phase `n` (1-indexed). Out-of-range phases are a logged no-op.
    pub fn start_phase(&mut self, n: usize, out: &mut Vec<ServerMsg>) -> bool {
        let Some(config) = n.checked_sub(1).and_then(|i| self.phases.get(i)).copied() else {
            warn!(phase = n, phases = self.phases.len(), "Storm phase out of range");
            return false;
        };

        self.phase = n;
        self.sub_state = StormSubState::Waiting;
        self.timer = config.wait_duration;

        let next_radius = (self.map_radius * config.end_radius_fraction).min(self.current.radius);
        let next_center = select_next_center(
            &mut self.rng,
            &self.current,
            next_radius,
            self.center_buffer,
            self.clamp_buffer,
        );
        self.next = Circle::new(next_center, next_radius);
        self.shrink_start = self.current;

        info!(
            phase = n,
            wait = config.wait_duration,
            next_radius = self.next.radius,
            "Storm phase started"
        );
        out.push(ServerMsg::StormUpdate(self.state()));
        true
    }

    /// Advance timers and interpolation, returns damage owed to players outside the zone
    pub fn update(
        &mut self,
        dt: f32,
        positions: &[(Uuid, Vec3)],
        out: &mut Vec<ServerMsg>,
    ) -> Vec<StormDamage> {
        if self.sub_state == StormSubState::Idle {
            return Vec::new();
        }

        self.timer -= dt;

        // Time a tick runs past the end of a timer carries into the next one
        if self.sub_state == StormSubState::Waiting && self.timer <= 0.0 {
            self.sub_state = StormSubState::Shrinking;
            self.timer += self.active_phase().map(|p| p.shrink_duration).unwrap_or(0.0);
            self.shrink_start = self.current;
            debug!(phase = self.phase, "Storm shrinking");
            out.push(ServerMsg::StormUpdate(self.state()));
        }

        if self.sub_state == StormSubState::Shrinking {
            let shrink_duration = self.active_phase().map(|p| p.shrink_duration).unwrap_or(0.0);
            let progress = if shrink_duration > 0.0 {
                (1.0 - self.timer / shrink_duration).clamp(0.0, 1.0)
            } else {
                1.0
            };
            self.current = self.shrink_start.lerp(&self.next, progress);

            if self.timer <= 0.0 {
                let overshoot = -self.timer;
                self.current = self.next;
                debug!(phase = self.phase, radius = self.current.radius, "Storm phase complete");

                if self.phase < self.phases.len() {
                    if self.start_phase(self.phase + 1, out) {
                        self.timer -= overshoot;
                    }
                } else {
                    self.sub_state = StormSubState::Closed;
                    self.timer = 0.0;
                    info!("Storm fully closed");
                    out.push(ServerMsg::StormUpdate(self.state()));
                }
            }
        }

        self.damage_tick(dt, positions, out)
    }

    /// Fixed-interval damage, independent of the waiting/shrinking sub-state
    fn damage_tick(
        &mut self,
        dt: f32,
        positions: &[(Uuid, Vec3)],
        out: &mut Vec<ServerMsg>,
    ) -> Vec<StormDamage> {
        self.damage_accumulator += dt;
        let interval = self.damage_interval.max(f32::EPSILON);

        let mut ticks = 0u32;
        while self.damage_accumulator >= interval {
            self.damage_accumulator -= interval;
            ticks += 1;
        }
        if ticks == 0 {
            return Vec::new();
        }

        let dps = self.active_phase().map(|p| p.damage_per_second).unwrap_or(0.0);
        let amount = CombatSystem::storm_damage(dps, interval) * ticks as f32;

        let damage = positions
            .iter()
            .filter(|(_, pos)| !self.is_in_safe_zone(*pos))
            .map(|(player_id, _)| StormDamage {
                player_id: *player_id,
                amount,
            })
            .collect();

        out.push(ServerMsg::StormUpdate(self.state()));
        damage
    }

    /// Horizontal distance from the current centre within the current radius
    pub fn is_in_safe_zone(&self, position: Vec3) -> bool {
        self.current.contains(position)
    }

    fn active_phase(&self) -> Option<&StormPhaseConfig> {
        self.phase.checked_sub(1).and_then(|i| self.phases.get(i))
    }

    pub fn current_circle(&self) -> Circle {
        self.current
    }

    pub fn next_circle(&self) -> Circle {
        self.next
    }

    pub fn shrink_start_circle(&self) -> Circle {
        self.shrink_start
    }

    pub fn phase(&self) -> usize {
        self.phase
    }

    pub fn sub_state(&self) -> StormSubState {
        self.sub_state
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    /// Broadcast view of the storm
    pub fn state(&self) -> StormState {
        StormState {
            phase: self.phase,
            sub_state: self.sub_state,
            center: self.current.center,
            radius: self.current.radius,
            next_center: self.next.center,
            next_radius: self.next.radius,
            seconds_remaining: self.timer.max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_with_phases(phases: Vec<StormPhaseConfig>) -> MatchRules {
        MatchRules {
            map_radius: 2000.0,
            storm_phases: phases,
            ..MatchRules::default()
        }
    }

    fn scenario_storm() -> StormController {
        let rules = rules_with_phases(vec![
            StormPhaseConfig::new(180.0, 120.0, 1.0, 1.0, 0.6),
            StormPhaseConfig::new(60.0, 60.0, 5.0, 0.6, 0.0),
        ]);
        let mut storm = StormController::new(&rules, 42);
        storm.initialize(Vec3::ZERO, 2000.0);
        storm
    }

    #[test]
    fn test_phase_one_next_radius_and_midpoint() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();

        assert!(storm.start_phase(1, &mut out));
        assert!((storm.next_circle().radius - 1200.0).abs() < 1e-3);
        assert_eq!(storm.sub_state(), StormSubState::Waiting);

        storm.update(180.0, &[], &mut out);
        assert_eq!(storm.sub_state(), StormSubState::Shrinking);

        storm.update(60.0, &[], &mut out);
        assert!((storm.current_circle().radius - 1600.0).abs() < 1.0);
    }

    #[test]
    fn test_coarse_ticks_keep_shrink_on_schedule() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();
        storm.start_phase(1, &mut out);

        // 180s wait ends 4s into the 23rd tick
        for _ in 0..30 {
            storm.update(8.0, &[], &mut out);
        }
        assert_eq!(storm.sub_state(), StormSubState::Shrinking);
        assert!((storm.current_circle().radius - 1600.0).abs() < 1.0);
    }

    #[test]
    fn test_out_of_range_phase_is_noop() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();

        assert!(!storm.start_phase(0, &mut out));
        assert!(!storm.start_phase(3, &mut out));
        assert!(out.is_empty());
        assert_eq!(storm.phase(), 0);
        assert_eq!(storm.sub_state(), StormSubState::Idle);
    }

    #[test]
    fn test_next_center_always_fits() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let current = Circle::new(Vec3::new(120.0, 0.0, -40.0), 1000.0);
        for next_radius in [0.0, 10.0, 400.0, 900.0, 990.0, 1000.0] {
            for _ in 0..200 {
                let center = select_next_center(&mut rng, &current, next_radius, 50.0, 1.0);
                let offset = horizontal_distance(center, current.center);
                assert!(offset + next_radius <= current.radius + 1e-3);
            }
        }
    }

    #[test]
    fn test_negative_buffer_gets_clamped_inside() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let current = Circle::new(Vec3::ZERO, 100.0);
        for _ in 0..200 {
            let center = select_next_center(&mut rng, &current, 50.0, -500.0, 1.0);
            assert!(horizontal_distance(center, current.center) + 50.0 <= 100.0 + 1e-3);
        }
    }

    #[test]
    fn test_shrink_radius_stays_between_bounds() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();
        storm.start_phase(1, &mut out);
        storm.update(180.0, &[], &mut out);

        let start = storm.shrink_start_circle().radius;
        let end = storm.next_circle().radius;
        assert!(end <= start);

        for _ in 0..130 {
            storm.update(1.0, &[], &mut out);
            let radius = storm.current_circle().radius;
            if storm.phase() == 1 {
                assert!(radius <= start + 1e-3 && radius >= end - 1e-3);
            }
        }
    }

    #[test]
    fn test_radius_never_increases_over_all_phases() {
        let rules = MatchRules::default();
        let mut storm = StormController::new(&rules, 5);
        storm.initialize(Vec3::ZERO, rules.map_radius);
        let mut out = Vec::new();
        storm.start_phase(1, &mut out);

        let mut last = storm.current_circle().radius;
        for _ in 0..2000 {
            storm.update(1.0, &[], &mut out);
            let radius = storm.current_circle().radius;
            assert!(radius <= last + 1e-3);
            assert!(storm.next_circle().radius <= radius + 1e-3);
            last = radius;
        }
        assert_eq!(storm.sub_state(), StormSubState::Closed);
        assert!(storm.current_circle().radius.abs() < 1e-3);
    }

    #[test]
    fn test_phase_completion_snaps_and_advances() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();
        storm.start_phase(1, &mut out);
        let target = storm.next_circle();

        storm.update(180.0, &[], &mut out);
        storm.update(120.0, &[], &mut out);

        assert_eq!(storm.phase(), 2);
        assert_eq!(storm.sub_state(), StormSubState::Waiting);
        assert_eq!(storm.shrink_start_circle(), target);
        assert!((storm.current_circle().radius - target.radius).abs() < 1e-6);
    }

    #[test]
    fn test_damage_only_outside_zone_horizontally() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();
        storm.start_phase(1, &mut out);

        let inside_high = Uuid::from_u128(1);
        let outside = Uuid::from_u128(2);
        let positions = vec![
            (inside_high, Vec3::new(0.0, 5000.0, 0.0)),
            (outside, Vec3::new(2500.0, 0.0, 0.0)),
        ];

        let damage = storm.update(0.5, &positions, &mut out);
        assert!(damage.is_empty());

        let damage = storm.update(0.5, &positions, &mut out);
        assert_eq!(damage.len(), 1);
        assert_eq!(damage[0].player_id, outside);
        assert!((damage[0].amount - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_no_damage_before_storm_starts() {
        let mut storm = scenario_storm();
        let mut out = Vec::new();
        let positions = vec![(Uuid::from_u128(1), Vec3::new(9999.0, 0.0, 0.0))];
        assert!(storm.update(5.0, &positions, &mut out).is_empty());
        assert!(out.is_empty());
    }
}
