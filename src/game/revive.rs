//! Crawl-revive of downed teammates
//!
//! Attempts are polled every tick rather than signalled: an attempt that
//! fails its checks on any single tick is cancelled and removed, never paused.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MatchRules;
use crate::ws::protocol::ServerMsg;

use super::lifecycle::{DamageSource, Elimination, EliminationSource, LifecycleTracker};

/// Why a revive request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReviveDenied {
    #[error("target is not downed")]
    TargetNotDowned,

    #[error("reviver must be standing")]
    ReviverNotStanding,

    #[error("target is not a teammate")]
    NotTeammate,

    #[error("target is out of range")]
    OutOfRange,

    #[error("target is already being revived")]
    AlreadyBeingRevived,

    #[error("already reviving another teammate")]
    Busy,
}

/// A revive in progress, keyed by reviver
#[derive(Debug, Clone, PartialEq)]
pub struct ReviveAttempt {
    pub reviver: Uuid,
    pub target: Uuid,
    pub start_time: f32,
    pub required_duration: f32,
    pub progress: f32,
}

#[derive(Debug)]
pub struct ReviveSystem {
    rules: Arc<MatchRules>,
    attempts: HashMap<Uuid, ReviveAttempt>,
}

impl ReviveSystem {
    pub fn new(rules: Arc<MatchRules>) -> Self {
        Self {
            rules,
            attempts: HashMap::new(),
        }
    }

    pub fn reset(&mut self) {
        self.attempts.clear();
    }

    /// Begin reviving `target`. At most one attempt per downed player.
    pub fn start_revive(
        &mut self,
        now: f32,
        players: &mut LifecycleTracker,
        reviver: Uuid,
        target: Uuid,
        out: &mut Vec<ServerMsg>,
    ) -> Result<(), ReviveDenied> {
        let target_record = players
            .get(&target)
            .filter(|r| r.downed && r.alive)
            .ok_or(ReviveDenied::TargetNotDowned)?;
        let reviver_record = players
            .get(&reviver)
            .filter(|r| r.is_standing())
            .ok_or(ReviveDenied::ReviverNotStanding)?;

        if reviver_record.team_id != target_record.team_id {
            return Err(ReviveDenied::NotTeammate);
        }
        if reviver_record.position.distance(target_record.position) > self.rules.revive_range {
            return Err(ReviveDenied::OutOfRange);
        }
        if target_record.reviver.is_some() {
            return Err(ReviveDenied::AlreadyBeingRevived);
        }
        if self.attempts.contains_key(&reviver) {
            return Err(ReviveDenied::Busy);
        }

        let duration = self.rules.revive_duration;
        self.attempts.insert(
            reviver,
            ReviveAttempt {
                reviver,
                target,
                start_time: now,
                required_duration: duration,
                progress: 0.0,
            },
        );
        players.set_reviver(target, Some(reviver));

        debug!(reviver = %reviver, target = %target, "Revive started");
        out.push(ServerMsg::ReviveStarted {
            reviver_id: reviver,
            target_id: target,
            duration,
        });
        Ok(())
    }

    /// Cancel the attempt held by `reviver`, notifying both players
    pub fn cancel(
        &mut self,
        players: &mut LifecycleTracker,
        reviver: Uuid,
        reason: &str,
        out: &mut Vec<ServerMsg>,
    ) -> bool {
        let Some(attempt) = self.attempts.remove(&reviver) else {
            return false;
        };
        players.set_reviver(attempt.target, None);

        debug!(reviver = %reviver, target = %attempt.target, reason, "Revive cancelled");
        out.push(ServerMsg::ReviveCancelled {
            reviver_id: reviver,
            target_id: attempt.target,
            reason: reason.to_string(),
        });
        true
    }

    /// Cancel any attempt where `player` is the reviver or the target
    pub fn cancel_involving(
        &mut self,
        players: &mut LifecycleTracker,
        player: Uuid,
        reason: &str,
        out: &mut Vec<ServerMsg>,
    ) {
        let mut revivers: Vec<Uuid> = self
            .attempts
            .values()
            .filter(|a| a.reviver == player || a.target == player)
            .map(|a| a.reviver)
            .collect();
        revivers.sort();

        for reviver in revivers {
            self.cancel(players, reviver, reason, out);
        }
    }

    /// Advance every attempt, cancelling any that fail a check this tick.
    /// Returns the players revived.
    pub fn update(
        &mut self,
        now: f32,
        players: &mut LifecycleTracker,
        out: &mut Vec<ServerMsg>,
    ) -> Vec<Uuid> {
        let mut revivers: Vec<Uuid> = self.attempts.keys().copied().collect();
        revivers.sort();

        let mut revived = Vec::new();
        for reviver in revivers {
            let Some(attempt) = self.attempts.get(&reviver) else {
                continue;
            };
            let target = attempt.target;

            let reviver_record = players.get(&reviver);
            let target_record = players.get(&target);

            let failure = match (reviver_record, target_record) {
                (Some(r), _) if !r.is_standing() => Some("reviver_down"),
                (_, Some(t)) if !t.downed || !t.alive => Some("target_lost"),
                (Some(r), Some(t)) if r.position.distance(t.position) > self.rules.revive_range => {
                    Some("out_of_range")
                }
                (Some(_), Some(_)) => None,
                _ => Some("target_lost"),
            };

            if let Some(reason) = failure {
                self.cancel(players, reviver, reason, out);
                continue;
            }

            let Some(attempt) = self.attempts.get_mut(&reviver) else {
                continue;
            };
            attempt.progress = if attempt.required_duration > 0.0 {
                (now - attempt.start_time) / attempt.required_duration
            } else {
                1.0
            };

            if attempt.progress >= 1.0 {
                self.attempts.remove(&reviver);
                if players.revive(target, self.rules.revive_health, out).is_some() {
                    info!(reviver = %reviver, target = %target, "Revive complete");
                    revived.push(target);
                }
            }
        }

        revived
    }

    /// Eliminate a downed player whose bleed-out deadline passed
    pub fn bleed_out<R: Rng + ?Sized>(
        &mut self,
        now: f32,
        players: &mut LifecycleTracker,
        target: Uuid,
        rng: &mut R,
        out: &mut Vec<ServerMsg>,
    ) -> Option<Elimination> {
        let position = players.get(&target).filter(|r| r.downed)?.position;

        self.cancel_involving(players, target, "target_bled_out", out);
        out.push(ServerMsg::PlayerBledOut {
            player_id: target,
            position,
        });

        players.eliminate(
            now,
            target,
            &DamageSource::environment(EliminationSource::Bleedout),
            rng,
            out,
        )
    }

    pub fn attempt_by(&self, reviver: &Uuid) -> Option<&ReviveAttempt> {
        self.attempts.get(reviver)
    }

    pub fn attempt_for_target(&self, target: &Uuid) -> Option<&ReviveAttempt> {
        self.attempts.values().find(|a| a.target == *target)
    }

    pub fn active_count(&self) -> usize {
        self.attempts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchMode;
    use crate::game::combat::HitLocation;
    use crate::game::lifecycle::{DamageOutcome, LifeStatus};
    use glam::Vec3;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    struct Fixture {
        players: LifecycleTracker,
        revive: ReviveSystem,
        rng: ChaCha8Rng,
        out: Vec<ServerMsg>,
        a: Uuid,
        a_mate: Uuid,
        b: Uuid,
    }

    /// Duos: A and A's mate on team 0, B on team 1. A is downed by B at t=0.
    fn fixture() -> Fixture {
        let rules = Arc::new(MatchRules {
            mode: MatchMode::Duos,
            ..MatchRules::default()
        });
        let mut players = LifecycleTracker::new(rules.clone());
        let (a, a_mate, b, b_mate) = (
            Uuid::from_u128(1),
            Uuid::from_u128(2),
            Uuid::from_u128(3),
            Uuid::from_u128(4),
        );
        players.register(a, "a".into(), 0, Vec3::ZERO);
        players.register(a_mate, "a_mate".into(), 0, Vec3::new(1.0, 0.0, 0.0));
        players.register(b, "b".into(), 1, Vec3::new(20.0, 0.0, 0.0));
        players.register(b_mate, "b_mate".into(), 1, Vec3::new(25.0, 0.0, 0.0));

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut out = Vec::new();
        players.apply_damage(
            0.0,
            a,
            500.0,
            HitLocation::Body,
            &DamageSource::weapon(b, "shotgun"),
            &mut rng,
            &mut out,
        );

        Fixture {
            players,
            revive: ReviveSystem::new(rules),
            rng,
            out,
            a,
            a_mate,
            b,
        }
    }

    #[test]
    fn test_revive_completes_after_duration() {
        let mut f = fixture();
        f.revive
            .start_revive(1.0, &mut f.players, f.a_mate, f.a, &mut f.out)
            .unwrap();

        assert!(f.revive.update(6.0, &mut f.players, &mut f.out).is_empty());
        assert_eq!(f.revive.update(11.0, &mut f.players, &mut f.out), vec![f.a]);

        let record = f.players.get(&f.a).unwrap();
        assert_eq!(record.status(), LifeStatus::Alive);
        assert_eq!(record.health, 30.0);
        assert!(record.reviver.is_none());
        assert_eq!(f.revive.active_count(), 0);
    }

    #[test]
    fn test_start_revive_rejections() {
        let mut f = fixture();

        assert_eq!(
            f.revive.start_revive(0.0, &mut f.players, f.a, f.a_mate, &mut f.out),
            Err(ReviveDenied::TargetNotDowned)
        );

        f.players.set_position(f.a_mate, Vec3::new(50.0, 0.0, 0.0));
        assert_eq!(
            f.revive.start_revive(0.0, &mut f.players, f.a_mate, f.a, &mut f.out),
            Err(ReviveDenied::OutOfRange)
        );
    }

    #[test]
    fn test_enemy_cannot_revive() {
        let mut f = fixture();
        f.players.set_position(f.b, Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(
            f.revive.start_revive(0.0, &mut f.players, f.b, f.a, &mut f.out),
            Err(ReviveDenied::NotTeammate)
        );
    }

    #[test]
    fn test_second_reviver_rejected_while_active() {
        let rules = Arc::new(MatchRules {
            mode: MatchMode::Squads,
            ..MatchRules::default()
        });
        let mut players = LifecycleTracker::new(rules.clone());
        let ids: Vec<Uuid> = (1..=3).map(Uuid::from_u128).collect();
        for id in &ids {
            players.register(*id, id.to_string(), 0, Vec3::ZERO);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut out = Vec::new();
        players.apply_damage(
            0.0,
            ids[0],
            500.0,
            HitLocation::Head,
            &DamageSource::environment(EliminationSource::Storm),
            &mut rng,
            &mut out,
        );

        let mut revive = ReviveSystem::new(rules);
        revive
            .start_revive(0.0, &mut players, ids[1], ids[0], &mut out)
            .unwrap();
        assert_eq!(
            revive.start_revive(0.0, &mut players, ids[2], ids[0], &mut out),
            Err(ReviveDenied::AlreadyBeingRevived)
        );
        assert_eq!(revive.attempt_for_target(&ids[0]).unwrap().reviver, ids[1]);
    }

    /// Squad on team 0 with `ids[0]` and `ids[1]` downed next to each other
    fn downed_pair() -> (LifecycleTracker, ReviveSystem, ChaCha8Rng, Vec<Uuid>) {
        let rules = Arc::new(MatchRules {
            mode: MatchMode::Squads,
            ..MatchRules::default()
        });
        let mut players = LifecycleTracker::new(rules.clone());
        let ids: Vec<Uuid> = (1..=4).map(Uuid::from_u128).collect();
        for id in &ids {
            players.register(*id, id.to_string(), 0, Vec3::ZERO);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut out = Vec::new();
        for id in &ids[..2] {
            let outcome = players.apply_damage(
                0.0,
                *id,
                500.0,
                HitLocation::Body,
                &DamageSource::environment(EliminationSource::Storm),
                &mut rng,
                &mut out,
            );
            assert!(matches!(outcome, DamageOutcome::Downed));
        }
        (players, ReviveSystem::new(rules), rng, ids)
    }

    #[test]
    fn test_downed_player_cannot_revive() {
        let (mut players, mut revive, _, ids) = downed_pair();
        let mut out = Vec::new();
        assert_eq!(
            revive.start_revive(0.0, &mut players, ids[1], ids[0], &mut out),
            Err(ReviveDenied::ReviverNotStanding)
        );
        assert_eq!(revive.active_count(), 0);
    }

    #[test]
    fn test_one_attempt_per_reviver() {
        let (mut players, mut revive, _, ids) = downed_pair();
        let mut out = Vec::new();
        revive
            .start_revive(0.0, &mut players, ids[2], ids[0], &mut out)
            .unwrap();
        assert_eq!(
            revive.start_revive(0.0, &mut players, ids[2], ids[1], &mut out),
            Err(ReviveDenied::Busy)
        );
        assert!(players.get(&ids[1]).unwrap().reviver.is_none());

        revive
            .start_revive(0.0, &mut players, ids[3], ids[1], &mut out)
            .unwrap();
        assert_eq!(revive.active_count(), 2);
    }

    #[test]
    fn test_reviver_downed_mid_attempt_cancels() {
        let (mut players, mut revive, mut rng, ids) = downed_pair();
        let mut out = Vec::new();
        revive
            .start_revive(0.0, &mut players, ids[2], ids[0], &mut out)
            .unwrap();

        players.apply_damage(
            2.0,
            ids[2],
            500.0,
            HitLocation::Body,
            &DamageSource::environment(EliminationSource::Storm),
            &mut rng,
            &mut out,
        );
        assert!(revive.update(3.0, &mut players, &mut out).is_empty());

        assert!(revive.attempt_by(&ids[2]).is_none());
        assert!(players.get(&ids[0]).unwrap().reviver.is_none());
        assert_eq!(players.get(&ids[0]).unwrap().status(), LifeStatus::Downed);
        assert!(out.iter().any(|m| matches!(
            m,
            ServerMsg::ReviveCancelled { reason, reviver_id, .. }
                if reason == "reviver_down" && *reviver_id == ids[2]
        )));
    }

    #[test]
    fn test_single_tick_out_of_range_cancels() {
        let mut f = fixture();
        f.revive
            .start_revive(0.0, &mut f.players, f.a_mate, f.a, &mut f.out)
            .unwrap();

        f.players.set_position(f.a_mate, Vec3::new(10.0, 0.0, 0.0));
        f.revive.update(1.0, &mut f.players, &mut f.out);
        f.players.set_position(f.a_mate, Vec3::new(1.0, 0.0, 0.0));

        assert!(f.revive.attempt_by(&f.a_mate).is_none());
        assert!(f.revive.update(20.0, &mut f.players, &mut f.out).is_empty());
        assert_eq!(f.players.get(&f.a).unwrap().status(), LifeStatus::Downed);
        assert!(f.out.iter().any(|m| matches!(
            m,
            ServerMsg::ReviveCancelled { reason, .. } if reason == "out_of_range"
        )));
    }

    #[test]
    fn test_bleed_out_removes_attempt_and_eliminates() {
        let mut f = fixture();
        f.revive
            .start_revive(80.0, &mut f.players, f.a_mate, f.a, &mut f.out)
            .unwrap();

        let expired = f.players.tick_downed(90.0);
        assert_eq!(expired, vec![f.a]);

        let elimination = f
            .revive
            .bleed_out(90.0, &mut f.players, f.a, &mut f.rng, &mut f.out)
            .unwrap();
        assert_eq!(elimination.source, EliminationSource::Bleedout);
        assert_eq!(elimination.killer_id, Some(f.b));
        assert!(f.revive.attempt_for_target(&f.a).is_none());
        assert_eq!(f.players.get(&f.a).unwrap().status(), LifeStatus::Eliminated);
    }
}
