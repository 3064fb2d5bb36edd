//! Match state machine and authoritative tick loop
//!
//! [`MatchContext`] owns everything about one match: its state, the storm,
//! the player records and the revive/reboot subsystems. It is only ever
//! touched from the [`GameMatch`] task, which drains queued client requests
//! and then advances the simulation once per tick.

use dashmap::DashMap;
use glam::Vec3;
use parking_lot::RwLock;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f32::consts::{FRAC_PI_2, TAU};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{DeployMode, MatchRules};
use crate::util::time::{tick_delta, TimerHandle, TimerQueue, SIMULATION_TPS, SNAPSHOT_TPS};
use crate::ws::protocol::{AdminCommand, ClientMsg, ServerMsg, TransitionPayload};

use super::combat::HitLocation;
use super::geometry::{horizontal_direction, random_point_in_circle, Circle};
use super::lifecycle::{
    DamageOutcome, DamageSource, Elimination, EliminationSource, LifecycleTracker,
};
use super::reboot::RebootSystem;
use super::revive::ReviveSystem;
use super::snapshot::SnapshotBuilder;
use super::storm::StormController;
use super::PlayerInput;

/// Capacity of the per-match request queue
const INPUT_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the per-match broadcast channel
const BROADCAST_CAPACITY: usize = 256;

/// Match phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    /// Waiting for players
    Lobby,
    /// Players registered, storm initialised
    Loading,
    /// Players riding the flight and jumping out
    Deploying,
    /// Match in progress
    Playing,
    /// Winner decided, celebration running
    Ending,
    /// Tearing down before the next lobby
    Resetting,
}

impl MatchState {
    /// Whether players are registered and can still be eliminated
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Loading | Self::Deploying | Self::Playing)
    }
}

/// Continuations scheduled by a state, cancelled when it exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    FinishLoading,
    FinishReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JumpDenied {
    #[error("no flight in progress")]
    NotDeploying,

    #[error("not aboard the flight")]
    NotAboard,
}

/// A connected player waiting in (or returning to) the lobby
#[derive(Debug, Clone)]
struct LobbyPlayer {
    player_id: Uuid,
    display_name: String,
    ready: bool,
}

/// Straight-line deploy flight across the map
#[derive(Debug, Clone)]
pub struct DeployFlight {
    pub start: Vec3,
    pub end: Vec3,
    pub duration: f32,
    pub started_at: f32,
    aboard: HashSet<Uuid>,
    jumped: HashSet<Uuid>,
}

impl DeployFlight {
    /// Bus position at `now`, clamped to the ends of the path
    pub fn position(&self, now: f32) -> Vec3 {
        let t = if self.duration > 0.0 {
            ((now - self.started_at) / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.start.lerp(self.end, t)
    }

    pub fn is_aboard(&self, player_id: &Uuid) -> bool {
        self.aboard.contains(player_id)
    }

    fn finished(&self, now: f32) -> bool {
        now - self.started_at >= self.duration
    }
}

#[derive(Debug, Clone, Copy)]
struct SupplyDropTimer {
    remaining: f32,
    interval: f32,
}

/// Public view of a match for the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub state: MatchState,
    pub connected: usize,
    pub alive_count: usize,
    pub total_count: usize,
    pub storm_phase: usize,
    pub max_players: usize,
}

/// All state for one match, mutated only by its own tick loop
pub struct MatchContext {
    id: Uuid,
    rules: Arc<MatchRules>,

    state: MatchState,
    state_started_at: f32,
    /// Bumped on every transition, stamped on every deferred continuation
    epoch: u64,
    now: f32,
    tick: u64,
    rng: ChaCha8Rng,

    roster: Vec<LobbyPlayer>,
    countdown: Option<f32>,
    started_with: usize,
    winner: Option<Uuid>,

    flight: Option<DeployFlight>,
    supply: Option<SupplyDropTimer>,

    storm: StormController,
    players: LifecycleTracker,
    revive: ReviveSystem,
    reboot: RebootSystem,

    timers: TimerQueue<Deferred>,
    state_timers: Vec<TimerHandle>,
    win_check_pending: bool,
    win_check_in_progress: bool,

    outbox: Vec<ServerMsg>,
}

impl MatchContext {
    pub fn new(id: Uuid, rules: Arc<MatchRules>, seed: u64) -> Self {
        Self {
            id,
            state: MatchState::Lobby,
            state_started_at: 0.0,
            epoch: 0,
            now: 0.0,
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            roster: Vec::new(),
            countdown: None,
            started_with: 0,
            winner: None,
            flight: None,
            supply: None,
            storm: StormController::new(&rules, seed.wrapping_add(1)),
            players: LifecycleTracker::new(rules.clone()),
            revive: ReviveSystem::new(rules.clone()),
            reboot: RebootSystem::new(rules.clone()),
            timers: TimerQueue::new(),
            state_timers: Vec::new(),
            win_check_pending: false,
            win_check_in_progress: false,
            outbox: Vec::new(),
            rules,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn now(&self) -> f32 {
        self.now
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn winner(&self) -> Option<Uuid> {
        self.winner
    }

    pub fn storm(&self) -> &StormController {
        &self.storm
    }

    pub fn players(&self) -> &LifecycleTracker {
        &self.players
    }

    pub fn revive(&self) -> &ReviveSystem {
        &self.revive
    }

    pub fn reboot(&self) -> &RebootSystem {
        &self.reboot
    }

    pub fn flight(&self) -> Option<&DeployFlight> {
        self.flight.as_ref()
    }

    pub fn connected(&self) -> usize {
        self.roster.len()
    }

    /// Take every broadcast produced since the last drain
    pub fn drain_outbox(&mut self) -> Vec<ServerMsg> {
        std::mem::take(&mut self.outbox)
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            match_id: self.id,
            state: self.state,
            connected: self.roster.len(),
            alive_count: self.players.alive_count(),
            total_count: self.players.total_count(),
            storm_phase: self.storm.phase(),
            max_players: self.rules.max_players,
        }
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Move to `next`. Returns false (and does nothing) if already there.
    pub fn transition_to(&mut self, next: MatchState, payload: TransitionPayload) -> bool {
        if next == self.state {
            return false;
        }

        let previous = self.state;
        self.exit_state(previous);

        self.state = next;
        self.state_started_at = self.now;
        self.epoch += 1;

        info!(
            match_id = %self.id,
            from = ?previous,
            to = ?next,
            reason = payload.reason.as_deref().unwrap_or(""),
            "Match state changed"
        );

        self.enter_state(next, &payload);
        self.outbox.push(ServerMsg::MatchStateChanged {
            previous,
            current: next,
            payload,
        });
        true
    }

    fn exit_state(&mut self, state: MatchState) {
        for handle in self.state_timers.drain(..) {
            self.timers.cancel(handle);
        }

        match state {
            MatchState::Lobby => {
                self.countdown = None;
            }
            MatchState::Deploying => self.eject_everyone(),
            MatchState::Playing => {
                self.supply = None;
            }
            MatchState::Loading | MatchState::Ending | MatchState::Resetting => {}
        }
    }

    fn enter_state(&mut self, state: MatchState, payload: &TransitionPayload) {
        match state {
            MatchState::Lobby => self.enter_lobby(),
            MatchState::Loading => self.enter_loading(),
            MatchState::Deploying => self.enter_deploying(),
            MatchState::Playing => self.enter_playing(),
            MatchState::Ending => {
                self.winner = payload.winner_id;
            }
            MatchState::Resetting => self.enter_resetting(),
        }
    }

    fn schedule(&mut self, delay: f32, continuation: Deferred) {
        let handle = self.timers.schedule(self.now, delay, self.epoch, continuation);
        self.state_timers.push(handle);
    }

    fn reset_subsystems(&mut self) {
        self.storm.reset();
        self.players.reset();
        self.revive.reset();
        self.reboot.reset();
        self.flight = None;
        self.supply = None;
        self.win_check_pending = false;
    }

    fn enter_lobby(&mut self) {
        self.reset_subsystems();
        self.countdown = None;
        self.started_with = 0;
        self.winner = None;
        for player in &mut self.roster {
            player.ready = false;
        }
    }

    fn enter_loading(&mut self) {
        self.reset_subsystems();
        self.storm
            .initialize(self.rules.map_center, self.rules.map_radius);

        let team_size = self.rules.mode.team_size().max(1);
        let map = Circle::new(self.rules.map_center, self.rules.map_radius);
        for (i, player) in self.roster.iter().enumerate() {
            let position = match self.rules.deploy_mode {
                DeployMode::DirectSpawn => random_point_in_circle(&mut self.rng, &map),
                DeployMode::AirDrop => self.rules.map_center,
            };
            self.players.register(
                player.player_id,
                player.display_name.clone(),
                (i / team_size) as u32,
                position,
            );
        }
        self.started_with = self.players.total_count();

        info!(
            match_id = %self.id,
            players = self.started_with,
            mode = ?self.rules.mode,
            "Players registered"
        );
        self.outbox.push(self.players.count_update());
        self.schedule(self.rules.loading_delay, Deferred::FinishLoading);
    }

    fn enter_deploying(&mut self) {
        let flight = self.plan_flight();
        let riders = self.players.alive_ids();
        for id in &riders {
            self.players.set_position(*id, flight.start);
        }

        info!(
            match_id = %self.id,
            riders = riders.len(),
            duration = flight.duration,
            "Deploy flight departed"
        );
        self.outbox.push(ServerMsg::FlightPath {
            start: flight.start,
            end: flight.end,
            duration: flight.duration,
        });
        self.flight = Some(DeployFlight {
            aboard: riders.into_iter().collect(),
            ..flight
        });
    }

    /// A chord through the map at a random heading, offset from the centre
    /// by up to `flight_lateral_jitter` of the radius
    fn plan_flight(&mut self) -> DeployFlight {
        let radius = self.rules.map_radius;
        let jitter = self.rules.flight_lateral_jitter.clamp(0.0, 1.0);

        let heading = self.rng.gen_range(0.0..TAU);
        let along = horizontal_direction(heading);
        let across = horizontal_direction(heading + FRAC_PI_2);
        let offset = self.rng.gen_range(-jitter..=jitter) * radius;

        let midpoint =
            self.rules.map_center + across * offset + Vec3::Y * self.rules.flight_altitude;
        let half_chord = (radius * radius - offset * offset).max(0.0).sqrt();

        DeployFlight {
            start: midpoint - along * half_chord,
            end: midpoint + along * half_chord,
            duration: self.rules.flight_duration,
            started_at: self.now,
            aboard: HashSet::new(),
            jumped: HashSet::new(),
        }
    }

    fn enter_playing(&mut self) {
        self.storm.start_phase(1, &mut self.outbox);
        self.supply = Some(SupplyDropTimer {
            remaining: self.rules.supply_drop_initial,
            interval: self.rules.supply_drop_initial,
        });
    }

    fn enter_resetting(&mut self) {
        self.reset_subsystems();
        self.schedule(self.rules.reset_delay, Deferred::FinishReset);
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Advance the match by `dt` seconds
    pub fn update(&mut self, dt: f32) {
        self.now += dt;
        self.tick += 1;

        self.fire_timers();

        match self.state {
            MatchState::Lobby => self.update_lobby(dt),
            MatchState::Deploying => self.update_deploying(),
            MatchState::Playing => self.update_playing(dt),
            MatchState::Ending => {
                if self.now - self.state_started_at >= self.rules.ending_duration {
                    self.transition_to(MatchState::Resetting, TransitionPayload::default());
                }
            }
            MatchState::Loading | MatchState::Resetting => {}
        }

        self.run_pending_win_check();
    }

    fn fire_timers(&mut self) {
        for fired in self.timers.poll(self.now) {
            if fired.epoch != self.epoch {
                debug!(
                    match_id = %self.id,
                    continuation = ?fired.payload,
                    "Stale continuation discarded"
                );
                continue;
            }

            match fired.payload {
                Deferred::FinishLoading if self.state == MatchState::Loading => {
                    let next = match self.rules.deploy_mode {
                        DeployMode::AirDrop => MatchState::Deploying,
                        DeployMode::DirectSpawn => MatchState::Playing,
                    };
                    self.transition_to(next, TransitionPayload::default());
                }
                Deferred::FinishReset if self.state == MatchState::Resetting => {
                    self.transition_to(MatchState::Lobby, TransitionPayload::default());
                }
                other => {
                    debug!(match_id = %self.id, continuation = ?other, state = ?self.state, "Continuation ignored");
                }
            }
        }
    }

    fn min_players_to_start(&self) -> usize {
        if self.rules.solo_testing {
            1
        } else {
            self.rules.min_players.max(1)
        }
    }

    fn ready_quorum_reached(&self) -> bool {
        let Some(quorum) = self.rules.ready_quorum else {
            return false;
        };
        let needed = (quorum.clamp(0.0, 1.0) * self.roster.len() as f32).ceil() as usize;
        let ready = self.roster.iter().filter(|p| p.ready).count();
        ready >= needed.max(1)
    }

    fn update_lobby(&mut self, dt: f32) {
        let count = self.roster.len();

        if count >= self.rules.max_players {
            self.transition_to(MatchState::Loading, TransitionPayload::reason("lobby_full"));
            return;
        }

        if count < self.min_players_to_start() {
            if self.countdown.take().is_some() {
                info!(match_id = %self.id, players = count, "Countdown cancelled");
                self.outbox.push(ServerMsg::CountdownCancelled);
            }
            return;
        }

        let remaining = match self.countdown {
            None => {
                info!(match_id = %self.id, players = count, "Countdown started");
                self.outbox.push(ServerMsg::MatchCountdown {
                    seconds_remaining: self.rules.lobby_countdown,
                });
                self.rules.lobby_countdown
            }
            Some(previous) => {
                let remaining = previous - dt;
                if remaining.ceil() < previous.ceil() {
                    self.outbox.push(ServerMsg::MatchCountdown {
                        seconds_remaining: remaining.max(0.0),
                    });
                }
                remaining
            }
        };
        self.countdown = Some(remaining);

        if remaining <= 0.0 {
            self.transition_to(MatchState::Loading, TransitionPayload::reason("countdown"));
        } else if self.ready_quorum_reached() {
            self.transition_to(MatchState::Loading, TransitionPayload::reason("ready"));
        }
    }

    fn update_deploying(&mut self) {
        let Some(flight) = self.flight.as_ref() else {
            self.transition_to(MatchState::Playing, TransitionPayload::default());
            return;
        };

        let bus = flight.position(self.now);
        let finished = flight.finished(self.now);
        let mut riders: Vec<Uuid> = flight.aboard.iter().copied().collect();
        riders.sort();
        for id in riders {
            self.players.set_position(id, bus);
        }

        if finished {
            self.transition_to(MatchState::Playing, TransitionPayload::reason("flight_over"));
        }
    }

    /// Force everyone still aboard off the flight at its current position
    fn eject_everyone(&mut self) {
        let Some(flight) = self.flight.as_mut() else {
            return;
        };
        let bus = flight.position(self.now);
        let mut riders: Vec<Uuid> = flight.aboard.drain().collect();
        riders.sort();

        for id in riders {
            flight.jumped.insert(id);
            self.players.set_position(id, bus);
            self.outbox.push(ServerMsg::PlayerJumped {
                player_id: id,
                position: bus,
                forced: true,
            });
        }
    }

    /// Leave the flight. A repeated jump is ignored and returns `Ok(false)`.
    pub fn jump(&mut self, player_id: Uuid) -> Result<bool, JumpDenied> {
        if self.state != MatchState::Deploying {
            return Err(JumpDenied::NotDeploying);
        }
        let flight = self.flight.as_mut().ok_or(JumpDenied::NotDeploying)?;
        if flight.jumped.contains(&player_id) {
            return Ok(false);
        }
        if !flight.aboard.remove(&player_id) {
            return Err(JumpDenied::NotAboard);
        }
        flight.jumped.insert(player_id);

        let position = flight.position(self.now);
        self.players.set_position(player_id, position);
        debug!(match_id = %self.id, player_id = %player_id, "Player jumped");
        self.outbox.push(ServerMsg::PlayerJumped {
            player_id,
            position,
            forced: false,
        });
        Ok(true)
    }

    fn update_playing(&mut self, dt: f32) {
        let positions = self.players.alive_positions();
        let storm_damage = self.storm.update(dt, &positions, &mut self.outbox);
        let storm = DamageSource::environment(EliminationSource::Storm);
        for hit in storm_damage {
            self.apply_damage(hit.player_id, hit.amount, HitLocation::None, &storm);
        }
        self.reboot
            .disable_beacons_outside(&self.storm.current_circle(), &mut self.outbox);

        for expired in self.players.tick_downed(self.now) {
            if let Some(elimination) = self.revive.bleed_out(
                self.now,
                &mut self.players,
                expired,
                &mut self.rng,
                &mut self.outbox,
            ) {
                self.after_elimination(elimination);
            }
        }

        self.revive
            .update(self.now, &mut self.players, &mut self.outbox);
        self.reboot
            .update(self.now, &mut self.players, &mut self.rng, &mut self.outbox);

        self.update_supply_drops(dt);
    }

    fn update_supply_drops(&mut self, dt: f32) {
        let Some(timer) = self.supply.as_mut() else {
            return;
        };
        timer.remaining -= dt;
        if timer.remaining > 0.0 {
            return;
        }

        timer.interval *= self.rules.supply_drop_growth.max(1.0);
        timer.remaining = timer.interval;

        let position = random_point_in_circle(&mut self.rng, &self.storm.current_circle());
        info!(match_id = %self.id, x = position.x, z = position.z, "Supply drop");
        self.outbox.push(ServerMsg::SupplyDrop { position });
    }

    // ------------------------------------------------------------------
    // Damage and elimination
    // ------------------------------------------------------------------

    /// Route damage through the tracker and react to what it did
    pub fn apply_damage(
        &mut self,
        victim: Uuid,
        amount: f32,
        location: HitLocation,
        source: &DamageSource,
    ) -> DamageOutcome {
        let outcome = self.players.apply_damage(
            self.now,
            victim,
            amount,
            location,
            source,
            &mut self.rng,
            &mut self.outbox,
        );

        match &outcome {
            DamageOutcome::Downed => {
                self.revive
                    .cancel_involving(&mut self.players, victim, "reviver_down", &mut self.outbox);
            }
            DamageOutcome::Eliminated(elimination) => {
                self.after_elimination(elimination.clone());
            }
            _ => {}
        }
        outcome
    }

    /// Eliminate outright (disconnects, admin)
    pub fn eliminate(&mut self, victim: Uuid, source: EliminationSource) -> Option<Elimination> {
        let elimination = self.players.eliminate(
            self.now,
            victim,
            &DamageSource::environment(source),
            &mut self.rng,
            &mut self.outbox,
        )?;
        self.after_elimination(elimination.clone());
        Some(elimination)
    }

    /// Everything that follows a player leaving the alive set. Ends by
    /// queueing a win check.
    fn after_elimination(&mut self, elimination: Elimination) {
        self.revive.cancel_involving(
            &mut self.players,
            elimination.victim_id,
            "target_lost",
            &mut self.outbox,
        );
        self.reboot
            .on_player_eliminated(self.now, &elimination, &mut self.outbox);
        if let Some(flight) = self.flight.as_mut() {
            flight.aboard.remove(&elimination.victim_id);
        }

        // Downed players with nobody left standing to revive them go too
        if self.rules.mode.is_team() && !self.players.team_has_standing(elimination.team_id) {
            let wipe = DamageSource::environment(EliminationSource::TeamWipe);
            for member in self.players.downed_members(elimination.team_id) {
                if let Some(wiped) = self.players.eliminate(
                    self.now,
                    member,
                    &wipe,
                    &mut self.rng,
                    &mut self.outbox,
                ) {
                    self.after_elimination(wiped);
                }
            }
        }

        self.win_check_pending = true;
    }

    fn run_pending_win_check(&mut self) {
        if std::mem::take(&mut self.win_check_pending) {
            self.check_win_condition();
        }
    }

    /// End the match once one team (or nobody) remains.
    ///
    /// Idempotent; a call made while a check is already running returns
    /// immediately. Returns true if this call moved the match to Ending.
    pub fn check_win_condition(&mut self) -> bool {
        if self.win_check_in_progress || !self.state.is_live() {
            return false;
        }
        self.win_check_in_progress = true;
        let ended = self.evaluate_win();
        self.win_check_in_progress = false;
        ended
    }

    fn evaluate_win(&mut self) -> bool {
        if self.rules.solo_testing && self.started_with <= 1 {
            debug!(match_id = %self.id, "Single-player testing, win check skipped");
            return false;
        }

        let teams = self.players.remaining_teams();
        if teams.len() > 1 {
            return false;
        }

        let winning_team = teams.into_iter().next();
        let winner_id = winning_team.and_then(|team| {
            self.players
                .records()
                .find(|r| r.alive && r.team_id == team)
                .map(|r| r.player_id)
        });
        if let Some(team) = winning_team {
            self.players.award_win(team);
        }

        info!(
            match_id = %self.id,
            winner = ?winner_id,
            team = ?winning_team,
            "Winner decided"
        );
        self.transition_to(
            MatchState::Ending,
            TransitionPayload {
                winner_id,
                placement: winner_id.map(|_| 1),
                reason: None,
            },
        )
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Apply one queued client request
    pub fn handle_input(&mut self, input: PlayerInput) {
        let PlayerInput {
            player_id,
            msg,
            is_admin,
            received_at,
        } = input;
        debug!(match_id = %self.id, player_id = %player_id, received_at, ?msg, "Match input");

        match msg {
            ClientMsg::Join { display_name } => self.join(player_id, display_name),
            ClientMsg::Leave => self.leave(player_id),
            ClientMsg::Ready => self.set_ready(player_id),
            ClientMsg::Jump => {
                if let Err(e) = self.jump(player_id) {
                    self.deny(player_id, "jump", e);
                }
            }
            ClientMsg::Position { position } => {
                let aboard = self.flight.as_ref().is_some_and(|f| f.is_aboard(&player_id));
                if !aboard {
                    self.players.set_position(player_id, position);
                }
            }
            ClientMsg::Hit {
                target,
                amount,
                location,
                weapon,
            } => self.handle_hit(player_id, target, amount, location, weapon),
            ClientMsg::Heal { amount } => {
                self.players.heal(player_id, amount);
            }
            ClientMsg::Shield { amount } => {
                self.players.add_shield(player_id, amount);
            }
            ClientMsg::Inventory { items } => self.players.set_inventory(player_id, items),
            ClientMsg::StartRevive { target } => {
                if let Err(e) = self.revive.start_revive(
                    self.now,
                    &mut self.players,
                    player_id,
                    target,
                    &mut self.outbox,
                ) {
                    self.deny(player_id, "start_revive", e);
                }
            }
            ClientMsg::CancelRevive => {
                self.revive
                    .cancel(&mut self.players, player_id, "cancelled", &mut self.outbox);
            }
            ClientMsg::CollectCard { owner } => {
                if let Err(e) =
                    self.reboot
                        .collect_card(&self.players, player_id, owner, &mut self.outbox)
                {
                    self.deny(player_id, "collect_card", e);
                }
            }
            ClientMsg::StartReboot { beacon, owner } => {
                if let Err(e) = self.reboot.start_reboot(
                    self.now,
                    &self.players,
                    player_id,
                    beacon,
                    owner,
                    &mut self.outbox,
                ) {
                    self.deny(player_id, "start_reboot", e);
                }
            }
            ClientMsg::Admin { command } => {
                if is_admin {
                    self.handle_admin(player_id, command);
                } else {
                    self.deny(player_id, "admin", "not authorized");
                }
            }
            // Answered by the session, never queued
            ClientMsg::Ping { .. } => {}
        }

        self.run_pending_win_check();
    }

    fn deny(&mut self, player_id: Uuid, action: &str, reason: impl Display) {
        let reason = reason.to_string();
        debug!(match_id = %self.id, player_id = %player_id, action, reason = %reason, "Request denied");
        self.outbox.push(ServerMsg::Denied {
            player_id,
            action: action.to_string(),
            reason,
        });
    }

    fn join(&mut self, player_id: Uuid, display_name: Option<String>) {
        if self.roster.iter().any(|p| p.player_id == player_id) {
            debug!(match_id = %self.id, player_id = %player_id, "Player already in roster");
            return;
        }
        if self.state != MatchState::Lobby {
            self.deny(player_id, "join", "match in progress");
            return;
        }
        if self.roster.len() >= self.rules.max_players {
            self.deny(player_id, "join", "match full");
            return;
        }

        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Player_{}", &player_id.simple().to_string()[..8]));
        self.roster.push(LobbyPlayer {
            player_id,
            display_name,
            ready: false,
        });

        info!(
            match_id = %self.id,
            player_id = %player_id,
            player_count = self.roster.len(),
            "Player joined lobby"
        );
        self.outbox.push(ServerMsg::PlayerCountUpdate {
            alive_count: self.roster.len(),
            total_count: self.roster.len(),
        });
    }

    fn leave(&mut self, player_id: Uuid) {
        let before = self.roster.len();
        self.roster.retain(|p| p.player_id != player_id);
        let was_connected = self.roster.len() != before;

        if self.state == MatchState::Lobby {
            if was_connected {
                info!(match_id = %self.id, player_id = %player_id, "Player left lobby");
                self.outbox.push(ServerMsg::PlayerCountUpdate {
                    alive_count: self.roster.len(),
                    total_count: self.roster.len(),
                });
            }
            return;
        }

        if self.state.is_live() {
            info!(match_id = %self.id, player_id = %player_id, "Player disconnected mid-match");
            self.eliminate(player_id, EliminationSource::Disconnect);
        }
    }

    fn set_ready(&mut self, player_id: Uuid) {
        if self.state != MatchState::Lobby {
            return;
        }
        if let Some(player) = self.roster.iter_mut().find(|p| p.player_id == player_id) {
            player.ready = true;
        }
    }

    fn handle_hit(
        &mut self,
        attacker: Uuid,
        target: Uuid,
        amount: f32,
        location: HitLocation,
        weapon: String,
    ) {
        if self.state != MatchState::Playing || attacker == target {
            return;
        }
        if !self.players.get(&attacker).is_some_and(|r| r.is_standing()) {
            debug!(match_id = %self.id, attacker = %attacker, "Hit from non-standing player ignored");
            return;
        }
        self.apply_damage(target, amount, location, &DamageSource::weapon(attacker, weapon));
    }

    fn handle_admin(&mut self, admin: Uuid, command: AdminCommand) {
        info!(match_id = %self.id, admin = %admin, command = ?command, "Admin command");

        match command {
            AdminCommand::ForceState { state } => {
                if !self.transition_to(state, TransitionPayload::reason("admin")) {
                    self.deny(admin, "force_state", "already in that state");
                }
            }
            AdminCommand::SetInvincible { player, enabled } => {
                if !self.players.set_invincible(player, enabled) {
                    self.deny(admin, "set_invincible", "unknown player");
                }
            }
            AdminCommand::StartStormPhase { phase } => {
                if !self.storm.start_phase(phase, &mut self.outbox) {
                    warn!(match_id = %self.id, phase, "Admin requested unknown storm phase");
                    self.deny(admin, "start_storm_phase", "phase out of range");
                }
            }
            AdminCommand::Eliminate { player } => {
                if self.eliminate(player, EliminationSource::Admin).is_none() {
                    self.deny(admin, "eliminate", "unknown or eliminated player");
                }
            }
        }
    }
}

/// Handle to a running match
#[derive(Clone)]
pub struct MatchHandle {
    pub id: Uuid,
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub broadcast_tx: broadcast::Sender<ServerMsg>,
    summary: Arc<RwLock<MatchSummary>>,
}

impl MatchHandle {
    pub fn summary(&self) -> MatchSummary {
        self.summary.read().clone()
    }

    pub fn connected(&self) -> usize {
        self.summary.read().connected
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.broadcast_tx.subscribe()
    }
}

/// Registry of all active matches
pub struct MatchRegistry {
    matches: DashMap<Uuid, MatchHandle>,
}

impl MatchRegistry {
    pub fn new() -> Self {
        Self {
            matches: DashMap::new(),
        }
    }

    pub fn get(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.get(id).map(|m| m.value().clone())
    }

    pub fn insert(&self, handle: MatchHandle) {
        self.matches.insert(handle.id, handle);
    }

    pub fn remove(&self, id: &Uuid) -> Option<MatchHandle> {
        self.matches.remove(id).map(|(_, h)| h)
    }

    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }

    pub fn total_players(&self) -> usize {
        self.matches.iter().map(|m| m.value().connected()).sum()
    }

    pub fn summaries(&self) -> Vec<MatchSummary> {
        let mut summaries: Vec<MatchSummary> =
            self.matches.iter().map(|m| m.value().summary()).collect();
        summaries.sort_by_key(|s| s.match_id);
        summaries
    }

    /// Find a match whose lobby has an open slot, fullest first
    pub fn find_available_match(&self) -> Option<MatchHandle> {
        self.matches
            .iter()
            .filter(|m| {
                let summary = m.value().summary();
                summary.state == MatchState::Lobby && summary.connected < summary.max_players
            })
            .max_by_key(|m| m.value().connected())
            .map(|m| m.value().clone())
    }
}

impl Default for MatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The authoritative game match
pub struct GameMatch {
    ctx: MatchContext,
    input_rx: mpsc::Receiver<PlayerInput>,
    broadcast_tx: broadcast::Sender<ServerMsg>,
    snapshot_builder: SnapshotBuilder,
    summary: Arc<RwLock<MatchSummary>>,
}

impl GameMatch {
    /// Create a new match
    pub fn new(id: Uuid, rules: Arc<MatchRules>, seed: u64) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        let ctx = MatchContext::new(id, rules, seed);
        let summary = Arc::new(RwLock::new(ctx.summary()));

        let handle = MatchHandle {
            id,
            input_tx,
            broadcast_tx: broadcast_tx.clone(),
            summary: summary.clone(),
        };

        let game_match = Self {
            ctx,
            input_rx,
            broadcast_tx,
            snapshot_builder: SnapshotBuilder::new(SIMULATION_TPS / SNAPSHOT_TPS),
            summary,
        };

        (game_match, handle)
    }

    /// Run the authoritative tick loop until shutdown is signalled or the
    /// request queue closes
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(match_id = %self.ctx.id(), "Match task started");

        let tick_duration = Duration::from_micros(1_000_000 / SIMULATION_TPS as u64);
        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    if !self.step(tick_delta()) {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(match_id = %self.ctx.id(), "Match task stopped");
    }

    /// Drain queued requests, advance one tick and publish the results.
    /// Returns false once the request queue is closed.
    fn step(&mut self, dt: f32) -> bool {
        let state_before = self.ctx.state();

        loop {
            match self.input_rx.try_recv() {
                Ok(input) => self.ctx.handle_input(input),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }

        self.ctx.update(dt);

        // No receivers is fine, the lobby may be empty
        for msg in self.ctx.drain_outbox() {
            let _ = self.broadcast_tx.send(msg);
        }

        if self.ctx.state() != state_before {
            self.snapshot_builder.force_next();
        }
        if self.snapshot_builder.should_send() {
            let snapshot = self.snapshot_builder.build(
                self.ctx.tick(),
                self.ctx.state(),
                self.ctx.storm().state(),
                self.ctx.players(),
            );
            let _ = self.broadcast_tx.send(snapshot);
        }

        *self.summary.write() = self.ctx.summary();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MatchMode;
    use crate::game::lifecycle::LifeStatus;

    fn rules(mode: MatchMode, deploy_mode: DeployMode) -> MatchRules {
        MatchRules {
            mode,
            deploy_mode,
            ready_quorum: None,
            ..MatchRules::default()
        }
    }

    fn input(player_id: Uuid, msg: ClientMsg) -> PlayerInput {
        PlayerInput {
            player_id,
            msg,
            is_admin: false,
            received_at: 0,
        }
    }

    fn admin(command: AdminCommand) -> PlayerInput {
        PlayerInput {
            player_id: Uuid::from_u128(0xad),
            msg: ClientMsg::Admin { command },
            is_admin: true,
            received_at: 0,
        }
    }

    fn join(ctx: &mut MatchContext, count: u128) -> Vec<Uuid> {
        let ids: Vec<Uuid> = (1..=count).map(Uuid::from_u128).collect();
        for id in &ids {
            ctx.handle_input(input(*id, ClientMsg::Join { display_name: None }));
        }
        ids
    }

    /// Join `count` players and run the match through Loading into Playing
    fn playing(rules: MatchRules, count: u128) -> (MatchContext, Vec<Uuid>) {
        let mut ctx = MatchContext::new(Uuid::from_u128(77), Arc::new(rules), 42);
        let ids = join(&mut ctx, count);
        assert!(ctx.transition_to(MatchState::Loading, TransitionPayload::default()));
        while ctx.state() == MatchState::Loading {
            ctx.update(1.0);
        }
        assert_eq!(ctx.state(), MatchState::Playing);
        ctx.drain_outbox();
        (ctx, ids)
    }

    fn transitions(msgs: &[ServerMsg]) -> Vec<(MatchState, MatchState)> {
        msgs.iter()
            .filter_map(|m| match m {
                ServerMsg::MatchStateChanged {
                    previous, current, ..
                } => Some((*previous, *current)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_transition_to_same_state_is_noop() {
        let mut ctx = MatchContext::new(Uuid::new_v4(), Arc::new(MatchRules::default()), 1);
        let epoch = ctx.epoch;

        assert!(!ctx.transition_to(MatchState::Lobby, TransitionPayload::default()));
        assert_eq!(ctx.epoch, epoch);
        assert!(ctx.drain_outbox().is_empty());
    }

    #[test]
    fn test_lobby_countdown_starts_and_cancels() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(rules(MatchMode::Solo, DeployMode::DirectSpawn)),
            1,
        );
        let ids = join(&mut ctx, 2);
        ctx.update(0.1);
        assert!(ctx.countdown.is_some());

        ctx.handle_input(input(ids[1], ClientMsg::Leave));
        ctx.update(0.1);
        assert!(ctx.countdown.is_none());
        assert!(ctx
            .drain_outbox()
            .iter()
            .any(|m| matches!(m, ServerMsg::CountdownCancelled)));
    }

    #[test]
    fn test_lobby_countdown_reaches_loading() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(rules(MatchMode::Solo, DeployMode::DirectSpawn)),
            1,
        );
        join(&mut ctx, 2);
        for _ in 0..31 {
            ctx.update(1.0);
        }
        assert_eq!(ctx.state(), MatchState::Loading);
        assert_eq!(ctx.players().total_count(), 2);
    }

    #[test]
    fn test_ready_quorum_starts_early() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(MatchRules {
                ready_quorum: Some(1.0),
                ..rules(MatchMode::Solo, DeployMode::DirectSpawn)
            }),
            1,
        );
        let ids = join(&mut ctx, 2);
        ctx.handle_input(input(ids[0], ClientMsg::Ready));
        ctx.update(0.1);
        assert_eq!(ctx.state(), MatchState::Lobby);

        ctx.handle_input(input(ids[1], ClientMsg::Ready));
        ctx.update(0.1);
        assert_eq!(ctx.state(), MatchState::Loading);
    }

    #[test]
    fn test_full_lobby_force_starts() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(MatchRules {
                max_players: 3,
                ..rules(MatchMode::Solo, DeployMode::DirectSpawn)
            }),
            1,
        );
        let ids = join(&mut ctx, 4);
        ctx.update(0.1);
        assert_eq!(ctx.state(), MatchState::Loading);
        assert!(!ctx.players().contains(&ids[3]));
    }

    #[test]
    fn test_teams_assigned_in_join_order() {
        let (ctx, ids) = playing(rules(MatchMode::Duos, DeployMode::DirectSpawn), 5);
        let teams: Vec<u32> = ids
            .iter()
            .map(|id| ctx.players().get(id).unwrap().team_id)
            .collect();
        assert_eq!(teams, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_stale_continuation_is_discarded() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(rules(MatchMode::Solo, DeployMode::DirectSpawn)),
            1,
        );
        join(&mut ctx, 2);
        ctx.transition_to(MatchState::Loading, TransitionPayload::default());

        // Continuation left over from an earlier state
        let stale_epoch = ctx.epoch - 1;
        ctx.timers
            .schedule(ctx.now, 0.0, stale_epoch, Deferred::FinishLoading);
        ctx.update(0.1);
        assert_eq!(ctx.state(), MatchState::Loading);

        for _ in 0..30 {
            ctx.update(0.1);
        }
        assert_eq!(ctx.state(), MatchState::Playing);
    }

    #[test]
    fn test_exit_cancels_scheduled_continuations() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(rules(MatchMode::Solo, DeployMode::DirectSpawn)),
            1,
        );
        join(&mut ctx, 2);
        ctx.transition_to(MatchState::Loading, TransitionPayload::default());
        assert_eq!(ctx.timers.len(), 1);

        ctx.transition_to(MatchState::Lobby, TransitionPayload::reason("admin"));
        assert!(ctx.timers.is_empty());
        for _ in 0..10 {
            ctx.update(1.0);
        }
        assert_ne!(ctx.state(), MatchState::Deploying);
    }

    #[test]
    fn test_solo_last_player_standing_wins() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 4);

        for (n, id) in ids[..3].iter().enumerate() {
            ctx.handle_input(admin(AdminCommand::Eliminate { player: *id }));
            let placement = ctx.players().get(id).unwrap().placement;
            assert_eq!(placement, Some(4 - n as u32));
        }

        assert_eq!(ctx.players().alive_count(), 1);
        assert_eq!(ctx.state(), MatchState::Ending);
        assert_eq!(ctx.winner(), Some(ids[3]));
        assert_eq!(ctx.players().get(&ids[3]).unwrap().placement, Some(1));

        let msgs = ctx.drain_outbox();
        assert_eq!(
            transitions(&msgs),
            vec![(MatchState::Playing, MatchState::Ending)]
        );
        assert!(msgs.iter().any(|m| matches!(
            m,
            ServerMsg::MatchStateChanged { payload, .. }
                if payload.winner_id == Some(ids[3]) && payload.placement == Some(1)
        )));
    }

    #[test]
    fn test_double_win_check_ends_once() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 3);
        let storm = DamageSource::environment(EliminationSource::Storm);

        // Two eliminations in the same tick window, checks not yet run
        ctx.players
            .eliminate(ctx.now, ids[0], &storm, &mut ctx.rng, &mut ctx.outbox);
        ctx.players
            .eliminate(ctx.now, ids[1], &storm, &mut ctx.rng, &mut ctx.outbox);

        assert!(ctx.check_win_condition());
        assert!(!ctx.check_win_condition());

        let endings = transitions(&ctx.drain_outbox())
            .into_iter()
            .filter(|(_, to)| *to == MatchState::Ending)
            .count();
        assert_eq!(endings, 1);
    }

    #[test]
    fn test_win_check_in_progress_suppresses_nested_call() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 2);
        ctx.players.eliminate(
            ctx.now,
            ids[0],
            &DamageSource::environment(EliminationSource::Admin),
            &mut ctx.rng,
            &mut ctx.outbox,
        );

        ctx.win_check_in_progress = true;
        assert!(!ctx.check_win_condition());
        assert_eq!(ctx.state(), MatchState::Playing);

        ctx.win_check_in_progress = false;
        assert!(ctx.check_win_condition());
    }

    #[test]
    fn test_solo_testing_flag_suppresses_single_player_win() {
        let (mut ctx, ids) = playing(
            MatchRules {
                solo_testing: true,
                ..rules(MatchMode::Solo, DeployMode::DirectSpawn)
            },
            1,
        );
        ctx.handle_input(input(ids[0], ClientMsg::Position { position: Vec3::ONE }));
        assert!(!ctx.check_win_condition());
        assert_eq!(ctx.state(), MatchState::Playing);
    }

    #[test]
    fn test_team_bleed_out_eliminates_and_clears_revive() {
        let (mut ctx, ids) = playing(rules(MatchMode::Duos, DeployMode::DirectSpawn), 4);
        let (a, a_mate, b) = (ids[0], ids[1], ids[2]);
        for id in &ids {
            ctx.handle_input(input(*id, ClientMsg::Position { position: Vec3::ZERO }));
        }

        ctx.handle_input(input(
            b,
            ClientMsg::Hit {
                target: a,
                amount: 500.0,
                location: HitLocation::Body,
                weapon: "smg".to_string(),
            },
        ));
        assert_eq!(ctx.players().get(&a).unwrap().status(), LifeStatus::Downed);
        let deadline = ctx.players().get(&a).unwrap().bleedout_deadline.unwrap();

        while ctx.now() < deadline - 5.0 {
            ctx.update(1.0);
        }
        ctx.handle_input(input(a_mate, ClientMsg::StartRevive { target: a }));
        assert!(ctx.revive().attempt_for_target(&a).is_some());

        while ctx.now() < deadline {
            ctx.update(1.0);
        }

        let record = ctx.players().get(&a).unwrap();
        assert_eq!(record.status(), LifeStatus::Eliminated);
        assert!(ctx.revive().attempt_for_target(&a).is_none());
        let logged = ctx
            .players()
            .eliminations()
            .iter()
            .find(|e| e.victim_id == a)
            .unwrap();
        assert_eq!(logged.source, EliminationSource::Bleedout);
        assert_eq!(logged.killer_id, Some(b));
        assert_eq!(ctx.state(), MatchState::Playing);
        assert!(ctx.reboot().card(&a).is_some());
    }

    #[test]
    fn test_team_wipe_eliminates_downed_teammates() {
        let (mut ctx, ids) = playing(rules(MatchMode::Duos, DeployMode::DirectSpawn), 4);
        let hit = |target: Uuid| {
            input(
                ids[2],
                ClientMsg::Hit {
                    target,
                    amount: 500.0,
                    location: HitLocation::Head,
                    weapon: "sniper".to_string(),
                },
            )
        };

        ctx.handle_input(hit(ids[0]));
        assert_eq!(ctx.players().get(&ids[0]).unwrap().status(), LifeStatus::Downed);
        ctx.handle_input(hit(ids[1]));

        assert_eq!(ctx.players().get(&ids[0]).unwrap().status(), LifeStatus::Eliminated);
        assert_eq!(ctx.players().get(&ids[1]).unwrap().status(), LifeStatus::Eliminated);
        assert!(ctx
            .players()
            .eliminations()
            .iter()
            .any(|e| e.victim_id == ids[0] && e.source == EliminationSource::TeamWipe));
        assert_eq!(ctx.state(), MatchState::Ending);
        assert_eq!(ctx.players().get(&ids[3]).unwrap().placement, Some(1));
    }

    #[test]
    fn test_disconnect_mid_match_eliminates() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 3);
        ctx.handle_input(input(ids[1], ClientMsg::Leave));

        let logged = &ctx.players().eliminations()[0];
        assert_eq!(logged.victim_id, ids[1]);
        assert_eq!(logged.source, EliminationSource::Disconnect);
        assert_eq!(ctx.connected(), 2);
    }

    #[test]
    fn test_non_admin_commands_denied() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 2);
        ctx.handle_input(input(
            ids[0],
            ClientMsg::Admin {
                command: AdminCommand::Eliminate { player: ids[1] },
            },
        ));
        assert_eq!(ctx.players().alive_count(), 2);
        assert!(ctx
            .drain_outbox()
            .iter()
            .any(|m| matches!(m, ServerMsg::Denied { player_id, .. } if *player_id == ids[0])));
    }

    #[test]
    fn test_invincible_player_ignores_hits() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 2);
        ctx.handle_input(admin(AdminCommand::SetInvincible {
            player: ids[0],
            enabled: true,
        }));
        ctx.handle_input(input(
            ids[1],
            ClientMsg::Hit {
                target: ids[0],
                amount: 500.0,
                location: HitLocation::Head,
                weapon: "sniper".to_string(),
            },
        ));
        assert_eq!(ctx.players().get(&ids[0]).unwrap().status(), LifeStatus::Alive);
    }

    #[test]
    fn test_deploy_jump_is_idempotent_and_stragglers_are_ejected() {
        let mut ctx = MatchContext::new(
            Uuid::new_v4(),
            Arc::new(rules(MatchMode::Solo, DeployMode::AirDrop)),
            9,
        );
        let ids = join(&mut ctx, 3);
        ctx.transition_to(MatchState::Loading, TransitionPayload::default());
        while ctx.state() == MatchState::Loading {
            ctx.update(1.0);
        }
        assert_eq!(ctx.state(), MatchState::Deploying);

        ctx.update(5.0);
        assert_eq!(ctx.jump(ids[0]), Ok(true));
        assert_eq!(ctx.jump(ids[0]), Ok(false));
        assert_eq!(ctx.jump(Uuid::from_u128(999)), Err(JumpDenied::NotAboard));

        let flight = ctx.flight().unwrap();
        let bus = flight.position(ctx.now());
        assert!((bus.y - 800.0).abs() < 1e-3);
        assert!(ctx.players().get(&ids[1]).unwrap().position.distance(bus) < 1e-3);

        while ctx.state() == MatchState::Deploying {
            ctx.update(1.0);
        }
        assert_eq!(ctx.state(), MatchState::Playing);

        let jumps: Vec<(Uuid, bool)> = ctx
            .drain_outbox()
            .iter()
            .filter_map(|m| match m {
                ServerMsg::PlayerJumped {
                    player_id, forced, ..
                } => Some((*player_id, *forced)),
                _ => None,
            })
            .collect();
        assert_eq!(jumps.len(), 3);
        assert_eq!(jumps[0], (ids[0], false));
        assert!(jumps[1..].iter().all(|(_, forced)| *forced));
    }

    #[test]
    fn test_flight_path_crosses_map() {
        let mut ctx = MatchContext::new(Uuid::new_v4(), Arc::new(MatchRules::default()), 5);
        let flight = ctx.plan_flight();
        let radius = ctx.rules.map_radius;

        assert!((flight.start.y - 800.0).abs() < 1e-3);
        assert!(flight.start.distance(flight.end) >= radius * 2.0 * 0.9);
        assert!(
            crate::game::geometry::horizontal_distance(flight.start, Vec3::ZERO) <= radius + 1e-2
        );
    }

    #[test]
    fn test_supply_drops_stretch_out() {
        let (mut ctx, _) = playing(
            MatchRules {
                supply_drop_initial: 10.0,
                supply_drop_growth: 2.0,
                ..rules(MatchMode::Solo, DeployMode::DirectSpawn)
            },
            2,
        );

        let mut drop_times = Vec::new();
        for _ in 0..75 {
            ctx.update(1.0);
            if ctx
                .drain_outbox()
                .iter()
                .any(|m| matches!(m, ServerMsg::SupplyDrop { .. }))
            {
                drop_times.push(ctx.now());
            }
        }
        let start = drop_times[0] - 10.0;
        let offsets: Vec<f32> = drop_times.iter().map(|t| t - start).collect();
        assert_eq!(offsets, vec![10.0, 30.0, 70.0]);
    }

    #[test]
    fn test_ending_resets_back_to_lobby() {
        let (mut ctx, ids) = playing(rules(MatchMode::Solo, DeployMode::DirectSpawn), 2);
        ctx.handle_input(admin(AdminCommand::Eliminate { player: ids[0] }));
        assert_eq!(ctx.state(), MatchState::Ending);

        for _ in 0..20 {
            ctx.update(1.0);
        }
        assert_eq!(ctx.state(), MatchState::Lobby);
        assert_eq!(ctx.players().total_count(), 0);
        assert_eq!(ctx.connected(), 2);
        assert_eq!(ctx.storm().phase(), 0);
    }

    #[test]
    fn test_registry_finds_open_lobby() {
        let registry = MatchRegistry::new();
        let (_game, handle) = GameMatch::new(Uuid::new_v4(), Arc::new(MatchRules::default()), 1);
        registry.insert(handle.clone());

        let found = registry.find_available_match().unwrap();
        assert_eq!(found.id, handle.id);
        assert_eq!(registry.summaries().len(), 1);
        assert_eq!(registry.total_players(), 0);
    }

    #[tokio::test]
    async fn test_step_publishes_broadcasts_and_summary() {
        let (mut game, handle) = GameMatch::new(
            Uuid::new_v4(),
            Arc::new(rules(MatchMode::Solo, DeployMode::DirectSpawn)),
            3,
        );
        let mut rx = handle.subscribe();
        let player = Uuid::from_u128(1);
        handle
            .input_tx
            .send(input(player, ClientMsg::Join { display_name: Some("ace".into()) }))
            .await
            .unwrap();

        assert!(game.step(tick_delta()));
        assert_eq!(handle.connected(), 1);
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMsg::PlayerCountUpdate { alive_count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (game, handle) = GameMatch::new(Uuid::new_v4(), Arc::new(MatchRules::default()), 9);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(game.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        let stopped = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(matches!(stopped, Ok(Ok(()))));
        drop(handle);
    }
}
