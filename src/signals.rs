//! Per-player measured signals.
//!
//! Each signal is computed independently from the event tables (and, for
//! aim snaps, one batched orientation query). A signal without enough data
//! is `None` or an empty list; it never fails the analysis.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::events::{is_non_gun_damage, Kill, MatchEvents};
use crate::geometry::aim_delta;
use crate::logging::{self, obj, v_int, v_str, Domain, ProfileScope};
use crate::rounds::Round;
use crate::scoring::SignalValues;
use crate::stats::{max, mean, min, percent, variance};
use crate::timing::TickRate;
use crate::trace::{Row, TraceReader};
use crate::{SteamId, Tick};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerSignals {
    pub reaction_times: Vec<f64>,
    pub avg_reaction_ms: Option<f64>,
    pub min_reaction_ms: Option<f64>,
    pub ttd_values_ms: Vec<f64>,
    pub avg_ttd_ms: Option<f64>,
    pub kills: usize,
    pub headshot_kills: usize,
    pub hs_rate: f64,
    pub hs_variance: Option<f64>,
    pub smoke_kills: usize,
    pub smoke_kill_rate: f64,
    pub gun_hits: usize,
    pub bullets_fired: usize,
    pub accuracy: f64,
    pub snap_scores: Vec<f64>,
    pub avg_snap_angle: Option<f64>,
    pub max_snap_angle: Option<f64>,
}

impl PlayerSignals {
    /// The immutable record the rule table is evaluated over.
    pub fn values(&self) -> SignalValues {
        SignalValues {
            avg_reaction_ms: self.avg_reaction_ms,
            min_reaction_ms: self.min_reaction_ms,
            hs_rate: self.hs_rate,
            kills: self.kills,
            hs_variance: self.hs_variance,
            smoke_kills: self.smoke_kills,
            smoke_kill_rate: self.smoke_kill_rate,
            accuracy: self.accuracy,
            bullets_fired: self.bullets_fired,
            max_snap_angle: self.max_snap_angle,
        }
    }
}

/// Milliseconds from being hit to first hitting that attacker back.
///
/// Per round, each damage taken opens a window of `window` ticks in which
/// the player's first hit on the same attacker counts, provided it lands at
/// least `min_gap` ticks later. An attacker counts once per round, after the
/// first qualifying reaction.
pub fn reaction_times(
    player: SteamId,
    rounds: &[Round],
    events: &MatchEvents,
    rate: TickRate,
    window: u32,
    min_gap: u32,
) -> Vec<f64> {
    let mut out = Vec::new();
    for round in rounds {
        let mut answered: HashSet<SteamId> = HashSet::new();
        let taken = events
            .damage
            .iter()
            .filter(|d| d.victim == Some(player) && round.contains(d.tick));
        for hurt in taken {
            let Some(attacker) = hurt.attacker else { continue };
            if answered.contains(&attacker) {
                continue;
            }
            let limit = hurt.tick.saturating_add(window);
            let retaliation = events.damage.iter().find(|d| {
                d.attacker == Some(player)
                    && d.victim == Some(attacker)
                    && d.tick > hurt.tick
                    && d.tick <= limit
            });
            if let Some(r) = retaliation {
                let gap = r.tick - hurt.tick;
                if gap >= min_gap {
                    out.push(rate.ticks_to_ms(gap as f64));
                    answered.insert(attacker);
                }
            }
        }
    }
    out
}

/// Milliseconds from each round's start to the player's first damage dealt.
pub fn time_to_damage(player: SteamId, rounds: &[Round], events: &MatchEvents, rate: TickRate) -> Vec<f64> {
    rounds
        .iter()
        .filter_map(|round| {
            events
                .damage
                .iter()
                .find(|d| d.attacker == Some(player) && round.contains(d.tick))
                .map(|d| rate.ticks_to_ms((d.tick - round.start_tick) as f64))
        })
        .collect()
}

/// Headshot percentage per round, for rounds with at least one kill.
pub fn headshot_rates_by_round(kills: &[&Kill], rounds: &[Round]) -> Vec<f64> {
    rounds
        .iter()
        .filter_map(|round| {
            let in_round: Vec<_> = kills.iter().filter(|k| round.contains(k.tick)).collect();
            if in_round.is_empty() {
                return None;
            }
            let hs = in_round.iter().filter(|k| k.headshot).count();
            Some(percent(hs, in_round.len()))
        })
        .collect()
}

/// Pitch/yaw per player per tick, from one batched query.
#[derive(Debug, Clone, Default)]
pub struct OrientationTable {
    by_player: HashMap<SteamId, BTreeMap<Tick, (f64, f64)>>,
}

impl OrientationTable {
    /// Samples `window` ticks before and including every credited kill of
    /// every listed player. A failed query yields an empty table.
    pub fn sample(reader: &dyn TraceReader, events: &MatchEvents, players: &[SteamId], window: u32) -> Self {
        let _profile = ProfileScope::new("signals.orientation_sample");
        let mut ticks = BTreeSet::new();
        for &p in players {
            for k in events.kills_by(p) {
                ticks.extend(k.tick.saturating_sub(window)..=k.tick);
            }
        }
        if ticks.is_empty() {
            return Self::default();
        }
        let ticks: Vec<Tick> = ticks.into_iter().collect();
        match reader.ticks(&["pitch", "yaw"], &ticks) {
            Ok(rows) => {
                let mut by_player: HashMap<SteamId, BTreeMap<Tick, (f64, f64)>> = HashMap::new();
                for row in rows {
                    if let (Some(p), Some(y)) = (row.f64_field("pitch"), row.f64_field("yaw")) {
                        by_player.entry(row.steamid).or_default().insert(row.tick, (p, y));
                    }
                }
                Self { by_player }
            }
            Err(err) => {
                logging::warn(
                    Domain::Scoring,
                    "orientation_sampling_failed",
                    obj(&[("ticks", v_int(ticks.len() as u64)), ("error", v_str(&err.to_string()))]),
                );
                Self::default()
            }
        }
    }

    pub fn insert(&mut self, player: SteamId, tick: Tick, pitch: f64, yaw: f64) {
        self.by_player.entry(player).or_default().insert(tick, (pitch, yaw));
    }

    /// Largest consecutive-sample aim change in `[kill_tick - window, kill_tick]`.
    /// Needs at least two samples.
    pub fn snap_before(&self, player: SteamId, kill_tick: Tick, window: u32) -> Option<f64> {
        let samples: Vec<(f64, f64)> = self
            .by_player
            .get(&player)?
            .range(kill_tick.saturating_sub(window)..=kill_tick)
            .map(|(_, v)| *v)
            .collect();
        if samples.len() < 2 {
            return None;
        }
        Some(
            samples
                .windows(2)
                .map(|w| aim_delta(w[0].0, w[0].1, w[1].0, w[1].1))
                .fold(0.0, f64::max),
        )
    }
}

pub fn compute_signals(
    player: SteamId,
    rounds: &[Round],
    events: &MatchEvents,
    orientations: &OrientationTable,
    rate: TickRate,
    cfg: &AnalysisConfig,
) -> PlayerSignals {
    let window = rate.scale(cfg.reaction_window_ticks_64);
    let min_gap = rate.scale(cfg.min_reaction_ticks_64).max(cfg.min_reaction_ticks_64);
    let reactions = reaction_times(player, rounds, events, rate, window, min_gap);
    let ttd = time_to_damage(player, rounds, events, rate);

    let kills: Vec<&Kill> = events.kills_by(player).collect();
    let headshot_kills = kills.iter().filter(|k| k.headshot).count();
    let hs_by_round = headshot_rates_by_round(&kills, rounds);
    let smoke_kills = kills.iter().filter(|k| k.through_smoke).count();

    let gun_hits = events
        .damage
        .iter()
        .filter(|d| d.attacker == Some(player) && !is_non_gun_damage(&d.weapon))
        .count();
    let bullets_fired = events.bullets.iter().filter(|b| b.shooter == Some(player)).count();

    let snaps: Vec<f64> = kills
        .iter()
        .filter_map(|k| orientations.snap_before(player, k.tick, cfg.snap_window_ticks))
        .collect();

    PlayerSignals {
        avg_reaction_ms: mean(&reactions),
        min_reaction_ms: min(&reactions),
        reaction_times: reactions,
        avg_ttd_ms: mean(&ttd),
        ttd_values_ms: ttd,
        kills: kills.len(),
        headshot_kills,
        hs_rate: percent(headshot_kills, kills.len()),
        hs_variance: if hs_by_round.len() > 1 { variance(&hs_by_round) } else { None },
        smoke_kills,
        smoke_kill_rate: percent(smoke_kills, kills.len()),
        gun_hits,
        bullets_fired,
        accuracy: percent(gun_hits, bullets_fired),
        avg_snap_angle: mean(&snaps),
        max_snap_angle: max(&snaps),
        snap_scores: snaps,
    }
}
