//! End-to-end analysis of one trace and the report shape handed to callers.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::config::AnalysisConfig;
use crate::engagement::{self, Engagement};
use crate::events::MatchEvents;
use crate::logging::{self, obj, v_int, v_str, Domain, ProfileScope};
use crate::players::{self, BasicStats, Player};
use crate::rounds;
use crate::scoring;
use crate::signals::{compute_signals, OrientationTable, PlayerSignals};
use crate::sources::resolve_trace_path;
use crate::stats::{mean, min, round_to};
use crate::timing::TickRate;
use crate::trace::{JsonTrace, TraceReader};
use crate::SteamId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub map: String,
    pub tick_rate: u32,
    pub total_rounds: usize,
    pub players: BTreeMap<SteamId, BasicStats>,
    pub anticheat: BTreeMap<SteamId, SuspicionProfile>,
}

/// Per-player suspicion assessment as reported. Rounded for display; the
/// score itself is computed from unrounded signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspicionProfile {
    pub name: String,
    pub steamid: String,
    pub suspicion_score: u32,
    pub flags: Vec<String>,
    pub reaction_times: Vec<f64>,
    pub avg_reaction_ms: Option<f64>,
    pub min_reaction_ms: Option<f64>,
    pub ttd_values_ms: Vec<f64>,
    pub avg_ttd_ms: Option<f64>,
    pub hs_rate: f64,
    pub hs_variance: Option<f64>,
    pub accuracy: f64,
    pub smoke_kills: usize,
    pub smoke_kill_rate: f64,
    pub snap_scores: Vec<f64>,
    pub avg_snap_angle: Option<f64>,
    pub max_snap_angle: Option<f64>,
    #[serde(flatten)]
    pub fov: EngagementSummary,
}

/// Engagement-derived fields, all in whole milliseconds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngagementSummary {
    pub fov_sight_to_fire: Vec<i64>,
    pub fov_avg_sight_to_fire: Option<i64>,
    pub fov_min_sight_to_fire: Option<i64>,
    pub fov_avg_sight_to_damage: Option<i64>,
    pub fov_avg_fire_to_damage: Option<i64>,
    pub engagement_count: usize,
}

impl EngagementSummary {
    pub fn from_engagements(engagements: &[&Engagement], list_cap: usize) -> Self {
        let stf: Vec<i64> = engagements.iter().filter_map(|e| e.sight_to_fire_ms).collect();
        let std: Vec<f64> = engagements.iter().map(|e| e.sight_to_damage_ms as f64).collect();
        let ftd: Vec<f64> = engagements
            .iter()
            .filter_map(|e| e.fire_to_damage_ms.map(|v| v as f64))
            .collect();
        let stf_f: Vec<f64> = stf.iter().map(|&v| v as f64).collect();

        Self {
            fov_avg_sight_to_fire: mean(&stf_f).map(|v| v.round_ties_even() as i64),
            fov_min_sight_to_fire: min(&stf_f).map(|v| v.round_ties_even() as i64),
            fov_avg_sight_to_damage: mean(&std).map(|v| v.round_ties_even() as i64),
            fov_avg_fire_to_damage: mean(&ftd).map(|v| v.round_ties_even() as i64),
            fov_sight_to_fire: stf.into_iter().take(list_cap).collect(),
            engagement_count: engagements.len(),
        }
    }
}

pub fn build_profile(
    player: &Player,
    signals: &PlayerSignals,
    engagements: &[&Engagement],
    cfg: &AnalysisConfig,
) -> SuspicionProfile {
    let assessment = scoring::evaluate(&signals.values());
    let cap = cfg.max_listed_samples;
    SuspicionProfile {
        name: player.name.clone(),
        steamid: player.steamid.to_string(),
        suspicion_score: assessment.score,
        flags: assessment.flags,
        reaction_times: signals.reaction_times.iter().take(cap).copied().collect(),
        avg_reaction_ms: signals.avg_reaction_ms.map(|v| round_to(v, 1)),
        min_reaction_ms: signals.min_reaction_ms.map(|v| round_to(v, 1)),
        ttd_values_ms: signals.ttd_values_ms.iter().map(|v| round_to(*v, 0)).collect(),
        avg_ttd_ms: signals.avg_ttd_ms.map(|v| round_to(v, 0)),
        hs_rate: round_to(signals.hs_rate, 1),
        hs_variance: signals.hs_variance.map(|v| round_to(v, 1)),
        accuracy: round_to(signals.accuracy, 1),
        smoke_kills: signals.smoke_kills,
        smoke_kill_rate: round_to(signals.smoke_kill_rate, 1),
        snap_scores: signals.snap_scores.iter().take(cap).map(|v| round_to(*v, 1)).collect(),
        avg_snap_angle: signals.avg_snap_angle.map(|v| round_to(v, 1)),
        max_snap_angle: signals.max_snap_angle.map(|v| round_to(v, 1)),
        fov: EngagementSummary::from_engagements(engagements, cap),
    }
}

/// Analyzes an opened trace. Only header and table reads can fail; every
/// per-signal data gap degrades to an absent value.
pub fn analyze(reader: &dyn TraceReader, cfg: &AnalysisConfig) -> Result<AnalysisReport> {
    let _profile = ProfileScope::new("analysis.analyze");
    let header = reader.header()?;
    let rate = TickRate::detect(&header);
    logging::info(
        Domain::Trace,
        "trace_opened",
        obj(&[
            ("map", v_str(&header.map_name)),
            ("tick_rate", v_int(rate.get() as u64)),
            ("playback_ticks", logging::v_num(header.playback_ticks)),
        ]),
    );

    let events = MatchEvents::load(reader)?;
    let rounds = rounds::build_rounds(reader, &events.round_starts, &events.round_ends, cfg.round_cap_ticks);
    let registry = players::build_registry(reader, &events, cfg.team_snapshot_tick);

    let engagements = engagement::reconstruct(reader, &rounds, &events.damage, &events.fires, rate, cfg)?;
    let mut by_attacker: HashMap<SteamId, Vec<&Engagement>> = HashMap::new();
    for e in &engagements {
        by_attacker.entry(e.attacker).or_default().push(e);
    }

    let ids: Vec<SteamId> = registry.keys().copied().collect();
    let orientations = OrientationTable::sample(reader, &events, &ids, cfg.snap_window_ticks);

    let mut anticheat = BTreeMap::new();
    let mut basic = BTreeMap::new();
    for (id, player) in &registry {
        let signals = compute_signals(*id, &rounds, &events, &orientations, rate, cfg);
        let mine = by_attacker.get(id).map(Vec::as_slice).unwrap_or(&[]);
        let profile = build_profile(player, &signals, mine, cfg);
        if profile.suspicion_score > 0 {
            logging::debug(
                Domain::Scoring,
                "player_flagged",
                obj(&[
                    ("steamid", v_int(*id)),
                    ("score", v_int(profile.suspicion_score as u64)),
                    ("flags", serde_json::json!(profile.flags)),
                ]),
            );
        }
        anticheat.insert(*id, profile);
        basic.insert(*id, players::basic_stats(player, &events));
    }

    logging::info(
        Domain::Scoring,
        "analysis_complete",
        obj(&[
            ("rounds", v_int(rounds.len() as u64)),
            ("players", v_int(registry.len() as u64)),
            ("engagements", v_int(engagements.len() as u64)),
            (
                "max_score",
                v_int(anticheat.values().map(|p| p.suspicion_score).max().unwrap_or(0) as u64),
            ),
        ]),
    );

    Ok(AnalysisReport {
        map: header.map_name,
        tick_rate: rate.get(),
        total_rounds: rounds.len(),
        players: basic,
        anticheat,
    })
}

/// Analyzes a trace file, consulting and filling `cache` when given.
pub fn analyze_path(path: &Path, cfg: &AnalysisConfig, cache: Option<&ResultCache>) -> Result<AnalysisReport> {
    let path = resolve_trace_path(path)?;
    if let Some(hit) = cache.and_then(|c| c.get(&path)) {
        return Ok(hit);
    }
    let trace = JsonTrace::open(&path)?;
    let report = analyze(&trace, cfg)?;
    if let Some(c) = cache {
        c.put(&path, &report);
    }
    Ok(report)
}
