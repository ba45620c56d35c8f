//! Engagement reconstruction.
//!
//! For every first contact (first damage from one player to another within a
//! round) this finds the tick at which the attacker's view first held the
//! victim, then the attacker's first gunshot between that moment and the
//! damage.
//!
//! Pipeline:
//! 1. [`extract_contacts`]: first damage per ordered (attacker, victim) pair per round
//! 2. [`lookback_ticks`]: union of every contact's strided lookback window
//! 3. one batched pose query for exactly those ticks ([`PoseTable`])
//! 4. [`find_sight_tick`]: backward field-of-view scan per contact
//! 5. [`first_fire_between`]: fire correlation against the attacker's shots

use std::collections::{BTreeSet, HashMap, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{AnalysisConfig, SightMode};
use crate::events::{is_non_gun_discharge, Damage, WeaponFire};
use crate::geometry::{view_angle_to, Vec3};
use crate::logging::{self, obj, v_int, v_str, Domain, ProfileScope};
use crate::rounds::Round;
use crate::timing::TickRate;
use crate::trace::{Row, TickRow, TraceReader};
use crate::{SteamId, Tick};

pub const POSE_FIELDS: [&str; 6] = ["X", "Y", "Z", "pitch", "yaw", "is_alive"];

/// First damage between an ordered attacker/victim pair in one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub attacker: SteamId,
    pub victim: SteamId,
    pub damage_tick: Tick,
    pub round_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSample {
    pub tick: Tick,
    pub position: Vec3,
    pub pitch: f64,
    pub yaw: f64,
    pub is_alive: bool,
}

impl PoseSample {
    /// Rows missing any coordinate or angle are unusable and yield `None`.
    /// A row without an `is_alive` column counts as alive.
    pub fn from_row(row: &TickRow) -> Option<Self> {
        let is_alive = match row.fields().get("is_alive") {
            None | Some(Value::Null) => true,
            Some(_) => row.bool_field("is_alive"),
        };
        Some(Self {
            tick: row.tick,
            position: Vec3::new(row.f64_field("X")?, row.f64_field("Y")?, row.f64_field("Z")?),
            pitch: row.f64_field("pitch")?,
            yaw: row.f64_field("yaw")?,
            is_alive,
        })
    }
}

pub type PlayerPoses = HashMap<Tick, PoseSample>;

/// Sparse pose samples keyed by player, then tick.
#[derive(Debug, Clone, Default)]
pub struct PoseTable {
    by_player: HashMap<SteamId, PlayerPoses>,
}

impl PoseTable {
    pub fn from_rows(rows: &[TickRow]) -> Self {
        let mut by_player: HashMap<SteamId, PlayerPoses> = HashMap::new();
        for row in rows {
            if let Some(sample) = PoseSample::from_row(row) {
                by_player.entry(row.steamid).or_default().insert(row.tick, sample);
            }
        }
        Self { by_player }
    }

    pub fn player(&self, id: SteamId) -> Option<&PlayerPoses> {
        self.by_player.get(&id).filter(|p| !p.is_empty())
    }

    pub fn len(&self) -> usize {
        self.by_player.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reconstructed engagement. `sight_to_fire_ms` and `fire_to_damage_ms` are
/// both present or both absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engagement {
    pub round_index: u32,
    pub attacker: SteamId,
    pub victim: SteamId,
    pub damage_tick: Tick,
    pub sight_tick: Tick,
    pub sight_to_damage_ms: i64,
    pub sight_to_fire_ms: Option<i64>,
    pub fire_to_damage_ms: Option<i64>,
}

/// Walks each round's damage in tick order, keeping the first hit per
/// ordered pair. Self-damage and damage without a resolved attacker are
/// skipped; damage outside every round never becomes a contact.
pub fn extract_contacts(rounds: &[Round], damage: &[Damage]) -> Vec<Contact> {
    let mut contacts = Vec::new();
    for round in rounds {
        let mut seen: HashSet<(SteamId, SteamId)> = HashSet::new();
        for hit in damage.iter().filter(|d| round.contains(d.tick)) {
            let (Some(attacker), Some(victim)) = (hit.attacker, hit.victim) else {
                continue;
            };
            if attacker == victim || !seen.insert((attacker, victim)) {
                continue;
            }
            contacts.push(Contact {
                attacker,
                victim,
                damage_tick: hit.tick,
                round_index: round.index,
            });
        }
    }
    contacts
}

/// Every tick needed by the backward scans: for each contact, `lookback`
/// ticks back from the damage tick at `stride`, floored at tick 0.
pub fn lookback_ticks(contacts: &[Contact], lookback: u32, stride: u32) -> Vec<Tick> {
    let stride = stride.max(1);
    let mut ticks = BTreeSet::new();
    for c in contacts {
        let mut dt = 0;
        while dt < lookback {
            ticks.insert(c.damage_tick.saturating_sub(dt));
            dt += stride;
        }
    }
    ticks.into_iter().collect()
}

/// Backward field-of-view scan from `damage_tick`.
///
/// Each visited tick prefers the stride-aligned sample and falls back to
/// the raw tick. Ticks where either pose is missing are skipped; a tick
/// where either player is dead ends the scan. Returns `None` when nothing
/// qualifies or the only candidate is the damage tick itself.
pub fn find_sight_tick(
    attacker: &PlayerPoses,
    victim: &PlayerPoses,
    damage_tick: Tick,
    lookback: u32,
    cfg: &AnalysisConfig,
) -> Option<Tick> {
    let stride = cfg.lookback_stride.max(1);
    let floor = damage_tick.saturating_sub(lookback);
    let mut candidate: Option<Tick> = None;

    let mut t = damage_tick;
    while t > floor {
        let aligned = t - t % stride;
        let a = attacker.get(&aligned).or_else(|| attacker.get(&t));
        let v = victim.get(&aligned).or_else(|| victim.get(&t));

        if let (Some(a), Some(v)) = (a, v) {
            if !a.is_alive || !v.is_alive {
                break;
            }
            let eye = a.position.raised(cfg.eye_height);
            let target = v.position.raised(cfg.eye_height);
            let angle = view_angle_to(a.pitch, a.yaw, eye, target);

            if angle <= cfg.fov_half_deg {
                candidate = Some(if attacker.contains_key(&aligned) { aligned } else { t });
            } else if candidate.is_some() && cfg.sight_mode == SightMode::LastContiguousRun {
                break;
            }
        }

        match t.checked_sub(stride) {
            Some(next) => t = next,
            None => break,
        }
    }

    candidate.filter(|&s| s < damage_tick)
}

/// Gun discharge ticks per shooter, sorted. Melee and utility are excluded.
pub fn fire_index(fires: &[WeaponFire]) -> HashMap<SteamId, Vec<Tick>> {
    let mut index: HashMap<SteamId, Vec<Tick>> = HashMap::new();
    for f in fires {
        let Some(shooter) = f.shooter else { continue };
        if is_non_gun_discharge(&f.weapon) {
            continue;
        }
        index.entry(shooter).or_default().push(f.tick);
    }
    for ticks in index.values_mut() {
        ticks.sort_unstable();
    }
    index
}

/// Earliest shot in `[sight, damage]`. `fires` must be sorted.
pub fn first_fire_between(fires: &[Tick], sight: Tick, damage: Tick) -> Option<Tick> {
    let start = fires.partition_point(|&t| t < sight);
    fires.get(start).copied().filter(|&t| t <= damage)
}

/// Resolves one contact against the sampled poses and the shot index.
pub fn resolve_contact(
    contact: &Contact,
    poses: &PoseTable,
    fires: &HashMap<SteamId, Vec<Tick>>,
    lookback: u32,
    rate: TickRate,
    cfg: &AnalysisConfig,
) -> Option<Engagement> {
    let attacker = poses.player(contact.attacker)?;
    let victim = poses.player(contact.victim)?;
    let sight = find_sight_tick(attacker, victim, contact.damage_tick, lookback, cfg)?;

    let shot = fires
        .get(&contact.attacker)
        .and_then(|f| first_fire_between(f, sight, contact.damage_tick));

    Some(Engagement {
        round_index: contact.round_index,
        attacker: contact.attacker,
        victim: contact.victim,
        damage_tick: contact.damage_tick,
        sight_tick: sight,
        sight_to_damage_ms: rate.span_ms(sight, contact.damage_tick),
        sight_to_fire_ms: shot.map(|ft| rate.span_ms(sight, ft)),
        fire_to_damage_ms: shot.map(|ft| rate.span_ms(ft, contact.damage_tick)),
    })
}

/// Runs the full reconstruction over a trace. A failed bulk pose query is an
/// error; individual unresolvable contacts are dropped.
pub fn reconstruct(
    reader: &dyn TraceReader,
    rounds: &[Round],
    damage: &[Damage],
    fires: &[WeaponFire],
    rate: TickRate,
    cfg: &AnalysisConfig,
) -> Result<Vec<Engagement>> {
    let _profile = ProfileScope::new("engagement.reconstruct");
    let contacts = extract_contacts(rounds, damage);
    if contacts.is_empty() {
        logging::info(Domain::Engagement, "no_contacts", obj(&[]));
        return Ok(Vec::new());
    }

    let lookback = rate.scale(cfg.lookback_ticks_64);
    let ticks = lookback_ticks(&contacts, lookback, cfg.lookback_stride);
    let poses = PoseTable::from_rows(&reader.ticks(&POSE_FIELDS, &ticks)?);
    let shots = fire_index(fires);

    let engagements: Vec<Engagement> = contacts
        .iter()
        .filter_map(|c| resolve_contact(c, &poses, &shots, lookback, rate, cfg))
        .collect();

    logging::info(
        Domain::Engagement,
        "engagements_reconstructed",
        obj(&[
            ("contacts", v_int(contacts.len() as u64)),
            ("sampled_ticks", v_int(ticks.len() as u64)),
            ("pose_samples", v_int(poses.len() as u64)),
            ("engagements", v_int(engagements.len() as u64)),
            (
                "with_fire",
                v_int(engagements.iter().filter(|e| e.sight_to_fire_ms.is_some()).count() as u64),
            ),
            ("sight_mode", v_str(&format!("{:?}", cfg.sight_mode))),
        ]),
    );
    Ok(engagements)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATK: SteamId = 1;
    const VIC: SteamId = 2;

    fn pose(tick: Tick, x: f64, y: f64, yaw: f64, alive: bool) -> PoseSample {
        PoseSample {
            tick,
            position: Vec3::new(x, y, 0.0),
            pitch: 0.0,
            yaw,
            is_alive: alive,
        }
    }

    /// Attacker at the origin looking along `yaw_at(t)`, victim 1000 units down +x.
    fn scene(from: Tick, to: Tick, yaw_at: impl Fn(Tick) -> f64) -> (PlayerPoses, PlayerPoses) {
        let mut a = PlayerPoses::new();
        let mut v = PlayerPoses::new();
        for t in from..=to {
            a.insert(t, pose(t, 0.0, 0.0, yaw_at(t), true));
            v.insert(t, pose(t, 1000.0, 0.0, 0.0, true));
        }
        (a, v)
    }

    fn round(index: u32, start: Tick, end: Tick) -> Round {
        Round {
            index,
            start_tick: start,
            end_tick: end,
            ct_score: 0,
            t_score: 0,
        }
    }

    fn hit(tick: Tick, a: Option<SteamId>, v: Option<SteamId>) -> Damage {
        Damage {
            tick,
            attacker: a,
            victim: v,
            weapon: "ak47".into(),
        }
    }

    #[test]
    fn sight_tick_is_start_of_last_in_view_run() {
        let t0: Tick = 1000;
        // out of cone (90°) up to T, in cone (10°) from T+2 on
        let (a, v) = scene(t0 - 100, t0 + 50, |t| if t <= t0 { 90.0 } else { 10.0 });
        let cfg = AnalysisConfig::default();
        let sight = find_sight_tick(&a, &v, t0 + 50, 192, &cfg).unwrap();
        assert_eq!(sight, t0 + 2);
        assert_eq!(TickRate::BASE.span_ms(sight, t0 + 50), ((48.0 / 64.0) * 1000.0_f64).round() as i64);
    }

    #[test]
    fn earliest_mode_skips_gaps() {
        let t0: Tick = 1000;
        // in view early, out briefly, in view again before damage
        let (a, v) = scene(t0 - 100, t0 + 50, |t| {
            if t >= t0 - 40 && t < t0 - 20 {
                5.0
            } else if t < t0 {
                90.0
            } else {
                5.0
            }
        });
        let mut cfg = AnalysisConfig::default();
        assert_eq!(find_sight_tick(&a, &v, t0 + 50, 192, &cfg), Some(t0));
        cfg.sight_mode = SightMode::EarliestInWindow;
        assert_eq!(find_sight_tick(&a, &v, t0 + 50, 192, &cfg), Some(t0 - 40));
    }

    #[test]
    fn death_boundary_stops_scan() {
        let t0: Tick = 1000;
        let (mut a, v) = scene(t0 - 100, t0 + 50, |_| 0.0);
        for t in t0 - 100..=t0 + 20 {
            a.get_mut(&t).unwrap().is_alive = false;
        }
        let cfg = AnalysisConfig::default();
        // alive and in view only after T+20
        assert_eq!(find_sight_tick(&a, &v, t0 + 50, 192, &cfg), Some(t0 + 22));
    }

    #[test]
    fn point_blank_contact_is_discarded() {
        let t0: Tick = 1000;
        // only the damage tick itself is in view
        let (a, v) = scene(t0 - 100, t0, |t| if t == t0 { 0.0 } else { 90.0 });
        let cfg = AnalysisConfig::default();
        assert_eq!(find_sight_tick(&a, &v, t0, 192, &cfg), None);
    }

    #[test]
    fn never_in_view_is_discarded() {
        let (a, v) = scene(0, 300, |_| 180.0);
        let cfg = AnalysisConfig::default();
        assert_eq!(find_sight_tick(&a, &v, 300, 192, &cfg), None);
    }

    #[test]
    fn odd_damage_tick_falls_back_to_raw_ticks() {
        // only odd ticks sampled; the aligned (even) ticks are missing
        let mut a = PlayerPoses::new();
        let mut v = PlayerPoses::new();
        for t in (901..=1001).step_by(2) {
            a.insert(t, pose(t, 0.0, 0.0, 0.0, true));
            v.insert(t, pose(t, 1000.0, 0.0, 0.0, true));
        }
        let cfg = AnalysisConfig::default();
        let sight = find_sight_tick(&a, &v, 1001, 100, &cfg).unwrap();
        assert_eq!(sight % 2, 1);
        assert_eq!(sight, 903);
    }

    #[test]
    fn contacts_keep_first_hit_per_pair_per_round() {
        let rounds = vec![round(1, 100, 500), round(2, 600, 900)];
        let damage = vec![
            hit(150, Some(ATK), Some(VIC)),
            hit(160, Some(ATK), Some(VIC)),
            hit(170, Some(VIC), Some(ATK)),
            hit(180, Some(ATK), Some(ATK)),
            hit(190, None, Some(VIC)),
            hit(550, Some(ATK), Some(VIC)),
            hit(650, Some(ATK), Some(VIC)),
        ];
        let contacts = extract_contacts(&rounds, &damage);
        let ticks: Vec<_> = contacts.iter().map(|c| (c.damage_tick, c.round_index)).collect();
        assert_eq!(ticks, vec![(150, 1), (170, 1), (650, 2)]);
        for c in &contacts {
            let r = &rounds[(c.round_index - 1) as usize];
            assert!(r.start_tick <= c.damage_tick && c.damage_tick <= r.end_tick);
        }
    }

    #[test]
    fn lookback_union_is_strided_and_floored() {
        let contacts = vec![
            Contact { attacker: ATK, victim: VIC, damage_tick: 10, round_index: 1 },
            Contact { attacker: VIC, victim: ATK, damage_tick: 13, round_index: 1 },
        ];
        let ticks = lookback_ticks(&contacts, 12, 2);
        assert_eq!(ticks, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 13]);
    }

    #[test]
    fn fire_correlation_excludes_utility_and_splits_time() {
        let fires = vec![
            WeaponFire { tick: 1005, shooter: Some(ATK), weapon: "weapon_flashbang".into() },
            WeaponFire { tick: 990, shooter: Some(ATK), weapon: "weapon_ak47".into() },
            WeaponFire { tick: 1020, shooter: Some(ATK), weapon: "weapon_ak47".into() },
            WeaponFire { tick: 1030, shooter: Some(ATK), weapon: "weapon_ak47".into() },
        ];
        let index = fire_index(&fires);
        assert_eq!(index[&ATK], vec![990, 1020, 1030]);
        assert_eq!(first_fire_between(&index[&ATK], 1000, 1050), Some(1020));
        assert_eq!(first_fire_between(&index[&ATK], 1031, 1050), None);

        let (a, v) = scene(900, 1050, |t| if t < 1000 { 90.0 } else { 0.0 });
        let mut poses = PoseTable::default();
        poses.by_player.insert(ATK, a);
        poses.by_player.insert(VIC, v);
        let contact = Contact { attacker: ATK, victim: VIC, damage_tick: 1050, round_index: 1 };
        let cfg = AnalysisConfig::default();
        let e = resolve_contact(&contact, &poses, &index, 192, TickRate::BASE, &cfg).unwrap();
        assert_eq!(e.sight_tick, 1000);
        let (stf, ftd) = (e.sight_to_fire_ms.unwrap(), e.fire_to_damage_ms.unwrap());
        assert!((stf + ftd - e.sight_to_damage_ms).abs() <= 1);
        assert!(e.sight_tick < e.damage_tick);
    }

    #[test]
    fn missing_poses_drop_the_contact() {
        let contact = Contact { attacker: ATK, victim: VIC, damage_tick: 100, round_index: 1 };
        let cfg = AnalysisConfig::default();
        let empty = PoseTable::default();
        assert!(resolve_contact(&contact, &empty, &HashMap::new(), 192, TickRate::BASE, &cfg).is_none());
    }

    fn pose_row(tick: Tick, steamid: SteamId, fields: Value) -> TickRow {
        match fields {
            Value::Object(fields) => TickRow { tick, steamid, fields },
            _ => panic!("pose fields must be an object"),
        }
    }

    #[test]
    fn absent_alive_flag_reads_as_alive() {
        let bare = pose_row(10, ATK, serde_json::json!({"X": 0.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 0.0}));
        assert!(PoseSample::from_row(&bare).unwrap().is_alive);
        let null = pose_row(10, ATK, serde_json::json!({"X": 0.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 0.0, "is_alive": null}));
        assert!(PoseSample::from_row(&null).unwrap().is_alive);
        let dead = pose_row(10, ATK, serde_json::json!({"X": 0.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 0.0, "is_alive": false}));
        assert!(!PoseSample::from_row(&dead).unwrap().is_alive);
    }

    #[test]
    fn contacts_resolve_without_alive_column() {
        let mut rows = Vec::new();
        for t in (800..=1000).step_by(2) {
            rows.push(pose_row(t, ATK, serde_json::json!({"X": 0.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 0.0})));
            rows.push(pose_row(t, VIC, serde_json::json!({"X": 1000.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 180.0})));
        }
        let table = PoseTable::from_rows(&rows);
        let contact = Contact { attacker: ATK, victim: VIC, damage_tick: 1000, round_index: 1 };
        let cfg = AnalysisConfig::default();
        let e = resolve_contact(&contact, &table, &HashMap::new(), 192, TickRate::BASE, &cfg).unwrap();
        assert!(e.sight_tick < 1000);
    }

    #[test]
    fn open_round_cap_excludes_late_damage() {
        let rounds = crate::rounds::segment(&[1000], &[], 20000);
        assert_eq!(rounds[0].end_tick, 21000);
        let damage = vec![hit(21000, Some(1), Some(2)), hit(21001, Some(3), Some(4))];
        let contacts = extract_contacts(&rounds, &damage);
        assert_eq!(contacts.len(), 1);
        assert_eq!((contacts[0].attacker, contacts[0].damage_tick), (1, 21000));
    }
}
