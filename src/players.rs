//! Participant registry and per-player kill/death totals.
//!
//! Team affiliation is a one-shot snapshot read at a fixed early tick, not a
//! tracked state: players absent at that tick stay [`Team::Unknown`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::{Kill, MatchEvents};
use crate::logging::{self, obj, v_int, v_str, Domain};
use crate::rounds::{TEAM_CT, TEAM_T};
use crate::stats::round_to;
use crate::trace::{Row, TraceReader};
use crate::{SteamId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Team {
    #[serde(rename = "CT")]
    Ct,
    #[serde(rename = "T")]
    T,
    #[serde(rename = "?")]
    Unknown,
}

impl Team {
    pub fn from_team_num(num: i64) -> Self {
        match num {
            TEAM_CT => Team::Ct,
            TEAM_T => Team::T,
            _ => Team::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub steamid: SteamId,
    pub name: String,
    pub team: Team,
}

pub type Registry = BTreeMap<SteamId, Player>;

/// Every distinct non-zero attacker and victim seen in the kill table.
/// The first name seen for an identifier is kept.
pub fn collect_players(kills: &[Kill]) -> Registry {
    let mut players = Registry::new();
    for kill in kills {
        for (id, name) in [
            (kill.attacker, kill.attacker_name.as_deref()),
            (kill.victim, kill.victim_name.as_deref()),
        ] {
            let Some(id) = id else { continue };
            players.entry(id).or_insert_with(|| Player {
                steamid: id,
                name: name.unwrap_or_default().to_string(),
                team: Team::Unknown,
            });
        }
    }
    players
}

/// Reads team membership at `snapshot_tick`. On query failure every player
/// stays unknown.
pub fn assign_teams(reader: &dyn TraceReader, players: &mut Registry, snapshot_tick: Tick) {
    match reader.ticks(&["team_num"], &[snapshot_tick]) {
        Ok(rows) => {
            for row in rows {
                if let Some(p) = players.get_mut(&row.steamid) {
                    if let Some(num) = row.i64_field("team_num") {
                        p.team = Team::from_team_num(num);
                    }
                }
            }
        }
        Err(err) => {
            logging::warn(
                Domain::Players,
                "team_snapshot_failed",
                obj(&[("tick", v_int(snapshot_tick as u64)), ("error", v_str(&err.to_string()))]),
            );
            for p in players.values_mut() {
                p.team = Team::Unknown;
            }
        }
    }
}

pub fn build_registry(reader: &dyn TraceReader, events: &MatchEvents, snapshot_tick: Tick) -> Registry {
    let mut players = collect_players(&events.kills);
    assign_teams(reader, &mut players, snapshot_tick);
    logging::info(
        Domain::Players,
        "registry_built",
        obj(&[
            ("count", v_int(players.len() as u64)),
            (
                "unknown_team",
                v_int(players.values().filter(|p| p.team == Team::Unknown).count() as u64),
            ),
        ]),
    );
    players
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicStats {
    pub name: String,
    pub team: Team,
    pub kills: u32,
    pub deaths: u32,
    pub kd: f64,
}

pub fn basic_stats(player: &Player, events: &MatchEvents) -> BasicStats {
    let kills = events.kills_by(player.steamid).count() as u32;
    let deaths = events.deaths_of(player.steamid).count() as u32;
    let kd = if deaths > 0 {
        round_to(kills as f64 / deaths as f64, 2)
    } else {
        kills as f64
    };
    BasicStats {
        name: player.name.clone(),
        team: player.team,
        kills,
        deaths,
        kd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::JsonTrace;
    use serde_json::json;

    fn kill(tick: Tick, a: Option<SteamId>, an: &str, v: Option<SteamId>, vn: &str) -> Kill {
        Kill {
            tick,
            attacker: a,
            attacker_name: Some(an.to_string()),
            victim: v,
            victim_name: Some(vn.to_string()),
            headshot: false,
            through_smoke: false,
            weapon: "ak47".into(),
            attacker_team: None,
            victim_team: None,
        }
    }

    #[test]
    fn first_seen_name_wins_and_zero_ids_skipped() {
        let kills = vec![
            kill(1, Some(10), "alpha", Some(20), "bravo"),
            kill(2, Some(20), "bravo_renamed", Some(10), "alpha"),
            kill(3, None, "world", Some(30), "charlie"),
        ];
        let reg = collect_players(&kills);
        assert_eq!(reg.len(), 3);
        assert_eq!(reg[&20].name, "bravo");
        assert!(reg.values().all(|p| p.team == Team::Unknown));
    }

    #[test]
    fn team_snapshot_leaves_absent_players_unknown() {
        let doc = json!({
            "header": {"map_name": "de_ancient"},
            "ticks": [
                {"tick": 5000, "steamid": 10, "team_num": 3},
                {"tick": 5000, "steamid": 20, "team_num": 2}
            ]
        });
        let trace = JsonTrace::from_slice(doc.to_string().as_bytes()).unwrap();
        let mut reg = collect_players(&[
            kill(1, Some(10), "a", Some(20), "b"),
            kill(2, Some(30), "c", Some(10), "a"),
        ]);
        assign_teams(&trace, &mut reg, 5000);
        assert_eq!(reg[&10].team, Team::Ct);
        assert_eq!(reg[&20].team, Team::T);
        assert_eq!(reg[&30].team, Team::Unknown);
    }

    #[test]
    fn kd_rounds_and_handles_no_deaths() {
        let events = MatchEvents {
            kills: vec![
                kill(1, Some(10), "a", Some(20), "b"),
                kill(2, Some(10), "a", Some(20), "b"),
                kill(3, Some(20), "b", Some(10), "a"),
                kill(4, Some(10), "a", Some(20), "b"),
                kill(5, Some(20), "b", Some(10), "a"),
                kill(6, Some(20), "b", Some(10), "a"),
            ],
            ..Default::default()
        };
        let reg = collect_players(&events.kills);
        let a = basic_stats(&reg[&10], &events);
        assert_eq!((a.kills, a.deaths), (3, 3));
        assert_eq!(a.kd, 1.0);

        let solo = MatchEvents {
            kills: vec![kill(1, Some(10), "a", Some(20), "b")],
            ..Default::default()
        };
        let s = basic_stats(&reg[&10], &solo);
        assert_eq!(s.kd, 1.0);
        assert_eq!(s.deaths, 0);
    }
}
