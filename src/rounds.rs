//! Round segmentation: turns round-boundary events into ordered,
//! non-overlapping tick ranges with the score at each round's close.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::logging::{self, obj, v_int, v_str, Domain};
use crate::trace::{Row, TraceReader};
use crate::Tick;

pub const TEAM_T: i64 = 2;
pub const TEAM_CT: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number.
    pub index: u32,
    pub start_tick: Tick,
    pub end_tick: Tick,
    pub ct_score: u32,
    pub t_score: u32,
}

impl Round {
    /// Inclusive on both ends.
    pub fn contains(&self, tick: Tick) -> bool {
        self.start_tick <= tick && tick <= self.end_tick
    }
}

/// Pairs each start with the nearest end strictly after it.
///
/// A start with no following end is closed `cap` ticks later. An end that
/// would run into the next round's start is pulled back to the tick before
/// it, and a round left with no extent is dropped. `starts` and `ends` must
/// be sorted.
pub fn segment(starts: &[Tick], ends: &[Tick], cap: u32) -> Vec<Round> {
    let mut rounds = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let matched = ends
            .iter()
            .copied()
            .find(|&e| e > start)
            .unwrap_or_else(|| start.saturating_add(cap));
        let end = match starts.get(i + 1) {
            Some(&next) if matched >= next => next.saturating_sub(1),
            _ => matched,
        };
        if end <= start {
            logging::debug(
                Domain::Rounds,
                "round_collapsed",
                obj(&[("start_tick", v_int(start as u64)), ("end_tick", v_int(end as u64))]),
            );
            continue;
        }
        rounds.push(Round {
            index: rounds.len() as u32 + 1,
            start_tick: start,
            end_tick: end,
            ct_score: 0,
            t_score: 0,
        });
    }
    rounds
}

/// Fills in scores from the team round-total counters one tick before each
/// round's end, keeping the per-side maximum seen at that tick. A failed
/// query leaves every score at zero.
pub fn sample_scores(reader: &dyn TraceReader, rounds: &mut [Round]) {
    if rounds.is_empty() {
        return;
    }
    let score_ticks: Vec<Tick> = rounds.iter().map(|r| r.end_tick.saturating_sub(1)).collect();
    let rows = match reader.ticks(&["team_rounds_total", "team_num"], &score_ticks) {
        Ok(rows) => rows,
        Err(err) => {
            logging::warn(
                Domain::Rounds,
                "score_sampling_failed",
                obj(&[("error", v_str(&err.to_string()))]),
            );
            for r in rounds.iter_mut() {
                r.ct_score = 0;
                r.t_score = 0;
            }
            return;
        }
    };

    for (round, tick) in rounds.iter_mut().zip(score_ticks) {
        let (mut ct, mut t) = (0u32, 0u32);
        for row in rows.iter().filter(|r| r.tick == tick) {
            let total = row
                .i64_field("team_rounds_total")
                .map(|v| v.clamp(0, u32::MAX as i64) as u32)
                .unwrap_or(0);
            match row.i64_field("team_num") {
                Some(TEAM_CT) => ct = ct.max(total),
                Some(TEAM_T) => t = t.max(total),
                _ => {}
            }
        }
        round.ct_score = ct;
        round.t_score = t;
    }
}

/// Segments and scores the rounds of a trace.
pub fn build_rounds(reader: &dyn TraceReader, starts: &[Tick], ends: &[Tick], cap: u32) -> Vec<Round> {
    let mut rounds = segment(starts, ends, cap);
    sample_scores(reader, &mut rounds);
    logging::info(
        Domain::Rounds,
        "rounds_built",
        obj(&[
            ("count", v_int(rounds.len() as u64)),
            ("starts", json!(starts.len())),
            ("ends", json!(ends.len())),
        ]),
    );
    rounds
}

/// The round whose range contains `tick`.
pub fn round_at(rounds: &[Round], tick: Tick) -> Option<&Round> {
    rounds.iter().find(|r| r.contains(tick))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::JsonTrace;

    #[test]
    fn pairs_with_nearest_following_end() {
        let rounds = segment(&[100, 1000], &[50, 900, 1900], 20_000);
        assert_eq!(rounds.len(), 2);
        assert_eq!((rounds[0].start_tick, rounds[0].end_tick), (100, 900));
        assert_eq!((rounds[1].start_tick, rounds[1].end_tick), (1000, 1900));
        assert_eq!(rounds[1].index, 2);
    }

    #[test]
    fn open_round_is_capped() {
        let rounds = segment(&[500], &[], 20_000);
        assert_eq!(rounds[0].end_tick, 20_500);
        assert!(round_at(&rounds, 20_500).is_some());
        assert!(round_at(&rounds, 20_501).is_none());
    }

    #[test]
    fn rounds_never_overlap() {
        // second start arrives before any end; the first round is clipped
        let rounds = segment(&[100, 300, 700], &[600, 1200], 20_000);
        for pair in rounds.windows(2) {
            assert!(pair[0].end_tick < pair[1].start_tick);
        }
        for r in &rounds {
            assert!(r.start_tick < r.end_tick);
        }
        assert_eq!(rounds[0].end_tick, 299);
        assert_eq!(rounds[1].end_tick, 600);
    }

    #[test]
    fn scores_take_max_per_side() {
        let doc = serde_json::json!({
            "header": {"map_name": "de_mirage"},
            "ticks": [
                {"tick": 899, "steamid": 1, "team_num": 3, "team_rounds_total": 1},
                {"tick": 899, "steamid": 2, "team_num": 3, "team_rounds_total": 0},
                {"tick": 899, "steamid": 3, "team_num": 2, "team_rounds_total": 0},
                {"tick": 1899, "steamid": 3, "team_num": 2, "team_rounds_total": 1}
            ]
        });
        let trace = JsonTrace::from_slice(doc.to_string().as_bytes()).unwrap();
        let rounds = build_rounds(&trace, &[100, 1000], &[900, 1900], 20_000);
        assert_eq!((rounds[0].ct_score, rounds[0].t_score), (1, 0));
        assert_eq!((rounds[1].ct_score, rounds[1].t_score), (0, 1));
    }
}
