//! Rule-based suspicion scoring.
//!
//! The score is an ordered table of threshold rules evaluated over an
//! immutable [`SignalValues`] record. Every rule that fires adds fixed
//! points and a flag carrying the evidence. Rules sharing a `group` are
//! either/or tiers: the first matching rule in table order wins and the rest
//! of the group is skipped. The total is clamped to [`MAX_SCORE`].

use serde::{Deserialize, Serialize};

pub const MAX_SCORE: u32 = 100;

/// Minimum credited kills for the headshot rules.
pub const MIN_KILLS_FOR_HS: usize = 8;
/// Minimum bullets fired for the accuracy rules.
pub const MIN_BULLETS_FOR_ACCURACY: usize = 30;
/// Minimum smoke kills for the smoke rule.
pub const MIN_SMOKE_KILLS: usize = 3;

/// Signal values a score is computed from. Optional values are `None` when
/// the sample was too small; rules on them never fire in that case.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SignalValues {
    pub avg_reaction_ms: Option<f64>,
    pub min_reaction_ms: Option<f64>,
    pub hs_rate: f64,
    pub kills: usize,
    pub hs_variance: Option<f64>,
    pub smoke_kills: usize,
    pub smoke_kill_rate: f64,
    pub accuracy: f64,
    pub bullets_fired: usize,
    pub max_snap_angle: Option<f64>,
}

pub struct Rule {
    pub id: &'static str,
    pub group: &'static str,
    pub points: u32,
    pub applies: fn(&SignalValues) -> bool,
    pub flag: fn(&SignalValues) -> String,
}

fn below(v: Option<f64>, limit: f64) -> bool {
    v.is_some_and(|x| x < limit)
}

fn above(v: Option<f64>, limit: f64) -> bool {
    v.is_some_and(|x| x > limit)
}

fn f(v: Option<f64>) -> f64 {
    v.unwrap_or_default()
}

pub const RULES: [Rule; 10] = [
    Rule {
        id: "inhuman_avg_reaction",
        group: "avg_reaction",
        points: 25,
        applies: |s| below(s.avg_reaction_ms, 120.0),
        flag: |s| format!("Inhuman avg reaction: {:.0}ms", f(s.avg_reaction_ms)),
    },
    Rule {
        id: "very_fast_avg_reaction",
        group: "avg_reaction",
        points: 10,
        applies: |s| below(s.avg_reaction_ms, 180.0),
        flag: |s| format!("Very fast avg reaction: {:.0}ms", f(s.avg_reaction_ms)),
    },
    Rule {
        id: "suspicious_min_reaction",
        group: "min_reaction",
        points: 15,
        applies: |s| below(s.min_reaction_ms, 70.0),
        flag: |s| format!("Suspicious min reaction: {:.0}ms", f(s.min_reaction_ms)),
    },
    Rule {
        id: "abnormal_hs_rate",
        group: "hs_rate",
        points: 25,
        applies: |s| s.hs_rate > 75.0 && s.kills >= MIN_KILLS_FOR_HS,
        flag: |s| format!("Abnormal HS rate: {:.0}%", s.hs_rate),
    },
    Rule {
        id: "high_hs_rate",
        group: "hs_rate",
        points: 5,
        applies: |s| s.hs_rate > 60.0 && s.kills >= MIN_KILLS_FOR_HS,
        flag: |s| format!("High HS rate: {:.0}% (could be skill)", s.hs_rate),
    },
    Rule {
        id: "suspicious_smoke_kills",
        group: "smoke",
        points: 20,
        applies: |s| s.smoke_kill_rate > 20.0 && s.smoke_kills >= MIN_SMOKE_KILLS,
        flag: |s| format!("Suspicious smoke kills: {} ({:.0}%)", s.smoke_kills, s.smoke_kill_rate),
    },
    Rule {
        id: "abnormal_accuracy",
        group: "accuracy",
        points: 20,
        applies: |s| s.accuracy > 55.0 && s.bullets_fired >= MIN_BULLETS_FOR_ACCURACY,
        flag: |s| format!("Abnormal accuracy: {:.0}%", s.accuracy),
    },
    Rule {
        id: "high_accuracy",
        group: "accuracy",
        points: 5,
        applies: |s| s.accuracy > 40.0 && s.bullets_fired >= MIN_BULLETS_FOR_ACCURACY,
        flag: |s| format!("High accuracy: {:.0}%", s.accuracy),
    },
    Rule {
        id: "aim_snap",
        group: "snap",
        points: 15,
        applies: |s| above(s.max_snap_angle, 60.0),
        flag: |s| format!("Aim snap detected: {:.1}\u{b0}", f(s.max_snap_angle)),
    },
    Rule {
        id: "unnatural_hs_consistency",
        group: "hs_consistency",
        points: 10,
        applies: |s| below(s.hs_variance, 80.0) && s.hs_rate > 55.0 && s.kills >= MIN_KILLS_FOR_HS,
        flag: |s| format!("Unnatural HS consistency (variance: {:.0})", f(s.hs_variance)),
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    /// Clamped to `0..=MAX_SCORE`.
    pub score: u32,
    /// Unclamped sum of awarded points.
    pub raw_points: u32,
    pub flags: Vec<String>,
    pub fired: Vec<&'static str>,
}

pub fn evaluate(values: &SignalValues) -> Assessment {
    evaluate_rules(&RULES, values)
}

pub fn evaluate_rules(rules: &[Rule], values: &SignalValues) -> Assessment {
    let mut satisfied_groups: Vec<&str> = Vec::new();
    let mut raw_points = 0u32;
    let mut flags = Vec::new();
    let mut fired = Vec::new();

    for rule in rules {
        if satisfied_groups.contains(&rule.group) || !(rule.applies)(values) {
            continue;
        }
        satisfied_groups.push(rule.group);
        raw_points += rule.points;
        flags.push((rule.flag)(values));
        fired.push(rule.id);
    }

    Assessment {
        score: raw_points.min(MAX_SCORE),
        raw_points,
        flags,
        fired,
    }
}
