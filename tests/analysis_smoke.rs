use std::fs;
use std::io::Write;
use std::path::PathBuf;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use sightline::analysis::{analyze, analyze_path};
use sightline::cache::ResultCache;
use sightline::config::{AnalysisConfig, SightMode};
use sightline::players::Team;
use sightline::trace::JsonTrace;
use tempfile::TempDir;

const A: u64 = 76561198000000001;
const B: u64 = 76561198000000002;

/// One 64-tick round (1000..=3000). A turns onto B at tick 1900, fires at
/// 1910, hits at 1950 and kills at 1970 after a 70 degree flick at 1968.
/// B hits back at 1960.
fn duel_trace() -> Value {
    let mut ticks = Vec::new();
    for t in (1760..=1960).step_by(2) {
        let a_yaw = if t >= 1900 || t <= 1800 { 0.0 } else { 180.0 };
        ticks.push(json!({"tick": t, "steamid": A, "X": 0.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": a_yaw, "is_alive": true}));
        ticks.push(json!({"tick": t, "steamid": B, "X": 500.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 180.0, "is_alive": true}));
    }
    for t in 1962..=1970 {
        let yaw = if t >= 1968 { 70.0 } else { 0.0 };
        ticks.push(json!({"tick": t, "steamid": A, "pitch": 0.0, "yaw": yaw}));
    }
    ticks.push(json!({"tick": 2999, "steamid": A, "team_num": 3, "team_rounds_total": 1}));
    ticks.push(json!({"tick": 2999, "steamid": B, "team_num": 2, "team_rounds_total": 0}));
    ticks.push(json!({"tick": 5000, "steamid": A.to_string(), "team_num": 3}));
    ticks.push(json!({"tick": 5000, "steamid": B.to_string(), "team_num": 2}));

    json!({
        "header": {"map_name": "de_mirage", "playback_ticks": 64000, "playback_time": 1000.0},
        "events": {
            "round_freeze_end": [{"tick": 1000}],
            "round_officially_ended": [{"tick": 3000}],
            "weapon_fire": [
                {"tick": 1910, "user_steamid": A, "weapon": "weapon_ak47"},
                {"tick": 1905, "user_steamid": A, "weapon": "weapon_flashbang"}
            ],
            "fire_bullets": [{"tick": 1910, "user_steamid": A}],
            "player_hurt": [
                {"tick": 1950, "attacker_steamid": A, "user_steamid": B, "weapon": "ak47"},
                {"tick": 1960, "attacker_steamid": B.to_string(), "user_steamid": A.to_string(), "weapon": "glock"}
            ],
            "player_death": [
                {"tick": 1970, "attacker_steamid": A, "attacker_name": "alpha", "user_steamid": B,
                 "user_name": "bravo", "headshot": true, "thrusmoke": false, "weapon": "ak47"}
            ]
        },
        "ticks": ticks
    })
}

fn write_trace(dir: &TempDir, name: &str, trace: &Value) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, serde_json::to_vec(trace).unwrap()).unwrap();
    path
}

#[test]
fn duel_produces_expected_report() {
    let trace = JsonTrace::from_slice(&serde_json::to_vec(&duel_trace()).unwrap()).unwrap();
    let report = analyze(&trace, &AnalysisConfig::default()).unwrap();

    assert_eq!(report.map, "de_mirage");
    assert_eq!(report.tick_rate, 64);
    assert_eq!(report.total_rounds, 1);

    let a = &report.players[&A];
    assert_eq!((a.name.as_str(), a.team, a.kills, a.deaths), ("alpha", Team::Ct, 1, 0));
    assert_eq!(a.kd, 1.0);
    let b = &report.players[&B];
    assert_eq!((b.team, b.kills, b.deaths), (Team::T, 0, 1));
    assert_eq!(b.kd, 0.0);

    let pa = &report.anticheat[&A];
    assert_eq!(pa.fov.engagement_count, 1);
    assert_eq!(pa.fov.fov_sight_to_fire, vec![156]);
    assert_eq!(pa.fov.fov_avg_sight_to_damage, Some(781));
    assert_eq!(pa.fov.fov_avg_fire_to_damage, Some(625));
    assert_eq!(pa.ttd_values_ms, vec![14844.0]);
    assert_eq!(pa.hs_rate, 100.0);
    assert_eq!(pa.accuracy, 100.0);
    assert_eq!(pa.max_snap_angle, Some(70.0));
    assert!(pa.avg_reaction_ms.is_none());
    assert_eq!(pa.suspicion_score, 15);
    assert_eq!(pa.flags, vec!["Aim snap detected: 70.0\u{b0}".to_string()]);

    let pb = &report.anticheat[&B];
    assert_eq!(pb.reaction_times, vec![156.25]);
    assert_eq!(pb.avg_reaction_ms, Some(156.2));
    assert_eq!(pb.suspicion_score, 10);
    assert_eq!(pb.fov.engagement_count, 1);
    assert!(pb.fov.fov_sight_to_fire.is_empty());
}

#[test]
fn earliest_sight_mode_looks_past_the_gap() {
    let trace = JsonTrace::from_slice(&serde_json::to_vec(&duel_trace()).unwrap()).unwrap();
    let cfg = AnalysisConfig { sight_mode: SightMode::EarliestInWindow, ..AnalysisConfig::default() };
    let report = analyze(&trace, &cfg).unwrap();
    let pa = &report.anticheat[&A];
    assert_eq!(pa.fov.fov_avg_sight_to_damage, Some(2969));
    assert_eq!(pa.fov.fov_sight_to_fire, vec![2344]);
}

#[test]
fn missing_poses_drop_the_engagement_only() {
    let mut trace = duel_trace();
    let ticks = trace["ticks"].as_array_mut().unwrap();
    ticks.retain(|r| !(r["steamid"] == json!(B) && r.get("X").is_some()));
    let trace = JsonTrace::from_slice(&serde_json::to_vec(&trace).unwrap()).unwrap();
    let report = analyze(&trace, &AnalysisConfig::default()).unwrap();
    assert_eq!(report.anticheat[&A].fov.engagement_count, 0);
    assert!(report.anticheat[&A].fov.fov_avg_sight_to_damage.is_none());
    // kill-derived signals are unaffected
    assert_eq!(report.anticheat[&A].max_snap_angle, Some(70.0));
}

#[test]
fn empty_trace_is_well_formed() {
    let trace = JsonTrace::from_slice(
        br#"{"header": {"map_name": "de_vertigo", "playback_ticks": 128000, "playback_time": 1000.0}}"#,
    )
    .unwrap();
    let report = analyze(&trace, &AnalysisConfig::default()).unwrap();
    assert_eq!(report.tick_rate, 128);
    assert_eq!(report.total_rounds, 0);
    assert!(report.players.is_empty());
    assert!(report.anticheat.is_empty());
}

#[test]
fn scores_stay_in_range() {
    let trace = JsonTrace::from_slice(&serde_json::to_vec(&duel_trace()).unwrap()).unwrap();
    let report = analyze(&trace, &AnalysisConfig::default()).unwrap();
    for p in report.anticheat.values() {
        assert!(p.suspicion_score <= 100);
        assert!(p.reaction_times.iter().all(|r| *r > 0.0));
    }
}

#[test]
fn report_json_uses_string_ids() {
    let trace = JsonTrace::from_slice(&serde_json::to_vec(&duel_trace()).unwrap()).unwrap();
    let report = analyze(&trace, &AnalysisConfig::default()).unwrap();
    let v = serde_json::to_value(&report).unwrap();
    let key = A.to_string();
    assert_eq!(v["anticheat"][&key]["steamid"], key.as_str());
    assert_eq!(v["players"][&key]["team"], "CT");
    assert_eq!(v["anticheat"][&key]["fov_min_sight_to_fire"], 156);
}

#[test]
fn cached_analysis_round_trips() {
    let dir = TempDir::new().unwrap();
    let path = write_trace(&dir, "duel.json", &duel_trace());
    let cache = ResultCache::new(dir.path().join("cache"));
    let cfg = AnalysisConfig::default();

    let first = analyze_path(&path, &cfg, Some(&cache)).unwrap();
    assert!(cache.get(&path).is_some());
    let second = analyze_path(&path, &cfg, Some(&cache)).unwrap();
    assert_eq!(first.map, second.map);
    assert_eq!(first.players.keys().collect::<Vec<_>>(), second.players.keys().collect::<Vec<_>>());
    assert_eq!(first.anticheat[&A].flags, second.anticheat[&A].flags);
    assert_eq!(first.anticheat[&B].suspicion_score, second.anticheat[&B].suspicion_score);
}

#[test]
fn gzip_upload_is_unpacked_and_analyzed() {
    let dir = TempDir::new().unwrap();
    let gz = dir.path().join("duel.json.gz");
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&serde_json::to_vec(&duel_trace()).unwrap()).unwrap();
    fs::write(&gz, enc.finish().unwrap()).unwrap();

    let report = analyze_path(&gz, &AnalysisConfig::default(), None).unwrap();
    assert_eq!(report.map, "de_mirage");
    assert_eq!(report.anticheat[&A].fov.fov_sight_to_fire, vec![156]);
    assert!(dir.path().join("duel.json").is_file());
}

#[test]
fn zstd_upload_is_unpacked_and_analyzed() {
    let dir = TempDir::new().unwrap();
    let zst = dir.path().join("duel.json.zst");
    let raw = serde_json::to_vec(&duel_trace()).unwrap();
    fs::write(&zst, zstd::encode_all(raw.as_slice(), 3).unwrap()).unwrap();

    let report = analyze_path(&zst, &AnalysisConfig::default(), None).unwrap();
    assert_eq!(report.total_rounds, 1);
    assert_eq!(report.anticheat[&B].reaction_times, vec![156.25]);
}

#[test]
fn corrupt_gzip_upload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let gz = dir.path().join("duel.json.gz");
    fs::write(&gz, b"\x1f\x8b\x08").unwrap();
    assert!(analyze_path(&gz, &AnalysisConfig::default(), None).is_err());
}

/// One 128-tick round starting at 1004. A and B face each other from tick
/// 1900. A fires at 2200 and hits B at 2400 and 2500. B hits back at 2405
/// (5 ticks, too quick to count) and at 2900.
fn high_tick_trace() -> Value {
    let mut ticks = Vec::new();
    for t in (1900..=2400).step_by(2) {
        ticks.push(json!({"tick": t, "steamid": A, "X": 0.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 0.0, "is_alive": true}));
        ticks.push(json!({"tick": t, "steamid": B, "X": 500.0, "Y": 0.0, "Z": 0.0, "pitch": 0.0, "yaw": 180.0, "is_alive": true}));
    }
    ticks.push(json!({"tick": 5000, "steamid": A, "team_num": 3}));
    ticks.push(json!({"tick": 5000, "steamid": B, "team_num": 2}));

    json!({
        "header": {"map_name": "de_ancient", "playback_ticks": 128000, "playback_time": 1000.0},
        "events": {
            "round_freeze_end": [{"tick": 1004}],
            "round_officially_ended": [{"tick": 5000}],
            "weapon_fire": [{"tick": 2200, "user_steamid": A, "weapon": "weapon_ak47"}],
            "player_hurt": [
                {"tick": 2400, "attacker_steamid": A, "user_steamid": B, "weapon": "ak47"},
                {"tick": 2405, "attacker_steamid": B, "user_steamid": A, "weapon": "glock"},
                {"tick": 2500, "attacker_steamid": A, "user_steamid": B, "weapon": "ak47"},
                {"tick": 2900, "attacker_steamid": B, "user_steamid": A, "weapon": "glock"}
            ],
            "player_death": [
                {"tick": 3000, "attacker_steamid": A, "attacker_name": "alpha", "user_steamid": B,
                 "user_name": "bravo", "headshot": false, "thrusmoke": false, "weapon": "ak47"}
            ]
        },
        "ticks": ticks
    })
}

#[test]
fn high_tick_windows_scale_with_rate() {
    let trace = JsonTrace::from_slice(&serde_json::to_vec(&high_tick_trace()).unwrap()).unwrap();
    let report = analyze(&trace, &AnalysisConfig::default()).unwrap();
    assert_eq!(report.tick_rate, 128);

    // lookback is 384 ticks, so the sight run reaches back to 2018
    let pa = &report.anticheat[&A];
    assert_eq!(pa.fov.fov_avg_sight_to_damage, Some(2984));
    assert_eq!(pa.fov.fov_sight_to_fire, vec![1422]);
    // 200 ticks is exactly 1562.5ms
    assert_eq!(pa.fov.fov_avg_fire_to_damage, Some(1562));
    assert_eq!(pa.ttd_values_ms, vec![10906.0]);
    assert_eq!(pa.reaction_times, vec![742.1875]);

    // the 5-tick reply is under the 6-tick minimum; 400 ticks fits the 512 window
    let pb = &report.anticheat[&B];
    assert_eq!(pb.reaction_times, vec![3125.0]);
    assert_eq!(pb.avg_reaction_ms, Some(3125.0));
}
