use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How the backward field-of-view scan picks the sight tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SightMode {
    /// Start of the contiguous in-view run that ends at the damage tick.
    /// Scanning stops at the first out-of-cone tick once a candidate exists.
    LastContiguousRun,
    /// Earliest in-cone tick anywhere in the lookback window. Out-of-cone
    /// ticks are skipped instead of ending the scan.
    EarliestInWindow,
}

impl SightMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "last_contiguous_run" | "contiguous" => Some(SightMode::LastContiguousRun),
            "earliest_in_window" | "earliest" => Some(SightMode::EarliestInWindow),
            _ => None,
        }
    }
}

/// Constants for engagement reconstruction and signal computation.
///
/// Tick-valued windows with a `_64` suffix are expressed at 64 tick and get
/// scaled by [`crate::timing::TickRate::scale`] before use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Half-angle of the "could plausibly see" cone, in degrees.
    pub fov_half_deg: f64,
    pub lookback_ticks_64: u32,
    pub lookback_stride: u32,
    /// Added to the z coordinate of both players before the angle test.
    pub eye_height: f64,
    /// End tick offset synthesized for a round with no terminating event.
    pub round_cap_ticks: u32,
    /// Tick at which team membership is snapshotted.
    pub team_snapshot_tick: u32,
    pub reaction_window_ticks_64: u32,
    pub min_reaction_ticks_64: u32,
    /// Orientation samples taken before a kill for snap detection (unscaled).
    pub snap_window_ticks: u32,
    /// Cap on per-sample lists copied into the report.
    pub max_listed_samples: usize,
    pub sight_mode: SightMode,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fov_half_deg: 40.0,
            lookback_ticks_64: 192,
            lookback_stride: 2,
            eye_height: 64.0,
            round_cap_ticks: 20_000,
            team_snapshot_tick: 5_000,
            reaction_window_ticks_64: 256,
            min_reaction_ticks_64: 3,
            snap_window_ticks: 8,
            max_listed_samples: 50,
            sight_mode: SightMode::LastContiguousRun,
        }
    }
}

impl AnalysisConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            fov_half_deg: env_parse("FOV_HALF_DEG").unwrap_or(d.fov_half_deg),
            lookback_ticks_64: env_parse("LOOKBACK_TICKS").unwrap_or(d.lookback_ticks_64),
            lookback_stride: env_parse("LOOKBACK_STRIDE")
                .filter(|s: &u32| *s > 0)
                .unwrap_or(d.lookback_stride),
            eye_height: env_parse("EYE_HEIGHT").unwrap_or(d.eye_height),
            round_cap_ticks: env_parse("ROUND_CAP_TICKS").unwrap_or(d.round_cap_ticks),
            team_snapshot_tick: env_parse("TEAM_SNAPSHOT_TICK").unwrap_or(d.team_snapshot_tick),
            reaction_window_ticks_64: env_parse("REACTION_WINDOW_TICKS")
                .unwrap_or(d.reaction_window_ticks_64),
            min_reaction_ticks_64: env_parse("MIN_REACTION_TICKS").unwrap_or(d.min_reaction_ticks_64),
            snap_window_ticks: env_parse("SNAP_WINDOW_TICKS").unwrap_or(d.snap_window_ticks),
            max_listed_samples: env_parse("MAX_LISTED_SAMPLES").unwrap_or(d.max_listed_samples),
            sight_mode: std::env::var("SIGHT_MODE")
                .ok()
                .and_then(|v| SightMode::parse(v.trim()))
                .unwrap_or(d.sight_mode),
        }
    }
}

/// Settings for the HTTP front end and its on-disk working directories.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub download_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub max_upload_mb: u64,
    /// Match-history API key. Lookups are disabled when absent.
    pub faceit_api_key: Option<String>,
    pub faceit_api_base: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT").unwrap_or(5000),
            upload_dir: PathBuf::from(std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "uploads".to_string())),
            download_dir: PathBuf::from(
                std::env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "downloads".to_string()),
            ),
            cache_dir: PathBuf::from(std::env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string())),
            max_upload_mb: env_parse("MAX_UPLOAD_MB").unwrap_or(500),
            faceit_api_key: std::env::var("FACEIT_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            faceit_api_base: std::env::var("FACEIT_API_BASE")
                .unwrap_or_else(|_| crate::sources::faceit::DEFAULT_API_BASE.to_string()),
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_constants() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.fov_half_deg, 40.0);
        assert_eq!(cfg.lookback_ticks_64, 192);
        assert_eq!(cfg.lookback_stride, 2);
        assert_eq!(cfg.eye_height, 64.0);
        assert_eq!(cfg.round_cap_ticks, 20_000);
        assert_eq!(cfg.sight_mode, SightMode::LastContiguousRun);
    }

    #[test]
    fn sight_mode_parses_aliases() {
        assert_eq!(SightMode::parse("earliest"), Some(SightMode::EarliestInWindow));
        assert_eq!(
            SightMode::parse("last_contiguous_run"),
            Some(SightMode::LastContiguousRun)
        );
        assert_eq!(SightMode::parse("first"), None);
    }
}
