//! Match-trace cheat analysis.
//!
//! Reconstructs engagements (when an attacker first had a victim in view, and
//! how long it took to fire and land damage) from recorded per-tick player
//! state, then turns those engagements plus the raw event tables into a
//! bounded, rule-based suspicion score per player.
//!
//! ```text
//! TraceReader ──► rounds + players ──► engagement ──► signals ──► scoring
//!                                                                   │
//!                                          AnalysisReport ◄─────────┘
//! ```

pub mod analysis;
pub mod cache;
pub mod config;
pub mod engagement;
pub mod events;
pub mod geometry;
pub mod logging;
pub mod players;
pub mod rounds;
pub mod scoring;
pub mod server;
pub mod signals;
pub mod sources;
pub mod stats;
pub mod timing;
pub mod trace;

/// Simulation step index inside a trace.
pub type Tick = u32;

/// Stable numeric player identifier (Steam ID 64).
pub type SteamId = u64;
