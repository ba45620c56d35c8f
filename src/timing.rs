//! Tick-rate detection and tick/time conversions.

use serde::{Deserialize, Serialize};

use crate::trace::Header;
use crate::Tick;

/// Simulation rate of a trace in ticks per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TickRate(u32);

impl TickRate {
    pub const BASE: TickRate = TickRate(64);
    pub const HIGH: TickRate = TickRate(128);

    pub fn new(rate: u32) -> Self {
        Self(rate.max(1))
    }

    /// 128 when recorded ticks per second of playback rounds to 100 or more,
    /// 64 otherwise (including when the header carries no usable duration).
    pub fn detect(header: &Header) -> Self {
        if header.playback_ticks > 0.0 && header.playback_time > 0.0 {
            let ratio = (header.playback_ticks / header.playback_time).round();
            if ratio >= 100.0 {
                return Self::HIGH;
            }
        }
        Self::BASE
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Scales a window expressed at 64 tick to this rate (truncating).
    pub fn scale(self, ticks_at_64: u32) -> u32 {
        (u64::from(ticks_at_64) * u64::from(self.0) / 64) as u32
    }

    pub fn ticks_to_ms(self, ticks: f64) -> f64 {
        ticks / f64::from(self.0) * 1000.0
    }

    /// Whole milliseconds between two ticks. Exact halves round to even.
    pub fn span_ms(self, from: Tick, to: Tick) -> i64 {
        self.ticks_to_ms(f64::from(to) - f64::from(from)).round_ties_even() as i64
    }
}
