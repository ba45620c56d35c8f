//! Trace reader seam.
//!
//! The binary match format is read by an external component. The analysis
//! only needs three queries from it: the header, a named event table, and
//! per-player state at an explicit list of ticks. [`TraceReader`] is that
//! contract; [`JsonTrace`] implements it over a pre-extracted JSON export.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{SteamId, Tick};

mod json;

pub use json::JsonTrace;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    #[serde(default = "unknown_map")]
    pub map_name: String,
    #[serde(default)]
    pub playback_ticks: f64,
    /// Seconds.
    #[serde(default)]
    pub playback_time: f64,
}

fn unknown_map() -> String {
    "unknown".to_string()
}

/// One row of a discrete event table.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub tick: Tick,
    pub fields: Map<String, Value>,
}

/// One player's requested state at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRow {
    pub tick: Tick,
    pub steamid: SteamId,
    pub fields: Map<String, Value>,
}

pub trait TraceReader {
    fn header(&self) -> Result<Header>;

    /// Rows of the named event table. A table the trace does not carry is empty.
    fn event(&self, name: &str) -> Result<Vec<EventRow>>;

    /// Per-player rows at exactly the requested ticks, projected to `fields`.
    fn ticks(&self, fields: &[&str], ticks: &[Tick]) -> Result<Vec<TickRow>>;
}

/// Typed access to loosely-typed row fields.
pub trait Row {
    fn fields(&self) -> &Map<String, Value>;

    fn f64_field(&self, key: &str) -> Option<f64> {
        match self.fields().get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn i64_field(&self, key: &str) -> Option<i64> {
        match self.fields().get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Missing or unparseable flags read as `false`.
    fn bool_field(&self, key: &str) -> bool {
        match self.fields().get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Some(Value::String(s)) => matches!(s.trim(), "true" | "True" | "1"),
            _ => false,
        }
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields().get(key)?.as_str()
    }

    /// A player identifier; zero and unparseable values are unresolved.
    fn id_field(&self, key: &str) -> Option<SteamId> {
        let id = match self.fields().get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }?;
        (id != 0).then_some(id)
    }
}

impl Row for EventRow {
    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

impl Row for TickRow {
    fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}
