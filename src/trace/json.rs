use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{EventRow, Header, TickRow, TraceReader};
use crate::{SteamId, Tick};

#[derive(Deserialize)]
struct RawTrace {
    header: Header,
    #[serde(default)]
    events: HashMap<String, Vec<Map<String, Value>>>,
    #[serde(default)]
    ticks: Vec<Map<String, Value>>,
}

/// In-memory trace loaded from a JSON export.
#[derive(Debug, Clone)]
pub struct JsonTrace {
    header: Header,
    events: HashMap<String, Vec<EventRow>>,
    ticks: BTreeMap<Tick, Vec<(SteamId, Map<String, Value>)>>,
}

impl JsonTrace {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open trace {}", path.display()))?;
        let raw: RawTrace = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parse trace {}", path.display()))?;
        Self::from_raw(raw)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: RawTrace = serde_json::from_slice(bytes).context("parse trace")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawTrace) -> Result<Self> {
        let mut events = HashMap::with_capacity(raw.events.len());
        for (name, rows) in raw.events {
            let mut parsed = Vec::with_capacity(rows.len());
            for (i, mut fields) in rows.into_iter().enumerate() {
                let tick = take_tick(&mut fields)
                    .ok_or_else(|| anyhow!("event {}[{}]: missing or invalid tick", name, i))?;
                parsed.push(EventRow { tick, fields });
            }
            events.insert(name, parsed);
        }

        let mut ticks: BTreeMap<Tick, Vec<(SteamId, Map<String, Value>)>> = BTreeMap::new();
        for (i, mut fields) in raw.ticks.into_iter().enumerate() {
            let tick = take_tick(&mut fields)
                .ok_or_else(|| anyhow!("ticks[{}]: missing or invalid tick", i))?;
            let steamid = fields
                .remove("steamid")
                .and_then(|v| match v {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .ok_or_else(|| anyhow!("ticks[{}]: missing or invalid steamid", i))?;
            ticks.entry(tick).or_default().push((steamid, fields));
        }

        Ok(Self {
            header: raw.header,
            events,
            ticks,
        })
    }
}

fn take_tick(fields: &mut Map<String, Value>) -> Option<Tick> {
    match fields.remove("tick")? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|t| Tick::try_from(t).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl TraceReader for JsonTrace {
    fn header(&self) -> Result<Header> {
        Ok(self.header.clone())
    }

    fn event(&self, name: &str) -> Result<Vec<EventRow>> {
        Ok(self.events.get(name).cloned().unwrap_or_default())
    }

    fn ticks(&self, fields: &[&str], ticks: &[Tick]) -> Result<Vec<TickRow>> {
        let wanted: BTreeSet<Tick> = ticks.iter().copied().collect();
        let mut out = Vec::new();
        for tick in wanted {
            let Some(rows) = self.ticks.get(&tick) else {
                continue;
            };
            for (steamid, row) in rows {
                let projected = fields
                    .iter()
                    .filter_map(|f| row.get(*f).map(|v| ((*f).to_string(), v.clone())))
                    .collect();
                out.push(TickRow {
                    tick,
                    steamid: *steamid,
                    fields: projected,
                });
            }
        }
        Ok(out)
    }
}
