//! Match-history API client (player lookup, recent matches, match detail).

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::logging::{self, obj, v_str, Domain};

pub const DEFAULT_API_BASE: &str = "https://open.faceit.com/data/v4";
pub const DEFAULT_MATCH_LIMIT: u32 = 20;
const GAME: &str = "cs2";
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub player_id: String,
    pub nickname: String,
    pub avatar: String,
    pub faceit_elo: i64,
    pub skill_level: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub match_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    pub game_mode: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RosterEntry {
    pub nickname: String,
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TeamRoster {
    pub name: String,
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetail {
    pub match_id: String,
    pub demo_url: String,
    pub map: String,
    pub score: String,
    pub finished_at: i64,
    pub teams: BTreeMap<String, TeamRoster>,
}

/// A match list entry with whatever detail could be fetched for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedMatch {
    #[serde(flatten)]
    pub summary: MatchSummary,
    pub demo_url: String,
    pub map: String,
    pub score: String,
    pub teams: BTreeMap<String, TeamRoster>,
}

#[async_trait]
pub trait MatchHistory: Send + Sync {
    async fn player(&self, nickname: &str) -> Result<PlayerSummary>;
    async fn matches(&self, player_id: &str, limit: u32) -> Result<Vec<MatchSummary>>;
    async fn match_detail(&self, match_id: &str) -> Result<MatchDetail>;
}

fn str_at<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or("")
}

fn int_at(v: &Value, key: &str) -> i64 {
    v.get(key).and_then(Value::as_i64).unwrap_or(0)
}

pub fn parse_player(data: &Value) -> Result<PlayerSummary> {
    let player_id = data
        .get("player_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("player response without player_id"))?;
    let game = data.pointer("/games/cs2").cloned().unwrap_or(Value::Null);
    Ok(PlayerSummary {
        player_id: player_id.to_string(),
        nickname: str_at(data, "nickname").to_string(),
        avatar: str_at(data, "avatar").to_string(),
        faceit_elo: int_at(&game, "faceit_elo"),
        skill_level: int_at(&game, "skill_level"),
    })
}

pub fn parse_history(data: &Value) -> Vec<MatchSummary> {
    let items = data.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
    items
        .iter()
        .filter_map(|m| {
            let id = m.get("match_id").and_then(Value::as_str)?;
            Some(MatchSummary {
                match_id: id.to_string(),
                started_at: int_at(m, "started_at"),
                finished_at: int_at(m, "finished_at"),
                game_mode: str_at(m, "game_mode").to_string(),
            })
        })
        .collect()
}

/// Pulls the demo URL, map pick, score line and rosters out of a match
/// document. `demo_url` and the map pick may be a string or a list.
pub fn parse_match_detail(match_id: &str, data: &Value) -> MatchDetail {
    let first_or_str = |v: Option<&Value>| -> Option<String> {
        match v? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    };

    let demo_url = first_or_str(data.get("demo_url")).unwrap_or_default();
    let map = first_or_str(data.pointer("/voting/map/pick")).unwrap_or_else(|| "unknown".to_string());

    let score = match data.pointer("/results/score") {
        Some(s) => {
            let side = |k: &str| match s.get(k) {
                Some(Value::Number(n)) => n.to_string(),
                Some(Value::String(t)) => t.clone(),
                _ => "?".to_string(),
            };
            format!("{} - {}", side("faction1"), side("faction2"))
        }
        None => String::new(),
    };

    let mut teams = BTreeMap::new();
    for faction in ["faction1", "faction2"] {
        let team = data.pointer(&format!("/teams/{}", faction)).cloned().unwrap_or(Value::Null);
        let name = team.get("name").and_then(Value::as_str).unwrap_or(faction).to_string();
        let roster = team
            .get("roster")
            .and_then(Value::as_array)
            .map(|players| {
                players
                    .iter()
                    .map(|p| RosterEntry {
                        nickname: str_at(p, "nickname").to_string(),
                        player_id: str_at(p, "player_id").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        teams.insert(faction.to_string(), TeamRoster { name, roster });
    }

    MatchDetail {
        match_id: match_id.to_string(),
        demo_url,
        map,
        score,
        finished_at: int_at(data, "finished_at"),
        teams,
    }
}

/// Attaches match detail to each summary. A failed detail lookup leaves the
/// match in the list with placeholder values.
pub async fn enrich_matches(api: &dyn MatchHistory, matches: Vec<MatchSummary>) -> Vec<EnrichedMatch> {
    let mut out = Vec::with_capacity(matches.len());
    for summary in matches {
        let enriched = match api.match_detail(&summary.match_id).await {
            Ok(d) => EnrichedMatch {
                demo_url: d.demo_url,
                map: d.map,
                score: d.score,
                teams: d.teams,
                summary,
            },
            Err(e) => {
                logging::warn(
                    Domain::Source,
                    "match_detail_failed",
                    obj(&[("match_id", v_str(&summary.match_id)), ("error", v_str(&e.to_string()))]),
                );
                EnrichedMatch {
                    demo_url: String::new(),
                    map: "?".to_string(),
                    score: "?".to_string(),
                    teams: BTreeMap::new(),
                    summary,
                }
            }
        };
        out.push(enriched);
    }
    out
}

pub struct FaceitClient {
    client: Client,
    base: Url,
    api_key: String,
}

impl FaceitClient {
    pub fn new(base: &str, api_key: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let base = Url::parse(base.trim_end_matches('/')).with_context(|| format!("invalid API base {}", base))?;
        if base.cannot_be_a_base() {
            return Err(anyhow!("API base {} cannot carry a path", base));
        }
        Ok(Self { client, base, api_key: api_key.to_string() })
    }

    /// Base URL extended by `segments`, each percent-encoded as a single
    /// path segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("API base {} cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json(&self, segments: &[&str], query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(segments)?;
        let path = url.path().to_string();
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("{} returned HTTP {}", path, status.as_u16()));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl MatchHistory for FaceitClient {
    async fn player(&self, nickname: &str) -> Result<PlayerSummary> {
        let data = self
            .get_json(&["players"], &[("nickname", nickname.to_string()), ("game", GAME.to_string())])
            .await?;
        parse_player(&data)
    }

    async fn matches(&self, player_id: &str, limit: u32) -> Result<Vec<MatchSummary>> {
        let data = self
            .get_json(
                &["players", player_id, "history"],
                &[("game", GAME.to_string()), ("offset", "0".to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(parse_history(&data))
    }

    async fn match_detail(&self, match_id: &str) -> Result<MatchDetail> {
        let data = self.get_json(&["matches", match_id], &[]).await?;
        Ok(parse_match_detail(match_id, &data))
    }
}
