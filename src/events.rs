//! Typed views over the discrete event tables of a trace.
//!
//! Every table is read once and sorted by tick (stable, so same-tick rows
//! keep trace order). Missing identifiers stay `None` rather than being
//! coerced to a sentinel.

use anyhow::Result;

use crate::trace::{EventRow, Row, TraceReader};
use crate::{SteamId, Tick};

pub const PLAYER_DEATH: &str = "player_death";
pub const PLAYER_HURT: &str = "player_hurt";
pub const WEAPON_FIRE: &str = "weapon_fire";
pub const FIRE_BULLETS: &str = "fire_bullets";
pub const ROUND_FREEZE_END: &str = "round_freeze_end";
pub const ROUND_OFFICIALLY_ENDED: &str = "round_officially_ended";

/// Weapon-name fragments whose discharges are not aimed gunfire.
const NON_GUN_DISCHARGE: [&str; 9] = [
    "knife", "bayonet", "nade", "flash", "smoke", "molotov", "incgrenade", "decoy", "c4",
];

/// Weapon-name fragments whose damage does not count as a bullet hit.
const NON_GUN_DAMAGE: [&str; 9] = [
    "knife",
    "bayonet",
    "hegrenade",
    "flashbang",
    "smokegrenade",
    "molotov",
    "incgrenade",
    "decoy",
    "inferno",
];

/// True when a weapon-fire event with this weapon is melee or utility.
pub fn is_non_gun_discharge(weapon: &str) -> bool {
    let w = weapon.to_lowercase();
    NON_GUN_DISCHARGE.iter().any(|k| w.contains(k))
}

/// True when damage dealt with this weapon is melee or utility.
pub fn is_non_gun_damage(weapon: &str) -> bool {
    let w = weapon.to_lowercase();
    NON_GUN_DAMAGE.iter().any(|k| w.contains(k))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kill {
    pub tick: Tick,
    pub attacker: Option<SteamId>,
    pub attacker_name: Option<String>,
    pub victim: Option<SteamId>,
    pub victim_name: Option<String>,
    pub headshot: bool,
    pub through_smoke: bool,
    pub weapon: String,
    pub attacker_team: Option<i64>,
    pub victim_team: Option<i64>,
}

impl Kill {
    fn from_row(row: &EventRow) -> Self {
        Self {
            tick: row.tick,
            attacker: row.id_field("attacker_steamid"),
            attacker_name: row.str_field("attacker_name").map(str::to_string),
            victim: row.id_field("user_steamid"),
            victim_name: row.str_field("user_name").map(str::to_string),
            headshot: row.bool_field("headshot"),
            through_smoke: row.bool_field("thrusmoke"),
            weapon: row.str_field("weapon").unwrap_or_default().to_string(),
            attacker_team: row.i64_field("attacker_team_num"),
            victim_team: row.i64_field("user_team_num"),
        }
    }

    /// Both sides' teams are known and identical.
    pub fn is_team_kill(&self) -> bool {
        matches!((self.attacker_team, self.victim_team), (Some(a), Some(v)) if a == v)
    }

    /// A kill credited to `player`: they are the attacker, the victim is
    /// someone else, and it is not a known team kill.
    pub fn is_credited_to(&self, player: SteamId) -> bool {
        self.attacker == Some(player) && self.victim != Some(player) && !self.is_team_kill()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Damage {
    pub tick: Tick,
    pub attacker: Option<SteamId>,
    pub victim: Option<SteamId>,
    pub weapon: String,
}

impl Damage {
    fn from_row(row: &EventRow) -> Self {
        Self {
            tick: row.tick,
            attacker: row.id_field("attacker_steamid"),
            victim: row.id_field("user_steamid"),
            weapon: row.str_field("weapon").unwrap_or_default().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeaponFire {
    pub tick: Tick,
    pub shooter: Option<SteamId>,
    pub weapon: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BulletFire {
    pub tick: Tick,
    pub shooter: Option<SteamId>,
}

/// All event tables the analysis consumes.
#[derive(Debug, Clone, Default)]
pub struct MatchEvents {
    pub kills: Vec<Kill>,
    pub damage: Vec<Damage>,
    pub fires: Vec<WeaponFire>,
    pub bullets: Vec<BulletFire>,
    /// Sorted, deduplicated.
    pub round_starts: Vec<Tick>,
    /// Sorted, deduplicated.
    pub round_ends: Vec<Tick>,
}

impl MatchEvents {
    pub fn load(reader: &dyn TraceReader) -> Result<Self> {
        let mut kills: Vec<Kill> = reader.event(PLAYER_DEATH)?.iter().map(Kill::from_row).collect();
        let mut damage: Vec<Damage> = reader.event(PLAYER_HURT)?.iter().map(Damage::from_row).collect();
        let mut fires: Vec<WeaponFire> = reader
            .event(WEAPON_FIRE)?
            .iter()
            .map(|r| WeaponFire {
                tick: r.tick,
                shooter: r.id_field("user_steamid"),
                weapon: r.str_field("weapon").unwrap_or_default().to_string(),
            })
            .collect();
        let mut bullets: Vec<BulletFire> = reader
            .event(FIRE_BULLETS)?
            .iter()
            .map(|r| BulletFire {
                tick: r.tick,
                shooter: r.id_field("user_steamid"),
            })
            .collect();

        kills.sort_by_key(|k| k.tick);
        damage.sort_by_key(|d| d.tick);
        fires.sort_by_key(|f| f.tick);
        bullets.sort_by_key(|b| b.tick);

        Ok(Self {
            kills,
            damage,
            fires,
            bullets,
            round_starts: sorted_ticks(&reader.event(ROUND_FREEZE_END)?),
            round_ends: sorted_ticks(&reader.event(ROUND_OFFICIALLY_ENDED)?),
        })
    }

    /// Kills credited to `player`, in tick order.
    pub fn kills_by(&self, player: SteamId) -> impl Iterator<Item = &Kill> + '_ {
        self.kills.iter().filter(move |k| k.is_credited_to(player))
    }

    /// Deaths of `player`, in tick order. Self-inflicted deaths count.
    pub fn deaths_of(&self, player: SteamId) -> impl Iterator<Item = &Kill> + '_ {
        self.kills.iter().filter(move |k| k.victim == Some(player))
    }
}

fn sorted_ticks(rows: &[EventRow]) -> Vec<Tick> {
    let mut ticks: Vec<Tick> = rows.iter().map(|r| r.tick).collect();
    ticks.sort_unstable();
    ticks.dedup();
    ticks
}
