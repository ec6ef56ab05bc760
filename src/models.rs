//! Domain model: league seasons, groups, rounds, wars, rosters, attacks.
//!
//! Entities form an ownership tree (parents own children; children carry the
//! parent *key*, never a back-pointer). Synthetic identities live in
//! `id: Option<i64>` and are assigned by the store on insert; reconciliation
//! copies them from persisted rows and never reassigns an existing one.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use tracing::warn;

use crate::scrapers::wire::{
    RawAttack, RawLeagueClan, RawLeagueGroup, RawLeagueMember, RawRound, RawWar, RawWarClan,
    RawWarMember,
};
use crate::tags::fmt_tag;

/// Wire timestamp format, e.g. `20200729T194845.000Z`.
pub const WIRE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// Placeholder tag the API uses for rounds that have no wars yet.
pub const BYE_TAG: &str = "#0";

/// Graph-construction outcomes that are not hard errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The document's state is the "currently unengaged" sentinel; callers
    /// skip silently.
    NotInWar,
    /// A required field failed structural parsing. Isolated to the smallest
    /// subtree by callers.
    Malformed(String),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NotInWar => write!(f, "not currently in war"),
            GraphError::Malformed(msg) => write!(f, "malformed record: {}", msg),
        }
    }
}

impl std::error::Error for GraphError {}

pub fn parse_wire_time(s: &str) -> Result<DateTime<Utc>, GraphError> {
    NaiveDateTime::parse_from_str(s, WIRE_TIME_FORMAT)
        .map(|dt| dt.and_utc())
        .map_err(|e| GraphError::Malformed(format!("bad timestamp '{}': {}", s, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarState {
    Preparation = 0,
    InWar = 1,
    WarEnded = 2,
}

impl WarState {
    pub fn from_wire(label: &str) -> Result<Self, GraphError> {
        match label.to_lowercase().as_str() {
            "preparation" => Ok(WarState::Preparation),
            "inwar" => Ok(WarState::InWar),
            // league groups report "ended" rather than "warEnded"
            "warended" | "ended" => Ok(WarState::WarEnded),
            "notinwar" => Err(GraphError::NotInWar),
            other => Err(GraphError::Malformed(format!(
                "unknown war state '{}'",
                other
            ))),
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(WarState::Preparation),
            1 => Some(WarState::InWar),
            2 => Some(WarState::WarEnded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarResult {
    Tie = 0,
    Side1Win = 1,
    Side2Win = 2,
}

impl WarResult {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(WarResult::Tie),
            1 => Some(WarResult::Side1Win),
            2 => Some(WarResult::Side2Win),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarType {
    Normal = 0,
    Friendly = 1,
    League = 2,
}

impl WarType {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(WarType::Normal),
            1 => Some(WarType::Friendly),
            2 => Some(WarType::League),
            _ => None,
        }
    }
}

/// Where a war document came from; decides typing and state overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarOrigin {
    /// Fetched through a league round's war tag.
    League,
    /// A war-log entry; always an ended, normal war.
    WarLog,
    /// The clan's current war endpoint.
    Current,
}

/// Write disposition assigned by the reconciliation engine.
///
/// Freshly constructed nodes default to `Insert`; the engine downgrades nodes
/// whose semantic key matches a persisted row to `Update` or `Touch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteOp {
    #[default]
    Insert,
    /// Identity preserved, meaningful fields changed.
    Update,
    /// Identity preserved, nothing changed; refresh `last_seen` only.
    Touch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    pub id: i64,
    /// First day of the calendar month.
    pub month: chrono::NaiveDate,
}

#[derive(Debug, Clone)]
pub struct LeagueGroup {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub season_id: i64,
    pub state: WarState,
    pub league_id: Option<i64>,
    pub clans: Vec<LeagueClan>,
    pub rounds: Vec<LeagueRound>,
}

impl LeagueGroup {
    pub fn from_raw(raw: RawLeagueGroup, season_id: i64) -> Result<Self, GraphError> {
        let state = WarState::from_wire(&raw.state)?;
        let clans = raw
            .clans
            .into_iter()
            .map(LeagueClan::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        let rounds = raw
            .rounds
            .into_iter()
            .enumerate()
            .map(|(i, r)| LeagueRound::from_raw(r, i as i64))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LeagueGroup {
            id: None,
            op: WriteOp::default(),
            season_id,
            state,
            league_id: None,
            clans,
            rounds,
        })
    }

    pub fn same_content(&self, other: &LeagueGroup) -> bool {
        self.state == other.state && self.league_id == other.league_id
    }
}

#[derive(Debug, Clone)]
pub struct LeagueClan {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub tag: String,
    pub name: String,
    pub clan_level: Option<i64>,
    pub members: Vec<LeagueMember>,
}

impl LeagueClan {
    fn from_raw(raw: RawLeagueClan) -> Result<Self, GraphError> {
        let tag = fmt_tag(&raw.tag).map_err(|e| GraphError::Malformed(e.to_string()))?;
        let members = raw
            .members
            .into_iter()
            .map(LeagueMember::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LeagueClan {
            id: None,
            op: WriteOp::default(),
            tag,
            name: raw.name,
            clan_level: raw.clan_level,
            members,
        })
    }

    pub fn same_content(&self, other: &LeagueClan) -> bool {
        self.name == other.name && self.clan_level == other.clan_level
    }
}

#[derive(Debug, Clone)]
pub struct LeagueMember {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub tag: String,
    pub name: String,
    pub town_hall_level: Option<i64>,
}

impl LeagueMember {
    pub fn from_raw(raw: RawLeagueMember) -> Result<Self, GraphError> {
        let tag = fmt_tag(&raw.tag).map_err(|e| GraphError::Malformed(e.to_string()))?;
        Ok(LeagueMember {
            id: None,
            op: WriteOp::default(),
            tag,
            name: raw.name,
            town_hall_level: raw.town_hall_level,
        })
    }

    pub fn same_content(&self, other: &LeagueMember) -> bool {
        self.name == other.name && self.town_hall_level == other.town_hall_level
    }
}

#[derive(Debug, Clone)]
pub struct LeagueRound {
    pub id: Option<i64>,
    pub op: WriteOp,
    /// Ordered position within the group.
    pub index: i64,
    pub tags: Vec<WarTag>,
}

impl LeagueRound {
    fn from_raw(raw: RawRound, index: i64) -> Result<Self, GraphError> {
        let mut tags = Vec::new();
        for wt in raw.war_tags {
            if wt == BYE_TAG {
                continue;
            }
            tags.push(WarTag {
                op: WriteOp::default(),
                tag: wt,
                round_id: None,
                war_id: None,
            });
        }
        Ok(LeagueRound {
            id: None,
            op: WriteOp::default(),
            index,
            tags,
        })
    }
}

/// A remote war identifier within a round. The tag string is the primary key;
/// `war_id` is the association to the resolved [`War`], recorded lazily.
#[derive(Debug, Clone)]
pub struct WarTag {
    pub op: WriteOp,
    pub tag: String,
    pub round_id: Option<i64>,
    pub war_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct War {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub war_tag: Option<String>,
    pub round_id: Option<i64>,
    pub state: WarState,
    pub war_type: WarType,
    pub team_size: Option<i64>,
    pub preparation_start_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub result: Option<WarResult>,
    /// Exactly two; side 1 carries the lexicographically smaller clan tag.
    pub sides: Vec<WarSide>,
}

/// Source-independent war identity: both side tags plus the end time. Stable
/// across the tag-based and war-log views of the same war.
pub type WarKey = (String, String, DateTime<Utc>);

impl War {
    pub fn from_raw(raw: RawWar, origin: WarOrigin) -> Result<Self, GraphError> {
        let state = match origin {
            // war-log entries are historical by definition
            WarOrigin::WarLog => WarState::WarEnded,
            _ => WarState::from_wire(
                raw.state
                    .as_deref()
                    .ok_or_else(|| GraphError::Malformed("war without state".into()))?,
            )?,
        };

        let clan = raw
            .clan
            .ok_or_else(|| GraphError::Malformed("war without clan".into()))?;
        let opponent = raw
            .opponent
            .ok_or_else(|| GraphError::Malformed("war without opponent".into()))?;
        let clan_tag = clan
            .tag
            .clone()
            .ok_or_else(|| GraphError::Malformed("war clan without tag".into()))?;
        let opponent_tag = opponent
            .tag
            .clone()
            .ok_or_else(|| GraphError::Malformed("war opponent without tag".into()))?;

        // Deterministic orientation: the lexicographically smaller tag is
        // always side 1, regardless of which side's view we fetched.
        let home_first = clan_tag <= opponent_tag;

        let end_time = parse_wire_time(
            raw.end_time
                .as_deref()
                .ok_or_else(|| GraphError::Malformed("war without endTime".into()))?,
        )?;
        let preparation_start_time = raw
            .preparation_start_time
            .as_deref()
            .map(parse_wire_time)
            .transpose()?;
        let start_time = raw.start_time.as_deref().map(parse_wire_time).transpose()?;

        let mut result = match raw.result.as_deref() {
            None | Some("") => None,
            Some("tie") => Some(WarResult::Tie),
            Some(r @ ("win" | "lose")) => {
                // normalize the fetched side's perspective into side1/side2
                let home_won = r == "win";
                Some(if home_won == home_first {
                    WarResult::Side1Win
                } else {
                    WarResult::Side2Win
                })
            }
            Some(other) => {
                return Err(GraphError::Malformed(format!(
                    "unknown result '{}'",
                    other
                )))
            }
        };

        let (first, second) = if home_first {
            (clan, opponent)
        } else {
            (opponent, clan)
        };
        let sides = vec![WarSide::from_raw(first)?, WarSide::from_raw(second)?];

        let war_type = match origin {
            WarOrigin::League => WarType::League,
            WarOrigin::WarLog => WarType::Normal,
            WarOrigin::Current => {
                let classic_prep = match (preparation_start_time, start_time) {
                    (Some(p), Some(s)) => s - p == chrono::Duration::hours(23),
                    _ => false,
                };
                if classic_prep {
                    WarType::Normal
                } else {
                    WarType::Friendly
                }
            }
        };

        // an ended war's outcome is fixed by the scoreboard
        if state == WarState::WarEnded {
            result = Some(Self::calc_result(&sides[0], &sides[1]));
        }

        Ok(War {
            id: None,
            op: WriteOp::default(),
            war_tag: None,
            round_id: None,
            state,
            war_type,
            team_size: raw.team_size,
            preparation_start_time,
            start_time,
            end_time,
            result,
            sides,
        })
    }

    fn calc_result(side1: &WarSide, side2: &WarSide) -> WarResult {
        let stars = side1.stars.unwrap_or(0) - side2.stars.unwrap_or(0);
        if stars != 0 {
            return if stars > 0 {
                WarResult::Side1Win
            } else {
                WarResult::Side2Win
            };
        }
        let destruction = side1.destruction_percentage.unwrap_or(0.0)
            - side2.destruction_percentage.unwrap_or(0.0);
        if destruction == 0.0 {
            WarResult::Tie
        } else if destruction > 0.0 {
            WarResult::Side1Win
        } else {
            WarResult::Side2Win
        }
    }

    pub fn side1(&self) -> &WarSide {
        &self.sides[0]
    }

    pub fn side2(&self) -> &WarSide {
        &self.sides[1]
    }

    pub fn semantic_key(&self) -> WarKey {
        (
            self.sides[0].tag.clone(),
            self.sides[1].tag.clone(),
            self.end_time,
        )
    }

    /// All attacks of the war, flattened from both rosters.
    pub fn attacks(&self) -> impl Iterator<Item = &WarAttack> {
        self.sides
            .iter()
            .flat_map(|s| s.members.iter())
            .flat_map(|m| m.attacks.iter())
    }

    pub fn same_content(&self, other: &War) -> bool {
        self.state == other.state
            && self.war_type == other.war_type
            && self.team_size == other.team_size
            && self.preparation_start_time == other.preparation_start_time
            && self.start_time == other.start_time
            && self.end_time == other.end_time
            && self.result == other.result
    }
}

#[derive(Debug, Clone)]
pub struct WarSide {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub tag: String,
    pub name: Option<String>,
    pub clan_level: Option<i64>,
    pub attacks_used: Option<i64>,
    pub stars: Option<i64>,
    pub destruction_percentage: Option<f64>,
    pub exp_earned: Option<i64>,
    pub members: Vec<WarMember>,
}

impl WarSide {
    fn from_raw(raw: RawWarClan) -> Result<Self, GraphError> {
        let tag = raw
            .tag
            .ok_or_else(|| GraphError::Malformed("war clan without tag".into()))?;
        let tag = fmt_tag(&tag).map_err(|e| GraphError::Malformed(e.to_string()))?;
        let members = raw
            .members
            .into_iter()
            .map(WarMember::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(WarSide {
            id: None,
            op: WriteOp::default(),
            tag,
            name: raw.name,
            clan_level: raw.clan_level,
            attacks_used: raw.attacks,
            stars: raw.stars,
            destruction_percentage: raw.destruction_percentage,
            exp_earned: raw.exp_earned,
            members,
        })
    }

    pub fn same_content(&self, other: &WarSide) -> bool {
        self.name == other.name
            && self.clan_level == other.clan_level
            && self.attacks_used == other.attacks_used
            && self.stars == other.stars
            && self.destruction_percentage == other.destruction_percentage
            && self.exp_earned == other.exp_earned
    }
}

#[derive(Debug, Clone)]
pub struct WarMember {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub tag: String,
    pub name: Option<String>,
    pub town_hall_level: Option<i64>,
    pub map_position: Option<i64>,
    pub attacks: Vec<WarAttack>,
}

impl WarMember {
    fn from_raw(raw: RawWarMember) -> Result<Self, GraphError> {
        let tag = fmt_tag(&raw.tag).map_err(|e| GraphError::Malformed(e.to_string()))?;
        let mut attacks: Vec<WarAttack> = Vec::with_capacity(raw.attacks.len());
        for a in raw.attacks {
            let attack = WarAttack::from_raw(a)?;
            // at most one attack per (attacker, defender) per war; keep the
            // last occurrence when a document repeats a pair
            if let Some(existing) = attacks
                .iter_mut()
                .find(|e| e.defender_tag == attack.defender_tag)
            {
                warn!(
                    attacker = %attack.attacker_tag,
                    defender = %attack.defender_tag,
                    "duplicate attack pair in document, keeping last"
                );
                *existing = attack;
            } else {
                attacks.push(attack);
            }
        }
        Ok(WarMember {
            id: None,
            op: WriteOp::default(),
            tag,
            name: raw.name,
            town_hall_level: raw.town_hall_level,
            map_position: raw.map_position,
            attacks,
        })
    }

    pub fn same_content(&self, other: &WarMember) -> bool {
        self.name == other.name
            && self.town_hall_level == other.town_hall_level
            && self.map_position == other.map_position
    }
}

#[derive(Debug, Clone)]
pub struct WarAttack {
    pub id: Option<i64>,
    pub op: WriteOp,
    pub attacker_tag: String,
    pub defender_tag: String,
    pub stars: Option<i64>,
    pub destruction_percentage: Option<f64>,
    pub order: Option<i64>,
}

impl WarAttack {
    fn from_raw(raw: RawAttack) -> Result<Self, GraphError> {
        let attacker_tag =
            fmt_tag(&raw.attacker_tag).map_err(|e| GraphError::Malformed(e.to_string()))?;
        let defender_tag =
            fmt_tag(&raw.defender_tag).map_err(|e| GraphError::Malformed(e.to_string()))?;
        Ok(WarAttack {
            id: None,
            op: WriteOp::default(),
            attacker_tag,
            defender_tag,
            stars: raw.stars,
            destruction_percentage: raw.destruction_percentage,
            order: raw.order,
        })
    }

    /// Semantic key within a war.
    pub fn key(&self) -> (String, String) {
        (self.attacker_tag.clone(), self.defender_tag.clone())
    }

    pub fn same_content(&self, other: &WarAttack) -> bool {
        self.stars == other.stars
            && self.destruction_percentage == other.destruction_percentage
            && self.order == other.order
    }
}

fn env_istrue(var: &str, default: bool) -> bool {
    match std::env::var(var) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "t"),
        Err(_) => default,
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub api_base: String,
    pub api_token: Option<String>,
    /// Never contact the network; a cache miss is an error.
    pub offline: bool,
    /// Serve cached documents when present.
    pub use_cache: bool,
    /// Persist live responses for future replay.
    pub save_responses: bool,
    pub cache_dir: String,
    /// Admitted requests per second across all callers.
    pub rate_limit: u32,
    pub request_timeout_secs: u64,
    pub rounds_per_group: u32,
    pub wars_per_round: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let database_path = std::env::var("DB_PATH")
            .or_else(|_| std::env::var("DATABASE_PATH"))
            .unwrap_or_else(|_| "./wartrack.db".to_string());

        let api_base = std::env::var("COC_API_URL")
            .unwrap_or_else(|_| "https://api.clashofclans.com/v1".to_string());

        let rate_limit = std::env::var("REQ_RATE_LIMIT")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let request_timeout_secs = std::env::var("REQ_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let rounds_per_group = std::env::var("LEAGUE_ROUNDS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        let wars_per_round = std::env::var("LEAGUE_WARS_PER_ROUND")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .unwrap_or(4);

        Self {
            database_path,
            api_base,
            api_token: std::env::var("COC_API_TOKEN").ok(),
            offline: env_istrue("REQ_OFFLINE", false),
            use_cache: env_istrue("REQ_USE_FILES", false),
            save_responses: env_istrue("REQ_SAVE_FILES", true),
            cache_dir: std::env::var("REQ_SAVE_DIR").unwrap_or_else(|_| ".".to_string()),
            rate_limit,
            request_timeout_secs,
            rounds_per_group,
            wars_per_round,
        }
    }

    /// Total war tags a complete group carries.
    pub fn expected_tags(&self) -> u32 {
        self.rounds_per_group * self.wars_per_round
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_side(tag: &str, stars: i64, destruction: f64) -> RawWarClan {
        RawWarClan {
            tag: Some(tag.to_string()),
            name: Some(format!("clan {}", tag)),
            clan_level: Some(10),
            attacks: Some(2),
            stars: Some(stars),
            destruction_percentage: Some(destruction),
            exp_earned: None,
            members: vec![],
        }
    }

    fn raw_war(clan: &str, opponent: &str, state: &str, result: Option<&str>) -> RawWar {
        RawWar {
            state: Some(state.to_string()),
            team_size: Some(15),
            preparation_start_time: Some("20260801T070000.000Z".to_string()),
            start_time: Some("20260802T070000.000Z".to_string()),
            end_time: Some("20260803T070000.000Z".to_string()),
            result: result.map(|s| s.to_string()),
            clan: Some(raw_side(clan, 10, 50.0)),
            opponent: Some(raw_side(opponent, 20, 80.0)),
        }
    }

    #[test]
    fn test_side_order_is_tag_lexicographic() {
        let a = War::from_raw(raw_war("#99V", "#PPC", "inWar", None), WarOrigin::League).unwrap();
        let b = War::from_raw(raw_war("#PPC", "#99V", "inWar", None), WarOrigin::League).unwrap();
        assert_eq!(a.side1().tag, "#99V");
        assert_eq!(b.side1().tag, "#99V");
        assert_eq!(a.semantic_key(), b.semantic_key());
    }

    #[test]
    fn test_result_normalized_for_orientation() {
        // live war keeps the normalized wire result
        let mut raw = raw_war("#PPC", "#99V", "inWar", Some("win"));
        raw.clan.as_mut().unwrap().stars = Some(0);
        raw.opponent.as_mut().unwrap().stars = Some(0);
        let w = War::from_raw(raw, WarOrigin::Current).unwrap();
        // "#PPC" won from its own perspective, and it is side 2
        assert_eq!(w.result, Some(WarResult::Side2Win));
    }

    #[test]
    fn test_ended_war_result_comes_from_scoreboard() {
        // fetched from the side that reported "lose": scoreboard agrees,
        // opponent (side 2) has more stars
        let w = War::from_raw(
            raw_war("#99V", "#PPC", "warEnded", Some("lose")),
            WarOrigin::WarLog,
        )
        .unwrap();
        assert_eq!(w.result, Some(WarResult::Side2Win));
    }

    #[test]
    fn test_ended_tie_resolves_by_destruction() {
        let mut raw = raw_war("#99V", "#PPC", "warEnded", Some("tie"));
        raw.clan.as_mut().unwrap().stars = Some(12);
        raw.opponent.as_mut().unwrap().stars = Some(12);
        raw.clan.as_mut().unwrap().destruction_percentage = Some(61.5);
        raw.opponent.as_mut().unwrap().destruction_percentage = Some(60.0);
        let w = War::from_raw(raw, WarOrigin::League).unwrap();
        assert_eq!(w.result, Some(WarResult::Side1Win));

        let mut raw = raw_war("#99V", "#PPC", "warEnded", Some("tie"));
        raw.clan.as_mut().unwrap().stars = Some(12);
        raw.opponent.as_mut().unwrap().stars = Some(12);
        raw.clan.as_mut().unwrap().destruction_percentage = Some(60.0);
        raw.opponent.as_mut().unwrap().destruction_percentage = Some(60.0);
        let w = War::from_raw(raw, WarOrigin::League).unwrap();
        assert_eq!(w.result, Some(WarResult::Tie));
    }

    #[test]
    fn test_not_in_war_is_a_signal() {
        let raw = raw_war("#99V", "#PPC", "notInWar", None);
        assert_eq!(
            War::from_raw(raw, WarOrigin::Current).unwrap_err(),
            GraphError::NotInWar
        );
    }

    #[test]
    fn test_bad_timestamp_is_malformed() {
        let mut raw = raw_war("#99V", "#PPC", "inWar", None);
        raw.end_time = Some("2026-08-03 07:00".to_string());
        match War::from_raw(raw, WarOrigin::League) {
            Err(GraphError::Malformed(_)) => {}
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_attack_pair_keeps_last() {
        let raw = RawWarMember {
            tag: "#P2L".to_string(),
            name: Some("one".to_string()),
            town_hall_level: Some(13),
            map_position: Some(1),
            attacks: vec![
                RawAttack {
                    attacker_tag: "#P2L".to_string(),
                    defender_tag: "#Q2U".to_string(),
                    stars: Some(1),
                    destruction_percentage: Some(40.0),
                    order: Some(1),
                },
                RawAttack {
                    attacker_tag: "#P2L".to_string(),
                    defender_tag: "#Q2U".to_string(),
                    stars: Some(3),
                    destruction_percentage: Some(100.0),
                    order: Some(5),
                },
            ],
        };
        let member = WarMember::from_raw(raw).unwrap();
        assert_eq!(member.attacks.len(), 1);
        assert_eq!(member.attacks[0].stars, Some(3));
        assert_eq!(member.attacks[0].order, Some(5));
    }

    #[test]
    fn test_friendly_war_heuristic() {
        // fixture has a 24h prep gap: friendly
        let w = War::from_raw(raw_war("#99V", "#PPC", "inWar", None), WarOrigin::Current).unwrap();
        assert_eq!(w.war_type, WarType::Friendly);

        // 23h prep gap: normal war
        let mut raw = raw_war("#99V", "#PPC", "inWar", None);
        raw.preparation_start_time = Some("20260801T080000.000Z".to_string());
        let w = War::from_raw(raw, WarOrigin::Current).unwrap();
        assert_eq!(w.war_type, WarType::Normal);
    }

    #[test]
    fn test_league_group_skips_bye_tags() {
        let raw = RawLeagueGroup {
            state: "inWar".to_string(),
            season: Some("2026-08".to_string()),
            clans: vec![],
            rounds: vec![
                RawRound {
                    war_tags: vec!["#T2U".into(), "#T9Y".into()],
                },
                RawRound {
                    war_tags: vec![BYE_TAG.into(), BYE_TAG.into()],
                },
            ],
        };
        let group = LeagueGroup::from_raw(raw, 1).unwrap();
        assert_eq!(group.rounds.len(), 2);
        assert_eq!(group.rounds[0].tags.len(), 2);
        assert!(group.rounds[1].tags.is_empty());
        assert_eq!(group.rounds[1].index, 1);
    }
}
