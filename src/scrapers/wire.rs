//! Raw API documents.
//!
//! Serde mirrors of the remote JSON, one struct per document shape. Fields the
//! pipeline does not persist are simply not declared. Partial views (war-log
//! entries, in-progress wars) leave most of this optional.

use serde::Deserialize;

/// `/clans/{tag}/currentwar/leaguegroup`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeagueGroup {
    pub state: String,
    #[serde(default)]
    pub season: Option<String>,
    #[serde(default)]
    pub clans: Vec<RawLeagueClan>,
    #[serde(default)]
    pub rounds: Vec<RawRound>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeagueClan {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub clan_level: Option<i64>,
    #[serde(default)]
    pub members: Vec<RawLeagueMember>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLeagueMember {
    pub tag: String,
    pub name: String,
    // the API misspells this on some endpoints
    #[serde(default, alias = "townhallLevel")]
    pub town_hall_level: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRound {
    #[serde(default)]
    pub war_tags: Vec<String>,
}

/// `/clanwarleagues/wars/{warTag}` and `/clans/{tag}/currentwar`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWar {
    /// Absent on war-log entries (those are ended by definition).
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub team_size: Option<i64>,
    #[serde(default)]
    pub preparation_start_time: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    /// Only present on war-log entries and some ended wars.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub clan: Option<RawWarClan>,
    #[serde(default)]
    pub opponent: Option<RawWarClan>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWarClan {
    /// Absent for defunct opponents in old war-log entries.
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub clan_level: Option<i64>,
    #[serde(default)]
    pub attacks: Option<i64>,
    #[serde(default)]
    pub stars: Option<i64>,
    #[serde(default)]
    pub destruction_percentage: Option<f64>,
    #[serde(default)]
    pub exp_earned: Option<i64>,
    #[serde(default)]
    pub members: Vec<RawWarMember>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawWarMember {
    pub tag: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "townhallLevel")]
    pub town_hall_level: Option<i64>,
    #[serde(default)]
    pub map_position: Option<i64>,
    #[serde(default)]
    pub attacks: Vec<RawAttack>,
    // bestOpponentAttack is derivable from the defender's side; ignored
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttack {
    pub attacker_tag: String,
    pub defender_tag: String,
    #[serde(default)]
    pub stars: Option<i64>,
    #[serde(default)]
    pub destruction_percentage: Option<f64>,
    #[serde(default)]
    pub order: Option<i64>,
}

/// `/clans/{tag}/warlog`
#[derive(Debug, Clone, Deserialize)]
pub struct RawWarLog {
    #[serde(default)]
    pub items: Vec<RawWar>,
}

/// `/clans/{tag}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawClan {
    pub tag: String,
    pub name: String,
    #[serde(default)]
    pub clan_level: Option<i64>,
    #[serde(default)]
    pub war_league: Option<RawWarLeague>,
    #[serde(default)]
    pub member_list: Vec<RawLeagueMember>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawWarLeague {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// `/clans/{tag}/members`
#[derive(Debug, Clone, Deserialize)]
pub struct RawMemberList {
    #[serde(default)]
    pub items: Vec<RawLeagueMember>,
}

/// Error body carried by 4xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct RawApiError {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
