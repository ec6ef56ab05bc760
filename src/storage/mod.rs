//! SQLite persistence gateway.
//!
//! The reconciliation core talks to storage only through key lookups, subtree
//! loads, disposition-driven writes and explicit transactions — no ad-hoc
//! queries. One `Connection` behind a mutex; WAL mode for concurrent readers.
//!
//! Synthetic identities are SQLite rowids, assigned at insert time inside the
//! transaction and written back into the in-memory tree, so parent writes can
//! hand finalized ids to their children.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{
    LeagueClan, LeagueGroup, LeagueMember, LeagueRound, War, WarAttack, WarKey, WarMember,
    WarResult, WarSide, WarState, WarTag, WarType, WriteOp,
};
use crate::reconcile::engine::Orphan;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS seasons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    month TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS league_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    season_id INTEGER NOT NULL REFERENCES seasons(id),
    state INTEGER NOT NULL,
    league_id INTEGER,
    last_seen TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per (season, clan): league membership marker plus group link.
CREATE TABLE IF NOT EXISTS league_clans (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER REFERENCES league_groups(id),
    season_id INTEGER NOT NULL REFERENCES seasons(id),
    tag TEXT NOT NULL,
    name TEXT,
    clan_level INTEGER,
    in_league INTEGER NOT NULL DEFAULT 1,
    UNIQUE(season_id, tag)
);

CREATE TABLE IF NOT EXISTS league_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    league_clan_id INTEGER NOT NULL REFERENCES league_clans(id),
    tag TEXT NOT NULL,
    name TEXT,
    town_hall_level INTEGER
);
CREATE INDEX IF NOT EXISTS idx_league_members_clan ON league_members(league_clan_id);

CREATE TABLE IF NOT EXISTS league_rounds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES league_groups(id),
    round INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_league_rounds_group ON league_rounds(group_id);

-- The remote tag string is the primary key; war_id is the lazily resolved
-- association to the wars table.
CREATE TABLE IF NOT EXISTS war_tags (
    tag TEXT PRIMARY KEY,
    round_id INTEGER REFERENCES league_rounds(id),
    war_id INTEGER
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS idx_war_tags_round ON war_tags(round_id);

CREATE TABLE IF NOT EXISTS wars (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    war_tag TEXT UNIQUE,
    round_id INTEGER,
    state INTEGER NOT NULL,
    war_type INTEGER NOT NULL,
    team_size INTEGER,
    preparation_start_time TEXT,
    start_time TEXT,
    end_time TEXT NOT NULL,
    result INTEGER,
    side1_tag TEXT NOT NULL,
    side2_tag TEXT NOT NULL,
    last_seen TEXT NOT NULL DEFAULT (datetime('now'))
);
-- semantic identity: both side tags plus the end time
CREATE UNIQUE INDEX IF NOT EXISTS idx_wars_semantic
    ON wars(side1_tag, side2_tag, end_time);
CREATE INDEX IF NOT EXISTS idx_wars_round ON wars(round_id);

CREATE TABLE IF NOT EXISTS war_sides (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    war_id INTEGER NOT NULL REFERENCES wars(id),
    tag TEXT NOT NULL,
    name TEXT,
    clan_level INTEGER,
    attacks_used INTEGER,
    stars INTEGER,
    destruction_percentage REAL,
    exp_earned INTEGER
);
CREATE INDEX IF NOT EXISTS idx_war_sides_war ON war_sides(war_id);

CREATE TABLE IF NOT EXISTS war_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    side_id INTEGER NOT NULL REFERENCES war_sides(id),
    tag TEXT NOT NULL,
    name TEXT,
    town_hall_level INTEGER,
    map_position INTEGER
);
CREATE INDEX IF NOT EXISTS idx_war_members_side ON war_members(side_id);

CREATE TABLE IF NOT EXISTS war_attacks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    war_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL REFERENCES war_members(id),
    attacker_tag TEXT NOT NULL,
    defender_tag TEXT NOT NULL,
    stars INTEGER,
    destruction_percentage REAL,
    attack_order INTEGER,
    UNIQUE(war_id, attacker_tag, defender_tag)
);
CREATE INDEX IF NOT EXISTS idx_war_attacks_member ON war_attacks(member_id);

-- shared dimension entities
CREATE TABLE IF NOT EXISTS clans (
    tag TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    last_seen TEXT NOT NULL DEFAULT (datetime('now'))
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS players (
    tag TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    last_seen TEXT NOT NULL DEFAULT (datetime('now'))
) WITHOUT ROWID;
"#;

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// A persisted row violates an invariant the schema cannot express.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "corrupt row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

fn ts_str(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        seed_current_season(&conn)?;
        info!(path = %path, "database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store (tests).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        seed_current_season(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one transaction. Commit on `Ok`, roll back on `Err` —
    /// a failed reconciliation unit leaves no partial writes behind.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(v) => {
                tx.commit()?;
                Ok(v)
            }
            Err(e) => {
                debug!(error = %e, "rolling back transaction");
                Err(e)
            }
        }
    }

    /// One-shot work holding the connection lock (no explicit transaction).
    pub fn exec<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

fn seed_current_season(conn: &Connection) -> Result<(), StoreError> {
    let today = Utc::now().date_naive();
    let month = today.with_day(1).expect("first of month is always valid");
    get_or_create_season(conn, month)?;
    Ok(())
}

pub fn get_or_create_season(conn: &Connection, month: NaiveDate) -> Result<i64, StoreError> {
    let m = month.to_string();
    if let Some(id) = conn
        .query_row("SELECT id FROM seasons WHERE month = ?1", [&m], |r| {
            r.get(0)
        })
        .optional()?
    {
        return Ok(id);
    }
    conn.execute("INSERT INTO seasons (month) VALUES (?1)", [&m])?;
    Ok(conn.last_insert_rowid())
}

pub fn in_league(
    conn: &Connection,
    tag: &str,
    season_id: i64,
) -> Result<Option<bool>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT in_league FROM league_clans WHERE season_id = ?1 AND tag = ?2",
            params![season_id, tag],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .map(|v| v != 0))
}

pub fn set_in_league(
    conn: &Connection,
    tag: &str,
    season_id: i64,
    in_league: bool,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO league_clans (season_id, tag, in_league) VALUES (?1, ?2, ?3)
         ON CONFLICT(season_id, tag) DO UPDATE SET in_league = excluded.in_league",
        params![season_id, tag, in_league as i64],
    )?;
    Ok(())
}

pub fn group_id_for_clan(
    conn: &Connection,
    tag: &str,
    season_id: i64,
) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT group_id FROM league_clans
             WHERE season_id = ?1 AND tag = ?2 AND group_id IS NOT NULL",
            params![season_id, tag],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn load_group(conn: &Connection, id: i64) -> Result<Option<LeagueGroup>, StoreError> {
    let header = conn
        .query_row(
            "SELECT season_id, state, league_id FROM league_groups WHERE id = ?1",
            [id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, Option<i64>>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((season_id, state, league_id)) = header else {
        return Ok(None);
    };
    let state = WarState::from_i64(state)
        .ok_or_else(|| StoreError::Corrupt(format!("group {} state {}", id, state)))?;

    let mut clans = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, tag, name, clan_level FROM league_clans
             WHERE group_id = ?1 ORDER BY tag",
        )?;
        let rows = stmt.query_map([id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<i64>>(3)?,
            ))
        })?;
        for row in rows {
            let (clan_id, tag, name, clan_level) = row?;
            clans.push(LeagueClan {
                id: Some(clan_id),
                op: WriteOp::Touch,
                tag,
                name: name.unwrap_or_default(),
                clan_level,
                members: Vec::new(),
            });
        }
    }
    for clan in &mut clans {
        let mut stmt = conn.prepare(
            "SELECT id, tag, name, town_hall_level FROM league_members
             WHERE league_clan_id = ?1 ORDER BY tag",
        )?;
        let rows = stmt.query_map([clan.id], |r| {
            Ok(LeagueMember {
                id: Some(r.get::<_, i64>(0)?),
                op: WriteOp::Touch,
                tag: r.get(1)?,
                name: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                town_hall_level: r.get(3)?,
            })
        })?;
        for m in rows {
            clan.members.push(m?);
        }
    }

    let mut rounds = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, round FROM league_rounds WHERE group_id = ?1 ORDER BY round",
        )?;
        let rows = stmt.query_map([id], |r| {
            Ok(LeagueRound {
                id: Some(r.get::<_, i64>(0)?),
                op: WriteOp::Touch,
                index: r.get(1)?,
                tags: Vec::new(),
            })
        })?;
        for r in rows {
            rounds.push(r?);
        }
    }
    for round in &mut rounds {
        let mut stmt = conn.prepare(
            "SELECT tag, war_id FROM war_tags WHERE round_id = ?1 ORDER BY tag",
        )?;
        let rows = stmt.query_map([round.id], |r| {
            Ok(WarTag {
                op: WriteOp::Touch,
                tag: r.get(0)?,
                round_id: None,
                war_id: r.get(1)?,
            })
        })?;
        for t in rows {
            let mut t = t?;
            t.round_id = round.id;
            round.tags.push(t);
        }
    }

    Ok(Some(LeagueGroup {
        id: Some(id),
        op: WriteOp::Touch,
        season_id,
        state,
        league_id,
        clans,
        rounds,
    }))
}

/// Persisted war-tag count for the group, across all rounds.
pub fn tag_count(conn: &Connection, group_id: i64) -> Result<u32, StoreError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM war_tags
         WHERE round_id IN (SELECT id FROM league_rounds WHERE group_id = ?1)",
        [group_id],
        |r| r.get(0),
    )?;
    Ok(n as u32)
}

/// States of the wars resolved from the group's final round.
pub fn last_round_war_states(
    conn: &Connection,
    group_id: i64,
) -> Result<Vec<WarState>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT w.state FROM wars w
         WHERE w.round_id = (SELECT id FROM league_rounds
                             WHERE group_id = ?1 ORDER BY round DESC LIMIT 1)",
    )?;
    let rows = stmt.query_map([group_id], |r| r.get::<_, i64>(0))?;
    let mut states = Vec::new();
    for v in rows {
        let v = v?;
        states.push(
            WarState::from_i64(v)
                .ok_or_else(|| StoreError::Corrupt(format!("war state {}", v)))?,
        );
    }
    Ok(states)
}

pub fn find_war_id_by_tag(conn: &Connection, war_tag: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM wars WHERE war_tag = ?1",
            [war_tag],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn war_state(conn: &Connection, id: i64) -> Result<Option<WarState>, StoreError> {
    let v = conn
        .query_row("SELECT state FROM wars WHERE id = ?1", [id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    match v {
        Some(v) => Ok(Some(WarState::from_i64(v).ok_or_else(|| {
            StoreError::Corrupt(format!("war {} state {}", id, v))
        })?)),
        None => Ok(None),
    }
}

/// Backfill a war's round association when the row predates the round.
pub fn fix_war_round(
    conn: &Connection,
    war_id: i64,
    round_id: Option<i64>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE wars SET round_id = COALESCE(round_id, ?1) WHERE id = ?2",
        params![round_id, war_id],
    )?;
    Ok(())
}

pub fn find_war_by_key(conn: &Connection, key: &WarKey) -> Result<Option<War>, StoreError> {
    let id = conn
        .query_row(
            "SELECT id FROM wars WHERE side1_tag = ?1 AND side2_tag = ?2 AND end_time = ?3",
            params![key.0, key.1, ts_str(&key.2)],
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    match id {
        Some(id) => load_war(conn, id),
        None => Ok(None),
    }
}

pub fn load_war(conn: &Connection, id: i64) -> Result<Option<War>, StoreError> {
    let header = conn
        .query_row(
            "SELECT war_tag, round_id, state, war_type, team_size,
                    preparation_start_time, start_time, end_time, result
             FROM wars WHERE id = ?1",
            [id],
            |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?,
                    r.get::<_, Option<i64>>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, Option<i64>>(4)?,
                    r.get::<_, Option<String>>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, String>(7)?,
                    r.get::<_, Option<i64>>(8)?,
                ))
            },
        )
        .optional()?;
    let Some((war_tag, round_id, state, war_type, team_size, prep, start, end, result)) = header
    else {
        return Ok(None);
    };

    let state = WarState::from_i64(state)
        .ok_or_else(|| StoreError::Corrupt(format!("war {} state {}", id, state)))?;
    let war_type = WarType::from_i64(war_type)
        .ok_or_else(|| StoreError::Corrupt(format!("war {} type {}", id, war_type)))?;
    let result = match result {
        Some(v) => Some(
            WarResult::from_i64(v)
                .ok_or_else(|| StoreError::Corrupt(format!("war {} result {}", id, v)))?,
        ),
        None => None,
    };

    let mut sides = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, tag, name, clan_level, attacks_used, stars,
                    destruction_percentage, exp_earned
             FROM war_sides WHERE war_id = ?1 ORDER BY tag",
        )?;
        let rows = stmt.query_map([id], |r| {
            Ok(WarSide {
                id: Some(r.get::<_, i64>(0)?),
                op: WriteOp::Touch,
                tag: r.get(1)?,
                name: r.get(2)?,
                clan_level: r.get(3)?,
                attacks_used: r.get(4)?,
                stars: r.get(5)?,
                destruction_percentage: r.get(6)?,
                exp_earned: r.get(7)?,
                members: Vec::new(),
            })
        })?;
        for s in rows {
            sides.push(s?);
        }
    }
    for side in &mut sides {
        let mut stmt = conn.prepare(
            "SELECT id, tag, name, town_hall_level, map_position
             FROM war_members WHERE side_id = ?1 ORDER BY tag",
        )?;
        let rows = stmt.query_map([side.id], |r| {
            Ok(WarMember {
                id: Some(r.get::<_, i64>(0)?),
                op: WriteOp::Touch,
                tag: r.get(1)?,
                name: r.get(2)?,
                town_hall_level: r.get(3)?,
                map_position: r.get(4)?,
                attacks: Vec::new(),
            })
        })?;
        for m in rows {
            side.members.push(m?);
        }
        for member in &mut side.members {
            let mut stmt = conn.prepare(
                "SELECT id, attacker_tag, defender_tag, stars, destruction_percentage,
                        attack_order
                 FROM war_attacks WHERE member_id = ?1 ORDER BY attack_order",
            )?;
            let rows = stmt.query_map([member.id], |r| {
                Ok(WarAttack {
                    id: Some(r.get::<_, i64>(0)?),
                    op: WriteOp::Touch,
                    attacker_tag: r.get(1)?,
                    defender_tag: r.get(2)?,
                    stars: r.get(3)?,
                    destruction_percentage: r.get(4)?,
                    order: r.get(5)?,
                })
            })?;
            for a in rows {
                member.attacks.push(a?);
            }
        }
    }

    Ok(Some(War {
        id: Some(id),
        op: WriteOp::Touch,
        war_tag,
        round_id,
        state,
        war_type,
        team_size,
        preparation_start_time: prep.as_deref().map(parse_ts).transpose()?,
        start_time: start.as_deref().map(parse_ts).transpose()?,
        end_time: parse_ts(&end)?,
        result,
        sides,
    }))
}

fn require_id(id: Option<i64>, what: &str) -> Result<i64, StoreError> {
    id.ok_or_else(|| StoreError::Corrupt(format!("{} has no id at apply time", what)))
}

/// Write a reconciled group tree. Inserts assign rowids back into the tree.
pub fn apply_group(conn: &Connection, group: &mut LeagueGroup) -> Result<(), StoreError> {
    match group.op {
        WriteOp::Insert => {
            conn.execute(
                "INSERT INTO league_groups (season_id, state, league_id) VALUES (?1, ?2, ?3)",
                params![group.season_id, group.state as i64, group.league_id],
            )?;
            group.id = Some(conn.last_insert_rowid());
        }
        WriteOp::Update => {
            conn.execute(
                "UPDATE league_groups SET state = ?1, league_id = ?2,
                 last_seen = datetime('now') WHERE id = ?3",
                params![group.state as i64, group.league_id, require_id(group.id, "group")?],
            )?;
        }
        WriteOp::Touch => {
            conn.execute(
                "UPDATE league_groups SET last_seen = datetime('now') WHERE id = ?1",
                [require_id(group.id, "group")?],
            )?;
        }
    }
    let group_id = require_id(group.id, "group")?;

    for clan in &mut group.clans {
        match clan.op {
            WriteOp::Insert => {
                // the membership marker row may already exist from an
                // in_league probe; fold it into the group
                conn.execute(
                    "INSERT INTO league_clans (group_id, season_id, tag, name, clan_level, in_league)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1)
                     ON CONFLICT(season_id, tag) DO UPDATE SET
                        group_id = excluded.group_id, name = excluded.name,
                        clan_level = excluded.clan_level, in_league = 1",
                    params![group_id, group.season_id, clan.tag, clan.name, clan.clan_level],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM league_clans WHERE season_id = ?1 AND tag = ?2",
                    params![group.season_id, clan.tag],
                    |r| r.get(0),
                )?;
                clan.id = Some(id);
            }
            WriteOp::Update => {
                conn.execute(
                    "UPDATE league_clans SET name = ?1, clan_level = ?2, group_id = ?3
                     WHERE id = ?4",
                    params![clan.name, clan.clan_level, group_id, require_id(clan.id, "league clan")?],
                )?;
            }
            WriteOp::Touch => {}
        }
        let clan_id = require_id(clan.id, "league clan")?;
        for member in &mut clan.members {
            match member.op {
                WriteOp::Insert => {
                    conn.execute(
                        "INSERT INTO league_members (league_clan_id, tag, name, town_hall_level)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![clan_id, member.tag, member.name, member.town_hall_level],
                    )?;
                    member.id = Some(conn.last_insert_rowid());
                }
                WriteOp::Update => {
                    conn.execute(
                        "UPDATE league_members SET name = ?1, town_hall_level = ?2 WHERE id = ?3",
                        params![member.name, member.town_hall_level, require_id(member.id, "league member")?],
                    )?;
                }
                WriteOp::Touch => {}
            }
        }
    }

    for round in &mut group.rounds {
        if round.op == WriteOp::Insert {
            conn.execute(
                "INSERT INTO league_rounds (group_id, round) VALUES (?1, ?2)",
                params![group_id, round.index],
            )?;
            round.id = Some(conn.last_insert_rowid());
        }
        let round_id = require_id(round.id, "round")?;
        for tag in &mut round.tags {
            tag.round_id = Some(round_id);
            match tag.op {
                WriteOp::Insert => {
                    conn.execute(
                        "INSERT INTO war_tags (tag, round_id, war_id) VALUES (?1, ?2, ?3)
                         ON CONFLICT(tag) DO UPDATE SET
                            round_id = excluded.round_id",
                        params![tag.tag, round_id, tag.war_id],
                    )?;
                }
                WriteOp::Update => {
                    conn.execute(
                        "UPDATE war_tags SET round_id = ?1, war_id = ?2 WHERE tag = ?3",
                        params![round_id, tag.war_id, tag.tag],
                    )?;
                }
                WriteOp::Touch => {}
            }
        }
    }
    Ok(())
}

/// Write a reconciled war tree.
pub fn apply_war(conn: &Connection, war: &mut War) -> Result<(), StoreError> {
    match war.op {
        WriteOp::Insert => {
            conn.execute(
                "INSERT INTO wars (war_tag, round_id, state, war_type, team_size,
                                   preparation_start_time, start_time, end_time, result,
                                   side1_tag, side2_tag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    war.war_tag,
                    war.round_id,
                    war.state as i64,
                    war.war_type as i64,
                    war.team_size,
                    war.preparation_start_time.as_ref().map(ts_str),
                    war.start_time.as_ref().map(ts_str),
                    ts_str(&war.end_time),
                    war.result.map(|r| r as i64),
                    war.sides[0].tag,
                    war.sides[1].tag,
                ],
            )?;
            war.id = Some(conn.last_insert_rowid());
        }
        WriteOp::Update => {
            conn.execute(
                "UPDATE wars SET war_tag = ?1, round_id = ?2, state = ?3, war_type = ?4,
                        team_size = ?5, preparation_start_time = ?6, start_time = ?7,
                        end_time = ?8, result = ?9, last_seen = datetime('now')
                 WHERE id = ?10",
                params![
                    war.war_tag,
                    war.round_id,
                    war.state as i64,
                    war.war_type as i64,
                    war.team_size,
                    war.preparation_start_time.as_ref().map(ts_str),
                    war.start_time.as_ref().map(ts_str),
                    ts_str(&war.end_time),
                    war.result.map(|r| r as i64),
                    require_id(war.id, "war")?,
                ],
            )?;
        }
        WriteOp::Touch => {
            conn.execute(
                "UPDATE wars SET last_seen = datetime('now') WHERE id = ?1",
                [require_id(war.id, "war")?],
            )?;
        }
    }
    let war_id = require_id(war.id, "war")?;

    for side in &mut war.sides {
        // a frozen war's unmatched children exist only for identity lookups
        if side.op == WriteOp::Touch && side.id.is_none() {
            continue;
        }
        match side.op {
            WriteOp::Insert => {
                conn.execute(
                    "INSERT INTO war_sides (war_id, tag, name, clan_level, attacks_used,
                                            stars, destruction_percentage, exp_earned)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        war_id,
                        side.tag,
                        side.name,
                        side.clan_level,
                        side.attacks_used,
                        side.stars,
                        side.destruction_percentage,
                        side.exp_earned,
                    ],
                )?;
                side.id = Some(conn.last_insert_rowid());
            }
            WriteOp::Update => {
                conn.execute(
                    "UPDATE war_sides SET name = ?1, clan_level = ?2, attacks_used = ?3,
                            stars = ?4, destruction_percentage = ?5, exp_earned = ?6
                     WHERE id = ?7",
                    params![
                        side.name,
                        side.clan_level,
                        side.attacks_used,
                        side.stars,
                        side.destruction_percentage,
                        side.exp_earned,
                        require_id(side.id, "war side")?,
                    ],
                )?;
            }
            WriteOp::Touch => {}
        }
        let side_id = require_id(side.id, "war side")?;

        for member in &mut side.members {
            if member.op == WriteOp::Touch && member.id.is_none() {
                continue;
            }
            match member.op {
                WriteOp::Insert => {
                    conn.execute(
                        "INSERT INTO war_members (side_id, tag, name, town_hall_level, map_position)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![side_id, member.tag, member.name, member.town_hall_level, member.map_position],
                    )?;
                    member.id = Some(conn.last_insert_rowid());
                }
                WriteOp::Update => {
                    conn.execute(
                        "UPDATE war_members SET name = ?1, town_hall_level = ?2, map_position = ?3
                         WHERE id = ?4",
                        params![member.name, member.town_hall_level, member.map_position, require_id(member.id, "war member")?],
                    )?;
                }
                WriteOp::Touch => {}
            }
            let member_id = require_id(member.id, "war member")?;

            for attack in &mut member.attacks {
                if attack.op == WriteOp::Touch && attack.id.is_none() {
                    continue;
                }
                match attack.op {
                    WriteOp::Insert => {
                        conn.execute(
                            "INSERT INTO war_attacks (war_id, member_id, attacker_tag, defender_tag,
                                                      stars, destruction_percentage, attack_order)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                            params![
                                war_id,
                                member_id,
                                attack.attacker_tag,
                                attack.defender_tag,
                                attack.stars,
                                attack.destruction_percentage,
                                attack.order,
                            ],
                        )?;
                        attack.id = Some(conn.last_insert_rowid());
                    }
                    WriteOp::Update => {
                        conn.execute(
                            "UPDATE war_attacks SET stars = ?1, destruction_percentage = ?2,
                                    attack_order = ?3 WHERE id = ?4",
                            params![
                                attack.stars,
                                attack.destruction_percentage,
                                attack.order,
                                require_id(attack.id, "war attack")?,
                            ],
                        )?;
                    }
                    WriteOp::Touch => {}
                }
            }
        }
    }
    Ok(())
}

/// Record the tag → war association, creating the tag row if the war was
/// discovered outside any round.
pub fn set_tag_war(
    conn: &Connection,
    tag: &str,
    round_id: Option<i64>,
    war_id: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO war_tags (tag, round_id, war_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(tag) DO UPDATE SET
            war_id = excluded.war_id,
            round_id = COALESCE(excluded.round_id, war_tags.round_id)",
        params![tag, round_id, war_id],
    )?;
    Ok(())
}

/// Delete rows absent from the latest fetch of a non-terminal parent.
/// Children of a deleted row go with it.
pub fn delete_orphans(conn: &Connection, orphans: &[Orphan]) -> Result<(), StoreError> {
    for orphan in orphans {
        match orphan {
            Orphan::Attack(id) => {
                conn.execute("DELETE FROM war_attacks WHERE id = ?1", [id])?;
            }
            Orphan::Member(id) => {
                conn.execute("DELETE FROM war_attacks WHERE member_id = ?1", [id])?;
                conn.execute("DELETE FROM war_members WHERE id = ?1", [id])?;
            }
            Orphan::Side(id) => {
                conn.execute(
                    "DELETE FROM war_attacks WHERE member_id IN
                     (SELECT id FROM war_members WHERE side_id = ?1)",
                    [id],
                )?;
                conn.execute("DELETE FROM war_members WHERE side_id = ?1", [id])?;
                conn.execute("DELETE FROM war_sides WHERE id = ?1", [id])?;
            }
            Orphan::War(id) => {
                conn.execute("DELETE FROM war_attacks WHERE war_id = ?1", [id])?;
                conn.execute(
                    "DELETE FROM war_members WHERE side_id IN
                     (SELECT id FROM war_sides WHERE war_id = ?1)",
                    [id],
                )?;
                conn.execute("DELETE FROM war_sides WHERE war_id = ?1", [id])?;
                conn.execute("UPDATE war_tags SET war_id = NULL WHERE war_id = ?1", [id])?;
                conn.execute("DELETE FROM wars WHERE id = ?1", [id])?;
            }
            Orphan::LeagueMember(id) => {
                conn.execute("DELETE FROM league_members WHERE id = ?1", [id])?;
            }
            Orphan::LeagueClan(id) => {
                conn.execute("DELETE FROM league_members WHERE league_clan_id = ?1", [id])?;
                conn.execute("DELETE FROM league_clans WHERE id = ?1", [id])?;
            }
            Orphan::WarTag(tag) => {
                conn.execute("DELETE FROM war_tags WHERE tag = ?1", [tag])?;
            }
        }
    }
    Ok(())
}

/// Wars that have not reached the terminal state.
pub fn unfinished_wars(conn: &Connection) -> Result<Vec<(i64, Option<String>)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, war_tag FROM wars WHERE state != ?1 ORDER BY end_time",
    )?;
    let rows = stmt.query_map([WarState::WarEnded as i64], |r| {
        Ok((r.get::<_, i64>(0)?, r.get::<_, Option<String>>(1)?))
    })?;
    let mut wars = Vec::new();
    for w in rows {
        wars.push(w?);
    }
    Ok(wars)
}

pub fn upsert_clan(conn: &Connection, tag: &str, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO clans (tag, name) VALUES (?1, ?2)
         ON CONFLICT(tag) DO UPDATE SET name = excluded.name, last_seen = datetime('now')",
        params![tag, name],
    )?;
    Ok(())
}

pub fn upsert_player(conn: &Connection, tag: &str, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO players (tag, name) VALUES (?1, ?2)
         ON CONFLICT(tag) DO UPDATE SET name = excluded.name, last_seen = datetime('now')",
        params![tag, name],
    )?;
    Ok(())
}
