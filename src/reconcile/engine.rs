//! Hierarchical diff/merge.
//!
//! Reconciles a freshly fetched subtree against its persisted counterpart,
//! level by level over semantic-key indices (clan tag for sides, player tag
//! for members, (attacker, defender) for attacks, the tag string for war
//! tags). Matched nodes keep their persisted identity and are classified
//! `Update` or `Touch` by narrow field comparison; unmatched fetched nodes
//! stay `Insert`; persisted rows missing from the fetch are collected as
//! orphans — unless the parent is terminal, in which case its subtree is
//! frozen and never pruned.
//!
//! Pure tree walking, no IO. The store applies the annotated tree afterwards.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::models::{
    LeagueClan, LeagueGroup, LeagueMember, LeagueRound, War, WarAttack, WarMember, WarSide,
    WarState, WarTag, WriteOp,
};

/// A persisted row absent from the latest fetch, queued for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Orphan {
    War(i64),
    Side(i64),
    Member(i64),
    Attack(i64),
    LeagueClan(i64),
    LeagueMember(i64),
    WarTag(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub touched: usize,
    pub orphaned: usize,
}

impl ReconcileStats {
    fn mark(&mut self, op: WriteOp) {
        match op {
            WriteOp::Insert => self.inserted += 1,
            WriteOp::Update => self.updated += 1,
            WriteOp::Touch => self.touched += 1,
        }
    }

    /// Durable-store writes beyond timestamp refreshes.
    pub fn changes(&self) -> usize {
        self.inserted + self.updated + self.orphaned
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub stats: ReconcileStats,
    pub orphans: Vec<Orphan>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// More identities were preserved at one level than nodes were fetched —
    /// reconciliation can never materialize entities absent from the source.
    IdentityOverflow {
        level: &'static str,
        fetched: usize,
        matched: usize,
    },
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::IdentityOverflow {
                level,
                fetched,
                matched,
            } => write!(
                f,
                "identity overflow at {}: matched {} of {} fetched",
                level, matched, fetched
            ),
        }
    }
}

impl std::error::Error for ReconcileError {}

fn check_level(level: &'static str, fetched: usize, matched: usize) -> Result<(), ReconcileError> {
    if matched > fetched {
        return Err(ReconcileError::IdentityOverflow {
            level,
            fetched,
            matched,
        });
    }
    Ok(())
}

/// Reconcile a fetched league group against its persisted counterpart.
pub fn reconcile_group(
    fetched: &mut LeagueGroup,
    persisted: Option<&LeagueGroup>,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();
    let Some(p) = persisted else {
        mark_group_insert(fetched, &mut report.stats);
        return Ok(report);
    };

    fetched.id = p.id;
    if fetched.league_id.is_none() {
        fetched.league_id = p.league_id;
    }
    fetched.op = if fetched.same_content(p) {
        WriteOp::Touch
    } else {
        WriteOp::Update
    };
    report.stats.mark(fetched.op);

    let terminal = p.state == WarState::WarEnded;

    // clans keyed by tag
    let pclans: HashMap<&str, &LeagueClan> =
        p.clans.iter().map(|c| (c.tag.as_str(), c)).collect();
    let mut matched = 0;
    for clan in &mut fetched.clans {
        match pclans.get(clan.tag.as_str()) {
            Some(pc) => {
                matched += 1;
                clan.id = pc.id;
                clan.op = if clan.same_content(pc) {
                    WriteOp::Touch
                } else {
                    WriteOp::Update
                };
                report.stats.mark(clan.op);
                reconcile_league_members(&mut clan.members, &pc.members, terminal, &mut report)?;
            }
            None => mark_clan_insert(clan, &mut report.stats),
        }
    }
    check_level("league clans", fetched.clans.len(), matched)?;
    if !terminal {
        let seen: HashSet<&str> = fetched.clans.iter().map(|c| c.tag.as_str()).collect();
        for pc in &p.clans {
            if !seen.contains(pc.tag.as_str()) {
                if let Some(id) = pc.id {
                    report.orphans.push(Orphan::LeagueClan(id));
                    report.stats.orphaned += 1;
                }
            }
        }
    }

    // rounds keyed by ordered position
    for (i, round) in fetched.rounds.iter_mut().enumerate() {
        match p.rounds.get(i) {
            Some(pr) => {
                round.id = pr.id;
                round.op = WriteOp::Touch;
                report.stats.mark(round.op);
                reconcile_tags(&mut round.tags, &pr.tags, terminal, &mut report)?;
            }
            None => mark_round_insert(round, &mut report.stats),
        }
    }

    Ok(report)
}

fn reconcile_league_members(
    fetched: &mut [LeagueMember],
    persisted: &[LeagueMember],
    terminal: bool,
    report: &mut ReconcileReport,
) -> Result<(), ReconcileError> {
    let pmap: HashMap<&str, &LeagueMember> =
        persisted.iter().map(|m| (m.tag.as_str(), m)).collect();
    let mut matched = 0;
    for member in fetched.iter_mut() {
        match pmap.get(member.tag.as_str()) {
            Some(pm) => {
                matched += 1;
                member.id = pm.id;
                member.op = if member.same_content(pm) {
                    WriteOp::Touch
                } else {
                    WriteOp::Update
                };
                report.stats.mark(member.op);
            }
            None => report.stats.mark(member.op),
        }
    }
    check_level("league members", fetched.len(), matched)?;
    if !terminal {
        let seen: HashSet<&str> = fetched.iter().map(|m| m.tag.as_str()).collect();
        for pm in persisted {
            if !seen.contains(pm.tag.as_str()) {
                if let Some(id) = pm.id {
                    report.orphans.push(Orphan::LeagueMember(id));
                    report.stats.orphaned += 1;
                }
            }
        }
    }
    Ok(())
}

fn reconcile_tags(
    fetched: &mut [WarTag],
    persisted: &[WarTag],
    terminal: bool,
    report: &mut ReconcileReport,
) -> Result<(), ReconcileError> {
    let pmap: HashMap<&str, &WarTag> = persisted.iter().map(|t| (t.tag.as_str(), t)).collect();
    let mut matched = 0;
    for tag in fetched.iter_mut() {
        match pmap.get(tag.tag.as_str()) {
            Some(pt) => {
                matched += 1;
                // carry the resolved association forward
                if tag.war_id.is_none() {
                    tag.war_id = pt.war_id;
                }
                tag.op = if tag.war_id == pt.war_id && pt.round_id.is_some() {
                    WriteOp::Touch
                } else {
                    WriteOp::Update
                };
                report.stats.mark(tag.op);
            }
            None => report.stats.mark(tag.op),
        }
    }
    check_level("war tags", fetched.len(), matched)?;
    if !terminal {
        let seen: HashSet<&str> = fetched.iter().map(|t| t.tag.as_str()).collect();
        for pt in persisted {
            if !seen.contains(pt.tag.as_str()) {
                report.orphans.push(Orphan::WarTag(pt.tag.clone()));
                report.stats.orphaned += 1;
            }
        }
    }
    Ok(())
}

/// Reconcile a fetched war against its persisted counterpart (found by
/// semantic key, never by remote tag alone).
pub fn reconcile_war(
    fetched: &mut War,
    persisted: Option<&War>,
) -> Result<ReconcileReport, ReconcileError> {
    let mut report = ReconcileReport::default();
    let Some(p) = persisted else {
        mark_war_insert(fetched, &mut report.stats);
        return Ok(report);
    };

    fetched.id = p.id;
    if fetched.round_id.is_none() {
        fetched.round_id = p.round_id;
    }
    if fetched.war_tag.is_none() {
        fetched.war_tag = p.war_tag.clone();
    }

    if p.state == WarState::WarEnded {
        // frozen: identity lookups only, no mutation, no pruning
        freeze_war(fetched, p, &mut report.stats);
        return Ok(report);
    }

    fetched.op = if fetched.same_content(p) {
        WriteOp::Touch
    } else {
        WriteOp::Update
    };
    report.stats.mark(fetched.op);

    let psides: HashMap<&str, &WarSide> = p.sides.iter().map(|s| (s.tag.as_str(), s)).collect();
    let mut matched = 0;
    for side in &mut fetched.sides {
        match psides.get(side.tag.as_str()) {
            Some(ps) => {
                matched += 1;
                side.id = ps.id;
                side.op = if side.same_content(ps) {
                    WriteOp::Touch
                } else {
                    WriteOp::Update
                };
                report.stats.mark(side.op);
                reconcile_war_members(&mut side.members, &ps.members, &mut report)?;
            }
            None => mark_side_insert(side, &mut report.stats),
        }
    }
    check_level("war sides", fetched.sides.len(), matched)?;
    let seen: HashSet<&str> = fetched.sides.iter().map(|s| s.tag.as_str()).collect();
    for ps in &p.sides {
        if !seen.contains(ps.tag.as_str()) {
            if let Some(id) = ps.id {
                report.orphans.push(Orphan::Side(id));
                report.stats.orphaned += 1;
            }
        }
    }

    Ok(report)
}

fn reconcile_war_members(
    fetched: &mut [WarMember],
    persisted: &[WarMember],
    report: &mut ReconcileReport,
) -> Result<(), ReconcileError> {
    let pmap: HashMap<&str, &WarMember> = persisted.iter().map(|m| (m.tag.as_str(), m)).collect();
    let mut matched = 0;
    for member in fetched.iter_mut() {
        match pmap.get(member.tag.as_str()) {
            Some(pm) => {
                matched += 1;
                member.id = pm.id;
                member.op = if member.same_content(pm) {
                    WriteOp::Touch
                } else {
                    WriteOp::Update
                };
                report.stats.mark(member.op);
                reconcile_attacks(&mut member.attacks, &pm.attacks, report)?;
            }
            None => mark_member_insert(member, &mut report.stats),
        }
    }
    check_level("war members", fetched.len(), matched)?;
    let seen: HashSet<&str> = fetched.iter().map(|m| m.tag.as_str()).collect();
    for pm in persisted {
        if !seen.contains(pm.tag.as_str()) {
            if let Some(id) = pm.id {
                report.orphans.push(Orphan::Member(id));
                report.stats.orphaned += 1;
            }
        }
    }
    Ok(())
}

fn reconcile_attacks(
    fetched: &mut [WarAttack],
    persisted: &[WarAttack],
    report: &mut ReconcileReport,
) -> Result<(), ReconcileError> {
    let pmap: HashMap<(String, String), &WarAttack> =
        persisted.iter().map(|a| (a.key(), a)).collect();
    let mut matched = 0;
    for attack in fetched.iter_mut() {
        match pmap.get(&attack.key()) {
            Some(pa) => {
                matched += 1;
                attack.id = pa.id;
                attack.op = if attack.same_content(pa) {
                    WriteOp::Touch
                } else {
                    WriteOp::Update
                };
                report.stats.mark(attack.op);
            }
            None => report.stats.mark(attack.op),
        }
    }
    check_level("war attacks", fetched.len(), matched)?;
    let seen: HashSet<(String, String)> = fetched.iter().map(|a| a.key()).collect();
    for pa in persisted {
        if !seen.contains(&pa.key()) {
            if let Some(id) = pa.id {
                report.orphans.push(Orphan::Attack(id));
                report.stats.orphaned += 1;
            }
        }
    }
    Ok(())
}

/// Ended persisted war: copy identities so callers can look children up, mark
/// the whole fetched tree `Touch`. Unmatched fetched nodes keep `id = None`
/// and are ignored by the store's `Touch` arm, so nothing is written.
fn freeze_war(fetched: &mut War, persisted: &War, stats: &mut ReconcileStats) {
    fetched.op = WriteOp::Touch;
    stats.mark(fetched.op);
    let psides: HashMap<&str, &WarSide> =
        persisted.sides.iter().map(|s| (s.tag.as_str(), s)).collect();
    for side in &mut fetched.sides {
        side.op = WriteOp::Touch;
        let ps = psides.get(side.tag.as_str());
        if let Some(ps) = ps {
            side.id = ps.id;
        }
        let pmembers: HashMap<&str, &WarMember> = ps
            .map(|ps| ps.members.iter().map(|m| (m.tag.as_str(), m)).collect())
            .unwrap_or_default();
        for member in &mut side.members {
            member.op = WriteOp::Touch;
            let pm = pmembers.get(member.tag.as_str());
            if let Some(pm) = pm {
                member.id = pm.id;
            }
            let pattacks: HashMap<(String, String), &WarAttack> = pm
                .map(|pm| pm.attacks.iter().map(|a| (a.key(), a)).collect())
                .unwrap_or_default();
            for attack in &mut member.attacks {
                attack.op = WriteOp::Touch;
                if let Some(pa) = pattacks.get(&attack.key()) {
                    attack.id = pa.id;
                }
            }
        }
    }
}

fn mark_group_insert(group: &mut LeagueGroup, stats: &mut ReconcileStats) {
    group.op = WriteOp::Insert;
    stats.mark(group.op);
    for clan in &mut group.clans {
        mark_clan_insert(clan, stats);
    }
    for round in &mut group.rounds {
        mark_round_insert(round, stats);
    }
}

fn mark_clan_insert(clan: &mut LeagueClan, stats: &mut ReconcileStats) {
    clan.op = WriteOp::Insert;
    stats.mark(clan.op);
    for member in &mut clan.members {
        member.op = WriteOp::Insert;
        stats.mark(member.op);
    }
}

fn mark_round_insert(round: &mut LeagueRound, stats: &mut ReconcileStats) {
    round.op = WriteOp::Insert;
    stats.mark(round.op);
    for tag in &mut round.tags {
        tag.op = WriteOp::Insert;
        stats.mark(tag.op);
    }
}

fn mark_war_insert(war: &mut War, stats: &mut ReconcileStats) {
    war.op = WriteOp::Insert;
    stats.mark(war.op);
    for side in &mut war.sides {
        mark_side_insert(side, stats);
    }
}

fn mark_side_insert(side: &mut WarSide, stats: &mut ReconcileStats) {
    side.op = WriteOp::Insert;
    stats.mark(side.op);
    for member in &mut side.members {
        mark_member_insert(member, stats);
    }
}

fn mark_member_insert(member: &mut WarMember, stats: &mut ReconcileStats) {
    member.op = WriteOp::Insert;
    stats.mark(member.op);
    for attack in &mut member.attacks {
        attack.op = WriteOp::Insert;
        stats.mark(attack.op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WarType;
    use chrono::{TimeZone, Utc};

    fn attack(attacker: &str, defender: &str, stars: i64, id: Option<i64>) -> WarAttack {
        WarAttack {
            id,
            op: WriteOp::default(),
            attacker_tag: attacker.into(),
            defender_tag: defender.into(),
            stars: Some(stars),
            destruction_percentage: Some(stars as f64 * 30.0),
            order: Some(1),
        }
    }

    fn member(tag: &str, attacks: Vec<WarAttack>, id: Option<i64>) -> WarMember {
        WarMember {
            id,
            op: WriteOp::default(),
            tag: tag.into(),
            name: Some(tag.into()),
            town_hall_level: Some(13),
            map_position: Some(1),
            attacks,
        }
    }

    fn side(tag: &str, members: Vec<WarMember>, id: Option<i64>) -> WarSide {
        WarSide {
            id,
            op: WriteOp::default(),
            tag: tag.into(),
            name: Some(tag.into()),
            clan_level: Some(10),
            attacks_used: Some(members.iter().map(|m| m.attacks.len() as i64).sum()),
            stars: Some(members.iter().flat_map(|m| &m.attacks).filter_map(|a| a.stars).sum()),
            destruction_percentage: Some(50.0),
            exp_earned: None,
            members,
        }
    }

    fn war(state: WarState, sides: Vec<WarSide>) -> War {
        War {
            id: None,
            op: WriteOp::default(),
            war_tag: None,
            round_id: None,
            state,
            war_type: WarType::League,
            team_size: Some(15),
            preparation_start_time: None,
            start_time: None,
            end_time: Utc.with_ymd_and_hms(2026, 8, 3, 7, 0, 0).unwrap(),
            result: None,
            sides,
        }
    }

    /// A persisted tree as the store would load it: every node has an id.
    fn persisted_war() -> War {
        let mut w = war(
            WarState::InWar,
            vec![
                side(
                    "#99V",
                    vec![member("#P2L", vec![attack("#P2L", "#Q2U", 2, Some(100))], Some(10))],
                    Some(1),
                ),
                side("#PPC", vec![member("#Q2U", vec![], Some(11))], Some(2)),
            ],
        );
        w.id = Some(7);
        w.war_tag = Some("#T1".into());
        w.round_id = Some(3);
        w
    }

    #[test]
    fn test_insert_everything_when_no_counterpart() {
        let mut w = war(
            WarState::InWar,
            vec![
                side("#99V", vec![member("#P2L", vec![], None)], None),
                side("#PPC", vec![], None),
            ],
        );
        let report = reconcile_war(&mut w, None).unwrap();
        // war + 2 sides + 1 member
        assert_eq!(report.stats.inserted, 4);
        assert_eq!(report.stats.updated + report.stats.touched, 0);
        assert!(report.orphans.is_empty());
        assert_eq!(w.op, WriteOp::Insert);
    }

    #[test]
    fn test_identity_preserved_and_unchanged_is_touch() {
        let p = persisted_war();
        let mut f = war(
            WarState::InWar,
            vec![
                side(
                    "#99V",
                    vec![member("#P2L", vec![attack("#P2L", "#Q2U", 2, None)], None)],
                    None,
                ),
                side("#PPC", vec![member("#Q2U", vec![], None)], None),
            ],
        );
        let report = reconcile_war(&mut f, Some(&p)).unwrap();
        assert_eq!(f.id, Some(7));
        assert_eq!(f.war_tag.as_deref(), Some("#T1"));
        assert_eq!(f.round_id, Some(3));
        assert_eq!(f.sides[0].id, Some(1));
        assert_eq!(f.sides[0].members[0].id, Some(10));
        assert_eq!(f.sides[0].members[0].attacks[0].id, Some(100));
        assert_eq!(report.stats.inserted, 0);
        assert_eq!(report.stats.changes(), 0);
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_changed_fields_queue_updates_new_attack_inserts() {
        let p = persisted_war();
        let mut f = war(
            WarState::InWar,
            vec![
                side(
                    "#99V",
                    vec![member(
                        "#P2L",
                        vec![attack("#P2L", "#Q2U", 3, None)], // improved to 3 stars
                        None,
                    )],
                    None,
                ),
                side(
                    "#PPC",
                    vec![member(
                        "#Q2U",
                        vec![attack("#Q2U", "#P2L", 1, None)], // brand new attack
                        None,
                    )],
                    None,
                ),
            ],
        );
        let report = reconcile_war(&mut f, Some(&p)).unwrap();
        assert_eq!(f.sides[0].members[0].attacks[0].id, Some(100));
        assert_eq!(f.sides[0].members[0].attacks[0].op, WriteOp::Update);
        assert_eq!(f.sides[1].members[0].attacks[0].op, WriteOp::Insert);
        assert_eq!(f.sides[1].members[0].attacks[0].id, None);
        assert_eq!(report.stats.inserted, 1);
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_orphans_pruned_from_live_parent_only() {
        // live persisted war with an attack the new fetch no longer carries
        let p = persisted_war();
        let mut f = war(
            WarState::InWar,
            vec![
                side("#99V", vec![member("#P2L", vec![], None)], None),
                side("#PPC", vec![member("#Q2U", vec![], None)], None),
            ],
        );
        let report = reconcile_war(&mut f, Some(&p)).unwrap();
        assert_eq!(report.orphans, vec![Orphan::Attack(100)]);

        // same fetch against the ended form of the war: retained untouched
        let mut p_ended = persisted_war();
        p_ended.state = WarState::WarEnded;
        let mut f = war(
            WarState::WarEnded,
            vec![
                side("#99V", vec![member("#P2L", vec![], None)], None),
                side("#PPC", vec![], None),
            ],
        );
        let report = reconcile_war(&mut f, Some(&p_ended)).unwrap();
        assert!(report.orphans.is_empty());
        assert_eq!(report.stats.changes(), 0);
        assert_eq!(f.op, WriteOp::Touch);
        assert_eq!(f.sides[0].id, Some(1));
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        // reconcile, pretend the store assigned ids, reconcile again
        let mut first = war(
            WarState::InWar,
            vec![
                side(
                    "#99V",
                    vec![member("#P2L", vec![attack("#P2L", "#Q2U", 2, None)], None)],
                    None,
                ),
                side("#PPC", vec![member("#Q2U", vec![], None)], None),
            ],
        );
        let r1 = reconcile_war(&mut first, None).unwrap();
        // war + 2 sides + 2 members + 1 attack
        assert_eq!(r1.stats.inserted, 6);
        // simulate insert: assign ids
        first.id = Some(1);
        let mut next_id = 10;
        for s in &mut first.sides {
            s.id = Some(next_id);
            next_id += 1;
            for m in &mut s.members {
                m.id = Some(next_id);
                next_id += 1;
                for a in &mut m.attacks {
                    a.id = Some(next_id);
                    next_id += 1;
                }
            }
        }

        let mut second = war(
            WarState::InWar,
            vec![
                side(
                    "#99V",
                    vec![member("#P2L", vec![attack("#P2L", "#Q2U", 2, None)], None)],
                    None,
                ),
                side("#PPC", vec![member("#Q2U", vec![], None)], None),
            ],
        );
        let r2 = reconcile_war(&mut second, Some(&first)).unwrap();
        assert_eq!(r2.stats.inserted, 0);
        assert_eq!(r2.stats.changes(), 0);
        assert_eq!(r2.stats.touched, 6);
        assert_eq!(second.id, first.id);
    }

    #[test]
    fn test_group_reconcile_preserves_round_and_tag_rows() {
        let mut persisted = LeagueGroup {
            id: Some(1),
            op: WriteOp::Touch,
            season_id: 1,
            state: WarState::InWar,
            league_id: Some(48000015),
            clans: vec![],
            rounds: vec![LeagueRound {
                id: Some(5),
                op: WriteOp::Touch,
                index: 0,
                tags: vec![WarTag {
                    op: WriteOp::Touch,
                    tag: "#T1".into(),
                    round_id: Some(5),
                    war_id: Some(7),
                }],
            }],
        };
        persisted.clans.push(LeagueClan {
            id: Some(2),
            op: WriteOp::Touch,
            tag: "#99V".into(),
            name: "first".into(),
            clan_level: Some(10),
            members: vec![],
        });

        let mut fetched = LeagueGroup {
            id: None,
            op: WriteOp::default(),
            season_id: 1,
            state: WarState::InWar,
            league_id: None,
            clans: vec![LeagueClan {
                id: None,
                op: WriteOp::default(),
                tag: "#99V".into(),
                name: "first".into(),
                clan_level: Some(10),
                members: vec![],
            }],
            rounds: vec![LeagueRound {
                id: None,
                op: WriteOp::default(),
                index: 0,
                tags: vec![WarTag {
                    op: WriteOp::default(),
                    tag: "#T1".into(),
                    round_id: None,
                    war_id: None,
                }],
            }],
        };

        let report = reconcile_group(&mut fetched, Some(&persisted)).unwrap();
        assert_eq!(fetched.id, Some(1));
        assert_eq!(fetched.league_id, Some(48000015));
        assert_eq!(fetched.rounds[0].id, Some(5));
        // association carried forward even though the fetch had none
        assert_eq!(fetched.rounds[0].tags[0].war_id, Some(7));
        assert_eq!(report.stats.inserted, 0);
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_stale_tag_is_orphaned_from_live_group() {
        let persisted = LeagueGroup {
            id: Some(1),
            op: WriteOp::Touch,
            season_id: 1,
            state: WarState::InWar,
            league_id: None,
            clans: vec![],
            rounds: vec![LeagueRound {
                id: Some(5),
                op: WriteOp::Touch,
                index: 0,
                tags: vec![
                    WarTag {
                        op: WriteOp::Touch,
                        tag: "#T1".into(),
                        round_id: Some(5),
                        war_id: None,
                    },
                    WarTag {
                        op: WriteOp::Touch,
                        tag: "#T9".into(),
                        round_id: Some(5),
                        war_id: None,
                    },
                ],
            }],
        };
        let mut fetched = LeagueGroup {
            id: None,
            op: WriteOp::default(),
            season_id: 1,
            state: WarState::InWar,
            league_id: None,
            clans: vec![],
            rounds: vec![LeagueRound {
                id: None,
                op: WriteOp::default(),
                index: 0,
                tags: vec![WarTag {
                    op: WriteOp::default(),
                    tag: "#T1".into(),
                    round_id: None,
                    war_id: None,
                }],
            }],
        };
        let report = reconcile_group(&mut fetched, Some(&persisted)).unwrap();
        assert_eq!(report.orphans, vec![Orphan::WarTag("#T9".into())]);

        // terminal group: the stale tag is retained
        let mut ended = persisted.clone();
        ended.state = WarState::WarEnded;
        let mut fetched = LeagueGroup {
            id: None,
            op: WriteOp::default(),
            season_id: 1,
            state: WarState::WarEnded,
            league_id: None,
            clans: vec![],
            rounds: vec![LeagueRound {
                id: None,
                op: WriteOp::default(),
                index: 0,
                tags: vec![WarTag {
                    op: WriteOp::default(),
                    tag: "#T1".into(),
                    round_id: None,
                    war_id: None,
                }],
            }],
        };
        let report = reconcile_group(&mut fetched, Some(&ended)).unwrap();
        assert!(report.orphans.is_empty());
    }

    #[test]
    fn test_semantic_key_ignores_remote_tag() {
        // same war observed under a different remote tag still matches
        let p = persisted_war();
        let mut f = war(
            WarState::InWar,
            vec![
                side("#99V", vec![], None),
                side("#PPC", vec![], None),
            ],
        );
        f.war_tag = Some("#OTHER".into());
        assert_eq!(f.semantic_key(), p.semantic_key());
        let _ = reconcile_war(&mut f, Some(&p)).unwrap();
        assert_eq!(f.id, p.id);
        // the fetched tag wins; persisted tag only fills a gap
        assert_eq!(f.war_tag.as_deref(), Some("#OTHER"));
    }
}
