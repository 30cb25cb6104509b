//! Downline aggregation over sponsor links.
//!
//! Traversal is breadth-first from a root through direct partners. The
//! [`DownlineWalker`] yields one depth level at a time so callers that only
//! need sums (leg volumes, band totals) never hold more than one frontier.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{CommissionError, Result};
use crate::model::{Account, AccountId, Amount};
use crate::store::{AccountStore, PartnerFilter, StoreError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownlineMember {
    pub id: AccountId,
    pub sponsor: AccountId,
    /// 1 for direct partners.
    pub depth: u32,
    pub active: bool,
    pub invested: Amount,
    pub rank: u8,
}

impl DownlineMember {
    fn from_account(account: &Account, depth: u32) -> Self {
        Self {
            id: account.id.clone(),
            sponsor: account.sponsor.clone().unwrap_or_default(),
            depth,
            active: account.active && !account.blocked,
            invested: account.invested,
            rank: account.rank,
        }
    }

    pub fn is_funded(&self) -> bool {
        self.active && self.invested > 0
    }
}

/// Level-by-level breadth-first walk below `root`.
pub struct DownlineWalker<'a, S: ?Sized> {
    store: &'a S,
    frontier: Vec<AccountId>,
    seen: BTreeSet<AccountId>,
    depth: u32,
    max_depth: Option<u32>,
}

impl<'a, S: AccountStore + ?Sized> DownlineWalker<'a, S> {
    pub fn new(store: &'a S, root: &AccountId, max_depth: Option<u32>) -> Self {
        Self {
            store,
            frontier: vec![root.clone()],
            seen: BTreeSet::from([root.clone()]),
            depth: 0,
            max_depth,
        }
    }

    fn next_level(&mut self) -> std::result::Result<Vec<DownlineMember>, StoreError> {
        let depth = self.depth + 1;
        let mut level = Vec::new();
        for parent in &self.frontier {
            for partner in self.store.direct_partners(parent, PartnerFilter::all())? {
                // A malformed store may link back up the tree.
                if self.seen.insert(partner.id.clone()) {
                    level.push(DownlineMember::from_account(&partner, depth));
                }
            }
        }
        self.depth = depth;
        self.frontier = level.iter().map(|m| m.id.clone()).collect();
        Ok(level)
    }
}

impl<'a, S: AccountStore + ?Sized> Iterator for DownlineWalker<'a, S> {
    type Item = std::result::Result<Vec<DownlineMember>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.frontier.is_empty() || self.max_depth.map_or(false, |max| self.depth >= max) {
            return None;
        }
        match self.next_level() {
            Ok(level) if level.is_empty() => None,
            Ok(level) => Some(Ok(level)),
            Err(err) => {
                self.frontier.clear();
                Some(Err(err))
            }
        }
    }
}

/// Every descendant of `root` down to `max_depth`, ordered by depth.
pub fn collect_downline<S>(
    store: &S,
    root: &AccountId,
    max_depth: Option<u32>,
) -> Result<Vec<DownlineMember>>
where
    S: AccountStore + ?Sized,
{
    ensure_account(store, root)?;
    let mut members = Vec::new();
    for level in DownlineWalker::new(store, root, max_depth) {
        members.extend(level?);
    }
    Ok(members)
}

/// Aggregate volume of one leg: the partner plus its entire subtree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegVolume {
    pub partner: AccountId,
    pub volume: Amount,
    pub members: usize,
}

pub fn leg_volumes<S>(store: &S, root: &AccountId) -> Result<Vec<LegVolume>>
where
    S: AccountStore + ?Sized,
{
    ensure_account(store, root)?;
    let mut legs = Vec::new();
    for partner in store.direct_partners(root, PartnerFilter::all())? {
        let mut volume = partner.invested;
        let mut members = 1;
        for level in DownlineWalker::new(store, &partner.id, None) {
            for member in level? {
                volume = volume.saturating_add(member.invested);
                members += 1;
            }
        }
        legs.push(LegVolume {
            partner: partner.id,
            volume,
            members,
        });
    }
    Ok(legs)
}

/// Greatest single leg against the sum of all the others.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LegSplit {
    pub power_partner: Option<AccountId>,
    pub power: Amount,
    pub weaker: Amount,
}

impl LegSplit {
    pub fn from_legs(legs: &[LegVolume]) -> Self {
        let Some(power_leg) = legs
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.volume.cmp(&b.volume).then(ib.cmp(ia)))
            .map(|(_, leg)| leg)
        else {
            return Self::default();
        };
        let total: Amount = legs.iter().fold(0u64, |acc, leg| acc.saturating_add(leg.volume));
        Self {
            power_partner: Some(power_leg.partner.clone()),
            power: power_leg.volume,
            weaker: total - power_leg.volume,
        }
    }

    pub fn total(&self) -> Amount {
        self.power.saturating_add(self.weaker)
    }

    pub fn lesser(&self) -> Amount {
        self.power.min(self.weaker)
    }

    pub fn greater(&self) -> Amount {
        self.power.max(self.weaker)
    }

    /// `min × ratio ≥ max`, with the ratio in basis points.
    pub fn is_balanced(&self, ratio_bps: u32) -> bool {
        self.lesser() as u128 * ratio_bps as u128 >= self.greater() as u128 * 10_000
    }
}

pub fn leg_split<S>(store: &S, root: &AccountId) -> Result<LegSplit>
where
    S: AccountStore + ?Sized,
{
    Ok(LegSplit::from_legs(&leg_volumes(store, root)?))
}

fn ensure_account<S: AccountStore + ?Sized>(store: &S, id: &AccountId) -> Result<Account> {
    store
        .account(id)?
        .ok_or_else(|| CommissionError::not_found("account", id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::usd;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn build(edges: &[(&str, Option<&str>, u64)]) -> MemoryStore {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut store = MemoryStore::new();
        for (idx, (id, sponsor, invested)) in edges.iter().enumerate() {
            let registered = base + Duration::seconds(idx as i64);
            let mut account = Account::new(*id, sponsor.map(String::from), registered);
            account.invested = usd(*invested);
            account.active = *invested > 0;
            store.insert_account(account).unwrap();
        }
        store
    }

    fn sample() -> MemoryStore {
        build(&[
            ("root", None, 100),
            ("a", Some("root"), 1_000),
            ("b", Some("root"), 200),
            ("a1", Some("a"), 500),
            ("a2", Some("a"), 0),
            ("a11", Some("a1"), 300),
            ("b1", Some("b"), 400),
        ])
    }

    #[test]
    fn walker_yields_levels_in_order() {
        let store = sample();
        let depths: Vec<Vec<String>> = DownlineWalker::new(&store, &"root".into(), None)
            .map(|level| level.unwrap().into_iter().map(|m| m.id).collect())
            .collect();
        assert_eq!(depths, vec![vec!["a", "b"], vec!["a1", "a2", "b1"], vec!["a11"]]);
    }

    #[test]
    fn depth_bound_is_respected() {
        let store = sample();
        let members = collect_downline(&store, &"root".into(), Some(2)).unwrap();
        assert_eq!(members.len(), 5);
        assert!(members.iter().all(|m| m.depth <= 2));
        assert!(!members.iter().find(|m| m.id == "a2").unwrap().is_funded());
    }

    #[test]
    fn leg_split_partitions_downline_volume() {
        let store = sample();
        let split = leg_split(&store, &"root".into()).unwrap();
        assert_eq!(split.power_partner.as_deref(), Some("a"));
        assert_eq!(split.power, usd(1_800));
        assert_eq!(split.weaker, usd(600));
        let downline: Amount = collect_downline(&store, &"root".into(), None)
            .unwrap()
            .iter()
            .map(|m| m.invested)
            .sum();
        assert_eq!(split.total(), downline);
    }

    #[test]
    fn balance_ratio() {
        let split = LegSplit {
            power_partner: None,
            power: 150,
            weaker: 100,
        };
        assert!(split.is_balanced(15_000));
        let split = LegSplit { power: 151, ..split };
        assert!(!split.is_balanced(15_000));
        assert!(LegSplit::default().is_balanced(15_000));
    }

    #[test]
    fn unknown_root_is_not_found() {
        let store = sample();
        assert!(matches!(
            leg_split(&store, &"ghost".into()),
            Err(CommissionError::NotFound { .. })
        ));
    }
}
