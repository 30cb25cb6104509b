//! Rank promotions.
//!
//! Ranks form a monotonic ladder. Reaching the next rank may require qualified
//! directs, a team size counted from depth 2, and a number of legs holding a
//! prerequisite rank. Leg holdings depend on the partners' own ranks, so a
//! subtree is evaluated bottom-up, deepest members first, and every result is
//! memoised in a [`RankPass`] for the rest of the pass. A promoted account is
//! immediately re-tested for the following rank.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{RankConfig, RankRule};
use crate::downline::{DownlineMember, DownlineWalker};
use crate::error::{CommissionError, Result};
use crate::ledger::{self, CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter};
use crate::model::{AccountId, Amount};
use crate::scheduler::{JobKind, PassReport};
use crate::store::{AccountStore, LedgerStore};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Promotion {
    pub account: AccountId,
    pub from: u8,
    pub to: u8,
    pub rewards: Vec<CommissionRecord>,
}

/// Evaluated figures for one account, valid for the rest of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct NodeStats {
    rank: u8,
    active: bool,
    /// Highest rank held by an active, funded member of the subtree.
    funded_best: u8,
    /// Active members in the subtree, the node included.
    active_size: usize,
}

/// Per-pass memo of evaluated accounts.
#[derive(Debug, Default)]
pub struct RankPass {
    stats: HashMap<AccountId, NodeStats>,
    promotions: Vec<Promotion>,
}

impl RankPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rank_of(&self, account: &AccountId) -> Option<u8> {
        self.stats.get(account).map(|s| s.rank)
    }

    pub fn promotions(&self) -> &[Promotion] {
        &self.promotions
    }

    pub fn into_promotions(self) -> Vec<Promotion> {
        self.promotions
    }
}

/// What the next-rank test sees for one account.
struct Candidate<'m> {
    id: &'m AccountId,
    active: bool,
    invested: Amount,
    rank: u8,
    children: Vec<NodeStats>,
    child_members: Vec<&'m DownlineMember>,
}

pub struct RankQualifier<'a> {
    config: &'a RankConfig,
}

impl<'a> RankQualifier<'a> {
    pub fn new(config: &'a RankConfig) -> Self {
        Self { config }
    }

    /// Evaluate `root` and, first, every account below it not yet memoised.
    pub fn evaluate<S>(
        &self,
        store: &mut S,
        pass: &mut RankPass,
        root: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u8>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        if let Some(rank) = pass.rank_of(root) {
            return Ok(rank);
        }
        let root_account = store
            .account(root)?
            .ok_or_else(|| CommissionError::not_found("account", root.clone()))?;

        let mut members: Vec<DownlineMember> = Vec::new();
        for level in DownlineWalker::new(&*store, root, None) {
            members.extend(level?);
        }
        let mut children: HashMap<&AccountId, Vec<&DownlineMember>> = HashMap::new();
        for member in &members {
            children.entry(&member.sponsor).or_default().push(member);
        }

        for member in members.iter().rev() {
            if pass.stats.contains_key(&member.id) {
                continue;
            }
            let candidate = self.candidate(
                pass,
                &member.id,
                member.active,
                member.invested,
                member.rank,
                &children,
            );
            let stats = self.settle(store, pass, candidate, now)?;
            pass.stats.insert(member.id.clone(), stats);
        }

        let root_member = DownlineMember {
            id: root_account.id.clone(),
            sponsor: root_account.sponsor.clone().unwrap_or_default(),
            depth: 0,
            active: root_account.active && !root_account.blocked,
            invested: root_account.invested,
            rank: root_account.rank,
        };
        let candidate = self.candidate(
            pass,
            &root_member.id,
            root_member.active,
            root_member.invested,
            root_member.rank,
            &children,
        );
        let stats = self.settle(store, pass, candidate, now)?;
        pass.stats.insert(root.clone(), stats);
        Ok(stats.rank)
    }

    fn candidate<'m>(
        &self,
        pass: &RankPass,
        id: &'m AccountId,
        active: bool,
        invested: Amount,
        rank: u8,
        children: &HashMap<&AccountId, Vec<&'m DownlineMember>>,
    ) -> Candidate<'m> {
        let child_members = children.get(id).cloned().unwrap_or_default();
        let child_stats = child_members
            .iter()
            .filter_map(|child| pass.stats.get(&child.id).copied())
            .collect();
        Candidate {
            id,
            active,
            invested,
            rank,
            children: child_stats,
            child_members,
        }
    }

    fn meets(&self, rule: &RankRule, candidate: &Candidate<'_>) -> bool {
        let min = self.config.min_self_investment;
        if !candidate.active || candidate.invested < min {
            return false;
        }
        let qualified_directs = candidate
            .child_members
            .iter()
            .filter(|m| m.active && m.invested >= min)
            .count();
        let team_from_depth_two: usize = candidate
            .children
            .iter()
            .map(|c| c.active_size - usize::from(c.active))
            .sum();
        let qualifying_legs = candidate
            .children
            .iter()
            .filter(|c| c.rank.max(c.funded_best) >= rule.leg_rank)
            .count();
        qualified_directs >= rule.min_qualified_directs
            && team_from_depth_two >= rule.min_team
            && (rule.min_legs == 0 || qualifying_legs >= rule.min_legs)
    }

    /// Promote as far as the ladder allows, persist, and compute stats.
    fn settle<S>(
        &self,
        store: &mut S,
        pass: &mut RankPass,
        candidate: Candidate<'_>,
        now: DateTime<Utc>,
    ) -> Result<NodeStats>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let from = candidate.rank;
        let mut rank = from;
        let mut rewards = Vec::new();
        while rank < self.config.top() {
            let next = rank + 1;
            let rule = &self.config.ladder[next as usize];
            if !self.meets(rule, &candidate) {
                break;
            }
            rank = next;
            if let Some(record) = self.reward(store, candidate.id, next, rule, now)? {
                rewards.push(record);
            }
        }

        if rank > from {
            let mut account = store
                .account(candidate.id)?
                .ok_or_else(|| CommissionError::not_found("account", candidate.id.clone()))?;
            if account.rank < rank {
                account.rank = rank;
                store.update_account(account)?;
            }
            info!(
                account = %candidate.id,
                from = self.config.name(from),
                to = self.config.name(rank),
                "rank promotion"
            );
            pass.promotions.push(Promotion {
                account: candidate.id.clone(),
                from,
                to: rank,
                rewards,
            });
        }

        let funded = candidate.active && candidate.invested > 0;
        let funded_best = candidate
            .children
            .iter()
            .map(|c| c.funded_best)
            .chain(funded.then_some(rank))
            .max()
            .unwrap_or(0);
        let below: usize = candidate.children.iter().map(|c| c.active_size).sum();
        let active_size = usize::from(candidate.active) + below;
        Ok(NodeStats {
            rank,
            active: candidate.active,
            funded_best,
            active_size,
        })
    }

    /// One-time reward per (account, rank).
    fn reward<S>(
        &self,
        store: &mut S,
        account: &AccountId,
        rank: u8,
        rule: &RankRule,
        now: DateTime<Utc>,
    ) -> Result<Option<CommissionRecord>>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        if rule.reward == 0 {
            return Ok(None);
        }
        let reference = format!("rank:{}", rule.name);
        let claimed = LedgerFilter::kind(CommissionKind::Rank)
            .beneficiary(account)
            .reference(reference.clone());
        if store.exists(&claimed)? {
            return Ok(None);
        }
        let draft = CommissionDraft::new(account, CommissionKind::Rank, rule.reward, now)
            .level(rank as u32)
            .reference(reference);
        Ok(Some(ledger::credit(store, draft)?))
    }

    pub fn run_pass<S>(&self, store: &mut S, now: DateTime<Utc>) -> PassReport
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let mut report = PassReport::new(JobKind::Rank, now);
        let ids = match store.account_ids() {
            Ok(ids) => ids,
            Err(err) => {
                report.abort(err.into());
                return report;
            }
        };
        let mut pass = RankPass::new();
        for id in &ids {
            report.processed += 1;
            if pass.rank_of(id).is_some() {
                continue;
            }
            if let Err(err) = self.evaluate(store, &mut pass, id, now) {
                warn!(account = %id, error = %err, "rank unit failed");
                report.fail(id, err);
            }
        }
        for promotion in pass.promotions() {
            for reward in &promotion.rewards {
                report.record_credit(reward.amount);
            }
        }
        report.finish();
        report
    }
}
