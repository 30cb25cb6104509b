//! Leg-balance rewards and the monthly matching bonus.
//!
//! Both read the account's power/weaker split from [`crate::downline`].
//! Reward definitions are claimed at most once per account through their
//! claim set; the matching bonus pays on weaker-side volume not yet matched,
//! at most `max_payouts_per_month` times per calendar month.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CommissionConfig;
use crate::downline::{leg_split, LegSplit};
use crate::error::{CommissionError, Result, SkipReason};
use crate::ledger::{
    self, CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter, TimeRange,
};
use crate::model::{apply_bps, Account, AccountId, RewardDefinition, RewardFamily, RewardId};
use crate::scheduler::{JobKind, PassReport};
use crate::store::{AccountStore, LedgerStore, RewardStore};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewardOutcome {
    Claimed { reward: RewardId, record: Option<CommissionRecord> },
    Skipped { reward: RewardId, reason: SkipReason },
}

pub struct MatchingEvaluator<'a> {
    config: &'a CommissionConfig,
}

impl<'a> MatchingEvaluator<'a> {
    pub fn new(config: &'a CommissionConfig) -> Self {
        Self { config }
    }

    /// Whether `split` reaches the reward's threshold under its family rule.
    pub fn reaches(&self, reward: &RewardDefinition, split: &LegSplit) -> bool {
        match reward.family {
            RewardFamily::Global => {
                split.total() >= reward.threshold
                    && split.is_balanced(self.config.matching.balance_ratio_bps)
            }
            RewardFamily::Rank => split.lesser() >= reward.threshold,
        }
    }

    /// Claim every reward the account's legs reach and it has not claimed yet.
    pub fn evaluate_rewards<S>(
        &self,
        store: &mut S,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RewardOutcome>>
    where
        S: AccountStore + LedgerStore + RewardStore + ?Sized,
    {
        let account = load(store, account_id)?;
        let definitions = store.reward_definitions()?;
        if !account.active || account.blocked {
            return Ok(definitions
                .into_iter()
                .filter(|d| !d.claimed_by.contains(account_id))
                .map(|d| RewardOutcome::Skipped {
                    reward: d.id,
                    reason: SkipReason::Inactive,
                })
                .collect());
        }
        let split = leg_split(&*store, account_id)?;
        let mut outcomes = Vec::new();
        for reward in definitions {
            if reward.claimed_by.contains(account_id) {
                continue;
            }
            if !self.reaches(&reward, &split) {
                outcomes.push(RewardOutcome::Skipped {
                    reward: reward.id,
                    reason: SkipReason::NotQualified,
                });
                continue;
            }
            outcomes.push(self.claim(store, &reward, account_id, &split, now)?);
        }
        Ok(outcomes)
    }

    fn claim<S>(
        &self,
        store: &mut S,
        reward: &RewardDefinition,
        account_id: &AccountId,
        split: &LegSplit,
        now: DateTime<Utc>,
    ) -> Result<RewardOutcome>
    where
        S: AccountStore + LedgerStore + RewardStore + ?Sized,
    {
        let reference = format!("reward:{}", reward.id);
        let paid = LedgerFilter::kind(CommissionKind::Reward)
            .beneficiary(account_id)
            .reference(reference.clone());
        if store.exists(&paid)? {
            // Credit landed but the claim set was never updated.
            store.mark_claimed(&reward.id, account_id)?;
            return Ok(RewardOutcome::Skipped {
                reward: reward.id.clone(),
                reason: SkipReason::AlreadyPaid,
            });
        }
        let record = if reward.payout > 0 {
            let draft = CommissionDraft::new(account_id, CommissionKind::Reward, reward.payout, now)
                .reference(reference);
            Some(ledger::credit(store, draft)?)
        } else {
            None
        };
        store.mark_claimed(&reward.id, account_id)?;
        info!(
            account = %account_id,
            reward = %reward.name,
            power = split.greater(),
            weaker = split.lesser(),
            payout = reward.payout,
            "reward claimed"
        );
        Ok(RewardOutcome::Claimed {
            reward: reward.id.clone(),
            record,
        })
    }

    /// Pay the bonus on weaker-side volume matched since the last payout.
    pub fn matching_bonus<S>(
        &self,
        store: &mut S,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<CommissionRecord, SkipReason>>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let rules = &self.config.matching;
        let account = load(store, account_id)?;
        if !account.active || account.blocked {
            return Ok(Err(SkipReason::Inactive));
        }
        let matched = leg_split(&*store, account_id)?.lesser();
        let fresh = matched.saturating_sub(account.matched_volume);
        if fresh == 0 {
            return Ok(Err(SkipReason::NothingToPay));
        }
        if fresh < rules.min_new_volume {
            return Ok(Err(SkipReason::BelowMinimum));
        }
        let this_month = LedgerFilter::kind(CommissionKind::Matching)
            .beneficiary(account_id)
            .within(TimeRange::month_of(now));
        if store.count(&this_month)? >= rules.max_payouts_per_month {
            return Ok(Err(SkipReason::MonthlyLimit));
        }
        let reference = format!("matching:{matched}");
        let watermark = LedgerFilter::kind(CommissionKind::Matching)
            .beneficiary(account_id)
            .reference(reference.clone());
        let record = if store.exists(&watermark)? {
            None
        } else {
            let amount = apply_bps(fresh, rules.bonus_bps);
            if amount == 0 {
                return Ok(Err(SkipReason::BelowMinimum));
            }
            let draft = CommissionDraft::new(account_id, CommissionKind::Matching, amount, now)
                .bps(rules.bonus_bps)
                .reference(reference);
            Some(ledger::credit(store, draft)?)
        };

        let mut account = load(store, account_id)?;
        account.matched_volume = matched;
        store.update_account(account)?;
        match record {
            Some(record) => {
                debug!(account = %account_id, fresh, amount = record.amount, "matching bonus");
                Ok(Ok(record))
            }
            None => Ok(Err(SkipReason::AlreadyPaid)),
        }
    }

    pub fn run_matching_pass<S>(&self, store: &mut S, now: DateTime<Utc>) -> PassReport
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let mut report = PassReport::new(JobKind::Matching, now);
        let ids = match store.account_ids() {
            Ok(ids) => ids,
            Err(err) => {
                report.abort(err.into());
                return report;
            }
        };
        for id in &ids {
            report.processed += 1;
            match self.matching_bonus(store, id, now) {
                Ok(Ok(record)) => report.record_credit(record.amount),
                Ok(Err(_)) => report.skipped += 1,
                Err(err) => {
                    warn!(account = %id, error = %err, "matching unit failed");
                    report.fail(id, err);
                }
            }
        }
        report.finish();
        report
    }

    pub fn run_reward_pass<S>(&self, store: &mut S, now: DateTime<Utc>) -> PassReport
    where
        S: AccountStore + LedgerStore + RewardStore + ?Sized,
    {
        let mut report = PassReport::new(JobKind::Reward, now);
        let ids = match store.account_ids() {
            Ok(ids) => ids,
            Err(err) => {
                report.abort(err.into());
                return report;
            }
        };
        for id in &ids {
            report.processed += 1;
            match self.evaluate_rewards(store, id, now) {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome {
                            RewardOutcome::Claimed {
                                record: Some(record),
                                ..
                            } => report.record_credit(record.amount),
                            RewardOutcome::Claimed { record: None, .. } => {}
                            RewardOutcome::Skipped { .. } => report.skipped += 1,
                        }
                    }
                }
                Err(err) => {
                    warn!(account = %id, error = %err, "reward unit failed");
                    report.fail(id, err);
                }
            }
        }
        report.finish();
        report
    }
}

fn load<S: AccountStore + ?Sized>(store: &S, id: &AccountId) -> Result<Account> {
    store
        .account(id)?
        .ok_or_else(|| CommissionError::not_found("account", id.clone()))
}
