//! Referral and level income along the sponsor chain.
//!
//! A source event (a deposit, or a credited daily return) walks upward one
//! sponsor per hop. The direct sponsor earns a flat bracket bonus once per
//! originating account; deeper ancestors earn a ladder percentage when the
//! depth is within their unlocked depth. Locked ancestors are skipped but the
//! walk continues; a blocked or excluded ancestor ends it for everyone above.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{CommissionConfig, ReferralConfig};
use crate::error::{CommissionError, Result, SkipReason};
use crate::ledger::{self, CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter};
use crate::model::{Account, AccountId, Amount, Transaction, TxId, TxStatus, apply_bps};
use crate::qualification::LevelQualifier;
use crate::store::{AccountStore, LedgerStore, TransactionStore};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// New money; the direct sponsor may earn the flat bonus.
    Deposit,
    /// A credited daily return; only depths covered by the level ladder pay.
    RoiCredit,
}

#[derive(Clone, Debug)]
pub struct SourceEvent {
    pub origin: AccountId,
    pub amount: Amount,
    pub kind: SourceKind,
    /// Unique per event; level credits are written once per (beneficiary, reference, depth).
    pub reference: String,
    pub transaction: Option<TxId>,
    pub at: DateTime<Utc>,
}

impl SourceEvent {
    pub fn deposit(tx: &Transaction) -> Self {
        Self {
            origin: tx.account.clone(),
            amount: tx.amount,
            kind: SourceKind::Deposit,
            reference: tx.id.clone(),
            transaction: Some(tx.id.clone()),
            at: tx.created_at,
        }
    }

    pub fn roi_credit(
        origin: &AccountId,
        tx: &TxId,
        day_index: u32,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            origin: origin.clone(),
            amount,
            kind: SourceKind::RoiCredit,
            reference: format!("{tx}#{day_index}"),
            transaction: Some(tx.clone()),
            at,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DistributionOutcome {
    pub credits: Vec<CommissionRecord>,
    pub skipped: Vec<(u32, AccountId, SkipReason)>,
    /// Depth and id of the ancestor that ended the walk.
    pub stopped_at: Option<(u32, AccountId)>,
}

impl DistributionOutcome {
    pub fn total(&self) -> Amount {
        self.credits.iter().map(|c| c.amount).sum()
    }
}

pub struct ReferralDistributor<'a> {
    config: &'a ReferralConfig,
    qualifier: LevelQualifier<'a>,
}

impl<'a> ReferralDistributor<'a> {
    pub fn new(config: &'a CommissionConfig) -> Self {
        Self {
            config: &config.referral,
            qualifier: LevelQualifier::new(&config.qualification),
        }
    }

    fn stops_chain(&self, account: &Account) -> Option<SkipReason> {
        if account.blocked {
            Some(SkipReason::Blocked)
        } else if account.excluded || self.config.is_excluded(&account.id) {
            Some(SkipReason::Excluded)
        } else {
            None
        }
    }

    pub fn distribute<S>(&self, store: &mut S, event: &SourceEvent) -> Result<DistributionOutcome>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        if event.amount == 0 {
            return Err(CommissionError::validation("source event amount must be positive"));
        }
        let origin = store
            .account(&event.origin)?
            .ok_or_else(|| CommissionError::not_found("account", event.origin.clone()))?;
        let mut outcome = DistributionOutcome::default();
        if let Some(reason) = self.stops_chain(&origin) {
            debug!(origin = %origin.id, ?reason, "origin generates no chain income");
            outcome.stopped_at = Some((0, origin.id.clone()));
            return Ok(outcome);
        }

        let mut visited = BTreeSet::from([origin.id.clone()]);
        let mut current = origin;
        for depth in 1..=self.config.max_depth {
            let Some(sponsor_id) = current.sponsor.clone() else {
                break;
            };
            if !visited.insert(sponsor_id.clone()) {
                warn!(
                    origin = %event.origin,
                    at = %sponsor_id,
                    "sponsor cycle detected, walk stopped"
                );
                break;
            }
            let Some(ancestor) = store.account(&sponsor_id)? else {
                warn!(
                    origin = %event.origin,
                    sponsor = %sponsor_id,
                    "sponsor missing, walk stopped"
                );
                break;
            };
            if let Some(reason) = self.stops_chain(&ancestor) {
                info!(
                    origin = %event.origin,
                    reference = %event.reference,
                    depth,
                    ancestor = %ancestor.id,
                    ?reason,
                    "chain circuit breaker"
                );
                outcome.stopped_at = Some((depth, ancestor.id.clone()));
                break;
            }

            let result = if depth == 1 {
                self.pay_direct(store, event, &ancestor)?
            } else {
                self.pay_level(store, event, &ancestor, depth)?
            };
            match result {
                Ok(record) => outcome.credits.push(record),
                Err(reason) => outcome.skipped.push((depth, ancestor.id.clone(), reason)),
            }
            current = ancestor;
        }

        debug!(
            origin = %event.origin,
            reference = %event.reference,
            credits = outcome.credits.len(),
            total = outcome.total(),
            "referral distribution finished"
        );
        Ok(outcome)
    }

    fn pay_direct<S>(
        &self,
        store: &mut S,
        event: &SourceEvent,
        sponsor: &Account,
    ) -> Result<std::result::Result<CommissionRecord, SkipReason>>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        if event.kind != SourceKind::Deposit {
            return Ok(Err(SkipReason::NothingToPay));
        }
        if !sponsor.active {
            return Ok(Err(SkipReason::Inactive));
        }
        let Some(bonus) = self.config.direct_bonus_for(event.amount) else {
            return Ok(Err(SkipReason::BelowMinimum));
        };
        let paid_before = LedgerFilter::kind(CommissionKind::Referral)
            .beneficiary(&sponsor.id)
            .source(&event.origin);
        if store.exists(&paid_before)? {
            return Ok(Err(SkipReason::AlreadyPaid));
        }
        let mut draft = CommissionDraft::new(&sponsor.id, CommissionKind::Referral, bonus, event.at)
            .source(&event.origin)
            .level(1)
            .reference(event.reference.clone());
        if let Some(tx) = &event.transaction {
            draft = draft.transaction(tx);
        }
        Ok(Ok(ledger::credit(store, draft)?))
    }

    fn pay_level<S>(
        &self,
        store: &mut S,
        event: &SourceEvent,
        ancestor: &Account,
        depth: u32,
    ) -> Result<std::result::Result<CommissionRecord, SkipReason>>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let Some(bps) = self.config.level_bps(depth) else {
            return Ok(Err(SkipReason::NothingToPay));
        };
        if !ancestor.active {
            return Ok(Err(SkipReason::Inactive));
        }
        if depth > self.qualifier.unlocked_depth(store, &ancestor.id)? {
            return Ok(Err(SkipReason::NotQualified));
        }
        let amount = apply_bps(event.amount, bps);
        if amount == 0 {
            return Ok(Err(SkipReason::BelowMinimum));
        }
        let paid_before = LedgerFilter::kind(CommissionKind::Level)
            .beneficiary(&ancestor.id)
            .reference(event.reference.clone())
            .level(depth);
        if store.exists(&paid_before)? {
            return Ok(Err(SkipReason::AlreadyPaid));
        }
        let mut draft = CommissionDraft::new(&ancestor.id, CommissionKind::Level, amount, event.at)
            .source(&event.origin)
            .bps(bps)
            .level(depth)
            .reference(event.reference.clone());
        if let Some(tx) = &event.transaction {
            draft = draft.transaction(tx);
        }
        Ok(Ok(ledger::credit(store, draft)?))
    }
}

/// Store a deposit or reinvestment and distribute it up the chain.
///
/// Pending transactions are stored without effect; a completed one raises the
/// account's cumulative investment and activates it first.
pub fn record_deposit<S>(
    store: &mut S,
    config: &CommissionConfig,
    tx: Transaction,
) -> Result<DistributionOutcome>
where
    S: AccountStore + TransactionStore + LedgerStore + ?Sized,
{
    if tx.id.is_empty() {
        return Err(CommissionError::validation("transaction id is empty"));
    }
    if !tx.kind.earns_roi() {
        return Err(CommissionError::validation(format!("{} is not a deposit", tx.id)));
    }
    if tx.amount == 0 {
        return Err(CommissionError::validation(format!("{} has zero amount", tx.id)));
    }
    if let Some(plan) = &tx.plan {
        if config.roi.plan(plan).is_none() {
            return Err(CommissionError::not_found("plan", plan.clone()));
        }
    }
    let mut account = store
        .account(&tx.account)?
        .ok_or_else(|| CommissionError::not_found("account", tx.account.clone()))?;
    if let Some(existing) = store.transaction(&tx.id)? {
        if existing.status == TxStatus::Completed {
            return Err(CommissionError::validation(format!("{} already completed", tx.id)));
        }
    }

    store.insert_transaction(tx.clone())?;
    if tx.status != TxStatus::Completed {
        return Ok(DistributionOutcome::default());
    }
    account.invested = account.invested.saturating_add(tx.amount);
    account.active = true;
    store.update_account(account)?;
    info!(account = %tx.account, tx = %tx.id, amount = tx.amount, "deposit recorded");

    ReferralDistributor::new(config).distribute(store, &SourceEvent::deposit(&tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{usd, TxKind};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    /// A straight chain top → ... → leaf, each with six qualified side partners
    /// so every ancestor unlocks depth 10.
    fn chain(ids: &[&str]) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut sponsor: Option<AccountId> = None;
        let mut seq = 0;
        for id in ids {
            let mut account = Account::new(*id, sponsor.clone(), at() + Duration::seconds(seq));
            seq += 1;
            account.invested = usd(100);
            account.active = true;
            store.insert_account(account).unwrap();
            for side in 0..6 {
                let registered = at() + Duration::seconds(seq);
                let mut partner =
                    Account::new(format!("{id}-s{side}"), Some(id.to_string()), registered);
                seq += 1;
                partner.invested = usd(100);
                partner.active = true;
                store.insert_account(partner).unwrap();
            }
            sponsor = Some(id.to_string());
        }
        store
    }

    fn deposit(id: &str, account: &str, amount: Amount) -> Transaction {
        Transaction {
            id: id.into(),
            account: account.into(),
            kind: TxKind::Deposit,
            amount,
            plan: None,
            status: TxStatus::Completed,
            created_at: at(),
        }
    }

    #[test]
    fn direct_bonus_pays_once_per_pair() {
        let mut store = chain(&["c", "b", "a"]);
        let config = CommissionConfig::default();
        let first = record_deposit(&mut store, &config, deposit("t1", "a", usd(5_000))).unwrap();
        assert_eq!(first.credits[0].beneficiary, "b");
        assert_eq!(first.credits[0].amount, usd(75));

        let second = record_deposit(&mut store, &config, deposit("t2", "a", usd(5_000))).unwrap();
        assert!(second.credits.iter().all(|c| c.kind != CommissionKind::Referral));
        assert!(second.skipped.contains(&(1, "b".to_string(), SkipReason::AlreadyPaid)));
        assert_eq!(store.account(&"b".into()).unwrap().unwrap().income.referral, usd(75));
    }

    #[test]
    fn level_commission_uses_ladder() {
        let mut store = chain(&["c", "b", "a"]);
        let config = CommissionConfig::default();
        let outcome = record_deposit(&mut store, &config, deposit("t1", "a", usd(5_000))).unwrap();
        let level = outcome
            .credits
            .iter()
            .find(|c| c.kind == CommissionKind::Level)
            .unwrap();
        assert_eq!(level.beneficiary, "c");
        assert_eq!(level.level, 2);
        assert_eq!(level.amount, usd(100));
    }

    #[test]
    fn locked_depth_skips_but_walk_continues() {
        let ids = ["l", "k", "j", "i", "h", "g", "f", "e", "d", "c", "b", "a"];
        let mut store = chain(&ids);
        // "h" sits at depth 7 above "a"; strip its partners so it unlocks only depth 1.
        for side in 0..6 {
            let mut partner = store.account(&format!("h-s{side}")).unwrap().unwrap();
            partner.active = false;
            store.update_account(partner).unwrap();
        }
        let config = CommissionConfig::default();
        let outcome = record_deposit(&mut store, &config, deposit("t1", "a", usd(1_000))).unwrap();
        assert!(outcome.skipped.iter().any(|(depth, id, reason)| {
            *depth == 7 && id == "h" && *reason == SkipReason::NotQualified
        }));
        // "i" at depth 8 unlocks 10 and is still paid.
        assert!(outcome.credits.iter().any(|c| c.beneficiary == "i" && c.level == 8));
        // "l" at depth 11 is beyond every unlocked depth of 10.
        assert!(outcome
            .skipped
            .iter()
            .any(|(depth, id, _)| *depth == 11 && id == "l"));
    }

    #[test]
    fn blocked_ancestor_breaks_chain() {
        let mut store = chain(&["d", "c", "b", "a"]);
        let mut c = store.account(&"c".into()).unwrap().unwrap();
        c.blocked = true;
        store.update_account(c).unwrap();
        let config = CommissionConfig::default();
        let outcome = record_deposit(&mut store, &config, deposit("t1", "a", usd(1_000))).unwrap();
        assert_eq!(outcome.stopped_at, Some((2, "c".to_string())));
        assert!(outcome.credits.iter().all(|c| c.beneficiary == "b"));
        assert_eq!(store.account(&"d".into()).unwrap().unwrap().income.total, 0);
    }

    #[test]
    fn excluded_origin_generates_nothing() {
        let mut store = chain(&["c", "b", "a"]);
        let mut config = CommissionConfig::default();
        config.referral.excluded_accounts.push("a".into());
        let outcome = record_deposit(&mut store, &config, deposit("t1", "a", usd(1_000))).unwrap();
        assert!(outcome.credits.is_empty());
        assert_eq!(outcome.stopped_at, Some((0, "a".to_string())));
        // The deposit itself still counts toward investment.
        assert_eq!(store.account(&"a".into()).unwrap().unwrap().invested, usd(1_100));
    }

    #[test]
    fn roi_events_skip_direct_bonus_and_are_keyed_by_day() {
        let mut store = chain(&["c", "b", "a"]);
        let config = CommissionConfig::default();
        let distributor = ReferralDistributor::new(&config);
        let event = SourceEvent::roi_credit(&"a".into(), &"t1".into(), 1, usd(50), at());
        let first = distributor.distribute(&mut store, &event).unwrap();
        assert_eq!(first.credits.len(), 1);
        assert_eq!(first.credits[0].beneficiary, "c");
        assert_eq!(first.credits[0].amount, usd(1));
        let again = distributor.distribute(&mut store, &event).unwrap();
        assert!(again.credits.is_empty());
    }

    #[test]
    fn rejects_invalid_deposits_without_effect() {
        let mut store = chain(&["b", "a"]);
        let config = CommissionConfig::default();
        let err = record_deposit(&mut store, &config, deposit("t1", "a", 0)).unwrap_err();
        assert!(matches!(err, CommissionError::Validation(_)));
        let err = record_deposit(&mut store, &config, deposit("t1", "ghost", 100)).unwrap_err();
        assert!(matches!(err, CommissionError::NotFound { .. }));
        assert!(store.all_records().is_empty());
    }
}
