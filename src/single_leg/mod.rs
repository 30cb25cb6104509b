//! Withdrawal commission shared with registration neighbours.
//!
//! The processing fee of a withdrawal is split across up to K funded accounts
//! registered just before the withdrawer and up to K just after, each taking a
//! fixed share. Whatever is left goes to the house account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{CommissionConfig, SingleLegConfig};
use crate::error::{CommissionError, Result, SkipReason};
use crate::ledger::{self, CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter};
use crate::model::{
    apply_bps, Account, AccountId, Amount, Transaction, TxId, TxKind, TxStatus,
};
use crate::store::{AccountStore, LedgerStore, TransactionStore};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SingleLegOutcome {
    pub before: Vec<CommissionRecord>,
    pub after: Vec<CommissionRecord>,
    /// Credit to the house account, absent when nothing was left.
    pub house: Option<CommissionRecord>,
    pub skipped: Option<SkipReason>,
}

impl SingleLegOutcome {
    pub fn distributed(&self) -> Amount {
        self.before.iter().chain(&self.after).map(|r| r.amount).sum()
    }

    pub fn total(&self) -> Amount {
        self.distributed() + self.house.as_ref().map_or(0, |r| r.amount)
    }
}

/// Split `commission` from withdrawal `tx` across neighbours and the house.
pub fn distribute_withdrawal_commission<S>(
    store: &mut S,
    config: &SingleLegConfig,
    withdrawer: &AccountId,
    tx: &TxId,
    commission: Amount,
    now: DateTime<Utc>,
) -> Result<SingleLegOutcome>
where
    S: AccountStore + LedgerStore + ?Sized,
{
    if commission == 0 {
        return Err(CommissionError::validation(
            "withdrawal commission must be positive",
        ));
    }
    if store.account(withdrawer)?.is_none() {
        return Err(CommissionError::not_found("account", withdrawer.clone()));
    }
    if store.account(&config.house_account)?.is_none() {
        return Err(CommissionError::not_found(
            "house account",
            config.house_account.clone(),
        ));
    }
    let paid = LedgerFilter::kind(CommissionKind::SingleLeg).transaction(tx);
    if store.exists(&paid)? {
        return Ok(SingleLegOutcome {
            skipped: Some(SkipReason::AlreadyPaid),
            ..SingleLegOutcome::default()
        });
    }

    let house = &config.house_account;
    let keep =
        |account: &Account| account.is_funded() && !account.blocked && &account.id != house;
    let (before, after) =
        store.registration_neighbors(withdrawer, config.neighbors_each_side, &keep)?;
    let share = apply_bps(commission, config.share_bps);

    let mut outcome = SingleLegOutcome::default();
    let mut remaining = commission;
    if share > 0 {
        for (side, neighbours) in [("before", before), ("after", after)] {
            for neighbour in neighbours {
                if share > remaining {
                    break;
                }
                let draft =
                    CommissionDraft::new(&neighbour.id, CommissionKind::SingleLeg, share, now)
                        .source(withdrawer)
                        .bps(config.share_bps)
                        .transaction(tx)
                        .reference(format!("{tx}:{side}"));
                let record = ledger::credit(store, draft)?;
                remaining -= share;
                if side == "before" {
                    outcome.before.push(record);
                } else {
                    outcome.after.push(record);
                }
            }
        }
    }
    if remaining > 0 {
        let draft = CommissionDraft::new(house, CommissionKind::SingleLeg, remaining, now)
            .source(withdrawer)
            .transaction(tx)
            .reference(format!("{tx}:house"));
        outcome.house = Some(ledger::credit(store, draft)?);
    }
    info!(
        withdrawer = %withdrawer,
        tx = %tx,
        commission,
        before = outcome.before.len(),
        after = outcome.after.len(),
        share,
        remainder = remaining,
        house = %house,
        "single-leg commission distributed"
    );
    Ok(outcome)
}

/// Store a completed withdrawal and distribute its processing fee.
pub fn record_withdrawal<S>(
    store: &mut S,
    config: &CommissionConfig,
    tx: Transaction,
) -> Result<SingleLegOutcome>
where
    S: AccountStore + TransactionStore + LedgerStore + ?Sized,
{
    if tx.id.is_empty() {
        return Err(CommissionError::validation("transaction id is empty"));
    }
    if tx.kind != TxKind::Withdrawal {
        return Err(CommissionError::validation(format!("{} is not a withdrawal", tx.id)));
    }
    if tx.amount == 0 {
        return Err(CommissionError::validation(format!("{} has zero amount", tx.id)));
    }
    let account = store
        .account(&tx.account)?
        .ok_or_else(|| CommissionError::not_found("account", tx.account.clone()))?;
    if account.blocked {
        return Err(CommissionError::validation(format!("{} is blocked", account.id)));
    }
    if let Some(existing) = store.transaction(&tx.id)? {
        if existing.status == TxStatus::Completed {
            return Err(CommissionError::validation(format!("{} already completed", tx.id)));
        }
    }
    if tx.status != TxStatus::Completed {
        store.insert_transaction(tx)?;
        return Ok(SingleLegOutcome::default());
    }

    let house = &config.single_leg.house_account;
    if store.account(house)?.is_none() {
        return Err(CommissionError::not_found("house account", house.clone()));
    }
    let fee = apply_bps(tx.amount, config.single_leg.withdrawal_fee_bps);
    let outcome = if fee == 0 {
        SingleLegOutcome {
            skipped: Some(SkipReason::BelowMinimum),
            ..SingleLegOutcome::default()
        }
    } else {
        distribute_withdrawal_commission(
            store,
            &config.single_leg,
            &tx.account,
            &tx.id,
            fee,
            tx.created_at,
        )?
    };
    // Completed withdrawals are immutable; store only after the split succeeded.
    store.insert_transaction(tx.clone())?;
    info!(
        account = %tx.account,
        tx = %tx.id,
        amount = tx.amount,
        fee,
        "withdrawal recorded"
    );
    Ok(outcome)
}
