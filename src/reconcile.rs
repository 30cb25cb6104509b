//! Out-of-band reconciliation of income aggregates against the ledger.
//!
//! The ledger is the source of truth. Repair only rewrites aggregates, never
//! records, so running it any number of times cannot credit anything twice.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CommissionConfig;
use crate::error::Result;
use crate::ledger::{ledger_digest, CommissionKind, CommissionRecord, LedgerFilter};
use crate::model::{AccountId, Amount, IncomeAggregate, TxFilter, TxId, TxKind, TxStatus};
use crate::store::{AccountStore, LedgerStore, TransactionStore};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountDrift {
    pub account: AccountId,
    pub recorded: IncomeAggregate,
    pub expected: IncomeAggregate,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapViolation {
    pub transaction: TxId,
    pub account: AccountId,
    pub cap: Amount,
    pub paid: Amount,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub accounts: usize,
    pub records: usize,
    pub drift: Vec<AccountDrift>,
    pub repaired: usize,
    pub cap_violations: Vec<CapViolation>,
    /// Hex Merkle root over every record.
    pub digest: String,
}

impl ReconcileReport {
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty() && self.cap_violations.is_empty()
    }
}

/// Every record, ordered by creation time then id.
pub fn ledger_snapshot<S>(store: &S) -> Result<Vec<CommissionRecord>>
where
    S: LedgerStore + ?Sized,
{
    let mut records = Vec::new();
    for kind in CommissionKind::ALL {
        records.extend(store.records(&LedgerFilter::kind(kind))?);
    }
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(records)
}

/// Income buckets implied by the account's records.
pub fn expected_income<S>(
    store: &S,
    account: &AccountId,
    recorded: &IncomeAggregate,
) -> Result<IncomeAggregate>
where
    S: LedgerStore + ?Sized,
{
    let mut expected = IncomeAggregate::default();
    for kind in CommissionKind::ALL {
        let sum = store.sum(&LedgerFilter::kind(kind).beneficiary(account))?;
        if sum > 0 {
            expected.credit(kind, sum);
        }
    }
    // Withdrawable is drawn down outside the engine; carry it and shift by the total's drift.
    expected.withdrawable = if expected.total >= recorded.total {
        recorded.withdrawable.saturating_add(expected.total - recorded.total)
    } else {
        recorded.withdrawable.saturating_sub(recorded.total - expected.total)
    };
    Ok(expected)
}

pub fn reconcile<S>(
    store: &mut S,
    config: &CommissionConfig,
    repair: bool,
) -> Result<ReconcileReport>
where
    S: AccountStore + TransactionStore + LedgerStore + ?Sized,
{
    let mut report = ReconcileReport::default();
    for id in store.account_ids()? {
        let Some(mut account) = store.account(&id)? else {
            continue;
        };
        report.accounts += 1;
        let expected = expected_income(&*store, &id, &account.income)?;
        if expected == account.income {
            continue;
        }
        warn!(
            account = %id,
            recorded = account.income.total,
            expected = expected.total,
            "income drift"
        );
        report.drift.push(AccountDrift {
            account: id.clone(),
            recorded: account.income.clone(),
            expected: expected.clone(),
        });
        if repair {
            account.income = expected;
            store.update_account(account)?;
            report.repaired += 1;
        }
    }

    let deposits = TxFilter {
        account: None,
        kinds: vec![TxKind::Deposit, TxKind::Reinvestment],
        status: Some(TxStatus::Completed),
    };
    for tx in store.transactions(&deposits)? {
        let cap = config.roi.cap_for(tx.amount);
        let paid = store.sum(&LedgerFilter::kind(CommissionKind::Roi).transaction(&tx.id))?;
        if paid > cap {
            warn!(tx = %tx.id, account = %tx.account, cap, paid, "roi cap exceeded");
            report.cap_violations.push(CapViolation {
                transaction: tx.id,
                account: tx.account,
                cap,
                paid,
            });
        }
    }

    let records = ledger_snapshot(&*store)?;
    report.records = records.len();
    report.digest = hex::encode(ledger_digest(&records));
    info!(
        accounts = report.accounts,
        records = report.records,
        drift = report.drift.len(),
        repaired = report.repaired,
        cap_violations = report.cap_violations.len(),
        digest = %report.digest,
        "reconciliation finished"
    );
    Ok(report)
}
