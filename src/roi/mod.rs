//! Daily return on completed deposits and reinvestments.
//!
//! Each qualifying transaction earns `amount × daily rate` once per calendar
//! day until its lifetime payout reaches `amount × cap multiplier`; the last
//! credit is clipped to the remaining headroom. Every credit feeds the level
//! distributor as a new source event.

pub mod dividend;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CommissionConfig;
use crate::error::{CommissionError, Result, SkipReason};
use crate::ledger::{
    self, CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter, TimeRange,
};
use crate::model::{apply_bps, bracket_rate, AccountId, Amount, Transaction, TxFilter, TxStatus};
use crate::referral::{DistributionOutcome, ReferralDistributor, SourceEvent};
use crate::scheduler::{JobKind, PassReport};
use crate::store::{AccountStore, LedgerStore, TransactionStore};

pub use dividend::{DailyRoi, DividendDistributor};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoiCredit {
    pub record: CommissionRecord,
    /// 1-based count of credited days for the transaction.
    pub day_index: u32,
    pub clipped: bool,
    pub referral: DistributionOutcome,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TxRoiOutcome {
    Credited { tx: String, credit: RoiCredit },
    Skipped { tx: String, reason: SkipReason },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccountRoiOutcome {
    pub transactions: Vec<TxRoiOutcome>,
    /// Set when the whole account was skipped.
    pub skipped: Option<SkipReason>,
}

impl AccountRoiOutcome {
    pub fn credited(&self) -> impl Iterator<Item = &RoiCredit> {
        self.transactions.iter().filter_map(|t| match t {
            TxRoiOutcome::Credited { credit, .. } => Some(credit),
            TxRoiOutcome::Skipped { .. } => None,
        })
    }

    pub fn total(&self) -> Amount {
        self.credited().map(|c| c.record.amount).sum()
    }
}

pub struct RoiEngine<'a> {
    config: &'a CommissionConfig,
}

impl<'a> RoiEngine<'a> {
    pub fn new(config: &'a CommissionConfig) -> Self {
        Self { config }
    }

    /// Daily rate for `tx`, or why it earns nothing today.
    pub fn daily_rate<S>(
        &self,
        store: &S,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<u32, SkipReason>>
    where
        S: LedgerStore + ?Sized,
    {
        if now.date_naive() <= tx.created_at.date_naive() {
            return Ok(Err(SkipReason::NothingToPay));
        }
        let Some(plan_id) = &tx.plan else {
            return Ok(bracket_rate(&self.config.roi.fallback_brackets, tx.amount)
                .ok_or(SkipReason::BelowMinimum));
        };
        let plan = self
            .config
            .roi
            .plan(plan_id)
            .ok_or_else(|| CommissionError::not_found("plan", plan_id.clone()))?;
        let credited_days =
            store.count(&LedgerFilter::kind(CommissionKind::Roi).transaction(&tx.id))?;
        if credited_days >= plan.duration_days as usize {
            return Ok(Err(SkipReason::DurationExceeded));
        }
        Ok(plan.rate_for(tx.amount).ok_or(SkipReason::BelowMinimum))
    }

    /// Credit one day of return for one transaction.
    pub fn credit_transaction<S>(
        &self,
        store: &mut S,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<TxRoiOutcome>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let skipped = |reason| {
            Ok(TxRoiOutcome::Skipped {
                tx: tx.id.clone(),
                reason,
            })
        };
        if tx.status != TxStatus::Completed || !tx.kind.earns_roi() {
            return skipped(SkipReason::NothingToPay);
        }
        let for_tx = LedgerFilter::kind(CommissionKind::Roi).transaction(&tx.id);
        if store.exists(&for_tx.clone().within(TimeRange::day(now.date_naive())))? {
            return skipped(SkipReason::AlreadyPaid);
        }
        let bps = match self.daily_rate(store, tx, now)? {
            Ok(bps) => bps,
            Err(reason) => return skipped(reason),
        };

        let paid = store.sum(&for_tx)?;
        let headroom = self.config.roi.cap_for(tx.amount).saturating_sub(paid);
        if headroom == 0 {
            return skipped(SkipReason::CapReached);
        }
        let daily = apply_bps(tx.amount, bps);
        if daily == 0 {
            return skipped(SkipReason::BelowMinimum);
        }
        let amount = daily.min(headroom);
        let clipped = amount < daily;
        let day_index = store.count(&for_tx)? as u32 + 1;

        let draft = CommissionDraft::new(&tx.account, CommissionKind::Roi, amount, now)
            .bps(bps)
            .level(day_index)
            .transaction(&tx.id)
            .reference(format!("{}#{day_index}", tx.id));
        let record = ledger::credit(store, draft)?;
        if clipped {
            info!(tx = %tx.id, day_index, amount, "roi clipped to lifetime cap");
        }

        let event = SourceEvent::roi_credit(&tx.account, &tx.id, day_index, amount, now);
        let referral = ReferralDistributor::new(self.config).distribute(store, &event)?;
        Ok(TxRoiOutcome::Credited {
            tx: tx.id.clone(),
            credit: RoiCredit {
                record,
                day_index,
                clipped,
                referral,
            },
        })
    }

    /// Credit today's return for every qualifying transaction of one account.
    pub fn credit_account<S>(
        &self,
        store: &mut S,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<AccountRoiOutcome>
    where
        S: AccountStore + TransactionStore + LedgerStore + ?Sized,
    {
        let account = store
            .account(account_id)?
            .ok_or_else(|| CommissionError::not_found("account", account_id.clone()))?;
        let mut outcome = AccountRoiOutcome::default();
        if !account.active || account.blocked {
            outcome.skipped = Some(SkipReason::Inactive);
            return Ok(outcome);
        }
        let today = now.date_naive();
        if account.roi_credited_on(today) {
            outcome.skipped = Some(SkipReason::AlreadyPaid);
            return Ok(outcome);
        }

        for tx in store.transactions(&TxFilter::roi_bearing(account_id))? {
            outcome.transactions.push(self.credit_transaction(store, &tx, now)?);
        }

        if outcome.credited().next().is_some() {
            let mut account = store
                .account(account_id)?
                .ok_or_else(|| CommissionError::not_found("account", account_id.clone()))?;
            account.last_roi_at = Some(now);
            store.update_account(account)?;
        }
        debug!(account = %account_id, total = outcome.total(), "account roi processed");
        Ok(outcome)
    }

    /// Daily batch: returns for every account, then dividends once all of
    /// today's returns are on the ledger.
    pub fn run_pass<S>(&self, store: &mut S, now: DateTime<Utc>) -> PassReport
    where
        S: AccountStore + TransactionStore + LedgerStore + ?Sized,
    {
        let mut report = PassReport::new(JobKind::Roi, now);
        let ids = match store.account_ids() {
            Ok(ids) => ids,
            Err(err) => {
                report.abort(err.into());
                return report;
            }
        };

        for id in &ids {
            report.processed += 1;
            match self.credit_account(store, id, now) {
                Ok(outcome) => {
                    for credit in outcome.credited() {
                        report.record_credit(credit.record.amount);
                        for record in &credit.referral.credits {
                            report.record_credit(record.amount);
                        }
                    }
                    if outcome.skipped.is_some() {
                        report.skipped += 1;
                    }
                }
                Err(err) => {
                    warn!(account = %id, error = %err, "roi unit failed");
                    report.fail(id, err);
                }
            }
        }

        let roi = match DailyRoi::load(&*store, TimeRange::day(now.date_naive())) {
            Ok(roi) => roi,
            Err(err) => {
                report.abort(err);
                report.finish();
                return report;
            }
        };
        let dividends = DividendDistributor::new(self.config);
        for id in &ids {
            match dividends.distribute_with(store, id, now, &roi) {
                Ok(Ok(record)) => report.record_credit(record.amount),
                Ok(Err(_)) => {}
                Err(err) => {
                    warn!(account = %id, error = %err, "dividend unit failed");
                    report.fail(id, err);
                }
            }
        }
        report.finish();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{usd, Account, Plan, RateBracket, TxKind};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 5, 0).unwrap() + Duration::days(n)
    }

    fn config_with_plan(daily_bps: u32, duration_days: u32) -> CommissionConfig {
        let mut config = CommissionConfig::default();
        config.roi.plans.push(Plan {
            id: "p".into(),
            name: "Test".into(),
            duration_days,
            brackets: vec![RateBracket {
                min: usd(100),
                max: None,
                daily_bps,
            }],
        });
        config
    }

    fn investor(amount: Amount, plan: Option<&str>) -> (MemoryStore, Transaction) {
        let mut store = MemoryStore::new();
        let mut account = Account::new("inv", None, day(-1));
        account.invested = amount;
        account.active = true;
        store.insert_account(account).unwrap();
        let tx = Transaction {
            id: "tx".into(),
            account: "inv".into(),
            kind: TxKind::Deposit,
            amount,
            plan: plan.map(String::from),
            status: TxStatus::Completed,
            created_at: day(0) + Duration::minutes(1),
        };
        store.insert_transaction(tx.clone()).unwrap();
        (store, tx)
    }

    #[test]
    fn plan_runs_for_its_duration() {
        let config = config_with_plan(550, 30);
        let (mut store, _) = investor(usd(1_000), Some("p"));
        let engine = RoiEngine::new(&config);
        for n in 1..=35 {
            engine.credit_account(&mut store, &"inv".into(), day(n)).unwrap();
        }
        let records = store.records(&LedgerFilter::kind(CommissionKind::Roi)).unwrap();
        assert_eq!(records.len(), 30);
        assert!(records.iter().all(|r| r.amount == usd(55)));
        assert_eq!(records.last().unwrap().level, 30);
        assert!(records.iter().map(|r| r.amount).sum::<u64>() <= usd(3_000));
    }

    #[test]
    fn final_day_is_clipped_to_cap() {
        let config = config_with_plan(1_100, 60);
        let (mut store, tx) = investor(usd(1_000), Some("p"));
        let engine = RoiEngine::new(&config);
        let mut clipped = 0;
        for n in 1..=40 {
            let outcome = engine.credit_transaction(&mut store, &tx, day(n)).unwrap();
            if let TxRoiOutcome::Credited { credit, .. } = outcome {
                clipped += credit.clipped as u32;
            }
        }
        let total = store
            .sum(&LedgerFilter::kind(CommissionKind::Roi).transaction(&tx.id))
            .unwrap();
        assert_eq!(total, usd(3_000));
        assert_eq!(clipped, 1);
        assert_eq!(store.count(&LedgerFilter::kind(CommissionKind::Roi)).unwrap(), 28);
        let outcome = engine.credit_transaction(&mut store, &tx, day(41)).unwrap();
        assert!(matches!(outcome, TxRoiOutcome::Skipped { reason: SkipReason::CapReached, .. }));
    }

    #[test]
    fn once_per_account_per_day() {
        let config = CommissionConfig::default();
        let (mut store, _) = investor(usd(2_000), None);
        let engine = RoiEngine::new(&config);
        let first = engine.credit_account(&mut store, &"inv".into(), day(1)).unwrap();
        assert_eq!(first.total(), usd(15));
        let again = engine
            .credit_account(&mut store, &"inv".into(), day(1) + Duration::hours(5))
            .unwrap();
        assert_eq!(again.skipped, Some(SkipReason::AlreadyPaid));
        assert_eq!(store.account(&"inv".into()).unwrap().unwrap().income.roi, usd(15));
    }

    #[test]
    fn ledger_recheck_guards_a_reset_flag() {
        let config = CommissionConfig::default();
        let (mut store, _) = investor(usd(2_000), None);
        let engine = RoiEngine::new(&config);
        engine.credit_account(&mut store, &"inv".into(), day(1)).unwrap();
        let mut account = store.account(&"inv".into()).unwrap().unwrap();
        account.last_roi_at = None;
        store.update_account(account).unwrap();
        let again = engine.credit_account(&mut store, &"inv".into(), day(1)).unwrap();
        assert!(matches!(
            again.transactions[0],
            TxRoiOutcome::Skipped { reason: SkipReason::AlreadyPaid, .. }
        ));
    }

    #[test]
    fn no_return_on_deposit_day_or_below_minimum() {
        let config = CommissionConfig::default();
        let (mut store, tx) = investor(usd(50), None);
        let engine = RoiEngine::new(&config);
        assert_eq!(engine.daily_rate(&store, &tx, day(0)).unwrap(), Err(SkipReason::NothingToPay));
        assert_eq!(engine.daily_rate(&store, &tx, day(1)).unwrap(), Err(SkipReason::BelowMinimum));
        let outcome = engine.credit_account(&mut store, &"inv".into(), day(1)).unwrap();
        assert_eq!(outcome.total(), 0);
    }

    #[test]
    fn unknown_plan_is_not_found() {
        let config = CommissionConfig::default();
        let (store, tx) = investor(usd(500), Some("missing"));
        let engine = RoiEngine::new(&config);
        assert!(matches!(
            engine.daily_rate(&store, &tx, day(1)),
            Err(CommissionError::NotFound { .. })
        ));
    }
}
