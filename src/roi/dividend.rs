//! ROI dividend: a slice of the day's descendant returns paid to an ancestor.
//!
//! The ancestor's unlocked depth selects one band; only descendants whose
//! depth lies inside that band contribute.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{band_for, CommissionConfig, DepthBand};
use crate::downline::DownlineWalker;
use crate::error::{CommissionError, Result, SkipReason};
use crate::ledger::{
    self, CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter, TimeRange,
};
use crate::model::{apply_bps, AccountId, Amount};
use crate::qualification::LevelQualifier;
use crate::store::{AccountStore, LedgerStore};

pub struct DividendDistributor<'a> {
    config: &'a CommissionConfig,
}

impl<'a> DividendDistributor<'a> {
    pub fn new(config: &'a CommissionConfig) -> Self {
        Self { config }
    }

    /// Band matching the account's current unlocked depth.
    pub fn band<S>(&self, store: &S, account: &AccountId) -> Result<Option<DepthBand>>
    where
        S: AccountStore + ?Sized,
    {
        let depth = LevelQualifier::new(&self.config.qualification).unlocked_depth(store, account)?;
        Ok(band_for(&self.config.dividend.bands, depth).cloned())
    }

    /// ROI credited during `day` to descendants inside `band`.
    pub fn band_roi<S>(
        &self,
        store: &S,
        account: &AccountId,
        band: &DepthBand,
        day: &DailyRoi,
    ) -> Result<Amount>
    where
        S: AccountStore + ?Sized,
    {
        let mut total: Amount = 0;
        for level in DownlineWalker::new(store, account, Some(band.to)) {
            for member in level? {
                if member.depth >= band.from {
                    total = total.saturating_add(day.of(&member.id));
                }
            }
        }
        Ok(total)
    }

    pub fn distribute<S>(
        &self,
        store: &mut S,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<CommissionRecord, SkipReason>>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let roi = DailyRoi::load(&*store, TimeRange::day(now.date_naive()))?;
        self.distribute_with(store, account_id, now, &roi)
    }

    /// Same as [`distribute`](Self::distribute) over a preloaded day of ROI.
    pub fn distribute_with<S>(
        &self,
        store: &mut S,
        account_id: &AccountId,
        now: DateTime<Utc>,
        roi: &DailyRoi,
    ) -> Result<std::result::Result<CommissionRecord, SkipReason>>
    where
        S: AccountStore + LedgerStore + ?Sized,
    {
        let account = store
            .account(account_id)?
            .ok_or_else(|| CommissionError::not_found("account", account_id.clone()))?;
        if !account.active || account.blocked {
            return Ok(Err(SkipReason::Inactive));
        }
        let paid_today = LedgerFilter::kind(CommissionKind::Dividend)
            .beneficiary(account_id)
            .within(roi.day());
        if store.exists(&paid_today)? {
            return Ok(Err(SkipReason::AlreadyPaid));
        }
        let Some(band) = self.band(store, account_id)? else {
            return Ok(Err(SkipReason::NotQualified));
        };
        let pool = self.band_roi(store, account_id, &band, roi)?;
        if pool == 0 {
            return Ok(Err(SkipReason::NothingToPay));
        }
        let amount = apply_bps(pool, band.bps);
        if amount == 0 {
            return Ok(Err(SkipReason::BelowMinimum));
        }
        debug!(
            account = %account_id,
            band_from = band.from,
            band_to = band.to,
            pool,
            amount,
            "dividend"
        );
        let draft = CommissionDraft::new(account_id, CommissionKind::Dividend, amount, now)
            .bps(band.bps)
            .level(band.from)
            .reference(format!("dividend:{}", now.date_naive()));
        Ok(Ok(ledger::credit(store, draft)?))
    }
}

/// ROI credited per beneficiary during one day, read in a single ledger scan.
#[derive(Clone, Debug)]
pub struct DailyRoi {
    day: TimeRange,
    by_account: HashMap<AccountId, Amount>,
}

impl DailyRoi {
    pub fn load<S>(store: &S, day: TimeRange) -> Result<Self>
    where
        S: LedgerStore + ?Sized,
    {
        let mut by_account: HashMap<AccountId, Amount> = HashMap::new();
        for record in store.records(&LedgerFilter::kind(CommissionKind::Roi).within(day))? {
            let total = by_account.entry(record.beneficiary).or_default();
            *total = total.saturating_add(record.amount);
        }
        Ok(Self { day, by_account })
    }

    pub fn day(&self) -> TimeRange {
        self.day
    }

    pub fn of(&self, account: &AccountId) -> Amount {
        self.by_account.get(account).copied().unwrap_or(0)
    }
}
