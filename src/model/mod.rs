//! Sponsor-tree domain records.
//!
//! Accounts form a forest through their `sponsor` link. Every numeric field is
//! always initialised (zero by default) so aggregates never carry a missing
//! value.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::CommissionKind;

pub type AccountId = String;
pub type TxId = String;
pub type PlanId = String;
pub type RewardId = String;
pub type Amount = u64;

/// Basis-point denominator (10 000 bps = 100%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// One cent is the minimal unit; `usd(5)` is five dollars.
pub const fn usd(dollars: u64) -> Amount {
    dollars * 100
}

/// `amount × bps / 10 000`, truncated toward zero.
pub fn apply_bps(amount: Amount, bps: u32) -> Amount {
    (amount as u128 * bps as u128 / BPS_DENOMINATOR as u128) as Amount
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub sponsor: Option<AccountId>,
    /// Cumulative self investment.
    #[serde(default)]
    pub invested: Amount,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub verified: bool,
    /// Never generates or receives referral-chain income.
    #[serde(default)]
    pub excluded: bool,
    /// Index into the rank ladder; 0 means unranked.
    #[serde(default)]
    pub rank: u8,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_roi_at: Option<DateTime<Utc>>,
    /// Leg volume already consumed by matching bonuses.
    #[serde(default)]
    pub matched_volume: Amount,
    #[serde(default)]
    pub income: IncomeAggregate,
}

impl Account {
    pub fn new(
        id: impl Into<AccountId>,
        sponsor: Option<AccountId>,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            sponsor,
            invested: 0,
            active: false,
            blocked: false,
            verified: false,
            excluded: false,
            rank: 0,
            registered_at,
            last_roi_at: None,
            matched_volume: 0,
            income: IncomeAggregate::default(),
        }
    }

    /// Active, not blocked, and holding at least `min_investment`.
    pub fn is_qualified(&self, min_investment: Amount) -> bool {
        self.active && !self.blocked && self.invested >= min_investment
    }

    pub fn is_funded(&self) -> bool {
        self.active && self.invested > 0
    }

    /// Stops a sponsor-chain walk.
    pub fn breaks_chain(&self) -> bool {
        self.blocked || self.excluded
    }

    pub fn roi_credited_on(&self, day: NaiveDate) -> bool {
        self.last_roi_at
            .map(|at| at.date_naive() == day)
            .unwrap_or(false)
    }
}

/// Running totals per income bucket.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IncomeAggregate {
    pub referral: Amount,
    pub level: Amount,
    pub roi: Amount,
    pub dividend: Amount,
    pub matching: Amount,
    pub reward: Amount,
    pub rank: Amount,
    pub single_leg: Amount,
    pub total: Amount,
    pub withdrawable: Amount,
}

impl IncomeAggregate {
    pub fn credit(&mut self, kind: CommissionKind, amount: Amount) {
        let bucket = match kind {
            CommissionKind::Referral => &mut self.referral,
            CommissionKind::Level => &mut self.level,
            CommissionKind::Roi => &mut self.roi,
            CommissionKind::Dividend => &mut self.dividend,
            CommissionKind::Matching => &mut self.matching,
            CommissionKind::Reward => &mut self.reward,
            CommissionKind::Rank => &mut self.rank,
            CommissionKind::SingleLeg => &mut self.single_leg,
        };
        *bucket = bucket.saturating_add(amount);
        self.total = self.total.saturating_add(amount);
        self.withdrawable = self.withdrawable.saturating_add(amount);
    }

    pub fn bucket(&self, kind: CommissionKind) -> Amount {
        match kind {
            CommissionKind::Referral => self.referral,
            CommissionKind::Level => self.level,
            CommissionKind::Roi => self.roi,
            CommissionKind::Dividend => self.dividend,
            CommissionKind::Matching => self.matching,
            CommissionKind::Reward => self.reward,
            CommissionKind::Rank => self.rank,
            CommissionKind::SingleLeg => self.single_leg,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Deposit,
    Withdrawal,
    Reinvestment,
}

impl TxKind {
    pub fn earns_roi(self) -> bool {
        matches!(self, TxKind::Deposit | TxKind::Reinvestment)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Completed,
    Rejected,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxId,
    pub account: AccountId,
    pub kind: TxKind,
    pub amount: Amount,
    #[serde(default)]
    pub plan: Option<PlanId>,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct TxFilter {
    pub account: Option<AccountId>,
    pub kinds: Vec<TxKind>,
    pub status: Option<TxStatus>,
}

impl TxFilter {
    pub fn roi_bearing(account: &AccountId) -> Self {
        Self {
            account: Some(account.clone()),
            kinds: vec![TxKind::Deposit, TxKind::Reinvestment],
            status: Some(TxStatus::Completed),
        }
    }

    pub fn matches(&self, tx: &Transaction) -> bool {
        self.account.as_ref().map_or(true, |a| a == &tx.account)
            && (self.kinds.is_empty() || self.kinds.contains(&tx.kind))
            && self.status.map_or(true, |s| s == tx.status)
    }
}

/// Amount bracket with a daily rate; `max` is inclusive.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateBracket {
    pub min: Amount,
    #[serde(default)]
    pub max: Option<Amount>,
    pub daily_bps: u32,
}

impl RateBracket {
    pub fn contains(&self, amount: Amount) -> bool {
        amount >= self.min && self.max.map_or(true, |max| amount <= max)
    }
}

/// First bracket containing `amount`.
pub fn bracket_rate(brackets: &[RateBracket], amount: Amount) -> Option<u32> {
    brackets
        .iter()
        .find(|b| b.contains(amount))
        .map(|b| b.daily_bps)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    /// Number of days a transaction on this plan earns ROI.
    pub duration_days: u32,
    pub brackets: Vec<RateBracket>,
}

impl Plan {
    pub fn rate_for(&self, amount: Amount) -> Option<u32> {
        bracket_rate(&self.brackets, amount)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RewardFamily {
    /// `min + max ≥ threshold` and legs balanced within the configured ratio.
    Global,
    /// `min(power, weaker) ≥ threshold`.
    Rank,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardDefinition {
    pub id: RewardId,
    pub name: String,
    pub family: RewardFamily,
    pub threshold: Amount,
    pub payout: Amount,
    #[serde(default)]
    pub claimed_by: BTreeSet<AccountId>,
}
