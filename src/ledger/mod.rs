//! Commission ledger: append-only records backing idempotency and reporting.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CommissionError, Result};
use crate::model::{AccountId, Amount, TxId};
use crate::store::{AccountStore, LedgerStore};

pub type RecordId = String;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    Referral,
    Level,
    Roi,
    Dividend,
    Matching,
    Reward,
    Rank,
    SingleLeg,
}

impl CommissionKind {
    pub const ALL: [CommissionKind; 8] = [
        CommissionKind::Referral,
        CommissionKind::Level,
        CommissionKind::Roi,
        CommissionKind::Dividend,
        CommissionKind::Matching,
        CommissionKind::Reward,
        CommissionKind::Rank,
        CommissionKind::SingleLeg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommissionKind::Referral => "referral",
            CommissionKind::Level => "level",
            CommissionKind::Roi => "roi",
            CommissionKind::Dividend => "dividend",
            CommissionKind::Matching => "matching",
            CommissionKind::Reward => "reward",
            CommissionKind::Rank => "rank",
            CommissionKind::SingleLeg => "single_leg",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Credited,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommissionRecord {
    pub id: RecordId,
    pub beneficiary: AccountId,
    pub source: Option<AccountId>,
    pub kind: CommissionKind,
    pub amount: Amount,
    /// Rate applied, in basis points; 0 for flat payouts.
    pub bps: u32,
    /// Sponsor depth, ROI day index or rank index depending on `kind`.
    pub level: u32,
    pub transaction: Option<TxId>,
    /// Source-event key used for single-payment checks.
    pub reference: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
}

/// A credit about to be written; the ledger assigns the id.
#[derive(Clone, Debug)]
pub struct CommissionDraft {
    pub beneficiary: AccountId,
    pub source: Option<AccountId>,
    pub kind: CommissionKind,
    pub amount: Amount,
    pub bps: u32,
    pub level: u32,
    pub transaction: Option<TxId>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CommissionDraft {
    pub fn new(
        beneficiary: &AccountId,
        kind: CommissionKind,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            beneficiary: beneficiary.clone(),
            source: None,
            kind,
            amount,
            bps: 0,
            level: 0,
            transaction: None,
            reference: None,
            created_at: at,
        }
    }

    pub fn source(mut self, source: &AccountId) -> Self {
        self.source = Some(source.clone());
        self
    }

    pub fn bps(mut self, bps: u32) -> Self {
        self.bps = bps;
        self
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn transaction(mut self, tx: &TxId) -> Self {
        self.transaction = Some(tx.clone());
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Seal the draft; `seq` is the ledger position and keeps ids unique.
    pub fn into_record(self, seq: u64) -> CommissionRecord {
        let mut hasher = Sha256::new();
        hasher.update(b"commission");
        hasher.update(seq.to_le_bytes());
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(self.beneficiary.as_bytes());
        hasher.update(self.amount.to_le_bytes());
        hasher.update(self.level.to_le_bytes());
        if let Some(reference) = &self.reference {
            hasher.update(reference.as_bytes());
        }
        hasher.update(self.created_at.timestamp_millis().to_le_bytes());
        let digest: [u8; 32] = hasher.finalize().into();
        CommissionRecord {
            id: hex::encode(&digest[..16]),
            beneficiary: self.beneficiary,
            source: self.source,
            kind: self.kind,
            amount: self.amount,
            bps: self.bps,
            level: self.level,
            transaction: self.transaction,
            reference: self.reference,
            status: RecordStatus::Credited,
            created_at: self.created_at,
        }
    }
}

/// Half-open time window `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn day(day: NaiveDate) -> Self {
        let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default());
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn month_of(at: DateTime<Utc>) -> Self {
        let first = NaiveDate::from_ymd_opt(at.year(), at.month(), 1).unwrap_or_default();
        let next = if at.month() == 12 {
            NaiveDate::from_ymd_opt(at.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(at.year(), at.month() + 1, 1)
        }
        .unwrap_or_default();
        Self {
            start: TimeRange::day(first).start,
            end: TimeRange::day(next).start,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Conjunctive record filter; unset fields match anything.
#[derive(Clone, Debug, Default)]
pub struct LedgerFilter {
    pub beneficiary: Option<AccountId>,
    pub source: Option<AccountId>,
    pub kind: Option<CommissionKind>,
    pub transaction: Option<TxId>,
    pub reference: Option<String>,
    pub level: Option<u32>,
    pub within: Option<TimeRange>,
}

impl LedgerFilter {
    pub fn kind(kind: CommissionKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn beneficiary(mut self, account: &AccountId) -> Self {
        self.beneficiary = Some(account.clone());
        self
    }

    pub fn source(mut self, account: &AccountId) -> Self {
        self.source = Some(account.clone());
        self
    }

    pub fn transaction(mut self, tx: &TxId) -> Self {
        self.transaction = Some(tx.clone());
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn level(mut self, level: u32) -> Self {
        self.level = Some(level);
        self
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.within = Some(range);
        self
    }

    pub fn matches(&self, record: &CommissionRecord) -> bool {
        self.beneficiary.as_ref().map_or(true, |b| b == &record.beneficiary)
            && self.source.as_ref().map_or(true, |s| record.source.as_ref() == Some(s))
            && self.kind.map_or(true, |k| k == record.kind)
            && self
                .transaction
                .as_ref()
                .map_or(true, |t| record.transaction.as_ref() == Some(t))
            && self
                .reference
                .as_ref()
                .map_or(true, |r| record.reference.as_ref() == Some(r))
            && self.level.map_or(true, |l| l == record.level)
            && self.within.map_or(true, |w| w.contains(record.created_at))
    }
}

/// Write one record and bump the beneficiary's income bucket.
///
/// The caller owns the single-payment check; this only refuses zero amounts
/// and unknown beneficiaries.
pub fn credit<S>(store: &mut S, draft: CommissionDraft) -> Result<CommissionRecord>
where
    S: AccountStore + LedgerStore + ?Sized,
{
    if draft.amount == 0 {
        return Err(CommissionError::validation("credit amount must be positive"));
    }
    let mut account = store
        .account(&draft.beneficiary)?
        .ok_or_else(|| CommissionError::not_found("account", draft.beneficiary.clone()))?;
    let record = store.append(draft)?;
    account.income.credit(record.kind, record.amount);
    store.update_account(account)?;
    debug!(
        beneficiary = %record.beneficiary,
        kind = record.kind.as_str(),
        amount = record.amount,
        level = record.level,
        "credited"
    );
    Ok(record)
}

/// Deterministic Merkle root over records in ledger order.
pub fn ledger_digest(records: &[CommissionRecord]) -> [u8; 32] {
    let leaves = records
        .iter()
        .map(|record| {
            let mut hasher = Sha256::new();
            hasher.update(b"record");
            hasher.update(record.id.as_bytes());
            hasher.update(record.beneficiary.as_bytes());
            hasher.update(record.kind.as_str().as_bytes());
            hasher.update(record.amount.to_le_bytes());
            hasher.finalize().into()
        })
        .collect();
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"commission-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn record_ids_differ_by_sequence() {
        let draft = CommissionDraft::new(&"alice".into(), CommissionKind::Roi, 55, at(1, 0));
        let a = draft.clone().into_record(0);
        let b = draft.into_record(1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn filter_matches_day_window_and_reference() {
        let record = CommissionDraft::new(&"bob".into(), CommissionKind::Level, 10, at(2, 23))
            .reference("tx-1")
            .level(3)
            .into_record(0);
        let day = TimeRange::day(at(2, 0).date_naive());
        assert!(LedgerFilter::kind(CommissionKind::Level)
            .beneficiary(&"bob".into())
            .reference("tx-1")
            .within(day)
            .matches(&record));
        assert!(!LedgerFilter::kind(CommissionKind::Level)
            .within(TimeRange::day(at(3, 0).date_naive()))
            .matches(&record));
        assert!(!LedgerFilter::default().level(2).matches(&record));
    }

    #[test]
    fn month_range_rolls_over_year() {
        let december = Utc.with_ymd_and_hms(2026, 12, 31, 12, 0, 0).unwrap();
        let range = TimeRange::month_of(december);
        assert!(range.contains(december));
        assert_eq!(range.end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn digest_is_deterministic_and_order_sensitive() {
        let a = CommissionDraft::new(&"a".into(), CommissionKind::Roi, 1, at(1, 0)).into_record(0);
        let b = CommissionDraft::new(&"b".into(), CommissionKind::Roi, 2, at(1, 0)).into_record(1);
        let d1 = ledger_digest(&[a.clone(), b.clone()]);
        assert_eq!(d1, ledger_digest(&[a.clone(), b.clone()]));
        assert_ne!(d1, ledger_digest(&[b, a]));
        assert_ne!(ledger_digest(&[]), d1);
    }
}
