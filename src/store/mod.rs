//! Storage seams consumed by the engine.
//!
//! Persistence engines are out of scope; [`MemoryStore`] is the reference
//! implementation used by the CLI and the tests.

mod memory;

pub use memory::{MemorySnapshot, MemoryStore};

use crate::ledger::{CommissionDraft, CommissionRecord, LedgerFilter};
use crate::model::{
    Account, AccountId, Amount, RewardDefinition, RewardId, Transaction, TxFilter, TxId,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
    #[error("transaction {0} is completed and immutable")]
    ImmutableTransaction(TxId),
    #[error("unknown reward {0}")]
    UnknownReward(RewardId),
    #[error("sponsor link {account} -> {sponsor} would create a cycle")]
    SponsorCycle { account: AccountId, sponsor: AccountId },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which direct partners to return.
#[derive(Clone, Copy, Debug, Default)]
pub struct PartnerFilter {
    pub active_only: bool,
    pub min_investment: Amount,
}

impl PartnerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn qualified(min_investment: Amount) -> Self {
        Self {
            active_only: true,
            min_investment,
        }
    }

    pub fn matches(&self, account: &Account) -> bool {
        (!self.active_only || (account.active && !account.blocked))
            && account.invested >= self.min_investment
    }
}

pub trait AccountStore {
    fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    fn insert_account(&mut self, account: Account) -> Result<(), StoreError>;

    fn update_account(&mut self, account: Account) -> Result<(), StoreError>;

    /// Accounts whose sponsor is `sponsor`, in registration order.
    fn direct_partners(
        &self,
        sponsor: &AccountId,
        filter: PartnerFilter,
    ) -> Result<Vec<Account>, StoreError>;

    /// Every account id in registration order.
    fn account_ids(&self) -> Result<Vec<AccountId>, StoreError>;

    /// Up to `limit` accounts registered immediately before `id` (nearest
    /// first) and up to `limit` immediately after, each passing `keep`.
    fn registration_neighbors(
        &self,
        id: &AccountId,
        limit: usize,
        keep: &dyn Fn(&Account) -> bool,
    ) -> Result<(Vec<Account>, Vec<Account>), StoreError>;

    fn count_qualified_directs(
        &self,
        sponsor: &AccountId,
        active_only: bool,
        min_investment: Amount,
    ) -> Result<usize, StoreError> {
        let filter = PartnerFilter {
            active_only,
            min_investment,
        };
        Ok(self.direct_partners(sponsor, filter)?.len())
    }
}

pub trait TransactionStore {
    fn transactions(&self, filter: &TxFilter) -> Result<Vec<Transaction>, StoreError>;

    fn transaction(&self, id: &TxId) -> Result<Option<Transaction>, StoreError>;

    /// Insert or replace a transaction; completed transactions are immutable.
    fn insert_transaction(&mut self, tx: Transaction) -> Result<(), StoreError>;
}

pub trait LedgerStore {
    /// Append a record; returns it with its assigned id.
    fn append(&mut self, draft: CommissionDraft) -> Result<CommissionRecord, StoreError>;

    fn records(&self, filter: &LedgerFilter) -> Result<Vec<CommissionRecord>, StoreError>;

    fn exists(&self, filter: &LedgerFilter) -> Result<bool, StoreError> {
        Ok(!self.records(filter)?.is_empty())
    }

    fn count(&self, filter: &LedgerFilter) -> Result<usize, StoreError> {
        Ok(self.records(filter)?.len())
    }

    fn sum(&self, filter: &LedgerFilter) -> Result<Amount, StoreError> {
        Ok(self
            .records(filter)?
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.amount)))
    }
}

pub trait RewardStore {
    /// Definitions sorted by ascending threshold.
    fn reward_definitions(&self) -> Result<Vec<RewardDefinition>, StoreError>;

    /// Add `account` to the reward's claim set; false if already present.
    fn mark_claimed(&mut self, reward: &RewardId, account: &AccountId) -> Result<bool, StoreError>;
}

/// Everything a full distribution pass needs.
pub trait CommissionStore: AccountStore + TransactionStore + LedgerStore + RewardStore {}

impl<T> CommissionStore for T where
    T: AccountStore + TransactionStore + LedgerStore + RewardStore
{
}
