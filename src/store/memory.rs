use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{AccountStore, LedgerStore, PartnerFilter, RewardStore, StoreError, TransactionStore};
use crate::ledger::{CommissionDraft, CommissionRecord, LedgerFilter};
use crate::model::{
    Account, AccountId, RewardDefinition, RewardId, Transaction, TxFilter, TxId, TxStatus,
};

/// Serialised form of a [`MemoryStore`].
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct MemorySnapshot {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(default)]
    pub records: Vec<CommissionRecord>,
    #[serde(default)]
    pub rewards: Vec<RewardDefinition>,
}

/// In-memory store with a children index over sponsor links.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(try_from = "MemorySnapshot", into = "MemorySnapshot")]
pub struct MemoryStore {
    accounts: BTreeMap<AccountId, Account>,
    children: BTreeMap<AccountId, Vec<AccountId>>,
    transactions: BTreeMap<TxId, Transaction>,
    records: Vec<CommissionRecord>,
    rewards: BTreeMap<RewardId, RewardDefinition>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_records(&self) -> &[CommissionRecord] {
        &self.records
    }

    pub fn upsert_reward(&mut self, reward: RewardDefinition) {
        self.rewards.insert(reward.id.clone(), reward);
    }

    fn registration_order(&self) -> Vec<&Account> {
        let mut ordered: Vec<&Account> = self.accounts.values().collect();
        ordered.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then_with(|| a.id.cmp(&b.id)));
        ordered
    }

    fn link_child(&mut self, account: &Account) {
        if let Some(sponsor) = &account.sponsor {
            let siblings = self.children.entry(sponsor.clone()).or_default();
            if !siblings.contains(&account.id) {
                siblings.push(account.id.clone());
            }
        }
    }

    fn would_cycle(&self, account: &AccountId, sponsor: &AccountId) -> bool {
        let mut node = Some(sponsor.clone());
        let mut visited = BTreeSet::new();
        while let Some(current) = node {
            if &current == account || !visited.insert(current.clone()) {
                return true;
            }
            node = self.accounts.get(&current).and_then(|a| a.sponsor.clone());
        }
        false
    }
}

impl TryFrom<MemorySnapshot> for MemoryStore {
    type Error = StoreError;

    /// Rebuilds the children index, refusing dangling sponsors and cycles.
    fn try_from(snapshot: MemorySnapshot) -> Result<Self, Self::Error> {
        let mut store = MemoryStore::new();
        for account in snapshot.accounts {
            if store.accounts.contains_key(&account.id) {
                return Err(StoreError::DuplicateAccount(account.id));
            }
            store.accounts.insert(account.id.clone(), account);
        }
        let ordered: Vec<Account> = store.registration_order().into_iter().cloned().collect();
        for account in &ordered {
            if let Some(sponsor) = &account.sponsor {
                if !store.accounts.contains_key(sponsor) {
                    return Err(StoreError::UnknownAccount(sponsor.clone()));
                }
                if store.would_cycle(&account.id, sponsor) {
                    return Err(StoreError::SponsorCycle {
                        account: account.id.clone(),
                        sponsor: sponsor.clone(),
                    });
                }
            }
            store.link_child(account);
        }
        for tx in snapshot.transactions {
            store.transactions.insert(tx.id.clone(), tx);
        }
        store.records = snapshot.records;
        for reward in snapshot.rewards {
            store.upsert_reward(reward);
        }
        Ok(store)
    }
}

impl From<MemoryStore> for MemorySnapshot {
    fn from(store: MemoryStore) -> Self {
        let accounts = store.registration_order().into_iter().cloned().collect();
        MemorySnapshot {
            accounts,
            transactions: store.transactions.into_values().collect(),
            records: store.records,
            rewards: store.rewards.into_values().collect(),
        }
    }
}

impl AccountStore for MemoryStore {
    fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(id).cloned())
    }

    fn insert_account(&mut self, account: Account) -> Result<(), StoreError> {
        if self.accounts.contains_key(&account.id) {
            return Err(StoreError::DuplicateAccount(account.id));
        }
        if let Some(sponsor) = &account.sponsor {
            if !self.accounts.contains_key(sponsor) {
                return Err(StoreError::UnknownAccount(sponsor.clone()));
            }
        }
        self.link_child(&account);
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn update_account(&mut self, account: Account) -> Result<(), StoreError> {
        let existing = self
            .accounts
            .get(&account.id)
            .ok_or_else(|| StoreError::UnknownAccount(account.id.clone()))?;
        if existing.sponsor != account.sponsor {
            if let Some(sponsor) = &account.sponsor {
                if self.would_cycle(&account.id, sponsor) {
                    return Err(StoreError::SponsorCycle {
                        account: account.id.clone(),
                        sponsor: sponsor.clone(),
                    });
                }
            }
            if let Some(old) = &existing.sponsor {
                if let Some(siblings) = self.children.get_mut(old) {
                    siblings.retain(|child| child != &account.id);
                }
            }
            self.link_child(&account);
        }
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn direct_partners(
        &self,
        sponsor: &AccountId,
        filter: PartnerFilter,
    ) -> Result<Vec<Account>, StoreError> {
        let partners = self
            .children
            .get(sponsor)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.accounts.get(id))
                    .filter(|account| filter.matches(account))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(partners)
    }

    fn account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        Ok(self.registration_order().into_iter().map(|a| a.id.clone()).collect())
    }

    fn registration_neighbors(
        &self,
        id: &AccountId,
        limit: usize,
        keep: &dyn Fn(&Account) -> bool,
    ) -> Result<(Vec<Account>, Vec<Account>), StoreError> {
        let ordered = self.registration_order();
        let position = ordered
            .iter()
            .position(|a| &a.id == id)
            .ok_or_else(|| StoreError::UnknownAccount(id.clone()))?;
        let before = ordered[..position]
            .iter()
            .rev()
            .filter(|a| keep(a))
            .take(limit)
            .map(|a| (*a).clone())
            .collect();
        let after = ordered[position + 1..]
            .iter()
            .filter(|a| keep(a))
            .take(limit)
            .map(|a| (*a).clone())
            .collect();
        Ok((before, after))
    }
}

impl TransactionStore for MemoryStore {
    fn transactions(&self, filter: &TxFilter) -> Result<Vec<Transaction>, StoreError> {
        let mut matching: Vec<Transaction> = self
            .transactions
            .values()
            .filter(|tx| filter.matches(tx))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    fn transaction(&self, id: &TxId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.get(id).cloned())
    }

    fn insert_transaction(&mut self, tx: Transaction) -> Result<(), StoreError> {
        if let Some(existing) = self.transactions.get(&tx.id) {
            if existing.status == TxStatus::Completed {
                return Err(StoreError::ImmutableTransaction(tx.id));
            }
        }
        self.transactions.insert(tx.id.clone(), tx);
        Ok(())
    }
}

impl LedgerStore for MemoryStore {
    fn append(&mut self, draft: CommissionDraft) -> Result<CommissionRecord, StoreError> {
        let record = draft.into_record(self.records.len() as u64);
        self.records.push(record.clone());
        Ok(record)
    }

    fn records(&self, filter: &LedgerFilter) -> Result<Vec<CommissionRecord>, StoreError> {
        Ok(self.records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn exists(&self, filter: &LedgerFilter) -> Result<bool, StoreError> {
        Ok(self.records.iter().any(|r| filter.matches(r)))
    }

    fn count(&self, filter: &LedgerFilter) -> Result<usize, StoreError> {
        Ok(self.records.iter().filter(|r| filter.matches(r)).count())
    }

    fn sum(&self, filter: &LedgerFilter) -> Result<u64, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .fold(0u64, |acc, r| acc.saturating_add(r.amount)))
    }
}

impl RewardStore for MemoryStore {
    fn reward_definitions(&self) -> Result<Vec<RewardDefinition>, StoreError> {
        let mut rewards: Vec<RewardDefinition> = self.rewards.values().cloned().collect();
        rewards.sort_by(|a, b| a.threshold.cmp(&b.threshold).then_with(|| a.id.cmp(&b.id)));
        Ok(rewards)
    }

    fn mark_claimed(&mut self, reward: &RewardId, account: &AccountId) -> Result<bool, StoreError> {
        let definition = self
            .rewards
            .get_mut(reward)
            .ok_or_else(|| StoreError::UnknownReward(reward.clone()))?;
        Ok(definition.claimed_by.insert(account.clone()))
    }
}
