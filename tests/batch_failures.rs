mod common;

use std::cell::Cell;

use common::{batch_day, Fixture};
use sponsor_rewards::ledger::{CommissionDraft, CommissionKind, CommissionRecord, LedgerFilter};
use sponsor_rewards::model::{
    Account, AccountId, RewardDefinition, RewardId, Transaction, TxFilter, TxId,
};
use sponsor_rewards::rank::RankQualifier;
use sponsor_rewards::reconcile::reconcile;
use sponsor_rewards::scheduler::run_pass;
use sponsor_rewards::store::{
    AccountStore, LedgerStore, PartnerFilter, RewardStore, StoreError, TransactionStore,
};
use sponsor_rewards::{CommissionConfig, JobKind, MemoryStore};

/// Refuses ledger writes for one beneficiary while `failing` is set.
struct FlakyStore {
    inner: MemoryStore,
    victim: AccountId,
    failing: Cell<bool>,
}

impl AccountStore for FlakyStore {
    fn account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.account(id)
    }

    fn insert_account(&mut self, account: Account) -> Result<(), StoreError> {
        self.inner.insert_account(account)
    }

    fn update_account(&mut self, account: Account) -> Result<(), StoreError> {
        self.inner.update_account(account)
    }

    fn direct_partners(
        &self,
        sponsor: &AccountId,
        filter: PartnerFilter,
    ) -> Result<Vec<Account>, StoreError> {
        self.inner.direct_partners(sponsor, filter)
    }

    fn account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        self.inner.account_ids()
    }

    fn registration_neighbors(
        &self,
        id: &AccountId,
        limit: usize,
        keep: &dyn Fn(&Account) -> bool,
    ) -> Result<(Vec<Account>, Vec<Account>), StoreError> {
        self.inner.registration_neighbors(id, limit, keep)
    }
}

impl TransactionStore for FlakyStore {
    fn transactions(&self, filter: &TxFilter) -> Result<Vec<Transaction>, StoreError> {
        self.inner.transactions(filter)
    }

    fn transaction(&self, id: &TxId) -> Result<Option<Transaction>, StoreError> {
        self.inner.transaction(id)
    }

    fn insert_transaction(&mut self, tx: Transaction) -> Result<(), StoreError> {
        self.inner.insert_transaction(tx)
    }
}

impl LedgerStore for FlakyStore {
    fn append(&mut self, draft: CommissionDraft) -> Result<CommissionRecord, StoreError> {
        if self.failing.get() && draft.beneficiary == self.victim {
            return Err(StoreError::Unavailable("ledger write timed out".into()));
        }
        self.inner.append(draft)
    }

    fn records(&self, filter: &LedgerFilter) -> Result<Vec<CommissionRecord>, StoreError> {
        self.inner.records(filter)
    }
}

impl RewardStore for FlakyStore {
    fn reward_definitions(&self) -> Result<Vec<RewardDefinition>, StoreError> {
        self.inner.reward_definitions()
    }

    fn mark_claimed(&mut self, reward: &RewardId, account: &AccountId) -> Result<bool, StoreError> {
        self.inner.mark_claimed(reward, account)
    }
}

fn flaky() -> FlakyStore {
    let mut fx = Fixture::new(CommissionConfig::default());
    for id in ["a", "b", "c", "d"] {
        fx.join(id, None, 1_000);
    }
    FlakyStore {
        inner: fx.store,
        victim: "b".into(),
        failing: Cell::new(true),
    }
}

#[test]
fn failed_unit_does_not_stop_the_pass() {
    let mut store = flaky();
    let config = CommissionConfig::default();

    let report = run_pass(JobKind::Roi, &mut store, &config, batch_day(0));
    assert_eq!(report.processed, 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].account, "b");
    assert_eq!(report.credits, 3);

    let roi = |store: &FlakyStore, id: &str| {
        store
            .count(&LedgerFilter::kind(CommissionKind::Roi).beneficiary(&id.to_string()))
            .unwrap()
    };
    assert_eq!(roi(&store, "b"), 0);
    assert_eq!(roi(&store, "d"), 1);

    // No retry within the pass; a later trigger the same day picks it up.
    store.failing.set(false);
    let retry = run_pass(JobKind::Roi, &mut store, &config, batch_day(0));
    assert!(retry.is_clean());
    assert_eq!(retry.credits, 1);
    for id in ["a", "b", "c", "d"] {
        assert_eq!(roi(&store, id), 1);
    }

    let check = reconcile(&mut store, &config, false).unwrap();
    assert!(check.is_consistent());
}

#[test]
fn store_outage_before_the_pass_is_reported() {
    struct Down;

    impl AccountStore for Down {
        fn account(&self, _: &AccountId) -> Result<Option<Account>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn insert_account(&mut self, _: Account) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn update_account(&mut self, _: Account) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn direct_partners(
            &self,
            _: &AccountId,
            _: PartnerFilter,
        ) -> Result<Vec<Account>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn registration_neighbors(
            &self,
            _: &AccountId,
            _: usize,
            _: &dyn Fn(&Account) -> bool,
        ) -> Result<(Vec<Account>, Vec<Account>), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    impl LedgerStore for Down {
        fn append(&mut self, _: CommissionDraft) -> Result<CommissionRecord, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
        fn records(&self, _: &LedgerFilter) -> Result<Vec<CommissionRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    let config = CommissionConfig::default();
    let report = RankQualifier::new(&config.rank).run_pass(&mut Down, batch_day(0));
    assert_eq!(report.processed, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].account.is_empty());
}
