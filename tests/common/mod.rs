#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sponsor_rewards::model::{usd, Account, TxKind, TxStatus};
use sponsor_rewards::referral::{record_deposit, DistributionOutcome};
use sponsor_rewards::store::AccountStore;
use sponsor_rewards::{CommissionConfig, MemoryStore, Transaction};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
}

/// Midnight-plus-five on the `n`th day after [`t0`].
pub fn batch_day(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 6, 0, 5, 0).unwrap() + Duration::days(n)
}

pub struct Fixture {
    pub store: MemoryStore,
    pub config: CommissionConfig,
    seq: i64,
}

impl Fixture {
    pub fn new(config: CommissionConfig) -> Self {
        Self {
            store: MemoryStore::new(),
            config,
            seq: 0,
        }
    }

    pub fn register(&mut self, id: &str, sponsor: Option<&str>) {
        let at = t0() + Duration::seconds(self.seq);
        self.seq += 1;
        self.store
            .insert_account(Account::new(id, sponsor.map(String::from), at))
            .unwrap();
    }

    /// Completed deposit of `dollars`, recorded at [`t0`].
    pub fn deposit(&mut self, id: &str, dollars: u64, plan: Option<&str>) -> DistributionOutcome {
        self.seq += 1;
        let tx = Transaction {
            id: format!("dep-{id}-{}", self.seq),
            account: id.into(),
            kind: TxKind::Deposit,
            amount: usd(dollars),
            plan: plan.map(String::from),
            status: TxStatus::Completed,
            created_at: t0() + Duration::seconds(self.seq),
        };
        record_deposit(&mut self.store, &self.config, tx).unwrap()
    }

    pub fn join(&mut self, id: &str, sponsor: Option<&str>, dollars: u64) {
        self.register(id, sponsor);
        if dollars > 0 {
            self.deposit(id, dollars, None);
        }
    }

    pub fn account(&self, id: &str) -> Account {
        self.store.account(&id.to_string()).unwrap().unwrap()
    }
}

/// A random sponsor forest of `size` accounts, `n0` .. `n{size-1}`.
///
/// Each account picks an earlier account as sponsor (or starts a new tree) and
/// deposits between $0 and $5 000.
pub fn random_forest(seed: u64, size: usize) -> Fixture {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut fixture = Fixture::new(CommissionConfig::default());
    for idx in 0..size {
        let sponsor = if idx == 0 || rng.gen_bool(0.1) {
            None
        } else {
            Some(format!("n{}", rng.gen_range(0..idx)))
        };
        let dollars = if rng.gen_bool(0.2) { 0 } else { rng.gen_range(100..=5_000) };
        fixture.join(&format!("n{idx}"), sponsor.as_deref(), dollars);
    }
    fixture
}
