mod common;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use proptest::prelude::*;

use common::{batch_day, random_forest, t0, Fixture};
use sponsor_rewards::downline::{collect_downline, leg_volumes, leg_split};
use sponsor_rewards::ledger::{CommissionKind, LedgerFilter};
use sponsor_rewards::model::{usd, Amount, IncomeAggregate, Plan, RateBracket, TxKind, TxStatus};
use sponsor_rewards::roi::RoiEngine;
use sponsor_rewards::scheduler::run_pass;
use sponsor_rewards::store::{AccountStore, LedgerStore};
use sponsor_rewards::{AccountId, CommissionConfig, JobKind, MemoryStore, Transaction};

fn incomes(store: &MemoryStore) -> BTreeMap<AccountId, IncomeAggregate> {
    store
        .account_ids()
        .unwrap()
        .into_iter()
        .map(|id| {
            let income = store.account(&id).unwrap().unwrap().income;
            (id, income)
        })
        .collect()
}

#[test]
fn same_day_batch_twice_changes_nothing() {
    let mut fx = random_forest(7, 80);
    let config = fx.config.clone();
    for day in 0..3 {
        for job in JobKind::ALL {
            run_pass(job, &mut fx.store, &config, batch_day(day));
        }
    }
    let records = fx.store.all_records().len();
    let before = incomes(&fx.store);
    assert!(records > 0);

    let later = batch_day(2) + Duration::hours(6);
    for job in JobKind::ALL {
        let report = run_pass(job, &mut fx.store, &config, later);
        assert!(report.is_clean(), "{job}: {:?}", report.failures);
        assert_eq!(report.credits, 0, "{job} credited again");
    }
    assert_eq!(fx.store.all_records().len(), records);
    assert_eq!(incomes(&fx.store), before);
}

#[test]
fn ranks_never_drop_and_rewards_are_unique() {
    let mut fx = random_forest(11, 150);
    let config = fx.config.clone();
    let ranks = |store: &MemoryStore| -> BTreeMap<AccountId, u8> {
        store
            .account_ids()
            .unwrap()
            .into_iter()
            .map(|id| {
                let rank = store.account(&id).unwrap().unwrap().rank;
                (id, rank)
            })
            .collect()
    };

    run_pass(JobKind::Rank, &mut fx.store, &config, batch_day(0));
    let first = ranks(&fx.store);

    for (idx, id) in fx.store.account_ids().unwrap().into_iter().enumerate() {
        if idx % 2 == 0 {
            let mut account = fx.store.account(&id).unwrap().unwrap();
            account.active = false;
            fx.store.update_account(account).unwrap();
        }
    }
    run_pass(JobKind::Rank, &mut fx.store, &config, batch_day(1));
    let second = ranks(&fx.store);
    for (id, rank) in &first {
        assert!(second[id] >= *rank, "{id} dropped from {rank} to {}", second[id]);
    }

    let mut seen = BTreeSet::new();
    for record in fx.store.records(&LedgerFilter::kind(CommissionKind::Rank)).unwrap() {
        assert!(seen.insert((record.beneficiary.clone(), record.reference.clone())));
    }
}

#[test]
fn excluded_ancestor_stops_every_event() {
    let mut fx = Fixture::new(CommissionConfig::default());
    fx.join("top", None, 1_000);
    let chain = ["c1", "c2", "c3", "c4", "c5", "c6"];
    let mut sponsor = "top";
    for id in chain {
        fx.join(id, Some(sponsor), 1_000);
        for side in 0..6 {
            fx.join(&format!("{id}-s{side}"), Some(id), 100);
        }
        sponsor = id;
    }
    let mut breaker = fx.account("c3");
    breaker.blocked = true;
    fx.store.update_account(breaker).unwrap();

    fx.register("leaf", Some("c6"));
    let outcome = fx.deposit("leaf", 2_500, None);
    assert_eq!(outcome.stopped_at.as_ref().map(|(_, id)| id.as_str()), Some("c3"));

    let config = fx.config.clone();
    for day in 0..3 {
        run_pass(JobKind::Roi, &mut fx.store, &config, batch_day(day));
    }
    let above = ["c3", "c2", "c1", "top"];
    for kind in [CommissionKind::Referral, CommissionKind::Level] {
        let from_leaf = LedgerFilter::kind(kind).source(&"leaf".to_string());
        for record in fx.store.records(&from_leaf).unwrap() {
            assert!(
                !above.contains(&record.beneficiary.as_str()),
                "{} paid above breaker",
                record.beneficiary
            );
        }
    }
    assert!(fx.account("c4").income.level > 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn legs_partition_downline_volume(seed in any::<u64>(), size in 2usize..60) {
        let fx = random_forest(seed, size);
        for id in fx.store.account_ids().unwrap() {
            let members = collect_downline(&fx.store, &id, None).unwrap();
            let downline: Amount = members.iter().map(|m| m.invested).sum();
            let split = leg_split(&fx.store, &id).unwrap();
            prop_assert_eq!(split.power + split.weaker, downline);
            for leg in leg_volumes(&fx.store, &id).unwrap() {
                prop_assert!(leg.volume <= split.power);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn roi_never_exceeds_cap(
        dollars in 100u64..50_000,
        daily_bps in 1u32..2_000,
        duration in 1u32..60,
    ) {
        let mut config = CommissionConfig::default();
        config.roi.plans.push(Plan {
            id: "p".into(),
            name: "Prop".into(),
            duration_days: duration,
            brackets: vec![RateBracket { min: usd(100), max: None, daily_bps }],
        });
        let mut fx = Fixture::new(config);
        fx.register("a", None);
        let tx = Transaction {
            id: "t".into(),
            account: "a".into(),
            kind: TxKind::Deposit,
            amount: usd(dollars),
            plan: Some("p".into()),
            status: TxStatus::Completed,
            created_at: t0(),
        };
        sponsor_rewards::referral::record_deposit(&mut fx.store, &fx.config, tx.clone()).unwrap();

        let engine = RoiEngine::new(&fx.config);
        for day in 0..(duration as i64 + 3) {
            engine.credit_transaction(&mut fx.store, &tx, batch_day(day)).unwrap();
        }
        let filter = LedgerFilter::kind(CommissionKind::Roi).transaction(&tx.id);
        let paid = fx.store.sum(&filter).unwrap();
        prop_assert!(paid <= fx.config.roi.cap_for(tx.amount));
        prop_assert!(fx.store.count(&filter).unwrap() <= duration as usize);
    }
}
