//! Batch job runner.
//!
//! Each job kind has its own lock inside an injected [`JobRunner`]; a trigger
//! that finds its job already running is a no-op. Per-unit failures never
//! abort a pass, they are collected in the [`PassReport`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, TryLockError};

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CommissionConfig, ScheduleConfig};
use crate::error::CommissionError;
use crate::matching::MatchingEvaluator;
use crate::model::{AccountId, Amount};
use crate::rank::RankQualifier;
use crate::roi::RoiEngine;
use crate::store::CommissionStore;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Roi,
    Rank,
    Matching,
    Reward,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [JobKind::Roi, JobKind::Rank, JobKind::Matching, JobKind::Reward];
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Roi => "roi",
            JobKind::Rank => "rank",
            JobKind::Matching => "matching",
            JobKind::Reward => "reward",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitFailure {
    /// Empty when the pass could not start.
    pub account: AccountId,
    pub error: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PassReport {
    pub job: JobKind,
    pub started_at: DateTime<Utc>,
    pub processed: usize,
    pub credits: usize,
    pub credited_amount: Amount,
    pub skipped: usize,
    pub failures: Vec<UnitFailure>,
}

impl PassReport {
    pub fn new(job: JobKind, started_at: DateTime<Utc>) -> Self {
        Self {
            job,
            started_at,
            processed: 0,
            credits: 0,
            credited_amount: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    pub fn record_credit(&mut self, amount: Amount) {
        self.credits += 1;
        self.credited_amount = self.credited_amount.saturating_add(amount);
    }

    pub fn fail(&mut self, account: &AccountId, error: CommissionError) {
        self.failures.push(UnitFailure {
            account: account.clone(),
            error: error.to_string(),
        });
    }

    pub fn abort(&mut self, error: CommissionError) {
        warn!(job = %self.job, error = %error, "pass could not start");
        self.failures.push(UnitFailure {
            account: AccountId::new(),
            error: error.to_string(),
        });
    }

    pub fn finish(&self) {
        info!(
            job = %self.job,
            processed = self.processed,
            credits = self.credits,
            amount = self.credited_amount,
            skipped = self.skipped,
            failures = self.failures.len(),
            "pass finished"
        );
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(PassReport),
    /// A previous trigger of the same job is still running.
    AlreadyRunning { job: JobKind },
}

/// Per-job-kind re-entrancy guard.
#[derive(Debug)]
pub struct JobRunner {
    locks: BTreeMap<JobKind, Mutex<()>>,
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            locks: JobKind::ALL.into_iter().map(|job| (job, Mutex::new(()))).collect(),
        }
    }

    /// Run `pass` unless another `job` pass holds the lock.
    pub fn run<F>(&self, job: JobKind, pass: F) -> JobOutcome
    where
        F: FnOnce() -> PassReport,
    {
        let Some(lock) = self.locks.get(&job) else {
            return JobOutcome::AlreadyRunning { job };
        };
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                info!(job = %job, "job already running, trigger ignored");
                return JobOutcome::AlreadyRunning { job };
            }
            // A panicked pass leaves no state behind the unit lock.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        info!(job = %job, "job started");
        JobOutcome::Completed(pass())
    }

    /// Run one batch entry point against `store`.
    pub fn run_job<S>(
        &self,
        job: JobKind,
        store: &mut S,
        config: &CommissionConfig,
        now: DateTime<Utc>,
    ) -> JobOutcome
    where
        S: CommissionStore + ?Sized,
    {
        self.run(job, || run_pass(job, store, config, now))
    }
}

/// Dispatch to the pass behind `job` without any locking.
pub fn run_pass<S>(
    job: JobKind,
    store: &mut S,
    config: &CommissionConfig,
    now: DateTime<Utc>,
) -> PassReport
where
    S: CommissionStore + ?Sized,
{
    match job {
        JobKind::Roi => RoiEngine::new(config).run_pass(store, now),
        JobKind::Rank => RankQualifier::new(&config.rank).run_pass(store, now),
        JobKind::Matching => MatchingEvaluator::new(config).run_matching_pass(store, now),
        JobKind::Reward => MatchingEvaluator::new(config).run_reward_pass(store, now),
    }
}

/// Fixed daily trigger times.
#[derive(Clone, Debug)]
pub struct Schedule {
    slots: Vec<(NaiveTime, JobKind)>,
}

impl Schedule {
    pub fn new(config: &ScheduleConfig) -> Self {
        let mut slots = vec![
            (config.roi_at, JobKind::Roi),
            (config.rank_at, JobKind::Rank),
            (config.matching_at, JobKind::Matching),
            (config.reward_at, JobKind::Reward),
        ];
        slots.sort();
        Self { slots }
    }

    /// Jobs whose trigger time falls in `(prev, now]`, in firing order.
    pub fn due_between(&self, prev: DateTime<Utc>, now: DateTime<Utc>) -> Vec<JobKind> {
        let mut due = Vec::new();
        if now <= prev {
            return due;
        }
        let mut day = prev.date_naive();
        while day <= now.date_naive() {
            for (time, job) in &self.slots {
                let at = day.and_time(*time).and_utc();
                if at > prev && at <= now {
                    due.push(*job);
                }
            }
            day += Duration::days(1);
        }
        due
    }
}
