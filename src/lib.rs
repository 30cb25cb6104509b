//! Commission engine for a sponsor tree.
//!
//! Money is integer minor units and rates are basis points throughout. All
//! effects go through the store traits in [`store`]; the ledger is the source
//! of truth for every "paid once" rule.

pub mod config;
pub mod downline;
pub mod error;
pub mod ledger;
pub mod matching;
pub mod model;
pub mod qualification;
pub mod rank;
pub mod reconcile;
pub mod referral;
pub mod roi;
pub mod scheduler;
pub mod single_leg;
pub mod store;

pub use config::CommissionConfig;
pub use error::{CommissionError, Result, SkipReason};
pub use ledger::{CommissionKind, CommissionRecord};
pub use model::{Account, AccountId, Amount, Transaction};
pub use scheduler::{JobKind, JobOutcome, JobRunner, PassReport};
pub use store::{CommissionStore, MemoryStore, StoreError};
