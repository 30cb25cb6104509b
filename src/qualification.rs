//! Level qualification: how deep an account may earn level commissions.
//!
//! Unlocked depth is derived from live team composition and is never cached;
//! every distribution pass recomputes it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::QualificationConfig;
use crate::downline::DownlineWalker;
use crate::error::{CommissionError, Result};
use crate::model::{AccountId, Amount};
use crate::store::{AccountStore, PartnerFilter};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Qualification {
    pub self_qualified: bool,
    pub qualified_directs: usize,
    /// Σ min(qualified members below each qualified direct, leg cap).
    pub capped_leg_total: usize,
    pub top_tier: bool,
    pub unlocked_depth: u32,
}

impl Qualification {
    fn locked() -> Self {
        Self {
            self_qualified: false,
            qualified_directs: 0,
            capped_leg_total: 0,
            top_tier: false,
            unlocked_depth: 0,
        }
    }
}

pub struct LevelQualifier<'a> {
    config: &'a QualificationConfig,
}

impl<'a> LevelQualifier<'a> {
    pub fn new(config: &'a QualificationConfig) -> Self {
        Self { config }
    }

    pub fn unlocked_depth<S>(&self, store: &S, account: &AccountId) -> Result<u32>
    where
        S: AccountStore + ?Sized,
    {
        Ok(self.evaluate(store, account)?.unlocked_depth)
    }

    pub fn evaluate<S>(&self, store: &S, account_id: &AccountId) -> Result<Qualification>
    where
        S: AccountStore + ?Sized,
    {
        let account = store
            .account(account_id)?
            .ok_or_else(|| CommissionError::not_found("account", account_id.clone()))?;
        let min = self.config.min_self_investment;
        if !account.is_qualified(min) {
            return Ok(Qualification::locked());
        }

        let directs = store.direct_partners(account_id, PartnerFilter::qualified(min))?;
        let qualified_directs = directs.len();
        let mut unlocked_depth = self.config.depth_for_directs(qualified_directs);

        let rule = &self.config.top_tier;
        let mut capped_leg_total = 0;
        let mut top_tier = false;
        if qualified_directs >= rule.min_directs && rule.depth > unlocked_depth {
            for direct in &directs {
                capped_leg_total += count_qualified_below(store, &direct.id, min, rule.leg_cap)?;
            }
            let team_ok = match rule.min_total_team {
                Some(required) => count_team(store, account_id, required)? >= required,
                None => true,
            };
            if capped_leg_total >= rule.min_capped_total && team_ok {
                top_tier = true;
                unlocked_depth = rule.depth;
            }
        }

        debug!(
            account = %account_id,
            qualified_directs,
            capped_leg_total,
            unlocked_depth,
            "level qualification"
        );
        Ok(Qualification {
            self_qualified: true,
            qualified_directs,
            capped_leg_total,
            top_tier,
            unlocked_depth,
        })
    }
}

/// Qualified members strictly below `root`, counting stops at `cap`.
fn count_qualified_below<S>(store: &S, root: &AccountId, min: Amount, cap: usize) -> Result<usize>
where
    S: AccountStore + ?Sized,
{
    let mut count = 0;
    for level in DownlineWalker::new(store, root, None) {
        count += level?.iter().filter(|m| m.active && m.invested >= min).count();
        if count >= cap {
            return Ok(cap);
        }
    }
    Ok(count)
}

/// Team members below `root`, counting stops at `stop_at`.
fn count_team<S>(store: &S, root: &AccountId, stop_at: usize) -> Result<usize>
where
    S: AccountStore + ?Sized,
{
    let mut count = 0;
    for level in DownlineWalker::new(store, root, None) {
        count += level?.len();
        if count >= stop_at {
            break;
        }
    }
    Ok(count)
}
