//! Commission tables and thresholds.
//!
//! Every section has serde defaults so a JSON file only needs the values it
//! overrides.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{CommissionError, Result};
use crate::model::{usd, AccountId, Amount, Plan, RateBracket};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CommissionConfig {
    pub referral: ReferralConfig,
    pub qualification: QualificationConfig,
    pub roi: RoiConfig,
    pub dividend: DividendConfig,
    pub rank: RankConfig,
    pub matching: MatchingConfig,
    pub single_leg: SingleLegConfig,
    pub schedule: ScheduleConfig,
}

impl CommissionConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: CommissionConfig = serde_json::from_str(raw)
            .map_err(|e| CommissionError::validation(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.referral.validate()?;
        self.qualification.validate()?;
        self.roi.validate()?;
        validate_bands("dividend band", &self.dividend.bands)?;
        self.rank.validate()?;
        if self.matching.balance_ratio_bps < 10_000 {
            return Err(CommissionError::validation("matching balance ratio below 1.0"));
        }
        Ok(())
    }
}

/// Flat direct-sponsor bonus for deposits of at least `min`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BonusBracket {
    pub min: Amount,
    pub bonus: Amount,
}

/// Contiguous depth range sharing one rate; bounds inclusive.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepthBand {
    pub from: u32,
    pub to: u32,
    pub bps: u32,
}

impl DepthBand {
    pub fn contains(&self, depth: u32) -> bool {
        depth >= self.from && depth <= self.to
    }
}

pub fn band_for(bands: &[DepthBand], depth: u32) -> Option<&DepthBand> {
    bands.iter().find(|band| band.contains(depth))
}

fn validate_bands(what: &str, bands: &[DepthBand]) -> Result<()> {
    let mut previous_to = 0;
    for band in bands {
        if band.from == 0 || band.from > band.to || band.from <= previous_to {
            return Err(CommissionError::validation(format!(
                "{what} {}-{} is empty, unordered or overlapping",
                band.from, band.to
            )));
        }
        previous_to = band.to;
    }
    Ok(())
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReferralConfig {
    /// Depth 1, paid once per (sponsor, originating account).
    pub direct_bonus: Vec<BonusBracket>,
    /// Depth 2 and beyond.
    pub level_rates: Vec<DepthBand>,
    pub max_depth: u32,
    /// Accounts that stop the walk in addition to per-account flags.
    pub excluded_accounts: Vec<AccountId>,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        let direct_bonus = [
            (100, 10),
            (500, 20),
            (1_000, 35),
            (2_500, 50),
            (5_000, 75),
            (10_000, 150),
            (25_000, 250),
            (50_000, 500),
        ]
        .into_iter()
        .map(|(min, bonus)| BonusBracket {
            min: usd(min),
            bonus: usd(bonus),
        })
        .collect();
        Self {
            direct_bonus,
            level_rates: vec![
                DepthBand { from: 2, to: 10, bps: 200 },
                DepthBand { from: 11, to: 16, bps: 100 },
                DepthBand { from: 17, to: 25, bps: 50 },
            ],
            max_depth: 25,
            excluded_accounts: Vec::new(),
        }
    }
}

impl ReferralConfig {
    pub fn direct_bonus_for(&self, amount: Amount) -> Option<Amount> {
        self.direct_bonus
            .iter()
            .rev()
            .find(|bracket| amount >= bracket.min)
            .map(|bracket| bracket.bonus)
    }

    pub fn level_bps(&self, depth: u32) -> Option<u32> {
        band_for(&self.level_rates, depth).map(|band| band.bps)
    }

    pub fn is_excluded(&self, account: &AccountId) -> bool {
        self.excluded_accounts.iter().any(|id| id == account)
    }

    fn validate(&self) -> Result<()> {
        if self.direct_bonus.windows(2).any(|w| w[0].min >= w[1].min) {
            return Err(CommissionError::validation("direct bonus brackets must ascend"));
        }
        validate_bands("level band", &self.level_rates)?;
        if self.level_rates.iter().any(|b| b.from < 2) {
            return Err(CommissionError::validation("level bands start at depth 2"));
        }
        Ok(())
    }
}

/// Qualified directs needed to unlock `depth`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnlockTier {
    pub min_directs: usize,
    pub depth: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QualificationConfig {
    pub min_self_investment: Amount,
    pub tiers: Vec<UnlockTier>,
    pub top_tier: TopTierRule,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TopTierRule {
    pub min_directs: usize,
    /// Qualified members counted per leg are capped at this value.
    pub leg_cap: usize,
    pub min_capped_total: usize,
    pub min_total_team: Option<usize>,
    pub depth: u32,
}

impl Default for TopTierRule {
    fn default() -> Self {
        Self {
            min_directs: 10,
            leg_cap: 15,
            min_capped_total: 30,
            min_total_team: None,
            depth: 25,
        }
    }
}

impl Default for QualificationConfig {
    fn default() -> Self {
        let tiers = [(1, 1), (3, 3), (6, 10), (10, 16), (15, 25)]
            .into_iter()
            .map(|(min_directs, depth)| UnlockTier { min_directs, depth })
            .collect();
        Self {
            min_self_investment: usd(100),
            tiers,
            top_tier: TopTierRule::default(),
        }
    }
}

impl QualificationConfig {
    pub fn depth_for_directs(&self, directs: usize) -> u32 {
        self.tiers
            .iter()
            .filter(|tier| directs >= tier.min_directs)
            .map(|tier| tier.depth)
            .max()
            .unwrap_or(0)
    }

    fn validate(&self) -> Result<()> {
        if self
            .tiers
            .windows(2)
            .any(|w| w[0].min_directs >= w[1].min_directs || w[0].depth > w[1].depth)
        {
            return Err(CommissionError::validation("unlock tiers must ascend"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RoiConfig {
    pub plans: Vec<Plan>,
    /// Used when a transaction has no plan; no duration bound.
    pub fallback_brackets: Vec<RateBracket>,
    /// Lifetime cap per transaction as a multiple of its amount.
    pub cap_multiplier: u32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            plans: Vec::new(),
            fallback_brackets: vec![
                RateBracket { min: usd(100), max: Some(usd(1_000) - 1), daily_bps: 50 },
                RateBracket { min: usd(1_000), max: Some(usd(5_000) - 1), daily_bps: 75 },
                RateBracket { min: usd(5_000), max: Some(usd(25_000) - 1), daily_bps: 100 },
                RateBracket { min: usd(25_000), max: None, daily_bps: 125 },
            ],
            cap_multiplier: 3,
        }
    }
}

impl RoiConfig {
    pub fn plan(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.id == id)
    }

    pub fn cap_for(&self, amount: Amount) -> Amount {
        amount.saturating_mul(self.cap_multiplier as u64)
    }

    fn validate(&self) -> Result<()> {
        if self.cap_multiplier == 0 {
            return Err(CommissionError::validation("roi cap multiplier must be positive"));
        }
        for plan in &self.plans {
            if plan.duration_days == 0 || plan.brackets.is_empty() {
                return Err(CommissionError::validation(format!(
                    "plan {} needs a duration and at least one bracket",
                    plan.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DividendConfig {
    pub bands: Vec<DepthBand>,
}

impl Default for DividendConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                DepthBand { from: 1, to: 3, bps: 500 },
                DepthBand { from: 4, to: 10, bps: 200 },
                DepthBand { from: 11, to: 16, bps: 100 },
                DepthBand { from: 17, to: 25, bps: 50 },
            ],
        }
    }
}

/// Requirements for reaching one rank; index 0 of the ladder is unranked.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankRule {
    pub name: String,
    pub min_qualified_directs: usize,
    /// Active members from depth 2 downward.
    pub min_team: usize,
    /// Legs that must hold at least `leg_rank`.
    pub min_legs: usize,
    pub leg_rank: u8,
    pub reward: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RankConfig {
    pub min_self_investment: Amount,
    pub ladder: Vec<RankRule>,
}

impl Default for RankConfig {
    fn default() -> Self {
        let rule = |name: &str, directs, team, legs, leg_rank, reward| RankRule {
            name: name.to_string(),
            min_qualified_directs: directs,
            min_team: team,
            min_legs: legs,
            leg_rank,
            reward: usd(reward),
        };
        Self {
            min_self_investment: usd(100),
            ladder: vec![
                rule("Unranked", 0, 0, 0, 0, 0),
                rule("Bronze", 3, 5, 0, 0, 50),
                rule("Silver", 4, 20, 2, 1, 150),
                rule("Gold", 5, 60, 3, 2, 500),
                rule("Platinum", 6, 150, 3, 3, 1_500),
                rule("Diamond", 8, 400, 4, 4, 5_000),
            ],
        }
    }
}

impl RankConfig {
    pub fn top(&self) -> u8 {
        self.ladder.len().saturating_sub(1) as u8
    }

    pub fn name(&self, rank: u8) -> &str {
        self.ladder
            .get(rank as usize)
            .map(|rule| rule.name.as_str())
            .unwrap_or("unknown")
    }

    fn validate(&self) -> Result<()> {
        if self.ladder.len() < 2 || self.ladder.len() > u8::MAX as usize {
            return Err(CommissionError::validation("rank ladder needs 2..=255 entries"));
        }
        for (idx, rule) in self.ladder.iter().enumerate().skip(1) {
            if rule.min_legs > 0 && rule.leg_rank as usize >= idx {
                return Err(CommissionError::validation(format!(
                    "rank {} requires legs at its own rank or higher",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MatchingConfig {
    /// Paid on newly matched weaker-side volume.
    pub bonus_bps: u32,
    pub max_payouts_per_month: usize,
    pub min_new_volume: Amount,
    /// `max ≤ min × ratio` for global rewards; 15 000 = 1.5×.
    pub balance_ratio_bps: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            bonus_bps: 500,
            max_payouts_per_month: 4,
            min_new_volume: usd(100),
            balance_ratio_bps: 15_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SingleLegConfig {
    pub neighbors_each_side: usize,
    pub share_bps: u32,
    /// Processing fee taken from withdrawals; the commission pool.
    pub withdrawal_fee_bps: u32,
    pub house_account: AccountId,
}

impl Default for SingleLegConfig {
    fn default() -> Self {
        Self {
            neighbors_each_side: 10,
            share_bps: 500,
            withdrawal_fee_bps: 500,
            house_account: "house".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub roi_at: NaiveTime,
    pub rank_at: NaiveTime,
    pub matching_at: NaiveTime,
    pub reward_at: NaiveTime,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        let at = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
        Self {
            roi_at: at(0, 5),
            rank_at: at(1, 0),
            matching_at: at(2, 0),
            reward_at: at(3, 0),
        }
    }
}
