// crates/nacre-staking/src/rewards.rs
//
// Reward accrual for a staking pool.
//
// Rewards stream at `reward_per_second` and are shared pro rata by reward
// shares through a single accumulator, `acc_reward_per_share`, scaled by
// ACC_PRECISION. The accumulator advances lazily: any operation that reads
// or changes shares first calls `touch`, which sweeps expirations and then
// accrues up to `now`.
//
// Rewards are funded by cover premiums. A share of each premium
// (`reward_ratio / REWARDS_DENOMINATOR`) is streamed from purchase until
// the end of the cover's expiry bucket; the bucket records the matching
// rate cut so the stream stops on time.

use tracing::debug;

use nacre_core::{BucketId, NacreError, Timestamp, Wei};

use crate::math;
use crate::pool::StakingPool;
use crate::tranche::BUCKET_DURATION;

/// Fixed-point scale of `acc_reward_per_share`.
pub const ACC_PRECISION: u128 = 1_000_000_000_000_000_000;

/// Denominator of the premium-to-rewards ratio.
pub const REWARDS_DENOMINATOR: u32 = 10_000;

/// Default share of premiums streamed to stakers: 50%.
pub const DEFAULT_REWARD_RATIO: u32 = 5_000;

/// A premium-funded reward stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardStream {
    /// Wei per second added to the pool's rate.
    pub rate: u128,
    /// Total wei the stream will emit (`rate × duration`); this is what
    /// custody must mint.
    pub total: Wei,
}

impl StakingPool {
    /// Bring the pool up to `now`: sweep expired buckets and tranches, then
    /// accrue rewards. Returns the fresh accumulator. Idempotent for a
    /// fixed `now`.
    pub fn touch(&mut self, now: Timestamp) -> Result<u128, NacreError> {
        self.process_expirations(now, None)?;
        Ok(self.acc_reward_per_share)
    }

    /// Advance the accumulator to `ts` at the current rate.
    ///
    /// The accumulator is frozen while no reward shares exist; rewards
    /// emitted in that window stay unassigned in the pool's reward balance.
    pub(crate) fn accrue_to(&mut self, ts: Timestamp) -> Result<(), NacreError> {
        if ts <= self.last_reward_update {
            return Ok(());
        }
        let elapsed = (ts - self.last_reward_update) as u128;

        if self.reward_share_supply > 0 && self.reward_per_second > 0 {
            let emitted = math::mul(elapsed, self.reward_per_second, "reward accrual")?;
            let increment = math::mul_div(
                emitted,
                ACC_PRECISION,
                self.reward_share_supply,
                "reward accrual",
            )?;
            self.acc_reward_per_share =
                math::add(self.acc_reward_per_share, increment, "reward accrual")?;
        }

        self.last_reward_update = ts;
        Ok(())
    }

    /// Start streaming `amount` from `now` until the start of `expiry_bucket`.
    ///
    /// The per-second rate is rounded down; the remainder is never minted.
    pub(crate) fn start_reward_stream(
        &mut self,
        now: Timestamp,
        amount: Wei,
        expiry_bucket: BucketId,
    ) -> Result<RewardStream, NacreError> {
        let end = expiry_bucket * BUCKET_DURATION;
        if end <= now || amount == 0 {
            return Ok(RewardStream { rate: 0, total: 0 });
        }
        let duration = (end - now) as u128;
        let rate = amount / duration;
        if rate == 0 {
            return Ok(RewardStream { rate: 0, total: 0 });
        }

        self.reward_per_second = math::add(self.reward_per_second, rate, "reward rate")?;
        let cut = self.reward_rate_cuts.entry(expiry_bucket).or_insert(0);
        *cut = math::add(*cut, rate, "reward rate cut")?;

        Ok(RewardStream {
            rate,
            total: rate * duration,
        })
    }

    /// Stop a stream early, returning the wei it would still have emitted.
    pub(crate) fn stop_reward_stream(
        &mut self,
        now: Timestamp,
        rate: u128,
        expiry_bucket: BucketId,
    ) -> Result<Wei, NacreError> {
        let end = expiry_bucket * BUCKET_DURATION;
        if rate == 0 || end <= now {
            return Ok(0);
        }

        self.reward_per_second = self.reward_per_second.saturating_sub(rate);
        if let Some(cut) = self.reward_rate_cuts.get_mut(&expiry_bucket) {
            *cut = cut.saturating_sub(rate);
            if *cut == 0 {
                self.reward_rate_cuts.remove(&expiry_bucket);
            }
        }

        math::mul(rate, (end - now) as u128, "unstreamed rewards")
    }

    /// Apply the rate cut registered for `bucket_id`, once the bucket has
    /// become the first active one.
    pub(crate) fn apply_rate_cut(&mut self, bucket_id: BucketId) {
        if let Some(cut) = self.reward_rate_cuts.remove(&bucket_id) {
            self.reward_per_second = self.reward_per_second.saturating_sub(cut);
            debug!(
                pool_id = self.id,
                bucket_id,
                cut = %cut,
                rate = %self.reward_per_second,
                "Reward rate cut applied"
            );
        }
    }
}
