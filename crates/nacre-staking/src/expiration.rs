// crates/nacre-staking/src/expiration.rs
//
// The expiration sweep.
//
// Two clocks tick inside a pool: cover-expiry buckets (28 days) and
// tranches (91 days). Rewards must be accrued at exactly the boundary where
// either changes the pool (a bucket cuts the reward rate; a tranche removes
// reward shares), so the sweep walks boundaries in time order, accruing up
// to each one before applying it.

use tracing::debug;

use nacre_core::{BucketId, NacreError, Timestamp, TrancheId};

use crate::pool::StakingPool;
use crate::tranche::{ExpiredTranche, BUCKET_DURATION, TRANCHE_DURATION};

impl StakingPool {
    /// Expire every bucket and tranche that ended at or before the target
    /// time, then accrue rewards up to it.
    ///
    /// The target is `now`, or the start of `until_tranche_id` if that is
    /// earlier, which lets a caller sweep a long idle period in steps.
    /// Running the sweep twice for the same target changes nothing.
    pub fn process_expirations(
        &mut self,
        now: Timestamp,
        until_tranche_id: Option<TrancheId>,
    ) -> Result<(), NacreError> {
        let target = match until_tranche_id {
            Some(id) => now.min(id.saturating_mul(TRANCHE_DURATION)),
            None => now,
        };

        loop {
            let bucket_boundary = (self.first_active_bucket_id + 1) * BUCKET_DURATION;
            let tranche_boundary = (self.first_active_tranche_id + 1) * TRANCHE_DURATION;
            let next = bucket_boundary.min(tranche_boundary);
            if next > target {
                break;
            }

            self.accrue_to(next)?;
            if bucket_boundary <= tranche_boundary {
                self.first_active_bucket_id += 1;
                self.expire_bucket(self.first_active_bucket_id);
            } else {
                self.expire_tranche(self.first_active_tranche_id);
                self.first_active_tranche_id += 1;
            }
        }

        self.accrue_to(target)
    }

    /// Cut the reward rate and release the covers that expire when
    /// `bucket_id` becomes the first active bucket.
    fn expire_bucket(&mut self, bucket_id: BucketId) {
        self.apply_rate_cut(bucket_id);

        let expired: Vec<_> = self
            .covers
            .iter()
            .filter(|(_, cover)| cover.expiry_bucket <= bucket_id)
            .map(|(id, _)| *id)
            .collect();

        for cover_id in expired {
            if let Some(cover) = self.covers.remove(&cover_id) {
                self.release_units(cover.product_id, &cover.tranche_units);
                debug!(pool_id = self.id, cover_id, bucket_id, "Cover allocation expired");
            }
        }
    }

    /// Snapshot an expiring tranche and take it out of the pool totals.
    fn expire_tranche(&mut self, tranche_id: TrancheId) {
        let tranche = self.tranches.remove(&tranche_id).unwrap_or_default();

        self.active_stake = self.active_stake.saturating_sub(tranche.stake);
        self.stake_share_supply = self.stake_share_supply.saturating_sub(tranche.stake_shares);
        self.reward_share_supply = self
            .reward_share_supply
            .saturating_sub(tranche.reward_shares);

        self.allocations.retain(|(_, t), _| *t != tranche_id);

        if tranche.stake_shares > 0 || tranche.reward_shares > 0 {
            self.expired_tranches.insert(
                tranche_id,
                ExpiredTranche {
                    acc_reward_per_share_at_expiry: self.acc_reward_per_share,
                    stake_at_expiry: tranche.stake,
                    stake_shares_at_expiry: tranche.stake_shares,
                },
            );
        }

        debug!(
            pool_id = self.id,
            tranche_id,
            stake = %tranche.stake,
            "Tranche expired"
        );
    }
}
