// crates/nacre-staking/tests/ledger_scenarios.rs
//
// End-to-end scenarios driven through the pool registry with the in-memory
// token controller and position NFT: weights under utilization, the
// deposit/withdraw lifecycle across tranche expiry, stake burns, and
// rollback when a custody transfer fails.

use nacre_core::{AccountId, NacreError, ONE_NXM, DAY};
use nacre_staking::{
    AllocationRequest, BurnRequest, CatalogProduct, CoverCatalog, CreatePoolParams,
    InMemoryPools, ProductInitParams, StakedProductParam, StakingNft, StakingPools,
    TokenController, DEFAULT_GRACE_PERIOD, MIN_COVER_PERIOD, TRANCHE_DURATION,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Start of tranche 10.
const START: u64 = 10 * TRANCHE_DURATION;

fn manager() -> AccountId {
    AccountId::from_label("manager")
}

fn alice() -> AccountId {
    AccountId::from_label("alice")
}

fn bob() -> AccountId {
    AccountId::from_label("bob")
}

fn catalog() -> CoverCatalog {
    let mut catalog = CoverCatalog::default();
    for id in [1, 2] {
        catalog
            .upsert_product(
                id,
                CatalogProduct {
                    capacity_reduction_ratio: 0,
                    initial_price: 200,
                    min_price: 100,
                    grace_period: DEFAULT_GRACE_PERIOD,
                    is_deprecated: false,
                },
            )
            .unwrap();
    }
    catalog
}

fn ledger() -> InMemoryPools {
    let mut custody = TokenController::new();
    custody.mint_to(&manager(), 1_000 * ONE_NXM).unwrap();
    custody.mint_to(&alice(), 10_000_000 * ONE_NXM).unwrap();
    custody.mint_to(&bob(), 10_000 * ONE_NXM).unwrap();
    StakingPools::new(catalog(), custody, StakingNft::new())
}

fn create_pool(ledger: &mut InMemoryPools, products: &[(u32, u32)]) -> u32 {
    let params = CreatePoolParams {
        is_private: false,
        initial_pool_fee: 0,
        max_pool_fee: 10,
        products: products
            .iter()
            .map(|&(product_id, weight)| ProductInitParams {
                product_id,
                weight,
                target_price: 200,
            })
            .collect(),
        deposit_amount: 0,
        tranche_id: 0,
        metadata: "scenario".to_string(),
    };
    ledger.create_staking_pool(START, &manager(), params).unwrap()
}

fn cover(cover_id: u64, product_id: u32, nxm: u128, period: u64) -> AllocationRequest {
    AllocationRequest {
        cover_id,
        product_id,
        amount: nxm * ONE_NXM,
        period,
    }
}

fn retarget(product_id: u32, weight: u32) -> StakedProductParam {
    StakedProductParam {
        product_id,
        recalculate_effective_weight: true,
        target_weight: Some(weight),
        target_price: None,
    }
}

// ---------------------------------------------------------------------------
// Effective weights
// ---------------------------------------------------------------------------

#[test]
fn test_effective_weight_without_stake_is_target() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 5)]);

    let product = ledger.get_product(pool_id, 1).unwrap();
    assert_eq!(product.target_weight, 5);
    assert_eq!(product.last_effective_weight, 5);
    assert_eq!(ledger.pool(pool_id).unwrap().total_effective_weight(), 5);
}

#[test]
fn test_effective_weight_follows_utilization_below_target() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 10)]);
    ledger
        .deposit_to(START, &alice(), pool_id, 9_000_000 * ONE_NXM, 11, None, None)
        .unwrap();

    // 270k NXM of cover on 18M NXM of full capacity: 1.5%, rounded up to 2.
    ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 270_000, 30 * DAY))
        .unwrap();
    assert_eq!(ledger.get_product(pool_id, 1).unwrap().last_effective_weight, 10);

    ledger
        .set_products(START, &manager(), pool_id, &[retarget(1, 1)])
        .unwrap();
    let product = ledger.get_product(pool_id, 1).unwrap();
    assert_eq!(product.target_weight, 1);
    assert_eq!(product.last_effective_weight, 2);
}

#[test]
fn test_recalculation_covers_every_product() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 10), (2, 20)]);
    ledger
        .deposit_to(START, &alice(), pool_id, 9_000_000 * ONE_NXM, 11, None, None)
        .unwrap();
    ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 270_000, 30 * DAY))
        .unwrap();
    ledger
        .set_products(START, &manager(), pool_id, &[retarget(1, 0)])
        .unwrap();

    let weights = ledger
        .recalculate_effective_weights_for_all_products(START + DAY, pool_id)
        .unwrap();
    assert_eq!(weights.len(), 2);
    assert_eq!(weights[0].product_id, 1);
    assert_eq!(weights[0].active_weight, 2);
    assert_eq!(weights[0].effective_weight, 2);
    assert_eq!(weights[1].product_id, 2);
    assert_eq!(weights[1].active_weight, 0);
    assert_eq!(weights[1].effective_weight, 20);
    assert_eq!(ledger.pool(pool_id).unwrap().total_effective_weight(), 22);

    let again = ledger
        .recalculate_effective_weights_for_all_products(START + DAY, pool_id)
        .unwrap();
    assert_eq!(again, weights);
    assert_eq!(ledger.pool(pool_id).unwrap().total_effective_weight(), 22);
}

#[test]
fn test_weight_falls_back_to_target_after_cover_expires() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 10)]);
    ledger
        .deposit_to(START, &alice(), pool_id, 9_000_000 * ONE_NXM, 11, None, None)
        .unwrap();
    ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 270_000, 30 * DAY))
        .unwrap();
    ledger
        .set_products(START, &manager(), pool_id, &[retarget(1, 1)])
        .unwrap();

    let weights = ledger
        .recalculate_effective_weights_for_all_products(START + 60 * DAY, pool_id)
        .unwrap();
    assert_eq!(weights[0].active_weight, 0);
    assert_eq!(weights[0].effective_weight, 1);
    assert!(ledger.pool(pool_id).unwrap().cover(1).is_none());
}

// ---------------------------------------------------------------------------
// Deposit / withdraw lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_withdraw_stake_before_expiry_rejected() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    let position = ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();

    let err = ledger
        .withdraw(START + DAY, &bob(), position, &[10])
        .unwrap_err();
    assert_eq!(
        err,
        NacreError::TrancheNotYetExpired {
            tranche_id: 10,
            expires_at: 11 * TRANCHE_DURATION
        }
    );
    assert_eq!(ledger.custody().balance_of(&bob()), 9_000 * ONE_NXM);
}

#[test]
fn test_full_lifecycle_returns_stake_and_rewards() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    let position = ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();

    let allocation = ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 100, MIN_COVER_PERIOD))
        .unwrap();
    assert_eq!(allocation.allocated_amount, 100 * ONE_NXM);
    assert!(allocation.premium > 0);
    assert!(allocation.rewards > 0);
    assert_eq!(
        ledger.custody().pool_balances(pool_id).rewards,
        allocation.rewards
    );

    // Part of the stream is claimable while the tranche is still active.
    let early = ledger
        .claim_rewards(START + 10 * DAY, &bob(), position, &[10])
        .unwrap();
    assert!(early > 0);
    assert!(early < allocation.rewards);

    let after_expiry = 11 * TRANCHE_DURATION + 1;
    let outcome = ledger
        .withdraw(after_expiry, &bob(), position, &[10])
        .unwrap();
    assert_eq!(outcome.stake, 1_000 * ONE_NXM);

    let total_rewards = early + outcome.rewards;
    assert!(total_rewards <= allocation.rewards);
    assert!(allocation.rewards - total_rewards < ONE_NXM / 1_000);

    assert_eq!(
        ledger.custody().balance_of(&bob()),
        10_000 * ONE_NXM + total_rewards
    );
    let pool = ledger.pool(pool_id).unwrap();
    assert_eq!(pool.active_stake(), 0);
    assert!(pool.deposit_of(position, 10).is_none());
    assert!(pool.expired_tranche(10).is_some());
}

#[test]
fn test_deallocation_burns_unstreamed_rewards() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();
    let allocation = ledger
        .allocate_capacity(START, pool_id, &cover(7, 1, 100, MIN_COVER_PERIOD))
        .unwrap();

    let outcome = ledger.deallocate_capacity(START, pool_id, 7).unwrap();
    assert_eq!(outcome.released_units, 10_000);
    assert_eq!(outcome.unstreamed_rewards, allocation.rewards);
    assert_eq!(ledger.custody().pool_balances(pool_id).rewards, 0);
    assert_eq!(ledger.pool(pool_id).unwrap().reward_per_second(), 0);
    assert_eq!(ledger.pool(pool_id).unwrap().allocated_units(1, 10), 0);

    assert_eq!(
        ledger.deallocate_capacity(START, pool_id, 7).unwrap_err(),
        NacreError::AllocationNotFound(7)
    );
}

#[test]
fn test_allocation_beyond_capacity_rejected() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();

    // 1000 NXM at a 2x capacity ratio and half weight sells 1000 NXM of cover.
    let snapshot = ledger.available_capacity(START, pool_id, 1).unwrap();
    assert_eq!(snapshot.available_amount(), 1_000 * ONE_NXM);

    let err = ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 1_001, MIN_COVER_PERIOD))
        .unwrap_err();
    assert_eq!(
        err,
        NacreError::InsufficientCapacity {
            requested: 100_100,
            available: 100_000
        }
    );
    assert_eq!(ledger.custody().pool_balances(pool_id).rewards, 0);
}

// ---------------------------------------------------------------------------
// Burns
// ---------------------------------------------------------------------------

#[test]
fn test_burn_is_proportional_across_tranches() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    let bob_position = ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();
    ledger
        .deposit_to(START, &alice(), pool_id, 3_000 * ONE_NXM, 11, None, None)
        .unwrap();
    ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 100, MIN_COVER_PERIOD))
        .unwrap();

    let result = ledger
        .burn_stake(
            START + DAY,
            pool_id,
            &BurnRequest {
                cover_id: Some(1),
                amount: 400 * ONE_NXM,
                deallocation_amount: 50 * ONE_NXM,
            },
        )
        .unwrap();
    assert_eq!(result.burned, 400 * ONE_NXM);
    assert_eq!(result.deallocated_units, 5_000);

    let pool = ledger.pool(pool_id).unwrap();
    assert_eq!(pool.active_stake(), 3_600 * ONE_NXM);
    assert_eq!(pool.tranche(10).unwrap().stake, 900 * ONE_NXM);
    assert_eq!(pool.tranche(11).unwrap().stake, 2_700 * ONE_NXM);
    assert_eq!(pool.cover(1).unwrap().total_units(), 5_000);
    assert_eq!(
        ledger.custody().pool_balances(pool_id).deposits,
        3_600 * ONE_NXM
    );

    let outcome = ledger
        .withdraw(11 * TRANCHE_DURATION, &bob(), bob_position, &[10])
        .unwrap();
    assert_eq!(outcome.stake, 900 * ONE_NXM);
}

#[test]
fn test_burn_shrinks_capacity_and_raises_active_weight() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();
    ledger
        .deposit_to(START, &alice(), pool_id, 3_000 * ONE_NXM, 11, None, None)
        .unwrap();
    ledger
        .allocate_capacity(START, pool_id, &cover(1, 1, 300, MIN_COVER_PERIOD))
        .unwrap();

    // 4000 NXM at 2x and half weight: 4000 NXM of cover.
    let before = ledger.available_capacity(START, pool_id, 1).unwrap();
    assert_eq!(before.capacity_units, 400_000);
    assert_eq!(before.allocated_units, 30_000);
    let weights = ledger
        .recalculate_effective_weights_for_all_products(START, pool_id)
        .unwrap();
    // 30k units of 800k full capacity: 3.75%, rounded up.
    assert_eq!(weights[0].active_weight, 4);

    let later = START + DAY;
    let result = ledger
        .burn_stake(
            later,
            pool_id,
            &BurnRequest {
                cover_id: None,
                amount: 2_000 * ONE_NXM,
                deallocation_amount: 0,
            },
        )
        .unwrap();
    assert_eq!(result.burned, 2_000 * ONE_NXM);

    let after = ledger.available_capacity(later, pool_id, 1).unwrap();
    assert_eq!(after.capacity_units, 200_000);
    assert_eq!(after.allocated_units, 30_000);
    assert_eq!(after.available_units, 170_000);

    let weights = ledger
        .recalculate_effective_weights_for_all_products(later, pool_id)
        .unwrap();
    // Same cover on half the stake: 7.5%, rounded up.
    assert_eq!(weights[0].active_weight, 8);
    assert_eq!(weights[0].effective_weight, 50);
    assert_eq!(ledger.get_product(pool_id, 1).unwrap().last_effective_weight, 50);
}

#[test]
fn test_burn_more_than_stake_is_capped() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();

    let result = ledger
        .burn_stake(
            START,
            pool_id,
            &BurnRequest {
                cover_id: None,
                amount: 5_000 * ONE_NXM,
                deallocation_amount: 0,
            },
        )
        .unwrap();
    assert_eq!(result.requested, 5_000 * ONE_NXM);
    assert_eq!(result.burned, 1_000 * ONE_NXM);
    assert_eq!(ledger.pool(pool_id).unwrap().active_stake(), 0);

    // The emptied tranche no longer accepts deposits.
    assert_eq!(
        ledger
            .deposit_to(START, &bob(), pool_id, ONE_NXM, 10, None, None)
            .unwrap_err(),
        NacreError::TrancheDepleted(10)
    );
}

#[test]
fn test_burn_for_unknown_cover_changes_nothing() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();

    let err = ledger
        .burn_stake(
            START,
            pool_id,
            &BurnRequest {
                cover_id: Some(99),
                amount: 100 * ONE_NXM,
                deallocation_amount: 0,
            },
        )
        .unwrap_err();
    assert_eq!(err, NacreError::AllocationNotFound(99));
    assert_eq!(ledger.pool(pool_id).unwrap().active_stake(), 1_000 * ONE_NXM);
    assert_eq!(
        ledger.custody().pool_balances(pool_id).deposits,
        1_000 * ONE_NXM
    );
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn test_failed_top_up_leaves_deposit_in_place() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    let position = ledger
        .deposit_to(START, &bob(), pool_id, 10_000 * ONE_NXM, 10, None, None)
        .unwrap();
    assert_eq!(ledger.custody().balance_of(&bob()), 0);

    let err = ledger
        .extend_deposit(START, &bob(), position, 10, 12, ONE_NXM)
        .unwrap_err();
    assert!(matches!(err, NacreError::InsufficientBalance { .. }));

    let pool = ledger.pool(pool_id).unwrap();
    assert_eq!(
        pool.deposit_of(position, 10).unwrap().stake_shares,
        10_000 * ONE_NXM
    );
    assert!(pool.deposit_of(position, 12).is_none());
    assert!(pool.tranche(12).is_none());
    assert_eq!(pool.active_stake(), 10_000 * ONE_NXM);
}

#[test]
fn test_extend_moves_stake_to_later_tranche() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    let position = ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();

    ledger
        .extend_deposit(START + DAY, &bob(), position, 10, 12, 500 * ONE_NXM)
        .unwrap();

    let pool = ledger.pool(pool_id).unwrap();
    assert!(pool.deposit_of(position, 10).is_none());
    assert_eq!(pool.tranche(12).unwrap().stake, 1_500 * ONE_NXM);
    assert_eq!(pool.active_stake(), 1_500 * ONE_NXM);
    assert_eq!(ledger.custody().balance_of(&bob()), 8_500 * ONE_NXM);
}

#[test]
fn test_approved_operator_can_withdraw_to_owner() {
    let mut ledger = ledger();
    let pool_id = create_pool(&mut ledger, &[(1, 50)]);
    let position = ledger
        .deposit_to(START, &bob(), pool_id, 1_000 * ONE_NXM, 10, None, None)
        .unwrap();
    ledger
        .positions_mut()
        .approve(&bob(), &alice(), position)
        .unwrap();

    let outcome = ledger
        .withdraw(11 * TRANCHE_DURATION, &alice(), position, &[10])
        .unwrap();
    assert_eq!(outcome.stake, 1_000 * ONE_NXM);
    assert_eq!(ledger.custody().balance_of(&bob()), 10_000 * ONE_NXM);
    assert_eq!(ledger.custody().balance_of(&alice()), 10_000_000 * ONE_NXM);
}
