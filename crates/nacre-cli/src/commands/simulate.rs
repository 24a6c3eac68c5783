// crates/nacre-cli/src/commands/simulate.rs
//
// `nacre simulate <scenario.json>` — replay a scenario against an in-memory
// ledger and print the resulting pools, products, tranches and balances.
//
// A scenario is a JSON object:
//
//   {
//     "start": 1700000000,
//     "balances": { "alice": "50000" },
//     "steps": [
//       { "action": "create_pool", "manager": "alice", "products": [...] },
//       { "action": "deposit", "account": "alice", "pool_id": 1, "amount": "1000", "tranche": 2 },
//       { "action": "advance", "days": 30 },
//       ...
//     ]
//   }
//
// Accounts are named by label. Amounts are decimal NXM strings. `tranche`
// fields are offsets from the tranche containing `start`.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use tracing::{info, warn};

use nacre_core::{
    AccountId, CoverId, PoolId, PositionId, ProductId, Timestamp, TrancheId, DAY,
};
use nacre_staking::{
    tranche_end, tranche_id_at, AllocationRequest, BurnRequest, CoverCatalog, CreatePoolParams,
    InMemoryPools, Nxm, PoolSummary, ProductInitParams, StakedProductParam, StakingNft,
    StakingPools, TokenController, TRANCHE_DURATION,
};

use crate::config::NacreConfig;
use crate::output::{format_json, format_table, nxm, OutputFormat};

/// Arguments of `nacre simulate`.
#[derive(Debug, Args)]
pub struct SimulateCmd {
    /// Path to the scenario JSON file.
    pub scenario: PathBuf,

    /// Stop at the first rejected step instead of recording it and going on.
    #[arg(long)]
    pub strict: bool,
}

/// A scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    /// Unix time of the first step. Defaults to the start of the current
    /// tranche.
    #[serde(default)]
    pub start: Option<Timestamp>,

    /// Opening NXM balances by account label.
    #[serde(default)]
    pub balances: BTreeMap<String, String>,

    pub steps: Vec<Step>,
}

/// One scenario step. Runs at the simulation clock.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    CreatePool {
        manager: String,
        #[serde(default)]
        is_private: bool,
        #[serde(default)]
        pool_fee: u8,
        #[serde(default)]
        max_pool_fee: u8,
        #[serde(default)]
        products: Vec<ProductInitParams>,
        #[serde(default)]
        deposit: Option<String>,
        #[serde(default)]
        tranche: u64,
        #[serde(default)]
        metadata: String,
    },
    SetProducts {
        manager: String,
        pool_id: PoolId,
        products: Vec<StakedProductParam>,
    },
    Deposit {
        account: String,
        pool_id: PoolId,
        amount: String,
        tranche: u64,
        #[serde(default)]
        position_id: Option<PositionId>,
    },
    Extend {
        account: String,
        position_id: PositionId,
        from: u64,
        to: u64,
        #[serde(default)]
        top_up: Option<String>,
    },
    Advance {
        days: u64,
    },
    BuyCover {
        pool_id: PoolId,
        cover_id: CoverId,
        product_id: ProductId,
        amount: String,
        period_days: u64,
    },
    CancelCover {
        pool_id: PoolId,
        cover_id: CoverId,
    },
    Burn {
        pool_id: PoolId,
        #[serde(default)]
        cover_id: Option<CoverId>,
        amount: String,
        #[serde(default)]
        deallocation: Option<String>,
    },
    Recalculate {
        pool_id: PoolId,
    },
    Expire {
        pool_id: PoolId,
    },
    Withdraw {
        account: String,
        position_id: PositionId,
        tranches: Vec<u64>,
        #[serde(default)]
        rewards_only: bool,
    },
    ManagerRewards {
        manager: String,
        pool_id: PoolId,
        tranches: Vec<u64>,
    },
    SetPoolFee {
        manager: String,
        pool_id: PoolId,
        fee: u8,
    },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::CreatePool { .. } => "create_pool",
            Step::SetProducts { .. } => "set_products",
            Step::Deposit { .. } => "deposit",
            Step::Extend { .. } => "extend",
            Step::Advance { .. } => "advance",
            Step::BuyCover { .. } => "buy_cover",
            Step::CancelCover { .. } => "cancel_cover",
            Step::Burn { .. } => "burn",
            Step::Recalculate { .. } => "recalculate",
            Step::Expire { .. } => "expire",
            Step::Withdraw { .. } => "withdraw",
            Step::ManagerRewards { .. } => "manager_rewards",
            Step::SetPoolFee { .. } => "set_pool_fee",
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct StepRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Day")]
    pub day: u64,
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
    #[tabled(skip)]
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct PoolRow {
    #[tabled(rename = "Pool")]
    pub pool_id: PoolId,
    #[tabled(rename = "Manager")]
    pub manager: String,
    #[tabled(rename = "Fee %")]
    pub pool_fee: u8,
    #[tabled(rename = "Private")]
    pub is_private: bool,
    #[tabled(rename = "Active stake")]
    pub active_stake: String,
    #[tabled(rename = "Reward/s (wei)")]
    pub reward_per_second: u128,
    #[tabled(rename = "Covers")]
    pub covers: usize,
    #[tabled(rename = "Target Σ")]
    pub total_target_weight: u32,
    #[tabled(rename = "Effective Σ")]
    pub total_effective_weight: u32,
}

impl From<&PoolSummary> for PoolRow {
    fn from(s: &PoolSummary) -> Self {
        Self {
            pool_id: s.id,
            manager: s.manager.clone(),
            pool_fee: s.pool_fee,
            is_private: s.is_private,
            active_stake: nxm(s.active_stake),
            reward_per_second: s.reward_per_second,
            covers: s.covers,
            total_target_weight: s.total_target_weight,
            total_effective_weight: s.total_effective_weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ProductRow {
    #[tabled(rename = "Pool")]
    pub pool_id: PoolId,
    #[tabled(rename = "Product")]
    pub product_id: ProductId,
    #[tabled(rename = "Target weight")]
    pub target_weight: u32,
    #[tabled(rename = "Effective weight")]
    pub effective_weight: u32,
    #[tabled(rename = "Target price")]
    pub target_price: u32,
    #[tabled(rename = "Bumped price")]
    pub bumped_price: u32,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct TrancheRow {
    #[tabled(rename = "Pool")]
    pub pool_id: PoolId,
    #[tabled(rename = "Tranche")]
    pub tranche_id: TrancheId,
    #[tabled(rename = "Expires (day)")]
    pub expires_day: u64,
    #[tabled(rename = "Stake")]
    pub stake: String,
    #[tabled(rename = "Stake shares")]
    pub stake_shares: u128,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct BalanceRow {
    #[tabled(rename = "Account")]
    pub account: String,
    #[tabled(rename = "Balance")]
    pub balance: String,
}

/// Final state of a replayed scenario.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub steps: Vec<StepRow>,
    pub pools: Vec<PoolRow>,
    pub products: Vec<ProductRow>,
    pub tranches: Vec<TrancheRow>,
    pub balances: Vec<BalanceRow>,
}

/// The ledger, its clock, and the account labels seen so far.
pub struct Simulation {
    ledger: InMemoryPools,
    start: Timestamp,
    now: Timestamp,
    accounts: BTreeMap<String, AccountId>,
}

impl Simulation {
    pub fn new(
        catalog: CoverCatalog,
        start: Timestamp,
        balances: &BTreeMap<String, String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut sim = Self {
            ledger: StakingPools::new(catalog, TokenController::new(), StakingNft::new()),
            start,
            now: start,
            accounts: BTreeMap::new(),
        };
        for (label, amount) in balances {
            let account = sim.account(label);
            let amount = Nxm::parse(amount)?;
            sim.ledger.custody_mut().mint_to(&account, amount.wei)?;
        }
        Ok(sim)
    }

    fn account(&mut self, label: &str) -> AccountId {
        *self
            .accounts
            .entry(label.to_string())
            .or_insert_with(|| AccountId::from_label(label))
    }

    fn tranche(&self, offset: u64) -> TrancheId {
        tranche_id_at(self.start) + offset
    }

    fn tranches(&self, offsets: &[u64]) -> Vec<TrancheId> {
        offsets.iter().map(|&o| self.tranche(o)).collect()
    }

    fn day(&self) -> u64 {
        (self.now - self.start) / DAY
    }

    /// Apply one step. Ledger rejections come back as errors; the ledger
    /// itself is unchanged by a rejected step.
    pub fn apply(&mut self, step: &Step) -> Result<String, Box<dyn std::error::Error>> {
        let now = self.now;
        let outcome = match step {
            Step::CreatePool {
                manager,
                is_private,
                pool_fee,
                max_pool_fee,
                products,
                deposit,
                tranche,
                metadata,
            } => {
                let caller = self.account(manager);
                let deposit_amount = match deposit {
                    Some(amount) => Nxm::parse(amount)?.wei,
                    None => 0,
                };
                let params = CreatePoolParams {
                    is_private: *is_private,
                    initial_pool_fee: *pool_fee,
                    max_pool_fee: *max_pool_fee,
                    products: products.clone(),
                    deposit_amount,
                    tranche_id: self.tranche(*tranche),
                    metadata: metadata.clone(),
                };
                let pool_id = self.ledger.create_staking_pool(now, &caller, params)?;
                format!("pool {}", pool_id)
            }
            Step::SetProducts {
                manager,
                pool_id,
                products,
            } => {
                let caller = self.account(manager);
                self.ledger.set_products(now, &caller, *pool_id, products)?;
                format!("{} product(s) updated", products.len())
            }
            Step::Deposit {
                account,
                pool_id,
                amount,
                tranche,
                position_id,
            } => {
                let caller = self.account(account);
                let amount = Nxm::parse(amount)?;
                let tranche_id = self.tranche(*tranche);
                let position = self.ledger.deposit_to(
                    now,
                    &caller,
                    *pool_id,
                    amount.wei,
                    tranche_id,
                    *position_id,
                    None,
                )?;
                format!("position {} +{} in tranche {}", position, amount, tranche_id)
            }
            Step::Extend {
                account,
                position_id,
                from,
                to,
                top_up,
            } => {
                let caller = self.account(account);
                let top_up = match top_up {
                    Some(amount) => Nxm::parse(amount)?.wei,
                    None => 0,
                };
                let (from, to) = (self.tranche(*from), self.tranche(*to));
                self.ledger
                    .extend_deposit(now, &caller, *position_id, from, to, top_up)?;
                format!("position {} moved {} -> {}", position_id, from, to)
            }
            Step::Advance { days } => {
                self.now += days * DAY;
                format!("clock at day {}", self.day())
            }
            Step::BuyCover {
                pool_id,
                cover_id,
                product_id,
                amount,
                period_days,
            } => {
                let request = AllocationRequest {
                    cover_id: *cover_id,
                    product_id: *product_id,
                    amount: Nxm::parse(amount)?.wei,
                    period: period_days * DAY,
                };
                let outcome = self.ledger.allocate_capacity(now, *pool_id, &request)?;
                format!(
                    "cover {}: {} for premium {}",
                    cover_id,
                    nxm(outcome.allocated_amount),
                    nxm(outcome.premium)
                )
            }
            Step::CancelCover { pool_id, cover_id } => {
                let outcome = self.ledger.deallocate_capacity(now, *pool_id, *cover_id)?;
                format!(
                    "cover {}: released {} units, burned {}",
                    cover_id,
                    outcome.released_units,
                    nxm(outcome.unstreamed_rewards)
                )
            }
            Step::Burn {
                pool_id,
                cover_id,
                amount,
                deallocation,
            } => {
                let request = BurnRequest {
                    cover_id: *cover_id,
                    amount: Nxm::parse(amount)?.wei,
                    deallocation_amount: match deallocation {
                        Some(amount) => Nxm::parse(amount)?.wei,
                        None => 0,
                    },
                };
                let result = self.ledger.burn_stake(now, *pool_id, &request)?;
                format!("burned {}", nxm(result.burned))
            }
            Step::Recalculate { pool_id } => {
                let weights = self
                    .ledger
                    .recalculate_effective_weights_for_all_products(now, *pool_id)?;
                let total: u32 = weights.iter().map(|w| w.effective_weight).sum();
                format!("effective weight total {}", total)
            }
            Step::Expire { pool_id } => {
                self.ledger.process_expirations(now, *pool_id, None)?;
                let first = self.ledger.pool(*pool_id)?.first_active_tranche_id();
                format!("first active tranche {}", first)
            }
            Step::Withdraw {
                account,
                position_id,
                tranches,
                rewards_only,
            } => {
                let caller = self.account(account);
                let tranche_ids = self.tranches(tranches);
                if *rewards_only {
                    let rewards =
                        self.ledger
                            .claim_rewards(now, &caller, *position_id, &tranche_ids)?;
                    format!("rewards {}", nxm(rewards))
                } else {
                    let outcome = self
                        .ledger
                        .withdraw(now, &caller, *position_id, &tranche_ids)?;
                    format!("stake {}, rewards {}", nxm(outcome.stake), nxm(outcome.rewards))
                }
            }
            Step::ManagerRewards {
                manager,
                pool_id,
                tranches,
            } => {
                let caller = self.account(manager);
                let tranche_ids = self.tranches(tranches);
                let rewards =
                    self.ledger
                        .withdraw_manager_rewards(now, &caller, *pool_id, &tranche_ids)?;
                format!("manager rewards {}", nxm(rewards))
            }
            Step::SetPoolFee {
                manager,
                pool_id,
                fee,
            } => {
                let caller = self.account(manager);
                self.ledger.set_pool_fee(now, &caller, *pool_id, *fee)?;
                format!("pool fee {}%", fee)
            }
        };
        Ok(outcome)
    }

    /// Replay every step, recording rejections. With `strict`, the first
    /// rejection aborts the run.
    pub fn run(
        &mut self,
        steps: &[Step],
        strict: bool,
    ) -> Result<Vec<StepRow>, Box<dyn std::error::Error>> {
        let mut rows = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let day = self.day();
            match self.apply(step) {
                Ok(outcome) => {
                    info!(index, action = step.name(), %outcome, "Step applied");
                    rows.push(StepRow {
                        index,
                        day,
                        action: step.name().to_string(),
                        outcome,
                        ok: true,
                    });
                }
                Err(err) => {
                    if strict {
                        return Err(format!("step {} ({}) rejected: {}", index, step.name(), err).into());
                    }
                    warn!(index, action = step.name(), error = %err, "Step rejected");
                    rows.push(StepRow {
                        index,
                        day,
                        action: step.name().to_string(),
                        outcome: format!("rejected: {}", err),
                        ok: false,
                    });
                }
            }
        }
        Ok(rows)
    }

    pub fn report(&self, steps: Vec<StepRow>) -> SimulationReport {
        let mut pools = Vec::new();
        let mut products = Vec::new();
        let mut tranches = Vec::new();

        for pool in self.ledger.pools() {
            pools.push(PoolRow::from(&pool.summary()));
            for (&product_id, product) in pool.products() {
                products.push(ProductRow {
                    pool_id: pool.id(),
                    product_id,
                    target_weight: product.target_weight,
                    effective_weight: product.last_effective_weight,
                    target_price: product.target_price,
                    bumped_price: product.bumped_price,
                });
            }
            for view in pool.active_tranches() {
                tranches.push(TrancheRow {
                    pool_id: pool.id(),
                    tranche_id: view.tranche_id,
                    expires_day: tranche_end(view.tranche_id).saturating_sub(self.start) / DAY,
                    stake: nxm(view.stake),
                    stake_shares: view.stake_shares,
                });
            }
        }

        let balances = self
            .accounts
            .iter()
            .map(|(label, account)| BalanceRow {
                account: label.clone(),
                balance: nxm(self.ledger.custody().balance_of(account)),
            })
            .collect();

        SimulationReport {
            steps,
            pools,
            products,
            tranches,
            balances,
        }
    }
}

/// Start of the tranche containing the current time.
fn default_start() -> Timestamp {
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    tranche_id_at(now) * TRANCHE_DURATION
}

/// Run the simulate subcommand.
pub fn run(
    cmd: &SimulateCmd,
    config: &NacreConfig,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(&cmd.scenario)?;
    let scenario: Scenario = serde_json::from_str(&contents)?;
    let start = scenario.start.unwrap_or_else(default_start);

    info!(
        scenario = %cmd.scenario.display(),
        steps = scenario.steps.len(),
        start,
        "Replaying scenario"
    );

    let mut sim = Simulation::new(config.catalog()?, start, &scenario.balances)?;
    let steps = sim.run(&scenario.steps, cmd.strict)?;
    let report = sim.report(steps);

    match format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            println!("Steps");
            println!("{}", format_table(&report.steps));
            println!();
            println!("Pools");
            println!("{}", format_table(&report.pools));
            println!();
            println!("Products");
            println!("{}", format_table(&report.products));
            println!();
            println!("Active tranches");
            println!("{}", format_table(&report.tranches));
            println!();
            println!("Balances");
            println!("{}", format_table(&report.balances));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "start": 78624000,
        "balances": { "manager": "1000", "alice": "9000000", "bob": "500" },
        "steps": [
            { "action": "create_pool", "manager": "manager", "max_pool_fee": 10,
              "products": [ { "product_id": 1, "weight": 10, "target_price": 200 } ] },
            { "action": "deposit", "account": "alice", "pool_id": 1, "amount": "9000000", "tranche": 1 },
            { "action": "buy_cover", "pool_id": 1, "cover_id": 1, "product_id": 1,
              "amount": "270000", "period_days": 30 },
            { "action": "set_products", "manager": "manager", "pool_id": 1,
              "products": [ { "product_id": 1, "recalculate_effective_weight": true, "target_weight": 1 } ] },
            { "action": "deposit", "account": "bob", "pool_id": 1, "amount": "5000", "tranche": 1 },
            { "action": "advance", "days": 10 }
        ]
    }"#;

    fn simulate() -> (Simulation, Vec<StepRow>) {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let config = NacreConfig::default();
        let mut sim = Simulation::new(
            config.catalog().unwrap(),
            scenario.start.unwrap(),
            &scenario.balances,
        )
        .unwrap();
        let rows = sim.run(&scenario.steps, false).unwrap();
        (sim, rows)
    }

    #[test]
    fn test_scenario_replay() {
        let (sim, rows) = simulate();
        assert_eq!(rows.len(), 6);
        assert!(rows[0].ok);
        assert_eq!(rows[0].outcome, "pool 1");
        assert!(rows[2].ok);

        // Bob only holds 500 NXM.
        assert!(!rows[4].ok);
        assert!(rows[4].outcome.starts_with("rejected"));
        assert_eq!(rows[5].day, 0);
        assert_eq!(sim.day(), 10);

        let report = sim.report(rows);
        assert_eq!(report.pools.len(), 1);
        assert_eq!(report.products.len(), 1);
        assert_eq!(report.products[0].target_weight, 1);
        assert_eq!(report.products[0].effective_weight, 2);
        assert_eq!(report.tranches.len(), 1);
        assert_eq!(report.tranches[0].tranche_id, 11);
    }

    #[test]
    fn test_strict_mode_aborts() {
        let scenario: Scenario = serde_json::from_str(SCENARIO).unwrap();
        let mut sim = Simulation::new(
            NacreConfig::default().catalog().unwrap(),
            scenario.start.unwrap(),
            &scenario.balances,
        )
        .unwrap();
        let err = sim.run(&scenario.steps, true).unwrap_err();
        assert!(err.to_string().contains("step 4"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let json = r#"{ "steps": [ { "action": "teleport" } ] }"#;
        assert!(serde_json::from_str::<Scenario>(json).is_err());
    }

    #[test]
    fn test_balances_reported_by_label() {
        let (sim, rows) = simulate();
        let report = sim.report(rows);
        let bob = report
            .balances
            .iter()
            .find(|row| row.account == "bob")
            .unwrap();
        assert_eq!(bob.balance, "500 NXM");
    }
}
