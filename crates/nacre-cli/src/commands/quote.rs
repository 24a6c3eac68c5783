// crates/nacre-cli/src/commands/quote.rs
//
// `nacre quote` — premium for a hypothetical cover purchase against a
// product with the given capacity and usage.

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use nacre_core::{NacreError, DAY};
use nacre_staking::pricing::{calculate_premium, PriceBump};
use nacre_staking::{Nxm, MAX_COVER_PERIOD, MIN_COVER_PERIOD, TARGET_PRICE_DENOMINATOR};

use crate::output::{format_json, format_table, nxm, OutputFormat};

/// Arguments of `nacre quote`.
#[derive(Debug, Args)]
pub struct QuoteCmd {
    /// Cover amount in NXM.
    #[arg(long)]
    pub amount: String,

    /// Cover period in days (28..=365).
    #[arg(long, default_value_t = 365)]
    pub period: u64,

    /// Capacity of the product across the usable tranches, in NXM.
    #[arg(long)]
    pub capacity: String,

    /// Capacity already sold, in NXM.
    #[arg(long, default_value = "0")]
    pub used: String,

    /// Pool target price, in basis points of the cover amount per year.
    #[arg(long, default_value_t = 200)]
    pub target_price: u32,

    /// Last bumped price; defaults to the target price.
    #[arg(long)]
    pub bumped_price: Option<u32>,

    /// Days since the bumped price was set.
    #[arg(long, default_value_t = 0)]
    pub days_since_bump: u64,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct QuoteRow {
    #[tabled(rename = "Amount")]
    pub amount: String,
    #[tabled(rename = "Period (days)")]
    pub period_days: u64,
    #[tabled(rename = "Base price")]
    pub base_price: String,
    #[tabled(rename = "Premium")]
    pub premium: String,
    #[tabled(rename = "Next bumped price")]
    pub next_bumped_price: String,
}

/// Basis points as a percentage string.
fn percent(bps: u32) -> String {
    format!(
        "{}.{:02}%",
        bps * 100 / TARGET_PRICE_DENOMINATOR,
        bps * 10_000 / TARGET_PRICE_DENOMINATOR % 100
    )
}

fn units(amount: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let units = Nxm::parse(amount)?.to_allocation_units();
    Ok(u64::try_from(units).map_err(|_| NacreError::MathOverflow("allocation units"))?)
}

/// Price the purchase described by `cmd`.
pub fn quote(cmd: &QuoteCmd) -> Result<QuoteRow, Box<dyn std::error::Error>> {
    let period = cmd.period * DAY;
    if !(MIN_COVER_PERIOD..=MAX_COVER_PERIOD).contains(&period) {
        return Err(NacreError::CoverPeriodOutOfRange {
            period,
            min: MIN_COVER_PERIOD,
            max: MAX_COVER_PERIOD,
        }
        .into());
    }

    let amount_units = units(&cmd.amount)?;
    let capacity_units = units(&cmd.capacity)?;
    let used_units = units(&cmd.used)?;
    if used_units + amount_units > capacity_units {
        return Err(NacreError::InsufficientCapacity {
            requested: amount_units,
            available: capacity_units.saturating_sub(used_units),
        }
        .into());
    }

    let bump = PriceBump {
        bumped_price: cmd.bumped_price.unwrap_or(cmd.target_price),
        updated_at: 0,
    };
    let now = cmd.days_since_bump * DAY;
    let quote = calculate_premium(
        &bump,
        period,
        amount_units,
        used_units,
        capacity_units,
        cmd.target_price,
        now,
    )?;

    Ok(QuoteRow {
        amount: Nxm::parse(&cmd.amount)?.to_string(),
        period_days: cmd.period,
        base_price: percent(quote.base_price),
        premium: nxm(quote.premium),
        next_bumped_price: percent(quote.new_bump.bumped_price),
    })
}

/// Run the quote subcommand.
pub fn run(cmd: &QuoteCmd, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let row = quote(cmd)?;
    match format {
        OutputFormat::Json => println!("{}", format_json(&row)),
        OutputFormat::Table => println!("{}", format_table(&[row])),
    }
    Ok(())
}
