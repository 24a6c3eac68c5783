// crates/nacre-cli/src/commands/tranches.rs
//
// `nacre tranches [--at <unix>]` — the depositable tranche calendar.

use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use nacre_core::{Timestamp, TrancheId, DAY};
use nacre_staking::{bucket_id_at, tranche_end, tranche_id_at, MAX_ACTIVE_TRANCHES, TRANCHE_DURATION};

use crate::output::{format_json, format_table, OutputFormat};

/// Arguments of `nacre tranches`.
#[derive(Debug, Args)]
pub struct TranchesCmd {
    /// Unix time to show the calendar at; defaults to now.
    #[arg(long)]
    pub at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Tabled)]
pub struct TrancheRow {
    #[tabled(rename = "Tranche")]
    pub tranche_id: TrancheId,
    #[tabled(rename = "Starts")]
    pub starts: String,
    #[tabled(rename = "Expires")]
    pub expires: String,
    #[tabled(rename = "Days left")]
    pub days_left: u64,
}

fn date(ts: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// The active tranches at `at`, earliest first.
pub fn calendar(at: Timestamp) -> Vec<TrancheRow> {
    let first = tranche_id_at(at);
    (first..first + MAX_ACTIVE_TRANCHES)
        .map(|tranche_id| {
            let end = tranche_end(tranche_id);
            TrancheRow {
                tranche_id,
                starts: date(tranche_id * TRANCHE_DURATION),
                expires: date(end),
                days_left: (end - at) / DAY,
            }
        })
        .collect()
}

/// Run the tranches subcommand.
pub fn run(cmd: &TranchesCmd, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let at = cmd.at.unwrap_or_else(|| Utc::now().timestamp());
    let at = Timestamp::try_from(at).map_err(|_| "timestamp must not be negative")?;
    let rows = calendar(at);

    match format {
        OutputFormat::Json => println!("{}", format_json(&rows)),
        OutputFormat::Table => {
            println!(
                "At {}  |  tranche {}  |  bucket {}",
                date(at),
                tranche_id_at(at),
                bucket_id_at(at)
            );
            println!("{}", format_table(&rows));
        }
    }
    Ok(())
}
