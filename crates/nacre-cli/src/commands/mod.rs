// crates/nacre-cli/src/commands/mod.rs
//
// Command module declarations for the nacre CLI.

pub mod quote;
pub mod simulate;
pub mod tranches;
