// crates/nacre-cli/src/config.rs
//
// Configuration for the nacre CLI.
// Loaded from a TOML file or populated with sensible defaults.

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use nacre_core::{NacreError, ProductId};
use nacre_staking::catalog::{CatalogProduct, CoverCatalog};
use nacre_staking::{DEFAULT_GLOBAL_CAPACITY_RATIO, DEFAULT_REWARD_RATIO};

/// Runtime configuration for the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct NacreConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Default output format: "table" or "json".
    #[serde(default = "default_output")]
    pub output: String,

    /// Protocol-wide cover parameters.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// The cover catalog.
    #[serde(default = "default_products")]
    pub products: Vec<ProductConfig>,
}

/// `[protocol]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Capacity per unit of stake, over 10 000.
    #[serde(default = "default_global_capacity_ratio")]
    pub global_capacity_ratio: u32,

    /// Share of each premium streamed to stakers, over 10 000.
    #[serde(default = "default_reward_ratio")]
    pub reward_ratio: u32,
}

/// One `[[products]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductConfig {
    pub id: ProductId,
    #[serde(flatten)]
    pub product: CatalogProduct,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output() -> String {
    "table".to_string()
}

fn default_global_capacity_ratio() -> u32 {
    DEFAULT_GLOBAL_CAPACITY_RATIO
}

fn default_reward_ratio() -> u32 {
    DEFAULT_REWARD_RATIO
}

/// A small built-in catalog so scenarios run without a config file.
fn default_products() -> Vec<ProductConfig> {
    (1..=3)
        .map(|id| ProductConfig {
            id,
            product: CatalogProduct {
                capacity_reduction_ratio: 0,
                initial_price: 200,
                min_price: 100,
                grace_period: nacre_staking::DEFAULT_GRACE_PERIOD,
                is_deprecated: false,
            },
        })
        .collect()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            global_capacity_ratio: default_global_capacity_ratio(),
            reward_ratio: default_reward_ratio(),
        }
    }
}

impl Default for NacreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output: default_output(),
            protocol: ProtocolConfig::default(),
            products: default_products(),
        }
    }
}

impl NacreConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let config: NacreConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// `~/.nacre/config.toml`.
    pub fn default_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let home = dirs::home_dir().ok_or("Could not determine home directory")?;
        Ok(home.join(".nacre").join("config.toml"))
    }

    /// Build the cover catalog described by this configuration.
    pub fn catalog(&self) -> Result<CoverCatalog, NacreError> {
        let mut catalog =
            CoverCatalog::new(self.protocol.global_capacity_ratio, self.protocol.reward_ratio)?;
        for entry in &self.products {
            catalog.upsert_product(entry.id, entry.product.clone())?;
        }
        Ok(catalog)
    }
}
