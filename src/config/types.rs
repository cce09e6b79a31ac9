use std::path::{Path, PathBuf};

use figment::providers::{Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::store::StoreConfig;

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0: credential store, logging, and sync output.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct ConfigV1 {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Where synced messages and media land, and how hard to hit the CDN.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct SyncConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Maximum concurrent media downloads.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_concurrency() -> usize {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            output_dir: default_output_dir(),
            concurrency: default_concurrency(),
        }
    }
}

/// Load config from a YAML file named "config.yaml" in the current
/// directory. A missing file yields the defaults; a malformed one is fatal.
pub fn load_config() -> ConfigV1 {
    if !Path::new("./config.yaml").exists() {
        return ConfigV1::default();
    }
    let figment = Figment::new().merge(Yaml::file("./config.yaml"));
    let config = match figment.extract::<Config>() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };
    match config {
        Config::ConfigV1(c) => c,
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() {
    let schema = schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema).unwrap());
}
