//! Configuration loader for the `covid-au-pipeline` batch job.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the adapters.
//!
use std::{env, path::PathBuf};

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use itertools::Itertools;

use crate::models::Region;

/// Read an optional string environment variable with a default value.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| $default.to_string())
    };
}

/// Parse an optional boolean environment variable with a default value.
macro_rules! parse_env_bool {
    ($var_name:expr, $default:expr) => {
        match env::var($var_name).ok().as_deref().map(str::trim) {
            None | Some("") => $default,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => return Err(anyhow!("Invalid {}: {}", $var_name, other)),
        }
    };
}

/// Default first day fetched for national "at a glance" infographics.
pub const DEFAULT_NATIONAL_START: &str = "2020-04-05";

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_13_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.149 Safari/537.36";

/// Strongly typed pipeline configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the whole run.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Root of the on-disk page cache (`<root>/<region>/...`).
    pub cache_dir: PathBuf,

    /// Directory receiving the final, reconciled documents.
    pub output_dir: PathBuf,

    /// Directory receiving the state-only documents.
    pub partial_dir: PathBuf,

    /// Directory holding the declarative manual correction tables.
    pub manual_dir: PathBuf,

    /// Regions to run, in execution order.
    pub regions: Vec<Region>,

    /// Always read the VIC BI export from cache instead of the endpoint.
    pub cache_powerbi: bool,

    /// first day fetched for national infographics.
    pub national_start: NaiveDate,

    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        // ---
        Config {
            cache_dir: PathBuf::from("data_cache"),
            output_dir: PathBuf::from("by_state"),
            partial_dir: PathBuf::from("by_state_partial"),
            manual_dir: PathBuf::from("manual"),
            regions: Region::ALL.to_vec(),
            cache_powerbi: false,
            national_start: NaiveDate::from_ymd_opt(2020, 4, 5).unwrap_or_default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `PIPELINE_CACHE_DIR` – page cache root (default: `data_cache`)
/// - `PIPELINE_OUTPUT_DIR` – final documents (default: `by_state`)
/// - `PIPELINE_PARTIAL_DIR` – state-only documents (default: `by_state_partial`)
/// - `PIPELINE_MANUAL_DIR` – manual tables (default: `manual`)
/// - `PIPELINE_REGIONS` – e.g. `nsw,vic,national` (default: all)
/// - `CACHE_POWERBI` – read the VIC BI export from cache (default: false)
/// - `NATIONAL_START_DATE` – first infographic date (default: 2020-04-05)
/// - `PIPELINE_USER_AGENT` – request user agent
///
/// Returns an error if any variable is present but invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let cache_dir = PathBuf::from(env_or!("PIPELINE_CACHE_DIR", "data_cache"));
    let output_dir = PathBuf::from(env_or!("PIPELINE_OUTPUT_DIR", "by_state"));
    let partial_dir = PathBuf::from(env_or!("PIPELINE_PARTIAL_DIR", "by_state_partial"));
    let manual_dir = PathBuf::from(env_or!("PIPELINE_MANUAL_DIR", "manual"));
    let regions = parse_regions(&env_or!("PIPELINE_REGIONS", ""))?;
    let cache_powerbi = parse_env_bool!("CACHE_POWERBI", false);
    let national_start = env_or!("NATIONAL_START_DATE", DEFAULT_NATIONAL_START);
    let national_start = NaiveDate::parse_from_str(&national_start, "%Y-%m-%d")
        .map_err(|e| anyhow!("Invalid NATIONAL_START_DATE: {}", e))?;
    let user_agent = env_or!("PIPELINE_USER_AGENT", DEFAULT_USER_AGENT);

    Ok(Config {
        cache_dir,
        output_dir,
        partial_dir,
        manual_dir,
        regions,
        cache_powerbi,
        national_start,
        user_agent,
    })
}

/// Parse a comma separated region list; empty means every region.
///
/// The national pass is always moved last since it consumes the partial
/// documents written by the state adapters.
pub fn parse_regions(raw: &str) -> Result<Vec<Region>> {
    // ---
    let mut regions = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Region>()
                .map_err(|_| anyhow!("Invalid PIPELINE_REGIONS entry: {}", s))
        })
        .collect::<Result<Vec<_>>>()?;

    if regions.is_empty() {
        return Ok(Region::ALL.to_vec());
    }

    regions = regions.into_iter().unique().collect();
    regions.sort_by_key(|r| *r == Region::National);
    Ok(regions)
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        let regions = self
            .regions
            .iter()
            .map(|r| r.slug())
            .collect::<Vec<_>>()
            .join(",");

        tracing::info!("Configuration loaded:");
        tracing::info!("  PIPELINE_CACHE_DIR   : {}", self.cache_dir.display());
        tracing::info!("  PIPELINE_OUTPUT_DIR  : {}", self.output_dir.display());
        tracing::info!("  PIPELINE_PARTIAL_DIR : {}", self.partial_dir.display());
        tracing::info!("  PIPELINE_MANUAL_DIR  : {}", self.manual_dir.display());
        tracing::info!("  PIPELINE_REGIONS     : {}", regions);
        tracing::info!("  CACHE_POWERBI        : {}", self.cache_powerbi);
        tracing::info!("  NATIONAL_START_DATE  : {}", self.national_start);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_empty_region_list_means_all() {
        // ---
        assert_eq!(parse_regions("").unwrap(), Region::ALL.to_vec());
        assert_eq!(parse_regions(" , ").unwrap(), Region::ALL.to_vec());
    }

    #[test]
    fn test_national_runs_last() {
        // ---
        let regions = parse_regions("national, vic,nsw").unwrap();
        assert_eq!(regions, vec![Region::Vic, Region::Nsw, Region::National]);
    }

    #[test]
    fn test_unknown_region_is_rejected() {
        // ---
        assert!(parse_regions("nsw,atlantis").is_err());
    }
}
