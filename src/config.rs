use log::info;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

use crate::download::DownloadSettings;

#[derive(Debug, Clone)]
pub struct GadgetConfig {
    pub gadget_address: String,
    pub adapter: Option<String>,
    pub log_file: PathBuf,
    pub state_dir: PathBuf,
    pub database_url: Option<String>,
    pub db_max_retries: usize,
    pub download_period_secs: u64,
    pub trigger_offset_secs: u64,
    pub discovery_timeout: Duration,
    pub download: DownloadSettings,
}

impl GadgetConfig {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Load environment variables
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup, e.g. the process environment
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gadget_address = lookup("GADGET_ADDRESS")
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .ok_or("GADGET_ADDRESS environment variable not set")?;

        let adapter = lookup("BLUETOOTH_ADAPTER").filter(|a| !a.trim().is_empty());
        let database_url = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty());

        let log_file = lookup("LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("smartgadget_log.txt"));
        let state_dir = lookup("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let download_period_secs: u64 = parse_or(&lookup, "DOWNLOAD_PERIOD_SECS", 60)?;
        let trigger_offset_secs: u64 = parse_or(&lookup, "TRIGGER_OFFSET_SECS", 10)?;
        if download_period_secs == 0 {
            return Err("DOWNLOAD_PERIOD_SECS must be greater than zero".into());
        }
        if trigger_offset_secs >= download_period_secs {
            return Err("TRIGGER_OFFSET_SECS must be smaller than DOWNLOAD_PERIOD_SECS".into());
        }

        let download = DownloadSettings {
            completion_timeout: Duration::from_secs(parse_or(&lookup, "COMPLETION_TIMEOUT_SECS", 55)?),
            overlap_ms: parse_or(&lookup, "OVERLAP_MS", 9_000)?,
            bootstrap_lookback_ms: parse_or(&lookup, "BOOTSTRAP_LOOKBACK_MS", 120_000)?,
        };

        let config = GadgetConfig {
            gadget_address,
            adapter,
            log_file,
            state_dir,
            db_max_retries: parse_or(&lookup, "DB_MAX_RETRIES", 3)?,
            database_url,
            download_period_secs,
            trigger_offset_secs,
            discovery_timeout: Duration::from_secs(parse_or(&lookup, "DISCOVERY_TIMEOUT_SECS", 20)?),
            download,
        };

        info!("Gadget: {}", config.gadget_address);
        info!(
            "Downloading every {} s at +{} s, completion timeout {:?}",
            config.download_period_secs, config.trigger_offset_secs, config.download.completion_timeout
        );
        match &config.database_url {
            Some(_) => info!("Storing readings in PostgreSQL"),
            None => info!("Storing readings in {}", config.log_file.display()),
        }

        Ok(config)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has invalid value '{}'", key, raw).into()),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<GadgetConfig, Box<dyn std::error::Error>> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GadgetConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_with_only_address() {
        let config = config_from(&[("GADGET_ADDRESS", "da:f0:63:93:be:97")]).unwrap();
        assert_eq!(config.gadget_address, "DA:F0:63:93:BE:97");
        assert_eq!(config.log_file, PathBuf::from("smartgadget_log.txt"));
        assert_eq!(config.download_period_secs, 60);
        assert_eq!(config.trigger_offset_secs, 10);
        assert_eq!(config.download.completion_timeout, Duration::from_secs(55));
        assert_eq!(config.download.overlap_ms, 9_000);
        assert_eq!(config.download.bootstrap_lookback_ms, 120_000);
        assert!(config.database_url.is_none());
        assert!(config.adapter.is_none());
    }

    #[test]
    fn address_is_required() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("GADGET_ADDRESS", "  ")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("GADGET_ADDRESS", "DA:F0:63:93:BE:97"),
            ("OVERLAP_MS", "5000"),
            ("COMPLETION_TIMEOUT_SECS", "30"),
            ("DATABASE_URL", "postgres://db/gadgets"),
            ("BLUETOOTH_ADAPTER", "hci1"),
        ])
        .unwrap();
        assert_eq!(config.download.overlap_ms, 5_000);
        assert_eq!(config.download.completion_timeout, Duration::from_secs(30));
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/gadgets"));
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
    }

    #[test]
    fn invalid_schedule_is_rejected() {
        let base = ("GADGET_ADDRESS", "DA:F0:63:93:BE:97");
        assert!(config_from(&[base, ("DOWNLOAD_PERIOD_SECS", "0")]).is_err());
        assert!(config_from(&[base, ("TRIGGER_OFFSET_SECS", "60")]).is_err());
        assert!(config_from(&[base, ("OVERLAP_MS", "lots")]).is_err());
    }
}
