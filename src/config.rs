use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::intake::IntakeConfig;
use crate::launcher::HttpCallLauncherConfig;
use crate::queue::DEFAULT_LEDGER_CEILING;
use crate::reconcile::ReconcilerConfig;
use crate::scheduler::{AlwaysOpen, BusinessHours, DispatchGate, DispatcherConfig, parse_weekday};
use crate::store::{HttpLeadStoreConfig, LeadFilter};
use crate::sync::SyncConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub dispatch: DispatchSection,
    /// Origination identities, one slot each
    pub slots: Vec<String>,
    pub queue: QueueSection,
    pub sync: SyncSection,
    pub reconcile: ReconcileSection,
    pub intake: IntakeSection,
    pub business_hours: BusinessHoursSection,
    pub record_store: RecordStoreSection,
    pub launch_service: LaunchServiceSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatch: DispatchSection::default(),
            slots: Vec::new(),
            queue: QueueSection::default(),
            sync: SyncSection::default(),
            reconcile: ReconcileSection::default(),
            intake: IntakeSection::default(),
            business_hours: BusinessHoursSection::default(),
            record_store: RecordStoreSection::default(),
            launch_service: LaunchServiceSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DispatchSection {
    pub enabled: bool,
    pub tick_interval_secs: u64,
    pub respect_launch_rate_limit: bool,
    pub stale_claim_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 3,
            respect_launch_rate_limit: false,
            stale_claim_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct QueueSection {
    pub ledger_ceiling: usize,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            ledger_ceiling: DEFAULT_LEDGER_CEILING,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SyncSection {
    pub requests_per_second: u32,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            requests_per_second: 5,
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReconcileSection {
    pub poll_interval_secs: u64,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self { poll_interval_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct IntakeSection {
    pub pull_interval_secs: u64,
    pub page_size: usize,
    /// Field equality criteria passed to the record store search
    pub filter: BTreeMap<String, String>,
    pub default_country_code: String,
}

impl Default for IntakeSection {
    fn default() -> Self {
        Self {
            pull_interval_secs: 300,
            page_size: 100,
            filter: BTreeMap::new(),
            default_country_code: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BusinessHoursSection {
    pub enabled: bool,
    pub utc_offset_minutes: i32,
    pub start_hour: u32,
    pub end_hour: u32,
    pub days: Vec<String>,
}

impl Default for BusinessHoursSection {
    fn default() -> Self {
        Self {
            enabled: false,
            utc_offset_minutes: 0,
            start_hour: 9,
            end_hour: 17,
            days: ["mon", "tue", "wed", "thu", "fri"].iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RecordStoreSection {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for RecordStoreSection {
    fn default() -> Self {
        let defaults = HttpLeadStoreConfig::default();
        Self {
            base_url: defaults.base_url,
            api_key_env: defaults.api_key_env,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LaunchServiceSection {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for LaunchServiceSection {
    fn default() -> Self {
        let defaults = HttpCallLauncherConfig::default();
        Self {
            base_url: defaults.base_url,
            api_key_env: defaults.api_key_env,
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ./leaddial.yml (project config)
    /// 3. ~/.config/leaddial/leaddial.yml (user config)
    /// 4. Default values
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // Explicit path takes precedence
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let project_config = PathBuf::from(format!("{}.yml", project_name));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", project_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots.is_empty() {
            eyre::bail!("slots must list at least one origination id");
        }
        let mut seen = HashSet::new();
        for id in &self.slots {
            if id.trim().is_empty() {
                eyre::bail!("slots must not contain an empty origination id");
            }
            if !seen.insert(id.as_str()) {
                eyre::bail!("slots lists origination id {} twice", id);
            }
        }
        if self.queue.ledger_ceiling == 0 {
            eyre::bail!("queue.ledger-ceiling must be > 0");
        }
        if self.sync.requests_per_second == 0 {
            eyre::bail!("sync.requests-per-second must be > 0");
        }
        if self.sync.max_attempts == 0 {
            eyre::bail!("sync.max-attempts must be > 0");
        }
        if self.dispatch.tick_interval_secs == 0 {
            eyre::bail!("dispatch.tick-interval-secs must be > 0");
        }
        if self.dispatch.stale_claim_timeout_secs <= self.launch_service.timeout_secs {
            eyre::bail!("dispatch.stale-claim-timeout-secs must exceed launch-service.timeout-secs");
        }
        if self.reconcile.poll_interval_secs == 0 {
            eyre::bail!("reconcile.poll-interval-secs must be > 0");
        }
        if self.intake.pull_interval_secs == 0 {
            eyre::bail!("intake.pull-interval-secs must be > 0");
        }
        if self.intake.page_size == 0 {
            eyre::bail!("intake.page-size must be > 0");
        }
        if self.business_hours.enabled {
            self.business_hours_gate()?;
        }
        Ok(())
    }

    fn business_hours_gate(&self) -> Result<BusinessHours> {
        let hours = &self.business_hours;
        let days = hours
            .days
            .iter()
            .map(|d| parse_weekday(d).ok_or_else(|| eyre::eyre!("business-hours.days: unknown weekday {}", d)))
            .collect::<Result<Vec<_>>>()?;
        if days.is_empty() {
            eyre::bail!("business-hours.days must list at least one weekday");
        }
        BusinessHours::new(hours.utc_offset_minutes, hours.start_hour, hours.end_hour, days).ok_or_else(|| {
            eyre::eyre!(
                "business-hours window {}-{} at offset {} minutes is invalid",
                hours.start_hour,
                hours.end_hour,
                hours.utc_offset_minutes
            )
        })
    }

    /// Dispatch gate described by the business-hours section
    pub fn gate(&self) -> Result<Arc<dyn DispatchGate>> {
        if self.business_hours.enabled {
            Ok(Arc::new(self.business_hours_gate()?))
        } else {
            Ok(Arc::new(AlwaysOpen))
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            tick_interval: Duration::from_secs(self.dispatch.tick_interval_secs),
            enabled: self.dispatch.enabled,
            respect_launch_rate_limit: self.dispatch.respect_launch_rate_limit,
        }
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            poll_interval: Duration::from_secs(self.reconcile.poll_interval_secs),
            stale_claim_timeout: Duration::from_secs(self.dispatch.stale_claim_timeout_secs),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            requests_per_second: self.sync.requests_per_second,
            max_attempts: self.sync.max_attempts,
            initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.sync.max_backoff_ms),
        }
    }

    pub fn intake_config(&self) -> IntakeConfig {
        let filter = self
            .intake
            .filter
            .iter()
            .fold(LeadFilter::default().with_page_size(self.intake.page_size), |f, (k, v)| {
                f.with_criterion(k.clone(), v.clone())
            });
        IntakeConfig {
            filter,
            default_country_code: self.intake.default_country_code.clone(),
            pull_interval: Duration::from_secs(self.intake.pull_interval_secs),
        }
    }

    pub fn record_store_config(&self) -> HttpLeadStoreConfig {
        HttpLeadStoreConfig {
            base_url: self.record_store.base_url.clone(),
            api_key_env: self.record_store.api_key_env.clone(),
            timeout: Duration::from_secs(self.record_store.timeout_secs),
        }
    }

    pub fn launch_service_config(&self) -> HttpCallLauncherConfig {
        HttpCallLauncherConfig {
            base_url: self.launch_service.base_url.clone(),
            api_key_env: self.launch_service.api_key_env.clone(),
            timeout: Duration::from_secs(self.launch_service.timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> Config {
        Config {
            slots: vec!["orig-a".to_string(), "orig-b".to_string()],
            ..Default::default()
        }
    }

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_explicit_file() {
        let file = write_yaml(
            r#"
slots:
  - orig-a
  - orig-b
  - orig-c
dispatch:
  tick-interval-secs: 5
  respect-launch-rate-limit: true
queue:
  ledger-ceiling: 500
intake:
  filter:
    status: new
"#,
        );
        let config = Config::load(Some(&file.path().to_path_buf())).unwrap();

        assert_eq!(config.slots.len(), 3);
        assert_eq!(config.dispatch.tick_interval_secs, 5);
        assert!(config.dispatch.respect_launch_rate_limit);
        assert_eq!(config.queue.ledger_ceiling, 500);
        // Untouched sections keep their defaults
        assert_eq!(config.sync.requests_per_second, 5);
        assert_eq!(config.reconcile.poll_interval_secs, 30);
        assert_eq!(config.intake_config().filter.criteria.get("status").map(String::as_str), Some("new"));
        config.validate().unwrap();
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let path = PathBuf::from("/nonexistent/leaddial.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_malformed_yaml_fails() {
        let file = write_yaml("slots: [unterminated");
        assert!(Config::load(Some(&file.path().to_path_buf())).is_err());
    }

    #[test]
    fn test_defaults_need_slots() {
        let err = Config::default().validate().unwrap_err();
        assert!(err.to_string().contains("slots"));
        valid().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_slots() {
        let mut config = valid();
        config.slots.push("orig-a".to_string());
        assert!(config.validate().unwrap_err().to_string().contains("twice"));
    }

    #[test]
    fn test_validate_rejects_zeroes() {
        let mut config = valid();
        config.queue.ledger_ceiling = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sync.requests_per_second = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dispatch.tick_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.reconcile.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stale_claim_must_outlast_launch_timeout() {
        let mut config = valid();
        config.dispatch.stale_claim_timeout_secs = config.launch_service.timeout_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_business_hours_validation() {
        let mut config = valid();
        config.business_hours.enabled = true;
        config.validate().unwrap();

        config.business_hours.days = vec!["someday".to_string()];
        assert!(config.validate().unwrap_err().to_string().contains("someday"));

        config.business_hours.days = vec!["mon".to_string()];
        config.business_hours.start_hour = 18;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_runtime_conversions() {
        let config = valid();
        assert_eq!(config.dispatcher_config().tick_interval, Duration::from_secs(3));
        assert_eq!(config.reconciler_config().stale_claim_timeout, Duration::from_secs(120));
        assert_eq!(config.sync_config().initial_backoff, Duration::from_millis(500));
        assert_eq!(config.intake_config().filter.page_size, 100);
        assert_eq!(config.record_store_config().api_key_env, "LEADDIAL_CRM_API_KEY");
        assert_eq!(config.launch_service_config().timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_default_gate_is_open() {
        let gate = valid().gate().unwrap();
        assert!(gate.is_open(chrono::Utc::now()));
    }
}
