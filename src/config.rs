//! Configuration Management
//!
//! Handles persistent configuration storage for awsctl.

use crate::lifecycle::{EcsCapacity, OrchestratorSettings, DEFAULT_MAX_CONCURRENCY};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// User configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AWS CLI profile
    pub profile: Option<String>,
    /// AWS region
    pub region: Option<String>,
    /// Parallel operations per stage
    pub max_concurrency: usize,
    pub poll_interval_secs: u64,
    pub wait_timeout_secs: u64,
    /// Per-item limit for orchestration and cleanup tasks; 0 disables it
    pub task_timeout_secs: u64,
    /// ECS capacity used when a whole stack is started
    pub ecs_default_min: i32,
    pub ecs_default_max: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: None,
            region: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            poll_interval_secs: 10,
            wait_timeout_secs: 600,
            task_timeout_secs: 900,
            ecs_default_min: EcsCapacity::STACK_DEFAULT.min,
            ecs_default_max: EcsCapacity::STACK_DEFAULT.max,
        }
    }
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("awsctl").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!("Failed to read {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Parse file content, falling back to defaults when it is malformed
    pub fn parse(content: &str) -> Self {
        serde_json::from_str(content).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed config: {}", e);
            Self::default()
        })
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Get effective profile (CLI > config > AWS_PROFILE)
    pub fn effective_profile(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.profile.clone())
            .or_else(|| non_empty_env("AWS_PROFILE"))
    }

    /// Get effective region (CLI > config > AWS_REGION / AWS_DEFAULT_REGION)
    pub fn effective_region(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.region.clone())
            .or_else(|| non_empty_env("AWS_REGION"))
            .or_else(|| non_empty_env("AWS_DEFAULT_REGION"))
    }

    /// Orchestrator tuning, with an optional concurrency override
    pub fn orchestrator_settings(&self, concurrency: Option<usize>) -> Result<OrchestratorSettings> {
        Ok(OrchestratorSettings {
            max_concurrency: concurrency.unwrap_or(self.max_concurrency),
            wait_for_ecs: true,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            wait_timeout: Duration::from_secs(self.wait_timeout_secs),
            task_timeout: self.task_timeout(),
            default_capacity: EcsCapacity::new(self.ecs_default_min, self.ecs_default_max)?,
        })
    }

    /// Per-item task limit, if enabled
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    /// Set profile and save
    pub fn set_profile(&mut self, profile: &str) -> Result<()> {
        self.profile = Some(profile.to_string());
        self.save()
    }

    /// Set region and save
    pub fn set_region(&mut self, region: &str) -> Result<()> {
        self.region = Some(region.to_string());
        self.save()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.wait_timeout_secs, 600);

        let settings = config.orchestrator_settings(None).unwrap();
        assert_eq!(settings.default_capacity, EcsCapacity::new(1, 2).unwrap());
        assert_eq!(settings.wait_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(r#"{"profile":"ops","max_concurrency":3}"#);
        assert_eq!(config.profile.as_deref(), Some("ops"));
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.ecs_default_max, 2);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        assert_eq!(Config::parse("{not json"), Config::default());
    }

    #[test]
    fn test_flag_wins_over_file() {
        let config = Config {
            profile: Some("from-file".to_string()),
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.effective_profile(Some("from-flag".to_string())).as_deref(),
            Some("from-flag")
        );
        assert_eq!(config.effective_region(None).as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_concurrency_override_and_bad_capacity() {
        let config = Config {
            ecs_default_min: 3,
            ecs_default_max: 1,
            ..Default::default()
        };
        assert!(config.orchestrator_settings(Some(2)).is_err());

        let settings = Config::default().orchestrator_settings(Some(2)).unwrap();
        assert_eq!(settings.max_concurrency, 2);
    }

    #[test]
    fn test_task_timeout_zero_disables() {
        let settings = Config::default().orchestrator_settings(None).unwrap();
        assert_eq!(settings.task_timeout, Some(Duration::from_secs(900)));

        let config = Config::parse(r#"{"task_timeout_secs":0}"#);
        assert_eq!(config.task_timeout(), None);
        assert_eq!(config.orchestrator_settings(None).unwrap().task_timeout, None);
    }
}
