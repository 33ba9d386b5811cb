use crate::image_reference::Registry;
use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use std::{env, fs, path::Path};
use tracing::info;

pub static POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub backup_registry: Registry,
    #[serde(default)]
    pub pod_namespace: Option<String>,
    #[serde(default)]
    pub ignored_namespaces: Vec<String>,
    #[serde(default)]
    pub insecure_registries: Vec<Registry>,
    #[serde(default)]
    pub webserver: Webserver,
    #[serde(default)]
    pub controller: ControllerSettings,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

impl Default for Webserver {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerSettings {
    pub concurrency: u16,
    pub transfer_timeout_seconds: u64,
    pub retry_interval_seconds: u64,
    pub conflict_retry_interval_seconds: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            transfer_timeout_seconds: 600,
            retry_interval_seconds: 30,
            conflict_retry_interval_seconds: 1,
        }
    }
}

impl ControllerSettings {
    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_seconds)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_seconds)
    }

    pub fn conflict_retry_interval(&self) -> Duration {
        Duration::from_secs(self.conflict_retry_interval_seconds)
    }
}

impl Config {
    /// The namespace this controller runs in, from the config file or the downward API.
    pub fn self_namespace(&self) -> Option<String> {
        self.pod_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| env::var(POD_NAMESPACE_ENV).ok())
            .filter(|ns| !ns.is_empty())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    if let Some(missing) = re
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .find(|var_name| env::var(var_name).is_err())
    {
        bail!("Missing environment variable: {}", missing);
    }

    let result = re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });

    Ok(result.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_expand_env_vars_success() {
        unsafe {
            env::set_var("TEST_VAR", "value123");
        }
        let input = "This is a test: ${TEST_VAR}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "This is a test: value123");
        unsafe {
            env::remove_var("TEST_VAR");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_var() {
        let input = "This will fail: ${MISSING_VAR}";
        let error = expand_env_vars(input).expect_err("Expansion should fail");
        assert_eq!(error.to_string(), "Missing environment variable: MISSING_VAR");
    }

    #[test]
    fn test_expand_env_vars_multiple_vars() {
        unsafe {
            env::set_var("VAR1", "foo");
            env::set_var("VAR2", "bar");
        }
        let input = "${VAR1} and ${VAR2}";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, "foo and bar");
        unsafe {
            env::remove_var("VAR1");
            env::remove_var("VAR2");
        }
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "No variables here";
        let expanded = expand_env_vars(input).expect("Expansion should succeed");
        assert_eq!(expanded, input);
    }

    #[test]
    fn test_load_config_file() {
        unsafe {
            env::set_var("TEST_BACKUP_REGISTRY", "10.96.0.11:5001");
        }
        let yaml_content = r#"
        backupRegistry: ${TEST_BACKUP_REGISTRY}
        podNamespace: image-clone-controller
        ignoredNamespaces:
          - monitoring
        insecureRegistries:
          - registry.internal:5000
        webserver:
          port: 9090
        controller:
          concurrency: 2
          transferTimeoutSeconds: 120
        "#;

        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        let path = tmp_file.path();
        fs::write(path, yaml_content).expect("Failed to write to temp file");

        let config = load_config(path).expect("Should load config");
        unsafe {
            env::remove_var("TEST_BACKUP_REGISTRY");
        }

        assert_eq!(config.backup_registry.as_str(), "10.96.0.11:5001");
        assert_eq!(
            config.self_namespace().as_deref(),
            Some("image-clone-controller")
        );
        assert_eq!(config.ignored_namespaces, vec!["monitoring"]);
        assert_eq!(config.insecure_registries.len(), 1);
        assert_eq!(config.webserver.port, 9090);
        assert_eq!(config.controller.concurrency, 2);
        assert_eq!(config.controller.transfer_timeout(), Duration::from_secs(120));
        assert_eq!(config.controller.retry_interval(), Duration::from_secs(30));
        assert_eq!(
            config.controller.conflict_retry_interval(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_load_config_defaults() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "backupRegistry: registry.example.com\n")
            .expect("Failed to write to temp file");

        let config = load_config(tmp_file.path()).expect("Should load config");

        assert_eq!(config.webserver.port, 8080);
        assert_eq!(config.controller.concurrency, 4);
        assert_eq!(config.controller.transfer_timeout_seconds, 600);
        assert!(config.ignored_namespaces.is_empty());
    }

    #[test]
    fn test_load_config_rejects_invalid_backup_registry() {
        let tmp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
        fs::write(tmp_file.path(), "backupRegistry: \"not a registry\"\n")
            .expect("Failed to write to temp file");

        assert!(load_config(tmp_file.path()).is_err());
    }
}
