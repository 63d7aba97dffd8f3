//! Fix appliers, one per `FixAction` variant
//!
//! The match in [`Appliers::apply`] is exhaustive over `FixAction`, so a new
//! action type cannot be added without deciding how it applies.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::record::FixAction;
use super::settings::SettingsLock;

/// Settings key prefix under which pinned package versions are recorded
pub const PACKAGE_PIN_PREFIX: &str = "packages.";

/// What an apply actually changed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliedChange {
    /// Manual acknowledgement; nothing was mutated
    Nothing,
    Setting { key: String },
    Package { package: String, version: String },
}

/// Installs a specific package version
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, package: &str, version: &str) -> Result<()>;
}

/// Runs `<command> install <package>==<version>`
pub struct CommandInstaller {
    command: String,
}

impl CommandInstaller {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl PackageInstaller for CommandInstaller {
    async fn install(&self, package: &str, version: &str) -> Result<()> {
        let spec = format!("{}=={}", package, version);
        debug!("Running {} install {}", self.command, spec);

        let output = tokio::process::Command::new(&self.command)
            .arg("install")
            .arg(&spec)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run '{}'", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("'{} install {}' exited with {}: {}", self.command, spec, output.status, stderr.trim());
        }
        Ok(())
    }
}

/// Registry of appliers
#[derive(Clone)]
pub struct Appliers {
    installer: Arc<dyn PackageInstaller>,
    timeout: Duration,
}

impl Appliers {
    pub fn new(installer: Arc<dyn PackageInstaller>, timeout: Duration) -> Self {
        Self { installer, timeout }
    }

    /// Execute a fix against the locked settings domain
    pub async fn apply(
        &self,
        action: Option<&FixAction>,
        settings: &SettingsLock<'_>,
    ) -> Result<AppliedChange> {
        let Some(action) = action else {
            return Ok(AppliedChange::Nothing);
        };

        match action {
            FixAction::ConfigUpdate { key, value } => {
                settings
                    .set(key, value.clone())
                    .await
                    .with_context(|| format!("Failed to update setting '{}'", key))?;
                info!("Applied config update {} = {}", key, value);
                Ok(AppliedChange::Setting { key: key.clone() })
            }
            FixAction::PipUpgrade { package, version } => {
                let install = self.installer.install(package, version);
                match tokio::time::timeout(self.timeout, install).await {
                    Ok(result) => result?,
                    Err(_) => bail!(
                        "installing {}=={} timed out after {}s",
                        package,
                        version,
                        self.timeout.as_secs()
                    ),
                }

                let key = format!("{}{}", PACKAGE_PIN_PREFIX, package);
                settings
                    .set(&key, serde_json::Value::String(version.clone()))
                    .await
                    .with_context(|| format!("Failed to record pin for {}", package))?;
                info!("Upgraded {} to {}", package, version);
                Ok(AppliedChange::Package {
                    package: package.clone(),
                    version: version.clone(),
                })
            }
            FixAction::Unrecognized { kind, .. } => {
                debug!("No applier for fix action '{}', acknowledging only", kind);
                Ok(AppliedChange::Nothing)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::improvement::settings::SettingsStore;
    use crate::improvement::store::Database;
    use serde_json::json;

    fn settings() -> SettingsStore {
        SettingsStore::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_config_update_sets_key() {
        let settings = settings();
        let appliers = Appliers::new(Arc::new(MockPackageInstaller::new()), Duration::from_secs(5));

        let action = FixAction::config_update("cache_ttl", 300);
        let change = appliers.apply(Some(&action), &settings.lock().await.unwrap()).await.unwrap();

        assert_eq!(change, AppliedChange::Setting { key: "cache_ttl".to_string() });
        assert_eq!(settings.get("cache_ttl").await.unwrap(), Some(json!(300)));
    }

    #[tokio::test]
    async fn test_missing_and_unknown_actions_mutate_nothing() {
        let settings = settings();
        let appliers = Appliers::new(Arc::new(MockPackageInstaller::new()), Duration::from_secs(5));

        let unknown = FixAction::from(json!({"type": "restart_service", "service": "hue"}));
        let lock = settings.lock().await.unwrap();
        assert_eq!(appliers.apply(None, &lock).await.unwrap(), AppliedChange::Nothing);
        assert_eq!(appliers.apply(Some(&unknown), &lock).await.unwrap(), AppliedChange::Nothing);
        assert!(lock.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pip_upgrade_records_pin() {
        let settings = settings();
        let mut installer = MockPackageInstaller::new();
        installer
            .expect_install()
            .withf(|package, version| package == "requests" && version == "2.32.0")
            .times(1)
            .returning(|_, _| Ok(()));
        let appliers = Appliers::new(Arc::new(installer), Duration::from_secs(5));

        let action = FixAction::pip_upgrade("requests", "2.32.0");
        appliers.apply(Some(&action), &settings.lock().await.unwrap()).await.unwrap();

        assert_eq!(settings.get("packages.requests").await.unwrap(), Some(json!("2.32.0")));
    }

    #[tokio::test]
    async fn test_pip_upgrade_failure_leaves_settings_untouched() {
        let settings = settings();
        let mut installer = MockPackageInstaller::new();
        installer
            .expect_install()
            .returning(|_, _| Err(anyhow::anyhow!("no matching distribution")));
        let appliers = Appliers::new(Arc::new(installer), Duration::from_secs(5));

        let action = FixAction::pip_upgrade("requests", "99.0.0");
        let err = appliers.apply(Some(&action), &settings.lock().await.unwrap()).await.unwrap_err();

        assert!(err.to_string().contains("no matching distribution"));
        assert_eq!(settings.get("packages.requests").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_installer_command_fails() {
        let settings = settings();
        let appliers = Appliers::new(
            Arc::new(CommandInstaller::new("definitely-not-an-installer-binary")),
            Duration::from_secs(5),
        );

        let action = FixAction::pip_upgrade("requests", "2.32.0");
        assert!(appliers.apply(Some(&action), &settings.lock().await.unwrap()).await.is_err());
    }
}
