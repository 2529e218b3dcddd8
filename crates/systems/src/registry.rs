//! System registry.
//!
//! The outward surface (`system_execute(name, params)`) is dynamic by name;
//! the records themselves are trait objects registered at boot, so the
//! internal call is a direct dispatch.  Execution results are mirrored into
//! `system-state.yaml` for `system_status`.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palace_memory::{PalaceError, StorePaths, doc};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct SystemOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl SystemOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), details: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[async_trait]
pub trait System: Send + Sync {
    fn name(&self) -> &'static str;
    fn describe(&self) -> &'static str;

    /// Current state of the system, for `system_status`.
    async fn status(&self) -> Result<serde_json::Value>;

    async fn execute(&self, params: serde_json::Value) -> Result<SystemOutcome>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemExecutionRecord {
    pub last_run: DateTime<Utc>,
    pub last_status: String,
    pub runs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStateFile {
    #[serde(default)]
    pub executions: BTreeMap<String, SystemExecutionRecord>,
}

pub struct SystemRegistry {
    paths: StorePaths,
    systems: Vec<Arc<dyn System>>,
}

impl SystemRegistry {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths, systems: Vec::new() }
    }

    pub fn register(&mut self, system: Arc<dyn System>) {
        self.systems.push(system);
    }

    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.systems.iter().map(|s| (s.name(), s.describe())).collect()
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn System>> {
        self.systems
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| PalaceError::NotFound(format!("system {name}")).into())
    }

    pub async fn execute(&self, name: &str, params: serde_json::Value) -> Result<SystemOutcome> {
        let system = self.get(name)?;
        info!(system = name, "executing system");
        let outcome = system.execute(params).await?;

        let state_path = self.paths.system_state();
        let mut state: SystemStateFile = doc::read_or_default(&state_path)?;
        let record = state
            .executions
            .entry(name.to_string())
            .or_insert(SystemExecutionRecord {
                last_run: Utc::now(),
                last_status: String::new(),
                runs: 0,
            });
        record.last_run = Utc::now();
        record.last_status = if outcome.success {
            format!("ok: {}", outcome.message)
        } else {
            format!("failed: {}", outcome.message)
        };
        record.runs += 1;
        doc::write(&state_path, &state)?;

        Ok(outcome)
    }

    /// Status of one system, or of all registered systems.
    pub async fn status(&self, name: Option<&str>) -> Result<serde_json::Value> {
        let state: SystemStateFile = doc::read_or_default(&self.paths.system_state())?;
        let mut statuses = serde_json::Map::new();
        let selected: Vec<&Arc<dyn System>> = match name {
            Some(name) => vec![self.get(name)?],
            None => self.systems.iter().collect(),
        };
        for system in selected {
            let mut status = system.status().await?;
            if let Some(record) = state.executions.get(system.name()) {
                if let Some(map) = status.as_object_mut() {
                    map.insert("last_run".to_string(), serde_json::json!(record.last_run));
                    map.insert("last_status".to_string(), serde_json::json!(record.last_status));
                    map.insert("runs".to_string(), serde_json::json!(record.runs));
                }
            }
            statuses.insert(system.name().to_string(), status);
        }
        Ok(serde_json::Value::Object(statuses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl System for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn describe(&self) -> &'static str {
            "repeats its params"
        }

        async fn status(&self) -> Result<serde_json::Value> {
            Ok(serde_json::json!({"idle": true}))
        }

        async fn execute(&self, params: serde_json::Value) -> Result<SystemOutcome> {
            Ok(SystemOutcome::ok("echoed").with_details(params))
        }
    }

    fn registry() -> (tempfile::TempDir, SystemRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let paths = StorePaths::new(dir.path());
        paths.ensure_layout().unwrap();
        let mut registry = SystemRegistry::new(paths);
        registry.register(Arc::new(Echo));
        (dir, registry)
    }

    #[tokio::test]
    async fn execute_records_state() {
        let (_dir, registry) = registry();
        let outcome = registry
            .execute("echo", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert!(outcome.success);

        let status = registry.status(Some("echo")).await.unwrap();
        let echo = status.get("echo").unwrap();
        assert_eq!(echo.get("runs").unwrap().as_u64(), Some(1));
        assert!(echo.get("last_status").unwrap().as_str().unwrap().starts_with("ok:"));
    }

    #[tokio::test]
    async fn unknown_system_is_not_found() {
        let (_dir, registry) = registry();
        assert!(registry.execute("ghost", serde_json::Value::Null).await.is_err());
        assert!(registry.status(Some("ghost")).await.is_err());
    }

    #[tokio::test]
    async fn list_names_every_registration() {
        let (_dir, registry) = registry();
        assert_eq!(registry.list(), vec![("echo", "repeats its params")]);
    }
}
