//! Access log feeding the decay temperature formula.
//!
//! Keys are `entry:<id>` or `component:<scope>`.  Counts only accumulate;
//! read paths that count as "touching" call [`AccessLog::record`] explicitly.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::doc;
use crate::paths::StorePaths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    pub last_accessed: DateTime<Utc>,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessMap {
    #[serde(default)]
    pub entries: BTreeMap<String, AccessRecord>,
}

pub struct AccessLog {
    paths: StorePaths,
}

impl AccessLog {
    pub fn new(paths: StorePaths) -> Self {
        Self { paths }
    }

    pub fn entry_key(id: &str) -> String {
        format!("entry:{id}")
    }

    pub fn component_key(scope: &str) -> String {
        format!("component:{scope}")
    }

    pub fn record(&self, key: &str) -> Result<()> {
        let path = self.paths.access_log();
        let mut map: AccessMap = doc::read_or_default(&path)?;
        let record = map.entries.entry(key.to_string()).or_insert(AccessRecord {
            last_accessed: Utc::now(),
            count: 0,
        });
        record.count += 1;
        record.last_accessed = Utc::now();
        doc::write(&path, &map)
    }

    pub fn count(&self, key: &str) -> Result<u64> {
        let map: AccessMap = doc::read_or_default(&self.paths.access_log())?;
        Ok(map.entries.get(key).map(|r| r.count).unwrap_or(0))
    }

    pub fn snapshot(&self) -> Result<AccessMap> {
        doc::read_or_default(&self.paths.access_log())
    }
}
