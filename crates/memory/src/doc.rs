//! Whole-document YAML persistence.
//!
//! Changelogs, scratch files, evolution logs and state files are structured
//! documents, not logs: appends are modelled as read-modify-write of the
//! full sequence.  Writes go through a `.tmp` sibling and an atomic rename
//! so a crash mid-write leaves the previous document intact.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PalaceError;

/// Read a YAML document, returning `T::default()` when the file is absent.
pub fn read_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match read_opt(path)? {
        Some(value) => Ok(value),
        None => Ok(T::default()),
    }
}

/// Read a YAML document, `None` when the file is absent.
pub fn read_opt<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PalaceError::BackingStore(format!("read {}: {e}", path.display())))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_yaml::from_str(&raw)
        .map_err(|e| PalaceError::BackingStore(format!("parse {}: {e}", path.display())))?;
    Ok(Some(value))
}

/// Serialize and write atomically (tmp + rename).
pub fn write(path: &Path, value: &impl Serialize) -> Result<()> {
    let rendered = serde_yaml::to_string(value)
        .map_err(|e| PalaceError::BackingStore(format!("encode {}: {e}", path.display())))?;
    write_text(path, &rendered)
}

/// Write free text atomically (tmp + rename).
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let tmp = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "doc.yaml".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    if let Err(err) = fs::write(&tmp, content) {
        let _ = fs::remove_file(&tmp);
        return Err(PalaceError::BackingStore(format!("write {}: {err}", path.display())).into());
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(PalaceError::BackingStore(format!("rename {}: {err}", path.display())).into());
    }
    Ok(())
}

/// Read free text, `None` when absent.
pub fn read_text_opt(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| PalaceError::BackingStore(format!("read {}: {e}", path.display())))?;
    Ok(Some(raw))
}
