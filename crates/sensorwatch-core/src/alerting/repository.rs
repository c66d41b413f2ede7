//! Alert definition storage

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::alert::{AlertDefinition, AlertDefinitionPatch};

/// Durable collection of alert definitions
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Store a new definition; rejects duplicates of an existing identity tuple
    async fn create(&self, definition: AlertDefinition) -> Result<AlertDefinition>;

    /// All definitions in insertion order
    async fn list(&self) -> Result<Vec<AlertDefinition>>;

    async fn get(&self, id: &str) -> Result<AlertDefinition>;

    /// Apply a partial update; the result must still be unique
    async fn update(&self, id: &str, patch: AlertDefinitionPatch) -> Result<AlertDefinition>;

    /// Record the last evaluation time; unknown ids are ignored
    async fn update_last_validation(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Active definitions, optionally limited to one project
    async fn list_active(&self, project_id: Option<&str>) -> Result<Vec<AlertDefinition>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|def| def.active)
            .filter(|def| project_id.map_or(true, |p| def.project_id == p))
            .collect())
    }
}

/// Alert store backed by one JSON array on disk
///
/// Every operation holds the instance lock across its whole
/// read-modify-write cycle. Entries are kept as raw JSON; a write rewrites
/// only the entry it touches, so records this version cannot parse survive.
pub struct JsonFileAlertStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileAlertStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw entries, treating a missing or unreadable file as empty
    async fn read_entries(&self) -> Vec<Value> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read alert file, treating as empty");
                return Vec::new();
            }
        };

        if raw.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(items)) => items,
            Ok(obj @ Value::Object(_)) => vec![obj],
            Ok(_) | Err(_) => {
                warn!(path = %self.path.display(), "Alert file is not a JSON array, treating as empty");
                Vec::new()
            }
        }
    }

    /// Replace the file contents atomically
    async fn write_entries(&self, entries: &[Value]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let body = serde_json::to_vec_pretty(entries)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Parsed definitions paired with their position in the raw entries
fn definitions(entries: &[Value]) -> Vec<(usize, AlertDefinition)> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            match serde_json::from_value::<AlertDefinition>(entry.clone()) {
                Ok(def) => Some((index, def)),
                Err(e) => {
                    let id = entry.get("id").and_then(Value::as_str).unwrap_or("<none>");
                    warn!(alert_id = id, error = %e, "Skipping unreadable alert definition");
                    None
                }
            }
        })
        .collect()
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

#[async_trait]
impl AlertStore for JsonFileAlertStore {
    async fn create(&self, mut definition: AlertDefinition) -> Result<AlertDefinition> {
        if definition.id.trim().is_empty() {
            definition.id = format!("alert_{}", Uuid::now_v7().simple());
        }
        definition.validate()?;

        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await;

        if let Some((_, existing)) = definitions(&entries)
            .into_iter()
            .find(|(_, d)| d.is_duplicate_of(&definition))
        {
            debug!(existing = %existing.id, "Rejected duplicate alert definition");
            return Err(Error::Conflict {
                existing: Box::new(existing),
            });
        }
        if entries.iter().any(|e| entry_id(e) == Some(definition.id.as_str())) {
            return Err(Error::validation(format!(
                "alert id {} is already in use",
                definition.id
            )));
        }

        entries.push(serde_json::to_value(&definition)?);
        self.write_entries(&entries).await?;

        info!(alert_id = %definition.id, kind = %definition.validation_kind, "Created alert definition");
        Ok(definition)
    }

    async fn list(&self) -> Result<Vec<AlertDefinition>> {
        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await;
        Ok(definitions(&entries).into_iter().map(|(_, d)| d).collect())
    }

    async fn get(&self, id: &str) -> Result<AlertDefinition> {
        let _guard = self.lock.lock().await;
        let entries = self.read_entries().await;
        definitions(&entries)
            .into_iter()
            .map(|(_, d)| d)
            .find(|d| d.id == id)
            .ok_or_else(|| Error::not_found("Alert", id))
    }

    async fn update(&self, id: &str, patch: AlertDefinitionPatch) -> Result<AlertDefinition> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await;
        let parsed = definitions(&entries);

        let (index, current) = parsed
            .iter()
            .find(|(_, d)| d.id == id)
            .ok_or_else(|| Error::not_found("Alert", id))?;

        let mut updated = current.clone();
        patch.apply_to(&mut updated);
        updated.validate()?;

        let duplicate = parsed
            .iter()
            .find(|(i, d)| i != index && d.is_duplicate_of(&updated));
        if let Some((_, existing)) = duplicate {
            return Err(Error::Conflict {
                existing: Box::new(existing.clone()),
            });
        }

        entries[*index] = serde_json::to_value(&updated)?;
        self.write_entries(&entries).await?;

        info!(alert_id = %id, "Updated alert definition");
        Ok(updated)
    }

    async fn update_last_validation(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await;

        let Some((index, _)) = definitions(&entries).into_iter().find(|(_, d)| d.id == id) else {
            debug!(alert_id = %id, "Alert vanished before last validation update");
            return Ok(());
        };
        if let Some(fields) = entries[index].as_object_mut() {
            fields.remove("ultima_validacion");
            fields.insert("ultimaValidacion".to_string(), Value::String(at.to_rfc3339()));
        }

        self.write_entries(&entries).await
    }
}
