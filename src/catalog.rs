//! Static catalog of places and their weekly schedule
//!
//! Loaded from a JSON file at startup and reconciled into the store:
//! missing places and sessions are inserted, nothing is ever removed.

use crate::db::{
    weekday_to_sql, Condition, Database, DbResult, Insert, Select, PLACES, SESSIONS,
};
use chrono::{NaiveTime, Weekday};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub places: Vec<PlaceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaceEntry {
    pub name: Option<String>,
    pub schedule: Option<Vec<ScheduleEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntry {
    /// Any form `chrono::Weekday` parses: "Mon", "monday", ...
    pub weekday: String,
    /// `HH:MM`
    pub time: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub admin: Option<String>,
}

impl CatalogConfig {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub places_added: usize,
    pub sessions_added: usize,
}

/// Insert every place and session of `config` that the store lacks.
pub fn reconcile(db: &Database, config: &CatalogConfig) -> DbResult<ReconcileReport> {
    let report = db.write(|store| {
        let mut report = ReconcileReport::default();

        for entry in &config.places {
            let (Some(name), Some(schedule)) = (entry.name.as_deref(), entry.schedule.as_ref())
            else {
                tracing::warn!(?entry, "Skipping catalog place without name or schedule");
                continue;
            };
            if name.trim().is_empty() {
                tracing::warn!("Skipping catalog place with empty name");
                continue;
            }

            let found = store.select(
                &Select::from(PLACES)
                    .field("id")
                    .filter(Condition::eq("name", name)),
            )?;
            let place_id = match found.first() {
                Some(row) => row.int("id")?,
                None => {
                    report.places_added += 1;
                    store
                        .insert(&Insert::into(PLACES).value("name", name).returning("id"))?
                        .int("id")?
                }
            };

            for slot in schedule {
                let Ok(weekday) = slot.weekday.trim().parse::<Weekday>() else {
                    tracing::warn!(place = name, weekday = %slot.weekday, "Skipping session with unknown weekday");
                    continue;
                };
                let Ok(time) = NaiveTime::parse_from_str(slot.time.trim(), "%H:%M") else {
                    tracing::warn!(place = name, time = %slot.time, "Skipping session with malformed time");
                    continue;
                };
                let time = time.format("%H:%M").to_string();

                let known = store.exists(
                    &Select::from(SESSIONS)
                        .filter(Condition::eq("place_id", place_id))
                        .filter(Condition::eq("weekday", weekday_to_sql(weekday)))
                        .filter(Condition::eq("time", time.as_str())),
                )?;
                if known {
                    continue;
                }
                store.insert(
                    &Insert::into(SESSIONS)
                        .value("place_id", place_id)
                        .value("weekday", weekday_to_sql(weekday))
                        .value("time", time)
                        .value("label", slot.label.clone())
                        .value("admin", slot.admin.clone()),
                )?;
                report.sessions_added += 1;
            }
        }
        Ok(report)
    })?;

    db.cache().invalidate();
    tracing::info!(
        places_added = report.places_added,
        sessions_added = report.sessions_added,
        "Catalog reconciled"
    );
    Ok(report)
}
