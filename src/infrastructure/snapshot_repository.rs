use crate::domain::models::BookingSummary;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::open_database;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Result of the most recent scrape. Each save replaces the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScrapeSnapshot {
    pub week_monday: NaiveDate,
    pub summaries: Vec<BookingSummary>,
    pub taken_at: DateTime<Utc>,
}

pub trait SnapshotRepository: Send + Sync {
    fn load(&self) -> Result<Option<ScrapeSnapshot>, InfraError>;
    fn save(&self, snapshot: &ScrapeSnapshot) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteSnapshotRepository {
    db_path: PathBuf,
}

impl SqliteSnapshotRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

impl SnapshotRepository for SqliteSnapshotRepository {
    fn load(&self) -> Result<Option<ScrapeSnapshot>, InfraError> {
        let connection = open_database(&self.db_path)?;
        let row: Option<(String, String, String)> = connection
            .query_row(
                "SELECT week_monday, summaries_json, taken_at FROM scrape_snapshot WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((week_monday_raw, summaries_json, taken_at_raw)) = row else {
            return Ok(None);
        };

        let week_monday = NaiveDate::parse_from_str(&week_monday_raw, "%Y-%m-%d").map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid scrape_snapshot.week_monday '{week_monday_raw}': {error}"
            ))
        })?;
        let taken_at = DateTime::parse_from_rfc3339(&taken_at_raw).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid scrape_snapshot.taken_at '{taken_at_raw}': {error}"
            ))
        })?;

        Ok(Some(ScrapeSnapshot {
            week_monday,
            summaries: serde_json::from_str(&summaries_json)?,
            taken_at: taken_at.with_timezone(&Utc),
        }))
    }

    fn save(&self, snapshot: &ScrapeSnapshot) -> Result<(), InfraError> {
        let connection = open_database(&self.db_path)?;
        connection.execute(
            "INSERT INTO scrape_snapshot (id, week_monday, summaries_json, taken_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
               week_monday = excluded.week_monday,
               summaries_json = excluded.summaries_json,
               taken_at = excluded.taken_at",
            params![
                snapshot.week_monday.format("%Y-%m-%d").to_string(),
                serde_json::to_string(&snapshot.summaries)?,
                snapshot.taken_at.to_rfc3339()
            ],
        )?;
        tracing::debug!(
            week_monday = %snapshot.week_monday,
            summaries = snapshot.summaries.len(),
            "scrape snapshot saved"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySnapshotRepository {
    snapshot: Mutex<Option<ScrapeSnapshot>>,
}

impl SnapshotRepository for InMemorySnapshotRepository {
    fn load(&self) -> Result<Option<ScrapeSnapshot>, InfraError> {
        let snapshot = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot lock poisoned: {error}")))?;
        Ok(snapshot.clone())
    }

    fn save(&self, snapshot: &ScrapeSnapshot) -> Result<(), InfraError> {
        let mut current = self
            .snapshot
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("snapshot lock poisoned: {error}")))?;
        *current = Some(snapshot.clone());
        Ok(())
    }
}
